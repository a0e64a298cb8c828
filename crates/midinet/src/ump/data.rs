// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Data messages: SysEx7 over Data 64 (MT 0x3) and SysEx8 / Mixed Data Set
//! over Data 128 (MT 0x5).
//!
//! A SysEx payload travels as a sequence of status-tagged fragments
//! (`Complete`, `Start`, `Continue`, `End`). [`Sysex7Assembler`] rebuilds
//! contiguous payloads per group; [`sysex7_packets`] splits an outbound
//! payload into the minimal fragment chain.

use std::collections::HashMap;

use crate::config::{SYSEX7_CHUNK, SYSEX8_CHUNK};
use crate::error::{Error, Result};

use super::stream::StreamFormat;

/// A raw Data 64 (SysEx7) packet: up to 6 payload bytes of 7-bit data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Data64Packet {
    words: [u32; 2],
}

impl Data64Packet {
    pub fn from_words(words: [u32; 2]) -> Self {
        Self { words }
    }

    pub fn words(&self) -> [u32; 2] {
        self.words
    }

    pub fn group(&self) -> u8 {
        ((self.words[0] >> 24) & 0xF) as u8
    }

    /// Fragment status (Complete / Start / Continue / End).
    pub fn format(&self) -> Option<StreamFormat> {
        StreamFormat::from_bits(((self.words[0] >> 20) & 0xF) as u8)
    }

    /// Number of payload bytes (0-6).
    pub fn byte_count(&self) -> usize {
        (((self.words[0] >> 16) & 0xF) as usize).min(SYSEX7_CHUNK)
    }

    /// The payload bytes in transmission order.
    pub fn payload(&self) -> Vec<u8> {
        let raw = [
            ((self.words[0] >> 8) & 0x7F) as u8,
            (self.words[0] & 0x7F) as u8,
            ((self.words[1] >> 24) & 0x7F) as u8,
            ((self.words[1] >> 16) & 0x7F) as u8,
            ((self.words[1] >> 8) & 0x7F) as u8,
            (self.words[1] & 0x7F) as u8,
        ];
        raw[..self.byte_count()].to_vec()
    }

    /// Build one fragment. `data` must fit in 6 bytes; bytes are masked to
    /// 7 bits as SysEx7 requires.
    pub fn new(group: u8, format: StreamFormat, data: &[u8]) -> Result<Self> {
        if data.len() > SYSEX7_CHUNK {
            return Err(Error::InvalidReserved("SysEx7 packet payload > 6 bytes"));
        }
        let mut bytes = [0u8; 6];
        for (dst, src) in bytes.iter_mut().zip(data) {
            *dst = src & 0x7F;
        }
        let w0 = (0x3u32 << 28)
            | ((group as u32 & 0xF) << 24)
            | ((format.bits() as u32) << 20)
            | ((data.len() as u32) << 16)
            | ((bytes[0] as u32) << 8)
            | bytes[1] as u32;
        let w1 = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
        Ok(Self { words: [w0, w1] })
    }
}

/// A raw Data 128 (SysEx8 / Mixed Data Set) packet: stream id plus up to
/// 13 payload bytes of 8-bit data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Data128Packet {
    words: [u32; 4],
}

impl Data128Packet {
    pub fn from_words(words: [u32; 4]) -> Self {
        Self { words }
    }

    pub fn words(&self) -> [u32; 4] {
        self.words
    }

    pub fn group(&self) -> u8 {
        ((self.words[0] >> 24) & 0xF) as u8
    }

    pub fn format(&self) -> Option<StreamFormat> {
        StreamFormat::from_bits(((self.words[0] >> 20) & 0xF) as u8)
    }

    pub fn stream_id(&self) -> u8 {
        ((self.words[0] >> 8) & 0xFF) as u8
    }

    /// Number of payload bytes (0-13).
    pub fn byte_count(&self) -> usize {
        (((self.words[0] >> 16) & 0xF) as usize).min(SYSEX8_CHUNK)
    }

    pub fn payload(&self) -> Vec<u8> {
        let mut raw = Vec::with_capacity(SYSEX8_CHUNK);
        raw.push((self.words[0] & 0xFF) as u8);
        for w in &self.words[1..] {
            raw.extend_from_slice(&w.to_be_bytes());
        }
        raw.truncate(self.byte_count());
        raw
    }

    pub fn new(group: u8, format: StreamFormat, stream_id: u8, data: &[u8]) -> Result<Self> {
        if data.len() > SYSEX8_CHUNK {
            return Err(Error::InvalidReserved("SysEx8 packet payload > 13 bytes"));
        }
        let mut bytes = [0u8; 13];
        bytes[..data.len()].copy_from_slice(data);
        let w0 = (0x5u32 << 28)
            | ((group as u32 & 0xF) << 24)
            | ((format.bits() as u32) << 20)
            | ((data.len() as u32) << 16)
            | ((stream_id as u32) << 8)
            | bytes[0] as u32;
        Ok(Self {
            words: [
                w0,
                u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
                u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]),
                u32::from_be_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]),
            ],
        })
    }
}

/// Split a SysEx7 payload into the minimal fragment chain for `group`.
///
/// Payloads of 6 bytes or fewer fit a single `Complete` packet; longer ones
/// become `Start`, `Continue`*, `End`.
pub fn sysex7_packets(group: u8, payload: &[u8]) -> Vec<Data64Packet> {
    if payload.len() <= SYSEX7_CHUNK {
        return vec![
            Data64Packet::new(group, StreamFormat::Complete, payload)
                .expect("chunk within capacity"),
        ];
    }
    let chunks: Vec<&[u8]> = payload.chunks(SYSEX7_CHUNK).collect();
    let last = chunks.len() - 1;
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let format = if i == 0 {
                StreamFormat::Start
            } else if i == last {
                StreamFormat::End
            } else {
                StreamFormat::Continue
            };
            Data64Packet::new(group, format, chunk).expect("chunk within capacity")
        })
        .collect()
}

/// Reassembles SysEx7 fragment chains into contiguous payloads, per group.
///
/// Fragments of different groups interleave freely; within a group the
/// chain must be `Start`, `Continue`*, `End` (or a lone `Complete`). A
/// fresh `Start` (or `Complete`) abandons an in-progress chain with a
/// warning diagnostic; `Continue`/`End` without a `Start` is an error.
#[derive(Debug, Default)]
pub struct Sysex7Assembler {
    in_progress: HashMap<u8, Vec<u8>>,
}

impl Sysex7Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment; returns a payload when a chain completes.
    pub fn feed(&mut self, pkt: &Data64Packet) -> Result<Option<Vec<u8>>> {
        let group = pkt.group();
        let format = pkt
            .format()
            .ok_or(Error::InvalidReserved("SysEx7 fragment status"))?;
        match format {
            StreamFormat::Complete => {
                if self.in_progress.remove(&group).is_some() {
                    log::warn!(
                        "[SYSEX] group {} reassembly abandoned by Complete fragment",
                        group
                    );
                }
                Ok(Some(pkt.payload()))
            }
            StreamFormat::Start => {
                if self.in_progress.contains_key(&group) {
                    log::warn!("[SYSEX] group {} reassembly abandoned by new Start", group);
                }
                self.in_progress.insert(group, pkt.payload());
                Ok(None)
            }
            StreamFormat::Continue => match self.in_progress.get_mut(&group) {
                Some(buf) => {
                    buf.extend_from_slice(&pkt.payload());
                    Ok(None)
                }
                None => Err(Error::ReassemblyAborted("SysEx7 Continue without Start")),
            },
            StreamFormat::End => match self.in_progress.remove(&group) {
                Some(mut buf) => {
                    buf.extend_from_slice(&pkt.payload());
                    Ok(Some(buf))
                }
                None => Err(Error::ReassemblyAborted("SysEx7 End without Start")),
            },
        }
    }
}

/// Reassembles SysEx8 fragment chains, keyed by `(group, stream id)` so
/// parallel streams within a group stay separate.
///
/// Same discipline as [`Sysex7Assembler`]: lone `Complete` bypasses, a
/// fresh `Start` abandons an in-progress chain with a diagnostic,
/// `Continue`/`End` without `Start` is an error.
#[derive(Debug, Default)]
pub struct Sysex8Assembler {
    in_progress: HashMap<(u8, u8), Vec<u8>>,
}

impl Sysex8Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment; returns a payload when a chain completes.
    pub fn feed(&mut self, pkt: &Data128Packet) -> Result<Option<Vec<u8>>> {
        let key = (pkt.group(), pkt.stream_id());
        let format = pkt
            .format()
            .ok_or(Error::InvalidReserved("SysEx8 fragment status"))?;
        match format {
            StreamFormat::Complete => {
                if self.in_progress.remove(&key).is_some() {
                    log::warn!(
                        "[SYSEX] group {} stream {} reassembly abandoned by Complete fragment",
                        key.0,
                        key.1
                    );
                }
                Ok(Some(pkt.payload()))
            }
            StreamFormat::Start => {
                if self.in_progress.contains_key(&key) {
                    log::warn!(
                        "[SYSEX] group {} stream {} reassembly abandoned by new Start",
                        key.0,
                        key.1
                    );
                }
                self.in_progress.insert(key, pkt.payload());
                Ok(None)
            }
            StreamFormat::Continue => match self.in_progress.get_mut(&key) {
                Some(buf) => {
                    buf.extend_from_slice(&pkt.payload());
                    Ok(None)
                }
                None => Err(Error::ReassemblyAborted("SysEx8 Continue without Start")),
            },
            StreamFormat::End => match self.in_progress.remove(&key) {
                Some(mut buf) => {
                    buf.extend_from_slice(&pkt.payload());
                    Ok(Some(buf))
                }
                None => Err(Error::ReassemblyAborted("SysEx8 End without Start")),
            },
        }
    }
}
