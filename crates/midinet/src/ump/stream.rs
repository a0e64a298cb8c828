// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UMP Stream messages (MT 0xF): endpoint metadata and discovery.
//!
//! 128-bit, group-less packets with a 2-bit Format and a 10-bit Status.
//! Text-bearing statuses (endpoint name, product instance id, function
//! block name) span multiple packets via `Start`/`Continue`/`End` chains;
//! [`StreamReassembler`] rebuilds the full strings.
//!
//! Unknown statuses are preserved as raw [`StreamPacket`]s, never errors.

use std::collections::HashMap;

use crate::config::{ENDPOINT_NAME_CHUNK, FUNCTION_BLOCK_NAME_CHUNK};
use crate::error::{Error, Result};

/// Fragment / packet format: `Complete`, or a `Start`..`End` chain member.
///
/// Shared by Stream messages ("Format") and SysEx data messages ("Status").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamFormat {
    Complete = 0,
    Start = 1,
    Continue = 2,
    End = 3,
}

impl StreamFormat {
    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn from_bits(v: u8) -> Option<Self> {
        match v {
            0 => Some(StreamFormat::Complete),
            1 => Some(StreamFormat::Start),
            2 => Some(StreamFormat::Continue),
            3 => Some(StreamFormat::End),
            _ => None,
        }
    }

    /// Does this fragment begin a payload (`Complete` or `Start`)?
    pub fn is_starting(self) -> bool {
        matches!(self, StreamFormat::Complete | StreamFormat::Start)
    }

    /// Does this fragment finish a payload (`Complete` or `End`)?
    pub fn is_ending(self) -> bool {
        matches!(self, StreamFormat::Complete | StreamFormat::End)
    }
}

/// Known Stream message statuses (10-bit field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StreamStatus {
    EndpointDiscovery = 0x00,
    EndpointInfo = 0x01,
    DeviceIdentity = 0x02,
    EndpointName = 0x03,
    ProductInstanceId = 0x04,
    StreamConfigRequest = 0x05,
    StreamConfigNotification = 0x06,
    FunctionBlockDiscovery = 0x10,
    FunctionBlockInfo = 0x11,
    FunctionBlockName = 0x12,
    StartOfClip = 0x20,
    EndOfClip = 0x21,
}

impl StreamStatus {
    pub fn from_raw(v: u16) -> Option<Self> {
        Some(match v {
            0x00 => StreamStatus::EndpointDiscovery,
            0x01 => StreamStatus::EndpointInfo,
            0x02 => StreamStatus::DeviceIdentity,
            0x03 => StreamStatus::EndpointName,
            0x04 => StreamStatus::ProductInstanceId,
            0x05 => StreamStatus::StreamConfigRequest,
            0x06 => StreamStatus::StreamConfigNotification,
            0x10 => StreamStatus::FunctionBlockDiscovery,
            0x11 => StreamStatus::FunctionBlockInfo,
            0x12 => StreamStatus::FunctionBlockName,
            0x20 => StreamStatus::StartOfClip,
            0x21 => StreamStatus::EndOfClip,
            _ => return None,
        })
    }
}

// Endpoint Discovery filter bitmap (word 1, low 5 bits).
pub const FILTER_ENDPOINT_INFO: u8 = 1 << 0;
pub const FILTER_DEVICE_IDENTITY: u8 = 1 << 1;
pub const FILTER_ENDPOINT_NAME: u8 = 1 << 2;
pub const FILTER_PRODUCT_INSTANCE_ID: u8 = 1 << 3;
pub const FILTER_STREAM_CONFIGURATION: u8 = 1 << 4;
pub const FILTER_ENDPOINT_ALL: u8 = 0x1F;

// Function Block Discovery filter bitmap (word 0, low byte).
pub const FILTER_FUNCTION_BLOCK_INFO: u8 = 1 << 0;
pub const FILTER_FUNCTION_BLOCK_NAME: u8 = 1 << 1;
pub const FILTER_FUNCTION_BLOCK_ALL: u8 = 0x03;

/// Endpoint Info Notification fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub ump_version: (u8, u8),
    /// Function block layout is static (never changes at runtime).
    pub static_blocks: bool,
    pub num_function_blocks: u8,
    pub midi2: bool,
    pub midi1: bool,
    pub rx_jr: bool,
    pub tx_jr: bool,
}

/// Device Identity Notification fields (SysEx-style identity triple).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub manufacturer: [u8; 3],
    pub family: u16,
    pub model: u16,
    pub revision: [u8; 4],
}

/// Function Block Info Notification fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionBlockInfo {
    pub active: bool,
    pub block: u8,
    pub ui_hint_sender: bool,
    pub ui_hint_receiver: bool,
    /// 0 = not MIDI 1.0, 1 = MIDI 1.0, 2 = MIDI 1.0 restricted to 31.25 kb/s.
    pub midi1_mode: u8,
    pub is_output: bool,
    pub is_input: bool,
    pub first_group: u8,
    pub num_groups: u8,
    pub midi_ci_version: u8,
    pub max_sysex8_streams: u8,
}

/// A typed view over a Stream packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    EndpointDiscovery { ump_version: (u8, u8), filter: u8 },
    EndpointInfo(EndpointInfo),
    DeviceIdentity(DeviceIdentity),
    EndpointName { format: StreamFormat, text: Vec<u8> },
    ProductInstanceId { format: StreamFormat, text: Vec<u8> },
    StreamConfigRequest { protocol: u8, extensions: bool },
    StreamConfigNotification { protocol: u8, extensions: bool },
    FunctionBlockDiscovery { block: u8, filter: u8 },
    FunctionBlockInfo(FunctionBlockInfo),
    FunctionBlockName { block: u8, format: StreamFormat, text: Vec<u8> },
    StartOfClip,
    EndOfClip,
}

/// A raw UMP Stream packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPacket {
    words: [u32; 4],
}

impl StreamPacket {
    pub fn from_words(words: [u32; 4]) -> Self {
        Self { words }
    }

    pub fn words(&self) -> [u32; 4] {
        self.words
    }

    pub fn format(&self) -> Option<StreamFormat> {
        StreamFormat::from_bits(((self.words[0] >> 26) & 0x3) as u8)
    }

    /// Raw 10-bit status.
    pub fn status_raw(&self) -> u16 {
        ((self.words[0] >> 16) & 0x3FF) as u16
    }

    pub fn status(&self) -> Option<StreamStatus> {
        StreamStatus::from_raw(self.status_raw())
    }

    fn build(form: StreamFormat, status: StreamStatus, low16: u16, tail: [u32; 3]) -> Self {
        Self {
            words: [
                (0xFu32 << 28)
                    | ((form.bits() as u32) << 26)
                    | ((status as u32) << 16)
                    | low16 as u32,
                tail[0],
                tail[1],
                tail[2],
            ],
        }
    }

    // ===== Request constructors =====

    pub fn endpoint_discovery(ump_version: (u8, u8), filter: u8) -> Self {
        Self::build(
            StreamFormat::Complete,
            StreamStatus::EndpointDiscovery,
            ((ump_version.0 as u16) << 8) | ump_version.1 as u16,
            [(filter & FILTER_ENDPOINT_ALL) as u32, 0, 0],
        )
    }

    pub fn function_block_discovery(block: u8, filter: u8) -> Self {
        Self::build(
            StreamFormat::Complete,
            StreamStatus::FunctionBlockDiscovery,
            ((block as u16) << 8) | (filter & FILTER_FUNCTION_BLOCK_ALL) as u16,
            [0, 0, 0],
        )
    }

    pub fn stream_config_request(protocol: u8, extensions: bool) -> Self {
        Self::build(
            StreamFormat::Complete,
            StreamStatus::StreamConfigRequest,
            ((protocol as u16) << 8) | ((extensions as u16) << 7),
            [0, 0, 0],
        )
    }

    // ===== Notification constructors =====

    pub fn endpoint_info(info: &EndpointInfo) -> Self {
        let w1 = ((info.static_blocks as u32) << 31)
            | ((info.num_function_blocks as u32 & 0x7F) << 24)
            | ((info.midi2 as u32) << 9)
            | ((info.midi1 as u32) << 8)
            | ((info.rx_jr as u32) << 1)
            | info.tx_jr as u32;
        Self::build(
            StreamFormat::Complete,
            StreamStatus::EndpointInfo,
            ((info.ump_version.0 as u16) << 8) | info.ump_version.1 as u16,
            [w1, 0, 0],
        )
    }

    pub fn device_identity(id: &DeviceIdentity) -> Self {
        let w1 = ((id.manufacturer[0] as u32 & 0x7F) << 16)
            | ((id.manufacturer[1] as u32 & 0x7F) << 8)
            | (id.manufacturer[2] as u32 & 0x7F);
        let w2 = ((id.family as u32 & 0x7F) << 24)
            | (((id.family >> 7) as u32 & 0x7F) << 16)
            | ((id.model as u32 & 0x7F) << 8)
            | ((id.model >> 7) as u32 & 0x7F);
        let w3 = u32::from_be_bytes(id.revision);
        Self::build(StreamFormat::Complete, StreamStatus::DeviceIdentity, 0, [w1, w2, w3])
    }

    pub fn stream_config_notification(protocol: u8, extensions: bool) -> Self {
        Self::build(
            StreamFormat::Complete,
            StreamStatus::StreamConfigNotification,
            ((protocol as u16) << 8) | ((extensions as u16) << 7),
            [0, 0, 0],
        )
    }

    pub fn function_block_info(info: &FunctionBlockInfo) -> Self {
        let low16 = ((info.active as u16) << 15)
            | ((info.block as u16 & 0x7F) << 8)
            | ((info.ui_hint_sender as u16) << 5)
            | ((info.ui_hint_receiver as u16) << 4)
            | ((info.midi1_mode as u16 & 0x3) << 2)
            | ((info.is_output as u16) << 1)
            | info.is_input as u16;
        let w1 = ((info.first_group as u32) << 24)
            | ((info.num_groups as u32) << 16)
            | ((info.midi_ci_version as u32) << 8)
            | info.max_sysex8_streams as u32;
        Self::build(StreamFormat::Complete, StreamStatus::FunctionBlockInfo, low16, [w1, 0, 0])
    }

    /// One Endpoint Name chunk (up to 14 bytes).
    pub fn endpoint_name_chunk(format: StreamFormat, chunk: &[u8]) -> Self {
        let (low16, tail) = pack_text_14(chunk);
        Self::build(format, StreamStatus::EndpointName, low16, tail)
    }

    /// One Product Instance Id chunk (up to 14 bytes).
    pub fn product_instance_id_chunk(format: StreamFormat, chunk: &[u8]) -> Self {
        let (low16, tail) = pack_text_14(chunk);
        Self::build(format, StreamStatus::ProductInstanceId, low16, tail)
    }

    /// One Function Block Name chunk (up to 13 bytes).
    pub fn function_block_name_chunk(block: u8, format: StreamFormat, chunk: &[u8]) -> Self {
        let (first, tail) = pack_text_13(chunk);
        Self::build(
            format,
            StreamStatus::FunctionBlockName,
            ((block as u16) << 8) | first as u16,
            tail,
        )
    }

    pub fn start_of_clip() -> Self {
        Self::build(StreamFormat::Complete, StreamStatus::StartOfClip, 0, [0, 0, 0])
    }

    pub fn end_of_clip() -> Self {
        Self::build(StreamFormat::Complete, StreamStatus::EndOfClip, 0, [0, 0, 0])
    }

    // ===== Typed parse =====

    /// Interpret the packet. Unknown statuses return `None`; the raw packet
    /// remains available for round-tripping.
    pub fn message(&self) -> Option<StreamMessage> {
        let w = &self.words;
        let format = self.format()?;
        let low16 = (w[0] & 0xFFFF) as u16;
        Some(match self.status()? {
            StreamStatus::EndpointDiscovery => StreamMessage::EndpointDiscovery {
                ump_version: ((low16 >> 8) as u8, low16 as u8),
                filter: (w[1] & FILTER_ENDPOINT_ALL as u32) as u8,
            },
            StreamStatus::EndpointInfo => StreamMessage::EndpointInfo(EndpointInfo {
                ump_version: ((low16 >> 8) as u8, low16 as u8),
                static_blocks: w[1] & (1 << 31) != 0,
                num_function_blocks: ((w[1] >> 24) & 0x7F) as u8,
                midi2: w[1] & (1 << 9) != 0,
                midi1: w[1] & (1 << 8) != 0,
                rx_jr: w[1] & (1 << 1) != 0,
                tx_jr: w[1] & 1 != 0,
            }),
            StreamStatus::DeviceIdentity => StreamMessage::DeviceIdentity(DeviceIdentity {
                manufacturer: [
                    ((w[1] >> 16) & 0x7F) as u8,
                    ((w[1] >> 8) & 0x7F) as u8,
                    (w[1] & 0x7F) as u8,
                ],
                family: ((((w[2] >> 16) & 0x7F) << 7) | ((w[2] >> 24) & 0x7F)) as u16,
                model: (((w[2] & 0x7F) << 7) | ((w[2] >> 8) & 0x7F)) as u16,
                revision: w[3].to_be_bytes(),
            }),
            StreamStatus::EndpointName => StreamMessage::EndpointName {
                format,
                text: unpack_text_14(w),
            },
            StreamStatus::ProductInstanceId => StreamMessage::ProductInstanceId {
                format,
                text: unpack_text_14(w),
            },
            StreamStatus::StreamConfigRequest => StreamMessage::StreamConfigRequest {
                protocol: (low16 >> 8) as u8,
                extensions: low16 & (1 << 7) != 0,
            },
            StreamStatus::StreamConfigNotification => StreamMessage::StreamConfigNotification {
                protocol: (low16 >> 8) as u8,
                extensions: low16 & (1 << 7) != 0,
            },
            StreamStatus::FunctionBlockDiscovery => StreamMessage::FunctionBlockDiscovery {
                block: (low16 >> 8) as u8,
                filter: (low16 & FILTER_FUNCTION_BLOCK_ALL as u16) as u8,
            },
            StreamStatus::FunctionBlockInfo => StreamMessage::FunctionBlockInfo(FunctionBlockInfo {
                active: low16 & (1 << 15) != 0,
                block: ((low16 >> 8) & 0x7F) as u8,
                ui_hint_sender: low16 & (1 << 5) != 0,
                ui_hint_receiver: low16 & (1 << 4) != 0,
                midi1_mode: ((low16 >> 2) & 0x3) as u8,
                is_output: low16 & (1 << 1) != 0,
                is_input: low16 & 1 != 0,
                first_group: (w[1] >> 24) as u8,
                num_groups: ((w[1] >> 16) & 0xFF) as u8,
                midi_ci_version: ((w[1] >> 8) & 0xFF) as u8,
                max_sysex8_streams: (w[1] & 0xFF) as u8,
            }),
            StreamStatus::FunctionBlockName => StreamMessage::FunctionBlockName {
                block: ((low16 >> 8) & 0xFF) as u8,
                format,
                text: unpack_text_13(w),
            },
            StreamStatus::StartOfClip => StreamMessage::StartOfClip,
            StreamStatus::EndOfClip => StreamMessage::EndOfClip,
        })
    }
}

// ===== Text packing helpers =====

/// 14-byte layout: 2 bytes in word 0, 4 in each of words 1-3.
fn pack_text_14(chunk: &[u8]) -> (u16, [u32; 3]) {
    debug_assert!(chunk.len() <= ENDPOINT_NAME_CHUNK);
    let mut bytes = [0u8; 14];
    bytes[..chunk.len()].copy_from_slice(chunk);
    (
        u16::from_be_bytes([bytes[0], bytes[1]]),
        [
            u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
            u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
            u32::from_be_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]),
        ],
    )
}

fn unpack_text_14(w: &[u32; 4]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(14);
    bytes.extend_from_slice(&[(w[0] >> 8) as u8, w[0] as u8]);
    for word in &w[1..] {
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    bytes
}

/// 13-byte layout: 1 byte in word 0 (after the block id), 4 in words 1-3.
fn pack_text_13(chunk: &[u8]) -> (u8, [u32; 3]) {
    debug_assert!(chunk.len() <= FUNCTION_BLOCK_NAME_CHUNK);
    let mut bytes = [0u8; 13];
    bytes[..chunk.len()].copy_from_slice(chunk);
    (
        bytes[0],
        [
            u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
            u32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]),
            u32::from_be_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]),
        ],
    )
}

fn unpack_text_13(w: &[u32; 4]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(13);
    bytes.push(w[0] as u8);
    for word in &w[1..] {
        bytes.extend_from_slice(&word.to_be_bytes());
    }
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    bytes
}

fn chunk_formats(n_chunks: usize) -> impl Iterator<Item = (usize, StreamFormat)> {
    (0..n_chunks).map(move |i| {
        let format = if n_chunks == 1 {
            StreamFormat::Complete
        } else if i == 0 {
            StreamFormat::Start
        } else if i == n_chunks - 1 {
            StreamFormat::End
        } else {
            StreamFormat::Continue
        };
        (i, format)
    })
}

/// Split an endpoint name into notification packets (Complete, or a
/// Start/Continue/End chain for names over 14 bytes).
pub fn endpoint_name_packets(name: &str) -> Vec<StreamPacket> {
    let bytes = name.as_bytes();
    let chunks: Vec<&[u8]> = if bytes.is_empty() {
        vec![&[]]
    } else {
        bytes.chunks(ENDPOINT_NAME_CHUNK).collect()
    };
    chunk_formats(chunks.len())
        .map(|(i, format)| StreamPacket::endpoint_name_chunk(format, chunks[i]))
        .collect()
}

/// Split a product instance id into notification packets.
pub fn product_instance_id_packets(piid: &str) -> Vec<StreamPacket> {
    let bytes = piid.as_bytes();
    let chunks: Vec<&[u8]> = if bytes.is_empty() {
        vec![&[]]
    } else {
        bytes.chunks(ENDPOINT_NAME_CHUNK).collect()
    };
    chunk_formats(chunks.len())
        .map(|(i, format)| StreamPacket::product_instance_id_chunk(format, chunks[i]))
        .collect()
}

/// Split a function block name into notification packets.
pub fn function_block_name_packets(block: u8, name: &str) -> Vec<StreamPacket> {
    let bytes = name.as_bytes();
    let chunks: Vec<&[u8]> = if bytes.is_empty() {
        vec![&[]]
    } else {
        bytes.chunks(FUNCTION_BLOCK_NAME_CHUNK).collect()
    };
    chunk_formats(chunks.len())
        .map(|(i, format)| StreamPacket::function_block_name_chunk(block, format, chunks[i]))
        .collect()
}

/// A fully reassembled text payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledText {
    pub status: StreamStatus,
    /// Function block id for FunctionBlockName payloads.
    pub block: Option<u8>,
    pub text: String,
}

/// Reassembles multi-packet Stream text payloads.
///
/// Keyed by `(status, block)` so a function-block name chain does not mix
/// with an endpoint name chain. A `Complete` packet bypasses reassembly. A
/// new `Start` abandons an in-progress chain for the same key with a warning
/// diagnostic; `Continue`/`End` without a `Start` is an error.
#[derive(Debug, Default)]
pub struct StreamReassembler {
    in_progress: HashMap<(u16, u8), Vec<u8>>,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one Stream packet. Non-text messages pass through as `None`.
    pub fn feed(&mut self, pkt: &StreamPacket) -> Result<Option<AssembledText>> {
        let (status, block, format, text) = match pkt.message() {
            Some(StreamMessage::EndpointName { format, text }) => {
                (StreamStatus::EndpointName, None, format, text)
            }
            Some(StreamMessage::ProductInstanceId { format, text }) => {
                (StreamStatus::ProductInstanceId, None, format, text)
            }
            Some(StreamMessage::FunctionBlockName { block, format, text }) => {
                (StreamStatus::FunctionBlockName, Some(block), format, text)
            }
            _ => return Ok(None),
        };

        let key = (status as u16, block.unwrap_or(0));
        match format {
            StreamFormat::Complete => {
                if self.in_progress.remove(&key).is_some() {
                    log::warn!(
                        "[STREAM] status {:#x} reassembly abandoned by Complete packet",
                        key.0
                    );
                }
                Ok(Some(AssembledText {
                    status,
                    block,
                    text: String::from_utf8_lossy(&text).into_owned(),
                }))
            }
            StreamFormat::Start => {
                if self.in_progress.insert(key, text).is_some() {
                    log::warn!("[STREAM] status {:#x} reassembly abandoned by new Start", key.0);
                    return Err(Error::ReassemblyAborted("new Start while reassembling"));
                }
                Ok(None)
            }
            StreamFormat::Continue => match self.in_progress.get_mut(&key) {
                Some(buf) => {
                    buf.extend_from_slice(&text);
                    Ok(None)
                }
                None => Err(Error::ReassemblyAborted("Stream Continue without Start")),
            },
            StreamFormat::End => match self.in_progress.remove(&key) {
                Some(mut buf) => {
                    buf.extend_from_slice(&text);
                    Ok(Some(AssembledText {
                        status,
                        block,
                        text: String::from_utf8_lossy(&buf).into_owned(),
                    }))
                }
                None => Err(Error::ReassemblyAborted("Stream End without Start")),
            },
        }
    }
}
