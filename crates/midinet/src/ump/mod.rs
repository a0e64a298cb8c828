// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # UMP codec (Universal MIDI Packet)
//!
//! Framing, encoding, and decoding of all UMP message families. A packet is
//! 1, 2, 3, or 4 words of 32 bits; the 4-bit Message Type (MT) in the high
//! nibble of word 0 fixes the size:
//!
//! | MT  | Words | Family |
//! |-----|-------|--------|
//! | 0x0 | 1 | Utility (NOOP, JR Clock, JR Timestamp) |
//! | 0x1 | 1 | System Real Time & System Common |
//! | 0x2 | 1 | MIDI 1.0 Channel Voice |
//! | 0x3 | 2 | Data 64 (SysEx7) |
//! | 0x4 | 2 | MIDI 2.0 Channel Voice |
//! | 0x5 | 4 | Data 128 (SysEx8, Mixed Data Set) |
//! | 0xD | 4 | Flex Data |
//! | 0xF | 4 | UMP Stream |
//!
//! Reserved MTs decode to [`Packet::Opaque`] with the size the spec table
//! dictates (0x6/0x7: 1, 0x8-0xA: 2, 0xB/0xC: 3, 0xE: 4) and round-trip
//! byte-exactly.
//!
//! Every known variant keeps its raw words and exposes typed accessors, so
//! `decode(encode(p)) == p` is word equality by construction.

mod data;
mod flex;
mod midi1;
mod midi2;
mod stream;
mod system;
mod utility;

pub use data::{sysex7_packets, Data128Packet, Data64Packet, Sysex7Assembler, Sysex8Assembler};
pub use flex::FlexDataPacket;
pub use midi1::{Midi1Packet, Midi1Status};
pub use midi2::{Midi2Packet, Midi2Status};
pub use stream::{
    endpoint_name_packets, function_block_name_packets, product_instance_id_packets,
    AssembledText, DeviceIdentity, EndpointInfo, FunctionBlockInfo, StreamFormat, StreamMessage,
    StreamPacket, StreamReassembler, StreamStatus, FILTER_DEVICE_IDENTITY, FILTER_ENDPOINT_ALL,
    FILTER_ENDPOINT_INFO, FILTER_ENDPOINT_NAME, FILTER_FUNCTION_BLOCK_ALL,
    FILTER_FUNCTION_BLOCK_INFO, FILTER_FUNCTION_BLOCK_NAME, FILTER_PRODUCT_INSTANCE_ID,
    FILTER_STREAM_CONFIGURATION,
};
pub use system::SystemPacket;
pub use utility::{UtilityPacket, UtilityStatus};

use crate::error::{Error, Result};

/// UMP Message Type: the high nibble of word 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Utility = 0x0,
    System = 0x1,
    Midi1ChannelVoice = 0x2,
    Data64 = 0x3,
    Midi2ChannelVoice = 0x4,
    Data128 = 0x5,
    FlexData = 0xD,
    Stream = 0xF,
}

impl MessageType {
    /// Map a 4-bit MT nibble to a known message type. Reserved nibbles
    /// return `None` (and decode as [`Packet::Opaque`]).
    pub fn from_nibble(mt: u8) -> Option<Self> {
        match mt & 0xF {
            0x0 => Some(MessageType::Utility),
            0x1 => Some(MessageType::System),
            0x2 => Some(MessageType::Midi1ChannelVoice),
            0x3 => Some(MessageType::Data64),
            0x4 => Some(MessageType::Midi2ChannelVoice),
            0x5 => Some(MessageType::Data128),
            0xD => Some(MessageType::FlexData),
            0xF => Some(MessageType::Stream),
            _ => None,
        }
    }

    /// Packet size in 32-bit words.
    pub fn word_count(self) -> usize {
        words_for_mt(self as u8)
    }
}

/// Packet size in words for any MT nibble, reserved ones included.
///
/// The size of a reserved MT is fixed by the UMP spec table so that decoders
/// can skip packets they do not understand without losing framing.
pub fn words_for_mt(mt: u8) -> usize {
    match mt & 0xF {
        0x0..=0x2 | 0x6 | 0x7 => 1,
        0x3 | 0x4 | 0x8..=0xA => 2,
        0xB | 0xC => 3,
        _ => 4,
    }
}

/// A decoded UMP packet: tagged union over MT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Utility(UtilityPacket),
    System(SystemPacket),
    Midi1ChannelVoice(Midi1Packet),
    Data64(Data64Packet),
    Midi2ChannelVoice(Midi2Packet),
    Data128(Data128Packet),
    FlexData(FlexDataPacket),
    Stream(StreamPacket),
    /// A packet with a reserved MT, preserved verbatim.
    Opaque { mt: u8, words: Vec<u32> },
}

impl Packet {
    /// Decode one packet from the front of `words`.
    ///
    /// Returns the packet and the number of words consumed. Fails with
    /// [`Error::Truncated`] when `words` is shorter than the size the MT
    /// dictates; never fails on a reserved MT.
    pub fn decode(words: &[u32]) -> Result<(Packet, usize)> {
        let first = *words.first().ok_or(Error::Truncated { needed: 1, got: 0 })?;
        let mt = (first >> 28) as u8;
        let size = words_for_mt(mt);
        if words.len() < size {
            return Err(Error::Truncated {
                needed: size,
                got: words.len(),
            });
        }

        let packet = match MessageType::from_nibble(mt) {
            Some(MessageType::Utility) => Packet::Utility(UtilityPacket::from_word(first)),
            Some(MessageType::System) => Packet::System(SystemPacket::from_word(first)),
            Some(MessageType::Midi1ChannelVoice) => {
                Packet::Midi1ChannelVoice(Midi1Packet::from_word(first))
            }
            Some(MessageType::Data64) => {
                Packet::Data64(Data64Packet::from_words([words[0], words[1]]))
            }
            Some(MessageType::Midi2ChannelVoice) => {
                Packet::Midi2ChannelVoice(Midi2Packet::from_words([words[0], words[1]]))
            }
            Some(MessageType::Data128) => Packet::Data128(Data128Packet::from_words([
                words[0], words[1], words[2], words[3],
            ])),
            Some(MessageType::FlexData) => Packet::FlexData(FlexDataPacket::from_words([
                words[0], words[1], words[2], words[3],
            ])),
            Some(MessageType::Stream) => Packet::Stream(StreamPacket::from_words([
                words[0], words[1], words[2], words[3],
            ])),
            None => Packet::Opaque {
                mt,
                words: words[..size].to_vec(),
            },
        };
        Ok((packet, size))
    }

    /// Append this packet's words to `out`.
    pub fn encode_into(&self, out: &mut Vec<u32>) {
        match self {
            Packet::Utility(p) => out.push(p.word()),
            Packet::System(p) => out.push(p.word()),
            Packet::Midi1ChannelVoice(p) => out.push(p.word()),
            Packet::Data64(p) => out.extend_from_slice(&p.words()),
            Packet::Midi2ChannelVoice(p) => out.extend_from_slice(&p.words()),
            Packet::Data128(p) => out.extend_from_slice(&p.words()),
            Packet::FlexData(p) => out.extend_from_slice(&p.words()),
            Packet::Stream(p) => out.extend_from_slice(&p.words()),
            Packet::Opaque { words, .. } => out.extend_from_slice(words),
        }
    }

    /// Encode into a fresh word vector.
    pub fn encode(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.word_count());
        self.encode_into(&mut out);
        out
    }

    /// The 4-bit message type nibble.
    pub fn mt(&self) -> u8 {
        match self {
            Packet::Utility(_) => 0x0,
            Packet::System(_) => 0x1,
            Packet::Midi1ChannelVoice(_) => 0x2,
            Packet::Data64(_) => 0x3,
            Packet::Midi2ChannelVoice(_) => 0x4,
            Packet::Data128(_) => 0x5,
            Packet::FlexData(_) => 0xD,
            Packet::Stream(_) => 0xF,
            Packet::Opaque { mt, .. } => *mt,
        }
    }

    /// Packet size in 32-bit words.
    pub fn word_count(&self) -> usize {
        match self {
            Packet::Opaque { words, .. } => words.len(),
            other => words_for_mt(other.mt()),
        }
    }

    /// The 4-bit group, for families that carry one (word 0 bits 24-27).
    /// Utility and Stream packets are group-less.
    pub fn group(&self) -> Option<u8> {
        match self {
            Packet::Utility(_) | Packet::Stream(_) | Packet::Opaque { .. } => None,
            Packet::System(p) => Some(p.group()),
            Packet::Midi1ChannelVoice(p) => Some(p.group()),
            Packet::Data64(p) => Some(p.group()),
            Packet::Midi2ChannelVoice(p) => Some(p.group()),
            Packet::Data128(p) => Some(p.group()),
            Packet::FlexData(p) => Some(p.group()),
        }
    }
}

/// Decode every packet in a word buffer.
///
/// Stops at the first truncated tail and reports how many words were
/// consumed, so stream adapters can retain the remainder for the next read.
pub fn decode_all(words: &[u32]) -> (Vec<Packet>, usize) {
    let mut packets = Vec::new();
    let mut consumed = 0;
    while consumed < words.len() {
        match Packet::decode(&words[consumed..]) {
            Ok((packet, n)) => {
                packets.push(packet);
                consumed += n;
            }
            Err(_) => break,
        }
    }
    (packets, consumed)
}
