// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Projection of a parsed SMF into a wall-clock-timed UMP sequence.
//!
//! Channel-voice events become single MT 0x2 packets in the configured
//! group; SysEx events become SysEx7 fragment chains; system messages
//! hidden in escape events become MT 0x1 packets. Meta events do not play,
//! but every meta is surfaced to the caller alongside the packet sequence.

use std::time::Duration;

use crate::error::Result;
use crate::ump::{sysex7_packets, Midi1Packet, Packet, SystemPacket};

use super::{EventKind, SmfFile, TempoMap};

/// A UMP packet scheduled at a wall-clock offset from playback start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedPacket {
    pub at: Duration,
    pub packet: Packet,
}

/// A meta event surfaced at its wall-clock offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedMeta {
    pub at: Duration,
    pub meta_type: u8,
    pub data: Vec<u8>,
}

/// The playable projection of an SMF.
#[derive(Debug, Clone)]
pub struct Projection {
    /// Time-sorted UMP packets, ready for the playback scheduler.
    pub packets: Vec<TimedPacket>,
    /// Every meta event in the file, time-sorted (tempo, time signature,
    /// markers, ...). Not dispatched to endpoints.
    pub metas: Vec<TimedMeta>,
}

/// Merge, time, and project a parsed file into UMP for `group`.
pub fn project(file: &SmfFile, group: u8) -> Result<Projection> {
    let map = TempoMap::from_file(file);
    let mut packets = Vec::new();
    let mut metas = Vec::new();

    for ev in file.merged() {
        let at = map.tick_to_time(ev.tick);
        match &ev.kind {
            EventKind::Channel { status, data } => {
                let full = [*status, data[0], data[1]];
                let len = if matches!(status & 0xF0, 0xC0 | 0xD0) { 2 } else { 3 };
                match Midi1Packet::from_midi1(group, &full[..len]) {
                    Some(pkt) => packets.push(TimedPacket {
                        at,
                        packet: Packet::Midi1ChannelVoice(pkt),
                    }),
                    None => {
                        log::debug!("[SMF] dropping unprojectable channel event {:#04X}", status)
                    }
                }
            }
            EventKind::SysEx(body) => {
                // The F0 event body includes the F7 terminator; the UMP
                // SysEx7 payload excludes both frame bytes.
                let payload = match body.split_last() {
                    Some((0xF7, head)) => head,
                    _ => &body[..],
                };
                for frag in sysex7_packets(group, payload) {
                    packets.push(TimedPacket {
                        at,
                        packet: Packet::Data64(frag),
                    });
                }
            }
            EventKind::Escape(bytes) => {
                // Escapes most commonly smuggle system common/real time
                // bytes onto the wire.
                match bytes.split_first() {
                    Some((&status, data)) if status >= 0xF1 => {
                        match SystemPacket::from_midi1(group, status, data) {
                            Some(pkt) => packets.push(TimedPacket {
                                at,
                                packet: Packet::System(pkt),
                            }),
                            None => log::debug!(
                                "[SMF] dropping unprojectable escape event {:#04X}",
                                status
                            ),
                        }
                    }
                    _ => log::debug!("[SMF] dropping raw escape event ({} bytes)", bytes.len()),
                }
            }
            EventKind::Meta { meta_type, data } => {
                metas.push(TimedMeta {
                    at,
                    meta_type: *meta_type,
                    data: data.clone(),
                });
            }
        }
    }

    Ok(Projection { packets, metas })
}
