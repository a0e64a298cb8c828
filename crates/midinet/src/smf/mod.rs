// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Standard MIDI File (SMF v1) reader.
//!
//! Parses `MThd`/`MTrk` chunks into absolute-tick event tracks: delta-time
//! variable-length quantities, running status, meta events, and SysEx
//! (F0/F7) events. Unknown chunk types are skipped, as the SMF spec allows.
//!
//! Structural damage (bad magic, truncated chunk, VLQ overflow, data-less
//! running status) aborts the read with [`Error::SmfMalformed`]; a partial
//! file is never returned.

mod tempo;
mod project;

pub use project::{project, Projection, TimedMeta, TimedPacket};
pub use tempo::TempoMap;

use crate::error::{Error, Result};

/// Default tempo when no Set Tempo meta appears: 500 000 us per quarter.
pub const DEFAULT_US_PER_QUARTER: u32 = 500_000;

pub const META_END_OF_TRACK: u8 = 0x2F;
pub const META_SET_TEMPO: u8 = 0x51;
pub const META_TIME_SIGNATURE: u8 = 0x58;

/// SMF header format word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmfFormat {
    /// Format 0: a single multi-channel track.
    Single,
    /// Format 1: simultaneous tracks, merged for playback.
    MultiTrack,
    /// Format 2: independent sequences.
    MultiSong,
}

/// The MThd division word: the file's time base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Division {
    /// Metrical time: ticks per quarter note, tempo-map driven.
    TicksPerQuarter(u16),
    /// SMPTE time: fixed frames per second and ticks per frame.
    Smpte { frames_per_second: u8, ticks_per_frame: u8 },
}

/// One event within a track, at an absolute tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackEvent {
    pub tick: u64,
    pub kind: EventKind,
}

/// Track event payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A channel-voice message: full status byte plus its data bytes.
    Channel { status: u8, data: [u8; 2] },
    /// An F0 SysEx event: bytes after F0, including the F7 terminator.
    SysEx(Vec<u8>),
    /// An F7 escape event: raw bytes.
    Escape(Vec<u8>),
    /// A meta event.
    Meta { meta_type: u8, data: Vec<u8> },
}

/// A parsed track with absolute (non-decreasing) ticks.
#[derive(Debug, Clone, Default)]
pub struct Track {
    pub events: Vec<TrackEvent>,
}

/// A parsed Standard MIDI File.
#[derive(Debug, Clone)]
pub struct SmfFile {
    pub format: SmfFormat,
    pub division: Division,
    pub tracks: Vec<Track>,
}

impl SmfFile {
    /// Parse a complete SMF byte buffer.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);

        let magic = r.take(4, "MThd magic")?;
        if magic != b"MThd" {
            return Err(Error::SmfMalformed(format!(
                "expected MThd magic, got {:02X?}",
                magic
            )));
        }
        let header_len = r.u32("MThd length")?;
        if header_len < 6 {
            return Err(Error::SmfMalformed(format!(
                "MThd length {} < 6",
                header_len
            )));
        }
        let format_word = r.u16("format")?;
        let ntrks = r.u16("ntrks")?;
        let division_word = r.u16("division")?;
        // Tolerate oversized headers from future revisions.
        r.skip(header_len as usize - 6, "MThd extension")?;

        let format = match format_word {
            0 => SmfFormat::Single,
            1 => SmfFormat::MultiTrack,
            2 => SmfFormat::MultiSong,
            other => {
                return Err(Error::SmfMalformed(format!("unknown SMF format {}", other)))
            }
        };
        if format == SmfFormat::Single && ntrks != 1 {
            return Err(Error::SmfMalformed(format!(
                "format 0 file with {} tracks",
                ntrks
            )));
        }

        let division = if division_word & 0x8000 == 0 {
            Division::TicksPerQuarter(division_word)
        } else {
            let fps = (-((division_word >> 8) as u8 as i8)) as u8;
            Division::Smpte {
                frames_per_second: fps,
                ticks_per_frame: (division_word & 0xFF) as u8,
            }
        };

        let mut tracks = Vec::with_capacity(ntrks as usize);
        while tracks.len() < ntrks as usize {
            let chunk_type = r.take(4, "chunk type")?.to_vec();
            let chunk_len = r.u32("chunk length")? as usize;
            let chunk = r.take(chunk_len, "chunk body")?;
            if chunk_type == b"MTrk" {
                tracks.push(parse_track(chunk)?);
            } else {
                log::debug!(
                    "[SMF] skipping alien chunk {:02X?} ({} bytes)",
                    chunk_type,
                    chunk_len
                );
            }
        }

        Ok(SmfFile {
            format,
            division,
            tracks,
        })
    }

    /// All tracks merged into one absolute-tick-sorted sequence.
    ///
    /// The sort is stable with ties broken by the lower track index, so
    /// format 1 files play deterministically.
    pub fn merged(&self) -> Vec<TrackEvent> {
        let mut indexed: Vec<(u64, usize, usize, &TrackEvent)> = Vec::new();
        for (track_idx, track) in self.tracks.iter().enumerate() {
            for (ev_idx, ev) in track.events.iter().enumerate() {
                indexed.push((ev.tick, track_idx, ev_idx, ev));
            }
        }
        indexed.sort_by_key(|&(tick, track_idx, ev_idx, _)| (tick, track_idx, ev_idx));
        indexed.into_iter().map(|(_, _, _, ev)| ev.clone()).collect()
    }
}

fn parse_track(data: &[u8]) -> Result<Track> {
    let mut r = Reader::new(data);
    let mut events = Vec::new();
    let mut tick: u64 = 0;
    let mut running_status: Option<u8> = None;

    while !r.is_empty() {
        tick = tick
            .checked_add(r.vlq("delta time")? as u64)
            .ok_or_else(|| Error::SmfMalformed("tick overflow".into()))?;

        let first = r.u8("event status")?;
        let kind = match first {
            0xFF => {
                running_status = None;
                let meta_type = r.u8("meta type")?;
                let len = r.vlq("meta length")? as usize;
                let body = r.take(len, "meta body")?;
                EventKind::Meta {
                    meta_type,
                    data: body.to_vec(),
                }
            }
            0xF0 => {
                running_status = None;
                let len = r.vlq("sysex length")? as usize;
                let body = r.take(len, "sysex body")?;
                if body.last() != Some(&0xF7) {
                    // Multi-event SysEx (continued in F7 escapes) is legal
                    // but an empty or unterminated body is not.
                    if body.is_empty() {
                        return Err(Error::SmfMalformed("empty SysEx event".into()));
                    }
                }
                EventKind::SysEx(body.to_vec())
            }
            0xF7 => {
                running_status = None;
                let len = r.vlq("escape length")? as usize;
                EventKind::Escape(r.take(len, "escape body")?.to_vec())
            }
            status @ 0x80..=0xEF => {
                running_status = Some(status);
                channel_event(status, &mut r)?
            }
            0x00..=0x7F => {
                let status = running_status.ok_or_else(|| {
                    Error::SmfMalformed("data byte without running status".into())
                })?;
                r.unread();
                channel_event(status, &mut r)?
            }
            other => {
                return Err(Error::SmfMalformed(format!(
                    "unexpected status byte {:#04X} in track",
                    other
                )))
            }
        };

        let end = matches!(kind, EventKind::Meta { meta_type: META_END_OF_TRACK, .. });
        events.push(TrackEvent { tick, kind });
        if end {
            break;
        }
    }

    Ok(Track { events })
}

fn channel_event(status: u8, r: &mut Reader<'_>) -> Result<EventKind> {
    let two_bytes = !matches!(status & 0xF0, 0xC0 | 0xD0);
    let d1 = r.u8("channel data 1")?;
    let d2 = if two_bytes { r.u8("channel data 2")? } else { 0 };
    if d1 & 0x80 != 0 || d2 & 0x80 != 0 {
        return Err(Error::SmfMalformed(format!(
            "channel event {:#04X} with status bit set in data",
            status
        )));
    }
    Ok(EventKind::Channel {
        status,
        data: [d1, d2],
    })
}

/// Byte cursor over a chunked buffer with context-carrying errors.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.data.len() - self.pos < n {
            return Err(Error::SmfMalformed(format!(
                "truncated {} (need {}, have {})",
                what,
                n,
                self.data.len() - self.pos
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn skip(&mut self, n: usize, what: &str) -> Result<()> {
        self.take(n, what).map(|_| ())
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16> {
        let b = self.take(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Variable-length quantity: 7 bits per byte, at most 4 bytes.
    fn vlq(&mut self, what: &str) -> Result<u32> {
        let mut value: u32 = 0;
        for i in 0.. {
            if i == 4 {
                return Err(Error::SmfMalformed(format!("{} VLQ over 4 bytes", what)));
            }
            let byte = self.u8(what)?;
            value = (value << 7) | (byte & 0x7F) as u32;
            if byte & 0x80 == 0 {
                break;
            }
        }
        Ok(value)
    }

    /// Put the last consumed byte back (running-status lookahead).
    fn unread(&mut self) {
        debug_assert!(self.pos > 0);
        self.pos -= 1;
    }
}
