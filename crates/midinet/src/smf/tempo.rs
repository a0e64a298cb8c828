// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tempo map: tick to wall-clock conversion.
//!
//! Metrical files accumulate piecewise-linear segments from Set Tempo meta
//! events; SMPTE files run at a fixed `frames x ticks-per-frame` rate.

use std::time::Duration;

use super::{Division, EventKind, SmfFile, DEFAULT_US_PER_QUARTER, META_SET_TEMPO};

/// One constant-tempo span starting at `tick`.
#[derive(Debug, Clone, Copy)]
struct Segment {
    tick: u64,
    /// Wall-clock offset of `tick` in microseconds.
    offset_us: u64,
    us_per_quarter: u32,
}

/// Piecewise-linear tick-to-time conversion.
#[derive(Debug, Clone)]
pub struct TempoMap {
    repr: Repr,
}

#[derive(Debug, Clone)]
enum Repr {
    Metrical {
        ticks_per_quarter: u32,
        /// Sorted by tick; always starts with a segment at tick 0.
        segments: Vec<Segment>,
    },
    Smpte {
        ticks_per_second: u32,
    },
}

impl TempoMap {
    /// Build the map from every Set Tempo meta in the file (all tracks
    /// merged, so format 1 conductor tracks apply to the whole file).
    pub fn from_file(file: &SmfFile) -> Self {
        let repr = match file.division {
            Division::Smpte {
                frames_per_second,
                ticks_per_frame,
            } => Repr::Smpte {
                ticks_per_second: frames_per_second as u32 * ticks_per_frame as u32,
            },
            Division::TicksPerQuarter(tpq) => {
                let tpq = u32::from(tpq.max(1));
                let mut segments = vec![Segment {
                    tick: 0,
                    offset_us: 0,
                    us_per_quarter: DEFAULT_US_PER_QUARTER,
                }];

                for ev in file.merged() {
                    let EventKind::Meta { meta_type, data } = &ev.kind else {
                        continue;
                    };
                    if *meta_type != META_SET_TEMPO || data.len() != 3 {
                        continue;
                    }
                    let us_per_quarter =
                        u32::from_be_bytes([0, data[0], data[1], data[2]]).max(1);
                    let last = *segments.last().expect("segments never empty");
                    if ev.tick == last.tick {
                        // Tempo change at the same tick replaces the segment.
                        segments.last_mut().expect("non-empty").us_per_quarter =
                            us_per_quarter;
                        continue;
                    }
                    let offset_us = last.offset_us
                        + span_us(ev.tick - last.tick, last.us_per_quarter, tpq);
                    segments.push(Segment {
                        tick: ev.tick,
                        offset_us,
                        us_per_quarter,
                    });
                }

                Repr::Metrical {
                    ticks_per_quarter: tpq,
                    segments,
                }
            }
        };
        TempoMap { repr }
    }

    /// Wall-clock offset of an absolute tick.
    pub fn tick_to_time(&self, tick: u64) -> Duration {
        match &self.repr {
            Repr::Smpte { ticks_per_second } => {
                let tps = (*ticks_per_second).max(1) as u64;
                let nanos = (tick as u128 * 1_000_000_000u128) / tps as u128;
                Duration::from_nanos(nanos as u64)
            }
            Repr::Metrical {
                ticks_per_quarter,
                segments,
            } => {
                let idx = segments.partition_point(|s| s.tick <= tick) - 1;
                let seg = segments[idx];
                Duration::from_micros(
                    seg.offset_us + span_us(tick - seg.tick, seg.us_per_quarter, *ticks_per_quarter),
                )
            }
        }
    }
}

fn span_us(ticks: u64, us_per_quarter: u32, tpq: u32) -> u64 {
    (ticks as u128 * us_per_quarter as u128 / tpq as u128) as u64
}
