// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wall-clock playback scheduler.
//!
//! Dispatches a time-sorted UMP sequence to an endpoint on the monotonic
//! clock. Two guarantees: no event is dispatched before its scheduled time,
//! and events are never reordered (lateness under load is possible).
//! Cancellation is cooperative - the scheduler wakes at a bounded cadence
//! and aborts before the next dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::endpoint::UmpEndpoint;
use crate::error::Result;
use crate::smf::TimedPacket;

/// Longest single sleep; bounds cancellation latency.
const WAKE_SLICE: Duration = Duration::from_millis(10);

/// Cooperative cancellation flag, cloneable across threads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// How a playback run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Every event was dispatched.
    Completed { sent: usize },
    /// Cancelled; nothing was dispatched after the flag was raised.
    Cancelled { sent: usize },
}

/// Play a time-sorted sequence into `sink`.
///
/// Events sharing a timestamp are dispatched as one batch. The input must
/// be sorted by time (the SMF projection produces it sorted); a stray
/// earlier timestamp is dispatched immediately rather than reordered.
pub fn play(
    events: &[TimedPacket],
    sink: &mut dyn UmpEndpoint,
    cancel: &CancelToken,
) -> Result<PlaybackOutcome> {
    let start = Instant::now();
    let mut sent = 0;
    let mut i = 0;

    while i < events.len() {
        let due = start + events[i].at;

        // Sleep in slices so cancellation cuts in promptly.
        loop {
            if cancel.is_cancelled() {
                log::info!("[PLAYER] cancelled after {} events", sent);
                return Ok(PlaybackOutcome::Cancelled { sent });
            }
            let now = Instant::now();
            if now >= due {
                break;
            }
            std::thread::sleep((due - now).min(WAKE_SLICE));
        }

        // Batch everything scheduled for this instant.
        let at = events[i].at;
        let mut batch: Vec<crate::ump::Packet> = Vec::new();
        while i < events.len() && events[i].at == at {
            batch.push(events[i].packet.clone());
            i += 1;
        }
        sink.send_many(&batch)?;
        sent += batch.len();
    }

    log::debug!("[PLAYER] done, {} events dispatched", sent);
    Ok(PlaybackOutcome::Completed { sent })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::ump::{Midi1Packet, Packet};

    /// Sink recording the instant of each dispatch.
    #[derive(Default)]
    struct RecordingSink {
        received: Vec<(Instant, Packet)>,
    }

    impl UmpEndpoint for RecordingSink {
        fn send_many(&mut self, packets: &[Packet]) -> Result<()> {
            let now = Instant::now();
            for p in packets {
                self.received.push((now, p.clone()));
            }
            Ok(())
        }
        fn recv(&mut self) -> Result<Packet> {
            Err(Error::Timeout("sink only"))
        }
        fn recv_timeout(&mut self, _t: Duration) -> Result<Option<Packet>> {
            Ok(None)
        }
    }

    fn note(n: u8) -> Packet {
        Packet::Midi1ChannelVoice(Midi1Packet::note_on(0, 0, n, 100))
    }

    fn at(ms: u64, n: u8) -> TimedPacket {
        TimedPacket { at: Duration::from_millis(ms), packet: note(n) }
    }

    #[test]
    fn test_never_dispatches_early() {
        let events = vec![at(0, 1), at(40, 2), at(80, 3)];
        let mut sink = RecordingSink::default();
        let start = Instant::now();
        let outcome = play(&events, &mut sink, &CancelToken::new()).expect("playback");

        assert_eq!(outcome, PlaybackOutcome::Completed { sent: 3 });
        for (i, (when, _)) in sink.received.iter().enumerate() {
            let offset = when.duration_since(start);
            assert!(
                offset >= events[i].at,
                "event {} dispatched {:?} before its {:?} deadline",
                i,
                offset,
                events[i].at
            );
        }
    }

    #[test]
    fn test_order_is_preserved() {
        let events = vec![at(0, 1), at(10, 2), at(10, 3), at(20, 4)];
        let mut sink = RecordingSink::default();
        play(&events, &mut sink, &CancelToken::new()).expect("playback");

        let notes: Vec<Packet> = sink.received.iter().map(|(_, p)| p.clone()).collect();
        assert_eq!(notes, vec![note(1), note(2), note(3), note(4)]);
    }

    #[test]
    fn test_same_instant_events_batch() {
        // Both events of one chord go through a single send_many call, so
        // a transport packs them into one datagram.
        struct CountingSink {
            calls: usize,
            packets: usize,
        }
        impl UmpEndpoint for CountingSink {
            fn send_many(&mut self, packets: &[Packet]) -> Result<()> {
                self.calls += 1;
                self.packets += packets.len();
                Ok(())
            }
            fn recv(&mut self) -> Result<Packet> {
                Err(Error::Timeout("sink only"))
            }
            fn recv_timeout(&mut self, _t: Duration) -> Result<Option<Packet>> {
                Ok(None)
            }
        }

        let events = vec![at(0, 60), at(0, 64), at(0, 67)];
        let mut sink = CountingSink { calls: 0, packets: 0 };
        play(&events, &mut sink, &CancelToken::new()).expect("playback");
        assert_eq!(sink.calls, 1);
        assert_eq!(sink.packets, 3);
    }

    #[test]
    fn test_cancellation_stops_before_next_dispatch() {
        let events = vec![at(0, 1), at(20, 2), at(10_000, 3)];
        let mut sink = RecordingSink::default();
        let cancel = CancelToken::new();

        let canceller = cancel.clone();
        let killer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(60));
            canceller.cancel();
        });

        let start = Instant::now();
        let outcome = play(&events, &mut sink, &cancel).expect("playback");
        killer.join().expect("canceller thread");

        assert_eq!(outcome, PlaybackOutcome::Cancelled { sent: 2 });
        assert!(
            start.elapsed() < Duration::from_secs(2),
            "cancellation must not wait for the far-future event"
        );
        assert_eq!(sink.received.len(), 2);
    }

    #[test]
    fn test_cancelled_before_start_sends_nothing() {
        let events = vec![at(0, 1)];
        let mut sink = RecordingSink::default();
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = play(&events, &mut sink, &cancel).expect("playback");
        assert_eq!(outcome, PlaybackOutcome::Cancelled { sent: 0 });
        assert!(sink.received.is_empty());
    }

    #[test]
    fn test_empty_sequence_completes() {
        let mut sink = RecordingSink::default();
        let outcome = play(&[], &mut sink, &CancelToken::new()).expect("playback");
        assert_eq!(outcome, PlaybackOutcome::Completed { sent: 0 });
    }
}
