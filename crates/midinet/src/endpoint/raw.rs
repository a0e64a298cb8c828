// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Raw UMP endpoint over a bidirectional byte channel.
//!
//! The channel delivers UMP words in host-native endianness, aligned to 32
//! bits - the contract of the Linux ALSA UMP character device. A reader
//! thread accumulates bytes into words, retains short reads, and feeds
//! decoded packets to a bounded queue; writes serialize each packet into a
//! single write call so a packet is never split.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::error::{Error, Result};
use crate::ump::{decode_all, Packet};

use super::UmpEndpoint;

/// Decoded packets buffered between the reader thread and `recv`.
const RX_QUEUE_DEPTH: usize = 256;

/// A UMP endpoint over a raw word-aligned byte channel.
pub struct RawEndpoint {
    writer: Box<dyn Write + Send>,
    rx: Receiver<Result<Packet>>,
}

impl RawEndpoint {
    /// Open a UMP character device (read + write) at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let reader = file.try_clone()?;
        log::info!("[RAW] opened {}", path.display());
        Ok(Self::from_channel(reader, file))
    }

    /// Wrap an arbitrary byte channel (split into reader and writer halves).
    pub fn from_channel(
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
    ) -> Self {
        let (tx, rx) = bounded(RX_QUEUE_DEPTH);
        std::thread::Builder::new()
            .name("midinet-raw-rx".into())
            .spawn(move || reader_loop(reader, &tx))
            .expect("spawn raw reader thread");
        Self {
            writer: Box::new(writer),
            rx,
        }
    }
}

impl UmpEndpoint for RawEndpoint {
    fn send_many(&mut self, packets: &[Packet]) -> Result<()> {
        for packet in packets {
            // One write per packet: the device contract forbids splitting a
            // packet across writes.
            let words = packet.encode();
            let mut bytes = Vec::with_capacity(words.len() * 4);
            for w in &words {
                bytes.extend_from_slice(&w.to_ne_bytes());
            }
            self.writer.write_all(&bytes)?;
            log::debug!("[RAW] tx {:?} ({} words)", packet.mt(), words.len());
        }
        self.writer.flush()?;
        Ok(())
    }

    fn recv(&mut self) -> Result<Packet> {
        self.rx.recv().map_err(|_| Error::SessionClosed)?
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Packet>> {
        match self.rx.recv_timeout(timeout) {
            Ok(res) => res.map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::SessionClosed),
        }
    }
}

fn reader_loop(mut reader: impl Read, tx: &Sender<Result<Packet>>) {
    let mut chunk = [0u8; 512];
    let mut bytes: Vec<u8> = Vec::new();
    let mut words: Vec<u32> = Vec::new();

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break, // EOF
            Ok(n) => n,
            Err(e) => {
                let _ = tx.send(Err(Error::Io(e)));
                return;
            }
        };
        bytes.extend_from_slice(&chunk[..n]);

        // Whole words only; a short read keeps its tail for next time.
        let whole = bytes.len() / 4;
        for i in 0..whole {
            words.push(u32::from_ne_bytes(
                bytes[i * 4..i * 4 + 4].try_into().expect("4-byte slice"),
            ));
        }
        bytes.drain(..whole * 4);

        let (packets, consumed) = decode_all(&words);
        words.drain(..consumed);
        for packet in packets {
            if tx.send(Ok(packet)).is_err() {
                return; // endpoint dropped
            }
        }
    }

    if !bytes.is_empty() {
        // EOF inside a word: the channel broke the alignment contract.
        let _ = tx.send(Err(Error::Misaligned(bytes.len())));
    }
    log::debug!("[RAW] reader loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ump::Midi1Packet;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    /// Writer half that records everything and the size of each write call.
    #[derive(Clone, Default)]
    struct RecordingWriter {
        data: Arc<Mutex<Vec<u8>>>,
        writes: Arc<Mutex<Vec<usize>>>,
    }

    impl Write for RecordingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.lock().unwrap().extend_from_slice(buf);
            self.writes.lock().unwrap().push(buf.len());
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn words_to_ne_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_ne_bytes()).collect()
    }

    #[test]
    fn test_recv_decodes_native_endian_words() {
        let note_on = Packet::Midi1ChannelVoice(Midi1Packet::note_on(2, 4, 64, 127));
        let stream_words = [0xF000_0101u32, 0x1C, 0, 0];
        let mut feed = words_to_ne_bytes(&note_on.encode());
        feed.extend(words_to_ne_bytes(&stream_words));

        let mut ep = RawEndpoint::from_channel(Cursor::new(feed), RecordingWriter::default());
        assert_eq!(ep.recv().expect("first packet"), note_on);
        let second = ep.recv().expect("second packet");
        assert_eq!(second.encode(), stream_words.to_vec());
    }

    #[test]
    fn test_send_writes_whole_packets() {
        let writer = RecordingWriter::default();
        let mut ep = RawEndpoint::from_channel(Cursor::new(Vec::new()), writer.clone());

        let packets = [
            Packet::Midi1ChannelVoice(Midi1Packet::note_on(0, 0, 60, 100)),
            Packet::Stream(crate::ump::StreamPacket::endpoint_discovery((1, 1), 0x1F)),
        ];
        ep.send_many(&packets).expect("send");

        let writes = writer.writes.lock().unwrap().clone();
        assert_eq!(writes, vec![4, 16], "one write call per packet");
        assert_eq!(writer.data.lock().unwrap().len(), 20);
    }

    #[test]
    fn test_misaligned_eof_reported() {
        // 5 bytes: one word plus a dangling byte.
        let mut feed = words_to_ne_bytes(&[0x2090_4040]);
        feed.push(0xAB);
        let mut ep = RawEndpoint::from_channel(Cursor::new(feed), RecordingWriter::default());

        assert!(ep.recv().is_ok(), "whole word decodes");
        match ep.recv() {
            Err(Error::Misaligned(1)) => {}
            other => panic!("expected Misaligned(1), got {:?}", other),
        }
    }

    #[test]
    fn test_recv_timeout_expires_quietly() {
        // A reader that blocks forever (empty pipe kept open by the pair).
        struct Never;
        impl Read for Never {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                std::thread::sleep(Duration::from_secs(60));
                Ok(0)
            }
        }
        let mut ep = RawEndpoint::from_channel(Never, RecordingWriter::default());
        let got = ep
            .recv_timeout(Duration::from_millis(20))
            .expect("timeout is not an error");
        assert!(got.is_none());
    }
}
