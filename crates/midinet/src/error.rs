// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Central error type for the midinet stack.
//!
//! One enum covers codec parse failures, transport protocol faults, and SMF
//! read errors. Per-packet codec errors are reported and logged without
//! tearing a session down; session-fatal conditions (auth failure, liveness
//! timeout) carry enough context for the peer-facing `Bye` reason.

use std::fmt;
use std::io;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by midinet operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Codec errors
    // ========================================================================
    /// Not enough 32-bit words (or bytes) to decode the message at hand.
    Truncated { needed: usize, got: usize },
    /// A field carries a reserved or out-of-range value that prevents
    /// interpretation (reserved MTs themselves decode fine, as opaque).
    InvalidReserved(&'static str),
    /// A Start/Continue/End fragment arrived out of order, or a new Start
    /// abandoned an in-progress reassembly.
    ReassemblyAborted(&'static str),

    // ========================================================================
    // Transport errors
    // ========================================================================
    /// A command arrived that is not legal in the session's current state.
    ProtocolViolation(String),
    /// Authentication was rejected by the peer, or the peer's digest did
    /// not verify.
    AuthFailed(String),
    /// Liveness, handshake, or discovery-quiescence deadline expired.
    Timeout(&'static str),
    /// A retransmission was requested for a sequence already evicted from
    /// the outstanding buffer.
    RetransmitUnavailable(u16),
    /// The session loop has terminated; the handle can no longer send or
    /// receive.
    SessionClosed,
    /// Underlying socket or device failure.
    Io(io::Error),

    // ========================================================================
    // Raw endpoint / SMF errors
    // ========================================================================
    /// Byte stream ended in the middle of a 32-bit word.
    Misaligned(usize),
    /// Bad chunk magic, bad variable-length quantity, unterminated SysEx,
    /// or other structural damage in a Standard MIDI File.
    SmfMalformed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Truncated { needed, got } => {
                write!(f, "truncated input: need {} words, got {}", needed, got)
            }
            Error::InvalidReserved(what) => write!(f, "reserved value in {}", what),
            Error::ReassemblyAborted(what) => write!(f, "reassembly aborted: {}", what),
            Error::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            Error::AuthFailed(msg) => write!(f, "authentication failed: {}", msg),
            Error::Timeout(what) => write!(f, "timed out waiting for {}", what),
            Error::RetransmitUnavailable(seq) => {
                write!(f, "sequence {} no longer available for retransmission", seq)
            }
            Error::SessionClosed => write!(f, "session closed"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Misaligned(n) => {
                write!(f, "byte stream not aligned to 32-bit words ({} trailing bytes)", n)
            }
            Error::SmfMalformed(msg) => write!(f, "malformed MIDI file: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
