// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Network MIDI 2.0 (UDP) transport.
//!
//! Layering, bottom up:
//!
//! - [`command`]: datagram framing and the command codec.
//! - [`auth`]: capabilities, credentials, challenge digests.
//! - [`session`]: the sans-I/O session state machine (handshake, sequence
//!   reliability, liveness, teardown).
//! - [`udp`]: socket loops driving sessions - [`UdpSession`] (client) and
//!   [`UmpHost`] (server).

pub mod auth;
pub mod command;
pub mod session;
pub mod udp;

pub use auth::{AuthMethod, CAP_INVITATION_WITH_AUTH, CAP_INVITATION_WITH_USER_AUTH};
pub use command::{encode_datagram, parse_datagram, ByeReason, CommandCode, CommandPacket};
pub use session::{Session, SessionConfig, SessionEvent, SessionRole, SessionState};
pub use udp::{HostConfig, UdpSession, UmpHost};
