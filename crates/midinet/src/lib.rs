// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # midinet - MIDI 2.0 UMP protocol stack
//!
//! A pure Rust implementation of the MIDI 2.0 Universal MIDI Packet (UMP)
//! protocol stack: the UMP codec, the Network MIDI 2.0 (UDP) transport with
//! session management and authentication, endpoint topology discovery over
//! UMP Stream messages, a raw endpoint adapter for word-aligned character
//! devices, and a Standard MIDI File reader with a wall-clock playback
//! scheduler.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use midinet::endpoint::UmpEndpoint;
//! use midinet::transport::UdpSession;
//! use midinet::ump::{Midi1Packet, Packet};
//!
//! fn main() -> midinet::Result<()> {
//!     // Establish a Network MIDI session (no authentication).
//!     let mut session = UdpSession::connect(("synth.local", 5673), None)?;
//!
//!     // Send a NoteOn on group 0, channel 0.
//!     session.send(&Packet::Midi1ChannelVoice(Midi1Packet::note_on(0, 0, 60, 100)))?;
//!
//!     // Interrogate the peer's topology.
//!     let topology = midinet::discovery::discover(&mut session)?;
//!     println!("connected to {:?}", topology.name);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                        Application Layer                           |
//! |        discovery client/server | SMF projection | player           |
//! +--------------------------------------------------------------------+
//! |                         Endpoint Layer                             |
//! |      UmpEndpoint trait | RawEndpoint | UdpSession | UmpHost        |
//! +--------------------------------------------------------------------+
//! |                         Session Layer                              |
//! |   handshake & auth | sequencing | retransmission | liveness        |
//! +--------------------------------------------------------------------+
//! |                          Codec Layer                               |
//! |     UMP packets (32/64/96/128 bit) | commands | datagrams          |
//! +--------------------------------------------------------------------+
//! ```
//!
//! Each UDP endpoint owns its socket in a dedicated loop thread; UMP
//! packets cross endpoint boundaries over bounded queues. Sessions deliver
//! received UMP to the consumer strictly in sender order.

/// Protocol constants and tunables (single source of truth).
pub mod config;
/// Endpoint topology: Function Blocks, discovery client and responder.
pub mod discovery;
/// The `UmpEndpoint` seam, parsed addresses, and the raw device endpoint.
pub mod endpoint;
/// Central error type.
pub mod error;
/// Wall-clock playback scheduling.
pub mod player;
/// Standard MIDI File reader, tempo map, and UMP projection.
pub mod smf;
/// Network MIDI 2.0 (UDP) transport: commands, sessions, socket loops.
pub mod transport;
/// UMP codec: packet families, encode/decode, SysEx and Stream reassembly.
pub mod ump;

pub use discovery::{discover, FunctionBlock, Topology, TopologyResponder};
pub use endpoint::{EndpointAddr, RawEndpoint, UmpEndpoint};
pub use error::{Error, Result};
pub use player::{play, CancelToken, PlaybackOutcome};
pub use smf::{project, SmfFile, TempoMap};
pub use transport::{AuthMethod, HostConfig, SessionState, UdpSession, UmpHost};
pub use ump::{MessageType, Packet};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
