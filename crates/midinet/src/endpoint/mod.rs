// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UMP endpoints: the seam between packet producers/consumers and the
//! transports that carry them.
//!
//! An endpoint is anything that can sink and source whole UMP packets. Two
//! implementations exist: [`RawEndpoint`] over a word-aligned byte channel
//! (the ALSA UMP character device model) and
//! [`UdpSession`](crate::transport::UdpSession) over the Network MIDI 2.0
//! UDP transport.

mod raw;

pub use raw::RawEndpoint;

use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;
use crate::transport::{AuthMethod, UdpSession};
use crate::ump::Packet;

/// A bidirectional UMP packet stream.
///
/// `send_many` delivers packets as one batch where the transport allows
/// (a single datagram, a single device write burst); `recv` surfaces
/// packets in arrival order.
pub trait UmpEndpoint: Send {
    fn send_many(&mut self, packets: &[Packet]) -> Result<()>;

    fn send(&mut self, packet: &Packet) -> Result<()> {
        self.send_many(std::slice::from_ref(packet))
    }

    /// Block until the next packet arrives.
    fn recv(&mut self) -> Result<Packet>;

    /// Wait up to `timeout` for a packet; `Ok(None)` on expiry.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Packet>>;
}

/// A parsed endpoint address, as produced by the URL-parsing collaborator.
///
/// - `file://<path>[#<group>]` maps to [`EndpointAddr::Raw`]
/// - `udp://[<key>@|<user>:<pass>@]<host>[:<port>][#<group>]` maps to
///   [`EndpointAddr::Udp`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointAddr {
    Raw {
        path: PathBuf,
        /// Default group for MIDI1-shaped helpers.
        group: Option<u8>,
    },
    Udp {
        host: String,
        port: u16,
        auth: Option<AuthMethod>,
        group: Option<u8>,
    },
}

impl EndpointAddr {
    /// The default group for MIDI1-shaped helpers, if the address names one.
    pub fn group(&self) -> Option<u8> {
        match self {
            EndpointAddr::Raw { group, .. } | EndpointAddr::Udp { group, .. } => *group,
        }
    }
}

/// Open the endpoint an address describes.
///
/// UDP addresses perform the full session handshake (including
/// authentication when credentials are present) before returning.
pub fn open(addr: &EndpointAddr) -> Result<Box<dyn UmpEndpoint>> {
    match addr {
        EndpointAddr::Raw { path, .. } => Ok(Box::new(RawEndpoint::open(path)?)),
        EndpointAddr::Udp {
            host, port, auth, ..
        } => {
            let session = UdpSession::connect((host.as_str(), *port), auth.clone())?;
            Ok(Box::new(session))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_group_accessor() {
        let raw = EndpointAddr::Raw {
            path: PathBuf::from("/dev/snd/umpC0D0"),
            group: Some(9),
        };
        assert_eq!(raw.group(), Some(9));

        let udp = EndpointAddr::Udp {
            host: "synth.local".into(),
            port: 5673,
            auth: None,
            group: None,
        };
        assert_eq!(udp.group(), None);
    }
}
