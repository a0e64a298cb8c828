// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery client: interrogate an endpoint and assemble its topology.
//!
//! Sends Endpoint Discovery and Function Block Discovery (all blocks), then
//! collects notifications until the topology is demonstrably complete or
//! nothing novel has arrived for the quiescence window. Multi-packet names
//! assemble through the stream reassembler; notifications may arrive in any
//! order (a name chain may even precede its block's info).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::{
    DISCOVERY_DEADLINE, DISCOVERY_QUIESCENCE, FUNCTION_BLOCK_ALL, UMP_VERSION,
};
use crate::endpoint::UmpEndpoint;
use crate::error::{Error, Result};
use crate::ump::{
    Packet, StreamMessage, StreamPacket, StreamReassembler, StreamStatus,
    FILTER_ENDPOINT_ALL, FILTER_FUNCTION_BLOCK_ALL,
};

use super::{FunctionBlock, Topology};

/// Discover the remote endpoint's topology with the default windows.
pub fn discover(endpoint: &mut dyn UmpEndpoint) -> Result<Topology> {
    discover_with(endpoint, DISCOVERY_QUIESCENCE, DISCOVERY_DEADLINE)
}

/// Discover with explicit quiescence and overall deadlines.
///
/// Returns the assembled topology once complete, or whatever was learned
/// when the quiescence window closes. Errs with [`Error::Timeout`] only if
/// the deadline passes with no discovery traffic at all.
pub fn discover_with(
    endpoint: &mut dyn UmpEndpoint,
    quiescence: Duration,
    deadline: Duration,
) -> Result<Topology> {
    endpoint.send_many(&[
        Packet::Stream(StreamPacket::endpoint_discovery(
            UMP_VERSION,
            FILTER_ENDPOINT_ALL,
        )),
        Packet::Stream(StreamPacket::function_block_discovery(
            FUNCTION_BLOCK_ALL,
            FILTER_FUNCTION_BLOCK_ALL,
        )),
    ])?;

    let start = Instant::now();
    let mut collector = Collector::default();
    let mut last_novelty: Option<Instant> = None;

    loop {
        if collector.complete() {
            break;
        }
        let now = Instant::now();
        let elapsed = now.duration_since(start);
        if elapsed >= deadline {
            if last_novelty.is_none() {
                return Err(Error::Timeout("discovery"));
            }
            log::debug!("[DISCOVERY] deadline reached with a partial topology");
            break;
        }
        if let Some(t) = last_novelty {
            if now.duration_since(t) >= quiescence {
                break;
            }
        }

        // Wait for the nearer of the two windows.
        let until_deadline = deadline - elapsed;
        let wait = match last_novelty {
            Some(t) => (quiescence - now.duration_since(t)).min(until_deadline),
            None => until_deadline,
        };
        if let Some(packet) = endpoint.recv_timeout(wait)? {
            if collector.absorb(&packet) {
                last_novelty = Some(Instant::now());
            }
        }
    }

    Ok(collector.finish())
}

/// Accumulates notifications into a topology.
#[derive(Default)]
struct Collector {
    topology: Topology,
    reassembler: StreamReassembler,
    expected_blocks: Option<u8>,
    have_info: bool,
    have_name: bool,
    have_piid: bool,
    block_names: HashMap<u8, String>,
}

impl Collector {
    /// Absorb one packet; true when it taught us something new (novelty
    /// resets the quiescence window).
    fn absorb(&mut self, packet: &Packet) -> bool {
        let Packet::Stream(sp) = packet else {
            return false;
        };
        let mut novel = false;

        match self.reassembler.feed(sp) {
            Ok(Some(assembled)) => {
                match assembled.status {
                    StreamStatus::EndpointName => {
                        self.topology.name = assembled.text;
                        self.have_name = true;
                    }
                    StreamStatus::ProductInstanceId => {
                        self.topology.product_instance_id = assembled.text;
                        self.have_piid = true;
                    }
                    StreamStatus::FunctionBlockName => {
                        if let Some(block) = assembled.block {
                            self.block_names.insert(block, assembled.text);
                        }
                    }
                    _ => {}
                }
                novel = true;
            }
            Ok(None) => {
                // An in-flight fragment still counts as progress.
                novel |= matches!(
                    sp.status(),
                    Some(
                        StreamStatus::EndpointName
                            | StreamStatus::ProductInstanceId
                            | StreamStatus::FunctionBlockName
                    )
                );
            }
            Err(e) => log::debug!("[DISCOVERY] reassembly diagnostic: {}", e),
        }

        match sp.message() {
            Some(StreamMessage::EndpointInfo(info)) => {
                self.topology.ump_version = info.ump_version;
                self.topology.supports_midi1_protocol = info.midi1;
                self.topology.supports_midi2_protocol = info.midi2;
                self.topology.supports_jr_rx = info.rx_jr;
                self.topology.supports_jr_tx = info.tx_jr;
                self.expected_blocks = Some(info.num_function_blocks);
                self.have_info = true;
                novel = true;
            }
            Some(StreamMessage::FunctionBlockInfo(info)) => {
                let block = FunctionBlock::from_info(&info);
                match self
                    .topology
                    .function_blocks
                    .iter_mut()
                    .find(|b| b.id == block.id)
                {
                    Some(existing) => *existing = block,
                    None => self.topology.function_blocks.push(block),
                }
                novel = true;
            }
            Some(StreamMessage::DeviceIdentity(_))
            | Some(StreamMessage::StreamConfigNotification { .. }) => {
                novel = true;
            }
            _ => {}
        }

        novel
    }

    /// The explicit completion indicator: everything requested has arrived.
    fn complete(&self) -> bool {
        let Some(expected) = self.expected_blocks else {
            return false;
        };
        self.have_info
            && self.have_name
            && self.have_piid
            && self.topology.function_blocks.len() == expected as usize
            && self
                .topology
                .function_blocks
                .iter()
                .all(|b| self.block_names.contains_key(&b.id))
    }

    fn finish(mut self) -> Topology {
        for block in &mut self.topology.function_blocks {
            if let Some(name) = self.block_names.remove(&block.id) {
                block.name = name;
            }
        }
        self.topology.function_blocks.sort_by_key(|b| b.id);
        self.topology
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::TopologyResponder;

    /// An endpoint stub that answers discovery from a responder, as the far
    /// side of a transport would.
    struct LoopbackEndpoint {
        responder: TopologyResponder,
        inbox: std::collections::VecDeque<Packet>,
    }

    impl LoopbackEndpoint {
        fn new(topology: Topology) -> Self {
            Self {
                responder: TopologyResponder::new(topology).expect("valid topology"),
                inbox: Default::default(),
            }
        }
    }

    impl UmpEndpoint for LoopbackEndpoint {
        fn send_many(&mut self, packets: &[Packet]) -> Result<()> {
            for p in packets {
                if let Packet::Stream(sp) = p {
                    if let Some(msg) = sp.message() {
                        self.inbox.extend(self.responder.respond(&msg));
                    }
                }
            }
            Ok(())
        }

        fn recv(&mut self) -> Result<Packet> {
            self.inbox.pop_front().ok_or(Error::Timeout("loopback empty"))
        }

        fn recv_timeout(&mut self, _timeout: Duration) -> Result<Option<Packet>> {
            Ok(self.inbox.pop_front())
        }
    }

    fn synth_topology() -> Topology {
        Topology {
            name: "Synth host".into(),
            product_instance_id: "synth-01".into(),
            function_blocks: vec![FunctionBlock::bidirectional(0, "Synth", 0, 4)],
            ..Default::default()
        }
    }

    #[test]
    fn test_discover_assembles_matching_topology() {
        let topology = synth_topology();
        let mut ep = LoopbackEndpoint::new(topology.clone());
        let discovered = discover(&mut ep).expect("discovery succeeds");
        assert_eq!(discovered, topology);
    }

    #[test]
    fn test_discover_long_names_across_chains() {
        let mut topology = synth_topology();
        topology.name = "An endpoint name that spans several stream packets".into();
        topology.function_blocks[0].name = "A function block with a very long name".into();

        let mut ep = LoopbackEndpoint::new(topology.clone());
        let discovered = discover(&mut ep).expect("discovery succeeds");
        assert_eq!(discovered, topology);
    }

    #[test]
    fn test_discover_multiple_blocks_sorted() {
        let mut topology = synth_topology();
        topology.function_blocks = vec![
            FunctionBlock::bidirectional(2, "Two", 8, 2),
            FunctionBlock::bidirectional(0, "Zero", 0, 4),
            FunctionBlock::bidirectional(1, "One", 4, 4),
        ];
        let mut ep = LoopbackEndpoint::new(topology.clone());
        let discovered = discover(&mut ep).expect("discovery succeeds");
        let ids: Vec<u8> = discovered.function_blocks.iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(discovered.function_blocks[1].name, "One");
    }

    #[test]
    fn test_silent_endpoint_times_out() {
        struct Mute;
        impl UmpEndpoint for Mute {
            fn send_many(&mut self, _p: &[Packet]) -> Result<()> {
                Ok(())
            }
            fn recv(&mut self) -> Result<Packet> {
                Err(Error::Timeout("mute"))
            }
            fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Packet>> {
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
                Ok(None)
            }
        }
        let res = discover_with(
            &mut Mute,
            Duration::from_millis(20),
            Duration::from_millis(60),
        );
        assert!(matches!(res, Err(Error::Timeout(_))));
    }

    #[test]
    fn test_partial_answers_surface_at_quiescence() {
        // An endpoint that only answers the endpoint-level discovery and
        // never mentions function blocks.
        struct NamesOnly {
            inbox: std::collections::VecDeque<Packet>,
        }
        impl UmpEndpoint for NamesOnly {
            fn send_many(&mut self, packets: &[Packet]) -> Result<()> {
                let responder = TopologyResponder::new(Topology {
                    name: "Half".into(),
                    product_instance_id: "h-1".into(),
                    ..Default::default()
                })
                .expect("valid");
                for p in packets {
                    if let Packet::Stream(sp) = p {
                        if let Some(StreamMessage::EndpointDiscovery { filter, .. }) = sp.message()
                        {
                            self.inbox.extend(
                                responder.respond(&StreamMessage::EndpointDiscovery {
                                    ump_version: (1, 1),
                                    filter,
                                }),
                            );
                        }
                    }
                }
                Ok(())
            }
            fn recv(&mut self) -> Result<Packet> {
                Err(Error::Timeout("empty"))
            }
            fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Packet>> {
                match self.inbox.pop_front() {
                    Some(p) => Ok(Some(p)),
                    None => {
                        std::thread::sleep(timeout.min(Duration::from_millis(5)));
                        Ok(None)
                    }
                }
            }
        }

        let mut ep = NamesOnly { inbox: Default::default() };
        let topo = discover_with(
            &mut ep,
            Duration::from_millis(30),
            Duration::from_millis(500),
        )
        .expect("partial discovery still yields");
        assert_eq!(topo.name, "Half");
        assert!(topo.function_blocks.is_empty());
    }
}
