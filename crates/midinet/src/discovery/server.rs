// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Discovery responder: answers Stream discovery requests from a locally
//! configured topology.
//!
//! Names that fit a single packet go out as one-shot `Complete`
//! notifications; longer ones as `Start`/`Continue`/`End` chains. Request
//! filter bitmaps are honored bit by bit.

use crate::config::FUNCTION_BLOCK_ALL;
use crate::error::Result;
use crate::ump::{
    endpoint_name_packets, function_block_name_packets, product_instance_id_packets,
    DeviceIdentity, EndpointInfo, FunctionBlockInfo, Packet, StreamMessage, StreamPacket,
    FILTER_DEVICE_IDENTITY, FILTER_ENDPOINT_INFO, FILTER_ENDPOINT_NAME,
    FILTER_FUNCTION_BLOCK_INFO, FILTER_FUNCTION_BLOCK_NAME, FILTER_PRODUCT_INSTANCE_ID,
    FILTER_STREAM_CONFIGURATION,
};

use super::{FunctionBlock, Topology};

/// Answers incoming discovery requests for one endpoint.
#[derive(Debug, Clone)]
pub struct TopologyResponder {
    topology: Topology,
    identity: DeviceIdentity,
}

impl TopologyResponder {
    /// Validates the topology up front so every later answer is well formed.
    pub fn new(topology: Topology) -> Result<Self> {
        topology.validate()?;
        Ok(Self {
            topology,
            identity: DeviceIdentity {
                manufacturer: [0, 0, 0],
                family: 0,
                model: 0,
                revision: [0, 0, 0, 0],
            },
        })
    }

    /// Use a concrete device identity instead of the all-zero default.
    pub fn with_identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The notifications a received Stream message calls for (empty for
    /// messages that are not discovery requests).
    pub fn respond(&self, msg: &StreamMessage) -> Vec<Packet> {
        match msg {
            StreamMessage::EndpointDiscovery { filter, .. } => self.endpoint_answers(*filter),
            StreamMessage::FunctionBlockDiscovery { block, filter } => {
                self.block_answers(*block, *filter)
            }
            StreamMessage::StreamConfigRequest { protocol, .. } => {
                // Accept the requested protocol when the endpoint supports
                // it, otherwise answer with what it can do.
                let supported = match protocol {
                    2 => self.topology.supports_midi2_protocol,
                    1 => self.topology.supports_midi1_protocol,
                    _ => false,
                };
                let answer = if supported {
                    *protocol
                } else if self.topology.supports_midi2_protocol {
                    2
                } else {
                    1
                };
                vec![Packet::Stream(StreamPacket::stream_config_notification(
                    answer, false,
                ))]
            }
            _ => Vec::new(),
        }
    }

    fn endpoint_answers(&self, filter: u8) -> Vec<Packet> {
        let t = &self.topology;
        let mut out = Vec::new();

        if filter & FILTER_ENDPOINT_INFO != 0 {
            out.push(Packet::Stream(StreamPacket::endpoint_info(&EndpointInfo {
                ump_version: t.ump_version,
                static_blocks: true,
                num_function_blocks: t.function_blocks.len() as u8,
                midi2: t.supports_midi2_protocol,
                midi1: t.supports_midi1_protocol,
                rx_jr: t.supports_jr_rx,
                tx_jr: t.supports_jr_tx,
            })));
        }
        if filter & FILTER_DEVICE_IDENTITY != 0 {
            out.push(Packet::Stream(StreamPacket::device_identity(&self.identity)));
        }
        if filter & FILTER_ENDPOINT_NAME != 0 {
            out.extend(endpoint_name_packets(&t.name).into_iter().map(Packet::Stream));
        }
        if filter & FILTER_PRODUCT_INSTANCE_ID != 0 {
            out.extend(
                product_instance_id_packets(&t.product_instance_id)
                    .into_iter()
                    .map(Packet::Stream),
            );
        }
        if filter & FILTER_STREAM_CONFIGURATION != 0 {
            let protocol = if t.supports_midi2_protocol { 2 } else { 1 };
            out.push(Packet::Stream(StreamPacket::stream_config_notification(
                protocol, false,
            )));
        }
        out
    }

    fn block_answers(&self, target: u8, filter: u8) -> Vec<Packet> {
        let mut out = Vec::new();
        if target == FUNCTION_BLOCK_ALL {
            for block in &self.topology.function_blocks {
                self.one_block(block, filter, &mut out);
            }
        } else {
            match self.topology.block(target) {
                Some(block) => self.one_block(block, filter, &mut out),
                None => {
                    // Answer unknown ids with an inactive info so the
                    // requester is not left waiting on its quiescence
                    // timer.
                    log::debug!("[DISCOVERY] request for unknown block {}", target);
                    out.push(Packet::Stream(StreamPacket::function_block_info(
                        &FunctionBlockInfo {
                            active: false,
                            block: target,
                            ui_hint_sender: false,
                            ui_hint_receiver: false,
                            midi1_mode: 0,
                            is_output: false,
                            is_input: false,
                            first_group: 0,
                            num_groups: 1,
                            midi_ci_version: 0,
                            max_sysex8_streams: 0,
                        },
                    )));
                }
            }
        }
        out
    }

    fn one_block(&self, block: &FunctionBlock, filter: u8, out: &mut Vec<Packet>) {
        if filter & FILTER_FUNCTION_BLOCK_INFO != 0 {
            out.push(Packet::Stream(StreamPacket::function_block_info(
                &block.to_info(),
            )));
        }
        if filter & FILTER_FUNCTION_BLOCK_NAME != 0 {
            out.extend(
                function_block_name_packets(block.id, &block.name)
                    .into_iter()
                    .map(Packet::Stream),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ump::{StreamFormat, StreamStatus, FILTER_ENDPOINT_ALL, FILTER_FUNCTION_BLOCK_ALL};

    fn synth_topology() -> Topology {
        Topology {
            name: "Synth host".into(),
            product_instance_id: "synth-01".into(),
            function_blocks: vec![FunctionBlock::bidirectional(0, "Synth", 0, 4)],
            ..Default::default()
        }
    }

    fn stream_statuses(packets: &[Packet]) -> Vec<StreamStatus> {
        packets
            .iter()
            .filter_map(|p| match p {
                Packet::Stream(sp) => sp.status(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_endpoint_discovery_honors_filter() {
        let responder = TopologyResponder::new(synth_topology()).expect("valid topology");

        let all = responder.respond(&StreamMessage::EndpointDiscovery {
            ump_version: (1, 1),
            filter: FILTER_ENDPOINT_ALL,
        });
        let statuses = stream_statuses(&all);
        assert!(statuses.contains(&StreamStatus::EndpointInfo));
        assert!(statuses.contains(&StreamStatus::DeviceIdentity));
        assert!(statuses.contains(&StreamStatus::EndpointName));
        assert!(statuses.contains(&StreamStatus::ProductInstanceId));
        assert!(statuses.contains(&StreamStatus::StreamConfigNotification));

        let only_name = responder.respond(&StreamMessage::EndpointDiscovery {
            ump_version: (1, 1),
            filter: FILTER_ENDPOINT_NAME,
        });
        let statuses = stream_statuses(&only_name);
        assert!(statuses.iter().all(|s| *s == StreamStatus::EndpointName));
        assert!(!only_name.is_empty());
    }

    #[test]
    fn test_short_name_is_single_complete() {
        let responder = TopologyResponder::new(synth_topology()).expect("valid topology");
        let answers = responder.respond(&StreamMessage::FunctionBlockDiscovery {
            block: 0,
            filter: FILTER_FUNCTION_BLOCK_ALL,
        });
        // "Synth" fits one packet: info + one Complete name packet.
        assert_eq!(answers.len(), 2);
        match &answers[1] {
            Packet::Stream(sp) => assert_eq!(sp.format(), Some(StreamFormat::Complete)),
            other => panic!("expected stream packet, got {:?}", other),
        }
    }

    #[test]
    fn test_long_name_becomes_chain() {
        let mut topo = synth_topology();
        topo.function_blocks[0].name = "A considerably longer block name".into();
        let responder = TopologyResponder::new(topo).expect("valid topology");
        let answers = responder.respond(&StreamMessage::FunctionBlockDiscovery {
            block: 0,
            filter: FILTER_FUNCTION_BLOCK_NAME,
        });
        assert!(answers.len() >= 3, "Start + Continue* + End");
        match (&answers[0], answers.last().expect("non-empty")) {
            (Packet::Stream(first), Packet::Stream(last)) => {
                assert_eq!(first.format(), Some(StreamFormat::Start));
                assert_eq!(last.format(), Some(StreamFormat::End));
            }
            other => panic!("expected stream packets, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_block_answered_inactive() {
        let responder = TopologyResponder::new(synth_topology()).expect("valid topology");
        let answers = responder.respond(&StreamMessage::FunctionBlockDiscovery {
            block: 9,
            filter: FILTER_FUNCTION_BLOCK_ALL,
        });
        assert_eq!(answers.len(), 1);
        match &answers[0] {
            Packet::Stream(sp) => match sp.message() {
                Some(StreamMessage::FunctionBlockInfo(info)) => {
                    assert_eq!(info.block, 9);
                    assert!(!info.active);
                }
                other => panic!("expected block info, got {:?}", other),
            },
            other => panic!("expected stream packet, got {:?}", other),
        }
    }

    #[test]
    fn test_non_discovery_messages_ignored() {
        let responder = TopologyResponder::new(synth_topology()).expect("valid topology");
        assert!(responder.respond(&StreamMessage::StartOfClip).is_empty());
        assert!(responder
            .respond(&StreamMessage::EndpointName {
                format: StreamFormat::Complete,
                text: b"x".to_vec(),
            })
            .is_empty());
    }

    #[test]
    fn test_stream_config_request_falls_back_to_supported() {
        let mut topo = synth_topology();
        topo.supports_midi2_protocol = false;
        let responder = TopologyResponder::new(topo).expect("valid topology");
        let answers = responder.respond(&StreamMessage::StreamConfigRequest {
            protocol: 2,
            extensions: false,
        });
        match &answers[0] {
            Packet::Stream(sp) => match sp.message() {
                Some(StreamMessage::StreamConfigNotification { protocol, .. }) => {
                    assert_eq!(protocol, 1, "MIDI1-only endpoint declines protocol 2")
                }
                other => panic!("expected config notification, got {:?}", other),
            },
            other => panic!("expected stream packet, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_topology_rejected() {
        let mut topo = synth_topology();
        topo.function_blocks[0].num_groups = 30;
        assert!(TopologyResponder::new(topo).is_err());
    }
}
