// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint topology: Function Blocks and the discovery protocol.
//!
//! Topology rides on UMP Stream messages. The [`client`] side interrogates
//! a remote endpoint and assembles its [`Topology`]; the [`server`] side
//! answers discovery requests from a locally configured one.

mod client;
mod server;

pub use client::{discover, discover_with};
pub use server::TopologyResponder;

use crate::config::{MAX_FUNCTION_BLOCKS, MAX_GROUPS, UMP_VERSION};
use crate::error::{Error, Result};
use crate::ump::FunctionBlockInfo;

/// Data flow direction of a Function Block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDirection {
    Input,
    Output,
    Bidirectional,
}

/// MIDI 1.0 availability of a Function Block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Midi1Mode {
    /// Not a MIDI 1.0 block.
    None,
    /// MIDI 1.0 at full UMP bandwidth.
    Midi1,
    /// MIDI 1.0 restricted to the classic 31.25 kb/s rate.
    Midi1At31250Bps,
}

impl Midi1Mode {
    fn bits(self) -> u8 {
        match self {
            Midi1Mode::None => 0,
            Midi1Mode::Midi1 => 1,
            Midi1Mode::Midi1At31250Bps => 2,
        }
    }

    fn from_bits(v: u8) -> Self {
        match v {
            1 => Midi1Mode::Midi1,
            2 => Midi1Mode::Midi1At31250Bps,
            _ => Midi1Mode::None,
        }
    }
}

/// A logical sub-unit of an endpoint spanning a contiguous group range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionBlock {
    /// Block id, 0..32.
    pub id: u8,
    pub name: String,
    pub direction: BlockDirection,
    /// 2-bit UI hint: bit 1 = sender, bit 0 = receiver.
    pub ui_hint: u8,
    pub first_group: u8,
    /// 1..=16, with `first_group + num_groups <= 16`.
    pub num_groups: u8,
    pub midi1_mode: Midi1Mode,
    pub is_active: bool,
}

impl FunctionBlock {
    /// A bidirectional, active block over a group range.
    pub fn bidirectional(id: u8, name: &str, first_group: u8, num_groups: u8) -> Self {
        Self {
            id,
            name: name.to_string(),
            direction: BlockDirection::Bidirectional,
            ui_hint: 0x3,
            first_group,
            num_groups,
            midi1_mode: Midi1Mode::None,
            is_active: true,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id >= MAX_FUNCTION_BLOCKS {
            return Err(Error::InvalidReserved("function block id over 31"));
        }
        if self.num_groups == 0 {
            return Err(Error::InvalidReserved("function block with zero groups"));
        }
        if self.first_group as u16 + self.num_groups as u16 > MAX_GROUPS as u16 {
            return Err(Error::InvalidReserved(
                "function block group range beyond group 15",
            ));
        }
        Ok(())
    }

    /// The wire representation for a Function Block Info Notification.
    pub fn to_info(&self) -> FunctionBlockInfo {
        let (is_input, is_output) = match self.direction {
            BlockDirection::Input => (true, false),
            BlockDirection::Output => (false, true),
            BlockDirection::Bidirectional => (true, true),
        };
        FunctionBlockInfo {
            active: self.is_active,
            block: self.id,
            ui_hint_sender: self.ui_hint & 0x2 != 0,
            ui_hint_receiver: self.ui_hint & 0x1 != 0,
            midi1_mode: self.midi1_mode.bits(),
            is_output,
            is_input,
            first_group: self.first_group,
            num_groups: self.num_groups,
            midi_ci_version: 0,
            max_sysex8_streams: 0,
        }
    }

    /// Rebuild from a received info notification (name arrives separately).
    pub fn from_info(info: &FunctionBlockInfo) -> Self {
        let direction = match (info.is_input, info.is_output) {
            (true, false) => BlockDirection::Input,
            (false, true) => BlockDirection::Output,
            // Neither bit set is off-spec; bidirectional is the benign reading.
            _ => BlockDirection::Bidirectional,
        };
        Self {
            id: info.block,
            name: String::new(),
            direction,
            ui_hint: ((info.ui_hint_sender as u8) << 1) | info.ui_hint_receiver as u8,
            first_group: info.first_group,
            num_groups: info.num_groups,
            midi1_mode: Midi1Mode::from_bits(info.midi1_mode),
            is_active: info.active,
        }
    }
}

/// Everything discovery can learn about an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub name: String,
    pub product_instance_id: String,
    pub ump_version: (u8, u8),
    pub supports_midi1_protocol: bool,
    pub supports_midi2_protocol: bool,
    pub supports_jr_tx: bool,
    pub supports_jr_rx: bool,
    pub function_blocks: Vec<FunctionBlock>,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            name: String::new(),
            product_instance_id: String::new(),
            ump_version: UMP_VERSION,
            supports_midi1_protocol: true,
            supports_midi2_protocol: true,
            supports_jr_tx: false,
            supports_jr_rx: false,
            function_blocks: Vec::new(),
        }
    }
}

impl Topology {
    pub fn validate(&self) -> Result<()> {
        for block in &self.function_blocks {
            block.validate()?;
        }
        Ok(())
    }

    /// Look up a block by id.
    pub fn block(&self, id: u8) -> Option<&FunctionBlock> {
        self.function_blocks.iter().find(|b| b.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_range_invariant() {
        let mut block = FunctionBlock::bidirectional(0, "Synth", 0, 4);
        assert!(block.validate().is_ok());

        block.first_group = 12;
        block.num_groups = 4;
        assert!(block.validate().is_ok(), "12 + 4 = 16 is the inclusive limit");

        block.num_groups = 5;
        assert!(block.validate().is_err(), "12 + 5 > 16");

        block.num_groups = 0;
        assert!(block.validate().is_err(), "at least one group");

        let bad_id = FunctionBlock::bidirectional(32, "x", 0, 1);
        assert!(bad_id.validate().is_err());
    }

    #[test]
    fn test_info_roundtrip_preserves_shape() {
        let block = FunctionBlock {
            id: 3,
            name: "Keys".into(),
            direction: BlockDirection::Input,
            ui_hint: 0x1,
            first_group: 2,
            num_groups: 2,
            midi1_mode: Midi1Mode::Midi1At31250Bps,
            is_active: true,
        };
        let mut back = FunctionBlock::from_info(&block.to_info());
        assert_eq!(back.name, "");
        back.name = block.name.clone();
        assert_eq!(back, block);
    }

    #[test]
    fn test_direction_mapping() {
        for (dir, input, output) in [
            (BlockDirection::Input, true, false),
            (BlockDirection::Output, false, true),
            (BlockDirection::Bidirectional, true, true),
        ] {
            let mut b = FunctionBlock::bidirectional(0, "b", 0, 1);
            b.direction = dir;
            let info = b.to_info();
            assert_eq!((info.is_input, info.is_output), (input, output));
            assert_eq!(FunctionBlock::from_info(&info).direction, dir);
        }
    }
}
