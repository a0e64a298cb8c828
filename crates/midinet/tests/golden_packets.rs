// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com
//
// UMP golden vectors: known word sequences against constructed packets.
// Each case checks construction -> words, decode -> equality, and the
// size-from-MT consistency invariant.

use midinet::ump::{
    Data128Packet, Data64Packet, DeviceIdentity, EndpointInfo, Midi1Packet, Midi2Packet, Packet,
    StreamFormat, StreamPacket, SystemPacket, UtilityPacket,
};

fn case(words: &[u32], packet: Packet) {
    assert_eq!(packet.encode(), words.to_vec(), "encode mismatch for {:?}", packet);
    assert_eq!(
        words.len(),
        packet.word_count(),
        "size-from-MT mismatch for {:?}",
        packet
    );
    let (decoded, consumed) = Packet::decode(words).expect("golden words decode");
    assert_eq!(consumed, words.len());
    assert_eq!(decoded, packet, "roundtrip mismatch");
}

#[test]
fn test_golden_midi1_family() {
    case(&[0x2294_407F], Packet::Midi1ChannelVoice(Midi1Packet::note_on(2, 4, 64, 127)));
    case(&[0x2284_407F], Packet::Midi1ChannelVoice(Midi1Packet::note_off(2, 4, 64, 127)));
    case(
        &[0x22B4_0740],
        Packet::Midi1ChannelVoice(Midi1Packet::control_change(2, 4, 7, 64)),
    );
    case(
        &[0x22E4_5836],
        Packet::Midi1ChannelVoice(Midi1Packet::pitch_bend_msg(2, 4, 7000)),
    );
    case(
        &[0x22E4_2849],
        Packet::Midi1ChannelVoice(Midi1Packet::pitch_bend_msg(2, 4, -7000)),
    );
    // Group 9 NoteOn, the "29904040"-style layout check.
    case(
        &[0x2990_4040],
        Packet::Midi1ChannelVoice(Midi1Packet::note_on(9, 0, 0x40, 0x40)),
    );
}

#[test]
fn test_golden_midi2_family() {
    case(
        &[0x4294_4003, 0x09C4_1234],
        Packet::Midi2ChannelVoice(Midi2Packet::note_on(2, 4, 64, 2500, 3, 0x1234)),
    );
    case(
        &[0x42B4_0700, 0x1234_5678],
        Packet::Midi2ChannelVoice(Midi2Packet::control_change(2, 4, 7, 0x1234_5678)),
    );
    case(
        &[0x42C4_0001, 0x2A00_1344],
        Packet::Midi2ChannelVoice(Midi2Packet::program_change(2, 4, 42, Some(2500))),
    );
    case(
        &[0x42E4_0000, 0x8000_0000],
        Packet::Midi2ChannelVoice(Midi2Packet::pitch_bend(2, 4, 0x8000_0000)),
    );
}

#[test]
fn test_golden_utility_and_system() {
    case(&[0x0000_0000], Packet::Utility(UtilityPacket::noop()));
    case(&[0x0011_2345], Packet::Utility(UtilityPacket::jr_clock(0x12345)));
    case(&[0x0021_2345], Packet::Utility(UtilityPacket::jr_timestamp(0x12345)));
    case(&[0x10F8_0000], Packet::System(SystemPacket::timing_clock(0)));
    case(
        &[0x10F2_4003],
        Packet::System(SystemPacket::song_position_pointer(0, 448)),
    );
}

#[test]
fn test_golden_data_family() {
    case(
        &[0x3204_0102, 0x0304_0000],
        Packet::Data64(
            Data64Packet::new(2, StreamFormat::Complete, &[1, 2, 3, 4]).expect("4 bytes fit"),
        ),
    );
    case(
        &[0x5208_2A01, 0x0203_0405, 0x0607_0800, 0x0000_0000],
        Packet::Data128(
            Data128Packet::new(2, StreamFormat::Complete, 42, &[1, 2, 3, 4, 5, 6, 7, 8])
                .expect("8 bytes fit"),
        ),
    );
}

#[test]
fn test_golden_stream_family() {
    case(
        &[0xF000_0101, 0x0000_001C, 0, 0],
        Packet::Stream(StreamPacket::endpoint_discovery((1, 1), 0x1C)),
    );
    case(
        &[0xF001_0101, 0x9100_0303, 0, 0],
        Packet::Stream(StreamPacket::endpoint_info(&EndpointInfo {
            ump_version: (1, 1),
            static_blocks: true,
            num_function_blocks: 17,
            midi2: true,
            midi1: true,
            rx_jr: true,
            tx_jr: true,
        })),
    );
    case(
        &[0xF002_0000, 0x0000_0007, 0x0100_0200, 0x0102_0304],
        Packet::Stream(StreamPacket::device_identity(&DeviceIdentity {
            manufacturer: [0, 0, 7],
            family: 1,
            model: 2,
            revision: [1, 2, 3, 4],
        })),
    );
    case(
        &[0xF005_0180, 0, 0, 0],
        Packet::Stream(StreamPacket::stream_config_request(1, true)),
    );
    case(&[0xF020_0000, 0, 0, 0], Packet::Stream(StreamPacket::start_of_clip()));
    case(&[0xF021_0000, 0, 0, 0], Packet::Stream(StreamPacket::end_of_clip()));
}

#[test]
fn test_reserved_mts_roundtrip_at_spec_sizes() {
    for (mt, size) in [
        (0x6u32, 1usize),
        (0x7, 1),
        (0x8, 2),
        (0x9, 2),
        (0xA, 2),
        (0xB, 3),
        (0xC, 3),
        (0xE, 4),
    ] {
        let words: Vec<u32> = (0..size as u32)
            .map(|i| (mt << 28) | 0x0012_3400 | i)
            .collect();
        let (decoded, consumed) = Packet::decode(&words).expect("reserved MTs must decode");
        assert_eq!(consumed, size, "MT {:#X} size", mt);
        assert_eq!(decoded.encode(), words, "MT {:#X} byte-exact roundtrip", mt);
    }
}
