// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com
//
// Loopback integration tests for the Network MIDI 2.0 UDP transport:
// handshake (with and without authentication), bidirectional UMP flow,
// in-order bulk delivery, and orderly teardown.

use std::time::Duration;

use midinet::endpoint::UmpEndpoint;
use midinet::transport::{AuthMethod, HostConfig, SessionState, UdpSession, UmpHost};
use midinet::ump::{Midi1Packet, Packet};
use midinet::Error;

fn localhost_host(cfg: HostConfig) -> UmpHost {
    UmpHost::bind("127.0.0.1:0", cfg).expect("bind host on an ephemeral port")
}

fn plain_host() -> UmpHost {
    localhost_host(HostConfig {
        name: "test host".into(),
        piid: "host-1".into(),
        ..Default::default()
    })
}

fn note_on(note: u8) -> Packet {
    Packet::Midi1ChannelVoice(Midi1Packet::note_on(0, 0, note, 100))
}

#[test]
fn test_handshake_and_ump_delivery() {
    let host = plain_host();
    let mut session =
        UdpSession::connect(host.local_addr(), None).expect("handshake should complete");
    assert_eq!(session.state(), SessionState::Established);

    // One UMP Data command, straight through to the consumer.
    let packet = Packet::Midi1ChannelVoice(Midi1Packet::from_word(0x2190_4060));
    session.send(&packet).expect("send over established session");

    let (peer, received) = host
        .recv_timeout(Duration::from_secs(2))
        .expect("host receive")
        .expect("packet within the deadline");
    assert_eq!(received, packet);
    assert_eq!(peer.ip(), session.peer_addr().ip());
}

#[test]
fn test_host_to_client_direction() {
    let host = plain_host();
    let mut session = UdpSession::connect(host.local_addr(), None).expect("handshake");

    // Learn the client's address from its first packet.
    session.send(&note_on(60)).expect("client send");
    let (client_addr, _) = host
        .recv_timeout(Duration::from_secs(2))
        .expect("host receive")
        .expect("first packet");

    host.send_to(client_addr, &[note_on(72)]).expect("host send");
    let got = session
        .recv_timeout(Duration::from_secs(2))
        .expect("client receive")
        .expect("packet within the deadline");
    assert_eq!(got, note_on(72));
}

#[test]
fn test_bulk_delivery_stays_in_order() {
    let host = plain_host();
    let mut session = UdpSession::connect(host.local_addr(), None).expect("handshake");

    let packets: Vec<Packet> = (0..50).map(|i| note_on(40 + (i % 48) as u8)).collect();
    for chunk in packets.chunks(5) {
        session.send_many(chunk).expect("send batch");
    }

    let mut received = Vec::new();
    while received.len() < packets.len() {
        match host.recv_timeout(Duration::from_secs(2)).expect("host receive") {
            Some((_, p)) => received.push(p),
            None => panic!("only {} of {} packets arrived", received.len(), packets.len()),
        }
    }
    assert_eq!(received, packets, "in-order, no gaps, no duplicates");
}

#[test]
fn test_shared_secret_auth_accepted() {
    let host = localhost_host(HostConfig {
        name: "secure host".into(),
        auth: Some(AuthMethod::SharedSecret("hunter2".into())),
        ..Default::default()
    });

    let mut session = UdpSession::connect(
        host.local_addr(),
        Some(AuthMethod::SharedSecret("hunter2".into())),
    )
    .expect("matching secret should authenticate");
    assert_eq!(session.state(), SessionState::Established);

    session.send(&note_on(64)).expect("authenticated send");
    let got = host
        .recv_timeout(Duration::from_secs(2))
        .expect("host receive")
        .expect("packet");
    assert_eq!(got.1, note_on(64));
}

#[test]
fn test_wrong_secret_rejected() {
    let host = localhost_host(HostConfig {
        name: "secure host".into(),
        auth: Some(AuthMethod::SharedSecret("right".into())),
        ..Default::default()
    });

    match UdpSession::connect(
        host.local_addr(),
        Some(AuthMethod::SharedSecret("wrong".into())),
    ) {
        Err(Error::AuthFailed(_)) => {}
        Ok(_) => panic!("wrong secret must not establish a session"),
        Err(other) => panic!("expected AuthFailed, got {:?}", other),
    }
}

#[test]
fn test_missing_credentials_rejected() {
    let host = localhost_host(HostConfig {
        name: "secure host".into(),
        auth: Some(AuthMethod::UserPassword {
            user: "alice".into(),
            password: "pw".into(),
        }),
        ..Default::default()
    });

    match UdpSession::connect(host.local_addr(), None) {
        Err(Error::AuthFailed(_)) => {}
        Ok(_) => panic!("credential-less client must not establish a session"),
        Err(other) => panic!("expected AuthFailed, got {:?}", other),
    }
}

#[test]
fn test_user_password_auth_accepted() {
    let creds = AuthMethod::UserPassword {
        user: "alice".into(),
        password: "pw".into(),
    };
    let host = localhost_host(HostConfig {
        name: "secure host".into(),
        auth: Some(creds.clone()),
        ..Default::default()
    });

    let session =
        UdpSession::connect(host.local_addr(), Some(creds)).expect("user auth should complete");
    assert_eq!(session.state(), SessionState::Established);
}

#[test]
fn test_session_close_removes_host_slot() {
    let host = plain_host();
    let session = UdpSession::connect(host.local_addr(), None).expect("handshake");
    assert_eq!(host.sessions().len(), 1);

    session.close();

    // The host processes the Bye and forgets the peer.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if host.sessions().is_empty() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("host still tracks {} sessions after Bye", host.sessions().len());
}

#[test]
fn test_connect_to_nobody_times_out() {
    // A socket with no host behind it: the handshake must give up on its
    // own rather than hang.
    let parked = std::net::UdpSocket::bind("127.0.0.1:0").expect("reserve a port");
    let target = parked.local_addr().expect("addr");

    let mut cfg = midinet::transport::SessionConfig::default();
    cfg.invite_timeout = Duration::from_millis(50);
    cfg.invite_retries = 3;

    match UdpSession::connect_with(target, cfg) {
        Err(Error::Timeout(_)) => {}
        Ok(_) => panic!("nothing answered, session must not establish"),
        Err(other) => panic!("expected Timeout, got {:?}", other),
    }
}
