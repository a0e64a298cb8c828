// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP socket loops for the Network MIDI 2.0 transport.
//!
//! Each endpoint owns its socket in a dedicated loop thread that alternates
//! receive, timer, and transmit work over the sans-I/O
//! [`Session`](super::Session) machine. The public handles talk to the loop
//! over bounded channels - capacity on the send channel is the session's
//! back-pressure.
//!
//! [`UdpSession`] is the client side: `connect` runs the full handshake
//! (including authentication) before returning. [`UmpHost`] is the server:
//! one socket, one session per peer address, optional topology responder.

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::MAX_DATAGRAM_LEN;
use crate::discovery::TopologyResponder;
use crate::endpoint::UmpEndpoint;
use crate::error::{Error, Result};
use crate::ump::Packet;

use super::command::{encode_datagram, parse_datagram, ByeReason, CommandPacket};
use super::session::{Session, SessionConfig, SessionEvent, SessionState};
use super::AuthMethod;

/// Socket read timeout; also the timer granularity of the loops and the
/// worst-case latency between a send request and its datagram.
const LOOP_TICK: Duration = Duration::from_millis(5);

/// Received packets buffered between the loop and the consumer.
const RX_QUEUE_DEPTH: usize = 1024;

/// Outbound requests buffered between the handle and the loop.
const TX_QUEUE_DEPTH: usize = 64;

fn bind_udp(addr: SocketAddr) -> Result<UdpSocket> {
    let domain = Domain::for_address(addr);
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(LOOP_TICK))?;
    Ok(socket)
}

fn resolve(addr: impl ToSocketAddrs) -> Result<SocketAddr> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::Io(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "address resolved to nothing",
        )))
}

/// Send every queued command, packed into MTU-sized datagrams.
fn flush_outbox(socket: &UdpSocket, peer: SocketAddr, session: &mut Session) -> Result<()> {
    let commands = session.take_outbox();
    if commands.is_empty() {
        return Ok(());
    }
    let mut batch: Vec<CommandPacket> = Vec::new();
    let mut len = 4;
    for cmd in commands {
        if !batch.is_empty() && len + cmd.wire_len() > MAX_DATAGRAM_LEN {
            socket.send_to(&encode_datagram(&batch), peer)?;
            batch.clear();
            len = 4;
        }
        len += cmd.wire_len();
        batch.push(cmd);
    }
    if !batch.is_empty() {
        socket.send_to(&encode_datagram(&batch), peer)?;
    }
    Ok(())
}

// ============================================================================
// CLIENT SESSION
// ============================================================================

enum LoopRequest {
    Send(Vec<Packet>),
    Close,
}

/// A client session over UDP, usable as a [`UmpEndpoint`].
///
/// Dropping the handle performs the orderly Bye handshake (bounded by the
/// grace period) before the loop thread exits.
pub struct UdpSession {
    peer: SocketAddr,
    req_tx: Sender<LoopRequest>,
    pkt_rx: Receiver<Result<Packet>>,
    state: Arc<Mutex<SessionState>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl UdpSession {
    /// Connect with default configuration and optional credentials; blocks
    /// until the session is established or the handshake fails.
    pub fn connect(addr: impl ToSocketAddrs, auth: Option<AuthMethod>) -> Result<Self> {
        let cfg = SessionConfig { auth, ..Default::default() };
        Self::connect_with(addr, cfg)
    }

    /// Connect with explicit session configuration.
    pub fn connect_with(addr: impl ToSocketAddrs, cfg: SessionConfig) -> Result<Self> {
        let peer = resolve(addr)?;
        let bind_addr: SocketAddr = if peer.is_ipv4() {
            "0.0.0.0:0".parse().expect("literal address")
        } else {
            "[::]:0".parse().expect("literal address")
        };
        let socket = bind_udp(bind_addr)?;
        log::info!(
            "[UDP] session socket {} -> {}",
            socket.local_addr()?,
            peer
        );

        let (req_tx, req_rx) = bounded(TX_QUEUE_DEPTH);
        let (pkt_tx, pkt_rx) = bounded(RX_QUEUE_DEPTH);
        let (hs_tx, hs_rx) = bounded(1);
        let state = Arc::new(Mutex::new(SessionState::Idle));

        let handshake_budget =
            cfg.invite_timeout * (cfg.invite_retries + 2) + Duration::from_secs(1);
        let loop_state = Arc::clone(&state);
        let thread = std::thread::Builder::new()
            .name("midinet-udp-session".into())
            .spawn(move || client_loop(socket, peer, cfg, req_rx, pkt_tx, hs_tx, loop_state))
            .map_err(Error::Io)?;

        let session = Self {
            peer,
            req_tx,
            pkt_rx,
            state,
            thread: Some(thread),
        };

        match hs_rx.recv_timeout(handshake_budget) {
            Ok(Ok(())) => Ok(session),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Timeout("session handshake")),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Orderly teardown; consumes the handle.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.req_tx.send(LoopRequest::Close);
        if let Some(handle) = self.thread.take() {
            // Keep draining so the loop never wedges on a full delivery
            // queue while it finishes the farewell.
            let deadline = Instant::now() + Duration::from_secs(2);
            while !handle.is_finished() && Instant::now() < deadline {
                let _ = self.pkt_rx.recv_timeout(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                log::warn!("[UDP] session loop did not exit in time, detaching");
            }
        }
    }
}

impl Drop for UdpSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl UmpEndpoint for UdpSession {
    fn send_many(&mut self, packets: &[Packet]) -> Result<()> {
        self.req_tx
            .send(LoopRequest::Send(packets.to_vec()))
            .map_err(|_| Error::SessionClosed)
    }

    fn recv(&mut self) -> Result<Packet> {
        self.pkt_rx.recv().map_err(|_| Error::SessionClosed)?
    }

    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Packet>> {
        match self.pkt_rx.recv_timeout(timeout) {
            Ok(res) => res.map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::SessionClosed),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn client_loop(
    socket: UdpSocket,
    peer: SocketAddr,
    cfg: SessionConfig,
    req_rx: Receiver<LoopRequest>,
    pkt_tx: Sender<Result<Packet>>,
    hs_tx: Sender<Result<()>>,
    state: Arc<Mutex<SessionState>>,
) {
    let mut session = Session::client(cfg, Instant::now());
    session.connect(Instant::now());
    let mut hs_reported = false;
    let mut buf = [0u8; 2048];
    let mut closing_requested = false;

    'outer: loop {
        // 1. Receive one datagram (or time out at the tick granularity).
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                if from == peer {
                    match parse_datagram(&buf[..n]) {
                        Ok(cmds) => {
                            let now = Instant::now();
                            for cmd in &cmds {
                                session.handle_command(cmd, now);
                            }
                        }
                        Err(e) => log::warn!("[UDP] bad datagram from {}: {}", from, e),
                    }
                } else {
                    log::debug!("[UDP] ignoring datagram from unrelated {}", from);
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) => {}
            Err(e) => {
                log::error!("[UDP] socket error: {}", e);
                let _ = pkt_tx.send(Err(Error::Io(e)));
                break;
            }
        }

        let now = Instant::now();

        // 2. Handle requests.
        loop {
            match req_rx.try_recv() {
                Ok(LoopRequest::Send(packets)) => {
                    if let Err(e) = session.send_ump(&packets, now) {
                        log::warn!("[UDP] dropping send: {}", e);
                    }
                }
                Ok(LoopRequest::Close) => {
                    closing_requested = true;
                    session.begin_close(ByeReason::UserTerminated, now);
                }
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    if !closing_requested {
                        closing_requested = true;
                        session.begin_close(ByeReason::UserTerminated, now);
                    }
                    break;
                }
            }
        }

        // 3. Timers.
        session.tick(now);

        // 4. Events.
        let mut finished = false;
        while let Some(event) = session.next_event() {
            match event {
                SessionEvent::Established { remote_name, .. } => {
                    log::info!("[UDP] session established with {:?}", remote_name);
                    if !hs_reported {
                        hs_reported = true;
                        let _ = hs_tx.send(Ok(()));
                    }
                }
                SessionEvent::Closed { reason, by_peer } => {
                    log::info!("[UDP] session closed ({:?}, by_peer={})", reason, by_peer);
                    if !hs_reported {
                        hs_reported = true;
                        let _ = hs_tx.send(Err(close_error(reason)));
                    }
                    finished = true;
                }
            }
        }
        *state.lock() = session.state();

        // 5. Transmit.
        if let Err(e) = flush_outbox(&socket, peer, &mut session) {
            log::error!("[UDP] send failed: {}", e);
            let _ = pkt_tx.send(Err(e));
            break;
        }

        // 6. Deliver received UMP upward (blocking send = back-pressure).
        for packet in session.drain_delivered() {
            if pkt_tx.send(Ok(packet)).is_err() {
                break 'outer; // consumer is gone
            }
        }

        if finished {
            break;
        }
    }
    *state.lock() = SessionState::Idle;
    log::debug!("[UDP] session loop ended");
}

fn close_error(reason: ByeReason) -> Error {
    match reason {
        ByeReason::AuthFailed
        | ByeReason::InvitationWithAuthRejected
        | ByeReason::UserNotFound
        | ByeReason::NoMatchingAuthMethod => Error::AuthFailed(format!("{:?}", reason)),
        ByeReason::Timeout => Error::Timeout("session handshake"),
        other => Error::ProtocolViolation(format!("session closed: {:?}", other)),
    }
}

// ============================================================================
// HOST
// ============================================================================

/// Host-side configuration.
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    /// Endpoint name returned in Invitation Accepted.
    pub name: String,
    /// Product instance id returned in Invitation Accepted.
    pub piid: String,
    /// When set, peers must authenticate against these credentials.
    pub auth: Option<AuthMethod>,
    /// When set, UMP Stream discovery requests are answered from this
    /// topology.
    pub topology: Option<crate::discovery::Topology>,
}

enum HostRequest {
    SendTo(SocketAddr, Vec<Packet>),
    Shutdown,
}

/// A Network MIDI 2.0 host: accepts invitations on one socket, one session
/// per peer address.
pub struct UmpHost {
    local_addr: SocketAddr,
    req_tx: Sender<HostRequest>,
    pkt_rx: Receiver<(SocketAddr, Packet)>,
    states: Arc<Mutex<HashMap<SocketAddr, SessionState>>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl UmpHost {
    /// Bind the host socket and start serving invitations.
    pub fn bind(addr: impl ToSocketAddrs, cfg: HostConfig) -> Result<Self> {
        let bind_addr = resolve(addr)?;
        let socket = bind_udp(bind_addr)?;
        let local_addr = socket.local_addr()?;
        log::info!("[HOST] listening on {}", local_addr);

        let (req_tx, req_rx) = bounded(TX_QUEUE_DEPTH);
        let (pkt_tx, pkt_rx) = bounded(RX_QUEUE_DEPTH);
        let states = Arc::new(Mutex::new(HashMap::new()));

        let loop_states = Arc::clone(&states);
        let thread = std::thread::Builder::new()
            .name("midinet-udp-host".into())
            .spawn(move || host_loop(socket, cfg, req_rx, pkt_tx, loop_states))
            .map_err(Error::Io)?;

        Ok(Self {
            local_addr,
            req_tx,
            pkt_rx,
            states,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive the next UMP packet from any established session.
    pub fn recv(&self) -> Result<(SocketAddr, Packet)> {
        self.pkt_rx.recv().map_err(|_| Error::SessionClosed)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<(SocketAddr, Packet)>> {
        match self.pkt_rx.recv_timeout(timeout) {
            Ok(v) => Ok(Some(v)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::SessionClosed),
        }
    }

    /// Send UMP packets to one established peer.
    pub fn send_to(&self, peer: SocketAddr, packets: &[Packet]) -> Result<()> {
        match self
            .req_tx
            .try_send(HostRequest::SendTo(peer, packets.to_vec()))
        {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(req)) => self
                .req_tx
                .send(req)
                .map_err(|_| Error::SessionClosed),
            Err(TrySendError::Disconnected(_)) => Err(Error::SessionClosed),
        }
    }

    /// Snapshot of the per-peer session states.
    pub fn sessions(&self) -> Vec<(SocketAddr, SessionState)> {
        self.states
            .lock()
            .iter()
            .map(|(addr, state)| (*addr, *state))
            .collect()
    }

    fn shutdown_impl(&mut self) {
        let _ = self.req_tx.send(HostRequest::Shutdown);
        if let Some(handle) = self.thread.take() {
            let deadline = Instant::now() + Duration::from_secs(2);
            while !handle.is_finished() && Instant::now() < deadline {
                let _ = self.pkt_rx.recv_timeout(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                log::warn!("[HOST] loop did not exit in time, detaching");
            }
        }
    }

    /// Say Bye to every peer and stop the loop.
    pub fn shutdown(mut self) {
        self.shutdown_impl();
    }
}

impl Drop for UmpHost {
    fn drop(&mut self) {
        self.shutdown_impl();
    }
}

fn host_loop(
    socket: UdpSocket,
    cfg: HostConfig,
    req_rx: Receiver<HostRequest>,
    pkt_tx: Sender<(SocketAddr, Packet)>,
    states: Arc<Mutex<HashMap<SocketAddr, SessionState>>>,
) {
    let responder = cfg
        .topology
        .as_ref()
        .map(|t| TopologyResponder::new(t.clone()));
    let responder = match responder {
        Some(Ok(r)) => Some(r),
        Some(Err(e)) => {
            log::error!("[HOST] invalid topology, discovery disabled: {}", e);
            None
        }
        None => None,
    };

    let mut sessions: HashMap<SocketAddr, Session> = HashMap::new();
    let mut buf = [0u8; 2048];
    let mut shutting_down = false;

    'outer: loop {
        // 1. Receive.
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => match parse_datagram(&buf[..n]) {
                Ok(cmds) => {
                    let now = Instant::now();
                    let session = sessions.entry(from).or_insert_with(|| {
                        log::debug!("[HOST] new session slot for {}", from);
                        Session::server(
                            SessionConfig {
                                name: cfg.name.clone(),
                                piid: cfg.piid.clone(),
                                require_auth: cfg.auth.clone(),
                                ..Default::default()
                            },
                            now,
                        )
                    });
                    for cmd in &cmds {
                        session.handle_command(cmd, now);
                    }
                }
                Err(e) => log::warn!("[HOST] bad datagram from {}: {}", from, e),
            },
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) => {}
            Err(e) => {
                log::error!("[HOST] socket error: {}", e);
                break;
            }
        }

        let now = Instant::now();

        // 2. Requests.
        loop {
            match req_rx.try_recv() {
                Ok(HostRequest::SendTo(peer, packets)) => match sessions.get_mut(&peer) {
                    Some(session) => {
                        if let Err(e) = session.send_ump(&packets, now) {
                            log::warn!("[HOST] dropping send to {}: {}", peer, e);
                        }
                    }
                    None => log::warn!("[HOST] no session for {}", peer),
                },
                Ok(HostRequest::Shutdown) => shutting_down = true,
                Err(crossbeam_channel::TryRecvError::Empty) => break,
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    shutting_down = true;
                    break;
                }
            }
        }
        if shutting_down {
            for (peer, session) in sessions.iter_mut() {
                session.begin_close(ByeReason::PowerDown, now);
                let _ = flush_outbox(&socket, *peer, session);
            }
            break;
        }

        // 3. Per-session timers, events, deliveries, transmit.
        let mut gone: Vec<SocketAddr> = Vec::new();
        for (peer, session) in sessions.iter_mut() {
            session.tick(now);

            while let Some(event) = session.next_event() {
                match event {
                    SessionEvent::Established { remote_name, .. } => {
                        log::info!("[HOST] {} established ({:?})", peer, remote_name)
                    }
                    SessionEvent::Closed { reason, .. } => {
                        log::info!("[HOST] {} closed ({:?})", peer, reason);
                    }
                }
            }

            for packet in session.drain_delivered() {
                // Discovery requests are answered locally; everything is
                // also surfaced to the application.
                if let (Some(responder), Packet::Stream(sp)) = (&responder, &packet) {
                    if let Some(msg) = sp.message() {
                        let replies = responder.respond(&msg);
                        if !replies.is_empty() {
                            if let Err(e) = session.send_ump(&replies, now) {
                                log::warn!("[HOST] discovery reply failed: {}", e);
                            }
                        }
                    }
                }
                if pkt_tx.send((*peer, packet)).is_err() {
                    break 'outer;
                }
            }

            if let Err(e) = flush_outbox(&socket, *peer, session) {
                log::warn!("[HOST] send to {} failed: {}", peer, e);
            }

            if session.state() == SessionState::Idle {
                gone.push(*peer);
            }
        }
        for peer in &gone {
            sessions.remove(peer);
            log::debug!("[HOST] dropped session slot for {}", peer);
        }

        *states.lock() = sessions
            .iter()
            .map(|(addr, s)| (*addr, s.state()))
            .collect();
    }
    log::debug!("[HOST] loop ended");
}
