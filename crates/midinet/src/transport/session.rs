// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session state machine for the Network MIDI 2.0 UDP transport.
//!
//! Pure protocol logic, no sockets: inputs are received commands and clock
//! ticks, outputs are commands to transmit, in-order UMP deliveries, and
//! session events. The socket loop in [`udp`](super::udp) drives it; tests
//! drive it directly.
//!
//! One `Session` instance covers both sides of the protocol - the client
//! (inviter) and the server (acceptor) mirror each other:
//!
//! ```text
//! Idle -- send Invitation --> PendingInvite
//! PendingInvite -- rx InvitationAccepted --> Established
//! PendingInvite -- rx InvitationWithAuth(nonce) --> Authenticating
//! Authenticating -- send AuthorizationReply --> PendingInvite
//! PendingInvite -- rx Nak --> Idle (failed)
//! Established -- rx Bye / timeout --> Closing -- Bye Reply --> Idle
//! ```
//!
//! # Reliability
//!
//! UMP Data commands carry a 16-bit sequence; the receiver releases packets
//! to the consumer strictly in sequence order, buffering ahead-of-gap
//! arrivals and requesting retransmission for the gap. The sender keeps an
//! outstanding ring of past commands to serve those requests, and
//! piggybacks the most recent ones onto new datagrams (forward error
//! correction); duplicates are dropped by sequence comparison.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::config;
use crate::error::{Error, Result};
use crate::ump::{decode_all, Packet};

use super::auth::{self, AuthMethod};
use super::command::{
    ByeReason, CommandCode, CommandPacket, NAK_REASON_COMMAND_MALFORMED,
    NAK_REASON_SESSION_NOT_ACTIVE, RETRANSMIT_ERROR_DATA_UNAVAILABLE,
};

/// Serial (wrap-aware) `a < b` over the 16-bit sequence space.
fn seq_lt(a: u16, b: u16) -> bool {
    a != b && b.wrapping_sub(a) < 0x8000
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    PendingInvite,
    Authenticating,
    Established,
    Closing,
}

/// Which side of the handshake this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Client,
    Server,
}

/// Tunables and identity for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Endpoint name sent in invitations.
    pub name: String,
    /// Product instance id sent in invitations.
    pub piid: String,
    /// Client-side credentials for answering challenges.
    pub auth: Option<AuthMethod>,
    /// Server-side credentials; peers must authenticate against these.
    pub require_auth: Option<AuthMethod>,
    pub outstanding_window: usize,
    pub fec_window: usize,
    pub idle_ping: Duration,
    pub ping_timeout: Duration,
    pub ping_attempts: u32,
    pub retransmit_reissue: Duration,
    pub invite_timeout: Duration,
    pub invite_retries: u32,
    pub bye_grace: Duration,
    pub max_reorder: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "midinet".into(),
            piid: String::new(),
            auth: None,
            require_auth: None,
            outstanding_window: config::OUTSTANDING_WINDOW,
            fec_window: config::FEC_WINDOW,
            idle_ping: config::IDLE_PING_INTERVAL,
            ping_timeout: config::PING_TIMEOUT,
            ping_attempts: config::PING_ATTEMPTS,
            retransmit_reissue: config::RETRANSMIT_REISSUE,
            invite_timeout: config::INVITE_TIMEOUT,
            invite_retries: config::INVITE_RETRIES,
            bye_grace: config::BYE_GRACE,
            max_reorder: config::MAX_REORDER_BUFFER,
        }
    }
}

/// Session notifications surfaced to the owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Established {
        remote_ucmep: u32,
        remote_name: String,
        remote_piid: String,
    },
    Closed {
        reason: ByeReason,
        by_peer: bool,
    },
}

/// One Network MIDI session endpoint.
#[derive(Debug)]
pub struct Session {
    role: SessionRole,
    cfg: SessionConfig,
    state: SessionState,
    local_ucmep: u32,
    remote_ucmep: Option<u32>,

    // Handshake
    invite_sent_at: Option<Instant>,
    invite_attempts: u32,
    /// Client: nonce received; server: nonce issued.
    nonce: Option<[u8; config::NONCE_LEN]>,

    // Transmit side
    tx_seq: u16,
    outstanding: VecDeque<(u16, CommandPacket)>,

    // Receive side
    rx_next: Option<u16>,
    reorder: HashMap<u16, Vec<Packet>>,
    gap_requested_at: Option<Instant>,

    // Liveness
    last_rx_at: Instant,
    ping: Option<(u32, Instant, u32)>,

    // Teardown
    close_reason: ByeReason,
    bye_sent_at: Option<Instant>,

    // Outputs
    outbox: Vec<CommandPacket>,
    delivered: Vec<Packet>,
    events: VecDeque<SessionEvent>,
}

impl Session {
    pub fn new(role: SessionRole, cfg: SessionConfig, now: Instant) -> Self {
        Self {
            role,
            cfg,
            state: SessionState::Idle,
            local_ucmep: auth::random_u32(),
            remote_ucmep: None,
            invite_sent_at: None,
            invite_attempts: 0,
            nonce: None,
            tx_seq: 0,
            outstanding: VecDeque::new(),
            rx_next: None,
            reorder: HashMap::new(),
            gap_requested_at: None,
            last_rx_at: now,
            ping: None,
            close_reason: ByeReason::Unknown,
            bye_sent_at: None,
            outbox: Vec::new(),
            delivered: Vec::new(),
            events: VecDeque::new(),
        }
    }

    pub fn client(cfg: SessionConfig, now: Instant) -> Self {
        Self::new(SessionRole::Client, cfg, now)
    }

    pub fn server(cfg: SessionConfig, now: Instant) -> Self {
        Self::new(SessionRole::Server, cfg, now)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn local_ucmep(&self) -> u32 {
        self.local_ucmep
    }

    pub fn remote_ucmep(&self) -> Option<u32> {
        self.remote_ucmep
    }

    // ===== Outputs =====

    /// Commands queued for transmission since the last call.
    pub fn take_outbox(&mut self) -> Vec<CommandPacket> {
        std::mem::take(&mut self.outbox)
    }

    /// UMP packets released in order to the consumer since the last call.
    pub fn drain_delivered(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.delivered)
    }

    pub fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    // ===== Driving =====

    /// Client: begin the handshake.
    pub fn connect(&mut self, now: Instant) {
        debug_assert_eq!(self.role, SessionRole::Client);
        self.send_invitation(now);
        self.state = SessionState::PendingInvite;
    }

    fn send_invitation(&mut self, now: Instant) {
        let caps = self.cfg.auth.as_ref().map(AuthMethod::capabilities).unwrap_or(0);
        self.outbox.push(CommandPacket::invitation(
            caps,
            self.local_ucmep,
            &self.cfg.name,
            &self.cfg.piid,
        ));
        self.invite_sent_at = Some(now);
        self.invite_attempts += 1;
        log::debug!(
            "[SESSION] invitation sent (attempt {}/{})",
            self.invite_attempts,
            self.cfg.invite_retries
        );
    }

    /// Queue UMP packets as sequence-numbered UMP Data commands.
    ///
    /// Recently sent commands are replayed ahead of the new ones (FEC); the
    /// receiver deduplicates by sequence number.
    pub fn send_ump(&mut self, packets: &[Packet], _now: Instant) -> Result<()> {
        if self.state != SessionState::Established {
            return Err(Error::ProtocolViolation(format!(
                "cannot send UMP in {:?}",
                self.state
            )));
        }

        if self.cfg.fec_window > 0 {
            let n = self.outstanding.len();
            let fec: Vec<CommandPacket> = self
                .outstanding
                .iter()
                .skip(n.saturating_sub(self.cfg.fec_window))
                .map(|(_, cmd)| cmd.clone())
                .collect();
            self.outbox.extend(fec);
        }

        for packet in packets {
            let seq = self.tx_seq;
            self.tx_seq = self.tx_seq.wrapping_add(1);
            let cmd = CommandPacket::ump_data(seq, std::slice::from_ref(packet));
            self.outstanding.push_back((seq, cmd.clone()));
            while self.outstanding.len() > self.cfg.outstanding_window {
                self.outstanding.pop_front();
            }
            self.outbox.push(cmd);
        }
        Ok(())
    }

    /// Reset both sequence spaces (and ask the peer to do the same).
    pub fn request_reset(&mut self) {
        self.reset_sequences();
        self.outbox.push(CommandPacket::session_reset());
    }

    fn reset_sequences(&mut self) {
        self.tx_seq = 0;
        self.rx_next = None;
        self.outstanding.clear();
        self.reorder.clear();
        self.gap_requested_at = None;
    }

    /// Begin an orderly teardown: Bye, then wait for the reply (or the
    /// grace period) before reporting closure.
    pub fn begin_close(&mut self, reason: ByeReason, now: Instant) {
        if matches!(self.state, SessionState::Idle | SessionState::Closing) {
            return;
        }
        log::info!("[SESSION] closing: {:?}", reason);
        self.outbox.push(CommandPacket::bye(reason));
        self.close_reason = reason;
        self.bye_sent_at = Some(now);
        self.state = SessionState::Closing;
    }

    /// Advance timers: handshake retries, liveness pings, retransmit
    /// re-issue, and the bye grace period.
    pub fn tick(&mut self, now: Instant) {
        match self.state {
            SessionState::PendingInvite => {
                let deadline_passed = self
                    .invite_sent_at
                    .map(|t| now.duration_since(t) >= self.cfg.invite_timeout)
                    .unwrap_or(false);
                if deadline_passed {
                    if self.invite_attempts < self.cfg.invite_retries {
                        self.send_invitation(now);
                    } else {
                        log::warn!("[SESSION] handshake timed out");
                        self.state = SessionState::Idle;
                        self.events.push_back(SessionEvent::Closed {
                            reason: ByeReason::Timeout,
                            by_peer: false,
                        });
                    }
                }
            }
            SessionState::Authenticating => {
                // Server waiting for the authorization reply.
                let deadline_passed = self
                    .invite_sent_at
                    .map(|t| now.duration_since(t) >= self.cfg.invite_timeout * 3)
                    .unwrap_or(false);
                if deadline_passed {
                    self.outbox.push(CommandPacket::bye(ByeReason::SessionNotEstablished));
                    self.state = SessionState::Idle;
                    self.events.push_back(SessionEvent::Closed {
                        reason: ByeReason::SessionNotEstablished,
                        by_peer: false,
                    });
                }
            }
            SessionState::Established => {
                self.tick_liveness(now);
                self.tick_retransmit(now);
            }
            SessionState::Closing => {
                let grace_over = self
                    .bye_sent_at
                    .map(|t| now.duration_since(t) >= self.cfg.bye_grace)
                    .unwrap_or(true);
                if grace_over {
                    self.finish_close(false);
                }
            }
            SessionState::Idle => {}
        }
    }

    fn tick_liveness(&mut self, now: Instant) {
        match self.ping {
            Some((_, sent_at, attempts)) => {
                if now.duration_since(sent_at) >= self.cfg.ping_timeout {
                    if attempts + 1 >= self.cfg.ping_attempts {
                        log::warn!("[SESSION] peer silent after {} pings", attempts + 1);
                        self.begin_close(ByeReason::Timeout, now);
                        self.ping = None;
                    } else {
                        let id = auth::random_u32();
                        self.outbox.push(CommandPacket::ping(id));
                        self.ping = Some((id, now, attempts + 1));
                    }
                }
            }
            None => {
                if now.duration_since(self.last_rx_at) >= self.cfg.idle_ping {
                    let id = auth::random_u32();
                    log::debug!("[SESSION] idle, pinging peer");
                    self.outbox.push(CommandPacket::ping(id));
                    self.ping = Some((id, now, 0));
                }
            }
        }
    }

    fn tick_retransmit(&mut self, now: Instant) {
        if self.reorder.is_empty() {
            self.gap_requested_at = None;
            return;
        }
        let reissue = self
            .gap_requested_at
            .map(|t| now.duration_since(t) >= self.cfg.retransmit_reissue)
            .unwrap_or(true);
        if reissue {
            if let (Some(next), Some(count)) = (self.rx_next, self.gap_width()) {
                self.outbox.push(CommandPacket::retransmit_request(next, count));
                self.gap_requested_at = Some(now);
            }
        }
    }

    /// Missing sequences between `rx_next` and the nearest buffered packet.
    fn gap_width(&self) -> Option<u16> {
        let next = self.rx_next?;
        self.reorder
            .keys()
            .map(|&k| k.wrapping_sub(next))
            .min()
            .filter(|&d| d > 0)
    }

    // ===== Input =====

    /// Process one received command.
    pub fn handle_command(&mut self, cmd: &CommandPacket, now: Instant) {
        self.last_rx_at = now;

        let Some(code) = cmd.command() else {
            log::debug!("[SESSION] ignoring unknown command {:#04X}", cmd.code);
            return;
        };

        match code {
            CommandCode::Ping => self.outbox.push(CommandPacket::ping_reply(cmd)),
            CommandCode::PingReply => {
                let matches = match (self.ping, cmd.ping_id()) {
                    (Some((id, _, _)), Ok(echoed)) => id == echoed,
                    _ => false,
                };
                if matches {
                    self.ping = None;
                } else {
                    log::debug!("[SESSION] stale ping reply ignored");
                }
            }
            CommandCode::Invitation => self.on_invitation(cmd, now),
            CommandCode::InvitationWithAuth | CommandCode::InvitationWithUserAuth => {
                self.on_auth_challenge(cmd, code, now)
            }
            CommandCode::InvitationAccepted => self.on_accepted(cmd),
            CommandCode::InvitationPending => {
                if self.state == SessionState::PendingInvite {
                    log::debug!("[SESSION] peer asks for patience");
                    self.invite_sent_at = Some(now);
                }
            }
            CommandCode::AuthorizationReply => self.on_authorization_reply(cmd),
            CommandCode::Nak => {
                log::warn!(
                    "[SESSION] peer nak (reason {:#04X}, command {:#04X})",
                    cmd.payload.first().copied().unwrap_or(0),
                    cmd.payload.get(1).copied().unwrap_or(0)
                );
                if matches!(
                    self.state,
                    SessionState::PendingInvite | SessionState::Authenticating
                ) {
                    self.state = SessionState::Idle;
                    self.events.push_back(SessionEvent::Closed {
                        reason: ByeReason::InvitationRejected,
                        by_peer: true,
                    });
                }
            }
            CommandCode::RetransmitRequest => self.on_retransmit_request(cmd),
            CommandCode::RetransmitError => self.on_retransmit_error(cmd),
            CommandCode::SessionReset => {
                self.reset_sequences();
                self.outbox.push(CommandPacket::session_reset_reply());
            }
            CommandCode::SessionResetReply => {
                log::debug!("[SESSION] peer acknowledged session reset");
            }
            CommandCode::Bye => {
                let reason = ByeReason::from_u8(cmd.reason_byte());
                self.outbox.push(CommandPacket::bye_reply());
                log::info!("[SESSION] peer bye: {:?}", reason);
                self.state = SessionState::Idle;
                self.events.push_back(SessionEvent::Closed {
                    reason,
                    by_peer: true,
                });
            }
            CommandCode::ByeReply => {
                if self.state == SessionState::Closing {
                    self.finish_close(false);
                }
            }
            CommandCode::UmpData => self.on_ump_data(cmd, now),
        }
    }

    fn finish_close(&mut self, by_peer: bool) {
        self.state = SessionState::Idle;
        self.bye_sent_at = None;
        self.events.push_back(SessionEvent::Closed {
            reason: self.close_reason,
            by_peer,
        });
    }

    fn establish(&mut self, ucmep: u32, name: String, piid: String) {
        log::info!(
            "[SESSION] established with {:?} (ucmep {:#010X})",
            name,
            ucmep
        );
        self.state = SessionState::Established;
        self.remote_ucmep = Some(ucmep);
        self.invite_sent_at = None;
        self.events.push_back(SessionEvent::Established {
            remote_ucmep: ucmep,
            remote_name: name,
            remote_piid: piid,
        });
    }

    fn on_invitation(&mut self, cmd: &CommandPacket, now: Instant) {
        let Ok((remote_ucmep, name, piid)) = cmd.identity() else {
            self.outbox
                .push(CommandPacket::nak(NAK_REASON_COMMAND_MALFORMED, cmd.code));
            return;
        };

        // Glare: both sides invited simultaneously. The numerically lower
        // UCMEP keeps the client role; the other answers as server.
        if self.role == SessionRole::Client {
            if self.state != SessionState::PendingInvite {
                log::debug!("[SESSION] unexpected invitation in {:?}", self.state);
                return;
            }
            if self.local_ucmep < remote_ucmep {
                log::debug!(
                    "[SESSION] invitation glare, staying inviter ({:#010X} < {:#010X})",
                    self.local_ucmep,
                    remote_ucmep
                );
                return;
            }
            log::debug!("[SESSION] invitation glare, yielding to lower ucmep");
            self.outbox.push(CommandPacket::invitation_accepted(
                self.local_ucmep,
                &self.cfg.name,
                &self.cfg.piid,
            ));
            self.establish(remote_ucmep, name, piid);
            return;
        }

        match &self.cfg.require_auth {
            None => {
                self.outbox.push(CommandPacket::invitation_accepted(
                    self.local_ucmep,
                    &self.cfg.name,
                    &self.cfg.piid,
                ));
                self.establish(remote_ucmep, name, piid);
            }
            Some(required) => {
                if cmd.capabilities() & required.capabilities() == 0 {
                    log::warn!("[SESSION] peer lacks the required auth capability");
                    self.outbox
                        .push(CommandPacket::bye(ByeReason::NoMatchingAuthMethod));
                    self.state = SessionState::Idle;
                    self.events.push_back(SessionEvent::Closed {
                        reason: ByeReason::NoMatchingAuthMethod,
                        by_peer: false,
                    });
                    return;
                }
                let nonce = match auth::generate_nonce() {
                    Ok(n) => n,
                    Err(e) => {
                        log::error!("[SESSION] cannot issue challenge: {}", e);
                        self.outbox.push(CommandPacket::bye(ByeReason::Unknown));
                        self.state = SessionState::Idle;
                        return;
                    }
                };
                self.nonce = Some(nonce);
                self.remote_ucmep = Some(remote_ucmep);
                self.outbox
                    .push(CommandPacket::auth_challenge(required.is_user_auth(), &nonce));
                self.invite_sent_at = Some(now);
                self.state = SessionState::Authenticating;
            }
        }
    }

    fn on_auth_challenge(&mut self, cmd: &CommandPacket, code: CommandCode, now: Instant) {
        if self.state != SessionState::PendingInvite {
            log::debug!("[SESSION] unexpected auth challenge in {:?}", self.state);
            return;
        }
        let Ok(nonce) = cmd.nonce() else {
            self.outbox
                .push(CommandPacket::nak(NAK_REASON_COMMAND_MALFORMED, cmd.code));
            return;
        };

        let wants_user = code == CommandCode::InvitationWithUserAuth;
        let usable = self
            .cfg
            .auth
            .as_ref()
            .map(|a| a.is_user_auth() == wants_user)
            .unwrap_or(false);
        if !usable {
            log::warn!(
                "[SESSION] peer requires {} authentication, credentials unavailable",
                if wants_user { "user/password" } else { "shared-secret" }
            );
            self.outbox
                .push(CommandPacket::bye(ByeReason::InvitationCanceled));
            self.state = SessionState::Idle;
            self.events.push_back(SessionEvent::Closed {
                reason: ByeReason::NoMatchingAuthMethod,
                by_peer: false,
            });
            return;
        }

        self.state = SessionState::Authenticating;
        self.nonce = Some(nonce);
        let creds = self.cfg.auth.as_ref().expect("checked above");
        let digest = creds.digest(&nonce);
        self.outbox
            .push(CommandPacket::authorization_reply(&digest, creds.username()));
        // Reply sent; back to waiting for the acceptance.
        self.state = SessionState::PendingInvite;
        self.invite_sent_at = Some(now);
    }

    fn on_accepted(&mut self, cmd: &CommandPacket) {
        if self.state != SessionState::PendingInvite {
            log::debug!("[SESSION] unexpected acceptance in {:?}", self.state);
            return;
        }
        match cmd.identity() {
            Ok((ucmep, name, piid)) => self.establish(ucmep, name, piid),
            Err(_) => self
                .outbox
                .push(CommandPacket::nak(NAK_REASON_COMMAND_MALFORMED, cmd.code)),
        }
    }

    fn on_authorization_reply(&mut self, cmd: &CommandPacket) {
        if self.role != SessionRole::Server || self.state != SessionState::Authenticating {
            log::debug!("[SESSION] unexpected authorization reply");
            return;
        }
        let (Some(required), Some(nonce)) = (self.cfg.require_auth.clone(), self.nonce) else {
            return;
        };
        let verified = match cmd.auth_reply_fields() {
            Ok((digest, username)) => required.verify(&nonce, &digest, username.as_deref()),
            Err(_) => false,
        };
        if verified {
            self.nonce = None;
            self.outbox.push(CommandPacket::invitation_accepted(
                self.local_ucmep,
                &self.cfg.name,
                &self.cfg.piid,
            ));
            let ucmep = self.remote_ucmep.unwrap_or(0);
            self.establish(ucmep, String::new(), String::new());
        } else {
            log::warn!("[SESSION] authentication failed");
            self.outbox.push(CommandPacket::bye(ByeReason::AuthFailed));
            self.state = SessionState::Idle;
            self.events.push_back(SessionEvent::Closed {
                reason: ByeReason::AuthFailed,
                by_peer: false,
            });
        }
    }

    fn on_retransmit_request(&mut self, cmd: &CommandPacket) {
        let Ok((first, count)) = cmd.retransmit_range() else {
            self.outbox
                .push(CommandPacket::nak(NAK_REASON_COMMAND_MALFORMED, cmd.code));
            return;
        };
        log::debug!("[SESSION] retransmit request first={} count={}", first, count);
        for i in 0..count {
            let seq = first.wrapping_add(i);
            match self.outstanding.iter().find(|(s, _)| *s == seq) {
                Some((_, stored)) => self.outbox.push(stored.clone()),
                None => {
                    log::warn!("[SESSION] sequence {} evicted, cannot retransmit", seq);
                    self.outbox.push(CommandPacket::retransmit_error(
                        RETRANSMIT_ERROR_DATA_UNAVAILABLE,
                        seq,
                    ));
                    break;
                }
            }
        }
    }

    /// The peer cannot replay what we asked for: give up on the gap and
    /// resynchronize from whatever is buffered.
    fn on_retransmit_error(&mut self, cmd: &CommandPacket) {
        log::warn!(
            "[SESSION] retransmit unavailable (reason {:#04X}), skipping gap",
            cmd.reason_byte()
        );
        self.gap_requested_at = None;
        let Some(next) = self.rx_next else { return };

        // Resume at the closest buffered sequence past the gap.
        let Some(delta) = self.reorder.keys().map(|&k| k.wrapping_sub(next)).min() else {
            self.rx_next = None;
            return;
        };
        let mut seq = next.wrapping_add(delta);
        while let Some(packets) = self.reorder.remove(&seq) {
            self.delivered.extend(packets);
            seq = seq.wrapping_add(1);
        }
        self.rx_next = Some(seq);
    }

    fn on_ump_data(&mut self, cmd: &CommandPacket, now: Instant) {
        if self.state != SessionState::Established {
            self.outbox
                .push(CommandPacket::nak(NAK_REASON_SESSION_NOT_ACTIVE, cmd.code));
            return;
        }

        let words = cmd.ump_words();
        let (packets, consumed) = decode_all(&words);
        if consumed != words.len() {
            // One damaged command is a diagnostic, not a session failure.
            log::warn!(
                "[SESSION] UMP data seq={} has {} undecodable trailing words",
                cmd.sequence(),
                words.len() - consumed
            );
        }

        let seq = cmd.sequence();
        match self.rx_next {
            None => {
                self.rx_next = Some(seq.wrapping_add(1));
                self.delivered.extend(packets);
            }
            Some(next) if seq == next => {
                self.delivered.extend(packets);
                let mut n = next.wrapping_add(1);
                while let Some(buffered) = self.reorder.remove(&n) {
                    self.delivered.extend(buffered);
                    n = n.wrapping_add(1);
                }
                self.rx_next = Some(n);
                if self.reorder.is_empty() {
                    self.gap_requested_at = None;
                }
            }
            Some(next) if seq_lt(seq, next) => {
                // Duplicate (retransmission or FEC replay): exactly-once
                // delivery means dropping it here.
                log::debug!("[SESSION] duplicate seq {} (< {})", seq, next);
            }
            Some(next) => {
                if self.reorder.len() >= self.cfg.max_reorder {
                    log::error!("[SESSION] {} packets buffered behind a gap", self.reorder.len());
                    self.begin_close(ByeReason::TooManyMissingUmp, now);
                    return;
                }
                self.reorder.entry(seq).or_insert(packets);
                if self.gap_requested_at.is_none() {
                    let count = seq.wrapping_sub(next);
                    log::debug!("[SESSION] gap: expected {}, got {}", next, seq);
                    self.outbox
                        .push(CommandPacket::retransmit_request(next, count));
                    self.gap_requested_at = Some(now);
                }
            }
        }
    }
}
