//! Actuation delegated to a secondary controller over a line protocol.
//!
//! One command per line, one reply line per command. `OK:...` or `PONG`
//! is success; anything else, including silence, is failure. Unsolicited
//! `HEARTBEAT` lines may arrive at any time and are never taken as a reply.
//!
//! A command that gets no reply marks the channel not-ready. High-level
//! commands re-run the handshake once and resend once; a dispense that
//! timed out is preceded by `ST` on the resend when `stop_before_retry` is
//! set, since the protocol cannot report whether the first attempt moved.

use std::time::{Duration, Instant};

use dispenser_traits::{Clock, SerialLink};

use crate::channel::{ActuationChannel, ChannelResult};
use crate::config::RelaySettings;
use crate::error::DispenserError;
use crate::hw_error::map_hw_error;
use crate::types::{PillSize, check_angle, check_channel};

const HEARTBEAT: &str = "HEARTBEAT";
/// Upper bound on unsolicited lines drained per `maintain` call.
const MAX_DRAIN_LINES: usize = 64;

pub fn is_success_response(line: &str) -> bool {
    line.starts_with("OK:") || line == "PONG"
}

fn is_ready_banner(line: &str) -> bool {
    line == "READY" || line.starts_with("INIT:OK")
}

pub struct RelayChannel<L: SerialLink, K: Clock> {
    link: L,
    clock: K,
    settings: RelaySettings,
    ready: bool,
    last_ping: Option<Instant>,
}

impl<L: SerialLink, K: Clock> RelayChannel<L, K> {
    pub fn new(link: L, clock: K, settings: RelaySettings) -> Self {
        Self {
            link,
            clock,
            settings,
            ready: false,
            last_ping: None,
        }
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    fn link_error(&mut self, e: &(dyn std::error::Error + 'static)) -> DispenserError {
        self.ready = false;
        let mapped = map_hw_error(e);
        tracing::warn!(error = %e, "serial link error");
        mapped
    }

    /// Next non-empty line within what is left of `deadline`.
    fn read_until(&mut self, deadline: Instant) -> Result<Option<String>, DispenserError> {
        loop {
            let remaining = deadline.saturating_duration_since(self.clock.now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match self.link.read_line(remaining) {
                Ok(Some(line)) => {
                    let line = line.trim().to_string();
                    if !line.is_empty() {
                        return Ok(Some(line));
                    }
                }
                Ok(None) => return Ok(None),
                Err(e) => return Err(self.link_error(e.as_ref())),
            }
        }
    }

    /// Clear input, wait for a boot banner, else fall back to `PING`.
    pub fn handshake(&mut self) -> bool {
        if let Err(e) = self.link.clear_input() {
            self.link_error(e.as_ref());
            return false;
        }
        let deadline = self.clock.now() + self.settings.handshake_timeout;
        loop {
            match self.read_until(deadline) {
                Ok(Some(line)) if is_ready_banner(&line) => {
                    self.ready = true;
                    self.last_ping = Some(self.clock.now());
                    tracing::info!(banner = %line, "relay controller ready");
                    return true;
                }
                Ok(Some(line)) => tracing::debug!(line = %line, "ignoring line during handshake"),
                Ok(None) => break,
                Err(_) => return false,
            }
        }
        let ok = self.ping();
        if ok {
            tracing::info!("relay controller answered ping");
        } else {
            tracing::warn!("relay controller did not answer handshake");
        }
        ok
    }

    /// Send one command and wait for its reply. No retry.
    ///
    /// On timeout the channel is marked not-ready and `CommandTimeout` is
    /// returned; the reply text is returned as-is otherwise.
    pub fn send_command(&mut self, cmd: &str, timeout: Duration) -> Result<String, DispenserError> {
        if let Err(e) = self.link.clear_input() {
            return Err(self.link_error(e.as_ref()));
        }
        if let Err(e) = self.link.write_line(cmd) {
            return Err(self.link_error(e.as_ref()));
        }
        tracing::debug!(cmd, "relay command sent");
        let deadline = self.clock.now() + timeout;
        while let Some(line) = self.read_until(deadline)? {
            if line.starts_with(HEARTBEAT) {
                continue;
            }
            tracing::debug!(cmd, reply = %line, "relay reply");
            return Ok(line);
        }
        self.ready = false;
        tracing::warn!(
            cmd,
            timeout_ms = timeout.as_millis() as u64,
            "relay command timed out"
        );
        Err(DispenserError::CommandTimeout)
    }

    pub fn ping(&mut self) -> bool {
        let ok = matches!(
            self.send_command("PING", self.settings.ping_timeout).as_deref(),
            Ok("PONG")
        );
        self.ready = ok;
        self.last_ping = Some(self.clock.now());
        ok
    }

    /// `STATUS` answered with `OK:READY`.
    pub fn status(&mut self) -> bool {
        let reply = self.send_command("STATUS", self.settings.ping_timeout);
        matches!(reply.as_deref(), Ok("OK:READY"))
    }

    fn ensure_ready(&mut self) -> ChannelResult {
        if self.ready {
            return Ok(());
        }
        tracing::info!("relay not ready; re-running handshake");
        if self.handshake() {
            Ok(())
        } else {
            Err(DispenserError::ChannelUnavailable)
        }
    }

    fn classify(cmd: &str, reply: String) -> ChannelResult {
        if is_success_response(&reply) {
            Ok(())
        } else {
            tracing::warn!(cmd, reply = %reply, "relay command rejected");
            Err(DispenserError::CommandRejected(reply))
        }
    }

    /// Ready check, send, and on timeout one re-handshake plus one resend.
    fn execute(&mut self, cmd: &str, timeout: Duration, actuates: bool) -> ChannelResult {
        self.ensure_ready()?;
        match self.send_command(cmd, timeout) {
            Ok(reply) => return Self::classify(cmd, reply),
            Err(DispenserError::CommandTimeout) => {}
            Err(e) => return Err(e),
        }
        if !self.handshake() {
            tracing::error!(cmd, "relay unavailable after timeout");
            return Err(DispenserError::ChannelUnavailable);
        }
        if actuates && self.settings.stop_before_retry {
            match self.send_command("ST", self.settings.stop_timeout) {
                Ok(reply) if is_success_response(&reply) => {}
                _ => {
                    tracing::error!(cmd, "stop before resend failed; not resending");
                    return Err(DispenserError::ChannelUnavailable);
                }
            }
        }
        tracing::info!(cmd, attempt = 2, "resending after re-handshake");
        match self.send_command(cmd, timeout) {
            Ok(reply) => Self::classify(cmd, reply),
            Err(DispenserError::CommandTimeout) => Err(DispenserError::ChannelUnavailable),
            Err(e) => Err(e),
        }
    }

    fn dispense_timeout(&self) -> Duration {
        self.settings.response_timeout + self.settings.dispense_extra
    }

    pub fn set_angle(&mut self, channel: u8, angle: u16) -> ChannelResult {
        check_channel(channel)?;
        check_angle(angle)?;
        self.execute(
            &format!("SA{channel},{angle}"),
            self.settings.response_timeout,
            false,
        )
    }

    /// The controller owns the hold time, so `size` is only logged.
    pub fn dispense(&mut self, channel: u8, size: PillSize) -> ChannelResult {
        check_channel(channel)?;
        tracing::info!(channel, %size, "relaying dispense");
        self.execute(&format!("DP{channel}"), self.dispense_timeout(), true)
    }

    pub fn dispense_pair(&mut self, first: u8, second: u8, size: PillSize) -> ChannelResult {
        check_channel(first)?;
        check_channel(second)?;
        if first == second {
            return Err(DispenserError::InvalidParameter(format!(
                "pair dispense needs two outputs, got {first} twice"
            )));
        }
        tracing::info!(first, second, %size, "relaying pair dispense");
        self.execute(&format!("DP2{first},{second}"), self.dispense_timeout(), true)
    }

    pub fn self_test(&mut self, channel: u8) -> ChannelResult {
        check_channel(channel)?;
        self.execute(&format!("TS{channel}"), self.settings.self_test_timeout, false)
    }

    pub fn calibrate(&mut self, channel: u8) -> ChannelResult {
        check_channel(channel)?;
        self.execute(&format!("CA{channel}"), self.settings.calibrate_timeout, false)
    }

    pub fn reset_all(&mut self) -> ChannelResult {
        self.execute("RS", self.settings.reset_timeout, false)
    }

    pub fn stop_all(&mut self) -> ChannelResult {
        self.execute("ST", self.settings.stop_timeout, false)
    }

    /// Swing the release pair (outputs 5 and 6) open together.
    pub fn move_to_release(&mut self) -> ChannelResult {
        self.execute("RL", self.settings.move_timeout, false)
    }

    /// Return the release pair to home.
    pub fn move_to_home(&mut self) -> ChannelResult {
        self.execute("MH", self.settings.move_timeout, false)
    }

    /// Drain unsolicited lines and run the keep-alive ping when due.
    ///
    /// A heartbeat refreshes liveness on a ready channel. On a channel that
    /// is not ready it only triggers a handshake.
    pub fn maintain(&mut self) -> ChannelResult {
        let mut heartbeat = false;
        for _ in 0..MAX_DRAIN_LINES {
            match self.link.read_line(Duration::ZERO) {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line == HEARTBEAT {
                        heartbeat = true;
                        if self.ready {
                            self.last_ping = Some(self.clock.now());
                        }
                    } else if !line.is_empty() {
                        tracing::info!(message = %line, "relay async message");
                    }
                }
                Ok(None) => break,
                Err(e) => return Err(self.link_error(e.as_ref())),
            }
        }

        if heartbeat && !self.ready {
            tracing::info!("relay heartbeat while not ready; re-running handshake");
            self.handshake();
        }

        let interval = self.settings.keepalive_interval;
        if interval.is_zero() || !self.ready {
            return Ok(());
        }
        let now = self.clock.now();
        let due = self
            .last_ping
            .is_none_or(|t| now.saturating_duration_since(t) >= interval);
        if due && !self.ping() {
            tracing::warn!("relay keep-alive ping failed");
        }
        Ok(())
    }
}

impl<L: SerialLink, K: Clock> ActuationChannel for RelayChannel<L, K> {
    fn kind(&self) -> &'static str {
        "relay"
    }
    fn is_ready(&self) -> bool {
        self.ready
    }
    fn begin(&mut self) -> ChannelResult {
        if self.handshake() {
            Ok(())
        } else {
            Err(DispenserError::ChannelUnavailable)
        }
    }
    fn set_angle(&mut self, channel: u8, angle: u16) -> ChannelResult {
        RelayChannel::set_angle(self, channel, angle)
    }
    fn stop_all(&mut self) -> ChannelResult {
        RelayChannel::stop_all(self)
    }
    fn reset_all(&mut self) -> ChannelResult {
        RelayChannel::reset_all(self)
    }
    fn dispense(&mut self, channel: u8, size: PillSize) -> ChannelResult {
        RelayChannel::dispense(self, channel, size)
    }
    fn dispense_pair(&mut self, first: u8, second: u8, size: PillSize) -> ChannelResult {
        RelayChannel::dispense_pair(self, first, second, size)
    }
    fn self_test(&mut self, channel: u8) -> ChannelResult {
        RelayChannel::self_test(self, channel)
    }
    fn calibrate(&mut self, channel: u8) -> ChannelResult {
        RelayChannel::calibrate(self, channel)
    }
    fn recover(&mut self) -> ChannelResult {
        ActuationChannel::begin(self)
    }
    fn maintain(&mut self) -> ChannelResult {
        RelayChannel::maintain(self)
    }
}
