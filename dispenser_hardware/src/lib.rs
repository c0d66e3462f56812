//! Hardware adapters for the dispenser: simulated PCA9685 bus and relay
//! controller for tests and dry runs, real `rppal` adapters behind the
//! `hardware` feature.

pub mod error;
#[cfg(feature = "hardware")]
pub mod hardware;
pub mod util;

use dispenser_traits::{HwResult, I2cBus, SerialLink};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use crate::error::HwError;

/// PCA9685 register offsets the simulation decodes.
pub mod pca9685 {
    pub const MODE1: u8 = 0x00;
    pub const PRESCALE: u8 = 0xFE;
    pub const LED0_ON_L: u8 = 0x06;
    pub const DEFAULT_ADDRESS: u8 = 0x40;
}

#[derive(Debug)]
struct BusState {
    devices: Vec<u8>,
    released: bool,
    stuck: bool,
    recoverable: bool,
    fail_next: u32,
    pass_before_fail: u32,
    clock_hz: u32,
    probes: u32,
    reacquires: u32,
    writes: Vec<(u8, Vec<u8>)>,
    registers: HashMap<(u8, u8), u8>,
}

/// Simulated I2C bus with a PCA9685 at 0x40.
///
/// Clones share state, so a test keeps one clone as an inspection handle
/// while the channel owns the other.
#[derive(Debug, Clone)]
pub struct SimulatedPwmBus {
    state: Rc<RefCell<BusState>>,
}

impl Default for SimulatedPwmBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPwmBus {
    pub fn new() -> Self {
        Self::with_devices(&[pca9685::DEFAULT_ADDRESS])
    }

    pub fn with_devices(devices: &[u8]) -> Self {
        SimulatedPwmBus {
            state: Rc::new(RefCell::new(BusState {
                devices: devices.to_vec(),
                released: false,
                stuck: false,
                recoverable: true,
                fail_next: 0,
                pass_before_fail: 0,
                clock_hz: 100_000,
                probes: 0,
                reacquires: 0,
                writes: Vec::new(),
                registers: HashMap::new(),
            })),
        }
    }

    /// NACK the next `n` transactions, then behave normally.
    pub fn fail_next(&self, n: u32) {
        self.state.borrow_mut().fail_next = n;
    }

    /// Let `ok` bus operations through, then NACK the following `n`.
    pub fn fail_after(&self, ok: u32, n: u32) {
        let mut s = self.state.borrow_mut();
        s.pass_before_fail = ok;
        s.fail_next = n;
    }

    /// NACK every transaction until a release/reacquire cycle clears it
    /// (only if `set_recoverable(true)`, the default).
    pub fn set_stuck(&self, stuck: bool) {
        self.state.borrow_mut().stuck = stuck;
    }

    pub fn set_recoverable(&self, recoverable: bool) {
        self.state.borrow_mut().recoverable = recoverable;
    }

    pub fn set_device_present(&self, addr: u8, present: bool) {
        let mut s = self.state.borrow_mut();
        s.devices.retain(|&a| a != addr);
        if present {
            s.devices.push(addr);
        }
    }

    pub fn clock_hz(&self) -> u32 {
        self.state.borrow().clock_hz
    }

    pub fn probe_count(&self) -> u32 {
        self.state.borrow().probes
    }

    pub fn reacquire_count(&self) -> u32 {
        self.state.borrow().reacquires
    }

    pub fn writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.state.borrow().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.borrow_mut().writes.clear();
    }

    pub fn register(&self, addr: u8, reg: u8) -> Option<u8> {
        self.state.borrow().registers.get(&(addr, reg)).copied()
    }

    /// Current OFF count for `channel` of the PCA9685 at `addr`, or 0 when the
    /// full-off bit is set. `None` until the channel was written.
    pub fn channel_off(&self, addr: u8, channel: u8) -> Option<u16> {
        let base = pca9685::LED0_ON_L + 4 * channel;
        let lo = self.register(addr, base + 2)?;
        let hi = self.register(addr, base + 3)?;
        if hi & 0x10 != 0 {
            return Some(0);
        }
        Some(u16::from(lo) | (u16::from(hi & 0x0F) << 8))
    }

    fn check(&self, addr: u8) -> Result<(), HwError> {
        let mut s = self.state.borrow_mut();
        if s.released {
            return Err(HwError::BusReleased);
        }
        if s.fail_next > 0 {
            if s.pass_before_fail > 0 {
                s.pass_before_fail -= 1;
            } else {
                s.fail_next -= 1;
                return Err(HwError::Nack { addr });
            }
        }
        if s.stuck || !s.devices.contains(&addr) {
            return Err(HwError::Nack { addr });
        }
        Ok(())
    }
}

impl I2cBus for SimulatedPwmBus {
    fn probe(&mut self, addr: u8) -> HwResult<()> {
        self.state.borrow_mut().probes += 1;
        self.check(addr)?;
        Ok(())
    }

    fn write(&mut self, addr: u8, bytes: &[u8]) -> HwResult<()> {
        self.check(addr)?;
        let mut s = self.state.borrow_mut();
        s.writes.push((addr, bytes.to_vec()));
        if let Some((&reg, data)) = bytes.split_first() {
            // Register auto-increment, as the PCA9685 does with AI set.
            for (i, &b) in data.iter().enumerate() {
                s.registers.insert((addr, reg.wrapping_add(i as u8)), b);
            }
        }
        tracing::trace!(addr, ?bytes, "sim i2c write");
        Ok(())
    }

    fn release(&mut self) {
        self.state.borrow_mut().released = true;
    }

    fn reacquire(&mut self) -> HwResult<()> {
        let mut s = self.state.borrow_mut();
        s.released = false;
        s.reacquires += 1;
        if s.recoverable {
            s.stuck = false;
        }
        Ok(())
    }

    fn set_clock_hz(&mut self, hz: u32) -> HwResult<()> {
        self.state.borrow_mut().clock_hz = hz;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RelayState {
    inbox: VecDeque<String>,
    sent: Vec<String>,
    silent: bool,
    drop_next: u32,
    drop_named: HashMap<String, u32>,
    heartbeat_before_reply: bool,
    ready_on_clear: bool,
    closed: bool,
    angles: HashMap<u8, u16>,
    dispensed: Vec<Vec<u8>>,
    stops: u32,
}

/// Simulated secondary controller on the far end of the relay link.
///
/// Answers the line protocol the way the controller firmware does; faults
/// (silence, dropped replies, heartbeat noise, boot banners) are injected
/// through the shared handle.
#[derive(Debug, Clone, Default)]
pub struct SimulatedRelay {
    state: Rc<RefCell<RelayState>>,
}

impl SimulatedRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop answering entirely.
    pub fn set_silent(&self, silent: bool) {
        self.state.borrow_mut().silent = silent;
    }

    /// Swallow the next `n` commands without replying.
    pub fn drop_next(&self, n: u32) {
        self.state.borrow_mut().drop_next = n;
    }

    /// Swallow the next `n` commands named `name` (e.g. `"DP"`); others
    /// are answered normally.
    pub fn drop_named(&self, name: &str, n: u32) {
        self.state.borrow_mut().drop_named.insert(name.to_string(), n);
    }

    /// Emit a `HEARTBEAT` line ahead of every reply.
    pub fn set_heartbeat_before_reply(&self, on: bool) {
        self.state.borrow_mut().heartbeat_before_reply = on;
    }

    /// Announce `READY` right after the host clears its input, as a freshly
    /// reset controller does.
    pub fn set_ready_on_clear(&self, on: bool) {
        self.state.borrow_mut().ready_on_clear = on;
    }

    /// Queue an unsolicited line.
    pub fn push_line(&self, line: &str) {
        self.state.borrow_mut().inbox.push_back(line.to_string());
    }

    pub fn close(&self) {
        self.state.borrow_mut().closed = true;
    }

    /// Every command line the host wrote, in order.
    pub fn sent(&self) -> Vec<String> {
        self.state.borrow().sent.clone()
    }

    pub fn sent_count(&self, prefix: &str) -> usize {
        self.state
            .borrow()
            .sent
            .iter()
            .filter(|c| command_name(c) == prefix)
            .count()
    }

    /// Channels actuated by each accepted `DP`/`DP2`.
    pub fn dispensed(&self) -> Vec<Vec<u8>> {
        self.state.borrow().dispensed.clone()
    }

    pub fn angle(&self, channel: u8) -> Option<u16> {
        self.state.borrow().angles.get(&channel).copied()
    }

    pub fn stop_count(&self) -> u32 {
        self.state.borrow().stops
    }
}

/// Leading alphabetic part of a command line. `DP2<a>,<b>` is the pair
/// command; `DP2` without a comma dispenses channel 2.
fn command_name(cmd: &str) -> &str {
    if cmd.starts_with("DP2") && cmd.contains(',') {
        return "DP2";
    }
    let end = cmd
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(cmd.len());
    &cmd[..end]
}

fn parse_channels(args: &str) -> Option<Vec<u8>> {
    args.split(',')
        .map(|a| a.trim().parse::<u8>().ok().filter(|&c| c <= 15))
        .collect()
}

impl RelayState {
    fn respond(&mut self, cmd: &str) -> String {
        let name = command_name(cmd);
        let args = &cmd[name.len()..];
        match name {
            "PING" => "PONG".to_string(),
            "STATUS" => "OK:READY".to_string(),
            "SA" => {
                let mut parts = args.split(',');
                let ch = parts.next().and_then(|c| c.parse::<u8>().ok());
                let angle = parts.next().and_then(|a| a.parse::<u16>().ok());
                match (ch, angle) {
                    (Some(ch), Some(angle)) if ch <= 15 && angle <= 180 => {
                        self.angles.insert(ch, angle);
                        format!("OK:SA{ch},{angle}")
                    }
                    _ => "ERROR:INVALID_PARAMS".to_string(),
                }
            }
            "DP" | "DP2" => match parse_channels(args) {
                Some(chs) if chs.len() == if name == "DP" { 1 } else { 2 } => {
                    self.dispensed.push(chs);
                    format!("OK:{cmd}")
                }
                _ => "ERROR:INVALID_CHANNEL".to_string(),
            },
            "TS" | "CA" => match parse_channels(args) {
                Some(chs) if chs.len() == 1 => format!("OK:{cmd}"),
                _ => "ERROR:INVALID_CHANNEL".to_string(),
            },
            "RS" => {
                for ch in 0..16 {
                    self.angles.insert(ch, 90);
                }
                "OK:RS".to_string()
            }
            "RL" => {
                self.angles.insert(5, 0);
                self.angles.insert(6, 90);
                "OK:RL".to_string()
            }
            "MH" => {
                self.angles.insert(5, 90);
                self.angles.insert(6, 0);
                "OK:MH".to_string()
            }
            "ST" => {
                self.stops += 1;
                "OK:ST".to_string()
            }
            _ => "ERROR:UNKNOWN_COMMAND".to_string(),
        }
    }
}

impl SerialLink for SimulatedRelay {
    fn clear_input(&mut self) -> HwResult<()> {
        let mut s = self.state.borrow_mut();
        if s.closed {
            return Err(HwError::Closed.into());
        }
        s.inbox.clear();
        if s.ready_on_clear {
            s.inbox.push_back("READY".to_string());
        }
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> HwResult<()> {
        let mut s = self.state.borrow_mut();
        if s.closed {
            return Err(HwError::Closed.into());
        }
        s.sent.push(line.to_string());
        if s.silent {
            return Ok(());
        }
        if s.drop_next > 0 {
            s.drop_next -= 1;
            return Ok(());
        }
        if let Some(left) = s.drop_named.get_mut(command_name(line.trim()))
            && *left > 0
        {
            *left -= 1;
            return Ok(());
        }
        if s.heartbeat_before_reply {
            s.inbox.push_back("HEARTBEAT".to_string());
        }
        let reply = s.respond(line.trim());
        s.inbox.push_back(reply);
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> HwResult<Option<String>> {
        let mut s = self.state.borrow_mut();
        if s.closed {
            return Err(HwError::Closed.into());
        }
        Ok(s.inbox.pop_front())
    }
}
