//! Runtime settings for the scheduler and the actuation channels.
//!
//! These are separate from the TOML-deserialized config in `dispenser_config`;
//! `conversions` bridges the two.

use std::time::Duration;

use crate::error::DispenserError;
use crate::types::{DISPENSER_COUNT, PillSize, check_channel, check_dispenser};

/// Actuation hold per pill size plus the settle pauses that follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PillDurations {
    pub small: Duration,
    pub medium: Duration,
    pub large: Duration,
    pub custom: Duration,
    /// Pause after a single dispense.
    pub settle: Duration,
    /// Pause after a pair dispense.
    pub pair_settle: Duration,
}

impl Default for PillDurations {
    fn default() -> Self {
        Self {
            small: Duration::from_millis(800),
            medium: Duration::from_millis(1_000),
            large: Duration::from_millis(1_200),
            custom: Duration::from_millis(1_050),
            settle: Duration::from_millis(100),
            pair_settle: Duration::from_millis(150),
        }
    }
}

impl PillDurations {
    pub fn for_size(&self, size: PillSize) -> Duration {
        match size {
            PillSize::Small => self.small,
            PillSize::Medium => self.medium,
            PillSize::Large => self.large,
            PillSize::Custom => self.custom,
        }
    }
}

/// PCA9685 wiring and timing.
#[derive(Debug, Clone)]
pub struct PwmSettings {
    pub address: u8,
    pub pwm_freq_hz: u32,
    pub oscillator_hz: u32,
    /// OFF count at 0 degrees.
    pub servo_min: u16,
    /// OFF count at 180 degrees.
    pub servo_max: u16,
    /// OFF count while a dispenser rotates forward.
    pub forward_duty: u16,
    pub clock_hz: u32,
    pub recovery_clock_hz: u32,
    pub recovery_pause: Duration,
    /// Zero disables the periodic probe in `maintain`.
    pub health_check_interval: Duration,
    pub auto_recover: bool,
}

impl Default for PwmSettings {
    fn default() -> Self {
        Self {
            address: 0x40,
            pwm_freq_hz: 50,
            oscillator_hz: 25_000_000,
            servo_min: 102,
            servo_max: 512,
            forward_duty: 400,
            clock_hz: 100_000,
            recovery_clock_hz: 50_000,
            recovery_pause: Duration::from_millis(10),
            health_check_interval: Duration::from_secs(30),
            auto_recover: true,
        }
    }
}

/// Relay protocol timing.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub response_timeout: Duration,
    pub dispense_extra: Duration,
    pub handshake_timeout: Duration,
    pub ping_timeout: Duration,
    /// Zero disables the keep-alive ping.
    pub keepalive_interval: Duration,
    pub self_test_timeout: Duration,
    pub calibrate_timeout: Duration,
    pub reset_timeout: Duration,
    pub stop_timeout: Duration,
    /// `RL` and `MH`, which move the release pair together.
    pub move_timeout: Duration,
    pub stop_before_retry: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_millis(2_000),
            dispense_extra: Duration::from_millis(3_000),
            handshake_timeout: Duration::from_millis(5_000),
            ping_timeout: Duration::from_millis(1_000),
            keepalive_interval: Duration::from_secs(30),
            self_test_timeout: Duration::from_millis(5_000),
            calibrate_timeout: Duration::from_millis(8_000),
            reset_timeout: Duration::from_millis(5_000),
            stop_timeout: Duration::from_millis(2_000),
            move_timeout: Duration::from_millis(3_000),
            stop_before_retry: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Minutes between a reminder and its dose.
    pub reminder_offset_min: u16,
    /// Skipped minutes replayed by one due-check.
    pub catch_up_minutes: u16,
    pub max_schedules: usize,
    /// Alarm pool size; two slots per schedule by default.
    pub alarm_capacity: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            reminder_offset_min: 15,
            catch_up_minutes: 5,
            max_schedules: dispenser_config::MAX_SCHEDULES,
            alarm_capacity: 2 * dispenser_config::MAX_SCHEDULES,
        }
    }
}

/// Output(s) driven for one dispenser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispenserOutput {
    pub channel: u8,
    /// Second output released together with `channel`.
    pub pair_channel: Option<u8>,
}

/// Dispenser index to output mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMap {
    outputs: [Option<DispenserOutput>; DISPENSER_COUNT as usize],
}

impl Default for ChannelMap {
    /// Dispenser `i` drives channel `i`.
    fn default() -> Self {
        let mut outputs = [None; DISPENSER_COUNT as usize];
        for (i, slot) in outputs.iter_mut().enumerate() {
            *slot = Some(DispenserOutput {
                channel: i as u8,
                pair_channel: None,
            });
        }
        Self { outputs }
    }
}

impl ChannelMap {
    /// A map with no dispenser wired.
    pub fn empty() -> Self {
        Self {
            outputs: [None; DISPENSER_COUNT as usize],
        }
    }

    pub fn set(&mut self, dispenser: u8, output: DispenserOutput) -> Result<(), DispenserError> {
        check_dispenser(dispenser)?;
        check_channel(output.channel)?;
        if let Some(pair) = output.pair_channel {
            check_channel(pair)?;
            if pair == output.channel {
                return Err(DispenserError::InvalidParameter(format!(
                    "pair channel {pair} duplicates channel for dispenser {dispenser}"
                )));
            }
        }
        self.outputs[dispenser as usize] = Some(output);
        Ok(())
    }

    pub fn get(&self, dispenser: u8) -> Option<DispenserOutput> {
        self.outputs.get(dispenser as usize).copied().flatten()
    }
}
