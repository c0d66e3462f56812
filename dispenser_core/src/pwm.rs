//! Direct PCA9685 actuation over I2C.
//!
//! Every register write is preceded by an address probe. A failed probe or
//! write bumps the NACK counter and fails immediately; nothing here retries
//! on its own. `recover_bus` is the only way back from a wedged bus and is
//! called explicitly (or from the health check in `maintain`).

use std::time::{Duration, Instant};

use dispenser_traits::{Clock, I2cBus};

use crate::channel::{ActuationChannel, ChannelResult};
use crate::config::{PillDurations, PwmSettings};
use crate::error::DispenserError;
use crate::types::{MAX_CHANNEL, PillSize, check_angle, check_channel};

pub const MODE1: u8 = 0x00;
pub const PRESCALE: u8 = 0xFE;
pub const LED0_ON_L: u8 = 0x06;
const MODE1_SLEEP: u8 = 0x10;
const MODE1_AI: u8 = 0x20;
const MODE1_RESTART: u8 = 0x80;
const OSC_WAKE: Duration = Duration::from_millis(5);

/// Highest raw duty count.
pub const MAX_DUTY: u16 = 4095;
/// Rest position used by `reset_all`.
pub const REST_ANGLE: u16 = 90;
/// Mechanical limit of the MG90S horns fitted to the dispensers.
pub const MG90S_MAX_ANGLE: u16 = 120;

const SELF_TEST_STEPS: [(u16, u64); 4] = [(0, 1_000), (90, 1_000), (180, 1_000), (90, 500)];
const CALIBRATE_STEPS: [(u16, u64); 3] = [
    (0, 1_000),
    (MG90S_MAX_ANGLE, 1_000),
    (MG90S_MAX_ANGLE / 2, 1_000),
];
const RESET_STEP_PAUSE: Duration = Duration::from_millis(50);

/// PRESCALE register value for `freq_hz`, rounded to nearest.
pub fn prescale_for(oscillator_hz: u32, freq_hz: u32) -> u8 {
    let div = 4096 * u64::from(freq_hz.max(1));
    let rounded = (u64::from(oscillator_hz) + div / 2) / div;
    rounded.saturating_sub(1).clamp(3, 255) as u8
}

/// Linear map of `angle` (0..=180) onto `min..=max` counts.
pub fn angle_to_counts(angle: u16, min: u16, max: u16) -> u16 {
    let span = u32::from(max.saturating_sub(min));
    min + (u32::from(angle.min(180)) * span / 180) as u16
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub ops_attempted: u64,
    pub nack_errors: u64,
    pub recoveries: u64,
}

pub struct DirectPwmChannel<B: I2cBus, K: Clock> {
    bus: B,
    clock: K,
    settings: PwmSettings,
    durations: PillDurations,
    stats: BusStats,
    ready: bool,
    last_health: Option<Instant>,
}

impl<B: I2cBus, K: Clock> DirectPwmChannel<B, K> {
    pub fn new(bus: B, clock: K, settings: PwmSettings, durations: PillDurations) -> Self {
        Self {
            bus,
            clock,
            settings,
            durations,
            stats: BusStats::default(),
            ready: false,
            last_health: None,
        }
    }

    pub fn stats(&self) -> BusStats {
        self.stats
    }

    pub fn settings(&self) -> &PwmSettings {
        &self.settings
    }

    fn bus_failure(&mut self, stage: &str, e: &(dyn std::error::Error + 'static)) -> DispenserError {
        self.stats.nack_errors += 1;
        tracing::warn!(
            addr = self.settings.address,
            stage,
            nack_errors = self.stats.nack_errors,
            error = %e,
            "i2c transaction failed"
        );
        DispenserError::BusError(format!("{stage}: {e}"))
    }

    /// Probe, then write `bytes` in one transaction. No retry.
    fn transact(&mut self, bytes: &[u8]) -> ChannelResult {
        self.stats.ops_attempted += 1;
        let addr = self.settings.address;
        if let Err(e) = self.bus.probe(addr) {
            return Err(self.bus_failure("probe", e.as_ref()));
        }
        if let Err(e) = self.bus.write(addr, bytes) {
            return Err(self.bus_failure("write", e.as_ref()));
        }
        tracing::trace!(addr, ?bytes, "pca9685 write");
        Ok(())
    }

    fn write_channel(&mut self, channel: u8, on: u16, off: u16) -> ChannelResult {
        let reg = LED0_ON_L + 4 * channel;
        let [on_l, on_h] = on.to_le_bytes();
        let [off_l, off_h] = off.to_le_bytes();
        self.transact(&[reg, on_l, on_h, off_l, off_h])
    }

    fn ensure_ready(&self) -> ChannelResult {
        if self.ready {
            Ok(())
        } else {
            Err(DispenserError::ChannelUnavailable)
        }
    }

    /// Program the prescaler and restart the oscillator with auto-increment.
    fn init_controller(&mut self) -> ChannelResult {
        let prescale = prescale_for(self.settings.oscillator_hz, self.settings.pwm_freq_hz);
        self.transact(&[MODE1, MODE1_SLEEP])?;
        self.transact(&[PRESCALE, prescale])?;
        self.transact(&[MODE1, MODE1_AI])?;
        self.clock.sleep(OSC_WAKE);
        self.transact(&[MODE1, MODE1_RESTART | MODE1_AI])?;
        tracing::debug!(prescale, freq_hz = self.settings.pwm_freq_hz, "pca9685 initialised");
        Ok(())
    }

    fn stop_outputs(&mut self) -> ChannelResult {
        let mut first_err = None;
        for ch in 0..=MAX_CHANNEL {
            if let Err(e) = self.write_channel(ch, 0, 0) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn begin(&mut self) -> ChannelResult {
        self.ready = false;
        if let Err(e) = self.bus.set_clock_hz(self.settings.clock_hz) {
            return Err(self.bus_failure("set clock", e.as_ref()));
        }
        self.init_controller()?;
        self.stop_outputs()?;
        self.ready = true;
        tracing::info!(
            addr = self.settings.address,
            freq_hz = self.settings.pwm_freq_hz,
            "pwm controller ready"
        );
        Ok(())
    }

    /// Responding 7-bit addresses. Diagnostic; does not touch the counters.
    pub fn scan_bus(&mut self) -> Vec<u8> {
        let found: Vec<u8> = (1u8..127).filter(|&a| self.bus.probe(a).is_ok()).collect();
        tracing::info!(devices = ?found, "i2c scan complete");
        found
    }

    /// Single probe of the controller address.
    pub fn is_connected(&mut self) -> bool {
        self.bus.probe(self.settings.address).is_ok()
    }

    pub fn set_angle(&mut self, channel: u8, angle: u16) -> ChannelResult {
        check_channel(channel)?;
        check_angle(angle)?;
        self.ensure_ready()?;
        let counts = angle_to_counts(angle, self.settings.servo_min, self.settings.servo_max);
        self.write_channel(channel, 0, counts)
    }

    /// Raw OFF count; drives a continuous-rotation servo at that speed.
    pub fn set_speed(&mut self, channel: u8, duty: u16) -> ChannelResult {
        check_channel(channel)?;
        if duty > MAX_DUTY {
            return Err(DispenserError::InvalidParameter(format!(
                "duty {duty} exceeds {MAX_DUTY}"
            )));
        }
        self.ensure_ready()?;
        self.write_channel(channel, 0, duty)
    }

    /// Fully deactivate one output.
    pub fn stop(&mut self, channel: u8) -> ChannelResult {
        check_channel(channel)?;
        self.ensure_ready()?;
        self.write_channel(channel, 0, 0)
    }

    pub fn stop_all(&mut self) -> ChannelResult {
        self.ensure_ready()?;
        self.stop_outputs()
    }

    pub fn dispense(&mut self, channel: u8, size: PillSize) -> ChannelResult {
        check_channel(channel)?;
        self.ensure_ready()?;
        let hold = self.durations.for_size(size);
        tracing::info!(channel, %size, hold_ms = hold.as_millis() as u64, "dispensing");
        self.write_channel(channel, 0, self.settings.forward_duty)?;
        self.clock.sleep(hold);
        if let Err(e) = self.write_channel(channel, 0, 0) {
            tracing::error!(channel, error = %e, "stop after dispense failed; output may still run");
            return Err(e);
        }
        self.clock.sleep(self.durations.settle);
        Ok(())
    }

    pub fn dispense_pair(&mut self, first: u8, second: u8, size: PillSize) -> ChannelResult {
        check_channel(first)?;
        check_channel(second)?;
        if first == second {
            return Err(DispenserError::InvalidParameter(format!(
                "pair dispense needs two outputs, got {first} twice"
            )));
        }
        self.ensure_ready()?;
        let hold = self.durations.for_size(size);
        let forward = self.settings.forward_duty;
        tracing::info!(first, second, %size, hold_ms = hold.as_millis() as u64, "dispensing pair");
        self.write_channel(first, 0, forward)?;
        if let Err(e) = self.write_channel(second, 0, forward) {
            if let Err(stop) = self.write_channel(first, 0, 0) {
                tracing::error!(
                    channel = first,
                    error = %stop,
                    "emergency stop after failed pair start failed; output may still run"
                );
            }
            return Err(e);
        }
        self.clock.sleep(hold);
        let stop_first = self.write_channel(first, 0, 0);
        let stop_second = self.write_channel(second, 0, 0);
        if let Err(e) = stop_first.and(stop_second) {
            tracing::error!(first, second, error = %e, "stop after pair dispense failed");
            return Err(e);
        }
        self.clock.sleep(self.durations.pair_settle);
        Ok(())
    }

    /// Step from `start` to `stop` one degree at a time, clamped to the MG90S range.
    pub fn sweep(&mut self, channel: u8, start: u16, stop: u16, step: Duration) -> ChannelResult {
        let start = start.min(MG90S_MAX_ANGLE);
        let stop = stop.min(MG90S_MAX_ANGLE);
        let angles: Box<dyn Iterator<Item = u16>> = if start <= stop {
            Box::new(start..=stop)
        } else {
            Box::new((stop..=start).rev())
        };
        for angle in angles {
            self.set_angle(channel, angle)?;
            self.clock.sleep(step);
        }
        Ok(())
    }

    fn run_steps(&mut self, channel: u8, steps: &[(u16, u64)]) -> ChannelResult {
        check_channel(channel)?;
        for &(angle, pause_ms) in steps {
            self.set_angle(channel, angle)?;
            self.clock.sleep(Duration::from_millis(pause_ms));
        }
        Ok(())
    }

    /// Sweep 0, 90, 180, 90.
    pub fn self_test(&mut self, channel: u8) -> ChannelResult {
        tracing::info!(channel, "servo self-test");
        self.run_steps(channel, &SELF_TEST_STEPS)
    }

    /// Sweep 0, 120, 60 to check the horn's mechanical range.
    pub fn calibrate(&mut self, channel: u8) -> ChannelResult {
        tracing::info!(channel, "servo calibration sweep");
        self.run_steps(channel, &CALIBRATE_STEPS)
    }

    pub fn reset_all(&mut self) -> ChannelResult {
        for ch in 0..=MAX_CHANNEL {
            self.set_angle(ch, REST_ANGLE)?;
            self.clock.sleep(RESET_STEP_PAUSE);
        }
        Ok(())
    }

    /// Release, pause, reacquire at the reduced clock, re-probe and
    /// reprogram the controller. Counts every attempt.
    pub fn recover_bus(&mut self) -> ChannelResult {
        self.stats.recoveries += 1;
        let attempt = self.stats.recoveries;
        tracing::warn!(attempt, "recovering i2c bus");
        self.bus.release();
        self.clock.sleep(self.settings.recovery_pause);

        let restored = self
            .bus
            .reacquire()
            .and_then(|()| self.bus.set_clock_hz(self.settings.recovery_clock_hz))
            .and_then(|()| self.bus.probe(self.settings.address));
        if let Err(e) = restored {
            self.ready = false;
            tracing::error!(attempt, error = %e, "i2c bus recovery failed");
            return Err(DispenserError::BusRecoveryFailed);
        }
        if let Err(e) = self.init_controller() {
            self.ready = false;
            tracing::error!(attempt, error = %e, "controller re-init after recovery failed");
            return Err(DispenserError::BusRecoveryFailed);
        }
        self.ready = true;
        tracing::info!(
            attempt,
            clock_hz = self.settings.recovery_clock_hz,
            "i2c bus recovered"
        );
        Ok(())
    }

    /// Periodic probe; auto-recovers when enabled.
    pub fn maintain(&mut self) -> ChannelResult {
        let interval = self.settings.health_check_interval;
        if interval.is_zero() {
            return Ok(());
        }
        let now = self.clock.now();
        if let Some(last) = self.last_health
            && now.saturating_duration_since(last) < interval
        {
            return Ok(());
        }
        self.last_health = Some(now);
        if self.ready && self.is_connected() {
            return Ok(());
        }
        tracing::warn!(ready = self.ready, "pwm health check failed");
        if self.settings.auto_recover {
            self.recover_bus()
        } else {
            Err(DispenserError::BusError("health probe failed".into()))
        }
    }
}

impl<B: I2cBus, K: Clock> ActuationChannel for DirectPwmChannel<B, K> {
    fn kind(&self) -> &'static str {
        "pwm"
    }
    fn is_ready(&self) -> bool {
        self.ready
    }
    fn begin(&mut self) -> ChannelResult {
        DirectPwmChannel::begin(self)
    }
    fn set_angle(&mut self, channel: u8, angle: u16) -> ChannelResult {
        DirectPwmChannel::set_angle(self, channel, angle)
    }
    fn stop_all(&mut self) -> ChannelResult {
        DirectPwmChannel::stop_all(self)
    }
    fn reset_all(&mut self) -> ChannelResult {
        DirectPwmChannel::reset_all(self)
    }
    fn dispense(&mut self, channel: u8, size: PillSize) -> ChannelResult {
        DirectPwmChannel::dispense(self, channel, size)
    }
    fn dispense_pair(&mut self, first: u8, second: u8, size: PillSize) -> ChannelResult {
        DirectPwmChannel::dispense_pair(self, first, second, size)
    }
    fn self_test(&mut self, channel: u8) -> ChannelResult {
        DirectPwmChannel::self_test(self, channel)
    }
    fn calibrate(&mut self, channel: u8) -> ChannelResult {
        DirectPwmChannel::calibrate(self, channel)
    }
    fn recover(&mut self) -> ChannelResult {
        self.recover_bus()
    }
    fn maintain(&mut self) -> ChannelResult {
        DirectPwmChannel::maintain(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prescale_matches_datasheet_example() {
        // 25 MHz / (4096 * 50 Hz) = 122.07 -> 122 - 1
        assert_eq!(prescale_for(25_000_000, 50), 121);
        // 200 Hz from the datasheet: 30
        assert_eq!(prescale_for(25_000_000, 200), 30);
    }

    #[test]
    fn angle_mapping_hits_endpoints() {
        assert_eq!(angle_to_counts(0, 102, 512), 102);
        assert_eq!(angle_to_counts(180, 102, 512), 512);
        assert_eq!(angle_to_counts(90, 102, 512), 307);
    }
}
