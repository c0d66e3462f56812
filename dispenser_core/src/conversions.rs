//! `From`/`TryFrom` implementations bridging `dispenser_config` types to
//! `dispenser_core` runtime types.

use std::time::Duration;

use crate::alarm::AlarmScheduler;
use crate::config::{
    ChannelMap, DispenserOutput, PillDurations, PwmSettings, RelaySettings, SchedulerSettings,
};
use crate::error::DispenserError;
use crate::schedule::NewSchedule;
use crate::types::PillSize;

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

// ── PwmSettings ──────────────────────────────────────────────────────────────

impl From<&dispenser_config::PwmCfg> for PwmSettings {
    fn from(c: &dispenser_config::PwmCfg) -> Self {
        Self {
            address: c.address,
            pwm_freq_hz: c.pwm_freq_hz,
            oscillator_hz: c.oscillator_hz,
            servo_min: c.servo_min,
            servo_max: c.servo_max,
            forward_duty: c.forward_duty,
            clock_hz: c.clock_hz,
            recovery_clock_hz: c.recovery_clock_hz,
            recovery_pause: ms(c.recovery_pause_ms),
            health_check_interval: ms(c.health_check_ms),
            auto_recover: c.auto_recover,
        }
    }
}

// ── RelaySettings ────────────────────────────────────────────────────────────

impl From<&dispenser_config::RelayCfg> for RelaySettings {
    /// Per-command timeouts for TS/CA/RS/ST/RL/MH are not configurable.
    fn from(c: &dispenser_config::RelayCfg) -> Self {
        Self {
            response_timeout: ms(c.response_timeout_ms),
            dispense_extra: ms(c.dispense_extra_ms),
            handshake_timeout: ms(c.handshake_timeout_ms),
            ping_timeout: ms(c.ping_timeout_ms),
            keepalive_interval: ms(c.keepalive_ms),
            stop_before_retry: c.stop_before_retry,
            ..Self::default()
        }
    }
}

// ── PillDurations ────────────────────────────────────────────────────────────

impl From<&dispenser_config::Durations> for PillDurations {
    fn from(c: &dispenser_config::Durations) -> Self {
        Self {
            small: ms(c.small_ms),
            medium: ms(c.medium_ms),
            large: ms(c.large_ms),
            custom: ms(c.custom_ms),
            settle: ms(c.settle_ms),
            pair_settle: ms(c.pair_settle_ms),
        }
    }
}

// ── SchedulerSettings ────────────────────────────────────────────────────────

impl From<&dispenser_config::SchedulerCfg> for SchedulerSettings {
    fn from(c: &dispenser_config::SchedulerCfg) -> Self {
        Self {
            reminder_offset_min: c.reminder_offset_min,
            catch_up_minutes: c.catch_up_minutes,
            max_schedules: c.max_schedules,
            alarm_capacity: AlarmScheduler::SLOTS_PER_SCHEDULE * c.max_schedules,
        }
    }
}

// ── ChannelMap ───────────────────────────────────────────────────────────────

impl TryFrom<&dispenser_config::Config> for ChannelMap {
    type Error = DispenserError;

    fn try_from(c: &dispenser_config::Config) -> Result<Self, Self::Error> {
        let mut map = ChannelMap::empty();
        for m in c.dispenser_map() {
            map.set(
                m.index,
                DispenserOutput {
                    channel: m.channel,
                    pair_channel: m.pair_channel,
                },
            )?;
        }
        Ok(map)
    }
}

// ── Schedules ────────────────────────────────────────────────────────────────

impl From<dispenser_config::SizeCfg> for PillSize {
    fn from(c: dispenser_config::SizeCfg) -> Self {
        match c {
            dispenser_config::SizeCfg::Small => PillSize::Small,
            dispenser_config::SizeCfg::Medium => PillSize::Medium,
            dispenser_config::SizeCfg::Large => PillSize::Large,
            dispenser_config::SizeCfg::Custom => PillSize::Custom,
        }
    }
}

impl TryFrom<&dispenser_config::ScheduleRow> for NewSchedule {
    type Error = DispenserError;

    fn try_from(r: &dispenser_config::ScheduleRow) -> Result<Self, Self::Error> {
        let mut new = NewSchedule::new(
            r.id.clone(),
            r.dispenser,
            r.hour,
            r.minute,
            r.medication.clone(),
            r.patient.clone(),
            r.size.into(),
        )
        .enabled(r.enabled);
        if let Some(days) = &r.weekdays {
            let mask: [bool; 7] = days.as_slice().try_into().map_err(|_| {
                DispenserError::InvalidParameter(format!(
                    "schedule '{}': weekdays must have 7 entries, got {}",
                    r.id,
                    days.len()
                ))
            })?;
            new = new.on_days(mask);
        }
        Ok(new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_maps_identity() {
        let cfg = dispenser_config::Config::default();
        let map = ChannelMap::try_from(&cfg).unwrap();
        assert_eq!(map, ChannelMap::default());
    }

    #[test]
    fn schedule_row_keeps_weekdays() {
        let row = dispenser_config::ScheduleRow {
            id: "s1".into(),
            dispenser: 2,
            hour: 9,
            minute: 0,
            medication: "M".into(),
            patient: "A".into(),
            size: dispenser_config::SizeCfg::Large,
            enabled: false,
            weekdays: Some(vec![true, false, false, false, false, false, false]),
        };
        let new = NewSchedule::try_from(&row).unwrap();
        assert_eq!(new.size, PillSize::Large);
        assert!(!new.enabled);
        assert_eq!(new.weekdays, [true, false, false, false, false, false, false]);
    }

    #[test]
    fn short_weekday_mask_is_rejected() {
        let row = dispenser_config::ScheduleRow {
            id: "s1".into(),
            dispenser: 0,
            hour: 8,
            minute: 0,
            medication: "M".into(),
            patient: "A".into(),
            size: dispenser_config::SizeCfg::Small,
            enabled: true,
            weekdays: Some(vec![true; 3]),
        };
        assert!(matches!(
            NewSchedule::try_from(&row),
            Err(DispenserError::InvalidParameter(_))
        ));
    }
}
