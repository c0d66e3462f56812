#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and schedule loading for the dispenser.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//! - The schedule CSV loader enforces an exact header and names the
//!   offending row on any parse error.
use serde::Deserialize;

/// Number of physical containers.
pub const DISPENSER_COUNT: u8 = 5;
/// Hard ceiling on the schedule table (3 per dispenser).
pub const MAX_SCHEDULES: usize = 15;
/// Longest stall the due-check replays minute by minute.
pub const MAX_CATCH_UP_MINUTES: u16 = 60;
/// Highest PCA9685 output channel.
pub const MAX_CHANNEL: u8 = 15;

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// PCA9685 driven directly over I2C.
    #[default]
    Pwm,
    /// Secondary controller over a serial line.
    Relay,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ChannelCfg {
    pub kind: ChannelKind,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PwmCfg {
    pub i2c_bus: u8,
    pub address: u8,
    pub pwm_freq_hz: u32,
    pub oscillator_hz: u32,
    /// OFF count at 0 degrees.
    pub servo_min: u16,
    /// OFF count at 180 degrees.
    pub servo_max: u16,
    /// Raw OFF count used while a dispenser rotates.
    pub forward_duty: u16,
    pub clock_hz: u32,
    /// Reduced SCL rate applied during bus recovery.
    pub recovery_clock_hz: u32,
    pub recovery_pause_ms: u64,
    /// Interval between health probes in the control loop (0 disables).
    pub health_check_ms: u64,
    pub auto_recover: bool,
}

impl Default for PwmCfg {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            address: 0x40,
            pwm_freq_hz: 50,
            oscillator_hz: 25_000_000,
            servo_min: 102,
            servo_max: 512,
            forward_duty: 400,
            clock_hz: 100_000,
            recovery_clock_hz: 50_000,
            recovery_pause_ms: 10,
            health_check_ms: 30_000,
            auto_recover: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RelayCfg {
    pub port: String,
    pub baud: u32,
    /// Default wait for a reply line.
    pub response_timeout_ms: u64,
    /// Added to the response timeout for `DP`/`DP2`, which reply after actuating.
    pub dispense_extra_ms: u64,
    /// How long to wait for an unsolicited `READY` before falling back to `PING`.
    pub handshake_timeout_ms: u64,
    pub ping_timeout_ms: u64,
    /// Keep-alive ping interval (0 disables).
    pub keepalive_ms: u64,
    /// Send `ST` before resending a dispense that timed out.
    pub stop_before_retry: bool,
}

impl Default for RelayCfg {
    fn default() -> Self {
        Self {
            port: "/dev/serial0".to_string(),
            baud: 115_200,
            response_timeout_ms: 2_000,
            dispense_extra_ms: 3_000,
            handshake_timeout_ms: 5_000,
            ping_timeout_ms: 1_000,
            keepalive_ms: 30_000,
            stop_before_retry: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Durations {
    pub small_ms: u64,
    pub medium_ms: u64,
    pub large_ms: u64,
    pub custom_ms: u64,
    /// Pause after a single dispense so the mechanism stops moving.
    pub settle_ms: u64,
    pub pair_settle_ms: u64,
}

impl Default for Durations {
    fn default() -> Self {
        Self {
            small_ms: 800,
            medium_ms: 1_000,
            large_ms: 1_200,
            custom_ms: 1_050,
            settle_ms: 100,
            pair_settle_ms: 150,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerCfg {
    pub reminder_offset_min: u16,
    pub tick_ms: u64,
    pub catch_up_minutes: u16,
    pub max_schedules: usize,
}

impl Default for SchedulerCfg {
    fn default() -> Self {
        Self {
            reminder_offset_min: 15,
            tick_ms: 250,
            catch_up_minutes: 5,
            max_schedules: MAX_SCHEDULES,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct DispenserMap {
    pub index: u8,
    pub channel: u8,
    #[serde(default)]
    pub pair_channel: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct TimeCfg {
    /// Local time offset from UTC in seconds.
    pub utc_offset_s: i64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SizeCfg {
    Small,
    Medium,
    Large,
    Custom,
}

/// One schedule record, shared by `[[schedules]]` and the CSV loader.
///
/// CSV headers:
/// id,dispenser,hour,minute,medication,patient,size,enabled
///
/// Example:
/// id,dispenser,hour,minute,medication,patient,size,enabled
/// s1,0,8,0,Aspirin,Alice,medium,true
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ScheduleRow {
    pub id: String,
    pub dispenser: u8,
    pub hour: u8,
    pub minute: u8,
    pub medication: String,
    pub patient: String,
    pub size: SizeCfg,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Monday-first; absent means every day.
    #[serde(default)]
    pub weekdays: Option<Vec<bool>>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub channel: ChannelCfg,
    pub pwm: PwmCfg,
    pub relay: RelayCfg,
    pub durations: Durations,
    pub scheduler: SchedulerCfg,
    /// Dispenser to output mapping; empty means dispenser `i` drives channel `i`.
    pub dispensers: Vec<DispenserMap>,
    pub time: TimeCfg,
    pub logging: Logging,
    pub schedules: Vec<ScheduleRow>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    /// Effective mapping: the configured table, or the identity mapping.
    pub fn dispenser_map(&self) -> Vec<DispenserMap> {
        if self.dispensers.is_empty() {
            (0..DISPENSER_COUNT)
                .map(|i| DispenserMap {
                    index: i,
                    channel: i,
                    pair_channel: None,
                })
                .collect()
        } else {
            self.dispensers.clone()
        }
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // PWM
        let pwm = &self.pwm;
        if pwm.address > 0x7F {
            eyre::bail!("pwm.address must be a 7-bit address (<= 0x7f)");
        }
        if !(24..=1526).contains(&pwm.pwm_freq_hz) {
            eyre::bail!("pwm.pwm_freq_hz must be in 24..=1526");
        }
        if pwm.oscillator_hz == 0 {
            eyre::bail!("pwm.oscillator_hz must be > 0");
        }
        if pwm.servo_min >= pwm.servo_max {
            eyre::bail!("pwm.servo_min must be < pwm.servo_max");
        }
        if pwm.servo_max > 4095 || pwm.forward_duty > 4095 {
            eyre::bail!("pwm duty values must be <= 4095");
        }
        if pwm.clock_hz == 0 || pwm.recovery_clock_hz == 0 {
            eyre::bail!("pwm.clock_hz and pwm.recovery_clock_hz must be > 0");
        }

        // Relay
        let relay = &self.relay;
        if relay.baud == 0 {
            eyre::bail!("relay.baud must be > 0");
        }
        if relay.port.trim().is_empty() {
            eyre::bail!("relay.port must not be empty");
        }
        if relay.response_timeout_ms == 0
            || relay.handshake_timeout_ms == 0
            || relay.ping_timeout_ms == 0
        {
            eyre::bail!("relay timeouts must be >= 1 ms");
        }

        // Durations
        let d = &self.durations;
        if d.small_ms == 0 || d.medium_ms == 0 || d.large_ms == 0 || d.custom_ms == 0 {
            eyre::bail!("durations must be >= 1 ms");
        }
        if !(d.small_ms <= d.medium_ms && d.medium_ms <= d.large_ms) {
            eyre::bail!("durations must satisfy small_ms <= medium_ms <= large_ms");
        }
        if d.large_ms > 60_000 || d.custom_ms > 60_000 {
            eyre::bail!("durations are unreasonably large (>60s)");
        }

        // Scheduler
        let s = &self.scheduler;
        if !(1..=720).contains(&s.reminder_offset_min) {
            eyre::bail!("scheduler.reminder_offset_min must be in 1..=720");
        }
        if s.tick_ms == 0 {
            eyre::bail!("scheduler.tick_ms must be >= 1");
        }
        if s.tick_ms >= 60_000 {
            eyre::bail!("scheduler.tick_ms must be < 60000 so no minute is skipped");
        }
        if !(1..=MAX_CATCH_UP_MINUTES).contains(&s.catch_up_minutes) {
            eyre::bail!("scheduler.catch_up_minutes must be in 1..={MAX_CATCH_UP_MINUTES}");
        }
        if !(1..=MAX_SCHEDULES).contains(&s.max_schedules) {
            eyre::bail!("scheduler.max_schedules must be in 1..={MAX_SCHEDULES}");
        }

        // Dispenser mapping
        let mut seen = [false; DISPENSER_COUNT as usize];
        for m in &self.dispensers {
            if m.index >= DISPENSER_COUNT {
                eyre::bail!(
                    "dispensers: index {} out of range 0..={}",
                    m.index,
                    DISPENSER_COUNT - 1
                );
            }
            if m.channel > MAX_CHANNEL || m.pair_channel.is_some_and(|c| c > MAX_CHANNEL) {
                eyre::bail!("dispensers: channel for index {} must be <= 15", m.index);
            }
            if m.pair_channel == Some(m.channel) {
                eyre::bail!(
                    "dispensers: pair_channel for index {} duplicates its channel",
                    m.index
                );
            }
            if std::mem::replace(&mut seen[m.index as usize], true) {
                eyre::bail!("dispensers: index {} mapped twice", m.index);
            }
        }

        // Schedules
        if self.schedules.len() > s.max_schedules {
            eyre::bail!(
                "schedules: {} entries exceed scheduler.max_schedules ({})",
                self.schedules.len(),
                s.max_schedules
            );
        }
        for row in &self.schedules {
            validate_row(row)?;
        }

        Ok(())
    }
}

/// Range checks shared by TOML and CSV schedule sources.
pub fn validate_row(row: &ScheduleRow) -> eyre::Result<()> {
    if row.id.trim().is_empty() {
        eyre::bail!("schedule id must not be empty");
    }
    if row.dispenser >= DISPENSER_COUNT {
        eyre::bail!(
            "schedule '{}': dispenser {} out of range 0..={}",
            row.id,
            row.dispenser,
            DISPENSER_COUNT - 1
        );
    }
    if row.hour > 23 || row.minute > 59 {
        eyre::bail!(
            "schedule '{}': time {:02}:{:02} out of range",
            row.id,
            row.hour,
            row.minute
        );
    }
    if let Some(days) = &row.weekdays
        && days.len() != 7
    {
        eyre::bail!(
            "schedule '{}': weekdays must have 7 entries, got {}",
            row.id,
            days.len()
        );
    }
    Ok(())
}

pub const SCHEDULE_CSV_HEADERS: [&str; 8] = [
    "id",
    "dispenser",
    "hour",
    "minute",
    "medication",
    "patient",
    "size",
    "enabled",
];

pub fn load_schedules_csv(path: &std::path::Path) -> eyre::Result<Vec<ScheduleRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open schedule CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != SCHEDULE_CSV_HEADERS {
        eyre::bail!(
            "schedule CSV must have headers '{}', got: {}",
            SCHEDULE_CSV_HEADERS.join(","),
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<ScheduleRow>().enumerate() {
        let row = rec.map_err(|e| eyre::eyre!("invalid CSV row {}: {}", idx + 2, e))?;
        validate_row(&row).map_err(|e| eyre::eyre!("invalid CSV row {}: {}", idx + 2, e))?;
        rows.push(row);
    }
    if rows.len() > MAX_SCHEDULES {
        eyre::bail!(
            "schedule CSV has {} rows; at most {} schedules fit",
            rows.len(),
            MAX_SCHEDULES
        );
    }
    Ok(rows)
}
