//! Wiring between the typed config, the hardware adapters and the core,
//! plus one function per subcommand.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;
use dispenser_config::Config;
use dispenser_core::{
    ActuationChannel, ChannelMap, DirectPwmChannel, DispenseEventSink, DispenseRequest,
    DispenseResult, DispenserCore, NewSchedule, PillDurations, PillSize, PwmSettings,
    RelayChannel, RelaySettings, Reminder, RunOptions, RunSummary, ScheduleTable,
    SchedulerSettings, SinkResult,
};
use dispenser_traits::{
    Clock, ManualClock, MonotonicClock, SystemTimeSource, TimeSource, WallTime,
};
use eyre::WrapErr;
use serde_json::json;

pub type Channel = Box<dyn ActuationChannel>;
pub type Core = DispenserCore<Channel, Box<dyn TimeSource>>;

/// Simulation knob: the PCA9685 does not answer on the bus.
#[cfg(not(all(feature = "hardware", target_os = "linux")))]
pub const SIM_BUS_ABSENT: &str = "DISPENSER_SIM_BUS_ABSENT";
/// Simulation knob: the relay controller never replies.
#[cfg(not(all(feature = "hardware", target_os = "linux")))]
pub const SIM_RELAY_SILENT: &str = "DISPENSER_SIM_RELAY_SILENT";

/// Failures the CLI reports on top of the core's own error types.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("dispense on dispenser {dispenser} failed: {result}")]
    DispenseFailed {
        dispenser: u8,
        result: DispenseResult,
    },
}

pub fn load_config(path: Option<&Path>) -> eyre::Result<Config> {
    let cfg = match path {
        Some(p) => {
            let text = std::fs::read_to_string(p)
                .wrap_err_with(|| format!("reading config {}", p.display()))?;
            toml::from_str::<Config>(&text)
                .wrap_err_with(|| format!("parsing config {}", p.display()))?
        }
        None => Config::default(),
    };
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

/// `[[schedules]]` from the config followed by the CSV rows; a CSV row with
/// an existing id replaces the earlier entry.
pub fn load_schedules(cfg: &Config, csv: Option<&Path>) -> eyre::Result<Vec<NewSchedule>> {
    let mut rows = cfg.schedules.clone();
    if let Some(path) = csv {
        rows.extend(dispenser_config::load_schedules_csv(path)?);
    }
    rows.iter()
        .map(|r| {
            NewSchedule::try_from(r).wrap_err_with(|| format!("loading schedule '{}'", r.id))
        })
        .collect()
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| !v.is_empty() && v != "0")
}

/// The actuation channel selected by `[channel] kind`.
pub fn open_channel(cfg: &Config, clock: Arc<dyn Clock>) -> eyre::Result<Channel> {
    match cfg.channel.kind {
        dispenser_config::ChannelKind::Pwm => open_pwm(cfg, clock),
        dispenser_config::ChannelKind::Relay => open_relay(cfg, clock),
    }
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn open_pwm(cfg: &Config, clock: Arc<dyn Clock>) -> eyre::Result<Channel> {
    let bus = dispenser_hardware::hardware::RppalI2cBus::new(cfg.pwm.i2c_bus)
        .wrap_err_with(|| format!("opening /dev/i2c-{}", cfg.pwm.i2c_bus))?;
    Ok(Box::new(DirectPwmChannel::new(
        bus,
        clock,
        PwmSettings::from(&cfg.pwm),
        PillDurations::from(&cfg.durations),
    )))
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn open_pwm(cfg: &Config, clock: Arc<dyn Clock>) -> eyre::Result<Channel> {
    let present = [cfg.pwm.address];
    let devices: &[u8] = if env_flag(SIM_BUS_ABSENT) {
        &[]
    } else {
        &present
    };
    let bus = dispenser_hardware::SimulatedPwmBus::with_devices(devices);
    tracing::debug!(devices = ?devices, "using simulated i2c bus");
    Ok(Box::new(DirectPwmChannel::new(
        bus,
        clock,
        PwmSettings::from(&cfg.pwm),
        PillDurations::from(&cfg.durations),
    )))
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn open_relay(cfg: &Config, clock: Arc<dyn Clock>) -> eyre::Result<Channel> {
    let link =
        dispenser_hardware::hardware::RppalSerialLink::open(&cfg.relay.port, cfg.relay.baud)
            .wrap_err_with(|| format!("opening serial port {}", cfg.relay.port))?;
    Ok(Box::new(RelayChannel::new(
        link,
        clock,
        RelaySettings::from(&cfg.relay),
    )))
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn open_relay(cfg: &Config, clock: Arc<dyn Clock>) -> eyre::Result<Channel> {
    let link = dispenser_hardware::SimulatedRelay::new();
    if env_flag(SIM_RELAY_SILENT) {
        link.set_silent(true);
    }
    tracing::debug!(port = %cfg.relay.port, "using simulated relay controller");
    Ok(Box::new(RelayChannel::new(
        link,
        clock,
        RelaySettings::from(&cfg.relay),
    )))
}

/// Clock for one-shot commands. Simulated builds skip the real waits.
fn command_clock() -> Arc<dyn Clock> {
    if cfg!(all(feature = "hardware", target_os = "linux")) {
        Arc::new(MonotonicClock::new())
    } else {
        Arc::new(ManualClock::new())
    }
}

fn build_core(
    cfg: &Config,
    channel: Channel,
    time: Box<dyn TimeSource>,
    schedules: Vec<NewSchedule>,
    json: bool,
) -> eyre::Result<Core> {
    let outputs = ChannelMap::try_from(cfg).wrap_err("mapping dispensers to outputs")?;
    DispenserCore::builder()
        .with_channel(channel)
        .with_time_source(time)
        .with_scheduler(SchedulerSettings::from(&cfg.scheduler))
        .with_outputs(outputs)
        .with_schedules(schedules)
        .with_sink(Box::new(ConsoleSink { json }))
        .try_build()
}

/// Prints every dispense result and reminder to stdout.
pub struct ConsoleSink {
    json: bool,
}

fn result_name(result: &DispenseResult) -> &'static str {
    match result {
        DispenseResult::Succeeded => "succeeded",
        DispenseResult::ChannelUnavailable => "channel-unavailable",
        DispenseResult::HardwareError(_) => "hardware-error",
    }
}

impl DispenseEventSink for ConsoleSink {
    fn on_dispense_result(
        &mut self,
        request: &DispenseRequest,
        result: &DispenseResult,
    ) -> SinkResult {
        let mut out = std::io::stdout().lock();
        if self.json {
            let detail = match result {
                DispenseResult::HardwareError(msg) => Some(msg.as_str()),
                _ => None,
            };
            let line = json!({
                "event": "dispense",
                "reason": request.reason.to_string(),
                "schedule_id": request.schedule_id,
                "dispenser": request.dispenser,
                "size": request.size.as_str(),
                "medication": request.medication,
                "patient": request.patient,
                "result": result_name(result),
                "detail": detail,
            });
            writeln!(out, "{line}")?;
        } else {
            writeln!(
                out,
                "dispense {} ({}) dispenser {} {} {} for {}: {}",
                request.schedule_id.as_deref().unwrap_or("-"),
                request.reason,
                request.dispenser,
                request.size,
                request.medication,
                request.patient,
                result
            )?;
        }
        Ok(())
    }

    fn on_reminder(&mut self, reminder: &Reminder) -> SinkResult {
        let mut out = std::io::stdout().lock();
        if self.json {
            let line = json!({
                "event": "reminder",
                "schedule_id": reminder.schedule_id,
                "dispenser": reminder.dispenser,
                "size": reminder.size.as_str(),
                "medication": reminder.medication,
                "patient": reminder.patient,
                "dose_time": format!("{:02}:{:02}", reminder.dose_hour, reminder.dose_minute),
            });
            writeln!(out, "{line}")?;
        } else {
            writeln!(
                out,
                "reminder {}: {} for {} at {:02}:{:02} (dispenser {})",
                reminder.schedule_id,
                reminder.medication,
                reminder.patient,
                reminder.dose_hour,
                reminder.dose_minute,
                reminder.dispenser
            )?;
        }
        Ok(())
    }
}

pub fn cmd_run(
    cfg: &Config,
    schedules: Vec<NewSchedule>,
    sim_start: Option<WallTime>,
    max_ticks: Option<u64>,
    json: bool,
    shutdown: &Receiver<()>,
) -> eyre::Result<RunSummary> {
    let opts = RunOptions {
        tick: Duration::from_millis(cfg.scheduler.tick_ms),
        max_ticks,
    };
    let summary = match sim_start {
        Some(start) => {
            tracing::info!(%start, "running on simulated time");
            let clock = ManualClock::new();
            let time = dispenser_traits::SimulatedTimeSource::new(start, clock.clone());
            let channel = open_channel(cfg, Arc::new(clock.clone()))?;
            let mut core = build_core(cfg, channel, Box::new(time), schedules, json)?;
            dispenser_core::run(&mut core, &clock, opts, shutdown)
        }
        None => {
            let clock = MonotonicClock::new();
            let time = SystemTimeSource::new(cfg.time.utc_offset_s);
            let channel = open_channel(cfg, Arc::new(clock))?;
            let mut core = build_core(cfg, channel, Box::new(time), schedules, json)?;
            dispenser_core::run(&mut core, &clock, opts, shutdown)
        }
    };

    if json {
        println!(
            "{}",
            json!({
                "event": "summary",
                "ticks": summary.ticks,
                "dispensed": summary.dispensed,
                "failed": summary.failed,
                "reminders": summary.reminders,
                "skipped": summary.skipped,
            })
        );
    } else {
        println!(
            "run complete: {} ticks, {} dispensed, {} failed, {} reminders, {} skipped",
            summary.ticks, summary.dispensed, summary.failed, summary.reminders, summary.skipped
        );
    }
    Ok(summary)
}

pub fn cmd_dispense(
    cfg: &Config,
    dispenser: u8,
    size: PillSize,
    remote: bool,
    json: bool,
) -> eyre::Result<()> {
    let channel = open_channel(cfg, command_clock())?;
    let time = SystemTimeSource::new(cfg.time.utc_offset_s);
    let mut core = build_core(cfg, channel, Box::new(time), Vec::new(), json)?;
    if !core.channel().is_ready() {
        core.channel_mut().begin()?;
    }
    let result = if remote {
        core.remote_dispense(dispenser, size, "manual", "-")?
    } else {
        core.test_trigger(dispenser, size, "manual", "-")?
    };
    if result.is_success() {
        Ok(())
    } else {
        Err(CliError::DispenseFailed { dispenser, result }.into())
    }
}

pub fn cmd_self_check(cfg: &Config, json: bool) -> eyre::Result<()> {
    let mut channel = open_channel(cfg, command_clock())?;
    channel.begin()?;
    if json {
        println!("{}", json!({ "status": "ok", "channel": channel.kind() }));
    } else {
        println!("self-check ok: {} channel ready", channel.kind());
    }
    Ok(())
}

pub fn cmd_recover_bus(cfg: &Config, json: bool) -> eyre::Result<()> {
    let mut channel = open_channel(cfg, command_clock())?;
    channel.recover()?;
    if json {
        println!("{}", json!({ "status": "recovered", "channel": channel.kind() }));
    } else {
        println!("recovery complete: {} channel ready", channel.kind());
    }
    Ok(())
}

pub fn cmd_schedules(
    cfg: &Config,
    schedules: Vec<NewSchedule>,
    at: Option<WallTime>,
    json: bool,
) -> eyre::Result<()> {
    let mut table = ScheduleTable::new(&SchedulerSettings::from(&cfg.scheduler));
    for s in schedules {
        let id = s.id.clone();
        table
            .add(s)
            .wrap_err_with(|| format!("loading schedule '{id}'"))?;
    }

    let next = at.map(|now| (now, table.next_schedule_time(now), table.is_schedule_time(now)));
    if json {
        let rows: Vec<_> = table
            .iter()
            .map(|s| {
                json!({
                    "id": s.id,
                    "dispenser": s.dispenser,
                    "time": format!("{:02}:{:02}", s.hour, s.minute),
                    "size": s.size.as_str(),
                    "medication": s.medication,
                    "patient": s.patient,
                    "enabled": s.enabled,
                    "weekdays": s.weekdays,
                })
            })
            .collect();
        let mut obj = json!({ "schedules": rows, "active": table.active_count() });
        if let Some((now, next, due)) = next {
            obj["at"] = json!(now.to_string());
            obj["next"] = json!(next.map(|(h, m)| format!("{h:02}:{m:02}")));
            obj["due"] = json!(due);
        }
        println!("{obj}");
        return Ok(());
    }

    for s in table.iter() {
        println!("{s}");
    }
    println!("{} of {} schedules active", table.active_count(), table.count());
    if let Some((now, next, due)) = next {
        match next {
            Some((h, m)) => println!("next dose after {now}: {h:02}:{m:02}"),
            None => println!("no further doses on {}", now.weekday),
        }
        if due {
            println!("a dose is due at {now}");
        }
    }
    Ok(())
}
