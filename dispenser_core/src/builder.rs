//! Builder for `DispenserCore`.
//!
//! Channel and time source are required; everything else has defaults.
//! `try_build()` validates the scheduler settings and loads the initial
//! schedules, failing on the first rejected row.

use dispenser_traits::TimeSource;
use eyre::WrapErr;

use crate::channel::ActuationChannel;
use crate::config::{ChannelMap, SchedulerSettings};
use crate::core::DispenserCore;
use crate::error::{BuildError, Result};
use crate::orchestrator::{DispenseEventSink, DispenseOrchestrator};
use crate::schedule::{NewSchedule, ScheduleTable};

pub struct DispenserCoreBuilder<C, T> {
    channel: Option<C>,
    time: Option<T>,
    scheduler: Option<SchedulerSettings>,
    outputs: Option<ChannelMap>,
    schedules: Vec<NewSchedule>,
    sinks: Vec<Box<dyn DispenseEventSink>>,
}

impl<C, T> Default for DispenserCoreBuilder<C, T> {
    fn default() -> Self {
        Self {
            channel: None,
            time: None,
            scheduler: None,
            outputs: None,
            schedules: Vec::new(),
            sinks: Vec::new(),
        }
    }
}

fn validate_scheduler(s: &SchedulerSettings) -> Result<()> {
    if !(1..=720).contains(&s.reminder_offset_min) {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "reminder_offset_min must be within 1..=720",
        )));
    }
    if !(1..=dispenser_config::MAX_CATCH_UP_MINUTES).contains(&s.catch_up_minutes) {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "catch_up_minutes must be within 1..=60",
        )));
    }
    if !(1..=dispenser_config::MAX_SCHEDULES).contains(&s.max_schedules) {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "max_schedules must be within 1..=15",
        )));
    }
    if s.alarm_capacity < 2 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "alarm_capacity must hold at least one schedule",
        )));
    }
    Ok(())
}

impl<C: ActuationChannel, T: TimeSource> DispenserCoreBuilder<C, T> {
    pub fn with_channel(mut self, channel: C) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn with_time_source(mut self, time: T) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_scheduler(mut self, settings: SchedulerSettings) -> Self {
        self.scheduler = Some(settings);
        self
    }

    pub fn with_outputs(mut self, outputs: ChannelMap) -> Self {
        self.outputs = Some(outputs);
        self
    }

    /// Initial schedules, added in order.
    pub fn with_schedules(mut self, schedules: impl IntoIterator<Item = NewSchedule>) -> Self {
        self.schedules.extend(schedules);
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn DispenseEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn try_build(self) -> Result<DispenserCore<C, T>> {
        let channel = self
            .channel
            .ok_or_else(|| eyre::Report::new(BuildError::MissingChannel))?;
        let time = self
            .time
            .ok_or_else(|| eyre::Report::new(BuildError::MissingTimeSource))?;
        let scheduler = self.scheduler.unwrap_or_default();
        validate_scheduler(&scheduler)?;

        let mut table = ScheduleTable::new(&scheduler);
        for s in self.schedules {
            let id = s.id.clone();
            table
                .add(s)
                .wrap_err_with(|| format!("loading schedule '{id}'"))?;
        }

        let mut orchestrator =
            DispenseOrchestrator::new(channel, self.outputs.unwrap_or_default());
        for sink in self.sinks {
            orchestrator.add_sink(sink);
        }

        tracing::info!(
            channel = orchestrator.channel().kind(),
            schedules = table.count(),
            reminder_offset_min = scheduler.reminder_offset_min,
            "dispenser core built"
        );
        Ok(DispenserCore {
            table,
            orchestrator,
            time,
        })
    }
}
