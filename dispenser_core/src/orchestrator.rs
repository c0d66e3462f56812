//! Turns alarm firings into actuation and outbound events.

use crate::alarm::{AlarmKind, Firing};
use crate::channel::ActuationChannel;
use crate::config::ChannelMap;
use crate::error::DispenserError;
use crate::schedule::MedicationSchedule;
use crate::types::{
    DispenseRequest, DispenseResult, PillSize, Reminder, TriggerReason, check_dispenser,
};

pub type SinkResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Outbound collaborator (notification, cloud log). Best effort: an `Err`
/// is logged and otherwise ignored.
pub trait DispenseEventSink {
    fn on_dispense_result(&mut self, request: &DispenseRequest, result: &DispenseResult)
    -> SinkResult;

    fn on_reminder(&mut self, reminder: &Reminder) -> SinkResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Schedule was removed after the alarm matched.
    Removed,
    Disabled,
    /// Schedule was re-timed after the alarm matched.
    Rescheduled,
    /// Weekday bit for the dose day is clear.
    NotToday,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    Dispensed {
        request: DispenseRequest,
        result: DispenseResult,
    },
    Reminded(Reminder),
    Skipped {
        schedule_id: String,
        kind: AlarmKind,
        reason: SkipReason,
    },
}

pub struct DispenseOrchestrator<C: ActuationChannel> {
    channel: C,
    outputs: ChannelMap,
    sinks: Vec<Box<dyn DispenseEventSink>>,
}

impl<C: ActuationChannel> DispenseOrchestrator<C> {
    pub fn new(channel: C, outputs: ChannelMap) -> Self {
        Self {
            channel,
            outputs,
            sinks: Vec::new(),
        }
    }

    pub fn add_sink(&mut self, sink: Box<dyn DispenseEventSink>) {
        self.sinks.push(sink);
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn outputs(&self) -> &ChannelMap {
        &self.outputs
    }

    fn skip(firing: &Firing, reason: SkipReason) -> FireOutcome {
        tracing::info!(
            schedule_id = %firing.schedule_id,
            kind = %firing.kind,
            ?reason,
            "firing skipped"
        );
        FireOutcome::Skipped {
            schedule_id: firing.schedule_id.clone(),
            kind: firing.kind,
            reason,
        }
    }

    /// Handle one firing against the schedule as it is now.
    pub fn fire(&mut self, firing: &Firing, schedule: Option<&MedicationSchedule>) -> FireOutcome {
        let Some(s) = schedule else {
            return Self::skip(firing, SkipReason::Removed);
        };
        if !s.enabled {
            return Self::skip(firing, SkipReason::Disabled);
        }
        let bound = match firing.kind {
            AlarmKind::Dispense => s.dispense_alarm(),
            AlarmKind::Reminder => s.reminder_alarm(),
        };
        if bound != Some(firing.alarm) {
            return Self::skip(firing, SkipReason::Rescheduled);
        }
        if !s.runs_on(firing.dose_day) {
            return Self::skip(firing, SkipReason::NotToday);
        }
        match firing.kind {
            AlarmKind::Dispense => {
                let request = DispenseRequest {
                    dispenser: s.dispenser,
                    size: s.size,
                    medication: s.medication.clone(),
                    patient: s.patient.clone(),
                    reason: TriggerReason::Scheduled,
                    schedule_id: Some(s.id.clone()),
                };
                let result = self.execute(&request);
                FireOutcome::Dispensed { request, result }
            }
            AlarmKind::Reminder => {
                let reminder = Reminder {
                    schedule_id: s.id.clone(),
                    dispenser: s.dispenser,
                    size: s.size,
                    medication: s.medication.clone(),
                    patient: s.patient.clone(),
                    dose_hour: s.hour,
                    dose_minute: s.minute,
                };
                tracing::info!(
                    schedule_id = %s.id,
                    dispenser = s.dispenser,
                    dose = %format_args!("{:02}:{:02}", s.hour, s.minute),
                    "reminder"
                );
                for sink in &mut self.sinks {
                    if let Err(e) = sink.on_reminder(&reminder) {
                        tracing::warn!(error = %e, "reminder sink failed");
                    }
                }
                FireOutcome::Reminded(reminder)
            }
        }
    }

    /// Diagnostic dispense; skips the enable and weekday checks.
    pub fn test_trigger(
        &mut self,
        dispenser: u8,
        size: PillSize,
        medication: &str,
        patient: &str,
    ) -> Result<DispenseResult, DispenserError> {
        self.manual(TriggerReason::ManualTest, dispenser, size, medication, patient)
    }

    /// Dispense requested by a remote command.
    pub fn remote_dispense(
        &mut self,
        dispenser: u8,
        size: PillSize,
        medication: &str,
        patient: &str,
    ) -> Result<DispenseResult, DispenserError> {
        self.manual(TriggerReason::RemoteCommand, dispenser, size, medication, patient)
    }

    fn manual(
        &mut self,
        reason: TriggerReason,
        dispenser: u8,
        size: PillSize,
        medication: &str,
        patient: &str,
    ) -> Result<DispenseResult, DispenserError> {
        check_dispenser(dispenser)?;
        let request = DispenseRequest {
            dispenser,
            size,
            medication: medication.to_string(),
            patient: patient.to_string(),
            reason,
            schedule_id: None,
        };
        Ok(self.execute(&request))
    }

    /// Drive the channel and report the result to every sink.
    pub fn execute(&mut self, request: &DispenseRequest) -> DispenseResult {
        let result = match self.outputs.get(request.dispenser) {
            None => DispenseResult::HardwareError(format!(
                "dispenser {} has no output mapped",
                request.dispenser
            )),
            Some(out) => {
                let res = match out.pair_channel {
                    Some(pair) => self.channel.dispense_pair(out.channel, pair, request.size),
                    None => self.channel.dispense(out.channel, request.size),
                };
                match res {
                    Ok(()) => DispenseResult::Succeeded,
                    Err(DispenserError::ChannelUnavailable | DispenserError::CommandTimeout) => {
                        DispenseResult::ChannelUnavailable
                    }
                    Err(e) => DispenseResult::HardwareError(e.to_string()),
                }
            }
        };
        if result.is_success() {
            tracing::info!(
                dispenser = request.dispenser,
                size = %request.size,
                reason = %request.reason,
                schedule_id = request.schedule_id.as_deref().unwrap_or("-"),
                "dispense succeeded"
            );
        } else {
            tracing::error!(
                dispenser = request.dispenser,
                reason = %request.reason,
                schedule_id = request.schedule_id.as_deref().unwrap_or("-"),
                result = %result,
                "dispense failed"
            );
        }
        for sink in &mut self.sinks {
            if let Err(e) = sink.on_dispense_result(request, &result) {
                tracing::warn!(error = %e, "dispense result sink failed");
            }
        }
        result
    }
}
