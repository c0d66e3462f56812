//! Test doubles for the actuation channel and event sinks.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::channel::{ActuationChannel, ChannelResult};
use crate::error::DispenserError;
use crate::orchestrator::{DispenseEventSink, SinkResult};
use crate::types::{DispenseRequest, DispenseResult, PillSize, Reminder};

/// One call made on a `RecordingChannel`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCall {
    Begin,
    SetAngle(u8, u16),
    StopAll,
    ResetAll,
    Dispense(u8, PillSize),
    DispensePair(u8, u8, PillSize),
    SelfTest(u8),
    Calibrate(u8),
    Recover,
    Maintain,
}

/// Channel that records every call and never touches hardware.
#[derive(Debug)]
pub struct RecordingChannel {
    calls: Vec<ChannelCall>,
    ready: bool,
    failures: VecDeque<DispenserError>,
}

impl Default for RecordingChannel {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            ready: true,
            failures: VecDeque::new(),
        }
    }
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts not ready; `begin` makes it ready.
    pub fn offline() -> Self {
        Self {
            ready: false,
            ..Self::default()
        }
    }

    /// Queue an error for the next dispense or pair dispense.
    pub fn fail_next(&mut self, err: DispenserError) {
        self.failures.push_back(err);
    }

    pub fn calls(&self) -> &[ChannelCall] {
        &self.calls
    }

    /// Calls that would have moved a mechanism.
    pub fn actuations(&self) -> Vec<&ChannelCall> {
        self.calls
            .iter()
            .filter(|c| !matches!(c, ChannelCall::Maintain | ChannelCall::Begin))
            .collect()
    }

    fn actuate(&mut self, call: ChannelCall) -> ChannelResult {
        self.calls.push(call);
        match self.failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl ActuationChannel for RecordingChannel {
    fn kind(&self) -> &'static str {
        "recording"
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn begin(&mut self) -> ChannelResult {
        self.calls.push(ChannelCall::Begin);
        self.ready = true;
        Ok(())
    }

    fn set_angle(&mut self, channel: u8, angle: u16) -> ChannelResult {
        self.calls.push(ChannelCall::SetAngle(channel, angle));
        Ok(())
    }

    fn stop_all(&mut self) -> ChannelResult {
        self.calls.push(ChannelCall::StopAll);
        Ok(())
    }

    fn reset_all(&mut self) -> ChannelResult {
        self.calls.push(ChannelCall::ResetAll);
        Ok(())
    }

    fn dispense(&mut self, channel: u8, size: PillSize) -> ChannelResult {
        self.actuate(ChannelCall::Dispense(channel, size))
    }

    fn dispense_pair(&mut self, first: u8, second: u8, size: PillSize) -> ChannelResult {
        self.actuate(ChannelCall::DispensePair(first, second, size))
    }

    fn self_test(&mut self, channel: u8) -> ChannelResult {
        self.calls.push(ChannelCall::SelfTest(channel));
        Ok(())
    }

    fn calibrate(&mut self, channel: u8) -> ChannelResult {
        self.calls.push(ChannelCall::Calibrate(channel));
        Ok(())
    }

    fn recover(&mut self) -> ChannelResult {
        self.calls.push(ChannelCall::Recover);
        self.ready = true;
        Ok(())
    }

    fn maintain(&mut self) -> ChannelResult {
        self.calls.push(ChannelCall::Maintain);
        Ok(())
    }
}

/// Event delivered to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Result(DispenseRequest, DispenseResult),
    Reminder(Reminder),
}

/// Sink that keeps every event; clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Rc<RefCell<Vec<SinkEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.borrow().clone()
    }

    pub fn results(&self) -> Vec<(DispenseRequest, DispenseResult)> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Result(req, res) => Some((req.clone(), res.clone())),
                SinkEvent::Reminder(_) => None,
            })
            .collect()
    }

    pub fn reminders(&self) -> Vec<Reminder> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Reminder(r) => Some(r.clone()),
                SinkEvent::Result(..) => None,
            })
            .collect()
    }
}

impl DispenseEventSink for RecordingSink {
    fn on_dispense_result(
        &mut self,
        request: &DispenseRequest,
        result: &DispenseResult,
    ) -> SinkResult {
        self.events
            .borrow_mut()
            .push(SinkEvent::Result(request.clone(), result.clone()));
        Ok(())
    }

    fn on_reminder(&mut self, reminder: &Reminder) -> SinkResult {
        self.events
            .borrow_mut()
            .push(SinkEvent::Reminder(reminder.clone()));
        Ok(())
    }
}

/// Sink whose every call fails.
#[derive(Debug, Default)]
pub struct FailingSink;

impl DispenseEventSink for FailingSink {
    fn on_dispense_result(&mut self, _: &DispenseRequest, _: &DispenseResult) -> SinkResult {
        Err(Box::new(std::io::Error::other("sink offline")))
    }

    fn on_reminder(&mut self, _: &Reminder) -> SinkResult {
        Err(Box::new(std::io::Error::other("sink offline")))
    }
}
