//! `DispenserCore`: the schedule table, the orchestrator and the wall clock
//! wired together behind one tick-driven entry point.

use dispenser_traits::{TimeSource, WallTime};

use crate::alarm::Firing;
use crate::builder::DispenserCoreBuilder;
use crate::channel::ActuationChannel;
use crate::error::DispenserError;
use crate::orchestrator::{DispenseEventSink, DispenseOrchestrator, FireOutcome};
use crate::schedule::ScheduleTable;
use crate::types::{DispenseResult, PillSize};

pub struct DispenserCore<C: ActuationChannel, T: TimeSource> {
    pub(crate) table: ScheduleTable,
    pub(crate) orchestrator: DispenseOrchestrator<C>,
    pub(crate) time: T,
}

impl<C: ActuationChannel, T: TimeSource> DispenserCore<C, T> {
    pub fn builder() -> DispenserCoreBuilder<C, T> {
        DispenserCoreBuilder::default()
    }

    pub fn schedules(&self) -> &ScheduleTable {
        &self.table
    }

    /// Mutations take effect on the next due-check.
    pub fn schedules_mut(&mut self) -> &mut ScheduleTable {
        &mut self.table
    }

    pub fn now(&self) -> WallTime {
        self.time.now()
    }

    /// One due-check at the time source's current reading.
    pub fn poll(&mut self) -> Vec<FireOutcome> {
        let now = self.time.now();
        self.tick_at(now)
    }

    /// Due-check at `now`, then fire every match in order.
    pub fn tick_at(&mut self, now: WallTime) -> Vec<FireOutcome> {
        let firings = self.collect_due(now);
        firings.iter().map(|f| self.fire(f)).collect()
    }

    /// First half of a tick: which alarms matched. Nothing is actuated.
    pub fn collect_due(&mut self, now: WallTime) -> Vec<Firing> {
        let firings = self.table.due(now);
        if !firings.is_empty() {
            tracing::debug!(at = %now, count = firings.len(), "alarms due");
        }
        firings
    }

    /// Second half of a tick. The schedule is looked up again here so that
    /// edits made since `collect_due` win.
    pub fn fire(&mut self, firing: &Firing) -> FireOutcome {
        let schedule = self.table.get(&firing.schedule_id);
        self.orchestrator.fire(firing, schedule)
    }

    pub fn test_trigger(
        &mut self,
        dispenser: u8,
        size: PillSize,
        medication: &str,
        patient: &str,
    ) -> Result<DispenseResult, DispenserError> {
        self.orchestrator
            .test_trigger(dispenser, size, medication, patient)
    }

    /// Test trigger using a stored schedule's dispenser, size and names.
    pub fn test_trigger_schedule(&mut self, id: &str) -> Result<DispenseResult, DispenserError> {
        let s = self
            .table
            .get(id)
            .ok_or_else(|| DispenserError::NotFound(id.to_string()))?;
        let (dispenser, size) = (s.dispenser, s.size);
        let (medication, patient) = (s.medication.clone(), s.patient.clone());
        self.orchestrator
            .test_trigger(dispenser, size, &medication, &patient)
    }

    pub fn remote_dispense(
        &mut self,
        dispenser: u8,
        size: PillSize,
        medication: &str,
        patient: &str,
    ) -> Result<DispenseResult, DispenserError> {
        self.orchestrator
            .remote_dispense(dispenser, size, medication, patient)
    }

    /// Channel housekeeping (health check, keep-alive). Failures are logged.
    pub fn maintain(&mut self) {
        let channel = self.orchestrator.channel_mut();
        if let Err(e) = channel.maintain() {
            tracing::warn!(channel = channel.kind(), error = %e, "channel maintenance failed");
        }
    }

    pub fn channel(&self) -> &C {
        self.orchestrator.channel()
    }

    pub fn channel_mut(&mut self) -> &mut C {
        self.orchestrator.channel_mut()
    }

    pub fn add_sink(&mut self, sink: Box<dyn DispenseEventSink>) {
        self.orchestrator.add_sink(sink);
    }

    pub fn time_source(&self) -> &T {
        &self.time
    }
}

impl<C: ActuationChannel, T: TimeSource> std::fmt::Debug for DispenserCore<C, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispenserCore")
            .field("table", &self.table)
            .field("channel", &self.orchestrator.channel().kind())
            .field("ready", &self.orchestrator.channel().is_ready())
            .finish()
    }
}
