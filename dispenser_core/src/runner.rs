use std::time::Duration;

use crossbeam_channel::{Receiver, TryRecvError};
use dispenser_traits::{Clock, TimeSource};

use crate::channel::ActuationChannel;
use crate::core::DispenserCore;
use crate::orchestrator::FireOutcome;

/// Control-loop pacing.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub tick: Duration,
    /// Stop after this many ticks; `None` runs until shutdown.
    pub max_ticks: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(250),
            max_ticks: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub dispensed: u64,
    pub failed: u64,
    pub reminders: u64,
    pub skipped: u64,
}

impl RunSummary {
    fn record(&mut self, outcome: &FireOutcome) {
        match outcome {
            FireOutcome::Dispensed { result, .. } if result.is_success() => self.dispensed += 1,
            FireOutcome::Dispensed { .. } => self.failed += 1,
            FireOutcome::Reminded(_) => self.reminders += 1,
            FireOutcome::Skipped { .. } => self.skipped += 1,
        }
    }
}

/// True once a shutdown message arrived or every sender is gone.
fn shutdown_requested(shutdown: &Receiver<()>) -> bool {
    !matches!(shutdown.try_recv(), Err(TryRecvError::Empty))
}

/// Drive `core` until shutdown or `opts.max_ticks`.
///
/// Each tick runs channel housekeeping, then the due-check, then sleeps one
/// tick on `clock`. A tick never blocks longer than the actuations it fires.
pub fn run<C, T, K>(
    core: &mut DispenserCore<C, T>,
    clock: &K,
    opts: RunOptions,
    shutdown: &Receiver<()>,
) -> RunSummary
where
    C: ActuationChannel,
    T: TimeSource,
    K: Clock,
{
    if !core.channel().is_ready() {
        if let Err(e) = core.channel_mut().begin() {
            tracing::error!(
                channel = core.channel().kind(),
                error = %e,
                "channel did not come up; continuing, dispenses will report unavailable"
            );
        }
    }
    tracing::info!(
        tick_ms = opts.tick.as_millis() as u64,
        max_ticks = opts.max_ticks,
        start = %core.now(),
        "control loop started"
    );

    let mut summary = RunSummary::default();
    loop {
        if shutdown_requested(shutdown) {
            tracing::info!("shutdown requested");
            break;
        }
        if opts.max_ticks.is_some_and(|max| summary.ticks >= max) {
            break;
        }
        core.maintain();
        for outcome in core.poll() {
            summary.record(&outcome);
        }
        summary.ticks += 1;
        clock.sleep(opts.tick);
    }

    tracing::info!(
        ticks = summary.ticks,
        dispensed = summary.dispensed,
        failed = summary.failed,
        reminders = summary.reminders,
        skipped = summary.skipped,
        "control loop stopped"
    );
    summary
}
