//! Periodic pass scheduling with single-flight exclusion.
//!
//! Ticks never queue behind a running pass: a tick that finds a pass in
//! flight is logged and dropped. Cancelling the scheduler context stops the
//! ticker and waits for the in-flight pass, which sees the same cancellation
//! between files and flushes its pending batch before returning.

use kb_sync_app::{SyncPassRunner, SyncSummary};
use kb_sync_ports::{LogLevel, LoggerPort, log_fields};
use kb_sync_shared::{RequestContext, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// What a trigger did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A pass ran to completion (possibly cancelled early).
    Ran(SyncSummary),
    /// Another pass was in flight; nothing ran.
    Skipped,
}

/// Counters for a scheduler run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    /// Ticks that started a pass.
    pub passes: usize,
    /// Passes that returned an error.
    pub failed: usize,
    /// Ticks dropped because a pass was in flight.
    pub skipped: usize,
}

/// Runs sync passes on a cadence, never more than one at a time.
#[derive(Clone)]
pub struct SyncScheduler {
    runner: Arc<dyn SyncPassRunner>,
    in_flight: Arc<Mutex<()>>,
    logger: Option<Arc<dyn LoggerPort>>,
}

impl SyncScheduler {
    /// Schedule passes of `runner`.
    #[must_use]
    pub fn new(runner: Arc<dyn SyncPassRunner>) -> Self {
        Self {
            runner,
            in_flight: Arc::new(Mutex::new(())),
            logger: None,
        }
    }

    /// Attach a logger.
    #[must_use]
    pub fn with_logger(mut self, logger: Option<Arc<dyn LoggerPort>>) -> Self {
        self.logger = logger;
        self
    }

    /// Run one pass unless one is already running.
    pub async fn trigger(&self, ctx: &RequestContext) -> Result<TriggerOutcome> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            if let Some(logger) = self.logger.as_ref() {
                logger.warn(
                    "scheduler.tick_skipped",
                    "Previous sync pass still running; skipping tick",
                    None,
                );
            }
            return Ok(TriggerOutcome::Skipped);
        };
        let summary = self.runner.run_pass(ctx).await?;
        Ok(TriggerOutcome::Ran(summary))
    }

    /// Tick every `period` until `ctx` is cancelled.
    ///
    /// With `run_on_start` the first pass starts immediately; otherwise the
    /// first pass waits one full period. Pass errors are logged and counted;
    /// they never stop the schedule.
    pub async fn run(
        &self,
        ctx: &RequestContext,
        period: Duration,
        run_on_start: bool,
    ) -> SchedulerReport {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        if !run_on_start {
            ticker.tick().await;
        }
        self.log_info(
            "scheduler.started",
            "Scheduler started",
            period,
            run_on_start,
        );

        let mut report = SchedulerReport::default();
        let mut passes: JoinSet<Result<TriggerOutcome>> = JoinSet::new();
        loop {
            tokio::select! {
                () = ctx.cancelled() => break,
                _ = ticker.tick() => {
                    while let Some(joined) = passes.try_join_next() {
                        self.record(&mut report, joined);
                    }
                    let scheduler = self.clone();
                    let pass_ctx = ctx.clone();
                    passes.spawn(async move { scheduler.trigger(&pass_ctx).await });
                },
            }
        }

        while let Some(joined) = passes.join_next().await {
            self.record(&mut report, joined);
        }
        self.log_info("scheduler.stopped", "Scheduler stopped", period, run_on_start);
        report
    }

    fn record(
        &self,
        report: &mut SchedulerReport,
        joined: std::result::Result<Result<TriggerOutcome>, tokio::task::JoinError>,
    ) {
        match joined {
            Ok(Ok(TriggerOutcome::Ran(_))) => report.passes += 1,
            Ok(Ok(TriggerOutcome::Skipped)) => report.skipped += 1,
            Ok(Err(error)) => {
                report.passes += 1;
                report.failed += 1;
                if let Some(logger) = self.logger.as_ref() {
                    logger.log_error(
                        LogLevel::Error,
                        "scheduler.pass_failed",
                        "Scheduled sync pass failed",
                        &error,
                        None,
                    );
                }
            },
            Err(join_error) => {
                report.failed += 1;
                tracing::error!(error = %join_error, "scheduled sync pass panicked");
            },
        }
    }

    fn log_info(&self, event: &str, message: &str, period: Duration, run_on_start: bool) {
        if let Some(logger) = self.logger.as_ref() {
            logger.info(
                event,
                message,
                Some(log_fields([
                    ("intervalSecs", Value::from(period.as_secs())),
                    ("runOnStart", Value::from(run_on_start)),
                ])),
            );
        }
    }
}
