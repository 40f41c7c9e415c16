//! Timeout sweeps
//!
//! - [`TimeoutReclaimer`]: LOCKED tasks past their claim deadline go back to
//!   OPEN (every ~30 s)
//! - [`AutoSettler`]: SUBMITTED tasks past their settle deadline are accepted
//!   on behalf of the publisher (every ~1 h)
//!
//! Candidates are selected without locks; each one is then re-checked and
//! transitioned in its own transaction. A failing row is logged and skipped,
//! the rest of the batch still runs, and the next tick retries it.
//!
//! Auto-acceptance on publisher silence is a business default, not an
//! invariant. `auto_settle_enabled = false` turns it off.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::EscrowEngine;
use crate::error::EscrowResult;
use crate::telemetry;

/// Returns abandoned LOCKED tasks to the open pool
#[derive(Clone)]
pub struct TimeoutReclaimer {
    engine: Arc<EscrowEngine>,
}

impl TimeoutReclaimer {
    pub fn new(engine: Arc<EscrowEngine>) -> Self {
        Self { engine }
    }

    /// Run one sweep; returns the number of tasks reclaimed
    pub async fn run_once(&self) -> EscrowResult<usize> {
        let started = Instant::now();
        let now = self.engine.clock().now();
        let batch = self.engine.config().sweep.batch_size;
        let candidates = self.engine.store().expired_locked_tasks(now, batch).await?;

        let mut reclaimed = 0;
        let mut failed = 0;
        for task_id in candidates {
            match self.engine.reclaim_task(task_id).await {
                Ok(true) => reclaimed += 1,
                Ok(false) => debug!(task_id = %task_id, "Reclaim skipped, task moved on"),
                Err(err) => {
                    failed += 1;
                    warn!(task_id = %task_id, error = %err, "Reclaim failed");
                }
            }
        }

        telemetry::sweep("reclaim", reclaimed, failed, started.elapsed().as_secs_f64());
        if reclaimed > 0 || failed > 0 {
            info!(reclaimed, failed, "Reclaim sweep finished");
        }
        Ok(reclaimed)
    }
}

/// Accepts SUBMITTED tasks whose publisher never settled
#[derive(Clone)]
pub struct AutoSettler {
    engine: Arc<EscrowEngine>,
}

impl AutoSettler {
    pub fn new(engine: Arc<EscrowEngine>) -> Self {
        Self { engine }
    }

    /// Run one sweep; returns the number of tasks settled
    pub async fn run_once(&self) -> EscrowResult<usize> {
        if !self.engine.config().auto_settle_enabled {
            debug!("Auto-settle disabled");
            return Ok(0);
        }

        let started = Instant::now();
        let now = self.engine.clock().now();
        let batch = self.engine.config().sweep.batch_size;
        let candidates = self.engine.store().expired_submitted_tasks(now, batch).await?;

        let mut settled = 0;
        let mut failed = 0;
        for task_id in candidates {
            match self.engine.auto_settle_task(task_id).await {
                Ok(true) => settled += 1,
                Ok(false) => debug!(task_id = %task_id, "Auto-settle skipped, task moved on"),
                Err(err) => {
                    failed += 1;
                    warn!(task_id = %task_id, error = %err, "Auto-settle failed");
                }
            }
        }

        telemetry::sweep("auto_settle", settled, failed, started.elapsed().as_secs_f64());
        if settled > 0 || failed > 0 {
            info!(settled, failed, "Auto-settle sweep finished");
        }
        Ok(settled)
    }
}

/// Drives both sweeps on their own intervals
pub struct SweepScheduler {
    reclaimer: TimeoutReclaimer,
    settler: AutoSettler,
    engine: Arc<EscrowEngine>,
}

/// Running sweep loops
pub struct SweepHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SweepHandle {
    /// Stop both loops and wait for the current tick to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Sweep scheduler stopped");
    }
}

impl SweepScheduler {
    pub fn new(engine: Arc<EscrowEngine>) -> Self {
        Self {
            reclaimer: TimeoutReclaimer::new(engine.clone()),
            settler: AutoSettler::new(engine.clone()),
            engine,
        }
    }

    pub fn reclaimer(&self) -> &TimeoutReclaimer {
        &self.reclaimer
    }

    pub fn settler(&self) -> &AutoSettler {
        &self.settler
    }

    /// Spawn both loops on the current runtime
    pub fn start(&self) -> SweepHandle {
        let (tx, rx) = watch::channel(false);
        let config = &self.engine.config().sweep;

        let reclaimer = self.reclaimer.clone();
        let reclaim = spawn_loop("reclaim", config.reclaim_interval, rx.clone(), move || {
            let reclaimer = reclaimer.clone();
            async move { reclaimer.run_once().await }
        });

        let settler = self.settler.clone();
        let settle = spawn_loop("auto_settle", config.auto_settle_interval, rx, move || {
            let settler = settler.clone();
            async move { settler.run_once().await }
        });

        info!(
            reclaim_interval = ?config.reclaim_interval,
            auto_settle_interval = ?config.auto_settle_interval,
            auto_settle_enabled = self.engine.config().auto_settle_enabled,
            "Sweep scheduler started"
        );

        SweepHandle {
            shutdown: tx,
            tasks: vec![reclaim, settle],
        }
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = EscrowResult<usize>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    debug!(sweep = name, "Sweep tick");
                    if let Err(err) = tick().await {
                        warn!(sweep = name, error = %err, "Sweep tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
