//! Continuous mode: runs the reply pass on a fixed interval until stopped.
//!
//! State lives in the scheduler object and is published on a `watch`
//! channel; the stop request travels on a second `watch` channel. A pass runs
//! on a blocking worker thread and is never interrupted; stopping only
//! prevents the next one from starting.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::engine::ReplyJob;
use crate::config::{SchedulerConfig, validate_inputs};
use crate::error::{Error, Result};

/// Lifecycle of the continuous loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Never started.
    Idle,
    /// A pass is in progress.
    Running,
    /// Sleeping until the next pass.
    Waiting,
    /// Stopped on request; may be started again.
    Stopped,
}

impl SchedulerState {
    pub fn is_active(self) -> bool {
        matches!(self, SchedulerState::Running | SchedulerState::Waiting)
    }
}

/// Owns the continuous loop and its state.
pub struct ContinuousScheduler {
    config: SchedulerConfig,
    state: Arc<watch::Sender<SchedulerState>>,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
}

impl ContinuousScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let (state, _rx) = watch::channel(SchedulerState::Idle);
        Self {
            config,
            state: Arc::new(state),
            stop_tx: Mutex::new(None),
        }
    }

    /// Current state.
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Follow state changes.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Validate the job and launch the loop on a background task.
    ///
    /// Starting while already running is a no-op. Starting after `stop` but
    /// before the loop has reached `Stopped` fails with [`Error::Stopping`].
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, job: ReplyJob) -> Result<()> {
        if let Err(e) = validate_inputs(&job.credentials, &job.template) {
            warn!("Continuous mode not started: {e}");
            job.status.report(&format!("Cannot start continuous mode: {e}"));
            return Err(e.into());
        }

        // Held across the state check so `stop` cannot interleave.
        let mut stop_slot = self
            .stop_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.state().is_active() {
            if stop_slot.is_some() {
                debug!("Continuous mode already running, start ignored");
                return Ok(());
            }
            warn!("Continuous mode start refused, previous run still stopping");
            job.status
                .report("Continuous mode is still stopping. Try again in a moment.");
            return Err(Error::Stopping);
        }

        self.state.send_replace(SchedulerState::Running);
        let (stop_tx, stop_rx) = watch::channel(false);
        *stop_slot = Some(stop_tx);
        drop(stop_slot);

        tokio::spawn(run_loop(
            self.config.clone(),
            job,
            Arc::clone(&self.state),
            stop_rx,
        ));
        Ok(())
    }

    /// Request a stop. The loop reaches `Stopped` within one increment of
    /// the wait, or right after the pass in progress.
    pub fn stop(&self) {
        let stop_tx = self
            .stop_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(stop_tx) = stop_tx {
            info!("Continuous mode stop requested");
            let _ = stop_tx.send(true);
        }
    }

    /// Wait until the loop has stopped. Returns at once if never started.
    pub async fn wait_stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx
            .wait_for(|s| matches!(s, SchedulerState::Stopped | SchedulerState::Idle))
            .await;
    }
}

impl Drop for ContinuousScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop(
    config: SchedulerConfig,
    job: ReplyJob,
    state: Arc<watch::Sender<SchedulerState>>,
    mut stop: watch::Receiver<bool>,
) {
    info!(
        interval_secs = config.interval.as_secs(),
        "Continuous mode started"
    );

    loop {
        if *stop.borrow() {
            break;
        }

        state.send_replace(SchedulerState::Running);
        job.status.report("Checking for new mail...");

        let pass_job = job.clone();
        let pass = tokio::task::spawn_blocking(move || pass_job.run_once()).await;

        let pause = match pass {
            Ok(Ok(summary)) => {
                debug!(replied = summary.replied, "Continuous pass finished");
                config.interval
            }
            // Needs an operator; retrying faster will not help.
            Ok(Err(e @ (Error::Config(_) | Error::Ledger(_)))) => {
                debug!("Pass aborted: {e}");
                config.interval
            }
            Ok(Err(e)) if e.is_auth() => config.interval,
            Ok(Err(e)) => {
                let cooldown = config.error_cooldown();
                warn!("Pass failed, retrying in {}s: {e}", cooldown.as_secs());
                job.status
                    .report(&format!("Retrying in {}s...", cooldown.as_secs()));
                cooldown
            }
            Err(e) => {
                let cooldown = config.error_cooldown();
                error!("Reply pass task failed: {e}");
                job.status.report(&format!("Error: {e}"));
                cooldown
            }
        };

        if *stop.borrow() {
            break;
        }
        state.send_replace(SchedulerState::Waiting);
        job.status.report("Waiting for the next check...");

        if !wait_or_stop(pause, config.increment, &mut stop).await {
            break;
        }
    }

    job.status.report("Continuous mode stopped.");
    info!("Continuous mode stopped");
    state.send_replace(SchedulerState::Stopped);
}

/// Sleep `total` in `increment` slices. Returns `false` as soon as a stop
/// is requested (or the scheduler is gone).
async fn wait_or_stop(
    total: Duration,
    increment: Duration,
    stop: &mut watch::Receiver<bool>,
) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        if *stop.borrow() {
            return false;
        }
        let slice = remaining.min(increment);
        tokio::select! {
            _ = tokio::time::sleep(slice) => {
                remaining = remaining.saturating_sub(slice);
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    return false;
                }
            }
        }
    }
    !*stop.borrow()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_completes_without_stop() {
        let (_tx, mut rx) = watch::channel(false);
        let finished = wait_or_stop(
            Duration::from_millis(30),
            Duration::from_millis(10),
            &mut rx,
        )
        .await;
        assert!(finished);
    }

    #[tokio::test]
    async fn wait_interrupted_by_stop() {
        let (tx, mut rx) = watch::channel(false);
        let started = tokio::time::Instant::now();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = tx.send(true);
        });
        let finished = wait_or_stop(Duration::from_secs(30), Duration::from_millis(50), &mut rx).await;
        assert!(!finished);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn wait_ends_when_scheduler_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let finished = wait_or_stop(Duration::from_secs(30), Duration::from_millis(10), &mut rx).await;
        assert!(!finished);
    }

    #[test]
    fn active_states() {
        assert!(SchedulerState::Running.is_active());
        assert!(SchedulerState::Waiting.is_active());
        assert!(!SchedulerState::Idle.is_active());
        assert!(!SchedulerState::Stopped.is_active());
    }

    #[tokio::test]
    async fn fresh_scheduler_is_idle() {
        let scheduler = ContinuousScheduler::new(SchedulerConfig::default());
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        scheduler.wait_stopped().await;
        scheduler.stop();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }
}
