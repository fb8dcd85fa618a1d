//! Background sync worker.
//!
//! `SyncWorker` owns the lifecycle of the periodic tick loop. It is built
//! once, shared by handle (it is cheap to clone), and is the only writer of
//! the in-memory [`WorkerRun`].

use crate::services::sync_service::SyncService;
use crate::time::now_millis;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Default tick interval in seconds (5 minutes).
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

/// Worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Seconds between tick starts.
    pub interval_secs: u64,

    /// Start the worker when the process starts.
    pub autostart: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            autostart: true,
        }
    }
}

/// Lifecycle state of the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Snapshot of the worker, as returned by status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRun {
    pub status: WorkerState,
    pub started_at: Option<i64>,
    pub last_tick_at: Option<i64>,
    /// Failures of the most recent tick, if any.
    pub last_error: Option<String>,
    pub tick_count: u64,
}

impl Default for WorkerRun {
    fn default() -> Self {
        Self {
            status: WorkerState::Idle,
            started_at: None,
            last_tick_at: None,
            last_error: None,
            tick_count: 0,
        }
    }
}

struct ActiveLoop {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// Handle to the background worker.
#[derive(Clone)]
pub struct SyncWorker {
    service: SyncService,
    config: WorkerConfig,
    run: Arc<RwLock<WorkerRun>>,
    active: Arc<Mutex<Option<ActiveLoop>>>,
}

impl SyncWorker {
    pub fn new(service: SyncService, config: WorkerConfig) -> Self {
        Self {
            service,
            config,
            run: Arc::new(RwLock::new(WorkerRun::default())),
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn service(&self) -> &SyncService {
        &self.service
    }

    /// Current worker state. Never waits on the loop.
    pub fn status(&self) -> WorkerRun {
        self.run
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn update_run(&self, f: impl FnOnce(&mut WorkerRun)) {
        let mut run = self.run.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut run);
    }

    /// Start the tick loop. The first tick runs immediately.
    ///
    /// Starting a worker that is running or still stopping returns its
    /// current status without spawning another loop.
    pub fn start(&self) -> WorkerRun {
        let mut active = self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let current = self.status();
        if matches!(current.status, WorkerState::Running | WorkerState::Stopping) {
            return current;
        }

        let cancel = CancellationToken::new();
        self.update_run(|run| {
            run.status = WorkerState::Running;
            run.started_at = Some(now_millis());
            run.last_error = None;
        });

        let worker = self.clone();
        let loop_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            worker.run_loop(loop_cancel).await;
        });

        *active = Some(ActiveLoop {
            cancel,
            handle: Some(handle),
        });

        log::info!("[worker] Started, interval={}s", self.config.interval_secs);
        self.status()
    }

    /// Ask the loop to stop after the target it is working on.
    ///
    /// Returns the state seen right after signalling: `stopping`, or
    /// `stopped` if the loop already exited. A no-op when not running.
    pub fn stop(&self) -> WorkerRun {
        let active = self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if self.status().status != WorkerState::Running {
            return self.status();
        }

        if let Some(active) = active.as_ref() {
            self.update_run(|run| {
                if run.status == WorkerState::Running {
                    run.status = WorkerState::Stopping;
                }
            });
            active.cancel.cancel();
            log::info!("[worker] Stop requested");
        }

        self.status()
    }

    /// Wait for the loop to exit, if one was started.
    pub async fn join(&self) {
        let handle = {
            let mut active = self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            active.as_mut().and_then(|a| a.handle.take())
        };

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("[worker] Loop task ended abnormally: {}", e);
                self.update_run(|run| run.status = WorkerState::Stopped);
            }
        }
    }

    async fn run_loop(&self, cancel: CancellationToken) {
        let mut interval = time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.tick(&cancel).await;
                    if cancel.is_cancelled() {
                        break;
                    }
                }
            }
        }

        self.update_run(|run| run.status = WorkerState::Stopped);
        log::info!("[worker] Stopped");
    }

    async fn tick(&self, cancel: &CancellationToken) {
        log::debug!("[worker] Tick starting");

        let last_error = match self.service.run_tick(cancel).await {
            Ok(report) => {
                log::info!(
                    "[worker] Tick done: {} repositories, {} features, {} skipped, {} failed{}",
                    report.repositories_processed,
                    report.features_processed,
                    report.targets_skipped,
                    report.failures.len(),
                    if report.cancelled { " (cancelled)" } else { "" }
                );
                report
                    .failures
                    .last()
                    .map(|f| format!("{} ({}): {}", f.target, f.stage, f.message))
            }
            Err(e) => {
                log::error!("[worker] Tick failed: {}", e);
                Some(e.to_string())
            }
        };

        self.update_run(|run| {
            run.last_tick_at = Some(now_millis());
            run.tick_count += 1;
            run.last_error = last_error;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_defaults() {
        let config: WorkerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.interval_secs, DEFAULT_SYNC_INTERVAL_SECS);
        assert!(config.autostart);
    }

    #[test]
    fn test_worker_run_serialization() {
        let run = WorkerRun::default();
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["status"], "idle");
        assert_eq!(json["tickCount"], 0);
        assert!(json["lastTickAt"].is_null());
    }
}
