//! Reconcile runner: the main loop that sweeps every registered task.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};

use lessonsync_core::config::WorkerConfig;

use crate::task::{ReconcileTask, TaskError};

/// Runs registered reconciliation tasks on a fixed interval
#[derive(Debug)]
pub struct ReconcileRunner {
    /// Registered tasks, run in registration order
    tasks: Vec<Arc<dyn ReconcileTask>>,
    /// Worker configuration
    config: WorkerConfig,
}

impl ReconcileRunner {
    /// Create a new runner with no tasks
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            tasks: Vec::new(),
            config,
        }
    }

    /// Register a task
    pub fn register(&mut self, task: Arc<dyn ReconcileTask>) {
        tracing::info!("Registered reconcile task '{}'", task.name());
        self.tasks.push(task);
    }

    /// Names of the registered tasks
    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name().to_string()).collect()
    }

    /// Start the runner. Sweeps until the cancel signal is received
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) {
        if !self.config.enabled {
            tracing::info!("Reconcile runner disabled by configuration");
            return;
        }

        let period = self.config.sweep_interval();
        tracing::info!(
            "Reconcile runner started with sweep_interval={}s, tasks={:?}",
            self.config.sweep_interval_seconds,
            self.task_names()
        );

        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                res = cancel.changed() => {
                    if res.is_err() || *cancel.borrow() {
                        tracing::info!("Reconcile runner received shutdown signal");
                        break;
                    }
                }
                _ = ticker.tick() => self.run_all().await,
            }
        }

        tracing::info!("Reconcile runner shut down complete");
    }

    /// Run every task once, logging each outcome
    pub async fn run_all(&self) {
        for task in &self.tasks {
            match task.run_once().await {
                Ok(summary) => {
                    tracing::debug!("Task '{}' completed: {}", task.name(), summary);
                }
                Err(TaskError::Transient(msg)) => {
                    tracing::warn!("Task '{}' failed (transient): {}", task.name(), msg);
                }
                Err(TaskError::Permanent(msg)) => {
                    tracing::error!("Task '{}' failed permanently: {}", task.name(), msg);
                }
                Err(TaskError::Internal(err)) => {
                    tracing::error!("Task '{}' internal error: {}", task.name(), err);
                }
            }
        }
    }
}
