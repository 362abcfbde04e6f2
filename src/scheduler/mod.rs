//! Periodic task runner.
//!
//! Each registered task ticks on a fixed interval after a small startup
//! jitter. Ticks that land while the previous run is still in flight are
//! dropped, not queued. Tasks can also be fired manually through the admin
//! surface, under the same single-flight guard.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::clock::Clock;

pub const TASK_SYNC_ORDERS: &str = "sync_orders";
pub const TASK_SYNC_LISTINGS: &str = "sync_listings";
pub const TASK_REPRICE_FLEET: &str = "reprice_fleet";
pub const TASK_RECOMPUTE_BUYBACK: &str = "recompute_buyback";

const MAX_STARTUP_JITTER_MS: u64 = 10_000;

pub type TaskBody =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskStatus {
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub is_running: bool,
}

struct ScheduledTask {
    name: &'static str,
    interval: Duration,
    body: TaskBody,
    status: Mutex<TaskStatus>,
    running: AtomicBool,
}

pub struct Scheduler {
    tasks: Vec<Arc<ScheduledTask>>,
    clock: Arc<dyn Clock>,
    shutdown_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            tasks: Vec::new(),
            clock,
            shutdown_tx,
        }
    }

    pub fn register(&mut self, name: &'static str, interval: Duration, body: TaskBody) {
        self.tasks.push(Arc::new(ScheduledTask {
            name,
            interval,
            body,
            status: Mutex::new(TaskStatus::default()),
            running: AtomicBool::new(false),
        }));
    }

    /// Spawn one loop per task. Startup jitter de-correlates the first
    /// ticks so a restart does not burst the remote.
    pub fn start(self: &Arc<Self>) {
        for task in &self.tasks {
            let task = task.clone();
            let clock = self.clock.clone();
            let mut shutdown_rx = self.shutdown_tx.subscribe();

            tokio::spawn(async move {
                let jitter =
                    Duration::from_millis(rand::thread_rng().gen_range(0..=MAX_STARTUP_JITTER_MS));
                info!(task = task.name, jitter_ms = jitter.as_millis() as u64, "task scheduled");

                tokio::select! {
                    _ = sleep(jitter) => {}
                    _ = shutdown_rx.changed() => return,
                }

                loop {
                    {
                        let mut status = task.status.lock();
                        status.next_run = Some(
                            clock.now_utc()
                                + chrono::Duration::from_std(task.interval)
                                    .unwrap_or_else(|_| chrono::Duration::zero()),
                        );
                    }

                    let run_task = task.clone();
                    let run_clock = clock.clone();
                    tokio::spawn(async move {
                        run_once(&run_task, &run_clock).await;
                    });

                    tokio::select! {
                        _ = sleep(task.interval) => {}
                        _ = shutdown_rx.changed() => {
                            info!(task = task.name, "task loop stopped");
                            return;
                        }
                    }
                }
            });
        }
    }

    /// Manually fire one task. Returns false when the single-flight guard
    /// dropped the trigger.
    pub fn trigger(&self, name: &str) -> anyhow::Result<bool> {
        let task = self
            .tasks
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| anyhow::anyhow!("unknown task: {}", name))?;

        if task.running.load(Ordering::SeqCst) {
            warn!(task = task.name, "manual trigger dropped, task already running");
            return Ok(false);
        }

        let task = task.clone();
        let clock = self.clock.clone();
        tokio::spawn(async move {
            run_once(&task, &clock).await;
        });
        Ok(true)
    }

    /// Fire every task, skipping any currently running.
    pub fn trigger_all(&self) -> Vec<(&'static str, bool)> {
        self.tasks
            .iter()
            .map(|t| (t.name, self.trigger(t.name).unwrap_or(false)))
            .collect()
    }

    pub fn status(&self) -> Vec<(&'static str, TaskStatus)> {
        self.tasks
            .iter()
            .map(|t| (t.name, t.status.lock().clone()))
            .collect()
    }

    /// Stop all task loops; in-flight bodies finish on their own.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn run_once(task: &Arc<ScheduledTask>, clock: &Arc<dyn Clock>) -> bool {
    if task
        .running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        warn!(task = task.name, "tick skipped, previous run still in flight");
        return false;
    }

    {
        let mut status = task.status.lock();
        status.is_running = true;
        status.last_run = Some(clock.now_utc());
    }

    let result = (task.body)().await;

    {
        let mut status = task.status.lock();
        status.is_running = false;
        match result {
            Ok(()) => status.last_error = None,
            Err(e) => {
                error!(task = task.name, error = %e, "task failed");
                status.last_error = Some(e.to_string());
            }
        }
    }
    task.running.store(false, Ordering::SeqCst);
    true
}
