//! Cron and startup activation of scripts.
//!
//! One task per scheduled script. Activations that would overlap a run
//! still in flight are skipped, never queued. Shutdown signals every
//! task and waits for in-flight runs to finish.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::Script;

/// Startup activations fire this long after [`Scheduler::start`].
const STARTUP_DELAY: Duration = Duration::from_millis(2000);

/// Owns the activation tasks for scheduled and startup scripts.
pub struct Scheduler {
    shutdown: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// A scheduler with no tasks yet.
    #[must_use]
    pub fn new() -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            shutdown,
            handles: Vec::new(),
        }
    }

    /// Spawn activation tasks for every script that declares a schedule
    /// or a startup run.
    pub fn start(&mut self, scripts: &[Arc<Script>]) {
        for script in scripts {
            if script.runs_on_startup() {
                self.spawn_startup(Arc::clone(script));
            }
            if script.schedule().is_some() {
                self.spawn_cron(Arc::clone(script));
            }
        }
    }

    fn spawn_startup(&mut self, script: Arc<Script>) {
        let mut shutdown = self.shutdown.subscribe();
        self.handles.push(tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(STARTUP_DELAY) => {
                    info!(script = %script.name(), "Startup activation");
                    if let Err(e) = script.run(json!({})).await {
                        warn!(script = %script.name(), error = %e, "Startup run failed");
                    }
                }
                _ = shutdown.recv() => {}
            }
        }));
    }

    fn spawn_cron(&mut self, script: Arc<Script>) {
        let schedule = script.schedule().cloned().expect("caller checked");
        let mut shutdown = self.shutdown.subscribe();
        self.handles.push(tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    break;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::select! {
                    () = tokio::time::sleep(wait) => {
                        if script.is_running() {
                            debug!(script = %script.name(), "Skipping activation, run in flight");
                            continue;
                        }
                        if let Err(e) = script.run(json!({})).await {
                            warn!(script = %script.name(), error = %e, "Scheduled run failed");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        }));
    }

    /// Signal every task and wait for in-flight runs to complete.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scheduler task panicked");
            }
        }
    }
}
