//! Background loops: the schedule pass expands due schedules into scheduled
//! talks, and the overdue sweep refreshes the stored reporting flag.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use services::services::{assignment_status::SweepSummary, schedule_engine::ProcessSummary};
use tokio::{sync::RwLock, task::JoinHandle};
use tracing::{error, info};

use crate::AppState;

pub struct BackgroundRunners {
    state: AppState,
    is_running: Arc<RwLock<bool>>,
}

impl BackgroundRunners {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            is_running: Arc::new(RwLock::new(false)),
        }
    }

    /// Spawns both loops. Calling it again while running is a no-op.
    pub async fn start(&self) -> Vec<JoinHandle<()>> {
        let mut running = self.is_running.write().await;
        if *running {
            return Vec::new();
        }
        *running = true;
        drop(running);

        let (poll_interval, sweep_interval) = {
            let config = self.state.config().read().await;
            (
                Duration::from_secs(config.schedule_poll_interval_secs.max(1)),
                Duration::from_secs(config.overdue_sweep_interval_secs.max(1)),
            )
        };

        let schedule_loop = {
            let state = self.state.clone();
            let is_running = self.is_running.clone();
            tokio::spawn(async move {
                info!("[SCHEDULE_RUNNER] Started - polling every {}s", poll_interval.as_secs());
                while *is_running.read().await {
                    if let Err(e) = run_schedule_pass(&state).await {
                        error!("[SCHEDULE_RUNNER] Pass failed: {}", e);
                    }
                    tokio::time::sleep(poll_interval).await;
                }
                info!("[SCHEDULE_RUNNER] Stopped");
            })
        };

        let sweep_loop = {
            let state = self.state.clone();
            let is_running = self.is_running.clone();
            tokio::spawn(async move {
                info!("[OVERDUE_SWEEP] Started - sweeping every {}s", sweep_interval.as_secs());
                while *is_running.read().await {
                    if let Err(e) = run_overdue_sweep(&state).await {
                        error!("[OVERDUE_SWEEP] Sweep failed: {}", e);
                    }
                    tokio::time::sleep(sweep_interval).await;
                }
                info!("[OVERDUE_SWEEP] Stopped");
            })
        };

        vec![schedule_loop, sweep_loop]
    }

    /// Loops exit after their current sleep.
    pub async fn stop(&self) {
        *self.is_running.write().await = false;
    }
}

/// One schedule pass across every tenant, as of today (UTC).
pub async fn run_schedule_pass(state: &AppState) -> anyhow::Result<Vec<ProcessSummary>> {
    let today = Utc::now().date_naive();
    let summaries = state.schedules().process_all_tenants(today).await?;

    let created: usize = summaries.iter().map(|s| s.created).sum();
    if created > 0 {
        info!(
            schedules = summaries.len(),
            created,
            "[SCHEDULE_RUNNER] Expanded due schedules"
        );
    }
    Ok(summaries)
}

pub async fn run_overdue_sweep(state: &AppState) -> anyhow::Result<SweepSummary> {
    Ok(state.assignments().sweep_all_tenants(Utc::now()).await?)
}
