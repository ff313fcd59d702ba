use super::config::load_config;
use super::sync::{build_orchestrator, report_summary};
use crate::output::Output;
use bangumi_sync_config::{PathManager, SchedulerConfig};
use bangumi_sync_core::{RunOutcome, SyncOrchestrator};
use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cron-driven sync loop. Runs never overlap: a tick that fires while the
/// previous run is still going is skipped.
pub struct Scheduler {
    scheduler: JobScheduler,
    orchestrator: Arc<SyncOrchestrator>,
    config: SchedulerConfig,
    running: Arc<Mutex<()>>,
    stop: CancellationToken,
}

impl Scheduler {
    pub async fn new(orchestrator: SyncOrchestrator, config: SchedulerConfig, stop: CancellationToken) -> Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to create scheduler: {}", e))?;

        Ok(Self {
            scheduler,
            orchestrator: Arc::new(orchestrator),
            config,
            running: Arc::new(Mutex::new(())),
            stop,
        })
    }

    pub async fn start(&mut self, output: &Output) -> Result<()> {
        if self.config.run_on_startup {
            info!(operation = "scheduler_startup", "Running initial sync on startup");
            let _guard = self.running.lock().await;
            let summary = self.orchestrator.sync(self.stop.child_token()).await;
            report_summary(&summary, output);
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let running = Arc::clone(&self.running);
        let stop = self.stop.clone();
        let job = Job::new_async(self.config.schedule.as_str(), move |_id, _scheduler| {
            let orchestrator = Arc::clone(&orchestrator);
            let running = Arc::clone(&running);
            let stop = stop.clone();
            Box::pin(async move {
                let Ok(_guard) = running.try_lock() else {
                    warn!(operation = "scheduled_sync_skipped", "Previous sync still running, skipping this tick");
                    return;
                };
                if stop.is_cancelled() {
                    return;
                }
                info!(operation = "scheduled_sync_start", "Starting scheduled sync");
                let summary = orchestrator.sync(stop.child_token()).await;
                log_outcome(&summary.outcome, summary.elapsed_ms, summary.error_count);
            })
        })
        .map_err(|e| color_eyre::eyre::eyre!("Invalid schedule '{}': {}", self.config.schedule, e))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to add sync job: {}", e))?;
        self.scheduler
            .start()
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to start scheduler: {}", e))?;

        info!(
            operation = "scheduler_started",
            schedule = %self.config.schedule,
            "Scheduler started"
        );
        Ok(())
    }

    /// Cancel any in-flight run, wait for it to commit, then stop ticking
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stop.cancel();
        let _guard = self.running.lock().await;
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| color_eyre::eyre::eyre!("Failed to stop scheduler: {}", e))?;
        info!(operation = "scheduler_stopped", "Scheduler stopped");
        Ok(())
    }
}

fn log_outcome(outcome: &RunOutcome, elapsed_ms: u64, error_count: usize) {
    match outcome {
        RunOutcome::Completed => info!(
            operation = "scheduled_sync_complete",
            duration_ms = elapsed_ms,
            "Scheduled sync completed"
        ),
        RunOutcome::Partial | RunOutcome::Cancelled => warn!(
            operation = "scheduled_sync_partial",
            duration_ms = elapsed_ms,
            errors = error_count,
            outcome = ?outcome,
            "Scheduled sync stopped early"
        ),
        RunOutcome::Aborted { reason } => tracing::error!(
            operation = "scheduled_sync_error",
            duration_ms = elapsed_ms,
            error = %reason,
            "Scheduled sync aborted"
        ),
    }
}

/// Merge the configured scheduler with command-line overrides
fn resolve_scheduler_config(
    configured: Option<&SchedulerConfig>,
    schedule_override: Option<String>,
    no_startup_sync: bool,
) -> SchedulerConfig {
    let base = configured.cloned().unwrap_or_else(bangumi_sync_config::config::default_scheduler_config);
    SchedulerConfig {
        schedule: schedule_override.unwrap_or(base.schedule),
        run_on_startup: base.run_on_startup && !no_startup_sync,
    }
}

pub async fn run_daemon(schedule_override: Option<String>, no_startup_sync: bool, output: &Output) -> Result<()> {
    let path_manager = PathManager::default();
    let config = load_config(&path_manager)?;
    config
        .validate()
        .map_err(|e| color_eyre::eyre::eyre!("Invalid configuration: {}", e))?;

    let scheduler_config = resolve_scheduler_config(config.scheduler.as_ref(), schedule_override, no_startup_sync);
    let orchestrator = build_orchestrator(&config, &path_manager, output)?;

    let stop = CancellationToken::new();
    let mut scheduler = Scheduler::new(orchestrator, scheduler_config.clone(), stop.clone()).await?;

    let interrupt = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(operation = "daemon_interrupt", "Interrupt received, shutting down");
            interrupt.cancel();
        }
    });

    scheduler.start(output).await?;
    output.info(format!("Daemon running with schedule '{}'. Press Ctrl-C to stop.", scheduler_config.schedule));

    stop.cancelled().await;
    scheduler.shutdown().await?;
    output.success("Daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_overrides() {
        let configured = SchedulerConfig {
            schedule: "0 0 * * * *".to_string(),
            run_on_startup: true,
        };

        let resolved = resolve_scheduler_config(Some(&configured), None, false);
        assert_eq!(resolved.schedule, "0 0 * * * *");
        assert!(resolved.run_on_startup);

        let resolved = resolve_scheduler_config(Some(&configured), Some("0 */5 * * * *".to_string()), true);
        assert_eq!(resolved.schedule, "0 */5 * * * *");
        assert!(!resolved.run_on_startup);
    }

    #[test]
    fn test_default_scheduler_when_unconfigured() {
        let resolved = resolve_scheduler_config(None, None, false);
        assert_eq!(resolved.schedule, "0 0 */6 * * *");
        assert!(resolved.run_on_startup);
    }
}
