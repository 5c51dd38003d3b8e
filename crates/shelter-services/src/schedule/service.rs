use chrono::{DateTime, Local};
use cron::Schedule;
use shelter_core::models::Frequency;
use shelter_core::settings::keys;
use shelter_core::{BackupError, BackupResult, SettingsStore};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::backup::BackupOrchestrator;

/// A recurring trigger currently armed
struct ArmedTrigger {
    frequency: Frequency,
    schedule: Schedule,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Arms at most one recurring backup trigger from the `backup_frequency` setting
pub struct ScheduleController {
    orchestrator: Arc<BackupOrchestrator>,
    settings: Arc<dyn SettingsStore>,
    armed: Mutex<Option<ArmedTrigger>>,
}

impl ScheduleController {
    pub fn new(
        orchestrator: Arc<BackupOrchestrator>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            orchestrator,
            settings,
            armed: Mutex::new(None),
        }
    }

    /// Disarm any armed trigger, then arm one for the stored frequency.
    ///
    /// Returns the frequency now in effect. Calling this repeatedly never
    /// leaves more than one trigger armed.
    pub async fn reschedule(&self) -> BackupResult<Frequency> {
        let frequency = self.stored_frequency().await?;
        let mut armed = self.armed.lock().await;

        if let Some(previous) = armed.take() {
            previous.cancel.cancel();
            tracing::info!(frequency = %previous.frequency, "Backup schedule disarmed");
        }

        if let Some(expression) = frequency.cron_expression() {
            let schedule = Schedule::from_str(expression).map_err(|e| {
                BackupError::Config(format!("Invalid schedule '{}': {}", expression, e))
            })?;
            let trigger = self.arm(frequency, schedule);
            tracing::info!(
                frequency = %frequency,
                next_fire = ?trigger.schedule.upcoming(Local).next(),
                "Backup schedule armed"
            );
            *armed = Some(trigger);
        }

        Ok(frequency)
    }

    /// Re-arm only when the stored frequency differs from the armed one.
    /// Returns whether anything changed.
    pub async fn reschedule_if_changed(&self) -> BackupResult<bool> {
        let stored = self.stored_frequency().await?;
        if stored == self.armed_frequency().await {
            return Ok(false);
        }
        self.reschedule().await?;
        Ok(true)
    }

    /// Frequency of the armed trigger, `Never` when nothing is armed
    pub async fn armed_frequency(&self) -> Frequency {
        self.armed
            .lock()
            .await
            .as_ref()
            .map(|t| t.frequency)
            .unwrap_or(Frequency::Never)
    }

    pub async fn is_armed(&self) -> bool {
        self.armed.lock().await.is_some()
    }

    pub async fn next_fire_time(&self) -> Option<DateTime<Local>> {
        self.armed
            .lock()
            .await
            .as_ref()
            .and_then(|t| t.schedule.upcoming(Local).next())
    }

    /// Disarm and wait for the trigger task to exit. A run already in
    /// progress is allowed to finish.
    pub async fn stop(&self) {
        let trigger = self.armed.lock().await.take();
        if let Some(trigger) = trigger {
            trigger.cancel.cancel();
            if let Err(e) = trigger.handle.await {
                tracing::warn!(error = %e, "Backup schedule task ended abnormally");
            }
            tracing::info!("Backup schedule stopped");
        }
    }

    /// Poll the frequency setting until `shutdown` is cancelled, then stop.
    pub async fn watch(self: Arc<Self>, poll: Duration, shutdown: CancellationToken) {
        let mut poll_interval = interval(poll);

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    if let Err(e) = self.reschedule_if_changed().await {
                        tracing::error!(error = %e, "Failed to refresh backup schedule");
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::info!("Schedule watcher shutting down");
                    break;
                }
            }
        }

        self.stop().await;
    }

    async fn stored_frequency(&self) -> BackupResult<Frequency> {
        let raw = self.settings.get(keys::BACKUP_FREQUENCY).await?;
        Ok(Frequency::from_setting(raw.as_deref()))
    }

    fn arm(&self, frequency: Frequency, schedule: Schedule) -> ArmedTrigger {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(trigger_loop(
            self.orchestrator.clone(),
            schedule.clone(),
            cancel.clone(),
        ));
        ArmedTrigger {
            frequency,
            schedule,
            cancel,
            handle,
        }
    }
}

async fn trigger_loop(
    orchestrator: Arc<BackupOrchestrator>,
    schedule: Schedule,
    cancel: CancellationToken,
) {
    loop {
        let Some(next) = schedule.upcoming(Local).next() else {
            tracing::warn!("Backup schedule has no upcoming fire time");
            break;
        };
        let wait = (next - Local::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {
                tracing::info!(scheduled_for = %next, "Scheduled backup firing");
                let run = orchestrator.run(None).await;
                tracing::info!(
                    run_name = %run.name,
                    status = %run.status,
                    storage_class = %run.storage_class,
                    "Scheduled backup finished"
                );
            }
        }
    }
}
