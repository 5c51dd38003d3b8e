use anyhow::Context;
use shelter_cloud::{create_provider, create_providers, CloudProvider, HttpOptions};
use shelter_core::models::ProviderKind;
use shelter_core::{BackupLogSink, Config, SecretCodec, SettingsStore};
use shelter_db::{BackupLogRepository, SettingsRepository};
use shelter_services::{BackupOrchestrator, ScheduleController};
use std::sync::Arc;

/// Default filter when `RUST_LOG` is unset
const DEFAULT_LOG_FILTER: &str = "shelter=info";

/// Initialize tracing for the CLI. `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Everything a command needs, wired from configuration
pub struct AppContext {
    pub config: Config,
    pub settings: Arc<dyn SettingsStore>,
    pub log_sink: Arc<dyn BackupLogSink>,
    pub codec: Arc<SecretCodec>,
    pub http: HttpOptions,
    pub orchestrator: Arc<BackupOrchestrator>,
}

impl AppContext {
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let pool = shelter_db::connect(&config.settings_database_url)
            .await
            .context("Failed to open settings database")?;
        shelter_db::ensure_schema(&pool)
            .await
            .context("Failed to prepare settings schema")?;

        let settings: Arc<dyn SettingsStore> = Arc::new(SettingsRepository::new(pool.clone()));
        let log_sink: Arc<dyn BackupLogSink> = Arc::new(BackupLogRepository::new(pool));

        let codec = Arc::new(SecretCodec::new(config.secret_key.as_deref()));
        if codec.uses_fallback_key() {
            tracing::warn!(
                "SHELTER_SECRET_KEY is not set; provider tokens use the built-in fallback key"
            );
        }

        let http = HttpOptions::from_config(&config);
        let providers = create_providers(settings.clone(), codec.clone(), &http)
            .context("Failed to create cloud providers")?;

        let mut orchestrator = BackupOrchestrator::new(
            config.paths.clone(),
            config.keep_count,
            settings.clone(),
            log_sink.clone(),
        )
        .with_providers(providers);

        let notifier = shelter_services::EmailNotifier::from_config(&config, settings.clone());
        if let Some(notifier) = notifier {
            orchestrator = orchestrator.with_notifier(Arc::new(notifier));
        }

        Ok(Self {
            config,
            settings,
            log_sink,
            codec,
            http,
            orchestrator: Arc::new(orchestrator),
        })
    }

    pub fn provider(&self, kind: ProviderKind) -> anyhow::Result<Arc<dyn CloudProvider>> {
        create_provider(kind, self.settings.clone(), self.codec.clone(), &self.http)
            .with_context(|| format!("Provider {} is unavailable", kind))
    }

    pub fn schedule_controller(&self) -> Arc<ScheduleController> {
        Arc::new(ScheduleController::new(
            self.orchestrator.clone(),
            self.settings.clone(),
        ))
    }
}
