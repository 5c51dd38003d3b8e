//! Configuration module
//!
//! Process-level configuration comes from the environment (optionally a `.env`
//! file). Runtime settings that operators change through the host application
//! (backup path, frequency, provider credentials) live in the settings store
//! instead, see [`crate::settings`].

use std::env;
use std::path::{Path, PathBuf};

// Common constants
const KEEP_COUNT: usize = 3;
const HTTP_TIMEOUT_SECS: u64 = 120;
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 15;
const SCHEDULE_POLL_SECS: u64 = 60;
const SMTP_PORT: u16 = 587;

/// Filesystem locations the backup engine reads from and writes to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupPaths {
    /// Live database file
    pub database_file: PathBuf,
    /// Live uploads directory
    pub uploads_dir: PathBuf,
    /// Directory holding run directories and transient archives
    pub backup_root: PathBuf,
}

impl BackupPaths {
    /// Default layout under an application root: `dev.db` (or `prod.db`),
    /// `uploads/` and `backups/`.
    pub fn under_root(root: impl AsRef<Path>, production: bool) -> Self {
        let root = root.as_ref();
        let db_name = if production { "prod.db" } else { "dev.db" };
        Self {
            database_file: root.join(db_name),
            uploads_dir: root.join("uploads"),
            backup_root: root.join("backups"),
        }
    }

    /// File name of the live database, used as the archive entry name
    pub fn database_file_name(&self) -> String {
        self.database_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "database.db".to_string())
    }
}

/// Application configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    pub paths: BackupPaths,
    pub keep_count: usize,
    /// Operator secret for credential encryption; `None` selects the fallback key
    pub secret_key: Option<String>,
    pub multi_tenant: bool,
    pub settings_database_url: String,
    pub http_timeout_secs: u64,
    pub http_connect_timeout_secs: u64,
    pub schedule_poll_secs: u64,
    // Email notifications
    pub email_notifications_enabled: bool,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,
    pub smtp_tls: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source (tests use a map).
    pub fn from_vars<F>(var: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| var(key).filter(|s| !s.trim().is_empty());
        let flag = |key: &str, default: bool| {
            var(key)
                .map(|s| crate::settings::parse_bool(&s))
                .unwrap_or(default)
        };

        let environment = var("ENVIRONMENT")
            .or_else(|| var("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());
        let production = is_production_env(&environment);

        let root = PathBuf::from(non_empty("SHELTER_ROOT").unwrap_or_else(|| ".".to_string()));
        let mut paths = BackupPaths::under_root(&root, production);
        if let Some(db) = non_empty("SHELTER_DATABASE_PATH") {
            paths.database_file = PathBuf::from(db);
        }
        if let Some(uploads) = non_empty("SHELTER_UPLOADS_DIR") {
            paths.uploads_dir = PathBuf::from(uploads);
        }
        if let Some(backups) = non_empty("SHELTER_BACKUP_ROOT") {
            paths.backup_root = PathBuf::from(backups);
        }

        let settings_database_url = non_empty("SHELTER_SETTINGS_DATABASE_URL")
            .unwrap_or_else(|| format!("sqlite://{}", paths.database_file.display()));

        let config = Config {
            environment,
            keep_count: var("SHELTER_KEEP_COUNT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(KEEP_COUNT),
            secret_key: non_empty("SHELTER_SECRET_KEY"),
            multi_tenant: flag("SHELTER_MULTI_TENANT", false),
            settings_database_url,
            http_timeout_secs: var("SHELTER_HTTP_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(HTTP_TIMEOUT_SECS),
            http_connect_timeout_secs: var("SHELTER_HTTP_CONNECT_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(HTTP_CONNECT_TIMEOUT_SECS),
            schedule_poll_secs: var("SHELTER_SCHEDULE_POLL_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(SCHEDULE_POLL_SECS),
            email_notifications_enabled: flag("EMAIL_NOTIFICATIONS_ENABLED", false),
            smtp_host: non_empty("SMTP_HOST"),
            smtp_port: var("SMTP_PORT")
                .and_then(|s| s.parse().ok())
                .filter(|&p| p > 0)
                .unwrap_or(SMTP_PORT),
            smtp_user: non_empty("SMTP_USER"),
            smtp_password: non_empty("SMTP_PASSWORD"),
            smtp_from: non_empty("SMTP_FROM"),
            smtp_tls: flag("SMTP_TLS", true),
            paths,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        is_production_env(&self.environment)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.keep_count == 0 {
            return Err(anyhow::anyhow!("SHELTER_KEEP_COUNT must be at least 1"));
        }

        if self.secret_key.is_none() && (self.is_production() || self.multi_tenant) {
            return Err(anyhow::anyhow!(
                "SHELTER_SECRET_KEY must be set in production or multi-tenant deployments; \
                 the built-in fallback key only protects single-tenant local installs"
            ));
        }

        if self.email_notifications_enabled
            && (self.smtp_host.is_none() || self.smtp_from.is_none())
        {
            return Err(anyhow::anyhow!(
                "EMAIL_NOTIFICATIONS_ENABLED=true requires SMTP_HOST and SMTP_FROM to be set"
            ));
        }

        Ok(())
    }
}

fn is_production_env(environment: &str) -> bool {
    let env = environment.to_lowercase();
    env == "production" || env == "prod"
}
