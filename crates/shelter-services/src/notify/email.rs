//! Email notifier for backup outcomes via SMTP.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use shelter_core::settings::keys;
use shelter_core::{
    BackupError, BackupNotification, BackupNotifier, BackupResult, Config, SettingsStore,
};
use std::sync::Arc;

/// Sends one plain-text email per finished run.
///
/// The recipient is the `notification_email` setting, falling back to
/// `smtp_user`. No recipient means nothing is sent.
#[derive(Clone)]
pub struct EmailNotifier {
    mailer: Arc<AsyncSmtpTransport<Tokio1Executor>>,
    from: String,
    settings: Arc<dyn SettingsStore>,
}

impl EmailNotifier {
    /// Create from config. Returns `None` if disabled or SMTP is not configured.
    pub fn from_config(config: &Config, settings: Arc<dyn SettingsStore>) -> Option<Self> {
        if !config.email_notifications_enabled {
            tracing::debug!("Email notifications disabled (EMAIL_NOTIFICATIONS_ENABLED=false)");
            return None;
        }
        let host = config.smtp_host.as_deref()?;
        let from = config.smtp_from.clone()?;
        let credentials = match (&config.smtp_user, &config.smtp_password) {
            (Some(u), Some(p)) => Some(Credentials::new(u.clone(), p.clone())),
            _ => None,
        };

        let mailer = if config.smtp_tls {
            let builder = match AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host) {
                Ok(b) => b.port(config.smtp_port),
                Err(e) => {
                    tracing::error!(host = %host, error = %e, "Invalid SMTP relay");
                    return None;
                }
            };
            let builder = match credentials {
                Some(c) => builder.credentials(c),
                None => builder,
            };
            tracing::info!(
                host = %host,
                port = config.smtp_port,
                "Email notifier initialized (SMTP with STARTTLS)"
            );
            builder.build()
        } else {
            let builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
                .port(config.smtp_port);
            let builder = match credentials {
                Some(c) => builder.credentials(c),
                None => builder,
            };
            tracing::info!(
                host = %host,
                port = config.smtp_port,
                "Email notifier initialized (SMTP)"
            );
            builder.build()
        };

        Some(Self {
            mailer: Arc::new(mailer),
            from,
            settings,
        })
    }

    async fn recipient(&self) -> BackupResult<Option<String>> {
        if let Some(to) = self.settings.get_non_empty(keys::NOTIFICATION_EMAIL).await? {
            return Ok(Some(to));
        }
        self.settings.get_non_empty(keys::SMTP_USER).await
    }
}

/// Subject and body for a notification
pub fn compose(notification: &BackupNotification, company: Option<&str>) -> (String, String) {
    let outcome = if notification.success {
        "completed"
    } else {
        "FAILED"
    };
    let subject = match company {
        Some(company) => format!(
            "[{}] Backup {}: {}",
            company, outcome, notification.backup_name
        ),
        None => format!("Backup {}: {}", outcome, notification.backup_name),
    };
    let body = format!(
        "Backup: {}\nStatus: {}\nTime: {}\nLocation: {}\n\nLog:\n{}\n",
        notification.backup_name,
        outcome,
        notification.timestamp.to_rfc3339(),
        notification.location,
        notification.details
    );
    (subject, body)
}

#[async_trait]
impl BackupNotifier for EmailNotifier {
    async fn notify(&self, notification: &BackupNotification) -> BackupResult<()> {
        let Some(to) = self.recipient().await? else {
            tracing::debug!("No notification recipient configured, skipping email");
            return Ok(());
        };
        let company = self.settings.get_non_empty(keys::COMPANY_NAME).await?;
        let (subject, body) = compose(notification, company.as_deref());

        let to_addr: Mailbox = to
            .parse()
            .map_err(|e| BackupError::Notification(format!("Invalid recipient {}: {}", to, e)))?;
        let from_addr: Mailbox = self
            .from
            .parse()
            .map_err(|e| BackupError::Notification(format!("Invalid SMTP_FROM: {}", e)))?;

        let email = Message::builder()
            .from(from_addr)
            .to(to_addr)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| BackupError::Notification(e.to_string()))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| BackupError::Notification(e.to_string()))?;
        tracing::info!(backup_name = %notification.backup_name, "Backup notification email sent");
        Ok(())
    }
}
