//! Provider credentials in the settings store.
//!
//! Keys are `<provider>_<field>`: `enabled`, `client_id`, `client_secret`,
//! `refresh_token`, `access_token`, `folder`. Tokens are always written
//! encrypted and read through [`SecretCodec::decrypt_or_passthrough`] so
//! values stored before encryption was introduced keep working.

use shelter_core::models::{ClientCredentials, ProviderKind};
use shelter_core::{BackupError, BackupResult, SecretCodec, SettingsStore};
use std::sync::Arc;

/// Remote folder used when `<provider>_folder` is unset
pub const DEFAULT_FOLDER: &str = "Backups";

/// Settings-backed credential access for one provider
#[derive(Clone)]
pub struct CredentialStore {
    kind: ProviderKind,
    settings: Arc<dyn SettingsStore>,
    codec: Arc<SecretCodec>,
}

impl CredentialStore {
    pub fn new(
        kind: ProviderKind,
        settings: Arc<dyn SettingsStore>,
        codec: Arc<SecretCodec>,
    ) -> Self {
        Self {
            kind,
            settings,
            codec,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Enabled flag set and every field needed for an unattended upload present
    pub async fn is_configured(&self) -> BackupResult<bool> {
        if !self.settings.get_bool(&self.kind.setting("enabled")).await? {
            return Ok(false);
        }
        for field in ["client_id", "client_secret", "refresh_token"] {
            if self
                .settings
                .get_non_empty(&self.kind.setting(field))
                .await?
                .is_none()
            {
                tracing::debug!(
                    provider = %self.kind,
                    field,
                    "Provider enabled but not fully configured"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub async fn client_credentials(&self) -> BackupResult<ClientCredentials> {
        let client_id = self.required("client_id").await?;
        let client_secret = self.required("client_secret").await?;
        Ok(ClientCredentials {
            client_id,
            client_secret: self.codec.decrypt_or_passthrough(&client_secret),
        })
    }

    pub async fn client_id(&self) -> BackupResult<String> {
        self.required("client_id").await
    }

    /// Decrypted refresh token, `None` when nothing is on file
    pub async fn refresh_token(&self) -> BackupResult<Option<String>> {
        Ok(self
            .settings
            .get_non_empty(&self.kind.setting("refresh_token"))
            .await?
            .map(|stored| self.codec.decrypt_or_passthrough(&stored)))
    }

    pub async fn store_refresh_token(&self, token: &str) -> BackupResult<()> {
        self.store_encrypted("refresh_token", token).await
    }

    pub async fn store_access_token(&self, token: &str) -> BackupResult<()> {
        self.store_encrypted("access_token", token).await
    }

    pub async fn folder(&self) -> BackupResult<String> {
        Ok(self
            .settings
            .get_non_empty(&self.kind.setting("folder"))
            .await?
            .unwrap_or_else(|| DEFAULT_FOLDER.to_string()))
    }

    async fn store_encrypted(&self, field: &str, plaintext: &str) -> BackupResult<()> {
        let encrypted = self.codec.encrypt(plaintext)?;
        self.settings
            .set(&self.kind.setting(field), &encrypted)
            .await?;
        tracing::debug!(provider = %self.kind, field, "Stored encrypted token");
        Ok(())
    }

    async fn required(&self, field: &str) -> BackupResult<String> {
        let key = self.kind.setting(field);
        self.settings.get_non_empty(&key).await?.ok_or_else(|| {
            BackupError::cloud_auth(self.kind.key(), format!("{} is not configured", key))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelter_db::InMemorySettings;

    fn store(values: &[(&str, &str)]) -> (InMemorySettings, CredentialStore) {
        let settings = InMemorySettings::with_values(values.iter().copied());
        let store = CredentialStore::new(
            ProviderKind::GDrive,
            Arc::new(settings.clone()),
            Arc::new(SecretCodec::new(Some("test-secret"))),
        );
        (settings, store)
    }

    #[tokio::test]
    async fn test_is_configured_requires_all_fields() {
        let (_, partial) = store(&[
            ("gdrive_enabled", "true"),
            ("gdrive_client_id", "id"),
            ("gdrive_client_secret", "secret"),
        ]);
        assert!(!partial.is_configured().await.unwrap());

        let (_, disabled) = store(&[
            ("gdrive_enabled", "false"),
            ("gdrive_client_id", "id"),
            ("gdrive_client_secret", "secret"),
            ("gdrive_refresh_token", "rt"),
        ]);
        assert!(!disabled.is_configured().await.unwrap());

        let (_, full) = store(&[
            ("gdrive_enabled", "1"),
            ("gdrive_client_id", "id"),
            ("gdrive_client_secret", "secret"),
            ("gdrive_refresh_token", "rt"),
        ]);
        assert!(full.is_configured().await.unwrap());
    }

    #[tokio::test]
    async fn test_tokens_are_stored_encrypted() {
        let (settings, store) = store(&[]);
        store.store_refresh_token("plain-refresh").await.unwrap();

        let raw = settings.snapshot()["gdrive_refresh_token"].clone();
        assert_ne!(raw, "plain-refresh");
        assert_eq!(
            store.refresh_token().await.unwrap().as_deref(),
            Some("plain-refresh")
        );
    }

    #[tokio::test]
    async fn test_legacy_plaintext_token_passes_through() {
        let (_, store) = store(&[("gdrive_refresh_token", "legacy-token")]);
        assert_eq!(
            store.refresh_token().await.unwrap().as_deref(),
            Some("legacy-token")
        );
        assert_eq!(store.folder().await.unwrap(), DEFAULT_FOLDER);
    }
}
