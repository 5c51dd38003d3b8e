//! Cloud provider abstraction trait

use async_trait::async_trait;
use shelter_core::models::{ProviderKind, TokenSet, UploadConfirmation};
use shelter_core::BackupResult;
use std::path::Path;

/// OAuth2-protected remote storage that accepts chunked uploads.
///
/// Failures are [`shelter_core::BackupError::CloudAuth`] for anything that
/// goes wrong obtaining a token and [`shelter_core::BackupError::CloudTransfer`]
/// for folder, session and chunk failures.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Authorization endpoint URL for the consent screen, requesting offline access
    async fn get_auth_url(&self, redirect_uri: &str) -> BackupResult<String>;

    /// Exchange a single-use authorization code and persist the resulting tokens
    async fn connect(&self, code: &str, redirect_uri: &str) -> BackupResult<TokenSet>;

    /// Obtain a fresh access token from the stored refresh token.
    ///
    /// Fails without any network call when no refresh token is stored. A
    /// rotated refresh token is persisted before returning.
    async fn refresh_token(&self) -> BackupResult<String>;

    /// Upload a local file into `folder_name`, replacing a same-named file
    async fn upload_file(
        &self,
        local_path: &Path,
        remote_name: &str,
        folder_name: &str,
    ) -> BackupResult<UploadConfirmation>;

    /// Whether the provider is enabled with all credentials present
    async fn is_configured(&self) -> BackupResult<bool>;

    /// Configured remote folder name
    async fn folder_name(&self) -> BackupResult<String>;
}
