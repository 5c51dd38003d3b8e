//! Graph-style drive provider ("onedrive").
//!
//! Upload flow: ensure `/<folder>` under the drive root, open an upload
//! session for `/<folder>/<file>` with conflict behavior `replace`, then send
//! chunks that are multiples of 320 KiB. Intermediate chunks answer `202`,
//! the final chunk `200` or `201`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use shelter_core::models::{ProviderKind, TokenSet, UploadConfirmation};
use shelter_core::{BackupError, BackupResult};
use std::path::Path;

use crate::chunked::{ChunkPlan, ChunkedUpload};
use crate::credentials::CredentialStore;
use crate::http::{error_body, HttpOptions};
use crate::oauth::{self, Grant};
use crate::provider::CloudProvider;

/// 10 × 320 KiB
pub const CHUNK_SIZE: u64 = 3_276_800;
pub const CHUNK_ALIGNMENT: u64 = 327_680;

const PROVIDER: &str = "onedrive";
const SCOPE: &str = "Files.ReadWrite offline_access";

/// Endpoint locations, overridable for tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneDriveEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub api_base: String,
}

impl Default for OneDriveEndpoints {
    fn default() -> Self {
        Self {
            authorize_url: "https://login.microsoftonline.com/common/oauth2/v2.0/authorize"
                .to_string(),
            token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token".to_string(),
            api_base: "https://graph.microsoft.com/v1.0".to_string(),
        }
    }
}

impl OneDriveEndpoints {
    /// All endpoints under one base URL (`<base>/authorize`, `<base>/token`, `<base>`)
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            authorize_url: format!("{}/authorize", base),
            token_url: format!("{}/token", base),
            api_base: base.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadSession {
    #[serde(rename = "uploadUrl")]
    upload_url: String,
}

pub struct OneDriveProvider {
    client: Client,
    store: CredentialStore,
    endpoints: OneDriveEndpoints,
    plan: ChunkPlan,
}

impl OneDriveProvider {
    pub fn new(store: CredentialStore, http: &HttpOptions) -> BackupResult<Self> {
        Ok(Self {
            client: http.build_client()?,
            store,
            endpoints: OneDriveEndpoints::default(),
            plan: ChunkPlan::new(CHUNK_SIZE, CHUNK_ALIGNMENT)?,
        })
    }

    pub fn with_endpoints(mut self, endpoints: OneDriveEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Override the chunk size (still validated against the 320 KiB unit)
    pub fn with_chunk_size(mut self, chunk_size: u64) -> BackupResult<Self> {
        self.plan = ChunkPlan::new(chunk_size, CHUNK_ALIGNMENT)?;
        Ok(self)
    }

    fn api_url(&self, segments: &[&str]) -> BackupResult<Url> {
        let mut url = Url::parse(&self.endpoints.api_base)
            .map_err(|e| BackupError::Config(format!("Invalid OneDrive API base: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| BackupError::Config("OneDrive API base cannot have a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Look up `/<folder>` under the drive root, creating it on 404
    #[tracing::instrument(skip(self, token), fields(provider = PROVIDER))]
    async fn ensure_folder(&self, token: &str, folder: &str) -> BackupResult<()> {
        let lookup = self.api_url(&["me", "drive", "root:", folder])?;
        let response = self
            .client
            .get(lookup)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                BackupError::cloud_transfer(PROVIDER, 0, format!("Folder lookup failed: {}", e))
            })?;

        match response.status() {
            status if status.is_success() => return Ok(()),
            StatusCode::NOT_FOUND => {}
            status => {
                let body = error_body(response).await;
                return Err(BackupError::cloud_transfer(
                    PROVIDER,
                    0,
                    format!("Folder lookup returned {}: {}", status, body),
                ));
            }
        }

        let create = self.api_url(&["me", "drive", "root", "children"])?;
        let response = self
            .client
            .post(create)
            .bearer_auth(token)
            .json(&json!({
                "name": folder,
                "folder": {},
                "@microsoft.graph.conflictBehavior": "fail",
            }))
            .send()
            .await
            .map_err(|e| {
                BackupError::cloud_transfer(PROVIDER, 0, format!("Folder create failed: {}", e))
            })?;

        let status = response.status();
        // 409: created concurrently since the lookup
        if status.is_success() || status == StatusCode::CONFLICT {
            tracing::info!(folder, "Created remote backup folder");
            Ok(())
        } else {
            let body = error_body(response).await;
            Err(BackupError::cloud_transfer(
                PROVIDER,
                0,
                format!("Folder create returned {}: {}", status, body),
            ))
        }
    }

    async fn create_session(
        &self,
        token: &str,
        folder: &str,
        remote_name: &str,
    ) -> BackupResult<String> {
        let file_segment = format!("{}:", remote_name);
        let url = self.api_url(&[
            "me",
            "drive",
            "root:",
            folder,
            &file_segment,
            "createUploadSession",
        ])?;

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&json!({
                "item": {
                    "@microsoft.graph.conflictBehavior": "replace",
                    "name": remote_name,
                }
            }))
            .send()
            .await
            .map_err(|e| {
                BackupError::cloud_transfer(PROVIDER, 0, format!("Session request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(BackupError::cloud_transfer(
                PROVIDER,
                0,
                format!("Upload session returned {}: {}", status, body),
            ));
        }

        let session: UploadSession = response
            .json()
            .await
            .map_err(|e| {
                BackupError::cloud_transfer(PROVIDER, 0, format!("Invalid upload session: {}", e))
            })?;
        Ok(session.upload_url)
    }
}

fn accept_chunk(status: StatusCode, is_final: bool) -> bool {
    if is_final {
        status == StatusCode::OK || status == StatusCode::CREATED
    } else {
        status == StatusCode::ACCEPTED
    }
}

#[async_trait]
impl CloudProvider for OneDriveProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OneDrive
    }

    async fn get_auth_url(&self, redirect_uri: &str) -> BackupResult<String> {
        let client_id = self.store.client_id().await?;
        oauth::authorize_url(
            PROVIDER,
            &self.endpoints.authorize_url,
            &[
                ("client_id", client_id.as_str()),
                ("response_type", "code"),
                ("redirect_uri", redirect_uri),
                ("response_mode", "query"),
                ("scope", SCOPE),
            ],
        )
    }

    async fn connect(&self, code: &str, redirect_uri: &str) -> BackupResult<TokenSet> {
        let credentials = self.store.client_credentials().await?;
        let tokens = oauth::request_token(
            &self.client,
            PROVIDER,
            &self.endpoints.token_url,
            &credentials,
            Grant::AuthorizationCode { code, redirect_uri },
            Some(SCOPE),
        )
        .await?;

        self.store.store_access_token(&tokens.access_token).await?;
        match tokens.refresh_token.as_deref() {
            Some(refresh) => self.store.store_refresh_token(refresh).await?,
            None => {
                return Err(BackupError::cloud_auth(
                    PROVIDER,
                    "Authorization did not return a refresh token; offline_access was not granted",
                ))
            }
        }

        tracing::info!(provider = PROVIDER, "Account connected");
        Ok(tokens)
    }

    async fn refresh_token(&self) -> BackupResult<String> {
        let token_url = &self.endpoints.token_url;
        let tokens = oauth::refresh_stored(&self.client, &self.store, token_url, Some(SCOPE))
            .await?;
        self.store.store_access_token(&tokens.access_token).await?;
        Ok(tokens.access_token)
    }

    #[tracing::instrument(skip(self), fields(provider = PROVIDER))]
    async fn upload_file(
        &self,
        local_path: &Path,
        remote_name: &str,
        folder_name: &str,
    ) -> BackupResult<UploadConfirmation> {
        let token = self.refresh_token().await?;
        self.ensure_folder(&token, folder_name).await?;
        let session_url = self.create_session(&token, folder_name, remote_name).await?;

        let outcome = ChunkedUpload::new(&self.client, PROVIDER, self.plan)
            .send(&session_url, local_path, accept_chunk)
            .await?;

        let remote_id = outcome
            .final_body
            .as_ref()
            .and_then(|body| body.get("id"))
            .and_then(|id| id.as_str())
            .map(String::from);

        tracing::info!(
            remote_name,
            folder = folder_name,
            bytes = outcome.bytes,
            chunks = outcome.chunks,
            "Upload complete"
        );

        Ok(UploadConfirmation {
            provider: ProviderKind::OneDrive,
            remote_path: format!("{}/{}", folder_name, remote_name),
            remote_id,
            bytes: outcome.bytes,
        })
    }

    async fn is_configured(&self) -> BackupResult<bool> {
        self.store.is_configured().await
    }

    async fn folder_name(&self) -> BackupResult<String> {
        self.store.folder().await
    }
}
