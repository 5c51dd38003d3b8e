//! Drive-style provider ("gdrive") using resumable uploads.
//!
//! The backup folder is found by query or created. A same-named file in the
//! folder is replaced by opening the resumable session with `PATCH` on its id;
//! otherwise a new file is created with `POST`. The session URL comes back in
//! the `Location` header. Intermediate chunks answer `308`, the final chunk
//! `200` or `201`.

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{Client, StatusCode};
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

/// 40 × 256 KiB
pub const CHUNK_SIZE: u64 = 10_485_760;
pub const CHUNK_ALIGNMENT: u64 = 262_144;

const PROVIDER: &str = "gdrive";
const SCOPE: &str = "https://www.googleapis.com/auth/drive.file";
const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
const ARCHIVE_MIME_TYPE: &str = "application/zip";

/// Endpoint locations, overridable for tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GDriveEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    /// Base for `/drive/v3/files` and `/upload/drive/v3/files`
    pub api_base: String,
}

impl Default for GDriveEndpoints {
    fn default() -> Self {
        Self {
            authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            api_base: "https://www.googleapis.com".to_string(),
        }
    }
}

impl GDriveEndpoints {
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            authorize_url: format!("{}/auth", base),
            token_url: format!("{}/token", base),
            api_base: base.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileRef>,
}

#[derive(Debug, Deserialize)]
struct FileRef {
    id: String,
}

/// Quote a value for a Drive search query
fn query_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

pub struct GDriveProvider {
    client: Client,
    store: CredentialStore,
    endpoints: GDriveEndpoints,
    plan: ChunkPlan,
}

impl GDriveProvider {
    pub fn new(store: CredentialStore, http: &HttpOptions) -> BackupResult<Self> {
        Ok(Self {
            client: http.build_client()?,
            store,
            endpoints: GDriveEndpoints::default(),
            plan: ChunkPlan::new(CHUNK_SIZE, CHUNK_ALIGNMENT)?,
        })
    }

    pub fn with_endpoints(mut self, endpoints: GDriveEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Override the chunk size (still validated against the 256 KiB unit)
    pub fn with_chunk_size(mut self, chunk_size: u64) -> BackupResult<Self> {
        self.plan = ChunkPlan::new(chunk_size, CHUNK_ALIGNMENT)?;
        Ok(self)
    }

    fn files_url(&self) -> String {
        format!("{}/drive/v3/files", self.endpoints.api_base)
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/drive/v3/files", self.endpoints.api_base)
    }

    async fn find_one(&self, token: &str, query: &str) -> BackupResult<Option<String>> {
        let response = self
            .client
            .get(self.files_url())
            .bearer_auth(token)
            .query(&[
                ("q", query),
                ("fields", "files(id,name)"),
                ("spaces", "drive"),
            ])
            .send()
            .await
            .map_err(|e| {
                BackupError::cloud_transfer(PROVIDER, 0, format!("File query failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(BackupError::cloud_transfer(
                PROVIDER,
                0,
                format!("File query returned {}: {}", status, body),
            ));
        }

        let list: FileList = response
            .json()
            .await
            .map_err(|e| {
                BackupError::cloud_transfer(PROVIDER, 0, format!("Invalid file list: {}", e))
            })?;
        Ok(list.files.into_iter().next().map(|f| f.id))
    }

    /// Id of the backup folder, created when the query finds nothing
    #[tracing::instrument(skip(self, token), fields(provider = PROVIDER))]
    async fn ensure_folder(&self, token: &str, folder: &str) -> BackupResult<String> {
        let query = format!(
            "name={} and mimeType={} and trashed=false",
            query_literal(folder),
            query_literal(FOLDER_MIME_TYPE)
        );
        if let Some(id) = self.find_one(token, &query).await? {
            return Ok(id);
        }

        let response = self
            .client
            .post(self.files_url())
            .bearer_auth(token)
            .json(&json!({ "name": folder, "mimeType": FOLDER_MIME_TYPE }))
            .send()
            .await
            .map_err(|e| {
                BackupError::cloud_transfer(PROVIDER, 0, format!("Folder create failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(BackupError::cloud_transfer(
                PROVIDER,
                0,
                format!("Folder create returned {}: {}", status, body),
            ));
        }

        let created: FileRef = response
            .json()
            .await
            .map_err(|e| {
                BackupError::cloud_transfer(PROVIDER, 0, format!("Invalid folder response: {}", e))
            })?;
        tracing::info!(folder, folder_id = %created.id, "Created remote backup folder");
        Ok(created.id)
    }

    async fn create_session(
        &self,
        token: &str,
        folder_id: &str,
        remote_name: &str,
        size: u64,
    ) -> BackupResult<String> {
        let existing_query = format!(
            "name={} and {} in parents and trashed=false",
            query_literal(remote_name),
            query_literal(folder_id)
        );
        let existing = self.find_one(token, &existing_query).await?;

        let request = match &existing {
            Some(file_id) => {
                tracing::debug!(file_id = %file_id, remote_name, "Replacing existing remote file");
                self.client
                    .patch(format!("{}/{}", self.upload_url(), file_id))
                    .json(&json!({ "name": remote_name }))
            }
            None => self
                .client
                .post(self.upload_url())
                .json(&json!({ "name": remote_name, "parents": [folder_id] })),
        };

        let response = request
            .bearer_auth(token)
            .query(&[("uploadType", "resumable")])
            .header("X-Upload-Content-Type", ARCHIVE_MIME_TYPE)
            .header("X-Upload-Content-Length", size.to_string())
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
                format!("Resumable session returned {}: {}", status, body),
            ));
        }

        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or_else(|| {
                BackupError::cloud_transfer(
                    PROVIDER,
                    0,
                    "Resumable session response has no Location",
                )
            })
    }
}

fn accept_chunk(status: StatusCode, is_final: bool) -> bool {
    if is_final {
        status == StatusCode::OK || status == StatusCode::CREATED
    } else {
        status == StatusCode::PERMANENT_REDIRECT
    }
}

#[async_trait]
impl CloudProvider for GDriveProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GDrive
    }

    async fn get_auth_url(&self, redirect_uri: &str) -> BackupResult<String> {
        let client_id = self.store.client_id().await?;
        oauth::authorize_url(
            PROVIDER,
            &self.endpoints.authorize_url,
            &[
                ("client_id", client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
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
            None,
        )
        .await?;

        let refresh = tokens.refresh_token.as_deref().ok_or_else(|| {
            BackupError::cloud_auth(
                PROVIDER,
                "Authorization did not return a refresh token; revoke access and consent again",
            )
        })?;
        self.store.store_refresh_token(refresh).await?;

        tracing::info!(provider = PROVIDER, "Account connected");
        Ok(tokens)
    }

    async fn refresh_token(&self) -> BackupResult<String> {
        let token_url = &self.endpoints.token_url;
        let tokens = oauth::refresh_stored(&self.client, &self.store, token_url, None)
            .await?;
        Ok(tokens.access_token)
    }

    #[tracing::instrument(skip(self), fields(provider = PROVIDER))]
    async fn upload_file(
        &self,
        local_path: &Path,
        remote_name: &str,
        folder_name: &str,
    ) -> BackupResult<UploadConfirmation> {
        let size = tokio::fs::metadata(local_path)
            .await
            .map_err(|e| {
                let message = format!("Cannot stat {}: {}", local_path.display(), e);
                BackupError::cloud_transfer(PROVIDER, 0, message)
            })?
            .len();

        let token = self.refresh_token().await?;
        let folder_id = self.ensure_folder(&token, folder_name).await?;
        let session_url = self
            .create_session(&token, &folder_id, remote_name, size)
            .await?;

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
            provider: ProviderKind::GDrive,
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
