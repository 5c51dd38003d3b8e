//! OAuth2 authorization-code and refresh-token exchange shared by all providers

use reqwest::{Client, Url};
use shelter_core::models::{ClientCredentials, TokenSet};
use shelter_core::{BackupError, BackupResult};

use crate::credentials::CredentialStore;
use crate::http::error_body;

/// Grant presented at a token endpoint
#[derive(Debug, Clone, Copy)]
pub enum Grant<'a> {
    AuthorizationCode { code: &'a str, redirect_uri: &'a str },
    RefreshToken { refresh_token: &'a str },
}

impl Grant<'_> {
    fn grant_type(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode { .. } => "authorization_code",
            Grant::RefreshToken { .. } => "refresh_token",
        }
    }
}

/// Build an authorization endpoint URL with properly encoded query parameters
pub fn authorize_url(
    provider: &'static str,
    endpoint: &str,
    params: &[(&str, &str)],
) -> BackupResult<String> {
    Url::parse_with_params(endpoint, params)
        .map(String::from)
        .map_err(|e| {
            BackupError::cloud_auth(provider, format!("Invalid authorize endpoint: {}", e))
        })
}

/// Exchange a grant for tokens at `token_url` (form-encoded POST)
#[tracing::instrument(skip_all, fields(provider = provider, grant_type = grant.grant_type()))]
pub async fn request_token(
    client: &Client,
    provider: &'static str,
    token_url: &str,
    credentials: &ClientCredentials,
    grant: Grant<'_>,
    scope: Option<&str>,
) -> BackupResult<TokenSet> {
    let mut params = vec![
        ("client_id", credentials.client_id.as_str()),
        ("client_secret", credentials.client_secret.as_str()),
        ("grant_type", grant.grant_type()),
    ];
    match grant {
        Grant::AuthorizationCode { code, redirect_uri } => {
            params.push(("code", code));
            params.push(("redirect_uri", redirect_uri));
        }
        Grant::RefreshToken { refresh_token } => {
            params.push(("refresh_token", refresh_token));
        }
    }
    if let Some(scope) = scope {
        params.push(("scope", scope));
    }

    let response = client
        .post(token_url)
        .form(&params)
        .send()
        .await
        .map_err(|e| BackupError::cloud_auth(provider, format!("Token request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = error_body(response).await;
        return Err(BackupError::cloud_auth(
            provider,
            format!("Token endpoint returned {}: {}", status, body),
        ));
    }

    let tokens: TokenSet = response
        .json()
        .await
        .map_err(|e| BackupError::cloud_auth(provider, format!("Invalid token response: {}", e)))?;

    if tokens.access_token.is_empty() {
        return Err(BackupError::cloud_auth(
            provider,
            "Token response has no access_token",
        ));
    }

    tracing::debug!(
        rotated_refresh_token = tokens.refresh_token.is_some(),
        expires_in = ?tokens.expires_in,
        "Token exchange succeeded"
    );
    Ok(tokens)
}

/// Refresh grant using the stored refresh token.
///
/// Fails with `CloudAuth` before any network call when nothing is on file.
/// A rotated refresh token in the response is persisted (encrypted) before
/// the tokens are returned.
pub async fn refresh_stored(
    client: &Client,
    store: &CredentialStore,
    token_url: &str,
    scope: Option<&str>,
) -> BackupResult<TokenSet> {
    let provider = store.kind().key();
    let refresh_token = store.refresh_token().await?.ok_or_else(|| {
        BackupError::cloud_auth(
            provider,
            "No refresh token on file, connect the account first",
        )
    })?;
    let credentials = store.client_credentials().await?;

    let tokens = request_token(
        client,
        provider,
        token_url,
        &credentials,
        Grant::RefreshToken {
            refresh_token: &refresh_token,
        },
        scope,
    )
    .await?;

    if let Some(rotated) = tokens.refresh_token.as_deref() {
        if rotated != refresh_token {
            store.store_refresh_token(rotated).await?;
            tracing::info!(provider, "Persisted rotated refresh token");
        }
    }
    Ok(tokens)
}
