use reqwest::redirect::Policy;
use reqwest::Client;
use shelter_core::{BackupError, BackupResult, Config};
use std::time::Duration;

/// Timeouts applied to every provider HTTP call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpOptions {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(15),
        }
    }
}

impl HttpOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: Duration::from_secs(config.http_timeout_secs),
            connect_timeout: Duration::from_secs(config.http_connect_timeout_secs),
        }
    }

    /// Redirects are not followed: resumable chunk endpoints answer
    /// `308 Resume Incomplete` without a `Location`.
    pub fn build_client(&self) -> BackupResult<Client> {
        Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|e| BackupError::Config(format!("Failed to create HTTP client: {}", e)))
    }
}

/// Response body for error messages, truncated to `MAX_LEN` bytes
pub(crate) async fn error_body(response: reqwest::Response) -> String {
    const MAX_LEN: usize = 512;
    let mut text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    if text.len() > MAX_LEN {
        let mut cut = MAX_LEN;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...");
    }
    text
}
