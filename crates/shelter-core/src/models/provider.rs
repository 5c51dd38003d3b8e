use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Supported cloud storage providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OneDrive,
    GDrive,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::OneDrive, ProviderKind::GDrive];

    /// Settings key prefix and log name, e.g. `onedrive`
    pub fn key(&self) -> &'static str {
        match self {
            ProviderKind::OneDrive => "onedrive",
            ProviderKind::GDrive => "gdrive",
        }
    }

    /// Settings key for a credential field, e.g. `gdrive_refresh_token`
    pub fn setting(&self, field: &str) -> String {
        format!("{}_{}", self.key(), field)
    }
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.key())
    }
}

impl FromStr for ProviderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "onedrive" => Ok(ProviderKind::OneDrive),
            "gdrive" | "google-drive" | "googledrive" => Ok(ProviderKind::GDrive),
            _ => Err(anyhow::anyhow!("Unknown cloud provider: {}", s)),
        }
    }
}

/// Tokens returned by a provider token endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Client credentials needed for any token exchange
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Returned by a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadConfirmation {
    pub provider: ProviderKind,
    pub remote_path: String,
    pub remote_id: Option<String>,
    pub bytes: u64,
}
