//! Shelter Cloud Library
//!
//! Off-box replication to third-party cloud storage. Every provider sits behind
//! the [`CloudProvider`] trait and shares the OAuth2 token exchange in
//! [`oauth`] and the sequential chunked upload loop in [`chunked`].
//!
//! Providers are feature-gated:
//! - `provider-onedrive`: Graph-style drive API with 320 KiB aligned chunks
//! - `provider-gdrive`: Drive-style resumable uploads with 256 KiB aligned chunks

pub mod chunked;
pub mod credentials;
pub mod factory;
pub mod http;
pub mod oauth;
pub mod provider;

#[cfg(feature = "provider-gdrive")]
pub mod gdrive;
#[cfg(feature = "provider-onedrive")]
pub mod onedrive;

pub use chunked::{ChunkPlan, ChunkedUpload};
pub use credentials::{CredentialStore, DEFAULT_FOLDER};
pub use factory::{create_provider, create_providers, is_available};
pub use http::HttpOptions;
pub use provider::CloudProvider;

#[cfg(feature = "provider-gdrive")]
pub use gdrive::{GDriveEndpoints, GDriveProvider};
#[cfg(feature = "provider-onedrive")]
pub use onedrive::{OneDriveEndpoints, OneDriveProvider};
