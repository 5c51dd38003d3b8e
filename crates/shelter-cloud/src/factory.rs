#[cfg(feature = "provider-gdrive")]
use crate::GDriveProvider;
#[cfg(feature = "provider-onedrive")]
use crate::OneDriveProvider;
use crate::{CloudProvider, CredentialStore, HttpOptions};
use shelter_core::models::ProviderKind;
use shelter_core::{BackupResult, SecretCodec, SettingsStore};
use std::sync::Arc;

/// Create the adapter for one provider
pub fn create_provider(
    kind: ProviderKind,
    settings: Arc<dyn SettingsStore>,
    codec: Arc<SecretCodec>,
    http: &HttpOptions,
) -> BackupResult<Arc<dyn CloudProvider>> {
    let store = CredentialStore::new(kind, settings, codec);

    match kind {
        #[cfg(feature = "provider-onedrive")]
        ProviderKind::OneDrive => Ok(Arc::new(OneDriveProvider::new(store, http)?)),

        #[cfg(not(feature = "provider-onedrive"))]
        ProviderKind::OneDrive => {
            let _ = (store, http);
            Err(shelter_core::BackupError::Config(
                "OneDrive provider requires the provider-onedrive feature".to_string(),
            ))
        }

        #[cfg(feature = "provider-gdrive")]
        ProviderKind::GDrive => Ok(Arc::new(GDriveProvider::new(store, http)?)),

        #[cfg(not(feature = "provider-gdrive"))]
        ProviderKind::GDrive => {
            let _ = (store, http);
            Err(shelter_core::BackupError::Config(
                "Google Drive provider requires the provider-gdrive feature".to_string(),
            ))
        }
    }
}

/// Whether the adapter for `kind` is compiled into this build
pub fn is_available(kind: ProviderKind) -> bool {
    match kind {
        ProviderKind::OneDrive => cfg!(feature = "provider-onedrive"),
        ProviderKind::GDrive => cfg!(feature = "provider-gdrive"),
    }
}

/// Create every provider compiled into this build
pub fn create_providers(
    settings: Arc<dyn SettingsStore>,
    codec: Arc<SecretCodec>,
    http: &HttpOptions,
) -> BackupResult<Vec<Arc<dyn CloudProvider>>> {
    ProviderKind::ALL
        .into_iter()
        .filter(|kind| is_available(*kind))
        .map(|kind| create_provider(kind, settings.clone(), codec.clone(), http))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelter_db::InMemorySettings;

    #[test]
    #[cfg(all(feature = "provider-onedrive", feature = "provider-gdrive"))]
    fn test_create_default_providers() {
        let providers = create_providers(
            Arc::new(InMemorySettings::new()),
            Arc::new(SecretCodec::new(None)),
            &HttpOptions::default(),
        )
        .unwrap();
        let kinds: Vec<_> = providers.iter().map(|p| p.kind()).collect();
        assert_eq!(kinds, vec![ProviderKind::OneDrive, ProviderKind::GDrive]);
    }

    #[test]
    fn test_unavailable_provider_is_config_error() {
        for kind in ProviderKind::ALL {
            let result = create_provider(
                kind,
                Arc::new(InMemorySettings::new()),
                Arc::new(SecretCodec::new(None)),
                &HttpOptions::default(),
            );
            match result {
                Ok(provider) => {
                    assert!(is_available(kind));
                    assert_eq!(provider.kind(), kind);
                }
                Err(e) => {
                    assert!(!is_available(kind));
                    assert!(matches!(e, shelter_core::BackupError::Config(_)));
                }
            }
        }
    }
}
