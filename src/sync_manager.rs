use std::sync::Arc;

use crate::config::SyncManagerConfig;
use crate::dataset::Dataset;
use crate::error::{Result, SyncError};
use crate::identity::{IdentityBinding, IdentityProvider};
use crate::local_store::LocalStore;
use crate::model::{validate_name, DatasetMetadata};
use crate::remote_store::{RemoteStore, RemoteTransport};

/// Top-level entry point: owns the local/remote stores and the identity
/// binding shared by every `Dataset` handed out.
pub struct SyncManager {
    local: Arc<LocalStore>,
    remote: Arc<RemoteStore>,
    identity: Arc<IdentityBinding>,
    config: SyncManagerConfig,
}

impl SyncManager {
    pub fn new(
        identity_pool_id: impl Into<String>,
        local_store_path: &str,
        transport: Box<dyn RemoteTransport>,
        identity_provider: Box<dyn IdentityProvider>,
        config: SyncManagerConfig,
    ) -> Result<Self> {
        let local = Arc::new(LocalStore::open(local_store_path, config.clone())?);
        Self::with_local_store(identity_pool_id, local, transport, identity_provider, config)
    }

    pub fn open_in_memory(
        identity_pool_id: impl Into<String>,
        transport: Box<dyn RemoteTransport>,
        identity_provider: Box<dyn IdentityProvider>,
        config: SyncManagerConfig,
    ) -> Result<Self> {
        let local = Arc::new(LocalStore::open_in_memory(config.clone())?);
        Self::with_local_store(identity_pool_id, local, transport, identity_provider, config)
    }

    fn with_local_store(
        identity_pool_id: impl Into<String>,
        local: Arc<LocalStore>,
        transport: Box<dyn RemoteTransport>,
        identity_provider: Box<dyn IdentityProvider>,
        config: SyncManagerConfig,
    ) -> Result<Self> {
        let identity = Arc::new(IdentityBinding::new(identity_provider, local.clone()));
        let remote = Arc::new(RemoteStore::new(
            identity_pool_id,
            transport,
            identity.clone(),
            config.clone(),
        ));
        Ok(SyncManager {
            local,
            remote,
            identity,
            config,
        })
    }

    /// Opens a handle to `name`, creating the local dataset row lazily.
    /// Fails with `IllegalState` if `name` is locally marked deleted
    /// (`last_sync_count = -1`) and pending remote confirmation; the caller
    /// must run `refresh_dataset_metadata` first.
    pub fn open_or_create_dataset(&self, name: &str) -> Result<Dataset> {
        validate_name("dataset name", name)?;
        let identity_id = self.identity.current();
        if let Some(existing) = self.local.get_dataset_metadata(&identity_id, name)? {
            if existing.is_pending_local_delete() {
                return Err(SyncError::IllegalState(format!(
                    "dataset '{name}' is pending local deletion; call refresh_dataset_metadata first"
                )));
            }
        } else {
            self.local.create_dataset(&identity_id, name)?;
        }
        Dataset::new(
            name,
            self.local.clone(),
            self.remote.clone(),
            self.identity.clone(),
            self.config.clone(),
        )
    }

    /// Locally cached metadata only; does not talk to the remote store.
    pub fn list_datasets(&self) -> Result<Vec<DatasetMetadata>> {
        let identity_id = self.identity.current();
        self.local.get_datasets(&identity_id)
    }

    /// Pulls the remote dataset list and upserts metadata locally. Record
    /// contents are untouched; only `Dataset::synchronize` moves data.
    pub fn refresh_dataset_metadata(&self) -> Result<()> {
        let identity_id = self.identity.current();
        let remote_datasets = self.remote.get_datasets()?;
        for remote in remote_datasets {
            self.local.update_dataset_metadata(
                &identity_id,
                &remote.name,
                remote.creation_date,
                remote.last_modified_date,
                remote.last_modified_by.as_deref(),
            )?;
        }
        Ok(())
    }

    /// Invalidates the cached identity id and erases every locally stored
    /// dataset and record, for every identity.
    pub fn wipe_data(&self) -> Result<()> {
        self.identity.invalidate_cache();
        self.local.wipe_data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::UnboundIdentityProvider;
    use crate::model::{RemoteDatasetMetadata, DatasetsPage};
    use crate::remote_store::TransportError;

    struct EmptyTransport;

    impl RemoteTransport for EmptyTransport {
        fn list_datasets(
            &self,
            _identity_pool_id: &str,
            _identity_id: &str,
            _next_token: Option<&str>,
            _max_results: u32,
        ) -> std::result::Result<DatasetsPage, TransportError> {
            Ok(DatasetsPage {
                datasets: vec![RemoteDatasetMetadata {
                    name: "prefs".to_string(),
                    creation_date: 10,
                    last_modified_date: 20,
                    last_modified_by: Some("device-a".to_string()),
                    storage_size_bytes: 0,
                    record_count: 0,
                    dataset_sync_count: 0,
                }],
                next_token: None,
            })
        }

        fn describe_dataset(
            &self,
            _identity_pool_id: &str,
            _identity_id: &str,
            name: &str,
        ) -> std::result::Result<RemoteDatasetMetadata, TransportError> {
            Err(TransportError::new(
                crate::remote_store::TransportErrorKind::ResourceNotFound,
                name,
            ))
        }

        fn list_records(
            &self,
            _identity_pool_id: &str,
            _identity_id: &str,
            _name: &str,
            _last_sync_count: i64,
            _next_token: Option<&str>,
            _max_results: u32,
        ) -> std::result::Result<crate::model::RecordsPage, TransportError> {
            Ok(crate::model::RecordsPage {
                records: vec![],
                sync_session_token: "token".to_string(),
                dataset_sync_count: 0,
                dataset_exists: false,
                dataset_deleted_after_requested_sync_count: false,
                merged_dataset_names: vec![],
                next_token: None,
            })
        }

        fn update_records(
            &self,
            _identity_pool_id: &str,
            _identity_id: &str,
            _name: &str,
            _sync_session_token: &str,
            _patches: &[crate::model::RecordPatch],
        ) -> std::result::Result<Vec<crate::model::Record>, TransportError> {
            Ok(vec![])
        }

        fn delete_dataset(
            &self,
            _identity_pool_id: &str,
            _identity_id: &str,
            _name: &str,
        ) -> std::result::Result<(), TransportError> {
            Ok(())
        }
    }

    fn manager() -> SyncManager {
        SyncManager::open_in_memory(
            "pool-1",
            Box::new(EmptyTransport),
            Box::new(UnboundIdentityProvider),
            SyncManagerConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn open_or_create_then_list_round_trips() {
        let manager = manager();
        let dataset = manager.open_or_create_dataset("prefs").unwrap();
        dataset.put("k", Some("v")).unwrap();
        let datasets = manager.list_datasets().unwrap();
        assert_eq!(datasets.len(), 1);
        assert_eq!(datasets[0].name, "prefs");
    }

    #[test]
    fn refresh_pulls_remote_listing_into_local_metadata() {
        let manager = manager();
        manager.refresh_dataset_metadata().unwrap();
        let datasets = manager.list_datasets().unwrap();
        assert_eq!(datasets.len(), 1);
        assert_eq!(datasets[0].name, "prefs");
        assert_eq!(datasets[0].last_modified_by.as_deref(), Some("device-a"));
    }

    #[test]
    fn reopening_a_pending_local_delete_fails_until_refreshed() {
        let manager = manager();
        let dataset = manager.open_or_create_dataset("prefs").unwrap();
        dataset.delete().unwrap();
        drop(dataset);

        let err = manager.open_or_create_dataset("prefs").unwrap_err();
        assert!(matches!(err, SyncError::IllegalState(_)));
    }

    #[test]
    fn wipe_data_clears_every_identity() {
        let manager = manager();
        manager.open_or_create_dataset("prefs").unwrap().put("k", Some("v")).unwrap();
        manager.wipe_data().unwrap();
        assert!(manager.list_datasets().unwrap().is_empty());
    }
}
