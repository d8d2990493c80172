use std::fmt;
use std::sync::Arc;

use crate::config::SyncManagerConfig;
use crate::error::SyncError;
use crate::identity::IdentityBinding;
use crate::model::{DatasetUpdates, DatasetsPage, Record, RecordPatch, RecordsPage, RemoteDatasetMetadata};

/// Classifies a transport-level failure so `RemoteStore` can map it onto
/// the domain error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    ResourceNotFound,
    ResourceConflict,
    LimitExceeded,
    Io,
    Other,
}

/// The error type a [`RemoteTransport`] implementation returns. The adapter
/// maps `kind` onto [`SyncError`]; `message` and `source` are preserved for
/// logging and the cause chain.
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Debug for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TransportError {}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }
}

/// The five blocking RPCs a backend exposes. The remote transport itself
/// (HTTP client, retries, auth headers) is out of scope; this crate only
/// defines the seam and the adapter around it.
pub trait RemoteTransport: Send + Sync {
    fn list_datasets(
        &self,
        identity_pool_id: &str,
        identity_id: &str,
        next_token: Option<&str>,
        max_results: u32,
    ) -> Result<DatasetsPage, TransportError>;

    fn describe_dataset(
        &self,
        identity_pool_id: &str,
        identity_id: &str,
        name: &str,
    ) -> Result<RemoteDatasetMetadata, TransportError>;

    fn list_records(
        &self,
        identity_pool_id: &str,
        identity_id: &str,
        name: &str,
        last_sync_count: i64,
        next_token: Option<&str>,
        max_results: u32,
    ) -> Result<RecordsPage, TransportError>;

    fn update_records(
        &self,
        identity_pool_id: &str,
        identity_id: &str,
        name: &str,
        sync_session_token: &str,
        patches: &[RecordPatch],
    ) -> Result<Vec<Record>, TransportError>;

    fn delete_dataset(
        &self,
        identity_pool_id: &str,
        identity_id: &str,
        name: &str,
    ) -> Result<(), TransportError>;
}

/// Thin adapter over [`RemoteTransport`]: paginates list calls into a
/// single concatenated result, refreshes the identity id from
/// [`IdentityBinding`] before every call, and maps transport errors onto
/// [`SyncError`].
pub struct RemoteStore {
    identity_pool_id: String,
    transport: Box<dyn RemoteTransport>,
    identity: Arc<IdentityBinding>,
    config: SyncManagerConfig,
}

impl RemoteStore {
    pub fn new(
        identity_pool_id: impl Into<String>,
        transport: Box<dyn RemoteTransport>,
        identity: Arc<IdentityBinding>,
        config: SyncManagerConfig,
    ) -> Self {
        Self {
            identity_pool_id: identity_pool_id.into(),
            transport,
            identity,
            config,
        }
    }

    pub fn get_datasets(&self) -> Result<Vec<RemoteDatasetMetadata>, SyncError> {
        let identity_id = self.identity.current();
        let mut out = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let page = self
                .transport
                .list_datasets(
                    &self.identity_pool_id,
                    &identity_id,
                    next_token.as_deref(),
                    self.config.datasets_page_size,
                )
                .map_err(|e| map_transport_error(e, ""))?;
            out.extend(page.datasets);
            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }
        Ok(out)
    }

    pub fn get_dataset_metadata(
        &self,
        name: &str,
    ) -> Result<Option<RemoteDatasetMetadata>, SyncError> {
        let identity_id = self.identity.current();
        match self
            .transport
            .describe_dataset(&self.identity_pool_id, &identity_id, name)
        {
            Ok(meta) => Ok(Some(meta)),
            Err(e) if e.kind == TransportErrorKind::ResourceNotFound => Ok(None),
            Err(e) => Err(map_transport_error(e, name)),
        }
    }

    /// When `last_sync_count = 0` the server returns the full record set.
    pub fn list_updates(&self, name: &str, last_sync_count: i64) -> Result<DatasetUpdates, SyncError> {
        let identity_id = self.identity.current();
        let mut records = Vec::new();
        let mut next_token: Option<String> = None;
        let mut last_page: Option<RecordsPage> = None;
        let mut merged_dataset_names: Vec<String> = Vec::new();
        loop {
            let page = self
                .transport
                .list_records(
                    &self.identity_pool_id,
                    &identity_id,
                    name,
                    last_sync_count,
                    next_token.as_deref(),
                    self.config.records_page_size,
                )
                .map_err(|e| map_transport_error(e, name))?;
            for merged in &page.merged_dataset_names {
                if !merged_dataset_names.contains(merged) {
                    merged_dataset_names.push(merged.clone());
                }
            }
            records.extend(page.records.clone());
            let has_next = page.next_token.is_some();
            next_token = page.next_token.clone();
            last_page = Some(page);
            if !has_next {
                break;
            }
        }
        let last_page = last_page.expect("list_records always yields at least one page");
        Ok(DatasetUpdates {
            records,
            sync_count: last_page.dataset_sync_count,
            sync_session_token: last_page.sync_session_token,
            exists: last_page.dataset_exists,
            deleted: last_page.dataset_deleted_after_requested_sync_count,
            merged_dataset_names,
        })
    }

    /// The server accepts a batch atomically: either every patch applies or
    /// the whole batch is rejected with `DataConflict`.
    pub fn put_records(
        &self,
        name: &str,
        patches: &[RecordPatch],
        sync_session_token: &str,
    ) -> Result<Vec<Record>, SyncError> {
        let identity_id = self.identity.current();
        self.transport
            .update_records(
                &self.identity_pool_id,
                &identity_id,
                name,
                sync_session_token,
                patches,
            )
            .map_err(|e| map_transport_error(e, name))
    }

    pub fn delete_dataset(&self, name: &str) -> Result<(), SyncError> {
        let identity_id = self.identity.current();
        self.transport
            .delete_dataset(&self.identity_pool_id, &identity_id, name)
            .map_err(|e| map_transport_error(e, name))
    }
}

fn map_transport_error(e: TransportError, name: &str) -> SyncError {
    tracing::warn!(kind = ?e.kind, dataset = name, message = %e.message, "remote store call failed");
    match e.kind {
        TransportErrorKind::ResourceNotFound => SyncError::DatasetNotFound(name.to_string()),
        TransportErrorKind::ResourceConflict => SyncError::DataConflict(name.to_string()),
        TransportErrorKind::LimitExceeded => SyncError::DataLimitExceeded(e.message),
        TransportErrorKind::Io => SyncError::Network(Box::new(e)),
        TransportErrorKind::Other => SyncError::Network(Box::new(e)),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::FakeTransport;
    use super::*;
    use crate::local_store::LocalStore;
    use std::sync::Arc;

    fn binding() -> Arc<IdentityBinding> {
        let store = Arc::new(LocalStore::open_in_memory(SyncManagerConfig::default()).unwrap());
        Arc::new(IdentityBinding::new(
            Box::new(crate::identity::UnboundIdentityProvider),
            store,
        ))
    }

    #[test]
    fn describe_missing_dataset_maps_to_not_found_none() {
        let transport = Box::new(FakeTransport::new());
        let store = RemoteStore::new("pool", transport, binding(), SyncManagerConfig::default());
        assert!(store.get_dataset_metadata("missing").unwrap().is_none());
    }

    #[test]
    fn conflict_maps_to_data_conflict() {
        let transport = FakeTransport::new();
        transport
            .fail_update_with_conflict_once
            .lock()
            .insert("ds".to_string(), true);
        let store = RemoteStore::new(
            "pool",
            Box::new(transport),
            binding(),
            SyncManagerConfig::default(),
        );
        let err = store.put_records("ds", &[], "token").unwrap_err();
        assert!(matches!(err, SyncError::DataConflict(_)));
    }
}
