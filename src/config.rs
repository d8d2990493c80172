/// Tunables for a [`crate::sync_manager::SyncManager`].
#[derive(Debug, Clone)]
pub struct SyncManagerConfig {
    /// Number of times the sync state machine may re-enter S1 before giving
    /// up.
    pub max_retry: u32,

    /// Page size used when paginating `RemoteTransport::get_datasets` and
    /// `RemoteTransport::list_updates`. Purely a transport-side concern; the
    /// adapter concatenates pages before returning.
    pub datasets_page_size: u32,
    pub records_page_size: u32,

    /// Local pre-check caps, enforced before any network round trip.
    /// `None` disables the corresponding check.
    pub max_dataset_size_bytes: Option<u64>,
    pub max_datasets_per_identity: Option<u64>,
}

impl Default for SyncManagerConfig {
    fn default() -> Self {
        Self {
            max_retry: 3,
            datasets_page_size: 64,
            records_page_size: 1024,
            max_dataset_size_bytes: Some(1024 * 1024),
            max_datasets_per_identity: Some(20),
        }
    }
}
