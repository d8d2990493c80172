pub mod config;
pub mod dataset;
pub mod error;
pub mod identity;
pub mod local_store;
pub mod model;
pub mod remote_store;
pub mod sync_manager;

pub use config::SyncManagerConfig;
pub use dataset::{Dataset, SyncCallback};
pub use error::{Result, SyncError};
pub use identity::{IdentityBinding, IdentityProvider, UnboundIdentityProvider};
pub use local_store::LocalStore;
pub use model::{
    DatasetMetadata, DatasetUpdates, DatasetsPage, PatchOp, Record, RecordPatch, RecordsPage,
    RemoteDatasetMetadata,
};
pub use remote_store::{RemoteStore, RemoteTransport, TransportError, TransportErrorKind};
pub use sync_manager::SyncManager;
