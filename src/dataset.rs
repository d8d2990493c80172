use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use crate::config::SyncManagerConfig;
use crate::error::{Result, SyncError};
use crate::identity::IdentityBinding;
use crate::local_store::LocalStore;
use crate::model::{validate_name, DatasetMetadata, Record, RecordPatch, LOCAL_DELETE_SYNC_COUNT};
use crate::remote_store::RemoteStore;

/// Disposition callbacks driving the sync state machine. Invoked on the
/// dataset's worker thread; the boolean returns are the sole cancellation
/// channel.
pub trait SyncCallback: Send {
    fn on_success(&mut self, dataset: &str, applied_records: Vec<Record>);
    fn on_failure(&mut self, dataset: &str, err: SyncError);
    /// `conflicts` pairs `(remote, local)` records whose values diverge.
    fn on_conflict(&mut self, dataset: &str, conflicts: &[(Record, Record)]) -> bool;
    fn on_dataset_deleted(&mut self, dataset: &str, name: &str) -> bool;
    fn on_datasets_merged(&mut self, dataset: &str, merged_names: &[String]) -> bool;
}

struct SyncContext {
    name: String,
    local: Arc<LocalStore>,
    remote: Arc<RemoteStore>,
    identity: Arc<IdentityBinding>,
    config: SyncManagerConfig,
}

enum Job {
    Sync(Box<dyn SyncCallback>),
}

/// One dedicated worker thread per `Dataset`, so `synchronize` never runs
/// on the caller's thread. A thread pool or shared task queue
/// would satisfy the same contract; this is the simplest realization.
struct Worker {
    tx: Option<mpsc::Sender<Job>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Worker {
    fn spawn(ctx: Arc<SyncContext>) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let thread_name = format!("dataset-sync-{}", ctx.name);
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                for job in rx {
                    match job {
                        Job::Sync(mut callback) => run_state_machine(&ctx, callback.as_mut()),
                    }
                }
            })
            .expect("failed to spawn dataset sync worker thread");
        Worker {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    fn submit(&self, callback: Box<dyn SyncCallback>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Job::Sync(callback));
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Per-dataset façade: local reads/writes plus the sync state machine.
pub struct Dataset {
    ctx: Arc<SyncContext>,
    worker: Worker,
}

impl Dataset {
    pub(crate) fn new(
        name: &str,
        local: Arc<LocalStore>,
        remote: Arc<RemoteStore>,
        identity: Arc<IdentityBinding>,
        config: SyncManagerConfig,
    ) -> Result<Self> {
        validate_name("dataset name", name)?;
        let ctx = Arc::new(SyncContext {
            name: name.to_string(),
            local,
            remote,
            identity,
            config,
        });
        let worker = Worker::spawn(ctx.clone());
        Ok(Dataset { ctx, worker })
    }

    pub fn name(&self) -> &str {
        &self.ctx.name
    }

    fn identity_id(&self) -> String {
        self.ctx.identity.current()
    }

    pub fn put(&self, key: &str, value: Option<&str>) -> Result<()> {
        validate_name("record key", key)?;
        self.ctx
            .local
            .put_value(&self.identity_id(), &self.ctx.name, key, value)
    }

    pub fn put_all(&self, entries: &HashMap<String, String>) -> Result<()> {
        for key in entries.keys() {
            validate_name("record key", key)?;
        }
        let rows: Vec<(String, Option<String>)> = entries
            .iter()
            .map(|(k, v)| (k.clone(), Some(v.clone())))
            .collect();
        self.ctx
            .local
            .put_all_values(&self.identity_id(), &self.ctx.name, &rows)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        validate_name("record key", key)?;
        self.ctx.local.get_value(&self.identity_id(), &self.ctx.name, key)
    }

    pub fn get_all(&self, keys: Option<&[String]>) -> Result<HashMap<String, String>> {
        let records = self
            .ctx
            .local
            .get_records(&self.identity_id(), &self.ctx.name, keys)?;
        Ok(records
            .into_iter()
            .filter(|r| !r.deleted)
            .filter_map(|r| r.value.map(|v| (r.key, v)))
            .collect())
    }

    /// `remove(k)` is `put(k, None)`: a local write, not a purge.
    pub fn remove(&self, key: &str) -> Result<()> {
        self.put(key, None)
    }

    pub fn is_changed(&self, key: &str) -> Result<bool> {
        Ok(self
            .ctx
            .local
            .get_record(&self.identity_id(), &self.ctx.name, key)?
            .map(|r| r.modified)
            .unwrap_or(false))
    }

    /// Marks the whole dataset for local deletion (`last_sync_count = -1`);
    /// the next successful `synchronize` pushes the deletion and purges.
    pub fn delete(&self) -> Result<()> {
        self.ctx.local.delete_dataset(&self.identity_id(), &self.ctx.name)
    }

    /// Force-writes remote-authoritative rows, used by the conflict
    /// callback to pick a winner.
    pub fn resolve(&self, records: &[Record]) -> Result<()> {
        self.ctx.local.put_records(&self.identity_id(), &self.ctx.name, records)
    }

    pub fn get_all_records(&self) -> Result<Vec<Record>> {
        self.ctx.local.get_records(&self.identity_id(), &self.ctx.name, None)
    }

    pub fn get_total_size_in_bytes(&self) -> Result<u64> {
        self.ctx.local.get_total_size_in_bytes(&self.identity_id())
    }

    pub fn get_size_in_bytes(&self) -> Result<u64> {
        self.ctx
            .local
            .get_size_in_bytes(&self.identity_id(), &self.ctx.name)
    }

    pub fn get_dataset_metadata(&self) -> Result<Option<DatasetMetadata>> {
        self.ctx
            .local
            .get_dataset_metadata(&self.identity_id(), &self.ctx.name)
    }

    /// Runs the sync state machine on this dataset's worker
    /// thread; `callback` is invoked there, never on the caller's thread.
    pub fn synchronize(&self, callback: Box<dyn SyncCallback>) {
        self.worker.submit(callback);
    }
}

macro_rules! try_or_fail {
    ($ctx:expr, $callback:expr, $expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(e) => {
                $callback.on_failure(&$ctx.name, e);
                return;
            }
        }
    };
}

fn run_state_machine(ctx: &SyncContext, callback: &mut dyn SyncCallback) {
    // S0 Start
    let identity_id = ctx.identity.current();
    let shadow_prefix = format!("{}.", ctx.name);
    let shadows: Vec<String> = try_or_fail!(ctx, callback, ctx.local.get_datasets(&identity_id))
        .into_iter()
        .map(|m| m.name)
        .filter(|n| n.starts_with(&shadow_prefix))
        .collect();
    if !shadows.is_empty() {
        tracing::debug!(dataset = %ctx.name, ?shadows, "surfacing merged dataset shadows");
        callback.on_datasets_merged(&ctx.name, &shadows);
    }

    let mut retries_left = ctx.config.max_retry as i64;
    let mut applied: Vec<Record> = Vec::new();

    loop {
        if retries_left < 0 {
            tracing::warn!(dataset = %ctx.name, "sync retries exhausted, giving up silently");
            return;
        }

        let identity_id = ctx.identity.current();

        // S1 LocalDeleteCheck
        let lsc = try_or_fail!(
            ctx,
            callback,
            ctx.local.get_last_sync_count(&identity_id, &ctx.name)
        );
        if lsc == LOCAL_DELETE_SYNC_COUNT {
            match ctx.remote.delete_dataset(&ctx.name) {
                Ok(()) => {
                    try_or_fail!(ctx, callback, ctx.local.purge_dataset(&identity_id, &ctx.name));
                    callback.on_success(&ctx.name, Vec::new());
                    return;
                }
                Err(e) => {
                    callback.on_failure(&ctx.name, e);
                    return;
                }
            }
        }

        // S2 PullRemoteDelta
        let updates = try_or_fail!(ctx, callback, ctx.remote.list_updates(&ctx.name, lsc));

        if !updates.merged_dataset_names.is_empty() {
            let should_continue = callback.on_datasets_merged(&ctx.name, &updates.merged_dataset_names);
            if should_continue {
                retries_left -= 1;
                continue;
            }
            callback.on_failure(&ctx.name, SyncError::ManualCancel);
            return;
        }

        if (lsc != 0 && !updates.exists) || updates.deleted {
            let should_purge = callback.on_dataset_deleted(&ctx.name, &ctx.name);
            if should_purge {
                try_or_fail!(ctx, callback, ctx.local.delete_dataset(&identity_id, &ctx.name));
                try_or_fail!(ctx, callback, ctx.local.purge_dataset(&identity_id, &ctx.name));
                callback.on_success(&ctx.name, Vec::new());
                return;
            }
            callback.on_failure(&ctx.name, SyncError::ManualCancel);
            return;
        }

        // S3 ConflictDetect
        let mut conflicts: Vec<(Record, Record)> = Vec::new();
        for remote_record in &updates.records {
            let local_record = try_or_fail!(
                ctx,
                callback,
                ctx.local.get_record(&identity_id, &ctx.name, &remote_record.key)
            );
            if let Some(local_record) = local_record {
                if local_record.modified && !local_record.value_matches(remote_record) {
                    conflicts.push((remote_record.clone(), local_record));
                }
            }
        }
        if !conflicts.is_empty() {
            let should_continue = callback.on_conflict(&ctx.name, &conflicts);
            if should_continue {
                retries_left -= 1;
                continue;
            }
            // Spec preserves this: the session ends without on_failure.
            return;
        }

        // S4 ApplyRemote
        try_or_fail!(
            ctx,
            callback,
            ctx.local.put_records(&identity_id, &ctx.name, &updates.records)
        );
        try_or_fail!(
            ctx,
            callback,
            ctx.local
                .update_last_sync_count(&identity_id, &ctx.name, updates.sync_count)
        );
        applied = updates.records;

        // S5 PushLocal
        let changes = try_or_fail!(
            ctx,
            callback,
            ctx.local.get_modified_records(&identity_id, &ctx.name)
        );
        if !changes.is_empty() {
            let patches: Vec<RecordPatch> = changes.iter().map(RecordPatch::from_record).collect();
            match ctx
                .remote
                .put_records(&ctx.name, &patches, &updates.sync_session_token)
            {
                Ok(result) => {
                    try_or_fail!(ctx, callback, ctx.local.put_records(&identity_id, &ctx.name, &result));
                    if let Some(new_sync_count) = result.iter().map(|r| r.sync_count).max() {
                        if new_sync_count as i64 == lsc + 1 {
                            try_or_fail!(
                                ctx,
                                callback,
                                ctx.local
                                    .update_last_sync_count(&identity_id, &ctx.name, new_sync_count as i64)
                            );
                        }
                    }
                }
                Err(SyncError::DataConflict(_)) => {
                    retries_left -= 1;
                    continue;
                }
                Err(e) => {
                    callback.on_failure(&ctx.name, e);
                    return;
                }
            }
        }

        // S6 Success
        callback.on_success(&ctx.name, applied);
        return;
    }
}
