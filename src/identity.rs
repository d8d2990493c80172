use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::local_store::LocalStore;
use crate::model::UNKNOWN_IDENTITY_ID;

/// Supplies the current identity id and notifies subscribers of identity
/// transitions. Implementations typically wrap a credentials
/// SDK; this crate only defines the seam.
pub trait IdentityProvider: Send + Sync {
    /// Never returns empty. Returns [`UNKNOWN_IDENTITY_ID`] only if no real
    /// identity has been established yet.
    fn current_identity_id(&self) -> String;
}

/// A provider with no backing credentials SDK; always reports the
/// `UNKNOWN` sentinel. Useful before login and in tests.
pub struct UnboundIdentityProvider;

impl IdentityProvider for UnboundIdentityProvider {
    fn current_identity_id(&self) -> String {
        UNKNOWN_IDENTITY_ID.to_string()
    }
}

/// Owns the current identity id, rekeys `LocalStore` on transition, and
/// invalidates cached copies held by `Dataset`/`SyncManager`.
///
/// Single-writer: `on_identity_changed` is expected to be called from one
/// place (the credentials provider's callback thread); readers call
/// `current` from any thread.
pub struct IdentityBinding {
    provider: Box<dyn IdentityProvider>,
    current: Mutex<String>,
    store: Arc<LocalStore>,
}

impl IdentityBinding {
    pub fn new(provider: Box<dyn IdentityProvider>, store: Arc<LocalStore>) -> Self {
        let current = provider.current_identity_id();
        Self {
            provider,
            current: Mutex::new(current),
            store,
        }
    }

    /// Current identity id, refreshed from the provider on every call so a
    /// transition missed by `on_identity_changed` is still observed
    /// eventually.
    pub fn current(&self) -> String {
        let fresh = self.provider.current_identity_id();
        let mut cached = self.current.lock();
        if *cached != fresh {
            tracing::debug!(old = %*cached, new = %fresh, "identity id changed on read");
            *cached = fresh.clone();
        }
        fresh
    }

    /// Forces the next `current()` call to re-query the provider rather
    /// than trust the cached value.
    pub fn invalidate_cache(&self) {
        *self.current.lock() = self.provider.current_identity_id();
    }

    /// Invoked by the credentials provider when it observes a transition
    /// `(old -> new)`. Rekeys `LocalStore` synchronously; `old` defaults to
    /// the `UNKNOWN` sentinel when there was no prior identity.
    pub fn on_identity_changed(&self, old: Option<&str>, new: &str) -> Result<()> {
        let old = old.unwrap_or(UNKNOWN_IDENTITY_ID);
        tracing::info!(old, new, "rekeying local store for identity change");
        self.store.change_identity_id(old, new)?;
        *self.current.lock() = new.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncManagerConfig;

    struct FixedProvider(Mutex<String>);

    impl IdentityProvider for FixedProvider {
        fn current_identity_id(&self) -> String {
            self.0.lock().clone()
        }
    }

    #[test]
    fn unbound_provider_reports_unknown() {
        let store = Arc::new(LocalStore::open_in_memory(SyncManagerConfig::default()).unwrap());
        let binding = IdentityBinding::new(Box::new(UnboundIdentityProvider), store);
        assert_eq!(binding.current(), UNKNOWN_IDENTITY_ID);
    }

    #[test]
    fn transition_rekeys_local_store() {
        let store = Arc::new(LocalStore::open_in_memory(SyncManagerConfig::default()).unwrap());
        store.put_value(UNKNOWN_IDENTITY_ID, "ds", "k", Some("v")).unwrap();
        let provider = FixedProvider(Mutex::new(UNKNOWN_IDENTITY_ID.to_string()));
        let binding = IdentityBinding::new(Box::new(provider), store.clone());

        binding.on_identity_changed(None, "id-42").unwrap();

        assert_eq!(binding.current(), "id-42");
        assert_eq!(
            store.get_value("id-42", "ds", "k").unwrap(),
            Some("v".into())
        );
        assert!(store.get_datasets(UNKNOWN_IDENTITY_ID).unwrap().is_empty());
    }
}
