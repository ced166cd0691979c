//! Top-level, process-wide map from library id to its `Authority`.
//!
//! Grounded on `sync::worker::SyncWorker`'s construction pattern (one
//! worker per backend instance, held behind an `Arc`) generalised to one
//! `Authority` per library, created lazily on first access and torn down
//! explicitly — spec.md §9's "global mutable state, scoped per library,
//! created on first access, destroyed on library close".

use std::{
    collections::HashMap,
    sync::Arc,
};

use engine_core::{
    BaselineStorage,
    OperationLogStorage,
};

use crate::authority::{
    Authority,
    LibraryConfig,
};

pub type LibraryId = String;

/// A pair of storage backends handed to a freshly created `Authority`.
/// Kept as a small struct rather than two loose trait-object arguments so
/// a storage backend factory only has one thing to implement.
pub trait LibraryStorageFactory: Send + Sync {
    fn open(&self, library_id: &LibraryId) -> (Arc<dyn OperationLogStorage>, Arc<dyn BaselineStorage>);
}

#[derive(Default)]
pub struct AuthorityRegistry {
    config: LibraryConfig,
    libraries: parking_lot::Mutex<HashMap<LibraryId, Arc<Authority>>>,
}

impl AuthorityRegistry {
    pub fn new(config: LibraryConfig) -> Self {
        Self { config, libraries: parking_lot::Mutex::new(HashMap::new()) }
    }

    /// Fetch the `Authority` for this library, creating it (and spawning
    /// its background rebase loop) on first access.
    pub fn get_or_create(
        &self,
        library_id: &LibraryId,
        storage: &dyn LibraryStorageFactory,
    ) -> Arc<Authority> {
        let mut libraries = self.libraries.lock();
        if let Some(authority) = libraries.get(library_id) {
            return authority.clone();
        }
        let (log_storage, baseline_storage) = storage.open(library_id);
        let authority = Arc::new(Authority::new(self.config, log_storage, baseline_storage));
        tokio::spawn(authority.clone().rebase_loop());
        libraries.insert(library_id.clone(), authority.clone());
        authority
    }

    /// Destroy a library's in-memory `Authority`. The background rebase
    /// loop holds its own `Arc` clone and exits once no handle remains and
    /// its `Notify` is dropped with it — callers that need an immediate
    /// stop should track the `tokio::spawn` `JoinHandle` separately.
    pub fn close(&self, library_id: &LibraryId) {
        self.libraries.lock().remove(library_id);
    }

    pub fn is_loaded(&self, library_id: &LibraryId) -> bool {
        self.libraries.lock().contains_key(library_id)
    }
}

#[cfg(test)]
mod tests {
    use engine_core::{
        InMemoryBaselineStorage,
        InMemoryOperationLogStorage,
    };

    use super::*;

    struct InMemoryFactory;

    impl LibraryStorageFactory for InMemoryFactory {
        fn open(&self, _library_id: &LibraryId) -> (Arc<dyn OperationLogStorage>, Arc<dyn BaselineStorage>) {
            (Arc::new(InMemoryOperationLogStorage::new()), Arc::new(InMemoryBaselineStorage::new()))
        }
    }

    #[tokio::test]
    async fn repeated_access_returns_the_same_authority() {
        let registry = AuthorityRegistry::new(LibraryConfig::default());
        let factory = InMemoryFactory;
        let id = "lib-1".to_string();
        let a = registry.get_or_create(&id, &factory);
        let b = registry.get_or_create(&id, &factory);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn close_then_reopen_yields_a_fresh_authority() {
        let registry = AuthorityRegistry::new(LibraryConfig::default());
        let factory = InMemoryFactory;
        let id = "lib-1".to_string();
        let a = registry.get_or_create(&id, &factory);
        registry.close(&id);
        assert!(!registry.is_loaded(&id));
        let b = registry.get_or_create(&id, &factory);
        assert!(!Arc::ptr_eq(&a, &b));
    }
}
