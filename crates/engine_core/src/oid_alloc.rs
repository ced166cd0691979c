//! Deterministic-enough, globally-unique OID allocation (spec.md §9).
//!
//! A per-replica monotonic counter is embedded in the `localId` component
//! of a child OID so that two replicas observing the same `initialize`
//! operation agree on the sub-object OIDs it created, while replicas
//! allocating independently never collide (the replica id is also folded
//! into the local id).

use std::sync::atomic::{
    AtomicU64,
    Ordering,
};

use sync_types::{
    Oid,
    ReplicaId,
};

pub struct OidAllocator {
    replica_id: ReplicaId,
    counter: AtomicU64,
}

impl OidAllocator {
    pub fn new(replica_id: ReplicaId) -> Self {
        Self { replica_id, counter: AtomicU64::new(0) }
    }

    pub fn new_root(&self, collection: &str) -> Oid {
        let local_id = self.next_local_id();
        Oid::root(collection, &local_id)
    }

    pub fn new_child(&self, root: &Oid, field_path: &str) -> Oid {
        let local_id = self.next_local_id();
        root.child(field_path, &local_id)
    }

    fn next_local_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{n}", self.replica_id)
    }
}
