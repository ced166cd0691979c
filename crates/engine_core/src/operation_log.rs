//! Per-library append-only store of operations, keyed by `(oid,
//! timestamp)`. Grounded on `database::write_log::WriteLog`'s in-memory
//! entry map and idempotent-insert discipline.

use std::{
    collections::BTreeMap,
    sync::Arc,
};

use async_trait::async_trait;
use errors::ErrorMetadata;
use parking_lot::Mutex;
use sync_types::{
    HlcTimestamp,
    Oid,
    Operation,
    ReplicaId,
};

/// Storage backend for the operation log. The actual persistence backend
/// (relational/KV store) is out of scope for this core (spec.md §1); this
/// trait is the seam a real backend plugs into. `OperationLog` itself
/// contains all the behavior spec.md §4.1 specifies; implementations only
/// need to durably store and range-scan `(oid, timestamp)`-keyed rows.
#[async_trait]
pub trait OperationLogStorage: Send + Sync {
    /// Insert every op whose `(oid, timestamp)` isn't already present.
    /// Returns the ops that were actually newly inserted, in no particular
    /// order. MUST be atomic with respect to concurrent callers (duplicate
    /// `(oid, timestamp)` tuples must never be stored twice).
    async fn insert_all(&self, ops: Vec<Operation>) -> anyhow::Result<Vec<Operation>>;

    /// Every operation with `timestamp > after` (or all, if `after` is
    /// `None`), ascending.
    async fn get_after(&self, after: Option<&HlcTimestamp>) -> anyhow::Result<Vec<Operation>>;

    /// Every operation with `timestamp < before`, ascending.
    async fn get_before(&self, before: &HlcTimestamp) -> anyhow::Result<Vec<Operation>>;

    async fn get_for_oid(&self, oid: &Oid) -> anyhow::Result<Vec<Operation>>;

    /// Remove exactly these ops. Callers must have durably folded them into
    /// a baseline first (spec.md §4.2 `applyOperations`).
    async fn drop_ops(&self, ops: &[Operation]) -> anyhow::Result<()>;

    /// Remove every operation. Used when a replica discards its local view
    /// in favor of the authority's on `overwriteLocalData` (spec.md §4.5.2
    /// step 2).
    async fn clear(&self) -> anyhow::Result<()>;
}

pub struct OperationLog {
    storage: Arc<dyn OperationLogStorage>,
}

impl OperationLog {
    pub fn new(storage: Arc<dyn OperationLogStorage>) -> Self {
        Self { storage }
    }

    /// Idempotent on `(oid, timestamp)` (spec.md I4, §4.1). Operations that
    /// fail basic well-formedness checks are dropped with a `warn!` and
    /// never retried, per §4.1's failure policy — distinct from storage I/O
    /// errors, which are surfaced as fatal to the caller for retry.
    pub async fn insert_all(
        &self,
        replica_id: &ReplicaId,
        ops: Vec<Operation>,
    ) -> anyhow::Result<usize> {
        let (valid, dropped): (Vec<_>, Vec<_>) = ops.into_iter().partition(|op| well_formed(op));
        for op in &dropped {
            tracing::warn!(
                oid = %op.oid,
                replica_id = %replica_id,
                "dropping malformed operation"
            );
        }
        if valid.is_empty() {
            return Ok(0);
        }
        let inserted = self.storage.insert_all(valid).await.map_err(|e| {
            let msg = e.to_string();
            e.context(ErrorMetadata::storage_unavailable(msg))
        })?;
        tracing::debug!(
            count = inserted.len(),
            replica_id = %replica_id,
            "inserted operations"
        );
        Ok(inserted.len())
    }

    pub async fn get_after(&self, after: Option<&HlcTimestamp>) -> anyhow::Result<Vec<Operation>> {
        self.storage.get_after(after).await
    }

    pub async fn get_before(&self, before: &HlcTimestamp) -> anyhow::Result<Vec<Operation>> {
        self.storage.get_before(before).await
    }

    pub async fn get_for_oid(&self, oid: &Oid) -> anyhow::Result<Vec<Operation>> {
        self.storage.get_for_oid(oid).await
    }

    pub async fn drop(&self, ops: &[Operation]) -> anyhow::Result<()> {
        self.storage.drop_ops(ops).await
    }

    pub async fn clear(&self) -> anyhow::Result<()> {
        self.storage.clear().await
    }
}

fn well_formed(op: &Operation) -> bool {
    match &op.data {
        sync_types::OperationKind::Set { field, .. } | sync_types::OperationKind::Delete { field } => {
            !field.is_empty()
        },
        _ => true,
    }
}

/// In-memory `OperationLogStorage`, for tests and the demo binary.
#[derive(Default)]
pub struct InMemoryOperationLogStorage {
    rows: Mutex<BTreeMap<(Oid, HlcTimestamp), Operation>>,
}

impl InMemoryOperationLogStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OperationLogStorage for InMemoryOperationLogStorage {
    async fn insert_all(&self, ops: Vec<Operation>) -> anyhow::Result<Vec<Operation>> {
        let mut rows = self.rows.lock();
        let mut inserted = Vec::new();
        for op in ops {
            let key = (op.oid.clone(), op.timestamp.clone());
            if !rows.contains_key(&key) {
                rows.insert(key, op.clone());
                inserted.push(op);
            }
        }
        Ok(inserted)
    }

    async fn get_after(&self, after: Option<&HlcTimestamp>) -> anyhow::Result<Vec<Operation>> {
        let rows = self.rows.lock();
        Ok(rows
            .values()
            .filter(|op| match after {
                Some(t) => &op.timestamp > t,
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn get_before(&self, before: &HlcTimestamp) -> anyhow::Result<Vec<Operation>> {
        let rows = self.rows.lock();
        Ok(rows.values().filter(|op| &op.timestamp < before).cloned().collect())
    }

    async fn get_for_oid(&self, oid: &Oid) -> anyhow::Result<Vec<Operation>> {
        let rows = self.rows.lock();
        Ok(rows.values().filter(|op| &op.oid == oid).cloned().collect())
    }

    async fn drop_ops(&self, ops: &[Operation]) -> anyhow::Result<()> {
        let mut rows = self.rows.lock();
        for op in ops {
            rows.remove(&(op.oid.clone(), op.timestamp.clone()));
        }
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        self.rows.lock().clear();
        Ok(())
    }
}
