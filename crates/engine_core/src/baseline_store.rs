//! Per-library store of per-object compacted snapshots.

use std::{
    collections::BTreeMap,
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use sync_types::{
    Baseline,
    HlcTimestamp,
    Oid,
    Operation,
};

use crate::snapshot::apply_operations_to_value;

#[async_trait]
pub trait BaselineStorage: Send + Sync {
    async fn get(&self, oid: &Oid) -> anyhow::Result<Option<Baseline>>;

    /// Every baseline with `timestamp > after` (or all, if `None`).
    async fn get_all_after(&self, after: Option<&HlcTimestamp>) -> anyhow::Result<Vec<Baseline>>;

    async fn upsert(&self, baseline: Baseline) -> anyhow::Result<()>;

    /// Remove every baseline. Used when a replica discards its local view
    /// in favor of the authority's on `overwriteLocalData` (spec.md §4.5.2
    /// step 2).
    async fn clear(&self) -> anyhow::Result<()>;
}

pub struct BaselineStore {
    storage: Arc<dyn BaselineStorage>,
}

impl BaselineStore {
    pub fn new(storage: Arc<dyn BaselineStorage>) -> Self {
        Self { storage }
    }

    pub async fn get(&self, oid: &Oid) -> anyhow::Result<Option<Baseline>> {
        self.storage.get(oid).await
    }

    pub async fn get_all_after(&self, after: Option<&HlcTimestamp>) -> anyhow::Result<Vec<Baseline>> {
        self.storage.get_all_after(after).await
    }

    pub async fn upsert(&self, baseline: Baseline) -> anyhow::Result<()> {
        self.storage.upsert(baseline).await
    }

    pub async fn clear(&self) -> anyhow::Result<()> {
        self.storage.clear().await
    }

    /// Atomically fold `ops` (must be HLC-ordered, all for `oid`) into the
    /// existing baseline (or the empty object if none), writing a new
    /// baseline whose timestamp is the maximum op timestamp. The caller
    /// (the rebase pass, spec.md §4.4.5) is responsible for dropping `ops`
    /// from the `OperationLog` only after this returns `Ok`, so that a
    /// crash between the two never loses data (§5 "Persistence
    /// transactions").
    pub async fn apply_operations(&self, oid: &Oid, ops: &[Operation]) -> anyhow::Result<Baseline> {
        anyhow::ensure!(!ops.is_empty(), "apply_operations called with no operations");
        anyhow::ensure!(
            ops.iter().all(|op| &op.oid == oid),
            "apply_operations received an operation for a different oid"
        );
        let existing = self.storage.get(oid).await?;
        if let Some(existing) = &existing {
            anyhow::ensure!(
                ops.iter().all(|op| op.timestamp > existing.timestamp),
                "operation timestamp does not exceed existing baseline timestamp (I1)"
            );
        }
        let base_value = existing.as_ref().map(|b| b.snapshot.clone());
        let new_value = apply_operations_to_value(base_value, ops);
        let new_timestamp = ops.iter().map(|op| op.timestamp.clone()).max().unwrap();
        let baseline = Baseline { oid: oid.clone(), snapshot: new_value, timestamp: new_timestamp };
        self.storage.upsert(baseline.clone()).await?;
        Ok(baseline)
    }
}

#[derive(Default)]
pub struct InMemoryBaselineStorage {
    rows: Mutex<BTreeMap<Oid, Baseline>>,
}

impl InMemoryBaselineStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BaselineStorage for InMemoryBaselineStorage {
    async fn get(&self, oid: &Oid) -> anyhow::Result<Option<Baseline>> {
        Ok(self.rows.lock().get(oid).cloned())
    }

    async fn get_all_after(&self, after: Option<&HlcTimestamp>) -> anyhow::Result<Vec<Baseline>> {
        let rows = self.rows.lock();
        Ok(rows
            .values()
            .filter(|b| match after {
                Some(t) => &b.timestamp > t,
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn upsert(&self, baseline: Baseline) -> anyhow::Result<()> {
        // (I3) at most one baseline per OID: `insert` on a BTreeMap key
        // already enforces this by replacing the prior entry.
        self.rows.lock().insert(baseline.oid.clone(), baseline);
        Ok(())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        self.rows.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use sync_types::{
        OperationKind,
        ReplicaId,
        Value,
    };

    use super::*;

    fn op(oid: &Oid, ts: &str, data: OperationKind) -> Operation {
        Operation {
            oid: oid.clone(),
            timestamp: HlcTimestamp::from_raw(ts.to_string()),
            data,
            replica_id: ReplicaId::from("r1".to_string()),
        }
    }

    #[tokio::test]
    async fn apply_operations_folds_a_prefix_into_a_fresh_baseline() {
        let store = BaselineStore::new(Arc::new(InMemoryBaselineStorage::new()));
        let oid = Oid::root("items", "1");
        let ops = vec![
            op(&oid, "1-r1", OperationKind::Initialize { snapshot: Value::Object(Default::default()) }),
            op(&oid, "2-r1", OperationKind::Set { field: "name".into(), value: Value::from("apples") }),
        ];
        let baseline = store.apply_operations(&oid, &ops).await.unwrap();
        assert_eq!(baseline.timestamp, HlcTimestamp::from_raw("2-r1".to_string()));
        let Value::Object(fields) = baseline.snapshot else { panic!("expected object") };
        assert_eq!(fields.get("name"), Some(&Value::from("apples")));
    }

    #[tokio::test]
    async fn rejects_ops_not_newer_than_existing_baseline() {
        let store = BaselineStore::new(Arc::new(InMemoryBaselineStorage::new()));
        let oid = Oid::root("items", "1");
        let first = vec![op(&oid, "2-r1", OperationKind::Initialize { snapshot: Value::Object(Default::default()) })];
        store.apply_operations(&oid, &first).await.unwrap();
        let stale = vec![op(&oid, "1-r1", OperationKind::Set { field: "x".into(), value: Value::from(true) })];
        assert!(store.apply_operations(&oid, &stale).await.is_err());
    }

    #[tokio::test]
    async fn clear_empties_the_store() {
        let store = BaselineStore::new(Arc::new(InMemoryBaselineStorage::new()));
        let oid = Oid::root("items", "1");
        let ops = vec![op(&oid, "1-r1", OperationKind::Initialize { snapshot: Value::Object(Default::default()) })];
        store.apply_operations(&oid, &ops).await.unwrap();
        store.clear().await.unwrap();
        assert!(store.get(&oid).await.unwrap().is_none());
    }
}
