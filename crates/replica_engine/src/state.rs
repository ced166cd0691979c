//! Local cache of everything this replica has received: a regular
//! `OperationLog` + `BaselineStore` pair (reusing the same storage traits
//! the authority uses, just pointed at in-memory or on-disk local
//! storage), plus reference-counted subscriber bookkeeping so the engine
//! only pays materialization cost for OIDs something is actually watching
//! (spec.md §5 "Shared resource policy").
//!
//! Grounded on `sync::state::SyncState`'s per-query-id result cache with
//! invalidation on writes, adapted from per-query to per-OID.

use std::{
    collections::HashMap,
    sync::Arc,
};

use engine_core::{
    BaselineStorage,
    BaselineStore,
    OperationLog,
    OperationLogStorage,
};
use sync_types::{
    Baseline,
    HlcTimestamp,
    Oid,
    Operation,
    Value,
};
use tokio::sync::broadcast;

/// Token returned by `ReplicaState::subscribe`. Dropping it releases the
/// subscription — RAII mirrors the teacher's `Arc`-refcounted query
/// handles rather than requiring an explicit `unsubscribe` call.
pub struct SubscriptionHandle {
    oid: Oid,
    refcounts: Arc<parking_lot::Mutex<HashMap<Oid, usize>>>,
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        let mut refcounts = self.refcounts.lock();
        if let Some(count) = refcounts.get_mut(&self.oid) {
            *count -= 1;
            if *count == 0 {
                refcounts.remove(&self.oid);
            }
        }
    }
}

pub struct ReplicaState {
    log: OperationLog,
    baselines: BaselineStore,
    refcounts: Arc<parking_lot::Mutex<HashMap<Oid, usize>>>,
    invalidations: broadcast::Sender<Oid>,
}

impl ReplicaState {
    pub fn new(log_storage: Arc<dyn OperationLogStorage>, baseline_storage: Arc<dyn BaselineStorage>) -> Self {
        let (invalidations, _) = broadcast::channel(1024);
        Self {
            log: OperationLog::new(log_storage),
            baselines: BaselineStore::new(baseline_storage),
            refcounts: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            invalidations,
        }
    }

    /// Register interest in an OID. While at least one handle is held for
    /// an OID, invalidations for it are broadcast on `subscribe_invalidations`.
    pub fn subscribe(&self, oid: &Oid) -> SubscriptionHandle {
        *self.refcounts.lock().entry(oid.clone()).or_insert(0) += 1;
        SubscriptionHandle { oid: oid.clone(), refcounts: self.refcounts.clone() }
    }

    pub fn is_subscribed(&self, oid: &Oid) -> bool {
        self.refcounts.lock().contains_key(oid)
    }

    pub fn subscribe_invalidations(&self) -> broadcast::Receiver<Oid> {
        self.invalidations.subscribe()
    }

    /// Ingest operations received from the authority (via `sync-resp` or
    /// `op-re`), notifying subscribers of every root OID touched.
    pub async fn ingest_operations(&self, replica_id: &sync_types::ReplicaId, ops: Vec<Operation>) -> anyhow::Result<()> {
        let roots: Vec<Oid> = ops.iter().map(|op| op.oid.root_oid()).collect();
        self.log.insert_all(replica_id, ops).await?;
        self.notify_roots(roots);
        Ok(())
    }

    pub async fn ingest_baselines(&self, baselines: Vec<Baseline>) -> anyhow::Result<()> {
        let roots: Vec<Oid> = baselines.iter().map(|b| b.oid.root_oid()).collect();
        for baseline in baselines {
            self.baselines.upsert(baseline).await?;
        }
        self.notify_roots(roots);
        Ok(())
    }

    fn notify_roots(&self, roots: Vec<Oid>) {
        let subscribed = self.refcounts.lock();
        for root in roots {
            if subscribed.contains_key(&root) {
                let _ = self.invalidations.send(root);
            }
        }
    }

    pub async fn materialize(&self, root: &Oid) -> anyhow::Result<Value> {
        engine_core::materialize_root(root, &self.baselines, &self.log).await
    }

    pub async fn record_local_operations(&self, replica_id: &sync_types::ReplicaId, ops: Vec<Operation>) -> anyhow::Result<()> {
        let roots: Vec<Oid> = ops.iter().map(|op| op.oid.root_oid()).collect();
        self.log.insert_all(replica_id, ops).await?;
        self.notify_roots(roots);
        Ok(())
    }

    pub async fn highest_known_timestamp(&self) -> anyhow::Result<Option<HlcTimestamp>> {
        let ops = self.log.get_after(None).await?;
        let baselines = self.baselines.get_all_after(None).await?;
        let max_op = ops.into_iter().map(|op| op.timestamp).max();
        let max_baseline = baselines.into_iter().map(|b| b.timestamp).max();
        Ok(std::cmp::max(max_op, max_baseline))
    }

    /// Discard everything locally known: the authority's history is about
    /// to replace it wholesale (`overwriteLocalData`, spec.md §4.4.1 step
    /// 6). The outbound buffer of not-yet-acknowledged local ops lives
    /// outside `ReplicaState` and is untouched by this call.
    pub async fn clear(&self) -> anyhow::Result<()> {
        self.log.clear().await?;
        self.baselines.clear().await?;
        Ok(())
    }

    /// Client-side counterpart of the authority's consensus rebase
    /// (spec.md §4.5.3): fold every locally-known operation older than
    /// `threshold` into the baseline and drop it from the log.
    pub async fn rebase_before(&self, threshold: &HlcTimestamp) -> anyhow::Result<()> {
        engine_core::compact_before(&self.log, &self.baselines, threshold).await
    }
}
