//! Shared fold-and-drop compaction pass: both the authority's
//! consensus-driven rebase and a replica's local rebase on receipt of
//! `global-ack` (spec.md §4.4.5, §4.5.3) reduce to "fold every operation
//! older than a threshold into its OID's baseline, then drop it," so both
//! sides call into this one implementation.

use std::collections::BTreeMap;

use sync_types::{
    HlcTimestamp,
    Oid,
};

use crate::{
    BaselineStore,
    OperationLog,
};

/// Fold every operation strictly before `threshold` into its OID's
/// baseline, then drop it from the log. Operations are bucketed by OID and
/// applied in per-OID timestamp order so `BaselineStore::apply_operations`'s
/// monotonicity check (I1) always holds.
pub async fn compact_before(log: &OperationLog, baselines: &BaselineStore, threshold: &HlcTimestamp) -> anyhow::Result<()> {
    let compactable = log.get_before(threshold).await?;
    if compactable.is_empty() {
        return Ok(());
    }

    let mut by_oid: BTreeMap<Oid, Vec<_>> = BTreeMap::new();
    for op in compactable {
        by_oid.entry(op.oid.clone()).or_default().push(op);
    }

    for (oid, mut ops) in by_oid {
        ops.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        baselines.apply_operations(&oid, &ops).await?;
        log.drop(&ops).await?;
        tracing::debug!(oid = %oid, count = ops.len(), "compacted operations into baseline");
    }

    Ok(())
}
