//! Compaction: fold operations the whole active replica set has
//! acknowledged into baselines, then drop them from the log (spec.md
//! §4.4.5). Grounded on `database::write_log::WriteLog`'s truncation pass,
//! which likewise waits for a horizon before reclaiming log entries.

use engine_core::{
    BaselineStore,
    OperationLog,
    ReplicaRegistry,
};
use sync_types::{
    HlcTimestamp,
    ReplicaId,
};

/// Run one compaction pass. Returns the computed global ack (`None` if no
/// replica set currently gives consensus, in which case nothing was
/// compacted) so the caller can broadcast `global-ack` even on passes that
/// find no operations old enough to fold.
pub async fn run_pass(
    log: &OperationLog,
    baselines: &BaselineStore,
    registry: &ReplicaRegistry,
    now_ms: u64,
    active_replica_ids: &[ReplicaId],
) -> anyhow::Result<Option<HlcTimestamp>> {
    let Some(global_ack) = registry.get_global_ack(now_ms, active_replica_ids) else {
        return Ok(None);
    };
    engine_core::compact_before(log, baselines, &global_ack).await?;
    Ok(Some(global_ack))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use engine_core::{
        InMemoryBaselineStorage,
        InMemoryOperationLogStorage,
    };
    use sync_types::{
        Oid,
        Operation,
        OperationKind,
        ReplicaType,
        UserId,
        Value,
    };

    use super::*;

    fn op(oid: &Oid, ts: &str, data: OperationKind, replica_id: &ReplicaId) -> Operation {
        Operation { oid: oid.clone(), timestamp: HlcTimestamp::from_raw(ts.to_string()), data, replica_id: replica_id.clone() }
    }

    #[tokio::test]
    async fn compacts_operations_below_the_global_ack_and_leaves_newer_ones() {
        let log = OperationLog::new(Arc::new(InMemoryOperationLogStorage::new()));
        let baselines = BaselineStore::new(Arc::new(InMemoryBaselineStorage::new()));
        let registry = ReplicaRegistry::new(1_000_000);

        let replica_id = ReplicaId::from("r1".to_string());
        let user_id = UserId::from("u1".to_string());
        registry.get_or_create(&replica_id, &user_id, ReplicaType::Realtime, 0);
        registry.update_acknowledged(&replica_id, &HlcTimestamp::from_raw("2-r1".to_string()));

        let oid = Oid::root("items", "1");
        log.insert_all(
            &replica_id,
            vec![
                op(&oid, "1-r1", OperationKind::Initialize { snapshot: Value::Object(Default::default()) }, &replica_id),
                op(&oid, "2-r1", OperationKind::Set { field: "name".into(), value: Value::from("apples") }, &replica_id),
                op(&oid, "3-r1", OperationKind::Set { field: "name".into(), value: Value::from("oranges") }, &replica_id),
            ],
        )
        .await
        .unwrap();

        let ack = run_pass(&log, &baselines, &registry, 0, &[]).await.unwrap();
        assert_eq!(ack, Some(HlcTimestamp::from_raw("2-r1".to_string())));

        let baseline = baselines.get(&oid).await.unwrap().unwrap();
        assert_eq!(baseline.timestamp, HlcTimestamp::from_raw("2-r1".to_string()));
        let Value::Object(fields) = &baseline.snapshot else { panic!("expected object") };
        assert_eq!(fields.get("name"), Some(&Value::from("apples")));

        // The op at 3-r1 is newer than the ack and must survive compaction.
        let remaining = log.get_after(None).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].timestamp, HlcTimestamp::from_raw("3-r1".to_string()));
    }

    #[tokio::test]
    async fn no_consensus_means_no_compaction() {
        let log = OperationLog::new(Arc::new(InMemoryOperationLogStorage::new()));
        let baselines = BaselineStore::new(Arc::new(InMemoryBaselineStorage::new()));
        let registry = ReplicaRegistry::new(1_000_000);
        // A registered replica that has never acked blocks any consensus.
        registry.get_or_create(
            &ReplicaId::from("r1".to_string()),
            &UserId::from("u1".to_string()),
            ReplicaType::Realtime,
            0,
        );
        let ack = run_pass(&log, &baselines, &registry, 0, &[]).await.unwrap();
        assert_eq!(ack, None);
    }
}
