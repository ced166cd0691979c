//! Snapshot materialisation: resolving a root OID into the fully-merged,
//! ref-resolved document a query would see.
//!
//! Snapshots are not canonical storage (spec.md §3) — they're recomputed
//! on demand from a baseline plus the operations newer than it, with
//! nested object/array refs resolved recursively. A visited-set guards
//! against cyclic refs (spec.md §9 "Cyclic references"), surfacing a cycle
//! as a `BadRequest`-classified error rather than recursing forever.

use std::collections::{
    BTreeMap,
    HashSet,
};

use errors::ErrorMetadata;
use futures::future::{
    BoxFuture,
    FutureExt,
};
use sync_types::{
    Oid,
    Operation,
    OperationKind,
    Value,
};

use crate::{
    baseline_store::BaselineStore,
    operation_log::OperationLog,
};

/// Apply a HLC-ordered (or unordered, we sort defensively) run of
/// operations for a single OID onto a starting value, producing the new
/// materialised value. Used both by `BaselineStore::apply_operations`
/// (compaction) and by snapshot materialisation (applying the "tail" of
/// ops newer than the baseline).
pub fn apply_operations_to_value(base: Option<Value>, ops: &[Operation]) -> Value {
    let mut sorted: Vec<&Operation> = ops.iter().collect();
    sorted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    let mut value = base;
    for op in sorted {
        value = Some(apply_single(value, &op.data));
    }
    value.unwrap_or(Value::Object(BTreeMap::new()))
}

fn apply_single(current: Option<Value>, op: &OperationKind) -> Value {
    match op {
        OperationKind::Initialize { snapshot } => snapshot.clone(),
        OperationKind::Set { field, value } => {
            let mut fields = into_object(current);
            fields.insert(field.clone(), value.clone());
            Value::Object(fields)
        },
        OperationKind::Delete { field } => {
            let mut fields = into_object(current);
            fields.remove(field);
            Value::Object(fields)
        },
        OperationKind::ListInsert { index, value } => {
            let mut items = into_array(current);
            let at = (*index).min(items.len());
            items.insert(at, value.clone());
            Value::Array(items)
        },
        OperationKind::ListMove { from, to } => {
            let mut items = into_array(current);
            // A move referencing a position no longer present is a no-op
            // (spec.md §4.5.5).
            if *from < items.len() {
                let item = items.remove(*from);
                let at = (*to).min(items.len());
                items.insert(at, item);
            }
            Value::Array(items)
        },
        OperationKind::ListDelete { index } => {
            let mut items = into_array(current);
            if *index < items.len() {
                items.remove(*index);
            }
            Value::Array(items)
        },
    }
}

fn into_object(value: Option<Value>) -> BTreeMap<String, Value> {
    match value {
        Some(Value::Object(fields)) => fields,
        _ => BTreeMap::new(),
    }
}

fn into_array(value: Option<Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// Materialise the full document rooted at `root`: the root's baseline
/// plus its tail of un-compacted operations, with every nested `Ref`
/// resolved the same way, recursively.
pub async fn materialize_root(
    root: &Oid,
    baselines: &BaselineStore,
    log: &OperationLog,
) -> anyhow::Result<Value> {
    let mut visited = HashSet::new();
    materialize_oid(root, baselines, log, &mut visited).await
}

fn materialize_oid<'a>(
    oid: &'a Oid,
    baselines: &'a BaselineStore,
    log: &'a OperationLog,
    visited: &'a mut HashSet<Oid>,
) -> BoxFuture<'a, anyhow::Result<Value>> {
    async move {
        if !visited.insert(oid.clone()) {
            return Err(ErrorMetadata::bad_request(
                "CyclicReference",
                format!("object reference cycle detected at {oid}"),
            )
            .into());
        }

        let baseline = baselines.get(oid).await?;
        let base_ts = baseline.as_ref().map(|b| b.timestamp.clone());
        let mut tail = log.get_for_oid(oid).await?;
        tail.retain(|op| match &base_ts {
            Some(t) => &op.timestamp > t,
            None => true,
        });
        let value = apply_operations_to_value(baseline.map(|b| b.snapshot), &tail);
        resolve_refs(value, baselines, log, visited).await
    }
    .boxed()
}

fn resolve_refs<'a>(
    value: Value,
    baselines: &'a BaselineStore,
    log: &'a OperationLog,
    visited: &'a mut HashSet<Oid>,
) -> BoxFuture<'a, anyhow::Result<Value>> {
    async move {
        match value {
            Value::Ref(oid) => materialize_oid(&oid, baselines, log, visited).await,
            Value::Array(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    resolved.push(resolve_refs(item, baselines, log, visited).await?);
                }
                Ok(Value::Array(resolved))
            },
            Value::Object(fields) => {
                let mut resolved = BTreeMap::new();
                for (k, v) in fields {
                    resolved.insert(k, resolve_refs(v, baselines, log, visited).await?);
                }
                Ok(Value::Object(resolved))
            },
            scalar => Ok(scalar),
        }
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sync_types::{
        HlcTimestamp,
        ReplicaId,
    };

    use super::*;
    use crate::{
        baseline_store::InMemoryBaselineStorage,
        operation_log::InMemoryOperationLogStorage,
    };

    fn op(oid: &Oid, ts: &str, data: OperationKind) -> Operation {
        Operation {
            oid: oid.clone(),
            timestamp: HlcTimestamp::from_raw(ts.to_string()),
            data,
            replica_id: ReplicaId::from("r1".to_string()),
        }
    }

    #[tokio::test]
    async fn resolves_nested_ref_and_applies_tail_ops() {
        let baselines = BaselineStore::new(Arc::new(InMemoryBaselineStorage::new()));
        let log = OperationLog::new(Arc::new(InMemoryOperationLogStorage::new()));
        let rid = ReplicaId::from("r1".to_string());

        let child = Oid::root("tags", "c1");
        log.insert_all(
            &rid,
            vec![op(&child, "1-r1", OperationKind::Initialize { snapshot: Value::from("urgent") })],
        )
        .await
        .unwrap();

        let root = Oid::root("items", "1");
        let mut root_fields = BTreeMap::new();
        root_fields.insert("tag".to_string(), Value::Ref(child.clone()));
        log.insert_all(
            &rid,
            vec![op(&root, "1-r1", OperationKind::Initialize { snapshot: Value::Object(root_fields) })],
        )
        .await
        .unwrap();
        log.insert_all(
            &rid,
            vec![op(&root, "2-r1", OperationKind::Set { field: "name".into(), value: Value::from("widget") })],
        )
        .await
        .unwrap();

        let snapshot = materialize_root(&root, &baselines, &log).await.unwrap();
        let Value::Object(fields) = snapshot else { panic!("expected object") };
        assert_eq!(fields.get("name"), Some(&Value::from("widget")));
        assert_eq!(fields.get("tag"), Some(&Value::from("urgent")));
    }

    #[tokio::test]
    async fn cyclic_refs_surface_as_bad_request() {
        let baselines = BaselineStore::new(Arc::new(InMemoryBaselineStorage::new()));
        let log = OperationLog::new(Arc::new(InMemoryOperationLogStorage::new()));
        let rid = ReplicaId::from("r1".to_string());

        let a = Oid::root("nodes", "a");
        let b = Oid::root("nodes", "b");
        let mut a_fields = BTreeMap::new();
        a_fields.insert("next".to_string(), Value::Ref(b.clone()));
        let mut b_fields = BTreeMap::new();
        b_fields.insert("next".to_string(), Value::Ref(a.clone()));

        log.insert_all(&rid, vec![op(&a, "1-r1", OperationKind::Initialize { snapshot: Value::Object(a_fields) })])
            .await
            .unwrap();
        log.insert_all(&rid, vec![op(&b, "1-r1", OperationKind::Initialize { snapshot: Value::Object(b_fields) })])
            .await
            .unwrap();

        let err = materialize_root(&a, &baselines, &log).await.unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[tokio::test]
    async fn list_move_to_gone_position_is_a_no_op() {
        let arr = Value::Array(vec![Value::from(1.0), Value::from(2.0)]);
        let ops = vec![op(&Oid::root("lists", "1"), "1-r1", OperationKind::ListMove { from: 5, to: 0 })];
        let result = apply_operations_to_value(Some(arr.clone()), &ops);
        assert_eq!(result, arr);
    }
}
