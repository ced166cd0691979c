use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    hlc::HlcTimestamp,
    oid::Oid,
    replica::ReplicaId,
    value::Value,
};

/// A single mutation against an object, addressed by OID and ordered by HLC
/// timestamp. `effect_key()` identifies what an operation overwrites, for
/// client-side supersession (spec.md §4.5.1) — two operations with the same
/// `(oid, effect_key)` conflict and only the later one survives an unsent
/// buffer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub oid: Oid,
    pub timestamp: HlcTimestamp,
    pub data: OperationKind,
    pub replica_id: ReplicaId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum OperationKind {
    Initialize { snapshot: Value },
    Set { field: String, value: Value },
    Delete { field: String },
    ListInsert { index: usize, value: Value },
    ListMove { from: usize, to: usize },
    ListDelete { index: usize },
}

/// What an operation supersedes / is superseded by when both are pending in
/// the same client-side buffer. List mutations return `None`: they never
/// supersede, because their effect depends on position, not on a stable
/// key (spec.md §4.5.1).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum EffectKey {
    /// The entire object — an `initialize` supersedes every prior pending
    /// op on the same OID.
    WholeObject,
    Field(String),
}

impl OperationKind {
    pub fn effect_key(&self) -> Option<EffectKey> {
        match self {
            OperationKind::Initialize { .. } => Some(EffectKey::WholeObject),
            OperationKind::Set { field, .. } => Some(EffectKey::Field(field.clone())),
            OperationKind::Delete { field } => Some(EffectKey::Field(field.clone())),
            OperationKind::ListInsert { .. }
            | OperationKind::ListMove { .. }
            | OperationKind::ListDelete { .. } => None,
        }
    }

    pub fn is_delete_of(&self, field: &str) -> bool {
        matches!(self, OperationKind::Delete { field: f } if f == field)
    }
}

impl Operation {
    pub fn effect_key(&self) -> Option<EffectKey> {
        self.data.effect_key()
    }

    /// `A` (self, earlier) is superseded by `B` (later) in an unsent buffer
    /// when: they target the same OID, and either (a) `B` is an
    /// `initialize` (wipes the whole buffer for that OID), or (b) both have
    /// the same field-scoped effect key, or (c) `B` is a `delete(f)` and
    /// `self` is a `set(f, ..)` (delete-supersedes-set, spec.md P3).
    pub fn is_superseded_by(&self, other: &Operation) -> bool {
        if self.oid != other.oid {
            return false;
        }
        if matches!(other.data, OperationKind::Initialize { .. }) {
            return true;
        }
        match (self.effect_key(), other.effect_key()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}
