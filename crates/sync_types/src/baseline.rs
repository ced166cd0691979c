use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    hlc::HlcTimestamp,
    oid::Oid,
    value::Value,
};

/// A compacted snapshot of one object, reflecting every operation on that
/// OID with `timestamp <= self.timestamp`. Invariant (I3): at most one
/// baseline exists per OID at any moment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub oid: Oid,
    pub snapshot: Value,
    pub timestamp: HlcTimestamp,
}
