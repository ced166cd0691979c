use derive_more::{
    Display,
    From,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::hlc::HlcTimestamp;

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(String);

impl ReplicaId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What kind of participant this replica is.
///
/// Read-only types never produce writes, so they don't gate compaction
/// (`ReplicaRegistry::get_global_ack`) and write attempts from them are
/// rejected with `forbidden`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReplicaType {
    Realtime,
    Push,
    Pull,
    ReadOnlyRealtime,
    ReadOnlyPull,
}

impl ReplicaType {
    pub fn is_read_only(self) -> bool {
        matches!(self, Self::ReadOnlyRealtime | Self::ReadOnlyPull)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicaInfo {
    pub replica_id: ReplicaId,
    pub user_id: UserId,
    pub replica_type: ReplicaType,
    pub acked_timestamp: Option<HlcTimestamp>,
    pub last_seen_ms: u64,
    pub created_at_ms: u64,
}

impl ReplicaInfo {
    pub fn is_truant(&self, now_ms: u64, truancy_threshold_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen_ms) > truancy_threshold_ms
    }
}

/// Status returned by `ReplicaRegistry::get_or_create`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReplicaStatus {
    New,
    Existing,
    Truant,
}
