use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    baseline::Baseline,
    hlc::HlcTimestamp,
    operation::Operation,
    replica::ReplicaId,
    value::Value,
};

/// Presence payload a replica publishes about itself, e.g. `{"cursor":
/// {"x":10}}`. Left as a `Value` rather than a fixed struct since presence
/// shape is defined by applications built on top of this core, not by the
/// sync engine itself.
pub type Presence = Value;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub presence: Presence,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "sync")]
    Sync {
        replica_id: ReplicaId,
        #[serde(default)]
        resync_all: bool,
        schema_version: u32,
    },
    #[serde(rename = "sync-step2")]
    SyncStep2 {
        replica_id: ReplicaId,
        operations: Vec<Operation>,
        baselines: Vec<Baseline>,
        timestamp: HlcTimestamp,
    },
    #[serde(rename = "op")]
    Op {
        replica_id: ReplicaId,
        operations: Vec<Operation>,
    },
    #[serde(rename = "ack")]
    Ack {
        replica_id: ReplicaId,
        timestamp: HlcTimestamp,
    },
    #[serde(rename = "heartbeat")]
    Heartbeat { replica_id: ReplicaId },
    #[serde(rename = "presence-update")]
    PresenceUpdate {
        replica_id: ReplicaId,
        presence: Presence,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "sync-resp")]
    SyncResp {
        operations: Vec<Operation>,
        baselines: Vec<Baseline>,
        /// "Send me everything you have strictly newer than this." `None`
        /// means "send your entire unsent history" (first-ever sync).
        provide_changes_since: Option<HlcTimestamp>,
        global_ack_timestamp: Option<HlcTimestamp>,
        peer_presence: Vec<(ReplicaId, UserProfile)>,
        overwrite_local_data: bool,
    },
    #[serde(rename = "op-re")]
    OpRe {
        operations: Vec<Operation>,
        baselines: Vec<Baseline>,
        replica_id: ReplicaId,
        global_ack_timestamp: Option<HlcTimestamp>,
    },
    #[serde(rename = "global-ack")]
    GlobalAck { timestamp: HlcTimestamp },
    #[serde(rename = "presence-changed")]
    PresenceChanged {
        replica_id: ReplicaId,
        user_info: UserProfile,
    },
    #[serde(rename = "presence-offline")]
    PresenceOffline {
        replica_id: ReplicaId,
        user_id: String,
    },
    #[serde(rename = "heartbeat-response")]
    HeartbeatResponse,
    #[serde(rename = "forbidden")]
    Forbidden,
}
