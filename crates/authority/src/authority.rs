//! Per-library `Authority`: the server side of the sync protocol.
//!
//! Grounded on `sync::worker::SyncWorker` — a per-connection actor reading
//! from an inbox and writing to an outbox — adapted from per-connection to
//! per-library granularity, since this engine's unit of serialization is
//! the library (spec.md §5 "single-writer per library"), not the
//! individual session. All handlers that touch `OperationLog`,
//! `BaselineStore` or `ReplicaRegistry` acquire `write_lock` for the
//! duration of the handler, so the three together behave as one
//! transaction (spec.md §5 "Persistence transactions").

use std::{
    collections::HashMap,
    sync::{
        atomic::{
            AtomicU64,
            Ordering,
        },
        Arc,
    },
};

use engine_core::{
    BaselineStorage,
    BaselineStore,
    OperationLogStorage,
    ReplicaRegistry,
};
use errors::ErrorMetadata;
use sync_types::{
    ClientMessage,
    HlcTimestamp,
    Operation,
    ReplicaId,
    ReplicaStatus,
    ReplicaType,
    ServerMessage,
    UserId,
};
use tokio::sync::{
    mpsc::UnboundedSender,
    Mutex as AsyncMutex,
    Notify,
};

use crate::{
    clock::{
        Clock,
        SystemClock,
    },
    presence::PresenceMap,
    rebase,
};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ClientKey(u64);

/// Caller-verified identity for the current message, standing in for the
/// authentication/token-issuance service spec.md §1 names as out of
/// scope — only this narrow interface is assumed.
#[derive(Clone, Debug)]
pub struct TokenInfo {
    pub user_id: UserId,
    pub replica_type: ReplicaType,
}

#[derive(Clone, Copy, Debug)]
pub struct LibraryConfig {
    pub truancy_threshold_ms: u64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self { truancy_threshold_ms: 60_000 }
    }
}

struct Connection {
    replica_id: ReplicaId,
    user_id: UserId,
    replica_type: ReplicaType,
    sender: UnboundedSender<ServerMessage>,
}

struct Connections {
    by_key: HashMap<ClientKey, Connection>,
}

pub struct Authority {
    pub(crate) log: engine_core::OperationLog,
    pub(crate) baselines: BaselineStore,
    pub(crate) registry: ReplicaRegistry,
    presence: parking_lot::Mutex<PresenceMap>,
    connections: parking_lot::Mutex<Connections>,
    write_lock: AsyncMutex<()>,
    rebase_notify: Notify,
    next_client_key: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl Authority {
    pub fn new(
        config: LibraryConfig,
        log_storage: Arc<dyn OperationLogStorage>,
        baseline_storage: Arc<dyn BaselineStorage>,
    ) -> Self {
        Self::with_clock(config, log_storage, baseline_storage, Arc::new(SystemClock))
    }

    /// Same as `new`, with an injected clock instead of the system one —
    /// for tests that need to control what `rebase_loop`/`rebroadcast_ops`
    /// see as "now" without a wall-clock dependency.
    pub fn with_clock(
        config: LibraryConfig,
        log_storage: Arc<dyn OperationLogStorage>,
        baseline_storage: Arc<dyn BaselineStorage>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            log: engine_core::OperationLog::new(log_storage),
            baselines: BaselineStore::new(baseline_storage),
            registry: ReplicaRegistry::new(config.truancy_threshold_ms),
            presence: parking_lot::Mutex::new(PresenceMap::new()),
            connections: parking_lot::Mutex::new(Connections { by_key: HashMap::new() }),
            write_lock: AsyncMutex::new(()),
            rebase_notify: Notify::new(),
            next_client_key: AtomicU64::new(0),
            clock,
        }
    }

    pub fn connect(
        &self,
        replica_id: ReplicaId,
        token: &TokenInfo,
        sender: UnboundedSender<ServerMessage>,
    ) -> ClientKey {
        let key = ClientKey(self.next_client_key.fetch_add(1, Ordering::Relaxed));
        self.connections.lock().by_key.insert(
            key,
            Connection {
                replica_id,
                user_id: token.user_id.clone(),
                replica_type: token.replica_type,
                sender,
            },
        );
        key
    }

    /// Tear down a connection. If this was the last live replica for its
    /// user, emits `presence-offline` to the remaining peers (spec.md
    /// §4.4.6).
    pub fn disconnect(&self, client_key: ClientKey) {
        let removed = self.connections.lock().by_key.remove(&client_key);
        let Some(conn) = removed else { return };
        let went_offline = self.presence.lock().remove(&conn.user_id, &conn.replica_id);
        if went_offline {
            self.broadcast_all(ServerMessage::PresenceOffline {
                replica_id: conn.replica_id,
                user_id: conn.user_id.as_str().to_string(),
            });
        }
    }

    pub async fn handle_message(
        &self,
        client_key: ClientKey,
        token: &TokenInfo,
        now_ms: u64,
        message: ClientMessage,
    ) -> anyhow::Result<Option<ServerMessage>> {
        match message {
            ClientMessage::Sync { replica_id, resync_all, schema_version: _ } => {
                let resp = self.handle_sync(&replica_id, token, resync_all, now_ms).await?;
                Ok(Some(resp))
            },
            ClientMessage::SyncStep2 { replica_id, operations, baselines, timestamp } => {
                self.require_write_access(token)?;
                self.handle_sync_step2(client_key, &replica_id, operations, baselines, timestamp).await?;
                Ok(None)
            },
            ClientMessage::Op { replica_id, operations } => {
                self.require_write_access(token)?;
                self.handle_op(client_key, &replica_id, operations).await?;
                Ok(None)
            },
            ClientMessage::Ack { replica_id, timestamp } => {
                self.handle_ack(&replica_id, &timestamp, now_ms).await;
                Ok(None)
            },
            ClientMessage::Heartbeat { replica_id } => {
                self.registry.update_last_seen(&replica_id, now_ms);
                Ok(Some(ServerMessage::HeartbeatResponse))
            },
            ClientMessage::PresenceUpdate { replica_id, presence } => {
                self.handle_presence_update(&replica_id, token, presence);
                Ok(None)
            },
        }
    }

    fn require_write_access(&self, token: &TokenInfo) -> anyhow::Result<()> {
        if token.replica_type.is_read_only() {
            anyhow::bail!(ErrorMetadata::forbidden(
                "ReadOnlyToken",
                "this connection holds a read-only token and cannot write"
            ));
        }
        Ok(())
    }

    /// spec.md §4.4.1.
    async fn handle_sync(
        &self,
        replica_id: &ReplicaId,
        token: &TokenInfo,
        resync_all: bool,
        now_ms: u64,
    ) -> anyhow::Result<ServerMessage> {
        let _guard = self.write_lock.lock().await;

        if let Some(existing) = self.registry.get(replica_id) {
            if existing.user_id != token.user_id {
                anyhow::bail!(ErrorMetadata::replica_ownership_violation(replica_id));
            }
        }

        if resync_all {
            self.registry.forget(replica_id);
        }

        let library_was_empty_before =
            self.log.get_after(None).await?.is_empty() && self.baselines.get_all_after(None).await?.is_empty();

        let (status, info) =
            self.registry.get_or_create(replica_id, &token.user_id, token.replica_type, now_ms);

        let changes_since = match status {
            ReplicaStatus::Existing => info.acked_timestamp.clone(),
            ReplicaStatus::New | ReplicaStatus::Truant => None,
        };

        let operations = self.log.get_after(changes_since.as_ref()).await?;
        let baselines = self.baselines.get_all_after(changes_since.as_ref()).await?;

        // An empty library adopts the first joining replica's history
        // rather than overwriting it with... nothing (spec.md §4.4.1 step 6).
        let overwrite_local_data =
            (resync_all || status != ReplicaStatus::Existing) && !library_was_empty_before;

        let global_ack = self.registry.get_global_ack(now_ms, &self.active_replica_ids());
        let peer_presence = self
            .presence
            .lock()
            .snapshot()
            .into_iter()
            .map(|(user_id, replica_id, presence)| {
                (replica_id, sync_types::UserProfile { user_id: user_id.as_str().to_string(), presence })
            })
            .collect();

        Ok(ServerMessage::SyncResp {
            operations,
            baselines,
            provide_changes_since: changes_since,
            global_ack_timestamp: global_ack,
            peer_presence,
            overwrite_local_data,
        })
    }

    /// spec.md §4.4.2. The reference implementation's handling of a missing
    /// last-operation timestamp (falling back to the message's own
    /// `timestamp`) is preserved here per spec.md §9's open question,
    /// despite the acknowledged risk that a stale client-supplied
    /// `timestamp` could advance `ackedTimestamp` past operations the
    /// client hasn't actually durably stored yet.
    async fn handle_sync_step2(
        &self,
        client_key: ClientKey,
        replica_id: &ReplicaId,
        operations: Vec<Operation>,
        baselines: Vec<sync_types::Baseline>,
        timestamp: HlcTimestamp,
    ) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;

        for baseline in baselines {
            self.baselines.upsert(baseline).await?;
        }
        self.log.insert_all(replica_id, operations.clone()).await?;

        let last_op_ts = operations.iter().map(|op| op.timestamp.clone()).max();
        let acked = last_op_ts.unwrap_or(timestamp);
        self.registry.update_acknowledged(replica_id, &acked);

        self.rebroadcast_ops(client_key, replica_id, operations).await;
        self.schedule_rebase();
        Ok(())
    }

    /// spec.md §4.4.3.
    async fn handle_op(
        &self,
        client_key: ClientKey,
        replica_id: &ReplicaId,
        operations: Vec<Operation>,
    ) -> anyhow::Result<()> {
        {
            let _guard = self.write_lock.lock().await;
            self.log.insert_all(replica_id, operations.clone()).await?;
        }
        self.schedule_rebase();
        self.rebroadcast_ops(client_key, replica_id, operations).await;
        Ok(())
    }

    /// spec.md §4.4.4.
    async fn handle_ack(&self, replica_id: &ReplicaId, timestamp: &HlcTimestamp, now_ms: u64) {
        let before = self.registry.get_global_ack(now_ms, &self.active_replica_ids());
        self.registry.update_acknowledged(replica_id, timestamp);
        let after = self.registry.get_global_ack(now_ms, &self.active_replica_ids());
        if after.is_some() && after != before {
            self.broadcast_all(ServerMessage::GlobalAck { timestamp: after.unwrap() });
        }
    }

    /// spec.md §4.4.6.
    fn handle_presence_update(&self, replica_id: &ReplicaId, token: &TokenInfo, presence: sync_types::Presence) {
        self.presence.lock().update(&token.user_id, replica_id, presence.clone());
        self.broadcast_all(ServerMessage::PresenceChanged {
            replica_id: replica_id.clone(),
            user_info: sync_types::UserProfile { user_id: token.user_id.as_str().to_string(), presence },
        });
    }

    async fn rebroadcast_ops(&self, sender: ClientKey, replica_id: &ReplicaId, operations: Vec<Operation>) {
        if operations.is_empty() {
            return;
        }
        let global_ack = self.registry.get_global_ack(self.clock.now_ms(), &self.active_replica_ids());
        self.broadcast_except(
            sender,
            ServerMessage::OpRe {
                operations,
                baselines: vec![],
                replica_id: replica_id.clone(),
                global_ack_timestamp: global_ack,
            },
        );
    }

    fn broadcast_all(&self, message: ServerMessage) {
        let connections = self.connections.lock();
        for conn in connections.by_key.values() {
            let _ = conn.sender.send(message.clone());
        }
    }

    fn broadcast_except(&self, sender: ClientKey, message: ServerMessage) {
        let connections = self.connections.lock();
        for (key, conn) in connections.by_key.iter() {
            if *key == sender {
                continue;
            }
            let _ = conn.sender.send(message.clone());
        }
    }

    fn active_replica_ids(&self) -> Vec<ReplicaId> {
        self.connections.lock().by_key.values().map(|c| c.replica_id.clone()).collect()
    }

    fn schedule_rebase(&self) {
        self.rebase_notify.notify_one();
    }

    /// Run a single rebase pass now (spec.md §4.4.5). Exposed directly so
    /// tests can drive compaction deterministically instead of racing a
    /// background task; `rebase_loop` is the production entry point. Also
    /// sweeps truant replicas out of the presence map (spec.md §4.4.6),
    /// using the same active/truant classification as the global-ack
    /// computation above.
    pub async fn run_rebase_pass(&self, now_ms: u64) -> anyhow::Result<Option<HlcTimestamp>> {
        let _guard = self.write_lock.lock().await;
        let active = self.active_replica_ids();
        let outcome = rebase::run_pass(&self.log, &self.baselines, &self.registry, now_ms, &active).await?;
        if let Some(global_ack) = &outcome {
            self.broadcast_all(ServerMessage::GlobalAck { timestamp: global_ack.clone() });
        }

        let live = self.registry.live_replica_ids(now_ms, &active);
        let went_offline = self.presence.lock().retain_live(&live);
        for (user_id, replica_id) in went_offline {
            self.broadcast_all(ServerMessage::PresenceOffline { replica_id, user_id: user_id.as_str().to_string() });
        }

        Ok(outcome)
    }

    /// Background coalescing loop: collapses multiple `schedule_rebase()`
    /// calls made while a pass is already queued into a single subsequent
    /// pass (spec.md §4.4.5 "coalesces multiple triggers to a single
    /// pass"), via `tokio::sync::Notify`'s single-permit semantics.
    pub async fn rebase_loop(self: Arc<Self>) {
        loop {
            self.rebase_notify.notified().await;
            let now_ms = self.clock.now_ms();
            if let Err(error) = self.run_rebase_pass(now_ms).await {
                tracing::warn!(%error, "rebase pass failed");
            }
        }
    }
}
