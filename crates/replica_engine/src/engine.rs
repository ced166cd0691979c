//! Client-side replica: outbound protocol state machine, local operation
//! buffer, inbound `op-re`/`global-ack`/presence handling (spec.md §4.5).
//!
//! Grounded on `sync::worker::SyncWorker`'s connection loop, mirrored on
//! the client side: `Offline -> Connecting -> Syncing -> Active` tracks
//! the teacher's own state names for a sync session, adapted to a client
//! rather than server perspective.

use std::sync::{
    atomic::{
        AtomicBool,
        Ordering,
    },
    Arc,
};

use engine_core::{
    BaselineStorage,
    OperationLogStorage,
};
use sync_types::{
    Baseline,
    ClientMessage,
    HlcClock,
    Operation,
    Presence,
    ReplicaId,
    ServerMessage,
};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    buffer::OperationBuffer,
    state::ReplicaState,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConnectionState {
    /// No transport connection. `submit_operation` still buffers locally.
    Offline,
    /// Transport is up; the initial `sync` message has been sent but no
    /// `sync-resp` has arrived yet.
    Connecting,
    /// `sync-resp` arrived and local state was merged in; `sync-step2` has
    /// been sent with this replica's own unsent history, awaiting nothing
    /// further to consider the handshake complete.
    Syncing,
    /// Handshake complete; `op` messages are sent immediately instead of
    /// only buffered.
    Active,
}

/// Everything the engine needs to talk to the wire, abstracted behind a
/// plain channel so tests (and the demo binary) can stand in for a real
/// transport with `tokio::sync::mpsc` (spec.md §5's transport substitution
/// point).
pub struct ReplicaEngine {
    replica_id: ReplicaId,
    local: ReplicaState,
    buffer: parking_lot::Mutex<OperationBuffer>,
    clock: parking_lot::Mutex<HlcClock>,
    connection: parking_lot::Mutex<ConnectionState>,
    outbox: UnboundedSender<ClientMessage>,
    schema_version: u32,
    resync_all_on_next_connect: AtomicBool,
}

impl ReplicaEngine {
    pub fn new(
        replica_id: ReplicaId,
        schema_version: u32,
        log_storage: Arc<dyn OperationLogStorage>,
        baseline_storage: Arc<dyn BaselineStorage>,
        outbox: UnboundedSender<ClientMessage>,
    ) -> Self {
        Self {
            clock: parking_lot::Mutex::new(HlcClock::new(replica_id.clone())),
            local: ReplicaState::new(log_storage, baseline_storage),
            buffer: parking_lot::Mutex::new(OperationBuffer::new()),
            connection: parking_lot::Mutex::new(ConnectionState::Offline),
            replica_id,
            outbox,
            schema_version,
            resync_all_on_next_connect: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.connection.lock()
    }

    pub fn local_state(&self) -> &ReplicaState {
        &self.local
    }

    /// spec.md §4.5.2 step 1: send the initial `sync` message.
    pub fn connect(&self) {
        *self.connection.lock() = ConnectionState::Connecting;
        let resync_all = self.resync_all_on_next_connect.swap(false, Ordering::SeqCst);
        let _ = self.outbox.send(ClientMessage::Sync {
            replica_id: self.replica_id.clone(),
            resync_all,
            schema_version: self.schema_version,
        });
    }

    pub fn disconnect(&self) {
        *self.connection.lock() = ConnectionState::Offline;
    }

    /// Force a full resync on the next `connect()`, e.g. after a
    /// `SchemaMismatch` error (spec.md §7).
    pub fn request_resync_all(&self) {
        self.resync_all_on_next_connect.store(true, Ordering::SeqCst);
    }

    /// Mint and buffer a new local operation; sends it immediately if the
    /// handshake has completed (spec.md §4.5.1, §4.5.2 step 4).
    pub async fn submit_operation(&self, make_op: impl FnOnce(sync_types::HlcTimestamp) -> Operation, now_ms: u64) -> anyhow::Result<()> {
        let ts = self.clock.lock().tick(now_ms);
        let op = make_op(ts);
        self.local.record_local_operations(&self.replica_id, vec![op.clone()]).await?;
        self.buffer.lock().push(op.clone());

        if self.state() == ConnectionState::Active {
            self.flush();
        }
        Ok(())
    }

    /// Send every buffered operation as a single `op` message (spec.md
    /// §4.5.1's "operations are transmitted eagerly once active"), leaving
    /// the buffer empty. Ops stay in `ReplicaState`'s local log regardless
    /// of transmission outcome — only the outbound buffer is drained.
    pub fn flush(&self) {
        let ops = self.buffer.lock().drain();
        if ops.is_empty() {
            return;
        }
        let _ = self.outbox.send(ClientMessage::Op { replica_id: self.replica_id.clone(), operations: ops });
    }

    pub fn send_presence(&self, presence: Presence) {
        let _ = self.outbox.send(ClientMessage::PresenceUpdate { replica_id: self.replica_id.clone(), presence });
    }

    pub fn send_heartbeat(&self) {
        let _ = self.outbox.send(ClientMessage::Heartbeat { replica_id: self.replica_id.clone() });
    }

    /// Dispatch an inbound `ServerMessage` (spec.md §4.5.2-§4.5.4).
    pub async fn handle_server_message(&self, message: ServerMessage) -> anyhow::Result<()> {
        match message {
            ServerMessage::SyncResp {
                operations,
                baselines,
                overwrite_local_data,
                global_ack_timestamp,
                ..
            } => {
                self.apply_sync_resp(operations, baselines, overwrite_local_data, global_ack_timestamp).await?;
            },
            ServerMessage::OpRe { operations, baselines, global_ack_timestamp, .. } => {
                self.local.ingest_operations(&self.replica_id, operations).await?;
                self.local.ingest_baselines(baselines).await?;
                self.observe_global_ack(global_ack_timestamp).await?;
            },
            ServerMessage::GlobalAck { timestamp } => {
                self.observe_global_ack(Some(timestamp)).await?;
            },
            ServerMessage::PresenceChanged { .. } | ServerMessage::PresenceOffline { .. } => {
                // Peer-presence caching is an application-layer concern;
                // this engine only guarantees delivery (spec.md §4.4.6).
            },
            ServerMessage::HeartbeatResponse => {},
            ServerMessage::Forbidden => {
                anyhow::bail!(errors::ErrorMetadata::forbidden(
                    "ServerRejected",
                    "the authority rejected this connection's last message"
                ));
            },
        }
        Ok(())
    }

    async fn apply_sync_resp(
        &self,
        operations: Vec<Operation>,
        baselines: Vec<Baseline>,
        overwrite_local_data: bool,
        global_ack_timestamp: Option<sync_types::HlcTimestamp>,
    ) -> anyhow::Result<()> {
        // `overwriteLocalData` signals that the authority's history
        // supersedes whatever this replica locally believes it holds: the
        // local log and baselines are replaced wholesale with the server's
        // view before ingesting it. The outbound buffer of not-yet-acked
        // local ops is untouched here — it is still owed to the authority
        // and goes out via sync-step2 below, matching spec.md §4.4.1 step 6
        // and the S5 scenario at spec.md §4.5.4.
        if overwrite_local_data {
            self.local.clear().await?;
        }
        self.local.ingest_operations(&self.replica_id, operations).await?;
        self.local.ingest_baselines(baselines).await?;
        self.observe_global_ack(global_ack_timestamp).await?;

        *self.connection.lock() = ConnectionState::Syncing;
        // Drain (not just read) the buffer: these ops are being pushed to
        // the authority right now via sync-step2, so they must not also go
        // out again through a later flush().
        let pending = self.buffer.lock().drain();
        let timestamp =
            pending.iter().map(|op| op.timestamp.clone()).max().unwrap_or_else(|| self.clock.lock().tick(0));
        let _ = self.outbox.send(ClientMessage::SyncStep2 {
            replica_id: self.replica_id.clone(),
            operations: pending,
            baselines: vec![],
            timestamp,
        });
        *self.connection.lock() = ConnectionState::Active;
        self.flush();
        Ok(())
    }

    /// Advance the local clock past the authority's view and, per spec.md
    /// §4.5.3, fold every locally-known operation older than the new
    /// global-ack horizon into the baseline.
    async fn observe_global_ack(&self, timestamp: Option<sync_types::HlcTimestamp>) -> anyhow::Result<()> {
        if let Some(ts) = timestamp {
            self.clock.lock().observe(&ts);
            self.local.rebase_before(&ts).await?;
        }
        Ok(())
    }
}
