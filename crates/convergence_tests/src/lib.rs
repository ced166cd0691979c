//! Test harness wiring one in-memory `Authority` to several
//! `ReplicaEngine`s over `tokio::sync::mpsc` channels, standing in for the
//! transport spec.md §6 abstracts away. Grounded on the teacher's
//! `simulation` crate's pattern of a `SimulationTest` harness driving
//! multiple simulated clients against one in-process backend
//! (`simulation/src/test_helpers/simulation.rs`), simplified here since
//! this core has no UDF/query surface to simulate — only the sync
//! protocol's message exchange.

use std::sync::Arc;

use authority::{
    Authority,
    ClientKey,
    LibraryConfig,
    TokenInfo,
};
use engine_core::{
    InMemoryBaselineStorage,
    InMemoryOperationLogStorage,
};
use replica_engine::ReplicaEngine;
use sync_types::{
    ClientMessage,
    ReplicaId,
    ReplicaType,
    ServerMessage,
    UserId,
};
use tokio::sync::mpsc;

pub struct Harness {
    pub authority: Arc<Authority>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            authority: Arc::new(Authority::new(
                LibraryConfig::default(),
                Arc::new(InMemoryOperationLogStorage::new()),
                Arc::new(InMemoryBaselineStorage::new()),
            )),
        }
    }

    pub fn connect(&self, replica_id: &str, user_id: &str, replica_type: ReplicaType) -> ConnectedReplica {
        let (to_authority_tx, to_authority_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (from_authority_tx, from_authority_rx) = mpsc::unbounded_channel::<ServerMessage>();
        let token = TokenInfo { user_id: UserId::from(user_id.to_string()), replica_type };
        let replica_id = ReplicaId::from(replica_id.to_string());
        let client_key = self.authority.connect(replica_id.clone(), &token, from_authority_tx);

        let engine = Arc::new(ReplicaEngine::new(
            replica_id,
            1,
            Arc::new(InMemoryOperationLogStorage::new()),
            Arc::new(InMemoryBaselineStorage::new()),
            to_authority_tx,
        ));

        ConnectedReplica {
            engine,
            client_key,
            token,
            to_authority_rx,
            from_authority_rx,
            authority: self.authority.clone(),
        }
    }

    pub async fn run_rebase(&self) {
        self.authority.run_rebase_pass(0).await.unwrap();
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ConnectedReplica {
    pub engine: Arc<ReplicaEngine>,
    client_key: ClientKey,
    token: TokenInfo,
    to_authority_rx: mpsc::UnboundedReceiver<ClientMessage>,
    from_authority_rx: mpsc::UnboundedReceiver<ServerMessage>,
    authority: Arc<Authority>,
}

impl ConnectedReplica {
    pub fn disconnect(&self) {
        self.authority.disconnect(self.client_key);
    }

    /// Peek at the next message the authority has queued for this
    /// connection without feeding it into the engine — for assertions that
    /// care about the raw wire message rather than its effect on local
    /// state (e.g. presence fan-out, which the engine otherwise treats as
    /// an application-layer no-op).
    pub fn try_recv_raw(&mut self) -> Option<ServerMessage> {
        self.from_authority_rx.try_recv().ok()
    }

    /// Forward every currently-queued outbound `ClientMessage` to the
    /// authority, applying direct replies locally but leaving any
    /// broadcast this produced for *other* connections sitting in their
    /// own `from_authority_rx` queues for the caller to inspect directly.
    pub async fn flush_to_authority(&mut self) {
        while let Ok(msg) = self.to_authority_rx.try_recv() {
            if let Some(reply) = self.authority.handle_message(self.client_key, &self.token, 0, msg).await.unwrap() {
                self.engine.handle_server_message(reply).await.unwrap();
            }
        }
    }

    /// Drain and apply exactly the messages queued right now on both
    /// directions, returning whether anything was processed.
    async fn pump_once(&mut self) -> bool {
        let mut progressed = false;
        while let Ok(msg) = self.to_authority_rx.try_recv() {
            progressed = true;
            // `handle_message`'s direct return value is this connection's
            // own reply (e.g. sync-resp); broadcasts to *other* connections
            // go out through their stored senders and are drained below.
            if let Some(reply) = self.authority.handle_message(self.client_key, &self.token, 0, msg).await.unwrap() {
                self.engine.handle_server_message(reply).await.unwrap();
            }
        }
        while let Ok(msg) = self.from_authority_rx.try_recv() {
            progressed = true;
            self.engine.handle_server_message(msg).await.unwrap();
        }
        progressed
    }
}

/// Round-robin every connected replica until none of them have anything
/// left queued in either direction — the fixed point of one round of
/// message exchange (handshakes, op fan-out, acks all settle here).
pub async fn pump_until_idle(replicas: &mut [ConnectedReplica]) {
    loop {
        let mut progressed = false;
        for replica in replicas.iter_mut() {
            if replica.pump_once().await {
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
}
