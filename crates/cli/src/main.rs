//! `sync-demo`: runs a handful of simulated replicas against one
//! in-process library and prints the converged document, standing in for
//! the teacher's `local_backend` binary — a thin binary crate wiring the
//! library crates together, with `clap`-driven knobs instead of a real
//! transport/config surface (out of scope here per SPEC_FULL.md §4.6).

use std::{
    sync::Arc,
    time::{
        SystemTime,
        UNIX_EPOCH,
    },
};

use authority::{
    Authority,
    LibraryConfig,
    TokenInfo,
};
use clap::Parser;
use engine_core::{
    InMemoryBaselineStorage,
    InMemoryOperationLogStorage,
};
use replica_engine::ReplicaEngine;
use sync_types::{
    Oid,
    Operation,
    OperationKind,
    ReplicaId,
    ReplicaType,
    UserId,
    Value,
};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(about = "Run simulated replicas against one in-process sync library")]
struct Args {
    /// Number of simulated replicas to connect.
    #[arg(long, default_value_t = 2)]
    replicas: u32,

    /// Truancy threshold, in milliseconds, for the shared library.
    #[arg(long, default_value_t = 60_000)]
    truancy_threshold_ms: u64,

    /// Document collection name used for the demo object.
    #[arg(long, default_value = "items")]
    collection: String,
}

/// One simulated replica's connection to the in-process authority: its
/// engine plus the background task ferrying messages in both directions.
struct SimulatedReplica {
    engine: Arc<ReplicaEngine>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let authority = Arc::new(Authority::new(
        LibraryConfig { truancy_threshold_ms: args.truancy_threshold_ms },
        Arc::new(InMemoryOperationLogStorage::new()),
        Arc::new(InMemoryBaselineStorage::new()),
    ));

    let oid = Oid::root(&args.collection, "demo");
    let mut replicas = Vec::new();

    for i in 0..args.replicas {
        let replica_id = ReplicaId::from(format!("replica-{i}"));
        let (to_authority_tx, mut to_authority_rx) = mpsc::unbounded_channel();
        let (from_authority_tx, mut from_authority_rx) = mpsc::unbounded_channel();
        let token = TokenInfo { user_id: UserId::from(format!("user-{i}")), replica_type: ReplicaType::Realtime };
        let client_key = authority.connect(replica_id.clone(), &token, from_authority_tx);

        let engine = Arc::new(ReplicaEngine::new(
            replica_id.clone(),
            1,
            Arc::new(InMemoryOperationLogStorage::new()),
            Arc::new(InMemoryBaselineStorage::new()),
            to_authority_tx,
        ));

        // Direct replies (sync-resp, heartbeat-response) come back from
        // `handle_message` itself; fan-out (op-re, global-ack, presence)
        // arrives on `from_authority_rx`. Both feed the same engine.
        let authority_for_outbound = authority.clone();
        let engine_for_outbound = engine.clone();
        tokio::spawn(async move {
            while let Some(msg) = to_authority_rx.recv().await {
                if let Some(reply) = authority_for_outbound.handle_message(client_key, &token, 0, msg).await? {
                    engine_for_outbound.handle_server_message(reply).await?;
                }
            }
            Ok::<_, anyhow::Error>(())
        });

        let engine_for_inbound = engine.clone();
        tokio::spawn(async move {
            while let Some(msg) = from_authority_rx.recv().await {
                engine_for_inbound.handle_server_message(msg).await?;
            }
            Ok::<_, anyhow::Error>(())
        });

        replicas.push(SimulatedReplica { engine });
    }

    for replica in &replicas {
        replica.engine.connect();
    }
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    if let Some(first) = replicas.first() {
        let replica_id = ReplicaId::from("replica-0".to_string());
        first
            .engine
            .submit_operation(
                |ts| Operation {
                    oid: oid.clone(),
                    timestamp: ts,
                    data: OperationKind::Initialize { snapshot: Value::Object(Default::default()) },
                    replica_id: replica_id.clone(),
                },
                0,
            )
            .await?;
        first
            .engine
            .submit_operation(
                |ts| Operation {
                    oid: oid.clone(),
                    timestamp: ts,
                    data: OperationKind::Set { field: "status".into(), value: Value::from("ready") },
                    replica_id: replica_id.clone(),
                },
                1,
            )
            .await?;
    }
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    for (i, replica) in replicas.iter().enumerate() {
        let value = replica.engine.local_state().materialize(&oid).await?;
        println!("replica-{i} sees {value:?}");
    }

    let now_ms = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as u64;
    authority.run_rebase_pass(now_ms).await?;
    Ok(())
}
