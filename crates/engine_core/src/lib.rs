pub mod baseline_store;
pub mod compaction;
pub mod oid_alloc;
pub mod operation_log;
pub mod replica_registry;
pub mod snapshot;

pub use baseline_store::{
    BaselineStorage,
    BaselineStore,
    InMemoryBaselineStorage,
};
pub use compaction::compact_before;
pub use oid_alloc::OidAllocator;
pub use operation_log::{
    InMemoryOperationLogStorage,
    OperationLog,
    OperationLogStorage,
};
pub use replica_registry::ReplicaRegistry;
pub use snapshot::{
    apply_operations_to_value,
    materialize_root,
};
