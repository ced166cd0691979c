pub mod buffer;
pub mod engine;
pub mod state;

pub use buffer::OperationBuffer;
pub use engine::{
    ConnectionState,
    ReplicaEngine,
};
pub use state::{
    ReplicaState,
    SubscriptionHandle,
};
