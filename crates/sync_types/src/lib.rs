pub mod baseline;
pub mod hlc;
pub mod message;
pub mod oid;
pub mod operation;
pub mod replica;
pub mod value;

pub use baseline::Baseline;
pub use hlc::{
    HlcClock,
    HlcTimestamp,
};
pub use message::{
    ClientMessage,
    Presence,
    ServerMessage,
    UserProfile,
};
pub use oid::Oid;
pub use operation::{
    EffectKey,
    Operation,
    OperationKind,
};
pub use replica::{
    ReplicaId,
    ReplicaInfo,
    ReplicaStatus,
    ReplicaType,
    UserId,
};
pub use value::Value;
