//! Wall-clock abstraction, mirrored on the same injectable-trait pattern
//! `engine_core`'s `OperationLogStorage`/`BaselineStorage` use, so
//! production code never special-cases "now" as a literal.

use std::time::{
    SystemTime,
    UNIX_EPOCH,
};

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
    }
}
