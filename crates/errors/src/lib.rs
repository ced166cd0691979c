//! Error classification for the sync engine, in the style of a tagged
//! `anyhow::Error` context object: handlers attach an `ErrorMetadata` via
//! `.context(...)` and callers at the edge of the system (the authority's
//! message dispatcher, the replica engine's reconnect loop) classify on it
//! rather than matching on error message text.
//!
//! Scoped to the error kinds spec.md §7 actually names for this engine;
//! the teacher's `ErrorMetadata` additionally carries Sentry levels,
//! Prometheus counters and HTTP/gRPC/WebSocket status mappings, which are
//! integrations with out-of-scope collaborators (observability stack,
//! transport plumbing) and are dropped here rather than faked.

use std::borrow::Cow;

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub code: ErrorCode,
    /// Short, ScreamingCamelCase, stable identifier usable in tests and
    /// logs (e.g. `"ReplicaOwnershipViolation"`).
    pub short_msg: Cow<'static, str>,
    /// Longer, human-readable message.
    pub msg: Cow<'static, str>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed request; never retried as-is. spec.md §7 "Corrupt
    /// operation" is intentionally *not* surfaced this way — it's dropped
    /// silently by `OperationLog::insert_all` instead.
    BadRequest,
    /// A write was attempted with a read-only token (spec.md §4.4.2, §7).
    Forbidden,
    /// A replica id reappeared under a different user (spec.md §7
    /// "ReplicaOwnership violation").
    ReplicaOwnershipViolation,
    /// The replica's schema version doesn't match local storage (spec.md
    /// §7 "Schema mismatch"); fatal at initialization, never silently
    /// downgraded.
    SchemaMismatch,
    /// Storage I/O failure; fatal for the current message, safe to retry
    /// (spec.md §4.1 "Failure", §7 "Storage I/O").
    StorageUnavailable,
    /// Anything else unexpected.
    Internal,
}

impl ErrorMetadata {
    pub fn bad_request(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self { code: ErrorCode::BadRequest, short_msg: short_msg.into(), msg: msg.into() }
    }

    pub fn forbidden(short_msg: impl Into<Cow<'static, str>>, msg: impl Into<Cow<'static, str>>) -> Self {
        Self { code: ErrorCode::Forbidden, short_msg: short_msg.into(), msg: msg.into() }
    }

    pub fn replica_ownership_violation(replica_id: impl std::fmt::Display) -> Self {
        Self {
            code: ErrorCode::ReplicaOwnershipViolation,
            short_msg: "ReplicaOwnershipViolation".into(),
            msg: format!(
                "Replica {replica_id} is already registered to a different user; rotate the \
                 replica id and reconnect with resyncAll"
            )
            .into(),
        }
    }

    pub fn schema_mismatch(expected: u32, actual: u32) -> Self {
        Self {
            code: ErrorCode::SchemaMismatch,
            short_msg: "SchemaMismatch".into(),
            msg: format!(
                "Local storage is at schema version {actual}, but this replica expects \
                 {expected}; run migrations before reconnecting"
            )
            .into(),
        }
    }

    pub fn storage_unavailable(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::StorageUnavailable,
            short_msg: "StorageUnavailable".into(),
            msg: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self { code: ErrorCode::Internal, short_msg: "InternalError".into(), msg: msg.into() }
    }

    pub fn is_forbidden(&self) -> bool {
        self.code == ErrorCode::Forbidden
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.code, ErrorCode::StorageUnavailable)
    }
}

pub trait ErrorMetadataAnyhowExt {
    fn is_forbidden(&self) -> bool;
    fn is_retryable(&self) -> bool;
    fn error_code(&self) -> Option<ErrorCode>;
    fn short_msg(&self) -> &str;
}

impl ErrorMetadataAnyhowExt for anyhow::Error {
    fn is_forbidden(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>().map(ErrorMetadata::is_forbidden).unwrap_or(false)
    }

    fn is_retryable(&self) -> bool {
        self.downcast_ref::<ErrorMetadata>().map(ErrorMetadata::is_retryable).unwrap_or(false)
    }

    fn error_code(&self) -> Option<ErrorCode> {
        self.downcast_ref::<ErrorMetadata>().map(|e| e.code)
    }

    fn short_msg(&self) -> &str {
        self.downcast_ref::<ErrorMetadata>().map(|e| e.short_msg.as_ref()).unwrap_or("InternalError")
    }
}
