//! pstore-common: shared types for the pstore replication router.
//!
//! Every backend adapter normalizes its native schema into the request and
//! response shapes defined here, and every failure into [`StoreError`].
//! The label enums ([`Operation`], [`Code`], [`DriftKind`],
//! [`ShadowWriteOutcome`]) are what the metrics layer keys on.

use std::fmt;

/// Maximum number of payload bytes rendered by [`summarize`].
pub const SUMMARY_BYTES: usize = 64;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A type-tagged opaque payload.
///
/// Stored and returned verbatim. Two values are considered equal by the
/// consistency checker when their payload bytes are equal; the type tag is
/// carried through but never compared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Value {
    pub type_url: String,
    pub payload: Vec<u8>,
}

impl Value {
    pub fn new(type_url: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            type_url: type_url.into(),
            payload: payload.into(),
        }
    }

    /// A value with no type tag.
    pub fn raw(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(String::new(), payload)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Render at most [`SUMMARY_BYTES`] of a payload for log lines.
pub fn summarize(payload: &[u8]) -> String {
    if payload.len() <= SUMMARY_BYTES {
        String::from_utf8_lossy(payload).into_owned()
    } else {
        format!(
            "{}... ({} bytes)",
            String::from_utf8_lossy(&payload[..SUMMARY_BYTES]),
            payload.len()
        )
    }
}

// ---------------------------------------------------------------------------
// Requests / responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    /// Last-write time as reported by the backend.
    pub timestamp: i64,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResponse {
    pub timestamp: i64,
}

/// Key listing filter.
///
/// With `all_keys` set the prefix is ignored. Keys ending in any of
/// `avoid_suffix` are excluded either way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetKeysRequest {
    pub prefix: String,
    pub avoid_suffix: Vec<String>,
    pub all_keys: bool,
}

impl GetKeysRequest {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::default()
        }
    }

    pub fn all() -> Self {
        Self {
            all_keys: true,
            ..Self::default()
        }
    }

    /// Whether `key` passes this filter.
    pub fn matches(&self, key: &str) -> bool {
        if !self.all_keys && !key.starts_with(&self.prefix) {
            return false;
        }
        !self.avoid_suffix.iter().any(|s| key.ends_with(s.as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetKeysResponse {
    /// Keys in the order the backend returned them.
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteResponse {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountRequest {
    pub counter: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountResponse {
    pub count: i64,
}

// ---------------------------------------------------------------------------
// Status taxonomy
// ---------------------------------------------------------------------------

/// Outcome code of a single backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Ok,
    NotFound,
    Internal,
    Unavailable,
    DeadlineExceeded,
}

impl Code {
    pub fn as_str(self) -> &'static str {
        match self {
            Code::Ok => "OK",
            Code::NotFound => "NotFound",
            Code::Internal => "Internal",
            Code::Unavailable => "Unavailable",
            Code::DeadlineExceeded => "DeadlineExceeded",
        }
    }

    pub fn of<T>(result: &Result<T, StoreError>) -> Code {
        match result {
            Ok(_) => Code::Ok,
            Err(e) => e.code(),
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a backend, normalized across schemas.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal: {0}")]
    Internal(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),
}

impl StoreError {
    pub fn code(&self) -> Code {
        match self {
            StoreError::NotFound(_) => Code::NotFound,
            StoreError::Internal(_) => Code::Internal,
            StoreError::Unavailable(_) => Code::Unavailable,
            StoreError::DeadlineExceeded(_) => Code::DeadlineExceeded,
        }
    }

    /// The message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            StoreError::NotFound(m)
            | StoreError::Internal(m)
            | StoreError::Unavailable(m)
            | StoreError::DeadlineExceeded(m) => m,
        }
    }

    /// False for NotFound, which is an answer about the data rather than a
    /// failure of the backend to answer.
    pub fn is_backend_failure(&self) -> bool {
        !matches!(self, StoreError::NotFound(_))
    }
}

// ---------------------------------------------------------------------------
// Metric labels
// ---------------------------------------------------------------------------

/// The five routed operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Read,
    Write,
    GetKeys,
    Delete,
    Count,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::GetKeys => "get_keys",
            Operation::Delete => "delete",
            Operation::Count => "count",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which drift counter a disagreement lands in. Writes are not tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriftKind {
    Read,
    GetKeysCount,
    GetKeysOrder,
    Delete,
    Count,
}

impl DriftKind {
    pub const ALL: [DriftKind; 5] = [
        DriftKind::Read,
        DriftKind::GetKeysCount,
        DriftKind::GetKeysOrder,
        DriftKind::Delete,
        DriftKind::Count,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DriftKind::Read => "read",
            DriftKind::GetKeysCount => "get_keys_count",
            DriftKind::GetKeysOrder => "get_keys_order",
            DriftKind::Delete => "delete",
            DriftKind::Count => "count",
        }
    }
}

impl fmt::Display for DriftKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one element of the shadow write queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowWriteOutcome {
    Delivered,
    Failed,
    /// No configured backend carries the target name.
    Dropped,
}

impl ShadowWriteOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ShadowWriteOutcome::Delivered => "delivered",
            ShadowWriteOutcome::Failed => "failed",
            ShadowWriteOutcome::Dropped => "dropped",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
