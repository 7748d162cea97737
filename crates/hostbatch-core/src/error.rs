//! Error types for the batching client.

use thiserror::Error;

use crate::kind::ValueKind;
use crate::record::HandleId;

/// Errors surfaced by the dispatcher and by deferred handles.
#[derive(Error, Debug)]
pub enum Error {
    /// The batch session was used out of order (opened twice, ended while
    /// closed, or touched while a round trip is in flight).
    #[error("Session state error: {0}")]
    SessionState(String),

    /// No host bridge was ever connected to the dispatcher.
    #[error("Host bridge not initialized")]
    UninitializedBridge,

    /// A host result did not match the declared kind of its handle.
    #[error("Serialization error: {0}")]
    Serialization(#[from] DecodeError),

    /// The round trip failed after the host may have executed a prefix of
    /// the batch.
    #[error("Batch of {records} records failed: {source}")]
    PartialBatchFailure {
        records: usize,
        #[source]
        source: BridgeError,
    },

    /// A record argument refers to a handle not produced earlier in the
    /// current batch.
    #[error("Reference to handle {0} which is not pending in this batch")]
    ForwardReference(HandleId),

    /// A record was handed to the wrong enqueue operation.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The handle has no value yet.
    #[error("Handle {0} is not resolved")]
    Unresolved(HandleId),

    /// The handle will never resolve.
    #[error("Handle {id} faulted: {fault}")]
    Faulted { id: HandleId, fault: HandleFault },
}

impl Error {
    pub fn session_state(message: impl Into<String>) -> Self {
        Error::SessionState(message.into())
    }

    pub fn invalid_record(message: impl Into<String>) -> Self {
        Error::InvalidRecord(message.into())
    }
}

/// A host payload whose shape does not fit the declared kind.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("expected {expected}, got {found}")]
    Shape { expected: ValueKind, found: String },

    #[error("{value} does not fit in {target}")]
    OutOfRange { value: String, target: &'static str },

    #[error("array element {index}: {source}")]
    Element {
        index: usize,
        #[source]
        source: Box<DecodeError>,
    },
}

impl DecodeError {
    pub fn shape(expected: ValueKind, found: &serde_json::Value) -> Self {
        DecodeError::Shape {
            expected,
            found: json_shape(found).to_string(),
        }
    }

    pub fn out_of_range(value: impl ToString, target: &'static str) -> Self {
        DecodeError::OutOfRange {
            value: value.to_string(),
            target,
        }
    }
}

/// Short name of a JSON value's shape, used in error messages.
pub(crate) fn json_shape(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(n) if n.is_f64() => "float",
        serde_json::Value::Number(_) => "integer",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Failure of the round trip itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// The request could not be delivered or the reply could not be read.
    #[error("transport error: {0}")]
    Transport(String),

    /// The host rejected or aborted the batch.
    #[error("host error: {0}")]
    Host(String),

    /// The host side of the channel has gone away.
    #[error("host disconnected")]
    Disconnected,
}

/// Failure of a pure operator over scalar operands.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperationError {
    #[error("cannot apply {op} to {lhs} and {rhs}")]
    TypeMismatch {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("integer overflow in {0}")]
    Overflow(&'static str),

    #[error("division by zero in {0}")]
    DivisionByZero(&'static str),

    #[error("shift count {0} out of range")]
    ShiftOutOfRange(i64),

    #[error("{op} expects {expected} operands")]
    Arity { op: &'static str, expected: usize },

    #[error("unknown operation '{0}'")]
    Unknown(String),

    #[error("unknown integer width '{0}'")]
    UnknownWidth(String),
}

/// Why a handle will never receive a value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HandleFault {
    #[error("{0}")]
    Decode(DecodeError),

    #[error("no result for this handle in the batch response")]
    Missing,

    #[error("batch failed: {0}")]
    BatchFailed(String),

    #[error("an operand faulted: {0}")]
    Operand(String),

    #[error("the session that produced the operand is gone")]
    Detached,

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("{0}")]
    Operation(OperationError),
}
