//! Error types for the reference host.

use hostbatch_core::{HandleId, ObjectRef, OperationError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Wire format error: {0}")]
    Wire(#[from] serde_json::Error),

    #[error("Batch of {records} records exceeds the limit of {limit}")]
    TooManyRecords { records: usize, limit: usize },

    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("Reference to result {0} which has not been produced")]
    UnknownReference(HandleId),

    #[error("No such object: {0}")]
    UnknownObject(ObjectRef),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("{class} has no method '{method}'")]
    UnknownMethod { class: String, method: String },

    #[error("{0}")]
    Operation(#[from] OperationError),

    #[error("Runtime error: {0}")]
    Runtime(String),

    /// The record at `index` failed; every record before it has run.
    #[error("Record {index} ({member}) failed: {source}")]
    Record {
        index: usize,
        member: String,
        #[source]
        source: Box<HostError>,
    },
}

impl HostError {
    pub fn runtime(message: impl Into<String>) -> Self {
        HostError::Runtime(message.into())
    }
}
