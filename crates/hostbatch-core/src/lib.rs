//! Batched host calls with deferred results.
//!
//! Calls made while a batch is open are queued and sent to the host in one
//! ordered round trip. Calls that produce a result return a [`Deferred`]
//! handle right away. Handles can be combined with ordinary operators before
//! the round trip: known operands are computed locally for free, anything
//! involving a pending handle becomes one more queued `compute` record that
//! the host evaluates in order.

mod bridge;
mod dispatcher;
mod error;
mod handle;
mod kind;
mod object;
mod operation;
mod ops;
mod record;
pub mod wire;

pub use bridge::{from_fn, BatchRequest, ChannelBridge, FnBridge, HostBridge};
pub use dispatcher::{BatchSummary, Dispatcher, DispatcherOptions, SessionPhase, GET_PROPERTY};
pub use error::{BridgeError, DecodeError, Error, HandleFault, OperationError};
pub use handle::Deferred;
pub use kind::{
    Additive, Bitwise, HostType, Integral, Invertible, Numeric, ObjectRef, Ordered, ScalarType, ValueKind,
};
pub use object::HostObject;
pub use operation::{IntWidth, Operation, Scalar};
pub use ops::{Operand, RESOLVE_PROXY_OPERATION};
pub use record::{Arg, CallRecord, HandleId, RecordKind, ResultDescriptor, Target};
pub use wire::BatchResponse;

/// Result type for dispatcher and handle operations.
pub type Result<T> = std::result::Result<T, Error>;
