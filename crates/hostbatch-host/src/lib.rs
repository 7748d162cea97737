//! A reference host for batched calls.
//!
//! Consumes the wire format produced by `hostbatch-core`: objects live in a
//! heap and are handed out as reference tokens, global functions such as
//! `compute` and `createObject` are built in, and each batch runs in order
//! with earlier results substituted into later records.

mod builtins;
mod error;
mod interpreter;
mod runtime;
mod service;
mod value;

pub use builtins::compute;
pub use error::HostError;
pub use interpreter::{HostOptions, Interpreter, NativeFunction, NativeMethod, INVOKE_FUNCTION};
pub use runtime::{HeapObject, PrintSink, Runtime, BOXED_CLASS, DEFAULT_CLASS};
pub use service::{serve, spawn_service, LocalBridge};
pub use value::HostValue;

pub type Result<T> = std::result::Result<T, HostError>;
