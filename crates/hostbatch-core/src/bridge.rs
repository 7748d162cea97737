//! The transport between a dispatcher and the host.
//!
//! A [`HostBridge`] takes one ordered batch and returns the result map. It is
//! called synchronously: the dispatcher blocks until the whole batch has run.
//!
//! ## Channel Architecture
//!
//! [`ChannelBridge`] hands the encoded batch to a host living on another
//! thread or task:
//!
//! - Batch requests: sent via `tokio::sync::mpsc::UnboundedSender` (non-blocking send from sync code)
//! - Batch replies: received via `std::sync::mpsc::Receiver` (blocking receive in the caller)

use std::sync::mpsc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use crate::error::BridgeError;
use crate::record::CallRecord;
use crate::wire::{self, BatchResponse};

/// Runs batches on a host.
pub trait HostBridge {
    /// Execute `batch` in order and return every requested result keyed by
    /// result id.
    fn invoke_batch(&self, batch: &[CallRecord]) -> Result<BatchResponse, BridgeError>;
}

/// A bridge backed by a closure.
pub struct FnBridge<F> {
    f: F,
}

/// Build a bridge from a closure over the batch.
pub fn from_fn<F>(f: F) -> FnBridge<F>
where
    F: Fn(&[CallRecord]) -> Result<BatchResponse, BridgeError>,
{
    FnBridge { f }
}

impl<F> HostBridge for FnBridge<F>
where
    F: Fn(&[CallRecord]) -> Result<BatchResponse, BridgeError>,
{
    fn invoke_batch(&self, batch: &[CallRecord]) -> Result<BatchResponse, BridgeError> {
        (self.f)(batch)
    }
}

/// One encoded batch waiting for a host.
pub struct BatchRequest {
    /// The batch in wire form.
    pub payload: String,
    /// Where the host sends the encoded response map, or an error message if
    /// the batch aborted.
    response_tx: mpsc::Sender<Result<String, String>>,
}

impl BatchRequest {
    /// Reply to the caller. Returns `false` if the caller stopped waiting.
    pub fn respond(self, reply: Result<String, String>) -> bool {
        self.response_tx.send(reply).is_ok()
    }
}

/// A bridge that forwards encoded batches over a channel.
///
/// Cloneable so several dispatchers can share one host.
#[derive(Clone)]
pub struct ChannelBridge {
    tx: UnboundedSender<BatchRequest>,
}

impl ChannelBridge {
    pub fn new(tx: UnboundedSender<BatchRequest>) -> Self {
        Self { tx }
    }

    /// A bridge plus the receiving end a host serves from.
    pub fn channel() -> (Self, UnboundedReceiver<BatchRequest>) {
        let (tx, rx) = unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl HostBridge for ChannelBridge {
    fn invoke_batch(&self, batch: &[CallRecord]) -> Result<BatchResponse, BridgeError> {
        let payload = wire::encode_batch(batch).map_err(|e| BridgeError::Transport(e.to_string()))?;
        trace!(%payload, "forwarding batch");

        let (response_tx, response_rx) = mpsc::channel();
        self.tx
            .send(BatchRequest { payload, response_tx })
            .map_err(|_| BridgeError::Disconnected)?;

        let reply = response_rx
            .recv()
            .map_err(|_| BridgeError::Disconnected)?
            .map_err(BridgeError::Host)?;
        wire::decode_response(&reply).map_err(|e| BridgeError::Transport(e.to_string()))
    }
}
