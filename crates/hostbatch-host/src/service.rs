//! Connecting dispatchers to an [`Interpreter`].
//!
//! [`LocalBridge`] runs the host on the calling thread. [`serve`] runs it as
//! an async task answering [`BatchRequest`]s from a [`ChannelBridge`].

use std::cell::RefCell;
use std::rc::Rc;

use hostbatch_core::wire::{self, BatchResponse};
use hostbatch_core::{BatchRequest, BridgeError, CallRecord, ChannelBridge, HostBridge};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::interpreter::Interpreter;

/// A bridge to an interpreter on the same thread.
///
/// Batches still go through the wire encoding, so the host sees exactly what
/// a remote one would.
#[derive(Clone)]
pub struct LocalBridge {
    interpreter: Rc<RefCell<Interpreter>>,
}

impl LocalBridge {
    pub fn new(interpreter: Interpreter) -> Self {
        Self {
            interpreter: Rc::new(RefCell::new(interpreter)),
        }
    }

    /// Run `f` against the host between round trips.
    pub fn with_interpreter<R>(&self, f: impl FnOnce(&mut Interpreter) -> R) -> R {
        f(&mut self.interpreter.borrow_mut())
    }
}

impl HostBridge for LocalBridge {
    fn invoke_batch(&self, batch: &[CallRecord]) -> Result<BatchResponse, BridgeError> {
        let payload = wire::encode_batch(batch).map_err(|e| BridgeError::Transport(e.to_string()))?;
        let mut interpreter = self
            .interpreter
            .try_borrow_mut()
            .map_err(|_| BridgeError::Transport("host is already running a batch".to_string()))?;
        let reply = interpreter
            .execute_wire(&payload)
            .map_err(|e| BridgeError::Host(e.to_string()))?;
        wire::decode_response(&reply).map_err(|e| BridgeError::Transport(e.to_string()))
    }
}

/// Answer batch requests until every sender is gone. Returns the number of
/// batches served.
pub async fn serve(mut interpreter: Interpreter, mut requests: UnboundedReceiver<BatchRequest>) -> usize {
    info!("host service started");
    let mut served = 0;
    while let Some(request) = requests.recv().await {
        let reply = interpreter
            .execute_wire(&request.payload)
            .map_err(|e| e.to_string());
        if let Err(message) = &reply {
            warn!(error = %message, "batch aborted");
        }
        if !request.respond(reply) {
            debug!("caller stopped waiting for its batch");
        }
        served += 1;
    }
    info!(served, "host service stopped");
    served
}

/// Spawn [`serve`] on the current tokio runtime and return a bridge to it.
pub fn spawn_service(interpreter: Interpreter) -> (ChannelBridge, JoinHandle<usize>) {
    let (bridge, requests) = ChannelBridge::channel();
    let handle = tokio::spawn(serve(interpreter, requests));
    (bridge, handle)
}
