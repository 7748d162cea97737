//! Wrapper for calls against one host object.

use crate::dispatcher::{BatchSummary, Dispatcher};
use crate::handle::Deferred;
use crate::kind::{HostType, ObjectRef};
use crate::record::Arg;
use crate::Result;

/// A host object plus the session its calls go through.
///
/// Every call follows the dispatcher's rules: queued while a batch is open,
/// an immediate round trip otherwise.
#[derive(Clone)]
pub struct HostObject {
    dispatcher: Dispatcher,
    reference: ObjectRef,
}

impl HostObject {
    pub fn new(dispatcher: Dispatcher, reference: ObjectRef) -> Self {
        Self {
            dispatcher,
            reference,
        }
    }

    pub fn reference(&self) -> ObjectRef {
        self.reference
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn set(&self, property: &str, value: impl Into<Arg>) -> Result<()> {
        self.dispatcher.set_property(self.reference, property, value)
    }

    pub fn call(&self, method: &str, args: Vec<Arg>) -> Result<()> {
        self.dispatcher.invoke(self.reference, method, args)
    }

    pub fn call_with_result<T: HostType>(&self, method: &str, args: Vec<Arg>) -> Result<Deferred<T>> {
        self.dispatcher.invoke_with_result(self.reference, method, args)
    }

    pub fn get<T: HostType>(&self, property: &str) -> Result<Deferred<T>> {
        self.dispatcher.get_property(self.reference, property)
    }

    pub fn begin_batch(&self) -> Result<()> {
        self.dispatcher.begin_batch()
    }

    pub fn end_batch(&self) -> Result<BatchSummary> {
        self.dispatcher.end_batch()
    }
}

impl std::fmt::Debug for HostObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostObject")
            .field("reference", &self.reference)
            .field("phase", &self.dispatcher.phase())
            .finish()
    }
}
