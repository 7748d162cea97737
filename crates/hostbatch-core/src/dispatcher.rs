//! The batch session.
//!
//! A [`Dispatcher`] owns one host connection and at most one open batch.
//! While a batch is open, calls are appended to an ordered queue and every
//! call that produces a result hands back a pending [`Deferred`]. Ending the
//! batch sends the whole queue in one round trip and settles every handle
//! from the response.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use crate::bridge::HostBridge;
use crate::error::{Error, HandleFault};
use crate::handle::{Deferred, PendingSlot};
use crate::kind::{HostType, ObjectRef};
use crate::object::HostObject;
use crate::record::{Arg, CallRecord, HandleId, ResultDescriptor, Target};
use crate::wire::BatchResponse;
use crate::Result;

/// Global host function that reads a property.
pub const GET_PROPERTY: &str = "getProperty";

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    /// Run calls made outside a batch as single-record round trips.
    /// When disabled those calls fail with a session state error.
    pub immediate_fallback: bool,
}

impl DispatcherOptions {
    pub fn new() -> Self {
        Self {
            immediate_fallback: true,
        }
    }

    pub fn immediate_fallback(mut self, enabled: bool) -> Self {
        self.immediate_fallback = enabled;
        self
    }
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Open,
    /// The queue has been handed to the bridge.
    InFlight,
}

/// Counts from one finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub records: usize,
    pub resolved: usize,
    pub faulted: usize,
    /// Response entries that matched no pending handle.
    pub unmatched: usize,
}

#[derive(Default)]
struct Session {
    phase: SessionPhase,
    queue: Vec<CallRecord>,
    registry: HashMap<HandleId, Rc<dyn PendingSlot>>,
}

impl Session {
    /// Every reference must name a handle produced earlier in this batch.
    fn check_references(&self, record: &CallRecord) -> Result<()> {
        match record.references().find(|id| !self.registry.contains_key(id)) {
            Some(id) => Err(Error::ForwardReference(id)),
            None => Ok(()),
        }
    }

    fn ensure_not_in_flight(&self) -> Result<()> {
        if self.phase == SessionPhase::InFlight {
            return Err(Error::session_state("a batch round trip is in flight"));
        }
        Ok(())
    }
}

struct Inner {
    bridge: RefCell<Option<Rc<dyn HostBridge>>>,
    options: DispatcherOptions,
    session: RefCell<Session>,
}

/// Handle to a batch session. Clones share the same session.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Rc<Inner>,
}

/// Non-owning link from a pending handle back to its session.
#[derive(Clone)]
pub(crate) struct WeakDispatcher(Weak<Inner>);

impl WeakDispatcher {
    pub(crate) fn upgrade(&self) -> Option<Dispatcher> {
        self.0.upgrade().map(|inner| Dispatcher { inner })
    }

    pub(crate) fn ptr_eq(&self, other: &WeakDispatcher) -> bool {
        self.0.ptr_eq(&other.0)
    }

    #[cfg(test)]
    pub(crate) fn dangling() -> Self {
        WeakDispatcher(Weak::new())
    }
}

enum Queued<T> {
    Queued(T),
    NotBatching(CallRecord),
}

impl Dispatcher {
    pub fn new(bridge: impl HostBridge + 'static) -> Self {
        Self::with_options(bridge, DispatcherOptions::default())
    }

    pub fn with_options(bridge: impl HostBridge + 'static, options: DispatcherOptions) -> Self {
        let dispatcher = Self::unconnected(options);
        dispatcher.connect(bridge);
        dispatcher
    }

    /// A dispatcher with no host yet. Every round trip fails with
    /// [`Error::UninitializedBridge`] until [`connect`](Self::connect) is
    /// called.
    pub fn unconnected(options: DispatcherOptions) -> Self {
        Self {
            inner: Rc::new(Inner {
                bridge: RefCell::new(None),
                options,
                session: RefCell::new(Session::default()),
            }),
        }
    }

    pub fn connect(&self, bridge: impl HostBridge + 'static) {
        *self.inner.bridge.borrow_mut() = Some(Rc::new(bridge));
    }

    pub fn options(&self) -> &DispatcherOptions {
        &self.inner.options
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.session.borrow().phase
    }

    pub fn is_batching(&self) -> bool {
        self.phase() == SessionPhase::Open
    }

    /// Number of records waiting in the open batch.
    pub fn queued_len(&self) -> usize {
        self.inner.session.borrow().queue.len()
    }

    /// Number of handles waiting on the open batch.
    pub fn pending_len(&self) -> usize {
        self.inner.session.borrow().registry.len()
    }

    /// A wrapper for calls against one host object.
    pub fn object(&self, reference: ObjectRef) -> HostObject {
        HostObject::new(self.clone(), reference)
    }

    pub(crate) fn downgrade(&self) -> WeakDispatcher {
        WeakDispatcher(Rc::downgrade(&self.inner))
    }

    fn bridge(&self) -> Result<Rc<dyn HostBridge>> {
        self.inner
            .bridge
            .borrow()
            .clone()
            .ok_or(Error::UninitializedBridge)
    }

    pub fn begin_batch(&self) -> Result<()> {
        self.bridge()?;
        let mut session = self.inner.session.borrow_mut();
        match session.phase {
            SessionPhase::Idle => {
                session.phase = SessionPhase::Open;
                debug!("batch opened");
                Ok(())
            }
            SessionPhase::Open => Err(Error::session_state("a batch is already open")),
            SessionPhase::InFlight => Err(Error::session_state("a batch round trip is in flight")),
        }
    }

    /// Queue a record that produces no result.
    ///
    /// Returns `false` without queueing anything when no batch is open.
    pub fn enqueue(&self, record: CallRecord) -> Result<bool> {
        self.push(record).map(|queued| matches!(queued, Queued::Queued(())))
    }

    /// Queue a record whose result should land in a new handle of type `T`.
    ///
    /// Returns `None` without queueing anything when no batch is open.
    pub fn enqueue_with_result<T: HostType>(&self, record: CallRecord) -> Result<Option<Deferred<T>>> {
        self.push_with_result(record).map(|queued| match queued {
            Queued::Queued(handle) => Some(handle),
            Queued::NotBatching(_) => None,
        })
    }

    fn push(&self, record: CallRecord) -> Result<Queued<()>> {
        if record.kind.produces_result() {
            return Err(Error::invalid_record(format!(
                "{:?} records produce a result; queue them with enqueue_with_result",
                record.kind
            )));
        }
        let mut session = self.inner.session.borrow_mut();
        session.ensure_not_in_flight()?;
        if session.phase == SessionPhase::Idle {
            return Ok(Queued::NotBatching(record));
        }
        session.check_references(&record)?;
        debug!(kind = ?record.kind, member = %record.member, "record queued");
        session.queue.push(record);
        Ok(Queued::Queued(()))
    }

    fn push_with_result<T: HostType>(&self, mut record: CallRecord) -> Result<Queued<Deferred<T>>> {
        if !record.kind.produces_result() {
            return Err(Error::invalid_record(format!(
                "{:?} records produce no result; queue them with enqueue",
                record.kind
            )));
        }
        if record.result.is_some() {
            return Err(Error::invalid_record("record already carries a result slot"));
        }
        let mut session = self.inner.session.borrow_mut();
        session.ensure_not_in_flight()?;
        if session.phase == SessionPhase::Idle {
            return Ok(Queued::NotBatching(record));
        }
        session.check_references(&record)?;

        let handle = Deferred::<T>::pending(self.downgrade());
        record.result = Some(handle.descriptor());
        debug!(kind = ?record.kind, member = %record.member, id = %handle.id(), "record queued with result");
        session.registry.insert(handle.id(), handle.registry_entry());
        session.queue.push(record);
        Ok(Queued::Queued(handle))
    }

    /// Send the open batch and settle every pending handle.
    ///
    /// The session is back to idle afterwards whatever the outcome. If the
    /// round trip fails every handle of the batch is faulted and the host
    /// may have run any prefix of the records.
    pub fn end_batch(&self) -> Result<BatchSummary> {
        let (bridge, queue, registry) = {
            let mut session = self.inner.session.borrow_mut();
            match session.phase {
                SessionPhase::Open => {}
                SessionPhase::Idle => return Err(Error::session_state("no batch is open")),
                SessionPhase::InFlight => {
                    return Err(Error::session_state("a batch round trip is in flight"))
                }
            }
            if session.queue.is_empty() {
                session.phase = SessionPhase::Idle;
                debug!("empty batch closed without a round trip");
                return Ok(BatchSummary::default());
            }
            let bridge = self.bridge()?;
            session.phase = SessionPhase::InFlight;
            (
                bridge,
                std::mem::take(&mut session.queue),
                std::mem::take(&mut session.registry),
            )
        };

        let records = queue.len();
        info!(records, pending = registry.len(), "sending batch");
        let outcome = bridge.invoke_batch(&queue);
        self.inner.session.borrow_mut().phase = SessionPhase::Idle;

        match outcome {
            Ok(response) => Ok(settle(records, registry, &response)),
            Err(source) => {
                error!(records, error = %source, "batch round trip failed");
                let fault = HandleFault::BatchFailed(source.to_string());
                for slot in registry.values() {
                    slot.fault(fault.clone());
                }
                Err(Error::PartialBatchFailure { records, source })
            }
        }
    }

    /// Assign a property on a host object.
    pub fn set_property(&self, target: impl Into<Target>, name: &str, value: impl Into<Arg>) -> Result<()> {
        self.submit(CallRecord::set_property(target, name, value))
    }

    /// Call a host function and discard its result.
    pub fn invoke(&self, target: impl Into<Target>, method: &str, args: Vec<Arg>) -> Result<()> {
        self.submit(CallRecord::invoke(target, method, args))
    }

    /// Call a host function and keep its result.
    ///
    /// Inside a batch the handle is pending until the batch ends; outside
    /// one it comes back already resolved.
    pub fn invoke_with_result<T: HostType>(
        &self,
        target: impl Into<Target>,
        method: &str,
        args: Vec<Arg>,
    ) -> Result<Deferred<T>> {
        match self.push_with_result(CallRecord::invoke_with_result(target, method, args))? {
            Queued::Queued(handle) => Ok(handle),
            Queued::NotBatching(record) => self.immediate_result(record),
        }
    }

    /// Read a property through the host's global `getProperty`.
    pub fn get_property<T: HostType>(&self, target: impl Into<Target>, name: &str) -> Result<Deferred<T>> {
        let owner = match target.into() {
            Target::Global => Arg::Literal(JsonValue::Null),
            Target::Object(reference) => Arg::from(reference),
            Target::Pending(descriptor) => Arg::Ref(descriptor),
        };
        self.invoke_with_result(Target::Global, GET_PROPERTY, vec![owner, Arg::from(name)])
    }

    fn submit(&self, record: CallRecord) -> Result<()> {
        match self.push(record)? {
            Queued::Queued(()) => Ok(()),
            Queued::NotBatching(record) => self.round_trip(record).map(|_| ()),
        }
    }

    fn immediate_result<T: HostType>(&self, mut record: CallRecord) -> Result<Deferred<T>> {
        let id = HandleId::new();
        record.result = Some(ResultDescriptor {
            id,
            requires_reference: T::KIND.requires_reference(),
        });
        let response = self.round_trip(record)?;
        let payload = response.get(&id.to_string()).ok_or(Error::Faulted {
            id,
            fault: HandleFault::Missing,
        })?;
        Ok(Deferred::resolved(T::decode(payload)?))
    }

    /// A single record outside any batch.
    fn round_trip(&self, record: CallRecord) -> Result<BatchResponse> {
        if !self.inner.options.immediate_fallback {
            return Err(Error::session_state(format!(
                "no batch is open for '{}' and immediate fallback is disabled",
                record.member
            )));
        }
        if record.references().next().is_some() {
            return Err(Error::session_state(format!(
                "'{}' reads pending results but no batch is open",
                record.member
            )));
        }
        let bridge = self.bridge()?;
        debug!(kind = ?record.kind, member = %record.member, "immediate round trip");

        self.inner.session.borrow_mut().phase = SessionPhase::InFlight;
        let outcome = bridge.invoke_batch(std::slice::from_ref(&record));
        self.inner.session.borrow_mut().phase = SessionPhase::Idle;

        outcome.map_err(|source| {
            error!(member = %record.member, error = %source, "immediate round trip failed");
            Error::PartialBatchFailure { records: 1, source }
        })
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::unconnected(DispatcherOptions::default())
    }
}

/// Resolve every registered handle from the response map.
fn settle(
    records: usize,
    mut registry: HashMap<HandleId, Rc<dyn PendingSlot>>,
    response: &BatchResponse,
) -> BatchSummary {
    let mut summary = BatchSummary {
        records,
        ..BatchSummary::default()
    };

    for (key, payload) in response {
        let slot = key
            .parse::<HandleId>()
            .ok()
            .and_then(|id| registry.remove(&id));
        let Some(slot) = slot else {
            warn!(id = %key, "response entry matches no pending handle");
            summary.unmatched += 1;
            continue;
        };
        match slot.resolve_json(payload) {
            Ok(()) => summary.resolved += 1,
            Err(err) => {
                warn!(id = %key, expected = %slot.kind(), error = %err, "host result does not fit its handle");
                slot.fault(HandleFault::Decode(err));
                summary.faulted += 1;
            }
        }
    }

    for (id, slot) in registry {
        warn!(%id, "host returned no result for handle");
        slot.fault(HandleFault::Missing);
        summary.faulted += 1;
    }

    debug!(?summary, "batch settled");
    summary
}
