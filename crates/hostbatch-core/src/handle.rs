//! Deferred handles: typed placeholders for values the host has not
//! returned yet.
//!
//! A handle is created either pre-resolved around a local value, or pending
//! by the dispatcher when a record with a result is queued. A pending handle
//! is resolved at most once from the batch response; after that its value
//! never changes and it no longer refers to any session. A handle that can
//! never be resolved is faulted and records why.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use serde_json::Value as JsonValue;

use crate::dispatcher::WeakDispatcher;
use crate::error::{DecodeError, Error, HandleFault};
use crate::kind::{HostType, ValueKind};
use crate::record::{HandleId, ResultDescriptor};

enum State<T> {
    /// Waiting on the batch owned by this session.
    Pending(WeakDispatcher),
    Resolved(T),
    Faulted(HandleFault),
}

pub(crate) struct Slot<T> {
    id: HandleId,
    state: RefCell<State<T>>,
}

/// Type-erased view of a slot, kept in the dispatcher's registry so one
/// response map can resolve handles of different kinds.
pub(crate) trait PendingSlot {
    fn kind(&self) -> ValueKind;

    /// Decode and store a payload. A slot that already settled is left
    /// untouched.
    fn resolve_json(&self, payload: &JsonValue) -> Result<(), DecodeError>;

    fn fault(&self, fault: HandleFault);
}

impl<T: HostType> PendingSlot for Slot<T> {
    fn kind(&self) -> ValueKind {
        T::KIND
    }

    fn resolve_json(&self, payload: &JsonValue) -> Result<(), DecodeError> {
        let mut state = self.state.borrow_mut();
        if let State::Pending(_) = *state {
            *state = State::Resolved(T::decode(payload)?);
        }
        Ok(())
    }

    fn fault(&self, fault: HandleFault) {
        let mut state = self.state.borrow_mut();
        if let State::Pending(_) = *state {
            *state = State::Faulted(fault);
        }
    }
}

/// What an operand currently knows about itself.
pub(crate) enum Snapshot<T> {
    Resolved(T),
    Pending(WeakDispatcher, ResultDescriptor),
    Faulted(HandleFault),
}

/// A value of type `T` that may still be on its way from the host.
pub struct Deferred<T: HostType> {
    slot: Rc<Slot<T>>,
}

impl<T: HostType> Deferred<T> {
    /// Wrap a value that is already known. No session is involved.
    pub fn resolved(value: T) -> Self {
        Self::with_state(State::Resolved(value))
    }

    pub(crate) fn pending(session: WeakDispatcher) -> Self {
        Self::with_state(State::Pending(session))
    }

    pub(crate) fn faulted(fault: HandleFault) -> Self {
        Self::with_state(State::Faulted(fault))
    }

    fn with_state(state: State<T>) -> Self {
        Self {
            slot: Rc::new(Slot {
                id: HandleId::new(),
                state: RefCell::new(state),
            }),
        }
    }

    pub fn id(&self) -> HandleId {
        self.slot.id
    }

    pub fn kind(&self) -> ValueKind {
        T::KIND
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.slot.state.borrow(), State::Resolved(_))
    }

    /// Still waiting on an open batch.
    pub fn is_pending(&self) -> bool {
        matches!(*self.slot.state.borrow(), State::Pending(_))
    }

    pub fn value(&self) -> Option<T> {
        match &*self.slot.state.borrow() {
            State::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn fault(&self) -> Option<HandleFault> {
        match &*self.slot.state.borrow() {
            State::Faulted(fault) => Some(fault.clone()),
            _ => None,
        }
    }

    pub fn try_value(&self) -> crate::Result<T> {
        match &*self.slot.state.borrow() {
            State::Resolved(value) => Ok(value.clone()),
            State::Pending(_) => Err(Error::Unresolved(self.id())),
            State::Faulted(fault) => Err(Error::Faulted {
                id: self.id(),
                fault: fault.clone(),
            }),
        }
    }

    /// Resolve from a host payload.
    ///
    /// Resolution happens once: a handle that already holds a value returns
    /// the cached value and ignores the payload.
    pub fn resolve_payload(&self, payload: &JsonValue) -> crate::Result<T> {
        self.slot.resolve_json(payload)?;
        self.try_value()
    }

    /// The result slot this handle names on the wire.
    pub fn descriptor(&self) -> ResultDescriptor {
        ResultDescriptor {
            id: self.id(),
            requires_reference: T::KIND.requires_reference(),
        }
    }

    pub(crate) fn snapshot(&self) -> Snapshot<T> {
        match &*self.slot.state.borrow() {
            State::Resolved(value) => Snapshot::Resolved(value.clone()),
            State::Pending(session) => Snapshot::Pending(session.clone(), self.descriptor()),
            State::Faulted(fault) => Snapshot::Faulted(fault.clone()),
        }
    }

    pub(crate) fn registry_entry(&self) -> Rc<dyn PendingSlot> {
        self.slot.clone()
    }
}

impl<T: HostType> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<T: HostType> From<T> for Deferred<T> {
    fn from(value: T) -> Self {
        Deferred::resolved(value)
    }
}

// Resolved handles compare by value; anything else compares by identity,
// since there is no value to look at yet.
impl<T: HostType + PartialEq> PartialEq for Deferred<T> {
    fn eq(&self, other: &Self) -> bool {
        match (&*self.slot.state.borrow(), &*other.slot.state.borrow()) {
            (State::Resolved(a), State::Resolved(b)) => a == b,
            (State::Resolved(_), _) | (_, State::Resolved(_)) => false,
            _ => self.id() == other.id(),
        }
    }
}

impl<T: HostType + Eq> Eq for Deferred<T> {}

impl<T: HostType + PartialEq> PartialEq<T> for Deferred<T> {
    fn eq(&self, other: &T) -> bool {
        match &*self.slot.state.borrow() {
            State::Resolved(value) => value == other,
            _ => false,
        }
    }
}

impl<T: HostType + Hash> Hash for Deferred<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &*self.slot.state.borrow() {
            State::Resolved(value) => value.hash(state),
            _ => self.id().hash(state),
        }
    }
}

impl<T: HostType> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Deferred");
        out.field("id", &self.id()).field("kind", &T::KIND);
        match &*self.slot.state.borrow() {
            State::Resolved(value) => out.field("value", value),
            State::Pending(_) => out.field("state", &"pending"),
            State::Faulted(fault) => out.field("fault", fault),
        };
        out.finish()
    }
}

impl<T: HostType + fmt::Display> fmt::Display for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.slot.state.borrow() {
            State::Resolved(value) => fmt::Display::fmt(value, f),
            State::Pending(_) => write!(f, "deferred@{}", self.id()),
            State::Faulted(_) => write!(f, "faulted@{}", self.id()),
        }
    }
}
