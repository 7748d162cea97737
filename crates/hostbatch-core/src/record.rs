//! Call Records: one queued unit of remote work.

use std::fmt;
use std::str::FromStr;

use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::handle::Deferred;
use crate::kind::{HostType, ObjectRef};
use crate::operation::{IntWidth, Operation};

/// Globally unique id of a deferred handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(Uuid);

impl HandleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for HandleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(HandleId)
    }
}

/// Where a record's result goes, and whether the host must return it as a
/// reference token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultDescriptor {
    pub id: HandleId,
    pub requires_reference: bool,
}

/// What a record does on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    SetProperty,
    Invoke,
    InvokeWithResult,
    Compute,
}

impl RecordKind {
    pub fn produces_result(self) -> bool {
        matches!(self, RecordKind::InvokeWithResult | RecordKind::Compute)
    }
}

/// The object a record acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// The host's global scope.
    Global,
    Object(ObjectRef),
    /// A reference produced by an earlier record in the same batch.
    Pending(ResultDescriptor),
}

impl From<ObjectRef> for Target {
    fn from(reference: ObjectRef) -> Self {
        Target::Object(reference)
    }
}

impl From<&Deferred<ObjectRef>> for Target {
    /// A resolved handle targets its object directly; a pending one targets
    /// the earlier record's result slot.
    fn from(handle: &Deferred<ObjectRef>) -> Self {
        match handle.value() {
            Some(reference) => Target::Object(reference),
            None => Target::Pending(handle.descriptor()),
        }
    }
}

/// One positional argument of a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Literal(JsonValue),
    /// Substituted on the host by the result of an earlier record.
    Ref(ResultDescriptor),
}

impl Arg {
    pub fn literal(value: impl HostType) -> Self {
        Arg::Literal(value.encode())
    }

    pub fn reference_id(&self) -> Option<HandleId> {
        match self {
            Arg::Ref(descriptor) => Some(descriptor.id),
            Arg::Literal(_) => None,
        }
    }
}

impl<T: HostType> From<T> for Arg {
    fn from(value: T) -> Self {
        Arg::Literal(value.encode())
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Literal(JsonValue::String(value.to_string()))
    }
}

impl<T: HostType> From<&Deferred<T>> for Arg {
    /// Known values travel as literals; anything else is sent as a
    /// reference to the handle's result slot.
    fn from(handle: &Deferred<T>) -> Self {
        match handle.value() {
            Some(value) => Arg::Literal(value.encode()),
            None => Arg::Ref(handle.descriptor()),
        }
    }
}

/// A queued unit of remote work.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub kind: RecordKind,
    pub target: Target,
    pub member: String,
    pub args: Vec<Arg>,
    /// Set by the dispatcher when the record is enqueued with a result.
    pub result: Option<ResultDescriptor>,
}

impl CallRecord {
    pub const COMPUTE_MEMBER: &'static str = "compute";

    pub fn set_property(target: impl Into<Target>, name: impl Into<String>, value: impl Into<Arg>) -> Self {
        Self {
            kind: RecordKind::SetProperty,
            target: target.into(),
            member: name.into(),
            args: vec![value.into()],
            result: None,
        }
    }

    pub fn invoke(target: impl Into<Target>, method: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            kind: RecordKind::Invoke,
            target: target.into(),
            member: method.into(),
            args,
            result: None,
        }
    }

    pub fn invoke_with_result(
        target: impl Into<Target>,
        method: impl Into<String>,
        args: Vec<Arg>,
    ) -> Self {
        Self {
            kind: RecordKind::InvokeWithResult,
            target: target.into(),
            member: method.into(),
            args,
            result: None,
        }
    }

    /// A `compute` call in the global scope: the operator name first, then
    /// one or two operands.
    pub fn compute(op: Operation, operands: Vec<Arg>) -> Self {
        Self::compute_with(op, IntWidth::I64, operands)
    }

    /// A `compute` call whose integer results are held to `width`. Widths
    /// other than `i64` follow the operands as a tag.
    pub fn compute_with(op: Operation, width: IntWidth, operands: Vec<Arg>) -> Self {
        let mut args = Vec::with_capacity(operands.len() + 2);
        args.push(Arg::Literal(JsonValue::String(op.wire_name().to_string())));
        args.extend(operands);
        if width != IntWidth::I64 {
            args.push(Arg::Literal(JsonValue::String(width.wire_name().to_string())));
        }
        Self {
            kind: RecordKind::Compute,
            target: Target::Global,
            member: Self::COMPUTE_MEMBER.to_string(),
            args,
            result: None,
        }
    }

    /// Ids of every earlier result this record reads, in argument order.
    pub fn references(&self) -> impl Iterator<Item = HandleId> + '_ {
        let target = match &self.target {
            Target::Pending(descriptor) => Some(descriptor.id),
            _ => None,
        };
        target
            .into_iter()
            .chain(self.args.iter().filter_map(Arg::reference_id))
    }
}
