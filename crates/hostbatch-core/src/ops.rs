//! Operators on deferred handles.
//!
//! Every operator goes through [`compute`]. When all operands are known the
//! result is computed on the spot and comes back already resolved, with
//! nothing queued. When any operand is still pending, a `compute` record is
//! queued on that operand's session and the result is a new pending handle.
//! If the pending operand's session cannot take the record the result is a
//! faulted handle. Operators never start a round trip on their own.
//!
//! Which operators exist for a handle depends on its kind: `+` needs
//! [`Additive`], the other arithmetic operators need [`Numeric`], `& | ^`
//! need [`Bitwise`], `!` needs [`Invertible`] and shifts need [`Integral`].

use std::ops::{Add, BitAnd, BitOr, BitXor, Div, Mul, Neg, Not, Rem, Shl, Shr, Sub};

use serde_json::Value as JsonValue;
use tracing::{trace, warn};

use crate::dispatcher::WeakDispatcher;
use crate::error::{HandleFault, OperationError};
use crate::handle::{Deferred, Snapshot};
use crate::kind::{Additive, Bitwise, HostType, Integral, Invertible, Numeric, Ordered, ScalarType};
use crate::operation::{IntWidth, Operation, Scalar};
use crate::record::{Arg, CallRecord, Target};

/// Host function that answers questions about a value, such as its length.
pub const RESOLVE_PROXY_OPERATION: &str = "resolveProxyOperation";

/// One side of an operator: a plain value or a handle.
#[derive(Debug, Clone)]
pub enum Operand<T: HostType> {
    Value(T),
    Handle(Deferred<T>),
}

impl<T: HostType> Operand<T> {
    fn snapshot(&self) -> Snapshot<T> {
        match self {
            Operand::Value(value) => Snapshot::Resolved(value.clone()),
            Operand::Handle(handle) => handle.snapshot(),
        }
    }
}

impl<T: HostType> From<T> for Operand<T> {
    fn from(value: T) -> Self {
        Operand::Value(value)
    }
}

impl<T: HostType> From<Deferred<T>> for Operand<T> {
    fn from(handle: Deferred<T>) -> Self {
        Operand::Handle(handle)
    }
}

impl<T: HostType> From<&Deferred<T>> for Operand<T> {
    fn from(handle: &Deferred<T>) -> Self {
        Operand::Handle(handle.clone())
    }
}

/// Operand state after scanning left to right.
enum Plan {
    Local(Vec<Scalar>),
    Remote(WeakDispatcher, Vec<Arg>),
    Fault(HandleFault),
}

fn plan<T: ScalarType>(operands: &[Operand<T>]) -> Plan {
    let mut values = Vec::with_capacity(operands.len());
    let mut args = Vec::with_capacity(operands.len());
    let mut session: Option<WeakDispatcher> = None;

    for operand in operands {
        match operand.snapshot() {
            Snapshot::Resolved(value) => {
                values.push(value.to_scalar());
                args.push(Arg::Literal(value.encode()));
            }
            Snapshot::Pending(owner, descriptor) => {
                match &session {
                    Some(current) if !current.ptr_eq(&owner) => {
                        return Plan::Fault(HandleFault::Rejected(
                            "operands are pending in different sessions".to_string(),
                        ));
                    }
                    Some(_) => {}
                    None => session = Some(owner),
                }
                args.push(Arg::Ref(descriptor));
            }
            Snapshot::Faulted(fault) => return Plan::Fault(HandleFault::Operand(fault.to_string())),
        }
    }

    match session {
        Some(session) => Plan::Remote(session, args),
        None => Plan::Local(values),
    }
}

/// Resolve one operator application.
pub(crate) fn compute<T: ScalarType, R: ScalarType>(op: Operation, operands: Vec<Operand<T>>) -> Deferred<R> {
    match plan(&operands) {
        Plan::Local(values) => evaluate(op, T::INT_WIDTH, &values),
        Plan::Remote(session, args) => {
            let Some(dispatcher) = session.upgrade() else {
                warn!(%op, "operand's session has been dropped");
                return Deferred::faulted(HandleFault::Detached);
            };
            match dispatcher.enqueue_with_result::<R>(CallRecord::compute_with(op, T::INT_WIDTH, args)) {
                Ok(Some(handle)) => handle,
                Ok(None) => {
                    warn!(%op, "operand is pending but no batch is open");
                    Deferred::faulted(HandleFault::Rejected("no batch is open".to_string()))
                }
                Err(err) => {
                    warn!(%op, error = %err, "compute record rejected");
                    Deferred::faulted(HandleFault::Rejected(err.to_string()))
                }
            }
        }
        Plan::Fault(fault) => {
            warn!(%op, %fault, "operator applied to an unusable operand");
            Deferred::faulted(fault)
        }
    }
}

fn evaluate<R: ScalarType>(op: Operation, width: IntWidth, values: &[Scalar]) -> Deferred<R> {
    let result = match values {
        [operand] => op.apply_with(width, operand, None),
        [lhs, rhs] => op.apply_with(width, lhs, Some(rhs)),
        _ => Err(OperationError::Arity {
            op: op.wire_name(),
            expected: op.arity(),
        }),
    };
    trace!(%op, %width, ?values, ?result, "computed locally");
    match result.map(R::from_scalar) {
        Ok(Ok(value)) => Deferred::resolved(value),
        Ok(Err(err)) => Deferred::faulted(HandleFault::Decode(err)),
        Err(err) => Deferred::faulted(HandleFault::Operation(err)),
    }
}

fn binary<T: ScalarType, R: ScalarType>(
    op: Operation,
    lhs: impl Into<Operand<T>>,
    rhs: impl Into<Operand<T>>,
) -> Deferred<R> {
    compute(op, vec![lhs.into(), rhs.into()])
}

impl<T: ScalarType> Deferred<T> {
    pub fn equal(&self, other: impl Into<Operand<T>>) -> Deferred<bool> {
        binary(Operation::Equal, self, other)
    }

    pub fn not_equal(&self, other: impl Into<Operand<T>>) -> Deferred<bool> {
        binary(Operation::NotEqual, self, other)
    }
}

impl<T: Ordered> Deferred<T> {
    pub fn greater(&self, other: impl Into<Operand<T>>) -> Deferred<bool> {
        binary(Operation::Greater, self, other)
    }

    pub fn less(&self, other: impl Into<Operand<T>>) -> Deferred<bool> {
        binary(Operation::Less, self, other)
    }

    pub fn greater_or_equal(&self, other: impl Into<Operand<T>>) -> Deferred<bool> {
        binary(Operation::GreaterOrEqual, self, other)
    }

    pub fn less_or_equal(&self, other: impl Into<Operand<T>>) -> Deferred<bool> {
        binary(Operation::LessOrEqual, self, other)
    }
}

impl Deferred<String> {
    /// Length in UTF-16 code units, as the host counts it.
    pub fn length(&self) -> Deferred<i32> {
        match self.snapshot() {
            Snapshot::Resolved(text) => match i32::try_from(text.encode_utf16().count()) {
                Ok(length) => Deferred::resolved(length),
                Err(_) => Deferred::faulted(HandleFault::Operation(OperationError::Overflow("length"))),
            },
            Snapshot::Pending(session, descriptor) => {
                let Some(dispatcher) = session.upgrade() else {
                    warn!("text handle's session has been dropped");
                    return Deferred::faulted(HandleFault::Detached);
                };
                let record = CallRecord::invoke_with_result(
                    Target::Global,
                    RESOLVE_PROXY_OPERATION,
                    vec![Arg::Literal(JsonValue::from("length")), Arg::Ref(descriptor)],
                );
                match dispatcher.enqueue_with_result(record) {
                    Ok(Some(handle)) => handle,
                    Ok(None) => Deferred::faulted(HandleFault::Rejected("no batch is open".to_string())),
                    Err(err) => {
                        warn!(error = %err, "length request rejected");
                        Deferred::faulted(HandleFault::Rejected(err.to_string()))
                    }
                }
            }
            Snapshot::Faulted(fault) => Deferred::faulted(HandleFault::Operand(fault.to_string())),
        }
    }
}

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $bound:ident, $op:expr) => {
        impl<T: $bound> $trait<Deferred<T>> for Deferred<T> {
            type Output = Deferred<T>;
            fn $method(self, rhs: Deferred<T>) -> Deferred<T> {
                binary($op, self, rhs)
            }
        }

        impl<T: $bound> $trait<&Deferred<T>> for Deferred<T> {
            type Output = Deferred<T>;
            fn $method(self, rhs: &Deferred<T>) -> Deferred<T> {
                binary($op, self, rhs)
            }
        }

        impl<T: $bound> $trait<T> for Deferred<T> {
            type Output = Deferred<T>;
            fn $method(self, rhs: T) -> Deferred<T> {
                binary($op, self, rhs)
            }
        }

        impl<T: $bound> $trait<Deferred<T>> for &Deferred<T> {
            type Output = Deferred<T>;
            fn $method(self, rhs: Deferred<T>) -> Deferred<T> {
                binary($op, self, rhs)
            }
        }

        impl<T: $bound> $trait<&Deferred<T>> for &Deferred<T> {
            type Output = Deferred<T>;
            fn $method(self, rhs: &Deferred<T>) -> Deferred<T> {
                binary($op, self, rhs)
            }
        }

        impl<T: $bound> $trait<T> for &Deferred<T> {
            type Output = Deferred<T>;
            fn $method(self, rhs: T) -> Deferred<T> {
                binary($op, self, rhs)
            }
        }
    };
}

// `value op handle` for concrete value types.
macro_rules! reversed_operator {
    ($trait:ident, $method:ident, $op:expr; $($ty:ty),+) => {
        $(
            impl $trait<Deferred<$ty>> for $ty {
                type Output = Deferred<$ty>;
                fn $method(self, rhs: Deferred<$ty>) -> Deferred<$ty> {
                    binary($op, self, rhs)
                }
            }

            impl $trait<&Deferred<$ty>> for $ty {
                type Output = Deferred<$ty>;
                fn $method(self, rhs: &Deferred<$ty>) -> Deferred<$ty> {
                    binary($op, self, rhs)
                }
            }
        )+
    };
}

macro_rules! unary_operator {
    ($trait:ident, $method:ident, $bound:ident, $op:expr) => {
        impl<T: $bound> $trait for Deferred<T> {
            type Output = Deferred<T>;
            fn $method(self) -> Deferred<T> {
                compute($op, vec![Operand::from(self)])
            }
        }

        impl<T: $bound> $trait for &Deferred<T> {
            type Output = Deferred<T>;
            fn $method(self) -> Deferred<T> {
                compute($op, vec![Operand::from(self)])
            }
        }
    };
}

binary_operator!(Add, add, Additive, Operation::Add);
binary_operator!(Sub, sub, Numeric, Operation::Subtract);
binary_operator!(Mul, mul, Numeric, Operation::Multiply);
binary_operator!(Div, div, Numeric, Operation::Divide);
binary_operator!(Rem, rem, Numeric, Operation::Modulo);
binary_operator!(BitAnd, bitand, Bitwise, Operation::And);
binary_operator!(BitOr, bitor, Bitwise, Operation::Or);
binary_operator!(BitXor, bitxor, Bitwise, Operation::Xor);
binary_operator!(Shl, shl, Integral, Operation::LeftShift);
binary_operator!(Shr, shr, Integral, Operation::RightShift);

unary_operator!(Neg, neg, Numeric, Operation::Negate);
unary_operator!(Not, not, Invertible, Operation::Invert);

reversed_operator!(Add, add, Operation::Add; i32, i64, u32, f32, f64, String);
reversed_operator!(Sub, sub, Operation::Subtract; i32, i64, u32, f32, f64);
reversed_operator!(Mul, mul, Operation::Multiply; i32, i64, u32, f32, f64);
reversed_operator!(Div, div, Operation::Divide; i32, i64, u32, f32, f64);
reversed_operator!(Rem, rem, Operation::Modulo; i32, i64, u32, f32, f64);
reversed_operator!(BitAnd, bitand, Operation::And; i32, i64, u32, bool);
reversed_operator!(BitOr, bitor, Operation::Or; i32, i64, u32, bool);
reversed_operator!(BitXor, bitxor, Operation::Xor; i32, i64, u32, bool);
reversed_operator!(Shl, shl, Operation::LeftShift; i32, i64, u32);
reversed_operator!(Shr, shr, Operation::RightShift; i32, i64, u32);
