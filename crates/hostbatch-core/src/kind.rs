//! Declared kinds of host values and the typed decode registry.
//!
//! Every type that can sit inside a [`Deferred`](crate::Deferred) implements
//! [`HostType`], which names its [`ValueKind`] tag and knows how to move
//! between itself and JSON. Incoming payloads are checked against the tag
//! before conversion, so a mismatched shape is rejected instead of coerced.
//!
//! The capability traits below decide at compile time which operators a
//! handle of a given type offers.

use std::fmt;

use serde_json::Value as JsonValue;

use crate::error::DecodeError;
use crate::operation::{IntWidth, Scalar};

/// Type tag carried by every handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Integer,
    Float,
    Boolean,
    Text,
    /// An opaque host object, returned as a reference token.
    Reference,
    Array,
    /// Untyped JSON; any shape is accepted.
    Json,
}

impl ValueKind {
    /// Whether the host must hand back a reference token instead of the
    /// value itself.
    pub fn requires_reference(self) -> bool {
        self == ValueKind::Reference
    }

    /// Validate the envelope shape of a payload against this kind.
    pub fn check(self, payload: &JsonValue) -> Result<(), DecodeError> {
        let ok = match self {
            ValueKind::Integer => payload.is_i64() || payload.is_u64(),
            ValueKind::Float => payload.is_number(),
            ValueKind::Boolean => payload.is_boolean(),
            ValueKind::Text => payload.is_string(),
            ValueKind::Reference => {
                payload.is_u64()
                    || payload
                        .get(ObjectRef::TOKEN_FIELD)
                        .is_some_and(JsonValue::is_u64)
            }
            ValueKind::Array => payload.is_array(),
            ValueKind::Json => true,
        };
        if ok {
            Ok(())
        } else {
            Err(DecodeError::shape(self, payload))
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::Boolean => "boolean",
            ValueKind::Text => "text",
            ValueKind::Reference => "reference",
            ValueKind::Array => "array",
            ValueKind::Json => "json",
        };
        f.write_str(name)
    }
}

/// A Rust type that can be exchanged with the host.
pub trait HostType: Clone + fmt::Debug + 'static {
    const KIND: ValueKind;

    fn encode(&self) -> JsonValue;

    /// Convert a payload whose envelope already passed [`ValueKind::check`].
    fn decode_checked(payload: &JsonValue) -> Result<Self, DecodeError>;

    fn decode(payload: &JsonValue) -> Result<Self, DecodeError> {
        Self::KIND.check(payload)?;
        Self::decode_checked(payload)
    }
}

/// A host type that is a single operator operand.
pub trait ScalarType: HostType {
    /// Width integer results of this type's operators are held to.
    const INT_WIDTH: IntWidth = IntWidth::I64;

    fn to_scalar(&self) -> Scalar;
    fn from_scalar(scalar: Scalar) -> Result<Self, DecodeError>;
}

/// Types whose handles support `greater`, `less` and friends.
pub trait Ordered: ScalarType {}

/// Types whose handles support `+`.
pub trait Additive: ScalarType {}

/// Types whose handles support `- * / %` and unary `-`.
pub trait Numeric: Additive + Ordered {}

/// Types whose handles support `& | ^`.
pub trait Bitwise: ScalarType {}

/// Types whose handles support `!`.
pub trait Invertible: ScalarType {}

/// Integer types; these alone support `<<` and `>>`.
pub trait Integral: Numeric + Bitwise + Invertible {}

macro_rules! integer_host_type {
    ($($ty:ident => $width:ident),*) => {$(
        impl HostType for $ty {
            const KIND: ValueKind = ValueKind::Integer;

            fn encode(&self) -> JsonValue {
                JsonValue::from(*self)
            }

            fn decode_checked(payload: &JsonValue) -> Result<Self, DecodeError> {
                if let Some(i) = payload.as_i64() {
                    $ty::try_from(i).map_err(|_| DecodeError::out_of_range(i, stringify!($ty)))
                } else if let Some(u) = payload.as_u64() {
                    $ty::try_from(u).map_err(|_| DecodeError::out_of_range(u, stringify!($ty)))
                } else {
                    Err(DecodeError::shape(ValueKind::Integer, payload))
                }
            }
        }

        impl ScalarType for $ty {
            const INT_WIDTH: IntWidth = IntWidth::$width;

            fn to_scalar(&self) -> Scalar {
                Scalar::Int(i64::from(*self))
            }

            fn from_scalar(scalar: Scalar) -> Result<Self, DecodeError> {
                match scalar {
                    Scalar::Int(i) => $ty::try_from(i)
                        .map_err(|_| DecodeError::out_of_range(i, stringify!($ty))),
                    other => Err(DecodeError::shape(ValueKind::Integer, &other.to_json())),
                }
            }
        }

        impl Ordered for $ty {}
        impl Additive for $ty {}
        impl Numeric for $ty {}
        impl Bitwise for $ty {}
        impl Invertible for $ty {}
        impl Integral for $ty {}
    )*};
}

integer_host_type!(i32 => I32, i64 => I64, u32 => U32);

macro_rules! float_host_type {
    ($($ty:ident),*) => {$(
        impl HostType for $ty {
            const KIND: ValueKind = ValueKind::Float;

            fn encode(&self) -> JsonValue {
                // Widen first so f32 values keep their exact decimal form.
                serde_json::Number::from_f64(f64::from(*self))
                    .map(JsonValue::Number)
                    .unwrap_or(JsonValue::Null)
            }

            fn decode_checked(payload: &JsonValue) -> Result<Self, DecodeError> {
                payload
                    .as_f64()
                    .map(|f| f as $ty)
                    .ok_or_else(|| DecodeError::shape(ValueKind::Float, payload))
            }
        }

        impl ScalarType for $ty {
            fn to_scalar(&self) -> Scalar {
                Scalar::Float(f64::from(*self))
            }

            fn from_scalar(scalar: Scalar) -> Result<Self, DecodeError> {
                match scalar {
                    Scalar::Float(f) => Ok(f as $ty),
                    Scalar::Int(i) => Ok(i as $ty),
                    other => Err(DecodeError::shape(ValueKind::Float, &other.to_json())),
                }
            }
        }

        impl Ordered for $ty {}
        impl Additive for $ty {}
        impl Numeric for $ty {}
    )*};
}

float_host_type!(f32, f64);

impl HostType for bool {
    const KIND: ValueKind = ValueKind::Boolean;

    fn encode(&self) -> JsonValue {
        JsonValue::Bool(*self)
    }

    fn decode_checked(payload: &JsonValue) -> Result<Self, DecodeError> {
        payload
            .as_bool()
            .ok_or_else(|| DecodeError::shape(ValueKind::Boolean, payload))
    }
}

impl ScalarType for bool {
    fn to_scalar(&self) -> Scalar {
        Scalar::Bool(*self)
    }

    fn from_scalar(scalar: Scalar) -> Result<Self, DecodeError> {
        match scalar {
            Scalar::Bool(b) => Ok(b),
            other => Err(DecodeError::shape(ValueKind::Boolean, &other.to_json())),
        }
    }
}

impl Ordered for bool {}
impl Bitwise for bool {}
impl Invertible for bool {}

impl HostType for String {
    const KIND: ValueKind = ValueKind::Text;

    fn encode(&self) -> JsonValue {
        JsonValue::String(self.clone())
    }

    fn decode_checked(payload: &JsonValue) -> Result<Self, DecodeError> {
        payload
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DecodeError::shape(ValueKind::Text, payload))
    }
}

impl ScalarType for String {
    fn to_scalar(&self) -> Scalar {
        Scalar::Text(self.clone())
    }

    fn from_scalar(scalar: Scalar) -> Result<Self, DecodeError> {
        match scalar {
            Scalar::Text(s) => Ok(s),
            other => Err(DecodeError::shape(ValueKind::Text, &other.to_json())),
        }
    }
}

impl Ordered for String {}
impl Additive for String {}

impl<T: HostType> HostType for Vec<T> {
    const KIND: ValueKind = ValueKind::Array;

    fn encode(&self) -> JsonValue {
        JsonValue::Array(self.iter().map(HostType::encode).collect())
    }

    fn decode_checked(payload: &JsonValue) -> Result<Self, DecodeError> {
        let items = payload
            .as_array()
            .ok_or_else(|| DecodeError::shape(ValueKind::Array, payload))?;
        items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                T::decode(item).map_err(|e| DecodeError::Element {
                    index,
                    source: Box::new(e),
                })
            })
            .collect()
    }
}

impl HostType for JsonValue {
    const KIND: ValueKind = ValueKind::Json;

    fn encode(&self) -> JsonValue {
        self.clone()
    }

    fn decode_checked(payload: &JsonValue) -> Result<Self, DecodeError> {
        Ok(payload.clone())
    }
}

/// Reference to an object that lives on the host.
///
/// On the wire it is `{"__jsObjectId": n}`; in a batch response it may also
/// arrive as the bare token `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    id: u64,
}

impl ObjectRef {
    pub const TOKEN_FIELD: &'static str = "__jsObjectId";

    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(self) -> u64 {
        self.id
    }

    /// Recognize the `{"__jsObjectId": n}` form.
    pub fn from_json(json: &JsonValue) -> Option<ObjectRef> {
        let map = json.as_object()?;
        if map.len() != 1 {
            return None;
        }
        map.get(Self::TOKEN_FIELD)?.as_u64().map(ObjectRef::new)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.id)
    }
}

impl HostType for ObjectRef {
    const KIND: ValueKind = ValueKind::Reference;

    fn encode(&self) -> JsonValue {
        let mut map = serde_json::Map::new();
        map.insert(Self::TOKEN_FIELD.to_string(), JsonValue::from(self.id));
        JsonValue::Object(map)
    }

    fn decode_checked(payload: &JsonValue) -> Result<Self, DecodeError> {
        payload
            .as_u64()
            .or_else(|| payload.get(Self::TOKEN_FIELD).and_then(JsonValue::as_u64))
            .map(ObjectRef::new)
            .ok_or_else(|| DecodeError::shape(ValueKind::Reference, payload))
    }
}
