//! The closed set of operators a deferred value supports.
//!
//! Semantics are defined once over [`Scalar`] and shared by the client (for
//! operands that are already known) and by any host that evaluates
//! `compute` records, so both sides agree on every input.
//!
//! Integers travel as `i64`. An [`IntWidth`] holds results to the width of
//! the handle's type: `+ - * /` and negation fail with an overflow outside
//! it, bitwise results and shifts wrap to it, and a shift count must be
//! below its bit count.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde_json::Value as JsonValue;

use crate::error::{DecodeError, OperationError};
use crate::kind::ValueKind;

/// A supported operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Negate,
    Invert,
    Equal,
    NotEqual,
    Greater,
    Less,
    GreaterOrEqual,
    LessOrEqual,
    And,
    Or,
    Xor,
    LeftShift,
    RightShift,
}

impl Operation {
    pub const ALL: [Operation; 18] = [
        Operation::Add,
        Operation::Subtract,
        Operation::Multiply,
        Operation::Divide,
        Operation::Modulo,
        Operation::Negate,
        Operation::Invert,
        Operation::Equal,
        Operation::NotEqual,
        Operation::Greater,
        Operation::Less,
        Operation::GreaterOrEqual,
        Operation::LessOrEqual,
        Operation::And,
        Operation::Or,
        Operation::Xor,
        Operation::LeftShift,
        Operation::RightShift,
    ];

    /// Name used in `compute` records.
    pub fn wire_name(self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Subtract => "subtract",
            Operation::Multiply => "multiply",
            Operation::Divide => "divide",
            Operation::Modulo => "modulo",
            Operation::Negate => "negate",
            Operation::Invert => "invert",
            Operation::Equal => "equal",
            Operation::NotEqual => "notequal",
            Operation::Greater => "greater",
            Operation::Less => "less",
            Operation::GreaterOrEqual => "gequal",
            Operation::LessOrEqual => "lequal",
            Operation::And => "and",
            Operation::Or => "or",
            Operation::Xor => "xor",
            Operation::LeftShift => "lshift",
            Operation::RightShift => "rshift",
        }
    }

    pub fn is_unary(self) -> bool {
        matches!(self, Operation::Negate | Operation::Invert)
    }

    /// Number of operands the operator takes.
    pub fn arity(self) -> usize {
        if self.is_unary() {
            1
        } else {
            2
        }
    }

    /// Whether the result is a boolean regardless of operand kind.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Operation::Equal
                | Operation::NotEqual
                | Operation::Greater
                | Operation::Less
                | Operation::GreaterOrEqual
                | Operation::LessOrEqual
        )
    }

    /// Apply the operator to known operands with 64-bit integer results.
    ///
    /// `rhs` must be `None` for unary operators and `Some` otherwise.
    pub fn apply(self, lhs: &Scalar, rhs: Option<&Scalar>) -> Result<Scalar, OperationError> {
        self.apply_with(IntWidth::I64, lhs, rhs)
    }

    /// Apply the operator with integer results held to `width`.
    pub fn apply_with(
        self,
        width: IntWidth,
        lhs: &Scalar,
        rhs: Option<&Scalar>,
    ) -> Result<Scalar, OperationError> {
        let name = self.wire_name();
        match (self.is_unary(), rhs) {
            (true, None) => self.apply_unary(width, lhs),
            (false, Some(rhs)) => self.apply_binary(width, lhs, rhs),
            (true, Some(_)) => Err(OperationError::Arity { op: name, expected: 1 }),
            (false, None) => Err(OperationError::Arity { op: name, expected: 2 }),
        }
    }

    /// Apply the operator to the operands of a `compute` record.
    ///
    /// The operands may be followed by an integer width tag such as `"u32"`;
    /// without one integers are 64-bit.
    pub fn apply_operands(self, operands: &[Scalar]) -> Result<Scalar, OperationError> {
        let arity_error = OperationError::Arity {
            op: self.wire_name(),
            expected: self.arity(),
        };
        if operands.len() < self.arity() {
            return Err(arity_error);
        }
        let (operands, tail) = operands.split_at(self.arity());
        let width = match tail {
            [] => IntWidth::I64,
            [Scalar::Text(tag)] => tag.parse()?,
            _ => return Err(arity_error),
        };
        match operands {
            [operand] => self.apply_with(width, operand, None),
            [lhs, rhs] => self.apply_with(width, lhs, Some(rhs)),
            _ => Err(arity_error),
        }
    }

    fn apply_unary(self, width: IntWidth, operand: &Scalar) -> Result<Scalar, OperationError> {
        let name = self.wire_name();
        match (self, operand) {
            (Operation::Negate, Scalar::Int(a)) => a
                .checked_neg()
                .filter(|r| width.fits(*r))
                .map(Scalar::Int)
                .ok_or(OperationError::Overflow(name)),
            (Operation::Negate, Scalar::Float(a)) => Ok(Scalar::Float(-a)),
            (Operation::Invert, Scalar::Bool(a)) => Ok(Scalar::Bool(!a)),
            (Operation::Invert, Scalar::Int(a)) => Ok(Scalar::Int(width.wrap(!a))),
            _ => Err(mismatch(name, operand, operand)),
        }
    }

    fn apply_binary(self, width: IntWidth, lhs: &Scalar, rhs: &Scalar) -> Result<Scalar, OperationError> {
        use Scalar::*;

        let name = self.wire_name();
        let checked = |int_op: fn(i64, i64) -> Option<i64>, float_op: fn(f64, f64) -> f64| {
            arithmetic(name, width, lhs, rhs, int_op, float_op)
        };
        match self {
            Operation::Add => match (lhs, rhs) {
                (Text(a), Text(b)) => Ok(Text(format!("{a}{b}"))),
                _ => checked(i64::checked_add, |a, b| a + b),
            },
            Operation::Subtract => checked(i64::checked_sub, |a, b| a - b),
            Operation::Multiply => checked(i64::checked_mul, |a, b| a * b),
            Operation::Divide => {
                if matches!((lhs, rhs), (Int(_), Int(0))) {
                    return Err(OperationError::DivisionByZero(name));
                }
                checked(i64::checked_div, |a, b| a / b)
            }
            Operation::Modulo => {
                if matches!((lhs, rhs), (Int(_), Int(0))) {
                    return Err(OperationError::DivisionByZero(name));
                }
                checked(i64::checked_rem, |a, b| a % b)
            }
            Operation::Equal => equals(name, lhs, rhs).map(Bool),
            Operation::NotEqual => equals(name, lhs, rhs).map(|eq| Bool(!eq)),
            Operation::Greater => compare(name, lhs, rhs, Ordering::is_gt),
            Operation::Less => compare(name, lhs, rhs, Ordering::is_lt),
            Operation::GreaterOrEqual => compare(name, lhs, rhs, Ordering::is_ge),
            Operation::LessOrEqual => compare(name, lhs, rhs, Ordering::is_le),
            Operation::And => match (lhs, rhs) {
                (Int(a), Int(b)) => Ok(Int(width.wrap(a & b))),
                (Bool(a), Bool(b)) => Ok(Bool(*a & *b)),
                _ => Err(mismatch(name, lhs, rhs)),
            },
            Operation::Or => match (lhs, rhs) {
                (Int(a), Int(b)) => Ok(Int(width.wrap(a | b))),
                (Bool(a), Bool(b)) => Ok(Bool(*a | *b)),
                _ => Err(mismatch(name, lhs, rhs)),
            },
            Operation::Xor => match (lhs, rhs) {
                (Int(a), Int(b)) => Ok(Int(width.wrap(a ^ b))),
                (Bool(a), Bool(b)) => Ok(Bool(*a ^ *b)),
                _ => Err(mismatch(name, lhs, rhs)),
            },
            Operation::LeftShift | Operation::RightShift => match (lhs, rhs) {
                (Int(a), Int(count)) => {
                    let count = u32::try_from(*count)
                        .ok()
                        .filter(|c| *c < width.bits())
                        .ok_or(OperationError::ShiftOutOfRange(*count))?;
                    let shifted = if self == Operation::LeftShift {
                        a << count
                    } else {
                        a >> count
                    };
                    Ok(Int(width.wrap(shifted)))
                }
                _ => Err(mismatch(name, lhs, rhs)),
            },
            Operation::Negate | Operation::Invert => unreachable!("unary operators handled above"),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for Operation {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.wire_name() == s)
            .ok_or_else(|| OperationError::Unknown(s.to_string()))
    }
}

/// Integer width that operator results are held to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IntWidth {
    I32,
    U32,
    #[default]
    I64,
}

impl IntWidth {
    pub const ALL: [IntWidth; 3] = [IntWidth::I32, IntWidth::U32, IntWidth::I64];

    /// Tag that follows the operands of a `compute` record.
    pub fn wire_name(self) -> &'static str {
        match self {
            IntWidth::I32 => "i32",
            IntWidth::U32 => "u32",
            IntWidth::I64 => "i64",
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            IntWidth::I32 => i32::BITS,
            IntWidth::U32 => u32::BITS,
            IntWidth::I64 => i64::BITS,
        }
    }

    /// Whether `value` is representable at this width.
    pub fn fits(self, value: i64) -> bool {
        match self {
            IntWidth::I32 => i32::try_from(value).is_ok(),
            IntWidth::U32 => u32::try_from(value).is_ok(),
            IntWidth::I64 => true,
        }
    }

    /// Truncate to this width, keeping the low bits.
    pub fn wrap(self, value: i64) -> i64 {
        match self {
            IntWidth::I32 => i64::from(value as i32),
            IntWidth::U32 => i64::from(value as u32),
            IntWidth::I64 => value,
        }
    }
}

impl fmt::Display for IntWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for IntWidth {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IntWidth::ALL
            .into_iter()
            .find(|width| width.wire_name() == s)
            .ok_or_else(|| OperationError::UnknownWidth(s.to_string()))
    }
}

fn mismatch(op: &'static str, lhs: &Scalar, rhs: &Scalar) -> OperationError {
    OperationError::TypeMismatch {
        op,
        lhs: lhs.type_name(),
        rhs: rhs.type_name(),
    }
}

fn arithmetic(
    op: &'static str,
    width: IntWidth,
    lhs: &Scalar,
    rhs: &Scalar,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Scalar, OperationError> {
    match (lhs, rhs) {
        (Scalar::Int(a), Scalar::Int(b)) => int_op(*a, *b)
            .filter(|r| width.fits(*r))
            .map(Scalar::Int)
            .ok_or(OperationError::Overflow(op)),
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => Ok(Scalar::Float(float_op(a, b))),
            _ => Err(mismatch(op, lhs, rhs)),
        },
    }
}

fn equals(op: &'static str, lhs: &Scalar, rhs: &Scalar) -> Result<bool, OperationError> {
    match (lhs, rhs) {
        (Scalar::Int(a), Scalar::Int(b)) => Ok(a == b),
        (Scalar::Bool(a), Scalar::Bool(b)) => Ok(a == b),
        (Scalar::Text(a), Scalar::Text(b)) => Ok(a == b),
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => Ok(a == b),
            _ => Err(mismatch(op, lhs, rhs)),
        },
    }
}

fn compare(
    op: &'static str,
    lhs: &Scalar,
    rhs: &Scalar,
    pred: fn(Ordering) -> bool,
) -> Result<Scalar, OperationError> {
    let ordering = match (lhs, rhs) {
        (Scalar::Int(a), Scalar::Int(b)) => Some(a.cmp(b)),
        (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
        (Scalar::Text(a), Scalar::Text(b)) => Some(a.cmp(b)),
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => return Err(mismatch(op, lhs, rhs)),
        },
    };
    // NaN is unordered: every comparison is false.
    Ok(Scalar::Bool(ordering.is_some_and(pred)))
}

/// A single operand of an operator, as it travels on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl Scalar {
    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Int(_) => "integer",
            Scalar::Float(_) => "float",
            Scalar::Bool(_) => "boolean",
            Scalar::Text(_) => "text",
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(i) => Some(*i as f64),
            Scalar::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Read a scalar from JSON. Integers stay integers; anything written
    /// with a fraction or exponent is a float.
    pub fn from_json(json: &JsonValue) -> Result<Scalar, DecodeError> {
        match json {
            JsonValue::Bool(b) => Ok(Scalar::Bool(*b)),
            JsonValue::String(s) => Ok(Scalar::Text(s.clone())),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Scalar::Int(i))
                } else if n.is_u64() {
                    Err(DecodeError::out_of_range(n, "i64"))
                } else {
                    n.as_f64()
                        .map(Scalar::Float)
                        .ok_or_else(|| DecodeError::shape(ValueKind::Float, json))
                }
            }
            other => Err(DecodeError::Shape {
                expected: ValueKind::Json,
                found: format!("non-scalar {}", crate::error::json_shape(other)),
            }),
        }
    }

    /// Write a scalar as JSON. Non-finite floats have no JSON form and
    /// become `null`.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Scalar::Int(i) => JsonValue::from(*i),
            Scalar::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Scalar::Bool(b) => JsonValue::Bool(*b),
            Scalar::Text(s) => JsonValue::String(s.clone()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Scalar {
        Scalar::Int(i)
    }

    #[test]
    fn test_wire_names_round_trip() {
        for op in Operation::ALL {
            assert_eq!(op.wire_name().parse::<Operation>().unwrap(), op);
        }
        assert!("pow".parse::<Operation>().is_err());
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(Operation::Add.apply(&int(3), Some(&int(10))).unwrap(), int(13));
        assert_eq!(Operation::Divide.apply(&int(7), Some(&int(2))).unwrap(), int(3));
        assert_eq!(Operation::Modulo.apply(&int(-7), Some(&int(3))).unwrap(), int(-1));
        assert_eq!(Operation::Negate.apply(&int(4), None).unwrap(), int(-4));
    }

    #[test]
    fn test_mixed_promotes_to_float() {
        let result = Operation::Multiply
            .apply(&int(2), Some(&Scalar::Float(1.5)))
            .unwrap();
        assert_eq!(result, Scalar::Float(3.0));
    }

    #[test]
    fn test_integer_faults() {
        assert_eq!(
            Operation::Divide.apply(&int(1), Some(&int(0))),
            Err(OperationError::DivisionByZero("divide"))
        );
        assert_eq!(
            Operation::Add.apply(&int(i64::MAX), Some(&int(1))),
            Err(OperationError::Overflow("add"))
        );
        assert_eq!(
            Operation::LeftShift.apply(&int(1), Some(&int(64))),
            Err(OperationError::ShiftOutOfRange(64))
        );
    }

    #[test]
    fn test_float_division_by_zero_is_infinite() {
        let result = Operation::Divide
            .apply(&Scalar::Float(1.0), Some(&Scalar::Float(0.0)))
            .unwrap();
        assert_eq!(result, Scalar::Float(f64::INFINITY));
    }

    #[test]
    fn test_bitwise_and_logical() {
        assert_eq!(Operation::And.apply(&int(0b1100), Some(&int(0b1010))).unwrap(), int(0b1000));
        assert_eq!(Operation::Xor.apply(&int(0b1100), Some(&int(0b1010))).unwrap(), int(0b0110));
        assert_eq!(Operation::LeftShift.apply(&int(1), Some(&int(4))).unwrap(), int(16));
        assert_eq!(Operation::RightShift.apply(&int(-16), Some(&int(2))).unwrap(), int(-4));
        assert_eq!(
            Operation::Or.apply(&Scalar::Bool(false), Some(&Scalar::Bool(true))).unwrap(),
            Scalar::Bool(true)
        );
        assert_eq!(Operation::Invert.apply(&int(0), None).unwrap(), int(-1));
        assert_eq!(Operation::Invert.apply(&Scalar::Bool(true), None).unwrap(), Scalar::Bool(false));
    }

    #[test]
    fn test_narrow_bitwise_results_wrap() {
        let u32_three = int(3);
        assert_eq!(
            Operation::Invert.apply_with(IntWidth::U32, &u32_three, None).unwrap(),
            int(i64::from(!3u32))
        );
        assert_eq!(Operation::Invert.apply_with(IntWidth::I32, &int(0), None).unwrap(), int(-1));
        assert_eq!(
            Operation::LeftShift.apply_with(IntWidth::I32, &int(1), Some(&int(31))).unwrap(),
            int(i64::from(i32::MIN))
        );
        assert_eq!(
            Operation::LeftShift.apply_with(IntWidth::U32, &int(3), Some(&int(31))).unwrap(),
            int(i64::from(3u32 << 31))
        );
        assert_eq!(
            Operation::RightShift.apply_with(IntWidth::I32, &int(-16), Some(&int(2))).unwrap(),
            int(-4)
        );
        assert_eq!(
            Operation::Xor.apply_with(IntWidth::I32, &int(-1), Some(&int(i64::from(i32::MAX)))).unwrap(),
            int(i64::from(i32::MIN))
        );
    }

    #[test]
    fn test_shift_count_is_bounded_by_width() {
        assert_eq!(
            Operation::LeftShift.apply_with(IntWidth::I32, &int(1), Some(&int(32))),
            Err(OperationError::ShiftOutOfRange(32))
        );
        assert_eq!(
            Operation::RightShift.apply_with(IntWidth::U32, &int(1), Some(&int(40))),
            Err(OperationError::ShiftOutOfRange(40))
        );
        assert_eq!(
            Operation::LeftShift.apply_with(IntWidth::I64, &int(1), Some(&int(63))).unwrap(),
            int(i64::MIN)
        );
        assert_eq!(
            Operation::LeftShift.apply_with(IntWidth::I32, &int(1), Some(&int(-1))),
            Err(OperationError::ShiftOutOfRange(-1))
        );
    }

    #[test]
    fn test_narrow_arithmetic_overflows() {
        let max = int(i64::from(i32::MAX));
        assert_eq!(
            Operation::Add.apply_with(IntWidth::I32, &max, Some(&int(1))),
            Err(OperationError::Overflow("add"))
        );
        assert_eq!(Operation::Add.apply(&max, Some(&int(1))).unwrap(), int(i64::from(i32::MAX) + 1));
        assert_eq!(
            Operation::Subtract.apply_with(IntWidth::U32, &int(0), Some(&int(1))),
            Err(OperationError::Overflow("subtract"))
        );
        assert_eq!(
            Operation::Negate.apply_with(IntWidth::I32, &int(i64::from(i32::MIN)), None),
            Err(OperationError::Overflow("negate"))
        );
        assert_eq!(
            Operation::Divide.apply_with(IntWidth::I32, &int(i64::from(i32::MIN)), Some(&int(-1))),
            Err(OperationError::Overflow("divide"))
        );
    }

    #[test]
    fn test_record_operands_carry_width() {
        let tag = |width: IntWidth| Scalar::Text(width.wire_name().to_string());
        assert_eq!(
            Operation::Invert.apply_operands(&[int(3), tag(IntWidth::U32)]).unwrap(),
            int(4294967292)
        );
        assert_eq!(Operation::Invert.apply_operands(&[int(3)]).unwrap(), int(-4));
        assert_eq!(
            Operation::LeftShift.apply_operands(&[int(1), int(40), tag(IntWidth::I32)]),
            Err(OperationError::ShiftOutOfRange(40))
        );
        assert_eq!(
            Operation::Add.apply_operands(&[int(1), int(2), Scalar::Text("i16".into())]),
            Err(OperationError::UnknownWidth("i16".into()))
        );
        assert!(matches!(
            Operation::Add.apply_operands(&[int(1)]),
            Err(OperationError::Arity { expected: 2, .. })
        ));
        assert!(matches!(
            Operation::Negate.apply_operands(&[int(1), int(2)]),
            Err(OperationError::Arity { expected: 1, .. })
        ));
        for width in IntWidth::ALL {
            assert_eq!(width.wire_name().parse::<IntWidth>().unwrap(), width);
        }
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(Operation::Less.apply(&int(1), Some(&int(2))).unwrap(), Scalar::Bool(true));
        assert_eq!(
            Operation::GreaterOrEqual.apply(&int(2), Some(&Scalar::Float(2.0))).unwrap(),
            Scalar::Bool(true)
        );
        assert_eq!(
            Operation::Less
                .apply(&Scalar::Text("abc".into()), Some(&Scalar::Text("abd".into())))
                .unwrap(),
            Scalar::Bool(true)
        );
        let nan = Scalar::Float(f64::NAN);
        assert_eq!(Operation::Greater.apply(&nan, Some(&nan)).unwrap(), Scalar::Bool(false));
        assert_eq!(Operation::NotEqual.apply(&nan, Some(&nan)).unwrap(), Scalar::Bool(true));
    }

    #[test]
    fn test_text_concat_and_mismatch() {
        let hello = Scalar::Text("hello ".into());
        let world = Scalar::Text("world".into());
        assert_eq!(
            Operation::Add.apply(&hello, Some(&world)).unwrap(),
            Scalar::Text("hello world".into())
        );
        assert!(matches!(
            Operation::Subtract.apply(&hello, Some(&int(1))),
            Err(OperationError::TypeMismatch { op: "subtract", .. })
        ));
    }

    #[test]
    fn test_arity_is_checked() {
        assert!(matches!(
            Operation::Add.apply(&int(1), None),
            Err(OperationError::Arity { expected: 2, .. })
        ));
        assert!(matches!(
            Operation::Negate.apply(&int(1), Some(&int(1))),
            Err(OperationError::Arity { expected: 1, .. })
        ));
    }

    #[test]
    fn test_scalar_json_keeps_int_float_distinction() {
        assert_eq!(Scalar::from_json(&serde_json::json!(5)).unwrap(), int(5));
        assert_eq!(Scalar::from_json(&serde_json::json!(5.0)).unwrap(), Scalar::Float(5.0));
        assert_eq!(Scalar::Float(5.0).to_json(), serde_json::json!(5.0));
        assert!(Scalar::from_json(&serde_json::json!([1])).is_err());
    }
}
