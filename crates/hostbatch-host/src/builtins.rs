//! Global host functions and the methods every heap object answers to.

use std::collections::HashMap;

use hostbatch_core::{Operation, ObjectRef, GET_PROPERTY, RESOLVE_PROXY_OPERATION};

use crate::error::HostError;
use crate::runtime::{Runtime, DEFAULT_CLASS};
use crate::value::HostValue;
use crate::Result;

fn expect_args(name: &str, args: &[HostValue], count: usize) -> Result<()> {
    if args.len() != count {
        return Err(HostError::runtime(format!(
            "{}() takes exactly {} argument{}",
            name,
            count,
            if count == 1 { "" } else { "s" }
        )));
    }
    Ok(())
}

fn expect_str<'a>(name: &str, value: &'a HostValue) -> Result<&'a str> {
    value.as_str().ok_or_else(|| {
        HostError::runtime(format!("{}() expects a string, got {}", name, value.type_name()))
    })
}

/// Apply an operator to one or two operands, optionally followed by an
/// integer width tag.
pub fn compute(args: &[HostValue]) -> Result<HostValue> {
    let (op, operands) = args
        .split_first()
        .ok_or_else(|| HostError::runtime("compute() needs an operation name"))?;
    let op: Operation = expect_str("compute", op)?.parse()?;
    let operands = operands
        .iter()
        .map(HostValue::to_scalar)
        .collect::<Result<Vec<_>>>()?;

    Ok(HostValue::from_scalar(op.apply_operands(&operands)?))
}

/// Evaluate a global function other than `invokeFunction`.
pub fn eval_builtin(name: &str, args: &[HostValue], runtime: &mut Runtime) -> Result<HostValue> {
    let result = match name {
        "compute" => compute(args)?,

        GET_PROPERTY => {
            expect_args(name, args, 2)?;
            let property = expect_str(name, &args[1])?;
            runtime.get_property(&args[0], property)?
        }

        "setProperty" => {
            expect_args(name, args, 3)?;
            let property = expect_str(name, &args[1])?;
            runtime.set_property(&args[0], property, args[2].clone())?;
            HostValue::Null
        }

        RESOLVE_PROXY_OPERATION => {
            // resolveProxyOperation(operation, value)
            expect_args(name, args, 2)?;
            match expect_str(name, &args[0])? {
                "length" => match &args[1] {
                    value @ (HostValue::String(_) | HostValue::Array(_)) => {
                        runtime.get_property(value, "length")?
                    }
                    other => {
                        return Err(HostError::runtime(format!(
                            "Cannot get length of {}",
                            other.type_name()
                        )))
                    }
                },
                other => {
                    return Err(HostError::runtime(format!("Unknown proxy operation: {}", other)))
                }
            }
        }

        "createObject" => {
            // createObject(class?, properties?)
            let class = match args.first() {
                None | Some(HostValue::Null) => DEFAULT_CLASS,
                Some(value) => expect_str(name, value)?,
            };
            let properties = match args.get(1) {
                None | Some(HostValue::Null) => HashMap::new(),
                Some(HostValue::Object(map)) => map.clone(),
                Some(other) => {
                    return Err(HostError::runtime(format!(
                        "createObject() expects an object of properties, got {}",
                        other.type_name()
                    )))
                }
            };
            HostValue::Reference(runtime.create_object(class, properties))
        }

        "print" => {
            // print(values...) - print to output sink (or stdout if none)
            let output: Vec<String> = args.iter().map(HostValue::to_string_value).collect();
            runtime.print(output.join(" "))?;
            HostValue::Null
        }

        "typeof" => {
            expect_args(name, args, 1)?;
            match &args[0] {
                HostValue::Reference(reference) => HostValue::String(runtime.object(*reference)?.class.clone()),
                other => HostValue::from(other.type_name()),
            }
        }

        _ => return Err(HostError::UnknownFunction(name.to_string())),
    };

    Ok(result)
}

/// Methods every heap object supports.
pub fn object_method(
    runtime: &mut Runtime,
    reference: ObjectRef,
    method: &str,
    args: &[HostValue],
) -> Result<HostValue> {
    let target = HostValue::Reference(reference);
    let result = match method {
        "get" => {
            expect_args(method, args, 1)?;
            runtime.get_property(&target, expect_str(method, &args[0])?)?
        }

        "set" => {
            expect_args(method, args, 2)?;
            runtime.set_property(&target, expect_str(method, &args[0])?, args[1].clone())?;
            HostValue::Null
        }

        "has" => {
            expect_args(method, args, 1)?;
            let property = expect_str(method, &args[0])?;
            HostValue::Boolean(runtime.object(reference)?.properties.contains_key(property))
        }

        "keys" => {
            expect_args(method, args, 0)?;
            let mut keys: Vec<&String> = runtime.object(reference)?.properties.keys().collect();
            keys.sort();
            HostValue::Array(keys.into_iter().map(|k| HostValue::String(k.clone())).collect())
        }

        _ => {
            return Err(HostError::UnknownMethod {
                class: runtime.object(reference)?.class.clone(),
                method: method.to_string(),
            })
        }
    };

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostbatch_core::OperationError;

    fn call(name: &str, args: Vec<HostValue>) -> Result<HostValue> {
        eval_builtin(name, &args, &mut Runtime::new())
    }

    #[test]
    fn test_compute() {
        let sum = call("compute", vec!["add".into(), 3i64.into(), 4i64.into()]).unwrap();
        assert_eq!(sum, HostValue::Integer(7));

        let negated = call("compute", vec!["negate".into(), 2.5f64.into()]).unwrap();
        assert_eq!(negated, HostValue::Float(-2.5));

        let gequal = call("compute", vec!["gequal".into(), 2i64.into(), 2.0f64.into()]).unwrap();
        assert_eq!(gequal, HostValue::Boolean(true));
    }

    #[test]
    fn test_compute_honours_width_tag() {
        let inverted = call("compute", vec!["invert".into(), 3i64.into(), "u32".into()]).unwrap();
        assert_eq!(inverted, HostValue::Integer(i64::from(!3u32)));

        let top_bit = call("compute", vec!["lshift".into(), 1i64.into(), 31i64.into(), "i32".into()]).unwrap();
        assert_eq!(top_bit, HostValue::Integer(i64::from(i32::MIN)));

        assert!(matches!(
            call("compute", vec!["lshift".into(), 1i64.into(), 32i64.into(), "i32".into()]),
            Err(HostError::Operation(OperationError::ShiftOutOfRange(32)))
        ));
        assert!(matches!(
            call("compute", vec!["add".into(), 1i64.into(), 2i64.into(), "i8".into()]),
            Err(HostError::Operation(OperationError::UnknownWidth(_)))
        ));
        assert!(matches!(
            call("compute", vec!["negate".into(), 1i64.into(), 2i64.into()]),
            Err(HostError::Operation(OperationError::Arity { expected: 1, .. }))
        ));
    }

    #[test]
    fn test_compute_errors() {
        assert!(matches!(
            call("compute", vec!["divide".into(), 1i64.into(), 0i64.into()]),
            Err(HostError::Operation(OperationError::DivisionByZero(_)))
        ));
        assert!(matches!(
            call("compute", vec!["power".into(), 1i64.into(), 2i64.into()]),
            Err(HostError::Operation(OperationError::Unknown(_)))
        ));
        assert!(call("compute", vec!["add".into(), HostValue::Null, 1i64.into()]).is_err());
        assert!(call("compute", vec![]).is_err());
    }

    #[test]
    fn test_proxy_length() {
        let length = call(RESOLVE_PROXY_OPERATION, vec!["length".into(), "hello".into()]).unwrap();
        assert_eq!(length, HostValue::Integer(5));
        assert!(call(RESOLVE_PROXY_OPERATION, vec!["length".into(), 3i64.into()]).is_err());
        assert!(call(RESOLVE_PROXY_OPERATION, vec!["upper".into(), "a".into()]).is_err());
    }

    #[test]
    fn test_objects_and_properties() {
        let mut rt = Runtime::new();
        let object = eval_builtin("createObject", &["Point".into()], &mut rt).unwrap();
        eval_builtin("setProperty", &[object.clone(), "x".into(), 3i64.into()], &mut rt).unwrap();
        let x = eval_builtin(GET_PROPERTY, &[object.clone(), "x".into()], &mut rt).unwrap();
        assert_eq!(x, HostValue::Integer(3));
        assert_eq!(eval_builtin("typeof", &[object.clone()], &mut rt).unwrap(), HostValue::from("Point"));

        let HostValue::Reference(reference) = object else {
            panic!("createObject did not return a reference");
        };
        assert_eq!(
            object_method(&mut rt, reference, "keys", &[]).unwrap(),
            HostValue::Array(vec!["x".into()])
        );
        assert_eq!(
            object_method(&mut rt, reference, "has", &["y".into()]).unwrap(),
            HostValue::Boolean(false)
        );
        assert!(matches!(
            object_method(&mut rt, reference, "draw", &[]),
            Err(HostError::UnknownMethod { .. })
        ));
    }

    #[test]
    fn test_print_joins_arguments() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut rt = Runtime::with_print_sink(tx);
        eval_builtin("print", &["total".into(), 3i64.into()], &mut rt).unwrap();
        assert_eq!(rx.recv().unwrap(), "total 3");
    }

    #[test]
    fn test_unknown_function() {
        assert!(matches!(call("launch", vec![]), Err(HostError::UnknownFunction(_))));
    }
}
