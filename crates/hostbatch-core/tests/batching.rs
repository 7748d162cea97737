//! Batching behaviour against an in-test host that runs records in order.

use std::cell::RefCell;
use std::fmt::Display;
use std::rc::Rc;

use hostbatch_core::{
    from_fn, Arg, BatchResponse, BridgeError, CallRecord, Deferred, Dispatcher, Error, HandleFault,
    HostBridge, HostType, Integral, ObjectRef, Operation, RecordKind, Scalar, SessionPhase, Target,
};
use serde_json::{json, Value as JsonValue};

type Batches = Rc<RefCell<Vec<Vec<CallRecord>>>>;

fn host_error(err: impl Display) -> BridgeError {
    BridgeError::Host(err.to_string())
}

/// Runs a batch the way a host must: strictly in order, substituting
/// references from a transient result map.
fn execute(batch: &[CallRecord]) -> Result<BatchResponse, BridgeError> {
    let mut results = BatchResponse::new();
    for record in batch {
        let args = record
            .args
            .iter()
            .map(|arg| match arg {
                Arg::Literal(value) => Ok(value.clone()),
                Arg::Ref(descriptor) => results
                    .get(&descriptor.id.to_string())
                    .cloned()
                    .ok_or_else(|| host_error(format!("unknown reference {}", descriptor.id))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let value = match (record.kind, record.member.as_str()) {
            (RecordKind::Compute, _) => {
                let op: Operation = args[0].as_str().unwrap_or_default().parse().map_err(host_error)?;
                let operands = args[1..]
                    .iter()
                    .map(Scalar::from_json)
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(host_error)?;
                op.apply_operands(&operands).map_err(host_error)?.to_json()
            }
            (_, "value") => args[0].clone(),
            (_, "length") => json!(5),
            (_, "resolveProxyOperation") => {
                json!(args[1].as_str().map(|s| s.encode_utf16().count()).unwrap_or(0))
            }
            _ => JsonValue::Null,
        };
        if let Some(descriptor) = record.result {
            results.insert(descriptor.id.to_string(), value);
        }
    }
    Ok(results)
}

fn stub_host(batches: Batches) -> impl HostBridge {
    from_fn(move |batch| {
        batches.borrow_mut().push(batch.to_vec());
        execute(batch)
    })
}

fn connected() -> (Dispatcher, Batches) {
    let batches = Batches::default();
    (Dispatcher::new(stub_host(batches.clone())), batches)
}

/// A handle that stays pending until the batch ends.
fn pending<T: HostType>(dispatcher: &Dispatcher, value: T) -> Deferred<T> {
    dispatcher
        .invoke_with_result(Target::Global, "value", vec![Arg::from(value)])
        .unwrap()
}

fn read<T: HostType>(handle: &Deferred<T>) -> Option<JsonValue> {
    handle.value().map(|value| value.encode())
}

/// The encoded value of an operator's result handle, read on demand.
struct Outcome(Box<dyn Fn() -> Option<JsonValue>>);

impl Outcome {
    fn of<T: HostType>(handle: Deferred<T>) -> Self {
        Outcome(Box::new(move || read(&handle)))
    }

    fn read(&self) -> Option<JsonValue> {
        (self.0)()
    }
}

fn apply_int<T: Integral>(op: Operation, a: &Deferred<T>, b: &Deferred<T>) -> Outcome {
    match op {
        Operation::Add => Outcome::of(a + b),
        Operation::Subtract => Outcome::of(a - b),
        Operation::Multiply => Outcome::of(a * b),
        Operation::Divide => Outcome::of(a / b),
        Operation::Modulo => Outcome::of(a % b),
        Operation::Negate => Outcome::of(-a),
        Operation::Invert => Outcome::of(!a),
        Operation::Equal => Outcome::of(a.equal(b)),
        Operation::NotEqual => Outcome::of(a.not_equal(b)),
        Operation::Greater => Outcome::of(a.greater(b)),
        Operation::Less => Outcome::of(a.less(b)),
        Operation::GreaterOrEqual => Outcome::of(a.greater_or_equal(b)),
        Operation::LessOrEqual => Outcome::of(a.less_or_equal(b)),
        Operation::And => Outcome::of(a & b),
        Operation::Or => Outcome::of(a | b),
        Operation::Xor => Outcome::of(a ^ b),
        Operation::LeftShift => Outcome::of(a << b),
        Operation::RightShift => Outcome::of(a >> b),
    }
}

fn apply_float(op: Operation, a: &Deferred<f64>, b: &Deferred<f64>) -> Option<Outcome> {
    Some(match op {
        Operation::Add => Outcome::of(a + b),
        Operation::Subtract => Outcome::of(a - b),
        Operation::Multiply => Outcome::of(a * b),
        Operation::Divide => Outcome::of(a / b),
        Operation::Modulo => Outcome::of(a % b),
        Operation::Negate => Outcome::of(-a),
        Operation::Equal => Outcome::of(a.equal(b)),
        Operation::NotEqual => Outcome::of(a.not_equal(b)),
        Operation::Greater => Outcome::of(a.greater(b)),
        Operation::Less => Outcome::of(a.less(b)),
        Operation::GreaterOrEqual => Outcome::of(a.greater_or_equal(b)),
        Operation::LessOrEqual => Outcome::of(a.less_or_equal(b)),
        _ => return None,
    })
}

fn apply_bool(op: Operation, a: &Deferred<bool>, b: &Deferred<bool>) -> Option<Outcome> {
    Some(Outcome::of(match op {
        Operation::Invert => !a,
        Operation::And => a & b,
        Operation::Or => a | b,
        Operation::Xor => a ^ b,
        Operation::Equal => a.equal(b),
        Operation::NotEqual => a.not_equal(b),
        Operation::Greater => a.greater(b),
        Operation::Less => a.less(b),
        _ => return None,
    }))
}

/// Evaluate `apply` once on known operands and once through compute
/// records, returning both outcomes.
fn both_ways<T: HostType>(
    a: T,
    b: T,
    apply: impl Fn(&Deferred<T>, &Deferred<T>) -> Option<Outcome>,
) -> Option<(Option<JsonValue>, Option<JsonValue>)> {
    let local = apply(&Deferred::resolved(a.clone()), &Deferred::resolved(b.clone()))?.read();

    let (dispatcher, _) = connected();
    dispatcher.begin_batch().unwrap();
    let remote = apply(&pending(&dispatcher, a), &pending(&dispatcher, b))?;
    // Operator errors abort the host batch; the handle is faulted either way.
    let _ = dispatcher.end_batch();
    Some((local, remote.read()))
}

fn assert_integer_parity<T: Integral + Copy + Display>(pairs: &[(T, T)]) {
    for op in Operation::ALL {
        for &(a, b) in pairs {
            let (local, remote) = both_ways(a, b, |x, y| Some(apply_int(op, x, y))).unwrap();
            assert_eq!(local, remote, "{op} on {a}, {b}");
        }
    }
}

#[test]
fn test_i64_parity() {
    assert_integer_parity(&[
        (7i64, 3i64),
        (-8, 2),
        (5, 0),
        (i64::MAX, 1),
        (i64::MIN, -1),
        (1, 63),
        (1, 64),
        (1, 70),
        (12, 12),
    ]);
}

#[test]
fn test_i32_parity() {
    assert_integer_parity(&[
        (7i32, 3i32),
        (-8, 2),
        (5, 0),
        (i32::MAX, 1),
        (i32::MIN, -1),
        (1, 31),
        (1, 32),
        (-1, 40),
        (12, 12),
    ]);
}

#[test]
fn test_u32_parity() {
    assert_integer_parity(&[
        (7u32, 3u32),
        (3, 31),
        (5, 0),
        (u32::MAX, 1),
        (0, 1),
        (1, 32),
        (12, 12),
    ]);
}

#[test]
fn test_narrow_integers_wrap_on_the_host() {
    let (dispatcher, batches) = connected();
    dispatcher.begin_batch().unwrap();
    let three = pending(&dispatcher, 3u32);
    let one = pending(&dispatcher, 1i32);
    let inverted = !&three;
    let top_bit = &one << 31;
    dispatcher.end_batch().unwrap();

    assert_eq!(inverted.value(), Some(4294967292));
    assert_eq!(top_bit.value(), Some(i32::MIN));
    {
        let batches = batches.borrow();
        let compute = &batches[0][2];
        assert_eq!(compute.args.last(), Some(&Arg::Literal(json!("u32"))));
    }

    dispatcher.begin_batch().unwrap();
    let one = pending(&dispatcher, 1i32);
    let too_far = &one << 32;
    assert!(dispatcher.end_batch().is_err());
    assert!(too_far.fault().is_some());
    assert!((Deferred::resolved(1i32) << 32).fault().is_some());
}

#[test]
fn test_float_parity() {
    let pairs = [(7.5f64, 2.0f64), (-1.25, 0.5), (0.1, 0.2), (3.0, 3.0)];
    for op in Operation::ALL {
        for (a, b) in pairs {
            if let Some((local, remote)) = both_ways(a, b, |x, y| apply_float(op, x, y)) {
                assert_eq!(local, remote, "{op} on {a}, {b}");
            }
        }
    }
}

#[test]
fn test_boolean_parity() {
    for op in Operation::ALL {
        for (a, b) in [(true, false), (true, true), (false, false)] {
            if let Some((local, remote)) = both_ways(a, b, |x, y| apply_bool(op, x, y)) {
                assert_eq!(local, remote, "{op} on {a}, {b}");
            }
        }
    }
}

#[test]
fn test_text_parity() {
    let (dispatcher, _) = connected();
    dispatcher.begin_batch().unwrap();
    let a = pending(&dispatcher, "abc".to_string());
    let b = pending(&dispatcher, "abd".to_string());
    let joined = &a + &b;
    let less = a.less(&b);
    let length = joined.length();
    dispatcher.end_batch().unwrap();

    let local_a = Deferred::resolved("abc".to_string());
    let local_b = Deferred::resolved("abd".to_string());
    assert_eq!(joined.value(), (&local_a + &local_b).value());
    assert_eq!(less.value(), local_a.less(&local_b).value());
    assert_eq!(length.value(), Some(6));
}

#[test]
fn test_known_operands_queue_nothing() {
    let (dispatcher, batches) = connected();
    dispatcher.begin_batch().unwrap();
    let a = Deferred::resolved(9i64);
    let b = Deferred::resolved(4i64);
    for op in Operation::ALL {
        assert!(apply_int(op, &a, &b).read().is_some(), "{op}");
    }
    let _ = a.equal(4i64) | b.greater(1i64);
    assert_eq!(dispatcher.queued_len(), 0);
    dispatcher.end_batch().unwrap();
    assert!(batches.borrow().is_empty());
}

#[test]
fn test_mixed_operands_compose_in_one_round_trip() {
    let (dispatcher, batches) = connected();
    dispatcher.begin_batch().unwrap();
    let a = Deferred::resolved(3i32);
    let b = pending(&dispatcher, 10i32);
    let c = &a + &b;
    assert!(c.is_pending());

    let summary = dispatcher.end_batch().unwrap();
    assert_eq!(summary.records, 2);
    assert_eq!(c.value(), Some(13));

    let batches = batches.borrow();
    assert_eq!(batches.len(), 1);
    let compute = &batches[0][1];
    assert_eq!(compute.kind, RecordKind::Compute);
    assert_eq!(compute.args[0], Arg::Literal(json!("add")));
    assert_eq!(compute.args[1], Arg::Literal(json!(3)));
    assert_eq!(compute.args[2], Arg::Ref(b.descriptor()));
}

#[test]
fn test_chained_computations_follow_enqueue_order() {
    let (dispatcher, batches) = connected();
    dispatcher.begin_batch().unwrap();
    let x = pending(&dispatcher, 4i64);
    let doubled = &x * 2i64;
    let shifted = &doubled << 1i64;
    let check = shifted.greater_or_equal(&doubled);
    let negated = -&shifted;
    dispatcher.end_batch().unwrap();

    assert_eq!(doubled.value(), Some(8));
    assert_eq!(shifted.value(), Some(16));
    assert_eq!(check.value(), Some(true));
    assert_eq!(negated.value(), Some(-16));

    let members: Vec<_> = batches.borrow()[0]
        .iter()
        .map(|record| record.args.first().cloned())
        .collect();
    assert_eq!(
        members,
        vec![
            Some(Arg::Literal(json!(4))),
            Some(Arg::Literal(json!("multiply"))),
            Some(Arg::Literal(json!("lshift"))),
            Some(Arg::Literal(json!("gequal"))),
            Some(Arg::Literal(json!("negate"))),
        ]
    );
}

#[test]
fn test_length_scenario() {
    let (dispatcher, _) = connected();
    dispatcher.begin_batch().unwrap();
    let record = CallRecord::invoke_with_result(ObjectRef::new(1), "length", vec![]);
    let h = dispatcher.enqueue_with_result::<i32>(record).unwrap().unwrap();
    assert!(!h.is_resolved());
    dispatcher.end_batch().unwrap();
    assert!(h.is_resolved());
    assert_eq!(h.value(), Some(5));
}

#[test]
fn test_resolved_handles_outlive_the_batch() {
    let (dispatcher, _) = connected();
    dispatcher.begin_batch().unwrap();
    let h = pending(&dispatcher, 21i64);
    dispatcher.end_batch().unwrap();

    assert_eq!(h.resolve_payload(&json!(99)).unwrap(), 21);
    drop(dispatcher);
    assert_eq!((&h * 2i64).value(), Some(42));
}

#[test]
fn test_empty_batch_makes_no_round_trip() {
    let (dispatcher, batches) = connected();
    dispatcher.begin_batch().unwrap();
    let summary = dispatcher.end_batch().unwrap();
    assert_eq!(summary.records, 0);
    assert!(batches.borrow().is_empty());
    assert_eq!(dispatcher.phase(), SessionPhase::Idle);
}

#[test]
fn test_operator_during_round_trip_is_rejected() {
    let parked: Rc<RefCell<Option<Deferred<i64>>>> = Rc::default();
    let observed: Rc<RefCell<Option<Deferred<i64>>>> = Rc::default();
    let (inside, out) = (parked.clone(), observed.clone());
    let dispatcher = Dispatcher::new(from_fn(move |batch| {
        if let Some(handle) = inside.borrow().as_ref() {
            *out.borrow_mut() = Some(handle + 1i64);
        }
        execute(batch)
    }));

    dispatcher.begin_batch().unwrap();
    *parked.borrow_mut() = Some(pending(&dispatcher, 1i64));
    dispatcher.end_batch().unwrap();

    let late = observed.borrow_mut().take().unwrap();
    assert!(matches!(late.fault(), Some(HandleFault::Rejected(_))));
}

#[test]
fn test_dropped_session_detaches_pending_operands() {
    let (dispatcher, _) = connected();
    dispatcher.begin_batch().unwrap();
    let orphan = pending(&dispatcher, 1i32);
    drop(dispatcher);

    let sum = &orphan + 1;
    assert_eq!(sum.fault(), Some(HandleFault::Detached));
    assert!(matches!(orphan.try_value(), Err(Error::Unresolved(_))));
}

#[test]
fn test_host_failure_faults_dependents() {
    let (dispatcher, _) = connected();
    dispatcher.begin_batch().unwrap();
    let x = pending(&dispatcher, 1i64);
    let broken = &x / 0i64;
    let after = &broken + 1i64;
    let err = dispatcher.end_batch().unwrap_err();

    assert!(matches!(err, Error::PartialBatchFailure { records: 3, .. }));
    for handle in [&x, &broken, &after] {
        assert!(matches!(handle.fault(), Some(HandleFault::BatchFailed(_))));
    }
}
