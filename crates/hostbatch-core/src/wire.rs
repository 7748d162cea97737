//! Wire encoding of batches.
//!
//! A batch is a JSON array of positional tuples:
//!
//! ```text
//! ["setProperty",            target, name,   value]
//! ["invokeFunction",         target, method, arg...]
//! ["invokeCallbackFunction", target, method, {"id": "...", "requiresReference": false}, arg...]
//! ```
//!
//! `target` is `null` for the global scope, `{"__jsObjectId": n}` for a
//! known host object, or a result descriptor for an object produced earlier
//! in the same batch. Any argument shaped like a result descriptor is
//! replaced by that earlier result before the call runs. A `compute` record
//! is an `invokeCallbackFunction` on the global scope whose first argument is
//! the operator name.
//!
//! The response is a flat JSON object from result id to value (or to a
//! reference token when `requiresReference` was set).

use std::collections::HashMap;

use serde::de::Error as _;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};

use crate::kind::ObjectRef;
use crate::record::{Arg, CallRecord, HandleId, RecordKind, ResultDescriptor, Target};

pub const SET_PROPERTY: &str = "setProperty";
pub const INVOKE_FUNCTION: &str = "invokeFunction";
pub const INVOKE_CALLBACK_FUNCTION: &str = "invokeCallbackFunction";

const DESCRIPTOR_ID: &str = "id";
const DESCRIPTOR_REFERENCE: &str = "requiresReference";

/// Result map returned by the host for one batch.
pub type BatchResponse = HashMap<String, JsonValue>;

impl RecordKind {
    pub fn wire_name(self) -> &'static str {
        match self {
            RecordKind::SetProperty => SET_PROPERTY,
            RecordKind::Invoke => INVOKE_FUNCTION,
            RecordKind::InvokeWithResult | RecordKind::Compute => INVOKE_CALLBACK_FUNCTION,
        }
    }
}

impl ResultDescriptor {
    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::new();
        map.insert(DESCRIPTOR_ID.to_string(), JsonValue::String(self.id.to_string()));
        map.insert(DESCRIPTOR_REFERENCE.to_string(), JsonValue::Bool(self.requires_reference));
        JsonValue::Object(map)
    }

    /// Recognize a descriptor: an object with exactly an id and a
    /// reference flag.
    pub fn from_json(json: &JsonValue) -> Option<ResultDescriptor> {
        let map = json.as_object()?;
        if map.len() != 2 {
            return None;
        }
        let id = map.get(DESCRIPTOR_ID)?.as_str()?.parse::<HandleId>().ok()?;
        let requires_reference = map.get(DESCRIPTOR_REFERENCE)?.as_bool()?;
        Some(ResultDescriptor { id, requires_reference })
    }
}

impl Target {
    pub fn to_json(&self) -> JsonValue {
        match self {
            Target::Global => JsonValue::Null,
            Target::Object(reference) => {
                let mut map = Map::new();
                map.insert(ObjectRef::TOKEN_FIELD.to_string(), JsonValue::from(reference.id()));
                JsonValue::Object(map)
            }
            Target::Pending(descriptor) => descriptor.to_json(),
        }
    }

    pub fn from_json(json: &JsonValue) -> Option<Target> {
        if json.is_null() {
            return Some(Target::Global);
        }
        ObjectRef::from_json(json)
            .map(Target::Object)
            .or_else(|| ResultDescriptor::from_json(json).map(Target::Pending))
    }
}

impl Arg {
    pub fn to_json(&self) -> JsonValue {
        match self {
            Arg::Literal(value) => value.clone(),
            Arg::Ref(descriptor) => descriptor.to_json(),
        }
    }

    pub fn from_json(json: &JsonValue) -> Arg {
        match ResultDescriptor::from_json(json) {
            Some(descriptor) => Arg::Ref(descriptor),
            None => Arg::Literal(json.clone()),
        }
    }
}

impl CallRecord {
    /// Parse one tuple of a batch.
    pub fn from_wire(json: &JsonValue) -> Result<CallRecord, String> {
        let items = json
            .as_array()
            .ok_or_else(|| "record must be an array".to_string())?;
        let [kind, target, member, rest @ ..] = items.as_slice() else {
            return Err(format!("record has {} elements, expected at least 3", items.len()));
        };

        let kind = kind.as_str().ok_or_else(|| "record kind must be a string".to_string())?;
        let target = Target::from_json(target)
            .ok_or_else(|| format!("invalid record target {target}"))?;
        let member = member
            .as_str()
            .ok_or_else(|| "record member must be a string".to_string())?
            .to_string();

        let (kind, result, rest) = match kind {
            SET_PROPERTY => {
                if rest.len() != 1 {
                    return Err(format!("{SET_PROPERTY} takes exactly one value"));
                }
                (RecordKind::SetProperty, None, rest)
            }
            INVOKE_FUNCTION => (RecordKind::Invoke, None, rest),
            INVOKE_CALLBACK_FUNCTION => {
                let (descriptor, args) = rest
                    .split_first()
                    .ok_or_else(|| format!("{INVOKE_CALLBACK_FUNCTION} needs a result descriptor"))?;
                let descriptor = ResultDescriptor::from_json(descriptor)
                    .ok_or_else(|| format!("invalid result descriptor {descriptor}"))?;
                let kind = if target == Target::Global && member == CallRecord::COMPUTE_MEMBER {
                    RecordKind::Compute
                } else {
                    RecordKind::InvokeWithResult
                };
                (kind, Some(descriptor), args)
            }
            other => return Err(format!("unknown record kind '{other}'")),
        };

        Ok(CallRecord {
            kind,
            target,
            member,
            args: rest.iter().map(Arg::from_json).collect(),
            result,
        })
    }
}

impl Serialize for CallRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let extra = usize::from(self.result.is_some());
        let mut seq = serializer.serialize_seq(Some(3 + extra + self.args.len()))?;
        seq.serialize_element(self.kind.wire_name())?;
        seq.serialize_element(&self.target.to_json())?;
        seq.serialize_element(&self.member)?;
        if let Some(descriptor) = &self.result {
            seq.serialize_element(&descriptor.to_json())?;
        }
        for arg in &self.args {
            seq.serialize_element(&arg.to_json())?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for CallRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = JsonValue::deserialize(deserializer)?;
        CallRecord::from_wire(&raw).map_err(D::Error::custom)
    }
}

pub fn encode_batch(records: &[CallRecord]) -> serde_json::Result<String> {
    serde_json::to_string(records)
}

pub fn decode_batch(text: &str) -> serde_json::Result<Vec<CallRecord>> {
    serde_json::from_str(text)
}

pub fn encode_response(response: &BatchResponse) -> serde_json::Result<String> {
    serde_json::to_string(response)
}

pub fn decode_response(text: &str) -> serde_json::Result<BatchResponse> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;
    use serde_json::json;

    #[test]
    fn test_set_property_tuple() {
        let record = CallRecord::set_property(ObjectRef::new(3), "fillStyle", "red");
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!(["setProperty", {"__jsObjectId": 3}, "fillStyle", "red"])
        );
    }

    #[test]
    fn test_global_invoke_tuple() {
        let record = CallRecord::invoke(Target::Global, "print", vec![Arg::from("hi")]);
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!(["invokeFunction", null, "print", "hi"])
        );
    }

    #[test]
    fn test_callback_tuple_puts_descriptor_first() {
        let id = HandleId::new();
        let mut record = CallRecord::compute(
            Operation::Add,
            vec![Arg::from(3i32), Arg::Ref(ResultDescriptor { id, requires_reference: false })],
        );
        let result = HandleId::new();
        record.result = Some(ResultDescriptor { id: result, requires_reference: false });

        let wire = serde_json::to_value(&record).unwrap();
        assert_eq!(
            wire,
            json!([
                "invokeCallbackFunction",
                null,
                "compute",
                {"id": result.to_string(), "requiresReference": false},
                "add",
                3,
                {"id": id.to_string(), "requiresReference": false}
            ])
        );

        let decoded: CallRecord = serde_json::from_value(wire).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_invoke_with_result_is_not_compute() {
        let wire = json!([
            "invokeCallbackFunction",
            {"__jsObjectId": 1},
            "compute",
            {"id": HandleId::new().to_string(), "requiresReference": true}
        ]);
        let decoded = CallRecord::from_wire(&wire).unwrap();
        assert_eq!(decoded.kind, RecordKind::InvokeWithResult);
        assert!(decoded.result.unwrap().requires_reference);
    }

    #[test]
    fn test_descriptor_lookalikes_stay_literal() {
        let arg = Arg::from_json(&json!({"id": "nope", "requiresReference": false}));
        assert!(matches!(arg, Arg::Literal(_)));
        let arg = Arg::from_json(&json!({"id": HandleId::new().to_string(), "requiresReference": false, "x": 1}));
        assert!(matches!(arg, Arg::Literal(_)));
    }

    #[test]
    fn test_malformed_records_are_rejected() {
        assert!(decode_batch(r#"[["jump", null, "x"]]"#).is_err());
        assert!(decode_batch(r#"[["invokeFunction", null]]"#).is_err());
        assert!(decode_batch(r#"[["setProperty", null, "x"]]"#).is_err());
        assert!(decode_batch(r#"[["invokeCallbackFunction", null, "f"]]"#).is_err());
        assert!(decode_batch(r#"[["invokeFunction", "window", "f"]]"#).is_err());
    }

    #[test]
    fn test_response_map() {
        let response = decode_response(r#"{"a": 5, "b": [1, 2]}"#).unwrap();
        assert_eq!(response["a"], json!(5));
        assert_eq!(response.len(), 2);
    }
}
