//! The batch interpreter.
//!
//! Executes Call Records strictly in the order they arrive. Results of
//! records with a result slot are kept in a map that lives for one batch, so
//! later records can read them through result descriptors. The first failing
//! record aborts the batch; everything before it has already run.

use std::collections::HashMap;

use hostbatch_core::wire::{self, BatchResponse};
use hostbatch_core::{Arg, CallRecord, HandleId, ObjectRef, RecordKind, Target};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info};

use crate::builtins;
use crate::error::HostError;
use crate::runtime::{PrintSink, Runtime};
use crate::value::HostValue;
use crate::Result;

/// Global function that calls a method by name with an array of arguments.
pub const INVOKE_FUNCTION: &str = "invokeFunction";

/// A global function registered by the embedder.
pub type NativeFunction = Box<dyn Fn(&mut Runtime, &[HostValue]) -> Result<HostValue> + Send>;

/// A method registered for one class of heap objects.
pub type NativeMethod = Box<dyn Fn(&mut Runtime, ObjectRef, &[HostValue]) -> Result<HostValue> + Send>;

/// Host configuration.
#[derive(Debug, Clone, Default)]
pub struct HostOptions {
    /// Reject batches with more records than this before running any.
    pub max_records: Option<usize>,
    /// Where `print` output goes. Stdout when unset.
    pub print_sink: Option<PrintSink>,
}

impl HostOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_records(mut self, limit: usize) -> Self {
        self.max_records = Some(limit);
        self
    }

    pub fn print_sink(mut self, sink: PrintSink) -> Self {
        self.print_sink = Some(sink);
        self
    }
}

/// The reference host.
pub struct Interpreter {
    runtime: Runtime,
    functions: HashMap<String, NativeFunction>,
    methods: HashMap<(String, String), NativeMethod>,
    max_records: Option<usize>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_options(HostOptions::default())
    }

    pub fn with_options(options: HostOptions) -> Self {
        let runtime = match options.print_sink {
            Some(sink) => Runtime::with_print_sink(sink),
            None => Runtime::new(),
        };
        Self {
            runtime,
            functions: HashMap::new(),
            methods: HashMap::new(),
            max_records: options.max_records,
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.runtime
    }

    /// Register a global function. It shadows a builtin of the same name.
    pub fn register_function<F>(&mut self, name: &str, function: F)
    where
        F: Fn(&mut Runtime, &[HostValue]) -> Result<HostValue> + Send + 'static,
    {
        self.functions.insert(name.to_string(), Box::new(function));
    }

    /// Register a method for objects created with `class`.
    pub fn register_method<F>(&mut self, class: &str, name: &str, method: F)
    where
        F: Fn(&mut Runtime, ObjectRef, &[HostValue]) -> Result<HostValue> + Send + 'static,
    {
        self.methods
            .insert((class.to_string(), name.to_string()), Box::new(method));
    }

    /// Execute a batch in wire form and return the encoded response map.
    pub fn execute_wire(&mut self, payload: &str) -> Result<String> {
        let batch = wire::decode_batch(payload)?;
        let response = self.execute_batch(&batch)?;
        Ok(wire::encode_response(&response)?)
    }

    /// Execute every record in order.
    pub fn execute_batch(&mut self, batch: &[CallRecord]) -> Result<BatchResponse> {
        if let Some(limit) = self.max_records {
            if batch.len() > limit {
                return Err(HostError::TooManyRecords {
                    records: batch.len(),
                    limit,
                });
            }
        }

        info!(records = batch.len(), "executing batch");
        let mut results = HashMap::new();
        let mut response = BatchResponse::new();
        for (index, record) in batch.iter().enumerate() {
            self.execute_record(record, &mut results, &mut response)
                .map_err(|source| {
                    error!(index, member = %record.member, error = %source, "record failed, batch aborted");
                    HostError::Record {
                        index,
                        member: record.member.clone(),
                        source: Box::new(source),
                    }
                })?;
        }
        Ok(response)
    }

    fn execute_record(
        &mut self,
        record: &CallRecord,
        results: &mut HashMap<HandleId, HostValue>,
        response: &mut BatchResponse,
    ) -> Result<()> {
        let target = resolve_target(&record.target, results)?;
        let args = record
            .args
            .iter()
            .map(|arg| resolve_arg(arg, results))
            .collect::<Result<Vec<_>>>()?;
        debug!(kind = ?record.kind, member = %record.member, args = args.len(), "executing record");

        match record.kind {
            RecordKind::SetProperty => {
                let [value] = <[HostValue; 1]>::try_from(args).map_err(|args| {
                    HostError::Malformed(format!("setProperty takes one value, got {}", args.len()))
                })?;
                self.runtime.set_property(&target, &record.member, value)?;
            }
            RecordKind::Invoke => {
                self.call(&target, &record.member, &args)?;
            }
            RecordKind::InvokeWithResult | RecordKind::Compute => {
                let descriptor = record
                    .result
                    .ok_or_else(|| HostError::Malformed(format!("'{}' has no result slot", record.member)))?;
                if results.contains_key(&descriptor.id) {
                    return Err(HostError::Malformed(format!("result {} produced twice", descriptor.id)));
                }

                let value = self.call(&target, &record.member, &args)?;
                let (stored, reply) = if descriptor.requires_reference {
                    let reference = self.runtime.reference_for(value);
                    (HostValue::Reference(reference), JsonValue::from(reference.id()))
                } else {
                    let reply = value.to_json();
                    (value, reply)
                };
                results.insert(descriptor.id, stored);
                response.insert(descriptor.id.to_string(), reply);
            }
        }
        Ok(())
    }

    /// Call `member` on `target`, or in the global scope when it is null.
    pub fn call(&mut self, target: &HostValue, member: &str, args: &[HostValue]) -> Result<HostValue> {
        match target {
            HostValue::Null => {
                if member == INVOKE_FUNCTION {
                    return self.invoke_function(args);
                }
                if let Some(function) = self.functions.get(member) {
                    return function(&mut self.runtime, args);
                }
                builtins::eval_builtin(member, args, &mut self.runtime)
            }
            HostValue::Reference(reference) => {
                let class = self.runtime.object(*reference)?.class.clone();
                if let Some(method) = self.methods.get(&(class, member.to_string())) {
                    return method(&mut self.runtime, *reference, args);
                }
                builtins::object_method(&mut self.runtime, *reference, member, args)
            }
            other => Err(HostError::runtime(format!(
                "Cannot call '{}' on {}",
                member,
                other.type_name()
            ))),
        }
    }

    /// invokeFunction(target, method, [args...])
    fn invoke_function(&mut self, args: &[HostValue]) -> Result<HostValue> {
        let [target, method, rest @ ..] = args else {
            return Err(HostError::runtime("invokeFunction() needs a target and a method name"));
        };
        let method = method
            .as_str()
            .ok_or_else(|| HostError::runtime("invokeFunction() expects a method name"))?;
        let call_args = match rest {
            [] => Vec::new(),
            [HostValue::Array(items)] => items.clone(),
            _ => return Err(HostError::runtime("invokeFunction() expects its arguments as one array")),
        };
        self.call(target, method, &call_args)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup(results: &HashMap<HandleId, HostValue>, id: HandleId) -> Result<HostValue> {
    results.get(&id).cloned().ok_or(HostError::UnknownReference(id))
}

fn resolve_target(target: &Target, results: &HashMap<HandleId, HostValue>) -> Result<HostValue> {
    match target {
        Target::Global => Ok(HostValue::Null),
        Target::Object(reference) => Ok(HostValue::Reference(*reference)),
        Target::Pending(descriptor) => lookup(results, descriptor.id),
    }
}

fn resolve_arg(arg: &Arg, results: &HashMap<HandleId, HostValue>) -> Result<HostValue> {
    match arg {
        Arg::Literal(value) => Ok(HostValue::from_json(value)),
        Arg::Ref(descriptor) => lookup(results, descriptor.id),
    }
}
