//! Host state: the global scope and the object heap.

use std::collections::HashMap;
use std::sync::mpsc::Sender;

use hostbatch_core::ObjectRef;

use crate::error::HostError;
use crate::value::HostValue;
use crate::Result;

/// A sink for print output, allowing redirection away from stdout.
pub type PrintSink = Sender<String>;

/// Class given to objects created without one.
pub const DEFAULT_CLASS: &str = "Object";

/// Class of heap entries made to hand out a reference to a plain value.
pub const BOXED_CLASS: &str = "Boxed";

/// An object in the host heap.
#[derive(Debug, Clone, PartialEq)]
pub struct HeapObject {
    pub class: String,
    pub properties: HashMap<String, HostValue>,
}

/// State that outlives a single batch.
#[derive(Debug, Default)]
pub struct Runtime {
    globals: HashMap<String, HostValue>,
    objects: HashMap<u64, HeapObject>,
    next_id: u64,
    /// Optional sink for print output. If None, prints go to stdout.
    print_sink: Option<PrintSink>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_print_sink(print_sink: PrintSink) -> Self {
        Self {
            print_sink: Some(print_sink),
            ..Self::default()
        }
    }

    pub fn set_print_sink(&mut self, sink: PrintSink) {
        self.print_sink = Some(sink);
    }

    /// Send a print message to the sink, or stdout if no sink is configured.
    pub fn print(&self, message: String) -> Result<()> {
        if let Some(ref sink) = self.print_sink {
            sink.send(message)
                .map_err(|e| HostError::runtime(format!("Print channel disconnected: {}", e)))
        } else {
            println!("{}", message);
            Ok(())
        }
    }

    /// Allocate a new heap object.
    pub fn create_object(&mut self, class: &str, properties: HashMap<String, HostValue>) -> ObjectRef {
        self.next_id += 1;
        let reference = ObjectRef::new(self.next_id);
        self.objects.insert(
            reference.id(),
            HeapObject {
                class: class.to_string(),
                properties,
            },
        );
        reference
    }

    /// A reference for `value`, boxing it into the heap unless it already
    /// is one.
    pub fn reference_for(&mut self, value: HostValue) -> ObjectRef {
        match value {
            HostValue::Reference(reference) => reference,
            other => {
                let properties = HashMap::from([("value".to_string(), other)]);
                self.create_object(BOXED_CLASS, properties)
            }
        }
    }

    pub fn object(&self, reference: ObjectRef) -> Result<&HeapObject> {
        self.objects
            .get(&reference.id())
            .ok_or(HostError::UnknownObject(reference))
    }

    pub fn object_mut(&mut self, reference: ObjectRef) -> Result<&mut HeapObject> {
        self.objects
            .get_mut(&reference.id())
            .ok_or(HostError::UnknownObject(reference))
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn global(&self, name: &str) -> Option<&HostValue> {
        self.globals.get(name)
    }

    /// Read `name` from `target`; a null target means the global scope.
    /// Missing properties read as null.
    pub fn get_property(&self, target: &HostValue, name: &str) -> Result<HostValue> {
        let value = match target {
            HostValue::Null => self.globals.get(name).cloned(),
            HostValue::Reference(reference) => self.object(*reference)?.properties.get(name).cloned(),
            HostValue::Object(map) => map.get(name).cloned(),
            HostValue::String(s) if name == "length" => {
                Some(HostValue::Integer(s.encode_utf16().count() as i64))
            }
            HostValue::Array(items) if name == "length" => Some(HostValue::Integer(items.len() as i64)),
            _ => None,
        };
        Ok(value.unwrap_or_default())
    }

    /// Assign `name` on `target`; a null target means the global scope.
    pub fn set_property(&mut self, target: &HostValue, name: &str, value: HostValue) -> Result<()> {
        match target {
            HostValue::Null => {
                self.globals.insert(name.to_string(), value);
            }
            HostValue::Reference(reference) => {
                self.object_mut(*reference)?
                    .properties
                    .insert(name.to_string(), value);
            }
            other => {
                return Err(HostError::runtime(format!(
                    "Cannot set property '{}' on {}",
                    name,
                    other.type_name()
                )))
            }
        }
        Ok(())
    }
}
