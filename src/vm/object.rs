//! Heap object variants.
//!
//! Every reference-type value lives in the [`Heap`](super::Heap) as one
//! [`Object`]. Tracing dispatches on [`ObjectType`] through `TRACE_TABLE`, so
//! each variant's outgoing references are listed in exactly one place.

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::rc::Rc;

use super::chunk::Chunk;
use super::heap::{GcRef, Heap};
use super::value::Value;

/// Signature of a native (host) function.
///
/// Receives the arguments without the callee slot. Returning `Err` raises a
/// runtime error with that message.
pub type NativeFn = fn(&mut Heap, &[Value]) -> Result<Value, String>;

/// An interned string. Content equality implies handle identity.
#[derive(Debug)]
pub struct LoxString {
    pub chars: Rc<str>,
}

/// A compiled function: its bytecode plus calling metadata.
#[derive(Debug)]
pub struct Function {
    /// `None` for the top-level script.
    pub name: Option<GcRef>,
    pub arity: usize,
    pub upvalue_count: usize,
    /// Shared with every call frame executing this function.
    pub chunk: Rc<Chunk>,
}

/// A function together with the upvalues it captured.
#[derive(Debug)]
pub struct Closure {
    pub function: GcRef,
    pub upvalues: Vec<GcRef>,
}

/// A captured variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Upvalue {
    /// Still lives on the VM stack at this slot.
    Open(usize),
    /// Detached copy taken when the owning frame returned.
    Closed(Value),
}

#[derive(Debug)]
pub struct Class {
    pub name: GcRef,
    pub methods: HashMap<GcRef, Value>,
}

#[derive(Debug)]
pub struct Instance {
    pub class: GcRef,
    pub fields: HashMap<GcRef, Value>,
}

#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    /// Always a closure.
    pub method: GcRef,
}

pub struct Native {
    pub name: GcRef,
    pub arity: usize,
    pub function: NativeFn,
}

impl fmt::Debug for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Native")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Type tag of a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    String = 0,
    Function = 1,
    Closure = 2,
    Upvalue = 3,
    Class = 4,
    Instance = 5,
    BoundMethod = 6,
    Native = 7,
}

impl ObjectType {
    pub const COUNT: usize = 8;

    pub fn name(self) -> &'static str {
        match self {
            ObjectType::String => "string",
            ObjectType::Function => "function",
            ObjectType::Closure => "closure",
            ObjectType::Upvalue => "upvalue",
            ObjectType::Class => "class",
            ObjectType::Instance => "instance",
            ObjectType::BoundMethod => "bound method",
            ObjectType::Native => "native",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A heap object.
#[derive(Debug)]
pub enum Object {
    String(LoxString),
    Function(Function),
    Closure(Closure),
    Upvalue(Upvalue),
    Class(Class),
    Instance(Instance),
    BoundMethod(BoundMethod),
    Native(Native),
}

impl Object {
    pub fn kind(&self) -> ObjectType {
        match self {
            Object::String(_) => ObjectType::String,
            Object::Function(_) => ObjectType::Function,
            Object::Closure(_) => ObjectType::Closure,
            Object::Upvalue(_) => ObjectType::Upvalue,
            Object::Class(_) => ObjectType::Class,
            Object::Instance(_) => ObjectType::Instance,
            Object::BoundMethod(_) => ObjectType::BoundMethod,
            Object::Native(_) => ObjectType::Native,
        }
    }

    /// Push every object directly referenced by this one onto `gray`.
    pub fn trace(&self, gray: &mut Vec<GcRef>) {
        TRACE_TABLE[self.kind() as usize](self, gray);
    }

    /// Approximate number of bytes this object accounts for in the GC budget.
    pub fn size_hint(&self) -> usize {
        let payload = match self {
            Object::String(s) => s.chars.len(),
            Object::Function(f) => {
                f.chunk.code.len()
                    + f.chunk.lines.len() * mem::size_of::<usize>()
                    + f.chunk.constants.len() * mem::size_of::<Value>()
            }
            Object::Closure(c) => c.upvalues.len() * mem::size_of::<GcRef>(),
            Object::Class(c) => c.methods.len() * mem::size_of::<(GcRef, Value)>(),
            Object::Instance(i) => i.fields.len() * mem::size_of::<(GcRef, Value)>(),
            Object::Upvalue(_) | Object::BoundMethod(_) | Object::Native(_) => 0,
        };
        mem::size_of::<Object>() + payload
    }
}

// =============================================================================
// Trace table
// =============================================================================

type TraceFn = fn(&Object, &mut Vec<GcRef>);

/// Indexed by `ObjectType as usize`.
const TRACE_TABLE: [TraceFn; ObjectType::COUNT] = [
    trace_string,
    trace_function,
    trace_closure,
    trace_upvalue,
    trace_class,
    trace_instance,
    trace_bound_method,
    trace_native,
];

fn push_value(value: &Value, gray: &mut Vec<GcRef>) {
    if let Value::Obj(r) = value {
        gray.push(*r);
    }
}

fn trace_string(_: &Object, _: &mut Vec<GcRef>) {}

fn trace_function(object: &Object, gray: &mut Vec<GcRef>) {
    if let Object::Function(f) = object {
        gray.extend(f.name);
        for constant in &f.chunk.constants {
            push_value(constant, gray);
        }
    }
}

fn trace_closure(object: &Object, gray: &mut Vec<GcRef>) {
    if let Object::Closure(c) = object {
        gray.push(c.function);
        gray.extend(c.upvalues.iter().copied());
    }
}

fn trace_upvalue(object: &Object, gray: &mut Vec<GcRef>) {
    // Open upvalues point at stack slots, which are roots already.
    if let Object::Upvalue(Upvalue::Closed(value)) = object {
        push_value(value, gray);
    }
}

fn trace_class(object: &Object, gray: &mut Vec<GcRef>) {
    if let Object::Class(c) = object {
        gray.push(c.name);
        for (name, method) in &c.methods {
            gray.push(*name);
            push_value(method, gray);
        }
    }
}

fn trace_instance(object: &Object, gray: &mut Vec<GcRef>) {
    if let Object::Instance(i) = object {
        gray.push(i.class);
        for (name, value) in &i.fields {
            gray.push(*name);
            push_value(value, gray);
        }
    }
}

fn trace_bound_method(object: &Object, gray: &mut Vec<GcRef>) {
    if let Object::BoundMethod(b) = object {
        push_value(&b.receiver, gray);
        gray.push(b.method);
    }
}

fn trace_native(object: &Object, gray: &mut Vec<GcRef>) {
    if let Object::Native(n) = object {
        gray.push(n.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_table_order() {
        let objects = [
            Object::String(LoxString { chars: Rc::from("s") }),
            Object::Upvalue(Upvalue::Open(0)),
        ];
        assert_eq!(objects[0].kind() as usize, 0);
        assert_eq!(objects[1].kind() as usize, 3);
    }

    #[test]
    fn test_closed_upvalue_traces_value() {
        let target = GcRef::from_index(7);
        let mut gray = Vec::new();
        Object::Upvalue(Upvalue::Closed(Value::Obj(target))).trace(&mut gray);
        assert_eq!(gray, vec![target]);

        gray.clear();
        Object::Upvalue(Upvalue::Open(3)).trace(&mut gray);
        assert!(gray.is_empty());
    }

    #[test]
    fn test_closure_traces_function_and_upvalues() {
        let function = GcRef::from_index(1);
        let up = GcRef::from_index(2);
        let mut gray = Vec::new();
        Object::Closure(Closure {
            function,
            upvalues: vec![up],
        })
        .trace(&mut gray);
        assert_eq!(gray, vec![function, up]);
    }

    #[test]
    fn test_instance_traces_class_and_fields() {
        let class = GcRef::from_index(1);
        let key = GcRef::from_index(2);
        let value = GcRef::from_index(3);
        let mut fields = HashMap::new();
        fields.insert(key, Value::Obj(value));
        let mut gray = Vec::new();
        Object::Instance(Instance { class, fields }).trace(&mut gray);
        assert_eq!(gray, vec![class, key, value]);
    }
}
