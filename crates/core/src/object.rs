//! The object model: every heap-allocated value lives in the [`crate::Heap`]'s
//! object arena and is referred to everywhere else — from [`crate::Value`],
//! from other objects, from the VM's roots — by a stable [`ObjRef`] handle
//! rather than a raw pointer.
//!
//! This is the safe-Rust realization of design note #1 ("cyclic object
//! graphs"): handles replace the intrusive `next` pointer list, and the
//! arena's free-list replaces manual `free()`.

use std::collections::HashMap;

/// A stable handle into a [`crate::Heap`]'s object arena. Cheap to copy,
/// compare, and hash; stands in for a raw object pointer everywhere.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(u32);

impl ObjRef {
    pub fn new(index: u32) -> ObjRef {
        ObjRef(index)
    }

    pub fn index(self) -> u32 {
        self.0
    }

    pub(crate) fn to_bits(self) -> u64 {
        self.0 as u64
    }

    pub(crate) fn from_bits(bits: u64) -> ObjRef {
        ObjRef(bits as u32)
    }
}

impl std::fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

use crate::chunk::Chunk;
use crate::value::Value;

/// Access modifiers carried on resolver-side and runtime method/field
/// records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Protected,
    Private,
    Undefined,
}

/// An upvalue: either an open reference to a live stack slot, or a closed
/// value it now owns outright.
#[derive(Debug, Clone)]
pub enum Upvalue {
    Open { stack_index: usize },
    Closed(Value),
}

/// An immutable, post-compilation function: arity, upvalue count, owning
/// chunk, optional name, and how many registers the emitter reserved for it.
#[derive(Debug)]
pub struct Function {
    pub name: Option<ObjRef>,
    pub arity: u8,
    pub upvalue_count: u8,
    pub register_count: u16,
    pub chunk: Chunk,
}

/// A native (host-provided) function trampoline, identified by name for
/// diagnostics; the actual callable lives in the runtime's registry keyed by
/// this same name.
#[derive(Debug)]
pub struct Native {
    pub name: ObjRef,
    pub arity: u8,
}

/// A function bound to its captured upvalues.
#[derive(Debug)]
pub struct Closure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// A receiver value paired with a closure.
#[derive(Debug, Clone)]
pub struct BoundMethod {
    pub receiver: Value,
    pub method: ObjRef,
}

/// A native method trampoline bound to a receiver, the native analogue of
/// [`BoundMethod`].
#[derive(Debug, Clone)]
pub struct NativeMethod {
    pub receiver: Value,
    pub native: ObjRef,
}

/// Runtime class record: name, optional super, and the four method/field
/// tables (instance methods, static methods, instance fields, static
/// fields).
#[derive(Debug)]
pub struct Class {
    pub name: ObjRef,
    pub super_class: Option<ObjRef>,
    pub methods: HashMap<ObjRef, Value>,
    pub static_methods: HashMap<ObjRef, Value>,
    pub fields: HashMap<ObjRef, Value>,
    pub static_fields: HashMap<ObjRef, Value>,
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_final: bool,
    /// Set once the static initializer for this class has run; a one-shot
    /// flag flipped by the class's `STATIC_INIT` opcode.
    pub static_init_ran: bool,
}

/// A class instance: class pointer plus a fields table cloned from the
/// class's field initializers at construction time.
#[derive(Debug)]
pub struct Instance {
    pub class: ObjRef,
    pub fields: HashMap<ObjRef, Value>,
}

/// A stub fiber frame record: the variant is reserved in the object model
/// but no `resume`/`yield` behavior is wired into the interpreter.
#[derive(Debug)]
pub struct Fiber {
    pub closure: ObjRef,
}

/// The object enum: every heap-allocated variant the runtime needs.
#[derive(Debug)]
pub enum Object {
    String(String),
    Upvalue(Upvalue),
    Function(Function),
    Native(Native),
    Closure(Closure),
    BoundMethod(BoundMethod),
    Class(Class),
    Instance(Instance),
    NativeMethod(NativeMethod),
    Fiber(Fiber),
}

impl Object {
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::String(_) => "String",
            Object::Upvalue(_) => "Upvalue",
            Object::Function(_) => "Function",
            Object::Native(_) => "Native",
            Object::Closure(_) => "Closure",
            Object::BoundMethod(_) => "BoundMethod",
            Object::Class(_) => "Class",
            Object::Instance(_) => "Instance",
            Object::NativeMethod(_) => "NativeMethod",
            Object::Fiber(_) => "Fiber",
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Object::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&Class> {
        match self {
            Object::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_class_mut(&mut self) -> Option<&mut Class> {
        match self {
            Object::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Object::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_instance_mut(&mut self) -> Option<&mut Instance> {
        match self {
            Object::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&Closure> {
        match self {
            Object::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Object::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_upvalue(&self) -> Option<&Upvalue> {
        match self {
            Object::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_upvalue_mut(&mut self) -> Option<&mut Upvalue> {
        match self {
            Object::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_bound_method(&self) -> Option<&BoundMethod> {
        match self {
            Object::BoundMethod(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_native_method(&self) -> Option<&NativeMethod> {
        match self {
            Object::NativeMethod(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_native(&self) -> Option<&Native> {
        match self {
            Object::Native(n) => Some(n),
            _ => None,
        }
    }
}
