//! lit-core: the NaN-boxed value representation, object model, bytecode
//! chunks, and the mark-sweep heap shared by the `lit` compiler and runtime.
//!
//! # Modules
//!
//! - `value`: the tagged `Value` word
//! - `object`: heap object variants and friends
//! - `chunk`: bytecode buffer + line table + constant pool
//! - `opcode`: the instruction set
//! - `heap`: allocation, string interning, and the tri-color GC

pub mod chunk;
pub mod heap;
pub mod object;
pub mod opcode;
pub mod value;

pub use chunk::{Chunk, EmitError};
pub use heap::Heap;
pub use object::{
    Access, BoundMethod, Class, Closure, Fiber, Function, Instance, Native, NativeMethod, Object,
    ObjRef, Upvalue,
};
pub use opcode::Opcode;
pub use value::Value;
