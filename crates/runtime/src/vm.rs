//! The dispatch loop: call frames, the value stack, open upvalues,
//! globals, and the standard-class handles the native glue installs.
//!
//! The stack is one flat `Vec<Value>`; each frame's registers are a window
//! `[base, base + register_count)` into it. A call never aliases the
//! caller's registers into the callee's window — arguments are copied into
//! a freshly extended region at the top of the stack — which keeps frame
//! teardown a simple `truncate` and avoids raw-pointer aliasing between
//! frames.

use std::collections::HashMap;

use lit_core::object::{BoundMethod, Class, Closure, Instance, NativeMethod, Upvalue};
use lit_core::{Heap, ObjRef, Object, Opcode, Value};

use crate::error::{RuntimeError, TraceFrame};
use crate::frame::{CallFrame, ReturnTarget};
use crate::stdlib::NativeFn;

/// Nominal stack overflow threshold.
pub const FRAMES_MAX: usize = 64;

/// Handles to the pre-registered native classes, resolved once by
/// [`crate::stdlib::define_lib`] and consulted whenever a primitive value's
/// method table needs to be found (numbers, strings, closures).
#[derive(Debug, Default, Clone, Copy)]
pub struct StdClasses {
    pub object: Option<ObjRef>,
    pub class: Option<ObjRef>,
    pub bool_class: Option<ObjRef>,
    pub int: Option<ObjRef>,
    pub double: Option<ObjRef>,
    pub char_class: Option<ObjRef>,
    pub string: Option<ObjRef>,
    pub function: Option<ObjRef>,
}

pub struct Vm {
    pub(crate) heap: Heap,
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    /// Open upvalues, kept sorted ascending by stack index; the "head" is
    /// this vector's last element (the highest address).
    pub(crate) open_upvalues: Vec<ObjRef>,
    pub(crate) globals: HashMap<ObjRef, Value>,
    pub(crate) natives: HashMap<ObjRef, NativeFn>,
    pub(crate) init_string: ObjRef,
    pub(crate) classes: StdClasses,
}

impl Vm {
    /// Takes ownership of a [`Heap`] — typically the one `lit_compiler::compile`
    /// populated — and flips on collection: the compiler's heap never
    /// collects, the VM's does once execution starts.
    pub fn new(mut heap: Heap) -> Vm {
        heap.collection_enabled = true;
        let init_string = heap.intern_string("init");
        Vm {
            heap,
            stack: Vec::new(),
            frames: Vec::new(),
            open_upvalues: Vec::new(),
            globals: HashMap::new(),
            natives: HashMap::new(),
            init_string,
            classes: StdClasses::default(),
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn classes(&self) -> &StdClasses {
        &self.classes
    }

    /// Looks up an already-registered standard class by name. Registration
    /// order guarantees a superclass is registered before any subclass that
    /// names it.
    pub(crate) fn find_class(&self, name: &str) -> Option<ObjRef> {
        match name {
            "Object" => self.classes.object,
            "Class" => self.classes.class,
            "Bool" => self.classes.bool_class,
            "Int" => self.classes.int,
            "Double" => self.classes.double,
            "Char" => self.classes.char_class,
            "String" => self.classes.string,
            "Function" => self.classes.function,
            _ => None,
        }
    }

    pub(crate) fn register_std_class(&mut self, name: &str, class_ref: ObjRef) {
        match name {
            "Object" => self.classes.object = Some(class_ref),
            "Class" => self.classes.class = Some(class_ref),
            "Bool" => self.classes.bool_class = Some(class_ref),
            "Int" => self.classes.int = Some(class_ref),
            "Double" => self.classes.double = Some(class_ref),
            "Char" => self.classes.char_class = Some(class_ref),
            "String" => self.classes.string = Some(class_ref),
            "Function" => self.classes.function = Some(class_ref),
            _ => {}
        }
    }

    /// Pushes `value` onto the stack. Exposed for native functions and tests
    /// that want to seed arguments by hand.
    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    /// Looks up a global variable by name after a program has run. Interns
    /// `name` to do the lookup, so this never returns a false negative just
    /// because the string wasn't already on the heap.
    pub fn global(&mut self, name: &str) -> Option<Value> {
        let name_ref = self.heap.intern_string(name);
        self.globals.get(&name_ref).copied()
    }

    /// Wraps `function` in a closure, pushes it as frame 0, and runs the
    /// dispatch loop to completion.
    pub fn execute(&mut self, function: ObjRef) -> Result<Value, RuntimeError> {
        self.frames.clear();
        self.stack.clear();
        self.open_upvalues.clear();
        let closure_ref = self.heap.alloc(Object::Closure(Closure {
            function,
            upvalues: Vec::new(),
        }));
        self.call_closure(closure_ref, &[], None, ReturnTarget::Discard)
            .map_err(|m| self.error_with_trace(m))?;
        self.run()
    }

    fn run(&mut self) -> Result<Value, RuntimeError> {
        loop {
            let closure_ref = self.frames.last().unwrap().closure;
            let function_ref = match self.heap.get(closure_ref) {
                Object::Closure(c) => c.function,
                _ => unreachable!("frame closure is always a Closure"),
            };
            let base = self.frames.last().unwrap().base;
            let op = Opcode::from_u8(self.read_u8(function_ref));

            let outcome = self.dispatch(op, function_ref, base);
            match outcome {
                Ok(Step::Continue) => {}
                Ok(Step::Halt) => return Ok(Value::NIL),
                Err(message) => return Err(self.error_with_trace(message)),
            }

            if self.heap.needs_collect() {
                self.collect();
            }
        }
    }

    fn dispatch(&mut self, op: Opcode, function_ref: ObjRef, base: usize) -> Result<Step, String> {
        match op {
            Opcode::Exit => return Ok(Step::Halt),

            Opcode::Return => {
                let src = self.read_u8(function_ref);
                let value = self.reg(base, src);
                if self.finish_call(value)?.is_none() {
                    return Ok(Step::Halt);
                }
            }

            Opcode::Constant => {
                let dst = self.read_u8(function_ref);
                let idx = self.read_u8(function_ref);
                let value = self.read_constant(function_ref, idx as u16);
                self.set_reg(base, dst, value);
            }
            Opcode::ConstantLong => {
                let dst = self.read_u8(function_ref);
                let idx = self.read_u16(function_ref);
                let value = self.read_constant(function_ref, idx);
                self.set_reg(base, dst, value);
            }

            Opcode::Add => {
                let dst = self.read_u8(function_ref);
                let a = self.read_u8(function_ref);
                let b = self.read_u8(function_ref);
                let (av, bv) = (self.reg(base, a), self.reg(base, b));
                let result = if av.is_number() && bv.is_number() {
                    Value::number(av.as_number() + bv.as_number())
                } else {
                    let concatenated = format!("{}{}", self.stringify(av), self.stringify(bv));
                    Value::object(self.heap.intern_string(&concatenated))
                };
                self.set_reg(base, dst, result);
            }
            Opcode::Subtract => self.numeric_binop(function_ref, base, |a, b| a - b)?,
            Opcode::Multiply => self.numeric_binop(function_ref, base, |a, b| a * b)?,
            Opcode::Divide => self.numeric_binop(function_ref, base, |a, b| a / b)?,
            Opcode::Modulo => self.numeric_binop(function_ref, base, |a, b| a % b)?,
            Opcode::Power => self.numeric_binop(function_ref, base, |a, b| a.powf(b))?,
            Opcode::Root => self.numeric_binop(function_ref, base, |a, b| a.powf(1.0 / b))?,

            Opcode::Not => {
                let dst = self.read_u8(function_ref);
                let src = self.read_u8(function_ref);
                let v = self.reg(base, src);
                self.set_reg(base, dst, Value::boolean(v.is_falsey()));
            }
            Opcode::Negate => {
                let dst = self.read_u8(function_ref);
                let src = self.read_u8(function_ref);
                let v = self.require_number(self.reg(base, src))?;
                self.set_reg(base, dst, Value::number(-v));
            }

            Opcode::True => {
                let dst = self.read_u8(function_ref);
                self.set_reg(base, dst, Value::TRUE);
            }
            Opcode::False => {
                let dst = self.read_u8(function_ref);
                self.set_reg(base, dst, Value::FALSE);
            }
            Opcode::Nil => {
                let dst = self.read_u8(function_ref);
                self.set_reg(base, dst, Value::NIL);
            }

            Opcode::DefineGlobal => {
                let name_idx = self.read_u8(function_ref);
                let src = self.read_u8(function_ref);
                let name_ref = self.read_constant(function_ref, name_idx as u16).as_object();
                let value = self.reg(base, src);
                self.globals.insert(name_ref, value);
            }
            Opcode::GetGlobal => {
                let dst = self.read_u8(function_ref);
                let name_idx = self.read_u8(function_ref);
                let name_ref = self.read_constant(function_ref, name_idx as u16).as_object();
                let value = *self
                    .globals
                    .get(&name_ref)
                    .ok_or_else(|| format!("Undefined variable '{}'.", self.heap.as_string(name_ref)))?;
                self.set_reg(base, dst, value);
            }
            Opcode::SetGlobal => {
                let name_idx = self.read_u8(function_ref);
                let src = self.read_u8(function_ref);
                let name_ref = self.read_constant(function_ref, name_idx as u16).as_object();
                let value = self.reg(base, src);
                if !self.globals.contains_key(&name_ref) {
                    return Err(format!("Undefined variable '{}'.", self.heap.as_string(name_ref)));
                }
                self.globals.insert(name_ref, value);
            }

            Opcode::GetLocal => {
                let dst = self.read_u8(function_ref);
                let src = self.read_u8(function_ref);
                let value = self.reg(base, src);
                self.set_reg(base, dst, value);
            }
            Opcode::SetLocal => {
                let dst_local = self.read_u8(function_ref);
                let src = self.read_u8(function_ref);
                let value = self.reg(base, src);
                self.set_reg(base, dst_local, value);
            }
            Opcode::GetUpvalue => {
                let dst = self.read_u8(function_ref);
                let idx = self.read_u8(function_ref);
                let closure_ref = self.frames.last().unwrap().closure;
                let value = self.read_upvalue(closure_ref, idx);
                self.set_reg(base, dst, value);
            }
            Opcode::SetUpvalue => {
                let idx = self.read_u8(function_ref);
                let src = self.read_u8(function_ref);
                let value = self.reg(base, src);
                let closure_ref = self.frames.last().unwrap().closure;
                self.write_upvalue(closure_ref, idx, value);
            }
            Opcode::CloseUpvalue => {
                let local_reg = self.read_u8(function_ref);
                self.close_upvalues_from(base + local_reg as usize);
            }

            Opcode::Jump => {
                let offset = self.read_u16(function_ref);
                self.frames.last_mut().unwrap().ip += offset as usize;
            }
            Opcode::JumpIfFalse => {
                let cond_reg = self.read_u8(function_ref);
                let offset = self.read_u16(function_ref);
                if self.reg(base, cond_reg).is_falsey() {
                    self.frames.last_mut().unwrap().ip += offset as usize;
                }
            }
            Opcode::Loop => {
                let offset = self.read_u16(function_ref);
                self.frames.last_mut().unwrap().ip -= offset as usize;
            }

            Opcode::Equal => self.equality_op(function_ref, base, false)?,
            Opcode::NotEqual => self.equality_op(function_ref, base, true)?,
            Opcode::Less => self.ordering_op(function_ref, base, |ord| ord == std::cmp::Ordering::Less)?,
            Opcode::Greater => self.ordering_op(function_ref, base, |ord| ord == std::cmp::Ordering::Greater)?,
            Opcode::LessEqual => self.ordering_op(function_ref, base, |ord| ord != std::cmp::Ordering::Greater)?,
            Opcode::GreaterEqual => self.ordering_op(function_ref, base, |ord| ord != std::cmp::Ordering::Less)?,

            Opcode::DefineFunction => {
                let dst = self.read_u8(function_ref);
                let idx = self.read_u8(function_ref);
                let func_value = self.read_constant(function_ref, idx as u16);
                let closure_ref = self.heap.alloc(Object::Closure(Closure {
                    function: func_value.as_object(),
                    upvalues: Vec::new(),
                }));
                self.set_reg(base, dst, Value::object(closure_ref));
            }
            Opcode::DefineFunctionLong => {
                let dst = self.read_u8(function_ref);
                let idx = self.read_u16(function_ref);
                let func_value = self.read_constant(function_ref, idx);
                let closure_ref = self.heap.alloc(Object::Closure(Closure {
                    function: func_value.as_object(),
                    upvalues: Vec::new(),
                }));
                self.set_reg(base, dst, Value::object(closure_ref));
            }
            Opcode::Closure => {
                let dst = self.read_u8(function_ref);
                let idx = self.read_u8(function_ref);
                let func_value = self.read_constant(function_ref, idx as u16);
                let count = self.read_u8(function_ref);
                let enclosing_closure = self.frames.last().unwrap().closure;
                let mut upvalues = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let is_local = self.read_u8(function_ref) != 0;
                    let index = self.read_u8(function_ref);
                    let upvalue_ref = if is_local {
                        self.capture_upvalue(base + index as usize)
                    } else {
                        match self.heap.get(enclosing_closure) {
                            Object::Closure(c) => c.upvalues[index as usize],
                            _ => unreachable!(),
                        }
                    };
                    upvalues.push(upvalue_ref);
                }
                let closure_ref = self.heap.alloc(Object::Closure(Closure {
                    function: func_value.as_object(),
                    upvalues,
                }));
                self.set_reg(base, dst, Value::object(closure_ref));
            }

            Opcode::Call => {
                let callee_reg = self.read_u8(function_ref);
                let arg_base = self.read_u8(function_ref);
                let arg_count = self.read_u8(function_ref);
                let dst = self.read_u8(function_ref);
                let callee = self.reg(base, callee_reg);
                let args: Vec<Value> = (0..arg_count).map(|i| self.reg(base, arg_base + i)).collect();
                self.call_value(callee, &args, ReturnTarget::Slot(base + dst as usize))?;
            }
            Opcode::Invoke => {
                let receiver_reg = self.read_u8(function_ref);
                let name_idx = self.read_u8(function_ref);
                let arg_base = self.read_u8(function_ref);
                let arg_count = self.read_u8(function_ref);
                let dst = self.read_u8(function_ref);
                let receiver = self.reg(base, receiver_reg);
                let name_ref = self.read_constant(function_ref, name_idx as u16).as_object();
                let args: Vec<Value> = (0..arg_count).map(|i| self.reg(base, arg_base + i)).collect();
                let callee = self.get_property(receiver, name_ref)?;
                self.call_value(callee, &args, ReturnTarget::Slot(base + dst as usize))?;
            }

            Opcode::Class => {
                let dst = self.read_u8(function_ref);
                let name_idx = self.read_u8(function_ref);
                let flags = self.read_u8(function_ref);
                let name_ref = self.read_constant(function_ref, name_idx as u16).as_object();
                let class = Class {
                    name: name_ref,
                    super_class: None,
                    methods: HashMap::new(),
                    static_methods: HashMap::new(),
                    fields: HashMap::new(),
                    static_fields: HashMap::new(),
                    is_static: flags & 0b001 != 0,
                    is_abstract: flags & 0b010 != 0,
                    is_final: flags & 0b100 != 0,
                    static_init_ran: false,
                };
                let class_ref = self.heap.alloc(Object::Class(class));
                self.set_reg(base, dst, Value::object(class_ref));
            }
            Opcode::Subclass => {
                let dst = self.read_u8(function_ref);
                let name_idx = self.read_u8(function_ref);
                let super_reg = self.read_u8(function_ref);
                let flags = self.read_u8(function_ref);
                let name_ref = self.read_constant(function_ref, name_idx as u16).as_object();
                let super_val = self.reg(base, super_reg);
                if !super_val.is_object() {
                    return Err("Superclass must be a class.".to_string());
                }
                let super_ref = super_val.as_object();
                let (methods, static_methods, fields, static_fields) = match self.heap.get(super_ref) {
                    Object::Class(c) => (
                        c.methods.clone(),
                        c.static_methods.clone(),
                        c.fields.clone(),
                        c.static_fields.clone(),
                    ),
                    _ => return Err("Superclass must be a class.".to_string()),
                };
                let class = Class {
                    name: name_ref,
                    super_class: Some(super_ref),
                    methods,
                    static_methods,
                    fields,
                    static_fields,
                    is_static: flags & 0b001 != 0,
                    is_abstract: flags & 0b010 != 0,
                    is_final: flags & 0b100 != 0,
                    static_init_ran: false,
                };
                let class_ref = self.heap.alloc(Object::Class(class));
                self.set_reg(base, dst, Value::object(class_ref));
            }
            Opcode::DefineField => {
                let class_reg = self.read_u8(function_ref);
                let name_idx = self.read_u8(function_ref);
                let value_reg = self.read_u8(function_ref);
                let class_ref = self.reg(base, class_reg).as_object();
                let name_ref = self.read_constant(function_ref, name_idx as u16).as_object();
                let value = self.reg(base, value_reg);
                match self.heap.get_mut(class_ref) {
                    Object::Class(c) => {
                        c.fields.insert(name_ref, value);
                    }
                    _ => return Err("Can't define a field in a non-class.".to_string()),
                }
            }
            Opcode::DefineStaticField => {
                let class_reg = self.read_u8(function_ref);
                let name_idx = self.read_u8(function_ref);
                let value_reg = self.read_u8(function_ref);
                let class_ref = self.reg(base, class_reg).as_object();
                let name_ref = self.read_constant(function_ref, name_idx as u16).as_object();
                let value = self.reg(base, value_reg);
                match self.heap.get_mut(class_ref) {
                    Object::Class(c) => {
                        c.static_fields.insert(name_ref, value);
                    }
                    _ => return Err("Can't define a field in a non-class.".to_string()),
                }
            }
            Opcode::DefineMethod => {
                let class_reg = self.read_u8(function_ref);
                let name_idx = self.read_u8(function_ref);
                let method_reg = self.read_u8(function_ref);
                let class_ref = self.reg(base, class_reg).as_object();
                let name_ref = self.read_constant(function_ref, name_idx as u16).as_object();
                let method = self.reg(base, method_reg);
                match self.heap.get_mut(class_ref) {
                    Object::Class(c) => {
                        c.methods.insert(name_ref, method);
                    }
                    _ => return Err("Can't define a method on a non-class.".to_string()),
                }
            }
            Opcode::DefineStaticMethod => {
                let class_reg = self.read_u8(function_ref);
                let name_idx = self.read_u8(function_ref);
                let method_reg = self.read_u8(function_ref);
                let class_ref = self.reg(base, class_reg).as_object();
                let name_ref = self.read_constant(function_ref, name_idx as u16).as_object();
                let method = self.reg(base, method_reg);
                match self.heap.get_mut(class_ref) {
                    Object::Class(c) => {
                        c.static_methods.insert(name_ref, method);
                    }
                    _ => return Err("Can't define a method on a non-class.".to_string()),
                }
            }
            Opcode::GetField => {
                let dst = self.read_u8(function_ref);
                let obj_reg = self.read_u8(function_ref);
                let name_idx = self.read_u8(function_ref);
                let receiver = self.reg(base, obj_reg);
                let name_ref = self.read_constant(function_ref, name_idx as u16).as_object();
                let value = self.get_property(receiver, name_ref)?;
                self.set_reg(base, dst, value);
            }
            Opcode::SetField => {
                let obj_reg = self.read_u8(function_ref);
                let name_idx = self.read_u8(function_ref);
                let src = self.read_u8(function_ref);
                let receiver = self.reg(base, obj_reg);
                let name_ref = self.read_constant(function_ref, name_idx as u16).as_object();
                let value = self.reg(base, src);
                self.set_property(receiver, name_ref, value)?;
            }
            Opcode::Super => {
                let dst = self.read_u8(function_ref);
                let super_name_idx = self.read_u8(function_ref);
                let method_name_idx = self.read_u8(function_ref);
                let receiver_reg = self.read_u8(function_ref);
                let super_name_ref = self.read_constant(function_ref, super_name_idx as u16).as_object();
                let method_name_ref = self.read_constant(function_ref, method_name_idx as u16).as_object();
                let receiver = self.reg(base, receiver_reg);
                let super_val = *self.globals.get(&super_name_ref).ok_or_else(|| {
                    format!("Undefined class '{}'.", self.heap.as_string(super_name_ref))
                })?;
                if !super_val.is_object() {
                    return Err("Superclass must be a class.".to_string());
                }
                let method = match self.heap.get(super_val.as_object()) {
                    Object::Class(c) => c.methods.get(&method_name_ref).copied(),
                    _ => None,
                };
                let method_val = method.ok_or_else(|| {
                    format!("Undefined method '{}'.", self.heap.as_string(method_name_ref))
                })?;
                let bound = self.bind_method(method_val, receiver);
                self.set_reg(base, dst, bound);
            }
            Opcode::StaticInit => {
                let class_reg = self.read_u8(function_ref);
                let class_ref = self.reg(base, class_reg).as_object();
                if let Object::Class(c) = self.heap.get_mut(class_ref) {
                    c.static_init_ran = true;
                }
            }
            Opcode::Is => {
                let dst = self.read_u8(function_ref);
                let value_reg = self.read_u8(function_ref);
                let type_name_idx = self.read_u8(function_ref);
                let value = self.reg(base, value_reg);
                let type_name_ref = self.read_constant(function_ref, type_name_idx as u16).as_object();
                let type_name = self.heap.as_string(type_name_ref).to_string();
                let result = self.value_is_of_type(value, &type_name);
                self.set_reg(base, dst, Value::boolean(result));
            }
            Opcode::Pop => {
                let _ = self.read_u8(function_ref);
            }
        }
        Ok(Step::Continue)
    }

    // --- operand reading -------------------------------------------------

    fn read_u8(&mut self, function_ref: ObjRef) -> u8 {
        let ip = self.frames.last().unwrap().ip;
        self.frames.last_mut().unwrap().ip += 1;
        match self.heap.get(function_ref) {
            Object::Function(f) => f.chunk.code[ip],
            _ => unreachable!("function_ref must name a Function"),
        }
    }

    fn read_u16(&mut self, function_ref: ObjRef) -> u16 {
        let hi = self.read_u8(function_ref) as u16;
        let lo = self.read_u8(function_ref) as u16;
        (hi << 8) | lo
    }

    fn read_constant(&self, function_ref: ObjRef, idx: u16) -> Value {
        match self.heap.get(function_ref) {
            Object::Function(f) => f.chunk.constants[idx as usize],
            _ => unreachable!("function_ref must name a Function"),
        }
    }

    fn reg(&self, base: usize, r: u8) -> Value {
        self.stack[base + r as usize]
    }

    fn set_reg(&mut self, base: usize, r: u8, value: Value) {
        self.stack[base + r as usize] = value;
    }

    fn require_number(&self, v: Value) -> Result<f64, String> {
        if v.is_number() {
            Ok(v.as_number())
        } else {
            Err("Operands must be numbers.".to_string())
        }
    }

    fn numeric_binop(&mut self, function_ref: ObjRef, base: usize, op: impl Fn(f64, f64) -> f64) -> Result<(), String> {
        let dst = self.read_u8(function_ref);
        let a = self.read_u8(function_ref);
        let b = self.read_u8(function_ref);
        let av = self.require_number(self.reg(base, a))?;
        let bv = self.require_number(self.reg(base, b))?;
        self.set_reg(base, dst, Value::number(op(av, bv)));
        Ok(())
    }

    /// Decodes `dst, a, b` for `Equal`/`NotEqual`, which compare any pair of
    /// values by structural value-equality (no numeric requirement).
    fn equality_op(&mut self, function_ref: ObjRef, base: usize, negate: bool) -> Result<(), String> {
        let dst = self.read_u8(function_ref);
        let a = self.read_u8(function_ref);
        let b = self.read_u8(function_ref);
        let (av, bv) = (self.reg(base, a), self.reg(base, b));
        let eq = Self::values_equal(av, bv);
        self.set_reg(base, dst, Value::boolean(eq != negate));
        Ok(())
    }

    /// Decodes `dst, a, b` for the four ordering comparisons, which require
    /// both operands to be numbers.
    fn ordering_op(&mut self, function_ref: ObjRef, base: usize, pick: impl Fn(std::cmp::Ordering) -> bool) -> Result<(), String> {
        let dst = self.read_u8(function_ref);
        let a = self.read_u8(function_ref);
        let b = self.read_u8(function_ref);
        let av = self.require_number(self.reg(base, a))?;
        let bv = self.require_number(self.reg(base, b))?;
        let ord = av.partial_cmp(&bv).ok_or_else(|| "Operands must be numbers.".to_string())?;
        self.set_reg(base, dst, Value::boolean(pick(ord)));
        Ok(())
    }

    fn values_equal(a: Value, b: Value) -> bool {
        if a.is_number() && b.is_number() {
            a.as_number() == b.as_number()
        } else if a.is_nil() && b.is_nil() {
            true
        } else if a.is_bool() && b.is_bool() {
            a.as_bool() == b.as_bool()
        } else if a.is_char() && b.is_char() {
            a.as_char() == b.as_char()
        } else if a.is_object() && b.is_object() {
            a.as_object() == b.as_object()
        } else {
            false
        }
    }

    pub fn stringify(&self, v: Value) -> String {
        if v.is_nil() {
            return "nil".to_string();
        }
        if v.is_bool() {
            return v.as_bool().to_string();
        }
        if v.is_char() {
            return (v.as_char() as char).to_string();
        }
        if v.is_number() {
            return format!("{}", v.as_number());
        }
        match self.heap.get(v.as_object()) {
            Object::String(s) => s.clone(),
            Object::Class(c) => self.heap.as_string(c.name).to_string(),
            Object::Instance(i) => {
                let class_name = match self.heap.get(i.class) {
                    Object::Class(c) => self.heap.as_string(c.name).to_string(),
                    _ => String::new(),
                };
                format!("{} instance", class_name)
            }
            Object::Closure(c) => {
                let name = match self.heap.get(c.function) {
                    Object::Function(f) => f.name.map(|n| self.heap.as_string(n).to_string()),
                    _ => None,
                };
                format!("<fn {}>", name.unwrap_or_else(|| "anonymous".to_string()))
            }
            Object::Native(n) => format!("<native fn {}>", self.heap.as_string(n.name)),
            Object::BoundMethod(_) | Object::NativeMethod(_) => "<bound method>".to_string(),
            Object::Upvalue(_) | Object::Function(_) | Object::Fiber(_) => "<object>".to_string(),
        }
    }

    // --- property access ---------------------------------------------------

    fn type_class_for(&self, v: Value) -> Option<ObjRef> {
        if v.is_number() {
            if v.as_number().fract() == 0.0 {
                self.classes.int
            } else {
                self.classes.double
            }
        } else if v.is_bool() {
            self.classes.bool_class
        } else if v.is_char() {
            self.classes.char_class
        } else if v.is_object() {
            match self.heap.get(v.as_object()) {
                Object::String(_) => self.classes.string,
                Object::Closure(_) | Object::Native(_) | Object::BoundMethod(_) | Object::NativeMethod(_) => {
                    self.classes.function
                }
                _ => None,
            }
        } else {
            None
        }
    }

    fn bind_method(&mut self, method_val: Value, receiver: Value) -> Value {
        let closure_ref = method_val.as_object();
        let bound_ref = self.heap.alloc(Object::BoundMethod(BoundMethod {
            receiver,
            method: closure_ref,
        }));
        Value::object(bound_ref)
    }

    fn bind_native_method(&mut self, method_val: Value, receiver: Value) -> Value {
        let native_ref = method_val.as_object();
        let bound_ref = self.heap.alloc(Object::NativeMethod(NativeMethod {
            receiver,
            native: native_ref,
        }));
        Value::object(bound_ref)
    }

    fn get_property(&mut self, receiver: Value, name_ref: ObjRef) -> Result<Value, String> {
        if receiver.is_nil() {
            return Err("Attempt to get a field from a nil value.".to_string());
        }

        if receiver.is_object() {
            if let Object::Class(_) = self.heap.get(receiver.as_object()) {
                return self.get_static_property(receiver.as_object(), name_ref);
            }
            if let Object::Instance(_) = self.heap.get(receiver.as_object()) {
                return self.get_instance_property(receiver, name_ref);
            }
        }

        if let Some(type_class_ref) = self.type_class_for(receiver) {
            let method = match self.heap.get(type_class_ref) {
                Object::Class(c) => c.methods.get(&name_ref).copied(),
                _ => None,
            };
            return match method {
                Some(m) => Ok(self.bind_native_method(m, receiver)),
                None => {
                    let class_name = match self.heap.get(type_class_ref) {
                        Object::Class(c) => self.heap.as_string(c.name).to_string(),
                        _ => String::new(),
                    };
                    Err(format!(
                        "Class {} has no field or method {}.",
                        class_name,
                        self.heap.as_string(name_ref)
                    ))
                }
            };
        }

        Err("Only instances and classes have properties.".to_string())
    }

    fn get_static_property(&mut self, class_ref: ObjRef, name_ref: ObjRef) -> Result<Value, String> {
        let (static_field, static_method) = match self.heap.get(class_ref) {
            Object::Class(c) => (c.static_fields.get(&name_ref).copied(), c.static_methods.get(&name_ref).copied()),
            _ => unreachable!(),
        };
        if let Some(v) = static_field {
            return Ok(v);
        }
        if let Some(m) = static_method {
            return Ok(m);
        }
        if let Some(metaclass_ref) = self.classes.class {
            let method = match self.heap.get(metaclass_ref) {
                Object::Class(c) => c.methods.get(&name_ref).copied(),
                _ => None,
            };
            if let Some(m) = method {
                return Ok(self.bind_native_method(m, Value::object(class_ref)));
            }
        }
        let class_name = match self.heap.get(class_ref) {
            Object::Class(c) => self.heap.as_string(c.name).to_string(),
            _ => unreachable!(),
        };
        Err(format!(
            "Class {} has no static field or method {}.",
            class_name,
            self.heap.as_string(name_ref)
        ))
    }

    fn get_instance_property(&mut self, receiver: Value, name_ref: ObjRef) -> Result<Value, String> {
        let instance_ref = receiver.as_object();
        let (field, class_ref) = match self.heap.get(instance_ref) {
            Object::Instance(i) => (i.fields.get(&name_ref).copied(), i.class),
            _ => unreachable!(),
        };
        if let Some(v) = field {
            return Ok(v);
        }
        let method = match self.heap.get(class_ref) {
            Object::Class(c) => c.methods.get(&name_ref).copied(),
            _ => None,
        };
        if let Some(m) = method {
            return Ok(self.bind_method(m, receiver));
        }
        let class_name = match self.heap.get(class_ref) {
            Object::Class(c) => self.heap.as_string(c.name).to_string(),
            _ => String::new(),
        };
        Err(format!(
            "Class {} has no field or method {}.",
            class_name,
            self.heap.as_string(name_ref)
        ))
    }

    fn set_property(&mut self, receiver: Value, name_ref: ObjRef, value: Value) -> Result<(), String> {
        if receiver.is_object() {
            match self.heap.get_mut(receiver.as_object()) {
                Object::Instance(i) => {
                    i.fields.insert(name_ref, value);
                    return Ok(());
                }
                Object::Class(c) => {
                    c.static_fields.insert(name_ref, value);
                    return Ok(());
                }
                _ => {}
            }
        }
        Err("Only instances and classes have fields.".to_string())
    }

    fn value_is_of_type(&self, value: Value, type_name: &str) -> bool {
        if value.is_object() {
            if let Object::Instance(instance) = self.heap.get(value.as_object()) {
                let mut current = Some(instance.class);
                while let Some(c) = current {
                    let class_obj = self.heap.get(c).as_class().unwrap();
                    if self.heap.as_string(class_obj.name) == type_name {
                        return true;
                    }
                    current = class_obj.super_class;
                }
                return false;
            }
        }
        match self.type_class_for(value) {
            Some(type_ref) => {
                let class_obj = self.heap.get(type_ref).as_class().unwrap();
                self.heap.as_string(class_obj.name) == type_name
            }
            None => false,
        }
    }

    // --- calling -------------------------------------------------------

    pub(crate) fn call_value(&mut self, callee: Value, args: &[Value], target: ReturnTarget) -> Result<(), String> {
        if !callee.is_object() {
            return Err("Can only call functions and classes.".to_string());
        }
        enum Kind {
            Closure,
            Native { name: ObjRef, arity: u8 },
            Class,
            Bound { receiver: Value, method: ObjRef },
            NativeBound { receiver: Value, native: ObjRef },
            Other,
        }
        let obj_ref = callee.as_object();
        let kind = match self.heap.get(obj_ref) {
            Object::Closure(_) => Kind::Closure,
            Object::Native(n) => Kind::Native { name: n.name, arity: n.arity },
            Object::Class(_) => Kind::Class,
            Object::BoundMethod(b) => Kind::Bound { receiver: b.receiver, method: b.method },
            Object::NativeMethod(n) => Kind::NativeBound { receiver: n.receiver, native: n.native },
            _ => Kind::Other,
        };
        match kind {
            Kind::Closure => self.call_closure(obj_ref, args, None, target),
            Kind::Native { name, arity } => self.call_native(name, arity, Value::NIL, args, target),
            Kind::Class => self.instantiate(obj_ref, args, target),
            Kind::Bound { receiver, method } => self.call_closure(method, args, Some(receiver), target),
            Kind::NativeBound { receiver, native } => {
                let (name, arity) = match self.heap.get(native) {
                    Object::Native(n) => (n.name, n.arity),
                    _ => unreachable!(),
                };
                self.call_native(name, arity, receiver, args, target)
            }
            Kind::Other => Err("Can only call functions and classes.".to_string()),
        }
    }

    fn call_native(&mut self, name: ObjRef, arity: u8, receiver: Value, args: &[Value], target: ReturnTarget) -> Result<(), String> {
        if args.len() != arity as usize {
            return Err(format!("Expected {} arguments but got {}.", arity, args.len()));
        }
        let f = *self
            .natives
            .get(&name)
            .ok_or_else(|| format!("Undefined native function '{}'.", self.heap.as_string(name)))?;
        let result = f(self, receiver, args)?;
        match target {
            ReturnTarget::Slot(abs) => self.stack[abs] = result,
            ReturnTarget::Discard => {}
        }
        Ok(())
    }

    pub(crate) fn call_closure(
        &mut self,
        closure_ref: ObjRef,
        args: &[Value],
        receiver: Option<Value>,
        target: ReturnTarget,
    ) -> Result<(), String> {
        if self.frames.len() >= FRAMES_MAX {
            return Err("Stack overflow.".to_string());
        }
        let function_ref = match self.heap.get(closure_ref) {
            Object::Closure(c) => c.function,
            _ => unreachable!(),
        };
        let (arity, register_count) = match self.heap.get(function_ref) {
            Object::Function(f) => (f.arity, f.register_count),
            _ => unreachable!(),
        };
        let provided = args.len() + if receiver.is_some() { 1 } else { 0 };
        if provided != arity as usize {
            return Err(format!("Expected {} arguments but got {}.", arity, provided));
        }
        let base = self.stack.len();
        self.stack.resize(base + register_count as usize, Value::NIL);
        let mut idx = base;
        if let Some(r) = receiver {
            self.stack[idx] = r;
            idx += 1;
        }
        for &a in args {
            self.stack[idx] = a;
            idx += 1;
        }
        self.frames.push(CallFrame::new(closure_ref, base, target));
        Ok(())
    }

    fn instantiate(&mut self, class_ref: ObjRef, args: &[Value], target: ReturnTarget) -> Result<(), String> {
        let (is_static, is_abstract, init_method, class_name) = match self.heap.get(class_ref) {
            Object::Class(c) => (
                c.is_static,
                c.is_abstract,
                c.methods.get(&self.init_string).copied(),
                self.heap.as_string(c.name).to_string(),
            ),
            _ => unreachable!(),
        };
        if is_static {
            return Err(format!("Cannot instantiate static class {}.", class_name));
        }
        if is_abstract {
            return Err(format!("Cannot instantiate abstract class {}.", class_name));
        }
        let fields = match self.heap.get(class_ref) {
            Object::Class(c) => c.fields.clone(),
            _ => unreachable!(),
        };
        let instance_ref = self.heap.alloc(Object::Instance(Instance { class: class_ref, fields }));
        let instance_val = Value::object(instance_ref);
        match target {
            ReturnTarget::Slot(abs) => self.stack[abs] = instance_val,
            ReturnTarget::Discard => {}
        }
        if let Some(init_val) = init_method {
            if !init_val.is_object() {
                return Err("init must be a function.".to_string());
            }
            self.call_closure(init_val.as_object(), args, Some(instance_val), ReturnTarget::Discard)?;
        } else if !args.is_empty() {
            return Err(format!(
                "Class {} has no constructor accepting {} arguments.",
                class_name,
                args.len()
            ));
        }
        Ok(())
    }

    /// Pops the current frame, closing its upvalues and delivering
    /// `value` to the caller's return slot. Returns `None` if that was the
    /// outermost frame (nothing left to resume), in which case the caller
    /// should stop the dispatch loop.
    fn finish_call(&mut self, value: Value) -> Result<Option<()>, String> {
        let finished = self.frames.pop().expect("return with no active frame");
        self.close_upvalues_from(finished.base);
        self.stack.truncate(finished.base);
        if self.frames.is_empty() {
            // Only reachable if a top-level function body (rather than the
            // `$main` script, which always terminates via EXIT) falls off
            // its end; nothing left to deliver the value to.
            return Ok(None);
        }
        match finished.return_target {
            ReturnTarget::Slot(abs) => self.stack[abs] = value,
            ReturnTarget::Discard => {}
        }
        Ok(Some(()))
    }

    // --- upvalues --------------------------------------------------------

    fn capture_upvalue(&mut self, stack_index: usize) -> ObjRef {
        for &r in self.open_upvalues.iter() {
            if let Upvalue::Open { stack_index: si } = self.heap.get(r).as_upvalue().unwrap() {
                if *si == stack_index {
                    return r;
                }
            }
        }
        let upvalue_ref = self.heap.alloc(Object::Upvalue(Upvalue::Open { stack_index }));
        let mut pos = self.open_upvalues.len();
        for (i, &r) in self.open_upvalues.iter().enumerate() {
            if let Upvalue::Open { stack_index: si } = self.heap.get(r).as_upvalue().unwrap() {
                if stack_index < *si {
                    pos = i;
                    break;
                }
            }
        }
        self.open_upvalues.insert(pos, upvalue_ref);
        upvalue_ref
    }

    fn close_upvalues_from(&mut self, floor: usize) {
        while let Some(&last_ref) = self.open_upvalues.last() {
            let stack_index = match self.heap.get(last_ref).as_upvalue().unwrap() {
                Upvalue::Open { stack_index } => *stack_index,
                Upvalue::Closed(_) => break,
            };
            if stack_index < floor {
                break;
            }
            let value = self.stack[stack_index];
            *self.heap.get_mut(last_ref).as_upvalue_mut().unwrap() = Upvalue::Closed(value);
            self.open_upvalues.pop();
        }
    }

    fn read_upvalue(&self, closure_ref: ObjRef, idx: u8) -> Value {
        let upvalue_ref = match self.heap.get(closure_ref) {
            Object::Closure(c) => c.upvalues[idx as usize],
            _ => unreachable!(),
        };
        match self.heap.get(upvalue_ref).as_upvalue().unwrap() {
            Upvalue::Open { stack_index } => self.stack[*stack_index],
            Upvalue::Closed(v) => *v,
        }
    }

    fn write_upvalue(&mut self, closure_ref: ObjRef, idx: u8, value: Value) {
        let upvalue_ref = match self.heap.get(closure_ref) {
            Object::Closure(c) => c.upvalues[idx as usize],
            _ => unreachable!(),
        };
        match self.heap.get_mut(upvalue_ref).as_upvalue_mut().unwrap() {
            Upvalue::Open { stack_index } => {
                let si = *stack_index;
                self.stack[si] = value;
            }
            Upvalue::Closed(v) => *v = value,
        }
    }

    // --- garbage collection ----------------------------------------------

    /// Grays every GC root — stack values, frame closures, open upvalues,
    /// globals, and the standard-class handles — then runs trace + sweep.
    fn collect(&mut self) {
        for &v in self.stack.iter() {
            self.heap.mark_value(v);
        }
        for frame in &self.frames {
            self.heap.mark_object(frame.closure);
        }
        for &u in &self.open_upvalues {
            self.heap.mark_object(u);
        }
        for (&name, &v) in self.globals.iter() {
            self.heap.mark_object(name);
            self.heap.mark_value(v);
        }
        self.heap.mark_object(self.init_string);
        for handle in [
            self.classes.object,
            self.classes.class,
            self.classes.bool_class,
            self.classes.int,
            self.classes.double,
            self.classes.char_class,
            self.classes.string,
            self.classes.function,
        ] {
            if let Some(r) = handle {
                self.heap.mark_object(r);
            }
        }
        self.heap.finish_collect();
    }

    fn error_with_trace(&self, message: String) -> RuntimeError {
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let function_ref = match self.heap.get(frame.closure) {
                Object::Closure(c) => c.function,
                _ => continue,
            };
            let (name, line) = match self.heap.get(function_ref) {
                Object::Function(f) => {
                    let name = f.name.map(|n| self.heap.as_string(n).to_string()).unwrap_or_else(|| "script".to_string());
                    let line = f.chunk.get_line(frame.ip.saturating_sub(1).min(f.chunk.code.len().saturating_sub(1)));
                    (name, line)
                }
                _ => continue,
            };
            trace.push(TraceFrame { function_name: name, line });
        }
        RuntimeError { message, trace }
    }
}

enum Step {
    Continue,
    Halt,
}
