//! Native-behavior half of the standard library.
//!
//! `lit_compiler::builtins` declares the *signatures* the resolver type-checks
//! calls against; this module builds the matching `Class` objects on the
//! heap and binds each native method/function name to the Rust closure that
//! actually runs it. The two tables are read from the same `StdClass`/
//! `StdFunction` data so a name can't drift out of sync between "what the
//! resolver allows" and "what the VM can run".

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use lit_compiler::builtins::{STD_CLASSES, STD_FUNCTIONS};
use lit_core::object::{Class, Native};
use lit_core::{Object, Value};

use crate::vm::Vm;

/// A native trampoline: receiver (`Value::NIL` for free functions), argument
/// values, and a result or an error message (wrapped into a `RuntimeError`
/// with a traceback by the caller).
pub type NativeFn = fn(&mut Vm, Value, &[Value]) -> Result<Value, String>;

fn native_for(method_name: &str) -> NativeFn {
    match method_name {
        "toString" => native_to_string,
        "length" => native_string_length,
        "toLowerCase" => native_string_to_lower,
        "toDouble" => native_int_to_double,
        "time" => native_time,
        "print" => native_print,
        other => panic!("no native trampoline registered for '{other}'"),
    }
}

/// Builds every standard class and global function named in
/// `lit_compiler::builtins` and installs them into this VM. Must run once,
/// before `execute`, after `Vm::new`.
pub fn define_lib(vm: &mut Vm) {
    for method_name in ["toString", "length", "toLowerCase", "toDouble", "time", "print"] {
        let name_ref = vm.heap_mut().intern_string(method_name);
        vm.natives.insert(name_ref, native_for(method_name));
    }

    for std_class in STD_CLASSES {
        let super_ref = std_class.superclass.and_then(|name| vm.find_class(name));
        let mut class = Class {
            name: vm.heap_mut().intern_string(std_class.name),
            super_class: super_ref,
            methods: HashMap::new(),
            static_methods: HashMap::new(),
            fields: HashMap::new(),
            static_fields: HashMap::new(),
            is_static: false,
            is_abstract: false,
            is_final: false,
            static_init_ran: true,
        };
        if let Some(super_ref) = super_ref {
            if let Object::Class(super_class) = vm.heap().get(super_ref) {
                class.methods = super_class.methods.clone();
                class.static_methods = super_class.static_methods.clone();
            }
        }
        for method in std_class.methods {
            let name_ref = vm.heap_mut().intern_string(method.name);
            let native_ref = vm.heap_mut().alloc(Object::Native(Native {
                name: name_ref,
                arity: method.params.len() as u8,
            }));
            let table = if method.is_static {
                &mut class.static_methods
            } else {
                &mut class.methods
            };
            table.insert(name_ref, Value::object(native_ref));
        }

        let class_ref = vm.heap_mut().alloc(Object::Class(class));
        vm.register_std_class(std_class.name, class_ref);
        let global_name = vm.heap_mut().intern_string(std_class.name);
        vm.globals.insert(global_name, Value::object(class_ref));
    }

    for std_function in STD_FUNCTIONS {
        let name_ref = vm.heap_mut().intern_string(std_function.name);
        let native_ref = vm.heap_mut().alloc(Object::Native(Native {
            name: name_ref,
            arity: std_function.params.len() as u8,
        }));
        vm.globals.insert(name_ref, Value::object(native_ref));
    }
}

fn native_to_string(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Result<Value, String> {
    let s = vm.stringify(receiver);
    Ok(Value::object(vm.heap_mut().intern_string(&s)))
}

fn native_string_length(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Result<Value, String> {
    if !receiver.is_object() {
        return Err("length() requires a String receiver.".to_string());
    }
    let len = vm
        .heap()
        .get(receiver.as_object())
        .as_string()
        .ok_or_else(|| "length() requires a String receiver.".to_string())?
        .len();
    Ok(Value::number(len as f64))
}

/// Strings are immutable byte sequences, so lower-casing allocates and
/// interns a fresh string rather than mutating the receiver in place (the
/// signature reads `void` because the reference source's own signature
/// string for this method does, even though it returns the new string —
/// a quirk preserved rather than silently "fixed").
fn native_string_to_lower(vm: &mut Vm, receiver: Value, _args: &[Value]) -> Result<Value, String> {
    if !receiver.is_object() {
        return Err("toLowerCase() requires a String receiver.".to_string());
    }
    let lowered = vm
        .heap()
        .get(receiver.as_object())
        .as_string()
        .ok_or_else(|| "toLowerCase() requires a String receiver.".to_string())?
        .to_ascii_lowercase();
    Ok(Value::object(vm.heap_mut().intern_string(&lowered)))
}

fn native_int_to_double(_vm: &mut Vm, receiver: Value, _args: &[Value]) -> Result<Value, String> {
    if !receiver.is_number() {
        return Err("toDouble() requires a numeric receiver.".to_string());
    }
    Ok(receiver)
}

fn native_time(_vm: &mut Vm, _receiver: Value, _args: &[Value]) -> Result<Value, String> {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok(Value::number(seconds))
}

fn native_print(vm: &mut Vm, _receiver: Value, args: &[Value]) -> Result<Value, String> {
    let text = vm.stringify(args[0]);
    println!("{text}");
    Ok(Value::NIL)
}
