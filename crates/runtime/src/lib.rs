//! The `lit` bytecode interpreter: the dispatch loop, the heap and garbage
//! collector as seen from the execution side, and the standard-library glue.
//!
//! [`vm::Vm`] owns a [`lit_core::Heap`] plus the call-frame stack, value
//! stack, globals, and open-upvalue list; [`vm::Vm::execute`] runs a
//! compiled [`lit_core::object::Function`] to completion. [`stdlib::define_lib`]
//! installs the native classes and globals declared in
//! `lit_compiler::builtins` before execution begins.

pub mod error;
pub mod frame;
pub mod stdlib;
pub mod vm;

pub use error::{RuntimeError, TraceFrame};
pub use frame::CallFrame;
pub use stdlib::{define_lib, NativeFn};
pub use vm::{StdClasses, Vm, FRAMES_MAX};

#[cfg(test)]
mod tests {
    use super::*;
    use lit_core::Heap;

    fn run(source: &str) -> Result<Vm, RuntimeError> {
        let mut heap = Heap::new();
        let function = lit_compiler::compile(source, &mut heap).expect("compile error");
        let mut vm = Vm::new(heap);
        define_lib(&mut vm);
        vm.execute(function)?;
        Ok(vm)
    }

    #[test]
    fn executes_a_trivial_program() {
        run("print(1);").expect("execution should succeed");
    }

    #[test]
    fn arithmetic_and_globals_round_trip() {
        run("var x = 10; var y = 20; print(x + y);").expect("execution should succeed");
    }

}
