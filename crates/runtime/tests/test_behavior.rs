//! End-to-end behavioral tests for the VM: compile a complete program,
//! execute it, and inspect the resulting globals or error.

use lit_core::{Heap, Value};
use lit_runtime::{define_lib, Vm};

fn run(source: &str) -> Result<Vm, lit_runtime::RuntimeError> {
    let mut heap = Heap::new();
    let function = lit_compiler::compile(source, &mut heap).expect("compile error");
    let mut vm = Vm::new(heap);
    define_lib(&mut vm);
    vm.execute(function)?;
    Ok(vm)
}

#[test]
fn arithmetic_and_global_assignment() {
    let mut vm = run("var total = 1 + 2 * 3;").expect("execution should succeed");
    let total = vm.global("total").expect("global should be defined");
    assert_eq!(total.as_number(), 7.0);
}

#[test]
fn string_concatenation_via_add() {
    let mut vm = run(r#"var greeting = "hi" + " " + "there";"#).expect("execution should succeed");
    let greeting = vm.global("greeting").expect("global should be defined");
    assert_eq!(vm.stringify(greeting), "hi there");
}

#[test]
fn closures_capture_and_mutate_an_upvalue() {
    let source = r#"
        fun makeCounter() {
            var count = 0;
            fun increment() > int {
                count = count + 1;
                return count;
            }
            return increment;
        }

        var counter = makeCounter();
        counter();
        counter();
        var last = counter();
    "#;
    let mut vm = run(source).expect("execution should succeed");
    let last = vm.global("last").expect("global should be defined");
    assert_eq!(last.as_number(), 3.0);
}

#[test]
fn class_instantiation_runs_init_and_binds_methods() {
    let source = r#"
        class Counter {
            var value = 0;

            init(start int) {
                this.value = start;
            }

            bump() > int {
                this.value = this.value + 1;
                return this.value;
            }
        }

        var c = Counter(10);
        var bumped = c.bump();
    "#;
    let mut vm = run(source).expect("execution should succeed");
    let bumped = vm.global("bumped").expect("global should be defined");
    assert_eq!(bumped.as_number(), 11.0);
}

#[test]
fn subclass_inherits_and_overrides_methods() {
    let source = r#"
        class Animal {
            speak() > String => "...";
        }

        class Dog < Animal {
            override speak() > String => "Woof";
        }

        var sound = Dog().speak();
    "#;
    let mut vm = run(source).expect("execution should succeed");
    let sound = vm.global("sound").expect("global should be defined");
    assert_eq!(vm.stringify(sound), "Woof");
}

#[test]
fn subclass_method_calls_super() {
    let source = r#"
        class Animal {
            speak() > String => "...";
        }

        class Dog < Animal {
            override speak() > String => super.speak() + " Woof";
        }

        var sound = Dog().speak();
    "#;
    let mut vm = run(source).expect("execution should succeed");
    let sound = vm.global("sound").expect("global should be defined");
    assert_eq!(vm.stringify(sound), "... Woof");
}

#[test]
fn undefined_global_is_a_runtime_error() {
    let err = run("print(missing);").expect_err("undefined global should fail");
    assert!(err.message.contains("Undefined variable"));
}

#[test]
fn calling_a_non_callable_is_a_runtime_error() {
    let err = run("var x = 1; x();").expect_err("calling a number should fail");
    assert!(err.message.contains("Can only call"));
}

#[test]
fn runtime_error_carries_a_traceback_frame() {
    let source = r#"
        fun boom() {
            print(missing);
        }
        boom();
    "#;
    let err = run(source).expect_err("undefined global inside a call should fail");
    assert!(!err.trace.is_empty(), "expected at least one traceback frame");
}

#[test]
fn instantiating_an_abstract_class_is_a_runtime_error() {
    let source = r#"
        abstract class Shape {
            area() > Double => 0.0;
        }
        var s = Shape();
    "#;
    let err = run(source).expect_err("instantiating an abstract class should fail");
    assert!(err.message.contains("abstract"));
}

#[test]
fn equality_does_not_panic_on_non_numeric_operands() {
    let mut vm = run(r#"var same = "a" == "b";"#).expect("execution should succeed");
    let same = vm.global("same").expect("global should be defined");
    assert_eq!(same, Value::FALSE);
}

#[test]
fn deeply_nested_calls_reuse_the_stack_without_aliasing_registers() {
    let source = r#"
        fun fib(n Int) > Int {
            if (n < 2) {
                return n;
            }
            return fib(n - 1) + fib(n - 2);
        }
        var result = fib(12);
    "#;
    let mut vm = run(source).expect("execution should succeed");
    let result = vm.global("result").expect("global should be defined");
    assert_eq!(result.as_number(), 144.0);
}
