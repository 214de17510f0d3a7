//! lit-compiler: lexer, AST, parser, resolver, and bytecode emitter for the
//! `lit` language.
//!
//! The single entry point, [`compile`], turns source text into
//! `Function | ParseError | ResolveError`. Source text is parsed into an
//! AST owned by a transient [`bumpalo::Bump`] arena, resolved against a
//! type/scope-checking pass, and lowered into a bytecode function hanging
//! off the given [`lit_core::Heap`]; the arena (and the resolver's scope
//! tables) are dropped once emission finishes, while the heap survives
//! into the VM.

pub mod ast;
pub mod builtins;
pub mod diagnostics;
pub mod emitter;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod types;

pub use ast::Program;
pub use diagnostics::{CompileError, Diagnostic, EmitError, ParseError, ResolveError};
pub use emitter::Emitter;
pub use lexer::{Lexer, Token, TokenKind};
pub use parser::Parser;
pub use resolver::{ClassMeta, ResolveResult, Resolver};
pub use types::{Signature, Type};

use bumpalo::Bump;
use lit_core::{Heap, ObjRef};

/// Compiles `source` into a top-level `$main` function (arity 0) allocated
/// on `heap`. The compiler's own transient state (the AST arena, the
/// resolver's scope/class tables) is dropped when this function returns;
/// only the emitted function and whatever it interned into `heap` survive.
pub fn compile(source: &str, heap: &mut Heap) -> Result<ObjRef, CompileError> {
    let arena = Bump::new();
    let program = Parser::new(source, &arena).parse_program()?;
    let result = Resolver::new().resolve(&program)?;
    let func_ref = Emitter::new(heap, &result.classes).emit_program(&program)?;
    Ok(func_ref)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_trivial_program() {
        let mut heap = Heap::new();
        let func_ref = compile("var a = 10; var b = 20; a + b;", &mut heap).expect("compile ok");
        let f = heap.get(func_ref).as_function().unwrap();
        assert_eq!(f.arity, 0);
    }

    #[test]
    fn parse_errors_surface_as_compile_error() {
        let mut heap = Heap::new();
        let err = compile("var a = ;", &mut heap).unwrap_err();
        assert!(matches!(err, CompileError::Parse(_)));
    }

    #[test]
    fn resolve_errors_surface_as_compile_error() {
        let mut heap = Heap::new();
        let err = compile("x = 1;", &mut heap).unwrap_err();
        assert!(matches!(err, CompileError::Resolve(_)));
    }
}
