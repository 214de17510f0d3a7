//! Runtime error reporting: the message plus the frame-by-frame traceback
//! printed alongside it, built from the call-frame stack at the moment the
//! error is raised.

use std::fmt;

/// One entry of a runtime traceback: the function active at the point the
/// error propagated through it, and the line it was on.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub function_name: String,
    pub line: u64,
}

/// A failure during bytecode execution: call on a non-callable, field
/// access on nil, undefined global/method, argument-arity mismatch, stack
/// overflow, an invalid superclass, or instantiating an abstract/static
/// class.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<TraceFrame>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Runtime error: {}", self.message)?;
        for frame in &self.trace {
            writeln!(f, "\tat {}():{}", frame.function_name, frame.line)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}
