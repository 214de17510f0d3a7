//! Bytecode emitter: lowers a resolved AST into a [`lit_core::Chunk`]
//! hanging off a [`lit_core::object::Function`].
//!
//! Registers stand in for both "locals" and "temporaries": every expression
//! lowers to a freshly allocated register holding its result, and the
//! caller frees that register once it has consumed the value — the emitter
//! reserves registers per function, up to 256, drawn from a free-list. A
//! declared local's register is never freed until its enclosing block
//! scope ends, which is what keeps it alive across the statements that
//! reference it.
//!
//! `GET_LOCAL dst, src` is used for two things: reading a declared local by
//! name, and — since at the VM level it is nothing more than
//! `slots[dst] = slots[src]` — as a general register-to-register copy when
//! two control-flow paths need to converge on one result register (`and`,
//! `or`, the ternary and `if`-expression).

use std::collections::HashMap;

use lit_core::object::Function;
use lit_core::{Chunk, Heap, ObjRef, Object, Opcode, Value};

use crate::ast::*;
use crate::diagnostics::EmitError;
use crate::resolver::ClassMeta;

type EResult<T> = Result<T, EmitError>;

fn map_chunk_err(e: lit_core::chunk::EmitError, line: u32) -> EmitError {
    match e {
        lit_core::chunk::EmitError::TooManyConstants => EmitError::TooManyConstants { line },
        lit_core::chunk::EmitError::JumpTooLarge => EmitError::JumpTargetTooFar { line },
    }
}

/// A register free-list allocator, capped at the 256-register file.
#[derive(Default)]
struct RegisterFile {
    next: u16,
    free: Vec<u8>,
}

impl RegisterFile {
    fn alloc(&mut self, line: u32) -> EResult<u8> {
        if let Some(r) = self.free.pop() {
            return Ok(r);
        }
        if self.next >= 256 {
            // There is no distinct EmitError for register exhaustion, so
            // this surfaces through the nearest existing fatal variant.
            return Err(EmitError::TooManyUpvalues { line });
        }
        let r = self.next as u8;
        self.next += 1;
        Ok(r)
    }

    /// Reserves `n` consecutive, freshly bumped registers (never drawn from
    /// the free-list) for a call's argument run, so the VM can address them
    /// as one contiguous `[arg_base, arg_base + count)` slice.
    fn alloc_run(&mut self, n: u8, line: u32) -> EResult<u8> {
        if (self.next as u32) + (n as u32) > 256 {
            return Err(EmitError::TooManyUpvalues { line });
        }
        let base = self.next as u8;
        self.next += n as u16;
        Ok(base)
    }

    fn free(&mut self, r: u8) {
        self.free.push(r);
    }
}

struct LoopCtx {
    start: usize,
    break_jumps: Vec<usize>,
}

struct FuncState {
    chunk: Chunk,
    arity: u8,
    name: Option<String>,
    is_script: bool,
    regs: RegisterFile,
    /// Block scopes: each holds the locals declared directly in it, as
    /// `(name, register)`. The outermost scope is the function's
    /// parameter scope.
    scopes: Vec<Vec<(String, u8)>>,
    upvalues: Vec<(bool, u8)>,
    upvalue_names: Vec<String>,
    loops: Vec<LoopCtx>,
}

impl FuncState {
    fn new(name: Option<String>, is_script: bool) -> FuncState {
        FuncState {
            chunk: Chunk::new(),
            arity: 0,
            name,
            is_script,
            regs: RegisterFile::default(),
            scopes: vec![Vec::new()],
            upvalues: Vec::new(),
            upvalue_names: Vec::new(),
            loops: Vec::new(),
        }
    }

    fn find_local(&self, name: &str) -> Option<u8> {
        for scope in self.scopes.iter().rev() {
            for (n, r) in scope.iter().rev() {
                if n == name {
                    return Some(*r);
                }
            }
        }
        None
    }
}

enum VarLoc {
    Local(u8),
    Upvalue(u8),
    Global(String),
}

struct ClassCtx {
    name: String,
    superclass: Option<String>,
}

pub struct Emitter<'h> {
    heap: &'h mut Heap,
    classes: &'h HashMap<String, ClassMeta>,
    functions: Vec<FuncState>,
    class_stack: Vec<ClassCtx>,
}

impl<'h> Emitter<'h> {
    pub fn new(heap: &'h mut Heap, classes: &'h HashMap<String, ClassMeta>) -> Emitter<'h> {
        Emitter {
            heap,
            classes,
            functions: Vec::new(),
            class_stack: Vec::new(),
        }
    }

    /// Lowers a whole resolved program into the `$main` top-level function
    /// (arity 0) and hands its `ObjRef` back for the VM to wrap in a
    /// closure and run.
    pub fn emit_program(mut self, program: &Program<'_>) -> EResult<ObjRef> {
        self.functions.push(FuncState::new(Some("$main".to_string()), true));
        for stmt in &program.statements {
            self.emit_stmt(stmt)?;
        }
        let nil = self.current().regs.alloc(0)?;
        self.current().chunk.write_op(Opcode::Nil, 0);
        self.current().chunk.write_u8(nil, 0);
        self.current().chunk.write_op(Opcode::Exit, 0);

        let state = self.functions.pop().unwrap();
        let function = self.finish_function(state);
        Ok(self.heap.alloc(Object::Function(function)))
    }

    fn finish_function(&mut self, state: FuncState) -> Function {
        let name = state.name.map(|n| self.heap.intern_string(&n));
        Function {
            name,
            arity: state.arity,
            upvalue_count: state.upvalues.len() as u8,
            register_count: state.regs.next,
            chunk: state.chunk,
        }
    }

    fn current(&mut self) -> &mut FuncState {
        self.functions.last_mut().unwrap()
    }

    fn name_const(&mut self, name: &str, line: u32) -> EResult<u8> {
        let r = self.heap.intern_string(name);
        let idx = self
            .current()
            .chunk
            .add_constant(Value::object(r))
            .map_err(|e| map_chunk_err(e, line))?;
        if idx > u8::MAX as usize {
            return Err(EmitError::TooManyConstants { line });
        }
        Ok(idx as u8)
    }

    // --- scopes -------------------------------------------------------

    fn push_scope(&mut self) {
        self.current().scopes.push(Vec::new());
    }

    fn pop_scope(&mut self) {
        let locals = self.current().scopes.pop().unwrap();
        for (_, r) in locals {
            self.current().regs.free(r);
        }
    }

    fn declare_local(&mut self, name: &str, reg: u8) {
        self.current()
            .scopes
            .last_mut()
            .unwrap()
            .push((name.to_string(), reg));
    }

    fn is_global_scope(&self) -> bool {
        let f = self.functions.last().unwrap();
        f.is_script && f.scopes.len() == 1
    }

    // --- variable resolution -------------------------------------------

    fn resolve_variable(&mut self, name: &str) -> VarLoc {
        let idx = self.functions.len() - 1;
        if let Some(r) = self.functions[idx].find_local(name) {
            return VarLoc::Local(r);
        }
        if idx > 0 {
            if let Some(u) = self.resolve_upvalue(idx, name) {
                return VarLoc::Upvalue(u);
            }
        }
        VarLoc::Global(name.to_string())
    }

    fn resolve_upvalue(&mut self, func_idx: usize, name: &str) -> Option<u8> {
        if func_idx == 0 {
            return None;
        }
        let enclosing = func_idx - 1;
        if let Some(local_reg) = self.functions[enclosing].find_local(name) {
            return Some(self.add_upvalue(func_idx, true, local_reg, name));
        }
        if let Some(up) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(func_idx, false, up, name));
        }
        None
    }

    fn add_upvalue(&mut self, func_idx: usize, is_local: bool, index: u8, name: &str) -> u8 {
        let f = &mut self.functions[func_idx];
        for (i, existing_name) in f.upvalue_names.iter().enumerate() {
            if existing_name == name {
                return i as u8;
            }
        }
        f.upvalues.push((is_local, index));
        f.upvalue_names.push(name.to_string());
        (f.upvalues.len() - 1) as u8
    }

    // --- statements -----------------------------------------------------

    fn emit_stmt(&mut self, stmt: &Stmt<'_>) -> EResult<()> {
        match stmt {
            Stmt::VarDecl {
                name,
                initializer,
                line,
                ..
            } => {
                let value_reg = match initializer {
                    Some(e) => self.emit_expr(e)?,
                    None => self.emit_nil(*line)?,
                };
                self.bind_declaration(name, value_reg, *line)
            }
            Stmt::Expression(expr) => {
                let r = self.emit_expr(expr)?;
                self.current().regs.free(r);
                Ok(())
            }
            Stmt::If {
                conds,
                branches,
                else_branch,
                line,
            } => self.emit_if(conds, branches, else_branch.as_deref(), *line),
            Stmt::While { cond, body, line } => self.emit_while(cond, body, *line),
            Stmt::Return { value, line } => {
                let r = match value {
                    Some(e) => self.emit_expr(e)?,
                    None => self.emit_nil(*line)?,
                };
                self.current().chunk.write_op(Opcode::Return, *line);
                let reg = r;
                self.current().chunk.write_u8(reg, *line);
                self.current().regs.free(reg);
                Ok(())
            }
            Stmt::Break(line) => {
                let f = self.current();
                let jump = f.chunk.emit_jump(Opcode::Jump, *line);
                match f.loops.last_mut() {
                    Some(l) => l.break_jumps.push(jump),
                    None => return Err(EmitError::JumpTargetTooFar { line: *line }),
                }
                Ok(())
            }
            Stmt::Continue(line) => {
                let f = self.current();
                let start = match f.loops.last() {
                    Some(l) => l.start,
                    None => return Err(EmitError::JumpTargetTooFar { line: *line }),
                };
                f.chunk
                    .emit_loop(start, *line)
                    .map_err(|e| map_chunk_err(e, *line))
            }
            Stmt::Block(stmts) => {
                self.push_scope();
                for s in stmts {
                    self.emit_stmt(s)?;
                }
                self.pop_scope();
                Ok(())
            }
            Stmt::FunDecl {
                name,
                params,
                return_type,
                body,
                line,
            } => {
                let reg = self.emit_closure(Some(name.clone()), params, return_type, body, *line)?;
                self.bind_declaration(name, reg, *line)
            }
            Stmt::ClassDecl {
                name,
                superclass,
                members,
                is_static,
                is_final,
                is_abstract,
                line,
            } => self.emit_class(
                name,
                superclass.as_deref(),
                members,
                *is_static,
                *is_final,
                *is_abstract,
                *line,
            ),
        }
    }

    fn emit_nil(&mut self, line: u32) -> EResult<u8> {
        let r = self.current().regs.alloc(line)?;
        self.current().chunk.write_op(Opcode::Nil, line);
        self.current().chunk.write_u8(r, line);
        Ok(r)
    }

    /// Binds a name to `value_reg`: a `DEFINE_GLOBAL` at the script's top
    /// level, or the register itself becomes the local's home register
    /// everywhere else (no copy needed — it just stops being a "temporary"
    /// the moment it's named).
    fn bind_declaration(&mut self, name: &str, value_reg: u8, line: u32) -> EResult<()> {
        if self.is_global_scope() {
            let idx = self.name_const(name, line)?;
            self.current().chunk.write_op(Opcode::DefineGlobal, line);
            self.current().chunk.write_u8(idx, line);
            self.current().chunk.write_u8(value_reg, line);
            self.current().regs.free(value_reg);
        } else {
            self.declare_local(name, value_reg);
        }
        Ok(())
    }

    fn emit_cond_jump(&mut self, cond_reg: u8, line: u32) -> usize {
        let f = self.current();
        f.chunk.write_op(Opcode::JumpIfFalse, line);
        f.chunk.write_u8(cond_reg, line);
        f.chunk.write_u16(0xffff, line);
        f.chunk.code.len() - 2
    }

    fn patch_jump(&mut self, at: usize, line: u32) -> EResult<()> {
        self.current()
            .chunk
            .patch_jump(at)
            .map_err(|e| map_chunk_err(e, line))
    }

    fn emit_if(
        &mut self,
        conds: &[&Expr<'_>],
        branches: &[Stmt<'_>],
        else_branch: Option<&Stmt<'_>>,
        line: u32,
    ) -> EResult<()> {
        let mut end_jumps = Vec::new();
        for (cond, branch) in conds.iter().zip(branches.iter()) {
            let creg = self.emit_expr(cond)?;
            let else_jump = self.emit_cond_jump(creg, line);
            self.current().regs.free(creg);
            self.emit_stmt(branch)?;
            let f = self.current();
            end_jumps.push(f.chunk.emit_jump(Opcode::Jump, line));
            self.patch_jump(else_jump, line)?;
        }
        if let Some(eb) = else_branch {
            self.emit_stmt(eb)?;
        }
        for j in end_jumps {
            self.patch_jump(j, line)?;
        }
        Ok(())
    }

    fn emit_while(&mut self, cond: &Expr<'_>, body: &Stmt<'_>, line: u32) -> EResult<()> {
        let loop_start = self.current().chunk.code.len();
        let cond_reg = self.emit_expr(cond)?;
        let exit_jump = self.emit_cond_jump(cond_reg, line);
        self.current().regs.free(cond_reg);

        self.current().loops.push(LoopCtx {
            start: loop_start,
            break_jumps: Vec::new(),
        });
        self.emit_stmt(body)?;
        self.current()
            .chunk
            .emit_loop(loop_start, line)
            .map_err(|e| map_chunk_err(e, line))?;
        self.patch_jump(exit_jump, line)?;

        let loop_ctx = self.current().loops.pop().unwrap();
        for j in loop_ctx.break_jumps {
            self.patch_jump(j, line)?;
        }
        Ok(())
    }

    // --- functions and classes -------------------------------------------

    fn emit_closure(
        &mut self,
        name: Option<String>,
        params: &[Param],
        _return_type: &str,
        body: &FunBody<'_>,
        line: u32,
    ) -> EResult<u8> {
        self.emit_closure_with_receiver(name, params, body, false, line)
    }

    fn emit_closure_with_receiver(
        &mut self,
        name: Option<String>,
        params: &[Param],
        body: &FunBody<'_>,
        has_receiver: bool,
        line: u32,
    ) -> EResult<u8> {
        self.functions.push(FuncState::new(name, false));

        if has_receiver {
            let r = self.current().regs.alloc(line)?;
            self.declare_local("this", r);
        }
        for param in params {
            let r = self.current().regs.alloc(line)?;
            self.declare_local(&param.name, r);
        }
        self.current().arity = params.len() as u8 + if has_receiver { 1 } else { 0 };

        match body {
            FunBody::Block(stmts) => {
                for s in stmts {
                    self.emit_stmt(s)?;
                }
                let nil = self.current().regs.alloc(line)?;
                self.current().chunk.write_op(Opcode::Nil, line);
                self.current().chunk.write_u8(nil, line);
                self.current().chunk.write_op(Opcode::Return, line);
                self.current().chunk.write_u8(nil, line);
                self.current().regs.free(nil);
            }
            FunBody::Expr(expr) => {
                let r = self.emit_expr(expr)?;
                self.current().chunk.write_op(Opcode::Return, line);
                self.current().chunk.write_u8(r, line);
                self.current().regs.free(r);
            }
        }

        let state = self.functions.pop().unwrap();
        let upvalues = state.upvalues.clone();
        let function = self.finish_function(state);
        let func_ref = self.heap.alloc(Object::Function(function));

        let idx = self
            .current()
            .chunk
            .add_constant(Value::object(func_ref))
            .map_err(|e| map_chunk_err(e, line))?;
        if idx > u8::MAX as usize {
            return Err(EmitError::TooManyConstants { line });
        }
        let dst = self.current().regs.alloc(line)?;
        if upvalues.is_empty() {
            self.current().chunk.write_op(Opcode::DefineFunction, line);
            self.current().chunk.write_u8(dst, line);
            self.current().chunk.write_u8(idx as u8, line);
        } else {
            if upvalues.len() > 255 {
                return Err(EmitError::TooManyUpvalues { line });
            }
            self.current().chunk.write_op(Opcode::Closure, line);
            self.current().chunk.write_u8(dst, line);
            self.current().chunk.write_u8(idx as u8, line);
            self.current().chunk.write_u8(upvalues.len() as u8, line);
            for (is_local, index) in upvalues {
                self.current().chunk.write_u8(is_local as u8, line);
                self.current().chunk.write_u8(index, line);
            }
        }
        Ok(dst)
    }

    fn emit_class(
        &mut self,
        name: &str,
        superclass: Option<&str>,
        members: &[ClassMember<'_>],
        is_static: bool,
        is_final: bool,
        is_abstract: bool,
        line: u32,
    ) -> EResult<()> {
        self.class_stack.push(ClassCtx {
            name: name.to_string(),
            superclass: superclass.map(|s| s.to_string()),
        });

        let flags = (is_static as u8) | ((is_abstract as u8) << 1) | ((is_final as u8) << 2);
        let name_idx = self.name_const(name, line)?;
        let class_reg = if let Some(super_name) = superclass {
            let super_reg = self.emit_identifier(super_name, line)?;
            let dst = self.current().regs.alloc(line)?;
            self.current().chunk.write_op(Opcode::Subclass, line);
            self.current().chunk.write_u8(dst, line);
            self.current().chunk.write_u8(name_idx, line);
            self.current().chunk.write_u8(super_reg, line);
            self.current().chunk.write_u8(flags, line);
            self.current().regs.free(super_reg);
            dst
        } else {
            let dst = self.current().regs.alloc(line)?;
            self.current().chunk.write_op(Opcode::Class, line);
            self.current().chunk.write_u8(dst, line);
            self.current().chunk.write_u8(name_idx, line);
            self.current().chunk.write_u8(flags, line);
            dst
        };

        for member in members {
            match member {
                ClassMember::Field(field) => {
                    let value_reg = match field.initializer {
                        Some(init) => self.emit_expr(init)?,
                        None => self.emit_nil(field.line)?,
                    };
                    let fname_idx = self.name_const(&field.name, field.line)?;
                    let op = if field.modifiers.is_static {
                        Opcode::DefineStaticField
                    } else {
                        Opcode::DefineField
                    };
                    self.current().chunk.write_op(op, field.line);
                    self.current().chunk.write_u8(class_reg, field.line);
                    self.current().chunk.write_u8(fname_idx, field.line);
                    self.current().chunk.write_u8(value_reg, field.line);
                    self.current().regs.free(value_reg);
                }
                ClassMember::Method(method) => {
                    let is_static = method.modifiers.is_static;
                    let method_reg = self.emit_closure_with_receiver(
                        Some(method.name.clone()),
                        &method.params,
                        &method.body,
                        !is_static,
                        method.line,
                    )?;
                    let mname_idx = self.name_const(&method.name, method.line)?;
                    let op = if is_static {
                        Opcode::DefineStaticMethod
                    } else {
                        Opcode::DefineMethod
                    };
                    self.current().chunk.write_op(op, method.line);
                    self.current().chunk.write_u8(class_reg, method.line);
                    self.current().chunk.write_u8(mname_idx, method.line);
                    self.current().chunk.write_u8(method_reg, method.line);
                    self.current().regs.free(method_reg);
                }
            }
        }

        self.current().chunk.write_op(Opcode::StaticInit, line);
        self.current().chunk.write_u8(class_reg, line);

        self.class_stack.pop();
        self.bind_declaration(name, class_reg, line)
    }

    // --- expressions ------------------------------------------------------

    fn emit_identifier(&mut self, name: &str, line: u32) -> EResult<u8> {
        match self.resolve_variable(name) {
            VarLoc::Local(src) => {
                let dst = self.current().regs.alloc(line)?;
                self.current().chunk.write_op(Opcode::GetLocal, line);
                self.current().chunk.write_u8(dst, line);
                self.current().chunk.write_u8(src, line);
                Ok(dst)
            }
            VarLoc::Upvalue(idx) => {
                let dst = self.current().regs.alloc(line)?;
                self.current().chunk.write_op(Opcode::GetUpvalue, line);
                self.current().chunk.write_u8(dst, line);
                self.current().chunk.write_u8(idx, line);
                Ok(dst)
            }
            VarLoc::Global(name) => {
                let idx = self.name_const(&name, line)?;
                let dst = self.current().regs.alloc(line)?;
                self.current().chunk.write_op(Opcode::GetGlobal, line);
                self.current().chunk.write_u8(dst, line);
                self.current().chunk.write_u8(idx, line);
                Ok(dst)
            }
        }
    }

    fn emit_copy(&mut self, dst: u8, src: u8, line: u32) {
        self.current().chunk.write_op(Opcode::GetLocal, line);
        self.current().chunk.write_u8(dst, line);
        self.current().chunk.write_u8(src, line);
    }

    fn emit_expr(&mut self, expr: &Expr<'_>) -> EResult<u8> {
        match expr {
            Expr::Literal(lit, line) => self.emit_literal(lit, *line),
            Expr::Identifier(name, line) => self.emit_identifier(name, *line),
            Expr::This(line) => self.emit_identifier("this", *line),
            Expr::Super { method, line } => {
                let this_reg = self.emit_identifier("this", *line)?;
                let super_name = self
                    .class_stack
                    .last()
                    .and_then(|c| c.superclass.clone())
                    .unwrap_or_else(|| {
                        self.class_stack
                            .last()
                            .map(|c| c.name.clone())
                            .unwrap_or_default()
                    });
                let super_idx = self.name_const(&super_name, *line)?;
                let method_idx = self.name_const(method, *line)?;
                let dst = self.current().regs.alloc(*line)?;
                self.current().chunk.write_op(Opcode::Super, *line);
                self.current().chunk.write_u8(dst, *line);
                self.current().chunk.write_u8(super_idx, *line);
                self.current().chunk.write_u8(method_idx, *line);
                self.current().chunk.write_u8(this_reg, *line);
                self.current().regs.free(this_reg);
                Ok(dst)
            }
            Expr::Assign { name, value, line } => {
                let value_reg = self.emit_expr(value)?;
                match self.resolve_variable(name) {
                    VarLoc::Local(dst) => {
                        self.emit_copy(dst, value_reg, *line);
                        self.current().regs.free(value_reg);
                        Ok(dst)
                    }
                    VarLoc::Upvalue(idx) => {
                        self.current().chunk.write_op(Opcode::SetUpvalue, *line);
                        self.current().chunk.write_u8(idx, *line);
                        self.current().chunk.write_u8(value_reg, *line);
                        Ok(value_reg)
                    }
                    VarLoc::Global(name) => {
                        let idx = self.name_const(&name, *line)?;
                        self.current().chunk.write_op(Opcode::SetGlobal, *line);
                        self.current().chunk.write_u8(idx, *line);
                        self.current().chunk.write_u8(value_reg, *line);
                        Ok(value_reg)
                    }
                }
            }
            Expr::Unary { op, expr, line } => {
                let src = self.emit_expr(expr)?;
                let dst = self.current().regs.alloc(*line)?;
                let opcode = match op {
                    UnaryOp::Negate => Opcode::Negate,
                    UnaryOp::Not => Opcode::Not,
                };
                self.current().chunk.write_op(opcode, *line);
                self.current().chunk.write_u8(dst, *line);
                self.current().chunk.write_u8(src, *line);
                self.current().regs.free(src);
                Ok(dst)
            }
            Expr::Binary { op, left, right, line } => {
                let lreg = self.emit_expr(left)?;
                let rreg = self.emit_expr(right)?;
                let dst = self.current().regs.alloc(*line)?;
                let opcode = match op {
                    BinOp::Add => Opcode::Add,
                    BinOp::Subtract => Opcode::Subtract,
                    BinOp::Multiply => Opcode::Multiply,
                    BinOp::Divide => Opcode::Divide,
                    BinOp::Modulo => Opcode::Modulo,
                    BinOp::Power => Opcode::Power,
                    BinOp::Root => Opcode::Root,
                    BinOp::Equal => Opcode::Equal,
                    BinOp::NotEqual => Opcode::NotEqual,
                    BinOp::Less => Opcode::Less,
                    BinOp::Greater => Opcode::Greater,
                    BinOp::LessEqual => Opcode::LessEqual,
                    BinOp::GreaterEqual => Opcode::GreaterEqual,
                };
                self.current().chunk.write_op(opcode, *line);
                self.current().chunk.write_u8(dst, *line);
                self.current().chunk.write_u8(lreg, *line);
                self.current().chunk.write_u8(rreg, *line);
                self.current().regs.free(lreg);
                self.current().regs.free(rreg);
                Ok(dst)
            }
            Expr::Logical { op, left, right, line } => match op {
                LogicalOp::And => {
                    let result = self.current().regs.alloc(*line)?;
                    let lreg = self.emit_expr(left)?;
                    self.emit_copy(result, lreg, *line);
                    self.current().regs.free(lreg);
                    let short_circuit = self.emit_cond_jump(result, *line);
                    let rreg = self.emit_expr(right)?;
                    self.emit_copy(result, rreg, *line);
                    self.current().regs.free(rreg);
                    self.patch_jump(short_circuit, *line)?;
                    Ok(result)
                }
                LogicalOp::Or => {
                    let result = self.current().regs.alloc(*line)?;
                    let lreg = self.emit_expr(left)?;
                    self.emit_copy(result, lreg, *line);
                    self.current().regs.free(lreg);
                    let else_jump = self.emit_cond_jump(result, *line);
                    let f = self.current();
                    let end_jump = f.chunk.emit_jump(Opcode::Jump, *line);
                    self.patch_jump(else_jump, *line)?;
                    let rreg = self.emit_expr(right)?;
                    self.emit_copy(result, rreg, *line);
                    self.current().regs.free(rreg);
                    self.patch_jump(end_jump, *line)?;
                    Ok(result)
                }
            },
            Expr::Ternary {
                cond,
                then_branch,
                else_branch,
                line,
            }
            | Expr::If {
                cond,
                then_branch,
                else_branch,
                line,
            } => {
                let result = self.current().regs.alloc(*line)?;
                let cond_reg = self.emit_expr(cond)?;
                let else_jump = self.emit_cond_jump(cond_reg, *line);
                self.current().regs.free(cond_reg);
                let then_reg = self.emit_expr(then_branch)?;
                self.emit_copy(result, then_reg, *line);
                self.current().regs.free(then_reg);
                let f = self.current();
                let end_jump = f.chunk.emit_jump(Opcode::Jump, *line);
                self.patch_jump(else_jump, *line)?;
                let else_reg = self.emit_expr(else_branch)?;
                self.emit_copy(result, else_reg, *line);
                self.current().regs.free(else_reg);
                self.patch_jump(end_jump, *line)?;
                Ok(result)
            }
            Expr::Is { expr, type_name, line } => {
                let src = self.emit_expr(expr)?;
                let idx = self.name_const(type_name, *line)?;
                let dst = self.current().regs.alloc(*line)?;
                self.current().chunk.write_op(Opcode::Is, *line);
                self.current().chunk.write_u8(dst, *line);
                self.current().chunk.write_u8(src, *line);
                self.current().chunk.write_u8(idx, *line);
                self.current().regs.free(src);
                Ok(dst)
            }
            Expr::Call { callee, args, line } => self.emit_call(callee, args, *line),
            Expr::Get { object, name, line } => {
                let obj_reg = self.emit_expr(object)?;
                let idx = self.name_const(name, *line)?;
                let dst = self.current().regs.alloc(*line)?;
                self.current().chunk.write_op(Opcode::GetField, *line);
                self.current().chunk.write_u8(dst, *line);
                self.current().chunk.write_u8(obj_reg, *line);
                self.current().chunk.write_u8(idx, *line);
                self.current().regs.free(obj_reg);
                Ok(dst)
            }
            Expr::Set {
                object,
                name,
                value,
                line,
            } => {
                let obj_reg = self.emit_expr(object)?;
                let value_reg = self.emit_expr(value)?;
                let idx = self.name_const(name, *line)?;
                self.current().chunk.write_op(Opcode::SetField, *line);
                self.current().chunk.write_u8(obj_reg, *line);
                self.current().chunk.write_u8(idx, *line);
                self.current().chunk.write_u8(value_reg, *line);
                self.current().regs.free(obj_reg);
                Ok(value_reg)
            }
            Expr::Lambda {
                params,
                return_type,
                body,
                line,
            } => self.emit_closure(None, params, return_type, body, *line),
        }
    }

    fn emit_literal(&mut self, lit: &Literal, line: u32) -> EResult<u8> {
        let dst = self.current().regs.alloc(line)?;
        match lit {
            Literal::Nil => {
                self.current().chunk.write_op(Opcode::Nil, line);
                self.current().chunk.write_u8(dst, line);
            }
            Literal::True => {
                self.current().chunk.write_op(Opcode::True, line);
                self.current().chunk.write_u8(dst, line);
            }
            Literal::False => {
                self.current().chunk.write_op(Opcode::False, line);
                self.current().chunk.write_u8(dst, line);
            }
            Literal::Number(n) => {
                self.current()
                    .chunk
                    .write_constant(dst, Value::number(*n), line)
                    .map_err(|e| map_chunk_err(e, line))?;
            }
            Literal::Char(c) => {
                self.current()
                    .chunk
                    .write_constant(dst, Value::char(*c), line)
                    .map_err(|e| map_chunk_err(e, line))?;
            }
            Literal::String(s) => {
                let r = self.heap.intern_string(s);
                self.current()
                    .chunk
                    .write_constant(dst, Value::object(r), line)
                    .map_err(|e| map_chunk_err(e, line))?;
            }
        }
        Ok(dst)
    }

    fn emit_call(&mut self, callee: &Expr<'_>, args: &[&Expr<'_>], line: u32) -> EResult<u8> {
        if let Expr::Get { object, name, .. } = callee {
            let receiver_reg = self.emit_expr(object)?;
            let name_idx = self.name_const(name, line)?;
            let arg_base = self.emit_arg_run(args, line)?;
            let dst = self.current().regs.alloc(line)?;
            self.current().chunk.write_op(Opcode::Invoke, line);
            self.current().chunk.write_u8(receiver_reg, line);
            self.current().chunk.write_u8(name_idx, line);
            self.current().chunk.write_u8(arg_base, line);
            self.current().chunk.write_u8(args.len() as u8, line);
            self.current().chunk.write_u8(dst, line);
            self.current().regs.free(receiver_reg);
            self.free_arg_run(arg_base, args.len() as u8);
            return Ok(dst);
        }

        let callee_reg = self.emit_expr(callee)?;
        let arg_base = self.emit_arg_run(args, line)?;
        let dst = self.current().regs.alloc(line)?;
        self.current().chunk.write_op(Opcode::Call, line);
        self.current().chunk.write_u8(callee_reg, line);
        self.current().chunk.write_u8(arg_base, line);
        self.current().chunk.write_u8(args.len() as u8, line);
        self.current().chunk.write_u8(dst, line);
        self.current().regs.free(callee_reg);
        self.free_arg_run(arg_base, args.len() as u8);
        Ok(dst)
    }

    /// Evaluates `args` directly into a freshly bumped, contiguous register
    /// run (never drawn from the free-list) so `CALL`/`INVOKE` can address
    /// them as one `[arg_base, arg_base + count)` slice.
    fn emit_arg_run(&mut self, args: &[&Expr<'_>], line: u32) -> EResult<u8> {
        let base = self.current().regs.alloc_run(args.len() as u8, line)?;
        for (i, arg) in args.iter().enumerate() {
            let slot = base + i as u8;
            let reg = self.emit_expr(arg)?;
            if reg != slot {
                self.emit_copy(slot, reg, line);
                self.current().regs.free(reg);
            }
        }
        Ok(base)
    }

    fn free_arg_run(&mut self, base: u8, count: u8) {
        for i in (0..count).rev() {
            self.current().regs.free(base + i);
        }
    }
}

/// Constructs runtime class metadata placeholders so tests in this module
/// can exercise the emitter without a full resolver pass.
#[cfg(test)]
fn empty_classes() -> HashMap<String, ClassMeta> {
    HashMap::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::resolver::Resolver;
    use bumpalo::Bump;
    use lit_core::Opcode;

    fn compile_ok(src: &str) -> (Heap, ObjRef) {
        let arena = Bump::new();
        let program = Parser::new(src, &arena).parse_program().expect("parse");
        let result = Resolver::new().resolve(&program).expect("resolve");
        let mut heap = Heap::new();
        let func_ref = Emitter::new(&mut heap, &result.classes)
            .emit_program(&program)
            .expect("emit");
        (heap, func_ref)
    }

    #[test]
    fn emits_exit_for_empty_program() {
        let (heap, func_ref) = compile_ok("");
        let f = heap.get(func_ref).as_function().unwrap();
        assert_eq!(*f.chunk.code.last().unwrap(), Opcode::Exit as u8);
    }

    #[test]
    fn arithmetic_program_emits_add() {
        let (heap, func_ref) = compile_ok("var a = 10; var b = 20; var c = a + b;");
        let f = heap.get(func_ref).as_function().unwrap();
        assert!(f.chunk.code.contains(&(Opcode::Add as u8)));
        assert!(f.chunk.code.contains(&(Opcode::DefineGlobal as u8)));
    }

    #[test]
    fn while_loop_emits_loop_opcode() {
        let (heap, func_ref) = compile_ok("var i = 0; while (i < 3) { i = i + 1; }");
        let f = heap.get(func_ref).as_function().unwrap();
        assert!(f.chunk.code.contains(&(Opcode::Loop as u8)));
    }

    #[test]
    fn function_with_upvalue_emits_closure() {
        let src = "fun outer() { var c = 1; return fun() { return c; }; }";
        let (heap, func_ref) = compile_ok(src);
        let f = heap.get(func_ref).as_function().unwrap();
        assert!(f.chunk.code.contains(&(Opcode::DefineFunction as u8)));
    }

    #[test]
    fn class_declaration_emits_class_opcode() {
        let (heap, func_ref) = compile_ok("class A { public foo() > int => 1; }");
        let f = heap.get(func_ref).as_function().unwrap();
        assert!(f.chunk.code.contains(&(Opcode::Class as u8)));
        assert!(f.chunk.code.contains(&(Opcode::DefineMethod as u8)));
    }

    #[test]
    fn empty_classes_map_is_unused_by_simple_programs() {
        let classes = empty_classes();
        assert!(classes.is_empty());
    }
}
