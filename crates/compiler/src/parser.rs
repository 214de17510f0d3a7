//! Recursive-descent parser with explicit precedence layers.
//!
//! Expression grammar, low to high precedence: assignment → ifExpr →
//! shortIfExpr (`?:`) → or → and → equality → comparison → addition →
//! multiplication → power → unary → `is` → compound-addition (`+=`, `-=`,
//! `++`, `--`) → compound-multiplication (`*=`, `/=`, `%=`) →
//! compound-power (`^=`, `√=`) → call/get/set → primary.
//!
//! Compound assignments desugar to `a = a op rhs`. Because AST nodes are
//! arena references rather than owned boxes, the left-hand subtree can be
//! shared between the synthesized binary expression and the assignment
//! target without any "only free once" bookkeeping — there is nothing to
//! double-free.

use bumpalo::Bump;

use crate::ast::*;
use crate::diagnostics::{Diagnostic, ParseError};
use crate::lexer::{Lexer, Token, TokenKind};

const SYNC_KINDS: &[TokenKind] = &[
    TokenKind::Class,
    TokenKind::Abstract,
    TokenKind::Final,
    TokenKind::Static,
    TokenKind::Var,
    TokenKind::Val,
    TokenKind::For,
    TokenKind::If,
    TokenKind::While,
    TokenKind::Switch,
    TokenKind::Return,
];

pub struct Parser<'src, 'a> {
    lexer: Lexer<'src>,
    arena: &'a Bump,
    previous: Token<'src>,
    current: Token<'src>,
    diagnostics: Vec<Diagnostic>,
    panic_mode: bool,
}

type PResult<T> = Result<T, ()>;

impl<'src, 'a> Parser<'src, 'a> {
    pub fn new(source: &'src str, arena: &'a Bump) -> Parser<'src, 'a> {
        let mut lexer = Lexer::new(source);
        let first = lexer.next_token();
        Parser {
            lexer,
            arena,
            previous: first,
            current: first,
            diagnostics: Vec::new(),
            panic_mode: false,
        }
    }

    pub fn parse_program(mut self) -> Result<Program<'a>, ParseError> {
        let mut program = Program::default();
        while !self.check(TokenKind::Eof) {
            match self.declaration() {
                Ok(stmt) => program.statements.push(stmt),
                Err(()) => self.synchronize(),
            }
        }
        if self.diagnostics.is_empty() {
            Ok(program)
        } else {
            Err(ParseError {
                diagnostics: self.diagnostics,
            })
        }
    }

    // --- token plumbing -----------------------------------------------

    fn advance(&mut self) -> Token<'src> {
        self.previous = self.current;
        loop {
            self.current = self.lexer.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let msg = self.current.lexeme.to_string();
            let line = self.current.line;
            self.error_at(line, &msg);
        }
        self.previous
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> PResult<Token<'src>> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let line = self.current.line;
            let text = self.current.lexeme.to_string();
            self.error_at(line, &format!("Error at '{}': {}", text, message));
            Err(())
        }
    }

    fn error_at(&mut self, line: u32, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.diagnostics.push(Diagnostic::new(line, message.to_string()));
    }

    fn error_here(&mut self, message: &str) {
        let line = self.previous.line;
        self.error_at(line, message);
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while !self.check(TokenKind::Eof) {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            if SYNC_KINDS.contains(&self.current.kind) {
                return;
            }
            self.advance();
        }
    }

    fn alloc(&self, expr: Expr<'a>) -> &'a Expr<'a> {
        self.arena.alloc(expr)
    }

    // --- statements ------------------------------------------------------

    fn declaration(&mut self) -> PResult<Stmt<'a>> {
        if self.check(TokenKind::Class)
            || self.check(TokenKind::Abstract)
            || self.check(TokenKind::Static)
            || self.check(TokenKind::Final)
        {
            return self.class_declaration();
        }
        if self.matches(TokenKind::Fun) {
            return self.function_declaration();
        }
        if self.matches(TokenKind::Var) || self.matches(TokenKind::Val) {
            let is_final = self.previous.kind == TokenKind::Val;
            return self.var_declaration(is_final);
        }
        self.statement()
    }

    fn var_declaration(&mut self, mut is_final: bool) -> PResult<Stmt<'a>> {
        let line = self.previous.line;
        if self.matches(TokenKind::Final) {
            is_final = true;
        }
        let name = self.consume(TokenKind::Identifier, "Expect variable name.")?.lexeme.to_string();
        let type_name = if self.check(TokenKind::Identifier) {
            // `var x Type` or `var x Type = expr` — a second identifier
            // right after the name is a type annotation.
            Some(self.advance().lexeme.to_string())
        } else {
            None
        };
        let initializer = if self.matches(TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.")?;
        Ok(Stmt::VarDecl {
            name,
            type_name,
            initializer,
            is_final,
            line,
        })
    }

    fn block(&mut self) -> PResult<Vec<Stmt<'a>>> {
        let mut stmts = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            stmts.push(self.declaration()?);
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.")?;
        Ok(stmts)
    }

    fn statement(&mut self) -> PResult<Stmt<'a>> {
        let line = self.current.line;
        if self.matches(TokenKind::LeftBrace) {
            return Ok(Stmt::Block(self.block()?));
        }
        if self.matches(TokenKind::If) {
            return self.if_statement();
        }
        if self.matches(TokenKind::While) {
            return self.while_statement();
        }
        if self.matches(TokenKind::For) {
            return self.for_statement();
        }
        if self.matches(TokenKind::Return) {
            let value = if self.check(TokenKind::Semicolon) {
                None
            } else {
                Some(self.expression()?)
            };
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.")?;
            return Ok(Stmt::Return { value, line });
        }
        if self.matches(TokenKind::Break) {
            self.consume(TokenKind::Semicolon, "Expect ';' after 'break'.")?;
            return Ok(Stmt::Break(line));
        }
        if self.matches(TokenKind::Continue) {
            self.consume(TokenKind::Semicolon, "Expect ';' after 'continue'.")?;
            return Ok(Stmt::Continue(line));
        }
        let expr = self.expression()?;
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.")?;
        Ok(Stmt::Expression(expr))
    }

    fn if_statement(&mut self) -> PResult<Stmt<'a>> {
        let line = self.previous.line;
        let mut conds = vec![self.expression()?];
        self.consume(TokenKind::LeftBrace, "Expect '{' after if condition.")?;
        let mut branches = vec![Stmt::Block(self.block()?)];
        let mut else_branch = None;
        while self.matches(TokenKind::Else) {
            if self.matches(TokenKind::If) {
                conds.push(self.expression()?);
                self.consume(TokenKind::LeftBrace, "Expect '{' after else if condition.")?;
                branches.push(Stmt::Block(self.block()?));
            } else {
                self.consume(TokenKind::LeftBrace, "Expect '{' after else.")?;
                else_branch = Some(Box::new(Stmt::Block(self.block()?)));
                break;
            }
        }
        Ok(Stmt::If {
            conds,
            branches,
            else_branch,
            line,
        })
    }

    fn while_statement(&mut self) -> PResult<Stmt<'a>> {
        let line = self.previous.line;
        let cond = self.expression()?;
        self.consume(TokenKind::LeftBrace, "Expect '{' after while condition.")?;
        let body = Box::new(Stmt::Block(self.block()?));
        Ok(Stmt::While { cond, body, line })
    }

    /// Desugars `for(init; cond; inc) body` into
    /// `{ init; while(cond) { body; inc; } }`; a missing `cond` becomes
    /// `true`.
    fn for_statement(&mut self) -> PResult<Stmt<'a>> {
        let line = self.previous.line;
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.")?;

        let init = if self.matches(TokenKind::Semicolon) {
            None
        } else if self.matches(TokenKind::Var) || self.matches(TokenKind::Val) {
            let is_final = self.previous.kind == TokenKind::Val;
            Some(self.var_declaration(is_final)?)
        } else {
            let expr = self.expression()?;
            self.consume(TokenKind::Semicolon, "Expect ';' after loop initializer.")?;
            Some(Stmt::Expression(expr))
        };

        let cond = if self.check(TokenKind::Semicolon) {
            self.alloc(Expr::Literal(Literal::True, line))
        } else {
            self.expression()?
        };
        self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.")?;

        let inc = if self.check(TokenKind::RightParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(TokenKind::RightParen, "Expect ')' after for clauses.")?;

        self.consume(TokenKind::LeftBrace, "Expect '{' before for body.")?;
        let mut body_stmts = self.block()?;
        if let Some(inc) = inc {
            body_stmts.push(Stmt::Expression(inc));
        }

        let while_stmt = Stmt::While {
            cond,
            body: Box::new(Stmt::Block(body_stmts)),
            line,
        };

        let mut outer = Vec::new();
        if let Some(init) = init {
            outer.push(init);
        }
        outer.push(while_stmt);
        Ok(Stmt::Block(outer))
    }

    fn function_declaration(&mut self) -> PResult<Stmt<'a>> {
        let line = self.previous.line;
        let name = self.consume(TokenKind::Identifier, "Expect function name.")?.lexeme.to_string();
        let (params, return_type) = self.function_header()?;
        let body = self.function_body()?;
        Ok(Stmt::FunDecl {
            name,
            params,
            return_type,
            body,
            line,
        })
    }

    fn function_header(&mut self) -> PResult<(Vec<Param>, String)> {
        self.consume(TokenKind::LeftParen, "Expect '(' after function name.")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                let pname = self.consume(TokenKind::Identifier, "Expect parameter name.")?.lexeme.to_string();
                let ptype = self.consume(TokenKind::Identifier, "Expect parameter type.")?.lexeme.to_string();
                params.push(Param { name: pname, type_name: ptype });
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.")?;
        let return_type = if self.matches(TokenKind::Greater) {
            self.consume(TokenKind::Identifier, "Expect return type after '>'.")?.lexeme.to_string()
        } else {
            "void".to_string()
        };
        Ok((params, return_type))
    }

    fn function_body(&mut self) -> PResult<FunBody<'a>> {
        if self.matches(TokenKind::FatArrow) {
            let expr = self.expression()?;
            self.consume(TokenKind::Semicolon, "Expect ';' after expression body.")?;
            Ok(FunBody::Expr(expr))
        } else {
            self.consume(TokenKind::LeftBrace, "Expect '{' before function body.")?;
            Ok(FunBody::Block(self.block()?))
        }
    }

    fn modifiers(&mut self) -> Modifiers {
        let mut m = Modifiers::default();
        loop {
            if self.matches(TokenKind::Public) {
                m.access = AccessModifier::Public;
            } else if self.matches(TokenKind::Protected) {
                m.access = AccessModifier::Protected;
            } else if self.matches(TokenKind::Private) {
                m.access = AccessModifier::Private;
            } else if self.matches(TokenKind::Static) {
                m.is_static = true;
            } else if self.matches(TokenKind::Final) {
                m.is_final = true;
            } else if self.matches(TokenKind::Override) {
                m.is_override = true;
            } else if self.matches(TokenKind::Abstract) {
                m.is_abstract = true;
            } else {
                break;
            }
        }
        m
    }

    /// Consumes the leading `abstract`/`final`/`static` class modifiers
    /// (in any order, each at most meaningful once) before the `class`
    /// keyword itself, then the rest of the declaration.
    fn class_declaration(&mut self) -> PResult<Stmt<'a>> {
        let mut is_abstract = false;
        let mut is_static = false;
        let mut is_final = false;
        loop {
            if self.matches(TokenKind::Abstract) {
                is_abstract = true;
            } else if self.matches(TokenKind::Static) {
                is_static = true;
            } else if self.matches(TokenKind::Final) {
                is_final = true;
            } else {
                break;
            }
        }
        if is_abstract && is_static {
            self.error_here("Abstract class cannot be declared static.");
            return Err(());
        }
        if is_abstract && is_final {
            self.error_here("Abstract class cannot be declared final.");
            return Err(());
        }
        if is_static && is_final {
            self.error_here("Static class cannot be declared final.");
            return Err(());
        }

        self.consume(TokenKind::Class, "Expect 'class'.")?;
        let line = self.previous.line;
        let name = self.consume(TokenKind::Identifier, "Expect class name.")?.lexeme.to_string();
        let superclass = if self.matches(TokenKind::Less) {
            Some(self.consume(TokenKind::Identifier, "Expect superclass name.")?.lexeme.to_string())
        } else {
            None
        };
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.")?;

        let mut members = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            members.push(self.class_member()?);
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.")?;

        Ok(Stmt::ClassDecl {
            name,
            superclass,
            members,
            is_static,
            is_final,
            is_abstract,
            line,
        })
    }

    /// Disambiguates a class member after its modifiers: `var` is a
    /// field, `IDENT IDENT(` is a method, `IDENT IDENT` is a typed field.
    fn class_member(&mut self) -> PResult<ClassMember<'a>> {
        let modifiers = self.modifiers();
        let line = self.current.line;

        if self.matches(TokenKind::Var) {
            return self.field_member(modifiers, line, None);
        }

        let first = self.consume(TokenKind::Identifier, "Expect member name.")?.lexeme.to_string();

        if self.check(TokenKind::LeftParen) {
            // `name(` — a method with an inferred/void-ish leading name,
            // e.g. `init(...)`.
            let (params, return_type) = self.function_header()?;
            let body = if self.matches(TokenKind::Semicolon) {
                FunBody::Block(Vec::new())
            } else {
                self.function_body()?
            };
            return Ok(ClassMember::Method(MethodDecl {
                name: first,
                params,
                return_type,
                body,
                modifiers,
                line,
            }));
        }

        let second = self.consume(TokenKind::Identifier, "Expect member name after type.")?.lexeme.to_string();

        if self.check(TokenKind::LeftParen) {
            let (params, return_type) = self.function_header()?;
            let body = if self.matches(TokenKind::Semicolon) {
                FunBody::Block(Vec::new())
            } else {
                self.function_body()?
            };
            return Ok(ClassMember::Method(MethodDecl {
                name: second,
                params,
                return_type,
                body,
                modifiers,
                line,
            }));
        }

        // `Type name` — a typed field.
        self.field_member(modifiers, line, Some(first))
    }

    fn field_member(
        &mut self,
        modifiers: Modifiers,
        line: u32,
        type_name: Option<String>,
    ) -> PResult<ClassMember<'a>> {
        let name = self.consume(TokenKind::Identifier, "Expect field name.")?.lexeme.to_string();
        let initializer = if self.matches(TokenKind::Equal) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenKind::Semicolon, "Expect ';' after field declaration.")?;
        Ok(ClassMember::Field(FieldDecl {
            name,
            type_name,
            initializer,
            modifiers,
            getter: None,
            setter: None,
            line,
        }))
    }

    // --- expressions -------------------------------------------------------

    fn expression(&mut self) -> PResult<&'a Expr<'a>> {
        self.assignment()
    }

    fn is_assignment_target(expr: &'a Expr<'a>) -> bool {
        matches!(expr, Expr::Identifier(_, _) | Expr::Get { .. })
    }

    fn assignment(&mut self) -> PResult<&'a Expr<'a>> {
        let expr = self.if_expr()?;
        if self.matches(TokenKind::Equal) {
            let line = self.previous.line;
            let value = self.assignment()?;
            if !Self::is_assignment_target(expr) {
                self.error_here("Invalid assignment target.");
                return Err(());
            }
            return Ok(self.make_assignment(expr, value, line));
        }
        Ok(expr)
    }

    fn make_assignment(&self, target: &'a Expr<'a>, value: &'a Expr<'a>, line: u32) -> &'a Expr<'a> {
        match target {
            Expr::Identifier(name, _) => self.alloc(Expr::Assign {
                name: name.clone(),
                value,
                line,
            }),
            Expr::Get { object, name, .. } => self.alloc(Expr::Set {
                object: *object,
                name: name.clone(),
                value,
                line,
            }),
            _ => unreachable!("validated by assignment_target"),
        }
    }

    fn if_expr(&mut self) -> PResult<&'a Expr<'a>> {
        if self.matches(TokenKind::If) {
            let line = self.previous.line;
            let cond = self.expression()?;
            self.consume(TokenKind::LeftBrace, "Expect '{' after if condition.")?;
            let then_branch = self.expression()?;
            self.consume(TokenKind::RightBrace, "Expect '}' after if expression.")?;
            self.consume(TokenKind::Else, "Expect 'else' in if expression.")?;
            self.consume(TokenKind::LeftBrace, "Expect '{' after else.")?;
            let else_branch = self.expression()?;
            self.consume(TokenKind::RightBrace, "Expect '}' after else expression.")?;
            return Ok(self.alloc(Expr::If {
                cond,
                then_branch,
                else_branch,
                line,
            }));
        }
        self.short_if_expr()
    }

    fn short_if_expr(&mut self) -> PResult<&'a Expr<'a>> {
        let cond = self.or()?;
        if self.matches(TokenKind::Question) {
            let line = self.previous.line;
            let then_branch = self.expression()?;
            self.consume(TokenKind::Colon, "Expect ':' in ternary expression.")?;
            let else_branch = self.expression()?;
            return Ok(self.alloc(Expr::Ternary {
                cond,
                then_branch,
                else_branch,
                line,
            }));
        }
        Ok(cond)
    }

    fn or(&mut self) -> PResult<&'a Expr<'a>> {
        let mut left = self.and()?;
        while self.matches(TokenKind::Or) {
            let line = self.previous.line;
            let right = self.and()?;
            left = self.alloc(Expr::Logical {
                op: LogicalOp::Or,
                left,
                right,
                line,
            });
        }
        Ok(left)
    }

    fn and(&mut self) -> PResult<&'a Expr<'a>> {
        let mut left = self.equality()?;
        while self.matches(TokenKind::And) {
            let line = self.previous.line;
            let right = self.equality()?;
            left = self.alloc(Expr::Logical {
                op: LogicalOp::And,
                left,
                right,
                line,
            });
        }
        Ok(left)
    }

    fn equality(&mut self) -> PResult<&'a Expr<'a>> {
        let mut left = self.comparison()?;
        loop {
            let op = if self.matches(TokenKind::EqualEqual) {
                BinOp::Equal
            } else if self.matches(TokenKind::BangEqual) {
                BinOp::NotEqual
            } else {
                break;
            };
            let line = self.previous.line;
            let right = self.comparison()?;
            left = self.alloc(Expr::Binary { op, left, right, line });
        }
        Ok(left)
    }

    fn comparison(&mut self) -> PResult<&'a Expr<'a>> {
        let mut left = self.addition()?;
        loop {
            let op = if self.matches(TokenKind::Less) {
                BinOp::Less
            } else if self.matches(TokenKind::Greater) {
                BinOp::Greater
            } else if self.matches(TokenKind::LessEqual) {
                BinOp::LessEqual
            } else if self.matches(TokenKind::GreaterEqual) {
                BinOp::GreaterEqual
            } else {
                break;
            };
            let line = self.previous.line;
            let right = self.addition()?;
            left = self.alloc(Expr::Binary { op, left, right, line });
        }
        Ok(left)
    }

    fn addition(&mut self) -> PResult<&'a Expr<'a>> {
        let mut left = self.multiplication()?;
        loop {
            let op = if self.matches(TokenKind::Plus) {
                BinOp::Add
            } else if self.matches(TokenKind::Minus) {
                BinOp::Subtract
            } else {
                break;
            };
            let line = self.previous.line;
            let right = self.multiplication()?;
            left = self.alloc(Expr::Binary { op, left, right, line });
        }
        Ok(left)
    }

    fn multiplication(&mut self) -> PResult<&'a Expr<'a>> {
        let mut left = self.power()?;
        loop {
            let op = if self.matches(TokenKind::Star) {
                BinOp::Multiply
            } else if self.matches(TokenKind::Slash) {
                BinOp::Divide
            } else if self.matches(TokenKind::Percent) {
                BinOp::Modulo
            } else {
                break;
            };
            let line = self.previous.line;
            let right = self.power()?;
            left = self.alloc(Expr::Binary { op, left, right, line });
        }
        Ok(left)
    }

    fn power(&mut self) -> PResult<&'a Expr<'a>> {
        let mut left = self.unary()?;
        while self.matches(TokenKind::Caret) {
            let line = self.previous.line;
            let right = self.unary()?;
            left = self.alloc(Expr::Binary {
                op: BinOp::Power,
                left,
                right,
                line,
            });
        }
        Ok(left)
    }

    fn unary(&mut self) -> PResult<&'a Expr<'a>> {
        if self.matches(TokenKind::Bang) {
            let line = self.previous.line;
            let expr = self.unary()?;
            return Ok(self.alloc(Expr::Unary { op: UnaryOp::Not, expr, line }));
        }
        if self.matches(TokenKind::Minus) {
            let line = self.previous.line;
            let expr = self.unary()?;
            return Ok(self.alloc(Expr::Unary { op: UnaryOp::Negate, expr, line }));
        }
        self.is_level()
    }

    fn is_level(&mut self) -> PResult<&'a Expr<'a>> {
        let expr = self.compound_addition()?;
        if self.matches(TokenKind::Is) {
            let line = self.previous.line;
            let type_name = self.consume(TokenKind::Identifier, "Expect type name after 'is'.")?.lexeme.to_string();
            return Ok(self.alloc(Expr::Is { expr, type_name, line }));
        }
        Ok(expr)
    }

    fn desugar_compound(&mut self, target: &'a Expr<'a>, op: BinOp, rhs: &'a Expr<'a>, line: u32) -> PResult<&'a Expr<'a>> {
        if !Self::is_assignment_target(target) {
            self.error_here("Invalid assignment target.");
            return Err(());
        }
        let binary = self.alloc(Expr::Binary { op, left: target, right: rhs, line });
        Ok(self.make_assignment(target, binary, line))
    }

    fn compound_addition(&mut self) -> PResult<&'a Expr<'a>> {
        let target = self.compound_multiplication()?;
        if self.matches(TokenKind::PlusEqual) {
            let line = self.previous.line;
            let rhs = self.compound_multiplication()?;
            return self.desugar_compound(target, BinOp::Add, rhs, line);
        }
        if self.matches(TokenKind::MinusEqual) {
            let line = self.previous.line;
            let rhs = self.compound_multiplication()?;
            return self.desugar_compound(target, BinOp::Subtract, rhs, line);
        }
        if self.matches(TokenKind::PlusPlus) {
            let line = self.previous.line;
            let one = self.alloc(Expr::Literal(Literal::Number(1.0), line));
            return self.desugar_compound(target, BinOp::Add, one, line);
        }
        if self.matches(TokenKind::MinusMinus) {
            let line = self.previous.line;
            let one = self.alloc(Expr::Literal(Literal::Number(1.0), line));
            return self.desugar_compound(target, BinOp::Subtract, one, line);
        }
        Ok(target)
    }

    fn compound_multiplication(&mut self) -> PResult<&'a Expr<'a>> {
        let target = self.compound_power()?;
        if self.matches(TokenKind::StarEqual) {
            let line = self.previous.line;
            let rhs = self.compound_power()?;
            return self.desugar_compound(target, BinOp::Multiply, rhs, line);
        }
        if self.matches(TokenKind::SlashEqual) {
            let line = self.previous.line;
            let rhs = self.compound_power()?;
            return self.desugar_compound(target, BinOp::Divide, rhs, line);
        }
        if self.matches(TokenKind::PercentEqual) {
            let line = self.previous.line;
            let rhs = self.compound_power()?;
            return self.desugar_compound(target, BinOp::Modulo, rhs, line);
        }
        Ok(target)
    }

    fn compound_power(&mut self) -> PResult<&'a Expr<'a>> {
        let target = self.call()?;
        if self.matches(TokenKind::CaretEqual) {
            let line = self.previous.line;
            let rhs = self.call()?;
            return self.desugar_compound(target, BinOp::Power, rhs, line);
        }
        if self.matches(TokenKind::SqrtEqual) {
            let line = self.previous.line;
            let rhs = self.call()?;
            return self.desugar_compound(target, BinOp::Root, rhs, line);
        }
        Ok(target)
    }

    fn call(&mut self) -> PResult<&'a Expr<'a>> {
        let mut expr = self.primary()?;
        loop {
            if self.matches(TokenKind::LeftParen) {
                let line = self.previous.line;
                let mut args = Vec::new();
                if !self.check(TokenKind::RightParen) {
                    loop {
                        args.push(self.expression()?);
                        if !self.matches(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.consume(TokenKind::RightParen, "Expect ')' after arguments.")?;
                expr = self.alloc(Expr::Call { callee: expr, args, line });
            } else if self.matches(TokenKind::Dot) {
                let line = self.previous.line;
                let name = self.consume(TokenKind::Identifier, "Expect property name after '.'.")?.lexeme.to_string();
                expr = self.alloc(Expr::Get { object: expr, name, line });
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn primary(&mut self) -> PResult<&'a Expr<'a>> {
        let line = self.current.line;
        if self.matches(TokenKind::False) {
            return Ok(self.alloc(Expr::Literal(Literal::False, line)));
        }
        if self.matches(TokenKind::True) {
            return Ok(self.alloc(Expr::Literal(Literal::True, line)));
        }
        if self.matches(TokenKind::Nil) {
            return Ok(self.alloc(Expr::Literal(Literal::Nil, line)));
        }
        if self.matches(TokenKind::This) {
            return Ok(self.alloc(Expr::This(line)));
        }
        if self.matches(TokenKind::Super) {
            self.consume(TokenKind::Dot, "Expect '.' after 'super'.")?;
            let method = self.consume(TokenKind::Identifier, "Expect superclass method name.")?.lexeme.to_string();
            return Ok(self.alloc(Expr::Super { method, line }));
        }
        if self.matches(TokenKind::Number) {
            let text = self.previous.lexeme;
            let n: f64 = text.parse().unwrap_or(0.0);
            return Ok(self.alloc(Expr::Literal(Literal::Number(n), line)));
        }
        if self.matches(TokenKind::Char) {
            let text = self.previous.lexeme.as_bytes();
            let c = text[1];
            return Ok(self.alloc(Expr::Literal(Literal::Char(c), line)));
        }
        if self.matches(TokenKind::String) {
            let text = self.previous.lexeme;
            let s = text[1..text.len() - 1].to_string();
            return Ok(self.alloc(Expr::Literal(Literal::String(s), line)));
        }
        if self.matches(TokenKind::Identifier) {
            let name = self.previous.lexeme.to_string();
            return Ok(self.alloc(Expr::Identifier(name, line)));
        }
        if self.matches(TokenKind::Fun) {
            let (params, return_type) = self.function_header()?;
            let body = self.function_body()?;
            return Ok(self.alloc(Expr::Lambda {
                params,
                return_type,
                body: Box::new(body),
                line,
            }));
        }
        if self.matches(TokenKind::LeftParen) {
            let expr = self.expression()?;
            self.consume(TokenKind::RightParen, "Expect ')' after expression.")?;
            return Ok(expr);
        }

        let text = self.current.lexeme.to_string();
        self.error_at(line, &format!("Error at '{}': Expect expression.", text));
        Err(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Result<Program<'_>, ParseError> {
        let arena = Bump::new();
        let arena = Box::leak(Box::new(arena));
        Parser::new(src, arena).parse_program()
    }

    #[test]
    fn parses_var_decl_and_binary_expr() {
        let program = parse("var a = 10; var b = 20; a + b;").unwrap();
        assert_eq!(program.statements.len(), 3);
    }

    #[test]
    fn parses_class_with_override() {
        let src = "class A { public foo() > int => 1; } class B < A { public override foo() > int => 2; }";
        let program = parse(src).unwrap();
        assert_eq!(program.statements.len(), 2);
    }

    #[test]
    fn for_loop_desugars_to_while() {
        let program = parse("for (var i = 0; i < 3; i = i + 1) { print(i); }").unwrap();
        match &program.statements[0] {
            Stmt::Block(stmts) => {
                assert_eq!(stmts.len(), 2);
                assert!(matches!(stmts[0], Stmt::VarDecl { .. }));
                assert!(matches!(stmts[1], Stmt::While { .. }));
            }
            other => panic!("expected desugared block, got {:?}", other),
        }
    }

    #[test]
    fn missing_semicolon_is_reported_and_synchronizes() {
        let err = parse("var a = 10 var b = 20;").unwrap_err();
        assert!(!err.diagnostics.is_empty());
    }

    #[test]
    fn compound_assignment_desugars() {
        let program = parse("var a = 1; a += 2;").unwrap();
        match &program.statements[1] {
            Stmt::Expression(Expr::Assign { value, .. }) => {
                assert!(matches!(value, Expr::Binary { op: BinOp::Add, .. }));
            }
            other => panic!("expected desugared assignment, got {:?}", other),
        }
    }

    #[test]
    fn ternary_parses() {
        let program = parse("true ? 1 : 2;").unwrap();
        assert!(matches!(program.statements[0], Stmt::Expression(Expr::Ternary { .. })));
    }

    #[test]
    fn abstract_class_modifier_parses() {
        let program = parse("abstract class A { abstract foo() > int; }").unwrap();
        match &program.statements[0] {
            Stmt::ClassDecl { is_abstract, is_static, is_final, .. } => {
                assert!(*is_abstract);
                assert!(!*is_static);
                assert!(!*is_final);
            }
            other => panic!("expected a class decl, got {:?}", other),
        }
    }

    #[test]
    fn final_and_static_class_modifiers_parse() {
        let program = parse("final class A {} static class B {}").unwrap();
        assert!(matches!(program.statements[0], Stmt::ClassDecl { is_final: true, .. }));
        assert!(matches!(program.statements[1], Stmt::ClassDecl { is_static: true, .. }));
    }

    #[test]
    fn abstract_static_class_is_rejected() {
        let err = parse("abstract static class A {}").unwrap_err();
        assert!(err.diagnostics.iter().any(|d| d.message.contains("cannot be declared static")));
    }
}
