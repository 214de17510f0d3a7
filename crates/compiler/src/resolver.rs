//! Static resolver: scope resolution, type checking, class metadata,
//! access control and override/abstract/final rules. Walks the AST produced
//! by the parser and produces diagnostics rather than panicking on the
//! first problem, mirroring the parser's panic-mode-free error gathering.

use std::collections::{HashMap, HashSet};

use crate::ast::*;
use crate::builtins::{STD_CLASSES, STD_FUNCTIONS};
use crate::diagnostics::{Diagnostic, ResolveError};
use crate::types::{Signature, Type};

#[derive(Debug, Clone)]
struct FieldInfo {
    ty: Type,
    is_static: bool,
    is_final: bool,
    access: AccessModifier,
}

#[derive(Debug, Clone)]
struct MethodInfo {
    signature: Signature,
    is_static: bool,
    is_final: bool,
    is_override: bool,
    is_abstract: bool,
    access: AccessModifier,
}

#[derive(Debug, Clone, Default)]
struct ClassInfo {
    superclass: Option<String>,
    fields: HashMap<String, FieldInfo>,
    methods: HashMap<String, MethodInfo>,
    is_abstract: bool,
    is_final: bool,
    /// Whether a static initializer has already been synthesized for this
    /// class's static field initializers; a class only ever gets one.
    static_init_emitted: bool,
}

struct Scope {
    vars: HashMap<String, Type>,
}

/// Tracks whether we're inside a loop body, for `break`/`continue` checks.
#[derive(Clone, Copy, PartialEq, Eq)]
enum LoopContext {
    None,
    InLoop,
}

pub struct Resolver {
    classes: HashMap<String, ClassInfo>,
    std_classes: HashSet<String>,
    scopes: Vec<Scope>,
    diagnostics: Vec<Diagnostic>,
    loop_context: LoopContext,
    current_class: Option<String>,
    current_return_type: Option<Type>,
}

pub struct ResolveResult {
    pub classes: HashMap<String, ClassMeta>,
}

/// Public view of a class's resolved metadata, consumed by the emitter to
/// decide field layout and which classes need a static initializer.
#[derive(Debug, Clone)]
pub struct ClassMeta {
    pub superclass: Option<String>,
    pub field_names: Vec<String>,
    pub needs_static_init: bool,
}

impl Resolver {
    pub fn new() -> Resolver {
        let mut resolver = Resolver {
            classes: HashMap::new(),
            std_classes: HashSet::new(),
            scopes: vec![Scope { vars: HashMap::new() }],
            diagnostics: Vec::new(),
            loop_context: LoopContext::None,
            current_class: None,
            current_return_type: None,
        };
        resolver.register_builtins();
        resolver
    }

    /// Seeds the class table and global scope with the pre-registered
    /// native classes and functions, so calling into them type-checks like
    /// any other declaration.
    fn register_builtins(&mut self) {
        for class in STD_CLASSES {
            let mut info = ClassInfo {
                superclass: class.superclass.map(|s| s.to_string()),
                ..ClassInfo::default()
            };
            for method in class.methods {
                info.methods.insert(
                    method.name.to_string(),
                    MethodInfo {
                        signature: method.signature(),
                        is_static: method.is_static,
                        is_final: false,
                        is_override: false,
                        is_abstract: false,
                        access: AccessModifier::Public,
                    },
                );
            }
            self.classes.insert(class.name.to_string(), info);
            self.std_classes.insert(class.name.to_string());
        }
        for function in STD_FUNCTIONS {
            self.declare(function.name, Type::Function(function.signature()));
        }
    }

    pub fn resolve(mut self, program: &Program<'_>) -> Result<ResolveResult, ResolveError> {
        self.register_classes(program);
        self.check_override_chain();
        self.check_abstract_and_override_requirements();

        for stmt in &program.statements {
            self.resolve_stmt(stmt);
        }

        if self.diagnostics.is_empty() {
            let classes = self
                .classes
                .iter()
                .map(|(name, info)| {
                    let mut field_names: Vec<String> = info.fields.keys().cloned().collect();
                    field_names.sort();
                    (
                        name.clone(),
                        ClassMeta {
                            superclass: info.superclass.clone(),
                            field_names,
                            needs_static_init: info.fields.values().any(|f| f.is_static),
                        },
                    )
                })
                .collect();
            Ok(ResolveResult { classes })
        } else {
            Err(ResolveError {
                diagnostics: self.diagnostics,
            })
        }
    }

    fn error(&mut self, line: u32, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(line, message.into()));
    }

    // --- scope + class tables -------------------------------------------

    fn push_scope(&mut self) {
        self.scopes.push(Scope { vars: HashMap::new() });
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str, ty: Type) {
        self.scopes.last_mut().unwrap().vars.insert(name.to_string(), ty);
    }

    fn lookup(&self, name: &str) -> Option<Type> {
        for scope in self.scopes.iter().rev() {
            if let Some(ty) = scope.vars.get(name) {
                return Some(ty.clone());
            }
        }
        if self.classes.contains_key(name) {
            return Some(Type::Metaclass(name.to_string()));
        }
        None
    }

    /// First pass: collect every class's field/method signatures so that
    /// forward references between classes resolve regardless of
    /// declaration order.
    fn register_classes(&mut self, program: &Program<'_>) {
        for stmt in &program.statements {
            if let Stmt::ClassDecl {
                name,
                superclass,
                members,
                is_final,
                is_abstract,
                ..
            } = stmt
            {
                let mut info = ClassInfo {
                    superclass: superclass.clone(),
                    is_final: *is_final,
                    is_abstract: *is_abstract,
                    ..ClassInfo::default()
                };
                for member in members {
                    match member {
                        ClassMember::Field(field) => {
                            info.fields.insert(
                                field.name.clone(),
                                FieldInfo {
                                    ty: field
                                        .type_name
                                        .as_deref()
                                        .map(Type::from_name)
                                        .unwrap_or(Type::Any),
                                    is_static: field.modifiers.is_static,
                                    is_final: field.modifiers.is_final,
                                    access: field.modifiers.access,
                                },
                            );
                        }
                        ClassMember::Method(method) => {
                            let params = method.params.iter().map(|p| Type::from_name(&p.type_name)).collect();
                            let ret = Type::from_name(&method.return_type);
                            info.methods.insert(
                                method.name.clone(),
                                MethodInfo {
                                    signature: Signature::new(params, ret),
                                    is_static: method.modifiers.is_static,
                                    is_final: method.modifiers.is_final,
                                    is_override: method.modifiers.is_override,
                                    is_abstract: method.modifiers.is_abstract,
                                    access: method.modifiers.access,
                                },
                            );
                        }
                    }
                }
                self.classes.insert(name.clone(), info);
            }
        }
    }

    /// Verifies that every `override` method actually overrides a
    /// superclass method with a compatible signature, and that no method
    /// overrides a `final` one.
    fn check_override_chain(&mut self) {
        let names: Vec<String> = self.classes.keys().cloned().collect();
        for name in names {
            let (superclass, methods): (Option<String>, Vec<(String, MethodInfo)>) = {
                let info = &self.classes[&name];
                (
                    info.superclass.clone(),
                    info.methods.iter().map(|(n, m)| (n.clone(), m.clone())).collect(),
                )
            };
            for (method_name, method) in methods {
                if !method.is_override {
                    continue;
                }
                match self.find_inherited_method(superclass.as_deref(), &method_name) {
                    None => self.error(
                        0,
                        format!(
                            "Method '{}' in class '{}' is marked override but no superclass defines it.",
                            method_name, name
                        ),
                    ),
                    Some(parent) => {
                        if parent.is_final {
                            self.error(
                                0,
                                format!(
                                    "Method '{}' in class '{}' overrides a final method.",
                                    method_name, name
                                ),
                            );
                        }
                        if parent.signature != method.signature {
                            self.error(
                                0,
                                format!(
                                    "Method '{}' in class '{}' has a signature incompatible with its override.",
                                    method_name, name
                                ),
                            );
                        }
                    }
                }
            }
        }
    }

    fn find_inherited_method(&self, superclass: Option<&str>, method_name: &str) -> Option<MethodInfo> {
        let mut current = superclass;
        while let Some(name) = current {
            let info = self.classes.get(name)?;
            if let Some(m) = info.methods.get(method_name) {
                return Some(m.clone());
            }
            current = info.superclass.as_deref();
        }
        None
    }

    /// The method named `method_name` as it is actually seen on `class_name`
    /// — either its own declaration, or (absent that) the nearest
    /// superclass's, walking up the chain.
    fn effective_method(&self, class_name: &str, method_name: &str) -> Option<&MethodInfo> {
        let mut current = Some(class_name);
        while let Some(name) = current {
            let info = self.classes.get(name)?;
            if let Some(m) = info.methods.get(method_name) {
                return Some(m);
            }
            current = info.superclass.as_deref();
        }
        None
    }

    /// The field named `field_name` as seen on `class_name`, walking up the
    /// superclass chain, together with the name of the class that actually
    /// declares it (needed for the "not also defined on the super chain"
    /// private-access rule).
    fn find_field(&self, class_name: &str, field_name: &str) -> Option<(String, FieldInfo)> {
        let mut current = Some(class_name);
        while let Some(name) = current {
            let info = self.classes.get(name)?;
            if let Some(f) = info.fields.get(field_name) {
                return Some((name.to_string(), f.clone()));
            }
            current = info.superclass.as_deref();
        }
        None
    }

    /// The backing class name of a resolved type, for member lookups: a
    /// user class/metaclass is itself; a primitive widens to the matching
    /// native class (`int` -> `Int`, `String` -> `String`, …).
    fn backing_class<'b>(ty: &'b Type) -> Option<&'b str> {
        match ty {
            Type::Class(name) | Type::Metaclass(name) => Some(name.as_str()),
            Type::Int => Some("Int"),
            Type::Double => Some("Double"),
            Type::Bool => Some("Bool"),
            Type::Char => Some("Char"),
            Type::String => Some("String"),
            Type::Function(_) => Some("Function"),
            Type::Void | Type::Any | Type::Error => None,
        }
    }

    /// Resolves `object.name`, enforcing access control and producing the
    /// member's type. `is_set` selects field-vs-method wording and also
    /// rejects writes to `final` fields and to methods.
    fn resolve_member(&mut self, object: &Expr<'_>, name: &str, line: u32, is_set: bool) -> Type {
        let object_ty = self.resolve_expr(object);
        let Some(class_name) = Self::backing_class(&object_ty) else {
            return Type::Any;
        };
        if !self.classes.contains_key(class_name) {
            return Type::Any;
        }
        let is_static_context = matches!(object_ty, Type::Metaclass(_));
        let via_this = matches!(object, Expr::This(_));

        if is_static_context {
            if let Some(info) = self.classes.get(class_name) {
                if let Some(field) = info.fields.get(name).cloned() {
                    if is_set && field.is_final {
                        self.error(line, format!("Cannot assign to final static field '{}'.", name));
                    }
                    return field.ty;
                }
                if let Some(method) = info.methods.get(name).cloned() {
                    if is_set {
                        self.error(line, format!("Cannot assign to method '{}'.", name));
                    }
                    return Type::Function(method.signature);
                }
            }
            self.error(
                line,
                format!("Class '{}' has no static field or method '{}'.", class_name, name),
            );
            return Type::Error;
        }

        if let Some((owner, field)) = self.find_field(class_name, name) {
            self.check_member_access(field.access, &owner, via_this, line, name);
            if is_set && field.is_final {
                self.error(line, format!("Cannot assign to final field '{}'.", name));
            }
            return field.ty;
        }
        if let Some(method) = self.effective_method(class_name, name).cloned() {
            self.check_member_access(method.access, class_name, via_this, line, name);
            if is_set {
                self.error(line, format!("Cannot assign to method '{}'.", name));
            }
            return Type::Function(method.signature);
        }
        self.error(line, format!("Class '{}' has no field or method '{}'.", class_name, name));
        Type::Error
    }

    /// `private` members are reachable only through `this`; `protected`
    /// members through `this` or from within a subclass of the declaring
    /// class (which, since the resolver only ever reaches a member access
    /// from inside a method body, also means "via `this`").
    fn check_member_access(&mut self, access: AccessModifier, owner: &str, via_this: bool, line: u32, name: &str) {
        match access {
            AccessModifier::Private => {
                let in_owner = self.current_class.as_deref() == Some(owner);
                if !via_this || !in_owner {
                    self.error(line, format!("'{}' is private and only accessible via 'this' within '{}'.", name, owner));
                }
            }
            AccessModifier::Protected => {
                if !via_this {
                    self.error(
                        line,
                        format!("'{}' is protected and only accessible via 'this' or 'super'.", name),
                    );
                }
            }
            AccessModifier::Public | AccessModifier::Undefined => {}
        }
    }

    /// A non-abstract class must implement every abstract method declared
    /// anywhere on its ancestor chain. Also enforces that a method which
    /// *does* shadow a same-named superclass method is marked `override`.
    fn check_abstract_and_override_requirements(&mut self) {
        let names: Vec<String> = self.classes.keys().cloned().collect();
        for name in &names {
            if self.std_classes.contains(name) {
                continue;
            }
            let info = &self.classes[name];
            let is_abstract_class = info.is_abstract;
            let superclass = info.superclass.clone();
            let own_methods: Vec<(String, MethodInfo)> =
                info.methods.iter().map(|(n, m)| (n.clone(), m.clone())).collect();

            for (method_name, method) in &own_methods {
                if method.is_override || method.is_static {
                    continue;
                }
                if let Some(parent) = self.find_inherited_method(superclass.as_deref(), method_name) {
                    if !parent.is_static {
                        self.error(
                            0,
                            format!(
                                "Method '{}' in class '{}' shadows an inherited method and must be marked override.",
                                method_name, name
                            ),
                        );
                    }
                }
            }

            if is_abstract_class {
                continue;
            }

            let mut chain = Vec::new();
            let mut current = superclass.clone();
            while let Some(c) = current {
                current = self.classes.get(&c).and_then(|i| i.superclass.clone());
                chain.push(c);
            }
            chain.push(name.clone());

            let mut abstract_names: Vec<String> = Vec::new();
            for class_in_chain in &chain {
                if let Some(info) = self.classes.get(class_in_chain) {
                    for (mname, m) in &info.methods {
                        if m.is_abstract && !abstract_names.contains(mname) {
                            abstract_names.push(mname.clone());
                        }
                    }
                }
            }

            for method_name in abstract_names {
                let still_abstract = self
                    .effective_method(name, &method_name)
                    .map(|m| m.is_abstract)
                    .unwrap_or(true);
                if still_abstract {
                    self.error(
                        0,
                        format!(
                            "Abstract method {} must be implemented in child class {}",
                            method_name, name
                        ),
                    );
                }
            }
        }
    }

    // --- statements -------------------------------------------------------

    fn resolve_stmt(&mut self, stmt: &Stmt<'_>) {
        match stmt {
            Stmt::VarDecl {
                name,
                type_name,
                initializer,
                is_final,
                line,
            } => {
                let declared = type_name.as_deref().map(Type::from_name);
                let inferred = initializer.as_ref().map(|e| self.resolve_expr(e));
                let ty = match (&declared, &inferred) {
                    (Some(d), Some(i)) => {
                        if !Type::is_assignable_from(d, i) {
                            self.error(
                                *line,
                                format!("Cannot assign a value of type '{}' to variable '{}' of type '{}'.", i, name, d),
                            );
                        }
                        d.clone()
                    }
                    (Some(d), None) => d.clone(),
                    (None, Some(i)) => i,
                    (None, None) => Type::Any,
                };
                if *is_final && initializer.is_none() {
                    self.error(*line, format!("Final variable '{}' must have an initializer.", name));
                }
                self.declare(name, ty);
            }
            Stmt::Expression(expr) => {
                self.resolve_expr(expr);
            }
            Stmt::If {
                conds,
                branches,
                else_branch,
                ..
            } => {
                for cond in conds {
                    self.resolve_expr(cond);
                }
                for branch in branches {
                    self.push_scope();
                    self.resolve_stmt(branch);
                    self.pop_scope();
                }
                if let Some(branch) = else_branch {
                    self.push_scope();
                    self.resolve_stmt(branch);
                    self.pop_scope();
                }
            }
            Stmt::While { cond, body, .. } => {
                self.resolve_expr(cond);
                let outer = self.loop_context;
                self.loop_context = LoopContext::InLoop;
                self.push_scope();
                self.resolve_stmt(body);
                self.pop_scope();
                self.loop_context = outer;
            }
            Stmt::Return { value, line } => {
                let ty = value.as_ref().map(|e| self.resolve_expr(e)).unwrap_or(Type::Void);
                if let Some(expected) = self.current_return_type.clone() {
                    if !Type::is_assignable_from(&expected, &ty) && expected != Type::Void {
                        self.error(
                            *line,
                            format!("Cannot return a value of type '{}' from a function declared to return '{}'.", ty, expected),
                        );
                    }
                }
            }
            Stmt::Break(line) => {
                if self.loop_context == LoopContext::None {
                    self.error(*line, "'break' used outside of a loop.");
                }
            }
            Stmt::Continue(line) => {
                if self.loop_context == LoopContext::None {
                    self.error(*line, "'continue' used outside of a loop.");
                }
            }
            Stmt::Block(stmts) => {
                self.push_scope();
                for s in stmts {
                    self.resolve_stmt(s);
                }
                self.pop_scope();
            }
            Stmt::FunDecl {
                name,
                params,
                return_type,
                body,
                ..
            } => {
                let sig = Signature::new(
                    params.iter().map(|p| Type::from_name(&p.type_name)).collect(),
                    Type::from_name(return_type),
                );
                self.declare(name, Type::Function(sig));
                self.resolve_function_body(params, return_type, body);
            }
            Stmt::ClassDecl {
                name,
                superclass,
                members,
                ..
            } => {
                self.resolve_class(name, superclass.as_deref(), members);
            }
        }
    }

    fn resolve_function_body(&mut self, params: &[Param], return_type: &str, body: &FunBody<'_>) {
        self.push_scope();
        for param in params {
            self.declare(&param.name, Type::from_name(&param.type_name));
        }
        let outer_return = self.current_return_type.replace(Type::from_name(return_type));
        let outer_loop = self.loop_context;
        self.loop_context = LoopContext::None;
        match body {
            FunBody::Block(stmts) => {
                for s in stmts {
                    self.resolve_stmt(s);
                }
            }
            FunBody::Expr(expr) => {
                let ty = self.resolve_expr(expr);
                let expected = Type::from_name(return_type);
                if !Type::is_assignable_from(&expected, &ty) && expected != Type::Void {
                    self.error(
                        expr.line(),
                        format!("Cannot return a value of type '{}' from a function declared to return '{}'.", ty, expected),
                    );
                }
            }
        }
        self.loop_context = outer_loop;
        self.current_return_type = outer_return;
        self.pop_scope();
    }

    fn resolve_class(&mut self, name: &str, superclass: Option<&str>, members: &[ClassMember<'_>]) {
        if let Some(super_name) = superclass {
            if !self.classes.contains_key(super_name) {
                self.error(0, format!("Class '{}' extends unknown class '{}'.", name, super_name));
            } else if self.classes[super_name].is_final {
                self.error(0, format!("Class '{}' extends final class '{}'.", name, super_name));
            }
        }

        let outer_class = self.current_class.replace(name.to_string());
        self.push_scope();
        self.declare("this", Type::Class(name.to_string()));

        for member in members {
            match member {
                ClassMember::Field(field) => {
                    if let Some(init) = field.initializer {
                        let declared = field.type_name.as_deref().map(Type::from_name);
                        let inferred = self.resolve_expr(init);
                        if let Some(d) = declared {
                            if !Type::is_assignable_from(&d, &inferred) {
                                self.error(
                                    field.line,
                                    format!(
                                        "Field '{}' of type '{}' cannot be initialized with a value of type '{}'.",
                                        field.name, d, inferred
                                    ),
                                );
                            }
                        }
                    } else if field.modifiers.is_final {
                        self.error(field.line, format!("Final field '{}' must be initialized.", field.name));
                    }
                }
                ClassMember::Method(method) => {
                    self.check_access_rules(name, method);
                    self.resolve_function_body(&method.params, &method.return_type, &method.body);
                }
            }
        }

        self.pop_scope();
        self.current_class = outer_class;
    }

    fn check_access_rules(&mut self, class_name: &str, method: &MethodDecl<'_>) {
        if method.modifiers.is_abstract {
            if !matches!(method.body, FunBody::Block(ref b) if b.is_empty()) {
                self.error(
                    method.line,
                    format!("Abstract method '{}' in class '{}' cannot have a body.", method.name, class_name),
                );
            }
            if !self.classes.get(class_name).map(|c| c.is_abstract).unwrap_or(false) {
                self.error(
                    method.line,
                    format!("Method '{}' is abstract but class '{}' is not.", method.name, class_name),
                );
            }
        }
    }

    // --- expressions -------------------------------------------------------

    fn resolve_expr(&mut self, expr: &Expr<'_>) -> Type {
        match expr {
            Expr::Literal(lit, _) => match lit {
                Literal::Nil => Type::Any,
                Literal::True | Literal::False => Type::Bool,
                Literal::Number(_) => Type::Double,
                Literal::Char(_) => Type::Char,
                Literal::String(_) => Type::String,
            },
            Expr::Identifier(name, line) => match self.lookup(name) {
                Some(ty) => ty,
                None => {
                    self.error(*line, format!("Undefined variable '{}'.", name));
                    Type::Error
                }
            },
            Expr::This(line) => match &self.current_class {
                Some(name) => Type::Class(name.clone()),
                None => {
                    self.error(*line, "'this' used outside of a method.");
                    Type::Error
                }
            },
            Expr::Super { line, .. } => {
                if self.current_class.is_none() {
                    self.error(*line, "'super' used outside of a method.");
                }
                Type::Any
            }
            Expr::Assign { name, value, line } => {
                let value_ty = self.resolve_expr(value);
                match self.lookup(name) {
                    Some(target_ty) => {
                        if !Type::is_assignable_from(&target_ty, &value_ty) {
                            self.error(
                                *line,
                                format!("Cannot assign a value of type '{}' to '{}' of type '{}'.", value_ty, name, target_ty),
                            );
                        }
                        target_ty
                    }
                    None => {
                        self.error(*line, format!("Undefined variable '{}'.", name));
                        Type::Error
                    }
                }
            }
            Expr::Unary { expr, .. } => self.resolve_expr(expr),
            Expr::Binary { op, left, right, line } => {
                let lty = self.resolve_expr(left);
                let rty = self.resolve_expr(right);
                self.check_binary_types(*op, &lty, &rty, *line)
            }
            Expr::Logical { left, right, .. } => {
                self.resolve_expr(left);
                self.resolve_expr(right);
                Type::Bool
            }
            Expr::Ternary {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                self.resolve_expr(cond);
                let t = self.resolve_expr(then_branch);
                let _ = self.resolve_expr(else_branch);
                t
            }
            Expr::If {
                cond,
                then_branch,
                else_branch,
                ..
            } => {
                self.resolve_expr(cond);
                let t = self.resolve_expr(then_branch);
                let _ = self.resolve_expr(else_branch);
                t
            }
            Expr::Is { expr, type_name, line } => {
                self.resolve_expr(expr);
                if !self.classes.contains_key(type_name) {
                    self.error(*line, format!("'is' expects a class name, found undefined type '{}'.", type_name));
                }
                Type::Bool
            }
            Expr::Call { callee, args, .. } => {
                let callee_ty = self.resolve_expr(callee);
                for arg in args {
                    self.resolve_expr(arg);
                }
                match callee_ty {
                    Type::Function(sig) => *sig.ret,
                    // Calling a class value constructs an instance of it.
                    Type::Metaclass(name) => Type::Class(name),
                    _ => Type::Any,
                }
            }
            Expr::Get { object, name, line } => self.resolve_member(object, name, *line, false),
            Expr::Set { object, name, value, line } => {
                let member_ty = self.resolve_member(object, name, *line, true);
                let value_ty = self.resolve_expr(value);
                if member_ty != Type::Error && member_ty != Type::Any && !Type::is_assignable_from(&member_ty, &value_ty) {
                    self.error(
                        *line,
                        format!("Cannot assign a value of type '{}' to '{}' of type '{}'.", value_ty, name, member_ty),
                    );
                }
                member_ty
            }
            Expr::Lambda {
                params,
                return_type,
                body,
                ..
            } => {
                self.resolve_function_body(params, return_type, body);
                Type::Function(Signature::new(
                    params.iter().map(|p| Type::from_name(&p.type_name)).collect(),
                    Type::from_name(return_type),
                ))
            }
        }
    }

    fn check_binary_types(&mut self, op: BinOp, left: &Type, right: &Type, line: u32) -> Type {
        use BinOp::*;
        match op {
            Equal | NotEqual => Type::Bool,
            Less | Greater | LessEqual | GreaterEqual => {
                let any = |t: &Type| *t == Type::Any;
                if !any(left)
                    && !any(right)
                    && left != right
                    && !(matches!(left, Type::Int | Type::Double) && matches!(right, Type::Int | Type::Double))
                {
                    self.error(line, format!("Cannot compare '{}' with '{}'.", left, right));
                }
                Type::Bool
            }
            Add if *left == Type::String || *right == Type::String => Type::String,
            Add | Subtract | Multiply | Divide | Modulo | Power | Root => {
                // `any` is the type of untyped `var` fields/locals and
                // lambda parameters without a declared type; it is left to
                // the VM to reject a non-numeric value at run time rather
                // than rejecting every arithmetic use of an untyped
                // binding at resolve time.
                let numeric = |t: &Type| matches!(t, Type::Int | Type::Double | Type::Any);
                if !numeric(left) || !numeric(right) {
                    self.error(line, format!("Operator requires numeric operands, found '{}' and '{}'.", left, right));
                    Type::Error
                } else if *left == Type::Any || *right == Type::Any {
                    Type::Any
                } else if *left == Type::Double || *right == Type::Double {
                    Type::Double
                } else {
                    Type::Int
                }
            }
        }
    }
}

impl Default for Resolver {
    fn default() -> Resolver {
        Resolver::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use bumpalo::Bump;

    fn resolve_src(src: &str) -> Result<ResolveResult, ResolveError> {
        let arena = Bump::new();
        let program = Parser::new(src, &arena).parse_program().expect("parse ok");
        Resolver::new().resolve(&program)
    }

    #[test]
    fn resolves_simple_program() {
        assert!(resolve_src("var a = 1; var b = 2; print(a + b);").is_ok());
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let err = resolve_src("x = 1;").unwrap_err();
        assert!(!err.diagnostics.is_empty());
    }

    #[test]
    fn break_outside_loop_is_an_error() {
        let err = resolve_src("break;").unwrap_err();
        assert!(!err.diagnostics.is_empty());
    }

    #[test]
    fn override_without_parent_method_is_an_error() {
        let src = "class A {} class B < A { public override foo() > int => 1; }";
        let err = resolve_src(src).unwrap_err();
        assert!(err.diagnostics.iter().any(|d| d.message.contains("override")));
    }

    #[test]
    fn override_with_matching_parent_is_ok() {
        let src = "class A { public foo() > int => 1; } class B < A { public override foo() > int => 2; }";
        assert!(resolve_src(src).is_ok());
    }

    #[test]
    fn class_with_static_field_needs_static_init() {
        let src = "class A { static var count = 0; }";
        let result = resolve_src(src).unwrap();
        assert!(result.classes["A"].needs_static_init);
    }

    #[test]
    fn unimplemented_abstract_method_is_an_error() {
        let src = "abstract class A { abstract foo() > int; } class B < A {}";
        let err = resolve_src(src).unwrap_err();
        assert!(err
            .diagnostics
            .iter()
            .any(|d| d.message.contains("Abstract method foo must be implemented in child class B")));
    }

    #[test]
    fn abstract_method_implemented_by_subclass_is_ok() {
        let src = "abstract class A { abstract foo() > int; } class B < A { public foo() > int => 1; }";
        assert!(resolve_src(src).is_ok());
    }

    #[test]
    fn shadowing_without_override_is_an_error() {
        let src = "class A { public foo() > int => 1; } class B < A { public foo() > int => 2; }";
        let err = resolve_src(src).unwrap_err();
        assert!(err.diagnostics.iter().any(|d| d.message.contains("must be marked override")));
    }
}
