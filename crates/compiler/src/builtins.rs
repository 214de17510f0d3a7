//! Declarative standard-library registry.
//!
//! This module only carries *signatures*: for each native class, its
//! methods (name, signature, static flag); for each native function, its
//! name and signature. The resolver uses these to seed the global scope and
//! class table so that calls into native code type-check like any other
//! call. The matching native *behavior* — the actual Rust closures invoked
//! at a `CALL`/`INVOKE` — is registered separately by `lit-runtime`'s own
//! stdlib module; the two sides are kept in sync by hand.

use crate::types::{Signature, Type};

pub struct StdMethod {
    pub name: &'static str,
    pub params: &'static [&'static str],
    pub ret: &'static str,
    pub is_static: bool,
}

pub struct StdClass {
    pub name: &'static str,
    pub superclass: Option<&'static str>,
    pub methods: &'static [StdMethod],
}

pub struct StdFunction {
    pub name: &'static str,
    pub params: &'static [&'static str],
    pub ret: &'static str,
}

impl StdMethod {
    pub fn signature(&self) -> Signature {
        Signature::new(
            self.params.iter().map(|p| Type::from_name(p)).collect(),
            Type::from_name(self.ret),
        )
    }
}

impl StdFunction {
    pub fn signature(&self) -> Signature {
        Signature::new(
            self.params.iter().map(|p| Type::from_name(p)).collect(),
            Type::from_name(self.ret),
        )
    }
}

/// Pre-registered native classes: `Class`, `Object`, `Bool`, `Int`,
/// `Double` (extends `Int`), `Char`, `String`, `Function`.
pub const STD_CLASSES: &[StdClass] = &[
    StdClass {
        name: "Object",
        superclass: None,
        methods: &[StdMethod {
            name: "toString",
            params: &[],
            ret: "String",
            is_static: false,
        }],
    },
    StdClass {
        name: "Class",
        superclass: None,
        methods: &[StdMethod {
            name: "toString",
            params: &[],
            ret: "String",
            is_static: false,
        }],
    },
    StdClass {
        name: "Bool",
        superclass: Some("Object"),
        methods: &[StdMethod {
            name: "toString",
            params: &[],
            ret: "String",
            is_static: false,
        }],
    },
    StdClass {
        name: "Int",
        superclass: Some("Object"),
        methods: &[
            StdMethod {
                name: "toString",
                params: &[],
                ret: "String",
                is_static: false,
            },
            StdMethod {
                name: "toDouble",
                params: &[],
                ret: "double",
                is_static: false,
            },
        ],
    },
    StdClass {
        name: "Double",
        superclass: Some("Int"),
        methods: &[StdMethod {
            name: "toString",
            params: &[],
            ret: "String",
            is_static: false,
        }],
    },
    StdClass {
        name: "Char",
        superclass: Some("Object"),
        methods: &[StdMethod {
            name: "toString",
            params: &[],
            ret: "String",
            is_static: false,
        }],
    },
    StdClass {
        name: "String",
        superclass: Some("Object"),
        methods: &[
            StdMethod {
                name: "toString",
                params: &[],
                ret: "String",
                is_static: false,
            },
            StdMethod {
                name: "length",
                params: &[],
                ret: "int",
                is_static: false,
            },
            // String.toLowerCase(): void.
            StdMethod {
                name: "toLowerCase",
                params: &[],
                ret: "void",
                is_static: false,
            },
        ],
    },
    StdClass {
        name: "Function",
        superclass: Some("Object"),
        methods: &[StdMethod {
            name: "toString",
            params: &[],
            ret: "String",
            is_static: false,
        }],
    },
];

/// Pre-registered native globals: `time(): double`, `print(any): void`.
pub const STD_FUNCTIONS: &[StdFunction] = &[
    StdFunction {
        name: "time",
        params: &[],
        ret: "double",
    },
    StdFunction {
        name: "print",
        params: &["any"],
        ret: "void",
    },
];
