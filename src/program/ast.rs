//! The guest program tree.
//!
//! Front ends lower guest source into this tree with every reference already
//! resolved to a [`SymbolId`]. The whitelist analyzer reads it, the
//! instrumentation pass rewrites it, and emitters consume the rewritten form.

use std::collections::HashSet;

use crate::program::symbols::{Span, SymbolId, SymbolTable};
use crate::runtime::registry::GuardId;

/// A whole guest submission.
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// Every symbol the tree references, host and guest alike.
    pub symbols: SymbolTable,
    /// Symbols declared by the submission itself.
    pub declared: HashSet<SymbolId>,
    /// Type declarations.
    pub types: Vec<TypeDecl>,
    /// Top-level statements, run as the script's entry point.
    pub body: Block,
    /// Filled in by the instrumentation pass.
    pub generated: Option<GeneratedInfo>,
}

impl Program {
    pub fn new(symbols: SymbolTable) -> Self {
        Self {
            symbols,
            ..Self::default()
        }
    }

    /// Record `symbol` as declared by the submission.
    pub fn declare(&mut self, symbol: SymbolId) -> SymbolId {
        self.declared.insert(symbol);
        symbol
    }

    pub fn is_declared(&self, symbol: SymbolId) -> bool {
        self.declared.contains(&symbol)
    }
}

/// Symbols the instrumentation pass generated for a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratedInfo {
    /// The guard the program was instrumented for.
    pub gid: GuardId,
    /// The generated type holding the guard field.
    pub class: SymbolId,
    /// Static field holding the guard handle.
    pub guard_field: SymbolId,
    /// Static field holding the host globals, when a globals type was given.
    pub globals_field: Option<SymbolId>,
}

#[derive(Debug, Clone)]
pub struct TypeDecl {
    pub symbol: SymbolId,
    pub base: Option<SymbolRef>,
    pub members: Vec<Member>,
    pub span: Span,
}

impl TypeDecl {
    pub fn new(symbol: SymbolId) -> Self {
        Self {
            symbol,
            base: None,
            members: Vec::new(),
            span: Span::NONE,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Member {
    Method(MethodDecl),
    Constructor(ConstructorDecl),
    Property(PropertyDecl),
    Field(FieldDecl),
    Type(TypeDecl),
}

#[derive(Debug, Clone)]
pub struct MethodDecl {
    pub symbol: SymbolId,
    pub params: Vec<SymbolId>,
    pub body: Body,
    pub is_async: bool,
}

#[derive(Debug, Clone)]
pub struct ConstructorDecl {
    pub symbol: SymbolId,
    pub is_static: bool,
    pub params: Vec<SymbolId>,
    pub body: Body,
}

#[derive(Debug, Clone)]
pub struct PropertyDecl {
    pub symbol: SymbolId,
    pub accessors: Vec<Accessor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorKind {
    Get,
    Set,
    Add,
    Remove,
}

#[derive(Debug, Clone)]
pub struct Accessor {
    pub kind: AccessorKind,
    /// The implicit `value` parameter of setters and event accessors.
    pub value_param: Option<SymbolId>,
    pub body: Body,
}

#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub symbol: SymbolId,
    pub init: Option<Expr>,
}

/// A function body: either a statement block or a single expression.
#[derive(Debug, Clone)]
pub enum Body {
    Block(Block),
    Expr { expr: Expr, span: Span },
}

impl Body {
    pub fn span(&self) -> Span {
        match self {
            Body::Block(block) => block.span,
            Body::Expr { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self {
            stmts,
            span: Span::NONE,
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    Local {
        symbol: SymbolId,
        init: Option<Expr>,
    },
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    For {
        init: Vec<Stmt>,
        cond: Option<Expr>,
        step: Vec<Expr>,
        body: Box<Stmt>,
    },
    ForEach {
        binding: SymbolId,
        iterable: Expr,
        body: Box<Stmt>,
    },
    Labeled {
        label: SymbolId,
        stmt: Box<Stmt>,
    },
    Goto(SymbolId),
    Break,
    Continue,
    Return(Option<Expr>),
    Block(Block),
    TryFinally {
        body: Block,
        finally: Block,
    },
    /// An accounting call inserted by the instrumentation pass.
    Guard(GuardCall),
}

/// Statement-level accounting call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardCall {
    pub hook: GuardHook,
    /// The generated static field holding the guard.
    pub guard: SymbolId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardHook {
    EnterMethod,
    EnterStaticInit,
    ExitStaticInit,
    BeforeJump,
}

/// Expression-level accounting call; passes its operand through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueHook {
    AfterNewObject,
    AfterNewArray,
    BeforeAwait,
    AfterAwait,
}

/// A resolved reference to a symbol at a source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolRef {
    pub symbol: SymbolId,
    pub span: Span,
}

impl SymbolRef {
    pub fn new(symbol: SymbolId, span: Span) -> Self {
        Self { symbol, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone)]
pub struct Lambda {
    pub params: Vec<SymbolId>,
    pub body: Body,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    /// A local, parameter, field, property or type named directly.
    Name(SymbolRef),
    This,
    Member {
        target: Box<Expr>,
        member: SymbolRef,
    },
    Call {
        callee: SymbolRef,
        receiver: Option<Box<Expr>>,
        args: Vec<Expr>,
    },
    /// Invoke a delegate value.
    Invoke {
        target: Box<Expr>,
        args: Vec<Expr>,
    },
    New {
        ty: SymbolRef,
        ctor: Option<SymbolRef>,
        args: Vec<Expr>,
    },
    NewArray {
        element: SymbolRef,
        len: Box<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Lambda(Box<Lambda>),
    Await(Box<Expr>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    /// An accounting call inserted by the instrumentation pass.
    Guarded {
        hook: ValueHook,
        guard: SymbolId,
        inner: Box<Expr>,
    },
    /// Initializer of the generated guard field.
    GuardSlot(GuardId),
}

impl Expr {
    pub fn int(value: i64) -> Self {
        Expr::Literal(Literal::Int(value))
    }

    pub fn str(value: impl Into<String>) -> Self {
        Expr::Literal(Literal::Str(value.into()))
    }

    pub fn bool(value: bool) -> Self {
        Expr::Literal(Literal::Bool(value))
    }

    pub fn name(symbol: SymbolId, span: Span) -> Self {
        Expr::Name(SymbolRef::new(symbol, span))
    }

    pub fn call(callee: SymbolId, span: Span, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: SymbolRef::new(callee, span),
            receiver: None,
            args,
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        Expr::Assign {
            target: Box::new(target),
            value: Box::new(value),
        }
    }
}
