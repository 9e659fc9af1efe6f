//! Shared fixtures for the integration tests.
//!
//! There is no real front end in this crate, so tests register the program
//! each source string lowers to with a [`CannedFrontEnd`].

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use boxguard::compiler::ParsedProgram;
use boxguard::program::ast::{Block, Body, Expr, MethodDecl, Program, Stmt, TypeDecl};
use boxguard::program::{Span, SymbolId, SymbolKind, SymbolTable};
use boxguard::whitelist::file::parse_rules;
use boxguard::{
    DeclarationId, FrontEnd, GuardLimits, Interpreter, Value, WhitelistPolicy,
};
use parking_lot::Mutex;

pub const WRITE_LINE: &str = "M:System.Console.WriteLine(System.String)";

/// Host declarations every test program can reference.
#[derive(Debug, Clone, Copy)]
pub struct Corlib {
    pub object: SymbolId,
    pub int32: SymbolId,
    pub console: SymbolId,
    pub write_line: SymbolId,
    pub file: SymbolId,
    pub delete: SymbolId,
    pub read_all_text: SymbolId,
    pub open: SymbolId,
}

pub fn corlib(symbols: &mut SymbolTable) -> Corlib {
    let object = symbols.define_type("System.Object", None);
    let int32 = symbols.define_type("System.Int32", None);
    let console = symbols.define_type("System.Console", None);
    let write_line =
        symbols.define_member(console, SymbolKind::Method, "WriteLine", Some("System.String"));
    let file = symbols.define_type("System.IO.File", None);
    let delete = symbols.define_member(file, SymbolKind::Method, "Delete", Some("System.String"));
    let read_all_text =
        symbols.define_member(file, SymbolKind::Method, "ReadAllText", Some("System.String"));
    let open = symbols.define_member(file, SymbolKind::Method, "Open", Some("System.String"));
    for method in [write_line, delete, read_all_text, open] {
        if let Some(symbol) = symbols.get_mut(method) {
            symbol.is_static = true;
        }
    }

    Corlib {
        object,
        int32,
        console,
        write_line,
        file,
        delete,
        read_all_text,
        open,
    }
}

/// A fresh program with the host declarations in its symbol table.
pub fn program() -> (Program, Corlib) {
    let mut symbols = SymbolTable::new();
    let lib = corlib(&mut symbols);
    (Program::new(symbols), lib)
}

pub fn parsed(program: Program) -> ParsedProgram {
    ParsedProgram {
        program,
        ..ParsedProgram::default()
    }
}

pub fn at(line: u32) -> Span {
    Span::new(line, 1)
}

pub fn local(program: &mut Program, name: &str) -> SymbolId {
    let symbol = program.symbols.define_local(SymbolKind::Local, name);
    program.declare(symbol)
}

pub fn label(program: &mut Program, name: &str) -> SymbolId {
    let symbol = program.symbols.define_local(SymbolKind::Label, name);
    program.declare(symbol)
}

pub fn guest_type(program: &mut Program, name: &str) -> SymbolId {
    let ty = program.symbols.define_type(name, None);
    program.declare(ty)
}

/// Declare a static method on `owner` and return it with its parameters.
pub fn static_method(
    program: &mut Program,
    owner: SymbolId,
    name: &str,
    params: &[&str],
) -> (SymbolId, Vec<SymbolId>) {
    let method = program
        .symbols
        .define_member(owner, SymbolKind::Method, name, Some(&params.join(",")));
    if let Some(symbol) = program.symbols.get_mut(method) {
        symbol.is_static = true;
        symbol.parameters = params.iter().map(|p| p.to_string()).collect();
    }
    program.declare(method);
    let params = params
        .iter()
        .map(|p| {
            let param = program.symbols.define_local(SymbolKind::Parameter, p);
            program.declare(param)
        })
        .collect();
    (method, params)
}

pub fn method_decl(symbol: SymbolId, params: Vec<SymbolId>, stmts: Vec<Stmt>) -> MethodDecl {
    MethodDecl {
        symbol,
        params,
        body: Body::Block(Block::new(stmts)),
        is_async: false,
    }
}

pub fn type_decl(symbol: SymbolId, members: Vec<boxguard::program::ast::Member>) -> TypeDecl {
    let mut decl = TypeDecl::new(symbol);
    decl.members = members;
    decl
}

pub fn print(lib: &Corlib, line: u32, arg: Expr) -> Stmt {
    Stmt::Expr(Expr::call(lib.write_line, at(line), vec![arg]))
}

type Build = Arc<dyn Fn() -> ParsedProgram + Send + Sync>;

/// Front end that hands out pre-built programs by source text.
#[derive(Clone, Default)]
pub struct CannedFrontEnd {
    scripts: HashMap<String, Build>,
}

impl CannedFrontEnd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script<F>(mut self, source: &str, build: F) -> Self
    where
        F: Fn() -> ParsedProgram + Send + Sync + 'static,
    {
        self.scripts.insert(source.to_string(), Arc::new(build));
        self
    }
}

impl FrontEnd for CannedFrontEnd {
    fn parse(
        &self,
        source: &str,
        _references: &[boxguard::program::ReferenceUnit],
        _globals: Option<&DeclarationId>,
    ) -> anyhow::Result<ParsedProgram> {
        let build = self
            .scripts
            .get(source)
            .ok_or_else(|| anyhow::anyhow!("no canned program for {source:?}"))?;
        Ok(build())
    }
}

pub fn policy(rules: &str) -> WhitelistPolicy {
    let mut policy = WhitelistPolicy::new();
    policy.extend_rules(parse_rules(rules).unwrap());
    policy
}

/// Lines written by guest code through `Console.WriteLine`.
pub type Output = Arc<Mutex<Vec<String>>>;

/// An interpreter with `Console.WriteLine` bound to a capture buffer.
pub fn console() -> (Interpreter, Output) {
    let output: Output = Arc::default();
    let sink = Arc::clone(&output);
    let mut interpreter = Interpreter::new();
    interpreter.bind(DeclarationId::parse(WRITE_LINE).unwrap(), move |_, args| {
        let line: Vec<String> = args.iter().map(Value::to_string).collect();
        sink.lock().push(line.join(" "));
        Ok(Value::Null)
    });
    (interpreter, output)
}

pub fn short_timeout() -> GuardLimits {
    GuardLimits::builder()
        .timeout(Duration::from_millis(50))
        .build()
}
