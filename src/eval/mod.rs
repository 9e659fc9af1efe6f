//! A reference emitter that interprets instrumented programs directly.
//!
//! Host functionality reaches guest code only through bindings registered
//! on the [`Interpreter`], keyed by declaration id. Anything the program
//! calls that is neither declared by the script nor bound fails the emit
//! step with an `EVAL001` diagnostic.
//!
//! ```rust,ignore
//! let mut interpreter = Interpreter::new();
//! interpreter.bind(
//!     DeclarationId::parse("M:System.Console.WriteLine(System.String)")?,
//!     |_, args| {
//!         println!("{}", args[0]);
//!         Ok(Value::Null)
//!     },
//! );
//! ```

mod machine;
pub mod unit;
pub mod value;

pub use unit::EvalUnit;
pub use value::{HostFn, Value};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::compiler::diagnostics::Diagnostic;
use crate::compiler::interfaces::Emitter;
use crate::program::ast::{Expr, Program};
use crate::program::symbols::{ReferenceUnit, Span, SymbolId};
use crate::program::visit::{walk_expr, walk_program, Visitor};
use crate::whitelist::rule::DeclarationId;

use unit::Index;

/// Code of the diagnostic for a call with no implementation.
pub const UNBOUND_CODE: &str = "EVAL001";

/// Code of the diagnostic for a program that skipped instrumentation.
pub const NOT_INSTRUMENTED_CODE: &str = "EVAL002";

/// Emits [`EvalUnit`]s.
#[derive(Clone, Default)]
pub struct Interpreter {
    bindings: HashMap<DeclarationId, HostFn>,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut bound: Vec<&str> = self.bindings.keys().map(DeclarationId::as_str).collect();
        bound.sort_unstable();
        f.debug_struct("Interpreter").field("bindings", &bound).finish()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a host member.
    ///
    /// For methods the function receives the receiver (`None` for static
    /// members) and the arguments. Field and property reads pass no
    /// arguments, writes pass the new value. A binding for a type id acts
    /// as its constructor when no constructor binding matches.
    pub fn bind<F>(&mut self, id: DeclarationId, f: F) -> &mut Self
    where
        F: Fn(Option<&Value>, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.bindings.insert(id, Arc::new(f));
        self
    }

    pub fn is_bound(&self, id: &DeclarationId) -> bool {
        self.bindings.contains_key(id)
    }
}

impl Emitter for Interpreter {
    type Unit = EvalUnit;

    fn emit(
        &self,
        program: Program,
        _references: &[ReferenceUnit],
    ) -> Result<EvalUnit, Vec<Diagnostic>> {
        if program.generated.is_none() {
            return Err(vec![Diagnostic::error(
                NOT_INSTRUMENTED_CODE,
                "Program has not been instrumented",
            )]);
        }

        let mut host = HashMap::new();
        for (id, f) in &self.bindings {
            for symbol in program.symbols.resolve(id) {
                if !program.is_declared(*symbol) {
                    host.insert(*symbol, Arc::clone(f));
                }
            }
        }

        let index = Index::build(&program);
        let mut unbound = Unbound {
            program: &program,
            index: &index,
            host: &host,
            seen: HashSet::new(),
            diagnostics: Vec::new(),
        };
        walk_program(&mut unbound, &program);
        if !unbound.diagnostics.is_empty() {
            return Err(unbound.diagnostics);
        }

        tracing::debug!(
            types = index.types.len(),
            methods = index.methods.len(),
            host_bindings = host.len(),
            "emitted interpreter unit"
        );
        Ok(EvalUnit::new(program, index, host))
    }
}

/// Finds calls and constructions that nothing implements.
struct Unbound<'a> {
    program: &'a Program,
    index: &'a Index,
    host: &'a HashMap<SymbolId, HostFn>,
    seen: HashSet<SymbolId>,
    diagnostics: Vec<Diagnostic>,
}

impl Unbound<'_> {
    fn require(&mut self, symbol: SymbolId, span: Span) {
        if !self.seen.insert(symbol) {
            return;
        }
        let name = self
            .program
            .symbols
            .get(symbol)
            .map_or("<unknown>", |s| s.display_name());
        self.diagnostics.push(
            Diagnostic::error(UNBOUND_CODE, format!("No host binding for {name}")).with_location(span),
        );
    }
}

impl Visitor for Unbound<'_> {
    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Call { callee, .. }
                if !self.index.methods.contains_key(&callee.symbol)
                    && !self.host.contains_key(&callee.symbol) =>
            {
                self.require(callee.symbol, callee.span);
            }
            Expr::New { ty, ctor, .. } if !self.index.types.contains_key(&ty.symbol) => {
                let ctor_bound = ctor.is_some_and(|c| self.host.contains_key(&c.symbol));
                if !ctor_bound && !self.host.contains_key(&ty.symbol) {
                    let missing = ctor.unwrap_or(*ty);
                    self.require(missing.symbol, missing.span);
                }
            }
            _ => {}
        }
        walk_expr(self, expr);
    }
}
