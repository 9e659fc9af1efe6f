//! The guest program model shared by the analyzer, the instrumentation pass
//! and emitters.

pub mod ast;
pub mod symbols;
pub mod visit;

pub use ast::Program;
pub use symbols::{ReferenceUnit, ResolvedSymbol, Span, SymbolId, SymbolKind, SymbolTable};
