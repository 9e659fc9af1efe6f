//! Instrumentation of validated programs.

pub mod generator;
pub mod rewriter;

pub use generator::{generate, generated_type_name, Generated};
pub use rewriter::Instrumenter;

use crate::program::ast::Program;
use crate::program::symbols::SymbolId;
use crate::runtime::registry::GuardId;

/// Generate the script type for `gid` and instrument everything else.
pub fn instrument(mut program: Program, gid: GuardId, globals: Option<SymbolId>) -> Program {
    let generated = generate(&mut program, gid, globals);
    Instrumenter::new(generated.info.guard_field)
        .with_redirects(generated.redirects)
        .rewrite(program)
}
