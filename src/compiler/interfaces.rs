//! Seams to the external collaborators of the compiler.

use std::future::Future;
use std::pin::Pin;

use crate::compiler::diagnostics::Diagnostic;
use crate::error::Result;
use crate::program::ast::Program;
use crate::program::symbols::{ReferenceUnit, SymbolId};
use crate::runtime::registry::{GuardId, GuardRegistry};
use crate::whitelist::rule::DeclarationId;

/// Boxed future returned by a script's entry point.
pub type ScriptFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// What a front end produces from guest source.
#[derive(Debug, Clone, Default)]
pub struct ParsedProgram {
    pub program: Program,
    /// Problems found while parsing and resolving. Any error fails the compile.
    pub diagnostics: Vec<Diagnostic>,
    /// The resolved globals type, when one was requested.
    pub globals: Option<SymbolId>,
}

/// Parses guest source and resolves every reference.
///
/// Implementations must fill in `Program::declared` with the symbols the
/// submission declares itself, and record override links on resolved
/// symbols so the analyzer can walk override chains.
pub trait FrontEnd: Send + Sync {
    /// Parse `source` against `references`.
    ///
    /// `Err` means the front end itself failed; problems with the guest code
    /// belong in [`ParsedProgram::diagnostics`].
    fn parse(
        &self,
        source: &str,
        references: &[ReferenceUnit],
        globals: Option<&DeclarationId>,
    ) -> anyhow::Result<ParsedProgram>;
}

/// Turns an instrumented program into something runnable.
pub trait Emitter: Send + Sync {
    type Unit: ScriptUnit;

    fn emit(
        &self,
        program: Program,
        references: &[ReferenceUnit],
    ) -> std::result::Result<Self::Unit, Vec<Diagnostic>>;
}

/// A runnable script produced by an [`Emitter`].
pub trait ScriptUnit: Send + Sync + 'static {
    type Output: Send + 'static;
    type Globals: Send + 'static;

    /// Fill the generated guard slot for `gid`.
    fn bind_guard(&mut self, registry: &GuardRegistry, gid: GuardId) -> Result<()>;

    /// Run the script's top-level code once. `globals` fills the globals slot
    /// for this run.
    fn entry(&self, globals: Option<Self::Globals>) -> ScriptFuture<'_, Self::Output>;
}
