//! Compiling guest source into guarded, runnable scripts.

pub mod diagnostics;
pub mod interfaces;
pub mod pipeline;
pub mod script;

pub use diagnostics::{Diagnostic, Severity};
pub use interfaces::{Emitter, FrontEnd, ParsedProgram, ScriptFuture, ScriptUnit};
pub use pipeline::BoxCompiler;
pub use script::{BoxScript, CompileResult, CompileStatus};
