//! # Boxguard
//!
//! Whitelist-gated compilation and resource-guarded execution of untrusted
//! scripts.
//!
//! Guest source goes through a pipeline before it is allowed to run:
//!
//! - **Whitelist analysis**: every type, method, field, property and event the
//!   script references must be granted by a [`WhitelistPolicy`]. Scripts that
//!   reference anything else fail to compile with diagnostics.
//! - **Instrumentation**: accounting calls are inserted at method entries,
//!   loop back-edges, labels, allocations and static initializers.
//! - **Guarded execution**: each compiled script owns a [`RuntimeGuard`] that
//!   enforces stack depth, wall-clock time, allocation count and operation
//!   count while the script runs, and disposes of collected resources when a
//!   run ends.
//!
//! Parsing and code generation are behind the [`FrontEnd`] and [`Emitter`]
//! traits. The [`eval`] module provides an interpreting emitter.
//!
//! ## Example
//!
//! ```rust,ignore
//! use boxguard::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut policy = WhitelistPolicy::new();
//!     policy.add_rule(WhitelistRule::parse("T:System.Console", true)?);
//!
//!     let limits = GuardLimits::builder()
//!         .timeout(Duration::from_millis(50))
//!         .max_allocations(10_000)
//!         .build();
//!
//!     let compiler = BoxCompiler::new(&policy, limits, MyFrontEnd, Interpreter::new());
//!     let result = compiler.compile("Console.WriteLine(\"hi\");", None)?;
//!     for diagnostic in result.diagnostics() {
//!         eprintln!("{diagnostic}");
//!     }
//!
//!     if let Some(script) = result.into_script() {
//!         script.run(None).await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Failure model
//!
//! Resource exhaustion surfaces as [`GuardError`] wrapped in
//! [`BoxError::Guard`]. It ends the current run; the script can be run again,
//! and [`BoxScript::reset_budget`] restores its allocation and operation
//! budget.

pub mod compiler;
pub mod error;
pub mod eval;
pub mod instrument;
pub mod prelude;
pub mod program;
pub mod runtime;
pub mod whitelist;

// Re-export main types at crate root for convenience
pub use compiler::{
    BoxCompiler, BoxScript, CompileResult, CompileStatus, Diagnostic, Emitter, FrontEnd,
    ParsedProgram, ScriptUnit, Severity,
};
pub use error::{BoxError, GuardError, Result};
pub use eval::{Interpreter, Value};
pub use runtime::{
    current, current_guard, global_registry, with_script_context, Disposable, GuardId,
    GuardLimits, GuardLimitsBuilder, GuardRegistry, RuntimeGuard, ScriptContext,
};
pub use whitelist::{DeclarationId, DeclarationKind, WhitelistAnalyzer, WhitelistPolicy, WhitelistRule};
