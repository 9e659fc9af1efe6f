//! Prelude module for convenient imports.

pub use crate::compiler::{BoxCompiler, BoxScript, CompileResult, FrontEnd, ParsedProgram};
pub use crate::error::{BoxError, GuardError, Result};
pub use crate::eval::{Interpreter, Value};
pub use crate::runtime::{GuardLimits, ScriptContext};
pub use crate::whitelist::{DeclarationId, WhitelistPolicy, WhitelistRule};
