//! Whitelist policies and the analyzer that enforces them.

pub mod analyzer;
pub mod file;
pub mod policy;
pub mod rule;

pub use analyzer::{PolicyViolation, WhitelistAnalyzer};
pub use policy::WhitelistPolicy;
pub use rule::{DeclarationId, DeclarationKind, WhitelistRule};
