//! Compile-time diagnostics.
//!
//! Policy violations and front-end problems never fail a compile with an
//! error; they are collected here and the caller inspects the status.

use std::fmt;

use crate::program::symbols::Span;
use crate::whitelist::analyzer::PolicyViolation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// A kind of diagnostic, with its message template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub code: &'static str,
    pub title: &'static str,
    pub severity: Severity,
    prefix: &'static str,
}

impl Descriptor {
    /// Create a diagnostic of this kind about `subject`.
    pub fn create(&self, subject: impl fmt::Display) -> Diagnostic {
        Diagnostic {
            code: self.code.to_string(),
            severity: self.severity,
            message: format!("{}: {subject}", self.prefix),
            locations: Vec::new(),
        }
    }
}

/// A symbol the whitelist does not permit was referenced.
pub const ILLEGAL_SYMBOL: Descriptor = Descriptor {
    code: "BOX001",
    title: "Symbol is not whitelisted",
    severity: Severity::Error,
    prefix: "Symbol is not whitelisted",
};

/// A script load directive named a path that does not exist.
pub const INVALID_LOAD: Descriptor = Descriptor {
    code: "BOX002",
    title: "Load path not found",
    severity: Severity::Error,
    prefix: "Load path not found",
};

/// The same script was loaded twice from one file.
pub const DUPLICATE_LOAD: Descriptor = Descriptor {
    code: "BOX003",
    title: "Attempted to load the same script more than once in the same file",
    severity: Severity::Warning,
    prefix: "Attempted to load the same script more than once in the same file",
};

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Diagnostic {
    pub code: String,
    pub severity: Severity,
    pub message: String,
    /// Primary location first.
    pub locations: Vec<Span>,
}

impl Diagnostic {
    /// A diagnostic with a front-end specific code.
    pub fn new(code: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            severity,
            message: message.into(),
            locations: Vec::new(),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Error, message)
    }

    pub fn warning(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Warning, message)
    }

    pub fn with_location(mut self, span: Span) -> Self {
        if !span.is_none() && !self.locations.contains(&span) {
            self.locations.push(span);
        }
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Where the diagnostic points, if anywhere.
    pub fn primary_location(&self) -> Option<Span> {
        self.locations.first().copied()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.severity, self.code, self.message)?;
        if let Some(span) = self.primary_location() {
            write!(f, " at {span}")?;
        }
        Ok(())
    }
}

impl From<&PolicyViolation> for Diagnostic {
    fn from(violation: &PolicyViolation) -> Self {
        let mut diagnostic = Diagnostic {
            code: ILLEGAL_SYMBOL.code.to_string(),
            severity: ILLEGAL_SYMBOL.severity,
            message: violation.message().to_string(),
            locations: Vec::new(),
        }
        .with_location(violation.reference());
        for span in violation.locations() {
            diagnostic = diagnostic.with_location(*span);
        }
        diagnostic
    }
}

/// Whether any diagnostic is an error.
pub fn has_errors<'a>(diagnostics: impl IntoIterator<Item = &'a Diagnostic>) -> bool {
    diagnostics.into_iter().any(Diagnostic::is_error)
}
