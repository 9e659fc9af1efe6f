//! Error types for script compilation and guarded execution.

use std::time::Duration;

use thiserror::Error;

use crate::runtime::registry::GuardId;

/// A resource budget was exhausted while guest code was running.
///
/// These are raised by the accounting calls the instrumentation pass injects
/// and travel up through guest code to the host. They are fatal to the current
/// run and are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// Guest code recursed deeper than the configured stack budget.
    #[error("stack limit reached: {used} bytes used, limit is {limit} bytes")]
    Stack {
        /// Bytes between the run's stack baseline and the probe that failed.
        used: u64,
        /// The budget that was exceeded (normal or unwinding budget).
        limit: u64,
    },

    /// The run exceeded its wall-clock budget.
    #[error("time limit reached after {limit:?}")]
    Time {
        /// The configured time limit.
        limit: Duration,
    },

    /// The run allocated more objects or array elements than allowed.
    #[error("total allocation limit reached ({limit} objects and array elements)")]
    Memory {
        /// The configured allocation ceiling.
        limit: u64,
    },

    /// The run performed more guarded operations than allowed.
    #[error("operation limit reached ({limit} operations)")]
    Rate {
        /// The configured operation ceiling.
        limit: u64,
    },

    /// Guarded code ran while its guard was not started.
    #[error("guarded code executed outside of a running script")]
    Inactive,
}

impl GuardError {
    /// Check if this error is a stack-limit failure.
    pub fn is_stack_limit(&self) -> bool {
        matches!(self, GuardError::Stack { .. })
    }

    /// Check if this error is a time-limit failure.
    pub fn is_time_limit(&self) -> bool {
        matches!(self, GuardError::Time { .. })
    }

    /// Check if this error is an allocation-limit failure.
    pub fn is_memory_limit(&self) -> bool {
        matches!(self, GuardError::Memory { .. })
    }

    /// Check if this error is an operation-limit failure.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, GuardError::Rate { .. })
    }
}

/// Errors surfaced by the compiler, the guard registry and script runs.
#[derive(Error, Debug)]
pub enum BoxError {
    /// A resource guard stopped the script.
    #[error(transparent)]
    Guard(#[from] GuardError),

    /// The guest code itself failed.
    #[error("script failed: {0}")]
    Guest(#[source] anyhow::Error),

    /// The front end could not produce a program model.
    #[error("front end failed: {0}")]
    FrontEnd(#[source] anyhow::Error),

    /// None of the whitelist rules resolved to a symbol.
    #[error("no whitelisted symbols could be resolved")]
    EmptyPolicy,

    /// A guard id was not allocated, or was already released.
    #[error("invalid guard id: {0}")]
    InvalidGuardId(GuardId),

    /// Every guard index is in use.
    #[error("guard registry is full")]
    RegistryFull,

    /// `initialize` was called on a running guard.
    #[error("guard is running and cannot be re-initialized")]
    GuardActive,

    /// A context-checked guard lookup ran outside of any script.
    #[error("no current script context")]
    NoCurrentContext,

    /// Guarded code for one script ran inside another script's context.
    #[error("illegal context switch: expected {expected}, current context is {actual}")]
    IllegalContextSwitch {
        /// The guard id the guarded code belongs to.
        expected: GuardId,
        /// The guard id of the active context.
        actual: GuardId,
    },

    /// A declaration id did not have the `K:name` shape.
    #[error("malformed declaration id {0:?}")]
    MalformedDeclarationId(String),

    /// A whitelist file line could not be parsed.
    #[error("malformed whitelist rule on line {line}: {text:?}")]
    MalformedRule {
        /// 1-based line number.
        line: usize,
        /// The offending line, trimmed.
        text: String,
    },

    /// I/O error while reading or writing whitelist rules.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BoxError {
    /// Wrap a failure raised by guest code.
    pub fn guest(err: impl Into<anyhow::Error>) -> Self {
        BoxError::Guest(err.into())
    }

    /// Get the guard failure, if this error is one.
    pub fn as_guard(&self) -> Option<&GuardError> {
        match self {
            BoxError::Guard(e) => Some(e),
            _ => None,
        }
    }

    /// Check if this error represents a time-limit failure.
    pub fn is_timeout(&self) -> bool {
        self.as_guard().is_some_and(GuardError::is_time_limit)
    }

    /// Check if this error represents an allocation-limit failure.
    pub fn is_memory_limit(&self) -> bool {
        self.as_guard().is_some_and(GuardError::is_memory_limit)
    }

    /// Check if this error represents a stack-limit failure.
    pub fn is_stack_limit(&self) -> bool {
        self.as_guard().is_some_and(GuardError::is_stack_limit)
    }

    /// Check if this error was raised by the guest code rather than a guard.
    pub fn is_guest(&self) -> bool {
        matches!(self, BoxError::Guest(_))
    }

    /// Check if this error indicates host misuse rather than guest misbehavior.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            BoxError::EmptyPolicy
                | BoxError::InvalidGuardId(_)
                | BoxError::RegistryFull
                | BoxError::GuardActive
                | BoxError::NoCurrentContext
                | BoxError::IllegalContextSwitch { .. }
                | BoxError::MalformedDeclarationId(_)
                | BoxError::MalformedRule { .. }
        )
    }
}

/// Result type alias for compiler and runtime operations.
pub type Result<T> = std::result::Result<T, BoxError>;

/// Result type alias for the injected accounting calls.
pub type GuardResult<T> = std::result::Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_error_helpers() {
        let time = GuardError::Time {
            limit: Duration::from_millis(50),
        };
        assert!(time.is_time_limit());
        assert!(!time.is_memory_limit());

        let memory = GuardError::Memory { limit: 10 };
        assert!(memory.is_memory_limit());
        assert!(!memory.is_stack_limit());

        let stack = GuardError::Stack {
            used: 4096,
            limit: 2048,
        };
        assert!(stack.is_stack_limit());
        assert_eq!(
            stack.to_string(),
            "stack limit reached: 4096 bytes used, limit is 2048 bytes"
        );

        assert!(GuardError::Rate { limit: 5 }.is_rate_limit());
    }

    #[test]
    fn test_box_error_wraps_guard_failures() {
        let err: BoxError = GuardError::Time {
            limit: Duration::from_secs(1),
        }
        .into();
        assert!(err.is_timeout());
        assert!(!err.is_guest());
        assert!(!err.is_configuration());

        let err = BoxError::guest(anyhow::anyhow!("boom"));
        assert!(err.is_guest());
        assert!(err.as_guard().is_none());
        assert_eq!(err.to_string(), "script failed: boom");
    }

    #[test]
    fn test_configuration_errors() {
        assert!(BoxError::EmptyPolicy.is_configuration());
        assert!(BoxError::NoCurrentContext.is_configuration());
        assert!(BoxError::MalformedRule {
            line: 3,
            text: "oops".to_string()
        }
        .is_configuration());
        assert!(!BoxError::Io(std::io::Error::other("x")).is_configuration());
    }
}
