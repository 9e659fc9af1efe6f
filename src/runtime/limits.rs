//! Guard limits with builder pattern.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::runtime::guard::Disposable;

/// Callback invoked after a resource was force-disposed at the end of a run.
pub type DisposeCallback = Arc<dyn Fn(&dyn Disposable) + Send + Sync>;

/// Resource budgets for one compiled script.
#[derive(Clone)]
pub struct GuardLimits {
    /// Stack bytes guest code may use below the run's baseline.
    pub stack_bytes: u64,
    /// Stack budget while the thread is already unwinding a failure.
    pub exception_stack_bytes: u64,
    /// Total objects plus array elements a run may allocate.
    pub max_allocations: u64,
    /// Wall-clock budget, measured from the first probe of a run.
    pub timeout: Duration,
    /// Guarded operations per run. `None` disables the check; the
    /// accounting calls stay in place.
    pub max_operations: Option<u64>,
    /// Observes every resource disposed by the guard on teardown.
    pub after_forced_dispose: Option<DisposeCallback>,
}

impl Default for GuardLimits {
    fn default() -> Self {
        Self {
            stack_bytes: 256 * 1024,
            exception_stack_bytes: 1024 * 1024,
            max_allocations: 100_000,
            timeout: Duration::from_millis(500),
            max_operations: None,
            after_forced_dispose: None,
        }
    }
}

impl fmt::Debug for GuardLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardLimits")
            .field("stack_bytes", &self.stack_bytes)
            .field("exception_stack_bytes", &self.exception_stack_bytes)
            .field("max_allocations", &self.max_allocations)
            .field("timeout", &self.timeout)
            .field("max_operations", &self.max_operations)
            .field(
                "after_forced_dispose",
                &self.after_forced_dispose.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

impl GuardLimits {
    /// Create a new builder for GuardLimits.
    pub fn builder() -> GuardLimitsBuilder {
        GuardLimitsBuilder::default()
    }
}

/// Builder for creating GuardLimits instances.
#[derive(Default)]
pub struct GuardLimitsBuilder {
    stack_bytes: Option<u64>,
    exception_stack_bytes: Option<u64>,
    max_allocations: Option<u64>,
    timeout: Option<Duration>,
    max_operations: Option<u64>,
    after_forced_dispose: Option<DisposeCallback>,
}

impl GuardLimitsBuilder {
    /// Set the normal stack budget in bytes.
    pub fn stack_bytes(mut self, bytes: u64) -> Self {
        self.stack_bytes = Some(bytes);
        self
    }

    /// Set the stack budget used while unwinding.
    pub fn exception_stack_bytes(mut self, bytes: u64) -> Self {
        self.exception_stack_bytes = Some(bytes);
        self
    }

    /// Set the allocation ceiling.
    pub fn max_allocations(mut self, count: u64) -> Self {
        self.max_allocations = Some(count);
        self
    }

    /// Set the wall-clock budget.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable the operation ceiling.
    pub fn max_operations(mut self, count: u64) -> Self {
        self.max_operations = Some(count);
        self
    }

    /// Observe resources disposed on teardown.
    pub fn after_forced_dispose<F>(mut self, callback: F) -> Self
    where
        F: Fn(&dyn Disposable) + Send + Sync + 'static,
    {
        self.after_forced_dispose = Some(Arc::new(callback));
        self
    }

    /// Build the GuardLimits.
    pub fn build(self) -> GuardLimits {
        let default = GuardLimits::default();
        let stack_bytes = self.stack_bytes.unwrap_or(default.stack_bytes);
        GuardLimits {
            stack_bytes,
            // The unwinding budget is never tighter than the normal one.
            exception_stack_bytes: self
                .exception_stack_bytes
                .unwrap_or(default.exception_stack_bytes)
                .max(stack_bytes),
            max_allocations: self.max_allocations.unwrap_or(default.max_allocations),
            timeout: self.timeout.unwrap_or(default.timeout),
            max_operations: self.max_operations.or(default.max_operations),
            after_forced_dispose: self.after_forced_dispose.or(default.after_forced_dispose),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = GuardLimits::default();
        assert_eq!(limits.stack_bytes, 256 * 1024);
        assert_eq!(limits.timeout, Duration::from_millis(500));
        assert!(limits.max_operations.is_none());
    }

    #[test]
    fn test_builder() {
        let limits = GuardLimits::builder()
            .timeout(Duration::from_millis(50))
            .max_allocations(10)
            .max_operations(1_000)
            .build();

        assert_eq!(limits.timeout, Duration::from_millis(50));
        assert_eq!(limits.max_allocations, 10);
        assert_eq!(limits.max_operations, Some(1_000));
        assert_eq!(limits.exception_stack_bytes, 1024 * 1024);
    }

    #[test]
    fn test_exception_budget_covers_normal_budget() {
        let limits = GuardLimits::builder()
            .stack_bytes(4 * 1024 * 1024)
            .exception_stack_bytes(1024)
            .build();
        assert_eq!(limits.exception_stack_bytes, 4 * 1024 * 1024);
    }

    #[test]
    fn test_debug_hides_callback() {
        let limits = GuardLimits::builder().after_forced_dispose(|_| {}).build();
        let shown = format!("{limits:?}");
        assert!(shown.contains("<callback>"));
    }
}
