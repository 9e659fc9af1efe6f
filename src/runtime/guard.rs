//! Per-script resource accountant.
//!
//! A [`RuntimeGuard`] is created once per compiled script. The host starts it
//! around every run; the calls injected by the instrumentation pass then probe
//! it from guest code and fail the run as soon as a budget is exhausted.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::error::{BoxError, GuardError, GuardResult, Result};
use crate::runtime::limits::GuardLimits;

/// Shared handle to a guard.
pub type GuardHandle = Arc<RuntimeGuard>;

/// A resource the guard releases when a run ends.
pub trait Disposable: Send + Sync {
    fn dispose(&self) -> anyhow::Result<()>;
}

static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

thread_local! {
    /// Stack baselines of the static initializers running on this thread,
    /// innermost last.
    static STATIC_INIT_BASELINES: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Monotonic clock reading, never zero.
fn now_ticks() -> u64 {
    saturating_nanos(EPOCH.elapsed()).saturating_add(1)
}

/// Address of a local in a fresh frame.
#[inline(never)]
fn stack_position() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}

/// Limits captured by the last `initialize`.
struct Budget {
    limits: GuardLimits,
    time_ticks: u64,
}

impl Budget {
    fn new(limits: &GuardLimits) -> Self {
        Self {
            limits: limits.clone(),
            time_ticks: saturating_nanos(limits.timeout),
        }
    }
}

pub struct RuntimeGuard {
    budget: ArcSwap<Budget>,
    active: AtomicBool,
    run_depth: AtomicU32,
    /// Zero until the first probe of a run.
    stack_baseline: AtomicUsize,
    /// Zero until the first probe of a run.
    clock_start: AtomicU64,
    allocated: AtomicU64,
    operations: AtomicU64,
    disposables: Mutex<HashMap<usize, Arc<dyn Disposable>>>,
}

impl fmt::Debug for RuntimeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeGuard")
            .field("active", &self.is_active())
            .field("allocated", &self.allocated())
            .field("operations", &self.operations())
            .field("limits", &self.budget.load().limits)
            .finish()
    }
}

impl Default for RuntimeGuard {
    fn default() -> Self {
        Self::new(&GuardLimits::default())
    }
}

impl RuntimeGuard {
    /// Create an initialized, inactive guard.
    pub fn new(limits: &GuardLimits) -> Self {
        Self {
            budget: ArcSwap::from_pointee(Budget::new(limits)),
            active: AtomicBool::new(false),
            run_depth: AtomicU32::new(0),
            stack_baseline: AtomicUsize::new(0),
            clock_start: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
            operations: AtomicU64::new(0),
            disposables: Mutex::new(HashMap::new()),
        }
    }

    /// Re-arm the guard with fresh limits.
    ///
    /// Counters and collected resources are cleared. Fails with
    /// [`BoxError::GuardActive`] while a run is in progress.
    pub fn initialize(&self, limits: &GuardLimits) -> Result<()> {
        if self.is_active() {
            return Err(BoxError::GuardActive);
        }

        self.budget.store(Arc::new(Budget::new(limits)));
        self.stack_baseline.store(0, Ordering::Release);
        self.clock_start.store(0, Ordering::Release);
        self.allocated.store(0, Ordering::Release);
        self.operations.store(0, Ordering::Release);
        self.disposables.lock().clear();
        Ok(())
    }

    /// Begin a run. The run ends when the returned value is dropped.
    ///
    /// Runs nest: only the outermost start resets the clock and stack
    /// baseline, and only the outermost stop deactivates the guard.
    pub fn start(self: &Arc<Self>) -> ActiveRun {
        if self.run_depth.fetch_add(1, Ordering::AcqRel) == 0 {
            self.clock_start.store(0, Ordering::Release);
            self.stack_baseline.store(0, Ordering::Release);
            self.active.store(true, Ordering::Release);
        }
        ActiveRun {
            guard: Arc::clone(self),
        }
    }

    fn stop(&self) {
        if self.run_depth.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        self.active.store(false, Ordering::Release);

        let disposables: Vec<Arc<dyn Disposable>> =
            self.disposables.lock().drain().map(|(_, d)| d).collect();
        if disposables.is_empty() {
            return;
        }

        let callback = self.budget.load().limits.after_forced_dispose.clone();
        for disposable in disposables {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                disposable.dispose()?;
                if let Some(callback) = &callback {
                    callback(disposable.as_ref());
                }
                Ok::<(), anyhow::Error>(())
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "forced dispose failed"),
                Err(_) => tracing::warn!("forced dispose panicked"),
            }
        }
    }

    /// Method, accessor, lambda or constructor entry.
    pub fn guard_enter(&self) -> GuardResult<()> {
        self.ensure_active()?;
        self.ensure_stack()?;
        self.ensure_time()?;
        self.ensure_rate()
    }

    /// Static initializer entry. Probes on this thread measure stack depth
    /// from here until the matching [`guard_exit_static_init`].
    ///
    /// [`guard_exit_static_init`]: RuntimeGuard::guard_exit_static_init
    pub fn guard_enter_static_init(&self) -> GuardResult<()> {
        self.ensure_active()?;
        self.ensure_time()?;
        self.ensure_rate()?;
        // Only a successful entry is paired with an exit.
        let here = stack_position();
        STATIC_INIT_BASELINES.with(|b| b.borrow_mut().push(here));
        Ok(())
    }

    pub fn guard_exit_static_init(&self) {
        STATIC_INIT_BASELINES.with(|b| {
            b.borrow_mut().pop();
        });
    }

    /// Loop back-edge or jump target.
    pub fn guard_jump(&self) -> GuardResult<()> {
        self.ensure_active()?;
        self.ensure_time()?;
        self.ensure_rate()
    }

    /// Account for `count` freshly allocated objects or array elements.
    pub fn guard_count(&self, count: u64) -> GuardResult<()> {
        self.ensure_active()?;
        self.ensure_time()?;

        let limit = self.budget.load().limits.max_allocations;
        let total = self
            .allocated
            .fetch_add(count, Ordering::AcqRel)
            .saturating_add(count);
        if total > limit {
            return Err(fail(GuardError::Memory { limit }));
        }
        Ok(())
    }

    /// Register a resource to dispose when the run ends. `None` is ignored,
    /// and collecting the same resource twice disposes it once.
    pub fn collect_disposable(&self, disposable: Option<Arc<dyn Disposable>>) {
        let Some(disposable) = disposable else {
            return;
        };
        let key = Arc::as_ptr(&disposable) as *const () as usize;
        self.disposables.lock().entry(key).or_insert(disposable);
    }

    /// Time left before the wall-clock budget runs out.
    ///
    /// The full budget is reported until the first probe of a run starts
    /// the clock.
    pub fn time_until_limit(&self) -> Duration {
        let budget = self.budget.load();
        let start = self.clock_start.load(Ordering::Acquire);
        let elapsed = if start == 0 {
            0
        } else {
            now_ticks().saturating_sub(start)
        };
        Duration::from_nanos(budget.time_ticks.saturating_sub(elapsed))
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Objects plus array elements allocated since the last `initialize`.
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Acquire)
    }

    /// Guarded operations performed since the last `initialize`.
    pub fn operations(&self) -> u64 {
        self.operations.load(Ordering::Acquire)
    }

    pub fn collected_disposables(&self) -> usize {
        self.disposables.lock().len()
    }

    /// A copy of the limits the guard was last initialized with.
    pub fn limits(&self) -> GuardLimits {
        self.budget.load().limits.clone()
    }

    fn ensure_active(&self) -> GuardResult<()> {
        if self.active.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(GuardError::Inactive)
        }
    }

    fn ensure_stack(&self) -> GuardResult<()> {
        let current = stack_position();
        let baseline = STATIC_INIT_BASELINES
            .with(|b| b.borrow().last().copied())
            .unwrap_or_else(|| {
                let _ = self.stack_baseline.compare_exchange(
                    0,
                    current,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                self.stack_baseline.load(Ordering::Acquire)
            });

        let used = baseline.saturating_sub(current) as u64;
        let budget = self.budget.load();
        let normal = budget.limits.stack_bytes;
        if used <= normal {
            return Ok(());
        }
        if !std::thread::panicking() {
            return Err(fail(GuardError::Stack { used, limit: normal }));
        }
        let unwinding = budget.limits.exception_stack_bytes;
        if used > unwinding {
            return Err(fail(GuardError::Stack {
                used,
                limit: unwinding,
            }));
        }
        Ok(())
    }

    fn ensure_time(&self) -> GuardResult<()> {
        let now = now_ticks();
        let start = match self
            .clock_start
            .compare_exchange(0, now, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => now,
            Err(started) => started,
        };

        let budget = self.budget.load();
        if now.saturating_sub(start) > budget.time_ticks {
            return Err(fail(GuardError::Time {
                limit: budget.limits.timeout,
            }));
        }
        Ok(())
    }

    fn ensure_rate(&self) -> GuardResult<()> {
        let count = self.operations.fetch_add(1, Ordering::AcqRel) + 1;
        match self.budget.load().limits.max_operations {
            Some(limit) if count > limit => Err(fail(GuardError::Rate { limit })),
            _ => Ok(()),
        }
    }
}

#[cold]
fn fail(err: GuardError) -> GuardError {
    tracing::warn!(error = %err, "guard limit reached");
    err
}

/// A started run. Dropping it stops the guard, even while unwinding.
#[must_use = "the run stops as soon as this is dropped"]
pub struct ActiveRun {
    guard: GuardHandle,
}

impl ActiveRun {
    pub fn guard(&self) -> &GuardHandle {
        &self.guard
    }
}

impl fmt::Debug for ActiveRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveRun").finish_non_exhaustive()
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.guard.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Resource {
        disposed: AtomicUsize,
        fails: bool,
    }

    impl Resource {
        fn new(fails: bool) -> Arc<Self> {
            Arc::new(Self {
                disposed: AtomicUsize::new(0),
                fails,
            })
        }
    }

    impl Disposable for Resource {
        fn dispose(&self) -> anyhow::Result<()> {
            self.disposed.fetch_add(1, Ordering::SeqCst);
            if self.fails {
                anyhow::bail!("resource refused to close");
            }
            Ok(())
        }
    }

    fn guard(limits: GuardLimits) -> GuardHandle {
        Arc::new(RuntimeGuard::new(&limits))
    }

    #[test]
    fn test_probes_fail_when_inactive() {
        let guard = guard(GuardLimits::default());
        assert_eq!(guard.guard_enter(), Err(GuardError::Inactive));
        assert_eq!(guard.guard_jump(), Err(GuardError::Inactive));
        assert_eq!(guard.guard_count(1), Err(GuardError::Inactive));
    }

    #[test]
    fn test_allocation_ceiling_is_inclusive() {
        let guard = guard(GuardLimits::builder().max_allocations(10).build());
        let _run = guard.start();

        guard.guard_count(10).unwrap();
        let err = guard.guard_count(1).unwrap_err();
        assert!(err.is_memory_limit());
    }

    #[test]
    fn test_time_limit() {
        let guard = guard(GuardLimits::builder().timeout(Duration::from_millis(20)).build());
        let _run = guard.start();

        guard.guard_jump().unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert!(guard.guard_jump().unwrap_err().is_time_limit());
    }

    #[test]
    fn test_clock_starts_on_first_probe() {
        let guard = guard(GuardLimits::builder().timeout(Duration::from_millis(20)).build());
        let _run = guard.start();

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(guard.time_until_limit(), Duration::from_millis(20));
        guard.guard_enter().unwrap();
        assert!(guard.time_until_limit() <= Duration::from_millis(20));
    }

    #[test]
    fn test_huge_timeout_saturates() {
        let guard = guard(GuardLimits::builder().timeout(Duration::MAX).build());
        let _run = guard.start();
        guard.guard_jump().unwrap();
        assert!(guard.time_until_limit() > Duration::from_secs(60 * 60 * 24 * 365));
    }

    #[test]
    fn test_rate_limit_only_when_enabled() {
        let unlimited = guard(GuardLimits::default());
        let run = unlimited.start();
        for _ in 0..1_000 {
            unlimited.guard_jump().unwrap();
        }
        assert_eq!(unlimited.operations(), 1_000);
        drop(run);

        let limited = guard(GuardLimits::builder().max_operations(3).build());
        let _run = limited.start();
        for _ in 0..3 {
            limited.guard_jump().unwrap();
        }
        assert!(limited.guard_jump().unwrap_err().is_rate_limit());
    }

    #[inline(never)]
    fn recurse(guard: &RuntimeGuard, depth: u32) -> GuardResult<u32> {
        guard.guard_enter()?;
        let pad = std::hint::black_box([0u8; 256]);
        let below = recurse(guard, depth + 1)?;
        Ok(below + pad[0] as u32)
    }

    #[test]
    fn test_unbounded_recursion_hits_stack_limit() {
        let guard = guard(GuardLimits::builder().stack_bytes(64 * 1024).build());
        let _run = guard.start();

        let err = recurse(&guard, 0).unwrap_err();
        match err {
            GuardError::Stack { used, limit } => {
                assert_eq!(limit, 64 * 1024);
                assert!(used > limit);
            }
            other => panic!("unexpected failure: {other}"),
        }
    }

    #[test]
    fn test_static_init_uses_its_own_baseline() {
        let guard = guard(GuardLimits::builder().stack_bytes(64 * 1024).build());
        let _run = guard.start();
        guard.guard_enter().unwrap();

        guard.guard_enter_static_init().unwrap();
        guard.guard_enter().unwrap();
        guard.guard_exit_static_init();
        STATIC_INIT_BASELINES.with(|b| assert!(b.borrow().is_empty()));
    }

    fn static_init_depth() -> usize {
        STATIC_INIT_BASELINES.with(|b| b.borrow().len())
    }

    #[test]
    fn test_failed_static_init_entry_leaves_no_baseline() {
        let first = guard(GuardLimits::builder().timeout(Duration::from_millis(5)).build());
        {
            let _run = first.start();
            first.guard_jump().unwrap();
            std::thread::sleep(Duration::from_millis(20));
            let err = first.guard_enter_static_init().unwrap_err();
            assert!(err.is_time_limit());
            assert_eq!(static_init_depth(), 0);
        }

        let rated = guard(GuardLimits::builder().max_operations(1).build());
        {
            let _run = rated.start();
            rated.guard_jump().unwrap();
            assert!(rated.guard_enter_static_init().unwrap_err().is_rate_limit());
            assert_eq!(static_init_depth(), 0);
        }

        // A later guard on this thread measures from its own baseline.
        let second = guard(GuardLimits::builder().stack_bytes(64 * 1024).build());
        let _run = second.start();
        second.guard_enter().unwrap();
        match recurse(&second, 0).unwrap_err() {
            GuardError::Stack { used, limit } => {
                assert_eq!(limit, 64 * 1024);
                assert!(used > limit);
            }
            other => panic!("unexpected failure: {other}"),
        }
    }

    /// Recurse until this frame sits `depth` bytes below the run's baseline,
    /// then probe.
    #[inline(never)]
    fn enter_at_depth(guard: &RuntimeGuard, depth: usize) -> GuardResult<()> {
        let pad = std::hint::black_box([0u8; 512]);
        let baseline = guard.stack_baseline.load(Ordering::Acquire);
        if baseline.saturating_sub(stack_position()) < depth {
            let result = enter_at_depth(guard, depth);
            std::hint::black_box(&pad);
            return result;
        }
        guard.guard_enter()
    }

    /// Probes from its destructor, which runs while a panic unwinds.
    struct ProbeWhileUnwinding {
        guard: GuardHandle,
        results: Arc<Mutex<Vec<GuardResult<()>>>>,
    }

    impl Drop for ProbeWhileUnwinding {
        fn drop(&mut self) {
            assert!(std::thread::panicking());
            let within_exception_budget = enter_at_depth(&self.guard, 64 * 1024);
            let beyond_exception_budget = enter_at_depth(&self.guard, 512 * 1024);
            let mut results = self.results.lock();
            results.push(within_exception_budget);
            results.push(beyond_exception_budget);
        }
    }

    #[test]
    fn test_unwinding_gets_the_exception_stack_budget() {
        let limits = GuardLimits::builder()
            .stack_bytes(16 * 1024)
            .exception_stack_bytes(256 * 1024)
            .build();

        let normal = guard(limits.clone());
        {
            let _run = normal.start();
            normal.guard_enter().unwrap();
            match enter_at_depth(&normal, 64 * 1024) {
                Err(GuardError::Stack { limit, .. }) => assert_eq!(limit, 16 * 1024),
                other => panic!("expected the normal stack limit, got {other:?}"),
            }
        }

        let unwinding = guard(limits);
        let results = Arc::new(Mutex::new(Vec::new()));
        let g = Arc::clone(&unwinding);
        let seen = Arc::clone(&results);
        let outcome = std::thread::Builder::new()
            .stack_size(4 * 1024 * 1024)
            .spawn(move || {
                std::panic::catch_unwind(AssertUnwindSafe(move || {
                    let _run = g.start();
                    g.guard_enter().unwrap();
                    let _probe = ProbeWhileUnwinding {
                        guard: Arc::clone(&g),
                        results: seen,
                    };
                    panic!("guest threw");
                }))
            })
            .unwrap()
            .join()
            .unwrap();
        assert!(outcome.is_err());

        let results = results.lock();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], Ok(()));
        match &results[1] {
            Err(GuardError::Stack { limit, .. }) => assert_eq!(*limit, 256 * 1024),
            other => panic!("expected the exception stack limit, got {other:?}"),
        }
        assert!(!unwinding.is_active());
    }

    #[test]
    fn test_initialize_rejected_while_running() {
        let guard = guard(GuardLimits::default());
        let run = guard.start();
        assert!(matches!(
            guard.initialize(&GuardLimits::default()),
            Err(BoxError::GuardActive)
        ));
        drop(run);
        guard.initialize(&GuardLimits::default()).unwrap();
    }

    #[test]
    fn test_counters_persist_across_runs_until_initialize() {
        let guard = guard(GuardLimits::default());
        for _ in 0..3 {
            let _run = guard.start();
            guard.guard_count(2).unwrap();
        }
        assert_eq!(guard.allocated(), 6);

        guard.initialize(&GuardLimits::default()).unwrap();
        assert_eq!(guard.allocated(), 0);
    }

    #[test]
    fn test_nested_runs_stop_once() {
        let guard = guard(GuardLimits::default());
        let outer = guard.start();
        {
            let _inner = guard.start();
            assert!(guard.is_active());
        }
        assert!(guard.is_active());
        drop(outer);
        assert!(!guard.is_active());
    }

    #[test]
    fn test_stop_disposes_everything_and_swallows_failures() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let guard = guard(
            GuardLimits::builder()
                .after_forced_dispose(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .build(),
        );

        let ok = Resource::new(false);
        let bad = Resource::new(true);
        {
            let _run = guard.start();
            guard.collect_disposable(Some(ok.clone() as Arc<dyn Disposable>));
            guard.collect_disposable(Some(ok.clone() as Arc<dyn Disposable>));
            guard.collect_disposable(Some(bad.clone() as Arc<dyn Disposable>));
            guard.collect_disposable(None);
            assert_eq!(guard.collected_disposables(), 2);
        }

        assert_eq!(ok.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(bad.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(guard.collected_disposables(), 0);
    }

    #[test]
    fn test_run_stops_when_unwinding() {
        let guard = guard(GuardLimits::default());
        let g = Arc::clone(&guard);
        let result = std::panic::catch_unwind(AssertUnwindSafe(move || {
            let _run = g.start();
            panic!("guest blew up");
        }));
        assert!(result.is_err());
        assert!(!guard.is_active());
    }
}
