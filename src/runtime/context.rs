//! The script that is currently running.
//!
//! Each run installs its [`ScriptContext`] in a task-local scope, so the
//! context follows the run across `.await` points and thread hops and is
//! restored when the run ends, however it ends.

use std::cell::RefCell;
use std::future::Future;
use std::sync::Weak;

use crate::error::{BoxError, Result};
use crate::runtime::guard::{GuardHandle, RuntimeGuard};
use crate::runtime::registry::GuardId;

tokio::task_local! {
    static CURRENT_SCRIPT: ScriptContext;
}

thread_local! {
    /// The guard most recently resolved by `current_guard` on this thread.
    static LAST_RESOLVED: RefCell<Option<(GuardId, Weak<RuntimeGuard>)>> =
        const { RefCell::new(None) };
}

/// A guard id paired with its guard.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    gid: GuardId,
    guard: GuardHandle,
}

impl ScriptContext {
    pub fn new(gid: GuardId, guard: GuardHandle) -> Self {
        Self { gid, guard }
    }

    pub fn gid(&self) -> GuardId {
        self.gid
    }

    pub fn guard(&self) -> &GuardHandle {
        &self.guard
    }

    /// Drive `fut` as a run of this script.
    ///
    /// The guard is started before the first poll and stopped when the run
    /// completes, fails, or is dropped.
    pub async fn run<F>(&self, fut: F) -> F::Output
    where
        F: Future,
    {
        let guard = self.guard.clone();
        CURRENT_SCRIPT
            .scope(self.clone(), async move {
                forget_last_resolved();
                let _run = guard.start();
                let output = fut.await;
                forget_last_resolved();
                output
            })
            .await
    }

    /// Synchronous counterpart of [`run`](ScriptContext::run), used when
    /// guest code calls back into a host function that re-enters a script.
    pub fn run_sync<R>(&self, f: impl FnOnce() -> R) -> R {
        CURRENT_SCRIPT.sync_scope(self.clone(), || {
            forget_last_resolved();
            let _run = self.guard.start();
            let output = f();
            forget_last_resolved();
            output
        })
    }
}

/// The context of the running script, if any.
pub fn current() -> Option<ScriptContext> {
    CURRENT_SCRIPT.try_with(ScriptContext::clone).ok()
}

/// Like [`current`], but fails with [`BoxError::NoCurrentContext`].
pub fn current_ensured() -> Result<ScriptContext> {
    current().ok_or(BoxError::NoCurrentContext)
}

/// Resolve the guard for code compiled against `gid`, checking that it is
/// running inside its own script.
///
/// The running context is checked on every call. A run that hops threads
/// can leave a memo behind on the thread it left, so the memo only saves
/// cloning the handle out of the context.
pub fn current_guard(gid: GuardId) -> Result<GuardHandle> {
    let running = CURRENT_SCRIPT
        .try_with(ScriptContext::gid)
        .map_err(|_| BoxError::NoCurrentContext)?;
    if running != gid {
        forget_last_resolved();
        return Err(BoxError::IllegalContextSwitch {
            expected: gid,
            actual: running,
        });
    }

    let memo = LAST_RESOLVED.with(|last| {
        last.borrow()
            .as_ref()
            .filter(|(last_gid, _)| *last_gid == gid)
            .and_then(|(_, guard)| guard.upgrade())
    });
    if let Some(guard) = memo {
        return Ok(guard);
    }

    let guard = CURRENT_SCRIPT
        .try_with(|context| context.guard.clone())
        .map_err(|_| BoxError::NoCurrentContext)?;
    LAST_RESOLVED.with(|last| {
        *last.borrow_mut() = Some((gid, GuardHandle::downgrade(&guard)));
    });
    Ok(guard)
}

fn forget_last_resolved() {
    LAST_RESOLVED.with(|last| last.borrow_mut().take());
}

/// Bind a host callback to the script running right now.
///
/// When guest code later invokes the returned function, `f` runs as a
/// nested run of the capturing script. Outside of any script, `f` is called
/// as is.
pub fn with_script_context<A, R, F>(f: F) -> impl Fn(A) -> R + Send + Sync
where
    F: Fn(A) -> R + Send + Sync,
{
    let captured = current();
    move |arg| match &captured {
        Some(context) => context.run_sync(|| f(arg)),
        None => f(arg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::limits::GuardLimits;
    use crate::runtime::registry::GuardRegistry;

    fn context(registry: &GuardRegistry) -> ScriptContext {
        let (gid, guard) = registry.allocate(&GuardLimits::default()).unwrap();
        ScriptContext::new(gid, guard)
    }

    #[tokio::test]
    async fn test_run_installs_and_restores_context() {
        let registry = GuardRegistry::new();
        let ctx = context(&registry);
        assert!(current().is_none());

        let seen = ctx
            .run(async {
                tokio::task::yield_now().await;
                current().map(|c| c.gid())
            })
            .await;

        assert_eq!(seen, Some(ctx.gid()));
        assert!(current().is_none());
        assert!(!ctx.guard().is_active());
    }

    #[tokio::test]
    async fn test_nested_runs_restore_outer_context() {
        let registry = GuardRegistry::new();
        let outer = context(&registry);
        let inner = context(&registry);

        outer
            .run(async {
                let nested = inner.run_sync(|| current().map(|c| c.gid()));
                assert_eq!(nested, Some(inner.gid()));
                assert_eq!(current().map(|c| c.gid()), Some(outer.gid()));
                assert!(outer.guard().is_active());
            })
            .await;
    }

    #[test]
    fn test_current_guard_detects_context_switch() {
        let registry = GuardRegistry::new();
        let a = context(&registry);
        let b = context(&registry);

        assert!(matches!(
            current_guard(a.gid()),
            Err(BoxError::NoCurrentContext)
        ));

        a.run_sync(|| {
            assert!(std::sync::Arc::ptr_eq(
                &current_guard(a.gid()).unwrap(),
                a.guard()
            ));
            // memoized
            assert!(current_guard(a.gid()).is_ok());

            match current_guard(b.gid()) {
                Err(BoxError::IllegalContextSwitch { expected, actual }) => {
                    assert_eq!(expected, b.gid());
                    assert_eq!(actual, a.gid());
                }
                other => panic!("unexpected lookup result: {other:?}"),
            }
        });

        assert!(current_guard(a.gid()).is_err());
    }

    #[test]
    fn test_memo_left_by_another_run_does_not_bypass_context_check() {
        let registry = GuardRegistry::new();
        let a = context(&registry);
        let b = context(&registry);

        b.run_sync(|| {
            // What a run of `a` that moved to another thread leaves here.
            LAST_RESOLVED.with(|last| {
                *last.borrow_mut() = Some((a.gid(), GuardHandle::downgrade(a.guard())));
            });

            match current_guard(a.gid()) {
                Err(BoxError::IllegalContextSwitch { expected, actual }) => {
                    assert_eq!(expected, a.gid());
                    assert_eq!(actual, b.gid());
                }
                other => panic!("unexpected lookup result: {other:?}"),
            }
            assert!(LAST_RESOLVED.with(|last| last.borrow().is_none()));
        });

        LAST_RESOLVED.with(|last| {
            *last.borrow_mut() = Some((a.gid(), GuardHandle::downgrade(a.guard())));
        });
        assert!(matches!(
            current_guard(a.gid()),
            Err(BoxError::NoCurrentContext)
        ));
        forget_last_resolved();
    }

    #[test]
    fn test_with_script_context_reenters_capturing_script() {
        let registry = GuardRegistry::new();
        let ctx = context(&registry);

        let callback = ctx.run_sync(|| {
            with_script_context(|n: u32| (current().map(|c| c.gid()), n * 2))
        });

        assert!(!ctx.guard().is_active());
        let (gid, doubled) = callback(21);
        assert_eq!(gid, Some(ctx.gid()));
        assert_eq!(doubled, 42);
        assert!(!ctx.guard().is_active());

        let plain = with_script_context(|n: u32| current().map(|_| n));
        assert_eq!(plain(1), None);
    }
}
