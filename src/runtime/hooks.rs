//! Entry points called by instrumented guest code.
//!
//! Emitters lower each accounting call the instrumentation pass inserted to
//! one of these functions. The value hooks hand their operand back so they
//! can wrap an expression without changing its type.

use std::sync::Arc;

use crate::error::{GuardResult, Result};
use crate::runtime::guard::{Disposable, GuardHandle, RuntimeGuard};
use crate::runtime::registry::{GuardId, GuardRegistry};

/// Something whose allocation size is an element count.
pub trait Counted {
    fn element_count(&self) -> u64;
}

impl<T> Counted for [T] {
    fn element_count(&self) -> u64 {
        self.len() as u64
    }
}

impl<T> Counted for Vec<T> {
    fn element_count(&self) -> u64 {
        self.len() as u64
    }
}

impl<T> Counted for Box<[T]> {
    fn element_count(&self) -> u64 {
        self.len() as u64
    }
}

impl<T, const N: usize> Counted for [T; N] {
    fn element_count(&self) -> u64 {
        N as u64
    }
}

/// Initializer of the generated guard field.
pub fn init_static_field(registry: &GuardRegistry, gid: GuardId) -> Result<GuardHandle> {
    registry.get(gid)
}

#[inline]
pub fn enter_method(guard: &RuntimeGuard) -> GuardResult<()> {
    guard.guard_enter()
}

#[inline]
pub fn enter_static_init(guard: &RuntimeGuard) -> GuardResult<()> {
    guard.guard_enter_static_init()
}

#[inline]
pub fn exit_static_init(guard: &RuntimeGuard) {
    guard.guard_exit_static_init()
}

#[inline]
pub fn before_jump(guard: &RuntimeGuard) -> GuardResult<()> {
    guard.guard_jump()
}

#[inline]
pub fn after_new_object<T>(guard: &RuntimeGuard, object: T) -> GuardResult<T> {
    guard.guard_count(1)?;
    Ok(object)
}

#[inline]
pub fn after_new_array<T: Counted + ?Sized>(guard: &RuntimeGuard, array: &T) -> GuardResult<()> {
    guard.guard_count(array.element_count())
}

/// Passes `value` through. Suspension points are not accounted yet.
#[inline]
pub fn before_await<T>(_guard: &RuntimeGuard, value: T) -> T {
    value
}

/// Passes `value` through. Suspension points are not accounted yet.
#[inline]
pub fn after_await<T>(_guard: &RuntimeGuard, value: T) -> T {
    value
}

/// Register `resource` for disposal when the run ends and hand it back.
pub fn collect_disposable<D>(guard: &RuntimeGuard, resource: Arc<D>) -> Arc<D>
where
    D: Disposable + 'static,
{
    guard.collect_disposable(Some(Arc::clone(&resource) as Arc<dyn Disposable>));
    resource
}
