//! Run-time resource accounting for instrumented guest code.

pub mod context;
pub mod guard;
pub mod hooks;
pub mod limits;
pub mod registry;

pub use context::{current, current_guard, with_script_context, ScriptContext};
pub use guard::{ActiveRun, Disposable, GuardHandle, RuntimeGuard};
pub use hooks::Counted;
pub use limits::{GuardLimits, GuardLimitsBuilder};
pub use registry::{global_registry, GidReservation, GuardId, GuardRegistry};
