//! Compile results and compiled scripts.

use crate::compiler::diagnostics::Diagnostic;
use crate::compiler::interfaces::ScriptUnit;
use crate::error::Result;
use crate::runtime::context::ScriptContext;
use crate::runtime::guard::GuardHandle;
use crate::runtime::registry::{GidReservation, GuardId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CompileStatus {
    Success,
    Failed,
}

/// Outcome of [`BoxCompiler::compile`](crate::compiler::BoxCompiler::compile).
#[derive(Debug)]
pub struct CompileResult<U: ScriptUnit> {
    status: CompileStatus,
    diagnostics: Vec<Diagnostic>,
    script: Option<BoxScript<U>>,
}

impl<U: ScriptUnit> CompileResult<U> {
    pub(crate) fn success(diagnostics: Vec<Diagnostic>, script: BoxScript<U>) -> Self {
        Self {
            status: CompileStatus::Success,
            diagnostics,
            script: Some(script),
        }
    }

    pub(crate) fn failed(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            status: CompileStatus::Failed,
            diagnostics,
            script: None,
        }
    }

    pub fn status(&self) -> CompileStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == CompileStatus::Success
    }

    /// All diagnostics, in the order they were reported.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Only the error diagnostics.
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn script(&self) -> Option<&BoxScript<U>> {
        self.script.as_ref()
    }

    pub fn into_script(self) -> Option<BoxScript<U>> {
        self.script
    }
}

/// A compiled script bound to its guard.
///
/// The guard id is released when the script is dropped.
pub struct BoxScript<U: ScriptUnit> {
    context: ScriptContext,
    unit: U,
    // Dropped last so the id outlives everything that refers to it.
    reservation: GidReservation,
}

impl<U: ScriptUnit> std::fmt::Debug for BoxScript<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxScript")
            .field("gid", &self.reservation.gid())
            .finish_non_exhaustive()
    }
}

impl<U: ScriptUnit> BoxScript<U> {
    pub(crate) fn new(reservation: GidReservation, unit: U) -> Self {
        let context = ScriptContext::new(reservation.gid(), reservation.guard().clone());
        Self {
            context,
            unit,
            reservation,
        }
    }

    pub fn gid(&self) -> GuardId {
        self.reservation.gid()
    }

    pub fn guard(&self) -> &GuardHandle {
        self.reservation.guard()
    }

    /// The context runs of this script execute in.
    pub fn context(&self) -> &ScriptContext {
        &self.context
    }

    pub fn unit(&self) -> &U {
        &self.unit
    }

    /// Run the script's top-level code.
    ///
    /// The guard is started for the duration of the run and stopped however
    /// it ends. Allocation and operation counts carry over from earlier runs
    /// until [`reset_budget`](BoxScript::reset_budget) is called.
    pub async fn run(&self, globals: Option<U::Globals>) -> Result<U::Output> {
        let gid = self.gid();
        tracing::debug!(%gid, "running script");

        let result = self.context.run(self.unit.entry(globals)).await;
        match &result {
            Ok(_) => tracing::debug!(%gid, "script finished"),
            Err(e) => tracing::debug!(%gid, error = %e, "script failed"),
        }
        result
    }

    /// Give the next run a fresh allocation and operation budget.
    ///
    /// Fails with [`BoxError::GuardActive`](crate::error::BoxError::GuardActive)
    /// while a run is in progress.
    pub fn reset_budget(&self) -> Result<()> {
        let guard = self.guard();
        guard.initialize(&guard.limits())
    }
}
