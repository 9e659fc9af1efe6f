//! The compile pipeline: parse, check against the whitelist, instrument, emit.

use std::sync::Arc;

use crate::compiler::diagnostics::{has_errors, Diagnostic};
use crate::compiler::interfaces::{Emitter, FrontEnd, ScriptUnit};
use crate::compiler::script::{BoxScript, CompileResult};
use crate::error::{BoxError, Result};
use crate::instrument::instrument;
use crate::program::symbols::ReferenceUnit;
use crate::runtime::limits::GuardLimits;
use crate::runtime::registry::{global_registry, GuardRegistry};
use crate::whitelist::analyzer::WhitelistAnalyzer;
use crate::whitelist::policy::WhitelistPolicy;
use crate::whitelist::rule::DeclarationId;

/// Compiles guest scripts under a fixed whitelist policy and guard limits.
///
/// The policy is copied on construction; later changes to the caller's
/// policy do not affect the compiler.
pub struct BoxCompiler<F, E> {
    policy: Arc<WhitelistPolicy>,
    references: Vec<ReferenceUnit>,
    limits: GuardLimits,
    registry: Arc<GuardRegistry>,
    analyzer: WhitelistAnalyzer,
    front_end: F,
    emitter: E,
}

impl<F, E> std::fmt::Debug for BoxCompiler<F, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxCompiler")
            .field("rules", &self.policy.len())
            .field("references", &self.references.len())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl<F: FrontEnd, E: Emitter> BoxCompiler<F, E> {
    /// Create a compiler using the process-wide guard registry.
    pub fn new(policy: &WhitelistPolicy, limits: GuardLimits, front_end: F, emitter: E) -> Self {
        let policy = Arc::new(policy.clone());
        Self {
            references: policy.reference_units().cloned().collect(),
            analyzer: WhitelistAnalyzer::new(Arc::clone(&policy)),
            policy,
            limits,
            registry: global_registry(),
            front_end,
            emitter,
        }
    }

    /// Allocate guards from `registry` instead of the process-wide one.
    pub fn with_registry(mut self, registry: Arc<GuardRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn policy(&self) -> &WhitelistPolicy {
        &self.policy
    }

    pub fn limits(&self) -> &GuardLimits {
        &self.limits
    }

    pub fn registry(&self) -> &Arc<GuardRegistry> {
        &self.registry
    }

    /// Compile `source`.
    ///
    /// Problems with the guest code come back as diagnostics on a failed
    /// result and no guard is allocated for them. `Err` is reserved for
    /// host-side failures: a front end that could not run, a policy that
    /// resolves to nothing, or an exhausted registry.
    pub fn compile(
        &self,
        source: &str,
        globals: Option<&DeclarationId>,
    ) -> Result<CompileResult<E::Unit>> {
        let parsed = self
            .front_end
            .parse(source, &self.references, globals)
            .map_err(BoxError::FrontEnd)?;

        let mut diagnostics = parsed.diagnostics;
        let violations = self
            .analyzer
            .analyze(&parsed.program, &parsed.program.declared)?;
        diagnostics.extend(violations.iter().map(Diagnostic::from));

        if has_errors(&diagnostics) {
            tracing::debug!(
                violations = violations.len(),
                diagnostics = diagnostics.len(),
                "compile rejected"
            );
            return Ok(CompileResult::failed(diagnostics));
        }

        let reservation = self.registry.reserve(&self.limits)?;
        let gid = reservation.gid();
        let program = instrument(parsed.program, gid, parsed.globals);

        let mut unit = match self.emitter.emit(program, &self.references) {
            Ok(unit) => unit,
            Err(errors) => {
                diagnostics.extend(errors);
                tracing::debug!(%gid, diagnostics = diagnostics.len(), "emit failed");
                // Dropping the reservation releases the id.
                return Ok(CompileResult::failed(diagnostics));
            }
        };
        unit.bind_guard(&self.registry, gid)?;

        tracing::debug!(%gid, diagnostics = diagnostics.len(), "compiled script");
        Ok(CompileResult::success(
            diagnostics,
            BoxScript::new(reservation, unit),
        ))
    }
}

