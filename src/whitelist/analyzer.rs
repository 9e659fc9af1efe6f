//! Checks a guest program against a whitelist policy.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{BoxError, Result};
use crate::program::ast::{Program, SymbolRef};
use crate::program::symbols::{Span, SymbolId, SymbolTable};
use crate::program::visit::{walk_program, Visitor};
use crate::whitelist::policy::WhitelistPolicy;
use crate::whitelist::rule::DeclarationId;

/// A reference to a symbol the policy does not permit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyViolation {
    symbol: SymbolId,
    declaration_id: Option<DeclarationId>,
    reference: Span,
    locations: Vec<Span>,
    message: String,
}

impl PolicyViolation {
    fn new(symbols: &SymbolTable, symbol: SymbolId, reference: Span) -> Self {
        let resolved = symbols.get(symbol);
        let declaration_id = resolved.and_then(|s| s.declaration_id.clone());
        let locations = resolved.map(|s| s.locations.clone()).unwrap_or_default();
        let shown = declaration_id
            .as_ref()
            .map(|d| d.to_string())
            .or_else(|| resolved.map(|s| s.name.clone()))
            .unwrap_or_else(|| symbol.to_string());

        Self {
            symbol,
            declaration_id,
            reference,
            locations,
            message: format!("Symbol is not whitelisted: {shown}"),
        }
    }

    /// The offending symbol.
    pub fn symbol(&self) -> SymbolId {
        self.symbol
    }

    /// Its declaration id, when it has one.
    pub fn declaration_id(&self) -> Option<&DeclarationId> {
        self.declaration_id.as_ref()
    }

    /// Where the symbol was first referenced in the guest code.
    pub fn reference(&self) -> Span {
        self.reference
    }

    /// Every declaration site of the symbol.
    pub fn locations(&self) -> &[Span] {
        &self.locations
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Walks a program and reports every reference to a symbol that is neither
/// whitelisted nor declared by the submission.
#[derive(Debug, Clone)]
pub struct WhitelistAnalyzer {
    policy: Arc<WhitelistPolicy>,
}

impl WhitelistAnalyzer {
    pub fn new(policy: Arc<WhitelistPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &WhitelistPolicy {
        &self.policy
    }

    /// Analyze `program`, treating `declared` as implicitly permitted.
    ///
    /// Each offending symbol is reported once, however often it is referenced.
    /// Fails with [`BoxError::EmptyPolicy`] when no rule resolves to a symbol
    /// of the program.
    pub fn analyze(
        &self,
        program: &Program,
        declared: &HashSet<SymbolId>,
    ) -> Result<Vec<PolicyViolation>> {
        let symbols = &program.symbols;

        let mut granted: HashMap<SymbolId, bool> = HashMap::new();
        for rule in self.policy.rules() {
            for symbol in symbols.resolve(&rule.declaration_id) {
                granted.insert(*symbol, rule.include_descendants);
            }
        }
        if granted.is_empty() {
            return Err(BoxError::EmptyPolicy);
        }

        let mut references = References::new(symbols);
        walk_program(&mut references, program);

        let mut check = Check {
            symbols,
            declared,
            granted,
        };
        let mut reported = HashSet::new();
        let mut violations = Vec::new();

        for (symbol, span) in references.unique {
            let chain = override_chain(symbols, symbol);
            if chain.iter().any(|s| check.is_permitted(*s)) {
                continue;
            }
            for s in chain {
                if reported.insert(s) {
                    violations.push(PolicyViolation::new(symbols, s, span));
                }
            }
        }

        tracing::trace!(violations = violations.len(), "whitelist analysis finished");
        Ok(violations)
    }
}

/// Collects each policy-relevant symbol once, in first-reference order.
struct References<'a> {
    symbols: &'a SymbolTable,
    seen: HashSet<SymbolId>,
    unique: Vec<(SymbolId, Span)>,
}

impl<'a> References<'a> {
    fn new(symbols: &'a SymbolTable) -> Self {
        Self {
            symbols,
            seen: HashSet::new(),
            unique: Vec::new(),
        }
    }
}

impl Visitor for References<'_> {
    fn visit_symbol_ref(&mut self, reference: &SymbolRef) {
        let relevant = self
            .symbols
            .kind(reference.symbol)
            .is_some_and(|k| k.is_policy_relevant());
        if relevant && self.seen.insert(reference.symbol) {
            self.unique.push((reference.symbol, reference.span));
        }
    }
}

/// The symbol's definition followed by each member it overrides.
fn override_chain(symbols: &SymbolTable, symbol: SymbolId) -> Vec<SymbolId> {
    let mut chain = Vec::new();
    let mut current = Some(symbols.original_definition(symbol));

    while let Some(s) = current {
        // Guard against cyclic override data from a confused front end.
        if chain.contains(&s) {
            break;
        }
        chain.push(s);
        current = symbols
            .get(s)
            .filter(|resolved| resolved.is_override && resolved.kind.is_overridable())
            .and_then(|resolved| resolved.overridden)
            .map(|overridden| symbols.original_definition(overridden));
    }

    chain
}

struct Check<'a> {
    symbols: &'a SymbolTable,
    declared: &'a HashSet<SymbolId>,
    granted: HashMap<SymbolId, bool>,
}

impl Check<'_> {
    fn is_permitted(&mut self, symbol: SymbolId) -> bool {
        if self.declared.contains(&symbol) || self.granted.contains_key(&symbol) {
            return true;
        }

        let inherited = self
            .symbols
            .ancestors(symbol)
            .any(|ancestor| self.granted.get(&ancestor).copied().unwrap_or(false));

        if inherited {
            // Grants this symbol only; its own descendants still resolve
            // through the ancestor that carries the descendant rule.
            self.granted.insert(symbol, false);
        }
        inherited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ast::{Block, Expr, Stmt};
    use crate::program::symbols::SymbolKind;
    use crate::whitelist::rule::WhitelistRule;

    fn policy(rules: &[(&str, bool)]) -> Arc<WhitelistPolicy> {
        let mut policy = WhitelistPolicy::new();
        for (id, include) in rules {
            policy.add_rule(WhitelistRule::parse(id, *include).unwrap());
        }
        Arc::new(policy)
    }

    fn calls(program: &mut Program, targets: &[SymbolId]) {
        program.body = Block::new(
            targets
                .iter()
                .enumerate()
                .map(|(i, t)| Stmt::Expr(Expr::call(*t, Span::new(i as u32 + 1, 1), vec![])))
                .collect(),
        );
    }

    #[test]
    fn test_empty_resolved_policy_is_a_configuration_error() {
        let mut symbols = SymbolTable::new();
        symbols.define_type("System.Console", None);
        let program = Program::new(symbols);

        let analyzer = WhitelistAnalyzer::new(policy(&[("T:Not.There", true)]));
        let err = analyzer.analyze(&program, &HashSet::new()).unwrap_err();
        assert!(matches!(err, BoxError::EmptyPolicy));
    }

    #[test]
    fn test_repeated_references_report_once() {
        let mut symbols = SymbolTable::new();
        let console = symbols.define_type("System.Console", None);
        let write = symbols.define_member(console, SymbolKind::Method, "WriteLine", None);
        let file = symbols.define_type("System.IO.File", None);
        let delete = symbols.define_member(file, SymbolKind::Method, "Delete", Some("System.String"));

        let mut program = Program::new(symbols);
        calls(&mut program, &[write, delete, delete, delete]);

        let analyzer = WhitelistAnalyzer::new(policy(&[("M:System.Console.WriteLine", false)]));
        let violations = analyzer.analyze(&program, &HashSet::new()).unwrap();

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].symbol(), delete);
        assert_eq!(violations[0].reference(), Span::new(2, 1));
        assert_eq!(
            violations[0].message(),
            "Symbol is not whitelisted: M:System.IO.File.Delete(System.String)"
        );
    }

    #[test]
    fn test_descendant_grant_covers_siblings_without_overgranting() {
        let mut symbols = SymbolTable::new();
        let math = symbols.define_type("System.Math", None);
        let abs = symbols.define_member(math, SymbolKind::Method, "Abs", None);
        let max = symbols.define_member(math, SymbolKind::Method, "Max", None);
        let nested = symbols.define_type("System.Math.Cache", Some(math));
        let clear = symbols.define_member(nested, SymbolKind::Method, "Clear", None);
        let other = symbols.define_type("System.Other", None);
        let danger = symbols.define_member(other, SymbolKind::Method, "Danger", None);

        let mut program = Program::new(symbols);
        calls(&mut program, &[abs, max, clear, danger]);

        let analyzer = WhitelistAnalyzer::new(policy(&[("T:System.Math", true)]));
        let violations = analyzer.analyze(&program, &HashSet::new()).unwrap();
        let flagged: Vec<SymbolId> = violations.iter().map(PolicyViolation::symbol).collect();
        assert_eq!(flagged, vec![danger]);
    }

    #[test]
    fn test_plain_type_rule_does_not_grant_members() {
        let mut symbols = SymbolTable::new();
        let math = symbols.define_type("System.Math", None);
        let abs = symbols.define_member(math, SymbolKind::Method, "Abs", None);

        let mut program = Program::new(symbols);
        calls(&mut program, &[abs]);

        let analyzer = WhitelistAnalyzer::new(policy(&[("T:System.Math", false)]));
        let violations = analyzer.analyze(&program, &HashSet::new()).unwrap();
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn test_override_of_permitted_member_is_permitted() {
        let mut symbols = SymbolTable::new();
        let base = symbols.define_type("Lib.Base", None);
        let base_run = symbols.define_member(base, SymbolKind::Method, "Run", None);
        let derived = symbols.define_type("Lib.Derived", None);
        let derived_run = symbols.define_member(derived, SymbolKind::Method, "Run", None);
        symbols.set_override(derived_run, base_run);

        let mut program = Program::new(symbols);
        calls(&mut program, &[derived_run]);

        let analyzer = WhitelistAnalyzer::new(policy(&[("M:Lib.Base.Run", false)]));
        assert!(analyzer.analyze(&program, &HashSet::new()).unwrap().is_empty());
    }

    #[test]
    fn test_unpermitted_override_chain_reports_every_link() {
        let mut symbols = SymbolTable::new();
        let base = symbols.define_type("Lib.Base", None);
        let base_run = symbols.define_member(base, SymbolKind::Method, "Run", None);
        let derived = symbols.define_type("Lib.Derived", None);
        let derived_run = symbols.define_member(derived, SymbolKind::Method, "Run", None);
        symbols.set_override(derived_run, base_run);
        symbols.define_type("System.Console", None);

        let mut program = Program::new(symbols);
        calls(&mut program, &[derived_run, base_run]);

        let analyzer = WhitelistAnalyzer::new(policy(&[("T:System.Console", true)]));
        let violations = analyzer.analyze(&program, &HashSet::new()).unwrap();
        let flagged: Vec<SymbolId> = violations.iter().map(PolicyViolation::symbol).collect();
        assert_eq!(flagged, vec![derived_run, base_run]);
    }

    #[test]
    fn test_locally_declared_symbols_are_permitted() {
        let mut symbols = SymbolTable::new();
        symbols.define_type("System.Console", None);
        let script = symbols.define_type("Script.Helper", None);
        let helper = symbols.define_member(script, SymbolKind::Method, "Go", None);

        let mut program = Program::new(symbols);
        calls(&mut program, &[helper]);
        let declared: HashSet<SymbolId> = [script, helper].into_iter().collect();

        let analyzer = WhitelistAnalyzer::new(policy(&[("T:System.Console", false)]));
        assert!(analyzer.analyze(&program, &declared).unwrap().is_empty());
    }

    #[test]
    fn test_constructed_symbols_check_their_original_definition() {
        let mut symbols = SymbolTable::new();
        let list = symbols.define_type("System.Collections.Generic.List`1", None);
        let add = symbols.define_member(list, SymbolKind::Method, "Add", Some("`0"));
        let mut constructed = symbols.get(add).unwrap().clone();
        constructed.declaration_id = None;
        constructed.original_definition = Some(add);
        let add_int = symbols.insert(constructed);

        let mut program = Program::new(symbols);
        calls(&mut program, &[add_int]);

        let analyzer = WhitelistAnalyzer::new(policy(&[(
            "T:System.Collections.Generic.List`1",
            true,
        )]));
        assert!(analyzer.analyze(&program, &HashSet::new()).unwrap().is_empty());
    }
}
