//! The whitelist policy: allow-rules plus the reference units they resolve against.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tokio::io::AsyncBufRead;

use crate::error::Result;
use crate::program::symbols::{ReferenceUnit, SymbolId, SymbolKind, SymbolTable};
use crate::whitelist::file;
use crate::whitelist::rule::{DeclarationId, WhitelistRule};

/// An ordered, de-duplicated set of allow-rules.
///
/// Rules are unique by declaration id. Adding a descendant-including rule for
/// an id that is already present upgrades it; adding a plain rule for an id
/// already present is a no-op.
///
/// # Example
///
/// ```rust
/// use boxguard::whitelist::{WhitelistPolicy, WhitelistRule};
///
/// let mut policy = WhitelistPolicy::new();
/// policy.add_rule(WhitelistRule::parse("T:System.Console", true).unwrap());
/// policy.add_rule(WhitelistRule::parse("T:System.Console", false).unwrap());
///
/// assert_eq!(policy.len(), 1);
/// assert!(policy.rules().next().unwrap().include_descendants);
/// ```
#[derive(Debug, Clone, Default)]
pub struct WhitelistPolicy {
    rules: BTreeMap<DeclarationId, bool>,
    references: BTreeSet<ReferenceUnit>,
}

impl WhitelistPolicy {
    /// Create an empty policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule. Returns `true` if the policy changed.
    pub fn add_rule(&mut self, rule: WhitelistRule) -> bool {
        match self.rules.get_mut(&rule.declaration_id) {
            Some(include) if *include || !rule.include_descendants => false,
            Some(include) => {
                *include = true;
                true
            }
            None => {
                self.rules
                    .insert(rule.declaration_id, rule.include_descendants);
                true
            }
        }
    }

    /// Add every rule from an iterator.
    pub fn extend_rules(&mut self, rules: impl IntoIterator<Item = WhitelistRule>) {
        for rule in rules {
            self.add_rule(rule);
        }
    }

    /// Add a reference unit. Units are de-duplicated by name.
    pub fn add_reference_unit(&mut self, unit: ReferenceUnit) {
        self.references.insert(unit);
    }

    /// Whitelist a type.
    ///
    /// The type's base type and declaring type are whitelisted too (without
    /// descendants), recursively. With `include_descendants`, every nested type
    /// is whitelisted with descendants as well.
    ///
    /// Related types are visited even when the policy already holds a rule
    /// for `ty`, so a rule loaded from a file does not hide its nested types.
    pub fn add_type(&mut self, symbols: &SymbolTable, ty: SymbolId, include_descendants: bool) {
        let mut visited = HashSet::new();
        self.add_type_inner(symbols, ty, include_descendants, &mut visited);
    }

    fn add_type_inner(
        &mut self,
        symbols: &SymbolTable,
        ty: SymbolId,
        include_descendants: bool,
        visited: &mut HashSet<(SymbolId, bool)>,
    ) {
        if !visited.insert((ty, include_descendants)) {
            return;
        }
        let Some(symbol) = symbols.get(ty) else {
            return;
        };
        if symbol.kind != SymbolKind::Type {
            return;
        }
        let Some(id) = symbol.declaration_id.clone() else {
            return;
        };
        self.add_rule(WhitelistRule::new(id, include_descendants));

        if let Some(base) = symbol.base_type {
            self.add_type_inner(symbols, base, false, visited);
        }

        if let Some(declaring) = symbol.containing {
            if symbols.kind(declaring) == Some(SymbolKind::Type) {
                self.add_type_inner(symbols, declaring, false, visited);
            }
        }

        if include_descendants {
            for nested in symbols.nested_types(ty) {
                self.add_type_inner(symbols, nested, true, visited);
            }
        }
    }

    /// Parse rules from UTF-8 text and add them.
    pub async fn load_rules<R>(&mut self, reader: R) -> Result<usize>
    where
        R: AsyncBufRead + Unpin,
    {
        let rules = file::read_rules(reader).await?;
        let count = rules.len();
        self.extend_rules(rules);
        Ok(count)
    }

    /// Iterate the rules in declaration-id order.
    pub fn rules(&self) -> impl Iterator<Item = WhitelistRule> + '_ {
        self.rules
            .iter()
            .map(|(id, include)| WhitelistRule::new(id.clone(), *include))
    }

    /// Look up the rule for a declaration id.
    pub fn rule(&self, id: &DeclarationId) -> Option<WhitelistRule> {
        self.rules
            .get(id)
            .map(|include| WhitelistRule::new(id.clone(), *include))
    }

    /// Iterate the reference units in name order.
    pub fn reference_units(&self) -> impl Iterator<Item = &ReferenceUnit> {
        self.references.iter()
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the policy has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, include: bool) -> WhitelistRule {
        WhitelistRule::parse(id, include).unwrap()
    }

    #[test]
    fn test_duplicate_rules_are_ignored() {
        let mut policy = WhitelistPolicy::new();
        assert!(policy.add_rule(rule("T:System.Console", false)));
        assert!(!policy.add_rule(rule("T:System.Console", false)));
        assert_eq!(policy.len(), 1);
    }

    #[test]
    fn test_descendant_rule_upgrades_plain_rule() {
        let mut policy = WhitelistPolicy::new();
        policy.add_rule(rule("T:System.Console", false));
        assert!(policy.add_rule(rule("T:System.Console", true)));
        assert!(!policy.add_rule(rule("T:System.Console", false)));

        let id = DeclarationId::parse("T:System.Console").unwrap();
        assert!(policy.rule(&id).unwrap().include_descendants);
    }

    #[test]
    fn test_add_type_follows_base_declaring_and_nested_types() {
        let mut symbols = SymbolTable::new();
        let object = symbols.define_type("System.Object", None);
        let outer = symbols.define_type("Lib.Outer", None);
        let target = symbols.define_type("Lib.Outer.Target", Some(outer));
        let nested = symbols.define_type("Lib.Outer.Target.Helper", Some(target));
        symbols.define_type("Lib.Outer.Target.Helper.Node", Some(nested));
        symbols.set_base_type(target, object);

        let mut policy = WhitelistPolicy::new();
        policy.add_type(&symbols, target, true);

        let rules: Vec<String> = policy.rules().map(|r| r.to_string()).collect();
        assert_eq!(
            rules,
            vec![
                "T:Lib.Outer",
                "T:Lib.Outer.Target.*",
                "T:Lib.Outer.Target.Helper.*",
                "T:Lib.Outer.Target.Helper.Node.*",
                "T:System.Object",
            ]
        );
    }

    #[test]
    fn test_add_type_after_loaded_descendant_rule_still_adds_nested_types() {
        let mut symbols = SymbolTable::new();
        let object = symbols.define_type("System.Object", None);
        let target = symbols.define_type("Lib.Target", None);
        symbols.define_type("Lib.Target.Helper", Some(target));
        symbols.set_base_type(target, object);

        let mut policy = WhitelistPolicy::new();
        policy.add_rule(rule("T:Lib.Target", true));
        policy.add_type(&symbols, target, true);

        let rules: Vec<String> = policy.rules().map(|r| r.to_string()).collect();
        assert_eq!(
            rules,
            vec!["T:Lib.Target.*", "T:Lib.Target.Helper.*", "T:System.Object"]
        );
    }

    #[test]
    fn test_add_type_without_descendants_skips_nested_types() {
        let mut symbols = SymbolTable::new();
        let target = symbols.define_type("Lib.Target", None);
        symbols.define_type("Lib.Target.Helper", Some(target));

        let mut policy = WhitelistPolicy::new();
        policy.add_type(&symbols, target, false);
        assert_eq!(policy.len(), 1);
    }

    #[test]
    fn test_reference_units_dedupe_by_name() {
        let mut policy = WhitelistPolicy::new();
        policy.add_reference_unit(ReferenceUnit::new("corlib", SymbolTable::new()));
        policy.add_reference_unit(ReferenceUnit::new("corlib", SymbolTable::new()));
        policy.add_reference_unit(ReferenceUnit::new("console", SymbolTable::new()));

        let names: Vec<&str> = policy.reference_units().map(ReferenceUnit::name).collect();
        assert_eq!(names, vec!["console", "corlib"]);
    }

    #[tokio::test]
    async fn test_load_rules_from_stream() {
        let text = "# allowed\nT:System.Console.*\n\nM:System.Math.Abs(System.Int32)\n";
        let mut policy = WhitelistPolicy::new();
        let count = policy.load_rules(text.as_bytes()).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(policy.len(), 2);
    }
}
