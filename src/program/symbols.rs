//! Resolved symbols and the symbol tables front ends populate.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::whitelist::rule::{DeclarationId, DeclarationKind};

/// Index of a symbol within a [`SymbolTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);

impl SymbolId {
    /// Position of the symbol in its table.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a symbol denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Namespace,
    Type,
    Method,
    Constructor,
    Field,
    Property,
    Event,
    Local,
    Parameter,
    Label,
}

impl SymbolKind {
    /// Whether references to this kind of symbol are subject to the whitelist.
    pub fn is_policy_relevant(self) -> bool {
        matches!(
            self,
            SymbolKind::Type
                | SymbolKind::Method
                | SymbolKind::Constructor
                | SymbolKind::Field
                | SymbolKind::Property
                | SymbolKind::Event
        )
    }

    /// Whether a symbol of this kind can override a base member.
    pub fn is_overridable(self) -> bool {
        matches!(
            self,
            SymbolKind::Method | SymbolKind::Property | SymbolKind::Event
        )
    }
}

/// A source position. Line and column are 1-based; zero means "no location".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub const NONE: Span = Span { line: 0, column: 0 };

    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    pub fn is_none(&self) -> bool {
        self.line == 0
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A symbol as resolved by the front end.
#[derive(Debug, Clone)]
pub struct ResolvedSymbol {
    /// Simple (unqualified) name.
    pub name: String,
    /// Textual identity; `None` for locals, parameters and labels.
    pub declaration_id: Option<DeclarationId>,
    pub kind: SymbolKind,
    /// Enclosing declaration.
    pub containing: Option<SymbolId>,
    /// Set when this member overrides a base member.
    pub is_override: bool,
    /// The overridden member. May be `None` even when `is_override` is set
    /// if the front end could not resolve it.
    pub overridden: Option<SymbolId>,
    /// The unspecialized definition, for symbols constructed from a generic one.
    pub original_definition: Option<SymbolId>,
    /// Base type, for types.
    pub base_type: Option<SymbolId>,
    pub is_static: bool,
    pub is_public: bool,
    /// Parameter names, for methods and constructors.
    pub parameters: Vec<String>,
    /// Declaration sites.
    pub locations: Vec<Span>,
}

impl ResolvedSymbol {
    pub fn new(kind: SymbolKind, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declaration_id: None,
            kind,
            containing: None,
            is_override: false,
            overridden: None,
            original_definition: None,
            base_type: None,
            is_static: false,
            is_public: true,
            parameters: Vec::new(),
            locations: Vec::new(),
        }
    }

    pub fn with_declaration_id(mut self, id: DeclarationId) -> Self {
        self.declaration_id = Some(id);
        self
    }

    pub fn with_containing(mut self, containing: SymbolId) -> Self {
        self.containing = Some(containing);
        self
    }

    pub fn with_location(mut self, span: Span) -> Self {
        self.locations.push(span);
        self
    }

    pub fn with_parameters<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameters = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn static_member(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn private(mut self) -> Self {
        self.is_public = false;
        self
    }

    /// Human-readable name: the declaration id when there is one.
    pub fn display_name(&self) -> &str {
        self.declaration_id
            .as_ref()
            .map(DeclarationId::qualified_name)
            .unwrap_or(&self.name)
    }
}

/// Arena of resolved symbols with lookup by declaration id.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: Vec<ResolvedSymbol>,
    by_declaration: HashMap<DeclarationId, Vec<SymbolId>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Add a symbol and return its id.
    pub fn insert(&mut self, symbol: ResolvedSymbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        if let Some(decl) = &symbol.declaration_id {
            self.by_declaration.entry(decl.clone()).or_default().push(id);
        }
        self.symbols.push(symbol);
        id
    }

    /// Look up a symbol. Ids from another table may be out of range.
    pub fn get(&self, id: SymbolId) -> Option<&ResolvedSymbol> {
        self.symbols.get(id.index())
    }

    pub fn get_mut(&mut self, id: SymbolId) -> Option<&mut ResolvedSymbol> {
        self.symbols.get_mut(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &ResolvedSymbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolId(i as u32), s))
    }

    /// Resolve a declaration id to the symbols carrying it.
    pub fn resolve(&self, id: &DeclarationId) -> &[SymbolId] {
        self.by_declaration
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Declaration id of a symbol.
    pub fn declaration_id(&self, id: SymbolId) -> Option<&DeclarationId> {
        self.get(id).and_then(|s| s.declaration_id.as_ref())
    }

    pub fn kind(&self, id: SymbolId) -> Option<SymbolKind> {
        self.get(id).map(|s| s.kind)
    }

    /// The unspecialized definition of a symbol (itself when not constructed).
    pub fn original_definition(&self, id: SymbolId) -> SymbolId {
        self.get(id)
            .and_then(|s| s.original_definition)
            .unwrap_or(id)
    }

    /// Enclosing declarations from the innermost outwards, excluding `id`.
    pub fn ancestors(&self, id: SymbolId) -> Ancestors<'_> {
        Ancestors {
            table: self,
            next: self.get(id).and_then(|s| s.containing),
        }
    }

    /// Symbols whose containing symbol is `owner`.
    pub fn members_of(&self, owner: SymbolId) -> impl Iterator<Item = SymbolId> + '_ {
        self.iter()
            .filter(move |(_, s)| s.containing == Some(owner))
            .map(|(id, _)| id)
    }

    /// Types declared directly inside `owner`.
    pub fn nested_types(&self, owner: SymbolId) -> impl Iterator<Item = SymbolId> + '_ {
        self.members_of(owner)
            .filter(|id| self.kind(*id) == Some(SymbolKind::Type))
    }

    /// Define a type named by its qualified name, e.g. `System.Console`.
    pub fn define_type(&mut self, qualified_name: &str, containing: Option<SymbolId>) -> SymbolId {
        let simple = qualified_name.rsplit('.').next().unwrap_or(qualified_name);
        let mut symbol = ResolvedSymbol::new(SymbolKind::Type, simple);
        symbol.declaration_id = DeclarationId::new(DeclarationKind::Type, qualified_name).ok();
        symbol.containing = containing;
        self.insert(symbol)
    }

    /// Define a member of `owner`.
    ///
    /// The declaration id is derived from the owner's qualified name; methods
    /// and constructors get a parenthesized signature when one is given.
    /// Constructors are named `#ctor`.
    pub fn define_member(
        &mut self,
        owner: SymbolId,
        kind: SymbolKind,
        name: &str,
        signature: Option<&str>,
    ) -> SymbolId {
        let owner_name = self
            .declaration_id(owner)
            .map(|d| d.qualified_name().to_string())
            .unwrap_or_default();
        let (tag, name) = match kind {
            SymbolKind::Constructor => (Some(DeclarationKind::Method), "#ctor"),
            SymbolKind::Method => (Some(DeclarationKind::Method), name),
            SymbolKind::Field => (Some(DeclarationKind::Field), name),
            SymbolKind::Property => (Some(DeclarationKind::Property), name),
            SymbolKind::Event => (Some(DeclarationKind::Event), name),
            SymbolKind::Type => (Some(DeclarationKind::Type), name),
            _ => (None, name),
        };
        let mut qualified = if owner_name.is_empty() {
            name.to_string()
        } else {
            format!("{owner_name}.{name}")
        };
        if let (Some(sig), SymbolKind::Method | SymbolKind::Constructor) = (signature, kind) {
            qualified.push('(');
            qualified.push_str(sig);
            qualified.push(')');
        }

        let mut symbol = ResolvedSymbol::new(kind, name).with_containing(owner);
        symbol.declaration_id = tag.and_then(|t| DeclarationId::new(t, &qualified).ok());
        self.insert(symbol)
    }

    /// Define a local, parameter or label.
    pub fn define_local(&mut self, kind: SymbolKind, name: &str) -> SymbolId {
        self.insert(ResolvedSymbol::new(kind, name))
    }

    /// Mark `member` as overriding `base`.
    pub fn set_override(&mut self, member: SymbolId, base: SymbolId) {
        if let Some(symbol) = self.get_mut(member) {
            symbol.is_override = true;
            symbol.overridden = Some(base);
        }
    }

    /// Set the base type of `ty`.
    pub fn set_base_type(&mut self, ty: SymbolId, base: SymbolId) {
        if let Some(symbol) = self.get_mut(ty) {
            symbol.base_type = Some(base);
        }
    }
}

/// Iterator over a symbol's containment chain.
pub struct Ancestors<'a> {
    table: &'a SymbolTable,
    next: Option<SymbolId>,
}

impl Iterator for Ancestors<'_> {
    type Item = SymbolId;

    fn next(&mut self) -> Option<SymbolId> {
        let current = self.next?;
        self.next = self.table.get(current).and_then(|s| s.containing);
        Some(current)
    }
}

/// A named catalog of declarations a front end resolves guest code against.
///
/// Units are cheap to clone and compare by name.
#[derive(Debug, Clone)]
pub struct ReferenceUnit {
    name: Arc<str>,
    symbols: Arc<SymbolTable>,
}

impl ReferenceUnit {
    pub fn new(name: impl Into<Arc<str>>, symbols: SymbolTable) -> Self {
        Self {
            name: name.into(),
            symbols: Arc::new(symbols),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }
}

impl PartialEq for ReferenceUnit {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ReferenceUnit {}

impl PartialOrd for ReferenceUnit {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReferenceUnit {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}
