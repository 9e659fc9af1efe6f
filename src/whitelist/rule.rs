//! Declaration ids and whitelist rules.
//!
//! A declaration id is the textual identity of a declaration: a one-letter
//! kind tag, a colon, then the qualified name (and signature, for methods),
//! e.g. `T:System.Console` or `M:System.Console.WriteLine(System.String)`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::BoxError;

/// The kind tag of a declaration id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeclarationKind {
    /// `T:` a type.
    Type,
    /// `F:` a field.
    Field,
    /// `E:` an event.
    Event,
    /// `P:` a property.
    Property,
    /// `M:` a method or constructor.
    Method,
}

impl DeclarationKind {
    /// The tag character used in the textual form.
    pub fn tag(self) -> char {
        match self {
            DeclarationKind::Type => 'T',
            DeclarationKind::Field => 'F',
            DeclarationKind::Event => 'E',
            DeclarationKind::Property => 'P',
            DeclarationKind::Method => 'M',
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'T' => Some(DeclarationKind::Type),
            b'F' => Some(DeclarationKind::Field),
            b'E' => Some(DeclarationKind::Event),
            b'P' => Some(DeclarationKind::Property),
            b'M' => Some(DeclarationKind::Method),
            _ => None,
        }
    }

    /// Sort rank used after the name, so a type sorts before its members.
    fn rank(self) -> u8 {
        match self {
            DeclarationKind::Type => 0,
            DeclarationKind::Field => 1,
            DeclarationKind::Event => 2,
            DeclarationKind::Property => 3,
            DeclarationKind::Method => 4,
        }
    }
}

/// A validated declaration id.
///
/// Ordering compares the qualified name first and the kind second, so when a
/// rule set is written out each type is immediately followed by its members.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct DeclarationId(String);

impl DeclarationId {
    /// Parse and validate a declaration id.
    pub fn parse(text: &str) -> Result<Self, BoxError> {
        let bytes = text.as_bytes();
        if bytes.len() < 3 || bytes[1] != b':' || DeclarationKind::from_tag(bytes[0]).is_none() {
            return Err(BoxError::MalformedDeclarationId(text.to_string()));
        }
        Ok(Self(text.to_string()))
    }

    /// Build an id from a kind and a qualified name.
    pub fn new(kind: DeclarationKind, qualified_name: &str) -> Result<Self, BoxError> {
        Self::parse(&format!("{}:{}", kind.tag(), qualified_name))
    }

    /// The kind tag of this id.
    pub fn kind(&self) -> DeclarationKind {
        // Validated in `parse`.
        DeclarationKind::from_tag(self.0.as_bytes()[0]).unwrap_or(DeclarationKind::Type)
    }

    /// Everything after the `K:` prefix.
    pub fn qualified_name(&self) -> &str {
        &self.0[2..]
    }

    /// The type name, if this id names a type.
    pub fn type_name(&self) -> Option<&str> {
        (self.kind() == DeclarationKind::Type).then(|| self.qualified_name())
    }

    /// Whether this id names a type.
    pub fn is_type(&self) -> bool {
        self.kind() == DeclarationKind::Type
    }

    /// The full textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for DeclarationId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.qualified_name()
            .cmp(other.qualified_name())
            .then_with(|| self.kind().rank().cmp(&other.kind().rank()))
    }
}

impl PartialOrd for DeclarationId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DeclarationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeclarationId {
    type Err = BoxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DeclarationId {
    type Error = BoxError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DeclarationId> for String {
    fn from(id: DeclarationId) -> Self {
        id.0
    }
}

/// A single allow-rule.
///
/// With `include_descendants` set, every declaration nested anywhere under
/// `declaration_id` is permitted as well.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WhitelistRule {
    /// The declaration this rule permits.
    pub declaration_id: DeclarationId,
    /// Whether nested declarations are permitted too.
    pub include_descendants: bool,
}

impl WhitelistRule {
    /// Create a rule.
    pub fn new(declaration_id: DeclarationId, include_descendants: bool) -> Self {
        Self {
            declaration_id,
            include_descendants,
        }
    }

    /// Parse the id and create a rule.
    pub fn parse(declaration_id: &str, include_descendants: bool) -> Result<Self, BoxError> {
        Ok(Self::new(DeclarationId::parse(declaration_id)?, include_descendants))
    }
}

impl fmt::Display for WhitelistRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.include_descendants {
            write!(f, "{}.*", self.declaration_id)
        } else {
            write!(f, "{}", self.declaration_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_ids() {
        let id = DeclarationId::parse("M:System.Console.WriteLine(System.String)").unwrap();
        assert_eq!(id.kind(), DeclarationKind::Method);
        assert_eq!(id.qualified_name(), "System.Console.WriteLine(System.String)");
        assert!(id.type_name().is_none());

        let ty: DeclarationId = "T:System.Console".parse().unwrap();
        assert!(ty.is_type());
        assert_eq!(ty.type_name(), Some("System.Console"));
    }

    #[test]
    fn test_parse_rejects_malformed_ids() {
        for bad in ["", "T:", "System.Console", "X:System.Console", "T-System"] {
            assert!(
                matches!(DeclarationId::parse(bad), Err(BoxError::MalformedDeclarationId(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_type_sorts_before_its_members() {
        let mut ids: Vec<DeclarationId> = [
            "M:System.Console.WriteLine(System.String)",
            "P:System.Console.Out",
            "T:System.Console",
            "F:System.Console.Out",
            "T:System.Collections.Generic.List`1",
        ]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();
        ids.sort();

        let sorted: Vec<&str> = ids.iter().map(DeclarationId::as_str).collect();
        assert_eq!(
            sorted,
            vec![
                "T:System.Collections.Generic.List`1",
                "T:System.Console",
                "F:System.Console.Out",
                "P:System.Console.Out",
                "M:System.Console.WriteLine(System.String)",
            ]
        );
    }

    #[test]
    fn test_rule_display() {
        let rule = WhitelistRule::parse("T:System.Math", true).unwrap();
        assert_eq!(rule.to_string(), "T:System.Math.*");
        let rule = WhitelistRule::parse("T:System.Math", false).unwrap();
        assert_eq!(rule.to_string(), "T:System.Math");
    }
}
