//! Runtime values of the reference interpreter.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::program::ast::Body;
use crate::program::symbols::SymbolId;

/// A host function bound to a declaration id.
///
/// Receives the receiver (for instance members) and the evaluated arguments.
pub type HostFn = Arc<dyn Fn(Option<&Value>, &[Value]) -> anyhow::Result<Value> + Send + Sync>;

/// An instance of a type declared by the script.
#[derive(Debug)]
pub struct Object {
    pub ty: SymbolId,
    pub fields: Mutex<HashMap<SymbolId, Value>>,
}

/// A lambda together with the locals it captured.
#[derive(Debug)]
pub struct Closure {
    pub params: Vec<SymbolId>,
    pub body: Body,
    pub captured: HashMap<SymbolId, Value>,
    pub this: Option<Value>,
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Str(Arc<str>),
    Array(Arc<Mutex<Vec<Value>>>),
    Object(Arc<Object>),
    Closure(Arc<Closure>),
    /// An opaque host value, such as a globals instance.
    Host(Arc<dyn Any + Send + Sync>),
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(Mutex::new(items)))
    }

    pub fn host<T: Any + Send + Sync>(value: T) -> Self {
        Value::Host(Arc::new(value))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Closure(_) => "delegate",
            Value::Host(_) => "host value",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow a host value of type `T`.
    pub fn downcast_host<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Host(h) => h.downcast_ref(),
            _ => None,
        }
    }

    /// Primitive values compare by value, everything else by identity.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Arc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Array(items) => f.debug_tuple("Array").field(&*items.lock()).finish(),
            Value::Object(o) => write!(f, "Object({})", o.ty),
            Value::Closure(c) => write!(f, "Closure({} params)", c.params.len()),
            Value::Host(_) => f.write_str("Host(..)"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => f.write_str(s),
            other => write!(f, "<{}>", other.type_name()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_and_value_equality() {
        assert_eq!(Value::from(3), Value::Int(3));
        assert_eq!(Value::from("a"), Value::from(String::from("a")));

        let arr = Value::array(vec![Value::Null]);
        assert_eq!(arr.clone(), arr);
        assert_ne!(arr, Value::array(vec![Value::Null]));
    }

    #[test]
    fn test_display_matches_host_formatting() {
        assert_eq!(Value::Bool(true).to_string(), "True");
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::array(vec![]).to_string(), "<array>");
    }

    #[test]
    fn test_host_downcast() {
        struct Globals {
            name: &'static str,
        }
        let v = Value::host(Globals { name: "box" });
        assert_eq!(v.downcast_host::<Globals>().unwrap().name, "box");
        assert!(v.downcast_host::<String>().is_none());
    }
}
