//! Attribute façade
//!
//! Entities are typed records internally. The protocol still addresses
//! individual attributes by name, so every entity exposes a narrow
//! `get`/`set` pair over a kind-erased [`AttrValue`].

use std::fmt;

/// Declared kind of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Str,
    Bool,
    Int,
    Size,
}

impl AttrKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttrKind::Str => "string",
            AttrKind::Bool => "boolean",
            AttrKind::Int => "integer",
            AttrKind::Size => "size",
        }
    }
}

impl fmt::Display for AttrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind-erased attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Str(String),
    Bool(bool),
    Int(i32),
    Size(u64),
}

impl AttrValue {
    pub fn kind(&self) -> AttrKind {
        match self {
            AttrValue::Str(_) => AttrKind::Str,
            AttrValue::Bool(_) => AttrKind::Bool,
            AttrValue::Int(_) => AttrKind::Int,
            AttrValue::Size(_) => AttrKind::Size,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            AttrValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_size(&self) -> Option<u64> {
        match self {
            AttrValue::Size(s) => Some(*s),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<i32> for AttrValue {
    fn from(i: i32) -> Self {
        AttrValue::Int(i)
    }
}

impl From<u64> for AttrValue {
    fn from(s: u64) -> Self {
        AttrValue::Size(s)
    }
}

/// Named attribute access shared by every entity
pub trait Attributes {
    /// Declared kind of `key`, or `None` if the entity has no such attribute
    fn kind_of(&self, key: &str) -> Option<AttrKind>;

    /// Current value of `key`, or `None` if the entity has no such attribute
    fn get(&self, key: &str) -> Option<AttrValue>;

    /// Store `value` under `key`.
    ///
    /// Returns false (and leaves the entity untouched) if the key is unknown,
    /// read-only, or the value's kind does not match the declared kind.
    fn set(&mut self, key: &str, value: AttrValue) -> bool;
}

/// Shared kind check used by the `set` implementations
#[inline]
pub(crate) fn kind_matches<A: Attributes + ?Sized>(entity: &A, key: &str, value: &AttrValue) -> bool {
    entity.kind_of(key) == Some(value.kind())
}
