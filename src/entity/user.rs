//! QARS users
//!
//! A login name mapped to the exec identity used when running release
//! tooling, plus an optional security level.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::attr::{AttrKind, AttrValue, Attributes, kind_matches};

pub const LOGIN: &str = "Login";
pub const EXEC_ID: &str = "Exec ID";
pub const SECURITY: &str = "Security";

/// Wire code carried when no security level is set
pub const SECURITY_UNSET: i32 = -2;

/// Ordered from least to most privileged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SecurityLevel {
    NoAccess,
    Developer,
    QaAssociate,
    Administrator,
}

impl SecurityLevel {
    pub fn code(&self) -> i32 {
        match self {
            SecurityLevel::NoAccess => -14,
            SecurityLevel::Developer => 0,
            SecurityLevel::QaAssociate => 1,
            SecurityLevel::Administrator => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -14 => Some(SecurityLevel::NoAccess),
            0 => Some(SecurityLevel::Developer),
            1 => Some(SecurityLevel::QaAssociate),
            2 => Some(SecurityLevel::Administrator),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityLevel::NoAccess => "no_access",
            SecurityLevel::Developer => "developer",
            SecurityLevel::QaAssociate => "qa_associate",
            SecurityLevel::Administrator => "administrator",
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i32> for SecurityLevel {
    type Error = ();

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        SecurityLevel::from_code(value).ok_or(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub login: String,
    pub exec_identity: String,
    pub security: Option<SecurityLevel>,
}

impl User {
    pub fn new(login: impl Into<String>, exec_identity: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            exec_identity: exec_identity.into(),
            security: None,
        }
    }

    /// A login the roster does not know: no exec identity, no security level
    pub fn unknown(login: impl Into<String>) -> Self {
        Self::new(login, "")
    }

    pub fn with_security(mut self, security: SecurityLevel) -> Self {
        self.security = Some(security);
        self
    }

    /// Security level as carried on the wire
    pub fn security_code(&self) -> i32 {
        self.security.map(|s| s.code()).unwrap_or(SECURITY_UNSET)
    }

    /// Whether this user can run release tooling
    pub fn is_recognized(&self) -> bool {
        !self.exec_identity.is_empty()
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.login == other.login
    }
}

impl Eq for User {}

impl PartialOrd for User {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for User {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.login.cmp(&other.login)
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.login)
    }
}

impl Attributes for User {
    fn kind_of(&self, key: &str) -> Option<AttrKind> {
        match key {
            LOGIN | EXEC_ID => Some(AttrKind::Str),
            SECURITY => Some(AttrKind::Int),
            _ => None,
        }
    }

    fn get(&self, key: &str) -> Option<AttrValue> {
        match key {
            LOGIN => Some(AttrValue::Str(self.login.clone())),
            EXEC_ID => Some(AttrValue::Str(self.exec_identity.clone())),
            SECURITY => Some(AttrValue::Int(self.security_code())),
            _ => None,
        }
    }

    fn set(&mut self, key: &str, value: AttrValue) -> bool {
        if !kind_matches(self, key, &value) {
            return false;
        }
        match (key, value) {
            (LOGIN, AttrValue::Str(s)) => self.login = s,
            (EXEC_ID, AttrValue::Str(s)) => self.exec_identity = s,
            (SECURITY, AttrValue::Int(SECURITY_UNSET)) => self.security = None,
            (SECURITY, AttrValue::Int(code)) => match SecurityLevel::from_code(code) {
                Some(level) => self.security = Some(level),
                None => return false,
            },
            _ => return false,
        }
        true
    }
}
