//! Payload values
//!
//! The closed set of values that travel after an action or result code.
//! Overloaded actions (`Add`, `Delete`, `BeginOrClaimTransfer`) match on the
//! variant; anything they do not list is a validation error.

use serde::{Deserialize, Serialize};

use crate::entity::{ChangeRecord, TransferRequest, User};

/// Deepest `List` nesting accepted from the wire
pub const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Null,
    Bool(bool),
    Int(i32),
    Size(u64),
    Str(String),
    ChangeRecord(ChangeRecord),
    Request(TransferRequest),
    User(User),
    List(#[serde(deserialize_with = "nesting::deserialize")] Vec<Payload>),
}

/// Bounds list nesting while decoding so a hostile frame fails cleanly
/// instead of exhausting the decoder's stack.
mod nesting {
    use serde::de::{Deserialize, Deserializer, Error};
    use std::cell::Cell;

    use super::{MAX_NESTING, Payload};

    thread_local! {
        static DEPTH: Cell<usize> = const { Cell::new(0) };
    }

    struct Level;

    impl Level {
        fn enter() -> Option<Self> {
            DEPTH.with(|depth| {
                let next = depth.get() + 1;
                if next > MAX_NESTING {
                    return None;
                }
                depth.set(next);
                Some(Level)
            })
        }
    }

    impl Drop for Level {
        fn drop(&mut self) {
            DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Payload>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let _level = Level::enter()
            .ok_or_else(|| D::Error::custom(format!("lists nested deeper than {}", MAX_NESTING)))?;
        Vec::<Payload>::deserialize(deserializer)
    }
}

impl Payload {
    /// Variant name used in logs and validation messages
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Null => "null",
            Payload::Bool(_) => "bool",
            Payload::Int(_) => "int",
            Payload::Size(_) => "size",
            Payload::Str(_) => "string",
            Payload::ChangeRecord(_) => "change_record",
            Payload::Request(_) => "transfer_request",
            Payload::User(_) => "user",
            Payload::List(_) => "list",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Payload::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Payload::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Payload::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Payload]> {
        match self {
            Payload::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_list(self) -> Option<Vec<Payload>> {
        match self {
            Payload::List(items) => Some(items),
            _ => None,
        }
    }

    /// Strings of a `List[Str..]`; `None` if any element is not a string
    pub fn into_strings(self) -> Option<Vec<String>> {
        self.into_list()?
            .into_iter()
            .map(|p| match p {
                Payload::Str(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    /// Requests of a `List[Request..]`; `None` if any element is not a request
    pub fn into_requests(self) -> Option<Vec<TransferRequest>> {
        self.into_list()?
            .into_iter()
            .map(|p| match p {
                Payload::Request(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn into_change_records(self) -> Option<Vec<ChangeRecord>> {
        self.into_list()?
            .into_iter()
            .map(|p| match p {
                Payload::ChangeRecord(c) => Some(c),
                _ => None,
            })
            .collect()
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Payload::Bool(b)
    }
}

impl From<i32> for Payload {
    fn from(i: i32) -> Self {
        Payload::Int(i)
    }
}

impl From<u64> for Payload {
    fn from(s: u64) -> Self {
        Payload::Size(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Str(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Str(s)
    }
}

impl From<ChangeRecord> for Payload {
    fn from(c: ChangeRecord) -> Self {
        Payload::ChangeRecord(c)
    }
}

impl From<TransferRequest> for Payload {
    fn from(r: TransferRequest) -> Self {
        Payload::Request(r)
    }
}

impl From<User> for Payload {
    fn from(u: User) -> Self {
        Payload::User(u)
    }
}

impl<T: Into<Payload>> From<Vec<T>> for Payload {
    fn from(items: Vec<T>) -> Self {
        Payload::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Payload>> From<Option<T>> for Payload {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Payload::Null)
    }
}

/// One directory entry as reported by `ListDirectory`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

impl RemoteFile {
    /// File name without its directory
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Decode a `List[Str, Bool, Size]` entry
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        match payload.as_list()? {
            [Payload::Str(path), Payload::Bool(is_dir), Payload::Size(size)] => Some(Self {
                path: path.clone(),
                is_dir: *is_dir,
                size: *size,
            }),
            _ => None,
        }
    }
}

impl From<RemoteFile> for Payload {
    fn from(f: RemoteFile) -> Self {
        Payload::List(vec![
            Payload::Str(f.path),
            Payload::Bool(f.is_dir),
            Payload::Size(f.size),
        ])
    }
}
