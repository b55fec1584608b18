//! Release file
//!
//! A single file destined for QA: name, size, category, source/destination
//! directories and compile flags. Files compare by name only.
//!
//! Impact links are stored as file names, never as references: a source
//! file lists the names of the files it impacts, an impacted file lists the
//! names of its parents. Both ends live in the same change record, so a deep
//! copy of the record is a plain `clone()`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use super::attr::{AttrKind, AttrValue, Attributes, kind_matches};
use super::category::Category;

pub const FILE_NAME: &str = "File Name";
pub const INCLUDE: &str = "Include";
pub const SOURCE: &str = "Source";
pub const DESTINATION: &str = "Destination";
pub const SIZE: &str = "Size";
pub const CATEGORY: &str = "Category";
pub const WEB_SPEED: &str = "WebSpeed";
pub const ASYNC: &str = "Async";
pub const HOST: &str = "Host";
pub const RUN: &str = "Run";
pub const REFERENCE: &str = "Reference";
pub const DIRECTORY: &str = "Directory";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseFile {
    pub name: String,
    pub include: bool,
    pub source: String,
    pub destination: String,
    pub size: u64,
    pub category: Category,
    pub web_speed: bool,
    pub async_compile: bool,
    pub host: bool,
    pub run: bool,
    pub directory: bool,
    /// Names of files (in the Impact bucket) impacted by this file
    pub impacts: Vec<String>,
    /// Names of the files impacting this one (Impact bucket only)
    pub parents: Vec<String>,
    /// Number of included parents (Impact bucket only, maintained by the record)
    references: i32,
}

impl ReleaseFile {
    /// Create a new file with given name, size and category
    pub fn new(name: impl Into<String>, size: u64, category: Category) -> Self {
        Self {
            name: name.into(),
            include: false,
            source: String::new(),
            destination: String::new(),
            size,
            category,
            web_speed: false,
            async_compile: false,
            host: true,
            run: false,
            directory: false,
            impacts: Vec::new(),
            parents: Vec::new(),
            references: 0,
        }
    }

    /// Create a file placed in its category's default directories
    pub fn with_defaults(name: impl Into<String>, size: u64, category: Category) -> Self {
        let mut file = Self::new(name, size, category);
        file.source = category.default_source_dir().to_string();
        file.destination = category.default_destination().to_string();
        file
    }

    #[inline]
    pub fn is_impacted(&self) -> bool {
        self.category == Category::Impact
    }

    /// Include files (`.i`) are the only files that impact others
    pub fn is_include_source(&self) -> bool {
        self.name.ends_with(".i")
    }

    /// Effective include flag. Impacted files are included through their parents.
    pub fn included(&self) -> bool {
        if self.is_impacted() {
            self.references > 0
        } else {
            self.include
        }
    }

    /// Number of included parents
    #[inline]
    pub fn references(&self) -> i32 {
        self.references
    }

    pub(crate) fn set_references(&mut self, references: i32) {
        self.references = references.max(0);
    }

    /// Wanted by a transfer request: included or flagged to run
    #[inline]
    pub fn selected(&self) -> bool {
        self.included() || self.run
    }

    pub(crate) fn add_impact(&mut self, impacted: &str) -> bool {
        if self.impacts.iter().any(|n| n == impacted) {
            return false;
        }
        self.impacts.push(impacted.to_string());
        true
    }

    pub(crate) fn add_parent(&mut self, parent: &str) -> bool {
        if !self.is_impacted() || self.parents.iter().any(|n| n == parent) {
            return false;
        }
        self.parents.push(parent.to_string());
        true
    }

    pub(crate) fn remove_parent(&mut self, parent: &str) -> bool {
        let before = self.parents.len();
        self.parents.retain(|n| n != parent);
        self.parents.len() != before
    }
}

impl PartialEq for ReleaseFile {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ReleaseFile {}

impl PartialOrd for ReleaseFile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReleaseFile {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl fmt::Display for ReleaseFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl Attributes for ReleaseFile {
    fn kind_of(&self, key: &str) -> Option<AttrKind> {
        match key {
            FILE_NAME | SOURCE | DESTINATION => Some(AttrKind::Str),
            INCLUDE | WEB_SPEED | ASYNC | HOST | RUN | DIRECTORY => Some(AttrKind::Bool),
            CATEGORY | REFERENCE => Some(AttrKind::Int),
            SIZE => Some(AttrKind::Size),
            _ => None,
        }
    }

    fn get(&self, key: &str) -> Option<AttrValue> {
        let value = match key {
            FILE_NAME => AttrValue::Str(self.name.clone()),
            SOURCE => AttrValue::Str(self.source.clone()),
            DESTINATION => AttrValue::Str(self.destination.clone()),
            INCLUDE => AttrValue::Bool(self.included()),
            WEB_SPEED => AttrValue::Bool(self.web_speed),
            ASYNC => AttrValue::Bool(self.async_compile),
            HOST => AttrValue::Bool(self.host),
            RUN => AttrValue::Bool(self.run),
            DIRECTORY => AttrValue::Bool(self.directory),
            CATEGORY => AttrValue::Int(self.category.id()),
            REFERENCE => AttrValue::Int(self.references),
            SIZE => AttrValue::Size(self.size),
            _ => return None,
        };
        Some(value)
    }

    fn set(&mut self, key: &str, value: AttrValue) -> bool {
        if !kind_matches(self, key, &value) {
            return false;
        }
        match (key, value) {
            (FILE_NAME, AttrValue::Str(s)) => self.name = s,
            (SOURCE, AttrValue::Str(s)) => self.source = s,
            (DESTINATION, AttrValue::Str(s)) => self.destination = s,
            // derived for impacted files
            (INCLUDE, AttrValue::Bool(_)) if self.is_impacted() => return false,
            (INCLUDE, AttrValue::Bool(b)) => self.include = b,
            (WEB_SPEED, AttrValue::Bool(b)) => self.web_speed = b,
            (ASYNC, AttrValue::Bool(b)) => self.async_compile = b,
            (HOST, AttrValue::Bool(b)) => self.host = b,
            (RUN, AttrValue::Bool(b)) => self.run = b,
            (DIRECTORY, AttrValue::Bool(b)) => self.directory = b,
            (CATEGORY, AttrValue::Int(id)) => match Category::from_id(id) {
                Some(cat) => self.category = cat,
                None => return false,
            },
            (SIZE, AttrValue::Size(s)) => self.size = s,
            // REFERENCE is derived
            _ => return false,
        }
        true
    }
}
