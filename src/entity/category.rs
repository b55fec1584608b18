//! File bucket categories
//!
//! IDs match the wire/attribute representation (`Category` attribute).

use serde::{Deserialize, Serialize};
use std::fmt;

/// The six file buckets of a change record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum Category {
    /// Source files compiled on the host
    Source = 0,
    /// Schema deltas (force a library compile)
    Delta = 1,
    /// Setup scripts
    Setup = 2,
    /// Undo scripts
    Undo = 3,
    /// Data files
    Data = 4,
    /// Files impacted by an include source file
    Impact = 5,
}

impl Category {
    pub const COUNT: usize = 6;

    pub const ALL: [Category; Category::COUNT] = [
        Category::Source,
        Category::Delta,
        Category::Setup,
        Category::Undo,
        Category::Data,
        Category::Impact,
    ];

    #[inline]
    pub fn id(&self) -> i32 {
        *self as i32
    }

    #[inline]
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(Category::Source),
            1 => Some(Category::Delta),
            2 => Some(Category::Setup),
            3 => Some(Category::Undo),
            4 => Some(Category::Data),
            5 => Some(Category::Impact),
            _ => None,
        }
    }

    /// Label used in release summaries
    pub fn label(&self) -> &'static str {
        match self {
            Category::Source => "SOURCE",
            Category::Delta => "DELTAS",
            Category::Setup => "SETUPS",
            Category::Undo => "UNDOS",
            Category::Data => "DATA",
            Category::Impact => "IMPACT",
        }
    }

    /// Default directory files of this category are picked from
    pub fn default_source_dir(&self) -> &'static str {
        match self {
            Category::Source => "/g1/dev/source",
            Category::Delta => "/g1/dev/schema/delta",
            Category::Setup | Category::Undo | Category::Data => "/g1/dev/spec",
            Category::Impact => "/g1/adp/source",
        }
    }

    /// Default destination directory on the QA side
    pub fn default_destination(&self) -> &'static str {
        match self {
            Category::Source => "source",
            Category::Delta => "delta",
            Category::Setup | Category::Undo | Category::Data => "setup",
            Category::Impact => "",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl TryFrom<i32> for Category {
    type Error = ();

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Category::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_ids() {
        for (i, cat) in Category::ALL.iter().enumerate() {
            assert_eq!(cat.index(), i);
            assert_eq!(Category::from_id(cat.id()), Some(*cat));
        }
        assert_eq!(Category::from_id(6), None);
        assert_eq!(Category::from_id(-1), None);
    }

    #[test]
    fn test_directories() {
        assert_eq!(Category::Undo.default_source_dir(), "/g1/dev/spec");
        assert_eq!(Category::Data.default_destination(), "setup");
        assert_eq!(Category::Impact.default_destination(), "");
        assert_eq!(Category::Delta.to_string(), "DELTAS");
    }
}
