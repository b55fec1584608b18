//! Change Record (SCR)
//!
//! A named unit of work with six categorized file buckets. Records compare
//! by identifier, case-insensitively.
//!
//! # Impact policy
//!
//! Impacted files are kept by reachability: a file stays in the `Impact`
//! bucket while at least one parent links to it and is dropped when the last
//! parent unlinks. Whether it is included is derived from its parents: it is
//! included iff at least one parent is included.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use super::attr::{AttrKind, AttrValue, Attributes, kind_matches};
use super::category::Category;
use super::file::ReleaseFile;

pub const SCR: &str = "SCR";
pub const AUTHOR: &str = "Author";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    id: String,
    author: String,
    buckets: [Vec<ReleaseFile>; Category::COUNT],
}

impl ChangeRecord {
    pub fn new(id: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            buckets: Default::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    /// Replace the author, returning the previous one
    pub fn set_author(&mut self, author: impl Into<String>) -> String {
        std::mem::replace(&mut self.author, author.into())
    }

    /// Case-insensitive identifier match
    pub fn same_id(&self, id: &str) -> bool {
        self.id.eq_ignore_ascii_case(id)
    }

    pub fn files(&self, category: Category) -> &[ReleaseFile] {
        &self.buckets[category.index()]
    }

    pub fn file(&self, category: Category, name: &str) -> Option<&ReleaseFile> {
        self.buckets[category.index()].iter().find(|f| f.name == name)
    }

    pub fn file_count(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    /// Add a file to its category's bucket. A file with the same name is replaced.
    ///
    /// Returns the replaced file, if any.
    pub fn add_file(&mut self, file: ReleaseFile) -> Option<ReleaseFile> {
        let bucket = &mut self.buckets[file.category.index()];
        let previous = bucket
            .iter()
            .position(|f| f.name == file.name)
            .map(|i| bucket.remove(i));
        bucket.push(file);
        self.recompute_references();
        previous
    }

    /// Remove a file by name from a bucket, dropping any impact links through it.
    pub fn remove_file(&mut self, category: Category, name: &str) -> Option<ReleaseFile> {
        let index = self.buckets[category.index()]
            .iter()
            .position(|f| f.name == name)?;

        if category != Category::Impact {
            self.unlink_impact(name);
        }
        let removed = self.buckets[category.index()].remove(index);

        if category == Category::Impact {
            for parent in &removed.parents {
                if let Some(p) = self.parent_mut(parent) {
                    p.impacts.retain(|n| n != name);
                }
            }
        }
        self.recompute_references();
        Some(removed)
    }

    /// Link `impacted` as impacted by the (non-impact) file named `parent`.
    ///
    /// The impacted file is created in the `Impact` bucket when missing.
    /// Returns false if the parent does not exist or the link already existed.
    pub fn link_impact(&mut self, parent: &str, impacted: &str) -> bool {
        match self.parent_mut(parent) {
            Some(p) => {
                if !p.add_impact(impacted) {
                    return false;
                }
            }
            None => return false,
        }

        let bucket = &mut self.buckets[Category::Impact.index()];
        let index = match bucket.iter().position(|f| f.name == impacted) {
            Some(i) => i,
            None => {
                bucket.push(ReleaseFile::with_defaults(impacted, 0, Category::Impact));
                bucket.len() - 1
            }
        };
        bucket[index].add_parent(parent);
        self.recompute_references();
        true
    }

    /// Drop every impact link from `parent`.
    ///
    /// Impacted files left without parents are removed; their names are returned.
    pub fn unlink_impact(&mut self, parent: &str) -> Vec<String> {
        let impacts = match self.parent_mut(parent) {
            Some(p) => std::mem::take(&mut p.impacts),
            None => return Vec::new(),
        };

        let bucket = &mut self.buckets[Category::Impact.index()];
        for name in &impacts {
            if let Some(f) = bucket.iter_mut().find(|f| &f.name == name) {
                f.remove_parent(parent);
            }
        }
        let mut orphaned = Vec::new();
        bucket.retain(|f| {
            if f.parents.is_empty() {
                orphaned.push(f.name.clone());
                false
            } else {
                true
            }
        });
        self.recompute_references();
        orphaned
    }

    /// Set a file attribute through the façade, keeping impact inclusion consistent.
    pub fn set_file_attr(
        &mut self,
        category: Category,
        name: &str,
        key: &str,
        value: AttrValue,
    ) -> bool {
        // category moves would desynchronize the buckets
        if key == super::file::CATEGORY {
            return false;
        }
        let ok = match self.buckets[category.index()]
            .iter_mut()
            .find(|f| f.name == name)
        {
            Some(f) => f.set(key, value),
            None => false,
        };
        if ok {
            self.recompute_references();
        }
        ok
    }

    /// Reset include/run selection on every file
    pub fn clear_selection(&mut self) {
        for bucket in self.buckets.iter_mut() {
            for f in bucket.iter_mut() {
                f.include = false;
                f.run = false;
            }
        }
        self.recompute_references();
    }

    fn parent_mut(&mut self, name: &str) -> Option<&mut ReleaseFile> {
        self.buckets
            .iter_mut()
            .take(Category::Impact.index())
            .flat_map(|b| b.iter_mut())
            .find(|f| f.name == name)
    }

    fn is_parent_included(&self, name: &str) -> bool {
        self.buckets
            .iter()
            .take(Category::Impact.index())
            .flat_map(|b| b.iter())
            .any(|f| f.name == name && f.include)
    }

    fn recompute_references(&mut self) {
        let counts: Vec<i32> = self.buckets[Category::Impact.index()]
            .iter()
            .map(|f| {
                f.parents
                    .iter()
                    .filter(|p| self.is_parent_included(p))
                    .count() as i32
            })
            .collect();
        for (f, count) in self.buckets[Category::Impact.index()]
            .iter_mut()
            .zip(counts)
        {
            f.set_references(count);
        }
    }
}

impl PartialEq for ChangeRecord {
    fn eq(&self, other: &Self) -> bool {
        self.same_id(&other.id)
    }
}

impl Eq for ChangeRecord {}

impl PartialOrd for ChangeRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChangeRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id
            .to_ascii_lowercase()
            .cmp(&other.id.to_ascii_lowercase())
    }
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl Attributes for ChangeRecord {
    fn kind_of(&self, key: &str) -> Option<AttrKind> {
        match key {
            SCR | AUTHOR => Some(AttrKind::Str),
            _ => None,
        }
    }

    fn get(&self, key: &str) -> Option<AttrValue> {
        match key {
            SCR => Some(AttrValue::Str(self.id.clone())),
            AUTHOR => Some(AttrValue::Str(self.author.clone())),
            _ => None,
        }
    }

    fn set(&mut self, key: &str, value: AttrValue) -> bool {
        if !kind_matches(self, key, &value) {
            return false;
        }
        match (key, value) {
            (SCR, AttrValue::Str(s)) => self.id = s,
            (AUTHOR, AttrValue::Str(s)) => self.author = s,
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn include_file(name: &str) -> ReleaseFile {
        let mut f = ReleaseFile::with_defaults(name, 100, Category::Source);
        f.include = true;
        f
    }

    #[test]
    fn test_identifier_case_insensitive() {
        let a = ChangeRecord::new("CR100", "alice");
        let b = ChangeRecord::new("cr100", "bob");
        assert_eq!(a, b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert!(ChangeRecord::new("CR099", "x") < ChangeRecord::new("cr100", "x"));
    }

    #[test]
    fn test_add_replaces_same_name() {
        let mut scr = ChangeRecord::new("CR1", "alice");
        assert!(scr.add_file(ReleaseFile::new("a.p", 1, Category::Source)).is_none());
        let prev = scr.add_file(ReleaseFile::new("a.p", 2, Category::Source));
        assert_eq!(prev.map(|f| f.size), Some(1));
        assert_eq!(scr.files(Category::Source).len(), 1);
        assert_eq!(scr.files(Category::Source)[0].size, 2);
        // same name in another bucket is a different file
        scr.add_file(ReleaseFile::new("a.p", 3, Category::Data));
        assert_eq!(scr.file_count(), 2);
    }

    #[test]
    fn test_impact_reachability() {
        let mut scr = ChangeRecord::new("CR1", "alice");
        scr.add_file(include_file("common.i"));
        scr.add_file(include_file("header.i"));

        assert!(scr.link_impact("common.i", "report.p"));
        assert!(scr.link_impact("header.i", "report.p"));
        assert!(!scr.link_impact("common.i", "report.p"));
        assert!(!scr.link_impact("missing.i", "report.p"));

        let report = scr.file(Category::Impact, "report.p").unwrap();
        assert_eq!(report.parents.len(), 2);
        assert_eq!(report.references(), 2);
        assert!(report.included());

        assert!(scr.unlink_impact("common.i").is_empty());
        assert!(scr.file(Category::Impact, "report.p").is_some());

        assert_eq!(scr.unlink_impact("header.i"), vec!["report.p".to_string()]);
        assert!(scr.file(Category::Impact, "report.p").is_none());
    }

    #[test]
    fn test_impact_inclusion_follows_parents() {
        let mut scr = ChangeRecord::new("CR1", "alice");
        scr.add_file(include_file("common.i"));
        scr.link_impact("common.i", "report.p");

        assert!(scr.set_file_attr(Category::Source, "common.i", "Include", AttrValue::Bool(false)));
        let report = scr.file(Category::Impact, "report.p").unwrap();
        assert!(!report.included());
        // still reachable
        assert_eq!(report.parents, vec!["common.i".to_string()]);

        scr.set_file_attr(Category::Source, "common.i", "Include", AttrValue::Bool(true));
        assert!(scr.file(Category::Impact, "report.p").unwrap().included());
    }

    #[test]
    fn test_remove_parent_drops_orphans() {
        let mut scr = ChangeRecord::new("CR1", "alice");
        scr.add_file(include_file("common.i"));
        scr.link_impact("common.i", "a.p");
        scr.link_impact("common.i", "b.p");
        assert_eq!(scr.files(Category::Impact).len(), 2);

        scr.remove_file(Category::Source, "common.i").unwrap();
        assert!(scr.files(Category::Impact).is_empty());
    }

    #[test]
    fn test_remove_impacted_unlinks_parent() {
        let mut scr = ChangeRecord::new("CR1", "alice");
        scr.add_file(include_file("common.i"));
        scr.link_impact("common.i", "a.p");
        scr.remove_file(Category::Impact, "a.p").unwrap();
        assert!(scr.file(Category::Source, "common.i").unwrap().impacts.is_empty());
    }

    #[test]
    fn test_deep_copy_is_detached() {
        let mut scr = ChangeRecord::new("CR1", "alice");
        scr.add_file(include_file("common.i"));
        scr.link_impact("common.i", "a.p");

        let copy = scr.clone();
        scr.unlink_impact("common.i");
        assert!(scr.files(Category::Impact).is_empty());
        assert_eq!(copy.files(Category::Impact).len(), 1);
        assert_eq!(copy.file(Category::Source, "common.i").unwrap().impacts.len(), 1);
    }

    #[test]
    fn test_clear_selection() {
        let mut scr = ChangeRecord::new("CR1", "alice");
        scr.add_file(include_file("common.i"));
        let mut setup = ReleaseFile::with_defaults("load.sql", 1, Category::Setup);
        setup.run = true;
        scr.add_file(setup);
        scr.link_impact("common.i", "a.p");

        scr.clear_selection();
        assert!(!scr.file(Category::Source, "common.i").unwrap().include);
        assert!(!scr.file(Category::Setup, "load.sql").unwrap().run);
        assert!(!scr.file(Category::Impact, "a.p").unwrap().included());
    }

    #[test]
    fn test_attribute_facade() {
        let mut scr = ChangeRecord::new("CR1", "alice");
        assert_eq!(scr.get(AUTHOR), Some(AttrValue::Str("alice".into())));
        assert!(scr.set(AUTHOR, AttrValue::Str("bob".into())));
        assert!(!scr.set(AUTHOR, AttrValue::Bool(true)));
        assert!(!scr.set("Owner", AttrValue::Str("x".into())));
        assert_eq!(scr.author(), "bob");
        assert!(!scr.set_file_attr(Category::Source, "nope.p", "Run", AttrValue::Bool(true)));
    }
}
