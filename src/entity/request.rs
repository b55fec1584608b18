//! Transfer Request
//!
//! A submission bundling some of a change record's files for promotion to
//! QA. Requests compare by tracking number, which the server assigns on first
//! submission.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Write as _};

use super::attr::{AttrKind, AttrValue, Attributes, kind_matches};
use super::category::Category;
use super::change_record::ChangeRecord;
use super::file::ReleaseFile;
use crate::core_types::{TrackingNumber, UNASSIGNED_TRACKING, is_assigned};

pub const REQUESTOR: &str = "Requestor";
pub const SCR: &str = "SCR";
pub const TRACKING: &str = "Tracking#";
pub const DELTAS: &str = "Number of Deltas";
pub const ASYNC: &str = "Async";
pub const WEB_SPEED: &str = "WebSpeed";
pub const HOST_REQUEST: &str = "Host Request";
pub const TIMESTAMP: &str = "Timestamp";
pub const DELTA_COMPILE: &str = "Delta Forced Compile";
pub const INCLUDE: &str = "Include";

/// Timestamp format used in release documentation (month-day-year::hour:minute:second)
pub const TIMESTAMP_FORMAT: &str = "%m-%d-%y::%H:%M:%S";

/// Current time in release documentation format
pub fn punch_clock() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    requestor: String,
    change_record: Option<ChangeRecord>,
    tracking: TrackingNumber,
    timestamp: String,
    files: [Vec<ReleaseFile>; Category::COUNT],
    num_deltas: i32,
    needs_async: bool,
    needs_web: bool,
    host_request: bool,
    delta_forced: bool,
    include: bool,
    async_count: i32,
    web_count: i32,
    host_count: i32,
}

impl TransferRequest {
    /// Create a request for `scr`, selecting every file marked include or run.
    ///
    /// The change record is deep-copied; later edits to `scr` do not leak in.
    pub fn new(scr: Option<&ChangeRecord>, requestor: impl Into<String>) -> Self {
        Self::with_tracking(scr, requestor, UNASSIGNED_TRACKING)
    }

    pub fn with_tracking(
        scr: Option<&ChangeRecord>,
        requestor: impl Into<String>,
        tracking: TrackingNumber,
    ) -> Self {
        let mut request = Self {
            requestor: requestor.into(),
            change_record: scr.cloned(),
            tracking,
            timestamp: punch_clock(),
            files: Default::default(),
            num_deltas: 0,
            needs_async: false,
            needs_web: false,
            host_request: false,
            delta_forced: false,
            include: false,
            async_count: 0,
            web_count: 0,
            host_count: 0,
        };
        if let Some(scr) = scr {
            for category in Category::ALL {
                for f in scr.files(category).iter().filter(|f| f.selected()) {
                    request.add_file(f.clone());
                }
            }
        }
        request
    }

    pub fn requestor(&self) -> &str {
        &self.requestor
    }

    pub fn change_record(&self) -> Option<&ChangeRecord> {
        self.change_record.as_ref()
    }

    pub fn tracking(&self) -> TrackingNumber {
        self.tracking
    }

    pub fn has_tracking(&self) -> bool {
        is_assigned(self.tracking)
    }

    /// Assign the tracking number. Refused once one is assigned.
    pub fn assign_tracking(&mut self, tracking: TrackingNumber) -> bool {
        if self.has_tracking() || !is_assigned(tracking) {
            return false;
        }
        self.tracking = tracking;
        true
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn files(&self, category: Category) -> &[ReleaseFile] {
        &self.files[category.index()]
    }

    pub fn num_deltas(&self) -> i32 {
        self.num_deltas
    }

    pub fn needs_async_compile(&self) -> bool {
        self.needs_async
    }

    pub fn needs_web_compile(&self) -> bool {
        self.needs_web
    }

    pub fn delta_forced_compile(&self) -> bool {
        self.delta_forced
    }

    pub fn host_request(&self) -> bool {
        self.host_request
    }

    /// Number of host files to be compiled
    pub fn host_file_count(&self) -> i32 {
        self.host_count
    }

    pub fn is_included(&self) -> bool {
        self.include
    }

    /// Add a file unless a file of that name is already in its bucket.
    pub fn add_file(&mut self, file: ReleaseFile) -> bool {
        let index = file.category.index();
        if self.files[index].iter().any(|f| f.name == file.name) {
            return false;
        }
        if file.category == Category::Delta {
            self.num_deltas += 1;
            self.delta_forced = true;
        } else {
            if file.web_speed {
                self.web_count += 1;
            }
            if file.async_compile {
                self.async_count += 1;
            }
            if file.host {
                self.host_count += 1;
            }
            self.refresh_compile_flags();
        }
        self.files[index].push(file);
        true
    }

    /// Remove a file by name from a bucket, returning it if present.
    pub fn remove_file(&mut self, category: Category, name: &str) -> Option<ReleaseFile> {
        let bucket = &mut self.files[category.index()];
        let index = bucket.iter().position(|f| f.name == name)?;
        let file = bucket.remove(index);
        if category == Category::Delta {
            self.num_deltas -= 1;
            if self.num_deltas == 0 {
                self.delta_forced = false;
            }
        } else {
            if file.web_speed {
                self.web_count -= 1;
            }
            if file.async_compile {
                self.async_count -= 1;
            }
            if file.host {
                self.host_count -= 1;
            }
            self.refresh_compile_flags();
        }
        Some(file)
    }

    fn refresh_compile_flags(&mut self) {
        self.needs_web = self.web_count > 0;
        self.needs_async = self.async_count > 0;
    }

    /// Plain-text release summary used in notifications and transfer instructions
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&"-".repeat(20));
        out.push('\n');
        if !self.requestor.is_empty() {
            let _ = writeln!(out, "USER: {}", self.requestor);
        }
        let _ = writeln!(out, "TIME: {}", self.timestamp);
        let cr = self.change_record.as_ref().map(|c| c.id()).unwrap_or("");
        let _ = writeln!(out, "CR NUMBER: {}", cr);

        for category in Category::ALL {
            let mut list: Vec<&ReleaseFile> = self.files[category.index()].iter().collect();
            if list.is_empty() {
                continue;
            }
            list.sort();
            let _ = writeln!(out, "{}: {}", category.label(), list.len());
            for f in list {
                let run_only = !f.included() && f.run;
                if category == Category::Impact || run_only {
                    let _ = writeln!(out, "{}", f.name);
                } else {
                    let sep = if f.source.contains('/') { "/" } else { "\\" };
                    let _ = writeln!(
                        out,
                        "{}{}{} {}{}",
                        f.source,
                        sep,
                        f.name,
                        f.destination,
                        if f.run { " *" } else { "" }
                    );
                }
            }
            out.push('\n');
        }

        let library = self.host_request || self.delta_forced;
        if library || self.needs_async || self.needs_web {
            out.push_str("COMPILE: ");
        }
        if library {
            out.push_str("Library ");
        }
        if self.needs_async {
            out.push_str("Async ");
        }
        if self.needs_web {
            out.push_str("WebSpeed");
        }
        out.push('\n');
        let _ = writeln!(out, "TRACKING: {}", self.tracking);
        out
    }
}

impl PartialEq for TransferRequest {
    fn eq(&self, other: &Self) -> bool {
        self.tracking == other.tracking
    }
}

impl Eq for TransferRequest {}

impl PartialOrd for TransferRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TransferRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tracking.cmp(&other.tracking)
    }
}

impl fmt::Display for TransferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tracking)
    }
}

impl Attributes for TransferRequest {
    fn kind_of(&self, key: &str) -> Option<AttrKind> {
        match key {
            REQUESTOR | TIMESTAMP | SCR => Some(AttrKind::Str),
            ASYNC | WEB_SPEED | HOST_REQUEST | DELTA_COMPILE | INCLUDE => Some(AttrKind::Bool),
            TRACKING | DELTAS => Some(AttrKind::Int),
            _ => None,
        }
    }

    fn get(&self, key: &str) -> Option<AttrValue> {
        let value = match key {
            REQUESTOR => AttrValue::Str(self.requestor.clone()),
            TIMESTAMP => AttrValue::Str(self.timestamp.clone()),
            SCR => AttrValue::Str(
                self.change_record
                    .as_ref()
                    .map(|c| c.id().to_string())
                    .unwrap_or_default(),
            ),
            ASYNC => AttrValue::Bool(self.needs_async),
            WEB_SPEED => AttrValue::Bool(self.needs_web),
            HOST_REQUEST => AttrValue::Bool(self.host_request),
            DELTA_COMPILE => AttrValue::Bool(self.delta_forced),
            INCLUDE => AttrValue::Bool(self.include),
            TRACKING => AttrValue::Int(self.tracking),
            DELTAS => AttrValue::Int(self.num_deltas),
            _ => return None,
        };
        Some(value)
    }

    fn set(&mut self, key: &str, value: AttrValue) -> bool {
        if !kind_matches(self, key, &value) {
            return false;
        }
        match (key, value) {
            (REQUESTOR, AttrValue::Str(s)) => self.requestor = s,
            (TIMESTAMP, AttrValue::Str(s)) => self.timestamp = s,
            (HOST_REQUEST, AttrValue::Bool(b)) => self.host_request = b,
            (INCLUDE, AttrValue::Bool(b)) => self.include = b,
            (TRACKING, AttrValue::Int(t)) => return self.assign_tracking(t),
            // SCR, ASYNC, WEB_SPEED, DELTA_COMPILE and DELTAS are derived
            _ => return false,
        }
        true
    }
}
