//! External collaborators consumed by the server: directory browsing,
//! impact analysis and notification delivery.

pub mod fs_view;
pub mod impact;
pub mod notify;

pub use fs_view::{FileSystemView, LocalFileSystem};
pub use impact::{ImpactAnalyzer, ScriptImpactAnalyzer, StaticImpactAnalyzer};
pub use notify::{LogNotifier, MailxNotifier, Notification, Notifier, RecordingNotifier, build_notifier};
