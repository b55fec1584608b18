//! Entity model: change records, transfer requests, release files and users.

pub mod attr;
pub mod category;
pub mod change_record;
pub mod file;
pub mod request;
pub mod user;

pub use attr::{AttrKind, AttrValue, Attributes};
pub use category::Category;
pub use change_record::ChangeRecord;
pub use file::ReleaseFile;
pub use request::TransferRequest;
pub use user::{SecurityLevel, User};
