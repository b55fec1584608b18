//! Persistence: snapshot artifacts, the tracking counter and the transfer
//! instruction marker.

pub mod marker;
pub mod snapshot;
pub mod tracking;

pub use marker::InstructionMarker;
pub use snapshot::{EntityKind, Snapshot, SnapshotStore};
pub use tracking::TrackingCounter;
