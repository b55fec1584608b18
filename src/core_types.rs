//! Core types used throughout the system
//!
//! These are fundamental type aliases shared by the entity model, the
//! protocol and the server core.

/// Tracking number - unique, monotonically increasing, never reused.
///
/// # Constraints:
/// - **Immutable**: Once assigned to a request, NEVER changes
/// - **Shared sequence**: sessions and transfer requests draw from the same counter
/// - **Negative = unassigned**: see [`UNASSIGNED_TRACKING`]
pub type TrackingNumber = i32;

/// Session ID - the tracking number handed to a connection when it is accepted.
pub type SessionId = TrackingNumber;

/// Sentinel carried by a transfer request that has not been submitted yet.
pub const UNASSIGNED_TRACKING: TrackingNumber = -1;

/// First tracking number used when no tracking file exists.
pub const DEFAULT_TRACKING: TrackingNumber = 10000;

/// Returns true if `track` is an assigned tracking number.
#[inline]
pub fn is_assigned(track: TrackingNumber) -> bool {
    track >= 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_sentinel() {
        assert!(!is_assigned(UNASSIGNED_TRACKING));
        assert!(is_assigned(0));
        assert!(is_assigned(DEFAULT_TRACKING));
    }
}
