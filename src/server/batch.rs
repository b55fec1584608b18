//! Transfer batch
//!
//! At most one batch exists at a time. It is begun from pending requests,
//! claimed once by the execution agent, and cleared when the agent reports
//! success.

use std::fmt;

use crate::core_types::TrackingNumber;
use crate::entity::TransferRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchState {
    /// Instructions written, waiting for the agent
    Begun,
    /// Handed to the agent, waiting for its success report
    Claimed,
}

impl BatchState {
    #[inline]
    pub fn is_claimable(&self) -> bool {
        matches!(self, BatchState::Begun)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Begun => "BEGUN",
            BatchState::Claimed => "CLAIMED",
        }
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TransferBatch {
    requests: Vec<TransferRequest>,
    state: BatchState,
}

impl TransferBatch {
    pub fn begin(requests: Vec<TransferRequest>) -> Self {
        Self {
            requests,
            state: BatchState::Begun,
        }
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn requests(&self) -> &[TransferRequest] {
        &self.requests
    }

    pub fn into_requests(self) -> Vec<TransferRequest> {
        self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn trackings(&self) -> Vec<TrackingNumber> {
        self.requests.iter().map(|r| r.tracking()).collect()
    }

    /// Mark the batch claimed. Refused unless it is still claimable.
    pub fn claim(&mut self) -> bool {
        if !self.state.is_claimable() {
            return false;
        }
        self.state = BatchState::Claimed;
        true
    }

    /// Whether any request in the batch forces a library compile
    pub fn delta_forced(&self) -> bool {
        self.requests.iter().any(|r| r.delta_forced_compile())
    }

    /// Release instructions handed to the execution agent
    pub fn instructions(&self) -> String {
        self.requests.iter().map(|r| r.render()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Category, ReleaseFile};

    #[test]
    fn test_claim_once() {
        let mut batch = TransferBatch::begin(vec![TransferRequest::with_tracking(None, "a", 10001)]);
        assert_eq!(batch.state(), BatchState::Begun);
        assert!(batch.claim());
        assert_eq!(batch.state(), BatchState::Claimed);
        assert!(!batch.claim());
        assert_eq!(batch.state().to_string(), "CLAIMED");
    }

    #[test]
    fn test_delta_forced_and_instructions() {
        let mut forced = TransferRequest::with_tracking(None, "a", 10001);
        forced.add_file(ReleaseFile::new("orders.df", 1, Category::Delta));
        let plain = TransferRequest::with_tracking(None, "b", 10002);

        let batch = TransferBatch::begin(vec![plain.clone()]);
        assert!(!batch.delta_forced());

        let batch = TransferBatch::begin(vec![plain, forced]);
        assert!(batch.delta_forced());
        assert_eq!(batch.trackings(), vec![10002, 10001]);
        let text = batch.instructions();
        assert!(text.contains("TRACKING: 10001"));
        assert!(text.contains("TRACKING: 10002"));
    }
}
