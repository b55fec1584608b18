//! Connection handler states

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerState {
    /// Reading actions and answering them
    Active,
    /// Loop finished; sending the terminal signal and releasing the transport
    Closing,
    /// Transport released
    Closed,
}

impl HandlerState {
    /// Transitions only move forward
    pub fn can_transition_to(&self, next: HandlerState) -> bool {
        matches!(
            (self, next),
            (HandlerState::Active, HandlerState::Closing) | (HandlerState::Closing, HandlerState::Closed)
        )
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, HandlerState::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerState::Active => "ACTIVE",
            HandlerState::Closing => "CLOSING",
            HandlerState::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for HandlerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only() {
        assert!(HandlerState::Active.can_transition_to(HandlerState::Closing));
        assert!(HandlerState::Closing.can_transition_to(HandlerState::Closed));
        assert!(!HandlerState::Active.can_transition_to(HandlerState::Closed));
        assert!(!HandlerState::Closed.can_transition_to(HandlerState::Active));
        assert!(!HandlerState::Closing.can_transition_to(HandlerState::Active));
    }
}
