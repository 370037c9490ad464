use serde::{Deserialize, Serialize};

/// Order lifecycle state
///
/// `Created` and `Submitted` are entered exclusively by the order manager;
/// every other state is entered only from events reported by the execution
/// adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    /// Order record exists, nothing sent to the broker yet
    Created,
    /// Submission handed to the execution adapter
    Submitted,
    /// Broker has accepted the order
    Acknowledged,
    /// Some quantity filled, remainder still working
    PartiallyFilled,
    /// Completely filled
    Filled,
    /// Rejected by the broker or by exhausted retries
    Rejected,
    /// Cancelled before completion
    Cancelled,
    /// Expired at the broker (GTD/day orders)
    Expired,
}

impl OrderState {
    /// Returns true if the order is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled
                | OrderState::Rejected
                | OrderState::Cancelled
                | OrderState::Expired
        )
    }

    /// Returns true if the order is still working
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Is `to` a legal next state from `self`?
    ///
    /// `PartiallyFilled` may loop into itself (each partial fill is a
    /// transition); `Cancelled` is reachable from any non-terminal state.
    pub fn can_transition(&self, to: OrderState) -> bool {
        use OrderState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, to) {
            (_, Cancelled) => true,
            (Created, Submitted) => true,
            (Created, Rejected) => true,
            (Submitted, Acknowledged | PartiallyFilled | Filled | Rejected | Expired) => true,
            (Acknowledged, PartiallyFilled | Filled | Rejected | Expired) => true,
            (PartiallyFilled, PartiallyFilled | Filled | Expired) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Created => "created",
            OrderState::Submitted => "submitted",
            OrderState::Acknowledged => "acknowledged",
            OrderState::PartiallyFilled => "partially_filled",
            OrderState::Filled => "filled",
            OrderState::Rejected => "rejected",
            OrderState::Cancelled => "cancelled",
            OrderState::Expired => "expired",
        }
    }
}
