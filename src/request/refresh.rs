//! Refresh-after-401 state machine and retry backoff.
//!
//! Every logical request carries one `RefreshPhase`:
//!
//! ```text
//! Idle --401--> Refreshing --ok--> Retrying --2xx--> Done
//!                   |                  |
//!                 fail                401
//!                   v                  v
//!                 Failed <-------------+
//! ```
//!
//! Only `Idle` may start a refresh, so a request refreshes at most once.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    Refreshing,
    Retrying,
    Done,
    Failed,
}

impl RefreshPhase {
    /// An attempt came back 401.
    #[must_use]
    pub fn on_unauthorized(self) -> Self {
        match self {
            Self::Idle => Self::Refreshing,
            _ => Self::Failed,
        }
    }

    /// The refresh call finished.
    #[must_use]
    pub fn on_refresh(self, refreshed: bool) -> Self {
        match (self, refreshed) {
            (Self::Refreshing, true) => Self::Retrying,
            (Self::Refreshing, false) => Self::Failed,
            (other, _) => other,
        }
    }

    /// An attempt returned a response that is not a 401.
    #[must_use]
    pub fn on_response(self) -> Self {
        match self {
            Self::Failed => Self::Failed,
            _ => Self::Done,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Delay before transient retry number `retry` (1-based): `base * 2^(retry-1)`.
#[must_use]
pub fn backoff_delay(base: Duration, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(16);
    base.saturating_mul(1_u32 << exponent)
}

#[cfg(test)]
#[path = "refresh_test.rs"]
mod tests;
