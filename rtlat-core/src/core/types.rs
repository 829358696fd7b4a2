use serde::{Deserialize, Serialize};
use std::fmt;

/// Correlation id embedded in every order/cancel (`client_id` on the wire)
pub type CorrelationId = uuid::Uuid;

/// Smallest latency the histograms track (1ns)
pub const MIN_TRACKABLE_LATENCY_NS: u64 = 1;

/// Largest latency the histograms track (one hour); larger samples are clamped
pub const MAX_TRACKABLE_LATENCY_NS: u64 = 3_600_000_000_000;

/// Authentication token identifying one session's exchange account
///
/// Sessions in a pool get sequential tokens starting at the configured base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiToken(pub u32);

impl ApiToken {
    pub fn get(self) -> u32 {
        self.0
    }

    /// Token of the `index`-th session counted from this base
    pub fn offset(self, index: u32) -> Option<Self> {
        self.0.checked_add(index).map(ApiToken)
    }
}

impl fmt::Display for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which half of the order/cancel loop a request or acknowledgement belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leg {
    /// CREATE_ORDER acknowledged by BOOKED
    Order,
    /// CANCEL_ORDER acknowledged by DONE
    Cancel,
}

impl Leg {
    pub fn as_str(self) -> &'static str {
        match self {
            Leg::Order => "order",
            Leg::Cancel => "cancel",
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_offset() {
        let base = ApiToken(3001);
        assert_eq!(base.offset(0), Some(ApiToken(3001)));
        assert_eq!(base.offset(4), Some(ApiToken(3005)));
        assert_eq!(ApiToken(u32::MAX).offset(1), None);
    }

    #[test]
    fn test_token_serializes_as_number() {
        let json = serde_json::to_string(&ApiToken(42)).unwrap();
        assert_eq!(json, "42");
    }

    #[test]
    fn test_leg_labels() {
        assert_eq!(Leg::Order.to_string(), "order");
        assert_eq!(Leg::Cancel.as_str(), "cancel");
    }
}
