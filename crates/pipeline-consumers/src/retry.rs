//! Retry policy shared by both consumers.
//!
//! A message is never nacked: retrying means leaving it un-acknowledged so
//! the queue hands it out again once the lease expires.

use std::fmt;

use pipeline_types::ConsumerSettings;
use serde::{Deserialize, Serialize};

/// Classification of a failed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultClass {
    /// Cannot succeed however often it is retried
    Poison,
    /// Expected to clear up, e.g. rate limiting
    Transient,
    /// Rejected by an external service for good
    Permanent,
    /// Anything not classified above
    Unclassified,
}

/// What to do with a message once it has been processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    /// Processed; acknowledge it
    Complete,
    /// Give up; acknowledge it without the work being done
    Discard { reason: String },
    /// Leave it for redelivery after the lease expires
    Retry { reason: String },
}

impl Disposition {
    /// Whether the message gets deleted from its queue.
    pub fn acknowledges(&self) -> bool {
        !matches!(self, Disposition::Retry { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Disposition::Complete => None,
            Disposition::Discard { reason } | Disposition::Retry { reason } => Some(reason),
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Complete => f.write_str("complete"),
            Disposition::Discard { reason } => write!(f, "discard ({})", reason),
            Disposition::Retry { reason } => write!(f, "retry ({})", reason),
        }
    }
}

/// Maps a fault and the delivery count to a [`Disposition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Deliveries after which a transient fault is given up
    pub max_deliveries: u32,
    /// Apply the ceiling to unclassified faults too
    pub cap_unclassified: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_deliveries: 10,
            cap_unclassified: false,
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &ConsumerSettings) -> Self {
        Self {
            max_deliveries: settings.max_deliveries,
            cap_unclassified: settings.cap_unclassified_retries,
        }
    }

    fn capped(&self, delivery_count: u32, reason: String) -> Disposition {
        if delivery_count >= self.max_deliveries {
            Disposition::Discard {
                reason: format!(
                    "retries exhausted after {} deliveries: {}",
                    delivery_count, reason
                ),
            }
        } else {
            Disposition::Retry { reason }
        }
    }

    /// Decide the fate of a message that failed with `class`.
    pub fn decide(
        &self,
        class: FaultClass,
        delivery_count: u32,
        reason: impl Into<String>,
    ) -> Disposition {
        let reason = reason.into();
        match class {
            FaultClass::Poison | FaultClass::Permanent => Disposition::Discard { reason },
            FaultClass::Transient => self.capped(delivery_count, reason),
            FaultClass::Unclassified if self.cap_unclassified => {
                self.capped(delivery_count, reason)
            }
            FaultClass::Unclassified => Disposition::Retry { reason },
        }
    }
}
