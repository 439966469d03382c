//! Events the economy publishes for cross-cutting systems.

use serde::{Deserialize, Serialize};

/// Economic event handed to the [`PublisherSink`](crate::ports::PublisherSink).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum EconomyEvent {
    /// A rewarded placement completed and its reward was granted.
    ///
    /// Unlockables listen for this to offer "instant unlock via rewarded video".
    PlacementSucceeded {
        /// User who watched the placement.
        user_id: String,
        /// Placement id from configuration.
        placement_id: String,
        /// Correlation id created at placement start.
        reward_id: String,
        /// When the placement completed.
        timestamp_sec: i64,
    },
}

impl EconomyEvent {
    /// The wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PlacementSucceeded { .. } => "placement_succeeded",
        }
    }
}
