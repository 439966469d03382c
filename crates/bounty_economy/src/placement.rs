//! # Placement State Machine
//!
//! Rewarded ad views tracked per (user, placement).
//!
//! ```text
//! none ──start──► started ──success──► completed   (record written, reward granted, event published)
//!                    │
//!                    └─────fail──────► failed
//! ```
//!
//! `start` may be called again from any state and opens a fresh view with a
//! new reward id. `success` and `fail` only accept a `started` record.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::context::Context;
use crate::error::{EconomyError, EconomyResult};
use crate::events::EconomyEvent;
use crate::granter::RewardGranter;
use crate::ports::{ObjectStore, PublisherSink, WriteCondition};
use crate::random::random_id;
use crate::records::{read_record, write_record, Versioned};
use crate::reward::{Metadata, Reward, RewardSpec};
use crate::roller::RewardRoller;
use crate::saga::CompensationStack;

/// Collection holding placement records, keyed by placement id.
pub const PLACEMENTS_COLLECTION: &str = "placements";

/// Static definition of a placement.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Granted on success.
    pub reward: Option<RewardSpec>,
    /// Passed through to clients.
    pub additional_properties: BTreeMap<String, String>,
}

/// Lifecycle state of one placement view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementState {
    /// The ad is being shown.
    Started,
    /// The user finished the ad and was rewarded.
    Completed,
    /// The ad failed or was skipped.
    Failed,
}

/// Stored placement record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlacementStatus {
    /// Placement id.
    pub placement_id: String,
    /// Correlation id created at start.
    pub reward_id: String,
    /// Lifecycle state.
    pub status: PlacementState,
    /// Client metadata from start, preserved across transitions.
    #[serde(default)]
    pub metadata: Metadata,
    /// Reward granted on success.
    #[serde(default)]
    pub reward: Option<Reward>,
    /// When the view started.
    pub create_time_sec: i64,
    /// Last transition.
    pub update_time_sec: i64,
}

/// Placement operations.
pub struct PlacementMachine {
    configs: BTreeMap<String, PlacementConfig>,
    store: Arc<dyn ObjectStore>,
    publisher: Option<Arc<dyn PublisherSink>>,
    roller: RewardRoller,
    granter: Arc<RewardGranter>,
    clock: Arc<dyn Clock>,
}

impl PlacementMachine {
    /// Creates the state machine.
    #[must_use]
    pub fn new(
        configs: BTreeMap<String, PlacementConfig>,
        store: Arc<dyn ObjectStore>,
        publisher: Option<Arc<dyn PublisherSink>>,
        roller: RewardRoller,
        granter: Arc<RewardGranter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            configs,
            store,
            publisher,
            roller,
            granter,
            clock,
        }
    }

    fn config(&self, placement_id: &str) -> EconomyResult<&PlacementConfig> {
        self.configs
            .get(placement_id)
            .ok_or_else(|| EconomyError::NotFound(format!("placement {placement_id}")))
    }

    fn read(
        &self,
        ctx: &Context,
        user_id: &str,
        placement_id: &str,
    ) -> EconomyResult<Option<Versioned<PlacementStatus>>> {
        read_record(self.store.as_ref(), ctx, PLACEMENTS_COLLECTION, placement_id, user_id)
    }

    fn write(
        &self,
        ctx: &Context,
        user_id: &str,
        status: &PlacementStatus,
        condition: WriteCondition,
    ) -> EconomyResult<()> {
        write_record(
            self.store.as_ref(),
            ctx,
            PLACEMENTS_COLLECTION,
            &status.placement_id,
            user_id,
            status,
            condition,
        )?;
        Ok(())
    }

    fn validate_ids(user_id: &str, placement_id: &str) -> EconomyResult<()> {
        if user_id.is_empty() || placement_id.is_empty() {
            return Err(EconomyError::invalid("user id and placement id are required"));
        }
        Ok(())
    }

    /// Opens a placement view.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for empty ids, `NotFound` for an unknown placement,
    /// store failures.
    pub fn start(
        &self,
        ctx: &Context,
        user_id: &str,
        placement_id: &str,
        metadata: Metadata,
    ) -> EconomyResult<PlacementStatus> {
        Self::validate_ids(user_id, placement_id)?;
        self.config(placement_id)?;

        let existing = self.read(ctx, user_id, placement_id)?;
        let now = self.clock.now_sec();
        let status = PlacementStatus {
            placement_id: placement_id.to_string(),
            reward_id: random_id(self.roller.random().as_ref()),
            status: PlacementState::Started,
            metadata,
            reward: None,
            create_time_sec: now,
            update_time_sec: now,
        };
        self.write(
            ctx,
            user_id,
            &status,
            WriteCondition::after_read(existing.as_ref().map(|v| v.version.as_str())),
        )?;

        debug!(user_id, placement_id, reward_id = %status.reward_id, "placement started");
        Ok(status)
    }

    /// Reads a started record for a transition.
    fn started(
        &self,
        ctx: &Context,
        user_id: &str,
        placement_id: &str,
    ) -> EconomyResult<Versioned<PlacementStatus>> {
        let record = self
            .read(ctx, user_id, placement_id)?
            .ok_or_else(|| {
                EconomyError::invalid(format!("placement {placement_id} was not started"))
            })?;
        if record.value.status != PlacementState::Started {
            return Err(EconomyError::invalid(format!(
                "placement {placement_id} is {:?}, not started",
                record.value.status
            )));
        }
        Ok(record)
    }

    /// Completes a placement view, granting its reward.
    ///
    /// The `completed` record is written first with a version check, then
    /// the reward is granted. A failed grant restores the `started` record,
    /// so a view is rewarded at most once.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for empty ids or a record that is not `started`
    /// - `NotFound` for an unknown placement
    /// - `ConcurrentModification` if another transition won the race
    /// - grant and store failures
    pub fn success(
        &self,
        ctx: &Context,
        user_id: &str,
        placement_id: &str,
    ) -> EconomyResult<PlacementStatus> {
        Self::validate_ids(user_id, placement_id)?;
        let config = self.config(placement_id)?;
        let Versioned { value: started, version } = self.started(ctx, user_id, placement_id)?;

        let reward = config
            .reward
            .as_ref()
            .map(|spec| self.roller.roll(Some(spec)))
            .transpose()?;

        let now = self.clock.now_sec();
        let completed = PlacementStatus {
            status: PlacementState::Completed,
            reward: reward.clone(),
            update_time_sec: now,
            ..started.clone()
        };
        let completed_version = write_record(
            self.store.as_ref(),
            ctx,
            PLACEMENTS_COLLECTION,
            placement_id,
            user_id,
            &completed,
            WriteCondition::Version(version),
        )?;

        if let Some(reward) = &reward {
            let mut stack = CompensationStack::begin("placement_success");
            let store = self.store.as_ref();
            let owner = user_id.to_string();
            stack.push("restore started placement", move |ctx| {
                write_record(
                    store,
                    ctx,
                    PLACEMENTS_COLLECTION,
                    &started.placement_id,
                    &owner,
                    &started,
                    WriteCondition::Version(completed_version),
                )
                .map(|_| ())
            });

            let mut metadata = completed.metadata.clone();
            metadata.insert("placement_id".into(), placement_id.into());
            metadata.insert("reward_id".into(), completed.reward_id.clone());
            match self.granter.grant(ctx, user_id, Some(reward), &metadata, false) {
                Ok(_) => stack.commit(),
                Err(e) => return Err(stack.unwind(e)),
            }
        }

        if let Some(publisher) = &self.publisher {
            let event = EconomyEvent::PlacementSucceeded {
                user_id: user_id.to_string(),
                placement_id: placement_id.to_string(),
                reward_id: completed.reward_id.clone(),
                timestamp_sec: now,
            };
            if let Err(e) = publisher.publish(ctx, &[event]) {
                warn!(user_id, placement_id, error = %e, "placement event publish failed");
            }
        }

        info!(user_id, placement_id, reward_id = %completed.reward_id, "placement completed");
        Ok(completed)
    }

    /// Fails a placement view. Nothing is granted.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for empty ids or a record that is not `started`,
    /// `NotFound` for an unknown placement, store failures.
    pub fn fail(
        &self,
        ctx: &Context,
        user_id: &str,
        placement_id: &str,
    ) -> EconomyResult<PlacementStatus> {
        Self::validate_ids(user_id, placement_id)?;
        self.config(placement_id)?;
        let Versioned { value: mut status, version } = self.started(ctx, user_id, placement_id)?;

        status.status = PlacementState::Failed;
        status.update_time_sec = self.clock.now_sec();
        self.write(ctx, user_id, &status, WriteCondition::Version(version))?;

        debug!(user_id, placement_id, "placement failed");
        Ok(status)
    }

    /// Current record of a placement view.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for empty ids, `NotFound` if the placement is unknown
    /// or was never started.
    pub fn status(
        &self,
        ctx: &Context,
        user_id: &str,
        placement_id: &str,
    ) -> EconomyResult<PlacementStatus> {
        Self::validate_ids(user_id, placement_id)?;
        self.config(placement_id)?;
        self.read(ctx, user_id, placement_id)?
            .map(|v| v.value)
            .ok_or_else(|| {
                EconomyError::NotFound(format!("placement {placement_id} for user {user_id}"))
            })
    }
}
