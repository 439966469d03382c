//! # Donation Ledger
//!
//! Per-(owner, donation id) help requests that other users contribute to.
//!
//! ```text
//! absent ──request──► requested ──give──► accumulating ──give──► fulfilled
//!    ▲                    │                    │                     │
//!    └──────expiry────────┴────────────────────┘                   claim
//! ```
//!
//! Every record write is version-checked. Request and give deduct their cost
//! through a [`CompensationStack`], so a failed record write refunds the user.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::context::Context;
use crate::error::{EconomyError, EconomyResult};
use crate::granter::RewardGranter;
use crate::ports::{InventorySystem, ObjectStore, WalletLedger, WriteCondition};
use crate::records::{read_record, write_record, Versioned};
use crate::reward::{Cost, Metadata, Reward, RewardSpec, UserId};
use crate::roller::RewardRoller;
use crate::saga::{deduct_cost, CompensationStack};

/// Collection holding donation records, keyed by donation id.
pub const DONATIONS_COLLECTION: &str = "donations";

/// Page size used when listing a user's donations.
const LIST_PAGE_SIZE: usize = 100;

// ============================================================================
// Configuration
// ============================================================================

/// Static definition of a donation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DonationConfig {
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: String,
    /// Contributions needed to fulfil the donation.
    pub count: i64,
    /// Per-contributor cap; `0` means uncapped.
    pub user_contribution_max_count: i64,
    /// Lifetime of a request; `0` means it never expires.
    pub duration_sec: i64,
    /// Paid by the requester.
    pub request_cost: Cost,
    /// Paid by a contributor per contributed unit.
    pub cost: Cost,
    /// Granted to the contributor whose contribution fulfils the donation.
    pub contributor_reward: Option<RewardSpec>,
    /// Rolled once per claimed unit for the recipient.
    pub recipient_reward: Option<RewardSpec>,
    /// Passed through to the record.
    pub additional_properties: BTreeMap<String, String>,
}

impl DonationConfig {
    /// Checks counts, costs and reward specs.
    ///
    /// # Errors
    ///
    /// [`EconomyError::InvalidConfig`].
    pub fn validate(&self, id: &str) -> EconomyResult<()> {
        if self.count <= 0 {
            return Err(EconomyError::InvalidConfig(format!(
                "donation {id}: count must be positive"
            )));
        }
        if self.user_contribution_max_count < 0 || self.duration_sec < 0 {
            return Err(EconomyError::InvalidConfig(format!(
                "donation {id}: user_contribution_max_count and duration_sec must not be negative"
            )));
        }
        self.request_cost.validate()?;
        self.cost.validate()?;
        for spec in [&self.contributor_reward, &self.recipient_reward].into_iter().flatten() {
            spec.validate()?;
        }
        Ok(())
    }

    /// Normalizes the reward specs.
    pub fn prepare(&mut self) {
        for spec in [&mut self.contributor_reward, &mut self.recipient_reward]
            .into_iter()
            .flatten()
        {
            spec.prepare();
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// One contributor's share of a donation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DonationContributor {
    /// Contributing user.
    pub user_id: UserId,
    /// Units contributed.
    pub count: i64,
    /// Units the recipient already claimed from this contributor.
    pub claim_count: i64,
}

impl DonationContributor {
    /// Units not yet claimed.
    #[must_use]
    pub const fn unclaimed(&self) -> i64 {
        self.count - self.claim_count
    }
}

/// A donation request owned by one user.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Donation {
    /// Donation id from configuration.
    pub id: String,
    /// Requesting user.
    pub owner_user_id: UserId,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: String,
    /// Units contributed so far.
    pub count: i64,
    /// Units needed to fulfil the donation.
    pub max_count: i64,
    /// Units already claimed.
    pub claim_count: i64,
    /// Per-contributor cap; `0` means uncapped.
    pub user_contribution_max_count: i64,
    /// When the request was created.
    pub create_time_sec: i64,
    /// Last contribution or claim.
    pub update_time_sec: i64,
    /// Expiry; `0` means never.
    pub expire_time_sec: i64,
    /// Contributors in first-contribution order.
    pub contributors: Vec<DonationContributor>,
    /// Every reward rolled for the recipient by past claims.
    pub recipient_rewards: Vec<Reward>,
    /// Passed through from configuration.
    pub additional_properties: BTreeMap<String, String>,
}

impl Donation {
    fn new(id: &str, owner_user_id: &str, config: &DonationConfig, now_sec: i64) -> Self {
        Self {
            id: id.to_string(),
            owner_user_id: owner_user_id.to_string(),
            name: config.name.clone(),
            description: config.description.clone(),
            max_count: config.count,
            user_contribution_max_count: config.user_contribution_max_count,
            create_time_sec: now_sec,
            update_time_sec: now_sec,
            expire_time_sec: if config.duration_sec > 0 {
                now_sec.saturating_add(config.duration_sec)
            } else {
                0
            },
            additional_properties: config.additional_properties.clone(),
            ..Self::default()
        }
    }

    /// True once the expiry passed.
    #[must_use]
    pub const fn is_expired(&self, now_sec: i64) -> bool {
        self.expire_time_sec != 0 && self.expire_time_sec <= now_sec
    }

    /// True once every unit has been contributed.
    #[must_use]
    pub const fn is_fulfilled(&self) -> bool {
        self.count >= self.max_count
    }

    /// Units contributed but not yet claimed.
    #[must_use]
    pub const fn unclaimed(&self) -> i64 {
        self.count - self.claim_count
    }

    /// The entry for `user_id`, if they contributed.
    #[must_use]
    pub fn contributor(&self, user_id: &str) -> Option<&DonationContributor> {
        self.contributors.iter().find(|c| c.user_id == user_id)
    }

    /// How many units `user_id` may still contribute: at most one per call.
    fn contribution_amount(&self, user_id: &str) -> i64 {
        let contributed = self.contributor(user_id).map_or(0, |c| c.count);
        let per_user = if self.user_contribution_max_count > 0 {
            self.user_contribution_max_count - contributed
        } else {
            i64::MAX
        };
        1_i64.min(self.max_count - self.count).min(per_user).max(0)
    }
}

/// What a claim takes from one donation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClaimRequest {
    /// Everything available across all contributors.
    All,
    /// Up to the given amount from each listed contributor.
    Donors(BTreeMap<UserId, i64>),
}

/// Result of [`DonationLedger::request`].
#[derive(Clone, Debug, PartialEq)]
pub struct DonationRequestOutcome {
    /// The active donation.
    pub donation: Donation,
    /// False if an unexpired donation already existed and was returned as is.
    pub created: bool,
}

/// Result of [`DonationLedger::give`].
#[derive(Clone, Debug, PartialEq)]
pub struct DonationGiveOutcome {
    /// The donation after the contribution.
    pub donation: Donation,
    /// Granted to the contributor if their unit fulfilled the donation.
    pub contributor_reward: Option<Reward>,
}

// ============================================================================
// Ledger
// ============================================================================

/// Donation operations over the injected collaborators.
pub struct DonationLedger {
    configs: BTreeMap<String, DonationConfig>,
    store: Arc<dyn ObjectStore>,
    wallet: Arc<dyn WalletLedger>,
    inventory: Option<Arc<dyn InventorySystem>>,
    roller: RewardRoller,
    granter: Arc<RewardGranter>,
    clock: Arc<dyn Clock>,
}

impl DonationLedger {
    /// Creates a ledger.
    #[must_use]
    pub fn new(
        configs: BTreeMap<String, DonationConfig>,
        store: Arc<dyn ObjectStore>,
        wallet: Arc<dyn WalletLedger>,
        inventory: Option<Arc<dyn InventorySystem>>,
        roller: RewardRoller,
        granter: Arc<RewardGranter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            configs,
            store,
            wallet,
            inventory,
            roller,
            granter,
            clock,
        }
    }

    fn config(&self, donation_id: &str) -> EconomyResult<&DonationConfig> {
        self.configs
            .get(donation_id)
            .ok_or_else(|| EconomyError::NotFound(format!("donation {donation_id}")))
    }

    fn read(
        &self,
        ctx: &Context,
        user_id: &str,
        donation_id: &str,
    ) -> EconomyResult<Option<Versioned<Donation>>> {
        read_record(self.store.as_ref(), ctx, DONATIONS_COLLECTION, donation_id, user_id)
    }

    fn write(
        &self,
        ctx: &Context,
        donation: &Donation,
        condition: WriteCondition,
    ) -> EconomyResult<String> {
        write_record(
            self.store.as_ref(),
            ctx,
            DONATIONS_COLLECTION,
            &donation.id,
            &donation.owner_user_id,
            donation,
            condition,
        )
        .map_err(|e| match e {
            EconomyError::ConcurrentModification { .. } | EconomyError::Cancelled => e,
            other => EconomyError::internal(format!("donation write failed: {other}")),
        })
    }

    /// Opens a donation, or returns the unexpired one already open.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for empty ids
    /// - `NotFound` for an unknown donation id
    /// - `FailedPrecondition` if the requester cannot pay
    /// - `Internal`/`ConcurrentModification` if the record write fails (cost refunded)
    pub fn request(
        &self,
        ctx: &Context,
        user_id: &str,
        donation_id: &str,
    ) -> EconomyResult<DonationRequestOutcome> {
        if user_id.is_empty() || donation_id.is_empty() {
            return Err(EconomyError::invalid("user id and donation id are required"));
        }
        let config = self.config(donation_id)?;
        if (config.request_cost.has_items() || config.cost.has_items())
            && self.inventory.is_none()
        {
            return Err(EconomyError::precondition(format!(
                "donation {donation_id} has item costs but no inventory system is configured"
            )));
        }

        let now = self.clock.now_sec();
        let existing = self.read(ctx, user_id, donation_id)?;
        if let Some(existing) = &existing {
            if !existing.value.is_expired(now) {
                debug!(user_id, donation_id, "donation already active");
                return Ok(DonationRequestOutcome {
                    donation: existing.value.clone(),
                    created: false,
                });
            }
        }
        let version = existing.map(|v| v.version);

        let metadata = donation_metadata(donation_id, "donation_request");
        let mut stack = CompensationStack::begin("donation_request");
        if let Err(e) = deduct_cost(
            &mut stack,
            ctx,
            self.wallet.as_ref(),
            self.inventory.as_deref(),
            user_id,
            &config.request_cost,
            &metadata,
        ) {
            return Err(stack.unwind(e));
        }

        let donation = Donation::new(donation_id, user_id, config, now);
        if let Err(e) = self.write(ctx, &donation, WriteCondition::after_read(version.as_deref())) {
            return Err(stack.unwind(e));
        }
        stack.commit();

        info!(
            user_id,
            donation_id,
            expire_time_sec = donation.expire_time_sec,
            "donation requested"
        );
        Ok(DonationRequestOutcome {
            donation,
            created: true,
        })
    }

    /// Contributes one unit from `contributor_id` to `recipient_id`'s donation.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for empty ids or a self-donation
    /// - `NotFound` for an unknown donation or a missing record
    /// - `FailedPrecondition` if the donation expired, is fulfilled, the
    ///   contributor reached their cap, or cannot pay
    /// - `Internal`/`ConcurrentModification` if the record write fails (cost refunded)
    pub fn give(
        &self,
        ctx: &Context,
        recipient_id: &str,
        donation_id: &str,
        contributor_id: &str,
    ) -> EconomyResult<DonationGiveOutcome> {
        if recipient_id.is_empty() || donation_id.is_empty() || contributor_id.is_empty() {
            return Err(EconomyError::invalid(
                "recipient, donation and contributor ids are required",
            ));
        }
        if recipient_id == contributor_id {
            return Err(EconomyError::invalid("users cannot donate to themselves"));
        }
        let config = self.config(donation_id)?;

        let now = self.clock.now_sec();
        let Versioned {
            value: mut donation,
            version,
        } = self
            .read(ctx, recipient_id, donation_id)?
            .ok_or_else(|| {
                EconomyError::NotFound(format!("donation {donation_id} for user {recipient_id}"))
            })?;

        if donation.is_expired(now) {
            return Err(EconomyError::precondition(format!("donation {donation_id} expired")));
        }
        if donation.is_fulfilled() {
            return Err(EconomyError::precondition(format!(
                "donation {donation_id} already fulfilled"
            )));
        }
        let amount = donation.contribution_amount(contributor_id);
        if amount == 0 {
            return Err(EconomyError::precondition(format!(
                "user {contributor_id} reached the contribution cap for {donation_id}"
            )));
        }

        let metadata = donation_metadata(donation_id, "donation_give");
        let mut stack = CompensationStack::begin("donation_give");
        if let Err(e) = deduct_cost(
            &mut stack,
            ctx,
            self.wallet.as_ref(),
            self.inventory.as_deref(),
            contributor_id,
            &config.cost.scaled(amount),
            &metadata,
        ) {
            return Err(stack.unwind(e));
        }

        donation.count += amount;
        donation.update_time_sec = now;
        match donation.contributors.iter_mut().find(|c| c.user_id == contributor_id) {
            Some(entry) => entry.count += amount,
            None => donation.contributors.push(DonationContributor {
                user_id: contributor_id.to_string(),
                count: amount,
                claim_count: 0,
            }),
        }

        if let Err(e) = self.write(ctx, &donation, WriteCondition::Version(version)) {
            return Err(stack.unwind(e));
        }
        stack.commit();

        let contributor_reward = if donation.is_fulfilled() {
            self.reward_contributor(ctx, config, contributor_id, &metadata)
        } else {
            None
        };

        info!(recipient_id, donation_id, contributor_id, count = donation.count, "donation given");
        Ok(DonationGiveOutcome {
            donation,
            contributor_reward,
        })
    }

    /// Rolls and grants the contributor reward. Failures are logged only.
    fn reward_contributor(
        &self,
        ctx: &Context,
        config: &DonationConfig,
        contributor_id: &str,
        metadata: &Metadata,
    ) -> Option<Reward> {
        let spec = config.contributor_reward.as_ref()?;
        let reward = self
            .roller
            .roll(Some(spec))
            .and_then(|reward| {
                self.granter
                    .grant(ctx, contributor_id, Some(&reward), metadata, false)
                    .map(|_| reward)
            });
        match reward {
            Ok(reward) => Some(reward),
            Err(e) => {
                warn!(contributor_id, error = %e, "contributor reward failed");
                None
            }
        }
    }

    /// Claims contributed units from several donations at once.
    ///
    /// A donation that cannot be claimed is logged and left out of the result.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty user id, `Cancelled` if the context ends.
    pub fn claim(
        &self,
        ctx: &Context,
        user_id: &str,
        claims: &BTreeMap<String, ClaimRequest>,
    ) -> EconomyResult<BTreeMap<String, Donation>> {
        if user_id.is_empty() {
            return Err(EconomyError::invalid("user id is required"));
        }

        let mut claimed = BTreeMap::new();
        for (donation_id, request) in claims {
            match self.claim_one(ctx, user_id, donation_id, request) {
                Ok(donation) => {
                    claimed.insert(donation_id.clone(), donation);
                }
                Err(EconomyError::Cancelled) => return Err(EconomyError::Cancelled),
                Err(e) => {
                    warn!(
                        user_id,
                        donation_id = %donation_id,
                        error = %e,
                        "donation claim skipped"
                    );
                }
            }
        }
        Ok(claimed)
    }

    fn claim_one(
        &self,
        ctx: &Context,
        user_id: &str,
        donation_id: &str,
        request: &ClaimRequest,
    ) -> EconomyResult<Donation> {
        let config = self.config(donation_id)?;
        let now = self.clock.now_sec();
        let Versioned {
            value: mut donation,
            version,
        } = self
            .read(ctx, user_id, donation_id)?
            .ok_or_else(|| {
                EconomyError::NotFound(format!("donation {donation_id} for user {user_id}"))
            })?;

        if donation.is_expired(now) {
            return Err(EconomyError::precondition(format!("donation {donation_id} expired")));
        }
        if donation.unclaimed() <= 0 {
            return Err(EconomyError::precondition(format!(
                "donation {donation_id} has nothing to claim"
            )));
        }

        let mut total = 0;
        for contributor in &mut donation.contributors {
            let available = contributor.unclaimed().max(0);
            let take = match request {
                ClaimRequest::All => available,
                ClaimRequest::Donors(amounts) => amounts
                    .get(&contributor.user_id)
                    .map_or(0, |&wanted| wanted.clamp(0, available)),
            };
            contributor.claim_count += take;
            total += take;
        }
        if total == 0 {
            return Err(EconomyError::precondition(format!(
                "no claimable units from the requested donors of {donation_id}"
            )));
        }

        let mut rewards = Vec::new();
        if let Some(spec) = &config.recipient_reward {
            for _ in 0..total {
                rewards.push(self.roller.roll(Some(spec))?);
            }
        }

        donation.claim_count += total;
        donation.update_time_sec = now;
        donation.recipient_rewards.extend(rewards.iter().cloned());
        self.write(ctx, &donation, WriteCondition::Version(version))?;

        let metadata = donation_metadata(donation_id, "donation_claim");
        for reward in &rewards {
            if let Err(e) = self.granter.grant(ctx, user_id, Some(reward), &metadata, false) {
                warn!(user_id, donation_id, error = %e, "recipient reward grant failed");
            }
        }

        info!(user_id, donation_id, claimed = total, "donation claimed");
        Ok(donation)
    }

    /// Every unexpired donation owned by each user.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty user id, store failures.
    pub fn get(
        &self,
        ctx: &Context,
        user_ids: &[String],
    ) -> EconomyResult<BTreeMap<UserId, Vec<Donation>>> {
        let now = self.clock.now_sec();
        let mut result = BTreeMap::new();

        for user_id in user_ids {
            if user_id.is_empty() {
                return Err(EconomyError::invalid("user id is required"));
            }
            let mut donations = Vec::new();
            let mut cursor: Option<String> = None;
            loop {
                let page = self
                    .store
                    .list(ctx, DONATIONS_COLLECTION, user_id, LIST_PAGE_SIZE, cursor.as_deref())?;
                for object in &page.objects {
                    let donation: Donation = serde_json::from_str(&object.value)?;
                    if !donation.is_expired(now) {
                        donations.push(donation);
                    }
                }
                match page.cursor {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
            result.insert(user_id.clone(), donations);
        }

        Ok(result)
    }
}

fn donation_metadata(donation_id: &str, source: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("donation_id".into(), donation_id.into());
    metadata.insert("source".into(), source.into());
    metadata
}
