//! # Economy System
//!
//! Top-level facade wiring configuration and collaborators into every
//! operation the RPC layer exposes.
//!
//! ```text
//! EconomySystem
//! ├── RewardRoller      (RandomSource, Clock)
//! ├── RewardGranter     (ObjectStore, WalletLedger, ItemStrategy)
//! ├── DonationLedger    (roller + granter + CompensationStack)
//! ├── PurchaseFlow      (roller + granter + ReceiptValidator)
//! └── PlacementMachine  (roller + granter + PublisherSink)
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::EconomyConfig;
use crate::context::Context;
use crate::donation::{
    ClaimRequest, Donation, DonationGiveOutcome, DonationLedger, DonationRequestOutcome,
};
use crate::error::EconomyResult;
use crate::granter::{GrantOutcome, ItemStrategy, RewardGranter};
use crate::placement::{PlacementMachine, PlacementStatus};
use crate::ports::{
    InventorySystem, ObjectStore, PublisherSink, ReceiptValidator, StoreType, WalletLedger,
};
use crate::purchase::{PurchaseFlow, PurchaseIntent, PurchaseOutcome, RestoredPurchase};
use crate::random::{ChaChaSource, RandomSource};
use crate::reward::{ActiveRewardModifier, Metadata, Reward, RewardSpec, UserId};
use crate::roller::RewardRoller;

/// Injected collaborators.
#[derive(Clone)]
pub struct Collaborators {
    /// Persistence store.
    pub store: Arc<dyn ObjectStore>,
    /// Currency ledger.
    pub wallet: Arc<dyn WalletLedger>,
    /// Inventory system. Without one, items go to direct storage and item
    /// costs are refused.
    pub inventory: Option<Arc<dyn InventorySystem>>,
    /// Event fan-out for placement completions.
    pub publisher: Option<Arc<dyn PublisherSink>>,
    /// Platform receipt validation.
    pub validator: Option<Arc<dyn ReceiptValidator>>,
    /// Random source for every roll.
    pub random: Arc<dyn RandomSource>,
    /// Wall clock.
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Store and wallet only, with an entropy-seeded random source and the
    /// system clock.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, wallet: Arc<dyn WalletLedger>) -> Self {
        Self {
            store,
            wallet,
            inventory: None,
            publisher: None,
            validator: None,
            random: Arc::new(ChaChaSource::from_entropy()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Sets the inventory system.
    #[must_use]
    pub fn with_inventory(mut self, inventory: Arc<dyn InventorySystem>) -> Self {
        self.inventory = Some(inventory);
        self
    }

    /// Sets the publisher.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn PublisherSink>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Sets the receipt validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn ReceiptValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Sets the random source.
    #[must_use]
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// The economy core.
pub struct EconomySystem {
    roller: RewardRoller,
    granter: Arc<RewardGranter>,
    donations: DonationLedger,
    purchases: PurchaseFlow,
    placements: PlacementMachine,
}

impl EconomySystem {
    /// Validates the configuration and wires every component.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration is invalid.
    pub fn new(mut config: EconomyConfig, collaborators: Collaborators) -> EconomyResult<Self> {
        config.validate()?;
        config.prepare();

        let Collaborators {
            store,
            wallet,
            inventory,
            publisher,
            validator,
            random,
            clock,
        } = collaborators;

        let roller = RewardRoller::new(random.clone(), clock.clone());
        let granter = Arc::new(RewardGranter::new(
            store.clone(),
            wallet.clone(),
            ItemStrategy::from_inventory(inventory.clone()),
            random,
            clock.clone(),
        ));

        info!(
            donations = config.donations.len(),
            store_items = config.store_items.len(),
            placements = config.placements.len(),
            inventory = inventory.is_some(),
            "economy system initialized"
        );

        let donations = DonationLedger::new(
            config.donations,
            store.clone(),
            wallet.clone(),
            inventory.clone(),
            roller.clone(),
            granter.clone(),
            clock.clone(),
        );
        let purchases = PurchaseFlow::new(
            config.store_items,
            store.clone(),
            wallet,
            inventory,
            validator,
            roller.clone(),
            granter.clone(),
            clock.clone(),
        );
        let placements = PlacementMachine::new(
            config.placements,
            store,
            publisher,
            roller.clone(),
            granter.clone(),
            clock,
        );

        Ok(Self {
            roller,
            granter,
            donations,
            purchases,
            placements,
        })
    }

    // ========================================================================
    // Rewards
    // ========================================================================

    /// Rolls a reward spec.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `spec` is `None`.
    pub fn roll_reward(&self, spec: Option<&RewardSpec>) -> EconomyResult<Reward> {
        self.roller.roll(spec)
    }

    /// Grants a rolled reward.
    ///
    /// # Errors
    ///
    /// See [`RewardGranter::grant`].
    pub fn grant_reward(
        &self,
        ctx: &Context,
        user_id: &str,
        reward: Option<&Reward>,
        metadata: &Metadata,
        ignore_limits: bool,
    ) -> EconomyResult<GrantOutcome> {
        self.granter.grant(ctx, user_id, reward, metadata, ignore_limits)
    }

    /// Unexpired reward modifiers of a user.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub fn active_reward_modifiers(
        &self,
        ctx: &Context,
        user_id: &str,
    ) -> EconomyResult<Vec<ActiveRewardModifier>> {
        self.granter.active_reward_modifiers(ctx, user_id)
    }

    // ========================================================================
    // Donations
    // ========================================================================

    /// See [`DonationLedger::request`].
    ///
    /// # Errors
    ///
    /// See [`DonationLedger::request`].
    pub fn donation_request(
        &self,
        ctx: &Context,
        user_id: &str,
        donation_id: &str,
    ) -> EconomyResult<DonationRequestOutcome> {
        self.donations.request(ctx, user_id, donation_id)
    }

    /// See [`DonationLedger::give`].
    ///
    /// # Errors
    ///
    /// See [`DonationLedger::give`].
    pub fn donation_give(
        &self,
        ctx: &Context,
        recipient_id: &str,
        donation_id: &str,
        contributor_id: &str,
    ) -> EconomyResult<DonationGiveOutcome> {
        self.donations.give(ctx, recipient_id, donation_id, contributor_id)
    }

    /// See [`DonationLedger::claim`].
    ///
    /// # Errors
    ///
    /// See [`DonationLedger::claim`].
    pub fn donation_claim(
        &self,
        ctx: &Context,
        user_id: &str,
        claims: &BTreeMap<String, ClaimRequest>,
    ) -> EconomyResult<BTreeMap<String, Donation>> {
        self.donations.claim(ctx, user_id, claims)
    }

    /// See [`DonationLedger::get`].
    ///
    /// # Errors
    ///
    /// See [`DonationLedger::get`].
    pub fn donation_get(
        &self,
        ctx: &Context,
        user_ids: &[String],
    ) -> EconomyResult<BTreeMap<UserId, Vec<Donation>>> {
        self.donations.get(ctx, user_ids)
    }

    // ========================================================================
    // Placements
    // ========================================================================

    /// See [`PlacementMachine::start`].
    ///
    /// # Errors
    ///
    /// See [`PlacementMachine::start`].
    pub fn placement_start(
        &self,
        ctx: &Context,
        user_id: &str,
        placement_id: &str,
        metadata: Metadata,
    ) -> EconomyResult<PlacementStatus> {
        self.placements.start(ctx, user_id, placement_id, metadata)
    }

    /// See [`PlacementMachine::success`].
    ///
    /// # Errors
    ///
    /// See [`PlacementMachine::success`].
    pub fn placement_success(
        &self,
        ctx: &Context,
        user_id: &str,
        placement_id: &str,
    ) -> EconomyResult<PlacementStatus> {
        self.placements.success(ctx, user_id, placement_id)
    }

    /// See [`PlacementMachine::fail`].
    ///
    /// # Errors
    ///
    /// See [`PlacementMachine::fail`].
    pub fn placement_fail(
        &self,
        ctx: &Context,
        user_id: &str,
        placement_id: &str,
    ) -> EconomyResult<PlacementStatus> {
        self.placements.fail(ctx, user_id, placement_id)
    }

    /// See [`PlacementMachine::status`].
    ///
    /// # Errors
    ///
    /// See [`PlacementMachine::status`].
    pub fn placement_status(
        &self,
        ctx: &Context,
        user_id: &str,
        placement_id: &str,
    ) -> EconomyResult<PlacementStatus> {
        self.placements.status(ctx, user_id, placement_id)
    }

    // ========================================================================
    // Purchases
    // ========================================================================

    /// See [`PurchaseFlow::intent`].
    ///
    /// # Errors
    ///
    /// See [`PurchaseFlow::intent`].
    pub fn purchase_intent(
        &self,
        ctx: &Context,
        user_id: &str,
        item_id: &str,
        store_type: StoreType,
        sku: &str,
    ) -> EconomyResult<PurchaseIntent> {
        self.purchases.intent(ctx, user_id, item_id, store_type, sku)
    }

    /// See [`PurchaseFlow::purchase`].
    ///
    /// # Errors
    ///
    /// See [`PurchaseFlow::purchase`].
    pub fn purchase_item(
        &self,
        ctx: &Context,
        user_id: &str,
        item_id: &str,
        store_type: StoreType,
        receipt: &str,
    ) -> EconomyResult<PurchaseOutcome> {
        self.purchases.purchase(ctx, user_id, item_id, store_type, receipt)
    }

    /// See [`PurchaseFlow::restore`].
    ///
    /// # Errors
    ///
    /// See [`PurchaseFlow::restore`].
    pub fn purchase_restore(
        &self,
        ctx: &Context,
        user_id: &str,
        store_type: StoreType,
        receipts: &[String],
    ) -> EconomyResult<Vec<RestoredPurchase>> {
        self.purchases.restore(ctx, user_id, store_type, receipts)
    }
}
