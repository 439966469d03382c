//! # Purchase Flows
//!
//! Two kinds of store items:
//!
//! - **Soft currency**: a declared [`Cost`] is deducted, then the reward is
//!   rolled and granted. A failed grant refunds the cost.
//! - **Platform (SKU)**: the client first records an intent, then presents a
//!   receipt. The receipt is validated, the intent is marked consumed with a
//!   version-checked write, then the reward is rolled and granted. A failed
//!   grant restores the unconsumed intent.
//!
//! A consumed intent cannot be replayed; the client must record a new one.
//! Each platform transaction is recorded when it is redeemed, so a receipt
//! presented again against a fresh intent is refused.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info};

use crate::clock::Clock;
use crate::context::Context;
use crate::error::{EconomyError, EconomyResult};
use crate::granter::{GrantOutcome, RewardGranter};
use crate::ports::{
    InventorySystem, ObjectStore, ReceiptValidator, StoreType, WalletLedger, WriteCondition,
};
use crate::records::{read_record, write_record, Versioned};
use crate::reward::{Cost, ItemId, Metadata, Reward, RewardSpec, UserId};
use crate::roller::RewardRoller;
use crate::saga::{deduct_cost, CompensationStack};

/// Collection holding purchase intents, keyed by store item id.
pub const PURCHASE_INTENTS_COLLECTION: &str = "purchase_intents";

/// Collection holding redeemed platform transactions, keyed by transaction id.
pub const PURCHASE_TRANSACTIONS_COLLECTION: &str = "purchase_transactions";

/// Static definition of a store item.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreItemConfig {
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: String,
    /// Display category.
    pub category: String,
    /// Soft-currency price. Exclusive with `sku`.
    pub cost: Cost,
    /// Platform product id. Exclusive with `cost`.
    pub sku: String,
    /// Rolled and granted on purchase.
    pub reward: Option<RewardSpec>,
    /// Passed through to clients.
    pub additional_properties: BTreeMap<String, String>,
}

impl StoreItemConfig {
    /// True if bought through a platform store.
    #[must_use]
    pub fn is_platform(&self) -> bool {
        !self.sku.is_empty()
    }

    /// Checks that exactly one of cost or SKU is declared.
    ///
    /// # Errors
    ///
    /// [`EconomyError::InvalidConfig`].
    pub fn validate(&self, id: &str) -> EconomyResult<()> {
        match (self.cost.is_empty(), self.sku.is_empty()) {
            (true, true) => {
                return Err(EconomyError::InvalidConfig(format!(
                    "store item {id} declares neither a cost nor a sku"
                )))
            }
            (false, false) => {
                return Err(EconomyError::InvalidConfig(format!(
                    "store item {id} declares both a cost and a sku"
                )))
            }
            _ => {}
        }
        self.cost.validate()?;
        if let Some(reward) = &self.reward {
            reward.validate()?;
        }
        Ok(())
    }
}

/// A recorded intent to buy a platform item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseIntent {
    /// Buyer.
    pub user_id: UserId,
    /// Store item id.
    pub item_id: ItemId,
    /// Platform store.
    pub store_type: StoreType,
    /// Platform product id.
    pub sku: String,
    /// Set once a validated receipt redeemed the intent.
    pub consumed: bool,
    /// Platform transaction that consumed the intent.
    #[serde(default)]
    pub transaction_id: String,
    /// When the intent was recorded.
    pub create_time_sec: i64,
    /// Last change.
    pub update_time_sec: i64,
}

/// A platform transaction that redeemed a store item.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemedTransaction {
    /// Platform transaction id.
    pub transaction_id: String,
    /// Store item the transaction redeemed.
    pub item_id: ItemId,
    /// Platform store.
    pub store_type: StoreType,
    /// True for sandbox purchases.
    pub sandbox: bool,
    /// Set when the redemption was rolled back; the transaction may be used again.
    #[serde(default)]
    pub released: bool,
    /// Last change.
    pub update_time_sec: i64,
}

/// Result of a completed purchase.
#[derive(Clone, Debug, PartialEq)]
pub struct PurchaseOutcome {
    /// Store item id.
    pub item_id: ItemId,
    /// What was rolled and granted.
    pub reward: Reward,
    /// Item buckets from the grant.
    pub grant: GrantOutcome,
    /// True for sandbox platform purchases.
    pub sandbox: bool,
}

/// A previously bought platform item confirmed by a receipt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestoredPurchase {
    /// Store item id.
    pub item_id: ItemId,
    /// Platform product id.
    pub sku: String,
    /// Platform transaction id.
    pub transaction_id: String,
    /// True for sandbox purchases.
    pub sandbox: bool,
}

/// Store purchase operations.
pub struct PurchaseFlow {
    items: BTreeMap<ItemId, StoreItemConfig>,
    store: Arc<dyn ObjectStore>,
    wallet: Arc<dyn WalletLedger>,
    inventory: Option<Arc<dyn InventorySystem>>,
    validator: Option<Arc<dyn ReceiptValidator>>,
    roller: RewardRoller,
    granter: Arc<RewardGranter>,
    clock: Arc<dyn Clock>,
}

impl PurchaseFlow {
    /// Creates the purchase flow.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        items: BTreeMap<ItemId, StoreItemConfig>,
        store: Arc<dyn ObjectStore>,
        wallet: Arc<dyn WalletLedger>,
        inventory: Option<Arc<dyn InventorySystem>>,
        validator: Option<Arc<dyn ReceiptValidator>>,
        roller: RewardRoller,
        granter: Arc<RewardGranter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            items,
            store,
            wallet,
            inventory,
            validator,
            roller,
            granter,
            clock,
        }
    }

    fn config(&self, item_id: &str) -> EconomyResult<&StoreItemConfig> {
        self.items
            .get(item_id)
            .ok_or_else(|| EconomyError::NotFound(format!("store item {item_id}")))
    }

    fn validator(&self) -> EconomyResult<&dyn ReceiptValidator> {
        self.validator
            .as_deref()
            .ok_or_else(|| EconomyError::precondition("no receipt validator is configured"))
    }

    /// Records the intent to buy a platform item.
    ///
    /// An unconsumed intent is overwritten, a consumed one is replaced.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for empty ids or a SKU that does not match the item
    /// - `NotFound` for an unknown store item
    /// - `FailedPrecondition` for a soft-currency item
    pub fn intent(
        &self,
        ctx: &Context,
        user_id: &str,
        item_id: &str,
        store_type: StoreType,
        sku: &str,
    ) -> EconomyResult<PurchaseIntent> {
        if user_id.is_empty() || item_id.is_empty() {
            return Err(EconomyError::invalid("user id and item id are required"));
        }
        let config = self.config(item_id)?;
        if !config.is_platform() {
            return Err(EconomyError::precondition(format!(
                "store item {item_id} is bought with soft currency"
            )));
        }
        if config.sku != sku {
            return Err(EconomyError::invalid(format!(
                "sku {sku} does not match store item {item_id}"
            )));
        }

        let now = self.clock.now_sec();
        let existing = read_record::<PurchaseIntent>(
            self.store.as_ref(),
            ctx,
            PURCHASE_INTENTS_COLLECTION,
            item_id,
            user_id,
        )?;
        let intent = PurchaseIntent {
            user_id: user_id.to_string(),
            item_id: item_id.to_string(),
            store_type,
            sku: sku.to_string(),
            consumed: false,
            transaction_id: String::new(),
            create_time_sec: now,
            update_time_sec: now,
        };
        write_record(
            self.store.as_ref(),
            ctx,
            PURCHASE_INTENTS_COLLECTION,
            item_id,
            user_id,
            &intent,
            WriteCondition::after_read(existing.as_ref().map(|v| v.version.as_str())),
        )?;

        debug!(user_id, item_id, sku, "purchase intent recorded");
        Ok(intent)
    }

    /// Buys a store item.
    ///
    /// `receipt` is ignored for soft-currency items.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for empty ids, a missing receipt or a store mismatch
    /// - `NotFound` for an unknown store item
    /// - `FailedPrecondition` if the user cannot pay, the intent is missing or
    ///   consumed, the receipt does not cover the SKU, or its transaction was
    ///   already redeemed
    /// - `Internal`/`ConcurrentModification` after the flow was unwound
    pub fn purchase(
        &self,
        ctx: &Context,
        user_id: &str,
        item_id: &str,
        store_type: StoreType,
        receipt: &str,
    ) -> EconomyResult<PurchaseOutcome> {
        if user_id.is_empty() || item_id.is_empty() {
            return Err(EconomyError::invalid("user id and item id are required"));
        }
        let config = self.config(item_id)?;
        if config.is_platform() {
            self.purchase_platform(ctx, user_id, item_id, config, store_type, receipt)
        } else {
            self.purchase_soft(ctx, user_id, item_id, config)
        }
    }

    fn purchase_soft(
        &self,
        ctx: &Context,
        user_id: &str,
        item_id: &str,
        config: &StoreItemConfig,
    ) -> EconomyResult<PurchaseOutcome> {
        let metadata = purchase_metadata(item_id, None);
        let mut stack = CompensationStack::begin("purchase_item");
        if let Err(e) = deduct_cost(
            &mut stack,
            ctx,
            self.wallet.as_ref(),
            self.inventory.as_deref(),
            user_id,
            &config.cost,
            &metadata,
        ) {
            return Err(stack.unwind(e));
        }

        match self.roll_and_grant(ctx, user_id, config, &metadata) {
            Ok((reward, grant)) => {
                stack.commit();
                info!(user_id, item_id, "store item purchased");
                Ok(PurchaseOutcome {
                    item_id: item_id.to_string(),
                    reward,
                    grant,
                    sandbox: false,
                })
            }
            Err(e) => Err(stack.unwind(e)),
        }
    }

    fn purchase_platform(
        &self,
        ctx: &Context,
        user_id: &str,
        item_id: &str,
        config: &StoreItemConfig,
        store_type: StoreType,
        receipt: &str,
    ) -> EconomyResult<PurchaseOutcome> {
        if receipt.is_empty() {
            return Err(EconomyError::invalid("receipt is required"));
        }
        let Versioned { value: intent, version } = read_record::<PurchaseIntent>(
            self.store.as_ref(),
            ctx,
            PURCHASE_INTENTS_COLLECTION,
            item_id,
            user_id,
        )?
        .ok_or_else(|| EconomyError::precondition(format!("no purchase intent for {item_id}")))?;

        if intent.consumed {
            return Err(EconomyError::precondition(format!(
                "purchase intent for {item_id} was already consumed"
            )));
        }
        if intent.store_type != store_type {
            return Err(EconomyError::invalid(format!(
                "purchase intent for {item_id} was recorded for another store"
            )));
        }

        let purchases = self.validator()?.validate(ctx, store_type, user_id, receipt)?;
        let purchase = purchases
            .into_iter()
            .find(|p| p.product_id == config.sku)
            .ok_or_else(|| {
                EconomyError::precondition(format!("receipt does not cover sku {}", config.sku))
            })?;

        let redeemed = read_record::<RedeemedTransaction>(
            self.store.as_ref(),
            ctx,
            PURCHASE_TRANSACTIONS_COLLECTION,
            &purchase.transaction_id,
            user_id,
        )?;
        if redeemed.as_ref().is_some_and(|r| !r.value.released) {
            return Err(EconomyError::precondition(format!(
                "transaction {} was already redeemed",
                purchase.transaction_id
            )));
        }

        let now = self.clock.now_sec();
        let consumed = PurchaseIntent {
            consumed: true,
            transaction_id: purchase.transaction_id.clone(),
            update_time_sec: now,
            ..intent.clone()
        };
        let consumed_version = write_record(
            self.store.as_ref(),
            ctx,
            PURCHASE_INTENTS_COLLECTION,
            item_id,
            user_id,
            &consumed,
            WriteCondition::Version(version),
        )?;

        let mut stack = CompensationStack::begin("purchase_item");
        let store = self.store.as_ref();
        let (key, owner) = (item_id.to_string(), user_id.to_string());
        stack.push("restore purchase intent", move |ctx| {
            write_record(
                store,
                ctx,
                PURCHASE_INTENTS_COLLECTION,
                &key,
                &owner,
                &intent,
                WriteCondition::Version(consumed_version),
            )
            .map(|_| ())
        });

        let record = RedeemedTransaction {
            transaction_id: purchase.transaction_id.clone(),
            item_id: item_id.to_string(),
            store_type,
            sandbox: purchase.sandbox,
            released: false,
            update_time_sec: now,
        };
        let record_version = match write_record(
            store,
            ctx,
            PURCHASE_TRANSACTIONS_COLLECTION,
            &record.transaction_id,
            user_id,
            &record,
            WriteCondition::after_read(redeemed.as_ref().map(|v| v.version.as_str())),
        ) {
            Ok(version) => version,
            Err(e) => return Err(stack.unwind(e)),
        };
        let owner = user_id.to_string();
        let released = RedeemedTransaction {
            released: true,
            ..record
        };
        stack.push("release transaction", move |ctx| {
            write_record(
                store,
                ctx,
                PURCHASE_TRANSACTIONS_COLLECTION,
                &released.transaction_id,
                &owner,
                &released,
                WriteCondition::Version(record_version),
            )
            .map(|_| ())
        });

        let metadata = purchase_metadata(item_id, Some(&purchase.transaction_id));
        match self.roll_and_grant(ctx, user_id, config, &metadata) {
            Ok((reward, grant)) => {
                stack.commit();
                info!(
                    user_id,
                    item_id,
                    transaction_id = %purchase.transaction_id,
                    sandbox = purchase.sandbox,
                    "platform purchase redeemed"
                );
                Ok(PurchaseOutcome {
                    item_id: item_id.to_string(),
                    reward,
                    grant,
                    sandbox: purchase.sandbox,
                })
            }
            Err(e) => Err(stack.unwind(e)),
        }
    }

    fn roll_and_grant(
        &self,
        ctx: &Context,
        user_id: &str,
        config: &StoreItemConfig,
        metadata: &Metadata,
    ) -> EconomyResult<(Reward, GrantOutcome)> {
        let Some(spec) = &config.reward else {
            return Ok((Reward::default(), GrantOutcome::default()));
        };
        let reward = self.roller.roll(Some(spec))?;
        let grant = self.granter.grant(ctx, user_id, Some(&reward), metadata, false)?;
        Ok((reward, grant))
    }

    /// Lists the platform items covered by previously issued receipts.
    ///
    /// Nothing is granted again.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty user id or no receipts,
    /// `FailedPrecondition` without a validator or for a rejected receipt.
    pub fn restore(
        &self,
        ctx: &Context,
        user_id: &str,
        store_type: StoreType,
        receipts: &[String],
    ) -> EconomyResult<Vec<RestoredPurchase>> {
        if user_id.is_empty() {
            return Err(EconomyError::invalid("user id is required"));
        }
        if receipts.is_empty() {
            return Err(EconomyError::invalid("at least one receipt is required"));
        }
        let validator = self.validator()?;

        let mut seen = BTreeSet::new();
        let mut restored = Vec::new();
        for receipt in receipts {
            for purchase in validator.validate(ctx, store_type, user_id, receipt)? {
                let matching = self.items.iter().filter(|(_, c)| c.sku == purchase.product_id);
                for (item_id, config) in matching {
                    if seen.insert((purchase.transaction_id.clone(), item_id.clone())) {
                        restored.push(RestoredPurchase {
                            item_id: item_id.clone(),
                            sku: config.sku.clone(),
                            transaction_id: purchase.transaction_id.clone(),
                            sandbox: purchase.sandbox,
                        });
                    }
                }
            }
        }

        debug!(user_id, restored = restored.len(), "purchases restored");
        Ok(restored)
    }
}

fn purchase_metadata(item_id: &str, transaction_id: Option<&str>) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("store_item_id".into(), item_id.into());
    metadata.insert("source".into(), "purchase".into());
    if let Some(transaction_id) = transaction_id {
        metadata.insert("transaction_id".into(), transaction_id.into());
    }
    metadata
}
