//! # Reward Granter
//!
//! Applies a rolled [`Reward`] to a user's durable state.
//!
//! ## Step Guarantees
//!
//! | Step             | Collaborator            | On failure                      |
//! |------------------|-------------------------|---------------------------------|
//! | currencies       | [`WalletLedger`]        | abort, `Internal`               |
//! | items            | [`ItemStrategy`]        | abort, `Internal`/conflict      |
//! | energies         | object store            | logged, grant still succeeds    |
//! | energy modifiers | object store            | logged, grant still succeeds    |
//! | reward modifiers | object store            | logged, grant still succeeds    |
//!
//! Currency goes first so there is never anything to unwind when it fails.
//! Later best-effort failures do NOT unwind currency or items: that asymmetry
//! is the contract.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::context::Context;
use crate::error::{EconomyError, EconomyResult};
use crate::ports::{InventoryItem, InventorySystem, ObjectStore, WalletLedger, WriteCondition};
use crate::random::{random_id, RandomSource};
use crate::records::{read_record, write_record};
use crate::reward::{ActiveRewardModifier, ItemId, Metadata, Reward};

/// Collection holding per-user economy state written by the granter.
pub const ECONOMY_COLLECTION: &str = "economy";
/// Direct-storage item map key.
pub const ITEMS_KEY: &str = "items";
/// Energy balance key.
pub const ENERGIES_KEY: &str = "energies";
/// Energy modifier list key.
pub const ENERGY_MODIFIERS_KEY: &str = "energy_modifiers";
/// Reward modifier list key.
pub const REWARD_MODIFIERS_KEY: &str = "reward_modifiers";

/// How item quantities reach the user. Chosen once at construction.
#[derive(Clone)]
pub enum ItemStrategy {
    /// Delegate to the inventory system (limits, stacking).
    Inventory(Arc<dyn InventorySystem>),
    /// Merge into a flat per-user item map in the object store.
    DirectStorage,
}

impl ItemStrategy {
    /// Inventory when one is configured, direct storage otherwise.
    #[must_use]
    pub fn from_inventory(inventory: Option<Arc<dyn InventorySystem>>) -> Self {
        inventory.map_or(Self::DirectStorage, Self::Inventory)
    }
}

/// Item buckets produced by a grant.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GrantOutcome {
    /// Instances created.
    pub new_items: BTreeMap<String, InventoryItem>,
    /// Instances whose count changed.
    pub updated_items: BTreeMap<String, InventoryItem>,
    /// Item ids the inventory refused because of limits.
    pub not_granted: Vec<ItemId>,
}

/// An energy modifier stored against a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveEnergyModifier {
    /// Energy id.
    pub id: String,
    /// Operator.
    pub operator: String,
    /// Value.
    pub value: i64,
    /// When it was granted.
    pub start_time_sec: i64,
    /// When it stops applying; `0` means never.
    pub end_time_sec: i64,
}

/// Applies rewards to wallets, inventories and modifier lists.
pub struct RewardGranter {
    store: Arc<dyn ObjectStore>,
    wallet: Arc<dyn WalletLedger>,
    items: ItemStrategy,
    rng: Arc<dyn RandomSource>,
    clock: Arc<dyn Clock>,
}

impl RewardGranter {
    /// Creates a granter.
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        wallet: Arc<dyn WalletLedger>,
        items: ItemStrategy,
        rng: Arc<dyn RandomSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            wallet,
            items,
            rng,
            clock,
        }
    }

    /// Grants a reward.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `reward` is `None` or `user_id` is empty
    /// - `Internal` if the wallet or the item step fails
    /// - `ConcurrentModification` if the direct item map changed under us
    pub fn grant(
        &self,
        ctx: &Context,
        user_id: &str,
        reward: Option<&Reward>,
        metadata: &Metadata,
        ignore_limits: bool,
    ) -> EconomyResult<GrantOutcome> {
        let reward = reward.ok_or_else(|| EconomyError::invalid("reward is required"))?;
        if user_id.is_empty() {
            return Err(EconomyError::invalid("user id is required"));
        }

        if !reward.currencies.is_empty() {
            self.wallet
                .update(ctx, user_id, &reward.currencies, metadata)
                .map_err(|e| match e {
                    EconomyError::Cancelled => e,
                    other => EconomyError::internal(format!("wallet update failed: {other}")),
                })?;
        }

        let outcome = if reward.items.is_empty() {
            GrantOutcome::default()
        } else {
            match &self.items {
                ItemStrategy::Inventory(inventory) => {
                    self.grant_via_inventory(
                        ctx,
                        inventory.as_ref(),
                        user_id,
                        reward,
                        ignore_limits,
                    )?
                }
                ItemStrategy::DirectStorage => self.grant_direct(ctx, user_id, reward)?,
            }
        };

        if !reward.energies.is_empty() {
            if let Err(e) = self.grant_energies(ctx, user_id, reward) {
                warn!(user_id, error = %e, "energy grant failed");
            }
        }
        if !reward.energy_modifiers.is_empty() {
            if let Err(e) = self.grant_energy_modifiers(ctx, user_id, reward) {
                warn!(user_id, error = %e, "energy modifier grant failed");
            }
        }
        if !reward.reward_modifiers.is_empty() {
            if let Err(e) = self.grant_reward_modifiers(ctx, user_id, reward) {
                warn!(user_id, error = %e, "reward modifier grant failed");
            }
        }

        debug!(
            user_id,
            currencies = reward.currencies.len(),
            items = reward.items.len(),
            not_granted = outcome.not_granted.len(),
            "reward granted"
        );
        Ok(outcome)
    }

    fn grant_via_inventory(
        &self,
        ctx: &Context,
        inventory: &dyn InventorySystem,
        user_id: &str,
        reward: &Reward,
        ignore_limits: bool,
    ) -> EconomyResult<GrantOutcome> {
        let grant = inventory
            .grant_items(ctx, user_id, &reward.items, ignore_limits)
            .map_err(|e| EconomyError::internal(format!("inventory grant failed: {e}")))?;

        if !reward.item_instances.is_empty() {
            let granted = grant
                .new_items
                .values()
                .chain(grant.updated_items.values())
                .filter(|item| !grant.not_granted.contains(&item.item_id));

            for item in granted {
                let Some(instance) = reward.item_instances.get(&item.item_id) else {
                    continue;
                };
                inventory
                    .update_item_properties(
                        ctx,
                        user_id,
                        &item.instance_id,
                        &instance.string_properties,
                        &instance.numeric_properties,
                    )
                    .map_err(|e| {
                        EconomyError::internal(format!(
                            "property update for instance {} failed: {e}",
                            item.instance_id
                        ))
                    })?;
            }
        }

        Ok(GrantOutcome {
            new_items: grant.new_items,
            updated_items: grant.updated_items,
            not_granted: grant.not_granted,
        })
    }

    /// Fallback when no inventory system is configured.
    fn grant_direct(
        &self,
        ctx: &Context,
        user_id: &str,
        reward: &Reward,
    ) -> EconomyResult<GrantOutcome> {
        let existing = read_record::<BTreeMap<String, InventoryItem>>(
            self.store.as_ref(),
            ctx,
            ECONOMY_COLLECTION,
            ITEMS_KEY,
            user_id,
        )?;
        let version = existing.as_ref().map(|v| v.version.clone());
        let mut items = existing.map(|v| v.value).unwrap_or_default();
        let mut outcome = GrantOutcome::default();

        for (item_id, &quantity) in &reward.items {
            if quantity <= 0 {
                continue;
            }
            let rolled = reward.item_instances.get(item_id);

            if let Some(item) = items.values_mut().find(|i| i.item_id == *item_id) {
                item.count = item.count.saturating_add(quantity);
                if let Some(rolled) = rolled {
                    item.string_properties.extend(rolled.string_properties.clone());
                    item.numeric_properties.extend(rolled.numeric_properties.clone());
                }
                outcome.updated_items.insert(item.instance_id.clone(), item.clone());
            } else {
                let instance_id = random_id(self.rng.as_ref());
                let item = InventoryItem {
                    instance_id: instance_id.clone(),
                    item_id: item_id.clone(),
                    count: quantity,
                    string_properties: rolled
                        .map(|r| r.string_properties.clone())
                        .unwrap_or_default(),
                    numeric_properties: rolled
                        .map(|r| r.numeric_properties.clone())
                        .unwrap_or_default(),
                };
                outcome.new_items.insert(instance_id.clone(), item.clone());
                items.insert(instance_id, item);
            }
        }

        write_record(
            self.store.as_ref(),
            ctx,
            ECONOMY_COLLECTION,
            ITEMS_KEY,
            user_id,
            &items,
            WriteCondition::after_read(version.as_deref()),
        )?;
        Ok(outcome)
    }

    fn grant_energies(&self, ctx: &Context, user_id: &str, reward: &Reward) -> EconomyResult<()> {
        self.modify::<BTreeMap<String, i32>>(ctx, user_id, ENERGIES_KEY, |balances| {
            for (id, amount) in &reward.energies {
                let balance = balances.entry(id.clone()).or_insert(0);
                *balance = balance.saturating_add(*amount);
            }
        })
    }

    fn grant_energy_modifiers(
        &self,
        ctx: &Context,
        user_id: &str,
        reward: &Reward,
    ) -> EconomyResult<()> {
        let now = self.clock.now_sec();
        self.modify::<Vec<ActiveEnergyModifier>>(ctx, user_id, ENERGY_MODIFIERS_KEY, |list| {
            list.retain(|m| m.end_time_sec == 0 || m.end_time_sec > now);
            list.extend(reward.energy_modifiers.iter().map(|m| ActiveEnergyModifier {
                id: m.id.clone(),
                operator: m.operator.clone(),
                value: m.value,
                start_time_sec: now,
                end_time_sec: end_time(now, m.duration_sec),
            }));
        })
    }

    fn grant_reward_modifiers(
        &self,
        ctx: &Context,
        user_id: &str,
        reward: &Reward,
    ) -> EconomyResult<()> {
        let now = self.clock.now_sec();
        self.modify::<Vec<ActiveRewardModifier>>(ctx, user_id, REWARD_MODIFIERS_KEY, |list| {
            list.retain(|m| m.is_active(now));
            list.extend(reward.reward_modifiers.iter().map(|m| ActiveRewardModifier {
                id: m.id.clone(),
                modifier_type: m.modifier_type.clone(),
                operator: m.operator.clone(),
                value: m.value,
                start_time_sec: now,
                end_time_sec: end_time(now, m.duration_sec),
            }));
        })
    }

    /// Unexpired reward modifiers for a user.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub fn active_reward_modifiers(
        &self,
        ctx: &Context,
        user_id: &str,
    ) -> EconomyResult<Vec<ActiveRewardModifier>> {
        let now = self.clock.now_sec();
        let list = read_record::<Vec<ActiveRewardModifier>>(
            self.store.as_ref(),
            ctx,
            ECONOMY_COLLECTION,
            REWARD_MODIFIERS_KEY,
            user_id,
        )?
        .map(|v| v.value)
        .unwrap_or_default();
        Ok(list.into_iter().filter(|m| m.is_active(now)).collect())
    }

    /// Stored energy balances for a user.
    ///
    /// # Errors
    ///
    /// Store failures.
    pub fn energies(&self, ctx: &Context, user_id: &str) -> EconomyResult<BTreeMap<String, i32>> {
        Ok(read_record::<BTreeMap<String, i32>>(
            self.store.as_ref(),
            ctx,
            ECONOMY_COLLECTION,
            ENERGIES_KEY,
            user_id,
        )?
        .map(|v| v.value)
        .unwrap_or_default())
    }

    /// Read-modify-write of one per-user record, version-checked.
    fn modify<T>(
        &self,
        ctx: &Context,
        user_id: &str,
        key: &str,
        apply: impl FnOnce(&mut T),
    ) -> EconomyResult<()>
    where
        T: Default + Serialize + DeserializeOwned,
    {
        let existing =
            read_record::<T>(self.store.as_ref(), ctx, ECONOMY_COLLECTION, key, user_id)?;
        let version = existing.as_ref().map(|v| v.version.clone());
        let mut value = existing.map(|v| v.value).unwrap_or_default();
        apply(&mut value);
        write_record(
            self.store.as_ref(),
            ctx,
            ECONOMY_COLLECTION,
            key,
            user_id,
            &value,
            WriteCondition::after_read(version.as_deref()),
        )?;
        Ok(())
    }
}

fn end_time(now: i64, duration_sec: u64) -> i64 {
    if duration_sec == 0 {
        0
    } else {
        now.saturating_add(i64::try_from(duration_sec).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::{MemoryInventory, MemoryStore, MemoryWallet};
    use crate::random::ChaChaSource;
    use crate::reward::{AppliedEnergyModifier, AppliedRewardModifier, RolledItemInstance};

    struct Fixture {
        store: Arc<MemoryStore>,
        wallet: Arc<MemoryWallet>,
        inventory: Arc<MemoryInventory>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                wallet: Arc::new(MemoryWallet::new()),
                inventory: Arc::new(MemoryInventory::new()),
                clock: Arc::new(ManualClock::new(1_000)),
            }
        }

        fn granter(&self, with_inventory: bool) -> RewardGranter {
            let items = if with_inventory {
                ItemStrategy::Inventory(self.inventory.clone())
            } else {
                ItemStrategy::DirectStorage
            };
            RewardGranter::new(
                self.store.clone(),
                self.wallet.clone(),
                items,
                Arc::new(ChaChaSource::seeded(1)),
                self.clock.clone(),
            )
        }
    }

    fn reward_with_sword() -> Reward {
        let mut reward = Reward::default();
        reward.currencies.insert("coins".into(), 100);
        reward.items.insert("sword".into(), 1);
        let mut instance = RolledItemInstance::default();
        instance.string_properties.insert("color".into(), "red".into());
        instance.numeric_properties.insert("damage".into(), 12.0);
        reward.item_instances.insert("sword".into(), instance);
        reward
    }

    #[test]
    fn test_rejects_missing_reward_and_user() {
        let fx = Fixture::new();
        let granter = fx.granter(true);
        let ctx = Context::background();

        assert!(matches!(
            granter.grant(&ctx, "u1", None, &Metadata::new(), false),
            Err(EconomyError::InvalidArgument(_))
        ));
        assert!(matches!(
            granter.grant(&ctx, "", Some(&Reward::default()), &Metadata::new(), false),
            Err(EconomyError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_grant_via_inventory_sets_properties() {
        let fx = Fixture::new();
        let granter = fx.granter(true);
        let ctx = Context::background();

        let outcome = granter
            .grant(&ctx, "u1", Some(&reward_with_sword()), &Metadata::new(), false)
            .unwrap();

        assert_eq!(fx.wallet.balance("u1", "coins"), 100);
        assert_eq!(outcome.new_items.len(), 1);
        let instance_id = outcome.new_items.keys().next().unwrap();
        let stored = fx.inventory.item("u1", instance_id).unwrap();
        assert_eq!(stored.string_properties["color"], "red");
        assert!((stored.numeric_properties["damage"] - 12.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_not_granted_items_skip_property_update() {
        let fx = Fixture::new();
        fx.inventory.set_limit("sword", 0);
        let granter = fx.granter(true);

        let outcome = granter
            .grant(
                &Context::background(),
                "u1",
                Some(&reward_with_sword()),
                &Metadata::new(),
                false,
            )
            .unwrap();

        assert_eq!(outcome.not_granted, vec!["sword".to_string()]);
        assert!(outcome.new_items.is_empty());
        assert_eq!(fx.inventory.count("u1", "sword"), 0);
    }

    #[test]
    fn test_currency_failure_is_fatal() {
        let fx = Fixture::new();
        fx.wallet.fail_next_update();
        let granter = fx.granter(true);

        let err = granter
            .grant(
                &Context::background(),
                "u1",
                Some(&reward_with_sword()),
                &Metadata::new(),
                false,
            )
            .unwrap_err();

        assert!(matches!(err, EconomyError::Internal(_)));
        assert_eq!(fx.inventory.count("u1", "sword"), 0);
    }

    #[test]
    fn test_direct_storage_merges_items() {
        let fx = Fixture::new();
        let granter = fx.granter(false);
        let ctx = Context::background();

        let first = granter
            .grant(&ctx, "u1", Some(&reward_with_sword()), &Metadata::new(), false)
            .unwrap();
        assert_eq!(first.new_items.len(), 1);

        let mut second_reward = reward_with_sword();
        second_reward
            .item_instances
            .get_mut("sword")
            .unwrap()
            .string_properties
            .insert("color".into(), "blue".into());
        let second = granter
            .grant(&ctx, "u1", Some(&second_reward), &Metadata::new(), false)
            .unwrap();

        assert!(second.new_items.is_empty());
        let item = second.updated_items.values().next().unwrap();
        assert_eq!(item.count, 2);
        assert_eq!(item.string_properties["color"], "blue");
        assert_eq!(first.new_items.keys().next(), second.updated_items.keys().next());
    }

    #[test]
    fn test_best_effort_steps_do_not_fail_grant() {
        let fx = Fixture::new();
        fx.store.fail_writes(ECONOMY_COLLECTION);
        let granter = fx.granter(true);

        let mut reward = reward_with_sword();
        reward.energies.insert("stamina".into(), 5);
        reward.reward_modifiers.push(AppliedRewardModifier {
            id: "coins".into(),
            modifier_type: "currency".into(),
            operator: "multiplier".into(),
            value: 2,
            duration_sec: 60,
        });

        let outcome =
            granter.grant(&Context::background(), "u1", Some(&reward), &Metadata::new(), false);

        assert!(outcome.is_ok());
        assert_eq!(fx.wallet.balance("u1", "coins"), 100);
    }

    #[test]
    fn test_modifiers_stored_and_expire() {
        let fx = Fixture::new();
        let granter = fx.granter(true);
        let ctx = Context::background();

        let mut reward = Reward::default();
        reward.energies.insert("stamina".into(), 5);
        reward.energy_modifiers.push(AppliedEnergyModifier {
            id: "stamina".into(),
            operator: "infinite".into(),
            value: 1,
            duration_sec: 0,
        });
        reward.reward_modifiers.push(AppliedRewardModifier {
            id: "coins".into(),
            modifier_type: "currency".into(),
            operator: "multiplier".into(),
            value: 2,
            duration_sec: 60,
        });
        granter.grant(&ctx, "u1", Some(&reward), &Metadata::new(), false).unwrap();
        granter.grant(&ctx, "u1", Some(&reward), &Metadata::new(), false).unwrap();

        assert_eq!(granter.energies(&ctx, "u1").unwrap()["stamina"], 10);
        let active = granter.active_reward_modifiers(&ctx, "u1").unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].end_time_sec, 1_060);

        fx.clock.advance(61);
        assert!(granter.active_reward_modifiers(&ctx, "u1").unwrap().is_empty());
    }
}
