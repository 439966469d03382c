//! # Inventory
//!
//! One stackable instance per item id and user, with optional per-item count
//! limits. Consumption is all-or-nothing: the user's items are snapshotted
//! before a multi-item change and restored if any entry cannot be applied.

use parking_lot::Mutex;
use std::collections::BTreeMap;

use crate::context::Context;
use crate::error::{EconomyError, EconomyResult};
use crate::ports::{InventoryGrant, InventoryItem, InventorySystem};
use crate::reward::ItemId;

type UserItems = BTreeMap<String, InventoryItem>;

#[derive(Debug, Default)]
struct InventoryState {
    users: BTreeMap<String, UserItems>,
    limits: BTreeMap<ItemId, i64>,
    next_instance: u64,
    fail_next_grant: bool,
    fail_next_consume: bool,
}

impl InventoryState {
    fn count(&self, user_id: &str, item_id: &str) -> i64 {
        self.users
            .get(user_id)
            .map(|items| items.values().filter(|i| i.item_id == item_id).map(|i| i.count).sum())
            .unwrap_or(0)
    }
}

/// In-memory [`InventorySystem`].
#[derive(Debug, Default)]
pub struct MemoryInventory {
    state: Mutex<InventoryState>,
}

impl MemoryInventory {
    /// Creates an empty inventory system.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps how many of `item_id` a user may hold.
    pub fn set_limit(&self, item_id: &str, max_count: i64) {
        self.state.lock().limits.insert(item_id.to_string(), max_count);
    }

    /// Total count of `item_id` held by a user.
    #[must_use]
    pub fn count(&self, user_id: &str, item_id: &str) -> i64 {
        self.state.lock().count(user_id, item_id)
    }

    /// One instance by id.
    #[must_use]
    pub fn item(&self, user_id: &str, instance_id: &str) -> Option<InventoryItem> {
        self.state.lock().users.get(user_id)?.get(instance_id).cloned()
    }

    /// Every instance a user holds.
    #[must_use]
    pub fn items(&self, user_id: &str) -> UserItems {
        self.state.lock().users.get(user_id).cloned().unwrap_or_default()
    }

    /// Fails the next grant with `Internal`.
    pub fn fail_next_grant(&self) {
        self.state.lock().fail_next_grant = true;
    }

    /// Fails the next consume with `Internal`.
    pub fn fail_next_consume(&self) {
        self.state.lock().fail_next_consume = true;
    }
}

impl InventorySystem for MemoryInventory {
    fn grant_items(
        &self,
        ctx: &Context,
        user_id: &str,
        items: &BTreeMap<ItemId, i64>,
        ignore_limits: bool,
    ) -> EconomyResult<InventoryGrant> {
        ctx.check()?;
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_grant) {
            return Err(EconomyError::internal("inventory unavailable"));
        }

        let mut grant = InventoryGrant::default();
        for (item_id, &quantity) in items {
            if quantity <= 0 {
                continue;
            }
            if !ignore_limits {
                if let Some(&limit) = state.limits.get(item_id) {
                    if state.count(user_id, item_id).saturating_add(quantity) > limit {
                        grant.not_granted.push(item_id.clone());
                        continue;
                    }
                }
            }

            state.next_instance += 1;
            let fresh_id = format!("inst-{}", state.next_instance);
            let user_items = state.users.entry(user_id.to_string()).or_default();

            if let Some(item) = user_items.values_mut().find(|i| i.item_id == *item_id) {
                item.count = item.count.saturating_add(quantity);
                grant.updated_items.insert(item.instance_id.clone(), item.clone());
            } else {
                let item = InventoryItem {
                    instance_id: fresh_id.clone(),
                    item_id: item_id.clone(),
                    count: quantity,
                    ..InventoryItem::default()
                };
                grant.new_items.insert(fresh_id.clone(), item.clone());
                user_items.insert(fresh_id, item);
            }
        }

        grant.all_items = state.users.get(user_id).cloned().unwrap_or_default();
        Ok(grant)
    }

    fn consume_items(
        &self,
        ctx: &Context,
        user_id: &str,
        items: &BTreeMap<ItemId, i64>,
    ) -> EconomyResult<()> {
        ctx.check()?;
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_consume) {
            return Err(EconomyError::internal("inventory unavailable"));
        }

        let user_items = state.users.entry(user_id.to_string()).or_default();
        let snapshot = user_items.clone();

        for (item_id, &quantity) in items {
            if quantity <= 0 {
                continue;
            }
            let available: i64 = user_items
                .values()
                .filter(|i| i.item_id == *item_id)
                .map(|i| i.count)
                .sum();
            if available < quantity {
                *user_items = snapshot;
                return Err(EconomyError::precondition(format!(
                    "insufficient {item_id}: required {quantity}, available {available}"
                )));
            }

            let mut remaining = quantity;
            for item in user_items.values_mut().filter(|i| i.item_id == *item_id) {
                if remaining == 0 {
                    break;
                }
                let take = item.count.min(remaining);
                item.count -= take;
                remaining -= take;
            }
            user_items.retain(|_, i| i.count > 0);
        }

        Ok(())
    }

    fn update_item_properties(
        &self,
        ctx: &Context,
        user_id: &str,
        instance_id: &str,
        string_properties: &BTreeMap<String, String>,
        numeric_properties: &BTreeMap<String, f64>,
    ) -> EconomyResult<()> {
        ctx.check()?;
        let mut state = self.state.lock();
        let item = state
            .users
            .get_mut(user_id)
            .and_then(|items| items.get_mut(instance_id))
            .ok_or_else(|| EconomyError::NotFound(format!("item instance {instance_id}")))?;

        item.string_properties.extend(string_properties.clone());
        item.numeric_properties.extend(numeric_properties.clone());
        Ok(())
    }
}
