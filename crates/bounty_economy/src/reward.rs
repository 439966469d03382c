//! # Reward Data Model
//!
//! Declarative reward specifications ([`RewardSpec`]) and the concrete
//! [`Reward`] bundles the roller produces from them.
//!
//! Maps are `BTreeMap` throughout so a seeded roll visits entries in the same
//! order on every run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{EconomyError, EconomyResult};
use crate::range::{RangeFloat64, RangeInt32, RangeInt64, RangeUInt64};

/// Currency identifier.
pub type CurrencyId = String;
/// Item identifier (catalogue id, not instance id).
pub type ItemId = String;
/// Energy identifier.
pub type EnergyId = String;
/// User identifier.
pub type UserId = String;
/// Free-form metadata passed through to collaborators.
pub type Metadata = BTreeMap<String, String>;

/// A declarative description of possible reward outcomes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardSpec {
    /// Always granted on every roll.
    pub guaranteed: Option<RewardContents>,
    /// Branches selected by weight, up to `max_rolls` times.
    pub weighted: Vec<RewardContents>,
    /// Maximum number of weighted draws.
    pub max_rolls: i64,
    /// How many times a branch may be selected again after its first pick.
    pub max_repeat_rolls: i64,
    /// Declared total weight; `0` means "sum of branch weights".
    pub total_weight: i64,
}

impl RewardSpec {
    /// A spec that only carries guaranteed contents.
    #[must_use]
    pub fn guaranteed(contents: RewardContents) -> Self {
        Self {
            guaranteed: Some(contents),
            ..Self::default()
        }
    }

    /// The weight weighted draws are taken against.
    #[must_use]
    pub fn effective_total_weight(&self) -> i64 {
        if self.total_weight != 0 {
            self.total_weight
        } else {
            self.weighted.iter().fold(0i64, |sum, w| sum.saturating_add(w.weight))
        }
    }

    /// Fills in derived totals (branch weight sum, string property weights).
    pub fn prepare(&mut self) {
        if self.total_weight == 0 {
            self.total_weight = self.effective_total_weight();
        }
        if let Some(guaranteed) = self.guaranteed.as_mut() {
            guaranteed.prepare();
        }
        for contents in &mut self.weighted {
            contents.prepare();
        }
    }

    /// Checks ranges and weights.
    ///
    /// # Errors
    ///
    /// [`EconomyError::InvalidConfig`] naming the first offending entry.
    pub fn validate(&self) -> EconomyResult<()> {
        if self.max_rolls < 0 || self.max_repeat_rolls < 0 || self.total_weight < 0 {
            return Err(EconomyError::InvalidConfig(
                "max_rolls, max_repeat_rolls and total_weight must not be negative".to_string(),
            ));
        }
        if let Some(guaranteed) = &self.guaranteed {
            guaranteed.validate()?;
        }
        for (i, contents) in self.weighted.iter().enumerate() {
            if contents.weight < 0 {
                return Err(EconomyError::InvalidConfig(format!(
                    "weighted branch {i} has negative weight {}",
                    contents.weight
                )));
            }
            contents.validate()?;
        }
        Ok(())
    }
}

/// One block of reward components.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardContents {
    /// Currency amounts.
    pub currencies: BTreeMap<CurrencyId, RangeInt64>,
    /// Item quantities, optionally with rolled properties.
    pub items: BTreeMap<ItemId, ItemReward>,
    /// Random samples from item pools.
    pub item_sets: Vec<ItemSetReward>,
    /// Energy amounts.
    pub energies: BTreeMap<EnergyId, RangeInt32>,
    /// Energy modifiers to apply.
    pub energy_modifiers: Vec<ModifierSpec>,
    /// Reward modifiers to apply.
    pub reward_modifiers: Vec<ModifierSpec>,
    /// Selection weight (weighted pool only).
    pub weight: i64,
}

impl RewardContents {
    /// Empty contents with the given selection weight.
    #[must_use]
    pub fn weighted(weight: i64) -> Self {
        Self {
            weight,
            ..Self::default()
        }
    }

    /// Adds a currency range.
    #[must_use]
    pub fn with_currency(mut self, id: impl Into<CurrencyId>, range: RangeInt64) -> Self {
        self.currencies.insert(id.into(), range);
        self
    }

    /// Adds an item reward.
    #[must_use]
    pub fn with_item(mut self, id: impl Into<ItemId>, item: ItemReward) -> Self {
        self.items.insert(id.into(), item);
        self
    }

    /// Adds an item set.
    #[must_use]
    pub fn with_item_set(mut self, set: ItemSetReward) -> Self {
        self.item_sets.push(set);
        self
    }

    /// Adds an energy range.
    #[must_use]
    pub fn with_energy(mut self, id: impl Into<EnergyId>, range: RangeInt32) -> Self {
        self.energies.insert(id.into(), range);
        self
    }

    fn prepare(&mut self) {
        for item in self.items.values_mut() {
            for options in item.string_properties.values_mut() {
                options.prepare();
            }
        }
    }

    fn validate(&self) -> EconomyResult<()> {
        for (id, range) in &self.currencies {
            if !range.is_valid() {
                return Err(invalid_range("currency", id));
            }
        }
        for (id, item) in &self.items {
            if !item.range.is_valid() {
                return Err(invalid_range("item", id));
            }
            for (key, range) in &item.numeric_properties {
                if !range.is_valid() {
                    return Err(invalid_range("numeric property", &format!("{id}.{key}")));
                }
            }
            for (key, set) in &item.string_properties {
                if set.options.iter().any(|o| o.weight < 0) || set.total_weight < 0 {
                    return Err(EconomyError::InvalidConfig(format!(
                        "string property {id}.{key} has a negative weight"
                    )));
                }
            }
        }
        for set in &self.item_sets {
            if !set.count.is_valid() || set.max_repeats < 0 {
                return Err(invalid_range("item set", &set.set.join(",")));
            }
        }
        for (id, range) in &self.energies {
            if !range.is_valid() {
                return Err(invalid_range("energy", id));
            }
        }
        for modifier in self.energy_modifiers.iter().chain(&self.reward_modifiers) {
            if !modifier.value.is_valid() || !modifier.duration_sec.is_valid() {
                return Err(invalid_range("modifier", &modifier.id));
            }
        }
        Ok(())
    }
}

fn invalid_range(what: &str, id: &str) -> EconomyError {
    EconomyError::InvalidConfig(format!("{what} {id} has min > max"))
}

/// An item quantity with optional per-instance properties.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemReward {
    /// Quantity range.
    #[serde(flatten)]
    pub range: RangeInt64,
    /// String properties, each picked from weighted options.
    #[serde(default)]
    pub string_properties: BTreeMap<String, WeightedOptionSet>,
    /// Numeric properties, each rolled from a float range.
    #[serde(default)]
    pub numeric_properties: BTreeMap<String, RangeFloat64>,
}

impl ItemReward {
    /// A plain quantity range.
    #[must_use]
    pub fn quantity(range: RangeInt64) -> Self {
        Self {
            range,
            ..Self::default()
        }
    }

    /// True if rolling this item produces an instance property record.
    #[must_use]
    pub fn has_properties(&self) -> bool {
        !self.string_properties.is_empty() || !self.numeric_properties.is_empty()
    }
}

/// A weighted choice between string values.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedOptionSet {
    /// Declared total; `0` means "sum of option weights".
    #[serde(default)]
    pub total_weight: i64,
    /// Options in declaration order.
    pub options: Vec<WeightedOption>,
}

impl WeightedOptionSet {
    /// The weight draws are taken against.
    #[must_use]
    pub fn effective_total_weight(&self) -> i64 {
        if self.total_weight != 0 {
            self.total_weight
        } else {
            self.options.iter().fold(0i64, |sum, o| sum.saturating_add(o.weight))
        }
    }

    fn prepare(&mut self) {
        if self.total_weight == 0 {
            self.total_weight = self.effective_total_weight();
        }
    }
}

/// One string option.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedOption {
    /// The value assigned when picked.
    pub value: String,
    /// Selection weight.
    pub weight: i64,
}

/// A pool of item ids sampled per roll.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSetReward {
    /// Candidate item ids.
    pub set: Vec<ItemId>,
    /// How many picks to make.
    pub count: RangeInt64,
    /// Per-roll cap on picks of the same id; `0` means uncapped.
    #[serde(default)]
    pub max_repeats: i64,
}

/// A modifier declared in a reward.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifierSpec {
    /// Modifier target id (currency, item or energy id).
    pub id: String,
    /// What the modifier applies to (e.g. `currency`, `item`). Empty for energies.
    #[serde(default, rename = "type")]
    pub modifier_type: String,
    /// How the value is applied (e.g. `add`, `multiplier`).
    pub operator: String,
    /// Modifier value.
    pub value: RangeInt64,
    /// Lifetime in seconds; `0` means no expiry.
    #[serde(default)]
    pub duration_sec: RangeUInt64,
}

/// Rolled properties for an item instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RolledItemInstance {
    /// String properties.
    pub string_properties: BTreeMap<String, String>,
    /// Numeric properties.
    pub numeric_properties: BTreeMap<String, f64>,
}

/// An energy modifier produced by a roll.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedEnergyModifier {
    /// Energy id.
    pub id: EnergyId,
    /// Operator.
    pub operator: String,
    /// Rolled value.
    pub value: i64,
    /// Rolled duration; `0` means no expiry.
    pub duration_sec: u64,
}

/// A reward modifier produced by a roll.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedRewardModifier {
    /// Target id.
    pub id: String,
    /// Target type.
    pub modifier_type: String,
    /// Operator.
    pub operator: String,
    /// Rolled value.
    pub value: i64,
    /// Rolled duration; `0` means no expiry.
    pub duration_sec: u64,
}

/// A reward modifier stored against a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRewardModifier {
    /// Target id.
    pub id: String,
    /// Target type.
    pub modifier_type: String,
    /// Operator.
    pub operator: String,
    /// Value.
    pub value: i64,
    /// When it was granted.
    pub start_time_sec: i64,
    /// When it stops applying; `0` means never.
    pub end_time_sec: i64,
}

impl ActiveRewardModifier {
    /// True while the modifier applies.
    #[must_use]
    pub const fn is_active(&self, now_sec: i64) -> bool {
        self.end_time_sec == 0 || self.end_time_sec > now_sec
    }
}

/// A concrete rolled reward.
///
/// Accumulative: rolling the same currency or item twice sums into one entry.
/// Every map is always present so callers can index freely.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Reward {
    /// Currency amounts.
    pub currencies: BTreeMap<CurrencyId, i64>,
    /// Item quantities.
    pub items: BTreeMap<ItemId, i64>,
    /// Rolled instance properties, keyed by item id.
    pub item_instances: BTreeMap<ItemId, RolledItemInstance>,
    /// Energy amounts.
    pub energies: BTreeMap<EnergyId, i32>,
    /// Energy modifiers, in roll order.
    pub energy_modifiers: Vec<AppliedEnergyModifier>,
    /// Reward modifiers, in roll order.
    pub reward_modifiers: Vec<AppliedRewardModifier>,
    /// When the reward was rolled.
    pub grant_time_sec: i64,
}

impl Reward {
    /// True if the reward grants nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.currencies.is_empty()
            && self.items.is_empty()
            && self.energies.is_empty()
            && self.energy_modifiers.is_empty()
            && self.reward_modifiers.is_empty()
    }
}

/// Currencies and items a flow deducts from a user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cost {
    /// Currency amounts, as positive numbers.
    pub currencies: BTreeMap<CurrencyId, i64>,
    /// Item quantities, as positive numbers.
    pub items: BTreeMap<ItemId, i64>,
}

impl Cost {
    /// True if nothing is deducted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.currencies.is_empty() && self.items.is_empty()
    }

    /// True if paying requires an inventory system.
    #[must_use]
    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }

    /// The cost of `units` purchases.
    #[must_use]
    pub fn scaled(&self, units: i64) -> Self {
        Self {
            currencies: self
                .currencies
                .iter()
                .map(|(id, amount)| (id.clone(), amount.saturating_mul(units)))
                .collect(),
            items: self
                .items
                .iter()
                .map(|(id, amount)| (id.clone(), amount.saturating_mul(units)))
                .collect(),
        }
    }

    /// Rejects negative amounts.
    ///
    /// # Errors
    ///
    /// [`EconomyError::InvalidConfig`] naming the offending entry.
    pub fn validate(&self) -> EconomyResult<()> {
        let negative = self
            .currencies
            .iter()
            .chain(self.items.iter())
            .find(|(_, amount)| **amount < 0);
        match negative {
            Some((id, amount)) => Err(EconomyError::InvalidConfig(format!(
                "cost of {id} is negative ({amount})"
            ))),
            None => Ok(()),
        }
    }
}
