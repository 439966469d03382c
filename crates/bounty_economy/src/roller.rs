//! # Reward Roller
//!
//! Turns a [`RewardSpec`] into a concrete [`Reward`].
//!
//! ## Algorithm
//!
//! ```text
//! 1. guaranteed contents      -> always processed
//! 2. weighted contents        -> up to max_rolls draws against total_weight
//!      r in [0, total)         first branch with r < cumulative wins
//!      repeat protection       a branch picked k times may be picked again
//!                              only while k <= max_repeat_rolls
//!      early stop              once every reachable branch is capped
//! 3. each processed block     -> currencies, items (+ properties), item sets,
//!                                energies, energy/reward modifiers
//! ```
//!
//! Rolling is pure: nothing is persisted here.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::clock::Clock;
use crate::error::{EconomyError, EconomyResult};
use crate::random::RandomSource;
use crate::reward::{
    AppliedEnergyModifier, AppliedRewardModifier, ItemSetReward, Reward, RewardContents,
    RewardSpec, WeightedOptionSet,
};

/// Rolls reward specifications.
#[derive(Clone)]
pub struct RewardRoller {
    rng: Arc<dyn RandomSource>,
    clock: Arc<dyn Clock>,
}

impl RewardRoller {
    /// Creates a roller over an injected random source.
    #[must_use]
    pub fn new(rng: Arc<dyn RandomSource>, clock: Arc<dyn Clock>) -> Self {
        Self { rng, clock }
    }

    /// The random source used for rolls.
    #[must_use]
    pub fn random(&self) -> &Arc<dyn RandomSource> {
        &self.rng
    }

    /// Rolls a reward.
    ///
    /// # Errors
    ///
    /// [`EconomyError::InvalidArgument`] if `spec` is `None`, or if its
    /// weighted branches carry a negative weight or a weight sum that
    /// overflows `i64`.
    pub fn roll(&self, spec: Option<&RewardSpec>) -> EconomyResult<Reward> {
        let spec = spec.ok_or_else(|| EconomyError::invalid("reward spec is required"))?;
        check_branch_weights(spec)?;

        let mut reward = Reward {
            grant_time_sec: self.clock.now_sec(),
            ..Reward::default()
        };

        if let Some(guaranteed) = &spec.guaranteed {
            self.process_contents(guaranteed, &mut reward);
        }

        if !spec.weighted.is_empty() && spec.max_rolls > 0 {
            self.roll_weighted(spec, &mut reward);
        }

        Ok(reward)
    }

    /// Weighted draws with repeat protection.
    fn roll_weighted(&self, spec: &RewardSpec, reward: &mut Reward) {
        let total_weight = spec.effective_total_weight();
        if total_weight <= 0 {
            warn!(
                total_weight,
                "reward spec has no positive total weight, skipping weighted rolls"
            );
            return;
        }

        // Branches a draw can actually land on.
        let mut cumulative = 0i64;
        let reachable: Vec<bool> = spec
            .weighted
            .iter()
            .map(|branch| {
                let reachable = branch.weight > 0 && cumulative < total_weight;
                cumulative = cumulative.saturating_add(branch.weight);
                reachable
            })
            .collect();

        let repeat_cap = spec.max_repeat_rolls.max(0);
        let mut picks = vec![0i64; spec.weighted.len()];
        let mut rolls = 0i64;

        while rolls < spec.max_rolls {
            let exhausted = picks
                .iter()
                .zip(&reachable)
                .all(|(&count, &reachable)| !reachable || count > repeat_cap);
            if exhausted {
                break;
            }

            let Some(index) = select_weighted(
                self.rng.as_ref(),
                total_weight,
                spec.weighted.iter().map(|b| b.weight),
            ) else {
                // Declared total exceeds the branch sum: the draw grants nothing.
                rolls += 1;
                continue;
            };

            if picks[index] > repeat_cap {
                continue;
            }

            picks[index] += 1;
            rolls += 1;
            self.process_contents(&spec.weighted[index], reward);
        }
    }

    /// Processes one block of contents into the accumulator.
    fn process_contents(&self, contents: &RewardContents, reward: &mut Reward) {
        let rng = self.rng.as_ref();

        for (id, range) in &contents.currencies {
            let amount = reward.currencies.entry(id.clone()).or_insert(0);
            *amount = amount.saturating_add(range.roll(rng));
        }

        for (id, item) in &contents.items {
            let amount = reward.items.entry(id.clone()).or_insert(0);
            *amount = amount.saturating_add(item.range.roll(rng));

            if !item.has_properties() {
                continue;
            }
            let instance = reward.item_instances.entry(id.clone()).or_default();
            for (key, options) in &item.string_properties {
                if let Some(value) = select_option(rng, options) {
                    instance.string_properties.insert(key.clone(), value.to_string());
                }
            }
            for (key, range) in &item.numeric_properties {
                instance.numeric_properties.insert(key.clone(), range.roll(rng));
            }
        }

        for set in &contents.item_sets {
            self.sample_item_set(set, reward);
        }

        for (id, range) in &contents.energies {
            let amount = reward.energies.entry(id.clone()).or_insert(0);
            *amount = amount.saturating_add(range.roll(rng));
        }

        for modifier in &contents.energy_modifiers {
            reward.energy_modifiers.push(AppliedEnergyModifier {
                id: modifier.id.clone(),
                operator: modifier.operator.clone(),
                value: modifier.value.roll(rng),
                duration_sec: modifier.duration_sec.roll(rng),
            });
        }

        for modifier in &contents.reward_modifiers {
            reward.reward_modifiers.push(AppliedRewardModifier {
                id: modifier.id.clone(),
                modifier_type: modifier.modifier_type.clone(),
                operator: modifier.operator.clone(),
                value: modifier.value.roll(rng),
                duration_sec: modifier.duration_sec.roll(rng),
            });
        }
    }

    /// Samples an item set: with replacement until an id hits `max_repeats`,
    /// after which that id leaves the pool for the rest of this roll.
    fn sample_item_set(&self, set: &ItemSetReward, reward: &mut Reward) {
        let count = set.count.roll(self.rng.as_ref());
        if count <= 0 {
            return;
        }

        let mut pool = set.set.clone();
        let mut picked: BTreeMap<String, i64> = BTreeMap::new();

        for _ in 0..count {
            if pool.is_empty() {
                break;
            }
            let index = self.rng.below(pool.len() as u64) as usize;
            let id = pool[index].clone();

            *reward.items.entry(id.clone()).or_insert(0) += 1;
            let times = picked.entry(id.clone()).or_insert(0);
            *times += 1;

            if set.max_repeats > 0 && *times >= set.max_repeats {
                pool.retain(|candidate| *candidate != id);
            }
        }
    }

    /// Rolls `spec` `iterations` times and aggregates the outcome.
    ///
    /// # Errors
    ///
    /// Same as [`RewardRoller::roll`].
    pub fn run_statistics(
        &self,
        spec: &RewardSpec,
        iterations: u64,
    ) -> EconomyResult<RollStatistics> {
        let mut stats = RollStatistics::default();
        for _ in 0..iterations {
            let reward = self.roll(Some(spec))?;
            stats.record(&reward);
        }
        Ok(stats)
    }
}

/// Weighted branches must be non-negative and sum without overflow.
fn check_branch_weights(spec: &RewardSpec) -> EconomyResult<()> {
    let mut sum = 0i64;
    for (i, branch) in spec.weighted.iter().enumerate() {
        if branch.weight < 0 {
            return Err(EconomyError::invalid(format!(
                "weighted branch {i} has negative weight {}",
                branch.weight
            )));
        }
        sum = sum
            .checked_add(branch.weight)
            .ok_or_else(|| EconomyError::invalid("weighted branch weights overflow"))?;
    }
    Ok(())
}

/// Picks a branch index by weight. `None` if the draw overshoots the branch sum.
fn select_weighted(
    rng: &dyn RandomSource,
    total_weight: i64,
    weights: impl Iterator<Item = i64>,
) -> Option<usize> {
    let r = rng.below(total_weight.unsigned_abs()) as i64;
    let mut cumulative = 0i64;
    for (i, weight) in weights.enumerate() {
        cumulative = cumulative.saturating_add(weight);
        if r < cumulative {
            return Some(i);
        }
    }
    None
}

/// Picks a string option the same way branches are picked.
fn select_option<'a>(rng: &dyn RandomSource, set: &'a WeightedOptionSet) -> Option<&'a str> {
    let total_weight = set.effective_total_weight();
    if total_weight <= 0 {
        warn!("string property has no positive total weight, skipping");
        return None;
    }
    select_weighted(rng, total_weight, set.options.iter().map(|o| o.weight))
        .map(|i| set.options[i].value.as_str())
}

/// Aggregated outcome of many rolls.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RollStatistics {
    /// Number of rolls.
    pub total_rolls: u64,
    /// Rolls that granted nothing.
    pub empty_rolls: u64,
    /// Summed currency amounts.
    pub currency_totals: BTreeMap<String, i64>,
    /// Rolls in which each currency appeared.
    pub currency_hits: BTreeMap<String, u64>,
    /// Summed item quantities.
    pub item_totals: BTreeMap<String, i64>,
    /// Rolls in which each item appeared.
    pub item_hits: BTreeMap<String, u64>,
}

impl RollStatistics {
    fn record(&mut self, reward: &Reward) {
        self.total_rolls += 1;
        if reward.is_empty() {
            self.empty_rolls += 1;
        }
        for (id, amount) in &reward.currencies {
            *self.currency_totals.entry(id.clone()).or_insert(0) += amount;
            *self.currency_hits.entry(id.clone()).or_insert(0) += 1;
        }
        for (id, amount) in &reward.items {
            *self.item_totals.entry(id.clone()).or_insert(0) += amount;
            *self.item_hits.entry(id.clone()).or_insert(0) += 1;
        }
    }

    /// Fraction of rolls that granted `currency_id`.
    #[must_use]
    pub fn currency_hit_rate(&self, currency_id: &str) -> f64 {
        ratio(self.currency_hits.get(currency_id).copied().unwrap_or(0), self.total_rolls)
    }

    /// Fraction of rolls that granted `item_id`.
    #[must_use]
    pub fn item_hit_rate(&self, item_id: &str) -> f64 {
        ratio(self.item_hits.get(item_id).copied().unwrap_or(0), self.total_rolls)
    }

    /// Mean granted amount of `currency_id` per roll.
    #[must_use]
    pub fn currency_mean(&self, currency_id: &str) -> f64 {
        if self.total_rolls == 0 {
            return 0.0;
        }
        self.currency_totals.get(currency_id).copied().unwrap_or(0) as f64 / self.total_rolls as f64
    }
}

fn ratio(hits: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
