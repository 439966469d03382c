//! # Economy Configuration
//!
//! Loaded once from TOML:
//!
//! ```toml
//! [donations.wood_request]
//! count = 5
//! duration_sec = 86400
//! cost = { currencies = { coins = 10 } }
//!
//! [store_items.gem_pack]
//! sku = "com.example.gems"
//! reward = { guaranteed = { currencies = { gems = { min = 100, max = 100 } } } }
//!
//! [placements.daily_video]
//! reward = { guaranteed = { currencies = { coins = { min = 50, max = 50 } } } }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::donation::DonationConfig;
use crate::error::{EconomyError, EconomyResult};
use crate::placement::PlacementConfig;
use crate::purchase::StoreItemConfig;

/// Every static definition the economy uses.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomyConfig {
    /// Donation definitions by id.
    pub donations: BTreeMap<String, DonationConfig>,
    /// Store item definitions by id.
    pub store_items: BTreeMap<String, StoreItemConfig>,
    /// Placement definitions by id.
    pub placements: BTreeMap<String, PlacementConfig>,
}

impl EconomyConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`EconomyError::InvalidConfig`] on parse or validation failure.
    pub fn from_toml_str(source: &str) -> EconomyResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| EconomyError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// [`EconomyError::InvalidConfig`] if the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> EconomyResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| EconomyError::InvalidConfig(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Checks every definition.
    ///
    /// # Errors
    ///
    /// [`EconomyError::InvalidConfig`] naming the first offending entry.
    pub fn validate(&self) -> EconomyResult<()> {
        for (id, donation) in &self.donations {
            donation.validate(id)?;
        }
        for (id, item) in &self.store_items {
            item.validate(id)?;
        }
        for (id, placement) in &self.placements {
            if let Some(reward) = &placement.reward {
                reward
                    .validate()
                    .map_err(|e| EconomyError::InvalidConfig(format!("placement {id}: {e}")))?;
            }
        }
        Ok(())
    }

    /// Fills in derived totals on every reward spec.
    pub fn prepare(&mut self) {
        for donation in self.donations.values_mut() {
            donation.prepare();
        }
        let specs = self
            .store_items
            .values_mut()
            .filter_map(|i| i.reward.as_mut())
            .chain(self.placements.values_mut().filter_map(|p| p.reward.as_mut()));
        for spec in specs {
            spec.prepare();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [donations.wood_request]
        name = "Wood"
        count = 5
        user_contribution_max_count = 2
        duration_sec = 86400
        cost = { currencies = { coins = 10 } }

        [donations.wood_request.recipient_reward.guaranteed.items.wood]
        min = 1
        max = 1

        [store_items.gem_pack]
        sku = "com.example.gems"

        [store_items.gem_pack.reward.guaranteed.currencies.gems]
        min = 100
        max = 100

        [store_items.sword]
        cost = { currencies = { coins = 250 } }

        [placements.daily_video.reward]
        max_rolls = 1

        [[placements.daily_video.reward.weighted]]
        weight = 3
        currencies = { coins = { min = 10, max = 20, multiple = 5 } }

        [[placements.daily_video.reward.weighted]]
        weight = 1
        currencies = { gems = { min = 1, max = 1 } }
    "#;

    #[test]
    fn test_parse_sample() {
        let mut config = EconomyConfig::from_toml_str(SAMPLE).unwrap();

        let donation = &config.donations["wood_request"];
        assert_eq!(donation.count, 5);
        assert_eq!(donation.cost.currencies["coins"], 10);
        assert!(donation.recipient_reward.is_some());
        assert!(config.store_items["gem_pack"].is_platform());
        assert!(!config.store_items["sword"].is_platform());

        config.prepare();
        let video = config.placements["daily_video"].reward.as_ref().unwrap();
        assert_eq!(video.total_weight, 4);
    }

    #[test]
    fn test_invalid_range_rejected() {
        let source = r#"
            [placements.bad.reward.guaranteed.currencies.coins]
            min = 10
            max = 1
        "#;
        assert!(matches!(
            EconomyConfig::from_toml_str(source),
            Err(EconomyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_store_item_without_price_rejected() {
        let source = r#"
            [store_items.free]
            name = "Free lunch"
        "#;
        assert!(matches!(
            EconomyConfig::from_toml_str(source),
            Err(EconomyError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_bundled_chest_spec() {
        let mut spec: crate::reward::RewardSpec =
            toml::from_str(include_str!("../data/chest.toml")).unwrap();
        spec.validate().unwrap();
        spec.prepare();
        assert_eq!(spec.total_weight, 100);
        assert_eq!(spec.weighted[1].item_sets.len(), 1);
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            EconomyConfig::from_toml_str("donations = 3"),
            Err(EconomyError::InvalidConfig(_))
        ));
    }
}
