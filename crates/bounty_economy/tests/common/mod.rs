//! Shared fixtures for the flow tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use bounty_economy::memory::{MemoryInventory, MemoryPublisher, MemoryStore, MemoryWallet};
use bounty_economy::{
    ChaChaSource, Collaborators, Context, EconomyConfig, EconomyError, EconomyResult,
    EconomySystem, InventorySystem, ManualClock, ReceiptValidator, StoreType, ValidatedPurchase,
};
use parking_lot::Mutex;

pub const START_TIME: i64 = 1_000_000;

pub const CONFIG: &str = r#"
[donations.wood]
name = "Wood"
count = 2
user_contribution_max_count = 1
duration_sec = 3600

[donations.wood.request_cost.currencies]
coins = 10

[donations.wood.request_cost.items]
ticket = 1

[donations.wood.cost.currencies]
coins = 5

[donations.wood.contributor_reward.guaranteed.currencies.gems]
min = 3
max = 3

[donations.wood.recipient_reward.guaranteed.items.wood]
min = 1
max = 1

[donations.free_hug]
count = 3

[store_items.sword]
cost = { currencies = { coins = 100 } }

[store_items.sword.reward.guaranteed.items.sword]
min = 1
max = 1

[store_items.gem_pack]
sku = "com.bounty.gems"

[store_items.gem_pack.reward.guaranteed.currencies.gems]
min = 100
max = 100

[placements.daily_video.reward.guaranteed.currencies.coins]
min = 50
max = 50

[placements.banner]
"#;

/// Receipts map to the purchases they contain.
#[derive(Debug, Default)]
pub struct FakeValidator {
    receipts: Mutex<BTreeMap<String, Vec<ValidatedPurchase>>>,
}

impl FakeValidator {
    pub fn accept(&self, receipt: &str, sku: &str, transaction_id: &str, sandbox: bool) {
        self.receipts.lock().entry(receipt.to_string()).or_default().push(ValidatedPurchase {
            product_id: sku.to_string(),
            transaction_id: transaction_id.to_string(),
            sandbox,
        });
    }
}

impl ReceiptValidator for FakeValidator {
    fn validate(
        &self,
        ctx: &Context,
        _store_type: StoreType,
        _user_id: &str,
        receipt: &str,
    ) -> EconomyResult<Vec<ValidatedPurchase>> {
        ctx.check()?;
        self.receipts
            .lock()
            .get(receipt)
            .cloned()
            .ok_or_else(|| EconomyError::FailedPrecondition(format!("receipt {receipt} rejected")))
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub wallet: Arc<MemoryWallet>,
    pub inventory: Arc<MemoryInventory>,
    pub publisher: Arc<MemoryPublisher>,
    pub validator: Arc<FakeValidator>,
    pub clock: Arc<ManualClock>,
    pub economy: EconomySystem,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(true, 7)
    }

    pub fn without_inventory() -> Self {
        Self::build(false, 7)
    }

    pub fn seeded(seed: u64) -> Self {
        Self::build(true, seed)
    }

    fn build(with_inventory: bool, seed: u64) -> Self {
        let store = Arc::new(MemoryStore::new());
        let wallet = Arc::new(MemoryWallet::new());
        let inventory = Arc::new(MemoryInventory::new());
        let publisher = Arc::new(MemoryPublisher::new());
        let validator = Arc::new(FakeValidator::default());
        let clock = Arc::new(ManualClock::new(START_TIME));

        let mut collaborators = Collaborators::new(store.clone(), wallet.clone())
            .with_publisher(publisher.clone())
            .with_validator(validator.clone())
            .with_random(Arc::new(ChaChaSource::seeded(seed)))
            .with_clock(clock.clone());
        if with_inventory {
            collaborators = collaborators.with_inventory(inventory.clone());
        }

        let config = EconomyConfig::from_toml_str(CONFIG).unwrap();
        let economy = EconomySystem::new(config, collaborators).unwrap();

        Self {
            store,
            wallet,
            inventory,
            publisher,
            validator,
            clock,
            economy,
        }
    }

    pub fn give_items(&self, user_id: &str, item_id: &str, count: i64) {
        let mut items = BTreeMap::new();
        items.insert(item_id.to_string(), count);
        self.inventory
            .grant_items(&Context::background(), user_id, &items, true)
            .unwrap();
    }
}
