//! # BOUNTY Economy Core
//!
//! Reward generation and transactional economy logic for the BOUNTY game
//! backend.
//!
//! ## Design Principles
//!
//! 1. **Injected randomness** - Every roll goes through a [`RandomSource`]; seed it and the whole pipeline replays
//! 2. **Typed collaborators** - Store, wallet, inventory, validator and publisher are trait objects wired at construction
//! 3. **Compensated writes** - Multi-step flows register inverse actions and unwind on failure
//! 4. **Version-checked records** - Every durable write is compare-and-swap; lost races surface as `ConcurrentModification`
//! 5. **External configuration** - Donations, store items and placements load from TOML
//!
//! ## Threading
//!
//! Every operation is a synchronous request/response call. Nothing spawns
//! work or retries; the caller's [`Context`] is forwarded to every
//! collaborator call unchanged.
//!
//! ## Example
//!
//! ```rust,ignore
//! use bounty_economy::{Collaborators, Context, EconomyConfig, EconomySystem};
//!
//! let config = EconomyConfig::from_file("data/economy.toml")?;
//! let economy = EconomySystem::new(config, Collaborators::new(store, wallet).with_inventory(inventory))?;
//!
//! let ctx = Context::background();
//! economy.placement_start(&ctx, "user-1", "daily_video", Default::default())?;
//! let status = economy.placement_success(&ctx, "user-1", "daily_video")?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod config;
pub mod context;
pub mod donation;
pub mod error;
pub mod events;
pub mod granter;
pub mod memory;
pub mod placement;
pub mod ports;
pub mod purchase;
pub mod random;
pub mod range;
pub mod records;
pub mod reward;
pub mod roller;
pub mod saga;
pub mod system;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EconomyConfig;
pub use context::Context;
pub use donation::{
    ClaimRequest, Donation, DonationConfig, DonationContributor, DonationGiveOutcome,
    DonationRequestOutcome,
};
pub use error::{EconomyError, EconomyResult, ErrorKind};
pub use events::EconomyEvent;
pub use granter::{GrantOutcome, ItemStrategy, RewardGranter};
pub use placement::{PlacementConfig, PlacementState, PlacementStatus};
pub use ports::{
    InventoryGrant, InventoryItem, InventorySystem, ObjectStore, PublisherSink, ReceiptValidator,
    StoreType, ValidatedPurchase, WalletLedger, WriteCondition,
};
pub use purchase::{
    PurchaseIntent, PurchaseOutcome, RedeemedTransaction, RestoredPurchase, StoreItemConfig,
};
pub use random::{ChaChaSource, RandomSource};
pub use range::{RangeFloat64, RangeInt32, RangeInt64, RangeUInt64};
pub use reward::{Cost, ItemReward, ItemSetReward, Metadata, Reward, RewardContents, RewardSpec};
pub use roller::{RewardRoller, RollStatistics};
pub use saga::CompensationStack;
pub use system::{Collaborators, EconomySystem};
