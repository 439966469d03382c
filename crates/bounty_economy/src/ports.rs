//! # Collaborator Interfaces
//!
//! Everything the economy core talks to is a trait injected at construction.
//! Formats, stacking rules and receipt validation are the collaborators'
//! concern; the core only relies on the contracts below.
//!
//! Every call receives the caller's [`Context`] unchanged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::context::Context;
use crate::error::EconomyResult;
use crate::events::EconomyEvent;
use crate::reward::{CurrencyId, ItemId, Metadata};

// ============================================================================
// Persistence Store
// ============================================================================

/// An object as returned by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Collection name.
    pub collection: String,
    /// Key within the collection.
    pub key: String,
    /// Owning user.
    pub owner_id: String,
    /// Encoded value.
    pub value: String,
    /// Opaque version token for compare-and-swap writes.
    pub version: String,
}

/// Condition a write must satisfy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteCondition {
    /// Write regardless of the current version.
    Any,
    /// The object must not exist yet.
    Absent,
    /// The object must still carry this version.
    Version(String),
}

impl WriteCondition {
    /// The condition matching a previous read: its version if it found
    /// something, otherwise "must still be absent".
    #[must_use]
    pub fn after_read(version: Option<&str>) -> Self {
        version.map_or(Self::Absent, |v| Self::Version(v.to_string()))
    }
}

/// One page of a listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObjectPage {
    /// Objects in key order.
    pub objects: Vec<StoredObject>,
    /// Cursor for the next page, if any.
    pub cursor: Option<String>,
}

/// Key-value object store with per-key versions.
pub trait ObjectStore: Send + Sync {
    /// Reads one object.
    ///
    /// # Errors
    ///
    /// `Internal` on storage failure, `Cancelled` if `ctx` is done.
    fn read(
        &self,
        ctx: &Context,
        collection: &str,
        key: &str,
        owner_id: &str,
    ) -> EconomyResult<Option<StoredObject>>;

    /// Writes one object and returns its new version.
    ///
    /// # Errors
    ///
    /// `ConcurrentModification` if `condition` does not hold, `Internal` on failure.
    fn write(
        &self,
        ctx: &Context,
        collection: &str,
        key: &str,
        owner_id: &str,
        value: String,
        condition: WriteCondition,
    ) -> EconomyResult<String>;

    /// Lists a user's objects in a collection.
    ///
    /// # Errors
    ///
    /// `Internal` on storage failure.
    fn list(
        &self,
        ctx: &Context,
        collection: &str,
        owner_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> EconomyResult<ObjectPage>;
}

// ============================================================================
// Wallet Ledger
// ============================================================================

/// Balances before and after a wallet update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WalletUpdate {
    /// Balances after the update.
    pub updated: BTreeMap<CurrencyId, i64>,
    /// Balances before the update.
    pub previous: BTreeMap<CurrencyId, i64>,
}

/// Per-user currency ledger. Each call applies atomically or not at all.
pub trait WalletLedger: Send + Sync {
    /// Applies signed deltas to the user's wallet.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` if a balance would go negative, `Internal` on failure.
    fn update(
        &self,
        ctx: &Context,
        user_id: &str,
        deltas: &BTreeMap<CurrencyId, i64>,
        metadata: &Metadata,
    ) -> EconomyResult<WalletUpdate>;
}

// ============================================================================
// Inventory System
// ============================================================================

/// One item instance in a user's inventory.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryItem {
    /// Instance id.
    pub instance_id: String,
    /// Catalogue item id.
    pub item_id: ItemId,
    /// Quantity held.
    pub count: i64,
    /// String properties.
    pub string_properties: BTreeMap<String, String>,
    /// Numeric properties.
    pub numeric_properties: BTreeMap<String, f64>,
}

/// Outcome of an inventory grant.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InventoryGrant {
    /// Every instance the user holds after the grant.
    pub all_items: BTreeMap<String, InventoryItem>,
    /// Instances created by the grant.
    pub new_items: BTreeMap<String, InventoryItem>,
    /// Existing instances whose count changed.
    pub updated_items: BTreeMap<String, InventoryItem>,
    /// Item ids that were not granted because of limits.
    pub not_granted: Vec<ItemId>,
}

/// Inventory system owning item limits and stacking.
pub trait InventorySystem: Send + Sync {
    /// Grants item quantities.
    ///
    /// # Errors
    ///
    /// `Internal` on storage failure.
    fn grant_items(
        &self,
        ctx: &Context,
        user_id: &str,
        items: &BTreeMap<ItemId, i64>,
        ignore_limits: bool,
    ) -> EconomyResult<InventoryGrant>;

    /// Removes item quantities, all or nothing.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` if the user holds too few, `Internal` on failure.
    fn consume_items(
        &self,
        ctx: &Context,
        user_id: &str,
        items: &BTreeMap<ItemId, i64>,
    ) -> EconomyResult<()>;

    /// Sets properties on one instance.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown instance, `Internal` on failure.
    fn update_item_properties(
        &self,
        ctx: &Context,
        user_id: &str,
        instance_id: &str,
        string_properties: &BTreeMap<String, String>,
        numeric_properties: &BTreeMap<String, f64>,
    ) -> EconomyResult<()>;
}

// ============================================================================
// Platform Billing Validator
// ============================================================================

/// Platform store a receipt came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreType {
    /// Apple App Store.
    AppleAppStore,
    /// Google Play.
    GooglePlay,
}

/// A purchase the platform confirmed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedPurchase {
    /// Platform product id (the store item's SKU).
    pub product_id: String,
    /// Platform transaction id.
    pub transaction_id: String,
    /// True for sandbox/test purchases.
    pub sandbox: bool,
}

/// Validates platform receipts.
pub trait ReceiptValidator: Send + Sync {
    /// Validates `receipt` for `user_id`.
    ///
    /// # Errors
    ///
    /// `FailedPrecondition` for a rejected receipt, `Internal` on failure.
    fn validate(
        &self,
        ctx: &Context,
        store_type: StoreType,
        user_id: &str,
        receipt: &str,
    ) -> EconomyResult<Vec<ValidatedPurchase>>;
}

// ============================================================================
// Publisher
// ============================================================================

/// Generic fan-out for events other systems react to.
pub trait PublisherSink: Send + Sync {
    /// Publishes events.
    ///
    /// # Errors
    ///
    /// Any; callers treat publishing as best-effort.
    fn publish(&self, ctx: &Context, events: &[EconomyEvent]) -> EconomyResult<()>;
}
