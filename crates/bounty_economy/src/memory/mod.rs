//! # In-Memory Collaborators
//!
//! Reference implementations of the collaborator traits, backed by
//! `parking_lot` mutexes. They honour the same contracts a production
//! backend must (version checks, all-or-nothing updates) and expose failure
//! injection hooks so tests can force a step of a multi-step flow to fail.

mod inventory;
mod publisher;
mod store;
mod wallet;

pub use inventory::MemoryInventory;
pub use publisher::MemoryPublisher;
pub use store::MemoryStore;
pub use wallet::MemoryWallet;
