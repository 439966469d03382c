//! Typed JSON records on top of the [`ObjectStore`].

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::Context;
use crate::error::EconomyResult;
use crate::ports::{ObjectStore, WriteCondition};

/// A decoded record together with the version it was read at.
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned<T> {
    /// The record.
    pub value: T,
    /// Version token from the read.
    pub version: String,
}

/// Reads and decodes a record.
///
/// # Errors
///
/// Store failures, or `Internal` if the stored value does not decode.
pub fn read_record<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    ctx: &Context,
    collection: &str,
    key: &str,
    owner_id: &str,
) -> EconomyResult<Option<Versioned<T>>> {
    let Some(object) = store.read(ctx, collection, key, owner_id)? else {
        return Ok(None);
    };
    let value = serde_json::from_str(&object.value)?;
    Ok(Some(Versioned {
        value,
        version: object.version,
    }))
}

/// Encodes and writes a record, returning the new version.
///
/// # Errors
///
/// Store failures (including `ConcurrentModification`), or `Internal` on encoding.
pub fn write_record<T: Serialize>(
    store: &dyn ObjectStore,
    ctx: &Context,
    collection: &str,
    key: &str,
    owner_id: &str,
    value: &T,
    condition: WriteCondition,
) -> EconomyResult<String> {
    let encoded = serde_json::to_string(value)?;
    store.write(ctx, collection, key, owner_id, encoded, condition)
}
