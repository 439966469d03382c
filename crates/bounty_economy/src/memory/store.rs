//! Versioned key-value store.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

use crate::context::Context;
use crate::error::{EconomyError, EconomyResult};
use crate::ports::{ObjectPage, ObjectStore, StoredObject, WriteCondition};

/// (collection, owner, key)
type ObjectKey = (String, String, String);

#[derive(Debug, Default)]
struct StoreState {
    objects: BTreeMap<ObjectKey, (String, u64)>,
    next_version: u64,
    failing_reads: BTreeSet<String>,
    failing_writes: BTreeSet<String>,
    racing_writes: BTreeSet<String>,
}

/// In-memory [`ObjectStore`] with per-key versions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every read of `collection` fail with `Internal`.
    pub fn fail_reads(&self, collection: &str) {
        self.state.lock().failing_reads.insert(collection.to_string());
    }

    /// Makes every write to `collection` fail with `Internal`.
    pub fn fail_writes(&self, collection: &str) {
        self.state.lock().failing_writes.insert(collection.to_string());
    }

    /// Makes the next write to `collection` lose a race: the stored object
    /// gets a new version just before the write's condition is checked.
    pub fn race_next_write(&self, collection: &str) {
        self.state.lock().racing_writes.insert(collection.to_string());
    }

    /// Clears injected failures for `collection`.
    pub fn heal(&self, collection: &str) {
        let mut state = self.state.lock();
        state.failing_reads.remove(collection);
        state.failing_writes.remove(collection);
        state.racing_writes.remove(collection);
    }

    /// Number of objects stored in `collection` across all owners.
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.state
            .lock()
            .objects
            .keys()
            .filter(|(c, _, _)| c == collection)
            .count()
    }

    /// True if the store holds nothing at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().objects.is_empty()
    }
}

fn stored(key: &ObjectKey, value: &str, version: u64) -> StoredObject {
    StoredObject {
        collection: key.0.clone(),
        owner_id: key.1.clone(),
        key: key.2.clone(),
        value: value.to_string(),
        version: version.to_string(),
    }
}

impl ObjectStore for MemoryStore {
    fn read(
        &self,
        ctx: &Context,
        collection: &str,
        key: &str,
        owner_id: &str,
    ) -> EconomyResult<Option<StoredObject>> {
        ctx.check()?;
        let state = self.state.lock();
        if state.failing_reads.contains(collection) {
            return Err(EconomyError::internal(format!("store read of {collection} failed")));
        }

        let id = (collection.to_string(), owner_id.to_string(), key.to_string());
        Ok(state
            .objects
            .get(&id)
            .map(|(value, version)| stored(&id, value, *version)))
    }

    fn write(
        &self,
        ctx: &Context,
        collection: &str,
        key: &str,
        owner_id: &str,
        value: String,
        condition: WriteCondition,
    ) -> EconomyResult<String> {
        ctx.check()?;
        let mut state = self.state.lock();
        if state.failing_writes.contains(collection) {
            return Err(EconomyError::internal(format!("store write to {collection} failed")));
        }

        let id = (collection.to_string(), owner_id.to_string(), key.to_string());
        if state.racing_writes.remove(collection) {
            state.next_version += 1;
            let bumped = state.next_version;
            if let Some((_, version)) = state.objects.get_mut(&id) {
                *version = bumped;
            }
        }
        let current = state.objects.get(&id).map(|(_, v)| v.to_string());
        let holds = match &condition {
            WriteCondition::Any => true,
            WriteCondition::Absent => current.is_none(),
            WriteCondition::Version(expected) => current.as_deref() == Some(expected.as_str()),
        };
        if !holds {
            return Err(EconomyError::ConcurrentModification {
                collection: collection.to_string(),
                key: key.to_string(),
                owner_id: owner_id.to_string(),
            });
        }

        state.next_version += 1;
        let version = state.next_version;
        state.objects.insert(id, (value, version));
        Ok(version.to_string())
    }

    fn list(
        &self,
        ctx: &Context,
        collection: &str,
        owner_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> EconomyResult<ObjectPage> {
        ctx.check()?;
        let state = self.state.lock();
        if state.failing_reads.contains(collection) {
            return Err(EconomyError::internal(format!("store list of {collection} failed")));
        }

        let limit = limit.max(1);
        let mut matching = state
            .objects
            .iter()
            .filter(|((c, o, k), _)| {
                c == collection && o == owner_id && cursor.map_or(true, |after| k.as_str() > after)
            });

        let objects: Vec<StoredObject> = matching
            .by_ref()
            .take(limit)
            .map(|(id, (value, version))| stored(id, value, *version))
            .collect();
        let cursor = if matching.next().is_some() {
            objects.last().map(|o| o.key.clone())
        } else {
            None
        };

        Ok(ObjectPage { objects, cursor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_checked_writes() {
        let store = MemoryStore::new();
        let ctx = Context::background();

        let v1 = store
            .write(&ctx, "c", "k", "u", "one".into(), WriteCondition::Absent)
            .unwrap();
        assert!(matches!(
            store.write(&ctx, "c", "k", "u", "dup".into(), WriteCondition::Absent),
            Err(EconomyError::ConcurrentModification { .. })
        ));

        let v2 = store
            .write(&ctx, "c", "k", "u", "two".into(), WriteCondition::Version(v1.clone()))
            .unwrap();
        assert_ne!(v1, v2);
        assert!(matches!(
            store.write(&ctx, "c", "k", "u", "stale".into(), WriteCondition::Version(v1)),
            Err(EconomyError::ConcurrentModification { .. })
        ));

        let read = store.read(&ctx, "c", "k", "u").unwrap().unwrap();
        assert_eq!(read.value, "two");
        assert_eq!(read.version, v2);
    }

    #[test]
    fn test_raced_write_loses_once() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        let v1 = store
            .write(&ctx, "c", "k", "u", "one".into(), WriteCondition::Absent)
            .unwrap();

        store.race_next_write("c");
        assert!(matches!(
            store.write(&ctx, "c", "k", "u", "two".into(), WriteCondition::Version(v1)),
            Err(EconomyError::ConcurrentModification { .. })
        ));

        let current = store.read(&ctx, "c", "k", "u").unwrap().unwrap();
        assert_eq!(current.value, "one");
        assert!(store
            .write(&ctx, "c", "k", "u", "two".into(), WriteCondition::Version(current.version))
            .is_ok());
    }

    #[test]
    fn test_list_pages_by_cursor() {
        let store = MemoryStore::new();
        let ctx = Context::background();
        for key in ["a", "b", "c"] {
            store
                .write(&ctx, "c", key, "u", key.into(), WriteCondition::Any)
                .unwrap();
        }
        store
            .write(&ctx, "c", "z", "other", "z".into(), WriteCondition::Any)
            .unwrap();

        let first = store.list(&ctx, "c", "u", 2, None).unwrap();
        assert_eq!(first.objects.len(), 2);
        assert_eq!(first.cursor.as_deref(), Some("b"));

        let second = store.list(&ctx, "c", "u", 2, first.cursor.as_deref()).unwrap();
        assert_eq!(second.objects.len(), 1);
        assert_eq!(second.objects[0].key, "c");
        assert_eq!(second.cursor, None);
    }

    #[test]
    fn test_injected_failures_and_cancellation() {
        let store = MemoryStore::new();
        let ctx = Context::background();

        store.fail_writes("c");
        assert!(matches!(
            store.write(&ctx, "c", "k", "u", "v".into(), WriteCondition::Any),
            Err(EconomyError::Internal(_))
        ));
        store.heal("c");
        assert!(store.write(&ctx, "c", "k", "u", "v".into(), WriteCondition::Any).is_ok());

        ctx.cancel();
        assert_eq!(store.read(&ctx, "c", "k", "u"), Err(EconomyError::Cancelled));
    }
}
