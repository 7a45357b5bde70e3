/// Storage
///
/// Persistence contracts used by the engines. Every insert is
/// insert-or-abort, so two writers racing on the same key cannot both win.
/// The in-memory implementations back the tests and short-lived clients;
/// applications bring their own database by implementing the traits.
///
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::history::JsonRpcRecord;
use crate::types::{Notification, Pairing, Proposal, Session, Subscription};

pub trait KeyStore: Send + Sync {
    fn set(&self, tag: &str, value: Vec<u8>);
    fn get(&self, tag: &str) -> Option<Vec<u8>>;
    fn delete(&self, tag: &str) -> bool;
}

pub trait Repository<K, V>: Send + Sync {
    /// Fails with `AlreadyExists` when the key is taken.
    fn insert(&self, key: K, value: V) -> Result<()>;
    fn get(&self, key: &K) -> Option<V>;
    fn upsert(&self, key: K, value: V);
    /// Read-modify-write under the repository lock.
    fn update(&self, key: &K, f: &mut dyn FnMut(&mut V)) -> Result<V>;
    fn delete(&self, key: &K) -> Option<V>;
    fn values(&self) -> Vec<V>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct MemoryKeyStore {
    keys: Mutex<HashMap<String, Vec<u8>>>,
}

impl KeyStore for MemoryKeyStore {
    fn set(&self, tag: &str, value: Vec<u8>) {
        lock(&self.keys).insert(tag.to_string(), value);
    }

    fn get(&self, tag: &str) -> Option<Vec<u8>> {
        lock(&self.keys).get(tag).cloned()
    }

    fn delete(&self, tag: &str) -> bool {
        lock(&self.keys).remove(tag).is_some()
    }
}

pub struct MemoryRepository<K, V> {
    entries: Mutex<HashMap<K, V>>,
}

impl<K, V> Default for MemoryRepository<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> Repository<K, V> for MemoryRepository<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync,
    V: Clone + Send + Sync,
{
    fn insert(&self, key: K, value: V) -> Result<()> {
        let mut entries = lock(&self.entries);
        if entries.contains_key(&key) {
            return Err(Error::AlreadyExists(format!("{key:?}")));
        }
        entries.insert(key, value);
        Ok(())
    }

    fn get(&self, key: &K) -> Option<V> {
        lock(&self.entries).get(key).cloned()
    }

    fn upsert(&self, key: K, value: V) {
        lock(&self.entries).insert(key, value);
    }

    fn update(&self, key: &K, f: &mut dyn FnMut(&mut V)) -> Result<V> {
        let mut entries = lock(&self.entries);
        let value = entries
            .get_mut(key)
            .ok_or_else(|| Error::NotFound(format!("{key:?}")))?;
        f(value);
        Ok(value.clone())
    }

    fn delete(&self, key: &K) -> Option<V> {
        lock(&self.entries).remove(key)
    }

    fn values(&self) -> Vec<V> {
        lock(&self.entries).values().cloned().collect()
    }
}

/// Everything a client persists, grouped so it can be handed over in one go.
#[derive(Clone)]
pub struct Storage {
    pub keys: Arc<dyn KeyStore>,
    pub pairings: Arc<dyn Repository<String, Pairing>>,
    pub sessions: Arc<dyn Repository<String, Session>>,
    pub proposals: Arc<dyn Repository<u64, Proposal>>,
    pub history: Arc<dyn Repository<u64, JsonRpcRecord>>,
    pub subscriptions: Arc<dyn Repository<String, Subscription>>,
    pub notifications: Arc<dyn Repository<String, Notification>>,
}

impl Storage {
    pub fn in_memory() -> Self {
        Self {
            keys: Arc::new(MemoryKeyStore::default()),
            pairings: Arc::new(MemoryRepository::default()),
            sessions: Arc::new(MemoryRepository::default()),
            proposals: Arc::new(MemoryRepository::default()),
            history: Arc::new(MemoryRepository::default()),
            subscriptions: Arc::new(MemoryRepository::default()),
            notifications: Arc::new(MemoryRepository::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_or_abort() {
        let repo = MemoryRepository::<String, u32>::default();
        repo.insert("a".to_string(), 1).unwrap();
        assert!(matches!(
            repo.insert("a".to_string(), 2),
            Err(Error::AlreadyExists(_))
        ));
        assert_eq!(repo.get(&"a".to_string()), Some(1));
    }

    #[test]
    fn test_update_missing_key() {
        let repo = MemoryRepository::<u64, u32>::default();
        assert!(matches!(
            repo.update(&7, &mut |v| *v += 1),
            Err(Error::NotFound(_))
        ));
        repo.upsert(7, 1);
        assert_eq!(repo.update(&7, &mut |v| *v += 1).unwrap(), 2);
    }
}
