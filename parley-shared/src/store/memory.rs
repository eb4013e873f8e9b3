use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{StateStore, StoreResult};

#[derive(Debug, Clone)]
enum Entry {
    Value(String),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
}

/// In-memory state store backing the unit tests (and handy for local
/// single-process runs). Sets iterate in sorted order, which keeps the
/// selector's documented first-encountered tie-break deterministic here.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    published: Mutex<Vec<(String, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages published over the pub/sub surface, in order. Tests use
    /// this to observe the degraded relay path.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.lock().get(key).and_then(|entry| match entry {
            Entry::Value(v) => Some(v.clone()),
            _ => None,
        }))
    }

    async fn set_nx(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut entries = self.lock();
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_owned(), Entry::Value(value.to_owned()));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.lock().remove(key);
        Ok(())
    }

    async fn hash_set(&self, key: &str, fields: &[(&str, String)]) -> StoreResult<()> {
        let mut entries = self.lock();
        let entry = entries
            .entry(key.to_owned())
            .or_insert_with(|| Entry::Hash(HashMap::new()));
        if let Entry::Hash(h) = entry {
            for (field, value) in fields {
                h.insert((*field).to_owned(), value.clone());
            }
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        Ok(self
            .lock()
            .get(key)
            .and_then(|entry| match entry {
                Entry::Hash(h) => Some(h.clone()),
                _ => None,
            })
            .unwrap_or_default())
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut entries = self.lock();
        let entry = entries
            .entry(key.to_owned())
            .or_insert_with(|| Entry::Set(BTreeSet::new()));
        if let Entry::Set(s) = entry {
            s.insert(member.to_owned());
        }
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<()> {
        if let Some(Entry::Set(s)) = self.lock().get_mut(key) {
            s.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .lock()
            .get(key)
            .and_then(|entry| match entry {
                Entry::Set(s) => Some(s.iter().cloned().collect()),
                _ => None,
            })
            .unwrap_or_default())
    }

    async fn set_len(&self, key: &str) -> StoreResult<u64> {
        Ok(self
            .lock()
            .get(key)
            .and_then(|entry| match entry {
                Entry::Set(s) => Some(s.len() as u64),
                _ => None,
            })
            .unwrap_or(0))
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((channel.to_owned(), payload.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_writes_only_once() {
        let store = MemoryStore::new();
        assert!(store.set_nx("k", "first").await.unwrap());
        assert!(!store.set_nx("k", "second").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn sets_deduplicate_members() {
        let store = MemoryStore::new();
        store.set_add("s", "a").await.unwrap();
        store.set_add("s", "a").await.unwrap();
        store.set_add("s", "b").await.unwrap();
        assert_eq!(store.set_len("s").await.unwrap(), 2);
        store.set_remove("s", "a").await.unwrap();
        assert_eq!(store.set_members("s").await.unwrap(), vec!["b".to_owned()]);
    }
}
