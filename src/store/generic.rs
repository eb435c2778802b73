use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::Mutex;

/// Mutex-guarded map shared by the in-memory backends.
pub struct GenericMemoryStore<K, V> {
    store: Mutex<HashMap<K, V>>,
}

impl<K, V> Default for GenericMemoryStore<K, V> {
    fn default() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> GenericMemoryStore<K, V>
where
    K: Eq + Hash + Send,
    V: Clone + Send,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.store.lock().await.get(key).cloned()
    }

    pub async fn put(&self, key: K, value: V) {
        self.store.lock().await.insert(key, value);
    }

    pub async fn remove(&self, key: &K) -> Option<V> {
        self.store.lock().await.remove(key)
    }

    pub async fn len(&self) -> usize {
        self.store.lock().await.len()
    }

    /// Drops every entry the predicate rejects and returns how many were dropped.
    pub async fn retain_where<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&K, &V) -> bool,
    {
        let mut store = self.store.lock().await;
        let before = store.len();
        store.retain(|k, v| keep(k, v));
        before - store.len()
    }
}
