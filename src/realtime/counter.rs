use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// The count went from 0 to 1.
    Opened,
    /// The count went from 1 to 0.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountChange {
    pub count: u32,
    pub edge: Option<Edge>,
}

/// Reference counts for one connection's channels. Counts never go below zero and keys at zero
/// are not retained.
#[derive(Debug)]
pub struct CounterManager<K> {
    counts: HashMap<K, u32>,
}

impl<K> Default for CounterManager<K> {
    fn default() -> Self {
        Self {
            counts: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> CounterManager<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, key: &K) -> CountChange {
        let count = self.counts.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(1);
        CountChange {
            count: *count,
            edge: (*count == 1).then_some(Edge::Opened),
        }
    }

    pub fn decrement(&mut self, key: &K) -> CountChange {
        match self.counts.get_mut(key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                CountChange {
                    count: *count,
                    edge: None,
                }
            }
            Some(_) => {
                self.counts.remove(key);
                CountChange {
                    count: 0,
                    edge: Some(Edge::Closed),
                }
            }
            None => CountChange {
                count: 0,
                edge: None,
            },
        }
    }

    pub fn count(&self, key: &K) -> u32 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Empties the manager, returning every key that was open with its count.
    pub fn drain(&mut self) -> Vec<(K, u32)> {
        self.counts.drain().collect()
    }
}
