//! In-memory store adapter
//!
//! Process-local implementation of the [`Store`] contract for tests and
//! single-instance deployments. Not distributed: each process sees only its
//! own state. Clones share one underlying map set, so a producer and a
//! consumer in the same process can hand each other data.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::Result;
use crate::store::{Store, StoreCommand};

#[derive(Debug, Default)]
struct Maps {
    strings: HashMap<String, (String, Option<Instant>)>,
    lists: HashMap<String, Vec<String>>,
    hashes: HashMap<String, BTreeMap<String, String>>,
    sorted: HashMap<String, BTreeMap<String, i64>>,
}

impl Maps {
    fn string_if_live(&self, key: &str) -> Option<&String> {
        match self.strings.get(key) {
            Some((value, deadline)) => match deadline {
                Some(deadline) if *deadline <= Instant::now() => None,
                _ => Some(value),
            },
            None => None,
        }
    }

    fn apply(&mut self, command: StoreCommand) {
        match command {
            StoreCommand::SortedSetAdd { key, score, member } => {
                self.sorted.entry(key).or_default().insert(member, score);
            }
            StoreCommand::SortedSetRemove { key, member } => {
                if let Some(set) = self.sorted.get_mut(&key) {
                    set.remove(&member);
                }
            }
            StoreCommand::HashSet { key, field, value } => {
                self.hashes.entry(key).or_default().insert(field, value);
            }
            StoreCommand::HashDelete { key, field } => {
                if let Some(hash) = self.hashes.get_mut(&key) {
                    hash.remove(&field);
                }
            }
            StoreCommand::ListPush { key, value } => {
                self.lists.entry(key).or_default().push(value);
            }
            StoreCommand::Delete { key } => {
                self.strings.remove(&key);
                self.lists.remove(&key);
                self.hashes.remove(&key);
                self.sorted.remove(&key);
            }
        }
    }
}

/// In-process store sharing state across clones
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    maps: Arc<Mutex<Maps>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.maps.lock().string_if_live(key).cloned())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut maps = self.maps.lock();
        if maps.string_if_live(key).is_some() {
            return Ok(false);
        }
        maps.strings.insert(
            key.to_string(),
            (value.to_string(), Some(Instant::now() + ttl)),
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.maps.lock().apply(StoreCommand::Delete {
            key: key.to_string(),
        });
        Ok(())
    }

    async fn list_range(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let maps = self.maps.lock();
        let Some(list) = maps.lists.get(key) else {
            return Ok(Vec::new());
        };

        let len = list.len() as i64;
        let clamp = |index: i64| -> i64 {
            // negative indexes count from the tail, as LRANGE does
            if index < 0 {
                (len + index).max(0)
            } else {
                index
            }
        };
        let start = clamp(start);
        let stop = clamp(stop).min(len - 1);
        if start > stop || start >= len {
            return Ok(Vec::new());
        }

        Ok(list[start as usize..=stop as usize].to_vec())
    }

    async fn hash_scan_prefix(&self, key: &str, prefix: &str) -> Result<Vec<(String, String)>> {
        let maps = self.maps.lock();
        let Some(hash) = maps.hashes.get(key) else {
            return Ok(Vec::new());
        };

        Ok(hash
            .iter()
            .filter(|(field, _)| field.starts_with(prefix))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect())
    }

    async fn sorted_range_by_score(&self, key: &str, min: i64, max: i64) -> Result<Vec<String>> {
        let maps = self.maps.lock();
        let Some(set) = maps.sorted.get(key) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(&i64, &String)> = set
            .iter()
            .filter(|(_, score)| min <= **score && **score <= max)
            .map(|(member, score)| (score, member))
            .collect();
        scored.sort();

        Ok(scored.into_iter().map(|(_, member)| member.clone()).collect())
    }

    async fn execute_batch(&self, commands: Vec<StoreCommand>) -> Result<()> {
        // One lock acquisition for the whole batch keeps it atomic with
        // respect to every other operation on this store.
        let mut maps = self.maps.lock();
        for command in commands {
            maps.apply(command);
        }
        Ok(())
    }
}
