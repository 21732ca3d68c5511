//! In-memory key store

use super::{KeyStore, PutOptions};
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use zeroize::Zeroizing;

/// Key store backed by a concurrent hash map
///
/// Keys are indexed by their hex encoding. The `encrypt` hint is accepted and
/// ignored since nothing leaves process memory.
#[derive(Default)]
pub struct MemoryKeyStore {
    values: DashMap<String, Zeroizing<Vec<u8>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether a value is stored under `key`
    pub fn contains(&self, key: &[u8]) -> bool {
        self.values.contains_key(&hex::encode(key))
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn put(&self, key: &[u8], value: &[u8], options: PutOptions) -> Result<()> {
        let index = hex::encode(key);

        match self.values.entry(index) {
            Entry::Occupied(mut entry) => {
                if !options.force {
                    return Err(Error::AlreadyExists(format!(
                        "key value({}) already exists",
                        entry.key()
                    )));
                }
                entry.insert(Zeroizing::new(value.to_vec()));
            }
            Entry::Vacant(entry) => {
                entry.insert(Zeroizing::new(value.to_vec()));
            }
        }

        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let index = hex::encode(key);

        self.values
            .get(&index)
            .map(|value| value.to_vec())
            .ok_or_else(|| Error::NotFound(format!("key value({}) not found", index)))
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.values.remove(&hex::encode(key));
        Ok(())
    }
}

impl std::fmt::Debug for MemoryKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKeyStore")
            .field("entries", &self.values.len())
            .field("values", &"[REDACTED]")
            .finish()
    }
}
