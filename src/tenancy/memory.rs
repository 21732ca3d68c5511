//! In-memory tenancy storage

use super::{Tenancy, TenancyStorage, TenancyUpdate};
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Tenancy storage backed by a concurrent hash map
///
/// `update` holds the entry's write guard for the whole read-modify-write.
#[derive(Debug, Default)]
pub struct MemoryTenancyStorage {
    tenants: DashMap<String, Tenancy>,
}

impl MemoryTenancyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}

fn not_found(id: &str) -> Error {
    Error::NotFound(format!("tenancy {} not found", id))
}

#[async_trait]
impl TenancyStorage for MemoryTenancyStorage {
    async fn create(&self, tenancy: Tenancy) -> Result<()> {
        match self.tenants.entry(tenancy.id.clone()) {
            Entry::Occupied(entry) => Err(Error::AlreadyExists(format!(
                "tenancy {} already exists",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                entry.insert(tenancy);
                Ok(())
            }
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.tenants.remove(id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Tenancy> {
        self.tenants
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| not_found(id))
    }

    async fn update(&self, id: &str, update: TenancyUpdate<'_>) -> Result<Tenancy> {
        let mut entry = self.tenants.get_mut(id).ok_or_else(|| not_found(id))?;

        let mut draft = entry.value().clone();
        update(&mut draft)?;

        if draft.id != id {
            return Err(Error::InvalidArgument(format!(
                "Update may not change tenancy id {}",
                id
            )));
        }

        *entry.value_mut() = draft.clone();
        Ok(draft)
    }
}
