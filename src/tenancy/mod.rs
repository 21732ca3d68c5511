//! Multi-tenant wallet management
//!
//! Each tenant owns a hot wallet (active signing), a backup wallet (recovery)
//! and a set of externally custodied cold wallet addresses. Keys for the hot
//! and backup wallets are opened through [`crate::CryptoProvider`]; cold
//! wallets are addresses only.

mod allocator;
mod ids;
mod memory;
mod provider;

pub use allocator::{PathAllocation, PathAllocator, SequentialPathAllocator};
pub use ids::Snowflake;
pub use memory::MemoryTenancyStorage;
pub use provider::MultiTenancyProvider;

use crate::curves::Curve;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cold wallet addresses keyed by a caller-chosen label (usually a chain name)
pub type WalletAddresses = BTreeMap<String, String>;

/// Wallet backed by a key opened through the crypto provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenancyWallet {
    /// Key identifier in the crypto provider
    pub key_id: String,
    /// Derivation path the key was opened at
    pub bip44_path: String,
    /// Address per curve
    pub addresses: BTreeMap<Curve, String>,
}

/// Per-tenant wallet aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenancy {
    pub id: String,
    pub wallet_hot: TenancyWallet,
    pub wallet_backup: TenancyWallet,
    pub wallet_cold: WalletAddresses,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenancy {
    /// Wallets holding managed keys
    pub fn managed_wallets(&self) -> [&TenancyWallet; 2] {
        [&self.wallet_hot, &self.wallet_backup]
    }
}

/// Mutation applied to a tenancy inside [`TenancyStorage::update`]
pub type TenancyUpdate<'a> = Box<dyn FnOnce(&mut Tenancy) -> Result<()> + Send + 'a>;

/// Persistence for tenancy records
///
/// `update` must be atomic and isolated per tenant: concurrent updates to one
/// tenant are serialized, updates to different tenants do not contend.
#[async_trait]
pub trait TenancyStorage: Send + Sync {
    /// Insert a new record; fails with `AlreadyExists` on a duplicate id
    async fn create(&self, tenancy: Tenancy) -> Result<()>;

    /// Remove a record; removing an absent record succeeds
    async fn delete(&self, id: &str) -> Result<()>;

    /// Load a record, or `NotFound`
    async fn get(&self, id: &str) -> Result<Tenancy>;

    /// Read-modify-write a record in one transaction and return the result
    ///
    /// Nothing is written when `update` fails.
    async fn update(&self, id: &str, update: TenancyUpdate<'_>) -> Result<Tenancy>;
}
