//! Encrypted blob storage for key material
//!
//! The store is opaque: it never sees passwords and never interprets values.
//! Password-based encryption happens before values reach it.

mod memory;

pub use memory::MemoryKeyStore;

use crate::Result;
use async_trait::async_trait;

/// Options for [`KeyStore::put`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutOptions {
    /// Overwrite an existing value instead of failing
    pub force: bool,
    /// At-rest encryption hint for the backend
    pub encrypt: bool,
}

impl PutOptions {
    /// Forced overwrite of a value that is already password-encrypted
    pub const fn forced_secret() -> Self {
        Self {
            force: true,
            encrypt: true,
        }
    }

    /// Forced overwrite of a plain value
    pub const fn forced() -> Self {
        Self {
            force: true,
            encrypt: false,
        }
    }
}

/// Key/value store for encrypted key material
///
/// Implementations must be safe for concurrent use across distinct keys.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Store `value` under `key`
    ///
    /// Fails with `AlreadyExists` if the key is present and `force` is unset.
    async fn put(&self, key: &[u8], value: &[u8], options: PutOptions) -> Result<()>;

    /// Load the value under `key`, or `NotFound`
    async fn get(&self, key: &[u8]) -> Result<Vec<u8>>;

    /// Remove the value under `key`; removing an absent key succeeds
    async fn delete(&self, key: &[u8]) -> Result<()>;
}
