//! BIP44 path allocation for tenant wallets

use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::SecretString;
use std::sync::atomic::{AtomicU32, Ordering};
use zeroize::Zeroizing;

/// A freshly allocated derivation path and the session password for its key
pub struct PathAllocation {
    pub path: String,
    pub session_password: SecretString,
}

impl std::fmt::Debug for PathAllocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathAllocation")
            .field("path", &self.path)
            .field("session_password", &"[REDACTED]")
            .finish()
    }
}

/// Issues derivation paths and keeps the session password for each
#[async_trait]
pub trait PathAllocator: Send + Sync {
    /// Allocate a new path for `tenant_id`
    ///
    /// `internal` selects the BIP44 change chain (backup wallets) over the
    /// external chain (hot wallets).
    async fn allocate(&self, tenant_id: &str, internal: bool) -> Result<PathAllocation>;

    /// Session password for a path previously allocated to `tenant_id`
    async fn session_password(&self, tenant_id: &str, bip44_path: &str) -> Result<SecretString>;

    /// Forget a path and its password; releasing an unknown path succeeds
    async fn release(&self, tenant_id: &str, bip44_path: &str) -> Result<()>;
}

const SESSION_PASSWORD_BYTES: usize = 32;
const MAX_ACCOUNT: u32 = (1 << 31) - 1;

/// In-process allocator handing out one BIP44 account per allocation
///
/// Paths have the form `m/44'/<coin>'/<account>'/<change>/0`. Session
/// passwords are random and held in memory only.
pub struct SequentialPathAllocator {
    coin_type: u32,
    next_account: AtomicU32,
    passwords: DashMap<(String, String), Zeroizing<String>>,
}

impl SequentialPathAllocator {
    pub fn new(coin_type: u32) -> Self {
        Self::starting_at(coin_type, 0)
    }

    /// Start issuing accounts from `account`, e.g. after a restart
    pub fn starting_at(coin_type: u32, account: u32) -> Self {
        Self {
            coin_type,
            next_account: AtomicU32::new(account),
            passwords: DashMap::new(),
        }
    }

    /// Number of live allocations
    pub fn len(&self) -> usize {
        self.passwords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passwords.is_empty()
    }

    fn next_account(&self) -> Result<u32> {
        self.next_account
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |account| {
                (account <= MAX_ACCOUNT).then(|| account + 1)
            })
            .map_err(|_| Error::Storage("BIP44 account space exhausted".to_string()))
    }
}

fn new_session_password() -> Zeroizing<String> {
    let mut bytes = Zeroizing::new([0u8; SESSION_PASSWORD_BYTES]);
    OsRng.fill_bytes(&mut bytes[..]);
    Zeroizing::new(hex::encode(&bytes[..]))
}

#[async_trait]
impl PathAllocator for SequentialPathAllocator {
    async fn allocate(&self, tenant_id: &str, internal: bool) -> Result<PathAllocation> {
        let account = self.next_account()?;
        let path = format!(
            "m/44'/{}'/{}'/{}/0",
            self.coin_type,
            account,
            u8::from(internal)
        );

        let password = new_session_password();
        let session_password = SecretString::from(password.to_string());
        self.passwords
            .insert((tenant_id.to_string(), path.clone()), password);

        tracing::debug!(tenant_id = %tenant_id, path = %path, internal, "Allocated wallet path");

        Ok(PathAllocation {
            path,
            session_password,
        })
    }

    async fn session_password(&self, tenant_id: &str, bip44_path: &str) -> Result<SecretString> {
        self.passwords
            .get(&(tenant_id.to_string(), bip44_path.to_string()))
            .map(|password| SecretString::from(password.to_string()))
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "no allocation of {} for tenant {}",
                    bip44_path, tenant_id
                ))
            })
    }

    async fn release(&self, tenant_id: &str, bip44_path: &str) -> Result<()> {
        self.passwords
            .remove(&(tenant_id.to_string(), bip44_path.to_string()));
        Ok(())
    }
}

impl std::fmt::Debug for SequentialPathAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialPathAllocator")
            .field("coin_type", &self.coin_type)
            .field("next_account", &self.next_account.load(Ordering::SeqCst))
            .field("passwords", &"[REDACTED]")
            .finish()
    }
}
