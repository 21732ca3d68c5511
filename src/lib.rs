//! Trust Signer
//!
//! Custodial key-management core for a multi-tenant signing service:
//! - Derives a deterministic HD wallet from one mnemonic per instance
//! - Keeps all key material encrypted at rest under caller-supplied passwords
//! - Signs caller-supplied digests without returning raw key bytes
//! - Manages per-tenant hot, backup and cold wallets
//!
//! # Security Model
//!
//! - The mnemonic is encrypted under the admin password
//! - Each opened key is encrypted under its own session password
//! - Signing failures never reveal whether a key exists or the password was wrong
//! - Secret-holding types redact themselves in `Debug` and zeroize on drop

pub mod codec;
pub mod config;
pub mod crypto;
pub mod curves;
pub mod did;
pub mod hd;
pub mod keystore;
pub mod telemetry;
pub mod tenancy;

mod error;

// Re-export commonly used types
pub use codec::{KdfParams, KeystoreCodec, Metadata, SecretCodec};
pub use config::{Config, CryptoConfig, TenancyConfig};
pub use crypto::{CryptoProvider, OpenedKey};
pub use curves::{Curve, Signature};
pub use did::{hash160, parse_did, pubkey_to_did, Namespace};
pub use error::{Error, Result, ResultExt};
pub use keystore::{KeyStore, MemoryKeyStore, PutOptions};
pub use tenancy::{
    MemoryTenancyStorage, MultiTenancyProvider, PathAllocator, SequentialPathAllocator, Tenancy,
    TenancyStorage, TenancyWallet, WalletAddresses,
};
