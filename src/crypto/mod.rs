//! Custodial key orchestration
//!
//! The HD wallet mnemonic and every opened key live in the key store only as
//! password-encrypted records. Raw key bytes never leave this module.

mod provider;

pub use provider::{CryptoProvider, OpenedKey, ID_SLOT, MNEMONIC_SLOT};
