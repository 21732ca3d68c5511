//! Hierarchical deterministic key derivation
//!
//! BIP39 English mnemonics and BIP32 secp256k1 derivation. Everything that
//! holds secret material here is zeroized on drop and redacted in `Debug`.

use crate::{Error, Result};
use bip32::{DerivationPath, XPrv};
use bip39::{Language, Mnemonic};
use rand::rngs::OsRng;
use rand::RngCore;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Entropy sizes accepted by BIP39, in bits
pub const VALID_ENTROPY_BITS: [usize; 5] = [128, 160, 192, 224, 256];

/// Check that `bits` is a valid BIP39 entropy size
pub fn validate_entropy_bits(bits: usize) -> Result<()> {
    if VALID_ENTROPY_BITS.contains(&bits) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "Invalid entropy size {} bits: must be a multiple of 32 in [128, 256]",
            bits
        )))
    }
}

/// Generate `bits` of entropy from the OS RNG
pub fn new_entropy(bits: usize) -> Result<Zeroizing<Vec<u8>>> {
    validate_entropy_bits(bits)?;

    let mut entropy = Zeroizing::new(vec![0u8; bits / 8]);
    OsRng.fill_bytes(&mut entropy);
    Ok(entropy)
}

/// Encode entropy as an English mnemonic phrase
pub fn new_mnemonic(entropy: &[u8]) -> Result<Zeroizing<String>> {
    let mnemonic = Mnemonic::from_entropy_in(Language::English, entropy)
        .map_err(|e| Error::Crypto(format!("Mnemonic generation failed: {}", e)))?;

    Ok(Zeroizing::new(mnemonic.to_string()))
}

/// BIP32 root derived from a mnemonic
pub struct RootKey {
    seed: Zeroizing<[u8; 64]>,
}

impl RootKey {
    /// Derive the root from a mnemonic phrase and optional passphrase
    pub fn from_mnemonic(phrase: &str, passphrase: &str) -> Result<Self> {
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase)
            .map_err(|e| Error::Crypto(format!("Invalid mnemonic: {}", e)))?;

        Ok(Self {
            seed: Zeroizing::new(mnemonic.to_seed(passphrase)),
        })
    }

    /// Derive the keypair at a BIP44 path such as `m/44'/60'/0'/0/0`
    pub fn derive_at(&self, path: &str) -> Result<DerivedKey> {
        let path = DerivationPath::from_str(path)
            .map_err(|e| Error::InvalidArgument(format!("Invalid derivation path {}: {}", path, e)))?;

        let child = XPrv::derive_from_path(self.seed.as_slice(), &path)
            .map_err(|e| Error::Crypto(format!("Key derivation failed: {}", e)))?;

        Ok(DerivedKey {
            public_key: child.public_key().to_bytes().to_vec(),
            private_key: Zeroizing::new(child.to_bytes().to_vec()),
        })
    }
}

impl std::fmt::Debug for RootKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootKey").field("seed", &"[REDACTED]").finish()
    }
}

/// Keypair at a derivation path
pub struct DerivedKey {
    /// Compressed SEC1 public key (33 bytes)
    pub public_key: Vec<u8>,
    /// Raw private scalar (32 bytes)
    pub private_key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("public_key", &hex::encode(&self.public_key))
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}
