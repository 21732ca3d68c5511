//! Password-based encoding of secret payloads
//!
//! # Algorithms
//!
//! - **Key Derivation**: Argon2id over the password and a random 16-byte salt
//! - **Encryption**: ChaCha20-Poly1305, with the optional `address` metadata
//!   bound as associated data
//!
//! Encoded values are JSON keystore envelopes, so the KDF parameters travel
//! with the ciphertext and old records stay readable when defaults change.

use crate::{Error, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Salt length for key derivation
pub const SALT_LEN: usize = 16;

/// Nonce length for ChaCha20-Poly1305
pub const NONCE_LEN: usize = 12;

const KEY_LEN: usize = 32;
const ENVELOPE_VERSION: u32 = 1;
const CIPHER_NAME: &str = "chacha20-poly1305";
const KDF_NAME: &str = "argon2id";

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65_536, // 64 MiB
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests
    pub const fn insecure_fast() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn to_argon2(self) -> Result<Argon2<'static>> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| Error::Config(format!("Invalid Argon2 params: {e}")))?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    pub fn validate(&self) -> Result<()> {
        self.to_argon2().map(|_| ())
    }
}

/// Metadata bound to an encoded payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Identifier the payload belongs to
    pub address: Option<String>,
}

impl Metadata {
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
        }
    }
}

/// Password-based codec for secret payloads
pub trait SecretCodec: Send + Sync {
    /// Encrypt `payload` under `password`
    fn encode(&self, payload: &[u8], password: &SecretString, metadata: &Metadata)
        -> Result<Vec<u8>>;

    /// Decrypt an encoded value
    ///
    /// Fails with `Authentication` on a wrong password or a corrupt value.
    fn decode(&self, password: &SecretString, encoded: &[u8]) -> Result<Zeroizing<Vec<u8>>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    crypto: CryptoSection,
}

#[derive(Debug, Serialize, Deserialize)]
struct CryptoSection {
    cipher: String,
    ciphertext: String,
    nonce: String,
    kdf: String,
    kdfparams: KdfSection,
}

#[derive(Debug, Serialize, Deserialize)]
struct KdfSection {
    salt: String,
    #[serde(flatten)]
    params: KdfParams,
}

/// JSON keystore codec using Argon2id and ChaCha20-Poly1305
#[derive(Debug, Clone, Default)]
pub struct KeystoreCodec {
    params: KdfParams,
}

impl KeystoreCodec {
    pub fn new(params: KdfParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    fn derive_key(
        params: KdfParams,
        password: &SecretString,
        salt: &[u8],
    ) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        let argon2 = params.to_argon2()?;

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        argon2
            .hash_password_into(password.expose_secret().as_bytes(), salt, &mut key[..])
            .map_err(|e| Error::Crypto(format!("Key derivation failed: {e}")))?;

        Ok(key)
    }
}

fn authentication_failed() -> Error {
    Error::Authentication("Failed to decrypt payload (wrong password or corrupted data)".into())
}

impl SecretCodec for KeystoreCodec {
    fn encode(
        &self,
        payload: &[u8],
        password: &SecretString,
        metadata: &Metadata,
    ) -> Result<Vec<u8>> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut nonce);

        let key = Self::derive_key(self.params, password, &salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let aad = metadata.address.as_deref().unwrap_or_default().as_bytes();

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload { msg: payload, aad },
            )
            .map_err(|e| Error::Crypto(format!("Encryption failed: {e}")))?;

        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            address: metadata.address.clone(),
            crypto: CryptoSection {
                cipher: CIPHER_NAME.to_string(),
                ciphertext: hex::encode(ciphertext),
                nonce: hex::encode(nonce),
                kdf: KDF_NAME.to_string(),
                kdfparams: KdfSection {
                    salt: hex::encode(salt),
                    params: self.params,
                },
            },
        };

        Ok(serde_json::to_vec(&envelope)?)
    }

    fn decode(&self, password: &SecretString, encoded: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let envelope: Envelope =
            serde_json::from_slice(encoded).map_err(|_| authentication_failed())?;

        if envelope.version != ENVELOPE_VERSION
            || envelope.crypto.cipher != CIPHER_NAME
            || envelope.crypto.kdf != KDF_NAME
        {
            return Err(Error::Authentication(format!(
                "Unsupported keystore envelope (version {}, cipher {}, kdf {})",
                envelope.version, envelope.crypto.cipher, envelope.crypto.kdf
            )));
        }

        let salt = hex::decode(&envelope.crypto.kdfparams.salt).map_err(|_| authentication_failed())?;
        let nonce = hex::decode(&envelope.crypto.nonce).map_err(|_| authentication_failed())?;
        let ciphertext =
            hex::decode(&envelope.crypto.ciphertext).map_err(|_| authentication_failed())?;

        if nonce.len() != NONCE_LEN {
            return Err(authentication_failed());
        }

        let key = Self::derive_key(envelope.crypto.kdfparams.params, password, &salt)
            .map_err(|_| authentication_failed())?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let aad = envelope.address.as_deref().unwrap_or_default().as_bytes();

        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad,
                },
            )
            .map_err(|_| authentication_failed())?;

        Ok(Zeroizing::new(plaintext))
    }
}
