//! Deterministic identifiers for wallets and keys
//!
//! An identifier is `did:<vendor>:<base58check(payload, version)>` where the
//! payload is `hash160(nonce) || sha256d(hash160(nonce))[..3]` and `nonce` is
//! the first 32 bytes of the public key, zero filled when the key is shorter.
//!
//! The `(vendor, version)` pair is the only thing separating wallet IDs from
//! key IDs, so every provider must be configured with disjoint namespaces.

use crate::{Error, Result};
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of the hash160 digest
pub const DIGEST_LEN: usize = 20;

/// Length of the inner checksum appended to the digest
pub const CHECKSUM_LEN: usize = 3;

/// Length of the encoded payload (digest + checksum)
pub const PAYLOAD_LEN: usize = DIGEST_LEN + CHECKSUM_LEN;

const NONCE_LEN: usize = 32;

/// Identifier namespace tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    pub vendor: String,
    pub version: u8,
}

impl Namespace {
    pub fn new(vendor: impl Into<String>, version: u8) -> Self {
        Self {
            vendor: vendor.into(),
            version,
        }
    }

    /// Derive an identifier for `pubkey` in this namespace
    pub fn derive(&self, pubkey: &[u8]) -> String {
        pubkey_to_did(pubkey, &self.vendor, self.version)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.vendor, self.version)
    }
}

/// SHA-256 followed by RIPEMD-160
pub fn hash160(data: &[u8]) -> [u8; DIGEST_LEN] {
    let sha = Sha256::digest(data);
    Ripemd160::digest(sha).into()
}

fn sha256d(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

fn payload_for(pubkey: &[u8]) -> [u8; PAYLOAD_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    let take = pubkey.len().min(NONCE_LEN);
    nonce[..take].copy_from_slice(&pubkey[..take]);

    let digest = hash160(&nonce);
    let checksum = sha256d(&digest);

    let mut payload = [0u8; PAYLOAD_LEN];
    payload[..DIGEST_LEN].copy_from_slice(&digest);
    payload[DIGEST_LEN..].copy_from_slice(&checksum[..CHECKSUM_LEN]);
    payload
}

/// Map a public key to its display identifier
pub fn pubkey_to_did(pubkey: &[u8], vendor: &str, version: u8) -> String {
    let payload = payload_for(pubkey);
    let encoded = bs58::encode(payload)
        .with_check_version(version)
        .into_string();

    format!("did:{}:{}", vendor, encoded)
}

/// Decoded form of an identifier string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedDid {
    pub vendor: String,
    pub version: u8,
    pub payload: [u8; PAYLOAD_LEN],
}

impl DecodedDid {
    /// The hash160 part of the payload
    pub fn digest(&self) -> &[u8] {
        &self.payload[..DIGEST_LEN]
    }
}

/// Parse and verify an identifier string
///
/// Checks the base58check checksum and the inner 3-byte checksum.
pub fn parse_did(did: &str) -> Result<DecodedDid> {
    let rest = did
        .strip_prefix("did:")
        .ok_or_else(|| Error::InvalidArgument(format!("Missing did: prefix in {}", did)))?;

    let (vendor, encoded) = rest
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidArgument(format!("Missing vendor in {}", did)))?;

    if vendor.is_empty() {
        return Err(Error::InvalidArgument(format!("Empty vendor in {}", did)));
    }

    let decoded = bs58::decode(encoded)
        .with_check(None)
        .into_vec()
        .map_err(|e| Error::InvalidArgument(format!("Invalid base58check in {}: {}", did, e)))?;

    if decoded.len() != PAYLOAD_LEN + 1 {
        return Err(Error::InvalidArgument(format!(
            "Invalid payload length: expected {}, got {}",
            PAYLOAD_LEN + 1,
            decoded.len()
        )));
    }

    let version = decoded[0];
    let mut payload = [0u8; PAYLOAD_LEN];
    payload.copy_from_slice(&decoded[1..]);

    let checksum = sha256d(&payload[..DIGEST_LEN]);
    if checksum[..CHECKSUM_LEN] != payload[DIGEST_LEN..] {
        return Err(Error::InvalidArgument(format!(
            "Inner checksum mismatch in {}",
            did
        )));
    }

    Ok(DecodedDid {
        vendor: vendor.to_string(),
        version,
        payload,
    })
}
