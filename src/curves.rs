//! Supported signing curves
//!
//! Private key bytes from HD derivation are reinterpreted on each curve as a
//! big-endian integer reduced modulo the curve order. Public keys are
//! uncompressed SEC1 points.
//!
//! Digests shorter than the curve's field are left-padded with zero bytes, so
//! a 20-byte hash160 signs on every curve. Nonces are drawn from the OS RNG.
//!
//! Recoverable signatures carry `v = 27 + recovery_id`, plus 4 when the
//! signer asked verifiers to assume a compressed public key encoding.

use crate::{Error, Result};
use alloy::primitives::{keccak256, Address};
use ecdsa::elliptic_curve::{NonZeroScalar, PublicKey, Scalar};
use ecdsa::hazmat::{bits2field, SignPrimitive};
use ecdsa::RecoveryId;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const V_BASE: u8 = 27;
const V_COMPRESSED: u8 = 4;

/// Elliptic curves a derived key can be projected onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Curve {
    Secp256k1,
    P224,
    P256,
    P384,
    P521,
}

// Binds the type `$c` to the curve for the body of each arm.
macro_rules! with_curve {
    ($curve:expr, $c:ident => $body:block) => {
        match $curve {
            Curve::Secp256k1 => {
                type $c = k256::Secp256k1;
                $body
            }
            Curve::P224 => {
                type $c = p224::NistP224;
                $body
            }
            Curve::P256 => {
                type $c = p256::NistP256;
                $body
            }
            Curve::P384 => {
                type $c = p384::NistP384;
                $body
            }
            Curve::P521 => {
                type $c = p521::NistP521;
                $body
            }
        }
    };
}

// Reduces arbitrary-length big-endian bytes to a non-zero scalar of curve `$c`.
macro_rules! secret_scalar {
    ($c:ident, $curve:expr, $secret:expr) => {{
        let radix = Scalar::<$c>::from(256u64);
        let scalar = $secret.iter().fold(Scalar::<$c>::from(0u64), |acc, byte| {
            acc * radix + Scalar::<$c>::from(u64::from(*byte))
        });
        let scalar: Option<NonZeroScalar<$c>> = NonZeroScalar::<$c>::new(scalar).into();
        scalar.ok_or_else(|| {
            Error::Crypto(format!("Private key is zero modulo the {} order", $curve))
        })?
    }};
}

impl Curve {
    pub const ALL: [Curve; 5] = [
        Curve::Secp256k1,
        Curve::P224,
        Curve::P256,
        Curve::P384,
        Curve::P521,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Curve::Secp256k1 => "secp256k1",
            Curve::P224 => "p224",
            Curve::P256 => "p256",
            Curve::P384 => "p384",
            Curve::P521 => "p521",
        }
    }

    /// Byte width of a field element, and of `r` and `s`
    pub fn field_size(&self) -> usize {
        match self {
            Curve::Secp256k1 | Curve::P256 => 32,
            Curve::P224 => 28,
            Curve::P384 => 48,
            Curve::P521 => 66,
        }
    }

    /// `hash` left-padded with zeros to the field width
    fn digest(&self, hash: &[u8]) -> Vec<u8> {
        let width = self.field_size();
        if hash.len() >= width {
            return hash.to_vec();
        }

        let mut digest = vec![0u8; width - hash.len()];
        digest.extend_from_slice(hash);
        digest
    }

    /// Uncompressed public key for `secret` on this curve
    pub fn public_key(&self, secret: &[u8]) -> Result<Vec<u8>> {
        with_curve!(self, C => {
            let scalar = secret_scalar!(C, self, secret);
            let key = ecdsa::VerifyingKey::<C>::from(PublicKey::<C>::from_secret_scalar(&scalar));
            Ok(key.to_encoded_point(false).as_bytes().to_vec())
        })
    }

    /// Sign a caller-supplied digest with `secret`
    pub fn sign(&self, secret: &[u8], hash: &[u8], compressed: bool) -> Result<Signature> {
        let digest = self.digest(hash);

        let (r, s, recovery_id) = with_curve!(self, C => {
            let scalar = secret_scalar!(C, self, secret);
            let z = bits2field::<C>(&digest)
                .map_err(|e| Error::InvalidArgument(format!("Unusable digest: {}", e)))?;
            let nonce = NonZeroScalar::<C>::random(&mut OsRng);

            let (signature, recovery_id) = (*scalar)
                .try_sign_prehashed(*nonce, &z)
                .map_err(|e| Error::Crypto(format!("{} signing failed: {}", self, e)))?;
            let recovery_id = recovery_id
                .ok_or_else(|| Error::Crypto(format!("{} signing produced no recovery id", self)))?;

            let (r, s) = signature.split_bytes();
            (r.to_vec(), s.to_vec(), recovery_id)
        });

        let mut v = V_BASE + recovery_id.to_byte();
        if compressed {
            v += V_COMPRESSED;
        }

        Ok(Signature {
            curve: *self,
            r,
            s,
            v,
        })
    }

    /// Render a wallet address for a public key produced by [`Curve::public_key`]
    ///
    /// secp256k1 keys map to EIP-55 Ethereum addresses; other curves use the
    /// hex-encoded public key.
    pub fn address(&self, public_key: &[u8]) -> Result<String> {
        match self {
            Curve::Secp256k1 => {
                if public_key.len() != 65 || public_key[0] != 0x04 {
                    return Err(Error::InvalidArgument(
                        "Expected a 65-byte uncompressed secp256k1 public key".to_string(),
                    ));
                }
                let hash = keccak256(&public_key[1..]);
                Ok(Address::from_slice(&hash[12..]).to_checksum(None))
            }
            _ => Ok(format!("0x{}", hex::encode(public_key))),
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Curve {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "secp256k1" | "k256" => Ok(Curve::Secp256k1),
            "p224" | "p-224" | "secp224r1" => Ok(Curve::P224),
            "p256" | "p-256" | "secp256r1" | "prime256v1" => Ok(Curve::P256),
            "p384" | "p-384" | "secp384r1" => Ok(Curve::P384),
            "p521" | "p-521" | "secp521r1" => Ok(Curve::P521),
            _ => Err(Error::InvalidArgument(format!("Unsupported curve: {}", s))),
        }
    }
}

/// Recoverable ECDSA signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub curve: Curve,
    /// Big-endian `r`, `curve.field_size()` bytes
    pub r: Vec<u8>,
    /// Big-endian `s`, `curve.field_size()` bytes
    pub s: Vec<u8>,
    /// Recovery byte: 27 + recovery id, plus 4 for compressed keys
    pub v: u8,
}

impl Signature {
    /// `r || s || v`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.r.len() + self.s.len() + 1);
        bytes.extend_from_slice(&self.r);
        bytes.extend_from_slice(&self.s);
        bytes.push(self.v);
        bytes
    }

    /// Whether the signer marked the key as compressed
    pub fn compressed(&self) -> bool {
        self.v >= V_BASE + V_COMPRESSED
    }

    fn recovery_id(&self) -> Result<RecoveryId> {
        let offset = self
            .v
            .checked_sub(V_BASE)
            .filter(|offset| *offset < 2 * V_COMPRESSED)
            .ok_or_else(|| Error::InvalidArgument(format!("Invalid recovery byte {}", self.v)))?;

        RecoveryId::from_byte(offset % V_COMPRESSED)
            .ok_or_else(|| Error::InvalidArgument(format!("Invalid recovery byte {}", self.v)))
    }

    /// Recover the signer's uncompressed public key and the compressed flag
    pub fn recover(&self, hash: &[u8]) -> Result<(Vec<u8>, bool)> {
        let width = self.curve.field_size();
        if self.r.len() != width || self.s.len() != width {
            return Err(Error::InvalidArgument(format!(
                "Signature components must be {} bytes on {}",
                width, self.curve
            )));
        }

        let recovery_id = self.recovery_id()?;
        let digest = self.curve.digest(hash);
        let mut rs = Vec::with_capacity(2 * width);
        rs.extend_from_slice(&self.r);
        rs.extend_from_slice(&self.s);

        let public_key = with_curve!(self.curve, C => {
            let signature = ecdsa::Signature::<C>::from_slice(&rs)
                .map_err(|e| Error::InvalidArgument(format!("Malformed signature: {}", e)))?;
            let key = ecdsa::VerifyingKey::<C>::recover_from_prehash(&digest, &signature, recovery_id)
                .map_err(|e| Error::Crypto(format!("{} recovery failed: {}", self.curve, e)))?;
            key.to_encoded_point(false).as_bytes().to_vec()
        });

        Ok((public_key, self.compressed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::did::hash160;
    use alloy::signers::local::PrivateKeySigner;
    use sha2::{Digest, Sha256};

    const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn secret() -> Vec<u8> {
        hex::decode(TEST_KEY).unwrap()
    }

    #[test]
    fn test_sign_and_recover_on_every_curve() {
        let hash = Sha256::digest(b"Hello");

        for curve in Curve::ALL {
            let public_key = curve.public_key(&secret()).unwrap();
            assert_eq!(public_key.len(), 1 + 2 * curve.field_size());

            let signature = curve.sign(&secret(), &hash, true).unwrap();
            assert_eq!(signature.r.len(), curve.field_size());
            assert_eq!(signature.s.len(), curve.field_size());

            let (recovered, compressed) = signature.recover(&hash).unwrap();
            assert_eq!(recovered, public_key, "curve {}", curve);
            assert!(compressed);
        }
    }

    #[test]
    fn test_short_digest_signs_on_every_curve() {
        let hash = hash160(b"Hello");

        for curve in Curve::ALL {
            let public_key = curve.public_key(&secret()).unwrap();
            let signature = curve
                .sign(&secret(), &hash, false)
                .unwrap_or_else(|e| panic!("curve {}: {}", curve, e));

            let (recovered, _) = signature.recover(&hash).unwrap();
            assert_eq!(recovered, public_key, "curve {}", curve);
        }
    }

    #[test]
    fn test_padded_digest_is_the_same_message() {
        let hash = hash160(b"Hello");
        let mut padded = vec![0u8; 48 - hash.len()];
        padded.extend_from_slice(&hash);

        let signature = Curve::P384.sign(&secret(), &hash, false).unwrap();
        let (recovered, _) = signature.recover(&padded).unwrap();
        assert_eq!(recovered, Curve::P384.public_key(&secret()).unwrap());
    }

    #[test]
    fn test_compressed_flag_roundtrip() {
        let hash = hash160(b"Hello");
        let signature = Curve::P224.sign(&secret(), &hash, false).unwrap();

        assert!(signature.v == 27 || signature.v == 28);
        let (_, compressed) = signature.recover(&hash).unwrap();
        assert!(!compressed);
    }

    #[test]
    fn test_recover_with_other_hash_yields_other_key() {
        let hash = hash160(b"Hello");
        let signature = Curve::Secp256k1.sign(&secret(), &hash, true).unwrap();

        let expected = Curve::Secp256k1.public_key(&secret()).unwrap();
        if let Ok((recovered, _)) = signature.recover(&hash160(b"Goodbye")) {
            assert_ne!(recovered, expected);
        }
    }

    #[test]
    fn test_zero_key_rejected() {
        assert!(Curve::P256.public_key(&[0u8; 32]).is_err());
        assert!(Curve::P521.public_key(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_ethereum_address_matches_alloy() {
        let signer: PrivateKeySigner = TEST_KEY.parse().unwrap();
        let public_key = Curve::Secp256k1.public_key(&secret()).unwrap();

        let address = Curve::Secp256k1.address(&public_key).unwrap();
        assert_eq!(address, signer.address().to_checksum(None));
        assert_eq!(
            address.to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[test]
    fn test_curve_names() {
        assert_eq!("P-224".parse::<Curve>().unwrap(), Curve::P224);
        assert_eq!("secp521r1".parse::<Curve>().unwrap(), Curve::P521);
        assert_eq!(Curve::Secp256k1.to_string(), "secp256k1");
        assert!("ed25519".parse::<Curve>().is_err());
        assert_eq!(serde_json::to_string(&Curve::P384).unwrap(), "\"p384\"");
        assert_eq!(serde_json::to_string(&Curve::P521).unwrap(), "\"p521\"");
    }

    #[test]
    fn test_invalid_recovery_byte() {
        let hash = hash160(b"Hello");
        let mut signature = Curve::P256.sign(&secret(), &hash, false).unwrap();
        signature.v = 3;
        assert!(signature.recover(&hash).is_err());
    }
}
