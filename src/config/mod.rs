//! Configuration for the signing core
//!
//! Values come from a JSON file (optional), then environment overrides.
//! A `.env` file is honoured when present.

use crate::codec::KdfParams;
use crate::curves::Curve;
use crate::did::Namespace;
use crate::hd::validate_entropy_bits;
use crate::{Error, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable overriding the snowflake node id
pub const NODE_ID_ENV: &str = "SIGNER_NODE_ID";

/// Environment variable overriding the mnemonic entropy size
pub const ENTROPY_BITS_ENV: &str = "SIGNER_ENTROPY_BITS";

/// Highest node id the snowflake layout can hold
pub const MAX_NODE_ID: u16 = 1023;

/// Key custody settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Namespace for wallet identifiers
    pub wallet_namespace: Namespace,
    /// Namespace for opened key identifiers
    pub key_namespace: Namespace,
    /// Fixed path whose public key names the wallet
    pub wallet_identity_path: String,
    /// Mnemonic entropy size in bits
    pub entropy_bits: usize,
    /// Password hashing cost
    pub kdf: KdfParams,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            wallet_namespace: Namespace::new("trust-signer", 20),
            key_namespace: Namespace::new("trust-signer-session", 20),
            wallet_identity_path: "m/44'/608581'/0'/0/0".to_string(),
            entropy_bits: 192,
            kdf: KdfParams::default(),
        }
    }
}

impl CryptoConfig {
    pub fn validate(&self) -> Result<()> {
        if self.wallet_namespace == self.key_namespace {
            return Err(Error::Config(format!(
                "Wallet and key namespaces must differ (both {})",
                self.wallet_namespace
            )));
        }
        if self.wallet_namespace.vendor.is_empty() || self.key_namespace.vendor.is_empty() {
            return Err(Error::Config("Namespace vendor must not be empty".to_string()));
        }
        if !self.wallet_identity_path.starts_with("m/") {
            return Err(Error::Config(format!(
                "Invalid wallet identity path: {}",
                self.wallet_identity_path
            )));
        }
        validate_entropy_bits(self.entropy_bits).map_err(|e| Error::Config(e.to_string()))?;
        self.kdf.validate()
    }
}

/// Multi-tenancy settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenancyConfig {
    /// Snowflake node id, distinct per running instance
    pub node_id: u16,
    /// Curves every tenant wallet is projected onto
    pub wallet_curves: Vec<Curve>,
    /// BIP44 coin type used by the built-in path allocator
    pub coin_type: u32,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            wallet_curves: vec![Curve::Secp256k1],
            coin_type: 60,
        }
    }
}

impl TenancyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.node_id > MAX_NODE_ID {
            return Err(Error::Config(format!(
                "Node id {} out of range 0..={}",
                self.node_id, MAX_NODE_ID
            )));
        }
        if self.wallet_curves.is_empty() {
            return Err(Error::Config("At least one wallet curve is required".to_string()));
        }
        Ok(())
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub crypto: CryptoConfig,
    pub tenancy: TenancyConfig,
}

impl Config {
    /// Read a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(Error::from)
            .with_context(|| format!("Reading config {}", path.display()))?;
        serde_json::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from an optional file plus environment overrides, then validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Load .env file if present (ignore if not found)
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;

        tracing::debug!(
            node_id = config.tenancy.node_id,
            entropy_bits = config.crypto.entropy_bits,
            wallet_namespace = %config.crypto.wallet_namespace,
            key_namespace = %config.crypto.key_namespace,
            "Loaded configuration"
        );

        Ok(config)
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(NODE_ID_ENV) {
            self.tenancy.node_id = value
                .parse()
                .map_err(|_| Error::Config(format!("{} must be an integer, got {}", NODE_ID_ENV, value)))?;
        }
        if let Ok(value) = std::env::var(ENTROPY_BITS_ENV) {
            self.crypto.entropy_bits = value.parse().map_err(|_| {
                Error::Config(format!("{} must be an integer, got {}", ENTROPY_BITS_ENV, value))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.crypto.validate()?;
        self.tenancy.validate()
    }
}
