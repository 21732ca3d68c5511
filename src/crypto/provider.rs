//! HD wallet and key lifecycle
//!
//! SECURITY:
//! - The mnemonic is stored encrypted under the admin password
//! - Each opened key is stored encrypted under its own session password
//! - Decrypted material is dropped (and zeroized) at the end of each call
//! - Nothing secret is ever logged

use crate::codec::{KeystoreCodec, Metadata, SecretCodec};
use crate::config::CryptoConfig;
use crate::curves::{Curve, Signature};
use crate::error::ResultExt;
use crate::hd::{new_entropy, new_mnemonic, RootKey};
use crate::keystore::{KeyStore, PutOptions};
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

/// Key store slot holding the encrypted mnemonic
pub const MNEMONIC_SLOT: &[u8] = b"__crypto_provider_mnemonic";

/// Key store slot holding the wallet identifier
pub const ID_SLOT: &[u8] = b"__crypto_provider_id";

/// Result of [`CryptoProvider::open_key`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedKey {
    /// Identifier the key record is stored under
    pub key_id: String,
    /// Uncompressed public key per requested curve, in request order
    pub public_keys: Vec<Vec<u8>>,
}

/// Orchestrates wallet creation, key open/sign/close
pub struct CryptoProvider {
    keystore: Arc<dyn KeyStore>,
    codec: Arc<dyn SecretCodec>,
    config: CryptoConfig,
    /// Serializes create/delete of the HD wallet slots
    wallet_lock: Mutex<()>,
}

impl CryptoProvider {
    /// Create a provider using the keystore codec with the configured KDF cost
    pub fn new(keystore: Arc<dyn KeyStore>, config: CryptoConfig) -> Result<Self> {
        let codec = Arc::new(KeystoreCodec::new(config.kdf)?);
        Self::with_codec(keystore, codec, config)
    }

    /// Create a provider with an explicit codec
    pub fn with_codec(
        keystore: Arc<dyn KeyStore>,
        codec: Arc<dyn SecretCodec>,
        config: CryptoConfig,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            keystore,
            codec,
            config,
            wallet_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &CryptoConfig {
        &self.config
    }

    /// Identifier of the HD wallet
    ///
    /// Fails with `NotFound` until [`CryptoProvider::create_hd_wallet`] succeeds.
    pub async fn id(&self) -> Result<String> {
        let data = self
            .keystore
            .get(ID_SLOT)
            .await
            .with_context(|| "Loading wallet id")?;

        if data.is_empty() {
            return Ok(String::new());
        }

        String::from_utf8(data).map_err(|_| Error::Storage("Wallet id is not valid UTF-8".to_string()))
    }

    /// Generate the HD wallet and return its identifier
    ///
    /// Fails with `AlreadyExists` when a wallet is already stored.
    pub async fn create_hd_wallet(&self, admin_password: &SecretString) -> Result<String> {
        let _guard = self.wallet_lock.lock().await;

        let entropy = new_entropy(self.config.entropy_bits)
            .with_context(|| format!("Creating {} bits of entropy", self.config.entropy_bits))?;
        let mnemonic = new_mnemonic(&entropy)?;
        let root = RootKey::from_mnemonic(&mnemonic, "")?;
        let identity = root.derive_at(&self.config.wallet_identity_path)?;
        let id = self.config.wallet_namespace.derive(&identity.public_key);

        let encoded = self
            .encode(mnemonic.as_bytes(), admin_password, Metadata::with_address(id.clone()))
            .await?;

        let mnemonic_options = PutOptions {
            force: false,
            encrypt: true,
        };
        self.keystore
            .put(MNEMONIC_SLOT, &encoded, mnemonic_options)
            .await
            .with_context(|| "Storing wallet mnemonic")?;

        if let Err(e) = self
            .keystore
            .put(ID_SLOT, id.as_bytes(), PutOptions::forced())
            .await
        {
            tracing::warn!(error = %e, "Storing wallet id failed, removing wallet slots");
            self.force_delete_hd_wallet().await;
            return Err(e.context("Storing wallet id"));
        }

        tracing::info!(wallet_id = %id, "Created HD wallet");

        Ok(id)
    }

    /// Delete the HD wallet after proving the admin password
    pub async fn delete_hd_wallet(&self, admin_password: &SecretString) -> Result<()> {
        let _guard = self.wallet_lock.lock().await;

        self.load_mnemonic(admin_password).await?;

        self.keystore
            .delete(MNEMONIC_SLOT)
            .await
            .with_context(|| "Deleting wallet mnemonic")?;
        self.keystore
            .delete(ID_SLOT)
            .await
            .with_context(|| "Deleting wallet id")?;

        tracing::info!("Deleted HD wallet");

        Ok(())
    }

    /// Derive the key at `bip44_path` and store it under `session_password`
    ///
    /// The record is force-stored, so reopening a path replaces the previous
    /// record and its session password.
    pub async fn open_key(
        &self,
        admin_password: &SecretString,
        session_password: &SecretString,
        bip44_path: &str,
        curves: &[Curve],
    ) -> Result<OpenedKey> {
        if bip44_path == self.config.wallet_identity_path {
            return Err(Error::InvalidArgument(format!(
                "Path {} is reserved for the wallet identity",
                bip44_path
            )));
        }

        let mnemonic = self.load_mnemonic(admin_password).await?;
        let root = RootKey::from_mnemonic(&mnemonic, "")?;
        let derived = root
            .derive_at(bip44_path)
            .with_context(|| format!("Deriving key at {}", bip44_path))?;

        let key_id = self.config.key_namespace.derive(&derived.public_key);
        let public_keys = project(&derived.private_key, curves)?;

        let encoded = self
            .encode(&derived.private_key, session_password, Metadata::with_address(key_id.clone()))
            .await?;
        self.keystore
            .put(key_id.as_bytes(), &encoded, PutOptions::forced_secret())
            .await
            .with_context(|| format!("Storing key {}", key_id))?;

        tracing::info!(key_id = %key_id, path = bip44_path, curves = curves.len(), "Opened key");

        Ok(OpenedKey {
            key_id,
            public_keys,
        })
    }

    /// Sign a caller-supplied digest with an opened key
    ///
    /// A missing key and a wrong password both fail with the same `NotFound`.
    pub async fn sign(
        &self,
        key_id: &str,
        password: &SecretString,
        curve: Curve,
        hash: &[u8],
        compressed: bool,
    ) -> Result<Signature> {
        let private_key = match self.load_key(key_id, password).await {
            Ok(private_key) => private_key,
            Err(e) => {
                tracing::debug!(key_id = %key_id, error = %e, "Key unavailable for signing");
                return Err(Error::NotFound(format!("key {} not found", key_id)));
            }
        };

        let signature = curve
            .sign(&private_key, hash, compressed)
            .with_context(|| format!("Signing with key {}", key_id))?;

        tracing::debug!(key_id = %key_id, curve = %curve, "Signed digest");

        Ok(signature)
    }

    /// Remove an opened key; closing an absent key succeeds
    pub async fn close_key(&self, key_id: &str) -> Result<()> {
        self.keystore
            .delete(key_id.as_bytes())
            .await
            .with_context(|| format!("Closing key {}", key_id))?;

        tracing::info!(key_id = %key_id, "Closed key");

        Ok(())
    }

    /// Public keys of an opened key, without touching the stored record
    pub async fn key_public_key(
        &self,
        key_id: &str,
        password: &SecretString,
        curves: &[Curve],
    ) -> Result<Vec<Vec<u8>>> {
        let private_key = self.load_key(key_id, password).await?;
        project(&private_key, curves)
    }

    async fn force_delete_hd_wallet(&self) {
        if let Err(e) = self.keystore.delete(MNEMONIC_SLOT).await {
            tracing::error!(error = %e, "Failed to remove wallet mnemonic during rollback");
        }
        if let Err(e) = self.keystore.delete(ID_SLOT).await {
            tracing::error!(error = %e, "Failed to remove wallet id during rollback");
        }
    }

    async fn load_mnemonic(&self, admin_password: &SecretString) -> Result<Zeroizing<String>> {
        let encoded = self
            .keystore
            .get(MNEMONIC_SLOT)
            .await
            .with_context(|| "Loading wallet mnemonic")?;

        let phrase = self
            .decode(admin_password, encoded)
            .await
            .with_context(|| "Decrypting wallet mnemonic")?;

        let phrase = std::str::from_utf8(&phrase)
            .map_err(|_| Error::Authentication("Mnemonic is not valid UTF-8".to_string()))?;

        Ok(Zeroizing::new(phrase.to_string()))
    }

    async fn load_key(&self, key_id: &str, password: &SecretString) -> Result<Zeroizing<Vec<u8>>> {
        let encoded = self
            .keystore
            .get(key_id.as_bytes())
            .await
            .with_context(|| format!("Loading key {}", key_id))?;

        self.decode(password, encoded)
            .await
            .with_context(|| format!("Decrypting key {}", key_id))
    }

    // Password hashing is CPU bound, so the codec runs off the async workers.
    async fn encode(
        &self,
        payload: &[u8],
        password: &SecretString,
        metadata: Metadata,
    ) -> Result<Vec<u8>> {
        let codec = Arc::clone(&self.codec);
        let payload = Zeroizing::new(payload.to_vec());
        let password = SecretString::from(password.expose_secret().to_string());

        tokio::task::spawn_blocking(move || codec.encode(&payload, &password, &metadata))
            .await
            .map_err(|e| Error::Crypto(format!("Encoding task failed: {}", e)))?
    }

    async fn decode(&self, password: &SecretString, encoded: Vec<u8>) -> Result<Zeroizing<Vec<u8>>> {
        let codec = Arc::clone(&self.codec);
        let password = SecretString::from(password.expose_secret().to_string());

        tokio::task::spawn_blocking(move || codec.decode(&password, &encoded))
            .await
            .map_err(|e| Error::Crypto(format!("Decoding task failed: {}", e)))?
    }
}

impl std::fmt::Debug for CryptoProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoProvider")
            .field("wallet_namespace", &self.config.wallet_namespace)
            .field("key_namespace", &self.config.key_namespace)
            .finish_non_exhaustive()
    }
}

fn project(private_key: &[u8], curves: &[Curve]) -> Result<Vec<Vec<u8>>> {
    curves
        .iter()
        .map(|curve| curve.public_key(private_key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::KdfParams;
    use crate::did::{hash160, parse_did};
    use crate::keystore::MemoryKeyStore;
    use async_trait::async_trait;

    const PATH: &str = "m/44'/60'/0'/0/0";

    fn password(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    fn test_config() -> CryptoConfig {
        CryptoConfig {
            kdf: KdfParams::insecure_fast(),
            ..CryptoConfig::default()
        }
    }

    fn provider_with(keystore: Arc<dyn KeyStore>) -> CryptoProvider {
        CryptoProvider::new(keystore, test_config()).unwrap()
    }

    fn provider() -> (CryptoProvider, Arc<MemoryKeyStore>) {
        let store = Arc::new(MemoryKeyStore::new());
        (provider_with(store.clone()), store)
    }

    /// Key store that refuses writes to one slot
    struct FailingKeyStore {
        inner: MemoryKeyStore,
        fail_on: &'static [u8],
    }

    #[async_trait]
    impl KeyStore for FailingKeyStore {
        async fn put(&self, key: &[u8], value: &[u8], options: PutOptions) -> Result<()> {
            if key == self.fail_on {
                return Err(Error::Storage("injected failure".to_string()));
            }
            self.inner.put(key, value, options).await
        }

        async fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
            self.inner.get(key).await
        }

        async fn delete(&self, key: &[u8]) -> Result<()> {
            self.inner.delete(key).await
        }
    }

    #[tokio::test]
    async fn test_id_before_and_after_create() {
        let (provider, _) = provider();

        let err = provider.id().await.unwrap_err();
        assert!(err.is_not_found());

        let created = provider.create_hd_wallet(&password("test")).await.unwrap();
        assert!(created.starts_with("did:trust-signer:"));
        assert_eq!(provider.id().await.unwrap(), created);

        let decoded = parse_did(&created).unwrap();
        assert_eq!(decoded.version, 20);
    }

    #[tokio::test]
    async fn test_empty_stored_id_reads_as_empty() {
        let (provider, store) = provider();
        store.put(ID_SLOT, b"", PutOptions::forced()).await.unwrap();

        assert_eq!(provider.id().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_second_create_is_rejected() {
        let (provider, _) = provider();
        let id = provider.create_hd_wallet(&password("test")).await.unwrap();

        let err = provider.create_hd_wallet(&password("other")).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(provider.id().await.unwrap(), id);

        // The original admin password still unlocks the wallet
        provider
            .open_key(&password("test"), &password("s"), PATH, &[Curve::P256])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_open_sign_close_scenario() {
        let (provider, _) = provider();
        provider.create_hd_wallet(&password("test")).await.unwrap();

        let opened = provider
            .open_key(&password("test"), &password("test1"), PATH, &[Curve::P224])
            .await
            .unwrap();
        assert!(opened.key_id.starts_with("did:trust-signer-session:"));
        assert_eq!(opened.public_keys.len(), 1);

        let hash = hash160(b"Hello");
        let signature = provider
            .sign(&opened.key_id, &password("test1"), Curve::P224, &hash, true)
            .await
            .unwrap();

        let (recovered, compressed) = signature.recover(&hash).unwrap();
        assert_eq!(recovered, opened.public_keys[0]);
        assert!(compressed);

        // The admin password does not unlock a session key
        let err = provider
            .sign(&opened.key_id, &password("test"), Curve::P224, &hash, true)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        provider.close_key(&opened.key_id).await.unwrap();

        for session in ["test1", "wrong"] {
            let err = provider
                .sign(&opened.key_id, &password(session), Curve::P224, &hash, true)
                .await
                .unwrap_err();
            assert!(err.is_not_found());
        }
    }

    #[tokio::test]
    async fn test_hash160_signs_on_every_curve() {
        let (provider, _) = provider();
        provider.create_hd_wallet(&password("test")).await.unwrap();

        let opened = provider
            .open_key(&password("test"), &password("test1"), PATH, &Curve::ALL)
            .await
            .unwrap();
        let hash = hash160(b"Hello");

        for (curve, public_key) in Curve::ALL.into_iter().zip(&opened.public_keys) {
            let signature = provider
                .sign(&opened.key_id, &password("test1"), curve, &hash, false)
                .await
                .unwrap_or_else(|e| panic!("curve {}: {}", curve, e));

            let (recovered, _) = signature.recover(&hash).unwrap();
            assert_eq!(&recovered, public_key, "curve {}", curve);
        }
    }

    #[tokio::test]
    async fn test_sign_normalizes_wrong_password() {
        let (provider, _) = provider();
        provider.create_hd_wallet(&password("admin")).await.unwrap();
        let opened = provider
            .open_key(&password("admin"), &password("session"), PATH, &[Curve::Secp256k1])
            .await
            .unwrap();
        let hash = hash160(b"payload");

        let wrong = provider
            .sign(&opened.key_id, &password("admin"), Curve::Secp256k1, &hash, false)
            .await
            .unwrap_err();
        let missing = provider
            .sign("did:trust-signer-session:nope", &password("session"), Curve::Secp256k1, &hash, false)
            .await
            .unwrap_err();

        assert!(wrong.is_not_found());
        assert!(missing.is_not_found());
        assert!(!wrong.is_authentication());
    }

    #[tokio::test]
    async fn test_public_keys_follow_curve_order() {
        let (provider, _) = provider();
        provider.create_hd_wallet(&password("admin")).await.unwrap();

        let curves = [Curve::P384, Curve::Secp256k1, Curve::P256];
        let opened = provider
            .open_key(&password("admin"), &password("session"), PATH, &curves)
            .await
            .unwrap();

        let lengths: Vec<usize> = opened.public_keys.iter().map(Vec::len).collect();
        assert_eq!(lengths, vec![97, 65, 65]);
        assert_ne!(opened.public_keys[1], opened.public_keys[2]);

        let queried = provider
            .key_public_key(&opened.key_id, &password("session"), &curves)
            .await
            .unwrap();
        assert_eq!(queried, opened.public_keys);

        let err = provider
            .key_public_key(&opened.key_id, &password("admin"), &curves)
            .await
            .unwrap_err();
        assert!(err.is_authentication());
    }

    #[tokio::test]
    async fn test_open_key_requires_admin_password() {
        let (provider, store) = provider();
        provider.create_hd_wallet(&password("admin")).await.unwrap();
        let before = store.len();

        let err = provider
            .open_key(&password("session"), &password("session"), PATH, &[Curve::P256])
            .await
            .unwrap_err();
        assert!(err.is_authentication());
        assert_eq!(store.len(), before);
    }

    #[tokio::test]
    async fn test_open_key_is_deterministic_per_path() {
        let (provider, _) = provider();
        provider.create_hd_wallet(&password("admin")).await.unwrap();

        let first = provider
            .open_key(&password("admin"), &password("a"), PATH, &[Curve::P256])
            .await
            .unwrap();
        let again = provider
            .open_key(&password("admin"), &password("b"), PATH, &[Curve::P256])
            .await
            .unwrap();
        let other = provider
            .open_key(&password("admin"), &password("a"), "m/44'/60'/0'/0/1", &[Curve::P256])
            .await
            .unwrap();

        assert_eq!(first, again);
        assert_ne!(first.key_id, other.key_id);

        // Reopening replaced the record, so only the newest password works
        let hash = hash160(b"x");
        assert!(provider
            .sign(&first.key_id, &password("a"), Curve::P256, &hash, false)
            .await
            .is_err());
        assert!(provider
            .sign(&first.key_id, &password("b"), Curve::P256, &hash, false)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_identity_path_is_reserved() {
        let (provider, _) = provider();
        provider.create_hd_wallet(&password("admin")).await.unwrap();

        let err = provider
            .open_key(&password("admin"), &password("s"), "m/44'/608581'/0'/0/0", &[Curve::P256])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_failed_id_store_rolls_back() {
        let store = Arc::new(FailingKeyStore {
            inner: MemoryKeyStore::new(),
            fail_on: ID_SLOT,
        });
        let provider = provider_with(store.clone());

        let err = provider.create_hd_wallet(&password("test")).await.unwrap_err();
        assert!(matches!(err.root(), Error::Storage(_)));

        assert!(provider.id().await.unwrap_err().is_not_found());
        assert!(!store.inner.contains(MNEMONIC_SLOT));
        assert!(store.inner.is_empty());
    }

    #[tokio::test]
    async fn test_delete_requires_admin_password() {
        let (provider, store) = provider();
        let id = provider.create_hd_wallet(&password("admin")).await.unwrap();

        let err = provider.delete_hd_wallet(&password("wrong")).await.unwrap_err();
        assert!(err.is_authentication());
        assert_eq!(provider.id().await.unwrap(), id);
        assert!(store.contains(MNEMONIC_SLOT));

        provider.delete_hd_wallet(&password("admin")).await.unwrap();
        assert!(provider.id().await.unwrap_err().is_not_found());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_delete_without_wallet_is_not_found() {
        let (provider, _) = provider();
        let err = provider.delete_hd_wallet(&password("admin")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_close_absent_key_succeeds() {
        let (provider, _) = provider();
        provider.close_key("did:trust-signer-session:missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_keys_survive_wallet_deletion_independently() {
        let (provider, _) = provider();
        provider.create_hd_wallet(&password("admin")).await.unwrap();
        let opened = provider
            .open_key(&password("admin"), &password("session"), PATH, &[Curve::Secp256k1])
            .await
            .unwrap();

        provider.delete_hd_wallet(&password("admin")).await.unwrap();

        let hash = hash160(b"still here");
        let signature = provider
            .sign(&opened.key_id, &password("session"), Curve::Secp256k1, &hash, false)
            .await
            .unwrap();
        let (recovered, _) = signature.recover(&hash).unwrap();
        assert_eq!(recovered, opened.public_keys[0]);
    }

    #[tokio::test]
    async fn test_rejects_shared_namespaces() {
        let mut config = test_config();
        config.key_namespace = config.wallet_namespace.clone();

        let result = CryptoProvider::new(Arc::new(MemoryKeyStore::new()), config);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
