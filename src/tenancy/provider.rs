//! Tenant wallet lifecycle

use super::{
    PathAllocator, Snowflake, Tenancy, TenancyStorage, TenancyUpdate, TenancyWallet,
    WalletAddresses,
};
use crate::config::TenancyConfig;
use crate::crypto::CryptoProvider;
use crate::curves::{Curve, Signature};
use crate::error::ResultExt;
use crate::{Error, Result};
use chrono::Utc;
use secrecy::SecretString;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Owns tenancy records and the keys behind their hot and backup wallets
pub struct MultiTenancyProvider {
    crypto: Arc<CryptoProvider>,
    storage: Arc<dyn TenancyStorage>,
    allocator: Arc<dyn PathAllocator>,
    ids: Snowflake,
    curves: Vec<Curve>,
}

impl MultiTenancyProvider {
    pub fn new(
        crypto: Arc<CryptoProvider>,
        storage: Arc<dyn TenancyStorage>,
        allocator: Arc<dyn PathAllocator>,
        config: &TenancyConfig,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            crypto,
            storage,
            allocator,
            ids: Snowflake::new(config.node_id)?,
            curves: config.wallet_curves.clone(),
        })
    }

    /// Curves every tenant wallet carries an address for
    pub fn curves(&self) -> &[Curve] {
        &self.curves
    }

    /// Create a tenant with fresh hot and backup wallets
    ///
    /// Nothing is persisted unless both wallets open; keys opened before a
    /// failure are closed again.
    pub async fn create(
        &self,
        wallet_cold: WalletAddresses,
        admin_password: &SecretString,
    ) -> Result<String> {
        let tenant_id = self.ids.generate_string();

        let (wallet_hot, wallet_backup) = self.open_wallets(&tenant_id, admin_password).await?;

        let now = Utc::now();
        let tenancy = Tenancy {
            id: tenant_id.clone(),
            wallet_hot,
            wallet_backup,
            wallet_cold,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.storage.create(tenancy.clone()).await {
            tracing::warn!(tenant_id = %tenant_id, error = %e, "Persisting tenancy failed, closing its keys");
            for wallet in tenancy.managed_wallets() {
                self.discard_wallet(&tenant_id, wallet).await;
            }
            return Err(e.context(format!("Creating tenancy {}", tenant_id)));
        }

        tracing::info!(
            tenant_id = %tenant_id,
            hot_key = %tenancy.wallet_hot.key_id,
            backup_key = %tenancy.wallet_backup.key_id,
            "Created tenancy"
        );

        Ok(tenant_id)
    }

    /// Close a tenant's keys and remove its record
    pub async fn delete(&self, tenant_id: &str) -> Result<()> {
        let tenancy = self.storage.get(tenant_id).await?;

        for wallet in tenancy.managed_wallets() {
            self.crypto
                .close_key(&wallet.key_id)
                .await
                .with_context(|| format!("Deleting tenancy {}", tenant_id))?;
        }

        self.storage
            .delete(tenant_id)
            .await
            .with_context(|| format!("Deleting tenancy {}", tenant_id))?;

        for wallet in tenancy.managed_wallets() {
            self.release_path(tenant_id, &wallet.bip44_path).await;
        }

        tracing::info!(tenant_id = %tenant_id, "Deleted tenancy");

        Ok(())
    }

    /// Load a tenant
    pub async fn user(&self, tenant_id: &str) -> Result<Tenancy> {
        self.storage.get(tenant_id).await
    }

    /// Replace a tenant's hot and backup wallets with freshly opened keys
    ///
    /// New keys are opened before the swap and old keys are closed after it,
    /// so the tenant can sign throughout. Cold wallets are untouched.
    pub async fn refresh_wallet(
        &self,
        tenant_id: &str,
        admin_password: &SecretString,
    ) -> Result<Tenancy> {
        self.storage.get(tenant_id).await?;

        let (wallet_hot, wallet_backup) = self.open_wallets(tenant_id, admin_password).await?;

        let mut replaced = None;
        let swap: TenancyUpdate<'_> = {
            let (wallet_hot, wallet_backup) = (wallet_hot.clone(), wallet_backup.clone());
            let replaced = &mut replaced;
            Box::new(move |tenancy: &mut Tenancy| {
                let old_hot = std::mem::replace(&mut tenancy.wallet_hot, wallet_hot);
                let old_backup = std::mem::replace(&mut tenancy.wallet_backup, wallet_backup);
                tenancy.updated_at = Utc::now();
                *replaced = Some([old_hot, old_backup]);
                Ok(())
            })
        };

        let updated = match self.storage.update(tenant_id, swap).await {
            Ok(updated) => updated,
            Err(e) => {
                tracing::warn!(tenant_id = %tenant_id, error = %e, "Wallet swap failed, closing new keys");
                self.discard_wallet(tenant_id, &wallet_hot).await;
                self.discard_wallet(tenant_id, &wallet_backup).await;
                return Err(e.context(format!("Refreshing tenancy {}", tenant_id)));
            }
        };

        for wallet in replaced.iter().flatten() {
            self.discard_wallet(tenant_id, wallet).await;
        }

        tracing::info!(
            tenant_id = %tenant_id,
            hot_key = %updated.wallet_hot.key_id,
            backup_key = %updated.wallet_backup.key_id,
            "Refreshed tenancy wallets"
        );

        Ok(updated)
    }

    /// Replace a tenant's cold wallet addresses
    pub async fn update_cold_wallet(
        &self,
        tenant_id: &str,
        wallet_cold: WalletAddresses,
    ) -> Result<()> {
        self.storage
            .update(
                tenant_id,
                Box::new(move |tenancy: &mut Tenancy| {
                    tenancy.wallet_cold = wallet_cold;
                    tenancy.updated_at = Utc::now();
                    Ok(())
                }),
            )
            .await
            .with_context(|| format!("Updating cold wallet of {}", tenant_id))?;

        tracing::info!(tenant_id = %tenant_id, "Updated cold wallet");

        Ok(())
    }

    /// Hot wallet address on `curve`
    pub async fn address(&self, tenant_id: &str, curve: Curve) -> Result<String> {
        let tenancy = self.storage.get(tenant_id).await?;

        tenancy
            .wallet_hot
            .addresses
            .get(&curve)
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("tenancy {} has no {} address", tenant_id, curve))
            })
    }

    /// Sign a digest with the tenant's hot wallet key
    pub async fn sign_digest(
        &self,
        tenant_id: &str,
        curve: Curve,
        hash: &[u8],
        compressed: bool,
    ) -> Result<Signature> {
        let tenancy = self.storage.get(tenant_id).await?;
        let wallet = &tenancy.wallet_hot;

        let password = self
            .allocator
            .session_password(tenant_id, &wallet.bip44_path)
            .await
            .with_context(|| format!("Signing for tenancy {}", tenant_id))?;

        self.crypto
            .sign(&wallet.key_id, &password, curve, hash, compressed)
            .await
    }

    async fn open_wallets(
        &self,
        tenant_id: &str,
        admin_password: &SecretString,
    ) -> Result<(TenancyWallet, TenancyWallet)> {
        let hot = self.open_wallet(tenant_id, false, admin_password).await?;

        match self.open_wallet(tenant_id, true, admin_password).await {
            Ok(backup) => Ok((hot, backup)),
            Err(e) => {
                self.discard_wallet(tenant_id, &hot).await;
                Err(e)
            }
        }
    }

    async fn open_wallet(
        &self,
        tenant_id: &str,
        internal: bool,
        admin_password: &SecretString,
    ) -> Result<TenancyWallet> {
        let kind = if internal { "backup" } else { "hot" };

        let allocation = self
            .allocator
            .allocate(tenant_id, internal)
            .await
            .with_context(|| format!("Allocating {} wallet path for {}", kind, tenant_id))?;

        let opened = match self
            .crypto
            .open_key(
                admin_password,
                &allocation.session_password,
                &allocation.path,
                &self.curves,
            )
            .await
        {
            Ok(opened) => opened,
            Err(e) => {
                self.release_path(tenant_id, &allocation.path).await;
                return Err(e.context(format!("Opening {} wallet for {}", kind, tenant_id)));
            }
        };

        let mut wallet = TenancyWallet {
            key_id: opened.key_id,
            bip44_path: allocation.path,
            addresses: BTreeMap::new(),
        };

        match self.addresses(&opened.public_keys) {
            Ok(addresses) => {
                wallet.addresses = addresses;
                Ok(wallet)
            }
            Err(e) => {
                self.discard_wallet(tenant_id, &wallet).await;
                Err(e)
            }
        }
    }

    fn addresses(&self, public_keys: &[Vec<u8>]) -> Result<BTreeMap<Curve, String>> {
        self.curves
            .iter()
            .zip(public_keys)
            .map(|(curve, public_key)| Ok((*curve, curve.address(public_key)?)))
            .collect()
    }

    /// Best-effort cleanup of a wallet that will not be referenced
    async fn discard_wallet(&self, tenant_id: &str, wallet: &TenancyWallet) {
        if let Err(e) = self.crypto.close_key(&wallet.key_id).await {
            tracing::error!(tenant_id = %tenant_id, key_id = %wallet.key_id, error = %e, "Failed to close key");
        }
        self.release_path(tenant_id, &wallet.bip44_path).await;
    }

    async fn release_path(&self, tenant_id: &str, bip44_path: &str) {
        if let Err(e) = self.allocator.release(tenant_id, bip44_path).await {
            tracing::error!(tenant_id = %tenant_id, path = %bip44_path, error = %e, "Failed to release path");
        }
    }
}

impl std::fmt::Debug for MultiTenancyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiTenancyProvider")
            .field("node", &self.ids.node())
            .field("curves", &self.curves)
            .finish_non_exhaustive()
    }
}
