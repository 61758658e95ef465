//! Custodial wallet provisioning.
//!
//! Each authenticated user gets a server wallet plus the smart account it
//! controls; the pair is created on first access and cached for the life of
//! the process. Creation itself belongs to the wallet SDK, behind
//! [`WalletProvider`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::error::WalletError;

/// A provisioned custodial pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerWallet {
    /// The server-held signing wallet.
    pub server_wallet_address: String,
    /// The smart account it controls; this is the spender on permissions.
    pub smart_account_address: String,
}

/// Wallet-SDK seam: creates the custodial pair for an owner.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn provision(&self, owner: &str) -> Result<ServerWallet, WalletError>;
}

/// Get-or-create cache of custodial wallets keyed by owner address.
pub struct WalletDirectory {
    provider: Arc<dyn WalletProvider>,
    wallets: RwLock<HashMap<String, ServerWallet>>,
}

impl WalletDirectory {
    pub fn new(provider: Arc<dyn WalletProvider>) -> Self {
        Self {
            provider,
            wallets: RwLock::new(HashMap::new()),
        }
    }

    /// The wallet already provisioned for `owner`, if any. Never creates.
    pub async fn get(&self, owner: &str) -> Option<ServerWallet> {
        self.wallets.read().await.get(owner).cloned()
    }

    /// Returns the owner's wallet, provisioning it on first access.
    pub async fn get_or_create(&self, owner: &str) -> Result<ServerWallet, WalletError> {
        if let Some(existing) = self.get(owner).await {
            return Ok(existing);
        }
        // Re-check under the write lock so concurrent first accesses
        // provision exactly once.
        let mut wallets = self.wallets.write().await;
        if let Some(existing) = wallets.get(owner) {
            return Ok(existing.clone());
        }
        let wallet = self.provider.provision(owner).await?;
        info!(
            owner = %owner,
            smart_account = %wallet.smart_account_address,
            "provisioned custodial wallet"
        );
        wallets.insert(owner.to_string(), wallet.clone());
        Ok(wallet)
    }
}
