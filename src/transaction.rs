//! Transaction building and signing for reward transfers
//!
//! A [`TransactionBuilder`] goes through `Unresolved -> Resolved -> Signed ->
//! Submitted`. Identity comes from an encrypted keystore; chain id, nonce and
//! gas price are pulled from the gateway unless given explicitly, and are then
//! fixed for the run. Only the nonce moves, by one per accepted submission.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use alloy_primitives::{Address, Bytes, TxHash, TxKind, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::contract::ContractFunction;
use crate::error::{DistributorError, Result};
use crate::gateway::Gateway;

/// Gas limit used when none is configured
pub const DEFAULT_GAS_LIMIT: u64 = 90_000;

/// Sender identity and optional fixed transaction parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SenderConfig {
    /// Declared sender address, checked against the keystore
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub keystore_file: Option<PathBuf>,
    #[serde(default)]
    pub password_file: Option<PathBuf>,
    #[serde(default)]
    pub nonce: Option<u64>,
    #[serde(default)]
    pub gas_limit: Option<u64>,
    /// Gas price in wei
    #[serde(default)]
    pub gas_price: Option<u64>,
}

impl SenderConfig {
    pub fn declared_address(&self) -> Result<Option<Address>> {
        match self.address.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => s
                .parse::<Address>()
                .map(Some)
                .map_err(|e| DistributorError::InvalidInput(format!("wrong sender address '{}': {}", s, e))),
        }
    }
}

/// What a reward is paid in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewardAsset {
    /// ERC-20 token at this address
    Token(Address),
    /// The chain's native coin
    Native,
}

impl std::fmt::Display for RewardAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RewardAsset::Token(token) => write!(f, "token {}", token),
            RewardAsset::Native => write!(f, "native coin"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    Unresolved,
    Resolved,
    Signed,
    Submitted,
}

/// A signed transaction ready for `eth_sendRawTransaction`
#[derive(Debug, Clone)]
pub struct SignedTransfer {
    pub hash: TxHash,
    pub nonce: u64,
    pub encoded: Bytes,
}

pub struct TransactionBuilder {
    gateway: Arc<Gateway>,
    config: SenderConfig,
    dry_run: bool,
    signer: Option<PrivateKeySigner>,
    sender: Address,
    chain_id: Option<u64>,
    nonce: Option<u64>,
    gas_limit: Option<u64>,
    gas_price: Option<u128>,
    state: BuilderState,
}

impl TransactionBuilder {
    pub fn new(gateway: Arc<Gateway>, config: SenderConfig, dry_run: bool) -> Self {
        Self {
            gateway,
            nonce: config.nonce,
            gas_limit: config.gas_limit,
            gas_price: config.gas_price.map(u128::from),
            config,
            dry_run,
            signer: None,
            sender: Address::ZERO,
            chain_id: None,
            state: BuilderState::Unresolved,
        }
    }

    /// Builder holding an already decrypted key
    pub fn with_signer(
        gateway: Arc<Gateway>,
        signer: PrivateKeySigner,
        config: SenderConfig,
        dry_run: bool,
    ) -> Self {
        let mut builder = Self::new(gateway, config, dry_run);
        builder.sender = signer.address();
        builder.signer = Some(signer);
        builder
    }

    /// Decrypt the keystore and settle the sender address.
    ///
    /// In dry-run mode a missing or undecryptable keystore falls back to the
    /// declared sender, and a sender mismatch is only logged.
    pub async fn resolve_identity(&mut self) -> Result<Address> {
        let declared = self.config.declared_address()?;

        let signer = match (&self.config.keystore_file, &self.config.password_file) {
            (Some(keystore), Some(password)) => load_keystore(keystore, password).await,
            _ => Err(DistributorError::Decryption(
                "keystore and password files are required".to_string(),
            )),
        };

        match signer {
            Ok(signer) => {
                let actual = signer.address();
                self.sender = check_sender(declared, actual, self.dry_run)?;
                self.signer = Some(signer);
            }
            Err(e) if self.dry_run => {
                let sender = declared.ok_or_else(|| {
                    DistributorError::InvalidInput(format!("no keystore and no declared sender: {}", e))
                })?;
                warn!(error = %e, "check build tx args failed, but ignore in dry run");
                self.sender = sender;
            }
            Err(e) => return Err(e),
        }

        info!(sender = %self.sender, "get build transaction's sender");
        Ok(self.sender)
    }

    /// Query chain id, nonce and gas price until all are known.
    ///
    /// Each query is retried every retry interval for as long as it takes; the
    /// gateway's cancellation token is the only way out besides success.
    pub async fn resolve_parameters(&mut self) -> Result<()> {
        let chain_id = match self.chain_id {
            Some(id) => id,
            None => loop {
                match self.gateway.chain_id().await {
                    Ok(id) => break id,
                    Err(e) => warn!(error = %e, "get chain ID error"),
                }
                self.gateway.pause().await?;
            },
        };
        self.chain_id = Some(chain_id);
        if let Some(signer) = self.signer.as_mut() {
            signer.set_chain_id(Some(chain_id));
        }
        info!(chain_id, "get chain ID succeed");

        let nonce = match self.nonce {
            Some(nonce) => nonce,
            None => loop {
                match self.gateway.pending_nonce(self.sender).await {
                    Ok(nonce) => break nonce,
                    Err(e) => warn!(from = %self.sender, error = %e, "get nonce error"),
                }
                self.gateway.pause().await?;
            },
        };
        self.nonce = Some(nonce);
        info!(from = %self.sender, nonce, "get nonce succeed");

        let gas_price = match self.gas_price {
            Some(price) => price,
            None => loop {
                match self.gateway.gas_price().await {
                    Ok(price) => break price,
                    Err(e) => warn!(error = %e, "get gas price error"),
                }
                self.gateway.pause().await?;
            },
        };
        self.gas_price = Some(gas_price);
        info!(gas_price, "get gas price succeed");

        let gas_limit = *self.gas_limit.get_or_insert(DEFAULT_GAS_LIMIT);
        info!(gas_limit, "get gas limit succeed");

        self.state = BuilderState::Resolved;
        Ok(())
    }

    /// Unsigned transfer of `amount` to `recipient` at the current nonce
    pub fn build_transfer(&self, recipient: Address, amount: U256, asset: RewardAsset) -> Result<TxLegacy> {
        let (chain_id, nonce, gas_limit, gas_price) =
            match (self.chain_id, self.nonce, self.gas_limit, self.gas_price) {
                (Some(c), Some(n), Some(l), Some(p)) => (c, n, l, p),
                _ => {
                    return Err(DistributorError::InvalidInput(
                        "transaction parameters are not resolved".to_string(),
                    ))
                }
            };

        let (to, value, input) = match asset {
            RewardAsset::Token(token) => {
                let data = ContractFunction::Transfer
                    .encode(&[recipient.as_slice(), &amount.to_be_bytes::<32>()])?;
                (token, U256::ZERO, data)
            }
            RewardAsset::Native => (recipient, amount, Bytes::new()),
        };

        Ok(TxLegacy {
            chain_id: Some(chain_id),
            nonce,
            gas_price,
            gas_limit,
            to: TxKind::Call(to),
            value,
            input,
        })
    }

    /// Sign with the held key; `None` in dry-run mode when no key is held
    pub fn sign(&mut self, mut tx: TxLegacy) -> Result<Option<SignedTransfer>> {
        let Some(signer) = self.signer.as_ref() else {
            if self.dry_run {
                debug!(nonce = tx.nonce, "no signing key in dry run, skip signing");
                return Ok(None);
            }
            return Err(DistributorError::Signing("no signing key loaded".to_string()));
        };

        let nonce = tx.nonce;
        let signature = signer
            .sign_transaction_sync(&mut tx)
            .map_err(|e| DistributorError::Signing(format!("sign tx failed, {}", e)))?;
        let envelope = TxEnvelope::Legacy(tx.into_signed(signature));

        self.state = BuilderState::Signed;
        Ok(Some(SignedTransfer {
            hash: *envelope.tx_hash(),
            nonce,
            encoded: Bytes::from(envelope.encoded_2718()),
        }))
    }

    /// Adopt the live pending nonce when it is ahead of the cached one
    pub async fn reconcile_nonce(&mut self) -> Option<u64> {
        let cached = self.nonce?;
        match self.gateway.pending_nonce(self.sender).await {
            Ok(live) if live > cached => {
                info!(from = %self.sender, cached, live, "adopt higher on-chain nonce");
                self.nonce = Some(live);
            }
            Ok(_) => {}
            Err(e) => debug!(from = %self.sender, error = %e, "nonce reconciliation skipped"),
        }
        self.nonce
    }

    /// Submit once; on success the cached nonce moves forward by one
    pub async fn submit_and_advance(&mut self, signed: &SignedTransfer) -> Result<TxHash> {
        debug!(nonce = signed.nonce, raw_tx = %hex::encode(&signed.encoded), "send raw transaction");
        let node_hash = self
            .gateway
            .send_raw_transaction(signed.encoded.clone())
            .await?;
        if node_hash != signed.hash {
            debug!(local = %signed.hash, node = %node_hash, "node reported a different tx hash");
        }

        self.nonce = Some(signed.nonce + 1);
        self.state = BuilderState::Submitted;
        Ok(signed.hash)
    }

    /// Reconcile, build, sign and submit one transfer.
    ///
    /// Returns `None` when signing was skipped in dry-run mode.
    pub async fn send_transfer(
        &mut self,
        recipient: Address,
        amount: U256,
        asset: RewardAsset,
    ) -> Result<Option<TxHash>> {
        self.reconcile_nonce().await;

        let tx = self
            .build_transfer(recipient, amount, asset)
            .map_err(|e| e.at_stage(recipient, "build"))?;
        let Some(signed) = self.sign(tx).map_err(|e| e.at_stage(recipient, "sign"))? else {
            return Ok(None);
        };
        let hash = self
            .submit_and_advance(&signed)
            .await
            .map_err(|e| e.at_stage(recipient, "send"))?;

        info!(account = %recipient, reward = %amount, tx_hash = %hash, nonce = signed.nonce, "sendRewards success");
        Ok(Some(hash))
    }

    /// Drop the decrypted key
    pub fn release_key(&mut self) {
        if self.signer.take().is_some() {
            debug!(sender = %self.sender, "signing key released");
        }
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    pub fn has_signer(&self) -> bool {
        self.signer.is_some()
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.chain_id
    }

    pub fn nonce(&self) -> Option<u64> {
        self.nonce
    }

    pub fn gas_limit(&self) -> Option<u64> {
        self.gas_limit
    }

    pub fn gas_price(&self) -> Option<u128> {
        self.gas_price
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }
}

async fn load_keystore(keystore: &Path, password_file: &Path) -> Result<PrivateKeySigner> {
    let password = tokio::fs::read_to_string(password_file)
        .await
        .map_err(|e| DistributorError::Decryption(format!("read password file {}: {}", password_file.display(), e)))?;
    let password = password.trim().to_string();

    info!(keystore = %keystore.display(), "decrypt keystore ......");
    let keystore = keystore.to_path_buf();
    tokio::task::spawn_blocking(move || PrivateKeySigner::decrypt_keystore(&keystore, password))
        .await
        .map_err(|e| DistributorError::Decryption(format!("keystore task failed: {}", e)))?
        .map_err(|e| DistributorError::Decryption(format!("key decrypt fail: {}", e)))
}

/// The keystore address wins; a different declared sender is fatal unless dry run
fn check_sender(declared: Option<Address>, actual: Address, dry_run: bool) -> Result<Address> {
    match declared {
        Some(expected) if expected != actual => {
            if dry_run {
                warn!(%expected, %actual, "sender mismatch, ignored in dry run");
                Ok(actual)
            } else {
                Err(DistributorError::IdentityMismatch { expected, actual })
            }
        }
        _ => Ok(actual),
    }
}
