//! Ordered, failover-only access to a set of equivalent JSON-RPC endpoints
//!
//! The [`Gateway`] holds connections in the order they were configured. Every
//! operation walks that list and returns the first success; a failing endpoint
//! is skipped, never demoted. Read operations whose staleness is harmless can
//! be wrapped in a bounded retry loop. Transaction submission is attempted
//! once per endpoint and never retried here.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::network::Ethereum;
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{SyncStatus, TransactionRequest};
use alloy_primitives::{Address, Bytes, TxHash, B256, U256};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{DistributorError, Result};

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// RPC endpoint URLs, tried in this order
    #[serde(default)]
    pub endpoints: Vec<String>,
    /// Attempts made by retrying reads
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Pause between two attempts, in milliseconds
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_interval_ms() -> u64 {
    1000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            retry_count: default_retry_count(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl GatewayConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Summary of a block header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderSummary {
    pub number: u64,
    pub hash: B256,
    pub timestamp: u64,
}

/// One RPC endpoint exposing the operations the distributor needs
#[async_trait]
pub trait RpcEndpoint: Send + Sync {
    /// Endpoint URL, used in logs and errors
    fn url(&self) -> &str;

    async fn balance(&self, account: Address, block: BlockId) -> Result<U256>;

    /// Nonce including pending transactions
    async fn pending_nonce(&self, account: Address) -> Result<u64>;

    async fn gas_price(&self) -> Result<u128>;

    async fn chain_id(&self) -> Result<u64>;

    async fn header(&self, number: BlockNumberOrTag) -> Result<Option<HeaderSummary>>;

    async fn call(&self, request: TransactionRequest, block: BlockId) -> Result<Bytes>;

    async fn sync_status(&self) -> Result<SyncStatus>;

    async fn send_raw_transaction(&self, encoded: Bytes) -> Result<TxHash>;
}

/// [`RpcEndpoint`] backed by an Alloy root provider
pub struct AlloyEndpoint {
    url: String,
    provider: RootProvider<Ethereum>,
}

impl AlloyEndpoint {
    /// Connect to the endpoint (HTTP, WS or IPC, chosen from the URL)
    pub async fn connect(url: &str) -> Result<Self> {
        let provider = RootProvider::<Ethereum>::connect(url)
            .await
            .map_err(|e| DistributorError::Connection {
                endpoint: url.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            url: url.to_string(),
            provider,
        })
    }

    fn rpc_error(&self, operation: &'static str, e: impl std::fmt::Display) -> DistributorError {
        DistributorError::Rpc {
            endpoint: self.url.clone(),
            operation,
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl RpcEndpoint for AlloyEndpoint {
    fn url(&self) -> &str {
        &self.url
    }

    async fn balance(&self, account: Address, block: BlockId) -> Result<U256> {
        self.provider
            .get_balance(account)
            .block_id(block)
            .await
            .map_err(|e| self.rpc_error("eth_getBalance", e))
    }

    async fn pending_nonce(&self, account: Address) -> Result<u64> {
        self.provider
            .get_transaction_count(account)
            .pending()
            .await
            .map_err(|e| self.rpc_error("eth_getTransactionCount", e))
    }

    async fn gas_price(&self) -> Result<u128> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| self.rpc_error("eth_gasPrice", e))
    }

    async fn chain_id(&self) -> Result<u64> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| self.rpc_error("eth_chainId", e))
    }

    async fn header(&self, number: BlockNumberOrTag) -> Result<Option<HeaderSummary>> {
        let block = self
            .provider
            .get_block_by_number(number)
            .await
            .map_err(|e| self.rpc_error("eth_getBlockByNumber", e))?;

        Ok(block.map(|block| HeaderSummary {
            number: block.header.inner.number,
            hash: block.header.hash,
            timestamp: block.header.inner.timestamp,
        }))
    }

    async fn call(&self, request: TransactionRequest, block: BlockId) -> Result<Bytes> {
        self.provider
            .call(request)
            .block(block)
            .await
            .map_err(|e| self.rpc_error("eth_call", e))
    }

    async fn sync_status(&self) -> Result<SyncStatus> {
        self.provider
            .syncing()
            .await
            .map_err(|e| self.rpc_error("eth_syncing", e))
    }

    async fn send_raw_transaction(&self, encoded: Bytes) -> Result<TxHash> {
        let pending = self
            .provider
            .send_raw_transaction(&encoded)
            .await
            .map_err(|e| self.rpc_error("eth_sendRawTransaction", e))?;

        Ok(*pending.tx_hash())
    }
}

/// Ordered list of live endpoints plus the retry policy shared by all reads
pub struct Gateway {
    endpoints: RwLock<Vec<Arc<dyn RpcEndpoint>>>,
    retry_count: u32,
    retry_interval: Duration,
    cancel: CancellationToken,
}

impl Gateway {
    /// Dial every configured endpoint in order.
    ///
    /// Fails on the first endpoint that cannot be connected; a partially
    /// connected gateway is never returned.
    pub async fn dial(config: &GatewayConfig, cancel: CancellationToken) -> Result<Self> {
        if config.endpoints.is_empty() {
            return Err(DistributorError::Config("no gateway endpoint configured".to_string()));
        }

        let mut endpoints: Vec<Arc<dyn RpcEndpoint>> = Vec::with_capacity(config.endpoints.len());
        for url in &config.endpoints {
            match AlloyEndpoint::connect(url).await {
                Ok(endpoint) => {
                    info!(server = %url, "client connection succeed");
                    endpoints.push(Arc::new(endpoint));
                }
                Err(e) => {
                    error!(server = %url, error = %e, "client connection error");
                    return Err(e);
                }
            }
        }

        Ok(Self::from_endpoints(endpoints, config, cancel))
    }

    /// Build a gateway over already connected endpoints
    pub fn from_endpoints(
        endpoints: Vec<Arc<dyn RpcEndpoint>>,
        config: &GatewayConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            endpoints: RwLock::new(endpoints),
            retry_count: config.retry_count.max(1),
            retry_interval: config.retry_interval(),
            cancel,
        }
    }

    /// Release all endpoint connections. Safe to call more than once.
    pub fn close(&self) {
        let mut endpoints = self.endpoints.write().unwrap_or_else(|e| e.into_inner());
        if !endpoints.is_empty() {
            info!(count = endpoints.len(), "closing gateway endpoints");
            endpoints.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Sleep one retry interval, or fail with [`DistributorError::Cancelled`]
    pub async fn pause(&self) -> Result<()> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(DistributorError::Cancelled),
            _ = tokio::time::sleep(self.retry_interval) => Ok(()),
        }
    }

    fn snapshot(&self) -> Result<Vec<Arc<dyn RpcEndpoint>>> {
        let endpoints = self.endpoints.read().unwrap_or_else(|e| e.into_inner());
        if endpoints.is_empty() {
            return Err(DistributorError::NoEndpoints);
        }
        Ok(endpoints.clone())
    }

    /// Try each endpoint in order; first success wins, otherwise the last error
    async fn first_success<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: for<'a> Fn(&'a dyn RpcEndpoint) -> BoxFuture<'a, Result<T>>,
    {
        let mut last_error = DistributorError::NoEndpoints;
        for endpoint in self.snapshot()? {
            match f(endpoint.as_ref()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!(operation, endpoint = endpoint.url(), error = %e, "endpoint failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    /// [`Self::first_success`] repeated up to `retry_count` times with a pause in between
    async fn with_retry<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: for<'a> Fn(&'a dyn RpcEndpoint) -> BoxFuture<'a, Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match self.first_success(operation, &f).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.retry_count => {
                    warn!(operation, attempts = attempt, error = %e, "all retries exhausted");
                    return Err(e);
                }
                Err(e) => {
                    debug!(operation, attempt, error = %e, "retrying");
                    attempt += 1;
                    self.pause().await?;
                }
            }
        }
    }

    pub async fn balance_at(&self, account: Address, block: BlockId) -> Result<U256> {
        self.first_success("eth_getBalance", |endpoint| endpoint.balance(account, block))
            .await
    }

    /// Native coin balance, retried
    pub async fn coin_balance(&self, account: Address, block: BlockId) -> Result<U256> {
        self.with_retry("eth_getBalance", |endpoint| endpoint.balance(account, block))
            .await
            .inspect_err(|e| warn!(%account, ?block, error = %e, "get coin balance failed"))
    }

    pub async fn pending_nonce(&self, account: Address) -> Result<u64> {
        self.first_success("eth_getTransactionCount", |endpoint| {
            endpoint.pending_nonce(account)
        })
        .await
    }

    pub async fn gas_price(&self) -> Result<u128> {
        self.first_success("eth_gasPrice", |endpoint| endpoint.gas_price())
            .await
    }

    pub async fn chain_id(&self) -> Result<u64> {
        self.first_success("eth_chainId", |endpoint| endpoint.chain_id())
            .await
    }

    pub async fn header_by_number(&self, number: BlockNumberOrTag) -> Result<Option<HeaderSummary>> {
        self.first_success("eth_getBlockByNumber", |endpoint| endpoint.header(number))
            .await
    }

    pub async fn sync_status(&self) -> Result<SyncStatus> {
        self.first_success("eth_syncing", |endpoint| endpoint.sync_status())
            .await
    }

    /// Ask for the node syncing state until some endpoint answers
    pub async fn wait_for_sync_status(&self) -> Result<SyncStatus> {
        loop {
            match self.sync_status().await {
                Ok(status) => {
                    info!(?status, "call eth_syncing success");
                    return Ok(status);
                }
                Err(e) => {
                    warn!(error = %e, "call eth_syncing failed");
                    self.pause().await?;
                }
            }
        }
    }

    /// Single `eth_call` pass over the endpoints
    pub async fn call(&self, request: TransactionRequest, block: BlockId) -> Result<Bytes> {
        self.first_success("eth_call", |endpoint| endpoint.call(request.clone(), block))
            .await
    }

    /// `eth_call` against `contract` with raw calldata, retried
    pub async fn call_contract(&self, contract: Address, data: Bytes, block: BlockId) -> Result<Bytes> {
        let request = TransactionRequest::default().to(contract).input(data.into());
        self.with_retry("eth_call", |endpoint| endpoint.call(request.clone(), block))
            .await
    }

    /// Submit a signed, encoded transaction. Never retried.
    pub async fn send_raw_transaction(&self, encoded: Bytes) -> Result<TxHash> {
        self.first_success("eth_sendRawTransaction", |endpoint| {
            endpoint.send_raw_transaction(encoded.clone())
        })
        .await
    }
}
