//! Batch Reward Distribution Library
//!
//! Pays a list of accounts their rewards in an ERC-20 token or in the native
//! coin, one signed transfer at a time, through a set of redundant Ethereum
//! JSON-RPC endpoints. Built on top of Alloy 1.0.38.
//!
//! # Features
//!
//! - Endpoint gateway with in-order fallback and bounded retries
//! - Selector table for ERC-20 and exchange read calls
//! - Keystore-backed legacy (EIP-155) transaction building and signing
//! - Fail-fast batch pipeline with an append-only output ledger
//! - Dry-run mode that validates everything and sends nothing
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use reward_distributor::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load(None)?;
//!     let gateway = Arc::new(Gateway::dial(&config.gateway, CancellationToken::new()).await?);
//!
//!     let options = DistributionOptions::from_config(&config.distribution)?;
//!     let mut builder = TransactionBuilder::new(gateway.clone(), config.sender.clone(), options.dry_run);
//!     builder.resolve_identity().await?;
//!     builder.resolve_parameters().await?;
//!
//!     let mut distributor = Distributor::new(ContractCaller::new(gateway.clone()), builder, options);
//!     let report = distributor.send_rewards_from_file().await?;
//!     println!("sent {} of {} rewards", report.sent, report.total);
//!
//!     gateway.close();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod contract;
pub mod distributor;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod rewards;
pub mod transaction;

// Re-export commonly used types
pub use config::Config;
pub use contract::{ContractCaller, ContractFunction};
pub use distributor::{
    BatchReport, DistributionConfig, DistributionOptions, Distributor, RewardRecord, RewardRecorder,
};
pub use error::{DistributorError, Result};
pub use gateway::{AlloyEndpoint, Gateway, GatewayConfig, HeaderSummary, RpcEndpoint};
pub use ledger::{Ledger, RowLayout};
pub use rewards::{AccountStat, RewardClass, RewardList};
pub use transaction::{RewardAsset, SenderConfig, SignedTransfer, TransactionBuilder};

// Re-export Alloy types for convenience
pub use alloy_primitives::{Address, Bytes, TxHash, B256, I256, U256};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::contract::{ContractCaller, ContractFunction};
    pub use crate::distributor::{BatchReport, DistributionOptions, Distributor, RewardRecorder};
    pub use crate::error::{DistributorError, Result};
    pub use crate::gateway::{Gateway, GatewayConfig, RpcEndpoint};
    pub use crate::rewards::{AccountStat, RewardClass};
    pub use crate::transaction::{RewardAsset, SenderConfig, TransactionBuilder};
    pub use alloy_primitives::{Address, B256, I256, U256};
}
