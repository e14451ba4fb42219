//! Reward distribution pipeline
//!
//! Loads a reward list, validates it against the run configuration and the
//! sender's balance, then sends one transfer per positive entry in input
//! order. The first failed transfer aborts the rest of the batch.

use std::path::PathBuf;
use std::sync::Arc;

use alloy::eips::BlockId;
use alloy_primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::contract::ContractCaller;
use crate::error::{DistributorError, Result};
use crate::ledger::{Ledger, RowLayout};
use crate::rewards::{check_title_line, load_reward_file, total_reward, AccountStat, RewardClass};
use crate::transaction::{RewardAsset, TransactionBuilder};

/// Distribution section of the configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistributionConfig {
    #[serde(default)]
    pub input_file: Option<PathBuf>,
    #[serde(default)]
    pub output_file: Option<PathBuf>,
    /// Token contract; the native coin when absent
    #[serde(default)]
    pub reward_token: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub by_what: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub save_db: bool,
}

/// Validated run options
#[derive(Debug, Clone)]
pub struct DistributionOptions {
    pub input_file: Option<PathBuf>,
    pub output_file: Option<PathBuf>,
    pub asset: RewardAsset,
    pub exchange: Option<Address>,
    pub by_what: Option<RewardClass>,
    pub dry_run: bool,
    pub save_db: bool,
}

impl DistributionOptions {
    pub fn from_config(config: &DistributionConfig) -> Result<Self> {
        let asset = match parse_optional_address("reward token", config.reward_token.as_deref())? {
            Some(token) => RewardAsset::Token(token),
            None => RewardAsset::Native,
        };
        let by_what = match config.by_what.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) => Some(s.parse()?),
        };

        Ok(Self {
            input_file: config.input_file.clone(),
            output_file: config.output_file.clone(),
            asset,
            exchange: parse_optional_address("exchange", config.exchange.as_deref())?,
            by_what,
            dry_run: config.dry_run,
            save_db: config.save_db,
        })
    }
}

fn parse_optional_address(what: &str, value: Option<&str>) -> Result<Option<Address>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s
            .parse::<Address>()
            .map(Some)
            .map_err(|e| DistributorError::InvalidInput(format!("wrong {} address '{}': {}", what, s, e))),
    }
}

/// A sent reward handed to the persistence collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardRecord {
    pub exchange: Address,
    pub class: RewardClass,
    pub account: Address,
    pub reward: U256,
    pub tx_hash: TxHash,
    pub extra: Option<String>,
}

/// Persists sent rewards
#[async_trait]
pub trait RewardRecorder: Send + Sync {
    async fn record(&self, record: &RewardRecord) -> Result<()>;
}

/// Outcome of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Positive-reward entries in the batch
    pub total: usize,
    pub sent: usize,
    pub skipped: usize,
    pub total_amount: U256,
    pub sent_amount: U256,
    /// Hashes of submitted transfers, empty in dry run
    pub tx_hashes: Vec<TxHash>,
}

impl BatchReport {
    pub fn all_sent(&self) -> bool {
        self.sent_amount == self.total_amount
    }
}

pub struct Distributor {
    caller: ContractCaller,
    builder: TransactionBuilder,
    options: DistributionOptions,
    recorder: Option<Arc<dyn RewardRecorder>>,
}

impl Distributor {
    pub fn new(caller: ContractCaller, builder: TransactionBuilder, options: DistributionOptions) -> Self {
        Self {
            caller,
            builder,
            options,
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn RewardRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn options(&self) -> &DistributionOptions {
        &self.options
    }

    pub fn builder(&self) -> &TransactionBuilder {
        &self.builder
    }

    /// Total of the positive rewards, `None` when there is nothing to send
    pub fn validate_batch(stats: &[AccountStat]) -> Result<Option<U256>> {
        if stats.is_empty() {
            return Ok(None);
        }
        total_reward(stats).map(Some)
    }

    /// Fails unless the sender holds at least `total` of the reward asset
    pub async fn check_sender_balance(&self, total: U256) -> Result<U256> {
        let sender = self.builder.sender();
        let balance = match self.options.asset {
            RewardAsset::Token(token) => self.caller.token_balance(token, sender, BlockId::latest()).await?,
            RewardAsset::Native => self.caller.coin_balance(sender, BlockId::latest()).await?,
        };

        if balance < total {
            error!(%sender, %balance, required = %total, asset = %self.options.asset, "sender has not enough reward balance");
            return Err(DistributorError::InsufficientBalance {
                balance,
                required: total,
            });
        }
        info!(%sender, %balance, required = %total, asset = %self.options.asset, "check sender reward balance passed");
        Ok(balance)
    }

    /// Reward classification and exchange must both be known
    pub fn basic_check(&self) -> Result<(Address, RewardClass)> {
        let class = self
            .options
            .by_what
            .ok_or_else(|| DistributorError::Validation("reward type is not specified".to_string()))?;
        let exchange = self
            .options
            .exchange
            .ok_or_else(|| DistributorError::Validation("exchange is not specified".to_string()))?;
        Ok((exchange, class))
    }

    /// Load, validate and send the configured reward list.
    ///
    /// The signing key is released when this returns, whatever the outcome.
    pub async fn send_rewards_from_file(&mut self) -> Result<BatchReport> {
        let result = self.send_rewards_inner().await;
        self.builder.release_key();
        result
    }

    async fn send_rewards_inner(&mut self) -> Result<BatchReport> {
        let input = self
            .options
            .input_file
            .clone()
            .ok_or_else(|| DistributorError::InvalidInput("must specify input file".to_string()))?;
        let list = load_reward_file(&input).await.inspect_err(|e| {
            error!(input = %input.display(), error = %e, "get accounts and rewards from input file failed");
        })?;

        let Some(total) = Self::validate_batch(&list.stats)? else {
            warn!("empty account list, no need to send reward");
            return Ok(BatchReport::default());
        };

        let class = check_title_line(&list.title, self.options.by_what).inspect_err(|e| {
            error!(title = %list.title, error = %e, "check title line failed");
        })?;
        self.options.by_what = Some(class);

        self.check_sender_balance(total).await?;

        let basic = self.basic_check();
        let can_save_db = basic.is_ok();
        if self.options.save_db {
            if let Err(e) = basic {
                return Err(DistributorError::Validation(format!("can not savedb as error {}", e)));
            }
            if self.recorder.is_none() {
                return Err(DistributorError::Storage("no reward recorder configured".to_string()));
            }
        }

        let layout = if self.options.dry_run {
            RowLayout::DryRun
        } else if can_save_db {
            RowLayout::Extended
        } else {
            RowLayout::Minimal
        };

        let mut ledger = Ledger::open(self.options.output_file.as_deref()).await?;
        ledger.write_title(&layout.title_line(&list.title)).await?;

        info!(
            input = %input.display(),
            entries = list.stats.len(),
            total_reward = %total,
            asset = %self.options.asset,
            by_what = %class,
            dry_run = self.options.dry_run,
            "call SendRewardsFromFile"
        );
        self.run_batch(&list.stats, layout, &mut ledger).await
    }

    /// Send every positive reward in order, stopping at the first failure
    pub async fn run_batch(
        &mut self,
        stats: &[AccountStat],
        layout: RowLayout,
        ledger: &mut Ledger,
    ) -> Result<BatchReport> {
        let mut report = BatchReport {
            total: stats.iter().filter(|s| s.payable().is_some()).count(),
            total_amount: Self::validate_batch(stats)?.unwrap_or_default(),
            ..Default::default()
        };

        for stat in stats {
            let Some(reward) = stat.payable() else {
                info!(account = %stat.account, reward = %stat.reward, "ignore zero reward line");
                report.skipped += 1;
                continue;
            };

            let tx_hash = match self.send_one(stat.account, reward).await {
                Ok(hash) => hash,
                Err(e) => {
                    log_progress(&report);
                    error!(
                        account = %stat.account,
                        %reward,
                        dry_run = self.options.dry_run,
                        error = %e,
                        "send tx failed"
                    );
                    return Err(DistributorError::BatchAborted {
                        account: stat.account,
                        sent: report.sent,
                        total: report.total,
                        sent_amount: report.sent_amount,
                        total_amount: report.total_amount,
                        source: Box::new(e),
                    });
                }
            };

            report.sent += 1;
            report.sent_amount += reward;
            if let Some(hash) = tx_hash {
                report.tx_hashes.push(hash);
                self.record(stat, reward, hash).await;
            }

            // The transfer is already out; keep its hash in the log and the abort counters.
            if let Err(e) = ledger.write_row(stat, tx_hash, layout).await {
                log_progress(&report);
                error!(
                    account = %stat.account,
                    %reward,
                    tx_hash = ?tx_hash,
                    output = ?ledger.path(),
                    error = %e,
                    "write output line failed after send"
                );
                return Err(DistributorError::BatchAborted {
                    account: stat.account,
                    sent: report.sent,
                    total: report.total,
                    sent_amount: report.sent_amount,
                    total_amount: report.total_amount,
                    source: Box::new(e),
                });
            }
        }

        log_progress(&report);
        Ok(report)
    }

    async fn send_one(&mut self, account: Address, reward: U256) -> Result<Option<TxHash>> {
        if self.options.dry_run {
            let tx = self
                .builder
                .build_transfer(account, reward, self.options.asset)
                .map_err(|e| e.at_stage(account, "build"))?;
            info!(%account, %reward, nonce = tx.nonce, "dry run, skip sending reward");
            return Ok(None);
        }
        self.builder.send_transfer(account, reward, self.options.asset).await
    }

    async fn record(&self, stat: &AccountStat, reward: U256, tx_hash: TxHash) {
        if !self.options.save_db {
            return;
        }
        let (Some(recorder), Ok((exchange, class))) = (&self.recorder, self.basic_check()) else {
            return;
        };
        let record = RewardRecord {
            exchange,
            class,
            account: stat.account,
            reward,
            tx_hash,
            extra: stat.extra.clone(),
        };
        if let Err(e) = recorder.record(&record).await {
            error!(account = %stat.account, %tx_hash, error = %e, "save reward result failed");
        }
    }
}

fn log_progress(report: &BatchReport) {
    info!(
        total_rewards = %report.total_amount,
        rewards_sent = %report.sent_amount,
        sent = report.sent,
        total = report.total,
        all_rewards_sent = report.all_sent(),
        "rewards sent"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::I256;

    fn stat(reward: i64) -> AccountStat {
        AccountStat::new(Address::repeat_byte(0x01), I256::try_from(reward).unwrap())
    }

    #[test]
    fn test_validate_empty_batch_is_noop() {
        assert_eq!(Distributor::validate_batch(&[]).unwrap(), None);
    }

    #[test]
    fn test_validate_batch_totals_positive_rewards() {
        let stats = [stat(0), stat(5), stat(-1), stat(10)];
        assert_eq!(Distributor::validate_batch(&stats).unwrap(), Some(U256::from(15)));
    }

    #[test]
    fn test_options_from_config() {
        let config = DistributionConfig {
            reward_token: Some("0x1111111111111111111111111111111111111111".to_string()),
            by_what: Some("vol".to_string()),
            ..Default::default()
        };
        let options = DistributionOptions::from_config(&config).unwrap();
        assert_eq!(options.asset, RewardAsset::Token(Address::repeat_byte(0x11)));
        assert_eq!(options.by_what, Some(RewardClass::Volume));
        assert_eq!(options.exchange, None);

        let native = DistributionOptions::from_config(&DistributionConfig::default()).unwrap();
        assert_eq!(native.asset, RewardAsset::Native);

        let bad = DistributionConfig {
            exchange: Some("0x12".to_string()),
            ..Default::default()
        };
        assert!(DistributionOptions::from_config(&bad).is_err());
    }

    #[test]
    fn test_all_sent() {
        let mut report = BatchReport {
            total_amount: U256::from(10),
            ..Default::default()
        };
        assert!(!report.all_sent());
        report.sent_amount = U256::from(10);
        assert!(report.all_sent());
    }
}
