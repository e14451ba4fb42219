//! CLI argument parsing

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use reward_distributor::config::Config;

#[derive(Parser, Debug)]
#[command(name = "reward-distributor")]
#[command(about = "Batch reward distribution over redundant RPC endpoints", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to ./distributor.toml when present)
    #[arg(short, long, env = "DISTRIBUTOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send rewards batchly according to a verified input file with line format: <address> <rewards>
    SendRewards(SendRewardsArgs),
}

#[derive(Debug, Args)]
pub struct SendRewardsArgs {
    /// Gateway URL, repeat or comma separate for several endpoints
    #[arg(short, long, value_delimiter = ',', env = "GATEWAY_URL")]
    pub gateway: Vec<String>,

    /// Reward type: liquidity or volume
    #[arg(long)]
    pub reward_type: Option<String>,

    /// Exchange address
    #[arg(long)]
    pub exchange: Option<String>,

    /// Reward token address, native coin when omitted
    #[arg(long)]
    pub reward_token: Option<String>,

    /// Input file
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Output file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Sender address
    #[arg(long)]
    pub sender: Option<String>,

    /// Keystore file
    #[arg(long)]
    pub keystore: Option<PathBuf>,

    /// Password file
    #[arg(long)]
    pub password: Option<PathBuf>,

    /// Gas limit
    #[arg(long)]
    pub gas_limit: Option<u64>,

    /// Gas price in wei
    #[arg(long)]
    pub gas_price: Option<u64>,

    /// Account nonce of the first transaction
    #[arg(long)]
    pub nonce: Option<u64>,

    /// Save sent rewards to database
    #[arg(long)]
    pub save_db: bool,

    /// Validate and log without signing or sending
    #[arg(long)]
    pub dry_run: bool,

    /// Attempts made by retrying reads
    #[arg(long)]
    pub retry_count: Option<u32>,

    /// Pause between attempts in milliseconds
    #[arg(long)]
    pub retry_interval_ms: Option<u64>,
}

impl SendRewardsArgs {
    /// Command line flags win over file and environment settings
    pub fn apply(self, config: &mut Config) {
        let endpoints: Vec<String> = self
            .gateway
            .into_iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        if !endpoints.is_empty() {
            config.gateway.endpoints = endpoints;
        }
        if let Some(count) = self.retry_count {
            config.gateway.retry_count = count;
        }
        if let Some(ms) = self.retry_interval_ms {
            config.gateway.retry_interval_ms = ms;
        }

        let sender = &mut config.sender;
        sender.address = self.sender.or(sender.address.take());
        sender.keystore_file = self.keystore.or(sender.keystore_file.take());
        sender.password_file = self.password.or(sender.password_file.take());
        sender.nonce = self.nonce.or(sender.nonce);
        sender.gas_limit = self.gas_limit.or(sender.gas_limit);
        sender.gas_price = self.gas_price.or(sender.gas_price);

        let distribution = &mut config.distribution;
        distribution.by_what = self.reward_type.or(distribution.by_what.take());
        distribution.exchange = self.exchange.or(distribution.exchange.take());
        distribution.reward_token = self.reward_token.or(distribution.reward_token.take());
        distribution.input_file = self.input.or(distribution.input_file.take());
        distribution.output_file = self.output.or(distribution.output_file.take());
        distribution.save_db |= self.save_db;
        distribution.dry_run |= self.dry_run;
    }
}
