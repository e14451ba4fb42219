mod cli;

use std::sync::Arc;

use alloy::eips::BlockNumberOrTag;
use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reward_distributor::prelude::*;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    let Command::SendRewards(args) = cli.command;
    args.apply(&mut config);

    let level = if cli.verbose { "debug" } else { config.log_level.as_str() };
    init_tracing(level);

    config.validate()?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    let gateway = Arc::new(Gateway::dial(&config.gateway, cancel).await?);
    let result = send_rewards(gateway.clone(), &config).await;
    gateway.close();

    match result {
        Ok(report) => {
            info!(sent = report.sent, total = report.total, skipped = report.skipped, "send rewards finished");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "send rewards failed");
            Err(e.into())
        }
    }
}

async fn send_rewards(gateway: Arc<Gateway>, config: &Config) -> reward_distributor::Result<BatchReport> {
    log_chain_state(&gateway).await?;

    let options = DistributionOptions::from_config(&config.distribution)?;
    let mut builder = TransactionBuilder::new(gateway.clone(), config.sender.clone(), options.dry_run);
    builder.resolve_identity().await?;
    builder.resolve_parameters().await?;

    let mut distributor = Distributor::new(ContractCaller::new(gateway), builder, options);
    distributor.send_rewards_from_file().await
}

async fn log_chain_state(gateway: &Gateway) -> reward_distributor::Result<()> {
    match gateway.header_by_number(BlockNumberOrTag::Latest).await {
        Ok(Some(header)) => info!(
            number = header.number,
            hash = %header.hash,
            timestamp = header.timestamp,
            "latest block header"
        ),
        Ok(None) => warn!("latest block header not found"),
        Err(e) => warn!(error = %e, "get latest block header failed"),
    }

    gateway.wait_for_sync_status().await?;
    Ok(())
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
