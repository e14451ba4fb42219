//! Reward list model and input file handling

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use alloy_primitives::{Address, I256, U256};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DistributorError, Result};

/// Output title used when the input title cannot be extended
pub const FALLBACK_TITLE_LINE: &str = "#account,reward,txhash";

/// Minimum number of fields in a valid title line
pub const MIN_TITLE_FIELDS: usize = 5;

/// Title field holding the reward classification
const CLASS_FIELD_INDEX: usize = 2;

/// One account and its reward in the token's smallest unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountStat {
    pub account: Address,
    /// Signed so that negative lines can be read and skipped
    pub reward: I256,
    /// Trailing fields of the input line, kept verbatim
    pub extra: Option<String>,
}

impl AccountStat {
    pub fn new(account: Address, reward: I256) -> Self {
        Self { account, reward, extra: None }
    }

    /// Amount to send, `None` for zero or negative rewards
    pub fn payable(&self) -> Option<U256> {
        self.reward.is_positive().then(|| self.reward.unsigned_abs())
    }
}

/// Parsed reward list file
#[derive(Debug, Clone, Default)]
pub struct RewardList {
    pub title: String,
    pub stats: Vec<AccountStat>,
}

/// Reward classification method ("by what")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardClass {
    Liquidity,
    Volume,
}

impl RewardClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardClass::Liquidity => "liquidity",
            RewardClass::Volume => "volume",
        }
    }
}

impl fmt::Display for RewardClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RewardClass {
    type Err = DistributorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "liquidity" | "liquid" | "liq" | "byliquidity" | "liquidityreward" => Ok(RewardClass::Liquidity),
            "volume" | "vol" | "tradevolume" | "byvolume" | "volumereward" => Ok(RewardClass::Volume),
            other => Err(DistributorError::InvalidInput(format!("unknown reward type '{}'", other))),
        }
    }
}

/// Split on runs of blanks and commas
pub fn split_fields(line: &str) -> Vec<&str> {
    line.trim()
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|part| !part.is_empty())
        .collect()
}

pub fn is_comment_line(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

/// Parse reward list content.
///
/// The first comment line is the title; later comment lines and blank lines
/// are ignored. Body lines are `<account> <reward> [extra...]`.
pub fn parse_reward_list(content: &str) -> Result<RewardList> {
    let mut list = RewardList::default();
    let mut has_title = false;

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if is_comment_line(line) {
            if !has_title {
                list.title = line.to_string();
                has_title = true;
            }
            continue;
        }

        let fields = split_fields(line);
        if fields.len() < 2 {
            return Err(DistributorError::InvalidInput(format!(
                "line {}: expected '<account> <reward>', got '{}'",
                index + 1,
                line
            )));
        }
        let account = fields[0].parse::<Address>().map_err(|e| {
            DistributorError::InvalidInput(format!("line {}: wrong account '{}': {}", index + 1, fields[0], e))
        })?;
        let reward = parse_reward(fields[1])
            .map_err(|e| DistributorError::InvalidInput(format!("line {}: {}", index + 1, e)))?;
        let extra = (fields.len() > 2).then(|| fields[2..].join(","));

        list.stats.push(AccountStat { account, reward, extra });
    }

    debug!(entries = list.stats.len(), title = %list.title, "parsed reward list");
    Ok(list)
}

pub async fn load_reward_file(path: &Path) -> Result<RewardList> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        DistributorError::InvalidInput(format!("read input file {}: {}", path.display(), e))
    })?;
    parse_reward_list(&content)
}

fn parse_reward(value: &str) -> std::result::Result<I256, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(_) => I256::from_hex_str(value),
        None => I256::from_dec_str(value),
    };
    parsed.map_err(|e| format!("wrong reward '{}': {}", value, e))
}

/// Validate the title line and settle the reward classification.
///
/// With no configured class the one named by the title is adopted.
pub fn check_title_line(title: &str, configured: Option<RewardClass>) -> Result<RewardClass> {
    if !is_comment_line(title) {
        return Err(DistributorError::TitleLine(format!("title line '{}' is not comment line", title)));
    }
    let parts = split_fields(title);
    if parts.len() < MIN_TITLE_FIELDS {
        return Err(DistributorError::TitleLine(format!(
            "title line parts is less than {}. {}",
            MIN_TITLE_FIELDS, title
        )));
    }

    let method = parts[CLASS_FIELD_INDEX];
    match configured {
        None => method.parse(),
        Some(class) => match method.parse::<RewardClass>() {
            Ok(from_file) if from_file == class => Ok(class),
            _ => Err(DistributorError::ClassificationMismatch {
                configured: class.to_string(),
                from_file: method.to_string(),
            }),
        },
    }
}

/// Insert a `txhash` column before the last title field
pub fn add_txhash_field_to_title_line(title: &str) -> String {
    let parts = split_fields(title);
    match parts.split_last() {
        Some((last, head)) if !head.is_empty() => format!("{},txhash,{}", head.join(","), last),
        _ => format!("{},txhash", title.trim()),
    }
}

/// Sum of the positive rewards; an overflow past 256 bits is an error
pub fn total_reward(stats: &[AccountStat]) -> Result<U256> {
    stats.iter().try_fold(U256::ZERO, |total, stat| match stat.payable() {
        Some(reward) => total.checked_add(reward).ok_or_else(|| {
            DistributorError::Validation(format!("total reward overflows at account {}", stat.account))
        }),
        None => Ok(total),
    })
}
