//! Append-only output record of processed rewards

use std::path::{Path, PathBuf};

use alloy_primitives::TxHash;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::Result;
use crate::rewards::{add_txhash_field_to_title_line, AccountStat, FALLBACK_TITLE_LINE};

/// Column layout of the ledger, chosen once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLayout {
    /// Input title kept, rows without hashes
    DryRun,
    /// Input title with a `txhash` column before its last field
    Extended,
    /// `#account,reward,txhash`
    Minimal,
}

impl RowLayout {
    pub fn title_line(&self, input_title: &str) -> String {
        match self {
            RowLayout::DryRun => input_title.to_string(),
            RowLayout::Extended => add_txhash_field_to_title_line(input_title),
            RowLayout::Minimal => FALLBACK_TITLE_LINE.to_string(),
        }
    }
}

pub fn format_row(stat: &AccountStat, tx_hash: Option<TxHash>, layout: RowLayout) -> String {
    let mut fields = vec![stat.account.to_string(), stat.reward.to_string()];
    if layout != RowLayout::DryRun {
        if let Some(hash) = tx_hash {
            fields.push(hash.to_string());
        }
    }
    if layout != RowLayout::Minimal {
        if let Some(extra) = &stat.extra {
            fields.push(extra.clone());
        }
    }
    fields.join(",")
}

/// Writes one line at a time and flushes each, so an aborted batch leaves
/// exactly the lines of the transfers that went out. Without a path the
/// lines go to the log.
pub struct Ledger {
    path: Option<PathBuf>,
    file: Option<File>,
    rows: usize,
}

impl Ledger {
    pub async fn open(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(OpenOptions::new().create(true).append(true).open(path).await?),
            None => None,
        };
        Ok(Self {
            path: path.map(Path::to_path_buf),
            file,
            rows: 0,
        })
    }

    pub async fn write_title(&mut self, title: &str) -> Result<()> {
        self.write_line(title).await
    }

    pub async fn write_row(&mut self, stat: &AccountStat, tx_hash: Option<TxHash>, layout: RowLayout) -> Result<()> {
        self.write_line(&format_row(stat, tx_hash, layout)).await?;
        self.rows += 1;
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        match self.file.as_mut() {
            Some(file) => {
                file.write_all(line.as_bytes()).await?;
                file.write_all(b"\n").await?;
                file.flush().await?;
            }
            None => info!("{}", line),
        }
        Ok(())
    }

    /// Body rows written so far
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256, I256};

    fn stat(extra: Option<&str>) -> AccountStat {
        AccountStat {
            account: Address::repeat_byte(0x11),
            reward: I256::try_from(42).unwrap(),
            extra: extra.map(str::to_string),
        }
    }

    #[test]
    fn test_row_layouts() {
        let hash = B256::repeat_byte(0xab);
        let account = Address::repeat_byte(0x11).to_string();

        assert_eq!(
            format_row(&stat(Some("0.5")), None, RowLayout::DryRun),
            format!("{account},42,0.5")
        );
        assert_eq!(
            format_row(&stat(Some("0.5")), Some(hash), RowLayout::Extended),
            format!("{account},42,{hash},0.5")
        );
        assert_eq!(
            format_row(&stat(Some("0.5")), Some(hash), RowLayout::Minimal),
            format!("{account},42,{hash}")
        );
    }

    #[test]
    fn test_title_lines() {
        let title = "#1,2,volume,account,reward,share";
        assert_eq!(RowLayout::DryRun.title_line(title), title);
        assert_eq!(
            RowLayout::Extended.title_line(title),
            "#1,2,volume,account,reward,txhash,share"
        );
        assert_eq!(RowLayout::Minimal.title_line(title), "#account,reward,txhash");
    }

    #[tokio::test]
    async fn test_ledger_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "previous run\n").unwrap();

        let mut ledger = Ledger::open(Some(&path)).await.unwrap();
        ledger.write_title("#account,reward,txhash").await.unwrap();
        ledger.write_row(&stat(None), None, RowLayout::DryRun).await.unwrap();

        assert_eq!(ledger.rows(), 1);
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "previous run");
        assert_eq!(lines[1], "#account,reward,txhash");
    }

    #[tokio::test]
    async fn test_ledger_without_file() {
        let mut ledger = Ledger::open(None).await.unwrap();
        ledger.write_row(&stat(None), None, RowLayout::DryRun).await.unwrap();
        assert_eq!(ledger.rows(), 1);
        assert!(ledger.path().is_none());
    }
}
