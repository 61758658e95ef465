//! Persisted per-user transaction history.
//!
//! Records live in one JSON file keyed by wallet address, newest first and
//! capped at [`MAX_TRANSACTIONS`] per user. A record is written in `pending`
//! state when the client starts executing a deferred operation and resolved
//! to `completed` or `failed` by record id once the retry executor returns.
//! Rewrites go through a temp file so a crash never truncates the ledger.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::chain::{EXPLORER_URL, USDC_ADDRESS};
use crate::error::ClientError;
use crate::exec::OperationKind;

/// Records kept per user; older ones fall off.
pub const MAX_TRANSACTIONS: usize = 50;

/// Lifecycle of one fund movement as the client saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// One fund movement in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    /// Human USD amount ("0.1").
    pub amount: String,
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_token: Option<String>,
    /// Set when the operation resolved with a hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explorer_url: Option<String>,
}

impl Transaction {
    /// A pending USDC transfer record.
    pub fn transfer(amount_usd: impl Into<String>, recipient: impl Into<String>) -> Self {
        let mut transaction = Self::pending(OperationKind::Transfer, amount_usd);
        transaction.recipient = Some(recipient.into());
        transaction
    }

    /// A pending USDC-to-token swap record.
    pub fn swap(amount_usd: impl Into<String>, to_token: impl Into<String>) -> Self {
        let mut transaction = Self::pending(OperationKind::Swap, amount_usd);
        transaction.from_token = Some(USDC_ADDRESS.to_string());
        transaction.to_token = Some(to_token.into());
        transaction
    }

    fn pending(kind: OperationKind, amount_usd: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            amount: amount_usd.into(),
            token: "USDC".to_string(),
            recipient: None,
            from_token: None,
            to_token: None,
            tx_hash: None,
            timestamp: Utc::now(),
            status: TransactionStatus::Pending,
            explorer_url: Some(EXPLORER_URL.to_string()),
        }
    }
}

type Ledger = BTreeMap<String, Vec<Transaction>>;

/// File-backed transaction ledger.
pub struct TransactionHistory {
    path: PathBuf,
}

impl TransactionHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default ledger location (~/.basepilot/history.json).
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".basepilot")
            .join("history.json")
    }

    /// Prepends a record for `user`, evicting beyond the cap.
    pub fn record(&self, user: &str, transaction: Transaction) -> Result<(), ClientError> {
        let mut ledger = self.load()?;
        let entries = ledger.entry(history_key(user)).or_default();
        entries.insert(0, transaction);
        entries.truncate(MAX_TRANSACTIONS);
        self.store(&ledger)
    }

    /// All records for `user`, newest first.
    pub fn list(&self, user: &str) -> Result<Vec<Transaction>, ClientError> {
        Ok(self
            .load()?
            .get(&history_key(user))
            .cloned()
            .unwrap_or_default())
    }

    /// Resolves the record with `id`, attaching `tx_hash` when present.
    /// `false` when no such record exists for `user`.
    pub fn set_status(
        &self,
        user: &str,
        id: &str,
        status: TransactionStatus,
        tx_hash: Option<&str>,
    ) -> Result<bool, ClientError> {
        let mut ledger = self.load()?;
        let Some(entries) = ledger.get_mut(&history_key(user)) else {
            return Ok(false);
        };
        let Some(entry) = entries.iter_mut().find(|t| t.id == id) else {
            return Ok(false);
        };
        entry.status = status;
        if let Some(hash) = tx_hash {
            entry.tx_hash = Some(hash.to_string());
        }
        self.store(&ledger)?;
        Ok(true)
    }

    /// Drops every record for `user`.
    pub fn clear(&self, user: &str) -> Result<(), ClientError> {
        let mut ledger = self.load()?;
        if ledger.remove(&history_key(user)).is_some() {
            self.store(&ledger)?;
        }
        Ok(())
    }

    fn load(&self) -> Result<Ledger, ClientError> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Ledger::new()),
            Err(e) => {
                return Err(ClientError::HistoryIo {
                    reason: format!("failed to read {}: {e}", self.path.display()),
                });
            }
        };
        match serde_json::from_str(&data) {
            Ok(ledger) => Ok(ledger),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "transaction history is unreadable, starting fresh"
                );
                Ok(Ledger::new())
            }
        }
    }

    fn store(&self, ledger: &Ledger) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ClientError::HistoryIo {
                reason: format!("failed to create {}: {e}", parent.display()),
            })?;
        }
        let data = serde_json::to_string_pretty(ledger)?;
        let staging = self.path.with_extension("tmp");
        std::fs::write(&staging, data).map_err(|e| ClientError::HistoryIo {
            reason: format!("failed to write {}: {e}", staging.display()),
        })?;
        std::fs::rename(&staging, &self.path).map_err(|e| ClientError::HistoryIo {
            reason: format!("failed to replace {}: {e}", self.path.display()),
        })
    }
}

/// Addresses key the ledger case-insensitively.
fn history_key(user: &str) -> String {
    user.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const USER: &str = "0x1111111111111111111111111111111111111111";

    fn history(dir: &tempfile::TempDir) -> TransactionHistory {
        TransactionHistory::new(dir.path().join("history.json"))
    }

    #[test]
    fn missing_file_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let history = history(&dir);
        assert!(history.list(USER).unwrap().is_empty());
    }

    #[test]
    fn records_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let history = history(&dir);

        history
            .record(USER, Transaction::transfer("0.1", "0xaaa"))
            .unwrap();
        history
            .record(USER, Transaction::transfer("0.2", "0xbbb"))
            .unwrap();

        let entries = history.list(USER).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].amount, "0.2");
        assert_eq!(entries[1].amount, "0.1");
    }

    #[test]
    fn caps_at_fifty_records() {
        let dir = tempfile::tempdir().unwrap();
        let history = history(&dir);

        for i in 0..(MAX_TRANSACTIONS + 5) {
            history
                .record(USER, Transaction::transfer(format!("{i}"), "0xaaa"))
                .unwrap();
        }

        let entries = history.list(USER).unwrap();
        assert_eq!(entries.len(), MAX_TRANSACTIONS);
        assert_eq!(entries[0].amount, format!("{}", MAX_TRANSACTIONS + 4));
        assert_eq!(entries.last().unwrap().amount, "5");
    }

    #[test]
    fn set_status_resolves_by_record_id() {
        let dir = tempfile::tempdir().unwrap();
        let history = history(&dir);

        let record = Transaction::transfer("0.1", "0xaaa");
        let id = record.id.clone();
        history.record(USER, record).unwrap();

        let found = history
            .set_status(USER, &id, TransactionStatus::Completed, Some("0xhash1"))
            .unwrap();
        assert!(found);

        let entries = history.list(USER).unwrap();
        assert_eq!(entries[0].status, TransactionStatus::Completed);
        assert_eq!(entries[0].tx_hash.as_deref(), Some("0xhash1"));
    }

    #[test]
    fn unknown_record_id_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let history = history(&dir);
        history
            .record(USER, Transaction::transfer("0.1", "0xaaa"))
            .unwrap();

        let found = history
            .set_status(USER, "no-such-id", TransactionStatus::Failed, None)
            .unwrap();
        assert!(!found);
    }

    #[test]
    fn failed_records_keep_their_missing_hash() {
        let dir = tempfile::tempdir().unwrap();
        let history = history(&dir);

        let record = Transaction::swap("1", "0x2222222222222222222222222222222222222222");
        let id = record.id.clone();
        history.record(USER, record).unwrap();
        history
            .set_status(USER, &id, TransactionStatus::Failed, None)
            .unwrap();

        let entries = history.list(USER).unwrap();
        assert_eq!(entries[0].status, TransactionStatus::Failed);
        assert_eq!(entries[0].tx_hash, None);
    }

    #[test]
    fn users_are_isolated_and_keys_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let history = history(&dir);

        history
            .record("0xAAAA", Transaction::transfer("1", "0x1"))
            .unwrap();
        history
            .record("0xbbbb", Transaction::transfer("2", "0x2"))
            .unwrap();

        assert_eq!(history.list("0xaaaa").unwrap().len(), 1);
        assert_eq!(history.list("0xBBBB").unwrap().len(), 1);
        assert_eq!(history.list("0xcccc").unwrap().len(), 0);
    }

    #[test]
    fn survives_reload_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        let record = Transaction::swap("2.5", "0x9999999999999999999999999999999999999999");
        TransactionHistory::new(&path).record(USER, record).unwrap();

        let reopened = TransactionHistory::new(&path);
        let entries = reopened.list(USER).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, OperationKind::Swap);
        assert_eq!(entries[0].from_token.as_deref(), Some(USDC_ADDRESS));
    }

    #[test]
    fn unreadable_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "not json").unwrap();

        let history = TransactionHistory::new(&path);
        assert!(history.list(USER).unwrap().is_empty());
    }

    #[test]
    fn clear_drops_only_that_user() {
        let dir = tempfile::tempdir().unwrap();
        let history = history(&dir);

        history
            .record(USER, Transaction::transfer("1", "0x1"))
            .unwrap();
        history
            .record("0xdddd", Transaction::transfer("2", "0x2"))
            .unwrap();

        history.clear(USER).unwrap();
        assert!(history.list(USER).unwrap().is_empty());
        assert_eq!(history.list("0xdddd").unwrap().len(), 1);
    }

    #[test]
    fn wire_shape_is_camel_case_with_type_tag() {
        let record = Transaction::transfer("0.1", "0xaaa");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "transfer");
        assert_eq!(value["token"], "USDC");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["explorerUrl"], EXPLORER_URL);
        assert!(value.get("txHash").is_none());
        assert!(value.get("fromToken").is_none());
    }
}
