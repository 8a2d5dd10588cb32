//! In-memory payment store
//!
//! Process-local [`PaymentStore`]: one history per account keyed by operation
//! id, plus the refresh cursor. Everything is lost when the process exits.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::errors::LedgerError;
use crate::domain::ledger::OperationRecord;
use crate::domain::ports::PaymentStore;

#[derive(Debug, Default)]
struct AccountHistory {
    records: HashMap<String, OperationRecord>,
    cursor: Option<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryPaymentStore {
    accounts: RwLock<HashMap<String, AccountHistory>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self, account_id: &str) -> usize {
        self.accounts
            .read()
            .await
            .get(account_id)
            .map_or(0, |history| history.records.len())
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn upsert_payments(
        &self,
        account_id: &str,
        records: &[OperationRecord],
    ) -> Result<usize, LedgerError> {
        let mut accounts = self.accounts.write().await;
        let history = accounts.entry(account_id.to_string()).or_default();
        let mut inserted = 0;
        for record in records {
            if history.records.insert(record.id.clone(), record.clone()).is_none() {
                inserted += 1;
            }
        }
        debug!("💾 Stored {} payments for {} ({} new)", records.len(), account_id, inserted);
        Ok(inserted)
    }

    async fn cursor(&self, account_id: &str) -> Result<Option<String>, LedgerError> {
        Ok(self
            .accounts
            .read()
            .await
            .get(account_id)
            .and_then(|history| history.cursor.clone()))
    }

    async fn set_cursor(&self, account_id: &str, paging_token: &str) -> Result<(), LedgerError> {
        self.accounts
            .write()
            .await
            .entry(account_id.to_string())
            .or_default()
            .cursor = Some(paging_token.to_string());
        Ok(())
    }

    async fn oldest_created_at(
        &self,
        account_id: &str,
    ) -> Result<Option<DateTime<Utc>>, LedgerError> {
        Ok(self.accounts.read().await.get(account_id).and_then(|history| {
            history.records.values().map(|record| record.created_at).min()
        }))
    }

    async fn payments_between(
        &self,
        account_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<OperationRecord>, LedgerError> {
        let accounts = self.accounts.read().await;
        let Some(history) = accounts.get(account_id) else {
            return Ok(Vec::new());
        };
        let mut records: Vec<OperationRecord> = history
            .records
            .values()
            .filter(|record| {
                from.is_none_or(|from| record.created_at >= from)
                    && to.is_none_or(|to| record.created_at <= to)
            })
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(records)
    }
}
