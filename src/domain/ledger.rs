//! Ledger record model
//!
//! Records as the engine sees them after the HTTP layer decoded them. Every
//! record is immutable once fetched; pages keep the order the ledger API
//! returned them in.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Horizon refuses page sizes above this
pub const MAX_PAGE_LIMIT: u32 = 200;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AssetKind {
    Native,
    Credit { code: String, issuer: String },
}

impl AssetKind {
    pub const fn is_native(&self) -> bool {
        matches!(self, Self::Native)
    }
}

/// What an operation did, as far as the scan cares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OperationKind {
    CreateAccount {
        account: String,
        starting_balance: Decimal,
    },
    Payment {
        to: String,
        asset: AssetKind,
        amount: Decimal,
    },
    /// Strict-send and strict-receive alike; `dest_asset` is what `to` received
    PathPayment {
        to: String,
        dest_asset: AssetKind,
        amount: Decimal,
    },
    Other { type_name: String },
}

impl OperationKind {
    /// Native amount this operation credited to `account_id`, zero if none
    pub fn incoming_native_amount(&self, account_id: &str) -> Decimal {
        match self {
            Self::CreateAccount {
                account,
                starting_balance,
            } if account == account_id => *starting_balance,
            Self::Payment { to, asset, amount } if to == account_id && asset.is_native() => {
                *amount
            }
            Self::PathPayment {
                to,
                dest_asset,
                amount,
            } if to == account_id && dest_asset.is_native() => *amount,
            _ => Decimal::ZERO,
        }
    }
}

/// Memo availability on a listed record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemoState {
    /// The listing joined the transaction; `None` means "no memo"
    Embedded(Option<String>),
    /// Needs a detail lookup
    Missing,
}

impl MemoState {
    /// `Some(matched)` when the memo is known, `None` when a lookup is needed
    pub fn matches(&self, query: &str) -> Option<bool> {
        match self {
            Self::Embedded(memo) => Some(memo_contains(memo.as_deref(), query)),
            Self::Missing => None,
        }
    }
}

/// Case-sensitive substring match; an absent memo never matches
pub fn memo_contains(memo: Option<&str>, query: &str) -> bool {
    memo.is_some_and(|memo| memo.contains(query))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Transaction hash the operation belongs to
    pub detail_ref: String,
    pub memo: MemoState,
    pub kind: OperationKind,
}

impl OperationRecord {
    /// Horizon pages operations by their id
    pub fn paging_token(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDetail {
    pub hash: String,
    pub memo: Option<String>,
    pub memo_type: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Opaque continuation token (Horizon: the `next` link)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageCursor(pub String);

impl PageCursor {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub records: Vec<OperationRecord>,
    pub next: Option<PageCursor>,
}

impl Page {
    pub fn new(records: Vec<OperationRecord>, next: Option<PageCursor>) -> Self {
        Self { records, next }
    }

    pub const fn has_next(&self) -> bool {
        self.next.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn oldest_created_at(&self) -> Option<DateTime<Utc>> {
        self.records.iter().map(|r| r.created_at).min()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Asc,
    #[default]
    Desc,
}

impl Order {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub order: Order,
    pub cursor: Option<String>,
    pub limit: u32,
    pub join_transactions: bool,
}

impl ListQuery {
    /// Payments listing with the transaction (and memo) joined in
    pub fn payments(order: Order, limit: u32) -> Self {
        Self {
            order,
            cursor: None,
            limit: clamp_page_limit(limit),
            join_transactions: true,
        }
    }

    /// Newest-first payments listing
    pub fn payments_desc(limit: u32) -> Self {
        Self::payments(Order::Desc, limit)
    }

    /// Resume after the record with this paging token
    #[must_use]
    pub fn after(mut self, paging_token: impl Into<String>) -> Self {
        self.cursor = Some(paging_token.into());
        self
    }
}

pub fn clamp_page_limit(limit: u32) -> u32 {
    limit.clamp(1, MAX_PAGE_LIMIT)
}
