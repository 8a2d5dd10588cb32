//! Horizon HTTP adapter
//!
//! Implements [`LedgerApi`] over Horizon's REST/HAL endpoints with a
//! client-side request budget (`governor`). Retries are not done here; the
//! engine wraps each call in the backoff controller.

use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, direct::NotKeyed},
};
use reqwest::{
    Client, StatusCode,
    header::{HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT},
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::domain::errors::LedgerError;
use crate::domain::ledger::{
    AssetKind, ListQuery, MemoState, OperationKind, OperationRecord, Page, PageCursor,
    TransactionDetail,
};
use crate::domain::ports::LedgerApi;
use crate::domain::trustline::{AccountSummary, Trustline, TrustlineSnapshot};
use crate::infrastructure::config::HorizonConfig;

/// Horizon client with a per-instance request budget
pub struct HorizonClient {
    client: Client,
    base_url: Url,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl HorizonClient {
    pub fn new(config: &HorizonConfig) -> anyhow::Result<Self> {
        use anyhow::Context;

        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .default_headers(headers)
            .gzip(true)
            .build()
            .context("Failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .context("Rate limit must be greater than 0")?,
        );

        let mut base_url = Url::parse(&config.base_url).context("Invalid Horizon URL")?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        debug!("🌐 Horizon client ready: {}", base_url);
        Ok(Self {
            client,
            base_url,
            rate_limiter: RateLimiter::direct(quota),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, LedgerError> {
        self.base_url
            .join(path)
            .map_err(|e| LedgerError::Decode(format!("bad endpoint {path}: {e}")))
    }

    /// Account-scoped payments listing URL
    pub fn payments_url(&self, account_id: &str, query: &ListQuery) -> Result<Url, LedgerError> {
        let mut url = self.endpoint(&format!("accounts/{account_id}/payments"))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("order", query.order.as_str());
            pairs.append_pair("limit", &query.limit.to_string());
            if query.join_transactions {
                pairs.append_pair("join", "transactions");
            }
            if let Some(cursor) = &query.cursor {
                pairs.append_pair("cursor", cursor);
            }
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, LedgerError> {
        self.rate_limiter.until_ready().await;
        trace!("GET {}", url);

        let response = self.client.get(url.clone()).send().await.map_err(transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            debug!("⚠️ Horizon {} for {}", status, url);
            return Err(problem_to_error(status, &body, retry_after));
        }

        let body = response.text().await.map_err(transport_error)?;
        serde_json::from_str(&body).map_err(|e| LedgerError::Decode(e.to_string()))
    }
}

#[async_trait]
impl LedgerApi for HorizonClient {
    async fn list_operations(
        &self,
        account_id: &str,
        query: &ListQuery,
    ) -> Result<Page, LedgerError> {
        let url = self.payments_url(account_id, query)?;
        let raw: HalPage<RawOperation> = self.get_json(url).await?;
        decode_payments_page(raw)
    }

    async fn next_page(&self, cursor: &PageCursor) -> Result<Page, LedgerError> {
        let url = Url::parse(cursor.as_str())
            .map_err(|e| LedgerError::Decode(format!("bad next link: {e}")))?;
        let raw: HalPage<RawOperation> = self.get_json(url).await?;
        decode_payments_page(raw)
    }

    async fn get_detail(&self, detail_ref: &str) -> Result<TransactionDetail, LedgerError> {
        let url = self.endpoint(&format!("transactions/{detail_ref}"))?;
        let raw: RawTransaction = self.get_json(url).await?;
        Ok(decode_transaction(raw))
    }

    async fn get_account_sub_state(
        &self,
        account_id: &str,
    ) -> Result<TrustlineSnapshot, LedgerError> {
        let url = self.endpoint(&format!("accounts/{account_id}"))?;
        let raw: RawAccount = self.get_json(url).await?;
        decode_account(raw)
    }
}

// ---------------------------------------------------------------------------
// HAL wire format

#[derive(Debug, Deserialize)]
pub struct HalPage<T> {
    #[serde(rename = "_embedded")]
    embedded: HalEmbedded<T>,
    #[serde(rename = "_links", default)]
    links: Option<HalLinks>,
}

#[derive(Debug, Deserialize)]
struct HalEmbedded<T> {
    records: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HalLinks {
    next: Option<HalLink>,
}

#[derive(Debug, Deserialize)]
struct HalLink {
    href: String,
}

#[derive(Debug, Deserialize)]
pub struct RawOperation {
    id: String,
    #[serde(rename = "type")]
    type_name: String,
    created_at: String,
    transaction_hash: String,
    #[serde(default)]
    transaction: Option<RawTransaction>,
    #[serde(default)]
    account: Option<String>,
    #[serde(default)]
    starting_balance: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    asset_type: Option<String>,
    #[serde(default)]
    asset_code: Option<String>,
    #[serde(default)]
    asset_issuer: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawTransaction {
    hash: String,
    #[serde(default)]
    memo: Option<String>,
    #[serde(default)]
    memo_type: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawAccount {
    id: String,
    #[serde(default)]
    sequence: String,
    balances: Vec<RawBalance>,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    asset_type: String,
    balance: String,
    #[serde(default)]
    limit: Option<String>,
    #[serde(default)]
    buying_liabilities: Option<String>,
    #[serde(default)]
    selling_liabilities: Option<String>,
    #[serde(default)]
    asset_code: Option<String>,
    #[serde(default)]
    asset_issuer: Option<String>,
    #[serde(default)]
    is_authorized: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct Problem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    extras: Option<ProblemExtras>,
}

#[derive(Debug, Default, Deserialize)]
struct ProblemExtras {
    #[serde(default)]
    result_codes: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// decoding

pub fn decode_payments_page(raw: HalPage<RawOperation>) -> Result<Page, LedgerError> {
    let records = raw
        .embedded
        .records
        .into_iter()
        .map(decode_operation)
        .collect::<Result<Vec<_>, _>>()?;
    let next = raw
        .links
        .and_then(|links| links.next)
        .map(|link| PageCursor(link.href));
    Ok(Page::new(records, next))
}

fn decode_operation(raw: RawOperation) -> Result<OperationRecord, LedgerError> {
    let created_at = parse_timestamp(&raw.created_at)
        .ok_or_else(|| LedgerError::Decode(format!("bad created_at on {}", raw.id)))?;
    let memo = raw.transaction.as_ref().map_or(MemoState::Missing, |tx| {
        MemoState::Embedded(tx.memo.clone())
    });
    let kind = decode_kind(&raw);

    Ok(OperationRecord {
        id: raw.id,
        created_at,
        detail_ref: raw.transaction_hash,
        memo,
        kind,
    })
}

/// Unrecognised or malformed shapes degrade to `Other` (contributes nothing)
fn decode_kind(raw: &RawOperation) -> OperationKind {
    let other = || OperationKind::Other {
        type_name: raw.type_name.clone(),
    };
    match raw.type_name.as_str() {
        "create_account" => match (&raw.account, parse_amount(raw.starting_balance.as_deref())) {
            (Some(account), Some(starting_balance)) => OperationKind::CreateAccount {
                account: account.clone(),
                starting_balance,
            },
            _ => other(),
        },
        "payment" => match (&raw.to, parse_amount(raw.amount.as_deref()), decode_asset(raw)) {
            (Some(to), Some(amount), Some(asset)) => OperationKind::Payment {
                to: to.clone(),
                asset,
                amount,
            },
            _ => other(),
        },
        "path_payment_strict_receive" | "path_payment_strict_send" | "path_payment" => {
            match (&raw.to, parse_amount(raw.amount.as_deref()), decode_asset(raw)) {
                (Some(to), Some(amount), Some(dest_asset)) => OperationKind::PathPayment {
                    to: to.clone(),
                    dest_asset,
                    amount,
                },
                _ => other(),
            }
        }
        _ => other(),
    }
}

fn decode_asset(raw: &RawOperation) -> Option<AssetKind> {
    match raw.asset_type.as_deref()? {
        "native" => Some(AssetKind::Native),
        _ => Some(AssetKind::Credit {
            code: raw.asset_code.clone()?,
            issuer: raw.asset_issuer.clone()?,
        }),
    }
}

pub fn decode_transaction(raw: RawTransaction) -> TransactionDetail {
    TransactionDetail {
        hash: raw.hash,
        memo: raw.memo,
        memo_type: raw.memo_type,
        created_at: raw.created_at.as_deref().and_then(parse_timestamp),
    }
}

pub fn decode_account(raw: RawAccount) -> Result<TrustlineSnapshot, LedgerError> {
    let mut native_balance = Decimal::ZERO;
    let mut trustlines = Vec::new();

    for balance in raw.balances {
        let amount = parse_required(&balance.balance, "balance")?;
        match balance.asset_type.as_str() {
            "native" => native_balance = amount,
            // pool shares have no code/issuer and are not trustlines we manage
            "liquidity_pool_shares" => {}
            _ => {
                let (Some(asset_code), Some(asset_issuer)) =
                    (balance.asset_code, balance.asset_issuer)
                else {
                    continue;
                };
                trustlines.push(Trustline {
                    asset_code,
                    asset_issuer,
                    asset_type: balance.asset_type,
                    balance: amount,
                    limit: parse_amount(balance.limit.as_deref()).unwrap_or_default(),
                    buying_liabilities: parse_amount(balance.buying_liabilities.as_deref())
                        .unwrap_or_default(),
                    selling_liabilities: parse_amount(balance.selling_liabilities.as_deref())
                        .unwrap_or_default(),
                    is_authorized: balance.is_authorized.unwrap_or(true),
                });
            }
        }
    }

    let summary = AccountSummary {
        native_balance,
        trustline_count: trustlines.len(),
        sequence: raw.sequence,
    };
    Ok(TrustlineSnapshot {
        account_id: raw.id,
        trustlines,
        summary,
    })
}

/// Map a non-2xx Horizon response (problem+json) to a [`LedgerError`]
pub fn problem_to_error(status: StatusCode, body: &str, retry_after: Option<Duration>) -> LedgerError {
    let problem: Problem = serde_json::from_str(body).unwrap_or_default();
    let message = problem
        .detail
        .or(problem.title)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());

    LedgerError::Http {
        status: status.as_u16(),
        message,
        result_codes: problem.extras.and_then(|extras| extras.result_codes),
        retry_after,
    }
}

fn transport_error(error: reqwest::Error) -> LedgerError {
    if error.is_decode() {
        return LedgerError::Decode(error.to_string());
    }
    LedgerError::Transport {
        message: error.to_string(),
        timeout: error.is_timeout(),
        connect: error.is_connect(),
    }
}

/// `Retry-After` in delta-seconds; HTTP-date values are ignored
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn parse_amount(value: Option<&str>) -> Option<Decimal> {
    value.and_then(|v| Decimal::from_str(v).ok())
}

fn parse_required(value: &str, field: &str) -> Result<Decimal, LedgerError> {
    Decimal::from_str(value).map_err(|e| LedgerError::Decode(format!("bad {field} {value:?}: {e}")))
}
