//! Trustline snapshot model
//!
//! A [`TrustlineSnapshot`] is the live sub-state of one account at the time it
//! was fetched. The mutation engine reads it between refreshes and never
//! writes to it.

use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::ports::Eligibility;

/// Identity of a trustline on one account: asset code + issuer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustlineKey {
    pub asset_code: String,
    pub asset_issuer: String,
}

impl TrustlineKey {
    pub fn new(asset_code: impl Into<String>, asset_issuer: impl Into<String>) -> Self {
        Self {
            asset_code: asset_code.into(),
            asset_issuer: asset_issuer.into(),
        }
    }
}

impl std::fmt::Display for TrustlineKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.asset_code, self.asset_issuer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trustline {
    pub asset_code: String,
    pub asset_issuer: String,
    /// `credit_alphanum4` / `credit_alphanum12`
    pub asset_type: String,
    pub balance: Decimal,
    pub limit: Decimal,
    pub buying_liabilities: Decimal,
    pub selling_liabilities: Decimal,
    pub is_authorized: bool,
}

impl Trustline {
    pub fn key(&self) -> TrustlineKey {
        TrustlineKey::new(&self.asset_code, &self.asset_issuer)
    }

    pub fn is_native(&self) -> bool {
        self.asset_type == "native"
    }

    /// Removable: non-native, zero balance, no open liabilities
    pub fn is_removable(&self) -> bool {
        !self.is_native()
            && self.balance.is_zero()
            && self.buying_liabilities.is_zero()
            && self.selling_liabilities.is_zero()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub native_balance: Decimal,
    pub trustline_count: usize,
    pub sequence: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustlineSnapshot {
    pub account_id: String,
    pub trustlines: Vec<Trustline>,
    pub summary: AccountSummary,
}

impl TrustlineSnapshot {
    pub fn find(&self, key: &TrustlineKey) -> Option<&Trustline> {
        self.trustlines
            .iter()
            .find(|t| t.asset_code == key.asset_code && t.asset_issuer == key.asset_issuer)
    }

    pub fn removable(&self) -> Vec<&Trustline> {
        self.trustlines.iter().filter(|t| t.is_removable()).collect()
    }

    /// Trustlines this account shares (same code and issuer) with `other`
    pub fn common_with(&self, other: &Self) -> Vec<TrustlineKey> {
        let theirs: HashSet<TrustlineKey> = other.trustlines.iter().map(Trustline::key).collect();
        let mut common: Vec<TrustlineKey> = self
            .trustlines
            .iter()
            .map(Trustline::key)
            .filter(|key| theirs.contains(key))
            .collect();
        common.sort();
        common.dedup();
        common
    }
}

impl Eligibility<TrustlineKey> for TrustlineSnapshot {
    fn is_eligible(&self, candidate: &TrustlineKey) -> bool {
        self.find(candidate).is_some_and(Trustline::is_removable)
    }
}

impl Eligibility<Trustline> for TrustlineSnapshot {
    fn is_eligible(&self, candidate: &Trustline) -> bool {
        self.is_eligible(&candidate.key())
    }
}
