//! Usage ledger: running token and cost totals across turns.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::usage::{Cost, Usage, UsageSource};

/// Requests per day assumed by [`UsageLedger::default_projection`].
pub const DEFAULT_REQUESTS_PER_DAY: f64 = 24.0;

/// Snapshot of ledger totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerTotals {
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost_usd: f64,
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub total_requests: u64,
    pub exact_requests: u64,
    pub estimated_requests: u64,
}

/// Forward-looking cost estimate derived from the average request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostProjection {
    pub average_cost_per_request: f64,
    pub daily: f64,
    pub monthly: f64,
}

/// Tracks cumulative usage and cost across turns.
///
/// Cloning shares the underlying totals, so one ledger can be handed to
/// several sessions when a process-wide view is wanted. Nothing is ever
/// written to disk.
#[derive(Clone)]
pub struct UsageLedger {
    inner: Arc<RwLock<LedgerInner>>,
}

struct LedgerInner {
    totals: LedgerTotals,
    since: DateTime<Utc>,
}

impl Default for UsageLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageLedger {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(LedgerInner {
                totals: LedgerTotals::default(),
                since: Utc::now(),
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one turn's usage. Call exactly once per turn.
    pub fn record(&self, usage: &Usage, cost: &Cost, source: UsageSource) {
        let mut inner = self.write();
        let totals = &mut inner.totals;
        totals.input_tokens += usage.input_tokens;
        totals.output_tokens += usage.output_tokens;
        totals.total_tokens += usage.total_tokens();
        totals.input_cost_usd += cost.input_cost;
        totals.output_cost_usd += cost.output_cost;
        totals.total_cost_usd += cost.total_cost;
        totals.total_requests += 1;
        match source {
            UsageSource::Exact => totals.exact_requests += 1,
            UsageSource::Estimated => totals.estimated_requests += 1,
        }
    }

    pub fn totals(&self) -> LedgerTotals {
        self.read().totals.clone()
    }

    /// When the ledger was created or last reset.
    pub fn since(&self) -> DateTime<Utc> {
        self.read().since
    }

    pub fn average_cost_per_request(&self) -> f64 {
        let inner = self.read();
        let totals = &inner.totals;
        if totals.total_requests == 0 {
            0.0
        } else {
            totals.total_cost_usd / totals.total_requests as f64
        }
    }

    /// Project daily and monthly (30-day) spend at the given request rate.
    pub fn projection(&self, requests_per_day: f64) -> CostProjection {
        let average = self.average_cost_per_request();
        let daily = average * requests_per_day;
        CostProjection {
            average_cost_per_request: average,
            daily,
            monthly: daily * 30.0,
        }
    }

    pub fn default_projection(&self) -> CostProjection {
        self.projection(DEFAULT_REQUESTS_PER_DAY)
    }

    /// Reset all totals to zero.
    pub fn reset(&self) {
        let mut inner = self.write();
        inner.totals = LedgerTotals::default();
        inner.since = Utc::now();
    }
}
