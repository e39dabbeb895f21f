//! Monthly quota ledger in tenths.
//!
//! One plain integer per user and period holds the tenths used. Periods are
//! chosen by the caller (normally `YYYYMM`), so rollover is simply a new key;
//! old period keys are never cleaned up.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::calendar;
use crate::clock::Clock;
use crate::config::QuotaConfig;
use crate::error::{LedgerError, Result};
use crate::keys;
use crate::store::KvStore;

/// Value written under a transaction marker key.
const TX_MARKER: &str = "1";

/// Per-user, per-period usage quota with idempotent transactions.
///
/// The usage key is written before the transaction marker. A retry with the
/// same `tx_key` after both writes is a no-op; concurrent first attempts with
/// the same `tx_key` can both apply.
pub struct MonthlyQuota {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    config: QuotaConfig,
}

impl MonthlyQuota {
    /// Create a new quota ledger over `store`.
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: QuotaConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// The `YYYYMM` period containing now.
    pub fn current_period(&self) -> String {
        calendar::compact_month_tag(self.clock.now())
    }

    /// Tenths used in `period`. Missing or unparseable values count as zero.
    pub async fn get_used(&self, user_id: &str, period: &str) -> Result<u64> {
        let key = keys::quota_usage_key(&self.config.feature, user_id, period);
        let used = match self.store.get(&key).await? {
            Some(raw) => raw.trim().parse::<u64>().unwrap_or_else(|e| {
                warn!(key = %key, value = %raw, error = %e, "Malformed quota usage, treating as zero");
                0
            }),
            None => 0,
        };
        trace!(key = %key, used = used, "Read quota usage");
        Ok(used)
    }

    /// Tenths still available in `period` under `limit_tenths`.
    pub async fn get_remaining(&self, user_id: &str, limit_tenths: u64, period: &str) -> Result<u64> {
        let used = self.get_used(user_id, period).await?;
        Ok(limit_tenths.saturating_sub(used))
    }

    /// Record `amount_tenths` of usage for transaction `tx_key`.
    ///
    /// Fails with [`LedgerError::QuotaExceeded`] when the period total would
    /// pass `limit_tenths`; in that case nothing is written and the call can be
    /// retried. A `tx_key` that was already applied in `period` succeeds
    /// without applying again.
    pub async fn consume(
        &self,
        user_id: &str,
        limit_tenths: u64,
        amount_tenths: u64,
        period: &str,
        tx_key: &str,
    ) -> Result<()> {
        let marker_key = keys::quota_tx_key(&self.config.feature, user_id, period, tx_key);
        if self.store.get(&marker_key).await?.is_some() {
            debug!(user_id = %user_id, period = %period, tx_key = %tx_key, "Quota transaction already applied");
            return Ok(());
        }

        let used = self.get_used(user_id, period).await?;
        let next = used.saturating_add(amount_tenths);
        if next > limit_tenths {
            warn!(
                user_id = %user_id,
                period = %period,
                used = used,
                requested = amount_tenths,
                limit = limit_tenths,
                "Monthly quota exceeded"
            );
            return Err(LedgerError::QuotaExceeded {
                used,
                requested: amount_tenths,
                limit: limit_tenths,
            });
        }

        let usage_key = keys::quota_usage_key(&self.config.feature, user_id, period);
        self.store.put(&usage_key, &next.to_string(), None).await?;
        self.store.put(&marker_key, TX_MARKER, None).await?;

        debug!(
            user_id = %user_id,
            period = %period,
            tx_key = %tx_key,
            used = next,
            limit = limit_tenths,
            "Consumed monthly quota"
        );
        Ok(())
    }
}
