//! Credit pack and consumption receipt records.
//!
//! All amounts are integer tenths of a credit.

use serde::{Deserialize, Serialize};

/// A block of prepaid credit with its own expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditPack {
    /// Idempotency key of the grant, e.g. the purchase session id
    pub id: String,
    /// Tenths still available in this pack
    pub units_tenths: u64,
    /// Unix milliseconds the pack was granted
    pub created_at: i64,
    /// Unix milliseconds after which the pack is no longer spendable
    pub expires_at: i64,
}

impl CreditPack {
    /// Whether the pack can still be spent at `now_ms`.
    pub fn is_active(&self, now_ms: i64) -> bool {
        self.units_tenths > 0 && self.expires_at > now_ms
    }
}

/// Tenths taken from one pack by a consumption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackUsage {
    pub pack_id: String,
    pub used_tenths: u64,
}

/// Durable receipt of one consumption job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumptionRecord {
    /// Tenths the caller asked for
    pub total_requested_tenths: u64,
    /// Tenths actually debited; less than requested when the balance ran out
    pub total_consumed_tenths: u64,
    /// Active balance left after the debit
    pub remaining_tenths: u64,
    /// Per-pack debits in consumption order
    pub breakdown: Vec<PackUsage>,
    /// True when this record was returned from a replay of the same job
    #[serde(default)]
    pub idempotent: bool,
}

impl ConsumptionRecord {
    /// Whether the whole requested amount was debited.
    pub fn is_fully_satisfied(&self) -> bool {
        self.total_consumed_tenths >= self.total_requested_tenths
    }

    /// Tenths requested but not covered by any pack.
    pub fn shortfall_tenths(&self) -> u64 {
        self.total_requested_tenths
            .saturating_sub(self.total_consumed_tenths)
    }
}

/// Spendable packs at `now_ms`, oldest first.
pub fn active_packs(packs: &[CreditPack], now_ms: i64) -> Vec<CreditPack> {
    let mut active: Vec<CreditPack> = packs
        .iter()
        .filter(|pack| pack.is_active(now_ms))
        .cloned()
        .collect();
    active.sort_by_key(|pack| pack.created_at);
    active
}

/// Sum of the packs' tenths, saturating at `u64::MAX`.
pub fn total_tenths(packs: &[CreditPack]) -> u64 {
    packs
        .iter()
        .fold(0u64, |acc, pack| acc.saturating_add(pack.units_tenths))
}

/// Greedily take `amount_tenths` from `active` in order.
///
/// Stops when the amount is covered or the packs run out; packs that
/// contribute nothing are left out of the breakdown.
pub fn plan_consumption(active: &[CreditPack], amount_tenths: u64) -> Vec<PackUsage> {
    let mut needed = amount_tenths;
    let mut breakdown = Vec::new();

    for pack in active {
        if needed == 0 {
            break;
        }
        let used = pack.units_tenths.min(needed);
        if used == 0 {
            continue;
        }
        needed -= used;
        breakdown.push(PackUsage {
            pack_id: pack.id.clone(),
            used_tenths: used,
        });
    }

    breakdown
}
