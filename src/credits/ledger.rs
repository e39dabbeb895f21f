//! Credit pack ledger over the key-value store.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::pack::{
    active_packs, plan_consumption, total_tenths, ConsumptionRecord, CreditPack, PackUsage,
};
use crate::calendar;
use crate::clock::Clock;
use crate::config::CreditConfig;
use crate::error::Result;
use crate::keys;
use crate::store::{self, KvStore};

/// Per-user ledger of expiring credit packs, spent oldest first.
///
/// A user's packs live in one JSON array that is rewritten in full on every
/// change, with no coordination between writers. Two concurrent mutations for
/// the same user can overwrite each other.
///
/// Idempotency keys (`pack_id`, `job_id`) make sequential retries safe. They
/// do not protect against two *concurrent* first attempts with the same key;
/// callers derive those keys from a single upstream event so this does not
/// happen. If the pack list is written but the receipt write then fails, the
/// debit has happened without a receipt and a retry debits again.
pub struct CreditLedger {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    config: CreditConfig,
}

impl CreditLedger {
    /// Create a new ledger over `store`.
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: CreditConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Expiry of a pack granted at `created_at_ms`.
    pub fn expiry_for(&self, created_at_ms: i64) -> i64 {
        calendar::pack_expiry_ms(
            created_at_ms,
            self.config.validity_months,
            self.config.grace_days,
        )
    }

    /// Grant a pack of `units_tenths` to the user.
    ///
    /// A pack whose id already exists is left untouched, so redelivered
    /// purchase events do not grant twice. Returns the user's full pack list.
    pub async fn add_credit_pack(
        &self,
        user_id: &str,
        pack_id: &str,
        units_tenths: u64,
        created_at_ms: Option<i64>,
    ) -> Result<Vec<CreditPack>> {
        let key = keys::credit_packs_key(user_id);
        let mut packs = self.list_packs(user_id).await?;

        if packs.iter().any(|pack| pack.id == pack_id) {
            debug!(user_id = %user_id, pack_id = %pack_id, "Credit pack already granted, skipping");
            return Ok(packs);
        }

        let created_at = created_at_ms.unwrap_or_else(|| self.clock.now_millis());
        let pack = CreditPack {
            id: pack_id.to_string(),
            units_tenths,
            created_at,
            expires_at: self.expiry_for(created_at),
        };
        info!(
            user_id = %user_id,
            pack_id = %pack_id,
            units_tenths = units_tenths,
            expires_at = pack.expires_at,
            "Granting credit pack"
        );

        packs.push(pack);
        store::put_json(self.store.as_ref(), &key, &packs, None).await?;
        Ok(packs)
    }

    /// Every pack ever granted to the user, including spent and expired ones.
    pub async fn list_packs(&self, user_id: &str) -> Result<Vec<CreditPack>> {
        let key = keys::credit_packs_key(user_id);
        let packs: Option<Vec<CreditPack>> = store::get_json(self.store.as_ref(), &key).await?;
        Ok(packs.unwrap_or_default())
    }

    /// Spendable packs, oldest first.
    pub async fn list_active_packs(
        &self,
        user_id: &str,
        now_ms: Option<i64>,
    ) -> Result<Vec<CreditPack>> {
        let now_ms = now_ms.unwrap_or_else(|| self.clock.now_millis());
        let packs = self.list_packs(user_id).await?;
        Ok(active_packs(&packs, now_ms))
    }

    /// Spendable tenths across all active packs.
    pub async fn get_balance(&self, user_id: &str, now_ms: Option<i64>) -> Result<u64> {
        let active = self.list_active_packs(user_id, now_ms).await?;
        Ok(total_tenths(&active))
    }

    /// The stored receipt for a job, if the job has been consumed.
    pub async fn get_consumption(
        &self,
        user_id: &str,
        job_id: &str,
    ) -> Result<Option<ConsumptionRecord>> {
        let key = keys::consumption_key(user_id, job_id);
        store::get_json(self.store.as_ref(), &key).await
    }

    /// Debit `amount_tenths` for `job_id`, oldest packs first.
    ///
    /// A job that already has a receipt is not debited again; its stored
    /// receipt is returned with `idempotent` set. An insufficient balance is
    /// not an error: the available tenths are debited and the receipt reports
    /// `total_consumed_tenths < total_requested_tenths`.
    pub async fn consume(
        &self,
        user_id: &str,
        amount_tenths: u64,
        job_id: &str,
        now_ms: Option<i64>,
    ) -> Result<ConsumptionRecord> {
        let record_key = keys::consumption_key(user_id, job_id);
        if let Some(mut record) = self.get_consumption(user_id, job_id).await? {
            debug!(user_id = %user_id, job_id = %job_id, "Replaying stored consumption");
            record.idempotent = true;
            return Ok(record);
        }

        let now_ms = now_ms.unwrap_or_else(|| self.clock.now_millis());
        let active = self.list_active_packs(user_id, Some(now_ms)).await?;
        let balance = total_tenths(&active);
        let breakdown = plan_consumption(&active, amount_tenths);
        let consumed = breakdown
            .iter()
            .fold(0u64, |acc, usage| acc.saturating_add(usage.used_tenths));

        if !breakdown.is_empty() {
            self.debit_packs(user_id, &breakdown).await?;
        }

        let record = ConsumptionRecord {
            total_requested_tenths: amount_tenths,
            total_consumed_tenths: consumed,
            remaining_tenths: balance.saturating_sub(consumed),
            breakdown,
            idempotent: false,
        };
        store::put_json(self.store.as_ref(), &record_key, &record, None).await?;

        if record.is_fully_satisfied() {
            debug!(
                user_id = %user_id,
                job_id = %job_id,
                consumed_tenths = consumed,
                remaining_tenths = record.remaining_tenths,
                "Consumed credits"
            );
        } else {
            warn!(
                user_id = %user_id,
                job_id = %job_id,
                requested_tenths = amount_tenths,
                consumed_tenths = consumed,
                "Credit balance insufficient, consumed partially"
            );
        }

        Ok(record)
    }

    /// Re-read the pack list and subtract each planned debit from its pack.
    async fn debit_packs(&self, user_id: &str, breakdown: &[PackUsage]) -> Result<()> {
        let key = keys::credit_packs_key(user_id);
        let used: HashMap<&str, u64> = breakdown
            .iter()
            .map(|usage| (usage.pack_id.as_str(), usage.used_tenths))
            .collect();

        let mut packs = self.list_packs(user_id).await?;
        for pack in packs.iter_mut() {
            if let Some(&tenths) = used.get(pack.id.as_str()) {
                trace!(pack_id = %pack.id, before = pack.units_tenths, used = tenths, "Debiting pack");
                pack.units_tenths = pack.units_tenths.saturating_sub(tenths);
            }
        }

        store::put_json(self.store.as_ref(), &key, &packs, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::LedgerError;
    use crate::store::testing::UnavailableStore;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};

    const DAY_MS: i64 = 86_400_000;

    struct Fixture {
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        ledger: CreditLedger,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let ledger = CreditLedger::new(store.clone(), clock.clone(), CreditConfig::default());
        Fixture {
            clock,
            store,
            ledger,
        }
    }

    /// Write packs directly, bypassing the grant path, to control expiry.
    async fn seed(f: &Fixture, user_id: &str, packs: &[CreditPack]) {
        store::put_json(f.store.as_ref(), &keys::credit_packs_key(user_id), packs, None)
            .await
            .unwrap();
    }

    fn pack(id: &str, units: u64, created_at: i64, expires_at: i64) -> CreditPack {
        CreditPack {
            id: id.to_string(),
            units_tenths: units,
            created_at,
            expires_at,
        }
    }

    #[tokio::test]
    async fn test_add_pack_sets_expiry() {
        let f = fixture();
        let created = Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap();

        let packs = f
            .ledger
            .add_credit_pack("u1", "cs_1", 100, Some(created.timestamp_millis()))
            .await
            .unwrap();

        assert_eq!(packs.len(), 1);
        assert_eq!(packs[0].created_at, created.timestamp_millis());
        assert_eq!(
            packs[0].expires_at,
            Utc.with_ymd_and_hms(2024, 8, 14, 12, 0, 0)
                .unwrap()
                .timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_add_pack_defaults_to_now() {
        let f = fixture();
        let packs = f.ledger.add_credit_pack("u1", "cs_1", 10, None).await.unwrap();
        assert_eq!(packs[0].created_at, f.clock.now_millis());
    }

    #[tokio::test]
    async fn test_add_pack_is_idempotent() {
        let f = fixture();
        f.ledger.add_credit_pack("u1", "cs_1", 100, None).await.unwrap();
        let packs = f.ledger.add_credit_pack("u1", "cs_1", 999, None).await.unwrap();

        assert_eq!(packs.len(), 1);
        assert_eq!(packs[0].units_tenths, 100);
        assert_eq!(f.ledger.get_balance("u1", None).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_pack_ids_are_scoped_per_user() {
        let f = fixture();
        f.ledger.add_credit_pack("u1", "cs_1", 100, None).await.unwrap();
        f.ledger.add_credit_pack("u2", "cs_1", 40, None).await.unwrap();

        assert_eq!(f.ledger.get_balance("u1", None).await.unwrap(), 100);
        assert_eq!(f.ledger.get_balance("u2", None).await.unwrap(), 40);
    }

    #[tokio::test]
    async fn test_consume_scenario_spans_two_packs() {
        let f = fixture();
        let now = f.clock.now_millis();
        seed(
            &f,
            "u1",
            &[
                pack("A", 50, now - 2 * DAY_MS, now + DAY_MS),
                pack("B", 30, now - DAY_MS, now + 10 * DAY_MS),
            ],
        )
        .await;

        let record = f.ledger.consume("u1", 60, "jobX", None).await.unwrap();

        assert_eq!(record.total_requested_tenths, 60);
        assert_eq!(record.total_consumed_tenths, 60);
        assert_eq!(record.remaining_tenths, 20);
        assert!(!record.idempotent);
        let breakdown: Vec<(&str, u64)> = record
            .breakdown
            .iter()
            .map(|u| (u.pack_id.as_str(), u.used_tenths))
            .collect();
        assert_eq!(breakdown, vec![("A", 50), ("B", 10)]);

        let packs = f.ledger.list_packs("u1").await.unwrap();
        assert_eq!(packs[0].units_tenths, 0);
        assert_eq!(packs[1].units_tenths, 20);
    }

    #[tokio::test]
    async fn test_consume_fifo_touches_oldest_only() {
        let f = fixture();
        let now = f.clock.now_millis();
        // Stored newest first to show ordering comes from createdAt
        seed(
            &f,
            "u1",
            &[
                pack("newer", 40, now - DAY_MS, now + 30 * DAY_MS),
                pack("older", 40, now - 5 * DAY_MS, now + 30 * DAY_MS),
            ],
        )
        .await;

        let record = f.ledger.consume("u1", 15, "job1", None).await.unwrap();
        assert_eq!(record.breakdown.len(), 1);
        assert_eq!(record.breakdown[0].pack_id, "older");

        let packs = f.ledger.list_packs("u1").await.unwrap();
        let newer = packs.iter().find(|p| p.id == "newer").unwrap();
        let older = packs.iter().find(|p| p.id == "older").unwrap();
        assert_eq!(newer.units_tenths, 40);
        assert_eq!(older.units_tenths, 25);
    }

    #[tokio::test]
    async fn test_consume_replay_is_idempotent() {
        let f = fixture();
        f.ledger.add_credit_pack("u1", "cs_1", 100, None).await.unwrap();

        let first = f.ledger.consume("u1", 30, "job1", None).await.unwrap();
        let replay = f.ledger.consume("u1", 30, "job1", None).await.unwrap();

        assert!(!first.idempotent);
        assert!(replay.idempotent);
        assert_eq!(replay.breakdown, first.breakdown);
        assert_eq!(replay.remaining_tenths, first.remaining_tenths);
        assert_eq!(f.ledger.get_balance("u1", None).await.unwrap(), 70);
    }

    #[tokio::test]
    async fn test_replay_ignores_later_ledger_changes() {
        let f = fixture();
        f.ledger.add_credit_pack("u1", "cs_1", 100, None).await.unwrap();
        let first = f.ledger.consume("u1", 30, "job1", None).await.unwrap();

        f.ledger.add_credit_pack("u1", "cs_2", 500, None).await.unwrap();
        f.ledger.consume("u1", 10, "job2", None).await.unwrap();

        // Different amount on replay is ignored too
        let replay = f.ledger.consume("u1", 999, "job1", None).await.unwrap();
        assert_eq!(replay.total_requested_tenths, 30);
        assert_eq!(replay.remaining_tenths, first.remaining_tenths);
        assert_eq!(f.ledger.get_balance("u1", None).await.unwrap(), 560);
    }

    #[tokio::test]
    async fn test_expired_pack_is_excluded() {
        let f = fixture();
        let now = f.clock.now_millis();
        seed(
            &f,
            "u1",
            &[
                pack("stale", 80, now - 200 * DAY_MS, now),
                pack("fresh", 20, now - DAY_MS, now + DAY_MS),
            ],
        )
        .await;

        assert_eq!(f.ledger.get_balance("u1", None).await.unwrap(), 20);

        let record = f.ledger.consume("u1", 50, "job1", None).await.unwrap();
        assert_eq!(record.total_consumed_tenths, 20);
        assert_eq!(record.breakdown.len(), 1);
        assert_eq!(record.breakdown[0].pack_id, "fresh");

        let stale = f
            .ledger
            .list_packs("u1")
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.id == "stale")
            .unwrap();
        assert_eq!(stale.units_tenths, 80);
    }

    #[tokio::test]
    async fn test_pack_expires_as_clock_advances() {
        let f = fixture();
        f.ledger.add_credit_pack("u1", "cs_1", 100, None).await.unwrap();
        let expires_at = f.ledger.list_packs("u1").await.unwrap()[0].expires_at;

        assert_eq!(f.ledger.get_balance("u1", Some(expires_at - 1)).await.unwrap(), 100);
        assert_eq!(f.ledger.get_balance("u1", Some(expires_at)).await.unwrap(), 0);

        f.clock.advance(Duration::days(400));
        assert!(f.ledger.list_active_packs("u1", None).await.unwrap().is_empty());
        assert_eq!(f.ledger.list_packs("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_fulfilment_is_not_an_error() {
        let f = fixture();
        f.ledger.add_credit_pack("u1", "cs_1", 25, None).await.unwrap();

        let record = f.ledger.consume("u1", 40, "job1", None).await.unwrap();
        assert_eq!(record.total_consumed_tenths, 25);
        assert_eq!(record.shortfall_tenths(), 15);
        assert_eq!(record.remaining_tenths, 0);
        assert!(!record.is_fully_satisfied());
    }

    #[tokio::test]
    async fn test_consume_without_packs_still_records() {
        let f = fixture();
        let record = f.ledger.consume("u1", 10, "job1", None).await.unwrap();
        assert_eq!(record.total_consumed_tenths, 0);
        assert!(record.breakdown.is_empty());

        let stored = f.ledger.get_consumption("u1", "job1").await.unwrap().unwrap();
        assert_eq!(stored, record);
        // No pack list is created for an empty debit
        assert!(f
            .store
            .get(&keys::credit_packs_key("u1"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_malformed_pack_list_reads_as_empty() {
        let f = fixture();
        f.store
            .put(&keys::credit_packs_key("u1"), "{\"oops\":true}", None)
            .await
            .unwrap();

        assert_eq!(f.ledger.get_balance("u1", None).await.unwrap(), 0);
        let packs = f.ledger.add_credit_pack("u1", "cs_1", 10, None).await.unwrap();
        assert_eq!(packs.len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_grants_saturate_balance() {
        let f = fixture();
        let half = u64::MAX / 2 + 1;
        f.ledger.add_credit_pack("u1", "a", half, None).await.unwrap();
        f.clock.advance(Duration::seconds(1));
        f.ledger.add_credit_pack("u1", "b", half, None).await.unwrap();

        assert_eq!(f.ledger.get_balance("u1", None).await.unwrap(), u64::MAX);

        let record = f.ledger.consume("u1", 10, "job1", None).await.unwrap();
        assert_eq!(record.total_consumed_tenths, 10);
        assert_eq!(record.remaining_tenths, u64::MAX - 10);
        assert_eq!(record.breakdown[0].pack_id, "a");
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let clock = Arc::new(ManualClock::from_millis(0));
        let ledger = CreditLedger::new(Arc::new(UnavailableStore), clock, CreditConfig::default());

        let err = ledger.consume("u1", 10, "job1", None).await.unwrap_err();
        assert!(matches!(err, LedgerError::StorageUnavailable(_)));
        let err = ledger.get_balance("u1", None).await.unwrap_err();
        assert!(matches!(err, LedgerError::StorageUnavailable(_)));
    }
}
