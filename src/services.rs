//! Wiring of the counters and ledgers over one store.

use std::sync::Arc;

use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::LedgerConfig;
use crate::credits::CreditLedger;
use crate::error::Result;
use crate::quota::MonthlyQuota;
use crate::store::{FileStore, KvStore, MemoryStore};
use crate::usage::UsageLimiter;

/// The counters and ledgers sharing one store and clock.
pub struct Services {
    pub limiter: UsageLimiter,
    pub credits: CreditLedger,
    pub quota: MonthlyQuota,
}

impl Services {
    /// Build every component over `store` and `clock`.
    pub fn new(config: &LedgerConfig, store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            limiter: UsageLimiter::new(store.clone(), clock.clone(), config.counters.clone()),
            credits: CreditLedger::new(store.clone(), clock.clone(), config.credits.clone()),
            quota: MonthlyQuota::new(store, clock, config.quota.clone()),
        }
    }

    /// Build over the store named by the configuration, using wall-clock time.
    ///
    /// With `store.data_path` set the state is kept in that snapshot file,
    /// otherwise it lives only as long as the process.
    pub async fn from_config(config: &LedgerConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store: Arc<dyn KvStore> = match &config.store.data_path {
            Some(path) => {
                let store = FileStore::open(path, clock.clone()).await?;
                info!(path = %store.path().display(), "Using file-backed store");
                Arc::new(store)
            }
            None => {
                info!("Using in-memory store");
                Arc::new(MemoryStore::new(clock.clone()))
            }
        };
        Ok(Self::new(config, store, clock))
    }
}
