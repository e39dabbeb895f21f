//! Store key layout.
//!
//! These formats are shared with records already written by other services
//! and must not change:
//!
//! ```text
//! {prefix}:daily:{YYYY-MM-DD}:{ownerType}:{ownerId}
//! {prefix}:monthly:{YYYY-MM}:{ownerType}:{ownerId}
//! {prefix}:usage:{ownerType}:{ownerId}
//! {prefix}:usage:month:{ownerType}:{ownerId}:{YYYYMM}
//! ai:credits:user:{userId}:packs
//! ai:credits:consume:{userId}:{jobId}
//! ai:quota:{feature}:tenths:{userId}:{ym}
//! ai:quota:{feature}:tx:{userId}:{ym}:{txKey}
//! ```

use serde::{Deserialize, Serialize};

/// The subject a usage counter belongs to, e.g. `user:42` or `ip:10.0.0.1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
    /// Kind of subject (`user`, `ip`, `org`, ...)
    pub owner_type: String,
    /// Identifier within that kind
    pub owner_id: String,
}

impl Owner {
    /// Create a new owner.
    pub fn new(owner_type: &str, owner_id: &str) -> Self {
        Self {
            owner_type: owner_type.to_string(),
            owner_id: owner_id.to_string(),
        }
    }
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.owner_type, self.owner_id)
    }
}

/// Key for a counter aligned to a UTC day.
pub fn daily_key(prefix: &str, day: &str, owner: &Owner) -> String {
    format!("{}:daily:{}:{}", prefix, day, owner)
}

/// Key for a counter aligned to a UTC month.
pub fn monthly_key(prefix: &str, month: &str, owner: &Owner) -> String {
    format!("{}:monthly:{}:{}", prefix, month, owner)
}

/// Key for a rolling-window counter.
pub fn rolling_key(prefix: &str, owner: &Owner) -> String {
    format!("{}:usage:{}", prefix, owner)
}

/// Key for a legacy monthly counter without expiry.
pub fn legacy_monthly_key(prefix: &str, owner: &Owner, compact_month: &str) -> String {
    format!("{}:usage:month:{}:{}", prefix, owner, compact_month)
}

/// Key holding a user's credit pack list.
pub fn credit_packs_key(user_id: &str) -> String {
    format!("ai:credits:user:{}:packs", user_id)
}

/// Key holding the receipt of one consumption job.
pub fn consumption_key(user_id: &str, job_id: &str) -> String {
    format!("ai:credits:consume:{}:{}", user_id, job_id)
}

/// Key holding tenths used in a quota period.
pub fn quota_usage_key(feature: &str, user_id: &str, period: &str) -> String {
    format!("ai:quota:{}:tenths:{}:{}", feature, user_id, period)
}

/// Marker key recording that a quota transaction was applied.
pub fn quota_tx_key(feature: &str, user_id: &str, period: &str, tx_key: &str) -> String {
    format!("ai:quota:{}:tx:{}:{}:{}", feature, user_id, period, tx_key)
}
