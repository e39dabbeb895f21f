//! Usage counting and admission decisions.

mod counter;
mod limiter;

pub use counter::{CalendarWindow, CounterDecision, LegacyDecision, LegacyUsage, UsageCounter};
pub use limiter::UsageLimiter;
