//! Credit packs and FIFO consumption.

mod ledger;
mod pack;

pub use ledger::CreditLedger;
pub use pack::{
    active_packs, plan_consumption, total_tenths, ConsumptionRecord, CreditPack, PackUsage,
};
