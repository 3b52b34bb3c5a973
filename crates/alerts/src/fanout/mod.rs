//! Fanout of stored alerts to nearby subscribers.
//!
//! One alert becomes one [`DeliveryIntent`](crate::entities::DeliveryIntent)
//! per recipient. Each intent is recorded in a [`DeliveryStore`] before it is
//! driven, delivered independently with exponential backoff, and ends either
//! Sent or Exhausted.

mod book;
mod dispatcher;
mod ledger;
mod retry;
mod store;

pub use dispatcher::{DispatchHandle, DispatchReport, FanoutDispatcher};
pub use ledger::DeliveryLedger;
pub use retry::RetryPolicy;
pub use store::{DeliveryStore, FileDeliveryStore, MemoryDeliveryStore, DELIVERIES_FILE};
