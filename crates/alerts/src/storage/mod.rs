//! Alert persistence.

mod file;
mod ledger;
mod memory;
mod traits;

pub use file::{FileAlertStore, LEDGER_FILE};
pub use memory::MemoryAlertStore;
pub use traits::AlertStore;
