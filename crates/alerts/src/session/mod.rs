//! Identity sessions and phone verification.

mod manager;
mod store;
mod verification;

pub use manager::SessionManager;
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
pub use verification::{normalize_phone, LogVerificationSender, VerificationSender};
