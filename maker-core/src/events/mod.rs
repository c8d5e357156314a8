//! The Notifier: publishes best-effort-latest engine snapshots to subscribers
//! (spec §4.2).

pub mod bus;
pub mod types;

pub use bus::{Notifier, SharedNotifier};
pub use types::EngineSnapshot;
