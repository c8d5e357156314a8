//! Notifier payload types (spec §4.2).

use crate::state::{EngineStateSnapshot, MakerConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What `subscribe` delivers. The Notifier is best-effort-latest: slow
/// consumers miss intermediate snapshots, they never see a queue build up
/// (spec §4.2 "subscribers only ever observe the latest state").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub state: EngineStateSnapshot,
    pub config: MakerConfig,
    pub emitted_at: DateTime<Utc>,
}

impl EngineSnapshot {
    pub fn new(state: EngineStateSnapshot, config: MakerConfig) -> Self {
        Self {
            state,
            config,
            emitted_at: Utc::now(),
        }
    }
}
