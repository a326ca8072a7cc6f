use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::advisor::AdvisorId;

/// The durable singleton tracking the last advisor handed a lead.
///
/// `version` is bumped by every committed mutation and is the token writers
/// compare against before replacing the record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationState {
    pub last_assigned: Option<AdvisorId>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl RotationState {
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self { last_assigned: None, version: 0, updated_at: now }
    }

    /// The state that replaces `self` once `chosen` is committed.
    pub fn successor(&self, chosen: Option<AdvisorId>, now: DateTime<Utc>) -> Self {
        Self { last_assigned: chosen, version: self.version + 1, updated_at: now }
    }
}
