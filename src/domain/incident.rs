//! `Incident` — a DOWN period.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::new_id;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub service_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: String,
    pub resolved: bool,
}

impl Incident {
    /// Open a new incident.
    pub fn open(service_id: impl Into<String>, error: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            service_id: service_id.into(),
            start_time: now,
            end_time: None,
            error: error.into(),
            resolved: false,
        }
    }

    /// Duration, if resolved.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }

    /// Resolve this incident at `now`. Idempotent in the sense that a
    /// resolved incident is never re-opened by further calls; callers are expected to only
    /// resolve unresolved incidents.
    pub fn resolve(&mut self, now: DateTime<Utc>) {
        if self.resolved {
            return;
        }
        self.end_time = Some(now);
        self.resolved = true;
    }

    /// For any resolved incident, `EndTime >= StartTime` and
    /// `Duration = EndTime - StartTime` (non-negative).
    pub fn upholds_resolution_invariant(&self) -> bool {
        match (self.resolved, self.end_time) {
            (true, Some(end)) => end >= self.start_time,
            (true, None) => false,
            (false, Some(_)) => false,
            (false, None) => true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncidentFilter {
    pub service_id: Option<String>,
    pub resolved: Option<bool>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}
