//! `ServiceState` — the latest observed runtime state for a service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Unknown,
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceState {
    pub service_id: String,
    pub status: Status,
    pub last_check: Option<DateTime<Utc>>,
    pub next_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_fails: u32,
    pub consecutive_success: u32,
    pub total_checks: u64,
    pub response_time_nanos: u64,
}

impl ServiceState {
    /// Initial state for a service that has never been checked.
    pub fn unknown(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            status: Status::Unknown,
            last_check: None,
            next_check: None,
            last_error: None,
            consecutive_fails: 0,
            consecutive_success: 0,
            total_checks: 0,
            response_time_nanos: 0,
        }
    }

    /// Apply a successful check.
    pub fn apply_success(&mut self, now: DateTime<Utc>, response_time: std::time::Duration) {
        self.status = Status::Up;
        self.last_check = Some(now);
        self.response_time_nanos = response_time.as_nanos() as u64;
        self.last_error = None;
        self.consecutive_success += 1;
        self.consecutive_fails = 0;
        self.total_checks += 1;
    }

    /// Apply a failed check.
    pub fn apply_failure(
        &mut self,
        now: DateTime<Utc>,
        response_time: std::time::Duration,
        error: impl Into<String>,
    ) {
        self.status = Status::Down;
        self.last_check = Some(now);
        self.response_time_nanos = response_time.as_nanos() as u64;
        self.last_error = Some(error.into());
        self.consecutive_fails += 1;
        self.consecutive_success = 0;
        self.total_checks += 1;
    }

    /// `ConsecutiveFails>0 ⇒ ConsecutiveSuccess=0` and vice versa.
    pub fn counters_are_consistent(&self) -> bool {
        !(self.consecutive_fails > 0 && self.consecutive_success > 0)
    }
}
