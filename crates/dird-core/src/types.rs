//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::clock;

/// Stable name for a client instance in the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Identity(pub String);

impl Identity {
    /// Create a new identity
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identity of the local host (host name)
    pub fn local() -> Self {
        let name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self(name)
    }

    /// Get the raw identity string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// State of a job, either per node or aggregated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Accepted but not yet handed to the transport
    Pending,
    /// Handed to the transport for at least one identity
    Dispatched,
    /// At least one identity is executing
    Running,
    /// Every expected identity finished successfully
    Succeeded,
    /// At least one identity failed
    Failed,
    /// At least one identity exceeded the job timeout
    Timedout,
    /// The frame could not be delivered after retry exhaustion
    Nacked,
}

impl JobState {
    /// Terminal states never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Timedout | JobState::Nacked
        )
    }

    /// Check if a transition to `target` is allowed.
    ///
    /// Non-terminal states move freely forward; terminal states are frozen.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        if *self == target {
            return false;
        }
        !self.is_terminal()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "PENDING",
            JobState::Dispatched => "DISPATCHED",
            JobState::Running => "RUNNING",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Failed => "FAILED",
            JobState::Timedout => "TIMEDOUT",
            JobState::Nacked => "NACKED",
        };
        write!(f, "{}", s)
    }
}

/// Server-side record for a known client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Client identity
    pub identity: Identity,
    /// Liveness deadline (epoch millis); refreshed on every heartbeat
    pub expiry_deadline_ms: u64,
    /// When the worker was first seen (epoch millis)
    pub first_seen_ms: u64,
    /// Client software version
    pub version: String,
    /// Host uptime as reported by the client
    pub host_uptime: String,
    /// Agent process uptime as reported by the client
    pub agent_uptime: String,
    /// Stable machine identifier, used to catch duplicate host names
    pub machine_id: String,
    /// Component verbs the client advertises
    pub components: Vec<String>,
}

impl WorkerRecord {
    /// A worker is alive iff its deadline has not passed
    pub fn is_alive(&self) -> bool {
        clock::now_millis() < self.expiry_deadline_ms
    }

    /// Seconds until expiry (negative when already expired)
    pub fn expiry_secs(&self) -> f64 {
        clock::secs_until(self.expiry_deadline_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display() {
        let id = Identity::new("node1");
        assert_eq!(format!("{}", id), "node1");
        assert_eq!(id.as_str(), "node1");
    }

    #[test]
    fn test_identity_local_nonempty() {
        assert!(!Identity::local().as_str().is_empty());
    }

    #[test]
    fn test_job_state_terminality() {
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Timedout.is_terminal());
        assert!(JobState::Nacked.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Dispatched.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }

    #[test]
    fn test_job_state_no_downgrade() {
        assert!(!JobState::Succeeded.can_transition_to(JobState::Running));
        assert!(!JobState::Failed.can_transition_to(JobState::Succeeded));
        assert!(!JobState::Timedout.can_transition_to(JobState::Pending));
        assert!(JobState::Pending.can_transition_to(JobState::Dispatched));
        assert!(JobState::Running.can_transition_to(JobState::Failed));
    }

    #[test]
    fn test_worker_record_liveness() {
        let record = WorkerRecord {
            identity: Identity::new("node1"),
            expiry_deadline_ms: clock::deadline_millis(10),
            first_seen_ms: clock::now_millis(),
            version: "0.1.0".to_string(),
            host_uptime: "1000".to_string(),
            agent_uptime: "10".to_string(),
            machine_id: "m-1".to_string(),
            components: vec!["RUN".to_string()],
        };
        assert!(record.is_alive());
        assert!(record.expiry_secs() > 0.0);

        let expired = WorkerRecord {
            expiry_deadline_ms: clock::now_millis().saturating_sub(1000),
            ..record
        };
        assert!(!expired.is_alive());
        assert!(expired.expiry_secs() < 0.0);
    }
}
