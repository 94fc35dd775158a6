//! JSON bodies carried inside frame payloads
//!
//! The transport treats `data` as opaque bytes; these are the structured
//! shapes the coordinator and the worker agree on per channel.

use serde::{Deserialize, Serialize};

use crate::job::JobSpec;

/// Heartbeat channel body (client → server)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatData {
    /// Client software version
    pub version: String,
    /// Host uptime, human-readable
    pub host_uptime: String,
    /// Agent process uptime, human-readable
    pub agent_uptime: String,
    /// Stable machine identifier
    pub machine_id: String,
    /// Component verbs this client can execute
    #[serde(default)]
    pub components: Vec<String>,
}

/// Return channel body accompanying a terminal result (client → server)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReturnData {
    /// Wall-clock execution time measured on the client
    pub execution_seconds: Option<f64>,
    /// Callback job specs produced by the component, to be submitted with
    /// `parent_async_bypass` set
    #[serde(default)]
    pub new_tasks: Vec<JobSpec>,
}

/// Transfer channel request body (client → server)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequestData {
    /// Absolute path of the source file on the server
    pub path: String,
    /// Byte offset to read from
    pub offset: u64,
    /// Maximum chunk size in bytes
    pub chunk_size: u32,
}

/// Default transfer chunk size (bytes)
pub const TRANSFER_CHUNK_SIZE: u32 = 262_144;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_data_roundtrip() {
        let data = HeartbeatData {
            version: "0.1.0".to_string(),
            host_uptime: "3600".to_string(),
            agent_uptime: "60".to_string(),
            machine_id: "m-1".to_string(),
            components: vec!["RUN".to_string(), "ARG".to_string()],
        };
        let bytes = serde_json::to_vec(&data).unwrap();
        let back: HeartbeatData = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.version, "0.1.0");
        assert_eq!(back.components.len(), 2);
    }

    #[test]
    fn test_return_data_defaults() {
        let back: ReturnData = serde_json::from_str("{}").unwrap();
        assert!(back.execution_seconds.is_none());
        assert!(back.new_tasks.is_empty());
    }
}
