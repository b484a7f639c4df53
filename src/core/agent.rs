use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use strum::{Display, EnumIter, EnumString};

/// A worker node known to the control plane. Created or refreshed by agent
/// reports, never deleted; liveness is derived from the age of `last_seen`.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Agent {
    pub id: i64,
    pub hostname: String,
    pub ip_address: String,
    pub os: String,
    pub last_seen: SystemTime,
}

impl Agent {
    /// An agent is local when its hostname contains the control plane's own
    /// hostname. This covers both the plain hostname and decorated variants
    /// like `<host>-node`.
    pub fn is_local(&self, control_plane_hostname: &str) -> bool {
        !control_plane_hostname.is_empty() && self.hostname.contains(control_plane_hostname)
    }
}

#[derive(
    Debug,
    Deserialize,
    Serialize,
    PartialEq,
    Eq,
    Clone,
    Copy,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GpuStatus {
    Healthy,
    Overheating,
    Unknown,
    Offline,
}

impl GpuStatus {
    /// Parse a status tag from an agent report. Tags outside the known set
    /// map to `Unknown` rather than failing the report.
    pub fn from_report(tag: &str) -> Self {
        tag.trim().parse().unwrap_or(GpuStatus::Unknown)
    }
}

/// A schedulable device owned by exactly one agent. The full set for an
/// agent is replaced on every report; telemetry fields are `None` when the
/// agent's probe could not measure them.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Gpu {
    pub id: String,
    pub agent_id: i64,
    pub model: String,
    pub status: GpuStatus,
    pub temperature_c: Option<i64>,
    pub utilization_pct: Option<i64>,
    pub memory_total_bytes: Option<i64>,
    pub memory_used_bytes: Option<i64>,
    pub is_available: bool,
    pub pci_bus_id: String,
}

/// A GPU as described by a validated report, before it is bound to an
/// agent row by the store.
#[derive(Debug, Clone)]
pub struct GpuSpec {
    pub id: String,
    pub model: String,
    pub status: GpuStatus,
    pub temperature_c: Option<i64>,
    pub utilization_pct: Option<i64>,
    pub memory_total_bytes: Option<i64>,
    pub memory_used_bytes: Option<i64>,
    pub pci_bus_id: String,
}

impl GpuSpec {
    pub fn is_available(&self) -> bool {
        self.status == GpuStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(hostname: &str) -> Agent {
        Agent {
            id: 1,
            hostname: hostname.to_string(),
            ip_address: "10.0.0.1".to_string(),
            os: "linux".to_string(),
            last_seen: SystemTime::now(),
        }
    }

    #[test]
    fn test_is_local_matches_substring() {
        assert!(agent("hub-1").is_local("hub-1"));
        assert!(agent("hub-1-gpu-detected").is_local("hub-1"));
        assert!(!agent("worker-3").is_local("hub-1"));
        assert!(!agent("worker-3").is_local(""));
    }

    #[test]
    fn test_status_from_report_tolerates_junk() {
        assert_eq!(GpuStatus::from_report("healthy"), GpuStatus::Healthy);
        assert_eq!(GpuStatus::from_report(" overheating "), GpuStatus::Overheating);
        assert_eq!(GpuStatus::from_report("degraded"), GpuStatus::Unknown);
        assert_eq!(GpuStatus::from_report(""), GpuStatus::Unknown);
    }
}
