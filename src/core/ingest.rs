use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

use super::agent::{GpuSpec, GpuStatus};
use super::db::Database;

/// Identity block of an agent report.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AgentInfo {
    pub hostname: String,
    pub ip_address: String,
    #[serde(default)]
    pub os: String,
}

/// One GPU as serialized by an agent's probe. Numeric telemetry the probe
/// could not measure is simply absent; unknown extra fields are ignored.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GpuReportEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default = "unknown_tag")]
    pub model: String,
    #[serde(default = "unknown_tag")]
    pub status: String,
    #[serde(default)]
    pub temperature: Option<i64>,
    #[serde(default)]
    pub utilization: Option<i64>,
    #[serde(rename = "memoryTotal", default)]
    pub memory_total: Option<i64>,
    #[serde(rename = "memoryUsed", default)]
    pub memory_used: Option<i64>,
    #[serde(default)]
    pub pci_bus_id: String,
}

fn unknown_tag() -> String {
    "unknown".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GpuReport {
    #[serde(default)]
    pub gpus: Vec<GpuReportEntry>,
    #[serde(default)]
    pub detection_method: String,
    #[serde(default)]
    pub status: String,
}

/// Full report-in payload.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AgentReport {
    pub agent_info: AgentInfo,
    pub gpu_report: GpuReport,
}

#[derive(Debug, Serialize, Clone, Copy)]
pub struct ReportOutcome {
    pub agent_id: i64,
    pub gpus_added: usize,
    pub gpus_removed: usize,
    pub gpus_skipped: usize,
}

#[derive(Debug)]
pub enum IngestError {
    /// The report failed validation; nothing was written.
    Invalid(String),
    Store(anyhow::Error),
}

impl std::error::Error for IngestError {}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::Invalid(msg) => write!(f, "invalid report: {}", msg),
            IngestError::Store(e) => write!(f, "{}", e),
        }
    }
}

/// Admit one agent report: validate, normalize the GPU entries, and apply
/// the upsert + replace atomically. After this returns, placement sees
/// exactly the reported inventory.
pub fn process_report(
    db: &Database,
    report: &AgentReport,
    now: SystemTime,
) -> Result<ReportOutcome, IngestError> {
    let hostname = report.agent_info.hostname.trim();
    let ip_address = report.agent_info.ip_address.trim();
    if hostname.is_empty() {
        return Err(IngestError::Invalid("hostname cannot be empty".into()));
    }
    if ip_address.is_empty() {
        return Err(IngestError::Invalid("ip_address cannot be empty".into()));
    }

    if report.gpu_report.gpus.is_empty() {
        tracing::warn!(hostname, "agent reported no GPUs");
    }

    let mut gpus = Vec::with_capacity(report.gpu_report.gpus.len());
    let mut skipped = 0usize;
    for entry in &report.gpu_report.gpus {
        match normalize_entry(entry) {
            Some(spec) => gpus.push(spec),
            None => {
                skipped += 1;
                tracing::warn!(hostname, "skipping GPU record without an id");
            }
        }
    }

    let applied = db
        .apply_report(hostname, ip_address, report.agent_info.os.trim(), &gpus, now)
        .map_err(IngestError::Store)?;

    tracing::info!(
        hostname,
        agent_id = applied.agent_id,
        gpus_added = applied.gpus_added,
        gpus_removed = applied.gpus_removed,
        "agent report processed"
    );

    Ok(ReportOutcome {
        agent_id: applied.agent_id,
        gpus_added: applied.gpus_added,
        gpus_removed: applied.gpus_removed,
        gpus_skipped: skipped,
    })
}

fn normalize_entry(entry: &GpuReportEntry) -> Option<GpuSpec> {
    let id = entry.id.trim();
    if id.is_empty() {
        return None;
    }
    Some(GpuSpec {
        id: id.to_string(),
        model: entry.model.clone(),
        status: GpuStatus::from_report(&entry.status),
        temperature_c: entry.temperature,
        utilization_pct: entry.utilization,
        memory_total_bytes: entry.memory_total,
        memory_used_bytes: entry.memory_used,
        pci_bus_id: entry.pci_bus_id.clone(),
    })
}
