use anyhow::{bail, Context};
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Launch request sent to an agent's executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunJobRequest {
    pub job_id: i64,
    pub command: String,
    pub gpu_id: String,
    pub workload_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunJobResponse {
    pub status: String,
    pub pid: u32,
    #[serde(default)]
    pub message: String,
}

/// Process state as reported by an agent's status probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteProcessStatus {
    Running,
    NotRunning,
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub pid: u32,
    pub status: RemoteProcessStatus,
}

/// Client side of the two-call agent executor contract.
///
/// Every agent exposes the same pair of endpoints on a fixed port derived
/// from its reported IP address. Launches get a generous deadline because
/// the agent may have to warm up the device; status probes are cheap and
/// get a short one so a dead agent cannot stall a supervisor tick.
#[derive(Debug, Clone)]
pub struct AgentClient {
    client: ReqwestClient,
    executor_port: u16,
    launch_timeout: Duration,
    probe_timeout: Duration,
}

impl AgentClient {
    pub fn new(executor_port: u16, launch_timeout: Duration, probe_timeout: Duration) -> Self {
        Self {
            client: ReqwestClient::new(),
            executor_port,
            launch_timeout,
            probe_timeout,
        }
    }

    fn base_url(&self, agent_ip: &str) -> String {
        format!("http://{}:{}", agent_ip, self.executor_port)
    }

    /// Ask an agent to start a job. Any outcome other than HTTP 200 with a
    /// well-formed body - rejection, timeout, connection error - is a
    /// launch failure.
    pub async fn run_job(&self, agent_ip: &str, request: &RunJobRequest) -> anyhow::Result<u32> {
        let response = self
            .client
            .post(format!("{}/agent/run-job", self.base_url(agent_ip)))
            .timeout(self.launch_timeout)
            .json(request)
            .send()
            .await
            .context("Failed to reach agent executor")?;

        if !response.status().is_success() {
            bail!("Agent rejected launch: HTTP {}", response.status());
        }

        let body: RunJobResponse = response
            .json()
            .await
            .context("Failed to parse launch response")?;
        Ok(body.pid)
    }

    /// Probe the state of a previously launched process on an agent.
    /// Transport errors bubble up so the caller can retry later instead of
    /// mistaking a network blip for job completion.
    pub async fn job_status(
        &self,
        agent_ip: &str,
        pid: u32,
    ) -> anyhow::Result<RemoteProcessStatus> {
        let response = self
            .client
            .get(format!("{}/agent/job-status/{}", self.base_url(agent_ip), pid))
            .timeout(self.probe_timeout)
            .send()
            .await
            .context("Failed to reach agent executor")?;

        if !response.status().is_success() {
            bail!("Agent status probe failed: HTTP {}", response.status());
        }

        let body: JobStatusResponse = response
            .json()
            .await
            .context("Failed to parse status response")?;
        Ok(body.status)
    }
}
