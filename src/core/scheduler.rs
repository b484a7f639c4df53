use std::time::SystemTime;

use crate::client::{AgentClient, RunJobRequest};
use crate::core::agent::{Agent, Gpu};
use crate::core::db::Database;
use crate::core::executor;
use crate::core::job::{HistoryAction, HistoryEvent, Job, JobRequest, JobStatus, ScheduleError};
use crate::core::placement;
use crate::utils::gpu_device_index;

/// Result of a submission, as reported back to the caller.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Running {
        job_id: i64,
        gpu_id: String,
        pid: u32,
    },
    Queued {
        job_id: i64,
    },
    Failed {
        job_id: i64,
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    AlreadyFinished,
    NotRunning,
}

/// Dispatch and job-facing service of the control plane.
///
/// Owns no state of its own: every decision reads the store and every
/// transition writes it, so concurrent handlers and the supervisor
/// coordinate purely through transactions.
pub struct JobScheduler {
    pub(crate) db: Database,
    pub(crate) agents: AgentClient,
    pub(crate) local_hostname: String,
}

impl JobScheduler {
    pub fn new(db: Database, agents: AgentClient, local_hostname: String) -> Self {
        Self {
            db,
            agents,
            local_hostname,
        }
    }

    pub fn store(&self) -> &Database {
        &self.db
    }

    pub(crate) fn is_local(&self, agent: &Agent) -> bool {
        agent.is_local(&self.local_hostname)
    }

    /// Place and launch one submission.
    ///
    /// A caller-preferred GPU short-circuits scoring entirely; it is the
    /// caller's burden if that device is loaded. With no preference the
    /// scorer picks from the healthy inventory, and an empty inventory
    /// parks the job in the queue for the supervisor to drain later.
    pub async fn submit(&self, request: &JobRequest) -> Result<SubmitOutcome, ScheduleError> {
        let now = SystemTime::now();

        let preferred = request
            .preferred_gpu
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty() && *p != "auto");

        let selected: Option<Gpu> = match preferred {
            Some(id) => Some(
                self.db
                    .get_gpu(id)?
                    .ok_or_else(|| ScheduleError::GpuNotFound(id.to_string()))?,
            ),
            None => {
                let candidates = self.db.list_available_gpus()?;
                let active = self.db.count_active_jobs_per_gpu()?;
                placement::select_gpu(&candidates, &active).cloned()
            }
        };

        let Some(gpu) = selected else {
            let job_id = self.db.create_queued_job(
                &request.workload_type,
                &request.command,
                "No available GPUs, job queued",
                now,
            )?;
            tracing::info!(job_id, "no fit, job queued");
            return Ok(SubmitOutcome::Queued { job_id });
        };

        let job_id = self.db.create_job(
            &request.workload_type,
            &request.command,
            JobStatus::Pending,
            Some(&gpu.id),
            Some(gpu.agent_id),
            now,
        )?;

        Ok(self.dispatch(job_id, &request.command, &request.workload_type, &gpu).await?)
    }

    /// Launch a pending job on its assigned GPU and record the outcome.
    async fn dispatch(
        &self,
        job_id: i64,
        command: &str,
        workload_type: &str,
        gpu: &Gpu,
    ) -> anyhow::Result<SubmitOutcome> {
        let now = SystemTime::now();

        let agent = match self.db.get_agent(gpu.agent_id)? {
            Some(agent) => agent,
            None => {
                let reason = format!("Owning agent {} is unknown", gpu.agent_id);
                self.db.mark_job_terminal(
                    job_id,
                    JobStatus::Failed,
                    HistoryAction::Failed,
                    &format!("Launch failed: {reason}"),
                    now,
                )?;
                return Ok(SubmitOutcome::Failed {
                    job_id,
                    error: reason,
                });
            }
        };

        let launched = if self.is_local(&agent) {
            executor::launch(command, gpu_device_index(&gpu.id))
        } else {
            self.agents
                .run_job(
                    &agent.ip_address,
                    &RunJobRequest {
                        job_id,
                        command: command.to_string(),
                        gpu_id: gpu.id.clone(),
                        workload_type: workload_type.to_string(),
                    },
                )
                .await
        };

        match launched {
            Ok(pid) => {
                self.db.mark_job_running(
                    job_id,
                    pid,
                    &format!("Running on {} (agent {})", gpu.id, agent.hostname),
                    now,
                )?;
                tracing::info!(job_id, gpu = %gpu.id, pid, "job launched");
                Ok(SubmitOutcome::Running {
                    job_id,
                    gpu_id: gpu.id.clone(),
                    pid,
                })
            }
            Err(e) => {
                tracing::warn!(job_id, gpu = %gpu.id, error = %e, "job launch failed");
                self.db.mark_job_terminal(
                    job_id,
                    JobStatus::Failed,
                    HistoryAction::Failed,
                    &format!("Launch failed: {e:#}"),
                    now,
                )?;
                Ok(SubmitOutcome::Failed {
                    job_id,
                    error: format!("{e:#}"),
                })
            }
        }
    }

    /// Try to place one queued job. Returns false when no GPU fits; the
    /// job then simply stays queued for a later pass.
    pub async fn dispatch_queued(&self, job: &Job) -> anyhow::Result<bool> {
        let candidates = self.db.list_available_gpus()?;
        let active = self.db.count_active_jobs_per_gpu()?;
        let Some(gpu) = placement::select_gpu(&candidates, &active).cloned() else {
            return Ok(false);
        };

        if !self.db.assign_queued_job(job.id, &gpu.id, gpu.agent_id)? {
            // Another drain pass took this job first.
            return Ok(true);
        }

        tracing::info!(job_id = job.id, gpu = %gpu.id, "dispatching queued job");
        self.dispatch(job.id, &job.command, &job.workload_type, &gpu)
            .await?;
        Ok(true)
    }

    /// Cancel a job. Only running jobs are mutated; everything else just
    /// reports its current situation back.
    pub async fn cancel(&self, job_id: i64) -> anyhow::Result<Option<CancelOutcome>> {
        let now = SystemTime::now();
        let Some(job) = self.db.get_job(job_id)? else {
            return Ok(None);
        };

        if job.status.is_terminal() {
            return Ok(Some(CancelOutcome::AlreadyFinished));
        }
        if job.status != JobStatus::Running {
            return Ok(Some(CancelOutcome::NotRunning));
        }

        let agent = match job.agent_id {
            Some(agent_id) => self.db.get_agent(agent_id)?,
            None => None,
        };

        // Local jobs get a termination signal; remote jobs are only marked
        // here and reconciled by the supervisor, since the executor
        // contract has no terminate call.
        if let (Some(agent), Some(pid)) = (agent.as_ref(), job.pid) {
            if self.is_local(agent) {
                if let Err(e) = executor::terminate(pid) {
                    tracing::warn!(job_id, pid, error = %e, "failed to signal job");
                }
            }
        }

        let transitioned = self.db.mark_job_terminal(
            job_id,
            JobStatus::Cancelled,
            HistoryAction::Cancelled,
            "Cancelled by user",
            now,
        )?;
        if !transitioned {
            // The supervisor finished it first.
            return Ok(Some(CancelOutcome::AlreadyFinished));
        }

        tracing::info!(job_id, "job cancelled");
        Ok(Some(CancelOutcome::Cancelled))
    }

    pub fn job_status(&self, job_id: i64) -> anyhow::Result<Option<Job>> {
        self.db.get_job(job_id)
    }

    pub fn list_jobs(&self, limit: usize) -> anyhow::Result<Vec<Job>> {
        self.db.list_jobs(limit)
    }

    /// History for one job, newest first. `None` when the job is unknown.
    pub fn job_history(&self, job_id: i64) -> anyhow::Result<Option<Vec<HistoryEvent>>> {
        if self.db.get_job(job_id)?.is_none() {
            return Ok(None);
        }
        Ok(Some(self.db.job_history(job_id)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::{GpuSpec, GpuStatus};
    use std::time::Duration;
    use tempfile::TempDir;

    const LOCAL_HOSTNAME: &str = "hub-test";

    fn test_scheduler() -> (JobScheduler, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(temp_dir.path().join("test.db")).unwrap();
        // Port 1 is never listening, so remote launches fail fast.
        let agents = AgentClient::new(1, Duration::from_secs(2), Duration::from_secs(1));
        let scheduler = JobScheduler::new(db, agents, LOCAL_HOSTNAME.to_string());
        (scheduler, temp_dir)
    }

    fn healthy_gpu(id: &str) -> GpuSpec {
        GpuSpec {
            id: id.to_string(),
            model: "A100".to_string(),
            status: GpuStatus::Healthy,
            temperature_c: Some(40),
            utilization_pct: Some(10),
            memory_total_bytes: Some(1000),
            memory_used_bytes: Some(100),
            pci_bus_id: String::new(),
        }
    }

    fn report_local_agent(scheduler: &JobScheduler, gpus: &[GpuSpec]) -> i64 {
        // The hostname contains the control plane's, so the agent is local.
        scheduler
            .db
            .apply_report(
                &format!("{LOCAL_HOSTNAME}-node"),
                "127.0.0.1",
                "linux",
                gpus,
                SystemTime::now(),
            )
            .unwrap()
            .agent_id
    }

    fn request(command: &str) -> JobRequest {
        JobRequest {
            workload_type: "train".to_string(),
            command: command.to_string(),
            preferred_gpu: None,
        }
    }

    #[tokio::test]
    async fn test_submit_runs_on_reported_gpu() {
        let (scheduler, _temp) = test_scheduler();
        let agent_id = report_local_agent(&scheduler, &[healthy_gpu("GPU-0")]);

        let SubmitOutcome::Running { job_id, gpu_id, pid } =
            scheduler.submit(&request("sleep 30")).await.unwrap()
        else {
            panic!("expected a running job");
        };
        assert_eq!(gpu_id, "GPU-0");

        let job = scheduler.job_status(job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.assigned_gpu_id.as_deref(), Some("GPU-0"));
        assert_eq!(job.agent_id, Some(agent_id));
        assert_eq!(job.pid, Some(pid));
        assert!(job.started_at.is_some());

        let history = scheduler.job_history(job_id).unwrap().unwrap();
        assert_eq!(history[0].action, HistoryAction::Started);

        scheduler.cancel(job_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_with_empty_cluster_queues() {
        let (scheduler, _temp) = test_scheduler();

        let SubmitOutcome::Queued { job_id } = scheduler.submit(&request("echo hi")).await.unwrap()
        else {
            panic!("expected a queued job");
        };
        assert_eq!(job_id, 1);

        let job = scheduler.job_status(job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.assigned_gpu_id, None);
        assert_eq!(job.pid, None);
    }

    #[tokio::test]
    async fn test_unknown_preferred_gpu_is_rejected() {
        let (scheduler, _temp) = test_scheduler();
        report_local_agent(&scheduler, &[healthy_gpu("GPU-0")]);

        let mut req = request("echo hi");
        req.preferred_gpu = Some("GPU-404".to_string());
        match scheduler.submit(&req).await {
            Err(ScheduleError::GpuNotFound(id)) => assert_eq!(id, "GPU-404"),
            other => panic!("expected GpuNotFound, got {other:?}"),
        }
        // The rejection left no job row behind.
        assert!(scheduler.list_jobs(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_preferred_gpu_bypasses_scoring() {
        let (scheduler, _temp) = test_scheduler();
        let mut loaded = healthy_gpu("GPU-1");
        loaded.utilization_pct = Some(95);
        report_local_agent(&scheduler, &[healthy_gpu("GPU-0"), loaded]);

        let mut req = request("sleep 30");
        req.preferred_gpu = Some("GPU-1".to_string());
        let SubmitOutcome::Running { job_id, gpu_id, .. } = scheduler.submit(&req).await.unwrap()
        else {
            panic!("expected a running job");
        };
        assert_eq!(gpu_id, "GPU-1");

        scheduler.cancel(job_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_auto_sentinel_scores_normally() {
        let (scheduler, _temp) = test_scheduler();
        report_local_agent(&scheduler, &[healthy_gpu("GPU-0")]);

        let mut req = request("sleep 30");
        req.preferred_gpu = Some("auto".to_string());
        let SubmitOutcome::Running { job_id, gpu_id, .. } = scheduler.submit(&req).await.unwrap()
        else {
            panic!("expected a running job");
        };
        assert_eq!(gpu_id, "GPU-0");
        scheduler.cancel(job_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_local_launch_failure_fails_the_job() {
        let (scheduler, _temp) = test_scheduler();
        report_local_agent(&scheduler, &[healthy_gpu("GPU-0")]);

        let SubmitOutcome::Failed { job_id, .. } = scheduler
            .submit(&request("no-such-binary-gpuhub-test"))
            .await
            .unwrap()
        else {
            panic!("expected a failed job");
        };

        let job = scheduler.job_status(job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.finished_at.is_some());

        let history = scheduler.job_history(job_id).unwrap().unwrap();
        assert_eq!(history[0].action, HistoryAction::Failed);
        assert!(history[0].details.starts_with("Launch failed"));
    }

    #[tokio::test]
    async fn test_remote_launch_failure_fails_the_job() {
        let (scheduler, _temp) = test_scheduler();
        // Hostname does not contain ours, so the launch goes remote and
        // hits a port nobody listens on.
        scheduler
            .db
            .apply_report(
                "worker-9",
                "127.0.0.1",
                "linux",
                &[healthy_gpu("GPU-0")],
                SystemTime::now(),
            )
            .unwrap();

        let SubmitOutcome::Failed { job_id, .. } = scheduler.submit(&request("echo hi")).await.unwrap()
        else {
            panic!("expected a failed job");
        };
        let job = scheduler.job_status(job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancel_running_local_job() {
        let (scheduler, _temp) = test_scheduler();
        report_local_agent(&scheduler, &[healthy_gpu("GPU-0")]);

        let SubmitOutcome::Running { job_id, pid, .. } =
            scheduler.submit(&request("sleep 30")).await.unwrap()
        else {
            panic!("expected a running job");
        };

        let outcome = scheduler.cancel(job_id).await.unwrap().unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled);

        let job = scheduler.job_status(job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.finished_at.is_some());

        // The process actually received the signal.
        for _ in 0..50 {
            if executor::probe(pid) == executor::ProcessProbe::Gone {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("cancelled job still running");
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_on_finished_jobs() {
        let (scheduler, _temp) = test_scheduler();
        let now = SystemTime::now();
        let job_id = scheduler
            .db
            .create_job("t", "echo", JobStatus::Pending, Some("GPU-0"), Some(1), now)
            .unwrap();
        scheduler.db.mark_job_running(job_id, 1, "started", now).unwrap();
        scheduler
            .db
            .mark_job_terminal(job_id, JobStatus::Completed, HistoryAction::Completed, "done", now)
            .unwrap();

        let outcome = scheduler.cancel(job_id).await.unwrap().unwrap();
        assert_eq!(outcome, CancelOutcome::AlreadyFinished);
        let job = scheduler.job_status(job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_queued_job_reports_not_running() {
        let (scheduler, _temp) = test_scheduler();
        let SubmitOutcome::Queued { job_id } =
            scheduler.submit(&request("echo hi")).await.unwrap()
        else {
            panic!("expected a queued job");
        };

        let outcome = scheduler.cancel(job_id).await.unwrap().unwrap();
        assert_eq!(outcome, CancelOutcome::NotRunning);
        let job = scheduler.job_status(job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let (scheduler, _temp) = test_scheduler();
        assert!(scheduler.cancel(404).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dispatch_queued_waits_for_inventory() {
        let (scheduler, _temp) = test_scheduler();
        let SubmitOutcome::Queued { job_id } =
            scheduler.submit(&request("sleep 30")).await.unwrap()
        else {
            panic!("expected a queued job");
        };

        // Still no inventory: the job stays queued.
        let job = scheduler.job_status(job_id).unwrap().unwrap();
        assert!(!scheduler.dispatch_queued(&job).await.unwrap());

        report_local_agent(&scheduler, &[healthy_gpu("GPU-0")]);
        assert!(scheduler.dispatch_queued(&job).await.unwrap());

        let job = scheduler.job_status(job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.assigned_gpu_id.as_deref(), Some("GPU-0"));

        scheduler.cancel(job_id).await.unwrap();
    }
}
