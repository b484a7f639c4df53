use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{Mutex, Notify};
use tokio::time::MissedTickBehavior;

use crate::client::RemoteProcessStatus;
use crate::core::executor::{self, ProcessProbe};
use crate::core::job::{HistoryAction, Job, JobStatus};
use crate::core::scheduler::JobScheduler;

/// What one supervisor pass did.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct TickSummary {
    /// Running jobs whose process was found finished.
    pub jobs_completed: usize,
    /// Queued jobs that left the queue this pass.
    pub jobs_dispatched: usize,
    /// GPUs flipped offline because their agent went quiet.
    pub gpus_offlined: usize,
}

/// Periodic reconciliation task.
///
/// Each tick probes every running job, drains the queue, and retires the
/// inventory of agents that stopped reporting. Ticks never overlap: a
/// tick requested while one is in flight is skipped, not queued.
pub struct Supervisor {
    scheduler: Arc<JobScheduler>,
    offline_after: Duration,
    tick_gate: Mutex<()>,
}

impl Supervisor {
    pub fn new(scheduler: Arc<JobScheduler>, offline_after: Duration) -> Self {
        Self {
            scheduler,
            offline_after,
            tick_gate: Mutex::new(()),
        }
    }

    /// Run one reconciliation pass. Returns `None` when another pass is
    /// already in flight.
    pub async fn tick(&self) -> Option<TickSummary> {
        let Ok(_guard) = self.tick_gate.try_lock() else {
            tracing::debug!("supervisor tick already in flight, skipping");
            return None;
        };

        let jobs_completed = self.reap_running_jobs().await;
        let jobs_dispatched = self.drain_queue().await;
        let gpus_offlined = self.offline_stale_agents();
        Some(TickSummary {
            jobs_completed,
            jobs_dispatched,
            gpus_offlined,
        })
    }

    /// Probe every running job and complete the ones whose process is gone.
    async fn reap_running_jobs(&self) -> usize {
        let running = match self.scheduler.db.list_running_jobs() {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "failed to load running jobs, skipping pass");
                return 0;
            }
        };

        let mut completed = 0;
        for job in running {
            match self.probe_job(&job).await {
                Ok(true) => completed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(job_id = job.id, error = %e, "failed to reconcile job");
                }
            }
        }
        completed
    }

    /// Returns true when the job was transitioned to completed.
    async fn probe_job(&self, job: &Job) -> anyhow::Result<bool> {
        let Some(pid) = job.pid else {
            tracing::warn!(job_id = job.id, "running job has no pid, leaving it alone");
            return Ok(false);
        };
        let Some(agent_id) = job.agent_id else {
            tracing::warn!(job_id = job.id, "running job has no agent, leaving it alone");
            return Ok(false);
        };
        let Some(agent) = self.scheduler.db.get_agent(agent_id)? else {
            tracing::warn!(job_id = job.id, agent_id, "owning agent vanished");
            return Ok(false);
        };

        if self.scheduler.is_local(&agent) {
            match executor::probe(pid) {
                ProcessProbe::Running => Ok(false),
                // Exit codes are not captured; a missing process is
                // indistinguishable from a clean exit and treated as one.
                ProcessProbe::Gone => self.complete_job(job, "Local process finished"),
            }
        } else {
            match self.scheduler.agents.job_status(&agent.ip_address, pid).await {
                Ok(RemoteProcessStatus::Running) => Ok(false),
                Ok(RemoteProcessStatus::NotRunning) | Ok(RemoteProcessStatus::NotFound) => self
                    .complete_job(
                        job,
                        &format!("Remote process finished on {}", agent.hostname),
                    ),
                Err(e) => {
                    // A network blip must not read as job completion; the
                    // next tick retries.
                    tracing::warn!(
                        job_id = job.id,
                        agent = %agent.hostname,
                        error = %e,
                        "agent unreachable, will retry"
                    );
                    Ok(false)
                }
            }
        }
    }

    fn complete_job(&self, job: &Job, details: &str) -> anyhow::Result<bool> {
        let transitioned = self.scheduler.db.mark_job_terminal(
            job.id,
            JobStatus::Completed,
            HistoryAction::Completed,
            details,
            SystemTime::now(),
        )?;
        if transitioned {
            tracing::info!(job_id = job.id, "job completed");
        }
        Ok(transitioned)
    }

    /// Re-run placement for queued jobs, oldest first.
    async fn drain_queue(&self) -> usize {
        let queued = match self.scheduler.db.list_queued_jobs() {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!(error = %e, "failed to load queue, skipping pass");
                return 0;
            }
        };

        let mut dispatched = 0;
        for job in queued {
            match self.scheduler.dispatch_queued(&job).await {
                Ok(true) => dispatched += 1,
                Ok(false) => {
                    // No fit for the oldest job means no fit for any of
                    // them: the inventory does not change mid-pass.
                    break;
                }
                Err(e) => {
                    tracing::error!(job_id = job.id, error = %e, "failed to drain queued job");
                }
            }
        }
        dispatched
    }

    fn offline_stale_agents(&self) -> usize {
        let cutoff = SystemTime::now() - self.offline_after;
        match self.scheduler.db.mark_stale_agents_offline(cutoff) {
            Ok(0) => 0,
            Ok(changed) => {
                tracing::warn!(gpus = changed, "marked GPUs of stale agents offline");
                changed
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to offline stale agents");
                0
            }
        }
    }

    /// Drive the supervisor until the process exits. Fires every `period`
    /// and immediately whenever `notify` is signalled (e.g. a submission
    /// just queued a job).
    pub async fn run(self: Arc<Self>, notify: Arc<Notify>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = notify.notified() => {
                    tracing::debug!("supervisor woken early");
                }
            }
            self.tick().await;
        }
    }
}
