use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::agent::{Agent, Gpu, GpuSpec, GpuStatus};
use super::job::{HistoryAction, HistoryEvent, Job, JobStatus};

const SCHEMA_SQL: &str = r#"
-- Worker nodes. Rows are upserted by agent reports and never deleted;
-- liveness is derived from last_seen.
CREATE TABLE IF NOT EXISTS agents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hostname TEXT NOT NULL UNIQUE,
    ip_address TEXT NOT NULL DEFAULT '',
    os TEXT NOT NULL DEFAULT '',
    last_seen INTEGER NOT NULL DEFAULT (unixepoch())
);

-- Devices, keyed by the vendor-reported opaque id. The whole set for an
-- agent is replaced on every report.
CREATE TABLE IF NOT EXISTS gpus (
    id TEXT PRIMARY KEY,
    agent_id INTEGER NOT NULL,
    model TEXT NOT NULL DEFAULT 'unknown',
    status TEXT NOT NULL DEFAULT 'unknown',
    temperature_c INTEGER,
    utilization_pct INTEGER,
    memory_total_bytes INTEGER,
    memory_used_bytes INTEGER,
    is_available INTEGER NOT NULL DEFAULT 0,
    pci_bus_id TEXT NOT NULL DEFAULT '',
    last_updated INTEGER NOT NULL DEFAULT (unixepoch()),
    FOREIGN KEY (agent_id) REFERENCES agents(id),
    CHECK (status IN ('healthy', 'overheating', 'unknown', 'offline'))
);

-- Jobs reference their placement by id only. The GPU row may be replaced
-- or dropped by later reports, so assigned_gpu_id carries no FK.
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workload_type TEXT NOT NULL,
    command TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    assigned_gpu_id TEXT,
    agent_id INTEGER,
    pid INTEGER,
    created_at INTEGER NOT NULL DEFAULT (unixepoch()),
    started_at INTEGER,
    finished_at INTEGER,
    CHECK (status IN ('queued', 'pending', 'running', 'completed', 'failed', 'cancelled'))
);

-- Append-only audit trail.
CREATE TABLE IF NOT EXISTS history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL,
    action TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '',
    timestamp INTEGER NOT NULL DEFAULT (unixepoch()),
    FOREIGN KEY (job_id) REFERENCES jobs(id),
    CHECK (action IN ('queued', 'started', 'completed', 'failed', 'cancelled'))
);

CREATE INDEX IF NOT EXISTS idx_agents_hostname ON agents(hostname);
CREATE INDEX IF NOT EXISTS idx_agents_last_seen ON agents(last_seen);
CREATE INDEX IF NOT EXISTS idx_gpus_agent_id ON gpus(agent_id);
CREATE INDEX IF NOT EXISTS idx_gpus_available ON gpus(status, is_available);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_history_job_id ON history(job_id, timestamp DESC);
"#;

/// Outcome of applying one agent report.
#[derive(Debug, Clone, Copy)]
pub struct ReportApplied {
    pub agent_id: i64,
    pub gpus_added: usize,
    pub gpus_removed: usize,
}

/// Cluster-wide counters for the status endpoint.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ClusterStats {
    pub total_agents: usize,
    pub total_gpus: usize,
    pub healthy_gpus: usize,
    pub active_jobs: usize,
    pub completed_jobs: usize,
}

/// Database handle for the control plane state with connection pooling.
///
/// This is the single owner of all durable state. Every multi-row mutation
/// runs in one transaction so readers never observe partial agent, GPU, or
/// job updates.
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool<SqliteConnectionManager>>,
    #[allow(dead_code)]
    db_path: PathBuf,
}

impl Database {
    /// Create a new database connection pool and initialize the schema.
    pub fn new(db_path: PathBuf) -> Result<Self> {
        let manager = SqliteConnectionManager::file(&db_path).with_init(|conn| {
            conn.execute("PRAGMA foreign_keys = ON", [])?;
            // WAL mode for read concurrency between handlers and the supervisor
            conn.execute_batch(
                "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA busy_timeout = 5000;",
            )?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(10)
            .min_idle(Some(2))
            .build(manager)
            .context("Failed to create connection pool")?;

        let db = Self {
            pool: Arc::new(pool),
            db_path,
        };

        db.initialize_schema()?;
        Ok(db)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize database schema")?;
        Ok(())
    }

    /// Health check - verify database connectivity
    pub fn health_check(&self) -> Result<()> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .context("Database health check failed")?;
        Ok(())
    }

    /// Apply one agent report: upsert the agent row and replace its GPU set,
    /// all in a single transaction. A failed commit leaves the previous GPU
    /// set visible.
    pub fn apply_report(
        &self,
        hostname: &str,
        ip_address: &str,
        os: &str,
        gpus: &[GpuSpec],
        now: SystemTime,
    ) -> Result<ReportApplied> {
        let mut conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        // last_seen stays monotone per agent even if a late report carries
        // an older wall-clock timestamp.
        tx.execute(
            "INSERT INTO agents (hostname, ip_address, os, last_seen)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(hostname) DO UPDATE SET
                ip_address = excluded.ip_address,
                os = excluded.os,
                last_seen = MAX(last_seen, excluded.last_seen)",
            params![hostname, ip_address, os, system_time_to_unix(&now)],
        )
        .context("Failed to upsert agent")?;

        let agent_id: i64 = tx
            .query_row(
                "SELECT id FROM agents WHERE hostname = ?1",
                params![hostname],
                |row| row.get(0),
            )
            .context("Failed to read back agent id")?;

        let gpus_removed: usize = tx
            .query_row(
                "SELECT COUNT(*) FROM gpus WHERE agent_id = ?1",
                params![agent_id],
                |row| row.get::<_, i64>(0),
            )
            .context("Failed to count existing GPUs")? as usize;

        tx.execute("DELETE FROM gpus WHERE agent_id = ?1", params![agent_id])
            .context("Failed to clear previous GPU set")?;

        for gpu in gpus {
            // OR REPLACE handles a device id migrating between agents.
            tx.execute(
                "INSERT OR REPLACE INTO gpus (
                    id, agent_id, model, status, temperature_c, utilization_pct,
                    memory_total_bytes, memory_used_bytes, is_available, pci_bus_id,
                    last_updated
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    gpu.id,
                    agent_id,
                    gpu.model,
                    gpu.status.to_string(),
                    gpu.temperature_c,
                    gpu.utilization_pct,
                    gpu.memory_total_bytes,
                    gpu.memory_used_bytes,
                    gpu.is_available(),
                    gpu.pci_bus_id,
                    system_time_to_unix(&now),
                ],
            )
            .with_context(|| format!("Failed to insert GPU {}", gpu.id))?;
        }

        tx.commit().context("Failed to commit agent report")?;

        Ok(ReportApplied {
            agent_id,
            gpus_added: gpus.len(),
            gpus_removed,
        })
    }

    pub fn get_agent(&self, id: i64) -> Result<Option<Agent>> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        conn.query_row("SELECT * FROM agents WHERE id = ?1", params![id], row_to_agent)
            .optional()
            .context("Failed to get agent")
    }

    pub fn get_agent_by_hostname(&self, hostname: &str) -> Result<Option<Agent>> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        conn.query_row(
            "SELECT * FROM agents WHERE hostname = ?1",
            params![hostname],
            row_to_agent,
        )
        .optional()
        .context("Failed to get agent by hostname")
    }

    pub fn get_gpu(&self, id: &str) -> Result<Option<Gpu>> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        conn.query_row("SELECT * FROM gpus WHERE id = ?1", params![id], row_to_gpu)
            .optional()
            .context("Failed to get GPU")
    }

    /// All GPUs a job may be placed on: healthy and marked available.
    pub fn list_available_gpus(&self) -> Result<Vec<Gpu>> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        let mut stmt = conn
            .prepare("SELECT * FROM gpus WHERE status = 'healthy' AND is_available = 1 ORDER BY id")
            .context("Failed to prepare available GPUs query")?;
        let gpus = stmt
            .query_map([], row_to_gpu)
            .context("Failed to query available GPUs")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect available GPUs")?;
        Ok(gpus)
    }

    pub fn list_agent_gpus(&self, agent_id: i64) -> Result<Vec<Gpu>> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        let mut stmt = conn
            .prepare("SELECT * FROM gpus WHERE agent_id = ?1 ORDER BY id")
            .context("Failed to prepare agent GPUs query")?;
        let gpus = stmt
            .query_map(params![agent_id], row_to_gpu)
            .context("Failed to query agent GPUs")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect agent GPUs")?;
        Ok(gpus)
    }

    /// Number of pending or running jobs per assigned GPU. Feeds the
    /// placement scorer's stacking penalty.
    pub fn count_active_jobs_per_gpu(&self) -> Result<HashMap<String, u32>> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        let mut stmt = conn
            .prepare(
                "SELECT assigned_gpu_id, COUNT(*) FROM jobs
                 WHERE status IN ('running', 'pending') AND assigned_gpu_id IS NOT NULL
                 GROUP BY assigned_gpu_id",
            )
            .context("Failed to prepare active jobs query")?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u32))
            })
            .context("Failed to query active job counts")?
            .collect::<Result<HashMap<_, _>, _>>()
            .context("Failed to collect active job counts")?;
        Ok(counts)
    }

    /// Insert a new job row and return its id. Job ids are allocated by the
    /// store and never reused.
    pub fn create_job(
        &self,
        workload_type: &str,
        command: &str,
        status: JobStatus,
        assigned_gpu_id: Option<&str>,
        agent_id: Option<i64>,
        now: SystemTime,
    ) -> Result<i64> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        conn.execute(
            "INSERT INTO jobs (workload_type, command, status, assigned_gpu_id, agent_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                workload_type,
                command,
                status.to_string(),
                assigned_gpu_id,
                agent_id,
                system_time_to_unix(&now),
            ],
        )
        .context("Failed to insert job")?;
        Ok(conn.last_insert_rowid())
    }

    /// Create a job in the queue and record why, atomically.
    pub fn create_queued_job(
        &self,
        workload_type: &str,
        command: &str,
        details: &str,
        now: SystemTime,
    ) -> Result<i64> {
        let mut conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO jobs (workload_type, command, status, created_at)
             VALUES (?1, ?2, 'queued', ?3)",
            params![workload_type, command, system_time_to_unix(&now)],
        )
        .context("Failed to insert queued job")?;
        let job_id = tx.last_insert_rowid();
        Self::append_history_row(&tx, job_id, HistoryAction::Queued, details, now)?;
        tx.commit().context("Failed to commit queued job")?;
        Ok(job_id)
    }

    /// Move a queued job onto a GPU. Returns false when the job is no
    /// longer queued (raced with another drain or was already placed).
    pub fn assign_queued_job(
        &self,
        job_id: i64,
        gpu_id: &str,
        agent_id: i64,
    ) -> Result<bool> {
        let mut conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        match Self::job_status_tx(&tx, job_id)? {
            Some(current) if current.can_transition_to(JobStatus::Pending) => {}
            _ => return Ok(false),
        }
        let changed = tx
            .execute(
                "UPDATE jobs SET status = 'pending', assigned_gpu_id = ?2, agent_id = ?3
                 WHERE id = ?1 AND status = 'queued'",
                params![job_id, gpu_id, agent_id],
            )
            .context("Failed to assign queued job")?;
        tx.commit().context("Failed to commit assignment")?;
        Ok(changed == 1)
    }

    /// Record a confirmed launch: status, pid, start time, and the history
    /// entry land in one transaction.
    pub fn mark_job_running(
        &self,
        job_id: i64,
        pid: u32,
        details: &str,
        now: SystemTime,
    ) -> Result<bool> {
        let mut conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        match Self::job_status_tx(&tx, job_id)? {
            Some(current) if current.can_transition_to(JobStatus::Running) => {}
            _ => return Ok(false),
        }
        let changed = tx
            .execute(
                "UPDATE jobs SET status = 'running', pid = ?2, started_at = ?3
                 WHERE id = ?1 AND status = 'pending'",
                params![job_id, pid as i64, system_time_to_unix(&now)],
            )
            .context("Failed to mark job running")?;
        if changed == 1 {
            Self::append_history_row(&tx, job_id, HistoryAction::Started, details, now)?;
        }
        tx.commit().context("Failed to commit running transition")?;
        Ok(changed == 1)
    }

    /// Transition a job into a terminal state and append the matching
    /// history entry. The transition matrix is checked against the current
    /// row inside the transaction, so a job already in a terminal state is
    /// left untouched and `false` is returned; that makes competing writers
    /// (supervisor vs. cancel) idempotent.
    pub fn mark_job_terminal(
        &self,
        job_id: i64,
        status: JobStatus,
        action: HistoryAction,
        details: &str,
        now: SystemTime,
    ) -> Result<bool> {
        debug_assert!(status.is_terminal());
        let mut conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        match Self::job_status_tx(&tx, job_id)? {
            Some(current) if current.can_transition_to(status) => {}
            _ => return Ok(false),
        }
        let changed = tx
            .execute(
                "UPDATE jobs SET status = ?2, finished_at = ?3
                 WHERE id = ?1 AND status NOT IN ('completed', 'failed', 'cancelled')",
                params![job_id, status.to_string(), system_time_to_unix(&now)],
            )
            .context("Failed to mark job terminal")?;
        if changed == 1 {
            Self::append_history_row(&tx, job_id, action, details, now)?;
        }
        tx.commit().context("Failed to commit terminal transition")?;
        Ok(changed == 1)
    }

    /// Read a job's current status inside an open transaction. Drives the
    /// transition-matrix check that gates every status UPDATE.
    fn job_status_tx(conn: &rusqlite::Connection, job_id: i64) -> Result<Option<JobStatus>> {
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM jobs WHERE id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read job status")?;
        status
            .map(|s| {
                s.parse::<JobStatus>()
                    .map_err(|e| anyhow::anyhow!("Invalid job status {s}: {e}"))
            })
            .transpose()
    }

    /// Append one history row on an open connection or transaction. All
    /// history writes funnel through here.
    fn append_history_row(
        conn: &rusqlite::Connection,
        job_id: i64,
        action: HistoryAction,
        details: &str,
        now: SystemTime,
    ) -> Result<()> {
        conn.execute(
            "INSERT INTO history (job_id, action, details, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            params![job_id, action.to_string(), details, system_time_to_unix(&now)],
        )
        .context("Failed to append history")?;
        Ok(())
    }

    pub fn get_job(&self, id: i64) -> Result<Option<Job>> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        conn.query_row("SELECT * FROM jobs WHERE id = ?1", params![id], row_to_job)
            .optional()
            .context("Failed to get job")
    }

    /// Most recent jobs first.
    pub fn list_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        let mut stmt = conn
            .prepare("SELECT * FROM jobs ORDER BY id DESC LIMIT ?1")
            .context("Failed to prepare jobs query")?;
        let jobs = stmt
            .query_map(params![limit as i64], row_to_job)
            .context("Failed to query jobs")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect jobs")?;
        Ok(jobs)
    }

    pub fn list_running_jobs(&self) -> Result<Vec<Job>> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        let mut stmt = conn
            .prepare("SELECT * FROM jobs WHERE status = 'running' ORDER BY id")
            .context("Failed to prepare running jobs query")?;
        let jobs = stmt
            .query_map([], row_to_job)
            .context("Failed to query running jobs")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect running jobs")?;
        Ok(jobs)
    }

    /// Queued jobs, oldest first, for the supervisor's drain pass.
    pub fn list_queued_jobs(&self) -> Result<Vec<Job>> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        let mut stmt = conn
            .prepare("SELECT * FROM jobs WHERE status = 'queued' ORDER BY id")
            .context("Failed to prepare queued jobs query")?;
        let jobs = stmt
            .query_map([], row_to_job)
            .context("Failed to query queued jobs")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect queued jobs")?;
        Ok(jobs)
    }

    pub fn append_history(
        &self,
        job_id: i64,
        action: HistoryAction,
        details: &str,
        now: SystemTime,
    ) -> Result<()> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        Self::append_history_row(&conn, job_id, action, details, now)
    }

    /// History for one job, newest first.
    pub fn job_history(&self, job_id: i64) -> Result<Vec<HistoryEvent>> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        let mut stmt = conn
            .prepare(
                "SELECT * FROM history WHERE job_id = ?1
                 ORDER BY timestamp DESC, id DESC",
            )
            .context("Failed to prepare history query")?;
        let events = stmt
            .query_map(params![job_id], row_to_event)
            .context("Failed to query history")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect history")?;
        Ok(events)
    }

    /// Flip the GPUs of agents not heard from since `cutoff` to offline so
    /// placement stops considering them. The agents' next report restores
    /// the real state. Returns the number of GPUs changed.
    pub fn mark_stale_agents_offline(&self, cutoff: SystemTime) -> Result<usize> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        let changed = conn
            .execute(
                "UPDATE gpus SET status = 'offline', is_available = 0
                 WHERE status != 'offline'
                 AND agent_id IN (SELECT id FROM agents WHERE last_seen < ?1)",
                params![system_time_to_unix(&cutoff)],
            )
            .context("Failed to offline stale agents")?;
        Ok(changed)
    }

    pub fn cluster_stats(&self) -> Result<ClusterStats> {
        let conn = self
            .pool
            .get()
            .context("Failed to get connection from pool")?;
        let count = |sql: &str| -> Result<usize> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
                .context("Failed to count rows")
        };
        Ok(ClusterStats {
            total_agents: count("SELECT COUNT(*) FROM agents")?,
            total_gpus: count("SELECT COUNT(*) FROM gpus")?,
            healthy_gpus: count("SELECT COUNT(*) FROM gpus WHERE status = 'healthy'")?,
            active_jobs: count("SELECT COUNT(*) FROM jobs WHERE status IN ('running', 'pending')")?,
            completed_jobs: count("SELECT COUNT(*) FROM jobs WHERE status = 'completed'")?,
        })
    }
}

fn row_to_agent(row: &Row) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: row.get("id")?,
        hostname: row.get("hostname")?,
        ip_address: row.get("ip_address")?,
        os: row.get("os")?,
        last_seen: unix_to_system_time(row.get("last_seen")?),
    })
}

fn row_to_gpu(row: &Row) -> rusqlite::Result<Gpu> {
    let status_str: String = row.get("status")?;
    Ok(Gpu {
        id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        model: row.get("model")?,
        status: status_str.parse::<GpuStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        temperature_c: row.get("temperature_c")?,
        utilization_pct: row.get("utilization_pct")?,
        memory_total_bytes: row.get("memory_total_bytes")?,
        memory_used_bytes: row.get("memory_used_bytes")?,
        is_available: row.get::<_, i64>("is_available")? != 0,
        pci_bus_id: row.get("pci_bus_id")?,
    })
}

fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
    let status_str: String = row.get("status")?;
    let pid: Option<i64> = row.get("pid")?;
    let started_at: Option<i64> = row.get("started_at")?;
    let finished_at: Option<i64> = row.get("finished_at")?;
    Ok(Job {
        id: row.get("id")?,
        workload_type: row.get("workload_type")?,
        command: row.get("command")?,
        status: status_str.parse::<JobStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        assigned_gpu_id: row.get("assigned_gpu_id")?,
        agent_id: row.get("agent_id")?,
        pid: pid.map(|p| p as u32),
        created_at: unix_to_system_time(row.get("created_at")?),
        started_at: started_at.map(unix_to_system_time),
        finished_at: finished_at.map(unix_to_system_time),
    })
}

fn row_to_event(row: &Row) -> rusqlite::Result<HistoryEvent> {
    let action_str: String = row.get("action")?;
    Ok(HistoryEvent {
        id: row.get("id")?,
        job_id: row.get("job_id")?,
        action: action_str.parse::<HistoryAction>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        details: row.get("details")?,
        timestamp: unix_to_system_time(row.get("timestamp")?),
    })
}

/// Convert SystemTime to Unix timestamp (seconds since epoch)
pub(crate) fn system_time_to_unix(time: &SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs() as i64
}

/// Convert Unix timestamp to SystemTime
pub(crate) fn unix_to_system_time(timestamp: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(timestamp.max(0) as u64)
}
