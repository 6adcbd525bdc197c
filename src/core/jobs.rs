//! Asynchronous Monte Carlo jobs on top of a key-value store with TTLs.
//!
//! Each job owns two independently expiring entries: a small status record
//! and the heavier result payload. The result outlives the status, so a
//! client that polls late still learns the job completed while the result is
//! retained.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use super::engine::{MonteCarloEngine, SimulationLimits};
use super::error::JobError;
use super::types::{JobStatus, SimulationJob, SimulationParams, SimulationResult};

pub trait JobStore: Send + Sync {
    fn put(&self, key: &str, value: String, ttl: Duration);
    /// Stores `value` when no live entry exists under `key`, or when
    /// `replaceable` accepts the live entry. The check and the write are one
    /// atomic step. Returns whether the value was stored.
    fn put_if_replaceable(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
        replaceable: &dyn Fn(&str) -> bool,
    ) -> bool;
    fn get(&self, key: &str) -> Option<String>;
    fn delete(&self, key: &str);

    fn put_if_absent(&self, key: &str, value: String, ttl: Duration) -> bool {
        self.put_if_replaceable(key, value, ttl, &|_| false)
    }
}

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
pub struct InMemoryJobStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drops every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobStore for InMemoryJobStore {
    fn put(&self, key: &str, value: String, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.lock()
            .insert(key.to_string(), Entry { value, expires_at });
    }

    fn put_if_replaceable(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
        replaceable: &dyn Fn(&str) -> bool,
    ) -> bool {
        let now = Instant::now();
        let mut entries = self.lock();
        if entries
            .get(key)
            .is_some_and(|e| e.is_live(now) && !replaceable(&e.value))
        {
            return false;
        }
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        true
    }

    fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(e) if e.is_live(now) => return Some(e.value.clone()),
            Some(_) => {}
            None => return None,
        }
        entries.remove(key);
        None
    }

    fn delete(&self, key: &str) {
        self.lock().remove(key);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinatorConfig {
    pub status_ttl: Duration,
    pub result_ttl: Duration,
    pub limits: SimulationLimits,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            status_ttl: Duration::from_secs(60 * 60),
            result_ttl: Duration::from_secs(24 * 60 * 60),
            limits: SimulationLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_attempts: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusRecord {
    status: JobStatus,
    params: SimulationParams,
    error_message: Option<String>,
}

fn status_key(job_id: &str) -> String {
    format!("simulation:{job_id}:status")
}

fn result_key(job_id: &str) -> String {
    format!("simulation:{job_id}:result")
}

fn generate_job_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("sim-{millis}-{n}")
}

/// Runs Monte Carlo projections in the background and tracks them through
/// `queued -> running -> completed | failed`. One attempt per submission;
/// failures are recorded, never retried.
#[derive(Clone)]
pub struct SimulationJobCoordinator {
    store: Arc<dyn JobStore>,
    engine: MonteCarloEngine,
    config: CoordinatorConfig,
}

impl SimulationJobCoordinator {
    pub fn new(store: Arc<dyn JobStore>, config: CoordinatorConfig) -> Self {
        Self {
            store,
            engine: MonteCarloEngine::new(config.limits),
            config,
        }
    }

    pub fn in_memory(config: CoordinatorConfig) -> Self {
        Self::new(Arc::new(InMemoryJobStore::new()), config)
    }

    pub fn config(&self) -> CoordinatorConfig {
        self.config
    }

    /// Records the job as queued and hands it to the blocking pool of the
    /// current Tokio runtime. Returns the job id, generated when the caller
    /// supplies none. An id may be reused once its previous job finished.
    pub fn submit(
        &self,
        job_id: Option<String>,
        params: SimulationParams,
    ) -> Result<String, JobError> {
        let runtime = Handle::try_current().map_err(|_| JobError::NoRuntime)?;
        let job_id = job_id.unwrap_or_else(generate_job_id);
        let record = StatusRecord {
            status: JobStatus::Queued,
            params: params.clone(),
            error_message: None,
        };
        let encoded = serde_json::to_string(&record)?;
        let key = status_key(&job_id);

        let finished = |existing: &str| {
            serde_json::from_str::<StatusRecord>(existing)
                .is_ok_and(|record| record.status.is_terminal())
        };
        if !self
            .store
            .put_if_replaceable(&key, encoded, self.config.status_ttl, &finished)
        {
            return Err(JobError::DuplicateJob(job_id));
        }
        // A result left over from an earlier job under this id is stale now.
        self.store.delete(&result_key(&job_id));

        info!(job_id = %job_id, "simulation job queued");
        let worker = self.clone();
        let id = job_id.clone();
        runtime.spawn_blocking(move || worker.execute(&id, params));
        Ok(job_id)
    }

    fn execute(&self, job_id: &str, params: SimulationParams) {
        self.write_status(job_id, JobStatus::Running, &params, None);
        info!(job_id, "simulation job running");

        let outcome = catch_unwind(AssertUnwindSafe(|| self.engine.run(&params)));
        let failure = match outcome {
            Ok(Ok(result)) => match serde_json::to_string(&result) {
                Ok(encoded) => {
                    self.store
                        .put(&result_key(job_id), encoded, self.config.result_ttl);
                    self.write_status(job_id, JobStatus::Completed, &params, None);
                    info!(job_id, "simulation job completed");
                    return;
                }
                Err(e) => {
                    error!(job_id, error = %e, "could not encode simulation result");
                    e.to_string()
                }
            },
            Ok(Err(e)) => e.to_string(),
            Err(_) => "simulation aborted unexpectedly".to_string(),
        };

        warn!(job_id, error = %failure, "simulation job failed");
        self.write_status(job_id, JobStatus::Failed, &params, Some(failure));
    }

    fn write_status(
        &self,
        job_id: &str,
        status: JobStatus,
        params: &SimulationParams,
        error_message: Option<String>,
    ) {
        let record = StatusRecord {
            status,
            params: params.clone(),
            error_message,
        };
        match serde_json::to_string(&record) {
            Ok(encoded) => self
                .store
                .put(&status_key(job_id), encoded, self.config.status_ttl),
            Err(e) => error!(job_id, error = %e, "could not encode job status"),
        }
    }

    fn read_status(&self, job_id: &str) -> Result<Option<StatusRecord>, JobError> {
        self.store
            .get(&status_key(job_id))
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(JobError::from)
    }

    fn read_result(&self, job_id: &str) -> Result<Option<SimulationResult>, JobError> {
        self.store
            .get(&result_key(job_id))
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(JobError::from)
    }

    /// `None` means the job is unknown or has expired.
    pub fn get_status(&self, job_id: &str) -> Result<Option<JobStatus>, JobError> {
        if let Some(record) = self.read_status(job_id)? {
            return Ok(Some(record.status));
        }
        if self.store.get(&result_key(job_id)).is_some() {
            return Ok(Some(JobStatus::Completed));
        }
        Ok(None)
    }

    pub fn get_result(&self, job_id: &str) -> Result<SimulationResult, JobError> {
        if let Some(result) = self.read_result(job_id)? {
            return Ok(result);
        }
        match self.read_status(job_id)? {
            None => Err(JobError::NotFound(job_id.to_string())),
            Some(record) => match record.status {
                JobStatus::Queued | JobStatus::Running => Err(JobError::NotReady {
                    job_id: job_id.to_string(),
                    status: record.status,
                }),
                JobStatus::Failed => Err(JobError::JobFailed {
                    job_id: job_id.to_string(),
                    message: record.error_message.unwrap_or_default(),
                }),
                // Result already evicted.
                JobStatus::Completed => Err(JobError::NotFound(job_id.to_string())),
            },
        }
    }

    pub fn get_job(&self, job_id: &str) -> Result<SimulationJob, JobError> {
        let record = self.read_status(job_id)?;
        let result = self.read_result(job_id)?;
        match (record, result) {
            (Some(record), result) => Ok(SimulationJob {
                job_id: job_id.to_string(),
                status: record.status,
                params: Some(record.params),
                result,
                error_message: record.error_message,
            }),
            (None, Some(result)) => Ok(SimulationJob {
                job_id: job_id.to_string(),
                status: JobStatus::Completed,
                params: None,
                result: Some(result),
                error_message: None,
            }),
            (None, None) => Err(JobError::NotFound(job_id.to_string())),
        }
    }
}

/// Polls on a fixed interval until the job leaves `queued`/`running`.
///
/// A failed job is a successful poll (`Ok(JobStatus::Failed)`); running out
/// of attempts is `PollTimeout`, which says nothing about the job itself.
pub async fn poll_until_settled(
    coordinator: &SimulationJobCoordinator,
    job_id: &str,
    poll: PollConfig,
) -> Result<JobStatus, JobError> {
    let attempts = poll.max_attempts.max(1);
    for attempt in 1..=attempts {
        match coordinator.get_status(job_id)? {
            Some(status) if status.is_terminal() => return Ok(status),
            Some(_) => {}
            None => return Err(JobError::NotFound(job_id.to_string())),
        }
        if attempt < attempts {
            tokio::time::sleep(poll.interval).await;
        }
    }
    Err(JobError::PollTimeout {
        job_id: job_id.to_string(),
        attempts,
    })
}
