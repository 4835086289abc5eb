//! Batch orchestrator
//!
//! Selects up to `batch_size` pending names, fetches every page of each and
//! writes each page before the next is requested, so an interrupted batch
//! leaves the store consistent and the next batch resumes from it.

use crate::config::{ApiKey, Config};
use crate::fetcher::{ContributorsClient, FetchOutcome};
use crate::ratelimit::{BackoffPolicy, Clock, RateLimiter, SystemClock};
use crate::storage::{
    FetchRecord, FetchStatus, RecordStore, RunStatus, StorageError, StorageResult,
};
use crate::HarvestError;
use chrono::Utc;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinSet;

/// Base delay between write attempts; attempt `n` waits `n` times this
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Log progress every this many projects
const PROGRESS_EVERY: usize = 10;

/// Cooperative stop flag shared between the CLI and workers
///
/// Workers check it between projects; a project already in flight
/// finishes all of its pages first.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Summary of one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Names returned by the pending selection
    pub selected: usize,
    /// Names whose fetch was started
    pub attempted: usize,
    /// Fetch records successfully written
    pub records_written: usize,
    pub succeeded_pages: usize,
    pub failed_pages: usize,
    /// Records dropped after every write attempt failed
    pub skipped_writes: usize,
    /// Shutdown was observed before every selected name was attempted
    pub cancelled: bool,
}

impl BatchReport {
    fn merge(&mut self, other: BatchReport) {
        self.attempted += other.attempted;
        self.records_written += other.records_written;
        self.succeeded_pages += other.succeeded_pages;
        self.failed_pages += other.failed_pages;
        self.skipped_writes += other.skipped_writes;
        self.cancelled |= other.cancelled;
    }
}

/// Batch orchestrator over a record store and a contributors client
pub struct Harvester<S, C: Clock = SystemClock> {
    client: Arc<ContributorsClient<C>>,
    store: Arc<Mutex<S>>,
    workers: usize,
    write_attempts: u32,
    write_retry_delay: Duration,
    shutdown: ShutdownSignal,
}

impl<S, C: Clock> Clone for Harvester<S, C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            store: Arc::clone(&self.store),
            workers: self.workers,
            write_attempts: self.write_attempts,
            write_retry_delay: self.write_retry_delay,
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S> Harvester<S, SystemClock>
where
    S: RecordStore + Send + 'static,
{
    /// Builds the limiter, client and orchestrator described by `config`
    ///
    /// # Arguments
    ///
    /// * `config` - Validated harvester configuration
    /// * `api_key` - Credential read from the environment
    /// * `store` - Record store bound to the work table
    pub fn from_config(config: &Config, api_key: ApiKey, store: S) -> Result<Self, HarvestError> {
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let client = ContributorsClient::new(
            &config.api,
            api_key,
            limiter,
            BackoffPolicy::for_retry_429(&config.retry_429),
        )?;
        Ok(Self::new(client, store, config))
    }
}

impl<S, C> Harvester<S, C>
where
    S: RecordStore + Send + 'static,
    C: Clock + 'static,
{
    pub fn new(client: ContributorsClient<C>, store: S, config: &Config) -> Self {
        Self {
            client: Arc::new(client),
            store: Arc::new(Mutex::new(store)),
            workers: config.harvest.workers.max(1) as usize,
            write_attempts: config.store.write_attempts,
            write_retry_delay: WRITE_RETRY_DELAY,
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_write_retry_delay(mut self, delay: Duration) -> Self {
        self.write_retry_delay = delay;
        self
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Shared handle to the record store
    pub fn store(&self) -> Arc<Mutex<S>> {
        Arc::clone(&self.store)
    }

    fn lock_store(&self) -> Result<MutexGuard<'_, S>, StorageError> {
        self.store.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Runs one batch of up to `batch_size` pending projects
    ///
    /// Only a failed pending selection is returned as an error. Fetch
    /// failures are recorded and write failures are skipped, both counted
    /// in the report.
    pub async fn run_batch(&self, batch_size: usize) -> Result<BatchReport, HarvestError> {
        let names = self.lock_store()?.select_pending(batch_size)?;

        let mut report = BatchReport {
            selected: names.len(),
            ..BatchReport::default()
        };

        if names.is_empty() {
            tracing::info!("No pending projects, nothing to do");
            return Ok(report);
        }

        let workers = self.workers.min(names.len());
        tracing::info!(
            "Starting batch: {} projects selected, {} worker(s)",
            names.len(),
            workers
        );

        let total = names.len();
        let queue = Arc::new(Mutex::new(names.into_iter().collect::<VecDeque<_>>()));
        let mut tasks = JoinSet::new();

        for worker_id in 0..workers {
            let harvester = self.clone();
            let queue = Arc::clone(&queue);
            tasks.spawn(async move { harvester.drain(worker_id, queue, total).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(worker_report) => report.merge(worker_report),
                Err(e) => tracing::error!("Harvest worker failed: {}", e),
            }
        }

        tracing::info!(
            "Batch finished: {} of {} projects attempted, {} records written, {} pages ok, {} pages failed, {} writes skipped{}",
            report.attempted,
            report.selected,
            report.records_written,
            report.succeeded_pages,
            report.failed_pages,
            report.skipped_writes,
            if report.cancelled { " (interrupted)" } else { "" }
        );

        Ok(report)
    }

    /// Runs one batch inside a `harvest_runs` row
    ///
    /// Returns the run ID with the report. The run ends `interrupted` when
    /// shutdown cut the batch short and `failed` when the batch errored.
    pub async fn run_batch_tracked(
        &self,
        batch_size: usize,
        config_hash: &str,
    ) -> Result<(i64, BatchReport), HarvestError> {
        let run_id = self.lock_store()?.create_run(config_hash)?;
        tracing::info!("Starting harvest run {}", run_id);

        match self.run_batch(batch_size).await {
            Ok(report) => {
                let status = if report.cancelled {
                    RunStatus::Interrupted
                } else {
                    RunStatus::Completed
                };
                self.lock_store()?
                    .complete_run(run_id, status, report.records_written as u64)?;
                Ok((run_id, report))
            }
            Err(e) => {
                let closed = self
                    .lock_store()
                    .and_then(|mut store| store.complete_run(run_id, RunStatus::Failed, 0));
                if let Err(close_err) = closed {
                    tracing::error!("Could not close run {}: {}", run_id, close_err);
                }
                Err(e)
            }
        }
    }

    async fn drain(
        &self,
        worker_id: usize,
        queue: Arc<Mutex<VecDeque<String>>>,
        total: usize,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        loop {
            let Some((name, remaining)) = pop_name(&queue) else {
                break;
            };

            if self.shutdown.is_triggered() {
                tracing::info!(
                    "Worker {} stopping on shutdown, {} project(s) left pending",
                    worker_id,
                    remaining + 1
                );
                report.cancelled = true;
                break;
            }

            self.harvest_project(&name, &mut report).await;

            let done = total - remaining;
            if done % PROGRESS_EVERY == 0 {
                tracing::info!("Progress: {} of {} projects harvested", done, total);
            }
        }

        report
    }

    /// Fetches and persists every page of one project
    async fn harvest_project(&self, project: &str, report: &mut BatchReport) {
        report.attempted += 1;

        let mut cursor = match self.client.pages(project) {
            Ok(cursor) => cursor,
            Err(e) => {
                tracing::warn!("Cannot request project '{}': {}", project, e);
                let record = FetchRecord {
                    project_name: project.to_string(),
                    page: 1,
                    status: FetchStatus::Failed {
                        error: json!({ "Exception": e.to_string() }).to_string(),
                    },
                    ts: Some(Utc::now().to_rfc3339()),
                };
                report.failed_pages += 1;
                self.persist(&record, report).await;
                return;
            }
        };

        while let Some(page) = cursor.next_page().await {
            match &page.outcome {
                FetchOutcome::Success(_) => report.succeeded_pages += 1,
                FetchOutcome::Failure(failure) => {
                    report.failed_pages += 1;
                    tracing::warn!(
                        "Request for project '{}', page {} failed: {}",
                        project,
                        page.number,
                        failure
                    );
                }
            }

            let record = FetchRecord::from_outcome(project, page.number, &page.outcome);
            if !self.persist(&record, report).await {
                if page.number > 1 {
                    self.requeue(project, page.number).await;
                }
                return;
            }
        }
    }

    /// Writes one record; false when it was skipped
    async fn persist(&self, record: &FetchRecord, report: &mut BatchReport) -> bool {
        let written = self
            .write_with_retry(&record.project_name, record.page, |store| {
                store.upsert_fetch_record(record)
            })
            .await;

        if written {
            report.records_written += 1;
        } else {
            report.skipped_writes += 1;
        }
        written
    }

    /// Puts a project with an unwritten page back into the pending pool
    ///
    /// Pages already stored are dropped, so the project is never exported
    /// with a hole where `missing_page` should be.
    async fn requeue(&self, project: &str, missing_page: u32) {
        let reset = self
            .write_with_retry(project, 1, |store| store.reset_project(project))
            .await;

        if reset {
            tracing::warn!(
                "Project '{}' returned to pending after page {} could not be written",
                project,
                missing_page
            );
        } else {
            tracing::error!(
                "Project '{}' is missing page {} and could not be reset; its stored pages are incomplete",
                project,
                missing_page
            );
        }
    }

    /// Runs `write` against the store, retrying with a linear delay
    ///
    /// Returns false once every attempt failed.
    async fn write_with_retry<F>(&self, project: &str, page: u32, mut write: F) -> bool
    where
        F: FnMut(&mut S) -> StorageResult<()>,
    {
        for attempt in 1..=self.write_attempts {
            let error = match self.with_store(&mut write) {
                Ok(()) => return true,
                Err(e) => e,
            };

            if attempt == self.write_attempts {
                tracing::error!(
                    "Skipping write for project '{}', page {} after {} attempts: {}",
                    project,
                    page,
                    attempt,
                    error
                );
                break;
            }

            tracing::warn!(
                "Write for project '{}', page {} failed (attempt {}/{}): {}",
                project,
                page,
                attempt,
                self.write_attempts,
                error
            );
            tokio::time::sleep(self.write_retry_delay * attempt).await;
        }

        false
    }

    fn with_store<T>(&self, op: impl FnOnce(&mut S) -> StorageResult<T>) -> StorageResult<T> {
        let mut store = self.lock_store()?;
        op(&mut store)
    }
}

/// Takes the next name and reports how many remain after it
fn pop_name(queue: &Mutex<VecDeque<String>>) -> Option<(String, usize)> {
    let mut queue = queue.lock().ok()?;
    let name = queue.pop_front()?;
    Some((name, queue.len()))
}
