//! The dispatcher: deduplicating FIFO queue with retry scheduling.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job::ConversionJob;
use super::policy::RetryPolicy;
use crate::catalog::{CatalogStore, Fingerprint, JobState};
use crate::convert::ConversionError;

/// What happened to a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Queued for a worker.
    Queued,
    /// Queued, replacing a queued job for an older version of the same path.
    Superseded,
    /// A job for this fingerprint is already queued or running.
    Duplicate,
    /// The catalog already has a tileset, or the version failed permanently.
    NotNeeded,
}

impl SubmitOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, SubmitOutcome::Queued | SubmitOutcome::Superseded)
    }
}

/// What the dispatcher did with a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Done,
    /// Requeued after a backoff delay.
    Retrying { delay: Duration },
    /// Given up; recorded as a permanent error.
    Failed,
    /// The file changed or vanished while the job ran; the failure is dropped.
    Discarded,
}

/// Snapshot of queue occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Jobs ready to run.
    pub queued: usize,
    /// Jobs waiting out a retry delay.
    pub backing_off: usize,
    pub running: usize,
}

struct Pending {
    job: ConversionJob,
    ready_at: Instant,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<Pending>,
    running: HashSet<Fingerprint>,
    /// Latest fingerprint submitted per path.
    latest: HashMap<PathBuf, Fingerprint>,
}

impl QueueState {
    fn is_active(&self, fingerprint: &Fingerprint) -> bool {
        self.running.contains(fingerprint)
            || self.queue.iter().any(|p| p.job.fingerprint() == fingerprint)
    }
}

enum Take {
    Job(ConversionJob),
    WaitUntil(Instant),
    Idle,
}

/// Accepts conversion jobs and hands them to workers.
///
/// At most one job per fingerprint is queued or running at any time. Jobs
/// are dispatched in submission order; a retried job goes to the back of
/// the queue and is skipped until its backoff has elapsed.
///
/// Job state changes are written to the catalog while the queue lock is
/// held, so the catalog never sees them out of order. Those writes block;
/// [`Dispatcher::next_job`] runs them on the blocking pool, and async
/// callers of the other methods do the same.
pub struct Dispatcher {
    catalog: Arc<CatalogStore>,
    policy: RetryPolicy,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Dispatcher {
    pub fn new(catalog: Arc<CatalogStore>, policy: RetryPolicy) -> Self {
        Self {
            catalog,
            policy,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Submit a job. Idempotent per fingerprint.
    pub fn submit(&self, job: ConversionJob) -> SubmitOutcome {
        self.submit_all([job]).pop().unwrap_or(SubmitOutcome::NotNeeded)
    }

    /// Submit a batch of jobs, returning one outcome per job in order.
    ///
    /// Every newly queued job is recorded in a single catalog transaction.
    ///
    /// Blocking: commits to the catalog.
    pub fn submit_all(
        &self,
        jobs: impl IntoIterator<Item = ConversionJob>,
    ) -> Vec<SubmitOutcome> {
        let mut state = self.state.lock();
        let mut outcomes = Vec::new();
        let mut queued = Vec::new();

        for mut job in jobs {
            let fingerprint = job.fingerprint().clone();
            if state.is_active(&fingerprint) {
                outcomes.push(SubmitOutcome::Duplicate);
                continue;
            }
            if !self.catalog.needs_conversion(&fingerprint) {
                outcomes.push(SubmitOutcome::NotNeeded);
                continue;
            }

            let path = job.source_path().to_path_buf();
            let superseded = match state.latest.insert(path, fingerprint.clone()) {
                Some(previous) if previous != fingerprint => {
                    state.queue.retain(|p| p.job.fingerprint() != &previous);
                    true
                }
                _ => false,
            };

            job.state = JobState::Queued;
            debug!(
                path = %job.source_path().display(),
                fingerprint = %fingerprint.short(),
                kind = %job.kind(),
                "Conversion queued"
            );
            queued.push(job.clone());
            state.queue.push_back(Pending {
                job,
                ready_at: Instant::now(),
            });
            outcomes.push(if superseded {
                SubmitOutcome::Superseded
            } else {
                SubmitOutcome::Queued
            });
        }

        self.record_all(&queued);
        drop(state);

        for _ in &queued {
            self.notify.notify_one();
        }
        outcomes
    }

    /// Wait for the next runnable job.
    ///
    /// Returns `None` once `shutdown` is cancelled.
    pub async fn next_job(
        self: &Arc<Self>,
        shutdown: &CancellationToken,
    ) -> Option<ConversionJob> {
        loop {
            if shutdown.is_cancelled() {
                return None;
            }
            // Taking a job commits its running state to the catalog
            let dispatcher = Arc::clone(self);
            let now = Instant::now();
            let take = tokio::task::spawn_blocking(move || dispatcher.try_take(now));
            let take = match take.await {
                Ok(take) => take,
                Err(e) => {
                    error!(error = %e, "Dispatch task failed");
                    return None;
                }
            };
            let wake_at = match take {
                Take::Job(job) => return Some(job),
                Take::WaitUntil(at) => Some(at),
                Take::Idle => None,
            };

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                _ = self.notify.notified() => {}
                _ = sleep_until(wake_at) => {}
            }
        }
    }

    fn try_take(&self, now: Instant) -> Take {
        let mut state = self.state.lock();
        let Some(index) = state.queue.iter().position(|p| p.ready_at <= now) else {
            return match state.queue.iter().map(|p| p.ready_at).min() {
                Some(at) => Take::WaitUntil(at),
                None => Take::Idle,
            };
        };

        let Some(Pending { mut job, .. }) = state.queue.remove(index) else {
            return Take::Idle;
        };
        state.running.insert(job.fingerprint().clone());
        job.state = JobState::Running;
        self.record(&job);
        Take::Job(job)
    }

    /// Report the result of a job obtained from [`Dispatcher::next_job`].
    pub fn complete(
        &self,
        mut job: ConversionJob,
        result: Result<(), ConversionError>,
    ) -> CompletionOutcome {
        let fingerprint = job.fingerprint().clone();
        let mut state = self.state.lock();

        let outcome = match result {
            Ok(()) => CompletionOutcome::Done,
            Err(err) => {
                job.attempts += 1;
                job.last_error = Some(err.to_string());
                let superseded = state.latest.get(job.source_path()) != Some(&fingerprint)
                    || !self.catalog.is_current(&fingerprint);

                if superseded {
                    debug!(
                        path = %job.source_path().display(),
                        error = %err,
                        "Dropping failure of superseded job"
                    );
                    CompletionOutcome::Discarded
                } else if err.is_retryable() && self.policy.should_retry(job.attempts) {
                    let delay = self.policy.delay_for(job.attempts);
                    job.state = JobState::Failed;
                    self.record(&job);
                    warn!(
                        path = %job.source_path().display(),
                        attempt = job.attempts,
                        max_attempts = self.policy.max_attempts,
                        reason = err.reason(),
                        error = %err,
                        retry_in_ms = delay.as_millis() as u64,
                        "Conversion failed, will retry"
                    );
                    state.queue.push_back(Pending {
                        job,
                        ready_at: Instant::now() + delay,
                    });
                    CompletionOutcome::Retrying { delay }
                } else {
                    job.state = JobState::Error;
                    self.record(&job);
                    warn!(
                        path = %job.source_path().display(),
                        attempts = job.attempts,
                        reason = err.reason(),
                        error = %err,
                        "Conversion failed permanently"
                    );
                    CompletionOutcome::Failed
                }
            }
        };

        state.running.remove(&fingerprint);
        drop(state);

        if matches!(outcome, CompletionOutcome::Retrying { .. }) {
            // Idle workers must recompute their wake-up deadline
            self.notify.notify_one();
        }
        outcome
    }

    /// Drop queued work for a path that left the watch root.
    ///
    /// A job already running for the path finishes, and its result is
    /// discarded by the catalog.
    pub fn cancel_path(&self, path: &Path) -> usize {
        let mut state = self.state.lock();
        state.latest.remove(path);
        let before = state.queue.len();
        state.queue.retain(|p| p.job.source_path() != path);
        let removed = before - state.queue.len();
        if removed > 0 {
            info!(path = %path.display(), removed, "Cancelled queued conversions");
        }
        removed
    }

    pub fn stats(&self) -> DispatchStats {
        let state = self.state.lock();
        let now = Instant::now();
        let backing_off = state.queue.iter().filter(|p| p.ready_at > now).count();
        DispatchStats {
            queued: state.queue.len() - backing_off,
            backing_off,
            running: state.running.len(),
        }
    }

    fn record(&self, job: &ConversionJob) {
        self.record_all(std::slice::from_ref(job));
    }

    fn record_all(&self, jobs: &[ConversionJob]) {
        if jobs.is_empty() {
            return;
        }
        let result = self.catalog.transaction(|tx| {
            for job in jobs {
                tx.record_job_state(
                    job.fingerprint(),
                    job.state,
                    job.attempts,
                    job.last_error.clone(),
                );
            }
            Ok(())
        });
        if let Err(e) = result {
            warn!(jobs = jobs.len(), error = %e, "Failed to record job states");
        }
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FileKind, SourceFile};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn setup(policy: RetryPolicy) -> (Arc<CatalogStore>, Arc<Dispatcher>) {
        let catalog = Arc::new(CatalogStore::in_memory());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&catalog), policy));
        (catalog, dispatcher)
    }

    fn observe(catalog: &CatalogStore, path: &str, mtime: u64) -> ConversionJob {
        let source = SourceFile::new(path, 10, at(mtime), FileKind::Matrix);
        catalog.upsert_source_file(source.clone()).unwrap();
        ConversionJob::new(source)
    }

    async fn take(dispatcher: &Arc<Dispatcher>) -> ConversionJob {
        let token = CancellationToken::new();
        tokio::time::timeout(Duration::from_secs(600), dispatcher.next_job(&token))
            .await
            .expect("timed out waiting for job")
            .expect("dispatcher returned None")
    }

    #[tokio::test]
    async fn test_duplicate_submissions_are_dropped() {
        let (catalog, dispatcher) = setup(RetryPolicy::default());
        let job = observe(&catalog, "/d/a.cool", 1);

        assert_eq!(dispatcher.submit(job.clone()), SubmitOutcome::Queued);
        assert_eq!(dispatcher.submit(job.clone()), SubmitOutcome::Duplicate);

        let running = take(&dispatcher).await;
        assert_eq!(dispatcher.submit(job.clone()), SubmitOutcome::Duplicate);
        assert_eq!(dispatcher.stats().running, 1);
        assert_eq!(
            catalog.job(running.fingerprint()).unwrap().state,
            JobState::Running
        );
    }

    #[test]
    fn test_submit_all_records_batch_in_one_write() {
        let temp = tempfile::TempDir::new().unwrap();
        let catalog = Arc::new(CatalogStore::open(temp.path().join("catalog.json")).unwrap());
        let dispatcher = Dispatcher::new(Arc::clone(&catalog), RetryPolicy::default());
        let sources: Vec<SourceFile> = (0..20)
            .map(|i| SourceFile::new(format!("/d/{}.cool", i), 10, at(1), FileKind::Matrix))
            .collect();
        catalog
            .transaction(|tx| {
                for source in &sources {
                    tx.upsert_source_file(source.clone());
                }
                Ok(())
            })
            .unwrap();
        let writes = catalog.snapshot_writes();

        let mut jobs: Vec<ConversionJob> = sources.into_iter().map(ConversionJob::new).collect();
        jobs.push(jobs[0].clone());
        let outcomes = dispatcher.submit_all(jobs);

        assert_eq!(outcomes.iter().filter(|o| o.is_queued()).count(), 20);
        assert_eq!(outcomes[20], SubmitOutcome::Duplicate);
        assert_eq!(catalog.snapshot_writes(), writes + 1);
        assert_eq!(dispatcher.stats().queued, 20);
        assert!(catalog
            .list_jobs()
            .iter()
            .all(|j| j.state == JobState::Queued));
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (catalog, dispatcher) = setup(RetryPolicy::default());
        for name in ["/d/1.cool", "/d/2.cool", "/d/3.cool"] {
            dispatcher.submit(observe(&catalog, name, 1));
        }

        for expected in ["/d/1.cool", "/d/2.cool", "/d/3.cool"] {
            assert_eq!(take(&dispatcher).await.source_path(), Path::new(expected));
        }
    }

    #[tokio::test]
    async fn test_new_version_supersedes_queued_job() {
        let (catalog, dispatcher) = setup(RetryPolicy::default());
        let v1 = observe(&catalog, "/d/a.cool", 1);
        dispatcher.submit(v1);
        let v2 = observe(&catalog, "/d/a.cool", 2);

        assert_eq!(dispatcher.submit(v2.clone()), SubmitOutcome::Superseded);
        assert_eq!(dispatcher.stats().queued, 1);
        assert_eq!(take(&dispatcher).await.fingerprint(), v2.fingerprint());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(60));
        let (catalog, dispatcher) = setup(policy);
        dispatcher.submit(observe(&catalog, "/d/a.cool", 1));
        let job = take(&dispatcher).await;

        let outcome = dispatcher.complete(job, Err(ConversionError::Tool("exit 1".into())));

        assert_eq!(
            outcome,
            CompletionOutcome::Retrying {
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(dispatcher.stats().backing_off, 1);
        let started = Instant::now();
        let retried = take(&dispatcher).await;
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(retried.attempts, 1);
        let record = catalog.job(retried.fingerprint()).unwrap();
        assert_eq!(record.state, JobState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_become_permanent() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10), Duration::from_secs(1));
        let (catalog, dispatcher) = setup(policy);
        let job = observe(&catalog, "/d/a.cool", 1);
        dispatcher.submit(job.clone());

        let first = take(&dispatcher).await;
        dispatcher.complete(first, Err(ConversionError::Tool("boom".into())));
        let second = take(&dispatcher).await;
        let outcome = dispatcher.complete(second, Err(ConversionError::Tool("boom".into())));

        assert_eq!(outcome, CompletionOutcome::Failed);
        let record = catalog.job(job.fingerprint()).unwrap();
        assert_eq!(record.state, JobState::Error);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.last_error.as_deref(), Some("conversion tool failed: boom"));
        assert_eq!(dispatcher.submit(job), SubmitOutcome::NotNeeded);
        assert_eq!(dispatcher.stats(), DispatchStats::default());
    }

    #[tokio::test]
    async fn test_unsupported_kind_is_not_retried() {
        let (catalog, dispatcher) = setup(RetryPolicy::default());
        dispatcher.submit(observe(&catalog, "/d/a.cool", 1));
        let job = take(&dispatcher).await;

        let outcome = dispatcher.complete(
            job,
            Err(ConversionError::UnsupportedKind(FileKind::Matrix)),
        );

        assert_eq!(outcome, CompletionOutcome::Failed);
    }

    #[tokio::test]
    async fn test_failure_of_superseded_job_is_discarded() {
        let (catalog, dispatcher) = setup(RetryPolicy::default());
        dispatcher.submit(observe(&catalog, "/d/a.cool", 1));
        let old = take(&dispatcher).await;
        let v2 = observe(&catalog, "/d/a.cool", 2);
        dispatcher.submit(v2);

        let outcome = dispatcher.complete(old, Err(ConversionError::Tool("late".into())));

        assert_eq!(outcome, CompletionOutcome::Discarded);
        assert_eq!(dispatcher.stats().queued, 1);
    }

    #[tokio::test]
    async fn test_cancel_path_and_shutdown() {
        let (catalog, dispatcher) = setup(RetryPolicy::default());
        dispatcher.submit(observe(&catalog, "/d/a.cool", 1));

        assert_eq!(dispatcher.cancel_path(Path::new("/d/a.cool")), 1);

        let token = CancellationToken::new();
        let waiter = dispatcher.next_job(&token);
        token.cancel();
        assert!(waiter.await.is_none());
    }

    #[tokio::test]
    async fn test_waiting_worker_wakes_on_submit() {
        let (catalog, dispatcher) = setup(RetryPolicy::default());
        let token = CancellationToken::new();

        let worker = {
            let dispatcher = Arc::clone(&dispatcher);
            let token = token.clone();
            tokio::spawn(async move { dispatcher.next_job(&token).await })
        };
        tokio::task::yield_now().await;
        dispatcher.submit(observe(&catalog, "/d/a.cool", 1));

        let job = tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap();
        assert!(job.is_some());
    }
}
