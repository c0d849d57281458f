//! Conversion job dispatch.
//!
//! ```text
//!  Watcher ──submit()──► ┌────────────────────────┐
//!                        │ Dispatcher             │
//!                        │  queue (FIFO)          │ ──next_job()──► Worker
//!                        │  running set           │ ◄─complete()──  Worker
//!                        │  latest fp per path    │
//!                        └───────────┬────────────┘
//!                                    │ record_job_state()
//!                                    ▼
//!                              CatalogStore
//! ```
//!
//! The dispatcher deduplicates by fingerprint, supersedes queued work for
//! older versions of a path, and schedules retries with bounded exponential
//! backoff according to a [`RetryPolicy`].

mod job;
mod policy;
mod queue;

pub use job::ConversionJob;
pub use policy::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY};
pub use queue::{CompletionOutcome, DispatchStats, Dispatcher, SubmitOutcome};
