//! Conversion workers.
//!
//! Each worker loops on [`Dispatcher::next_job`](crate::dispatch::Dispatcher::next_job),
//! runs the configured [`Converter`](crate::convert::Converter) under a
//! timeout, packs the produced tiles and publishes the tileset:
//!
//! ```text
//! <artifact_dir>/.staging/job-XXXX/out/tiles/...   converter output
//! <artifact_dir>/.staging/job-XXXX/pack.hgtp       packed
//! <artifact_dir>/<tileset-id>.hgtp                 renamed into place
//! ```
//!
//! Only then is the tileset recorded in the catalog, so a listed tileset
//! always has its artifact on disk.

mod pool;

pub use pool::{
    Published, WorkerContext, WorkerPool, DEFAULT_CONVERSION_TIMEOUT, DEFAULT_NUM_WORKERS,
    STAGING_DIR_NAME,
};
