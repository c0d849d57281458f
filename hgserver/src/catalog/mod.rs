//! Durable catalog of source files, tilesets and conversion jobs.
//!
//! The catalog is the only place where the relationship between a file on
//! disk and the tileset served for it is recorded.
//!
//! ```text
//!   SourceFile (path)  ──fingerprint──►  Tileset (id = fingerprint prefix)
//!          │                                   │
//!          └──────────► JobRecord ◄────────────┘
//!                   (latest attempt)      artifact: <artifact_dir>/<id>.hgtp
//! ```
//!
//! # Lifecycle of a source file version
//!
//! 1. The watcher records the file with [`CatalogStore::upsert_source_file`].
//! 2. The dispatcher tracks the conversion via [`CatalogStore::record_job_state`].
//! 3. A worker publishes the result with [`CatalogStore::record_tileset_ready`].
//! 4. When the file changes, the previous tileset is kept as stale until the
//!    new one is ready; when it disappears for longer than the grace period
//!    [`CatalogStore::remove_source_file`] drops everything.
//!
//! The watcher applies a whole scan through one
//! [`CatalogStore::transaction`], so a pass over thousands of files costs a
//! single snapshot write.

mod fingerprint;
mod kind;
mod snapshot;
mod store;
mod types;

pub use fingerprint::{Fingerprint, TilesetId, TILESET_ID_LEN};
pub use kind::{filetype, FileKind};
pub use snapshot::SNAPSHOT_VERSION;
pub use store::{CatalogStore, CatalogTransaction, PendingConversion, UpsertOutcome};
pub use types::{
    validate_resolutions, CatalogError, JobRecord, JobState, Resolution, SourceFile, Tileset,
    TilesetStatus,
};

/// File name of the catalog snapshot inside the artifact directory.
pub const CATALOG_FILE_NAME: &str = "catalog.json";
