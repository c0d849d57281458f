//! Watch-root reconciliation.
//!
//! The watcher polls the watch root on a fixed interval. Polling works the
//! same on local disks, network mounts and FUSE filesystems, where change
//! notifications are unreliable.
//!
//! ```text
//!  scan_tree(root) ──► upsert / mark_missing ──► CatalogStore
//!                                                   │
//!                      pending_conversions() ◄──────┘
//!                               │
//!                               ▼
//!                      Dispatcher::submit()
//! ```

mod daemon;
mod scan;

pub use daemon::{
    TickReport, WatchError, Watcher, WatcherConfig, DEFAULT_MAX_DEPTH, DEFAULT_POLL_INTERVAL,
    DEFAULT_REMOVAL_GRACE,
};
pub use scan::{scan_tree, ObservedFile, ScanOptions, ScanResult};
