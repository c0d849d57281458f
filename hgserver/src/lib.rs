//! hgserver: turns a directory of genomic data files into HiGlass tilesets
//! and serves them over HTTP.
//!
//! ```text
//!  watch root ──► watcher ──► dispatcher ──► worker pool ──► tile packs
//!                    │            │               │              │
//!                    └────────────┴── catalog ────┘              │
//!                                        │                       │
//!                                        └──────► API ◄──────────┘
//! ```

pub mod api;
pub mod catalog;
pub mod config;
pub mod convert;
pub mod dispatch;
pub mod logging;
pub mod service;
pub mod tilepack;
pub mod watcher;
pub mod worker;

/// Version of the hgserver library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
