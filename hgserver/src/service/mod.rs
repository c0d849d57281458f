//! Service facade: wires the catalog, watcher, dispatcher, workers and API
//! into one running instance.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hgserver::config::ConfigFile;
//! use hgserver::service::{command_converter, HgService, ServiceConfigBuilder};
//!
//! let file = ConfigFile::load()?;
//! let config = ServiceConfigBuilder::from_config_file(&file)
//!     .watch_root("/data/hic")
//!     .build()?;
//! let converter = Arc::new(command_converter(&file.converter));
//!
//! let handle = HgService::start(config, converter).await?;
//! tokio::signal::ctrl_c().await?;
//! handle.stop().await?;
//! ```

mod config;
mod error;
mod runtime;

pub use config::{command_converter, ServiceConfig, ServiceConfigBuilder};
pub use error::ServiceError;
pub use runtime::{HgService, ServiceHandle};
