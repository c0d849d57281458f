//! Serve command - watch a directory and serve its tilesets.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use hgserver::convert::Converter;
use hgserver::service::{command_converter, HgService, ServiceConfigBuilder};

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the serve command.
#[derive(Debug, Default)]
pub struct ServeArgs {
    pub root: Option<PathBuf>,
    pub num_worker: Option<usize>,
    pub poll_interval: Option<u64>,
    pub api_port: Option<u16>,
    pub api_host: Option<String>,
    pub artifact_dir: Option<PathBuf>,
    pub debug: bool,
}

/// Run the serve command.
///
/// Blocks until Ctrl-C, then shuts every component down and waits for
/// in-flight conversions to be abandoned cleanly.
pub fn run(args: ServeArgs) -> Result<(), CliError> {
    let runner = CliRunner::with_debug(args.debug)?;
    runner.log_startup("serve");
    let config = runner.config();

    let service_config = apply_overrides(ServiceConfigBuilder::from_config_file(config), &args)
        .build()?;

    let converter = command_converter(&config.converter);
    let kinds = converter.configured_kinds();
    if kinds.is_empty() {
        warn!("No converter commands configured; files will be catalogued but not converted");
        println!("Warning: no converter commands configured (see 'hgserver config list')");
    } else {
        let names: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
        info!(kinds = %names.join(","), "Converters configured");
    }
    let converter: Arc<dyn Converter> = Arc::new(converter);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    let watch_root = service_config.watch_root().to_path_buf();
    runtime.block_on(async move {
        let handle = HgService::start(service_config, converter).await?;

        println!("Watching {}", watch_root.display());
        println!("Serving tiles on http://{}", handle.local_addr());
        println!("Press Ctrl+C to stop.");

        tokio::signal::ctrl_c().await.map_err(CliError::Runtime)?;
        info!("Received Ctrl-C, shutting down");
        println!();
        println!("Shutting down...");
        handle.stop().await?;
        Ok::<(), CliError>(())
    })?;

    // Let the runtime finish cancelled conversions before exiting
    runtime.shutdown_timeout(Duration::from_secs(5));
    println!("Stopped.");
    Ok(())
}

/// Apply command-line values on top of the config file.
fn apply_overrides(mut builder: ServiceConfigBuilder, args: &ServeArgs) -> ServiceConfigBuilder {
    if let Some(root) = &args.root {
        builder = builder.watch_root(root.clone());
    }
    if let Some(workers) = args.num_worker {
        builder = builder.num_workers(workers);
    }
    if let Some(secs) = args.poll_interval {
        builder = builder.poll_interval(Duration::from_secs(secs));
    }
    if let Some(port) = args.api_port {
        builder = builder.api_port(port);
    }
    if let Some(host) = &args.api_host {
        builder = builder.api_host(host.clone());
    }
    if let Some(dir) = &args.artifact_dir {
        builder = builder.artifact_dir(dir.clone());
    }
    builder
}
