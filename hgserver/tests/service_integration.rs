//! Integration tests for the full service.
//!
//! Each test starts a real service (watcher, dispatcher, workers and API
//! server) over temporary directories, with a fake converter standing in
//! for the external tiling tools.
//!
//! Run with: `cargo test --test service_integration`

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Semaphore;
use tower::ServiceExt;

use hgserver::api::{router, ApiState};
use hgserver::catalog::{CatalogError, JobState, Resolution, TilesetStatus};
use hgserver::convert::{
    BoxFuture, ConversionError, ConversionOutput, ConversionRequest, Converter,
};
use hgserver::dispatch::RetryPolicy;
use hgserver::service::{HgService, ServiceConfig, ServiceError, ServiceHandle};

// ============================================================================
// Test Helpers
// ============================================================================

/// Writes one JSON tile describing the source file.
struct FakeConverter {
    calls: AtomicUsize,
    failures_left: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl FakeConverter {
    fn new() -> Arc<Self> {
        Self::build(0, None)
    }

    /// Fails the first `n` conversions with a tool error.
    fn failing(n: usize) -> Arc<Self> {
        Self::build(n, None)
    }

    /// Each conversion consumes one permit of `gate`.
    fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Self::build(0, Some(gate))
    }

    fn build(failures: usize, gate: Option<Arc<Semaphore>>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(failures),
            gate,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Converter for FakeConverter {
    fn convert<'a>(
        &'a self,
        request: &'a ConversionRequest,
    ) -> BoxFuture<'a, Result<ConversionOutput, ConversionError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire()
                    .await
                    .map_err(|e| ConversionError::Tool(e.to_string()))?
                    .forget();
            }
            let fail = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(ConversionError::Tool("exit status 1: boom".into()));
            }

            let body = tokio::fs::read(&request.source_path).await?;
            let dir = request.tiles_dir().join("0").join("0");
            tokio::fs::create_dir_all(&dir).await?;
            let tile = serde_json::json!({ "bytes": body.len() });
            tokio::fs::write(dir.join("0"), tile.to_string()).await?;
            Ok(ConversionOutput {
                resolutions: vec![Resolution::new(0, 1, 1)],
                bounds_info: serde_json::json!({ "max_zoom": 0 }),
            })
        })
    }
}

struct Dirs {
    root: TempDir,
    artifacts: TempDir,
}

impl Dirs {
    fn new() -> Self {
        Self {
            root: TempDir::new().unwrap(),
            artifacts: TempDir::new().unwrap(),
        }
    }

    /// Path of a file under the watch root as the catalog records it.
    fn source(&self, name: &str) -> PathBuf {
        self.root.path().canonicalize().unwrap().join(name)
    }

    fn config(&self, grace: Duration) -> ServiceConfig {
        ServiceConfig::builder()
            .watch_root(self.root.path())
            .artifact_dir(self.artifacts.path())
            .poll_interval(Duration::from_millis(50))
            .removal_grace(grace)
            .num_workers(1)
            .retry(RetryPolicy::new(
                2,
                Duration::from_millis(20),
                Duration::from_millis(100),
            ))
            .api_host("127.0.0.1")
            .api_port(0)
            .build()
            .unwrap()
    }
}

async fn start(dirs: &Dirs, converter: Arc<FakeConverter>) -> ServiceHandle {
    HgService::start(dirs.config(Duration::from_secs(30)), converter)
        .await
        .unwrap()
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn get_json(handle: &ServiceHandle, uri: &str) -> (StatusCode, Value) {
    let response = router(ApiState::new(Arc::clone(handle.catalog())))
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

/// Plain HTTP/1.1 GET against the running listener.
async fn http_get(handle: &ServiceHandle, path: &str) -> String {
    let mut stream = tokio::net::TcpStream::connect(handle.local_addr())
        .await
        .unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

fn ready_count(handle: &ServiceHandle) -> usize {
    handle
        .catalog()
        .list_tilesets()
        .iter()
        .filter(|t| t.status == TilesetStatus::Ready)
        .count()
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_new_file_becomes_ready_then_stale_then_replaced() {
    let dirs = Dirs::new();
    let path = dirs.root.path().join("a.matrix");
    std::fs::write(&path, vec![1u8; 500]).unwrap();
    let gate = Arc::new(Semaphore::new(1));
    let converter = FakeConverter::gated(Arc::clone(&gate));
    let handle = start(&dirs, Arc::clone(&converter)).await;

    wait_until("first tileset", || ready_count(&handle) == 1).await;
    let first = handle.catalog().list_tilesets().remove(0);
    assert_eq!(
        handle.catalog().job(&first.fingerprint).unwrap().state,
        JobState::Done
    );

    let response = http_get(&handle, "/api/v1/tilesets").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.contains(first.id.as_str()));
    assert!(response.contains("access-control-allow-origin: *"));

    // Rewrite with different content; the next conversion blocks on the gate
    std::fs::write(&path, vec![2u8; 700]).unwrap();
    wait_until("old tileset to go stale", || {
        handle
            .catalog()
            .lookup_tileset(&first.id)
            .is_ok_and(|t| t.status == TilesetStatus::Stale)
    })
    .await;

    let (status, json) = get_json(&handle, &format!("/api/v1/tilesets/{}", first.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["stale"], true);
    let (status, json) = get_json(&handle, &format!("/api/v1/tiles/?d={}.0.0.0", first.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json[format!("{}.0.0.0", first.id)]["bytes"], 500);

    gate.add_permits(1);
    wait_until("replacement tileset", || {
        let tilesets = handle.catalog().list_tilesets();
        tilesets.len() == 1 && tilesets[0].id != first.id && tilesets[0].status == TilesetStatus::Ready
    })
    .await;

    assert!(!first.artifact_path.exists());
    assert!(handle.catalog().lookup_tileset(&first.id).is_err());
    let (status, _) = get_json(&handle, &format!("/tiles/?d={}.0.0.0", first.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(converter.calls(), 2);

    handle.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_removed_file_is_retired_after_grace() {
    let dirs = Dirs::new();
    std::fs::write(dirs.root.path().join("b.bw"), b"signal").unwrap();
    let handle = HgService::start(dirs.config(Duration::from_millis(100)), FakeConverter::new())
        .await
        .unwrap();

    wait_until("tileset", || ready_count(&handle) == 1).await;
    let artifact = handle.catalog().list_tilesets()[0].artifact_path.clone();

    std::fs::remove_file(dirs.root.path().join("b.bw")).unwrap();
    let source = dirs.source("b.bw");
    wait_until("source to be forgotten", || {
        handle.catalog().source_file(&source).is_none()
    })
    .await;

    assert!(handle.catalog().list_tilesets().is_empty());
    assert!(handle.catalog().list_jobs().is_empty());
    assert!(!artifact.exists());

    handle.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_files_are_recorded_but_not_converted() {
    let dirs = Dirs::new();
    std::fs::write(dirs.root.path().join("notes.txt"), b"hello").unwrap();
    let converter = FakeConverter::new();
    let handle = start(&dirs, Arc::clone(&converter)).await;

    let source = handle.catalog().source_file(&dirs.source("notes.txt")).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(source.kind, hgserver::catalog::FileKind::Unknown);
    assert_eq!(converter.calls(), 0);
    assert!(handle.catalog().list_jobs().is_empty());

    handle.stop().await.unwrap();
}

// ============================================================================
// Failures and retries
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_transient_failure_is_retried() {
    let dirs = Dirs::new();
    std::fs::write(dirs.root.path().join("c.bed"), b"chr1\t0\t10\n").unwrap();
    let converter = FakeConverter::failing(1);
    let handle = start(&dirs, Arc::clone(&converter)).await;

    wait_until("tileset after retry", || ready_count(&handle) == 1).await;

    let fingerprint = handle.catalog().list_tilesets()[0].fingerprint.clone();
    let job = handle.catalog().job(&fingerprint).unwrap();
    assert_eq!(job.state, JobState::Done);
    assert_eq!(job.attempts, 1);
    assert_eq!(converter.calls(), 2);

    handle.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exhausted_retries_fail_permanently() {
    let dirs = Dirs::new();
    std::fs::write(dirs.root.path().join("d.bed"), b"chr1\t0\t10\n").unwrap();
    let converter = FakeConverter::failing(usize::MAX);
    let handle = start(&dirs, Arc::clone(&converter)).await;
    let fingerprint = handle
        .catalog()
        .source_file(&dirs.source("d.bed"))
        .unwrap()
        .fingerprint;

    wait_until("permanent error", || {
        handle
            .catalog()
            .job(&fingerprint)
            .is_some_and(|j| j.state == JobState::Error)
    })
    .await;

    let job = handle.catalog().job(&fingerprint).unwrap();
    assert_eq!(job.attempts, 2);
    assert!(job.last_error.unwrap().contains("boom"));

    // Several more polls must not resubmit it
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(converter.calls(), 2);
    assert!(handle.catalog().list_tilesets().is_empty());

    let (status, json) = get_json(&handle, "/api/v1/jobs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json[0]["state"], "error");
    assert_eq!(json[0]["attempts"], 2);
    assert!(json[0]["lastError"].as_str().unwrap().contains("boom"));

    handle.stop().await.unwrap();
}

// ============================================================================
// Persistence and startup
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_serves_persisted_tilesets_without_reconverting() {
    let dirs = Dirs::new();
    std::fs::write(dirs.root.path().join("e.mcool"), b"cooler").unwrap();

    let handle = start(&dirs, FakeConverter::new()).await;
    wait_until("tileset", || ready_count(&handle) == 1).await;
    let id = handle.catalog().list_tilesets()[0].id.clone();
    handle.stop().await.unwrap();

    let converter = FakeConverter::new();
    let handle = start(&dirs, Arc::clone(&converter)).await;

    assert_eq!(ready_count(&handle), 1);
    let (status, json) = get_json(&handle, &format!("/tileset_info?d={}", id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json[id.as_str()]["name"], "e.mcool");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(converter.calls(), 0);

    handle.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interrupted_conversion_resumes_after_restart() {
    let dirs = Dirs::new();
    std::fs::write(dirs.root.path().join("f.bw"), b"signal").unwrap();

    // Never lets the conversion finish
    let blocked = FakeConverter::gated(Arc::new(Semaphore::new(0)));
    let handle = start(&dirs, Arc::clone(&blocked)).await;
    wait_until("conversion to start", || blocked.calls() == 1).await;
    handle.stop().await.unwrap();
    let staging = dirs.artifacts.path().join(".staging");
    assert!(std::fs::read_dir(&staging)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(true));

    let handle = start(&dirs, FakeConverter::new()).await;
    wait_until("resumed tileset", || ready_count(&handle) == 1).await;

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_corrupt_catalog_refuses_to_start() {
    let dirs = Dirs::new();
    std::fs::write(dirs.artifacts.path().join("catalog.json"), b"{ not json").unwrap();

    let result = HgService::start(dirs.config(Duration::from_secs(30)), FakeConverter::new()).await;

    match result {
        Err(ServiceError::Catalog(CatalogError::Corrupt { .. })) => {}
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("service started on a corrupt catalog"),
    }
}

#[tokio::test]
async fn test_missing_watch_root_refuses_to_start() {
    let dirs = Dirs::new();
    let config = ServiceConfig::builder()
        .watch_root(dirs.root.path().join("absent"))
        .artifact_dir(dirs.artifacts.path())
        .api_port(0)
        .build()
        .unwrap();

    let result = HgService::start(config, FakeConverter::new()).await;

    assert!(matches!(result, Err(ServiceError::WatchRoot { .. })));
}
