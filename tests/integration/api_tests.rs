//! Integration tests for the HTTP API
//!
//! Requests go straight to the axum router through `tower::ServiceExt::oneshot`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use driftnet::api::{build_router, AppState};
use driftnet::config::{parse_config, Config};
use driftnet::crawler::Coordinator;
use driftnet::storage::{
    FailureRecord, FailureSummary, Record, RecordQuery, RecordStore, RunRecord, RunStatus,
    SqliteStore, StorageError, StorageResult, UpsertOutcome,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const BASE_CONFIG: &str = r#"
[crawler]
workers = 2
crawl-delay = 0
dequeue-timeout = 20
respect-robots-txt = false

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"

[storage]
database-path = "unused.db"
"#;

fn test_config(seeds: Vec<String>) -> Config {
    let mut config = parse_config(BASE_CONFIG).expect("base config must be valid");
    config.seeds = seeds;
    config
}

fn app(config: Config, store: Arc<dyn RecordStore>) -> (Router, Arc<Coordinator>) {
    let coordinator = Arc::new(Coordinator::from_config(config, store, "hash").unwrap());
    (build_router(AppState::new(coordinator.clone())), coordinator)
}

async fn send(router: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn record(url: &str, hash: &str, title: &str) -> Record {
    let mut fields = BTreeMap::new();
    fields.insert("title".to_string(), json!(title));
    Record::new(url, hash, fields, Utc::now())
}

/// A store whose database can never be reached
struct UnavailableStore;

fn down<T>() -> StorageResult<T> {
    Err(StorageError::Unavailable("database is locked".to_string()))
}

impl RecordStore for UnavailableStore {
    fn upsert(&self, _record: &Record) -> StorageResult<UpsertOutcome> {
        down()
    }
    fn query(&self, _query: &RecordQuery) -> StorageResult<Vec<Record>> {
        down()
    }
    fn get(&self, _content_hash: &str) -> StorageResult<Option<Record>> {
        down()
    }
    fn count_records(&self) -> StorageResult<u64> {
        down()
    }
    fn record_failure(&self, _failure: &FailureRecord) -> StorageResult<()> {
        down()
    }
    fn failures(&self, _limit: usize) -> StorageResult<Vec<FailureRecord>> {
        down()
    }
    fn count_failures(&self) -> StorageResult<u64> {
        down()
    }
    fn failure_summary(&self) -> StorageResult<Vec<FailureSummary>> {
        down()
    }
    fn create_run(&self, _config_hash: &str) -> StorageResult<i64> {
        down()
    }
    fn finish_run(
        &self,
        _run_id: i64,
        _status: RunStatus,
        _pages_fetched: u64,
        _failures: u64,
    ) -> StorageResult<()> {
        down()
    }
    fn get_run(&self, _run_id: i64) -> StorageResult<RunRecord> {
        down()
    }
    fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        down()
    }
    fn runs(&self, _limit: usize) -> StorageResult<Vec<RunRecord>> {
        down()
    }
    fn ping(&self) -> StorageResult<()> {
        down()
    }
}

#[tokio::test]
async fn test_health() {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let (router, _) = app(test_config(vec![]), store);

    let (status, body) = send(&router, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["crawl_state"], "idle");
    assert_eq!(body["store_available"], true);
}

#[tokio::test]
async fn test_status_when_idle() {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let (router, _) = app(test_config(vec![]), store);

    let (status, body) = send(&router, "GET", "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "idle");
    assert_eq!(body["queue_depth"], 0);
    assert_eq!(body["total_records"], 0);
    assert!(body["run_id"].is_null());
}

#[tokio::test]
async fn test_second_start_conflicts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><head><title>Slow</title></head></html>", "text/html")
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let (router, coordinator) = app(test_config(vec![format!("{}/", server.uri())]), store);

    let (status, body) = send(&router, "POST", "/crawl/start").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "running");

    let (status, body) = send(&router, "POST", "/crawl/start").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["state"], "running");

    let (status, body) = send(&router, "POST", "/crawl/stop").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "draining");

    tokio::time::timeout(Duration::from_secs(10), coordinator.wait_until_stopped())
        .await
        .unwrap();
    let (_, body) = send(&router, "POST", "/crawl/stop").await;
    assert_eq!(body["state"], "stopped");
}

#[tokio::test]
async fn test_records_field_filter() {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    store.upsert(&record("https://example.com/a", "h1", "Alpha")).unwrap();
    store.upsert(&record("https://example.com/b", "h2", "Beta")).unwrap();
    let (router, _) = app(test_config(vec![]), store);

    let (status, body) = send(&router, "GET", "/records").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, body) = send(&router, "GET", "/records?title=Alpha").await;
    assert_eq!(status, StatusCode::OK);
    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["source_url"], "https://example.com/a");
    assert_eq!(records[0]["extracted_fields"]["title"], "Alpha");

    let (_, body) = send(&router, "GET", "/records?url=https://example.com/b").await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (_, body) = send(&router, "GET", "/records?since=4102444800").await;
    assert!(body.as_array().unwrap().is_empty());

    let (_, body) = send(&router, "GET", "/records?limit=1").await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_bad_query_parameters() {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let (router, _) = app(test_config(vec![]), store);

    let (status, body) = send(&router, "GET", "/records?since=not-a-time").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("not-a-time"));

    let (status, _) = send(&router, "GET", "/failures?limit=many").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_failures_endpoint() {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    store
        .record_failure(&FailureRecord {
            run_id: None,
            url: "https://example.com/missing".to_string(),
            host: "example.com".to_string(),
            kind: driftnet::storage::FailureKind::Permanent,
            status_code: Some(404),
            message: "HTTP 404".to_string(),
            retry_count: 0,
            failed_at: Utc::now(),
        })
        .unwrap();
    let (router, _) = app(test_config(vec![]), store);

    let (status, body) = send(&router, "GET", "/failures").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["failures"][0]["kind"], "permanent");
    assert_eq!(body["failures"][0]["status_code"], 404);
    assert_eq!(body["summary"][0]["count"], 1);
}

#[tokio::test]
async fn test_run_history() {
    let store = Arc::new(SqliteStore::new_in_memory().unwrap());
    let first = store.create_run("first-hash").unwrap();
    store.finish_run(first, RunStatus::Completed, 7, 1).unwrap();
    let second = store.create_run("second-hash").unwrap();
    let (router, _) = app(test_config(vec![]), store);

    let (status, body) = send(&router, "GET", "/runs").await;
    assert_eq!(status, StatusCode::OK);
    let runs = body.as_array().unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0]["id"], second);
    assert_eq!(runs[0]["status"], "running");
    assert_eq!(runs[1]["id"], first);

    let (_, body) = send(&router, "GET", "/runs?limit=1").await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = send(&router, "GET", &format!("/runs/{}", first)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["pages_fetched"], 7);
    assert_eq!(body["config_hash"], "first-hash");

    let (status, body) = send(&router, "GET", "/runs/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    let (status, _) = send(&router, "GET", "/runs/latest").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&router, "GET", "/runs?limit=lots").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unavailable_store_returns_503() {
    let (router, coordinator) = app(test_config(vec![]), Arc::new(UnavailableStore));

    for uri in ["/records", "/status", "/failures", "/runs", "/runs/1"] {
        let (status, body) = send(&router, "GET", uri).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{}", uri);
        assert_eq!(body["success"], false);
    }

    let (status, _) = send(&router, "POST", "/crawl/start").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(coordinator.state(), driftnet::CrawlState::Idle);

    // liveness is unaffected
    let (status, body) = send(&router, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store_available"], false);
}
