//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and drive complete
//! crawls through the coordinator, from seeding to the Stopped state.

use driftnet::config::{parse_config, Config};
use driftnet::crawler::Coordinator;
use driftnet::state::CrawlState;
use driftnet::storage::{FailureKind, RecordQuery, RecordStore, RunStatus, SqliteStore};
use driftnet::DriftnetError;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BASE_CONFIG: &str = r#"
[crawler]
workers = 4
crawl-delay = 0
fetch-timeout = 2000
dequeue-timeout = 20
retry-backoff = 10
respect-robots-txt = false

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"

[storage]
database-path = "unused.db"
"#;

/// Creates a test configuration crawling the given seeds
fn create_test_config(seeds: Vec<String>) -> Config {
    let mut config = parse_config(BASE_CONFIG).expect("base config must be valid");
    config.seeds = seeds;
    config
}

fn create_coordinator(config: Config) -> (Coordinator, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::new_in_memory().expect("in-memory store"));
    let coordinator =
        Coordinator::from_config(config, store.clone(), "test-hash").expect("coordinator");
    (coordinator, store)
}

/// An HTML response; `set_body_string` would send text/plain
fn html(body: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.into(), "text/html")
}

fn page(title: &str, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!(r#"<a href="{}">link</a>"#, href))
        .collect();
    format!(
        "<html><head><title>{}</title></head><body>{}</body></html>",
        title, anchors
    )
}

async fn mount_page(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(html(body))
        .expect(1)
        .mount(server)
        .await;
}

async fn wait_stopped(coordinator: &Coordinator) {
    tokio::time::timeout(Duration::from_secs(10), coordinator.wait_until_stopped())
        .await
        .expect("crawl did not stop in time");
    assert_eq!(coordinator.state(), CrawlState::Stopped);
}

fn title_query(title: &str) -> RecordQuery {
    let mut fields = BTreeMap::new();
    fields.insert("title".to_string(), title.to_string());
    RecordQuery {
        fields,
        ..RecordQuery::default()
    }
}

#[tokio::test]
async fn test_full_crawl_single_host() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_page(&server, "/", page("Home", &["/page1", "/page2", "/page1#again"])).await;
    mount_page(&server, "/page1", page("Page 1", &["/", "/page2"])).await;
    mount_page(&server, "/page2", page("Page 2", &[])).await;

    let (coordinator, store) = create_coordinator(create_test_config(vec![format!("{}/", base)]));

    let started = coordinator.start().expect("start");
    assert_eq!(started.state, CrawlState::Running);
    wait_stopped(&coordinator).await;

    assert_eq!(store.count_records().unwrap(), 3);
    assert_eq!(store.query(&title_query("Page 2")).unwrap().len(), 1);

    let status = coordinator.status().unwrap();
    assert_eq!(status.pages_fetched, 3);
    assert_eq!(status.failures, 0);
    assert_eq!(status.queue_depth, 0);
    assert_eq!(status.in_flight, 0);
    assert_eq!(status.total_records, 3);

    let run = store.get_run(started.run_id.unwrap()).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.pages_fetched, 3);
    assert_eq!(run.config_hash, "test-hash");
}

#[tokio::test]
async fn test_same_content_at_two_urls_is_one_record() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_page(&server, "/", page("Home", &["/a", "/b"])).await;
    mount_page(&server, "/a", page("Same", &[])).await;
    mount_page(&server, "/b", page("Same", &[])).await;

    let (coordinator, store) = create_coordinator(create_test_config(vec![format!("{}/", base)]));
    coordinator.start().unwrap();
    wait_stopped(&coordinator).await;

    assert_eq!(store.count_records().unwrap(), 2);

    let same = store.query(&title_query("Same")).unwrap();
    assert_eq!(same.len(), 1);
    let mut sources = same[0].source_urls.clone();
    sources.sort();
    assert_eq!(sources, vec![format!("{}/a", base), format!("{}/b", base)]);
    assert!(same[0].last_seen >= same[0].first_seen);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_page(&server, "/flaky", page("Recovered", &[])).await;

    let (coordinator, store) =
        create_coordinator(create_test_config(vec![format!("{}/flaky", server.uri())]));
    coordinator.start().unwrap();
    wait_stopped(&coordinator).await;

    assert_eq!(store.query(&title_query("Recovered")).unwrap().len(), 1);
    assert_eq!(store.count_failures().unwrap(), 0);

    let status = coordinator.status().unwrap();
    assert_eq!(status.retries, 1);
    assert_eq!(status.pages_fetched, 1);
}

#[tokio::test]
async fn test_retries_exhausted_is_terminal_failure() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let mut config = create_test_config(vec![format!("{}/down", server.uri())]);
    config.crawler.max_retries = 2;
    let (coordinator, store) = create_coordinator(config);
    coordinator.start().unwrap();
    wait_stopped(&coordinator).await;

    let failures = store.failures(10).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::Transient);
    assert_eq!(failures[0].status_code, Some(500));
    assert_eq!(failures[0].retry_count, 2);
    assert_eq!(store.count_records().unwrap(), 0);
}

#[tokio::test]
async fn test_not_found_is_permanent_without_retry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let (coordinator, store) =
        create_coordinator(create_test_config(vec![format!("{}/missing", server.uri())]));
    coordinator.start().unwrap();
    wait_stopped(&coordinator).await;

    let failures = store.failures(10).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::Permanent);
    assert_eq!(failures[0].status_code, Some(404));
    assert_eq!(failures[0].retry_count, 0);

    let status = coordinator.status().unwrap();
    assert_eq!(status.retries, 0);
    assert_eq!(status.failures, 1);
}

#[tokio::test]
async fn test_malformed_body_produces_no_record() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("this page has no markup at all"))
        .expect(1)
        .mount(&server)
        .await;

    let (coordinator, store) =
        create_coordinator(create_test_config(vec![format!("{}/", server.uri())]));
    coordinator.start().unwrap();
    wait_stopped(&coordinator).await;

    assert_eq!(store.count_records().unwrap(), 0);
    assert_eq!(store.count_failures().unwrap(), 0);
    assert!(coordinator.frontier().is_quiescent());
}

#[tokio::test]
async fn test_start_while_running_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(html(page("Slow", &[])).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let (coordinator, _store) =
        create_coordinator(create_test_config(vec![format!("{}/slow", server.uri())]));
    let first = coordinator.start().unwrap();

    match coordinator.start() {
        Err(DriftnetError::AlreadyRunning { state }) => assert_eq!(state, CrawlState::Running),
        other => panic!("expected AlreadyRunning, got {:?}", other.map(|s| s.state)),
    }
    assert_eq!(coordinator.state(), CrawlState::Running);
    assert_eq!(coordinator.status().unwrap().run_id, first.run_id);

    wait_stopped(&coordinator).await;
}

#[tokio::test]
async fn test_stop_twice_drains_once() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(html(page("Slow", &[])).set_delay(Duration::from_millis(500)))
        .expect(1)
        .mount(&server)
        .await;

    let (coordinator, store) =
        create_coordinator(create_test_config(vec![format!("{}/slow", server.uri())]));
    let run_id = coordinator.start().unwrap().run_id.unwrap();

    // let a worker pick up the seed
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(coordinator.stop(), CrawlState::Draining);
    assert_eq!(coordinator.stop(), CrawlState::Draining);

    wait_stopped(&coordinator).await;
    assert_eq!(coordinator.stop(), CrawlState::Stopped);

    // the in-flight fetch finished and its record was written
    assert_eq!(store.count_records().unwrap(), 1);
    assert_eq!(store.get_run(run_id).unwrap().status, RunStatus::Interrupted);
}

#[tokio::test]
async fn test_robots_disallow_is_permanent_failure() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private"),
        )
        .mount(&server)
        .await;
    mount_page(&server, "/", page("Home", &["/private/data"])).await;
    Mock::given(method("GET"))
        .and(path("/private/data"))
        .respond_with(html(page("Secret", &[])))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = create_test_config(vec![format!("{}/", server.uri())]);
    config.crawler.respect_robots_txt = true;
    let (coordinator, store) = create_coordinator(config);
    coordinator.start().unwrap();
    wait_stopped(&coordinator).await;

    let failures = store.failures(10).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, FailureKind::Permanent);
    assert!(failures[0].url.ends_with("/private/data"));
    assert!(failures[0].message.contains("robots"));
    assert_eq!(store.count_records().unwrap(), 1);
}

#[tokio::test]
async fn test_out_of_scope_links_not_followed() {
    let allowed = MockServer::start().await;
    let denied = MockServer::start().await;

    mount_page(
        &allowed,
        "/",
        page("Home", &[&format!("{}/elsewhere", denied.uri())]),
    )
    .await;
    Mock::given(method("GET"))
        .respond_with(html(page("Elsewhere", &[])))
        .expect(0)
        .mount(&denied)
        .await;

    let denied_host = url::Url::parse(&denied.uri()).unwrap();
    let mut config = create_test_config(vec![format!("{}/", allowed.uri())]);
    config.scope.deny = vec![format!(
        "{}:{}",
        denied_host.host_str().unwrap(),
        denied_host.port().unwrap()
    )];
    let (coordinator, store) = create_coordinator(config);
    coordinator.start().unwrap();
    wait_stopped(&coordinator).await;

    assert_eq!(store.count_records().unwrap(), 1);
}

#[tokio::test]
async fn test_per_host_concurrency_is_capped() {
    let host_a = MockServer::start().await;
    let host_b = MockServer::start().await;

    for server in [&host_a, &host_b] {
        Mock::given(method("GET"))
            .respond_with(html(page("Page", &[])).set_delay(Duration::from_millis(300)))
            .mount(server)
            .await;
    }

    let seeds = vec![
        format!("{}/1", host_a.uri()),
        format!("{}/2", host_a.uri()),
        format!("{}/1", host_b.uri()),
    ];
    let (coordinator, _store) = create_coordinator(create_test_config(seeds));
    let gate = coordinator.gate().clone();
    let key_a = driftnet::host_key(&url::Url::parse(&host_a.uri()).unwrap()).unwrap();
    let key_b = driftnet::host_key(&url::Url::parse(&host_b.uri()).unwrap()).unwrap();

    coordinator.start().unwrap();

    let mut max_total = 0;
    while coordinator.state().is_active() {
        let in_flight = |key: &str| gate.host_state(key).map(|s| s.in_flight_count).unwrap_or(0);
        let (a, b) = (in_flight(&key_a), in_flight(&key_b));
        assert!(a <= 1, "two fetches in flight on host A");
        assert!(b <= 1, "two fetches in flight on host B");
        max_total = max_total.max(a + b);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    wait_stopped(&coordinator).await;

    assert_eq!(max_total, 2);
    assert_eq!(coordinator.status().unwrap().pages_fetched, 3);
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let server = MockServer::start().await;
    mount_page(&server, "/", page("Durable", &[])).await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("driftnet.db");

    {
        let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::new(&db_path).unwrap());
        let coordinator = Coordinator::from_config(
            create_test_config(vec![format!("{}/", server.uri())]),
            store,
            "hash",
        )
        .unwrap();
        coordinator.start().unwrap();
        wait_stopped(&coordinator).await;
    }

    let reopened = SqliteStore::new(&db_path).unwrap();
    assert_eq!(reopened.query(&title_query("Durable")).unwrap().len(), 1);
    assert_eq!(
        reopened.latest_run().unwrap().unwrap().status,
        RunStatus::Completed
    );
}
