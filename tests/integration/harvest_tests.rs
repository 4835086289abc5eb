//! End-to-end batch tests against a mock contributors endpoint

use crate::common::{contributors_path, harvester, open_store, seeded_store, test_config, KEY, TABLE};
use contrib_harvest::output::{export_completed, ProjectContributors};
use contrib_harvest::storage::{
    FetchRecord, FetchStatus, RecordStore, RunRecord, RunStatus, SqliteStorage, StatusCounts,
    StorageError, StorageResult,
};
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_single_page_project() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(contributors_path("requests")))
        .and(query_param("page", "1"))
        .and(query_param("per_page", "100"))
        .and(query_param("api_key", KEY))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"[{"login": "kennethreitz", "host_type": "GitHub"}]"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path(), &["requests"]);
    let harvester = harvester(&test_config(&server), store);

    let report = harvester.run_batch(1).await.unwrap();
    assert_eq!(report.selected, 1);
    assert_eq!(report.attempted, 1);
    assert_eq!(report.records_written, 1);
    assert_eq!(report.succeeded_pages, 1);
    assert!(!report.cancelled);

    let store = harvester.store();
    let store = store.lock().unwrap();
    let records = store.get_fetch_records("requests").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].status.payload(),
        Some(&br#"[{"login": "kennethreitz", "host_type": "GitHub"}]"#[..])
    );
    assert!(records[0].ts.is_some());
    assert!(store.select_pending(10).unwrap().is_empty());
}

#[tokio::test]
async fn test_multi_page_project_is_stitched_in_order() {
    let server = MockServer::start().await;
    let next = format!(
        "<{}{}?page=2&per_page=100>; rel=\"next\", <{}{}?page=2&per_page=100>; rel=\"last\"",
        server.uri(),
        contributors_path("django"),
        server.uri(),
        contributors_path("django")
    );

    Mock::given(method("GET"))
        .and(path(contributors_path("django")))
        .and(query_param("page", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("link", next.as_str())
                .set_body_string(r#"[{"login": "a"}, {"login": "b"}]"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    // The continuation link carries no key, so the client must add it
    Mock::given(method("GET"))
        .and(path(contributors_path("django")))
        .and(query_param("page", "2"))
        .and(query_param("api_key", KEY))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"[{"login": "c"}]"#))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path(), &["django"]);
    let harvester = harvester(&test_config(&server), store);

    let report = harvester.run_batch(5).await.unwrap();
    assert_eq!(report.records_written, 2);
    assert_eq!(report.succeeded_pages, 2);

    let store = harvester.store();
    let store = store.lock().unwrap();
    let pages: Vec<u32> = store
        .get_fetch_records("django")
        .unwrap()
        .iter()
        .map(|r| r.page)
        .collect();
    assert_eq!(pages, vec![1, 2]);

    let mut out = Vec::new();
    export_completed(&*store, &mut out).unwrap();
    let line: ProjectContributors =
        serde_json::from_str(String::from_utf8(out).unwrap().trim()).unwrap();
    let logins: Vec<_> = line
        .contributors
        .iter()
        .map(|c| c["login"].as_str().unwrap())
        .collect();
    assert_eq!(logins, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_second_batch_does_not_refetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(contributors_path("flask")))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path(), &["flask"]);
    let harvester = harvester(&test_config(&server), store);

    let first = harvester.run_batch(10).await.unwrap();
    assert_eq!(first.records_written, 1);

    let second = harvester.run_batch(10).await.unwrap();
    assert_eq!(second.selected, 0);
    assert_eq!(second.records_written, 0);
}

#[tokio::test]
async fn test_429_then_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(contributors_path("numpy")))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(contributors_path("numpy")))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"[{"login": "a"}]"#))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path(), &["numpy"]);
    let harvester = harvester(&test_config(&server), store);

    let report = harvester.run_batch(1).await.unwrap();
    assert_eq!(report.succeeded_pages, 1);
    assert_eq!(report.failed_pages, 0);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);

    let store = harvester.store();
    let store = store.lock().unwrap();
    let records = store.get_fetch_records("numpy").unwrap();
    assert_eq!(records[0].status.succeeded(), Some(true));
}

#[tokio::test]
async fn test_persistent_429_is_recorded_after_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(contributors_path("numpy")))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path(), &["numpy"]);
    let config = test_config(&server);
    let harvester = harvester(&config, store);

    let report = harvester.run_batch(1).await.unwrap();
    assert_eq!(report.failed_pages, 1);
    assert_eq!(report.records_written, 1);

    // One initial request plus every retry
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), config.retry_429.max_attempts as usize + 1);

    let store = harvester.store();
    let store = store.lock().unwrap();
    let error = store.get_fetch_records("numpy").unwrap()[0]
        .status
        .error()
        .unwrap()
        .to_string();
    assert!(error.contains("HTTPError"));
    assert!(error.contains("429"));
}

#[tokio::test]
async fn test_http_error_is_recorded_and_key_redacted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(contributors_path("ghost-package")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path(), &["ghost-package"]);
    let harvester = harvester(&test_config(&server), store);

    let report = harvester.run_batch(1).await.unwrap();
    assert_eq!(report.failed_pages, 1);

    let store = harvester.store();
    let store = store.lock().unwrap();
    let records = store.get_fetch_records("ghost-package").unwrap();
    assert_eq!(records.len(), 1);

    let error = records[0].status.error().unwrap();
    assert!(error.starts_with("{\"HTTPError\":"));
    assert!(error.contains("404 Not Found"));
    assert!(!error.contains(KEY));

    // Failures advance past the record instead of retrying it forever
    assert!(store.select_pending(10).unwrap().is_empty());
}

#[tokio::test]
async fn test_timeout_is_recorded_as_exception() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(contributors_path("slow")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("[]")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path(), &["slow"]);
    let mut config = test_config(&server);
    config.api.timeout_secs = 1;
    let harvester = harvester(&config, store);

    let report = harvester.run_batch(1).await.unwrap();
    assert_eq!(report.failed_pages, 1);

    let store = harvester.store();
    let store = store.lock().unwrap();
    let error = store.get_fetch_records("slow").unwrap()[0]
        .status
        .error()
        .unwrap()
        .to_string();
    assert!(error.starts_with("{\"Exception\":"));
    assert!(error.contains("timeout"));
}

#[tokio::test]
async fn test_batch_takes_first_names_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/api/Pypi/[^/]+/contributors$"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(3)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(
        dir.path(),
        &["pandas", "django", "requests", "numpy", "flask"],
    );
    let harvester = harvester(&test_config(&server), store);

    let report = harvester.run_batch(3).await.unwrap();
    assert_eq!(report.selected, 3);
    assert_eq!(report.records_written, 3);

    let store = harvester.store();
    let store = store.lock().unwrap();
    assert_eq!(
        store.select_pending(10).unwrap(),
        vec!["pandas".to_string(), "requests".to_string()]
    );
    for name in ["django", "flask", "numpy"] {
        assert_eq!(
            store.get_fetch_records(name).unwrap()[0].status.succeeded(),
            Some(true)
        );
    }
}

#[tokio::test]
async fn test_workers_fetch_each_name_once() {
    let server = MockServer::start().await;
    let names = ["alpha", "bravo", "charlie", "delta", "echo", "foxtrot"];
    for name in names {
        Mock::given(method("GET"))
            .and(path(contributors_path(name)))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(1)
            .mount(&server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path(), &names);
    let mut config = test_config(&server);
    config.harvest.workers = 3;
    let harvester = harvester(&config, store);

    let report = harvester.run_batch(10).await.unwrap();
    assert_eq!(report.selected, 6);
    assert_eq!(report.attempted, 6);
    assert_eq!(report.records_written, 6);
}

#[tokio::test]
async fn test_tracked_batch_records_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path(), &["django", "flask"]);
    let harvester = harvester(&test_config(&server), store);

    let (run_id, report) = harvester.run_batch_tracked(5, "cafebabe").await.unwrap();
    assert_eq!(report.records_written, 2);

    // A second connection sees the committed run
    let reader = open_store(dir.path());
    let run = reader.get_run(run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.records_written, 2);
    assert_eq!(run.table_name, TABLE);
    assert_eq!(run.config_hash, "cafebabe");
}

/// Fails every write of one page, delegating everything else
struct FailingPageStore {
    inner: SqliteStorage,
    project: String,
    page: u32,
    failed_writes: usize,
}

impl FailingPageStore {
    fn check(&mut self, record: &FetchRecord) -> StorageResult<()> {
        if record.project_name == self.project && record.page == self.page {
            self.failed_writes += 1;
            return Err(StorageError::Database("database is locked".to_string()));
        }
        Ok(())
    }
}

impl RecordStore for FailingPageStore {
    fn table(&self) -> &str {
        self.inner.table()
    }

    fn ensure_table(&mut self) -> StorageResult<()> {
        self.inner.ensure_table()
    }

    fn seed_projects(&mut self, names: &[String]) -> StorageResult<usize> {
        self.inner.seed_projects(names)
    }

    fn select_pending(&self, limit: usize) -> StorageResult<Vec<String>> {
        self.inner.select_pending(limit)
    }

    fn update_fetch_record(&mut self, record: &FetchRecord) -> StorageResult<bool> {
        self.check(record)?;
        self.inner.update_fetch_record(record)
    }

    fn insert_fetch_record(&mut self, record: &FetchRecord) -> StorageResult<()> {
        self.check(record)?;
        self.inner.insert_fetch_record(record)
    }

    fn reset_project(&mut self, project_name: &str) -> StorageResult<()> {
        self.inner.reset_project(project_name)
    }

    fn get_fetch_records(&self, project_name: &str) -> StorageResult<Vec<FetchRecord>> {
        self.inner.get_fetch_records(project_name)
    }

    fn completed_projects(&self) -> StorageResult<Vec<String>> {
        self.inner.completed_projects()
    }

    fn count_by_status(&self) -> StorageResult<StatusCounts> {
        self.inner.count_by_status()
    }

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        self.inner.create_run(config_hash)
    }

    fn complete_run(
        &mut self,
        run_id: i64,
        status: RunStatus,
        records_written: u64,
    ) -> StorageResult<()> {
        self.inner.complete_run(run_id, status, records_written)
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.inner.get_run(run_id)
    }

    fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        self.inner.latest_run()
    }
}

#[tokio::test]
async fn test_failed_write_is_skipped_and_batch_continues() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/api/Pypi/[^/]+/contributors$"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = FailingPageStore {
        inner: seeded_store(dir.path(), &["django", "flask"]),
        project: "django".to_string(),
        page: 1,
        failed_writes: 0,
    };
    let config = test_config(&server);
    let harvester = harvester(&config, store);

    let report = harvester.run_batch(5).await.unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.skipped_writes, 1);
    assert_eq!(report.records_written, 1);

    let store = harvester.store();
    let store = store.lock().unwrap();
    assert_eq!(
        store.failed_writes,
        config.store.write_attempts as usize
    );
    // The skipped record stays pending and is picked up next time
    assert_eq!(store.select_pending(10).unwrap(), vec!["django".to_string()]);
    assert_eq!(
        store.get_fetch_records("flask").unwrap()[0].status,
        FetchStatus::Succeeded {
            contributors: b"[]".to_vec()
        }
    );
}

/// `Link` header pointing at `page` of `project`, without the key
fn next_link(server: &MockServer, project: &str, page: u32) -> String {
    format!(
        "<{}{}?page={}&per_page=100>; rel=\"next\"",
        server.uri(),
        contributors_path(project),
        page
    )
}

fn stored_pages(store: &dyn RecordStore, project: &str) -> Vec<u32> {
    store
        .get_fetch_records(project)
        .unwrap()
        .iter()
        .map(|r| r.page)
        .collect()
}

#[tokio::test]
async fn test_skipped_middle_page_returns_project_to_pending() {
    let server = MockServer::start().await;
    for (page, login, expected) in [(1u32, "a", 2u64), (2, "b", 2), (3, "c", 1)] {
        let mut response =
            ResponseTemplate::new(200).set_body_string(format!(r#"[{{"login": "{}"}}]"#, login));
        if page < 3 {
            let link = next_link(&server, "django", page + 1);
            response = response.insert_header("link", link.as_str());
        }
        Mock::given(method("GET"))
            .and(path(contributors_path("django")))
            .and(query_param("page", page.to_string()))
            .respond_with(response)
            .expect(expected)
            .mount(&server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let store = FailingPageStore {
        inner: seeded_store(dir.path(), &["django"]),
        project: "django".to_string(),
        page: 2,
        failed_writes: 0,
    };
    let config = test_config(&server);
    let flaky = harvester(&config, store);

    let report = flaky.run_batch(5).await.unwrap();
    assert_eq!(report.records_written, 1);
    assert_eq!(report.skipped_writes, 1);
    assert_eq!(report.succeeded_pages, 2);

    {
        let store = flaky.store();
        let store = store.lock().unwrap();
        assert_eq!(store.failed_writes, config.store.write_attempts as usize);

        // Page 3 was never requested and page 1 was cleared
        assert_eq!(stored_pages(&*store, "django"), vec![1]);
        assert_eq!(
            store.get_fetch_records("django").unwrap()[0].status,
            FetchStatus::Pending
        );
        assert_eq!(store.select_pending(10).unwrap(), vec!["django".to_string()]);
        assert!(store.completed_projects().unwrap().is_empty());

        let mut out = Vec::new();
        let summary = export_completed(&*store, &mut out).unwrap();
        assert_eq!(summary.projects, 0);
        assert!(out.is_empty());
    }

    // Once writes go through, the next batch fetches every page again
    let retry = harvester(&config, open_store(dir.path()));
    let report = retry.run_batch(5).await.unwrap();
    assert_eq!(report.records_written, 3);

    let store = retry.store();
    let store = store.lock().unwrap();
    assert_eq!(stored_pages(&*store, "django"), vec![1, 2, 3]);

    let mut out = Vec::new();
    export_completed(&*store, &mut out).unwrap();
    let line: ProjectContributors =
        serde_json::from_str(String::from_utf8(out).unwrap().trim()).unwrap();
    let logins: Vec<_> = line
        .contributors
        .iter()
        .map(|c| c["login"].as_str().unwrap())
        .collect();
    assert_eq!(logins, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_failed_continuation_page_is_recorded_and_ends_walk() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(contributors_path("django")))
        .and(query_param("page", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("link", next_link(&server, "django", 2).as_str())
                .set_body_string(r#"[{"login": "a"}]"#),
        )
        .expect(1)
        .mount(&server)
        .await;
    // A failed page's own continuation link is not followed
    Mock::given(method("GET"))
        .and(path(contributors_path("django")))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(500)
                .insert_header("link", next_link(&server, "django", 3).as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(contributors_path("django")))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path(), &["django"]);
    let harvester = harvester(&test_config(&server), store);

    let report = harvester.run_batch(5).await.unwrap();
    assert_eq!(report.records_written, 2);
    assert_eq!(report.succeeded_pages, 1);
    assert_eq!(report.failed_pages, 1);

    let store = harvester.store();
    let store = store.lock().unwrap();
    let records = store.get_fetch_records("django").unwrap();
    assert_eq!(records.len(), 2);
    assert!(matches!(records[0].status, FetchStatus::Succeeded { .. }));

    let error = records[1].status.error().unwrap();
    assert!(error.starts_with("{\"HTTPError\":"));
    assert!(error.contains("500"));
    assert!(!error.contains(KEY));

    // Partially failed projects are neither retried nor exported
    assert!(store.select_pending(10).unwrap().is_empty());
    assert!(store.completed_projects().unwrap().is_empty());
    let mut out = Vec::new();
    let summary = export_completed(&*store, &mut out).unwrap();
    assert_eq!(summary.projects, 0);
}

#[tokio::test]
async fn test_link_back_to_first_page_ends_walk() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(contributors_path("django")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("link", next_link(&server, "django", 1).as_str())
                .set_body_string(r#"[{"login": "a"}]"#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(dir.path(), &["django"]);
    let harvester = harvester(&test_config(&server), store);

    let report = harvester.run_batch(5).await.unwrap();
    assert_eq!(report.records_written, 1);

    let store = harvester.store();
    let store = store.lock().unwrap();
    assert_eq!(stored_pages(&*store, "django"), vec![1]);
    assert_eq!(store.completed_projects().unwrap(), vec!["django".to_string()]);
}
