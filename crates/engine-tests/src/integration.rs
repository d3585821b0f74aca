#[cfg(test)]
mod tests {
    use crate::{
        TEST_PG_URL, pg_client, reset_postgres_schema,
        utils::{ScriptedFetcher, body, boxed, cursor, stable_view},
    };
    use chrono::{TimeZone, Utc};
    use connectors::{cursor::RowCursor, sql::postgres::cursor::PgCursor};
    use engine_config::{env::EnvManager, job::JobConfig};
    use engine_core::{
        connectors::sink::{RawSink, postgres::PgRawSink, sled_sink::SledRawSink},
        state::{StateStore, sled_store::SledStateStore},
    };
    use engine_processing::error::CollectorError;
    use engine_runtime::{error::RunError, execution::executor::JobExecutor};
    use model::{core::value::Value, records::raw::RawRecord};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    const SINCE_FORMAT: &str = "%Y/%m/%d %H:%M";

    fn job(incremental: bool) -> JobConfig {
        let raw = json!({
            "name": "jira-issues",
            "params": { "connection_id": 1, "board_id": 8 },
            "source": {
                "url": "${LAKE_URL}",
                "query": "SELECT DISTINCT issue_key FROM _tool_jira_board_issues WHERE board_id = $1",
                "bind": [8]
            },
            "api": {
                "base_url": "https://jira.local/rest/",
                "url_template": "api/2/search",
                "headers": { "Authorization": "Bearer ${JIRA_TOKEN}", "Accept": "application/json" }
            },
            "request": {
                "filter_param": "jql",
                "filter_template": "key in ({keys}) {since}ORDER BY created",
                "since_clause": "AND updated >= '{since}' ",
                "extra": { "expand": "changelog" }
            },
            "response": { "records_field": "items", "page_count_field": "pages" },
            "sink": { "kind": "sled", "table": "_raw_jira_api_issues" },
            "collector": {
                "batch_size": 2,
                "concurrency": 2,
                "page_size": 2,
                "since": "2024-01-01T00:00:00Z",
                "incremental": incremental
            }
        });

        let mut env = EnvManager::from_vars(Vec::new());
        env.set("LAKE_URL", TEST_PG_URL);
        env.set("JIRA_TOKEN", "s3cr3t");
        JobConfig::parse(&raw.to_string(), &env).unwrap()
    }

    fn jql(keys: &str, since: Option<&str>) -> String {
        match since {
            Some(since) => format!("key in ({keys}) AND updated >= '{since}' ORDER BY created"),
            None => format!("key in ({keys}) ORDER BY created"),
        }
    }

    /// [A,B] has three records over two pages of size 2, [C] has one.
    fn issues(since: &str) -> Arc<ScriptedFetcher> {
        let ab = jql("A,B", Some(since));
        let c = jql("C", Some(since));
        Arc::new(
            ScriptedFetcher::with_params("jql", "startAt")
                .page(&ab, 0, body("A,B", 0, 2, Some(2)))
                .page(&ab, 2, body("A,B", 1, 1, Some(2)))
                .page(&c, 0, body("C", 0, 1, Some(1))),
        )
    }

    struct Stores {
        _dir: TempDir,
        sink: Arc<SledRawSink>,
        state: Arc<SledStateStore>,
    }

    fn stores() -> Stores {
        let dir = tempfile::tempdir().unwrap();
        let sink = SledRawSink::open(dir.path().join("raw"), "_raw_jira_api_issues").unwrap();
        let state = SledStateStore::open(dir.path().join("state")).unwrap();
        Stores {
            _dir: dir,
            sink: Arc::new(sink),
            state: Arc::new(state),
        }
    }

    fn executor(job: JobConfig, fetcher: Arc<ScriptedFetcher>, stores: &Stores) -> JobExecutor {
        JobExecutor::new(job, CancellationToken::new())
            .with_fetcher(fetcher)
            .with_sink(stores.sink.clone())
            .with_state_store(stores.state.clone())
    }

    #[traced_test]
    #[tokio::test]
    async fn full_run_collects_every_batch() {
        let stores = stores();
        let fetcher = issues("2024/01/01 00:00");

        let report = executor(job(false), fetcher.clone(), &stores)
            .execute_with_cursor(boxed(cursor(&["A", "B", "C"])))
            .await
            .unwrap();

        assert_eq!(report.summary.batches, 2);
        assert_eq!(report.summary.records, 4);
        assert_eq!(report.since, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        assert!(report.watermark.is_none());
        assert_eq!(stores.sink.len(), 4);

        let records = stores.sink.records().unwrap();
        assert!(records.iter().all(|r| r.url.contains("expand=changelog")));
        assert!(records.iter().all(|r| r.params == r#"{"board_id":8,"connection_id":1}"#));

        // Full runs never touch the watermark store.
        assert!(stores.state.load_watermark(&report.job_key).await.unwrap().is_none());

        assert!(logs_contain("Authorization: ***"));
        assert!(logs_contain("Accept: application/json"));
        assert!(!logs_contain("s3cr3t"));
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let stores = stores();

        executor(job(false), issues("2024/01/01 00:00"), &stores)
            .execute_with_cursor(boxed(cursor(&["A", "B", "C"])))
            .await
            .unwrap();
        let first = stable_view(stores.sink.records().unwrap());

        executor(job(false), issues("2024/01/01 00:00"), &stores)
            .execute_with_cursor(boxed(cursor(&["A", "B", "C"])))
            .await
            .unwrap();
        let second = stable_view(stores.sink.records().unwrap());

        assert_eq!(first, second);
    }

    #[traced_test]
    #[tokio::test]
    async fn incremental_runs_resume_from_watermark() {
        let stores = stores();
        let job = job(true);

        let first = executor(job.clone(), issues("2024/01/01 00:00"), &stores)
            .execute_with_cursor(boxed(cursor(&["A", "B", "C"])))
            .await
            .unwrap();

        let watermark = first.watermark.clone().unwrap();
        assert_eq!(watermark.job_key, job.job_key());
        assert_eq!(watermark.records, 4);
        assert_eq!(
            stores.state.load_watermark(&job.job_key()).await.unwrap(),
            Some(watermark.clone())
        );
        assert!(logs_contain("Watermark saved"));

        let since = watermark.since.format(SINCE_FORMAT).to_string();
        let fetcher = Arc::new(ScriptedFetcher::with_params("jql", "startAt"));
        let second = executor(job.clone(), fetcher.clone(), &stores)
            .execute_with_cursor(boxed(cursor(&["A", "B", "C"])))
            .await
            .unwrap();

        assert_eq!(second.since, Some(watermark.since));
        assert!(fetcher.calls().iter().all(|(jql, _)| jql.contains(&since)));
        assert!(logs_contain("Resuming from watermark"));

        // Nothing changed remotely, and nothing was purged.
        assert_eq!(second.summary.records, 0);
        assert_eq!(stores.sink.len(), 4);
        assert!(second.watermark.unwrap().since >= watermark.since);
    }

    #[tokio::test]
    async fn failed_run_keeps_previous_watermark() {
        let stores = stores();
        let job = job(true);
        let ab = jql("A,B", Some("2024/01/01 00:00"));
        let fetcher = Arc::new(ScriptedFetcher::with_params("jql", "startAt").fail(&ab, 0, 503));

        let err = executor(job.clone(), fetcher, &stores)
            .execute_with_cursor(boxed(cursor(&["A", "B", "C"])))
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Collector(CollectorError::Fetch { batch: 0, .. })));
        assert!(stores.state.load_watermark(&job.job_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancellation_is_reported_as_shutdown() {
        let stores = stores();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = JobExecutor::new(job(true), cancel)
            .with_fetcher(issues("2024/01/01 00:00"))
            .with_sink(stores.sink.clone())
            .with_state_store(stores.state.clone())
            .execute_with_cursor(boxed(cursor(&["A", "B", "C"])))
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::ShutdownRequested));
        assert!(
            stores
                .state
                .load_watermark(&job(true).job_key())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn integer_keys_render_in_filter() {
        let stores = stores();
        let fetcher = Arc::new(
            ScriptedFetcher::with_params("jql", "startAt")
                .page(&jql("10,20", Some("2024/01/01 00:00")), 0, body("10,20", 0, 1, Some(1))),
        );
        let keys: Box<dyn RowCursor<i64>> =
            Box::new(connectors::memory::MemoryCursor::new(vec![10i64, 20]));

        let report = executor(job(false), fetcher, &stores)
            .execute_with_cursor(keys)
            .await
            .unwrap();

        assert_eq!(report.summary.records, 1);
        let records = stores.sink.records().unwrap();
        assert_eq!(records[0].input, "[10,20]");
    }

    #[ignore = "needs a local Postgres at TEST_PG_URL"]
    #[tokio::test]
    async fn pg_cursor_streams_keys_in_batches() {
        reset_postgres_schema().await;
        pg_client()
            .await
            .batch_execute(
                r#"
                CREATE TABLE issues (issue_key TEXT NOT NULL, board_id INT8 NOT NULL);
                INSERT INTO issues VALUES ('A', 8), ('B', 8), ('C', 8), ('D', 9), ('E', 8);
            "#,
            )
            .await
            .unwrap();

        let mut cursor = PgCursor::<String>::open(
            pg_client().await,
            "SELECT DISTINCT issue_key FROM issues WHERE board_id = $1 ORDER BY issue_key",
            vec![Value::Int(8)],
        )
        .await
        .unwrap();

        assert_eq!(cursor.fetch(3).await.unwrap(), vec!["A", "B", "C"]);
        assert_eq!(cursor.fetch(3).await.unwrap(), vec!["E"]);
        cursor.close().await.unwrap();
    }

    #[ignore = "needs a local Postgres at TEST_PG_URL"]
    #[tokio::test]
    async fn pg_sink_upserts_by_fingerprint() {
        reset_postgres_schema().await;
        let sink = PgRawSink::connect(TEST_PG_URL, "_raw_jira_api_issues").await.unwrap();
        let record = |payload: &str| RawRecord {
            fingerprint: "f-1".to_string(),
            params_digest: "p-1".to_string(),
            params: "{}".to_string(),
            batch_digest: "b-1".to_string(),
            page_index: 0,
            record_index: 0,
            input: r#"["A"]"#.to_string(),
            url: "api/2/search".to_string(),
            payload: payload.as_bytes().to_vec(),
            collected_at: Utc::now(),
        };

        sink.prepare("p-1", true).await.unwrap();
        sink.store(&[record(r#"{"v":1}"#)]).await.unwrap();
        sink.store(&[record(r#"{"v":2}"#)]).await.unwrap();

        let row = pg_client()
            .await
            .query_one("SELECT COUNT(*), MAX(convert_from(data, 'UTF8')) FROM _raw_jira_api_issues", &[])
            .await
            .unwrap();
        assert_eq!(row.get::<_, i64>(0), 1);
        assert_eq!(row.get::<_, String>(1), r#"{"v":2}"#);

        sink.prepare("p-1", true).await.unwrap();
        let row = pg_client()
            .await
            .query_one("SELECT COUNT(*) FROM _raw_jira_api_issues", &[])
            .await
            .unwrap();
        assert_eq!(row.get::<_, i64>(0), 0);
    }
}
