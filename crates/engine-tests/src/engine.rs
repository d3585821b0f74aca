#[cfg(test)]
mod tests {
    use crate::utils::{
        FailingSink, ScriptedFetcher, body, boxed, collector, cursor, stable_view,
    };
    use chrono::{TimeZone, Utc};
    use engine_core::{
        connectors::{
            sink::{memory::MemoryRawSink, sled_sink::SledRawSink},
            total_pages::{PageCountResolver, UnknownTotalPages},
        },
        error::FetchError,
    };
    use engine_processing::{collector::CollectorConfig, error::CollectorError};
    use std::{collections::BTreeSet, sync::Arc, time::Duration};
    use tracing_test::traced_test;

    fn page_count() -> Arc<PageCountResolver> {
        Arc::new(PageCountResolver {
            field: "pages".to_string(),
        })
    }

    // Keys [A..E] with batch size 2; only [A,B] has data, spread over two
    // pages announced by the first response.
    #[traced_test]
    #[tokio::test]
    async fn known_total_bounds_pagination() {
        let fetcher = Arc::new(
            ScriptedFetcher::new()
                .page("A,B", 0, body("A,B", 0, 3, Some(2)))
                .page("A,B", 1, body("A,B", 1, 1, Some(2))),
        );
        let sink = MemoryRawSink::new();
        let input = cursor(&["A", "B", "C", "D", "E"]);
        let probe = input.probe();

        let summary = collector(
            CollectorConfig::default().with_batch_size(2).with_page_size(3),
            fetcher.clone(),
            page_count(),
            Arc::new(sink.clone()),
        )
        .collect(boxed(input))
        .await
        .unwrap();

        assert_eq!(summary.batches, 3);
        assert_eq!(summary.records, 4);
        assert_eq!(fetcher.calls_for("A,B"), vec![0, 1]);
        assert_eq!(fetcher.calls_for("C,D"), vec![0]);
        assert_eq!(fetcher.calls_for("E"), vec![0]);
        assert!(probe.is_closed());

        let records = sink.records();
        let pages: BTreeSet<u64> = records.iter().map(|r| r.page_index).collect();
        assert_eq!(pages, BTreeSet::from([0, 1]));
        assert!(records.iter().all(|r| r.input == r#"["A","B"]"#));
        assert!(logs_contain("Batch complete"));
    }

    #[tokio::test]
    async fn unknown_total_stops_on_empty_page() {
        let fetcher = Arc::new(ScriptedFetcher::new().page("A,B,C,D,E", 0, body("A,B,C,D,E", 0, 5, None)));
        let sink = MemoryRawSink::new();

        let summary = collector(
            CollectorConfig::default().with_batch_size(5),
            fetcher.clone(),
            Arc::new(UnknownTotalPages),
            Arc::new(sink.clone()),
        )
        .collect(boxed(cursor(&["A", "B", "C", "D", "E"])))
        .await
        .unwrap();

        assert_eq!(fetcher.calls_for("A,B,C,D,E"), vec![0, 1]);
        assert_eq!(summary.pages, 2);
        assert_eq!(summary.records, 5);

        let fingerprints: BTreeSet<String> =
            sink.records().into_iter().map(|r| r.fingerprint).collect();
        assert_eq!(fingerprints.len(), 5);
    }

    #[tokio::test]
    async fn single_slot_runs_pages_in_order() {
        let mut fetcher = ScriptedFetcher::new();
        for keys in ["A,B", "C,D", "E,F"] {
            for page in 0..2 {
                fetcher = fetcher.page(keys, page, body(keys, page, 1, Some(2)));
            }
        }
        let fetcher = Arc::new(fetcher.delay(Duration::from_millis(5)));

        let summary = collector(
            CollectorConfig::default().with_batch_size(2).with_concurrency(1),
            fetcher.clone(),
            page_count(),
            Arc::new(MemoryRawSink::new()),
        )
        .collect(boxed(cursor(&["A", "B", "C", "D", "E", "F"])))
        .await
        .unwrap();

        assert_eq!(summary.tasks, 6);
        assert_eq!(summary.peak_concurrency, 1);
        assert_eq!(fetcher.peak_concurrency(), 1);

        let expected: Vec<(String, u64)> = ["A,B", "C,D", "E,F"]
            .iter()
            .flat_map(|keys| [(keys.to_string(), 0), (keys.to_string(), 1)])
            .collect();
        assert_eq!(fetcher.calls(), expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pool_never_exceeds_concurrency() {
        let keys: Vec<String> = (0..20).map(|i| format!("K{i}")).collect();
        let mut fetcher = ScriptedFetcher::new();
        for key in &keys {
            fetcher = fetcher
                .page(key, 0, body(key, 0, 2, None))
                .page(key, 1, body(key, 1, 1, None));
        }
        let fetcher = Arc::new(fetcher.delay(Duration::from_millis(10)));
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();

        let summary = collector(
            CollectorConfig::default().with_batch_size(1).with_concurrency(3),
            fetcher.clone(),
            Arc::new(UnknownTotalPages),
            Arc::new(MemoryRawSink::new()),
        )
        .collect(boxed(cursor(&refs)))
        .await
        .unwrap();

        assert_eq!(summary.batches, 20);
        assert_eq!(summary.records, 60);
        assert!(summary.peak_concurrency <= 3);
        assert!(fetcher.peak_concurrency() <= 3);
        assert!(fetcher.peak_concurrency() > 1);

        // Pages of one batch stay sequential even with free slots around.
        for key in &keys {
            assert_eq!(fetcher.calls_for(key), vec![0, 1, 2]);
        }
    }

    #[traced_test]
    #[tokio::test]
    async fn first_error_stops_batch_pulls() {
        let fetcher = Arc::new(ScriptedFetcher::new().fail("B", 0, 500));
        let input = cursor(&["A", "B", "C", "D", "E"]);
        let probe = input.probe();

        let err = collector(
            CollectorConfig::default().with_batch_size(1).with_concurrency(1),
            fetcher.clone(),
            Arc::new(UnknownTotalPages),
            Arc::new(MemoryRawSink::new()),
        )
        .collect(boxed(input))
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            CollectorError::Fetch {
                batch: 1,
                page: 0,
                source: FetchError::Status { status: 500, .. }
            }
        ));
        assert_eq!(probe.fetches(), 2);
        assert!(probe.is_closed());
        assert_eq!(fetcher.calls(), vec![("A".to_string(), 0), ("B".to_string(), 0)]);
        assert!(logs_contain("Collection failed"));
    }

    // B fails fast while A and C are still on their first page; both would
    // have a second page.
    #[traced_test]
    #[tokio::test]
    async fn parallel_failure_drains_without_scheduling() {
        let mut fetcher = ScriptedFetcher::new().fail("B", 0, 500);
        for keys in ["A", "C", "D", "E"] {
            fetcher = fetcher
                .page(keys, 0, body(keys, 0, 2, Some(2)))
                .page(keys, 1, body(keys, 1, 1, Some(2)))
                .delay_for(keys, Duration::from_millis(50));
        }
        let fetcher = Arc::new(fetcher.delay(Duration::from_millis(5)));
        let input = cursor(&["A", "B", "C", "D", "E"]);
        let probe = input.probe();
        let sink = MemoryRawSink::new();

        let err = collector(
            CollectorConfig::default().with_batch_size(1).with_concurrency(3),
            fetcher.clone(),
            page_count(),
            Arc::new(sink.clone()),
        )
        .collect(boxed(input))
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            CollectorError::Fetch {
                batch: 1,
                page: 0,
                source: FetchError::Status { status: 500, .. }
            }
        ));
        assert_eq!(probe.fetches(), 3);
        assert!(probe.is_closed());

        // In-flight pages finished and were stored; their next pages were not
        // requested.
        assert_eq!(
            fetcher.calls(),
            vec![("A".to_string(), 0), ("B".to_string(), 0), ("C".to_string(), 0)]
        );
        assert_eq!(sink.len(), 4);
        assert!(logs_contain("Page task failed, draining"));
    }

    // A ends its batch on an empty first page while B's first page yields a
    // next page; both finish before the scheduler wakes up.
    #[tokio::test]
    async fn finished_next_pages_run_before_new_batches() {
        let fetcher = Arc::new(ScriptedFetcher::new().page("B", 0, body("B", 0, 1, None)));

        let summary = collector(
            CollectorConfig::default().with_batch_size(1).with_concurrency(2),
            fetcher.clone(),
            Arc::new(UnknownTotalPages),
            Arc::new(MemoryRawSink::new()),
        )
        .collect(boxed(cursor(&["A", "B", "C"])))
        .await
        .unwrap();

        assert_eq!(summary.batches, 3);
        assert_eq!(
            fetcher.calls(),
            vec![
                ("A".to_string(), 0),
                ("B".to_string(), 0),
                ("B".to_string(), 1),
                ("C".to_string(), 0)
            ]
        );
    }

    #[tokio::test]
    async fn persistence_failure_is_reported() {
        let fetcher = Arc::new(
            ScriptedFetcher::new()
                .page("A", 0, body("A", 0, 2, None))
                .page("B", 0, body("B", 0, 2, None)),
        );
        let sink = Arc::new(FailingSink::new(1));

        let err = collector(
            CollectorConfig::default().with_batch_size(1).with_concurrency(1),
            fetcher,
            Arc::new(UnknownTotalPages),
            sink.clone(),
        )
        .collect(boxed(cursor(&["A", "B", "C"])))
        .await
        .unwrap_err();

        assert!(matches!(err, CollectorError::Persistence { batch: 1, page: 0, .. }));
        assert_eq!(sink.stored(), 2);
    }

    #[tokio::test]
    async fn zero_total_stores_page_and_stops() {
        let fetcher = Arc::new(ScriptedFetcher::new().page("A", 0, body("A", 0, 2, Some(0))));
        let sink = MemoryRawSink::new();

        let summary = collector(
            CollectorConfig::default().with_batch_size(1),
            fetcher.clone(),
            page_count(),
            Arc::new(sink.clone()),
        )
        .collect(boxed(cursor(&["A"])))
        .await
        .unwrap();

        assert_eq!(fetcher.calls_for("A"), vec![0]);
        assert_eq!(summary.records, 2);
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn rerun_produces_identical_storage() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(SledRawSink::open(dir.path(), "_raw_jira_api_issues").unwrap());
        let fetcher = || {
            Arc::new(
                ScriptedFetcher::new()
                    .page("A,B", 0, body("A,B", 0, 2, None))
                    .page("A,B", 1, body("A,B", 1, 1, None))
                    .page("C", 0, body("C", 0, 1, None)),
            )
        };
        let run = |fetcher| {
            let sink = sink.clone();
            async move {
                collector(
                    CollectorConfig::default().with_batch_size(2).with_concurrency(2),
                    fetcher,
                    Arc::new(UnknownTotalPages),
                    sink,
                )
                .collect(boxed(cursor(&["A", "B", "C"])))
                .await
                .unwrap()
            }
        };

        run(fetcher()).await;
        let first = stable_view(sink.records().unwrap());
        run(fetcher()).await;
        let second = stable_view(sink.records().unwrap());

        assert_eq!(first.len(), 4);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn full_sweep_purges_and_incremental_keeps() {
        let sink = MemoryRawSink::new();
        let jan = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let feb = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let serving = |items: &str| {
            Arc::new(ScriptedFetcher::new().page("A", 0, format!(r#"{{"items":[{items}]}}"#)))
        };
        let all = || serving(r#"{"id":"X1"},{"id":"X2"},{"id":"X3"}"#);
        let changed = || serving(r#"{"id":"X3","v":2}"#);
        let run = |config: CollectorConfig, fetcher| {
            let sink = sink.clone();
            async move {
                collector(config, fetcher, Arc::new(UnknownTotalPages), Arc::new(sink))
                    .collect(boxed(cursor(&["A"])))
                    .await
                    .unwrap()
            }
        };
        let payloads = || {
            let mut payloads: Vec<String> = sink
                .records()
                .into_iter()
                .map(|r| String::from_utf8(r.payload).unwrap())
                .collect();
            payloads.sort();
            payloads
        };

        run(CollectorConfig::default().with_since(Some(jan)), all()).await;
        assert_eq!(payloads(), [r#"{"id":"X1"}"#, r#"{"id":"X2"}"#, r#"{"id":"X3"}"#]);

        // A later window returns only the changed record; earlier rows stay.
        let incremental = CollectorConfig::default().incremental(true).with_since(Some(feb));
        run(incremental.clone(), changed()).await;
        let after_incremental = payloads();
        assert_eq!(
            after_incremental,
            [
                r#"{"id":"X1"}"#,
                r#"{"id":"X2"}"#,
                r#"{"id":"X3","v":2}"#,
                r#"{"id":"X3"}"#
            ]
        );

        // Re-running the same window overwrites its own rows only.
        run(incremental, changed()).await;
        assert_eq!(payloads(), after_incremental);

        run(CollectorConfig::default().with_since(Some(jan)), changed()).await;
        assert_eq!(payloads(), [r#"{"id":"X3","v":2}"#]);
    }

    #[tokio::test]
    async fn empty_input_makes_no_requests() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let summary = collector(
            CollectorConfig::default(),
            fetcher.clone(),
            Arc::new(UnknownTotalPages),
            Arc::new(MemoryRawSink::new()),
        )
        .collect(boxed(cursor(&[])))
        .await
        .unwrap();

        assert_eq!(summary.batches, 0);
        assert!(fetcher.calls().is_empty());
    }
}
