//! Integration tests for the incremental pipeline against an on-disk store
//!
//! Each test gets its own tempfile database and drives the public engine
//! API the way the runtime and CLI do.

#[cfg(test)]
mod pipeline_integration_tests {
    use chrono::NaiveDate;
    use sensorline::pipeline::db::{get_daily_aggregate, load_daily_aggregates, load_typed_readings};
    use sensorline::pipeline::types::{AGGREGATE_STAGE, TYPED_STAGE};
    use sensorline::pipeline::{PipelineRunner, Watermark};
    use sensorline::{IngestOutcome, PipelineConfig, PipelineEngine, PipelineError, QueryRange};
    use std::sync::Arc;
    use tempfile::TempDir;

    const SAMPLE: &str = "1649941817 Voltage 1.34\n\
                          1649941818 Voltage 1.35\n\
                          1649941817 Current 12.0\n\
                          1649941818 Current 14.0";

    fn config_in(dir: &TempDir) -> PipelineConfig {
        PipelineConfig {
            db_path: dir.path().join("sensor.db").to_string_lossy().into_owned(),
            ..PipelineConfig::default()
        }
    }

    fn open_engine(dir: &TempDir) -> PipelineEngine {
        PipelineEngine::open(&config_in(dir)).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn stage_watermark(engine: &PipelineEngine, stage: &str) -> Watermark {
        engine.inspect(|conn| {
            conn.query_row(
                "SELECT value FROM stage_watermarks WHERE stage_name = ?1",
                [stage],
                |row| row.get::<_, i64>(0),
            )
            .map(Watermark::from_micros)
            .unwrap_or(Watermark::MIN)
        })
    }

    #[test]
    fn test_end_to_end_ingest_run_query() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        assert!(engine.ingest(SAMPLE).unwrap().is_accepted());
        engine.run_pipeline().unwrap();

        assert_eq!(engine.inspect(load_typed_readings).unwrap().len(), 4);
        let power = engine
            .inspect(|conn| get_daily_aggregate(conn, day(2022, 4, 14)))
            .unwrap()
            .unwrap();
        assert!((power.metric_value - 17.485).abs() < 1e-9);

        let range = QueryRange::parse("2022-04-14", "2022-04-14").unwrap();
        let entries = engine.query(&range).unwrap();
        assert_eq!(entries.len(), 5);

        // Power is pinned to midnight so it sorts first
        assert_eq!(entries[0].name, "Power");
        assert_eq!(entries[0].time, "2022-04-14T00:00:00.000Z");
        assert_eq!(entries[1].name, "Current");
        assert_eq!(entries[1].time, "2022-04-14T13:10:17.000Z");
        assert_eq!(entries[2].name, "Voltage");
        assert_eq!(entries[2].time, "2022-04-14T13:10:17.000Z");
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let engine = open_engine(&dir);
            engine.ingest(SAMPLE).unwrap();
            engine.run_pipeline().unwrap();
        }

        let engine = open_engine(&dir);
        let summary = engine.run_pipeline().unwrap();

        assert_eq!(summary.typed.unwrap().selected, 0);
        assert_eq!(summary.aggregate.unwrap().selected, 0);
        assert_eq!(engine.inspect(load_daily_aggregates).unwrap().len(), 1);
    }

    #[test]
    fn test_rerun_without_new_input_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);
        engine.ingest(SAMPLE).unwrap();
        engine.run_pipeline().unwrap();

        let typed = engine.inspect(load_typed_readings).unwrap();
        let aggregates = engine.inspect(load_daily_aggregates).unwrap();
        let typed_mark = stage_watermark(&engine, TYPED_STAGE);
        let aggregate_mark = stage_watermark(&engine, AGGREGATE_STAGE);

        for _ in 0..3 {
            engine.run_pipeline().unwrap();
        }

        assert_eq!(engine.inspect(load_typed_readings).unwrap(), typed);
        assert_eq!(engine.inspect(load_daily_aggregates).unwrap(), aggregates);
        assert_eq!(stage_watermark(&engine, TYPED_STAGE), typed_mark);
        assert_eq!(stage_watermark(&engine, AGGREGATE_STAGE), aggregate_mark);
    }

    #[test]
    fn test_reingesting_same_line_keeps_one_row_per_merge_key() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);
        engine.ingest(SAMPLE).unwrap();
        engine.run_pipeline().unwrap();
        engine.ingest(SAMPLE).unwrap();
        engine.run_pipeline().unwrap();

        // Each raw row is its own merge key, so the copy adds rows
        assert_eq!(engine.inspect(load_typed_readings).unwrap().len(), 8);

        // Duplicated readings leave the averages unchanged
        let aggregates = engine.inspect(load_daily_aggregates).unwrap();
        assert_eq!(aggregates.len(), 1);
        assert!((aggregates[0].metric_value - 17.485).abs() < 1e-9);
    }

    #[test]
    fn test_replaying_the_raw_ledger_keeps_one_row_per_merge_key() {
        let dir = TempDir::new().unwrap();
        {
            let engine = open_engine(&dir);
            engine.ingest(SAMPLE).unwrap();
            engine.run_pipeline().unwrap();
            engine.inspect(|conn| {
                conn.execute("DELETE FROM stage_watermarks", []).unwrap();
            });
        }
        let typed_before = {
            let engine = open_engine(&dir);
            engine.inspect(load_typed_readings).unwrap()
        };

        // Fresh engine: the rewound watermarks read as MIN, so every raw
        // row is selected and merged a second time
        let engine = open_engine(&dir);
        let summary = engine.run_pipeline().unwrap();

        assert_eq!(summary.typed.unwrap().selected, 4);
        assert!(summary.quality_issues.is_empty());
        let typed_after = engine.inspect(load_typed_readings).unwrap();
        assert_eq!(typed_after.len(), typed_before.len());
        let keys_before: Vec<i64> = typed_before.iter().map(|r| r.merge_key).collect();
        let keys_after: Vec<i64> = typed_after.iter().map(|r| r.merge_key).collect();
        assert_eq!(keys_after, keys_before);
        let distinct: i64 = engine.inspect(|conn| {
            conn.query_row("SELECT COUNT(DISTINCT merge_key) FROM typed_readings", [], |row| row.get(0))
                .unwrap()
        });
        assert_eq!(distinct, 4);
        assert_eq!(engine.inspect(load_daily_aggregates).unwrap().len(), 1);
    }

    #[test]
    fn test_day_missing_a_metric_gets_no_power() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);
        engine.ingest(SAMPLE).unwrap();
        // 2022-04-15, Voltage only
        engine.ingest("1650000000 Voltage 1.50").unwrap();

        engine.run_pipeline().unwrap();

        let aggregates = engine.inspect(load_daily_aggregates).unwrap();
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].day, day(2022, 4, 14));

        let range = QueryRange::parse("2022-04-15", "2022-04-15").unwrap();
        let entries = engine.query(&range).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Voltage");
    }

    #[test]
    fn test_only_touched_days_are_recomputed() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);
        engine.ingest(SAMPLE).unwrap();
        engine.ingest("1650000000 Voltage 2.0\n1650000000 Current 3.0").unwrap();
        engine.run_pipeline().unwrap();

        let before_14 = engine
            .inspect(|conn| get_daily_aggregate(conn, day(2022, 4, 14)))
            .unwrap()
            .unwrap();
        let before_15 = engine
            .inspect(|conn| get_daily_aggregate(conn, day(2022, 4, 15)))
            .unwrap()
            .unwrap();
        assert!((before_15.metric_value - 6.0).abs() < 1e-9);

        engine.ingest("1650000001 Current 5.0").unwrap();
        let summary = engine.run_pipeline().unwrap();

        assert_eq!(summary.aggregate.unwrap().selected, 1);
        let after_14 = engine
            .inspect(|conn| get_daily_aggregate(conn, day(2022, 4, 14)))
            .unwrap()
            .unwrap();
        let after_15 = engine
            .inspect(|conn| get_daily_aggregate(conn, day(2022, 4, 15)))
            .unwrap()
            .unwrap();

        assert_eq!(after_14, before_14);
        assert!((after_15.metric_value - 8.0).abs() < 1e-9);
        assert!(after_15.calculated_at > before_15.calculated_at);
    }

    #[test]
    fn test_watermarks_never_move_backwards() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);
        let mut last_typed = Watermark::MIN;
        let mut last_aggregate = Watermark::MIN;

        let batches = [
            "1649941817 Voltage 1.34",
            "1649941817 Current 12.0",
            "1649900000 Voltage 1.30",
            "1650000000 Voltage 2.0\n1650000000 Current 3.0",
        ];
        for batch in batches {
            engine.ingest(batch).unwrap();
            engine.run_pipeline().unwrap();

            let typed = stage_watermark(&engine, TYPED_STAGE);
            let aggregate = stage_watermark(&engine, AGGREGATE_STAGE);
            assert!(typed > last_typed);
            assert!(aggregate >= last_aggregate);
            last_typed = typed;
            last_aggregate = aggregate;
        }
    }

    #[test]
    fn test_corrupted_raw_row_is_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);
        engine.inspect(|conn| {
            conn.execute(
                "INSERT INTO raw_readings (raw_line, ingested_at) VALUES ('1649941817 Voltage', 1)",
                [],
            )
            .unwrap();
        });
        engine.ingest(SAMPLE).unwrap();

        let summary = engine.run_pipeline().unwrap();

        let typed = summary.typed.unwrap();
        assert_eq!(typed.rejected, 1);
        assert_eq!(typed.rejections[0].reason, "MalformedLine");
        assert_eq!(engine.inspect(load_typed_readings).unwrap().len(), 4);
        assert_eq!(engine.inspect(load_daily_aggregates).unwrap().len(), 1);
    }

    #[test]
    fn test_rejected_batch_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);

        let outcome = engine
            .ingest("1649941817 Voltage 1.34\n1649941817 Voltage")
            .unwrap();

        match outcome {
            IngestOutcome::Rejected { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].line_number, 2);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(engine.raw_count().unwrap(), 0);
    }

    #[test]
    fn test_conflicting_typed_row_aborts_without_advancing() {
        let dir = TempDir::new().unwrap();
        let engine = open_engine(&dir);
        engine.ingest("1649941817 Voltage 1.34").unwrap();

        // A typed row already claims merge key 1 with a different metric
        engine.inspect(|conn| {
            conn.execute(
                "INSERT INTO typed_readings
                 (merge_key, metric_name, metric_value, reading_time, reading_date, processed_at)
                 VALUES (1, 'Current', 9.0, 1649941817, '2022-04-14', 1)",
                [],
            )
            .unwrap();
        });

        let err = engine.run_pipeline().unwrap_err();

        assert!(matches!(err, PipelineError::InvariantViolation(_)));
        assert_eq!(stage_watermark(&engine, TYPED_STAGE), Watermark::MIN);
        let typed = engine.inspect(load_typed_readings).unwrap();
        assert_eq!(typed.len(), 1);
        assert_eq!(typed[0].metric_name, "Current");
    }

    #[test]
    fn test_two_engines_on_one_file_serialize() {
        let dir = TempDir::new().unwrap();
        let first = Arc::new(open_engine(&dir));
        let second = Arc::new(open_engine(&dir));

        let lines: Vec<String> = (0..200)
            .map(|i| {
                let metric = if i % 2 == 0 { "Voltage" } else { "Current" };
                format!("{} {} {}.0", 1649941000 + i, metric, i % 7 + 1)
            })
            .collect();
        first.ingest(&lines.join("\n")).unwrap();

        let handles: Vec<_> = [first.clone(), second.clone()]
            .into_iter()
            .map(|engine| std::thread::spawn(move || engine.run_pipeline()))
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(first.inspect(load_typed_readings).unwrap().len(), 200);
        assert_eq!(second.inspect(load_daily_aggregates).unwrap().len(), 1);
        assert_eq!(second.run_pipeline().unwrap().typed.unwrap().selected, 0);
    }

    #[tokio::test]
    async fn test_async_runner_on_file_store() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(open_engine(&dir));
        engine.ingest(SAMPLE).unwrap();

        let runner: Arc<dyn PipelineRunner> = Arc::new(engine.clone());
        assert!(runner.check_health().await);
        let summary = runner.run().await.unwrap();

        assert_eq!(summary.aggregate.unwrap().upserted, 1);
        assert!(engine.health_check());
    }
}
