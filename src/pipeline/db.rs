//! SQLite store for the raw, typed and aggregate tiers
//!
//! Schema is embedded from `/sql/*.sql` and applied on every open; each file
//! uses IF NOT EXISTS so re-running is harmless.
//!
//! All instants are INTEGER microseconds since the epoch. Rows that feed a
//! downstream watermark (`ingested_at`, `processed_at`) are stamped with
//! [`next_instant`], which never hands out the same value twice for a table.

use super::error::PipelineError;
use super::types::{DailyAggregate, RawRecord, TypedReading, Watermark};
use crate::sqlite_pragma::apply_optimized_pragmas;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row, Transaction};
use std::path::Path;

/// Ordered schema files, applied on every open
const MIGRATIONS: &[(&str, &str)] = &[
    ("01_raw_readings.sql", include_str!("../../sql/01_raw_readings.sql")),
    ("02_typed_readings.sql", include_str!("../../sql/02_typed_readings.sql")),
    ("03_daily_power.sql", include_str!("../../sql/03_daily_power.sql")),
    ("04_stage_watermarks.sql", include_str!("../../sql/04_stage_watermarks.sql")),
];

/// Open (or create) the database at `db_path` with pragmas and schema applied
pub fn open_database(db_path: impl AsRef<Path>) -> Result<Connection, PipelineError> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut conn = Connection::open(db_path)?;
    apply_optimized_pragmas(&conn)?;
    run_schema_migrations(&mut conn)?;
    Ok(conn)
}

/// Private in-memory database, used by tests and dry runs
pub fn open_in_memory() -> Result<Connection, PipelineError> {
    let mut conn = Connection::open_in_memory()?;
    conn.busy_timeout(crate::sqlite_pragma::BUSY_TIMEOUT)?;
    run_schema_migrations(&mut conn)?;
    Ok(conn)
}

/// Run the embedded schema files in order inside one transaction
pub fn run_schema_migrations(conn: &mut Connection) -> Result<(), PipelineError> {
    log::debug!("🔧 Running {} schema migrations", MIGRATIONS.len());

    let tx = conn.transaction()?;
    for (filename, sql) in MIGRATIONS {
        log::debug!("   ├─ Executing: {}", filename);
        tx.execute_batch(sql)?;
    }
    tx.commit()?;

    log::debug!("✅ Schema migrations completed");
    Ok(())
}

/// Next stamp for `table.column`: now, or one microsecond past the current
/// maximum if the clock has not moved on (or went backwards).
///
/// Only meaningful inside a write transaction, which holds the lock that
/// keeps the maximum stable until commit.
pub fn next_instant(conn: &Connection, table: &str, column: &str) -> Result<Watermark, PipelineError> {
    let sql = format!("SELECT MAX({column}) FROM {table}");
    let current_max: Option<i64> = conn.query_row(&sql, [], |row| row.get(0))?;
    let now = Utc::now().timestamp_micros();

    let next = match current_max {
        Some(max) if max >= now => max + 1,
        _ => now,
    };
    Ok(Watermark::from_micros(next))
}

/// Append trimmed lines to the raw ledger in the caller's transaction
///
/// Returns the ids assigned, in input order.
pub fn append_raw_lines(tx: &Transaction, lines: &[&str]) -> Result<Vec<i64>, PipelineError> {
    let mut ids = Vec::with_capacity(lines.len());
    let mut stmt = tx.prepare("INSERT INTO raw_readings (raw_line, ingested_at) VALUES (?1, ?2)")?;

    for line in lines {
        let ingested_at = next_instant(tx, "raw_readings", "ingested_at")?;
        stmt.execute(params![line.trim(), ingested_at.as_micros()])?;
        ids.push(tx.last_insert_rowid());
    }

    Ok(ids)
}

/// Raw rows strictly newer than `since`, oldest first, at most `limit`
pub fn select_raw_since(
    conn: &Connection,
    since: Watermark,
    limit: usize,
) -> Result<Vec<RawRecord>, PipelineError> {
    let mut stmt = conn.prepare(
        "SELECT id, raw_line, ingested_at
         FROM raw_readings
         WHERE ingested_at > ?1
         ORDER BY ingested_at ASC
         LIMIT ?2",
    )?;

    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt.query_map(params![since.as_micros(), limit], |row| {
        Ok(RawRecord {
            id: row.get(0)?,
            text: row.get(1)?,
            ingested_at: Watermark::from_micros(row.get(2)?),
        })
    })?;

    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn count_raw(conn: &Connection) -> Result<i64, PipelineError> {
    Ok(conn.query_row("SELECT COUNT(*) FROM raw_readings", [], |row| row.get(0))?)
}

/// Epoch-seconds column `idx` as an instant; out-of-range values are an error
pub(crate) fn reading_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let seconds: i64 = row.get(idx)?;
    DateTime::from_timestamp(seconds, 0).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("reading_time {} is out of range", seconds).into(),
        )
    })
}

fn typed_from_row(row: &Row<'_>) -> rusqlite::Result<TypedReading> {
    Ok(TypedReading {
        merge_key: row.get(0)?,
        metric_name: row.get(1)?,
        metric_value: row.get(2)?,
        reading_time: reading_time_at(row, 3)?,
        reading_date: row.get(4)?,
        processed_at: Watermark::from_micros(row.get(5)?),
    })
}

pub fn get_typed_reading(conn: &Connection, merge_key: i64) -> Result<Option<TypedReading>, PipelineError> {
    let mut stmt = conn.prepare(
        "SELECT merge_key, metric_name, metric_value, reading_time, reading_date, processed_at
         FROM typed_readings WHERE merge_key = ?1",
    )?;
    let mut rows = stmt.query_map(params![merge_key], typed_from_row)?;
    Ok(rows.next().transpose()?)
}

/// Whole typed tier ordered by merge key
pub fn load_typed_readings(conn: &Connection) -> Result<Vec<TypedReading>, PipelineError> {
    let mut stmt = conn.prepare(
        "SELECT merge_key, metric_name, metric_value, reading_time, reading_date, processed_at
         FROM typed_readings ORDER BY merge_key ASC",
    )?;
    let rows = stmt.query_map([], typed_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Insert or overwrite typed readings by merge key
pub fn upsert_typed_readings(conn: &Connection, readings: &[TypedReading]) -> Result<usize, PipelineError> {
    let mut stmt = conn.prepare(
        r#"
        INSERT INTO typed_readings (
            merge_key, metric_name, metric_value, reading_time, reading_date, processed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(merge_key) DO UPDATE SET
            metric_name = excluded.metric_name,
            metric_value = excluded.metric_value,
            reading_time = excluded.reading_time,
            reading_date = excluded.reading_date,
            processed_at = excluded.processed_at
        "#,
    )?;

    for reading in readings {
        stmt.execute(params![
            reading.merge_key,
            reading.metric_name,
            reading.metric_value,
            reading.reading_time.timestamp(),
            reading.reading_date,
            reading.processed_at.as_micros(),
        ])?;
    }

    Ok(readings.len())
}

fn aggregate_from_row(row: &Row<'_>) -> rusqlite::Result<DailyAggregate> {
    Ok(DailyAggregate {
        day: row.get(0)?,
        metric_name: row.get(1)?,
        metric_value: row.get(2)?,
        calculated_at: Watermark::from_micros(row.get(3)?),
    })
}

pub fn get_daily_aggregate(conn: &Connection, day: NaiveDate) -> Result<Option<DailyAggregate>, PipelineError> {
    let mut stmt = conn.prepare(
        "SELECT day, metric_name, metric_value, calculated_at FROM daily_power WHERE day = ?1",
    )?;
    let mut rows = stmt.query_map(params![day], aggregate_from_row)?;
    Ok(rows.next().transpose()?)
}

/// Whole aggregate tier ordered by day
pub fn load_daily_aggregates(conn: &Connection) -> Result<Vec<DailyAggregate>, PipelineError> {
    let mut stmt = conn.prepare(
        "SELECT day, metric_name, metric_value, calculated_at FROM daily_power ORDER BY day ASC",
    )?;
    let rows = stmt.query_map([], aggregate_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Insert or fully overwrite daily aggregates by day
pub fn upsert_daily_aggregates(conn: &Connection, aggregates: &[DailyAggregate]) -> Result<usize, PipelineError> {
    let mut stmt = conn.prepare(
        r#"
        INSERT INTO daily_power (day, metric_name, metric_value, calculated_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(day) DO UPDATE SET
            metric_name = excluded.metric_name,
            metric_value = excluded.metric_value,
            calculated_at = excluded.calculated_at
        "#,
    )?;

    for agg in aggregates {
        stmt.execute(params![
            agg.day,
            agg.metric_name,
            agg.metric_value,
            agg.calculated_at.as_micros(),
        ])?;
    }

    Ok(aggregates.len())
}

/// Database reachable and the raw ledger table present
pub fn check_database_health(conn: &Connection) -> bool {
    let ping: rusqlite::Result<i64> = conn.query_row("SELECT 1", [], |row| row.get(0));
    if let Err(e) = ping {
        log::error!("❌ Database health check failed: {}", e);
        return false;
    }

    let table_exists: rusqlite::Result<bool> = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'raw_readings')",
        [],
        |row| row.get(0),
    );
    match table_exists {
        Ok(true) => true,
        Ok(false) => {
            log::error!("❌ Table raw_readings does not exist");
            false
        }
        Err(e) => {
            log::error!("❌ Database health check failed: {}", e);
            false
        }
    }
}
