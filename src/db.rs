use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::analyzer::AnalysisResult;
use crate::cleaner::InvalidRecord;
use crate::models::{ExtractionMethod, FetchResult, SvoTuple};

pub const DEFAULT_DB_PATH: &str = "data/orchidmine.sqlite";

pub fn connect(path: &str) -> Result<Connection> {
    if let Some(dir) = Path::new(path).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS fetch_log (
            id              INTEGER PRIMARY KEY,
            url             TEXT NOT NULL,
            source_category TEXT NOT NULL,
            status          INTEGER,
            error           TEXT,
            elapsed_ms      INTEGER NOT NULL,
            retry_count     INTEGER NOT NULL DEFAULT 0,
            fetched_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_fetch_log_url ON fetch_log(url);

        -- Cleaned statements, keyed so re-runs do not duplicate rows
        CREATE TABLE IF NOT EXISTS records (
            id                INTEGER PRIMARY KEY,
            identity          TEXT UNIQUE NOT NULL,
            subject           TEXT NOT NULL,
            verb              TEXT NOT NULL,
            object            TEXT NOT NULL,
            confidence        REAL NOT NULL,
            extraction_method TEXT NOT NULL,
            source_url        TEXT NOT NULL,
            source_category   TEXT NOT NULL,
            context           TEXT,
            raw_span          TEXT,
            position          INTEGER NOT NULL DEFAULT 0,
            extracted_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_records_subject ON records(subject);
        CREATE INDEX IF NOT EXISTS idx_records_category ON records(source_category);

        CREATE TABLE IF NOT EXISTS rejects (
            id         INTEGER PRIMARY KEY,
            subject    TEXT NOT NULL,
            verb       TEXT NOT NULL,
            object     TEXT NOT NULL,
            confidence REAL,
            source_url TEXT,
            reasons    TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS analysis_runs (
            id              INTEGER PRIMARY KEY,
            entries         INTEGER NOT NULL,
            mean_confidence REAL NOT NULL,
            completeness    REAL NOT NULL,
            report          TEXT NOT NULL,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

// ── Fetching ──

pub fn save_fetch_log(conn: &Connection, results: &[FetchResult]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO fetch_log
             (url, source_category, status, error, elapsed_ms, retry_count, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for r in results {
            count += stmt.execute(rusqlite::params![
                r.url,
                r.source_category,
                r.http_status,
                r.error,
                r.elapsed_ms as i64,
                r.retry_count,
                r.fetched_at.to_rfc3339(),
            ])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

// ── Records ──

/// Insert cleaned records, skipping identities already stored by earlier
/// runs. Returns how many rows were actually new.
pub fn save_records(conn: &Connection, records: &[SvoTuple]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO records
             (identity, subject, verb, object, confidence, extraction_method,
              source_url, source_category, context, raw_span, position, extracted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        for r in records {
            count += stmt.execute(rusqlite::params![
                r.identity_key(),
                r.subject,
                r.verb,
                r.object,
                r.confidence,
                r.extraction_method.label(),
                r.source_url,
                r.source_category,
                r.context,
                r.raw_span,
                r.position as i64,
                r.extracted_at.to_rfc3339(),
            ])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub fn save_rejects(conn: &Connection, rejects: &[InvalidRecord]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO rejects (subject, verb, object, confidence, source_url, reasons)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for r in rejects {
            count += stmt.execute(rusqlite::params![
                r.record.subject,
                r.record.verb,
                r.record.object,
                r.record.confidence,
                r.record.source_url,
                serde_json::to_string(&r.reasons)?,
            ])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub fn load_records(conn: &Connection) -> Result<Vec<SvoTuple>> {
    let mut stmt = conn.prepare(
        "SELECT subject, verb, object, confidence, extraction_method,
                source_url, source_category, context, raw_span, position, extracted_at
         FROM records ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            let method: String = row.get(4)?;
            let extracted_at: String = row.get(10)?;
            let position: i64 = row.get(9)?;
            Ok(SvoTuple {
                subject: row.get(0)?,
                verb: row.get(1)?,
                object: row.get(2)?,
                confidence: row.get(3)?,
                extraction_method: ExtractionMethod::from(method),
                source_url: row.get(5)?,
                source_category: row.get(6)?,
                context: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                raw_span: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                position: position.max(0) as usize,
                extracted_at: DateTime::parse_from_rfc3339(&extracted_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Analysis ──

pub fn save_analysis(conn: &Connection, result: &AnalysisResult) -> Result<i64> {
    conn.execute(
        "INSERT INTO analysis_runs (entries, mean_confidence, completeness, report)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            result.meta.entries,
            result.meta.mean_confidence,
            result.meta.completeness,
            serde_json::to_string(result)?,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

// ── Stats ──

pub struct Stats {
    pub fetched: usize,
    pub fetch_errors: usize,
    pub records: usize,
    pub rejects: usize,
    pub analysis_runs: usize,
    pub mean_confidence: f64,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let fetched: usize = conn.query_row("SELECT COUNT(*) FROM fetch_log", [], |r| r.get(0))?;
    let fetch_errors: usize = conn.query_row(
        "SELECT COUNT(*) FROM fetch_log WHERE error IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    let records: usize = conn.query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))?;
    let rejects: usize = conn.query_row("SELECT COUNT(*) FROM rejects", [], |r| r.get(0))?;
    let analysis_runs: usize =
        conn.query_row("SELECT COUNT(*) FROM analysis_runs", [], |r| r.get(0))?;
    let mean_confidence: f64 = conn.query_row(
        "SELECT COALESCE(AVG(confidence), 0.0) FROM records",
        [],
        |r| r.get(0),
    )?;
    Ok(Stats {
        fetched,
        fetch_errors,
        records,
        rejects,
        analysis_runs,
        mean_confidence,
    })
}
