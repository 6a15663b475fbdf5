use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, ToSql};
use tracing::{debug, warn};

use crate::error::LoadError;
use crate::value::FieldType;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

/// Surrogate key column every relation gets.
pub const SURROGATE_KEY: &str = "id";

/// Double-quote an identifier for splicing into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

// ── Schema ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    Created,
    Existing,
}

/// Create `relation` with a surrogate `id` key and the given columns unless
/// it already exists. An existing relation is never altered; missing columns
/// are only reported.
pub fn ensure_relation(
    conn: &Connection,
    relation: &str,
    columns: &[(&str, FieldType)],
) -> rusqlite::Result<Ensured> {
    let existing = table_columns(conn, relation)?;
    if !existing.is_empty() {
        let missing: Vec<&str> = columns
            .iter()
            .map(|(name, _)| *name)
            .filter(|name| !existing.contains(&name.to_ascii_lowercase()))
            .collect();
        if !missing.is_empty() {
            warn!(relation, ?missing, "existing relation lacks canonical columns");
        }
        debug!(relation, "relation already present");
        return Ok(Ensured::Existing);
    }

    let cols: Vec<String> = columns
        .iter()
        .map(|(name, ty)| format!("{} {}", quote_ident(name), ty.sql_type()))
        .collect();
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {} ({} INTEGER PRIMARY KEY AUTOINCREMENT, {})",
        quote_ident(relation),
        SURROGATE_KEY,
        cols.join(", ")
    );
    conn.execute(&sql, [])?;
    debug!(relation, "relation created");
    Ok(Ensured::Created)
}

/// Lowercased column names of `relation`; empty when it does not exist.
fn table_columns(conn: &Connection, relation: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(relation)))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .map(|r| r.map(|s| s.to_ascii_lowercase()))
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(names)
}

pub fn init_ledger(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS ingest_runs (
            id          INTEGER PRIMARY KEY,
            run_id      TEXT NOT NULL,
            dataset     TEXT NOT NULL,
            outcome     TEXT NOT NULL CHECK(outcome IN ('loaded','skipped','failed')),
            rows        INTEGER NOT NULL DEFAULT 0,
            detail      TEXT,
            finished_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_ingest_runs_run ON ingest_runs(run_id);
        ",
    )
}

// ── Loading ──

/// Append rows to `relation`, one transaction per `batch_size` rows.
/// Returns the number inserted. On failure, earlier batches stay committed
/// and their count is carried in the error.
pub fn insert_batches<R, V>(
    conn: &Connection,
    relation: &str,
    columns: &[&str],
    rows: &[R],
    batch_size: usize,
) -> Result<usize, LoadError>
where
    R: AsRef<[V]>,
    V: ToSql,
{
    let mut inserted = 0;
    let fail = |inserted, source| LoadError {
        relation: relation.to_string(),
        inserted,
        source,
    };

    let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(relation),
        cols.join(", "),
        placeholders.join(", ")
    );

    for batch in rows.chunks(batch_size.max(1)) {
        let written = insert_one_batch(conn, &sql, batch).map_err(|e| fail(inserted, e))?;
        inserted += written;
        debug!(relation, batch = written, total = inserted, "batch committed");
    }
    Ok(inserted)
}

fn insert_one_batch<R, V>(conn: &Connection, sql: &str, batch: &[R]) -> rusqlite::Result<usize>
where
    R: AsRef<[V]>,
    V: ToSql,
{
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(sql)?;
        for row in batch {
            count += stmt.execute(params_from_iter(row.as_ref().iter()))?;
        }
    }
    tx.commit()?;
    Ok(count)
}

// ── Run ledger ──

pub struct RunEntry<'a> {
    pub run_id: &'a str,
    pub dataset: &'a str,
    pub outcome: &'a str,
    pub rows: usize,
    pub detail: Option<&'a str>,
}

pub fn record_run(conn: &Connection, e: &RunEntry) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO ingest_runs (run_id, dataset, outcome, rows, detail)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![e.run_id, e.dataset, e.outcome, e.rows as i64, e.detail],
    )?;
    Ok(())
}

pub struct RunRow {
    pub run_id: String,
    pub dataset: String,
    pub outcome: String,
    pub rows: i64,
    pub detail: String,
    pub finished_at: String,
}

pub fn recent_runs(conn: &Connection, limit: usize) -> Result<Vec<RunRow>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, dataset, outcome, rows, COALESCE(detail,''), finished_at
         FROM ingest_runs ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], |row| {
            Ok(RunRow {
                run_id: row.get(0)?,
                dataset: row.get(1)?,
                outcome: row.get(2)?,
                rows: row.get(3)?,
                detail: row.get(4)?,
                finished_at: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Read side ──

/// Row count, or `None` when the relation does not exist yet.
pub fn count_rows(conn: &Connection, relation: &str) -> Result<Option<usize>> {
    if table_columns(conn, relation)?.is_empty() {
        return Ok(None);
    }
    let n: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_ident(relation)),
        [],
        |r| r.get(0),
    )?;
    Ok(Some(n as usize))
}

/// First `limit` rows of `relation` rendered as text, in insertion order.
pub fn preview(
    conn: &Connection,
    relation: &str,
    columns: &[&str],
    limit: usize,
) -> Result<Vec<Vec<String>>> {
    let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let sql = format!(
        "SELECT {} FROM {} ORDER BY id LIMIT ?1",
        cols.join(", "),
        quote_ident(relation)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([limit as i64], |row| {
            (0..columns.len())
                .map(|i| row.get_ref(i).map(render))
                .collect::<Result<Vec<_>, _>>()
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn render(v: ValueRef<'_>) -> String {
    match v {
        ValueRef::Null => String::new(),
        ValueRef::Integer(n) => n.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
        ValueRef::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    const TEAM_COLS: &[(&str, FieldType)] = &[
        ("team_name", FieldType::Text),
        ("revenue", FieldType::Integer),
        ("tournaments_played", FieldType::Integer),
    ];

    fn team(name: &str, revenue: i64) -> Vec<Value> {
        vec![Value::Text(name.into()), Value::Integer(revenue), Value::Integer(1)]
    }

    fn names<'a>(cols: &[(&'a str, FieldType)]) -> Vec<&'a str> {
        cols.iter().map(|(n, _)| *n).collect()
    }

    #[test]
    fn ensure_relation_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(ensure_relation(&conn, "teams", TEAM_COLS).unwrap(), Ensured::Created);
        insert_batches(&conn, "teams", &names(TEAM_COLS), &[team("A", 1)], 10).unwrap();

        assert_eq!(ensure_relation(&conn, "teams", TEAM_COLS).unwrap(), Ensured::Existing);
        assert_eq!(ensure_relation(&conn, "teams", TEAM_COLS).unwrap(), Ensured::Existing);
        assert_eq!(count_rows(&conn, "teams").unwrap(), Some(1));
    }

    #[test]
    fn existing_relation_not_altered() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE teams (id INTEGER PRIMARY KEY, team_name TEXT)").unwrap();
        assert_eq!(ensure_relation(&conn, "teams", TEAM_COLS).unwrap(), Ensured::Existing);
        let cols = table_columns(&conn, "teams").unwrap();
        assert_eq!(cols.len(), 2);
    }

    #[test]
    fn batches_append_and_count() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_relation(&conn, "teams", TEAM_COLS).unwrap();
        let rows: Vec<Vec<Value>> = (0..7).map(|i| team(&format!("T{}", i), i)).collect();

        let n = insert_batches(&conn, "teams", &names(TEAM_COLS), &rows, 3).unwrap();
        assert_eq!(n, 7);
        // append-only: a second load doubles the relation
        insert_batches(&conn, "teams", &names(TEAM_COLS), &rows, 3).unwrap();
        assert_eq!(count_rows(&conn, "teams").unwrap(), Some(14));

        let first = preview(&conn, "teams", &names(TEAM_COLS), 2).unwrap();
        assert_eq!(first, vec![vec!["T0", "0", "1"], vec!["T1", "1", "1"]]);
    }

    #[test]
    fn failing_batch_keeps_earlier_batches() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE teams (id INTEGER PRIMARY KEY, team_name TEXT NOT NULL,
             revenue INTEGER, tournaments_played INTEGER)",
        )
        .unwrap();
        let mut rows: Vec<Vec<rusqlite::types::Value>> = (0..4)
            .map(|i| vec![format!("T{}", i).into(), i.into(), 1i64.into()])
            .collect();
        // row 3 lands in the second batch and violates NOT NULL
        rows[3][0] = rusqlite::types::Value::Null;

        let err = insert_batches(&conn, "teams", &names(TEAM_COLS), &rows, 2).unwrap_err();
        assert_eq!(err.inserted, 2);
        assert_eq!(err.relation, "teams");
        assert_eq!(count_rows(&conn, "teams").unwrap(), Some(2));
    }

    #[test]
    fn missing_relation() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(count_rows(&conn, "teams").unwrap(), None);
        let err = insert_batches(&conn, "teams", &names(TEAM_COLS), &[team("A", 1)], 10);
        assert!(err.is_err());
    }

    #[test]
    fn quoting() {
        assert_eq!(quote_ident("teams"), "\"teams\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn ledger_round_trip() {
        let conn = Connection::open_in_memory().unwrap();
        init_ledger(&conn).unwrap();
        init_ledger(&conn).unwrap();
        record_run(
            &conn,
            &RunEntry { run_id: "r1", dataset: "teams", outcome: "loaded", rows: 2, detail: None },
        )
        .unwrap();
        record_run(
            &conn,
            &RunEntry {
                run_id: "r1",
                dataset: "players",
                outcome: "skipped",
                rows: 0,
                detail: Some("no pages"),
            },
        )
        .unwrap();
        let runs = recent_runs(&conn, 10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].dataset, "players");
        assert_eq!(runs[0].detail, "no pages");
        assert_eq!(runs[1].rows, 2);
    }
}
