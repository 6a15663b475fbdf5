//! Bulk imports of pre-cleaned CSV catalogs. These skip normalization and
//! dedup entirely: the file's header names the columns and every row is
//! appended as-is.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use tracing::info;

use crate::db;
use crate::error::CatalogError;
use crate::value::FieldType;

static IDENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());
static NON_WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]+").unwrap());

#[derive(Debug)]
pub struct ImportSummary {
    pub relation: String,
    pub columns: usize,
    pub rows: usize,
}

pub fn import_csv(
    conn: &Connection,
    path: &Path,
    relation: &str,
    batch_size: usize,
) -> Result<ImportSummary, CatalogError> {
    let shown = path.display().to_string();
    if !is_identifier(relation) {
        return Err(CatalogError::Identifier(relation.to_string()));
    }

    let file = std::fs::File::open(path).map_err(|e| CatalogError::Io {
        path: shown.clone(),
        source: e,
    })?;
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);

    let header: Vec<String> = reader
        .headers()
        .map_err(|e| csv_error(&shown, e))?
        .iter()
        .map(sanitize_column)
        .collect();
    if header.is_empty() || header.iter().all(|h| h == "c_") {
        return Err(CatalogError::EmptyHeader { path: shown });
    }
    let header = dedupe_columns(header);

    let mut raw_rows: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| csv_error(&shown, e))?;
        let mut row: Vec<String> = record.iter().map(|c| c.trim().to_string()).collect();
        row.resize(header.len(), String::new());
        raw_rows.push(row);
    }

    let types: Vec<FieldType> = (0..header.len()).map(|i| infer_type(&raw_rows, i)).collect();
    let columns: Vec<(&str, FieldType)> = header
        .iter()
        .map(String::as_str)
        .zip(types.iter().copied())
        .collect();
    db::ensure_relation(conn, relation, &columns)?;

    let rows: Vec<Vec<SqlValue>> = raw_rows
        .into_iter()
        .map(|r| r.into_iter().zip(&types).map(|(cell, ty)| typed(cell, *ty)).collect())
        .collect();
    let names: Vec<&str> = header.iter().map(String::as_str).collect();
    let inserted = db::insert_batches(conn, relation, &names, &rows, batch_size)?;

    info!("Imported {} into {} ({} rows)", shown, relation, inserted);
    Ok(ImportSummary {
        relation: relation.to_string(),
        columns: header.len(),
        rows: inserted,
    })
}

fn csv_error(path: &str, source: csv::Error) -> CatalogError {
    CatalogError::Csv {
        path: path.to_string(),
        source,
    }
}

fn is_identifier(s: &str) -> bool {
    IDENT_RE.is_match(s)
}

/// `"Global Sales (M)"` → `"Global_Sales_M"`; a leading digit gets a `c_` prefix.
fn sanitize_column(raw: &str) -> String {
    let out = NON_WORD_RE.replace_all(raw, "_");
    let out = out.trim_matches('_').to_string();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        format!("c_{}", out)
    } else {
        out
    }
}

/// Suffix repeated names (case-insensitively, as SQLite compares them).
/// `id` is taken by the surrogate key.
fn dedupe_columns(names: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::from([db::SURROGATE_KEY.to_string()]);
    names
        .into_iter()
        .map(|name| {
            let mut candidate = name.clone();
            let mut n = 2;
            while !seen.insert(candidate.to_ascii_lowercase()) {
                candidate = format!("{}_{}", name, n);
                n += 1;
            }
            candidate
        })
        .collect()
}

/// Integer if every non-empty cell parses as one, then Real, else Text.
fn infer_type(rows: &[Vec<String>], col: usize) -> FieldType {
    let mut cells = rows.iter().map(|r| r[col].as_str()).filter(|c| !c.is_empty()).peekable();
    if cells.peek().is_none() {
        return FieldType::Text;
    }
    let mut ty = FieldType::Integer;
    for cell in cells {
        if ty == FieldType::Integer && cell.parse::<i64>().is_err() {
            ty = FieldType::Real;
        }
        if ty == FieldType::Real && cell.parse::<f64>().is_err() {
            return FieldType::Text;
        }
    }
    ty
}

fn typed(cell: String, ty: FieldType) -> SqlValue {
    if cell.is_empty() {
        return SqlValue::Null;
    }
    match ty {
        FieldType::Integer => cell.parse().map(SqlValue::Integer).unwrap_or(SqlValue::Text(cell)),
        FieldType::Real => match cell.parse::<f64>() {
            Ok(f) => SqlValue::Real(f),
            Err(_) => SqlValue::Text(cell),
        },
        FieldType::Text => SqlValue::Text(cell),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn csv_file(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn imports_with_inferred_types() {
        let f = csv_file("Name,Year,Global Sales (M),Genre\nTetris,1989,35.84,Puzzle\nDoom,1993,,Shooter\n");
        let conn = Connection::open_in_memory().unwrap();

        let s = import_csv(&conn, f.path(), "VideoGames", 1).unwrap();
        assert_eq!(s.rows, 2);
        assert_eq!(s.columns, 4);

        let (year, sales): (i64, f64) = conn
            .query_row(
                "SELECT Year, Global_Sales_M FROM VideoGames WHERE Name = 'Tetris'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(year, 1989);
        assert_eq!(sales, 35.84);

        let missing: Option<f64> = conn
            .query_row("SELECT Global_Sales_M FROM VideoGames WHERE Name = 'Doom'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn import_appends() {
        let f = csv_file("a,b\n1,x\n");
        let conn = Connection::open_in_memory().unwrap();
        import_csv(&conn, f.path(), "T", 10).unwrap();
        import_csv(&conn, f.path(), "T", 10).unwrap();
        assert_eq!(db::count_rows(&conn, "T").unwrap(), Some(2));
    }

    #[test]
    fn missing_file() {
        let conn = Connection::open_in_memory().unwrap();
        let err = import_csv(&conn, Path::new("does/not/exist.csv"), "T", 10).unwrap_err();
        assert!(matches!(err, CatalogError::Io { .. }));
    }

    #[test]
    fn rejects_bad_relation_name() {
        let f = csv_file("a\n1\n");
        let conn = Connection::open_in_memory().unwrap();
        let err = import_csv(&conn, f.path(), "x; DROP TABLE y", 10).unwrap_err();
        assert!(matches!(err, CatalogError::Identifier(_)));
    }

    #[test]
    fn column_names() {
        assert_eq!(sanitize_column("Global Sales (M)"), "Global_Sales_M");
        assert_eq!(sanitize_column("2023 Revenue"), "c_2023_Revenue");
        assert_eq!(sanitize_column("  "), "c_");
        assert_eq!(
            dedupe_columns(vec!["a".into(), "A".into(), "b".into()]),
            ["a", "A_2", "b"]
        );
        assert_eq!(dedupe_columns(vec!["ID".into(), "id".into()]), ["ID_2", "id_3"]);
    }

    #[test]
    fn csv_id_column_kept_beside_surrogate_key() {
        let f = csv_file("id,Name\n1,Tetris\n2,Doom\n");
        let conn = Connection::open_in_memory().unwrap();

        let s = import_csv(&conn, f.path(), "VideoGames", 10).unwrap();
        assert_eq!(s.rows, 2);

        let (id, name): (i64, String) = conn
            .query_row(
                "SELECT id_2, Name FROM VideoGames WHERE Name = 'Doom'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!((id, name.as_str()), (2, "Doom"));
    }

    #[test]
    fn type_inference() {
        let rows = vec![
            vec!["1".to_string(), "1.5".to_string(), "x".to_string(), String::new()],
            vec!["2".to_string(), "2".to_string(), "3".to_string(), String::new()],
        ];
        assert_eq!(infer_type(&rows, 0), FieldType::Integer);
        assert_eq!(infer_type(&rows, 1), FieldType::Real);
        assert_eq!(infer_type(&rows, 2), FieldType::Text);
        assert_eq!(infer_type(&rows, 3), FieldType::Text);
    }
}
