use rayon::prelude::*;
use tracing::{debug, debug_span};

use super::table::RawTable;
use crate::datasets::DatasetSpec;
use crate::error::NormalizeError;
use crate::value::Record;

/// Map raw rows onto the dataset's canonical fields by position and clean
/// every cell. Header text is never consulted; a column count the dataset does
/// not accept fails the whole dataset instead of mis-mapping it.
pub fn normalize(table: &RawTable, spec: &DatasetSpec) -> Result<Vec<Record>, NormalizeError> {
    let actual = table.width();
    if !spec.columns.accepts(actual) {
        return Err(NormalizeError::SchemaMismatch {
            dataset: spec.name.to_string(),
            expected: spec.columns,
            actual,
        });
    }
    debug!(dataset = spec.name, header = ?table.header, rows = table.rows.len(), "normalizing");

    let span = debug_span!("normalize", dataset = spec.name);
    let records = table
        .rows
        .par_iter()
        .map(|row| {
            let _guard = span.enter();
            normalize_row(row, spec)
        })
        .collect();
    Ok(records)
}

fn normalize_row(row: &[String], spec: &DatasetSpec) -> Record {
    let values = spec
        .fields
        .iter()
        .map(|f| {
            let raw = row.get(f.position).map(String::as_str).unwrap_or("");
            f.rule.apply(raw, f.ty, f.name)
        })
        .collect();
    Record::new(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets;
    use crate::parser::table::first_table;
    use crate::value::Value;

    fn table(rows: &[&[&str]]) -> RawTable {
        RawTable {
            header: Vec::new(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn teams_fixture() {
        let html = std::fs::read_to_string("tests/fixtures/teams.html").unwrap();
        let raw = first_table(&html).unwrap();
        let records = normalize(&raw, &datasets::teams()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(
            records[0].values,
            vec![
                Value::Text("Team Liquid".into()),
                Value::Integer(47_611_289),
                Value::Integer(2164),
            ]
        );
        assert_eq!(records[2].get(2), Some(&Value::Integer(1)));
    }

    #[test]
    fn countries_fixture() {
        let html = std::fs::read_to_string("tests/fixtures/countries.html").unwrap();
        let raw = first_table(&html).unwrap();
        let records = normalize(&raw, &datasets::countries()).unwrap();
        assert_eq!(records.len(), 2);
        let us = &records[0];
        assert_eq!(us.get(0).and_then(Value::as_text), Some("United States"));
        assert_eq!(us.get(1).and_then(Value::as_integer), Some(423_119_201));
        assert_eq!(us.get(2).and_then(Value::as_integer), Some(26_512));
        assert_eq!(us.get(3).and_then(Value::as_text), Some("Fortnite"));
        assert_eq!(us.get(5).and_then(Value::as_real), Some(15.86));
    }

    #[test]
    fn players_skip_game_earnings_column() {
        let raw = table(&[&["1.", "N0tail", "Johan Sundstein", "$7,184,163.05", "Dota 2", "$7,174,163.05", "99.86%"]]);
        let records = normalize(&raw, &datasets::players()).unwrap();
        assert_eq!(
            records[0].values,
            vec![
                Value::Text("N0tail".into()),
                Value::Text("Johan Sundstein".into()),
                Value::Integer(7_184_163),
                Value::Text("Dota 2".into()),
                Value::Real(99.86),
            ]
        );
    }

    #[test]
    fn tournaments_ignore_extra_columns() {
        let raw = table(&[&["1.", "The International 2021", "$40,018,195.00", "Dota 2", "18 Teams", "90 Players"]]);
        let records = normalize(&raw, &datasets::tournaments()).unwrap();
        assert_eq!(records[0].len(), 3);
        assert_eq!(records[0].get(1), Some(&Value::Integer(40_018_195)));
    }

    #[test]
    fn column_count_mismatch() {
        let raw = table(&[&["TeamA", "$500"]]);
        let err = normalize(&raw, &datasets::teams()).unwrap_err();
        match err {
            NormalizeError::SchemaMismatch { dataset, actual, .. } => {
                assert_eq!(dataset, "teams");
                assert_eq!(actual, 2);
            }
        }
    }

    #[test]
    fn bad_cells_default_without_dropping_row() {
        let raw = table(&[&["1.", "TeamX", "unknown", "n/a"]]);
        let records = normalize(&raw, &datasets::teams()).unwrap();
        assert_eq!(
            records[0].values,
            vec![Value::Text("TeamX".into()), Value::Integer(0), Value::Integer(0)]
        );
    }

    #[test]
    fn preserves_row_order() {
        let rows: Vec<Vec<String>> = (0..200)
            .map(|i| vec![format!("{}.", i), format!("T{}", i), "$1".into(), "1".into()])
            .collect();
        let raw = RawTable { header: Vec::new(), rows };
        let records = normalize(&raw, &datasets::teams()).unwrap();
        for (i, r) in records.iter().enumerate() {
            assert_eq!(r.get(0).and_then(Value::as_text), Some(format!("T{}", i).as_str()));
        }
    }
}
