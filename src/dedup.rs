use std::collections::HashSet;

use crate::value::{Record, Value};

#[derive(Debug, PartialEq, Eq, Hash)]
enum KeyPart<'a> {
    Text(&'a str),
    Integer(i64),
    Real(u64),
}

fn key(record: &Record) -> Vec<KeyPart<'_>> {
    record
        .values
        .iter()
        .map(|v| match v {
            Value::Text(s) => KeyPart::Text(s),
            Value::Integer(n) => KeyPart::Integer(*n),
            // cleaning folds -0.0 and rejects NaN, so bit equality is value equality
            Value::Real(f) => KeyPart::Real(f.to_bits()),
        })
        .collect()
}

/// Keep the first occurrence of every distinct record, in input order.
pub fn dedup(records: Vec<Record>) -> Vec<Record> {
    let mut seen = HashSet::with_capacity(records.len());
    let keep: Vec<bool> = records.iter().map(|r| seen.insert(key(r))).collect();
    drop(seen);
    records
        .into_iter()
        .zip(keep)
        .filter_map(|(r, k)| k.then_some(r))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(name: &str, n: i64, f: f64) -> Record {
        Record::new(vec![Value::Text(name.into()), Value::Integer(n), Value::Real(f)])
    }

    #[test]
    fn removes_exact_duplicates_first_seen_order() {
        let input = vec![
            rec("b", 1, 0.5),
            rec("a", 1, 0.5),
            rec("b", 1, 0.5),
            rec("a", 2, 0.5),
            rec("a", 1, 0.5),
        ];
        let out = dedup(input);
        assert_eq!(out, vec![rec("b", 1, 0.5), rec("a", 1, 0.5), rec("a", 2, 0.5)]);
    }

    #[test]
    fn idempotent() {
        let input: Vec<Record> = (0..50).map(|i| rec(&format!("t{}", i % 7), i % 3, 1.0)).collect();
        let once = dedup(input);
        let twice = dedup(once.clone());
        assert_eq!(once, twice);
        // 7 names x 3 counts, all combinations appear within 50 rows
        assert_eq!(once.len(), 21);
    }

    #[test]
    fn differs_in_any_field() {
        let out = dedup(vec![rec("a", 1, 0.5), rec("a", 1, 0.25)]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn empty() {
        assert!(dedup(Vec::new()).is_empty());
    }
}
