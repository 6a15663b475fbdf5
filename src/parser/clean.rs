//! Cell cleaning rules. A rule never fails: anything it cannot coerce falls
//! back to the field type's default and is logged at debug level.

use tracing::debug;

use crate::value::{FieldType, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// `"$1,234,567"` → 1234567. Leading symbol and thousands separators go.
    Currency,
    /// `"45.5%"` → 45.5
    Percentage,
    /// `"120 Tournaments"` → 120. Holds the singular unit word.
    UnitCount(&'static str),
    /// Trimmed text.
    Identity,
}

impl Rule {
    /// Clean one raw cell into `ty`. `field` is only used for logging.
    pub fn apply(self, raw: &str, ty: FieldType, field: &str) -> Value {
        match self.parse(raw, ty) {
            Some(v) => v,
            None => {
                debug!(field, raw, rule = ?self, "coerced to default");
                ty.default_value()
            }
        }
    }

    fn parse(self, raw: &str, ty: FieldType) -> Option<Value> {
        let raw = raw.trim();
        match self {
            Rule::Identity => identity(raw, ty),
            Rule::Currency => parse_currency(raw).map(|f| number(f, ty)),
            Rule::Percentage => parse_percentage(raw).map(|f| number(f, ty)),
            Rule::UnitCount(unit) => parse_unit_count(raw, unit).map(|n| match ty {
                FieldType::Real => Value::Real(n as f64),
                FieldType::Text => Value::Text(n.to_string()),
                FieldType::Integer => Value::Integer(n),
            }),
        }
    }
}

/// Text passes through; a numeric field still has to parse.
fn identity(raw: &str, ty: FieldType) -> Option<Value> {
    match ty {
        FieldType::Text => Some(Value::Text(raw.to_string())),
        FieldType::Integer | FieldType::Real => parse_finite(&strip_separators(raw)).map(|f| number(f, ty)),
    }
}

/// Integer targets are truncated toward zero.
fn number(f: f64, ty: FieldType) -> Value {
    match ty {
        FieldType::Integer => Value::Integer(f.trunc() as i64),
        FieldType::Real => Value::Real(f),
        FieldType::Text => Value::Text(f.to_string()),
    }
}

fn parse_currency(raw: &str) -> Option<f64> {
    let negative = raw.starts_with('-');
    let body = raw
        .trim_start_matches('-')
        .trim_start_matches(|c: char| !c.is_ascii_digit() && c != '.' && c != '-')
        .trim();
    let negative = negative || body.starts_with('-');
    let body = strip_separators(body.trim_start_matches('-'));
    let value = parse_finite(&body)?;
    Some(if negative { -value } else { value })
}

fn parse_percentage(raw: &str) -> Option<f64> {
    parse_finite(raw.trim_end_matches('%').trim())
}

fn parse_unit_count(raw: &str, unit: &str) -> Option<i64> {
    let body = strip_unit(raw, unit).trim();
    strip_separators(body).parse::<i64>().ok()
}

/// Strips `unit` or its plural from the end, case-insensitively.
fn strip_unit<'a>(raw: &'a str, unit: &str) -> &'a str {
    let lower = raw.to_ascii_lowercase();
    let unit = unit.to_ascii_lowercase();
    for suffix in [format!("{}s", unit), unit] {
        if lower.ends_with(&suffix) && raw.is_char_boundary(raw.len() - suffix.len()) {
            return &raw[..raw.len() - suffix.len()];
        }
    }
    raw
}

fn strip_separators(s: &str) -> String {
    s.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect()
}

fn parse_finite(s: &str) -> Option<f64> {
    let f = s.parse::<f64>().ok()?;
    if !f.is_finite() {
        return None;
    }
    // fold -0.0 so equal cells compare equal after cleaning
    Some(if f == 0.0 { 0.0 } else { f })
}
