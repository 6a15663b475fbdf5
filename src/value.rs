use rusqlite::types::{ToSql, ToSqlOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Real,
}

impl FieldType {
    pub fn sql_type(self) -> &'static str {
        match self {
            FieldType::Text => "TEXT",
            FieldType::Integer => "INTEGER",
            FieldType::Real => "REAL",
        }
    }

    /// Value a field falls back to when its raw cell cannot be coerced.
    pub fn default_value(self) -> Value {
        match self {
            FieldType::Text => Value::Text(String::new()),
            FieldType::Integer => Value::Integer(0),
            FieldType::Real => Value::Real(0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Integer(i64),
    Real(f64),
}

#[cfg(test)]
impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(f) => Some(*f),
            _ => None,
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Value::Text(s) => s.to_sql(),
            Value::Integer(n) => n.to_sql(),
            Value::Real(f) => f.to_sql(),
        }
    }
}

/// One cleaned row. Values follow the owning dataset's field order.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Record { values }
    }
}

#[cfg(test)]
impl Record {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }
}

impl AsRef<[Value]> for Record {
    fn as_ref(&self) -> &[Value] {
        &self.values
    }
}
