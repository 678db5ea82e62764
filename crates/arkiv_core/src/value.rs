use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Database value type.
///
/// Custom enum instead of `serde_json::Value` so that keyset comparison,
/// literal rendering and CSV export stay type-aware without JSON overhead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// Decimal stored as string to preserve exact precision.
    Decimal(String),
    /// Timestamp, interpreted as UTC.
    DateTime(DateTime<Utc>),
    /// Date without time component.
    Date(NaiveDate),
    /// Time without date component.
    Time(NaiveTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Plain string rendering used for keyset cursors, delete id lists and
    /// file output. No quoting or escaping is applied here.
    pub fn as_plain_string(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) | Value::Decimal(s) => s.clone(),
            Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Time(t) => t.format("%H:%M:%S").to_string(),
        }
    }

    /// Whether the rendered value consists of ASCII digits only.
    ///
    /// Mirrors how a stringified primary key is probed to decide between the
    /// numeric and the lexicographic pagination statement.
    pub fn is_all_digits(&self) -> bool {
        let s = self.as_plain_string();
        !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_plain_string())
    }
}

impl Value {
    fn type_order(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int(_) => 1,
            Value::Float(_) => 2,
            Value::Decimal(_) => 3,
            Value::Text(_) => 4,
            Value::DateTime(_) => 5,
            Value::Date(_) => 6,
            Value::Time(_) => 7,
            Value::Bytes(_) => 8,
            Value::Null => 9,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;

        match (self, other) {
            // Nulls last (SQL standard behavior)
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Greater,
            (_, Null) => Ordering::Less,

            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Text(a), Text(b)) => a.cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (Decimal(a), Decimal(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Time(a), Time(b)) => a.cmp(b),

            // Cross-type numeric promotion
            (Int(a), Float(b)) => (*a as f64).total_cmp(b),
            (Float(a), Int(b)) => a.total_cmp(&(*b as f64)),

            _ => self.type_order().cmp(&other.type_order()),
        }
    }
}

impl Eq for Value {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digit_detection_matches_pagination_rules() {
        assert!(Value::Int(42).is_all_digits());
        assert!(Value::Text("000123".to_string()).is_all_digits());
        assert!(!Value::Int(-7).is_all_digits());
        assert!(!Value::Text("a4b1c0de".to_string()).is_all_digits());
        assert!(!Value::Text(String::new()).is_all_digits());
    }

    #[test]
    fn plain_string_keeps_datetime_wire_format() {
        let dt = chrono::DateTime::parse_from_rfc3339("2020-01-01T10:20:30Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(Value::DateTime(dt).as_plain_string(), "2020-01-01 10:20:30");
    }

    #[test]
    fn int_values_order_numerically() {
        let mut values = vec![Value::Int(10), Value::Int(2), Value::Int(33)];
        values.sort();
        assert_eq!(values, vec![Value::Int(2), Value::Int(10), Value::Int(33)]);
    }
}
