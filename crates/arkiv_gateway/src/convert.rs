use arkiv_core::{Row, Value};
use chrono::{Datelike, Timelike};
use mysql::consts::ColumnType;

/// Convert a driver row into an ordered column→value mapping.
pub(crate) fn row_from_mysql(row: &mysql::Row) -> Row {
    let columns = row.columns_ref();
    let mut out = Row::with_capacity(columns.len());
    for (idx, column) in columns.iter().enumerate() {
        out.insert(
            column.name_str().into_owned(),
            value_from_mysql(column, row.as_ref(idx)),
        );
    }
    out
}

fn value_from_mysql(column: &mysql::Column, raw: Option<&mysql::Value>) -> Value {
    let Some(raw) = raw else {
        return Value::Null;
    };

    match raw {
        mysql::Value::NULL => Value::Null,
        mysql::Value::Int(i) => Value::Int(*i),
        mysql::Value::UInt(u) => {
            // UNSIGNED BIGINT can exceed i64::MAX
            if *u <= i64::MAX as u64 {
                Value::Int(*u as i64)
            } else {
                Value::Decimal(u.to_string())
            }
        }
        mysql::Value::Float(f) => Value::Float(f64::from(*f)),
        mysql::Value::Double(f) => Value::Float(*f),
        mysql::Value::Date(year, month, day, hour, min, sec, micro) => {
            if column.column_type() == ColumnType::MYSQL_TYPE_DATE {
                match chrono::NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day)) {
                    Some(date) => Value::Date(date),
                    None => Value::Text(format!("{:04}-{:02}-{:02}", year, month, day)),
                }
            } else {
                let date = chrono::NaiveDate::from_ymd_opt(
                    i32::from(*year),
                    u32::from(*month),
                    u32::from(*day),
                );
                let time = chrono::NaiveTime::from_hms_micro_opt(
                    u32::from(*hour),
                    u32::from(*min),
                    u32::from(*sec),
                    *micro,
                );
                match (date, time) {
                    (Some(date), Some(time)) => {
                        let naive = chrono::NaiveDateTime::new(date, time);
                        Value::DateTime(chrono::DateTime::from_naive_utc_and_offset(
                            naive,
                            chrono::Utc,
                        ))
                    }
                    _ => Value::Text(format!(
                        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                        year, month, day, hour, min, sec
                    )),
                }
            }
        }
        mysql::Value::Time(_neg, _days, hours, mins, secs, micros) => {
            match chrono::NaiveTime::from_hms_micro_opt(
                u32::from(*hours),
                u32::from(*mins),
                u32::from(*secs),
                *micros,
            ) {
                Some(time) => Value::Time(time),
                None => Value::Text(format!("{:02}:{:02}:{:02}", hours, mins, secs)),
            }
        }
        mysql::Value::Bytes(bytes) => match column.column_type() {
            ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => {
                Value::Decimal(String::from_utf8_lossy(bytes).into_owned())
            }
            _ => match String::from_utf8(bytes.clone()) {
                Ok(text) => Value::Text(text),
                Err(_) => Value::Bytes(bytes.clone()),
            },
        },
    }
}

/// Positional statement parameters for one row of values.
pub(crate) fn params_from_values(values: &[Value]) -> mysql::Params {
    mysql::Params::Positional(values.iter().map(mysql_value).collect())
}

fn mysql_value(value: &Value) -> mysql::Value {
    match value {
        Value::Null => mysql::Value::NULL,
        Value::Bool(b) => mysql::Value::Int(i64::from(*b)),
        Value::Int(i) => mysql::Value::Int(*i),
        Value::Float(f) => mysql::Value::Double(*f),
        Value::Text(s) | Value::Decimal(s) => mysql::Value::Bytes(s.clone().into_bytes()),
        Value::Bytes(b) => mysql::Value::Bytes(b.clone()),
        Value::DateTime(dt) => {
            let naive = dt.naive_utc();
            mysql::Value::Date(
                naive.year() as u16,
                naive.month() as u8,
                naive.day() as u8,
                naive.hour() as u8,
                naive.minute() as u8,
                naive.second() as u8,
                dt.timestamp_subsec_micros(),
            )
        }
        Value::Date(d) => mysql::Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        Value::Time(t) => mysql::Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1_000,
        ),
    }
}
