//! Conversions between [`DfValue`] and the driver's own [`mysql_async::Value`].
//! `data-iterator` uses these to bind a captured cursor as a query
//! parameter and to decode a `SELECT` row back into a [`RowValue`]; the
//! write path (`WriteTarget`) uses them to bind upsert/delete parameters.

use mysql_async::Value as MyValue;

use crate::value::DfValue;

impl From<&DfValue> for MyValue {
    fn from(v: &DfValue) -> Self {
        match v {
            DfValue::Null => MyValue::NULL,
            DfValue::Int(i) => MyValue::Int(*i),
            DfValue::UInt(u) => MyValue::UInt(*u),
            DfValue::Float(f) => MyValue::Double(*f),
            DfValue::Text(s) => MyValue::Bytes(s.clone().into_bytes()),
            DfValue::Bytes(b) => MyValue::Bytes(b.clone()),
            DfValue::Timestamp(secs) => {
                let dt = chrono::DateTime::from_timestamp(*secs, 0)
                    .map(|dt| dt.naive_utc())
                    .unwrap_or_default();
                MyValue::Date(
                    dt.date().year() as u16,
                    dt.date().month() as u8,
                    dt.date().day() as u8,
                    dt.time().hour() as u8,
                    dt.time().minute() as u8,
                    dt.time().second() as u8,
                    0,
                )
            }
        }
    }
}

impl From<DfValue> for MyValue {
    fn from(v: DfValue) -> Self {
        (&v).into()
    }
}

use chrono::{Datelike, Timelike};

/// Convert a decoded MySQL row value into our own representation, given
/// the column's declared type so ambiguous on-wire encodings (e.g. an
/// integer that is really an unsigned column) resolve correctly.
pub fn from_mysql_value(value: MyValue, sql_type: crate::schema::SqlType) -> DfValue {
    use crate::schema::SqlType;

    match value {
        MyValue::NULL => DfValue::Null,
        MyValue::Int(i) => DfValue::Int(i),
        MyValue::UInt(u) => DfValue::UInt(u),
        MyValue::Float(f) => DfValue::Float(f as f64),
        MyValue::Double(f) => DfValue::Float(f),
        MyValue::Bytes(b) => match sql_type {
            SqlType::Bytes => DfValue::Bytes(b),
            _ => DfValue::Text(String::from_utf8_lossy(&b).into_owned()),
        },
        MyValue::Date(y, m, d, hh, mm, ss, _) => {
            let dt = chrono::NaiveDate::from_ymd_opt(y as i32, m as u32, d as u32)
                .and_then(|d| d.and_hms_opt(hh as u32, mm as u32, ss as u32));
            DfValue::Timestamp(dt.map(|dt| dt.and_utc().timestamp()).unwrap_or_default())
        }
        MyValue::Time(neg, d, h, m, s, _) => {
            let secs = d as i64 * 86_400 + h as i64 * 3_600 + m as i64 * 60 + s as i64;
            DfValue::Timestamp(if neg { -secs } else { secs })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SqlType;

    #[test]
    fn null_round_trips() {
        let my: MyValue = (&DfValue::Null).into();
        assert_eq!(my, MyValue::NULL);
        assert_eq!(from_mysql_value(my, SqlType::Integer), DfValue::Null);
    }

    #[test]
    fn bytes_column_keeps_raw_bytes_text_column_decodes_utf8() {
        let raw = MyValue::Bytes(vec![0xff, 0x00]);
        assert_eq!(
            from_mysql_value(raw.clone(), SqlType::Bytes),
            DfValue::Bytes(vec![0xff, 0x00])
        );
        let text = MyValue::Bytes(b"hello".to_vec());
        assert_eq!(
            from_mysql_value(text, SqlType::Text),
            DfValue::Text("hello".into())
        );
    }
}
