//! `tokio-postgres` adapter.

use super::{Row, RowStream, Storage};
use crate::compile::to_numbered_placeholders;
use crate::error::{OrmError, OrmResult};
use crate::value::Value;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures_core::Stream;
use std::error::Error;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_postgres::types::{FromSql, IsNull, Kind, ToSql, Type, to_sql_checked};

type BoxError = Box<dyn Error + Sync + Send>;

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                Type::FLOAT4 => (*i as f32).to_sql(ty, out),
                Type::FLOAT8 => (*i as f64).to_sql(ty, out),
                _ => i.to_sql(ty, out),
            },
            Value::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                _ => f.to_sql(ty, out),
            },
            // enum labels travel as their text
            Value::Text(s) => s.as_str().to_sql(ty, out),
            Value::Timestamp(t) => match *ty {
                Type::TIMESTAMP => t.naive_utc().to_sql(ty, out),
                Type::DATE => t.date_naive().to_sql(ty, out),
                _ => t.to_sql(ty, out),
            },
            Value::Date(d) => d.to_sql(ty, out),
            Value::Uuid(u) => u.to_sql(ty, out),
            Value::Json(j) => j.to_sql(ty, out),
            Value::Array(items) => items.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Text of a Postgres enum value.
struct EnumLabel(String);

impl<'a> FromSql<'a> for EnumLabel {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(Self(std::str::from_utf8(raw)?.to_string()))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
    }
}

fn get<'a, T, F>(row: &'a tokio_postgres::Row, idx: usize, f: F) -> OrmResult<Value>
where
    T: FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    let value: Option<T> = row
        .try_get(idx)
        .map_err(|e| OrmError::decode(row.columns()[idx].name(), e.to_string()))?;
    Ok(value.map(f).unwrap_or(Value::Null))
}

fn get_array<'a, T, F>(row: &'a tokio_postgres::Row, idx: usize, f: F) -> OrmResult<Value>
where
    T: FromSql<'a>,
    F: Fn(T) -> Value,
{
    let value: Option<Vec<Option<T>>> = row
        .try_get(idx)
        .map_err(|e| OrmError::decode(row.columns()[idx].name(), e.to_string()))?;
    Ok(match value {
        Some(items) => Value::Array(
            items
                .into_iter()
                .map(|item| item.map(&f).unwrap_or(Value::Null))
                .collect(),
        ),
        None => Value::Null,
    })
}

fn decode_column(row: &tokio_postgres::Row, idx: usize) -> OrmResult<Value> {
    let ty = row.columns()[idx].type_();
    match *ty {
        Type::BOOL => get(row, idx, Value::Bool),
        Type::INT2 => get(row, idx, |v: i16| Value::Int(v.into())),
        Type::INT4 => get(row, idx, |v: i32| Value::Int(v.into())),
        Type::INT8 => get(row, idx, Value::Int),
        Type::FLOAT4 => get(row, idx, |v: f32| Value::Float(v.into())),
        Type::FLOAT8 => get(row, idx, Value::Float),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => get(row, idx, Value::Text),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>, _>(row, idx, Value::Timestamp),
        Type::TIMESTAMP => get(row, idx, |v: NaiveDateTime| Value::Timestamp(v.and_utc())),
        Type::DATE => get::<NaiveDate, _>(row, idx, Value::Date),
        Type::UUID => get(row, idx, Value::Uuid),
        Type::JSON | Type::JSONB => get(row, idx, Value::Json),
        Type::BOOL_ARRAY => get_array(row, idx, Value::Bool),
        Type::INT2_ARRAY => get_array(row, idx, |v: i16| Value::Int(v.into())),
        Type::INT4_ARRAY => get_array(row, idx, |v: i32| Value::Int(v.into())),
        Type::INT8_ARRAY => get_array(row, idx, Value::Int),
        Type::FLOAT8_ARRAY => get_array(row, idx, Value::Float),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => get_array(row, idx, Value::Text),
        Type::UUID_ARRAY => get_array(row, idx, Value::Uuid),
        _ => match ty.kind() {
            Kind::Enum(_) => get(row, idx, |v: EnumLabel| Value::Text(v.0)),
            _ => Err(OrmError::decode(
                row.columns()[idx].name(),
                format!("unsupported column type {ty}"),
            )),
        },
    }
}

fn decode_row(row: &tokio_postgres::Row) -> OrmResult<Row> {
    (0..row.len())
        .map(|idx| decode_column(row, idx))
        .collect::<OrmResult<Vec<_>>>()
        .map(Row::new)
}

struct DecodeRowStream<S> {
    inner: Pin<Box<S>>,
}

impl<S> DecodeRowStream<S> {
    fn new(stream: S) -> Self {
        Self {
            inner: Box::pin(stream),
        }
    }
}

impl<S> Stream for DecodeRowStream<S>
where
    S: Stream<Item = Result<tokio_postgres::Row, tokio_postgres::Error>> + Send + 'static,
{
    type Item = OrmResult<Row>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(row))) => Poll::Ready(Some(decode_row(&row))),
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(OrmError::from_db_error(e)))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

fn bind(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

impl Storage for tokio_postgres::Client {
    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        let sql = to_numbered_placeholders(sql);
        let rows = tokio_postgres::Client::query(self, &sql, &bind(params))
            .await
            .map_err(OrmError::from_db_error)?;
        rows.iter().map(decode_row).collect()
    }

    async fn query_stream(&self, sql: &str, params: &[Value]) -> OrmResult<RowStream> {
        let sql = to_numbered_placeholders(sql);
        let stream = tokio_postgres::Client::query_raw(self, &sql, params.iter())
            .await
            .map_err(OrmError::from_db_error)?;
        Ok(RowStream::new(DecodeRowStream::new(stream)))
    }
}

impl Storage for tokio_postgres::Transaction<'_> {
    async fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        let sql = to_numbered_placeholders(sql);
        let rows = tokio_postgres::Transaction::query(self, &sql, &bind(params))
            .await
            .map_err(OrmError::from_db_error)?;
        rows.iter().map(decode_row).collect()
    }

    async fn query_stream(&self, sql: &str, params: &[Value]) -> OrmResult<RowStream> {
        let sql = to_numbered_placeholders(sql);
        let stream = tokio_postgres::Transaction::query_raw(self, &sql, params.iter())
            .await
            .map_err(OrmError::from_db_error)?;
        Ok(RowStream::new(DecodeRowStream::new(stream)))
    }

    fn in_transaction(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ints_narrow_to_the_parameter_type() {
        let mut buf = BytesMut::new();
        Value::Int(7).to_sql(&Type::INT4, &mut buf).unwrap();
        assert_eq!(&buf[..], &7i32.to_be_bytes());

        let mut buf = BytesMut::new();
        assert!(Value::Int(i64::MAX).to_sql(&Type::INT2, &mut buf).is_err());
    }

    #[test]
    fn null_binds_as_sql_null() {
        let mut buf = BytesMut::new();
        assert!(matches!(
            Value::Null.to_sql(&Type::TEXT, &mut buf).unwrap(),
            IsNull::Yes
        ));
    }

    #[test]
    fn bound_params_follow_value_order() {
        let params = vec![Value::Int(1), Value::Text("a".into())];
        assert_eq!(bind(&params).len(), 2);
    }
}
