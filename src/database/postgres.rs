//! PostgreSQL and Redshift session
//!
//! Blocking [`SqlSession`] over `tokio-postgres`. The async client is driven
//! by a private current-thread runtime; every call is a `block_on`. The same
//! session type serves Redshift, which speaks the PostgreSQL wire protocol
//! but has no native upsert.

use bytes::BytesMut;
use tokio::runtime::Runtime;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use tracing::{debug, error};

use super::config::mask_connection_string;
use super::{Dialect, QueryResult, SqlSession, WriteError, WriteResult};
use crate::batch::Value;

/// PostgreSQL or Redshift session
pub struct PostgresSession {
    runtime: Runtime,
    client: tokio_postgres::Client,
    dialect: Dialect,
    /// Connection string
    connection_string: String,
}

impl PostgresSession {
    /// Connect to PostgreSQL
    pub fn connect(connection_string: &str) -> WriteResult<Self> {
        Self::connect_with_dialect(connection_string, Dialect::Postgres)
    }

    /// Connect to Redshift
    pub fn connect_redshift(connection_string: &str) -> WriteResult<Self> {
        Self::connect_with_dialect(connection_string, Dialect::Redshift)
    }

    /// Connect and speak the given dialect
    pub fn connect_with_dialect(connection_string: &str, dialect: Dialect) -> WriteResult<Self> {
        if dialect == Dialect::DuckDb {
            return Err(WriteError::Config(
                "duckdb is not reachable over the PostgreSQL protocol".to_string(),
            ));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| WriteError::Io(format!("Failed to start runtime: {}", e)))?;

        let (client, connection) = runtime
            .block_on(tokio_postgres::connect(
                connection_string,
                tokio_postgres::NoTls,
            ))
            .map_err(|e| {
                WriteError::Connection(format!(
                    "Failed to connect to {}: {}",
                    mask_connection_string(connection_string),
                    e
                ))
            })?;

        // Spawn connection handler; it runs whenever the runtime is driven
        runtime.spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        debug!(
            "Connected to {} ({})",
            mask_connection_string(connection_string),
            dialect
        );

        Ok(Self {
            runtime,
            client,
            dialect,
            connection_string: connection_string.to_string(),
        })
    }

    /// Get the connection string (masked for security)
    pub fn connection_string_masked(&self) -> String {
        mask_connection_string(&self.connection_string)
    }

    /// Run one or more statements through the simple query protocol
    pub fn batch_execute(&self, sql: &str) -> WriteResult<()> {
        self.runtime
            .block_on(self.client.batch_execute(sql))
            .map_err(|e| pg_error(sql, e))
    }

    /// Convert a PostgreSQL row to a JSON value
    fn row_to_json(row: &tokio_postgres::Row, columns: &[String]) -> serde_json::Value {
        let mut map = serde_json::Map::new();

        for (i, col_name) in columns.iter().enumerate() {
            let value = Self::get_column_value(row, i);
            map.insert(col_name.clone(), value);
        }

        serde_json::Value::Object(map)
    }

    /// Get a column value as JSON
    fn get_column_value(row: &tokio_postgres::Row, idx: usize) -> serde_json::Value {
        // Try different types
        if let Ok(v) = row.try_get::<_, Option<String>>(idx) {
            return v
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<i64>>(idx) {
            return v.map(Into::into).unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<i32>>(idx) {
            return v.map(Into::into).unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<i16>>(idx) {
            return v.map(Into::into).unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<bool>>(idx) {
            return v
                .map(serde_json::Value::Bool)
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<f64>>(idx) {
            return v
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<chrono::NaiveDateTime>>(idx) {
            return v
                .map(|ts| serde_json::Value::String(Value::timestamp_text(&ts)))
                .unwrap_or(serde_json::Value::Null);
        }
        if let Ok(v) = row.try_get::<_, Option<serde_json::Value>>(idx) {
            return v.unwrap_or(serde_json::Value::Null);
        }

        serde_json::Value::Null
    }
}

fn pg_error(statement: &str, err: tokio_postgres::Error) -> WriteError {
    match err.as_db_error() {
        Some(db) => WriteError::sql(statement, db),
        None => WriteError::sql(statement, err),
    }
}

/// Binds a [`Value`] to whatever type the server inferred for its placeholder
#[derive(Debug)]
struct PgParam<'a>(&'a Value);

fn is_text(ty: &Type) -> bool {
    *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
}

fn int_to_sql(
    i: i64,
    ty: &Type,
    out: &mut BytesMut,
) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
    if *ty == Type::INT2 {
        i16::try_from(i)?.to_sql(ty, out)
    } else if *ty == Type::INT4 {
        i32::try_from(i)?.to_sql(ty, out)
    } else if *ty == Type::FLOAT8 {
        (i as f64).to_sql(ty, out)
    } else if *ty == Type::FLOAT4 {
        (i as f32).to_sql(ty, out)
    } else if is_text(ty) {
        i.to_string().to_sql(ty, out)
    } else {
        i.to_sql(ty, out)
    }
}

impl ToSql for PgParam<'_> {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self.0 {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) if is_text(ty) => b.to_string().to_sql(ty, out),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Int(i) => int_to_sql(*i, ty, out),
            Value::Float(f) if *ty == Type::FLOAT4 => (*f as f32).to_sql(ty, out),
            Value::Float(f) if is_text(ty) => f.to_string().to_sql(ty, out),
            Value::Float(f) => f.to_sql(ty, out),
            Value::Text(s) => s.as_str().to_sql(ty, out),
            Value::Timestamp(ts) if *ty == Type::TIMESTAMPTZ => ts.and_utc().to_sql(ty, out),
            Value::Timestamp(ts) if *ty == Type::DATE => ts.date().to_sql(ty, out),
            Value::Timestamp(ts) if is_text(ty) => Value::timestamp_text(ts).to_sql(ty, out),
            Value::Timestamp(ts) => ts.to_sql(ty, out),
            Value::Duration(d) => match Value::duration_nanos(d) {
                Some(nanos) => int_to_sql(nanos, ty, out),
                None => Ok(IsNull::Yes),
            },
            Value::Complex(json) if *ty == Type::JSON || *ty == Type::JSONB => json.to_sql(ty, out),
            Value::Complex(json) => json.to_string().to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl SqlSession for PostgresSession {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> WriteResult<u64> {
        let bound: Vec<PgParam> = params.iter().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        self.runtime
            .block_on(self.client.execute(sql, &refs))
            .map_err(|e| pg_error(sql, e))
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> WriteResult<QueryResult> {
        let bound: Vec<PgParam> = params.iter().map(PgParam).collect();
        let refs: Vec<&(dyn ToSql + Sync)> =
            bound.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let client = &self.client;
        let (statement, rows) = self
            .runtime
            .block_on(async {
                let statement = client.prepare(sql).await?;
                let rows = client.query(&statement, &refs).await?;
                Ok::<_, tokio_postgres::Error>((statement, rows))
            })
            .map_err(|e| pg_error(sql, e))?;

        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let json_rows = rows
            .iter()
            .map(|row| Self::row_to_json(row, &columns))
            .collect();

        Ok(QueryResult::new(columns, json_rows))
    }

    fn begin(&mut self) -> WriteResult<()> {
        self.batch_execute("BEGIN")
    }

    fn commit(&mut self) -> WriteResult<()> {
        self.batch_execute("COMMIT")
    }

    fn rollback(&mut self) -> WriteResult<()> {
        self.batch_execute("ROLLBACK")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn encode(value: &Value, ty: &Type) -> (bool, Vec<u8>) {
        let mut out = BytesMut::new();
        let is_null = PgParam(value).to_sql(ty, &mut out).unwrap();
        (matches!(is_null, IsNull::Yes), out.to_vec())
    }

    #[test]
    fn test_int_follows_placeholder_type() {
        assert_eq!(encode(&Value::Int(5), &Type::INT4), (false, vec![0, 0, 0, 5]));
        assert_eq!(encode(&Value::Int(5), &Type::INT2), (false, vec![0, 5]));
        assert_eq!(encode(&Value::Int(5), &Type::INT8).1.len(), 8);
        assert_eq!(encode(&Value::Int(5), &Type::TEXT), (false, b"5".to_vec()));

        let mut out = BytesMut::new();
        assert!(PgParam(&Value::Int(70_000)).to_sql(&Type::INT2, &mut out).is_err());
    }

    #[test]
    fn test_null_and_text() {
        assert!(encode(&Value::Null, &Type::INT8).0);
        assert_eq!(encode(&Value::from("abc"), &Type::TEXT), (false, b"abc".to_vec()));
        assert_eq!(
            encode(&Value::Complex(serde_json::json!([1])), &Type::TEXT),
            (false, b"[1]".to_vec())
        );
    }

    #[test]
    fn test_timestamp_as_text() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(
            encode(&Value::Timestamp(ts), &Type::TEXT),
            (false, b"2024-01-02 03:04:05.000000".to_vec())
        );
        assert_eq!(encode(&Value::Timestamp(ts), &Type::TIMESTAMP).1.len(), 8);
    }

    #[test]
    fn test_connect_rejects_duckdb_dialect() {
        let result = PostgresSession::connect_with_dialect("postgresql://localhost/x", Dialect::DuckDb);
        assert!(matches!(result, Err(WriteError::Config(_))));
    }
}
