#![allow(async_fn_in_trait)]

use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::{Arguments, Column as _, Row as _, TypeInfo as _};
use uuid::Uuid;

use crate::conf::ClientOptions;
use crate::db::interfaces::{DynEntity, Entity};
use crate::db::query::{
    self, BindType, Queries, Query, delete_statement, save_statement, soft_delete_statement,
    where_query,
};
use crate::db::value::{Params, Row, Value};
use crate::errors::{DbError, Error, Result};

/// Capabilities consumed from the underlying relational driver. Statements
/// arrive positional and already rebound to [`Driver::bind_type`].
pub trait Driver: Send + Sync {
    fn bind_type(&self) -> BindType {
        BindType::Dollar
    }

    async fn fetch_one(&self, sql: &str, args: &[Value]) -> Result<Row, DbError>;

    async fn fetch_all(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, DbError>;

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, DbError>;

    async fn ping(&self) -> Result<(), DbError>;

    async fn close(&self) -> Result<(), DbError>;

    fn rebind(&self, sql: &str) -> String {
        query::rebind(self.bind_type(), sql)
    }

    fn prepare_named(&self, sql: &str) -> NamedStatement<'_, Self>
    where
        Self: Sized,
    {
        NamedStatement {
            driver: self,
            sql: sql.to_string(),
        }
    }
}

/// A statement with `:name` placeholders bound per call.
pub struct NamedStatement<'d, D: Driver> {
    driver: &'d D,
    sql: String,
}

impl<D: Driver> NamedStatement<'_, D> {
    pub fn bind(&self, params: Params, fetch_one: bool) -> Result<Query> {
        Query::named(&self.sql, params, fetch_one)
    }

    pub async fn get(&self, params: Params) -> Result<Row> {
        let query = self.bind(params, true)?;
        fetch_row(self.driver, &query).await
    }

    pub async fn exec(&self, params: Params) -> Result<u64> {
        let query = self.bind(params, false)?;
        execute(self.driver, &query).await
    }
}

fn log_query(query: &Query, elapsed: Duration, failure: Option<&DbError>) {
    match failure {
        None => tracing::debug!(
            sql = %query.query,
            args = query.args.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "query executed"
        ),
        Some(e) => tracing::warn!(
            sql = %query.query,
            args = query.args.len(),
            elapsed_us = elapsed.as_micros() as u64,
            error = %e,
            "query failed"
        ),
    }
}

pub(crate) async fn fetch_row<D: Driver>(driver: &D, query: &Query) -> Result<Row> {
    let started = Instant::now();
    let result = driver.fetch_one(&driver.rebind(&query.query), &query.args).await;
    log_query(query, started.elapsed(), result.as_ref().err());
    Ok(result?)
}

pub(crate) async fn fetch_rows<D: Driver>(driver: &D, query: &Query) -> Result<Vec<Row>> {
    let started = Instant::now();
    let result = driver.fetch_all(&driver.rebind(&query.query), &query.args).await;
    log_query(query, started.elapsed(), result.as_ref().err());
    Ok(result?)
}

pub(crate) async fn execute<D: Driver>(driver: &D, query: &Query) -> Result<u64> {
    let started = Instant::now();
    let result = driver.execute(&driver.rebind(&query.query), &query.args).await;
    log_query(query, started.elapsed(), result.as_ref().err());
    Ok(result?)
}

/// Inserts the entity when its primary key is zero, updates it otherwise.
/// Ignored and defaulted columns are read back into `entity`.
pub async fn save<D: Driver, E: Entity>(driver: &D, entity: &mut E) -> Result<Queries> {
    let schema = E::schema()?;
    let stmt = save_statement(&schema, &*entity);
    let named = driver.prepare_named(&stmt.sql);
    let fetch_one = !stmt.returning.is_empty();
    let query = named.bind(entity.column_values(), fetch_one)?;

    let queries = vec![query.clone()];
    if fetch_one {
        let row = fetch_row(driver, &query).await?;
        entity.apply_row(&row)?;
    } else {
        execute(driver, &query).await?;
    }
    Ok(queries)
}

fn require_key(entity: &dyn DynEntity) -> Result<Value> {
    let pk = entity.primary_key();
    if pk.is_zero() {
        return Err(Error::ZeroKey {
            table: entity.table_name(),
        });
    }
    Ok(pk)
}

pub async fn delete<D: Driver, E: Entity>(driver: &D, entity: &E) -> Result<Queries> {
    require_key(entity)?;
    let schema = E::schema()?;
    let sql = delete_statement(&schema);
    let query = driver
        .prepare_named(&sql)
        .bind(entity.column_values(), false)?;
    execute(driver, &query).await?;
    Ok(vec![query])
}

/// Stamps `field` with the current time instead of deleting the row.
pub async fn soft_delete<D: Driver, E: Entity>(
    driver: &D,
    entity: &E,
    field: &str,
) -> Result<Queries> {
    let pk = require_key(entity)?;
    let schema = E::schema()?;
    let (sql, column) = soft_delete_statement(&schema, field)?;

    let mut params = Params::new();
    params.insert(column, Value::Timestamp(Utc::now()));
    params.insert(schema.primary_key.column.name.clone(), pk);

    let query = driver.prepare_named(&sql).bind(params, false)?;
    execute(driver, &query).await?;
    Ok(vec![query])
}

/// First row matching every parameter. "No rows" surfaces as
/// [`DbError::DoesNotExist`].
pub async fn get_by_params<D: Driver, E: Entity>(driver: &D, params: Params) -> Result<E> {
    let schema = E::schema()?;
    let query = where_query(&schema, params, true)?;
    let row = fetch_row(driver, &query).await?;
    Ok(E::from_row(&row)?)
}

pub async fn find_by_params<D: Driver, E: Entity>(driver: &D, params: Params) -> Result<Vec<E>> {
    let schema = E::schema()?;
    let query = where_query(&schema, params, false)?;
    let rows = fetch_rows(driver, &query).await?;
    rows.iter()
        .map(|row| E::from_row(row).map_err(Error::from))
        .collect()
}

/// PostgreSQL driver over a sqlx pool.
#[derive(Clone, Debug)]
pub struct PgDriver {
    pool: PgPool,
}

impl PgDriver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Builds the pool without opening a connection; the first statement
    /// connects.
    pub fn connect_lazy(options: &ClientOptions) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .min_connections(options.min_connections)
            .max_connections(options.max_connections)
            .acquire_timeout(Duration::from_secs(options.acquire_timeout_secs))
            .idle_timeout(options.idle_timeout_secs.map(Duration::from_secs))
            .connect_lazy(&options.url)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Binds positional arguments. `NULL` is written inline by
/// [`query::compile_named`] and is rejected here.
fn bind_args(args: &[Value]) -> Result<PgArguments, DbError> {
    let mut out = PgArguments::default();
    for arg in args {
        let res = match arg {
            Value::Null => {
                return Err(DbError::Bind(
                    "NULL must be written inline, not bound".to_string(),
                ));
            }
            Value::Bool(b) => out.add(*b),
            Value::Int(i) => out.add(*i),
            Value::Float(f) => out.add(*f),
            Value::Text(s) => out.add(s.clone()),
            Value::Timestamp(t) => out.add(*t),
            Value::Uuid(u) => out.add(*u),
            Value::Json(j) => out.add(j.clone()),
            Value::List(_) => {
                return Err(DbError::Bind(
                    "list values must be expanded before binding".to_string(),
                ));
            }
        };
        res.map_err(|e| DbError::Bind(e.to_string()))?;
    }
    Ok(out)
}

fn decode_row(row: &PgRow) -> Result<Row, DbError> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "BOOL" => row.try_get::<Option<bool>, _>(idx)?.map(Value::Bool),
            "INT2" => row
                .try_get::<Option<i16>, _>(idx)?
                .map(|v| Value::Int(i64::from(v))),
            "INT4" => row
                .try_get::<Option<i32>, _>(idx)?
                .map(|v| Value::Int(i64::from(v))),
            "INT8" => row.try_get::<Option<i64>, _>(idx)?.map(Value::Int),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(idx)?
                .map(|v| Value::Float(f64::from(v))),
            "FLOAT8" => row.try_get::<Option<f64>, _>(idx)?.map(Value::Float),
            "NUMERIC" => row
                .try_get::<Option<Decimal>, _>(idx)?
                .map(|d| {
                    d.to_f64().map(Value::Float).ok_or_else(|| {
                        DbError::Decode(format!("{} does not fit f64 in {}", d, column.name()))
                    })
                })
                .transpose()?,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" => {
                row.try_get::<Option<String>, _>(idx)?.map(Value::Text)
            }
            "TIMESTAMPTZ" => row
                .try_get::<Option<DateTime<Utc>>, _>(idx)?
                .map(Value::Timestamp),
            "TIMESTAMP" => row
                .try_get::<Option<NaiveDateTime>, _>(idx)?
                .map(|t| Value::Timestamp(t.and_utc())),
            "UUID" => row.try_get::<Option<Uuid>, _>(idx)?.map(Value::Uuid),
            "JSON" | "JSONB" => row
                .try_get::<Option<serde_json::Value>, _>(idx)?
                .map(Value::Json),
            other => {
                return Err(DbError::Decode(format!(
                    "unsupported column type {} for {}",
                    other,
                    column.name()
                )));
            }
        };
        out.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }
    Ok(out)
}

impl Driver for PgDriver {
    async fn fetch_one(&self, sql: &str, args: &[Value]) -> Result<Row, DbError> {
        let row = sqlx::query_with(sql, bind_args(args)?)
            .fetch_one(&self.pool)
            .await?;
        decode_row(&row)
    }

    async fn fetch_all(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, DbError> {
        let rows = sqlx::query_with(sql, bind_args(args)?)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<u64, DbError> {
        let res = sqlx::query_with(sql, bind_args(args)?)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn ping(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn bind_args_binds_every_scalar() {
        let args = [
            Value::Bool(true),
            Value::Int(7),
            Value::Float(1.5),
            Value::from("x"),
            Value::Timestamp(Utc::now()),
            Value::Uuid(Uuid::nil()),
            Value::Json(serde_json::json!({"a": 1})),
        ];
        assert_eq!(bind_args(&args).unwrap().len(), args.len());
    }

    #[test]
    fn bind_args_rejects_null_and_lists() {
        let err = bind_args(&[Value::Int(1), Value::Null]).unwrap_err();
        assert_eq!(err.code(), "bind_error");

        let err = bind_args(&[Value::List(vec![Value::Int(1)])]).unwrap_err();
        assert_eq!(err.code(), "bind_error");
    }

    #[test]
    fn compiled_nulls_reach_the_driver_inline() {
        let query = Query::named(
            "UPDATE users SET avatar_id = :avatar_id WHERE id = :id",
            params! { "avatar_id" => Value::Null, "id" => 3 },
            false,
        )
        .unwrap();
        assert_eq!(
            query::rebind(BindType::Dollar, &query.query),
            "UPDATE users SET avatar_id = NULL WHERE id = $1"
        );
        assert_eq!(bind_args(&query.args).unwrap().len(), 1);
    }
}
