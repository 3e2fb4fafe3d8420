//! PostgreSQL store
//!
//! One transaction per unit of work. Column lists come from the dataset
//! schemas; every value is bound with the Rust type matching the column's
//! declared SQL type, so an absent value is a typed `NULL`.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use eden_common::coerce::{parse_date, parse_timestamp};
use eden_common::{EntityRecord, FieldType, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use std::time::Duration;
use tracing::{debug, info};

use super::{DatasetTable, Scope, Store, UnitOfWork};
use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::reconcile::Patch;

/// PostgreSQL caps a statement at 65535 bind parameters
const MAX_BIND_PARAMS: usize = 65_000;

/// PostgreSQL-backed [`Store`]
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect(&config.url)
            .await?;

        info!("Database connection pool established");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    type Unit = PgUnitOfWork;

    async fn begin(&self, ticker: &str) -> Result<PgUnitOfWork, StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing =
            sqlx::query_scalar::<_, i32>("SELECT id FROM company WHERE symbol = $1")
                .bind(ticker)
                .fetch_optional(&mut *tx)
                .await?;

        let company_id = match existing {
            Some(id) => id,
            None => {
                debug!(ticker = %ticker, "Inserting company row");
                sqlx::query_scalar::<_, i32>("INSERT INTO company (symbol) VALUES ($1) RETURNING id")
                    .bind(ticker)
                    .fetch_one(&mut *tx)
                    .await?
            },
        };

        Ok(PgUnitOfWork {
            tx,
            ticker: ticker.to_string(),
            company_id,
        })
    }
}

/// One subject's open transaction
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
    ticker: String,
    company_id: i32,
}

impl PgUnitOfWork {
    pub fn company_id(&self) -> i32 {
        self.company_id
    }

    fn push_scope(&self, qb: &mut QueryBuilder<'static, Postgres>, table: &DatasetTable) {
        match table.scope() {
            Scope::Symbol => {
                qb.push("\"symbol\" = ");
                qb.push_bind(self.ticker.clone());
            },
            Scope::Company => {
                qb.push("\"company_id\" = ");
                qb.push_bind(self.company_id);
            },
        }
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn read_existing(&mut self, table: &DatasetTable) -> Result<Vec<EntityRecord>, StoreError> {
        let fields: Vec<_> = table.spec.schema().iter().collect();

        let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
        qb.push(column_list(fields.iter().map(|f| f.column())));
        qb.push(format!(" FROM {} WHERE ", table.table));
        self.push_scope(&mut qb, table);

        let rows = qb.build().fetch_all(&mut *self.tx).await?;

        let records = rows
            .iter()
            .map(|row| {
                fields
                    .iter()
                    .enumerate()
                    .map(|(i, field)| {
                        decode(row, i, field.ty())
                            .map(|value| (field.column().to_string(), value))
                            .map_err(|e| StoreError::decode(table.table, field.column(), e))
                    })
                    .collect::<Result<EntityRecord, StoreError>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(table = table.table, ticker = %self.ticker, rows = records.len(), "Read existing records");
        Ok(records)
    }

    async fn insert_many(
        &mut self,
        table: &DatasetTable,
        records: &[EntityRecord],
    ) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let fields: Vec<_> = table.spec.schema().iter().collect();
        let with_company = table.scope() == Scope::Company;

        // Convert everything up front so a bad value fails before any SQL runs
        let rows: Vec<Vec<SqlParam>> = records
            .iter()
            .map(|record| {
                fields
                    .iter()
                    .map(|f| {
                        SqlParam::from_value(record.get(f.column()), f.ty())
                            .map_err(|e| StoreError::decode(table.table, f.column(), e))
                    })
                    .collect()
            })
            .collect::<Result<_, _>>()?;

        let per_row = fields.len() + usize::from(with_company);
        let chunk_size = (MAX_BIND_PARAMS / per_row.max(1)).max(1);
        let mut written = 0;

        for chunk in rows.chunks(chunk_size) {
            let mut qb = QueryBuilder::<Postgres>::new(format!("INSERT INTO {} (", table.table));
            if with_company {
                qb.push("\"company_id\", ");
            }
            qb.push(column_list(fields.iter().map(|f| f.column())));
            qb.push(") VALUES ");

            for (i, row) in chunk.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                qb.push("(");
                if with_company {
                    qb.push_bind(self.company_id);
                    qb.push(", ");
                }
                for (j, param) in row.iter().enumerate() {
                    if j > 0 {
                        qb.push(", ");
                    }
                    param.clone().push_bind(&mut qb);
                }
                qb.push(")");
            }

            written += qb.build().execute(&mut *self.tx).await?.rows_affected();
        }

        debug!(table = table.table, ticker = %self.ticker, rows = written, "Inserted records");
        Ok(written)
    }

    async fn apply_patches(&mut self, table: &DatasetTable, patches: &[Patch])
        -> Result<u64, StoreError> {
        let schema = table.spec.schema();
        let mut touched = 0;

        for patch in patches {
            if patch.changes.is_empty() {
                continue;
            }

            let mut qb = QueryBuilder::<Postgres>::new(format!("UPDATE {} SET ", table.table));
            for (i, (column, value)) in patch.changes.iter().enumerate() {
                if i > 0 {
                    qb.push(", ");
                }
                qb.push(format!("\"{}\" = ", column));
                typed_param(table, schema.type_of(column), column, value)?.push_bind(&mut qb);
            }

            qb.push(" WHERE ");
            self.push_scope(&mut qb, table);
            for (column, value) in patch.key.parts() {
                qb.push(format!(" AND \"{}\" = ", column));
                typed_param(table, schema.type_of(column), column, value)?.push_bind(&mut qb);
            }

            touched += qb.build().execute(&mut *self.tx).await?.rows_affected();
        }

        debug!(table = table.table, ticker = %self.ticker, rows = touched, "Applied patches");
        Ok(touched)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn column_list<'a>(columns: impl Iterator<Item = &'a str>) -> String {
    columns.map(|c| format!("\"{}\"", c)).collect::<Vec<_>>().join(", ")
}

fn typed_param(
    table: &DatasetTable,
    ty: Option<FieldType>,
    column: &str,
    value: &Value,
) -> Result<SqlParam, StoreError> {
    let ty = ty.ok_or_else(|| StoreError::decode(table.table, column, "column is not in the schema"))?;
    SqlParam::from_value(value, ty).map_err(|e| StoreError::decode(table.table, column, e))
}

/// Read column `i` of a row as the declared type
fn decode(row: &PgRow, i: usize, ty: FieldType) -> Result<Value, sqlx::Error> {
    let value: Value = match ty {
        FieldType::SmallInteger => row.try_get::<Option<i16>, _>(i)?.map(i64::from).into(),
        FieldType::Integer => row.try_get::<Option<i32>, _>(i)?.map(i64::from).into(),
        FieldType::BigInteger => row.try_get::<Option<i64>, _>(i)?.into(),
        // Go through the shortest decimal text of the f32 so 12.3457 stays 12.3457
        FieldType::Real => row
            .try_get::<Option<f32>, _>(i)?
            .and_then(|r| r.to_string().parse::<f64>().ok())
            .into(),
        FieldType::Text => row.try_get::<Option<String>, _>(i)?.into(),
        FieldType::Boolean => row.try_get::<Option<bool>, _>(i)?.into(),
        FieldType::Date => row.try_get::<Option<NaiveDate>, _>(i)?.into(),
        FieldType::Timestamp => row.try_get::<Option<NaiveDateTime>, _>(i)?.into(),
    };
    Ok(value)
}

/// A value converted to the Rust type of its column
#[derive(Debug, Clone, PartialEq)]
enum SqlParam {
    SmallInt(Option<i16>),
    Int(Option<i32>),
    BigInt(Option<i64>),
    Real(Option<f32>),
    Text(Option<String>),
    Bool(Option<bool>),
    Date(Option<NaiveDate>),
    Timestamp(Option<NaiveDateTime>),
}

impl SqlParam {
    fn from_value(value: &Value, ty: FieldType) -> Result<Self, String> {
        let mismatch = || format!("cannot store {} value {} as {}", value.kind(), value, ty);

        let param = match ty {
            FieldType::SmallInteger => SqlParam::SmallInt(
                integer_of(value)
                    .map(|i| i16::try_from(i).map_err(|_| mismatch()))
                    .transpose()?,
            ),
            FieldType::Integer => SqlParam::Int(
                integer_of(value)
                    .map(|i| i32::try_from(i).map_err(|_| mismatch()))
                    .transpose()?,
            ),
            FieldType::BigInteger => SqlParam::BigInt(integer_of(value)),
            FieldType::Real => SqlParam::Real(value.as_f64().map(|r| r as f32)),
            FieldType::Text => SqlParam::Text(value.is_present().then(|| value.canonical())),
            FieldType::Boolean => SqlParam::Bool(match value {
                Value::Boolean(b) => Some(*b),
                _ => None,
            }),
            FieldType::Date => SqlParam::Date(match value {
                Value::Date(d) => Some(*d),
                Value::Timestamp(ts) => Some(ts.date()),
                Value::Text(s) => parse_date(s),
                _ => None,
            }),
            FieldType::Timestamp => SqlParam::Timestamp(match value {
                Value::Timestamp(ts) => Some(*ts),
                Value::Date(d) => d.and_hms_opt(0, 0, 0),
                Value::Text(s) => parse_timestamp(s),
                _ => None,
            }),
        };

        if value.is_present() && param.is_null() {
            return Err(mismatch());
        }
        Ok(param)
    }

    fn is_null(&self) -> bool {
        match self {
            SqlParam::SmallInt(v) => v.is_none(),
            SqlParam::Int(v) => v.is_none(),
            SqlParam::BigInt(v) => v.is_none(),
            SqlParam::Real(v) => v.is_none(),
            SqlParam::Text(v) => v.is_none(),
            SqlParam::Bool(v) => v.is_none(),
            SqlParam::Date(v) => v.is_none(),
            SqlParam::Timestamp(v) => v.is_none(),
        }
    }

    fn push_bind(self, qb: &mut QueryBuilder<'static, Postgres>) {
        match self {
            SqlParam::SmallInt(v) => qb.push_bind(v),
            SqlParam::Int(v) => qb.push_bind(v),
            SqlParam::BigInt(v) => qb.push_bind(v),
            SqlParam::Real(v) => qb.push_bind(v),
            SqlParam::Text(v) => qb.push_bind(v),
            SqlParam::Bool(v) => qb.push_bind(v),
            SqlParam::Date(v) => qb.push_bind(v),
            SqlParam::Timestamp(v) => qb.push_bind(v),
        };
    }
}

fn integer_of(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::Real(r) if r.fract() == 0.0 && r.is_finite() => Some(*r as i64),
        _ => None,
    }
}
