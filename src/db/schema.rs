//! Additive schema reconciliation for columns newer code expects.
//!
//! The desired shape is a declarative list of [`ColumnSpec`]s. Each spec is
//! checked against `information_schema.COLUMNS` and added when missing.
//! Nothing here drops, renames or alters an existing column.

use async_trait::async_trait;
use sqlx::{mysql::MySqlDatabaseError, Executor, MySqlPool};
use std::{fmt, time::Duration};
use thiserror::Error;

const COLUMN_EXISTS_SQL: &str = r#"
    SELECT COUNT(*) AS cnt
    FROM information_schema.COLUMNS
    WHERE TABLE_SCHEMA = DATABASE()
      AND TABLE_NAME = ?
      AND COLUMN_NAME = ?
"#;

/// MySQL's identifier length limit.
const MAX_IDENTIFIER_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    VarChar(u16),
    Text,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::VarChar(len) => write!(f, "VARCHAR({})", len),
            ColumnType::Text => f.write_str("TEXT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub table: &'static str,
    pub column: &'static str,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl ColumnSpec {
    pub const fn nullable(
        table: &'static str,
        column: &'static str,
        column_type: ColumnType,
    ) -> Self {
        Self {
            table,
            column,
            column_type,
            nullable: true,
        }
    }

    /// Column definition as it appears after the column name, e.g. `VARCHAR(255) NULL`.
    pub fn definition(&self) -> String {
        let nullability = if self.nullable { "NULL" } else { "NOT NULL" };
        format!("{} {}", self.column_type, nullability)
    }

    pub fn add_column_sql(&self) -> Result<String, SchemaError> {
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_identifier(self.table)?,
            quote_identifier(self.column)?,
            self.definition()
        ))
    }
}

/// Columns on `donations` that older databases may be missing.
pub const DONATION_COLUMNS: [ColumnSpec; 5] = [
    ColumnSpec::nullable("donations", "title", ColumnType::VarChar(255)),
    ColumnSpec::nullable("donations", "description", ColumnType::Text),
    ColumnSpec::nullable("donations", "proof_image", ColumnType::VarChar(512)),
    ColumnSpec::nullable("donations", "volunteer_name", ColumnType::VarChar(255)),
    ColumnSpec::nullable("donations", "volunteer_phone", ColumnType::VarChar(50)),
];

/// Identifiers cannot be bound as parameters, so they are restricted to a
/// plain charset and backtick-quoted.
pub fn quote_identifier(name: &str) -> Result<String, SchemaError> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid_start || !valid_rest || name.len() > MAX_IDENTIFIER_LEN {
        return Err(SchemaError::InvalidIdentifier(name.to_string()));
    }

    Ok(format!("`{}`", name))
}

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("database unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),

    #[error("timed out after {0:?} waiting on the database")]
    Timeout(Duration),

    #[error("catalog lookup failed for {table}.{column}: {source}")]
    Catalog {
        table: String,
        column: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to add column {table}.{column}: {source}")]
    Alter {
        table: String,
        column: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("invalid SQL identifier `{0}`")]
    InvalidIdentifier(String),
}

impl SchemaError {
    /// True when the failure is about reaching the database at all rather
    /// than about one column.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SchemaError::Unavailable(_) | SchemaError::Timeout(_))
    }
}

/// MySQL server errors that mean no query on this pool can succeed:
/// ER_DBACCESS_DENIED_ERROR, ER_ACCESS_DENIED_ERROR, ER_BAD_DB_ERROR.
const ACCESS_ERROR_NUMBERS: [u16; 3] = [1044, 1045, 1049];

fn is_access_error_number(number: u16) -> bool {
    ACCESS_ERROR_NUMBERS.contains(&number)
}

fn is_connectivity_error(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_error) => db_error
            .try_downcast_ref::<MySqlDatabaseError>()
            .map_or(false, |e| is_access_error_number(e.number())),
        _ => false,
    }
}

/// Read/alter access to live table metadata.
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    async fn column_exists(&self, table: &str, column: &str) -> Result<bool, SchemaError>;

    async fn add_column(&self, spec: &ColumnSpec) -> Result<(), SchemaError>;
}

/// [`SchemaCatalog`] backed by the shared MySQL pool.
pub struct MySqlCatalog {
    pool: MySqlPool,
    step_timeout: Duration,
}

impl MySqlCatalog {
    pub fn new(pool: MySqlPool, step_timeout: Duration) -> Self {
        Self { pool, step_timeout }
    }
}

#[async_trait]
impl SchemaCatalog for MySqlCatalog {
    async fn column_exists(&self, table: &str, column: &str) -> Result<bool, SchemaError> {
        let query = sqlx::query_scalar::<_, i64>(COLUMN_EXISTS_SQL)
            .bind(table)
            .bind(column)
            .fetch_optional(&self.pool);

        let count = tokio::time::timeout(self.step_timeout, query)
            .await
            .map_err(|_| SchemaError::Timeout(self.step_timeout))?
            .map_err(|e| {
                if is_connectivity_error(&e) {
                    SchemaError::Unavailable(e)
                } else {
                    SchemaError::Catalog {
                        table: table.to_string(),
                        column: column.to_string(),
                        source: e,
                    }
                }
            })?;

        Ok(count.unwrap_or(0) > 0)
    }

    async fn add_column(&self, spec: &ColumnSpec) -> Result<(), SchemaError> {
        let sql = spec.add_column_sql()?;

        tokio::time::timeout(self.step_timeout, self.pool.execute(sql.as_str()))
            .await
            .map_err(|_| SchemaError::Timeout(self.step_timeout))?
            .map_err(|e| {
                if is_connectivity_error(&e) {
                    SchemaError::Unavailable(e)
                } else {
                    SchemaError::Alter {
                        table: spec.table.to_string(),
                        column: spec.column.to_string(),
                        source: e,
                    }
                }
            })?;

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnOutcome {
    AlreadyPresent,
    Added,
}

#[derive(Debug)]
pub struct ColumnStep {
    pub spec: ColumnSpec,
    pub result: Result<ColumnOutcome, SchemaError>,
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Attempted columns, in declared order.
    pub steps: Vec<ColumnStep>,
    /// Columns not attempted because the database became unavailable.
    pub skipped: Vec<ColumnSpec>,
}

impl ReconcileReport {
    pub fn added(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.steps
            .iter()
            .filter(|step| matches!(step.result, Ok(ColumnOutcome::Added)))
            .map(|step| &step.spec)
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ColumnSpec, &SchemaError)> {
        self.steps.iter().filter_map(|step| match &step.result {
            Err(e) => Some((&step.spec, e)),
            Ok(_) => None,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.failures().next().is_none()
    }
}

/// Adds `spec` if the catalog does not already list it.
pub async fn ensure_column<C>(
    catalog: &C,
    spec: &ColumnSpec,
) -> Result<ColumnOutcome, SchemaError>
where
    C: SchemaCatalog + ?Sized,
{
    if catalog.column_exists(spec.table, spec.column).await? {
        return Ok(ColumnOutcome::AlreadyPresent);
    }

    catalog.add_column(spec).await?;
    Ok(ColumnOutcome::Added)
}

/// Runs [`ensure_column`] for each spec in order.
///
/// A failure on one column is recorded and the next column still runs. Once
/// the database itself is unavailable the remaining specs are skipped.
pub async fn ensure_schema<C>(catalog: &C, specs: &[ColumnSpec]) -> ReconcileReport
where
    C: SchemaCatalog + ?Sized,
{
    let mut report = ReconcileReport::default();

    for (index, spec) in specs.iter().enumerate() {
        let result = ensure_column(catalog, spec).await;
        let unavailable = matches!(&result, Err(e) if e.is_unavailable());

        report.steps.push(ColumnStep {
            spec: *spec,
            result,
        });

        if unavailable {
            report.skipped.extend_from_slice(&specs[index + 1..]);
            break;
        }
    }

    report
}
