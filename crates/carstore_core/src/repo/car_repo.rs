//! Car repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide the add/find/list/update/remove capability set over `cars`.
//! - Keep SQL and JSON encoding inside the persistence boundary.
//!
//! # Invariants
//! - Write paths call `Car::validate()` before SQL mutations.
//! - Every successful write bumps `version`; inserts start at `1`.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::DbError;
use crate::model::car::{Car, CarAttributes, CarId, CarValidationError};
use crate::options::ConflictPolicy;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const CAR_SELECT_SQL: &str = "SELECT id, attributes, version FROM cars";
const REQUIRED_COLUMNS: &[&str] = &["id", "attributes", "version", "created_at", "updated_at"];

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for car persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(CarValidationError),
    Db(DbError),
    NotFound(CarId),
    Duplicate(CarId),
    /// A stale write was rejected under `ConflictPolicy::RejectStale`.
    Conflict {
        id: CarId,
        expected_version: i64,
        actual_version: i64,
    },
    InvalidData(String),
    InvalidQuery(String),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "car not found: {id}"),
            Self::Duplicate(id) => write!(f, "car already exists: {id}"),
            Self::Conflict {
                id,
                expected_version,
                actual_version,
            } => write!(
                f,
                "car {id} was modified concurrently: expected version {expected_version}, found {actual_version}"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted car data: {message}"),
            Self::InvalidQuery(message) => write!(f, "invalid car query: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection schema version {actual_version} does not match expected {expected_version}"
            ),
            Self::MissingRequiredTable(table) => write!(f, "missing required table `{table}`"),
            Self::MissingRequiredColumn { table, column } => {
                write!(f, "missing required column `{table}.{column}`")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CarValidationError> for RepoError {
    fn from(value: CarValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Equality filter on one top-level attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeFilter {
    pub key: String,
    /// Must be a scalar: string, number, bool or null.
    pub value: Value,
}

/// Query options for listing cars.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CarQuery {
    pub filters: Vec<AttributeFilter>,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl CarQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an attribute equality filter; filters combine with AND.
    pub fn where_eq(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(AttributeFilter {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }
}

/// Repository interface for car CRUD operations.
pub trait CarRepository {
    /// Inserts a new row and returns its version.
    fn insert_car(&self, car: &Car) -> RepoResult<i64>;
    fn get_car(&self, id: CarId) -> RepoResult<Option<Car>>;
    fn list_cars(&self, query: &CarQuery) -> RepoResult<Vec<Car>>;
    /// Overwrites attributes and returns the new version.
    fn update_car(&self, car: &Car, policy: ConflictPolicy) -> RepoResult<i64>;
    /// Deletes a row; `expected_version` guards against stale deletes.
    fn delete_car(&self, id: CarId, expected_version: Option<i64>) -> RepoResult<()>;
    fn count_cars(&self) -> RepoResult<u64>;
}

/// SQLite-backed car repository.
pub struct SqliteCarRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCarRepository<'conn> {
    /// Wraps a connection that is already migrated to the latest schema.
    ///
    /// # Errors
    /// - `UninitializedConnection` when `user_version` is not the latest.
    /// - `MissingRequiredTable` / `MissingRequiredColumn` for partial schemas.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        let expected_version = latest_version();
        let actual_version = current_user_version(conn)?;
        if actual_version != expected_version {
            return Err(RepoError::UninitializedConnection {
                expected_version,
                actual_version,
            });
        }

        ensure_cars_schema(conn)?;
        Ok(Self { conn })
    }

    /// Wraps a connection without schema checks.
    ///
    /// Callers must guarantee the connection came from `open_store`.
    pub(crate) fn new_unchecked(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn current_version(&self, id: CarId) -> RepoResult<Option<i64>> {
        let version = self
            .conn
            .query_row(
                "SELECT version FROM cars WHERE id = ?1;",
                [id.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(version)
    }

    fn stale_write_error(&self, id: CarId, expected_version: i64) -> RepoResult<RepoError> {
        Ok(match self.current_version(id)? {
            Some(actual_version) => RepoError::Conflict {
                id,
                expected_version,
                actual_version,
            },
            None => RepoError::NotFound(id),
        })
    }
}

impl CarRepository for SqliteCarRepository<'_> {
    fn insert_car(&self, car: &Car) -> RepoResult<i64> {
        car.validate()?;

        let changed = self.conn.execute(
            "INSERT INTO cars (id, attributes, version)
             VALUES (?1, ?2, 1)
             ON CONFLICT(id) DO NOTHING;",
            params![car.id.to_string(), encode_attributes(&car.attributes)?],
        )?;

        if changed == 0 {
            return Err(RepoError::Duplicate(car.id));
        }

        Ok(1)
    }

    fn get_car(&self, id: CarId) -> RepoResult<Option<Car>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CAR_SELECT_SQL} WHERE id = ?1;"))?;

        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_car_row(row)?));
        }

        Ok(None)
    }

    fn list_cars(&self, query: &CarQuery) -> RepoResult<Vec<Car>> {
        let mut sql = format!("{CAR_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<SqlValue> = Vec::new();

        for filter in &query.filters {
            push_filter(&mut sql, &mut bind_values, filter)?;
        }

        sql.push_str(" ORDER BY created_at ASC, rowid ASC");

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(SqlValue::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(SqlValue::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(SqlValue::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut cars = Vec::new();

        while let Some(row) = rows.next()? {
            cars.push(parse_car_row(row)?);
        }

        Ok(cars)
    }

    fn update_car(&self, car: &Car, policy: ConflictPolicy) -> RepoResult<i64> {
        car.validate()?;
        let attributes = encode_attributes(&car.attributes)?;

        let new_version = match policy {
            ConflictPolicy::LastWriteWins => self
                .conn
                .query_row(
                    "UPDATE cars
                     SET
                        attributes = ?1,
                        version = version + 1,
                        updated_at = (strftime('%s', 'now') * 1000)
                     WHERE id = ?2
                     RETURNING version;",
                    params![attributes, car.id.to_string()],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?,
            ConflictPolicy::RejectStale => self
                .conn
                .query_row(
                    "UPDATE cars
                     SET
                        attributes = ?1,
                        version = version + 1,
                        updated_at = (strftime('%s', 'now') * 1000)
                     WHERE id = ?2 AND version = ?3
                     RETURNING version;",
                    params![attributes, car.id.to_string(), car.version],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?,
        };

        match (new_version, policy) {
            (Some(version), _) => Ok(version),
            (None, ConflictPolicy::LastWriteWins) => Err(RepoError::NotFound(car.id)),
            (None, ConflictPolicy::RejectStale) => {
                Err(self.stale_write_error(car.id, car.version)?)
            }
        }
    }

    fn delete_car(&self, id: CarId, expected_version: Option<i64>) -> RepoResult<()> {
        let changed = match expected_version {
            Some(version) => self.conn.execute(
                "DELETE FROM cars WHERE id = ?1 AND version = ?2;",
                params![id.to_string(), version],
            )?,
            None => self
                .conn
                .execute("DELETE FROM cars WHERE id = ?1;", [id.to_string()])?,
        };

        if changed == 0 {
            return Err(match expected_version {
                Some(version) => self.stale_write_error(id, version)?,
                None => RepoError::NotFound(id),
            });
        }

        Ok(())
    }

    fn count_cars(&self) -> RepoResult<u64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM cars;", [], |row| row.get::<_, i64>(0))?;
        u64::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative row count {count}")))
    }
}

fn ensure_cars_schema(conn: &Connection) -> RepoResult<()> {
    let table_exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'cars'
        );",
        [],
        |row| row.get(0),
    )?;
    if table_exists != 1 {
        return Err(RepoError::MissingRequiredTable("cars"));
    }

    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info('cars');")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    for column in REQUIRED_COLUMNS.iter().copied() {
        if !columns.iter().any(|name| name.as_str() == column) {
            return Err(RepoError::MissingRequiredColumn {
                table: "cars",
                column,
            });
        }
    }

    Ok(())
}

fn push_filter(
    sql: &mut String,
    bind_values: &mut Vec<SqlValue>,
    filter: &AttributeFilter,
) -> RepoResult<()> {
    if filter.key.is_empty() || filter.key.contains('"') {
        return Err(RepoError::InvalidQuery(format!(
            "unsupported attribute key `{}`",
            filter.key
        )));
    }
    let path = format!("$.\"{}\"", filter.key);

    match &filter.value {
        Value::Null => {
            sql.push_str(" AND json_type(attributes, ?) = 'null'");
            bind_values.push(SqlValue::Text(path));
        }
        Value::Bool(flag) => {
            sql.push_str(" AND json_type(attributes, ?) = ?");
            bind_values.push(SqlValue::Text(path));
            bind_values.push(SqlValue::Text(if *flag { "true" } else { "false" }.to_string()));
        }
        Value::Number(number) => {
            let bound = if let Some(int) = number.as_i64() {
                SqlValue::Integer(int)
            } else if let Some(real) = number.as_f64() {
                SqlValue::Real(real)
            } else {
                return Err(RepoError::InvalidQuery(format!(
                    "unsupported number `{number}` for `{}`",
                    filter.key
                )));
            };
            // Anonymous placeholders cannot be reused, so the path is bound twice.
            sql.push_str(
                " AND json_type(attributes, ?) IN ('integer', 'real') AND json_extract(attributes, ?) = ?",
            );
            bind_values.push(SqlValue::Text(path.clone()));
            bind_values.push(SqlValue::Text(path));
            bind_values.push(bound);
        }
        Value::String(text) => {
            sql.push_str(
                " AND json_type(attributes, ?) = 'text' AND json_extract(attributes, ?) = ?",
            );
            bind_values.push(SqlValue::Text(path.clone()));
            bind_values.push(SqlValue::Text(path));
            bind_values.push(SqlValue::Text(text.clone()));
        }
        Value::Array(_) | Value::Object(_) => {
            return Err(RepoError::InvalidQuery(format!(
                "attribute `{}` can only be matched against scalar values",
                filter.key
            )));
        }
    }

    Ok(())
}

fn encode_attributes(attributes: &CarAttributes) -> RepoResult<String> {
    serde_json::to_string(attributes)
        .map_err(|err| RepoError::InvalidData(format!("failed to encode attributes: {err}")))
}

fn parse_car_row(row: &Row<'_>) -> RepoResult<Car> {
    let id_text: String = row.get("id")?;
    let id = Uuid::parse_str(&id_text)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{id_text}` in cars.id")))?;

    let attributes_text: String = row.get("attributes")?;
    let attributes = match serde_json::from_str::<Value>(&attributes_text) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            return Err(RepoError::InvalidData(format!(
                "cars.attributes for {id} is not a JSON object"
            )));
        }
        Err(err) => {
            return Err(RepoError::InvalidData(format!(
                "cars.attributes for {id} is not valid JSON: {err}"
            )));
        }
    };

    let version: i64 = row.get("version")?;
    if version < 1 {
        return Err(RepoError::InvalidData(format!(
            "invalid version `{version}` in cars.version for {id}"
        )));
    }

    let car = Car {
        id,
        attributes,
        version,
    };
    car.validate()?;
    Ok(car)
}
