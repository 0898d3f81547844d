//! SQLite driver.
//!
//! Rows are addressed either through the table's declared primary key or
//! through the positional `row_number` pseudo-field, which resolves to a
//! windowed row-numbering subquery ordered by `rowid` — the stable
//! physical identifier SQLite keeps even without a declared key. Each
//! mutating call runs in its own transaction; bulk forms batch the whole
//! set of statements into one.

use crate::backend::Backend;
use async_trait::async_trait;
use dbfxsql_core::{canonical_type, Condition, DataType, EngineKind, Row, SyncError, Value};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::PathBuf;

pub struct SqliteTable {
    path: PathBuf,
    source: String,
    table: String,
}

/// One column of `PRAGMA table_info`.
struct ColumnInfo {
    name: String,
    declared: String,
    primary_key: bool,
}

impl SqliteTable {
    pub fn new(path: PathBuf, source: impl Into<String>, table: impl Into<String>) -> Self {
        SqliteTable {
            path,
            source: source.into(),
            table: table.into(),
        }
    }

    fn wrap<T>(&self, result: Result<T, rusqlite::Error>) -> Result<T, SyncError> {
        result.map_err(|cause| SyncError::connection("SQLite", &self.source, cause))
    }

    fn connect(&self) -> Result<Connection, SyncError> {
        if !self.path.exists() {
            return Err(SyncError::SourceNotFound(self.source.clone()));
        }

        self.wrap(Connection::open(&self.path))
    }

    fn table_exists(&self, conn: &Connection) -> Result<bool, SyncError> {
        let count: i64 = self.wrap(conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [&self.table],
            |row| row.get(0),
        ))?;

        Ok(count > 0)
    }

    fn require_table(&self, conn: &Connection) -> Result<(), SyncError> {
        if self.table_exists(conn)? {
            Ok(())
        } else {
            Err(SyncError::TableNotFound(self.table.clone()))
        }
    }

    fn columns(&self, conn: &Connection) -> Result<Vec<ColumnInfo>, SyncError> {
        let mut statement =
            self.wrap(conn.prepare(&format!("PRAGMA table_info(\"{}\")", self.table)))?;

        let columns = self.wrap(
            statement
                .query_map([], |row| {
                    Ok(ColumnInfo {
                        name: row.get::<_, String>(1)?.to_lowercase(),
                        declared: row.get(2)?,
                        primary_key: row.get::<_, i64>(5)? > 0,
                    })
                })
                .and_then(|rows| rows.collect::<Result<Vec<_>, _>>()),
        )?;

        Ok(columns)
    }

    /// Resolve a condition into `(optional CTE, WHERE expression, parameter)`.
    ///
    /// Anything addressing the positional pseudo-field becomes the
    /// row-numbering subquery over `rowid` — this is what lets mutations
    /// target "the Nth row" on a table with no declared key. Key lookups
    /// and generic field predicates compare one typed parameter.
    fn filter_parts(
        &self,
        condition: &Condition,
        columns: &[ColumnInfo],
    ) -> Result<(String, String, Vec<rusqlite::types::Value>), SyncError> {
        if condition.is_positional() {
            let cte = format!(
                "WITH numbered_rows AS (SELECT rowid, ROW_NUMBER() OVER (ORDER BY rowid) AS row_number FROM \"{}\") ",
                self.table
            );
            let clause = format!(
                "rowid IN (SELECT rowid FROM numbered_rows WHERE row_number {} ?1)",
                condition.operator().as_str()
            );
            let position = condition.position()? as i64;

            return Ok((cte, clause, vec![rusqlite::types::Value::Integer(position)]));
        }

        let column = columns
            .iter()
            .find(|column| column.name == condition.field())
            .ok_or_else(|| SyncError::FieldNotFound(condition.field().to_string()))?;

        let target = canonical_type(EngineKind::Sqlite, &column.declared).unwrap_or(DataType::Text);
        let value = Value::coerce(condition.value(), target, condition.field())?;
        let clause = format!("\"{}\" {} ?1", column.name, condition.operator().as_str());

        Ok((String::new(), clause, vec![to_sql(&value)]))
    }

    fn read_rows(
        &self,
        conn: &Connection,
        condition: Option<&Condition>,
    ) -> Result<Vec<Row>, SyncError> {
        self.require_table(conn)?;
        let columns = self.columns(conn)?;

        let (sql, params) = match condition {
            None => (format!("SELECT * FROM \"{}\"", self.table), Vec::new()),
            Some(condition) => {
                let (cte, clause, params) = self.filter_parts(condition, &columns)?;
                (
                    format!("{cte}SELECT * FROM \"{}\" WHERE {clause}", self.table),
                    params,
                )
            }
        };

        let mut statement = self.wrap(conn.prepare(&sql))?;
        let mut rows = Vec::new();

        let mut results = self.wrap(statement.query(rusqlite::params_from_iter(params)))?;
        while let Some(result) = self.wrap(results.next())? {
            let mut row = Row::new();
            for (at, column) in columns.iter().enumerate() {
                let raw = self.wrap(result.get_ref(at))?;
                row.insert(
                    column.name.clone(),
                    value_from_sql(raw, &column.declared, &column.name)?,
                );
            }
            rows.push(row);
        }

        Ok(rows)
    }

    fn primary_key_of(columns: &[ColumnInfo]) -> Option<String> {
        columns
            .iter()
            .find(|column| column.primary_key)
            .map(|column| column.name.clone())
    }

    /// Reject a write that would collide with another row's primary key.
    fn check_key_collision(&self, conn: &Connection, row: &Row) -> Result<(), SyncError> {
        let columns = self.columns(conn)?;
        let Some(key) = Self::primary_key_of(&columns) else {
            return Ok(());
        };
        let Some(value) = row.get(&key) else {
            return Ok(());
        };

        let sql = format!(
            "SELECT COUNT(*) FROM \"{}\" WHERE \"{key}\" = ?1",
            self.table
        );
        let count: i64 =
            self.wrap(conn.query_row(&sql, [to_sql(value)], |result| result.get(0)))?;

        if count > 0 {
            return Err(SyncError::RowAlreadyExists(value.to_literal()));
        }

        Ok(())
    }

    fn insert_statement(&self, row: &Row) -> (String, Vec<rusqlite::types::Value>) {
        let mut names = Vec::with_capacity(row.len());
        let mut params = Vec::with_capacity(row.len());

        for (name, value) in row {
            names.push(format!("\"{name}\""));
            params.push(to_sql(value));
        }

        let placeholders: Vec<String> = (1..=params.len()).map(|n| format!("?{n}")).collect();
        let sql = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            self.table,
            names.join(", "),
            placeholders.join(", ")
        );

        (sql, params)
    }

    fn update_statement(
        &self,
        fields: &Row,
        condition: &Condition,
        columns: &[ColumnInfo],
    ) -> Result<(String, Vec<rusqlite::types::Value>), SyncError> {
        let (cte, clause, filter_params) = self.filter_parts(condition, columns)?;

        // Filter parameters come first (`?1`), assignments follow.
        let mut params = filter_params;
        let mut assignments = Vec::with_capacity(fields.len());

        for (name, value) in fields {
            params.push(to_sql(value));
            assignments.push(format!("\"{name}\" = ?{}", params.len()));
        }

        let sql = format!(
            "{cte}UPDATE \"{}\" SET {} WHERE {clause}",
            self.table,
            assignments.join(", ")
        );

        Ok((sql, params))
    }
}

#[async_trait]
impl Backend for SqliteTable {
    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    async fn exists(&self) -> Result<bool, SyncError> {
        if !self.path.exists() {
            return Ok(false);
        }
        if self.table.is_empty() {
            return Ok(true);
        }

        let conn = self.connect()?;
        self.table_exists(&conn)
    }

    async fn create_table(&self, fields: &[(String, String)]) -> Result<(), SyncError> {
        // Opening the connection creates the database file on demand.
        let conn = self.wrap(Connection::open(&self.path))?;

        if self.table_exists(&conn)? {
            return Err(SyncError::TableAlreadyExists(self.table.clone()));
        }

        let declarations: Vec<String> = fields
            .iter()
            .map(|(name, declaration)| format!("\"{name}\" {declaration}"))
            .collect();

        let sql = format!(
            "CREATE TABLE \"{}\" ({})",
            self.table,
            declarations.join(", ")
        );
        self.wrap(conn.execute(&sql, []))?;

        Ok(())
    }

    async fn drop_table(&self) -> Result<(), SyncError> {
        if self.table.is_empty() {
            // Dropping the whole database: remove the file.
            if !self.path.exists() {
                return Err(SyncError::SourceNotFound(self.source.clone()));
            }
            return std::fs::remove_file(&self.path)
                .map_err(|cause| SyncError::connection("SQLite", &self.source, cause));
        }

        let conn = self.connect()?;
        self.require_table(&conn)?;
        self.wrap(conn.execute(&format!("DROP TABLE \"{}\"", self.table), []))?;

        Ok(())
    }

    async fn read_where(&self, condition: Option<&Condition>) -> Result<Vec<Row>, SyncError> {
        let conn = self.connect()?;
        self.read_rows(&conn, condition)
    }

    async fn field_names(&self) -> Result<Vec<String>, SyncError> {
        let conn = self.connect()?;
        self.require_table(&conn)?;

        Ok(self
            .columns(&conn)?
            .into_iter()
            .map(|column| column.name)
            .collect())
    }

    async fn read_types(&self) -> Result<HashMap<String, String>, SyncError> {
        let conn = self.connect()?;
        self.require_table(&conn)?;

        Ok(self
            .columns(&conn)?
            .into_iter()
            .map(|column| (column.name, column.declared))
            .collect())
    }

    async fn fetch_primary_key(&self) -> Result<Option<String>, SyncError> {
        let conn = self.connect()?;
        self.require_table(&conn)?;

        Ok(Self::primary_key_of(&self.columns(&conn)?))
    }

    async fn insert(&self, row: Row) -> Result<(), SyncError> {
        let conn = self.connect()?;
        self.require_table(&conn)?;
        self.check_key_collision(&conn, &row)?;

        let (sql, params) = self.insert_statement(&row);
        self.wrap(conn.execute(&sql, rusqlite::params_from_iter(params)))?;

        Ok(())
    }

    async fn bulk_insert(&self, rows: Vec<Row>) -> Result<(), SyncError> {
        let mut conn = self.connect()?;
        self.require_table(&conn)?;

        let tx = self.wrap(conn.transaction())?;
        for row in &rows {
            let (sql, params) = self.insert_statement(row);
            self.wrap(tx.execute(&sql, rusqlite::params_from_iter(params)))?;
        }
        self.wrap(tx.commit())?;

        Ok(())
    }

    async fn update(&self, fields: Row, condition: &Condition) -> Result<(), SyncError> {
        let conn = self.connect()?;
        self.require_table(&conn)?;
        self.check_key_collision(&conn, &fields)?;

        let columns = self.columns(&conn)?;
        let (sql, params) = self.update_statement(&fields, condition, &columns)?;
        let affected = self.wrap(conn.execute(&sql, rusqlite::params_from_iter(params)))?;

        if affected == 0 {
            return Err(SyncError::RowNotFound(condition.to_string()));
        }

        Ok(())
    }

    async fn bulk_update(&self, changes: Vec<(Row, Condition)>) -> Result<(), SyncError> {
        let mut conn = self.connect()?;
        self.require_table(&conn)?;
        let columns = self.columns(&conn)?;

        let tx = self.wrap(conn.transaction())?;
        for (fields, condition) in &changes {
            let (sql, params) = self.update_statement(fields, condition, &columns)?;
            self.wrap(tx.execute(&sql, rusqlite::params_from_iter(params)))?;
        }
        self.wrap(tx.commit())?;

        Ok(())
    }

    async fn delete(&self, condition: &Condition) -> Result<(), SyncError> {
        let conn = self.connect()?;
        self.require_table(&conn)?;
        let columns = self.columns(&conn)?;

        let (cte, clause, params) = self.filter_parts(condition, &columns)?;
        let sql = format!("{cte}DELETE FROM \"{}\" WHERE {clause}", self.table);
        let affected = self.wrap(conn.execute(&sql, rusqlite::params_from_iter(params)))?;

        if affected == 0 {
            return Err(SyncError::RowNotFound(condition.to_string()));
        }

        Ok(())
    }

    async fn bulk_delete(&self, conditions: Vec<Condition>) -> Result<(), SyncError> {
        let mut conn = self.connect()?;
        self.require_table(&conn)?;
        let columns = self.columns(&conn)?;

        let tx = self.wrap(conn.transaction())?;
        for condition in &conditions {
            let (cte, clause, params) = self.filter_parts(condition, &columns)?;
            let sql = format!("{cte}DELETE FROM \"{}\" WHERE {clause}", self.table);
            self.wrap(tx.execute(&sql, rusqlite::params_from_iter(params)))?;
        }
        self.wrap(tx.commit())?;

        Ok(())
    }
}

/// Convert a stored SQLite value into the canonical domain, guided by
/// the column's declared type: SQLite happily stores a date as TEXT, and
/// only the declaration says it means a date.
fn value_from_sql(raw: ValueRef<'_>, declared: &str, field: &str) -> Result<Value, SyncError> {
    let target = canonical_type(EngineKind::Sqlite, declared);

    Ok(match raw {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(number) => match target {
            Some(DataType::Decimal) => Value::Decimal(Decimal::from(number)),
            Some(DataType::Boolean) => Value::Boolean(number != 0),
            _ => Value::Integer(number),
        },
        ValueRef::Real(number) => match Decimal::from_f64_retain(number) {
            Some(decimal) => Value::Decimal(decimal.normalize()),
            None => Value::Null,
        },
        ValueRef::Text(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            match target {
                Some(target) => Value::coerce(&text, target, field)?,
                None => Value::Text(text.into_owned()),
            }
        }
        ValueRef::Blob(bytes) => Value::Binary(bytes.to_vec()),
    })
}

/// Convert a canonical value into the driver representation.
fn to_sql(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;

    match value {
        Value::Text(text) => Sql::Text(text.clone()),
        Value::Integer(number) => Sql::Integer(*number),
        Value::Decimal(number) => match number.to_f64() {
            Some(real) => Sql::Real(real),
            None => Sql::Text(number.to_string()),
        },
        Value::Boolean(flag) => Sql::Integer(i64::from(*flag)),
        Value::Date(date) => Sql::Text(date.format("%Y-%m-%d").to_string()),
        Value::Timestamp(stamp) => Sql::Text(stamp.format("%Y-%m-%d %H:%M:%S").to_string()),
        Value::Binary(bytes) => Sql::Blob(bytes.clone()),
        Value::Null => Sql::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_date_columns_come_back_as_dates() {
        let value = value_from_sql(ValueRef::Text(b"2024-03-09"), "DATE", "born").unwrap();
        assert_eq!(
            value,
            Value::Date(chrono::NaiveDate::from_ymd_opt(2024, 3, 9).unwrap())
        );
    }

    #[test]
    fn numeric_affinity_promotes_integers_to_decimal() {
        let value = value_from_sql(ValueRef::Integer(3), "NUMERIC(10,2)", "price").unwrap();
        assert_eq!(value, Value::Decimal(Decimal::from(3)));
        // Still equal to the plain integer reading under numeric-aware equality.
        assert_eq!(value, Value::Integer(3));
    }

    #[test]
    fn booleans_round_trip_through_integer_storage() {
        let stored = to_sql(&Value::Boolean(true));
        assert_eq!(stored, rusqlite::types::Value::Integer(1));

        let read = value_from_sql(ValueRef::Integer(1), "BOOLEAN", "active").unwrap();
        assert_eq!(read, Value::Boolean(true));
    }
}
