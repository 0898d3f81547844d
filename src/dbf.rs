//! dBase (DBF) driver.
//!
//! DBF files have no query language, no table concept and no keys, so
//! every operation is a full-file read and every mutation rewrites the
//! file through a writer rebuilt from the reader's field layout. Rows are
//! addressed exclusively by their physical append order (`row_number`).

use crate::backend::Backend;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Timelike};
use dbase::{FieldName, FieldType, FieldValue, Reader, Record, TableWriterBuilder};
use dbfxsql_core::{Address, Condition, EngineKind, Row, SyncError, Value};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::PathBuf;

pub struct DbfTable {
    path: PathBuf,
    source: String,
}

/// One column of the file's descriptor, kept alongside the records so
/// rows can be converted in declared order. Legacy files usually carry
/// uppercase field names; records are accessed by the actual name while
/// canonical rows use the lowercased one.
#[derive(Debug, Clone)]
struct FieldLayout {
    name: String,
    lower: String,
    field_type: FieldType,
}

impl DbfTable {
    pub fn new(path: PathBuf, source: impl Into<String>) -> Self {
        DbfTable {
            path,
            source: source.into(),
        }
    }

    fn wrap<T>(&self, result: Result<T, dbase::Error>) -> Result<T, SyncError> {
        result.map_err(|cause| SyncError::connection("dBase", &self.source, cause))
    }

    fn require_exists(&self) -> Result<(), SyncError> {
        if self.path.exists() {
            Ok(())
        } else {
            Err(SyncError::SourceNotFound(self.source.clone()))
        }
    }

    /// Read the whole file: its field layout, the raw records, and the
    /// records converted into the canonical domain.
    fn read_file(&self) -> Result<(Vec<FieldLayout>, Vec<Record>, Vec<Row>), SyncError> {
        self.require_exists()?;

        let mut reader = self.wrap(Reader::from_path(&self.path))?;

        let layout: Vec<FieldLayout> = reader
            .fields()
            .iter()
            .filter(|info| info.name() != "DeletionFlag")
            .map(|info| FieldLayout {
                name: info.name().to_string(),
                lower: info.name().to_lowercase(),
                field_type: info.field_type(),
            })
            .collect();

        let records = self.wrap(reader.read())?;

        let mut rows = Vec::with_capacity(records.len());
        for record in &records {
            let mut row = Row::new();
            for field in &layout {
                let value = match record.get(&field.name) {
                    Some(value) => from_dbase(value),
                    None => Value::Null,
                };
                row.insert(field.lower.clone(), value);
            }
            rows.push(row);
        }

        Ok((layout, records, rows))
    }

    /// Rewrite the whole file with the given records, reusing the
    /// existing field layout.
    fn rewrite(&self, records: &[Record]) -> Result<(), SyncError> {
        let reader = self.wrap(Reader::from_path(&self.path))?;

        let builder = TableWriterBuilder::from_reader(reader);
        let writer = self.wrap(builder.build_with_file_dest(&self.path))?;

        self.wrap(writer.write_records(records))?;
        Ok(())
    }

    /// Overlay normalized values onto a raw record, converting each to
    /// the field's declared type.
    fn overlay(
        &self,
        record: &mut Record,
        layout: &[FieldLayout],
        fields: &Row,
    ) -> Result<(), SyncError> {
        for (name, value) in fields {
            let field = layout
                .iter()
                .find(|field| field.lower == name.to_lowercase())
                .ok_or_else(|| SyncError::FieldNotFound(name.clone()))?;

            record.insert(field.name.clone(), to_dbase(value, field, name)?);
        }

        Ok(())
    }

    /// Indexes (0-based) of the rows a condition selects.
    fn matching_indexes(
        rows: &[Row],
        condition: Option<&Condition>,
    ) -> Result<Vec<usize>, SyncError> {
        let Some(condition) = condition else {
            return Ok((0..rows.len()).collect());
        };

        // Exact positions resolve without scanning; there is no key to
        // address by in a DBF file.
        if let Some(Address::ByPosition(position)) = condition.address(None)? {
            return Ok(if position <= rows.len() {
                vec![position - 1]
            } else {
                Vec::new()
            });
        }

        let mut indexes = Vec::new();
        for (at, row) in rows.iter().enumerate() {
            if condition.matches(row, Some(at))? {
                indexes.push(at);
            }
        }

        Ok(indexes)
    }
}

#[async_trait]
impl Backend for DbfTable {
    fn kind(&self) -> EngineKind {
        EngineKind::Dbf
    }

    async fn exists(&self) -> Result<bool, SyncError> {
        Ok(self.path.exists())
    }

    async fn create_table(&self, fields: &[(String, String)]) -> Result<(), SyncError> {
        if self.path.exists() {
            return Err(SyncError::SourceAlreadyExists(self.source.clone()));
        }

        let mut builder = TableWriterBuilder::new();
        for (name, declaration) in fields {
            builder = add_field(builder, name, declaration)?;
        }

        let writer = self.wrap(builder.build_with_file_dest(&self.path))?;
        let empty: Vec<Record> = Vec::new();
        self.wrap(writer.write_records(&empty))?;

        Ok(())
    }

    async fn drop_table(&self) -> Result<(), SyncError> {
        self.require_exists()?;

        std::fs::remove_file(&self.path)
            .map_err(|cause| SyncError::connection("dBase", &self.source, cause))
    }

    async fn read_where(&self, condition: Option<&Condition>) -> Result<Vec<Row>, SyncError> {
        // No push-down: positional and value predicates are both
        // evaluated here, after a full table read.
        let (_, _, rows) = self.read_file()?;
        let indexes = Self::matching_indexes(&rows, condition)?;

        Ok(indexes.into_iter().map(|at| rows[at].clone()).collect())
    }

    async fn field_names(&self) -> Result<Vec<String>, SyncError> {
        let (layout, _, _) = self.read_file()?;
        Ok(layout.into_iter().map(|field| field.lower).collect())
    }

    async fn read_types(&self) -> Result<HashMap<String, String>, SyncError> {
        let (layout, _, _) = self.read_file()?;

        Ok(layout
            .into_iter()
            .map(|field| (field.lower, type_tag(field.field_type).to_string()))
            .collect())
    }

    async fn fetch_primary_key(&self) -> Result<Option<String>, SyncError> {
        // DBF files declare no keys; rows are addressed by position.
        Ok(None)
    }

    async fn insert(&self, row: Row) -> Result<(), SyncError> {
        self.bulk_insert(vec![row]).await
    }

    async fn bulk_insert(&self, rows: Vec<Row>) -> Result<(), SyncError> {
        let (layout, mut records, _) = self.read_file()?;

        for row in rows {
            let mut record = blank_record(&layout);
            self.overlay(&mut record, &layout, &row)?;
            records.push(record);
        }

        self.rewrite(&records)
    }

    async fn update(&self, fields: Row, condition: &Condition) -> Result<(), SyncError> {
        let (layout, mut records, rows) = self.read_file()?;
        let indexes = Self::matching_indexes(&rows, Some(condition))?;

        if indexes.is_empty() {
            return Err(SyncError::RowNotFound(condition.to_string()));
        }

        for at in indexes {
            self.overlay(&mut records[at], &layout, &fields)?;
        }

        self.rewrite(&records)
    }

    async fn bulk_update(&self, changes: Vec<(Row, Condition)>) -> Result<(), SyncError> {
        let (layout, mut records, rows) = self.read_file()?;

        for (fields, condition) in &changes {
            let indexes = Self::matching_indexes(&rows, Some(condition))?;
            for at in indexes {
                self.overlay(&mut records[at], &layout, fields)?;
            }
        }

        self.rewrite(&records)
    }

    async fn delete(&self, condition: &Condition) -> Result<(), SyncError> {
        let (_, mut records, rows) = self.read_file()?;
        let indexes = Self::matching_indexes(&rows, Some(condition))?;

        if indexes.is_empty() {
            return Err(SyncError::RowNotFound(condition.to_string()));
        }

        for at in indexes.into_iter().rev() {
            records.remove(at);
        }

        self.rewrite(&records)
    }

    async fn bulk_delete(&self, conditions: Vec<Condition>) -> Result<(), SyncError> {
        let (_, mut records, rows) = self.read_file()?;

        let mut doomed = Vec::new();
        for condition in &conditions {
            doomed.extend(Self::matching_indexes(&rows, Some(condition))?);
        }

        doomed.sort_unstable();
        doomed.dedup();

        for at in doomed.into_iter().rev() {
            records.remove(at);
        }

        self.rewrite(&records)
    }
}

/// Convert a driver value into the canonical domain. Character fields
/// are fixed-width, so trailing padding is stripped here.
fn from_dbase(value: &FieldValue) -> Value {
    match value {
        FieldValue::Character(Some(text)) => Value::Text(text.trim_end().to_string()),
        FieldValue::Character(None) => Value::Null,
        FieldValue::Memo(text) => Value::Text(text.trim_end().to_string()),
        FieldValue::Numeric(Some(number)) => decimal_value(*number),
        FieldValue::Numeric(None) => Value::Null,
        FieldValue::Float(Some(number)) => decimal_value(*number as f64),
        FieldValue::Float(None) => Value::Null,
        FieldValue::Currency(number) | FieldValue::Double(number) => decimal_value(*number),
        FieldValue::Integer(number) => Value::Integer(*number as i64),
        FieldValue::Logical(Some(flag)) => Value::Boolean(*flag),
        FieldValue::Logical(None) => Value::Null,
        FieldValue::Date(Some(date)) => {
            match NaiveDate::from_ymd_opt(date.year() as i32, date.month(), date.day()) {
                Some(date) => Value::Date(date),
                None => Value::Null,
            }
        }
        FieldValue::Date(None) => Value::Null,
        FieldValue::DateTime(stamp) => {
            let date = stamp.date();
            let time = stamp.time();
            let converted = NaiveDate::from_ymd_opt(date.year() as i32, date.month(), date.day())
                .and_then(|d| d.and_hms_opt(time.hours(), time.minutes(), time.seconds()));
            match converted {
                Some(stamp) => Value::Timestamp(stamp),
                None => Value::Null,
            }
        }
    }
}

/// Convert a canonical value into the driver representation a field's
/// declared type expects.
fn to_dbase(value: &Value, field: &FieldLayout, name: &str) -> Result<FieldValue, SyncError> {
    let not_valid = || SyncError::ValueNotValid {
        value: value.to_literal(),
        field: name.to_string(),
        type_tag: type_tag(field.field_type).to_string(),
    };

    if matches!(value, Value::Null) {
        return Ok(blank_field(field.field_type));
    }

    Ok(match field.field_type {
        FieldType::Character => FieldValue::Character(Some(value.to_literal())),
        FieldType::Memo => FieldValue::Memo(value.to_literal()),
        FieldType::Numeric => FieldValue::Numeric(Some(numeric_of(value).ok_or_else(not_valid)?)),
        FieldType::Float => {
            FieldValue::Float(Some(numeric_of(value).ok_or_else(not_valid)? as f32))
        }
        FieldType::Double => FieldValue::Double(numeric_of(value).ok_or_else(not_valid)?),
        FieldType::Currency => FieldValue::Currency(numeric_of(value).ok_or_else(not_valid)?),
        FieldType::Integer => match value {
            Value::Integer(number) => FieldValue::Integer(*number as i32),
            Value::Decimal(number) => {
                FieldValue::Integer(number.to_i32().ok_or_else(not_valid)?)
            }
            _ => return Err(not_valid()),
        },
        FieldType::Logical => match value {
            Value::Boolean(flag) => FieldValue::Logical(Some(*flag)),
            _ => return Err(not_valid()),
        },
        FieldType::Date => match value {
            Value::Date(date) => FieldValue::Date(Some(dbase::Date::new(
                date.day(),
                date.month(),
                date.year() as u32,
            ))),
            _ => return Err(not_valid()),
        },
        FieldType::DateTime => match value {
            Value::Timestamp(stamp) => FieldValue::DateTime(dbase::DateTime::new(
                dbase::Date::new(stamp.day(), stamp.month(), stamp.year() as u32),
                dbase::Time::new(stamp.hour(), stamp.minute(), stamp.second()),
            )),
            _ => return Err(not_valid()),
        },
    })
}

fn numeric_of(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(number) => Some(*number as f64),
        Value::Decimal(number) => number.to_f64(),
        _ => None,
    }
}

fn decimal_value(number: f64) -> Value {
    match Decimal::from_f64_retain(number) {
        Some(decimal) => Value::Decimal(decimal.normalize()),
        None => Value::Null,
    }
}

/// The empty driver value for a field type, used for columns an insert
/// does not mention.
fn blank_field(field_type: FieldType) -> FieldValue {
    match field_type {
        FieldType::Character => FieldValue::Character(None),
        FieldType::Memo => FieldValue::Memo(String::new()),
        FieldType::Numeric => FieldValue::Numeric(None),
        FieldType::Float => FieldValue::Float(None),
        FieldType::Double => FieldValue::Double(0.0),
        FieldType::Currency => FieldValue::Currency(0.0),
        FieldType::Integer => FieldValue::Integer(0),
        FieldType::Logical => FieldValue::Logical(None),
        FieldType::Date => FieldValue::Date(None),
        FieldType::DateTime => FieldValue::DateTime(dbase::DateTime::new(
            dbase::Date::new(1, 1, 1970),
            dbase::Time::new(0, 0, 0),
        )),
    }
}

fn blank_record(layout: &[FieldLayout]) -> Record {
    let mut record = Record::default();
    for field in layout {
        record.insert(field.name.clone(), blank_field(field.field_type));
    }
    record
}

/// Single-character xBase descriptor tag for a field type.
fn type_tag(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Character => "C",
        FieldType::Currency => "Y",
        FieldType::Date => "D",
        FieldType::DateTime => "T",
        FieldType::Double => "B",
        FieldType::Float => "F",
        FieldType::Integer => "I",
        FieldType::Logical => "L",
        FieldType::Memo => "M",
        FieldType::Numeric => "N",
    }
}

/// Add one column to a writer builder from a CLI declaration such as
/// `C(20)`, `N(10,2)`, `D` or `L`.
fn add_field(
    builder: TableWriterBuilder,
    name: &str,
    declaration: &str,
) -> Result<TableWriterBuilder, SyncError> {
    let not_valid = || SyncError::ValueNotValid {
        value: declaration.to_string(),
        field: name.to_string(),
        type_tag: "dBase field declaration".to_string(),
    };

    let field_name = FieldName::try_from(name).map_err(|_| not_valid())?;

    let declaration = declaration.trim().to_ascii_uppercase();
    let (tag, sizes) = match declaration.split_once('(') {
        Some((tag, rest)) => {
            let rest = rest.strip_suffix(')').ok_or_else(not_valid)?;
            let mut parts = rest.splitn(2, ',');
            let length: u8 = parts
                .next()
                .and_then(|n| n.trim().parse().ok())
                .ok_or_else(not_valid)?;
            let decimals: u8 = match parts.next() {
                Some(n) => n.trim().parse().map_err(|_| not_valid())?,
                None => 0,
            };
            (tag.trim(), Some((length, decimals)))
        }
        None => (declaration.as_str(), None),
    };

    Ok(match tag {
        "C" => builder.add_character_field(field_name, sizes.map(|(n, _)| n).unwrap_or(254)),
        "N" => {
            let (length, decimals) = sizes.unwrap_or((20, 0));
            builder.add_numeric_field(field_name, length, decimals)
        }
        "F" => {
            let (length, decimals) = sizes.unwrap_or((20, 0));
            builder.add_float_field(field_name, length, decimals)
        }
        "I" => builder.add_integer_field(field_name),
        "L" => builder.add_logical_field(field_name),
        "D" => builder.add_date_field(field_name),
        "T" | "@" => builder.add_datetime_field(field_name),
        _ => return Err(not_valid()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn character_values_strip_trailing_padding() {
        let value = from_dbase(&FieldValue::Character(Some("Ada   ".to_string())));
        assert_eq!(value, Value::Text("Ada".to_string()));
    }

    #[test]
    fn numeric_values_normalize_to_decimal() {
        let value = from_dbase(&FieldValue::Numeric(Some(1.50)));
        assert_eq!(value, Value::Decimal(Decimal::new(15, 1)));
    }

    #[test]
    fn whole_numerics_compare_equal_to_integers() {
        let value = from_dbase(&FieldValue::Numeric(Some(7.0)));
        assert_eq!(value, Value::Integer(7));
    }

    #[test]
    fn integer_writes_into_numeric_fields() {
        let field = FieldLayout {
            name: "ID".to_string(),
            lower: "id".to_string(),
            field_type: FieldType::Numeric,
        };

        let converted = to_dbase(&Value::Integer(7), &field, "id").unwrap();
        assert_eq!(converted, FieldValue::Numeric(Some(7.0)));
    }

    #[test]
    fn text_into_numeric_field_is_value_not_valid() {
        let field = FieldLayout {
            name: "AMOUNT".to_string(),
            lower: "amount".to_string(),
            field_type: FieldType::Numeric,
        };

        let err = to_dbase(&Value::Text("abc".into()), &field, "amount").unwrap_err();
        assert!(matches!(err, SyncError::ValueNotValid { .. }));
    }
}
