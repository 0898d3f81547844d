//! Row predicates and the `row_number` addressing model.
//!
//! A [`Condition`] is a backend-agnostic `field operator value` predicate.
//! The reserved `row_number` pseudo-field addresses rows by their live
//! 1-based position instead of a stored column; [`Address`] is the
//! resolved form a backend adapter turns into its native query.

use crate::error::SyncError;
use crate::model::Row;
use crate::value::Value;
use std::cmp::Ordering;
use std::fmt;

/// The reserved positional pseudo-field.
pub const ROW_NUMBER: &str = "row_number";

/// Comparison operators supported by both engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl Operator {
    pub fn as_str(&self) -> &str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Ge => ">=",
        }
    }

    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Ne => ordering != Ordering::Equal,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Le => ordering != Ordering::Greater,
            Operator::Ge => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A predicate over one field of a row.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    field: String,
    operator: Operator,
    value: String,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        Condition {
            field: field.into().to_lowercase(),
            operator,
            value: value.into(),
        }
    }

    /// Parse a CLI condition string such as `"id == 3"` or `"price>=9.99"`.
    ///
    /// Two-character operators are tried first so `<=` does not parse as
    /// `<` with a value of `=9.99`.
    pub fn parse(input: &str) -> Result<Condition, SyncError> {
        // Two-character spellings first; `<>` is the SQL form of not-equal.
        const OPERATORS: [(&str, Operator); 8] = [
            ("<=", Operator::Le),
            (">=", Operator::Ge),
            ("!=", Operator::Ne),
            ("<>", Operator::Ne),
            ("==", Operator::Eq),
            ("=", Operator::Eq),
            ("<", Operator::Lt),
            (">", Operator::Gt),
        ];

        for (symbol, operator) in OPERATORS {
            if let Some(at) = input.find(symbol) {
                let field = input[..at].trim();
                let value = input[at + symbol.len()..].trim();

                if field.is_empty() {
                    break;
                }

                return Ok(Condition::new(field, operator, value));
            }
        }

        Err(SyncError::ValueNotValid {
            value: input.to_string(),
            field: "condition".to_string(),
            type_tag: "field operator value".to_string(),
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether this condition addresses the positional pseudo-field.
    pub fn is_positional(&self) -> bool {
        self.field == ROW_NUMBER
    }

    /// Resolve this condition into the addressing model a backend can
    /// push down: a key lookup or an exact position. Conditions that are
    /// not simple equalities stay generic filters.
    pub fn address(&self, primary_key: Option<&str>) -> Result<Option<Address>, SyncError> {
        if self.operator != Operator::Eq {
            return Ok(None);
        }

        if self.is_positional() {
            return Ok(Some(Address::ByPosition(self.position()?)));
        }

        if primary_key.is_some_and(|key| key.eq_ignore_ascii_case(&self.field)) {
            return Ok(Some(Address::ByKey {
                field: self.field.clone(),
                value: self.value.clone(),
            }));
        }

        Ok(None)
    }

    /// The 1-based position a positional condition targets.
    pub fn position(&self) -> Result<usize, SyncError> {
        self.value
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| SyncError::ValueNotValid {
                value: self.value.clone(),
                field: ROW_NUMBER.to_string(),
                type_tag: "integer".to_string(),
            })
    }

    /// Evaluate the predicate against a row, optionally annotated with its
    /// current 0-based position (exposed to the condition as the 1-based
    /// `row_number`). Comparison happens in the normalized domain: the
    /// condition's raw value is coerced to the type of the field it
    /// references.
    pub fn matches(&self, row: &Row, position: Option<usize>) -> Result<bool, SyncError> {
        if self.is_positional() {
            let position =
                position.ok_or_else(|| SyncError::FieldNotFound(ROW_NUMBER.to_string()))?;
            let target = self.position()?;

            return Ok(self.operator.holds((position + 1).cmp(&target)));
        }

        let actual = row
            .get(&self.field)
            .ok_or_else(|| SyncError::FieldNotFound(self.field.clone()))?;

        let expected = Value::coerce(&self.value, actual.data_type(), &self.field)?;

        match actual.partial_cmp(&expected) {
            Some(ordering) => Ok(self.operator.holds(ordering)),
            // Incomparable values (e.g. a null field) only satisfy `!=`.
            None => Ok(self.operator == Operator::Ne && *actual != expected),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.operator, self.value)
    }
}

/// A condition resolved to a backend addressing scheme.
///
/// `ByKey` targets rows through a declared primary key; `ByPosition`
/// targets the Nth row of the backend's current ordering and is the only
/// scheme available when no key exists.
#[derive(Debug, Clone, PartialEq)]
pub enum Address {
    ByKey { field: String, value: String },
    ByPosition(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn row(id: i64, name: &str) -> Row {
        Row::from([
            ("id".to_string(), Value::Integer(id)),
            ("name".to_string(), Value::Text(name.to_string())),
        ])
    }

    #[test]
    fn parses_spaced_and_compact_forms() {
        assert_eq!(
            Condition::parse("id == 3").unwrap(),
            Condition::new("id", Operator::Eq, "3")
        );
        assert_eq!(
            Condition::parse("price>=9.99").unwrap(),
            Condition::new("price", Operator::Ge, "9.99")
        );
        assert_eq!(
            Condition::parse("Name != Ada").unwrap(),
            Condition::new("name", Operator::Ne, "Ada")
        );
        assert!(Condition::parse("nonsense").is_err());
    }

    #[test]
    fn compares_in_the_normalized_domain() {
        let row = row(7, "Ada");

        assert!(Condition::parse("id == 7").unwrap().matches(&row, None).unwrap());
        assert!(Condition::parse("id < 10").unwrap().matches(&row, None).unwrap());
        assert!(Condition::parse("name = Ada").unwrap().matches(&row, None).unwrap());
        assert!(!Condition::parse("name = ada").unwrap().matches(&row, None).unwrap());
    }

    #[test]
    fn missing_field_is_field_not_found() {
        let row = row(7, "Ada");
        let err = Condition::parse("age > 1").unwrap().matches(&row, None).unwrap_err();

        assert!(matches!(err, SyncError::FieldNotFound(field) if field == "age"));
    }

    #[test]
    fn row_number_is_one_based_and_live() {
        let row = row(7, "Ada");
        let condition = Condition::parse("row_number = 2").unwrap();

        assert!(!condition.matches(&row, Some(0)).unwrap());
        assert!(condition.matches(&row, Some(1)).unwrap());
    }

    #[test]
    fn address_resolution() {
        let positional = Condition::parse("row_number = 2").unwrap();
        assert_eq!(positional.address(None).unwrap(), Some(Address::ByPosition(2)));

        let keyed = Condition::parse("id = 3").unwrap();
        assert_eq!(
            keyed.address(Some("id")).unwrap(),
            Some(Address::ByKey {
                field: "id".to_string(),
                value: "3".to_string()
            })
        );
        assert_eq!(keyed.address(None).unwrap(), None);

        let range = Condition::parse("id > 3").unwrap();
        assert_eq!(range.address(Some("id")).unwrap(), None);
    }

    #[test]
    fn non_positive_position_is_rejected() {
        let condition = Condition::parse("row_number = 0").unwrap();
        assert!(condition.position().is_err());
    }
}
