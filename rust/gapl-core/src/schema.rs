//! Topic schemas: ordered, typed columns.
//!
//! The text form is a column count followed by `name/type` pairs, for example
//! `"2 host/varchar load/real"`.

use crate::values::{Value, ValueError, ValueKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ColumnType {
    Boolean,
    Integer,
    Real,
    Varchar,
    Timestamp,
}

impl ColumnType {
    pub fn kind(self) -> ValueKind {
        match self {
            ColumnType::Boolean => ValueKind::Bool,
            ColumnType::Integer => ValueKind::Int,
            ColumnType::Real => ValueKind::Float,
            ColumnType::Varchar => ValueKind::String,
            ColumnType::Timestamp => ValueKind::Timestamp,
        }
    }

    pub fn for_kind(kind: ValueKind) -> Option<Self> {
        match kind {
            ValueKind::Bool => Some(ColumnType::Boolean),
            ValueKind::Int => Some(ColumnType::Integer),
            ValueKind::Float => Some(ColumnType::Real),
            ValueKind::String => Some(ColumnType::Varchar),
            ValueKind::Timestamp => Some(ColumnType::Timestamp),
            _ => None,
        }
    }

    /// Parse one packed column.
    pub fn parse_value(self, text: &str) -> Result<Value, ValueError> {
        let err = || ValueError::Parse {
            what: match self {
                ColumnType::Boolean => "boolean",
                ColumnType::Integer => "integer",
                ColumnType::Real => "real",
                ColumnType::Varchar => "varchar",
                ColumnType::Timestamp => "timestamp",
            },
            text: text.to_string(),
        };
        match self {
            ColumnType::Boolean => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(Value::Bool(true)),
                "false" | "f" | "0" => Ok(Value::Bool(false)),
                _ => Err(err()),
            },
            ColumnType::Integer => text.trim().parse().map(Value::Int).map_err(|_| err()),
            ColumnType::Real => text.trim().parse().map(Value::Float).map_err(|_| err()),
            ColumnType::Varchar => Ok(Value::String(text.to_string())),
            ColumnType::Timestamp => text.parse().map(Value::Timestamp).map_err(|_| err()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Check that `values` has one value of the right kind per column.
    pub fn check(&self, values: &[Value]) -> Result<(), ValueError> {
        if values.len() != self.columns.len() {
            return Err(ValueError::Arity {
                expected: self.columns.len(),
                found: values.len(),
            });
        }
        for (column, value) in self.columns.iter().zip(values) {
            let expected = column.ty.kind();
            if value.kind() != expected {
                return Err(ValueError::KindMismatch {
                    expected,
                    found: value.kind(),
                });
            }
        }
        Ok(())
    }
}

impl FromStr for Schema {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ValueError::Parse {
            what: "schema",
            text: s.to_string(),
        };
        let mut words = s.split_whitespace();
        let count: usize = words.next().and_then(|w| w.parse().ok()).ok_or_else(bad)?;
        let mut columns = Vec::with_capacity(count);
        for word in words {
            let (name, ty) = word.split_once('/').ok_or_else(bad)?;
            if name.is_empty() {
                return Err(bad());
            }
            let ty = ty.parse::<ColumnType>().map_err(|_| bad())?;
            columns.push(Column {
                name: name.to_string(),
                ty,
            });
        }
        if columns.len() != count {
            return Err(ValueError::Arity {
                expected: count,
                found: columns.len(),
            });
        }
        Ok(Self { columns })
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.columns.len())?;
        for c in &self.columns {
            write!(f, " {}/{}", c.name, c.ty)?;
        }
        Ok(())
    }
}
