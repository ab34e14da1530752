//! Events delivered to subscribers, and packed tuples sent to registrants.

use crate::schema::{ColumnType, Schema};
use crate::values::{Value, ValueError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column separator of the packed text form.
pub const PACK_SEPARATOR: &str = "<|>";

/// Immutable tuple published on a topic. Subscribers share one copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    topic: String,
    values: Vec<Value>,
}

impl Event {
    pub fn new(topic: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            topic: topic.into(),
            values,
        }
    }

    /// Parse `<|>`-separated text against `schema`.
    pub fn from_packed(topic: impl Into<String>, schema: &Schema, text: &str) -> Result<Self, ValueError> {
        let fields: Vec<&str> = text.split(PACK_SEPARATOR).collect();
        if fields.len() != schema.len() {
            return Err(ValueError::Arity {
                expected: schema.len(),
                found: fields.len(),
            });
        }
        let values = schema
            .columns()
            .iter()
            .zip(fields)
            .map(|(c, f)| c.ty.parse_value(f))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(topic, values))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn column(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.topic)?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(PACK_SEPARATOR)?;
            }
            write!(f, "{}", v.render())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackedColumn {
    pub ty: ColumnType,
    pub text: String,
}

/// Typed text columns built by `send` and `publish`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PackedTuple {
    columns: Vec<PackedColumn>,
}

impl PackedTuple {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pack one basic value.
    ///
    /// Reals are written with eight fractional digits, so a real that goes
    /// through a published tuple comes back rounded to that precision.
    pub fn push(&mut self, value: &Value) -> Result<(), ValueError> {
        let ty = ColumnType::for_kind(value.kind()).ok_or(ValueError::NotBasic(value.kind()))?;
        let text = match value {
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format!("{:.8}", f),
            Value::String(s) => s.clone(),
            Value::Timestamp(t) => t.to_string(),
            other => return Err(ValueError::NotBasic(other.kind())),
        };
        self.columns.push(PackedColumn { ty, text });
        Ok(())
    }

    pub fn columns(&self) -> &[PackedColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Parse the columns back into values.
    pub fn to_values(&self) -> Result<Vec<Value>, ValueError> {
        self.columns.iter().map(|c| c.ty.parse_value(&c.text)).collect()
    }
}

impl fmt::Display for PackedTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .columns
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(PACK_SEPARATOR);
        f.write_str(&joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::Timestamp;
    use crate::values::ValueKind;

    #[test]
    fn packed_text_parses_by_schema() {
        let schema: Schema = "3 t/timestamp host/varchar load/real".parse().unwrap();
        let event = Event::from_packed("Load", &schema, "@0000000000000001<|>alpha<|>0.5").unwrap();
        assert_eq!(event.topic(), "Load");
        assert_eq!(event.column(0), Some(&Value::Timestamp(Timestamp::from_nanos(1))));
        assert_eq!(event.column(1), Some(&Value::String("alpha".into())));
        assert_eq!(event.column(2), Some(&Value::Float(0.5)));
    }

    #[test]
    fn packed_text_needs_every_column() {
        let schema: Schema = "2 a/integer b/integer".parse().unwrap();
        let err = Event::from_packed("T", &schema, "1").unwrap_err();
        assert_eq!(err, ValueError::Arity { expected: 2, found: 1 });
    }

    #[test]
    fn tuple_packs_basic_values() {
        let mut tuple = PackedTuple::new();
        tuple.push(&Value::Int(3)).unwrap();
        tuple.push(&Value::Bool(true)).unwrap();
        tuple.push(&Value::String("x".into())).unwrap();
        assert_eq!(tuple.to_string(), "3<|>true<|>x");
        assert_eq!(tuple.columns()[0].ty, ColumnType::Integer);
        assert_eq!(
            tuple.to_values().unwrap(),
            vec![Value::Int(3), Value::Bool(true), Value::String("x".into())]
        );
    }

    #[test]
    fn reals_pack_to_eight_places() {
        let mut tuple = PackedTuple::new();
        tuple.push(&Value::Float(1.0 / 3.0)).unwrap();
        tuple.push(&Value::Float(2.5)).unwrap();
        assert_eq!(tuple.to_string(), "0.33333333<|>2.50000000");
        assert_eq!(
            tuple.to_values().unwrap(),
            vec![Value::Float(0.33333333), Value::Float(2.5)]
        );
    }

    #[test]
    fn tuple_rejects_structured_values() {
        let mut tuple = PackedTuple::new();
        let err = tuple.push(&Value::new_map(ValueKind::Int)).unwrap_err();
        assert_eq!(err, ValueError::NotBasic(ValueKind::Map));
    }
}
