//! In-process table store.

use crate::host::{HostError, TableStore};
use gapl_core::Value;
use parking_lot::RwLock;
use std::collections::BTreeMap;

type Rows = BTreeMap<String, Vec<Value>>;

#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: RwLock<BTreeMap<String, Rows>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the table already exists.
    pub fn create_table(&self, name: &str) -> bool {
        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return false;
        }
        tables.insert(name.to_string(), Rows::new());
        true
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }
}

impl TableStore for MemoryTableStore {
    fn has_entry(&self, table: &str, key: &str) -> Result<bool, HostError> {
        let tables = self.tables.read();
        let rows = tables
            .get(table)
            .ok_or_else(|| HostError::UnknownTable(table.to_string()))?;
        Ok(rows.contains_key(key))
    }

    fn lookup(&self, table: &str, key: &str) -> Result<Option<Vec<Value>>, HostError> {
        let tables = self.tables.read();
        let rows = tables
            .get(table)
            .ok_or_else(|| HostError::UnknownTable(table.to_string()))?;
        Ok(rows.get(key).map(|row| row.iter().map(Value::duplicate).collect()))
    }

    fn update(&self, table: &str, key: &str, row: Vec<Value>) -> Result<(), HostError> {
        let mut tables = self.tables.write();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| HostError::UnknownTable(table.to_string()))?;
        rows.insert(key.to_string(), row);
        Ok(())
    }

    fn keys(&self, table: &str) -> Result<Vec<String>, HostError> {
        let tables = self.tables.read();
        let rows = tables
            .get(table)
            .ok_or_else(|| HostError::UnknownTable(table.to_string()))?;
        Ok(rows.keys().cloned().collect())
    }
}
