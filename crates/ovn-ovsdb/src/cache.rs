//! Per-table row cache fed by `monitor` table updates

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// A row snapshot: column name to datum
pub type Row = Map<String, Value>;

/// `<row-update>`: `old` is absent for inserts, `new` is absent for deletes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Row>,
}

impl RowUpdate {
    /// A row that did not exist before this update
    pub fn is_insert(&self) -> bool {
        self.old.is_none() && self.new.is_some()
    }

    pub fn is_delete(&self) -> bool {
        self.new.is_none()
    }
}

/// `<table-updates>`: table name to row uuid to row update
pub type TableUpdates = HashMap<String, HashMap<String, RowUpdate>>;

/// Mapping `table -> (row uuid -> latest row)`
#[derive(Debug, Default, Clone)]
pub struct RowCache {
    tables: HashMap<String, HashMap<String, Row>>,
}

impl RowCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a batch of table updates: replace on a new row, remove otherwise
    pub fn apply(&mut self, updates: &TableUpdates) {
        for (table, rows) in updates {
            let cached = self.tables.entry(table.clone()).or_default();
            for (uuid, update) in rows {
                match &update.new {
                    Some(row) => {
                        cached.insert(uuid.clone(), row.clone());
                    }
                    None => {
                        cached.remove(uuid);
                    }
                }
            }
        }
    }

    pub fn get(&self, table: &str, uuid: &str) -> Option<&Row> {
        self.tables.get(table)?.get(uuid)
    }

    pub fn table(&self, table: &str) -> Option<&HashMap<String, Row>> {
        self.tables.get(table)
    }

    /// Number of cached rows in `table`
    pub fn len(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(HashMap::is_empty)
    }

    /// First cached row of `table` whose `name` column equals `name`
    pub fn find_by_name(&self, table: &str, name: &str) -> Option<(&str, &Row)> {
        self.tables
            .get(table)?
            .iter()
            .find(|(_, row)| row.get("name").and_then(Value::as_str) == Some(name))
            .map(|(uuid, row)| (uuid.as_str(), row))
    }
}
