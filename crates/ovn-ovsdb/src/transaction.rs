//! Transaction builder for the OVSDB `transact` method
//!
//! A [`Transaction`] is an ordered batch of operations against one
//! database. Rows inserted in the batch can be referenced by later
//! operations of the same batch through a [`NamedUuid`]; such names are
//! only meaningful to the server inside that single request, so a
//! `NamedUuid` remembers which transaction allocated it and cannot be
//! used with any other one.

use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::datum;
use crate::error::{OvsdbError, Result};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Placeholder identifier for a row inserted in the current transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedUuid {
    name: String,
    serial: u64,
}

impl NamedUuid {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// `[column, function, value]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition(pub String, pub String, pub Value);

impl Condition {
    pub fn equals(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self(column.into(), "==".to_string(), value.into())
    }

    /// Match a committed row by its real UUID
    pub fn uuid_is(uuid: &str) -> Self {
        Self("_uuid".to_string(), "==".to_string(), datum::uuid(uuid))
    }

    /// Match a row inserted earlier in the same transaction
    pub fn named(named: &NamedUuid) -> Self {
        Self(
            "_uuid".to_string(),
            "==".to_string(),
            datum::named_uuid(&named.name),
        )
    }
}

/// `[column, mutator, value]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mutation(pub String, pub String, pub Value);

impl Mutation {
    pub fn insert(column: impl Into<String>, value: Value) -> Self {
        Self(column.into(), "insert".to_string(), value)
    }

    pub fn delete(column: impl Into<String>, value: Value) -> Self {
        Self(column.into(), "delete".to_string(), value)
    }
}

/// A single database operation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    Select {
        table: String,
        #[serde(rename = "where")]
        conditions: Vec<Condition>,
        #[serde(skip_serializing_if = "Option::is_none")]
        columns: Option<Vec<String>>,
    },
    Insert {
        table: String,
        row: Map<String, Value>,
        #[serde(rename = "uuid-name", skip_serializing_if = "Option::is_none")]
        uuid_name: Option<String>,
    },
    Mutate {
        table: String,
        #[serde(rename = "where")]
        conditions: Vec<Condition>,
        mutations: Vec<Mutation>,
    },
    Delete {
        table: String,
        #[serde(rename = "where")]
        conditions: Vec<Condition>,
    },
}

impl Operation {
    pub fn table(&self) -> &str {
        match self {
            Operation::Select { table, .. }
            | Operation::Insert { table, .. }
            | Operation::Mutate { table, .. }
            | Operation::Delete { table, .. } => table,
        }
    }
}

/// Ordered batch of operations submitted in one `transact` request
#[derive(Debug)]
pub struct Transaction {
    database: String,
    serial: u64,
    operations: Vec<Operation>,
    named: usize,
}

impl Transaction {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            operations: Vec::new(),
            named: 0,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Allocate a placeholder valid only inside this transaction.
    ///
    /// The hint is reduced to `[A-Za-z0-9_]` and suffixed with a counter so
    /// every name is a valid OVSDB `<id>` and unique within the batch.
    pub fn named_uuid(&mut self, hint: &str) -> NamedUuid {
        let mut base: String = hint
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if base.is_empty() || base.starts_with(|c: char| c.is_ascii_digit()) {
            base.insert_str(0, "row");
        }
        let name = format!("{}{}", base, self.named);
        self.named += 1;
        NamedUuid {
            name,
            serial: self.serial,
        }
    }

    /// `["named-uuid", name]` for a placeholder allocated by this transaction
    pub fn reference(&self, named: &NamedUuid) -> Result<Value> {
        if named.serial != self.serial {
            return Err(OvsdbError::ForeignNamedUuid(named.name.clone()));
        }
        Ok(datum::named_uuid(&named.name))
    }

    pub fn select(
        &mut self,
        table: impl Into<String>,
        conditions: Vec<Condition>,
        columns: Option<&[&str]>,
    ) -> &mut Self {
        self.operations.push(Operation::Select {
            table: table.into(),
            conditions,
            columns: columns.map(|cols| cols.iter().map(|c| c.to_string()).collect()),
        });
        self
    }

    pub fn insert(
        &mut self,
        table: impl Into<String>,
        row: Map<String, Value>,
        named: Option<&NamedUuid>,
    ) -> Result<&mut Self> {
        let uuid_name = match named {
            Some(n) if n.serial != self.serial => {
                return Err(OvsdbError::ForeignNamedUuid(n.name.clone()))
            }
            Some(n) => Some(n.name.clone()),
            None => None,
        };
        self.operations.push(Operation::Insert {
            table: table.into(),
            row,
            uuid_name,
        });
        Ok(self)
    }

    pub fn mutate(
        &mut self,
        table: impl Into<String>,
        conditions: Vec<Condition>,
        mutations: Vec<Mutation>,
    ) -> &mut Self {
        self.operations.push(Operation::Mutate {
            table: table.into(),
            conditions,
            mutations,
        });
        self
    }

    pub fn delete(&mut self, table: impl Into<String>, conditions: Vec<Condition>) -> &mut Self {
        self.operations.push(Operation::Delete {
            table: table.into(),
            conditions,
        });
        self
    }

    /// `transact` params: the database name followed by every operation
    pub fn to_params(&self) -> Result<Value> {
        let mut params = Vec::with_capacity(self.operations.len() + 1);
        params.push(Value::String(self.database.clone()));
        for op in &self.operations {
            params.push(serde_json::to_value(op)?);
        }
        Ok(Value::Array(params))
    }
}
