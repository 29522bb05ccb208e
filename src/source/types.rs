use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::model::qualified_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Op {
    Insert,
    Update,
    Delete,
}

/// A column value as it arrived on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Null,
    Binary(Bytes),
    Text(Bytes),
}

/// One column of a row image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    /// Type OID reported by the source, 0 when unknown.
    pub oid: u32,
    pub value: FieldValue,
}

impl Field {
    pub fn null(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            oid: 0,
            value: FieldValue::Null,
        }
    }

    pub fn text(name: impl Into<String>, text: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            oid: 0,
            value: FieldValue::Text(text.into()),
        }
    }

    pub fn binary(name: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            oid: 0,
            value: FieldValue::Binary(payload.into()),
        }
    }

    pub fn with_oid(mut self, oid: u32) -> Self {
        self.oid = oid;
        self
    }
}

/// A single row mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowChange {
    pub op: Op,
    pub schema: String,
    pub table: String,
    /// Row image after the change. Empty for deletes.
    pub new: Vec<Field>,
    /// Row image before the change. Empty for inserts, and for updates
    /// unless the table's replica identity exposes it.
    pub old: Vec<Field>,
}

impl RowChange {
    pub fn insert(schema: impl Into<String>, table: impl Into<String>, new: Vec<Field>) -> Self {
        Self {
            op: Op::Insert,
            schema: schema.into(),
            table: table.into(),
            new,
            old: Vec::new(),
        }
    }

    pub fn update(
        schema: impl Into<String>,
        table: impl Into<String>,
        new: Vec<Field>,
        old: Vec<Field>,
    ) -> Self {
        Self {
            op: Op::Update,
            schema: schema.into(),
            table: table.into(),
            new,
            old,
        }
    }

    pub fn delete(schema: impl Into<String>, table: impl Into<String>, old: Vec<Field>) -> Self {
        Self {
            op: Op::Delete,
            schema: schema.into(),
            table: table.into(),
            new: Vec::new(),
            old,
        }
    }

    pub fn qualified_name(&self) -> String {
        qualified_name(&self.schema, &self.table)
    }
}

/// Everything a capture source can emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Begin { xid: u32, final_lsn: u64 },
    Commit { commit_lsn: u64, end_lsn: u64 },
    Change(RowChange),
    /// Qualified names of the truncated tables.
    Truncate { tables: Vec<String> },
}

impl Message {
    /// The qualified table name this message is about, when it is about one.
    pub fn table_name(&self) -> Option<String> {
        match self {
            Message::Change(row) => Some(row.qualified_name()),
            Message::Begin { .. } | Message::Commit { .. } | Message::Truncate { .. } => None,
        }
    }
}

impl From<RowChange> for Message {
    fn from(row: RowChange) -> Self {
        Message::Change(row)
    }
}

/// A message together with the checkpoint that acknowledges it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceChange {
    pub checkpoint: Checkpoint,
    pub message: Message,
}
