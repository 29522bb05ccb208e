//! Typed models: the application-side shape of a captured table.
//!
//! A model declares its table and an explicit column table mapping wire
//! column names to field accessors. No reflection is involved; the column
//! table is turned into an immutable [`ModelDescriptor`] once per session.
//!
//! # Example
//!
//! ```rust
//! use pg_capture_consumer::model::{field, FieldSpec, Model, TableName};
//!
//! #[derive(Debug, Default)]
//! struct User {
//!     id: i64,
//!     name: String,
//!     email: Option<String>,
//! }
//!
//! impl Model for User {
//!     fn table_name() -> TableName {
//!         TableName::new("public", "users")
//!     }
//!
//!     fn fields() -> Vec<FieldSpec<Self>> {
//!         vec![
//!             field("id", |u: &mut User| &mut u.id),
//!             field("name", |u: &mut User| &mut u.name),
//!             field("email", |u: &mut User| &mut u.email),
//!         ]
//!     }
//! }
//!
//! assert_eq!(User::table_name().qualified(), "public.users");
//! ```

mod descriptor;
mod registry;

pub use descriptor::ModelDescriptor;
pub use registry::{ModelHandlers, Registry};

use std::fmt;

use crate::decode::PgDecode;
use crate::error::BoxError;
use crate::source::FieldValue;

/// Schema assumed when a source or model leaves it empty.
pub const DEFAULT_SCHEMA: &str = "public";

/// Normalized `schema.table` key used to route events to models.
///
/// Identifiers are compared exactly as the source spells them.
pub fn qualified_name(schema: &str, table: &str) -> String {
    let schema = if schema.is_empty() {
        DEFAULT_SCHEMA
    } else {
        schema
    };
    format!("{}.{}", schema, table)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName {
    pub schema: String,
    pub table: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    pub fn qualified(&self) -> String {
        qualified_name(&self.schema, &self.table)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified())
    }
}

/// A value shape that rows of one table decode into.
///
/// [`Default`] supplies the zero value that null columns leave in place.
pub trait Model: Default + Send + 'static {
    fn table_name() -> TableName;

    fn fields() -> Vec<FieldSpec<Self>>;
}

type Setter<M> = Box<dyn Fn(&mut M, &FieldValue) -> Result<(), BoxError> + Send + Sync>;

/// One column of a model: the wire column name and how to fill the field.
pub struct FieldSpec<M> {
    name: String,
    setter: Setter<M>,
}

impl<M> FieldSpec<M> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn apply(&self, model: &mut M, value: &FieldValue) -> Result<(), BoxError> {
        (self.setter)(model, value)
    }
}

impl<M> fmt::Debug for FieldSpec<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec").field("name", &self.name).finish()
    }
}

/// Declares a model column backed by the field `accessor` points at.
pub fn field<M, T>(name: impl Into<String>, accessor: fn(&mut M) -> &mut T) -> FieldSpec<M>
where
    M: 'static,
    T: PgDecode,
{
    FieldSpec {
        name: name.into(),
        setter: Box::new(move |model: &mut M, value: &FieldValue| -> Result<(), BoxError> {
            match value {
                FieldValue::Null => {}
                FieldValue::Binary(raw) => *accessor(model) = T::decode_binary(raw)?,
                FieldValue::Text(raw) => {
                    *accessor(model) = T::decode_text(std::str::from_utf8(raw)?)?
                }
            }
            Ok(())
        }),
    }
}
