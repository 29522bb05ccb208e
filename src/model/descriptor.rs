use std::collections::HashMap;
use tracing::trace;

use super::{FieldSpec, Model, TableName};
use crate::error::DecodeError;
use crate::source::Field;
use crate::{Error, Result};

/// Immutable decoding plan for one model: its table and a column-name index
/// over the model's field accessors.
///
/// Descriptors hold no mutable state and can be shared across threads.
pub struct ModelDescriptor<M> {
    table: TableName,
    qualified: String,
    fields: Vec<FieldSpec<M>>,
    index: HashMap<String, usize>,
}

impl<M: Model> ModelDescriptor<M> {
    /// Builds the descriptor from the model's declarations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Registration`] if the model has no table name, no
    /// columns, an empty column name, or the same column declared twice.
    pub fn new() -> Result<Self> {
        let table = M::table_name();
        let qualified = table.qualified();

        if table.table.is_empty() {
            return Err(Error::registration(
                std::any::type_name::<M>(),
                "model has no table name",
            ));
        }

        let fields = M::fields();
        if fields.is_empty() {
            return Err(Error::registration(&qualified, "model declares no columns"));
        }

        let mut index = HashMap::with_capacity(fields.len());
        for (position, spec) in fields.iter().enumerate() {
            if spec.name().is_empty() {
                return Err(Error::registration(
                    &qualified,
                    format!("column at position {} has an empty name", position),
                ));
            }
            if index.insert(spec.name().to_string(), position).is_some() {
                return Err(Error::registration(
                    &qualified,
                    format!("duplicate column \"{}\"", spec.name()),
                ));
            }
        }

        Ok(Self {
            table,
            qualified,
            fields,
            index,
        })
    }

    /// Decodes a row image into a model value.
    ///
    /// An empty image means "no row" and yields `Ok(None)`. Columns the model
    /// does not declare are skipped. The first column that fails to decode
    /// aborts the whole row.
    pub fn decode(&self, image: &[Field]) -> std::result::Result<Option<M>, DecodeError> {
        if image.is_empty() {
            return Ok(None);
        }

        let mut model = M::default();
        for column in image {
            let Some(&position) = self.index.get(&column.name) else {
                trace!(table = %self.qualified, column = %column.name, "Skipping unknown column");
                continue;
            };

            self.fields[position]
                .apply(&mut model, &column.value)
                .map_err(|source| DecodeError {
                    table: self.qualified.clone(),
                    column: column.name.clone(),
                    source,
                })?;
        }

        Ok(Some(model))
    }
}

impl<M> ModelDescriptor<M> {
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// The normalized `schema.table` key.
    pub fn qualified_name(&self) -> &str {
        &self.qualified
    }

    /// Position of a wire column within the model, if declared.
    pub fn position(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(FieldSpec::name)
    }
}

impl<M> std::fmt::Debug for ModelDescriptor<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelDescriptor")
            .field("table", &self.qualified)
            .field("fields", &self.fields)
            .finish()
    }
}
