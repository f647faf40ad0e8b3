use std::sync::Arc;

use crate::db::schema::{self, Schema};
use crate::db::value::{Row, Value};
use crate::errors::{DbError, Result};

/// Returns the descriptor of a referenced entity type. Function pointers keep
/// cyclic entity graphs expressible in `const` tables.
pub type DescriptorFn = fn() -> &'static EntityDescriptor;

/// Declared shape of a field.
#[derive(Debug, Clone, Copy)]
pub enum FieldShape {
    /// Plain mapped column.
    Scalar,
    /// `T`, `Box<T>`, `Option<T>` or `Option<Box<T>>` of an entity type.
    One(DescriptorFn),
    /// `Vec<T>` of an entity type.
    Many(DescriptorFn),
    /// A relation whose shape could not be classified.
    Unknown,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Struct field name.
    pub name: &'static str,
    /// Column name; `#[derive(Entity)]` fills the snake_case default.
    pub column: &'static str,
    pub shape: FieldShape,
    pub primary_key: bool,
    /// Never written, still read back through `RETURNING`.
    pub ignored: bool,
    /// Literal SQL expression written in place of a bound parameter.
    pub default: Option<&'static str>,
    /// Foreign key column override for relation fields.
    pub foreign_key: Option<&'static str>,
}

impl FieldSpec {
    pub const fn default() -> Self {
        Self {
            name: "",
            column: "",
            shape: FieldShape::Scalar,
            primary_key: false,
            ignored: false,
            default: None,
            foreign_key: None,
        }
    }

    pub const fn is_relation(&self) -> bool {
        !matches!(self.shape, FieldShape::Scalar)
    }
}

/// Statically declared metadata of one entity type.
#[derive(Debug)]
pub struct EntityDescriptor {
    /// Unique per type, used as the schema registry key.
    pub type_key: &'static str,
    pub type_name: &'static str,
    pub table_name: &'static str,
    pub fields: &'static [FieldSpec],
}

/// Object-safe half of the entity contract. The preloader walks entity graphs
/// through it without knowing concrete types.
///
/// Implemented by `#[derive(Entity)]`.
pub trait DynEntity: Send + Sync {
    fn descriptor(&self) -> &'static EntityDescriptor;

    /// Value of a mapped column, looked up by struct field name.
    fn field_value(&self, field: &str) -> Option<Value>;

    /// Assigns a fetched value to the field mapped on `column`. Unknown
    /// columns are ignored and reported as `false`.
    fn set_column(&mut self, column: &str, value: Value) -> Result<bool, DbError>;

    /// Already populated entities behind a relation field.
    fn associated_mut(&mut self, field: &str) -> Vec<&mut (dyn DynEntity + 'static)>;

    /// Builds the related entities from `rows` and stores them in `field`.
    /// A to-one field with no row is left untouched.
    fn load_association(&mut self, field: &str, rows: &[Row]) -> Result<(), DbError>;

    fn table_name(&self) -> &'static str {
        self.descriptor().table_name
    }

    fn primary_key(&self) -> Value {
        self.descriptor()
            .fields
            .iter()
            .find(|f| f.primary_key)
            .and_then(|f| self.field_value(f.name))
            .unwrap_or(Value::Null)
    }

    /// Values of every mapped column keyed by column name, used to bind
    /// named statements against the instance itself.
    fn column_values(&self) -> Row {
        let mut row = Row::new();
        for field in self.descriptor().fields.iter().filter(|f| !f.is_relation()) {
            if let Some(value) = self.field_value(field.name) {
                row.insert(field.column.to_string(), value);
            }
        }
        row
    }

    fn apply_row(&mut self, row: &Row) -> Result<(), DbError> {
        for (column, value) in row {
            self.set_column(column, value.clone())?;
        }
        Ok(())
    }
}

/// Statically typed entity: a record mapped to a table row.
pub trait Entity: DynEntity + Default + Sized + 'static {
    fn entity() -> &'static EntityDescriptor;

    fn table() -> &'static str {
        Self::entity().table_name
    }

    /// Derived schema, memoized per entity type.
    fn schema() -> Result<Arc<Schema>> {
        schema::registry().get(Self::entity())
    }

    fn from_row(row: &Row) -> Result<Self, DbError> {
        let mut entity = Self::default();
        entity.apply_row(row)?;
        Ok(entity)
    }
}
