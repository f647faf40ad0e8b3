//! Schema derivation from entity descriptors.
//!
//! A [`Schema`] is computed purely from an [`EntityDescriptor`]: no instance
//! data and no I/O. Referenced entities are resolved one level deep, so cyclic
//! entity graphs terminate; deeper levels are looked up in the registry on
//! demand.

use std::collections::HashMap;
use std::sync::Arc;

use heck::ToSnakeCase;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::db::interfaces::{DescriptorFn, EntityDescriptor, FieldShape, FieldSpec};
use crate::errors::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub table_name: &'static str,
    pub name: String,
    /// `table_name.name`
    pub path: String,
}

impl Column {
    pub fn new(table_name: &'static str, name: impl Into<String>) -> Self {
        let name = name.into();
        let path = format!("{}.{}", table_name, name);
        Self {
            table_name,
            name,
            path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// This side holds the foreign key.
    ToOne,
    /// The referenced side holds the foreign key back to this one.
    ToMany,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct Association {
    pub field: &'static str,
    pub cardinality: Cardinality,
    /// For `ToOne` a column of the owning table, for `ToMany` a column of the
    /// referenced table.
    pub foreign_key: Column,
    /// Primary key column of the referenced table.
    pub reference: Column,
    /// Columns of the referenced entity; its own associations are not expanded.
    pub schema: Option<Arc<Schema>>,
    target: Option<DescriptorFn>,
}

impl Association {
    pub fn target(&self) -> Option<&'static EntityDescriptor> {
        self.target.map(|f| f())
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: &'static str,
    pub column: Column,
    pub ignored: bool,
    pub default: Option<&'static str>,
}

#[derive(Debug, Clone)]
pub struct Schema {
    pub type_key: &'static str,
    pub type_name: &'static str,
    pub table_name: &'static str,
    pub primary_key: Field,
    /// field name -> mapped column, in declaration order
    pub fields: IndexMap<&'static str, Field>,
    /// field name -> relation
    pub associations: IndexMap<&'static str, Association>,
}

impl Schema {
    pub fn column(&self, field: &str) -> Option<&Column> {
        self.fields.get(field).map(|f| &f.column)
    }

    /// Struct field mapped on `column`.
    pub fn field_for_column(&self, column: &str) -> Option<&Field> {
        self.fields.values().find(|f| f.column.name == column)
    }

    /// Qualified column list used by selects.
    pub fn column_paths(&self) -> String {
        self.fields
            .values()
            .map(|f| f.column.path.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Derives the schema of `descriptor`, resolving referenced entities one
/// level deep.
pub fn introspect(descriptor: &'static EntityDescriptor) -> Result<Schema> {
    let mut schema = columns_only(descriptor)?;

    for spec in descriptor.fields.iter().filter(|f| f.is_relation()) {
        let association = relation(descriptor, &schema, spec)?;
        schema.associations.insert(spec.name, association);
    }

    Ok(schema)
}

fn columns_only(descriptor: &'static EntityDescriptor) -> Result<Schema> {
    if descriptor.table_name.is_empty() {
        return Err(Error::configuration(format!(
            "{} does not declare a table name",
            descriptor.type_name
        )));
    }

    let mut fields = IndexMap::new();
    let mut primary_key = None;

    for spec in descriptor.fields.iter().filter(|f| !f.is_relation()) {
        let field = Field {
            name: spec.name,
            column: Column::new(descriptor.table_name, column_name(spec)),
            ignored: spec.ignored,
            default: spec.default,
        };
        if spec.primary_key {
            if primary_key.is_some() {
                return Err(Error::configuration(format!(
                    "{} declares more than one primary key",
                    descriptor.type_name
                )));
            }
            primary_key = Some(field.clone());
        }
        fields.insert(spec.name, field);
    }

    let primary_key = primary_key.ok_or_else(|| {
        Error::configuration(format!(
            "{} does not declare a primary key",
            descriptor.type_name
        ))
    })?;

    Ok(Schema {
        type_key: descriptor.type_key,
        type_name: descriptor.type_name,
        table_name: descriptor.table_name,
        primary_key,
        fields,
        associations: IndexMap::new(),
    })
}

fn column_name(spec: &FieldSpec) -> String {
    if spec.column.is_empty() {
        spec.name.to_snake_case()
    } else {
        spec.column.to_string()
    }
}

fn relation(
    owner: &'static EntityDescriptor,
    owner_schema: &Schema,
    spec: &FieldSpec,
) -> Result<Association> {
    let (cardinality, target) = match spec.shape {
        FieldShape::One(target) => (Cardinality::ToOne, target),
        FieldShape::Many(target) => (Cardinality::ToMany, target),
        FieldShape::Unknown | FieldShape::Scalar => {
            let column = Column::new(owner.table_name, column_name(spec));
            return Ok(Association {
                field: spec.name,
                cardinality: Cardinality::Unknown,
                foreign_key: column.clone(),
                reference: column,
                schema: None,
                target: None,
            });
        }
    };

    let referenced = columns_only(target()).map_err(|e| {
        Error::configuration(format!(
            "{}.{} does not reference a valid entity: {}",
            owner.type_name, spec.name, e
        ))
    })?;

    let foreign_key = match cardinality {
        Cardinality::ToOne => {
            let name = spec
                .foreign_key
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}_id", column_name(spec)));
            if owner_schema.field_for_column(&name).is_none() {
                return Err(Error::configuration(format!(
                    "{}.{} needs a mapped foreign key column '{}'",
                    owner.type_name, spec.name, name
                )));
            }
            Column::new(owner.table_name, name)
        }
        _ => {
            let name = spec
                .foreign_key
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}_id", owner.type_name.to_snake_case()));
            if referenced.field_for_column(&name).is_none() {
                return Err(Error::configuration(format!(
                    "{}.{} needs a mapped foreign key column '{}' on {}",
                    owner.type_name, spec.name, name, referenced.type_name
                )));
            }
            Column::new(referenced.table_name, name)
        }
    };

    Ok(Association {
        field: spec.name,
        cardinality,
        foreign_key,
        reference: referenced.primary_key.column.clone(),
        schema: Some(Arc::new(referenced)),
        target: Some(target),
    })
}

/// Memoized schemas keyed by entity type. Schemas are immutable once built.
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<&'static str, Arc<Schema>>>,
}

impl SchemaRegistry {
    fn new() -> Self {
        Self {
            schemas: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, descriptor: &'static EntityDescriptor) -> Result<Arc<Schema>> {
        if let Some(schema) = self.schemas.read().get(descriptor.type_key) {
            return Ok(Arc::clone(schema));
        }

        let schema = Arc::new(introspect(descriptor)?);
        let mut schemas = self.schemas.write();
        let entry = schemas
            .entry(descriptor.type_key)
            .or_insert_with(|| Arc::clone(&schema));
        Ok(Arc::clone(entry))
    }
}

static REGISTRY: Lazy<SchemaRegistry> = Lazy::new(SchemaRegistry::new);

pub fn registry() -> &'static SchemaRegistry {
    &REGISTRY
}
