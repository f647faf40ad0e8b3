mod executor;
mod interfaces;
mod preload;
mod query;
pub mod schema;
mod selector;
mod value;

pub use executor::{
    Driver, NamedStatement, PgDriver, delete, find_by_params, get_by_params, save, soft_delete,
};
pub use interfaces::{DescriptorFn, DynEntity, Entity, EntityDescriptor, FieldShape, FieldSpec};
pub use preload::{Preloadable, Preloader, Roots, preload};
pub use query::{
    BindType, Queries, Query, SaveStatement, Statement, compile_named, delete_statement, rebind,
    save_statement, soft_delete_statement, where_query,
};
pub use schema::{Association, Cardinality, Column, Field, Schema, introspect};
pub use selector::{MASTER, REPLICA, RETRY_MASTER, Selector, retry};
pub use value::{FromValue, Key, Params, Row, ToValue, Value};

pub use crate::errors::DbError;

pub use relmap_macros::Entity;
