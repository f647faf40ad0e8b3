mod common;
mod entity;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};
extern crate proc_macro;

/// Derives `Entity`, `DynEntity` and `Preloadable` for a struct mapped to a
/// table. The struct must also implement `Default`.
///
/// # Attributes
///
/// ## `#[entity(...)]` - Type-level attributes
/// - `table = "users"` - Table name (required)
/// - `crate = "path"` - Path of the runtime crate (defaults to `::relmap`)
///
/// ## `#[column(...)]` - Field attributes
/// - `primary_key` - The primary key; exactly one per entity
/// - `ignored` - Never written, read back through `RETURNING`
/// - `default = "now()"` - Literal SQL written instead of the value, read back
/// - `name = "column_name"` - Column name (defaults to the snake_case field name)
/// - `reference` - Field holds an entity: `T`, `Box<T>`, `Option<T>`,
///   `Option<Box<T>>` (to-one) or `Vec<T>` (to-many)
/// - `foreign_key = "column"` - Foreign key column of a reference
/// - `skip` - Not mapped
///
/// ```ignore
/// #[derive(Debug, Default, Entity)]
/// #[entity(table = "articles")]
/// struct Article {
///     #[column(primary_key, ignored)]
///     id: i64,
///     title: String,
///     author_id: i64,
///     #[column(reference)]
///     author: Option<User>,
/// }
/// ```
#[proc_macro_derive(Entity, attributes(entity, column))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    entity::derive_entity_impl(&input).into()
}
