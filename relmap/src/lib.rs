//! Reflective object-relational mapping over named-parameter SQL.
//!
//! Entities declare their table through `#[derive(Entity)]`; the crate
//! derives their schema, builds save/delete/select statements, preloads
//! associations in batches and picks connections from a named pool with
//! linear failover.

extern crate self as relmap;

pub mod conf;
pub mod db;
pub mod errors;
pub mod testing;

pub use conf::{ClientOptions, SelectorConf, init_logging};
pub use errors::{ConnectionError, DbError, Error, IntegrityKind, Result};
