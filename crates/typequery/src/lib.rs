//! # typequery
//!
//! Typed query beans for PostgreSQL.
//!
//! ## Features
//!
//! - **Typed predicates**: properties carry their value type, so comparing a
//!   date with a string is a compile error, not a runtime surprise
//! - **Nested junctions**: `or()` / `and()` / `not()` groups with explicit ends
//! - **Deterministic SQL**: equal queries compile to byte-identical SQL and
//!   parameter lists
//! - **Relationship navigation**: predicates, ordering and fetches across
//!   to-one and to-many relations; to-many predicates filter root keys
//!   through a subquery, so root rows are never duplicated
//! - **Result consumption**: lists, single rows, maps, id lists, counts,
//!   streaming iterators and paged lists
//! - **Row locking**: `for update`, `nowait` and `skip locked`
//! - **Query monitoring**: timing, timeouts and statistics for any storage
//!
//! ## Example
//!
//! ```ignore
//! use typequery::prelude::*;
//!
//! let customers = Query::<Customer>::new()
//!     .prop(Customer::name()).istarts_with("rob")
//!     .or()
//!         .prop(Customer::status()).eq(Status::Active)
//!         .assoc(Customer::contacts()).prop(Contact::email()).ends_with("@example.com")
//!     .end_or()
//!     .fetch(Customer::contacts(), [Contact::email()])
//!     .order_by_desc(Customer::registered())
//!     .set_max_rows(20)
//!     .find_list(&client)
//!     .await?;
//! ```

pub mod compile;
pub mod entity;
pub mod error;
pub mod expr;
pub mod mock;
pub mod monitor;
pub mod prelude;
pub mod property;
pub mod query;
pub mod schema;
pub mod storage;
pub mod value;

#[cfg(test)]
mod fixtures;

pub use compile::{CompiledStatement, Shape, compile, to_numbered_placeholders};
pub use entity::{Entity, Record};
pub use error::{BuildError, OrmError, OrmResult};
pub use monitor::{
    CompositeMonitor, InstrumentedStorage, LoggingMonitor, MonitorConfig, NoopMonitor,
    QueryContext, QueryMonitor, QueryResult, QueryStats, StatsMonitor,
};
pub use property::{Association, Property, PropertyPath, Selector};
pub use query::{
    AssocNode, DEFAULT_FETCH_BATCH_SIZE, Direction, LockMode, OrderByNode, PagedList,
    PropertyNode, Query, QueryDescriptor, QueryIterator, Temporal,
};
pub use schema::{EntitySchema, FieldKind, FieldMeta, Relation, ScalarType, SchemaRegistry};
pub use storage::{CursorTracker, Row, RowStream, Storage};
pub use value::{FromValue, SqlScalar, Value};

// Re-export inventory for `register_entity!`
pub use inventory;
