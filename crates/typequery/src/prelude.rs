//! Convenient imports for typical `typequery` usage.
//!
//! ```ignore
//! use typequery::prelude::*;
//! ```

pub use crate::{
    Association, Entity, EntitySchema, FieldMeta, FromValue, OrmError, OrmResult, Property,
    Query, Record, ScalarType, SqlScalar, Storage, Value,
};
