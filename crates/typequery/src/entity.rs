//! Entities and the loaded-record representation they are built from.

use crate::error::{OrmError, OrmResult};
use crate::schema::EntitySchema;
use crate::value::{FromValue, SqlScalar, Value};
use std::collections::BTreeMap;

/// A persisted domain type with a static schema.
///
/// `from_record` receives the columns that were actually selected; fields
/// outside a partial projection and relations that were not fetched are
/// simply absent from the record.
pub trait Entity: Sized + Send + 'static {
    fn schema() -> &'static EntitySchema;

    fn from_record(record: &Record) -> OrmResult<Self>;
}

/// Field values and fetched relations for one entity row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: BTreeMap<&'static str, Value>,
    relations: BTreeMap<&'static str, Vec<Record>>,
    pub(crate) link: Option<Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for hand-built records.
    pub fn with(mut self, field: &'static str, value: impl SqlScalar) -> Self {
        self.values.insert(field, value.into_value());
        self
    }

    pub fn insert(&mut self, field: &'static str, value: Value) {
        self.values.insert(field, value);
    }

    pub fn value(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    pub fn is_loaded(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    /// Read a field that must have been selected.
    pub fn get<T: FromValue>(&self, field: &str) -> OrmResult<T> {
        let value = self
            .values
            .get(field)
            .ok_or_else(|| OrmError::decode(field, "field was not loaded"))?;
        T::from_value(value).map_err(|msg| OrmError::decode(field, msg))
    }

    /// Read a field, returning `None` when it was outside the projection.
    pub fn try_get<T: FromValue>(&self, field: &str) -> OrmResult<Option<T>> {
        match self.values.get(field) {
            Some(value) => T::from_value(value)
                .map(Some)
                .map_err(|msg| OrmError::decode(field, msg)),
            None => Ok(None),
        }
    }

    /// The related record of a fetched to-one relation (`None` if absent or not fetched).
    pub fn one(&self, relation: &str) -> Option<&Record> {
        self.relations.get(relation).and_then(|r| r.first())
    }

    /// The related records of a fetched relation (empty if none or not fetched).
    pub fn many(&self, relation: &str) -> &[Record] {
        self.relations
            .get(relation)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_fetched(&self, relation: &str) -> bool {
        self.relations.contains_key(relation)
    }

    /// Map a fetched to-one relation.
    pub fn one_as<R: Entity>(&self, relation: &str) -> OrmResult<Option<R>> {
        self.one(relation).map(R::from_record).transpose()
    }

    /// Map a fetched relation; `None` when it was not fetched.
    pub fn many_as<R: Entity>(&self, relation: &str) -> OrmResult<Option<Vec<R>>> {
        match self.relations.get(relation) {
            Some(records) => records.iter().map(R::from_record).collect::<OrmResult<_>>().map(Some),
            None => Ok(None),
        }
    }

    pub(crate) fn attach(&mut self, relation: &'static str, records: Vec<Record>) {
        self.relations.insert(relation, records);
    }

    pub(crate) fn relation_mut(&mut self, relation: &str) -> Option<&mut Vec<Record>> {
        self.relations.get_mut(relation)
    }
}
