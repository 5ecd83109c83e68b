//! Query descriptors and the typed builder surface.
//!
//! A [`Query<E>`] owns one [`QueryDescriptor`]: the predicate tree plus
//! projection, fetch graph, ordering, paging and lock tuning. Builder calls
//! take and return the query by value, so every query is an isolated value
//! and nothing is shared between two queries.
//!
//! ```ignore
//! let customers = Query::<Customer>::new()
//!     .prop(Customer::status()).eq(Status::Good)
//!     .or()
//!         .prop(Customer::name()).istarts_with("rob")
//!         .assoc(Customer::contacts()).is_not_empty()
//!     .end_or()
//!     .order_by_desc(Customer::registered())
//!     .set_max_rows(20)
//!     .find_list(&client)
//!     .await?;
//! ```

mod find;
mod iter;
mod node;
mod paged;

#[cfg(test)]
mod tests;

pub use iter::QueryIterator;
pub use node::{AssocNode, OrderByNode, PropertyNode, Temporal};
pub use paged::PagedList;

use crate::entity::Entity;
use crate::error::BuildError;
use crate::expr::{CompareOp, Expr, ExprTree, Junction, Leaf, Op, Target};
use crate::property::{Association, Property, PropertyPath, Selector};
use crate::schema::{EntitySchema, FieldKind, ScalarType};
use crate::value::{SqlScalar, Value};
use std::fmt;
use std::marker::PhantomData;

/// Default number of parent keys bound per secondary fetch query.
pub const DEFAULT_FETCH_BATCH_SIZE: usize = 100;

/// Row lock requested by the query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockMode {
    #[default]
    None,
    ForUpdate,
    ForUpdateNoWait,
    ForUpdateSkipLocked,
}

impl LockMode {
    pub fn is_locking(&self) -> bool {
        !matches!(self, LockMode::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub path: PropertyPath,
    pub direction: Direction,
}

/// A relation path to load, with the requested properties (empty = all).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSpec {
    pub path: PropertyPath,
    pub props: Vec<&'static str>,
}

/// Untyped query state shared by every entity type.
#[derive(Debug, Clone)]
pub struct QueryDescriptor {
    pub(crate) schema: &'static EntitySchema,
    pub(crate) predicates: ExprTree,
    pub(crate) projection: Vec<PropertyPath>,
    pub(crate) fetches: Vec<FetchSpec>,
    pub(crate) distinct: bool,
    pub(crate) order_by: Vec<OrderTerm>,
    pub(crate) first_row: Option<u64>,
    pub(crate) max_rows: Option<u64>,
    pub(crate) lock: LockMode,
    pub(crate) include_soft_deleted: bool,
    pub(crate) id_filter: Option<Vec<Value>>,
    pub(crate) map_key: Option<&'static str>,
    pub(crate) label: Option<String>,
    pub(crate) fetch_batch_size: usize,
    // Set on secondary fetch queries: foreign key column returned with each row.
    pub(crate) link_column: Option<&'static str>,
    pub(crate) build_error: Option<BuildError>,
}

impl QueryDescriptor {
    pub fn new(schema: &'static EntitySchema) -> Self {
        Self {
            schema,
            predicates: ExprTree::new(),
            projection: Vec::new(),
            fetches: Vec::new(),
            distinct: false,
            order_by: Vec::new(),
            first_row: None,
            max_rows: None,
            lock: LockMode::None,
            include_soft_deleted: false,
            id_filter: None,
            map_key: None,
            label: None,
            fetch_batch_size: DEFAULT_FETCH_BATCH_SIZE,
            link_column: None,
            build_error: None,
        }
    }

    pub fn schema(&self) -> &'static EntitySchema {
        self.schema
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn max_rows(&self) -> Option<u64> {
        self.max_rows
    }

    pub fn first_row(&self) -> Option<u64> {
        self.first_row
    }

    pub fn lock_mode(&self) -> LockMode {
        self.lock
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn projection(&self) -> &[PropertyPath] {
        &self.projection
    }

    pub fn fetches(&self) -> &[FetchSpec] {
        &self.fetches
    }

    pub fn build_error(&self) -> Option<&BuildError> {
        self.build_error.as_ref()
    }

    /// Keep the first error; later ones are usually consequences of it.
    pub(crate) fn record_error(&mut self, err: BuildError) {
        tracing::debug!(target: "typequery.sql", entity = self.schema.name, error = %err, "query build error");
        if self.build_error.is_none() {
            self.build_error = Some(err);
        }
    }

    /// Validate and append a predicate leaf to the innermost open group.
    pub(crate) fn push_leaf(&mut self, path: PropertyPath, op: Op) {
        let op = match op {
            Op::Compare {
                op: CompareOp::Eq,
                value: Value::Null,
            } => Op::Null { negated: false },
            Op::Compare {
                op: CompareOp::Ne,
                value: Value::Null,
            } => Op::Null { negated: true },
            other => other,
        };
        match self.check_leaf(&path, &op) {
            Ok(()) => self.predicates.push(Expr::Leaf(Leaf {
                target: Target::Property(path),
                op,
            })),
            Err(e) => self.record_error(e),
        }
    }

    fn check_leaf(&self, path: &PropertyPath, op: &Op) -> Result<(), BuildError> {
        let resolved = self.schema.resolve(path.segments())?;
        let mismatch = |expected: String, found: &str| BuildError::TypeMismatch {
            path: path.to_string(),
            expected,
            found: found.to_string(),
        };
        let check = |ty: &ScalarType, value: &Value| {
            if ty.accepts(value) {
                Ok(())
            } else {
                Err(mismatch(ty.to_string(), value.kind_name()))
            }
        };

        match (resolved.leaf.kind, op) {
            (FieldKind::Relation(_), Op::RelationEmpty { .. }) => Ok(()),
            (FieldKind::Relation(_), _) => Err(mismatch("scalar property".into(), "relation")),
            (FieldKind::Scalar(ty), Op::RelationEmpty { .. }) => {
                Err(mismatch("relation".into(), &ty.to_string()))
            }
            (FieldKind::Scalar(ScalarType::Array(elem)), Op::ArrayContains { value, .. }) => {
                check(elem, value)
            }
            (FieldKind::Scalar(ScalarType::Array(_)), Op::ArrayEmpty { .. }) => Ok(()),
            (FieldKind::Scalar(ty), Op::ArrayContains { .. } | Op::ArrayEmpty { .. }) => {
                Err(mismatch("array".into(), &ty.to_string()))
            }
            (
                FieldKind::Scalar(ty),
                Op::Compare {
                    op: CompareOp::Like | CompareOp::ILike,
                    value,
                }
                | Op::LowerEq(value),
            ) => match (ty, value) {
                (ScalarType::Text | ScalarType::Enum(_), Value::Text(_)) => Ok(()),
                (ScalarType::Text | ScalarType::Enum(_), other) => {
                    Err(mismatch("text".into(), other.kind_name()))
                }
                (ty, _) => Err(mismatch("text".into(), &ty.to_string())),
            },
            (FieldKind::Scalar(ty), op) => op.operands().into_iter().try_for_each(|v| check(&ty, v)),
        }
    }

    pub(crate) fn resolve_selector(&mut self, path: PropertyPath) -> Option<PropertyPath> {
        match self.schema.resolve(path.segments()) {
            Ok(resolved) if resolved.leaf.scalar_type().is_some() => Some(path),
            Ok(_) => {
                self.record_error(BuildError::TypeMismatch {
                    path: path.to_string(),
                    expected: "scalar property".to_string(),
                    found: "relation".to_string(),
                });
                None
            }
            Err(e) => {
                self.record_error(e);
                None
            }
        }
    }

    pub(crate) fn add_select(&mut self, path: PropertyPath) {
        if let Some(path) = self.resolve_selector(path) {
            if !self.projection.contains(&path) {
                self.projection.push(path);
            }
        }
    }

    /// Add a fetch of `path`; props are property paths relative to it.
    pub(crate) fn add_fetch(&mut self, path: PropertyPath, props: Vec<PropertyPath>) {
        match self.schema.resolve(path.segments()) {
            Ok(resolved) if resolved.leaf.relation().is_some() => {}
            Ok(_) => {
                self.record_error(BuildError::TypeMismatch {
                    path: path.to_string(),
                    expected: "relation".to_string(),
                    found: "scalar property".to_string(),
                });
                return;
            }
            Err(e) => {
                self.record_error(e);
                return;
            }
        }

        let mut direct = Vec::new();
        for prop in props {
            let full = path.join(&prop);
            let Some(full) = self.resolve_selector(full) else {
                continue;
            };
            if prop.len() == 1 {
                direct.extend(full.last());
            } else if let Some(name) = full.last() {
                // nested property: fetch its owning relation pruned to it
                self.merge_fetch(full.parent(), vec![name], false);
            }
        }
        self.merge_fetch(path, direct, true);
    }

    fn merge_fetch(&mut self, path: PropertyPath, props: Vec<&'static str>, explicit: bool) {
        match self.fetches.iter_mut().find(|f| f.path == path) {
            Some(existing) => {
                if existing.props.is_empty() || (explicit && props.is_empty()) {
                    existing.props.clear();
                } else {
                    for p in props {
                        if !existing.props.contains(&p) {
                            existing.props.push(p);
                        }
                    }
                }
            }
            None => self.fetches.push(FetchSpec { path, props }),
        }
    }

    pub(crate) fn add_order(&mut self, path: PropertyPath, direction: Direction) {
        if let Some(path) = self.resolve_selector(path) {
            self.order_by.push(OrderTerm { path, direction });
        }
    }

    /// Map a runtime dotted path onto the schema's static field names.
    pub(crate) fn static_path(&mut self, dotted: &str) -> Option<PropertyPath> {
        let entity = self.schema.name;
        let unknown = || BuildError::UnknownFieldPath {
            entity: entity.to_string(),
            path: dotted.to_string(),
        };
        let mut owner = self.schema;
        let mut segments = Vec::new();
        let parts: Vec<&str> = dotted.split('.').collect();
        for (i, part) in parts.iter().enumerate() {
            let Some(field) = owner.field(part) else {
                self.record_error(unknown());
                return None;
            };
            segments.push(field.name);
            match field.relation() {
                Some(rel) => owner = rel.target(),
                None if i + 1 < parts.len() => {
                    self.record_error(unknown());
                    return None;
                }
                None => {}
            }
        }
        Some(PropertyPath::from_segments(segments))
    }
}

/// A typed query over entity `E`.
pub struct Query<E> {
    pub(crate) desc: QueryDescriptor,
    _marker: PhantomData<fn() -> E>,
}

impl<E> Clone for Query<E> {
    fn clone(&self) -> Self {
        Self {
            desc: self.desc.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E> fmt::Debug for Query<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("entity", &self.desc.schema.name)
            .field("desc", &self.desc)
            .finish()
    }
}

impl<E: Entity> Default for Query<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Query<E> {
    /// A fresh query selecting every row of `E`.
    pub fn new() -> Self {
        Self {
            desc: QueryDescriptor::new(E::schema()),
            _marker: PhantomData,
        }
    }

    pub fn descriptor(&self) -> &QueryDescriptor {
        &self.desc
    }

    /// The first build error recorded on this query, if any.
    pub fn build_error(&self) -> Option<&BuildError> {
        self.desc.build_error.as_ref()
    }

    /// Remove the recorded build error; the offending predicates were never appended.
    pub fn take_build_error(&mut self) -> Option<BuildError> {
        self.desc.build_error.take()
    }

    // ---- predicates ----

    /// Start a predicate on a scalar property.
    pub fn prop<T>(self, property: Property<E, T>) -> PropertyNode<E, T> {
        PropertyNode::new(self, Some(property.path().clone()))
    }

    /// Start a predicate on a property path given at runtime, e.g. `"contacts.email"`.
    ///
    /// Unknown paths record [`BuildError::UnknownFieldPath`]; operand types are
    /// checked against the field when the operator is applied.
    pub fn prop_dyn(mut self, path: &str) -> PropertyNode<E, Value> {
        let path = self.desc.static_path(path);
        PropertyNode::new(self, path)
    }

    /// Start a predicate or fetch on a relationship.
    pub fn assoc<R>(self, association: Association<E, R>) -> AssocNode<E, R> {
        AssocNode::new(self, association.path().clone())
    }

    /// Append a raw SQL predicate with `?` placeholders.
    ///
    /// Root columns are addressed through alias `t0`.
    pub fn raw<I, V>(mut self, sql: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: SqlScalar,
    {
        let sql = sql.into();
        let params: Vec<Value> = params.into_iter().map(SqlScalar::into_value).collect();
        let placeholders = crate::compile::count_placeholders(&sql);
        if placeholders != params.len() {
            self.desc.record_error(BuildError::InvalidUsage(format!(
                "raw expression has {placeholders} placeholders but {} parameters",
                params.len()
            )));
            return self;
        }
        self.desc.predicates.push(Expr::Raw { sql, params });
        self
    }

    // ---- junctions ----

    /// Open a disjunction; following predicates are ORed until `end_or()`.
    pub fn or(mut self) -> Self {
        self.desc.predicates.open(Junction::Or);
        self
    }

    pub fn and(mut self) -> Self {
        self.desc.predicates.open(Junction::And);
        self
    }

    /// Open a negated conjunction.
    pub fn not(mut self) -> Self {
        self.desc.predicates.open(Junction::Not);
        self
    }

    pub fn end_or(self) -> Self {
        self.end(Junction::Or)
    }

    pub fn end_and(self) -> Self {
        self.end(Junction::And)
    }

    pub fn end_not(self) -> Self {
        self.end(Junction::Not)
    }

    /// Close the innermost group regardless of its kind.
    pub fn end_junction(mut self) -> Self {
        if let Err(e) = self.desc.predicates.close_any() {
            self.desc.record_error(e);
        }
        self
    }

    fn end(mut self, junction: Junction) -> Self {
        if let Err(e) = self.desc.predicates.close(junction) {
            self.desc.record_error(e);
        }
        self
    }

    // ---- projection / fetch ----

    /// Restrict the root projection; the primary key is always included.
    ///
    /// Nested properties such as `Customer::contacts().then(Contact::email())`
    /// are merged into the fetch of their relation.
    pub fn select<I>(mut self, props: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Selector<E>>,
    {
        for prop in props {
            self.desc.add_select(prop.into().into_path());
        }
        self
    }

    /// Load a relation with the given properties of the related entity.
    pub fn fetch<R, I>(mut self, association: Association<E, R>, props: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Selector<R>>,
    {
        let props = props.into_iter().map(|p| p.into().into_path()).collect();
        self.desc.add_fetch(association.path().clone(), props);
        self
    }

    /// Load a relation with all of its properties.
    pub fn fetch_all<R>(mut self, association: Association<E, R>) -> Self {
        self.desc.add_fetch(association.path().clone(), Vec::new());
        self
    }

    pub fn set_distinct(mut self, distinct: bool) -> Self {
        self.desc.distinct = distinct;
        self
    }

    // ---- id filter ----

    /// Restrict to the given primary keys.
    ///
    /// Identifiers may be passed as typed keys or as strings that parse into
    /// the key type.
    pub fn set_id_in<I, V>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: SqlScalar,
    {
        let schema = self.desc.schema;
        let pk = match schema.primary_key_field() {
            Ok(pk) => pk,
            Err(e) => {
                self.desc.record_error(e);
                return self;
            }
        };
        let Some(ty) = pk.scalar_type() else {
            return self;
        };
        let mut values = Vec::new();
        for id in ids {
            match ty.coerce(id.into_value()) {
                Ok(v) => values.push(v),
                Err(v) => self.desc.record_error(BuildError::TypeMismatch {
                    path: pk.name.to_string(),
                    expected: ty.to_string(),
                    found: v.kind_name().to_string(),
                }),
            }
        }
        self.desc.id_filter = Some(values);
        self
    }

    pub fn set_id(self, id: impl SqlScalar) -> Self {
        self.set_id_in([id])
    }

    // ---- tuning ----

    /// Include rows flagged by the entity's soft-delete column.
    pub fn set_include_soft_deletes(mut self) -> Self {
        self.desc.include_soft_deleted = true;
        self
    }

    pub fn set_max_rows(mut self, max_rows: u64) -> Self {
        self.desc.max_rows = Some(max_rows);
        self
    }

    /// Zero-based offset of the first row.
    pub fn set_first_row(mut self, first_row: u64) -> Self {
        self.desc.first_row = Some(first_row);
        self
    }

    /// Number of parent keys bound per secondary fetch query.
    pub fn set_fetch_batch_size(mut self, size: usize) -> Self {
        self.desc.fetch_batch_size = size.max(1);
        self
    }

    /// Tag executed statements for monitoring.
    pub fn set_label(mut self, label: impl Into<String>) -> Self {
        self.desc.label = Some(label.into());
        self
    }

    /// Key `find_map` results by this root property instead of the primary key.
    pub fn set_map_key<T>(mut self, property: Property<E, T>) -> Self {
        let path = property.path().clone();
        if path.len() != 1 {
            self.desc.record_error(BuildError::InvalidUsage(format!(
                "map key '{path}' must be a property of the root entity"
            )));
            return self;
        }
        if let Some(path) = self.desc.resolve_selector(path) {
            self.desc.map_key = path.last();
        }
        self
    }

    // ---- ordering ----

    pub fn order_by(self) -> OrderByNode<E> {
        OrderByNode::new(self)
    }

    pub fn order_by_asc(mut self, property: impl Into<Selector<E>>) -> Self {
        self.desc
            .add_order(property.into().into_path(), Direction::Asc);
        self
    }

    pub fn order_by_desc(mut self, property: impl Into<Selector<E>>) -> Self {
        self.desc
            .add_order(property.into().into_path(), Direction::Desc);
        self
    }

    // ---- locking ----

    /// `for update`; requires an active transaction.
    pub fn for_update(mut self) -> Self {
        self.desc.lock = LockMode::ForUpdate;
        self
    }

    /// `for update nowait`: fail with `LockUnavailable` instead of waiting.
    pub fn for_update_no_wait(mut self) -> Self {
        self.desc.lock = LockMode::ForUpdateNoWait;
        self
    }

    /// `for update skip locked`: silently exclude locked rows.
    pub fn for_update_skip_locked(mut self) -> Self {
        self.desc.lock = LockMode::ForUpdateSkipLocked;
        self
    }
}
