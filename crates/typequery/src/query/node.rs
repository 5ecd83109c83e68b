//! Typed property nodes.
//!
//! A node wraps the owning query together with the path it was opened on.
//! Each operator appends one leaf and hands the query back, so predicates
//! chain fluently. Which operators exist depends on the property type: string
//! patterns only on `String`, `before`/`after` only on temporal types,
//! containment on `Vec<T>` arrays.

use super::{Direction, Query};
use crate::entity::Entity;
use crate::expr::{CompareOp, Op};
use crate::property::{Association, Property, PropertyPath, Selector};
use crate::value::{SqlScalar, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::marker::PhantomData;

/// Predicate builder for one scalar property of type `T`.
#[must_use = "a property node does nothing until an operator is applied"]
pub struct PropertyNode<E, T> {
    query: Query<E>,
    // None when the path failed to resolve; the error is already recorded.
    path: Option<PropertyPath>,
    _marker: PhantomData<fn() -> T>,
}

impl<E, T> PropertyNode<E, T> {
    pub(crate) fn new(query: Query<E>, path: Option<PropertyPath>) -> Self {
        Self {
            query,
            path,
            _marker: PhantomData,
        }
    }

    fn apply(self, op: Op) -> Query<E> {
        let mut query = self.query;
        if let Some(path) = self.path {
            query.desc.push_leaf(path, op);
        }
        query
    }

    fn compare(self, op: CompareOp, value: Value) -> Query<E> {
        self.apply(Op::Compare { op, value })
    }
}

impl<E, T: SqlScalar> PropertyNode<E, T> {
    /// `col = ?`; comparing with null renders `is null`.
    pub fn eq(self, value: impl Into<T>) -> Query<E> {
        self.compare(CompareOp::Eq, value.into().into_value())
    }

    pub fn equal_to(self, value: impl Into<T>) -> Query<E> {
        self.eq(value)
    }

    /// `col <> ?`
    pub fn ne(self, value: impl Into<T>) -> Query<E> {
        self.compare(CompareOp::Ne, value.into().into_value())
    }

    pub fn not_equal_to(self, value: impl Into<T>) -> Query<E> {
        self.ne(value)
    }

    pub fn gt(self, value: impl Into<T>) -> Query<E> {
        self.compare(CompareOp::Gt, value.into().into_value())
    }

    pub fn greater_than(self, value: impl Into<T>) -> Query<E> {
        self.gt(value)
    }

    pub fn ge(self, value: impl Into<T>) -> Query<E> {
        self.compare(CompareOp::Ge, value.into().into_value())
    }

    pub fn greater_or_equal_to(self, value: impl Into<T>) -> Query<E> {
        self.ge(value)
    }

    pub fn lt(self, value: impl Into<T>) -> Query<E> {
        self.compare(CompareOp::Lt, value.into().into_value())
    }

    pub fn less_than(self, value: impl Into<T>) -> Query<E> {
        self.lt(value)
    }

    pub fn le(self, value: impl Into<T>) -> Query<E> {
        self.compare(CompareOp::Le, value.into().into_value())
    }

    pub fn less_or_equal_to(self, value: impl Into<T>) -> Query<E> {
        self.le(value)
    }

    /// `col in (?, ...)`; an empty list matches nothing.
    pub fn in_list<I, V>(self, values: I) -> Query<E>
    where
        I: IntoIterator<Item = V>,
        V: Into<T>,
    {
        let values = values.into_iter().map(|v| v.into().into_value()).collect();
        self.apply(Op::In {
            values,
            negated: false,
        })
    }

    pub fn is_in<I, V>(self, values: I) -> Query<E>
    where
        I: IntoIterator<Item = V>,
        V: Into<T>,
    {
        self.in_list(values)
    }

    /// `col not in (?, ...)`; an empty list matches everything.
    pub fn not_in<I, V>(self, values: I) -> Query<E>
    where
        I: IntoIterator<Item = V>,
        V: Into<T>,
    {
        let values = values.into_iter().map(|v| v.into().into_value()).collect();
        self.apply(Op::In {
            values,
            negated: true,
        })
    }

    pub fn is_null(self) -> Query<E> {
        self.apply(Op::Null { negated: false })
    }

    pub fn is_not_null(self) -> Query<E> {
        self.apply(Op::Null { negated: true })
    }

    /// `col between ? and ?` (both bounds inclusive).
    pub fn between(self, low: impl Into<T>, high: impl Into<T>) -> Query<E> {
        self.apply(Op::Between {
            low: low.into().into_value(),
            high: high.into().into_value(),
        })
    }

    /// `col >= low and col < high`.
    pub fn in_range(self, low: impl Into<T>, high: impl Into<T>) -> Query<E> {
        self.apply(Op::InRange {
            low: low.into().into_value(),
            high: high.into().into_value(),
        })
    }
}

/// Date and time types that support `before` / `after`.
pub trait Temporal: SqlScalar {}

impl Temporal for DateTime<Utc> {}
impl Temporal for NaiveDateTime {}
impl Temporal for NaiveDate {}

impl<E, T: Temporal> PropertyNode<E, T> {
    /// Same as `lt`.
    pub fn before(self, value: impl Into<T>) -> Query<E> {
        self.lt(value)
    }

    /// Same as `gt`.
    pub fn after(self, value: impl Into<T>) -> Query<E> {
        self.gt(value)
    }
}

/// Escape LIKE wildcards so user input matches literally.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn like_ops<E>(node: PropertyNode<E, impl Sized>, op: CompareOp, pattern: String) -> Query<E> {
    node.compare(op, Value::Text(pattern))
}

macro_rules! string_ops {
    ($ty:ty) => {
        impl<E> PropertyNode<E, $ty> {
            /// Case-sensitive substring match.
            pub fn contains(self, value: impl AsRef<str>) -> Query<E> {
                let pattern = format!("%{}%", escape_like(value.as_ref()));
                like_ops(self, CompareOp::Like, pattern)
            }

            pub fn starts_with(self, value: impl AsRef<str>) -> Query<E> {
                let pattern = format!("{}%", escape_like(value.as_ref()));
                like_ops(self, CompareOp::Like, pattern)
            }

            pub fn ends_with(self, value: impl AsRef<str>) -> Query<E> {
                let pattern = format!("%{}", escape_like(value.as_ref()));
                like_ops(self, CompareOp::Like, pattern)
            }

            /// Raw LIKE pattern; wildcards are not escaped.
            pub fn like(self, pattern: impl Into<String>) -> Query<E> {
                like_ops(self, CompareOp::Like, pattern.into())
            }

            pub fn icontains(self, value: impl AsRef<str>) -> Query<E> {
                let pattern = format!("%{}%", escape_like(value.as_ref()));
                like_ops(self, CompareOp::ILike, pattern)
            }

            pub fn istarts_with(self, value: impl AsRef<str>) -> Query<E> {
                let pattern = format!("{}%", escape_like(value.as_ref()));
                like_ops(self, CompareOp::ILike, pattern)
            }

            pub fn iends_with(self, value: impl AsRef<str>) -> Query<E> {
                let pattern = format!("%{}", escape_like(value.as_ref()));
                like_ops(self, CompareOp::ILike, pattern)
            }

            /// Case-insensitive raw pattern.
            pub fn ilike(self, pattern: impl Into<String>) -> Query<E> {
                like_ops(self, CompareOp::ILike, pattern.into())
            }

            /// Case-insensitive equality: `lower(col) = ?`.
            pub fn ieq(self, value: impl AsRef<str>) -> Query<E> {
                let value = Value::Text(value.as_ref().to_lowercase());
                self.apply(Op::LowerEq(value))
            }
        }
    };
}

string_ops!(String);
string_ops!(Value);

impl<E> PropertyNode<E, bool> {
    pub fn is_true(self) -> Query<E> {
        self.eq(true)
    }

    pub fn is_false(self) -> Query<E> {
        self.eq(false)
    }
}

impl<E, T: SqlScalar> PropertyNode<E, Vec<T>> {
    /// `? = any(col)`
    pub fn contains(self, value: impl Into<T>) -> Query<E> {
        self.apply(Op::ArrayContains {
            value: value.into().into_value(),
            negated: false,
        })
    }

    pub fn not_contains(self, value: impl Into<T>) -> Query<E> {
        self.apply(Op::ArrayContains {
            value: value.into().into_value(),
            negated: true,
        })
    }

    /// Null or zero-length array.
    pub fn is_empty(self) -> Query<E> {
        self.apply(Op::ArrayEmpty { negated: false })
    }

    pub fn is_not_empty(self) -> Query<E> {
        self.apply(Op::ArrayEmpty { negated: true })
    }
}

impl<E: Entity> PropertyNode<E, Value> {
    /// Emptiness of the field at runtime: relations test for related rows,
    /// arrays for elements.
    pub fn is_empty(self) -> Query<E> {
        let op = self.emptiness(false);
        self.apply(op)
    }

    pub fn is_not_empty(self) -> Query<E> {
        let op = self.emptiness(true);
        self.apply(op)
    }

    fn emptiness(&self, negated: bool) -> Op {
        let is_relation = self.path.as_ref().is_some_and(|path| {
            self.query
                .desc
                .schema
                .resolve(path.segments())
                .is_ok_and(|r| r.leaf.relation().is_some())
        });
        if is_relation {
            Op::RelationEmpty { negated }
        } else {
            Op::ArrayEmpty { negated }
        }
    }
}

/// Builder for a relationship of `E` to `R`.
#[must_use = "an association node does nothing until an operator is applied"]
pub struct AssocNode<E, R> {
    query: Query<E>,
    path: PropertyPath,
    _marker: PhantomData<fn() -> R>,
}

impl<E, R> AssocNode<E, R> {
    pub(crate) fn new(query: Query<E>, path: PropertyPath) -> Self {
        Self {
            query,
            path,
            _marker: PhantomData,
        }
    }

    /// Continue to a scalar property of the related entity.
    pub fn prop<T>(self, property: Property<R, T>) -> PropertyNode<E, T> {
        let path = self.path.join(property.path());
        PropertyNode::new(self.query, Some(path))
    }

    /// Continue to a relationship of the related entity.
    pub fn assoc<S>(self, association: Association<R, S>) -> AssocNode<E, S> {
        let path = self.path.join(association.path());
        AssocNode::new(self.query, path)
    }

    /// No related rows exist.
    pub fn is_empty(self) -> Query<E> {
        let mut query = self.query;
        query
            .desc
            .push_leaf(self.path, Op::RelationEmpty { negated: false });
        query
    }

    /// At least one related row exists.
    pub fn is_not_empty(self) -> Query<E> {
        let mut query = self.query;
        query
            .desc
            .push_leaf(self.path, Op::RelationEmpty { negated: true });
        query
    }

    /// Load this relation with the given properties of `R`.
    pub fn fetch<I>(self, props: I) -> Query<E>
    where
        I: IntoIterator,
        I::Item: Into<Selector<R>>,
    {
        let mut query = self.query;
        let props = props.into_iter().map(|p| p.into().into_path()).collect();
        query.desc.add_fetch(self.path, props);
        query
    }

    /// Load this relation with all of its properties.
    pub fn fetch_all(self) -> Query<E> {
        let mut query = self.query;
        query.desc.add_fetch(self.path, Vec::new());
        query
    }
}

/// `order_by()` sub-builder.
#[must_use]
pub struct OrderByNode<E> {
    query: Query<E>,
}

impl<E> OrderByNode<E> {
    pub(crate) fn new(query: Query<E>) -> Self {
        Self { query }
    }

    pub fn asc(self, property: impl Into<Selector<E>>) -> Query<E> {
        let mut query = self.query;
        query
            .desc
            .add_order(property.into().into_path(), Direction::Asc);
        query
    }

    pub fn desc(self, property: impl Into<Selector<E>>) -> Query<E> {
        let mut query = self.query;
        query
            .desc
            .add_order(property.into().into_path(), Direction::Desc);
        query
    }
}
