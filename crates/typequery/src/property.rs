//! Typed property and association tokens.
//!
//! Generated code exposes one token function per field:
//!
//! ```ignore
//! impl Customer {
//!     pub fn name() -> Property<Customer, String> { Property::new("name") }
//!     pub fn contacts() -> Association<Customer, Contact> { Association::new("contacts") }
//! }
//!
//! // Customer -> contacts -> email
//! let email = Customer::contacts().then(Contact::email());
//! ```
//!
//! Tokens carry the owning entity `E` and the field type `T` so that
//! projections, fetches and predicates are checked by the compiler.

use std::fmt;
use std::marker::PhantomData;

/// A dotted path of field names from the query root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyPath(Vec<&'static str>);

impl PropertyPath {
    /// The empty path denotes the query root.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(name: &'static str) -> Self {
        Self(vec![name])
    }

    pub fn from_segments(segments: Vec<&'static str>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[&'static str] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&'static str> {
        self.0.last().copied()
    }

    /// The path without its last segment.
    pub fn parent(&self) -> PropertyPath {
        match self.0.split_last() {
            Some((_, rest)) => Self(rest.to_vec()),
            None => Self::root(),
        }
    }

    pub fn child(&self, name: &'static str) -> PropertyPath {
        let mut segments = self.0.clone();
        segments.push(name);
        Self(segments)
    }

    pub fn join(&self, other: &PropertyPath) -> PropertyPath {
        let mut segments = self.0.clone();
        segments.extend_from_slice(&other.0);
        Self(segments)
    }

    /// Prefix of the first `n` segments.
    pub fn prefix(&self, n: usize) -> PropertyPath {
        Self(self.0[..n.min(self.0.len())].to_vec())
    }

    pub fn starts_with(&self, prefix: &PropertyPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn strip_prefix(&self, prefix: &PropertyPath) -> Option<PropertyPath> {
        self.0.strip_prefix(prefix.0.as_slice()).map(|s| Self(s.to_vec()))
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// A scalar property of `E` with value type `T`.
pub struct Property<E, T> {
    path: PropertyPath,
    _marker: PhantomData<fn() -> (E, T)>,
}

impl<E, T> Property<E, T> {
    pub fn new(name: &'static str) -> Self {
        Self::at(PropertyPath::new(name))
    }

    pub(crate) fn at(path: PropertyPath) -> Self {
        Self {
            path,
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &PropertyPath {
        &self.path
    }
}

impl<E, T> Clone for Property<E, T> {
    fn clone(&self) -> Self {
        Self::at(self.path.clone())
    }
}

impl<E, T> fmt::Debug for Property<E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Property({})", self.path)
    }
}

/// A relationship from `E` to `R`.
pub struct Association<E, R> {
    path: PropertyPath,
    _marker: PhantomData<fn() -> (E, R)>,
}

impl<E, R> Association<E, R> {
    pub fn new(name: &'static str) -> Self {
        Self::at(PropertyPath::new(name))
    }

    pub(crate) fn at(path: PropertyPath) -> Self {
        Self {
            path,
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &PropertyPath {
        &self.path
    }

    /// Continue to a property of the related entity.
    pub fn then<T>(&self, property: Property<R, T>) -> Property<E, T> {
        Property::at(self.path.join(property.path()))
    }

    /// Continue to a relationship of the related entity.
    pub fn assoc<S>(&self, next: Association<R, S>) -> Association<E, S> {
        Association::at(self.path.join(next.path()))
    }
}

impl<E, R> Clone for Association<E, R> {
    fn clone(&self) -> Self {
        Self::at(self.path.clone())
    }
}

impl<E, R> fmt::Debug for Association<E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Association({})", self.path)
    }
}

/// An untyped-value property of `E`, accepted by `select`, `fetch` and ordering.
pub struct Selector<E> {
    path: PropertyPath,
    _marker: PhantomData<fn() -> E>,
}

impl<E> Selector<E> {
    pub fn path(&self) -> &PropertyPath {
        &self.path
    }

    pub(crate) fn into_path(self) -> PropertyPath {
        self.path
    }
}

impl<E, T> From<Property<E, T>> for Selector<E> {
    fn from(property: Property<E, T>) -> Self {
        Self {
            path: property.path,
            _marker: PhantomData,
        }
    }
}

impl<E, T> From<&Property<E, T>> for Selector<E> {
    fn from(property: &Property<E, T>) -> Self {
        Self {
            path: property.path.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E> fmt::Debug for Selector<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({})", self.path)
    }
}
