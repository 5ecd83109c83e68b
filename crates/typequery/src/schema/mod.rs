//! Read-only entity metadata.
//!
//! Every entity exposes one `'static` [`EntitySchema`] describing its table,
//! its fields in declaration order, its primary key and an optional
//! soft-delete column. Queries never mutate schemas; the compiler and the
//! property nodes only read them.
//!
//! ```ignore
//! static CUSTOMER: EntitySchema = EntitySchema {
//!     name: "Customer",
//!     table: "customer",
//!     primary_key: "id",
//!     soft_delete: Some("deleted"),
//!     fields: &[
//!         FieldMeta::scalar("id", "id", ScalarType::Int),
//!         FieldMeta::scalar("name", "name", ScalarType::Text),
//!         FieldMeta::to_many("contacts", "customer_id", contact_schema),
//!     ],
//! };
//! ```

mod registry;

pub use registry::{EntityRegistration, SchemaIssue, SchemaRegistry};

use crate::error::BuildError;
use crate::value::Value;
use std::fmt;

/// Column type of a scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Bool,
    Int,
    Float,
    Text,
    Timestamp,
    Date,
    Uuid,
    Json,
    /// Text-backed enum with the allowed labels.
    Enum(&'static [&'static str]),
    /// Postgres array of the element type.
    Array(&'static ScalarType),
}

impl ScalarType {
    /// Whether `value` can be bound against a column of this type.
    ///
    /// `Null` is accepted everywhere; nullability is a storage concern.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (ScalarType::Bool, Value::Bool(_)) => true,
            (ScalarType::Int, Value::Int(_)) => true,
            (ScalarType::Float, Value::Float(_) | Value::Int(_)) => true,
            (ScalarType::Text, Value::Text(_)) => true,
            (ScalarType::Timestamp, Value::Timestamp(_)) => true,
            (ScalarType::Date, Value::Date(_)) => true,
            (ScalarType::Uuid, Value::Uuid(_)) => true,
            (ScalarType::Json, Value::Json(_)) => true,
            (ScalarType::Enum(labels), Value::Text(label)) => labels.contains(&label.as_str()),
            (ScalarType::Array(elem), Value::Array(items)) => items.iter().all(|v| elem.accepts(v)),
            _ => false,
        }
    }

    /// Convert an identifier-like value into this type.
    ///
    /// Text values are parsed for integer and uuid keys so that callers can
    /// pass identifiers received as strings.
    pub fn coerce(&self, value: Value) -> Result<Value, Value> {
        match (self, value) {
            (ScalarType::Int, Value::Text(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| Value::Text(s)),
            (ScalarType::Uuid, Value::Text(s)) => uuid::Uuid::parse_str(s.trim())
                .map(Value::Uuid)
                .map_err(|_| Value::Text(s)),
            (ty, v) if ty.accepts(&v) => Ok(v),
            (_, v) => Err(v),
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarType::Bool => f.write_str("bool"),
            ScalarType::Int => f.write_str("int"),
            ScalarType::Float => f.write_str("float"),
            ScalarType::Text => f.write_str("text"),
            ScalarType::Timestamp => f.write_str("timestamp"),
            ScalarType::Date => f.write_str("date"),
            ScalarType::Uuid => f.write_str("uuid"),
            ScalarType::Json => f.write_str("json"),
            ScalarType::Enum(labels) => write!(f, "enum({})", labels.join("|")),
            ScalarType::Array(elem) => write!(f, "{elem}[]"),
        }
    }
}

/// A relationship from one entity to another.
#[derive(Debug, Clone, Copy)]
pub enum Relation {
    /// Many-to-one / one-to-one: the owner row holds the foreign key.
    ToOne {
        target: fn() -> &'static EntitySchema,
        local_column: &'static str,
    },
    /// One-to-many: the target rows hold a foreign key to the owner's primary key.
    ToMany {
        target: fn() -> &'static EntitySchema,
        foreign_column: &'static str,
    },
}

impl Relation {
    pub fn target(&self) -> &'static EntitySchema {
        match self {
            Relation::ToOne { target, .. } | Relation::ToMany { target, .. } => target(),
        }
    }

    pub fn is_to_many(&self) -> bool {
        matches!(self, Relation::ToMany { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    Scalar(ScalarType),
    Relation(Relation),
}

/// One persisted field or relationship.
#[derive(Debug, Clone, Copy)]
pub struct FieldMeta {
    pub name: &'static str,
    /// Column name; empty for relationships, which use their join columns.
    pub column: &'static str,
    pub kind: FieldKind,
}

impl FieldMeta {
    pub const fn scalar(name: &'static str, column: &'static str, ty: ScalarType) -> Self {
        Self {
            name,
            column,
            kind: FieldKind::Scalar(ty),
        }
    }

    pub const fn to_one(
        name: &'static str,
        local_column: &'static str,
        target: fn() -> &'static EntitySchema,
    ) -> Self {
        Self {
            name,
            column: "",
            kind: FieldKind::Relation(Relation::ToOne {
                target,
                local_column,
            }),
        }
    }

    pub const fn to_many(
        name: &'static str,
        foreign_column: &'static str,
        target: fn() -> &'static EntitySchema,
    ) -> Self {
        Self {
            name,
            column: "",
            kind: FieldKind::Relation(Relation::ToMany {
                target,
                foreign_column,
            }),
        }
    }

    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self.kind {
            FieldKind::Scalar(ty) => Some(ty),
            FieldKind::Relation(_) => None,
        }
    }

    pub fn relation(&self) -> Option<Relation> {
        match self.kind {
            FieldKind::Relation(rel) => Some(rel),
            FieldKind::Scalar(_) => None,
        }
    }
}

/// Static metadata for one entity.
#[derive(Debug)]
pub struct EntitySchema {
    pub name: &'static str,
    pub table: &'static str,
    pub fields: &'static [FieldMeta],
    /// Field name of the primary key.
    pub primary_key: &'static str,
    /// Boolean column marking soft-deleted rows.
    pub soft_delete: Option<&'static str>,
}

impl EntitySchema {
    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn scalar_fields(&self) -> impl Iterator<Item = &FieldMeta> {
        self.fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Scalar(_)))
    }

    /// The primary key field.
    pub fn primary_key_field(&self) -> Result<&FieldMeta, BuildError> {
        self.field(self.primary_key)
            .filter(|f| f.scalar_type().is_some())
            .ok_or_else(|| {
                BuildError::InvalidUsage(format!(
                    "entity '{}' declares primary key '{}' which is not a scalar field",
                    self.name, self.primary_key
                ))
            })
    }

    /// Resolve a dotted path: every segment but the last must be a relationship.
    pub fn resolve(&'static self, segments: &[&str]) -> Result<ResolvedPath, BuildError> {
        let unknown = || BuildError::UnknownFieldPath {
            entity: self.name.to_string(),
            path: segments.join("."),
        };
        let (last, hops) = segments.split_last().ok_or_else(unknown)?;

        let mut owner: &'static EntitySchema = self;
        let mut relations = Vec::with_capacity(hops.len());
        for seg in hops {
            let relation = owner
                .field(seg)
                .and_then(FieldMeta::relation)
                .ok_or_else(unknown)?;
            relations.push(relation);
            owner = relation.target();
        }
        let leaf = owner.field(last).ok_or_else(unknown)?;
        Ok(ResolvedPath {
            relations,
            owner,
            leaf,
        })
    }
}

/// Result of resolving a property path against a root schema.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    /// Relationship hops before the leaf, in path order.
    pub relations: Vec<Relation>,
    /// Entity that declares the leaf.
    pub owner: &'static EntitySchema,
    pub leaf: &'static FieldMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    static LABELS: &[&str] = &["NEW", "GOOD"];

    static ORDER: EntitySchema = EntitySchema {
        name: "Order",
        table: "orders",
        fields: &[
            FieldMeta::scalar("id", "id", ScalarType::Int),
            FieldMeta::scalar("status", "status", ScalarType::Enum(LABELS)),
            FieldMeta::to_one("shipTo", "ship_to_id", address),
        ],
        primary_key: "id",
        soft_delete: None,
    };

    static ADDRESS: EntitySchema = EntitySchema {
        name: "Address",
        table: "address",
        fields: &[
            FieldMeta::scalar("id", "id", ScalarType::Int),
            FieldMeta::scalar("city", "city", ScalarType::Text),
        ],
        primary_key: "id",
        soft_delete: None,
    };

    fn address() -> &'static EntitySchema {
        &ADDRESS
    }

    #[test]
    fn enum_accepts_only_declared_labels() {
        let ty = ScalarType::Enum(LABELS);
        assert!(ty.accepts(&Value::Text("GOOD".into())));
        assert!(!ty.accepts(&Value::Text("BAD".into())));
        assert!(!ty.accepts(&Value::Int(1)));
    }

    #[test]
    fn coerce_parses_string_ids() {
        assert_eq!(
            ScalarType::Int.coerce(Value::Text(" 42".into())),
            Ok(Value::Int(42))
        );
        assert!(ScalarType::Int.coerce(Value::Text("x".into())).is_err());
        assert_eq!(ScalarType::Int.coerce(Value::Int(3)), Ok(Value::Int(3)));
    }

    #[test]
    fn resolve_walks_relations() {
        let path = ORDER.resolve(&["shipTo", "city"]).unwrap();
        assert_eq!(path.relations.len(), 1);
        assert_eq!(path.owner.name, "Address");
        assert_eq!(path.leaf.column, "city");
    }

    #[test]
    fn resolve_rejects_scalar_hops_and_unknown_names() {
        assert!(matches!(
            ORDER.resolve(&["status", "city"]),
            Err(BuildError::UnknownFieldPath { .. })
        ));
        assert!(ORDER.resolve(&["nope"]).is_err());
        assert!(ORDER.resolve(&[]).is_err());
    }

    #[test]
    fn array_type_display() {
        static TEXT: ScalarType = ScalarType::Text;
        assert_eq!(ScalarType::Array(&TEXT).to_string(), "text[]");
    }
}
