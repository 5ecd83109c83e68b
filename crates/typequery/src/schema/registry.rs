use super::{EntitySchema, FieldKind};
use std::collections::BTreeMap;
use std::fmt;

/// Registration entry for auto-registering entities.
///
/// Generated code submits one of these per entity through [`crate::register_entity!`].
pub struct EntityRegistration {
    /// Returns the entity's schema.
    pub schema_fn: fn() -> &'static EntitySchema,
}

impl EntityRegistration {
    pub const fn new(schema_fn: fn() -> &'static EntitySchema) -> Self {
        Self { schema_fn }
    }
}

inventory::collect!(EntityRegistration);

/// Register an [`crate::Entity`] with the global [`SchemaRegistry`].
///
/// ```ignore
/// typequery::register_entity!(Customer);
/// ```
#[macro_export]
macro_rules! register_entity {
    ($entity:ty) => {
        $crate::inventory::submit! {
            $crate::schema::EntityRegistration::new(<$entity as $crate::Entity>::schema)
        }
    };
}

/// Lookup of entity schemas by name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entities: BTreeMap<&'static str, &'static EntitySchema>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from every entity registered with [`crate::register_entity!`].
    pub fn from_inventory() -> Self {
        let mut registry = Self::new();
        for reg in inventory::iter::<EntityRegistration> {
            registry.register((reg.schema_fn)());
        }
        registry
    }

    /// Register a schema. A later schema with the same name replaces the earlier one.
    pub fn register(&mut self, schema: &'static EntitySchema) {
        self.entities.insert(schema.name, schema);
    }

    /// Register an entity type.
    pub fn register_entity<E: crate::Entity>(&mut self) {
        self.register(E::schema());
    }

    pub fn schema_for(&self, name: &str) -> Option<&'static EntitySchema> {
        self.entities.get(name).copied()
    }

    pub fn schemas(&self) -> impl Iterator<Item = &'static EntitySchema> + '_ {
        self.entities.values().copied()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Check structural consistency of every registered schema.
    ///
    /// Reports missing or non-scalar primary keys, soft-delete columns that are
    /// not boolean fields, duplicate field names and relationships whose target
    /// entity is not registered.
    pub fn validate(&self) -> Vec<SchemaIssue> {
        let mut issues = Vec::new();
        for schema in self.entities.values() {
            let mut push = |message: String| {
                issues.push(SchemaIssue {
                    entity: schema.name,
                    message,
                })
            };

            if let Err(e) = schema.primary_key_field() {
                push(e.to_string());
            }

            if let Some(col) = schema.soft_delete {
                let is_bool = schema.fields.iter().any(|f| {
                    f.column == col && matches!(f.kind, FieldKind::Scalar(super::ScalarType::Bool))
                });
                if !is_bool {
                    push(format!("soft-delete column '{col}' is not a bool field"));
                }
            }

            for (i, field) in schema.fields.iter().enumerate() {
                if schema.fields[..i].iter().any(|f| f.name == field.name) {
                    push(format!("duplicate field '{}'", field.name));
                }
                if let FieldKind::Relation(rel) = field.kind {
                    let target = rel.target();
                    if !self.entities.contains_key(target.name) {
                        push(format!(
                            "relation '{}' targets unregistered entity '{}'",
                            field.name, target.name
                        ));
                    }
                }
            }
        }
        issues
    }
}

/// A schema consistency problem found by [`SchemaRegistry::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIssue {
    pub entity: &'static str,
    pub message: String,
}

impl fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.entity, self.message)
    }
}
