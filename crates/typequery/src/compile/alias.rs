use crate::error::BuildError;
use crate::property::PropertyPath;
use crate::schema::{EntitySchema, FieldMeta, Relation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "join",
            JoinKind::Left => "left join",
        }
    }
}

/// How an aliased relation path is joined to its parent.
#[derive(Debug, Clone)]
pub struct JoinSpec {
    /// Index of the parent entry in the alias map.
    pub parent: usize,
    pub relation: Relation,
    pub kind: JoinKind,
}

#[derive(Debug, Clone)]
pub struct AliasEntry {
    pub path: PropertyPath,
    pub alias: String,
    pub schema: &'static EntitySchema,
    /// `None` for the root table.
    pub join: Option<JoinSpec>,
}

/// Relation path to table alias, assigned in first-reference order from `t0`.
#[derive(Debug, Clone)]
pub struct AliasMap {
    entries: Vec<AliasEntry>,
}

impl AliasMap {
    pub fn new(root: &'static EntitySchema) -> Self {
        Self {
            entries: vec![AliasEntry {
                path: PropertyPath::root(),
                alias: "t0".to_string(),
                schema: root,
                join: None,
            }],
        }
    }

    pub fn entries(&self) -> &[AliasEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn index_of(&self, path: &PropertyPath) -> Option<usize> {
        self.entries.iter().position(|e| &e.path == path)
    }

    pub fn alias(&self, path: &PropertyPath) -> Option<&str> {
        self.index_of(path).map(|i| self.entries[i].alias.as_str())
    }

    pub fn get(&self, index: usize) -> Option<&AliasEntry> {
        self.entries.get(index)
    }

    /// Whether any joined relation is one-to-many.
    pub fn joins_to_many(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.join.as_ref().is_some_and(|j| j.relation.is_to_many()))
    }

    /// Alias `path` and every prefix of it; existing aliases keep their join kind.
    pub(crate) fn ensure(&mut self, path: &PropertyPath, kind: JoinKind) -> Result<usize, BuildError> {
        if let Some(index) = self.index_of(path) {
            return Ok(index);
        }
        let parent = self.ensure(&path.parent(), kind)?;
        let unknown = || BuildError::UnknownFieldPath {
            entity: self.entries[0].schema.name.to_string(),
            path: path.to_string(),
        };
        let name = path.last().ok_or_else(unknown)?;
        let owner = self.entries[parent].schema;
        let relation = owner
            .field(name)
            .and_then(FieldMeta::relation)
            .ok_or_else(unknown)?;

        let index = self.entries.len();
        self.entries.push(AliasEntry {
            path: path.clone(),
            alias: format!("t{index}"),
            schema: relation.target(),
            join: Some(JoinSpec {
                parent,
                relation,
                kind,
            }),
        });
        Ok(index)
    }
}
