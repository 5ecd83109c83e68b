use crate::entity::Record;
use crate::error::{OrmError, OrmResult};
use crate::property::PropertyPath;
use crate::schema::EntitySchema;
use crate::storage::Row;

/// One entity materialized per row: the root or a joined to-one relation.
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub path: PropertyPath,
    pub schema: &'static EntitySchema,
    pub parent: Option<usize>,
    /// Relation field on the parent that this node fills.
    pub relation: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Field(&'static str),
    /// Foreign key linking a secondary-fetch row to its owner.
    Link,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectItem {
    pub node: usize,
    pub slot: Slot,
}

/// Maps selected columns, by position, onto nested records.
#[derive(Debug, Clone)]
pub struct SelectPlan {
    pub(crate) nodes: Vec<PlanNode>,
    pub(crate) items: Vec<SelectItem>,
}

impl SelectPlan {
    pub(crate) fn new(root: &'static EntitySchema) -> Self {
        Self {
            nodes: vec![PlanNode {
                path: PropertyPath::root(),
                schema: root,
                parent: None,
                relation: None,
            }],
            items: Vec::new(),
        }
    }

    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    pub fn items(&self) -> &[SelectItem] {
        &self.items
    }

    pub(crate) fn node_index(&self, path: &PropertyPath) -> Option<usize> {
        self.nodes.iter().position(|n| &n.path == path)
    }

    pub(crate) fn add_node(&mut self, node: PlanNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub(crate) fn add_item(&mut self, node: usize, slot: Slot) {
        self.items.push(SelectItem { node, slot });
    }

    /// Build the root record for one row.
    ///
    /// A joined relation whose primary key is null (no matching row in a left
    /// join) is attached as an empty relation.
    pub(crate) fn assemble(&self, row: &Row) -> OrmResult<Record> {
        if row.len() < self.items.len() {
            return Err(OrmError::decode(
                "<row>",
                format!("expected {} columns, got {}", self.items.len(), row.len()),
            ));
        }

        let mut records: Vec<Record> = self.nodes.iter().map(|_| Record::new()).collect();
        for (item, value) in self.items.iter().zip(row.values()) {
            let record = &mut records[item.node];
            match item.slot {
                Slot::Field(name) => record.insert(name, value.clone()),
                Slot::Link => record.link = Some(value.clone()),
            }
        }

        // children always follow their parent, so fold back to front
        for index in (1..self.nodes.len()).rev() {
            let node = &self.nodes[index];
            let record = std::mem::take(&mut records[index]);
            let present = record
                .value(node.schema.primary_key)
                .is_some_and(|v| !v.is_null());
            if let (Some(parent), Some(relation)) = (node.parent, node.relation) {
                let related = if present { vec![record] } else { Vec::new() };
                records[parent].attach(relation, related);
            }
        }

        records
            .into_iter()
            .next()
            .ok_or_else(|| OrmError::Compilation("select plan has no root".to_string()))
    }
}
