//! Descriptor to SQL compilation.
//!
//! Compilation is a pure function of the [`QueryDescriptor`]: it assigns
//! table aliases, renders the select list, joins, WHERE clause, ordering,
//! paging and locking, and collects bind parameters in placeholder order.
//! Compiling the same descriptor twice yields byte-identical SQL.
//!
//! Statements use `?` placeholders; storage adapters rewrite them to the
//! driver's syntax (see [`to_numbered_placeholders`]).

mod alias;
mod plan;
mod predicate;


pub use alias::{AliasEntry, AliasMap, JoinKind, JoinSpec};
pub use plan::{PlanNode, SelectItem, SelectPlan, Slot};

use crate::error::{BuildError, OrmError, OrmResult};
use crate::expr::{Expr, Group, Leaf, Target};
use crate::property::PropertyPath;
use crate::query::{Direction, FetchSpec, LockMode, OrderTerm, QueryDescriptor};
use crate::schema::{EntitySchema, FieldMeta, Relation};
use crate::value::Value;
use predicate::WhereWriter;

/// What the statement selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Root columns plus joined to-one fetches.
    Entities,
    /// Primary keys only.
    Ids,
    /// The single selected property.
    SingleAttribute,
    /// `count(*)` over the same predicate, without ordering, paging or locking.
    Count,
}

/// A to-many relation loaded by follow-up queries keyed on owner ids.
#[derive(Debug, Clone)]
pub struct SecondaryFetch {
    /// Path of the owning records, relative to the query root.
    pub owner: PropertyPath,
    pub relation: &'static str,
    /// Primary key field of the owner.
    pub owner_key: &'static str,
    /// Child query without its owner-key filter.
    pub template: QueryDescriptor,
}

/// SQL text, ordered parameters and the plan to read rows back.
#[derive(Debug, Clone)]
pub struct CompiledStatement {
    sql: String,
    params: Vec<Value>,
    aliases: AliasMap,
    plan: SelectPlan,
    secondary: Vec<SecondaryFetch>,
}

impl CompiledStatement {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn aliases(&self) -> &AliasMap {
        &self.aliases
    }

    pub fn plan(&self) -> &SelectPlan {
        &self.plan
    }

    pub fn secondary_fetches(&self) -> &[SecondaryFetch] {
        &self.secondary
    }

    /// SQL with `$1, $2, ...` placeholders.
    pub fn numbered_sql(&self) -> String {
        to_numbered_placeholders(&self.sql)
    }
}

/// Compile a descriptor into a statement of the given shape.
pub fn compile(desc: &QueryDescriptor, shape: Shape) -> OrmResult<CompiledStatement> {
    if let Some(err) = &desc.build_error {
        return Err(err.clone().into());
    }
    Compiler::new(desc).run(shape)
}

struct Compiler<'a> {
    desc: &'a QueryDescriptor,
    aliases: AliasMap,
    params: Vec<Value>,
}

impl<'a> Compiler<'a> {
    fn new(desc: &'a QueryDescriptor) -> Self {
        Self {
            desc,
            aliases: AliasMap::new(desc.schema),
            params: Vec::new(),
        }
    }

    fn run(mut self, shape: Shape) -> OrmResult<CompiledStatement> {
        let root = self.desc.schema;
        let mut plan = SelectPlan::new(root);
        let mut secondary = Vec::new();
        let mut joined = Vec::new();

        match shape {
            Shape::Entities => {
                let (j, s) = self.plan_fetches()?;
                joined = j;
                secondary = s;
                for spec in &joined {
                    self.aliases.ensure(&spec.path, JoinKind::Left)?;
                }
            }
            Shape::SingleAttribute => {
                let path = self.single_attribute()?;
                self.aliases.ensure(&path.parent(), JoinKind::Left)?;
            }
            Shape::Ids | Shape::Count => {}
        }

        // predicates across one-to-many paths filter root keys in a subquery
        let root_tree = self.desc.predicates.root();
        let semi_join = crosses_to_many(root, &root_tree)?;
        if !semi_join {
            alias_predicates(&mut self.aliases, &root_tree)?;
        }
        if shape != Shape::Count {
            let desc = self.desc;
            for term in &desc.order_by {
                self.alias_order(&term.path)?;
            }
        }

        let where_sql = self.where_clause(&root_tree, semi_join)?;
        let distinct = self.desc.distinct;

        let sql = match shape {
            Shape::Count => self.count_sql(&where_sql)?,
            _ => {
                let columns = match shape {
                    Shape::Entities => self.entity_columns(&mut plan, &joined)?,
                    Shape::Ids => {
                        let pk = root.primary_key_field()?;
                        plan.add_item(0, Slot::Field(pk.name));
                        vec![format!("t0.{}", pk.column)]
                    }
                    _ => {
                        let path = self.single_attribute()?;
                        let column = self.column_of(&path)?;
                        plan.add_item(0, Slot::Field(path.last().unwrap_or_default()));
                        vec![column]
                    }
                };
                if distinct {
                    self.check_distinct(&columns)?;
                }
                let mut sql = String::with_capacity(128);
                sql.push_str("select ");
                if distinct {
                    sql.push_str("distinct ");
                }
                sql.push_str(&columns.join(", "));
                self.push_from(&mut sql)?;
                sql.push_str(&where_sql);
                self.push_order(&mut sql)?;
                self.push_paging(&mut sql);
                self.push_lock(&mut sql);
                sql
            }
        };

        Ok(CompiledStatement {
            sql,
            params: self.params,
            aliases: self.aliases,
            plan,
            secondary,
        })
    }

    fn single_attribute(&self) -> OrmResult<PropertyPath> {
        match self.desc.projection.as_slice() {
            [path] => Ok(path.clone()),
            other => Err(BuildError::InvalidUsage(format!(
                "single attribute queries need exactly one selected property, found {}",
                other.len()
            ))
            .into()),
        }
    }

    /// Alias the relations an ORDER BY term walks through.
    fn alias_order(&mut self, path: &PropertyPath) -> OrmResult<()> {
        let resolved = self.desc.schema.resolve(path.segments())?;
        if resolved.relations.iter().any(Relation::is_to_many) {
            return Err(BuildError::InvalidUsage(format!(
                "cannot order by '{path}': it crosses a one-to-many relation"
            ))
            .into());
        }
        self.aliases.ensure(&path.parent(), JoinKind::Left)?;
        Ok(())
    }

    /// Postgres rejects `distinct` with row locks and with ORDER BY columns
    /// outside the select list.
    fn check_distinct(&self, columns: &[String]) -> OrmResult<()> {
        if self.desc.lock.is_locking() {
            return Err(BuildError::InvalidUsage(
                "for update cannot be combined with set_distinct".to_string(),
            )
            .into());
        }
        for term in &self.desc.order_by {
            let column = self.column_of(&term.path)?;
            if !columns.contains(&column) {
                return Err(BuildError::InvalidUsage(format!(
                    "order by '{}' must be selected when set_distinct is on",
                    term.path
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Split the fetch graph into joined to-one paths and secondary to-many loads.
    fn plan_fetches(&self) -> OrmResult<(Vec<FetchSpec>, Vec<SecondaryFetch>)> {
        let root = self.desc.schema;

        // nested select paths first, then explicit fetches
        let mut merged: Vec<FetchSpec> = Vec::new();
        for path in self.desc.projection.iter().filter(|p| p.len() > 1) {
            merge_fetch(&mut merged, path.parent(), path.last().into_iter().collect());
        }
        for spec in &self.desc.fetches {
            merge_fetch(&mut merged, spec.path.clone(), spec.props.clone());
        }

        // every intermediate relation is loaded before its children
        let mut ordered: Vec<FetchSpec> = Vec::new();
        for spec in merged {
            for n in 1..spec.path.len() {
                let prefix = spec.path.prefix(n);
                if !ordered.iter().any(|f| f.path == prefix) {
                    ordered.push(FetchSpec {
                        path: prefix,
                        props: Vec::new(),
                    });
                }
            }
            merge_fetch(&mut ordered, spec.path, spec.props);
        }

        let mut joined = Vec::new();
        let mut secondary: Vec<SecondaryFetch> = Vec::new();
        for spec in ordered {
            let resolved = root.resolve(spec.path.segments())?;
            let mut hops = resolved.relations.clone();
            hops.extend(resolved.leaf.relation());

            let Some(k) = hops.iter().position(|r| r.is_to_many()) else {
                joined.push(spec);
                continue;
            };

            let owner = spec.path.prefix(k);
            let relation_path = spec.path.prefix(k + 1);
            if spec.path == relation_path {
                let relation = hops[k];
                let owner_schema = resolve_entity(root, &owner)?;
                let Relation::ToMany { foreign_column, .. } = relation else {
                    return Err(OrmError::Compilation(format!(
                        "'{relation_path}' is not a one-to-many relation"
                    )));
                };
                let target = relation.target();
                let mut template = QueryDescriptor::new(target);
                template.projection = spec.props.iter().map(|p| PropertyPath::new(*p)).collect();
                template.include_soft_deleted = self.desc.include_soft_deleted;
                template.fetch_batch_size = self.desc.fetch_batch_size;
                template.label = self.desc.label.clone();
                template.link_column = Some(foreign_column);
                template.order_by = vec![OrderTerm {
                    path: PropertyPath::new(target.primary_key),
                    direction: Direction::Asc,
                }];
                secondary.push(SecondaryFetch {
                    owner,
                    relation: spec.path.last().unwrap_or_default(),
                    owner_key: owner_schema.primary_key_field()?.name,
                    template,
                });
            } else {
                let parent = secondary
                    .iter_mut()
                    .find(|s| s.owner.child(s.relation) == relation_path)
                    .ok_or_else(|| {
                        OrmError::Compilation(format!("fetch of '{relation_path}' was not planned"))
                    })?;
                if let Some(rest) = spec.path.strip_prefix(&relation_path) {
                    merge_fetch(&mut parent.template.fetches, rest, spec.props);
                }
            }
        }
        Ok((joined, secondary))
    }

    fn entity_columns(&self, plan: &mut SelectPlan, joined: &[FetchSpec]) -> OrmResult<Vec<String>> {
        let root = self.desc.schema;
        let mut columns = Vec::new();

        let root_props: Vec<&'static str> = self
            .desc
            .projection
            .iter()
            .filter(|p| p.len() == 1)
            .filter_map(PropertyPath::last)
            .collect();
        let root_fields = if self.desc.projection.is_empty() {
            root.scalar_fields().collect()
        } else {
            pruned_fields(root, &root_props)?
        };
        for field in root_fields {
            columns.push(format!("t0.{}", field.column));
            plan.add_item(0, Slot::Field(field.name));
        }
        if let Some(link) = self.desc.link_column {
            columns.push(format!("t0.{link}"));
            plan.add_item(0, Slot::Link);
        }

        for spec in joined {
            let entry = self
                .aliases
                .index_of(&spec.path)
                .and_then(|i| self.aliases.get(i))
                .ok_or_else(|| OrmError::Compilation(format!("no alias for '{}'", spec.path)))?;
            let parent = plan.node_index(&spec.path.parent()).ok_or_else(|| {
                OrmError::Compilation(format!("fetch parent of '{}' is not selected", spec.path))
            })?;
            let node = plan.add_node(PlanNode {
                path: spec.path.clone(),
                schema: entry.schema,
                parent: Some(parent),
                relation: spec.path.last(),
            });
            let fields = if spec.props.is_empty() {
                entry.schema.scalar_fields().collect()
            } else {
                pruned_fields(entry.schema, &spec.props)?
            };
            for field in fields {
                columns.push(format!("{}.{}", entry.alias, field.column));
                plan.add_item(node, Slot::Field(field.name));
            }
        }
        Ok(columns)
    }

    fn column_of(&self, path: &PropertyPath) -> OrmResult<String> {
        let resolved = self.desc.schema.resolve(path.segments())?;
        let alias = self
            .aliases
            .alias(&path.parent())
            .ok_or_else(|| OrmError::Compilation(format!("no alias for '{}'", path.parent())))?;
        Ok(format!("{alias}.{}", resolved.leaf.column))
    }

    fn push_from(&self, sql: &mut String) -> OrmResult<()> {
        render_from(&self.aliases, self.desc.include_soft_deleted, sql)
    }

    /// ` where ...` or empty; binds parameters in placeholder order.
    fn where_clause(&mut self, tree: &Group, semi_join: bool) -> OrmResult<String> {
        let root = self.desc.schema;
        let include_soft_deleted = self.desc.include_soft_deleted;
        let mut parts = Vec::new();

        if let Some(ids) = &self.desc.id_filter {
            let pk = root.primary_key_field()?;
            if ids.is_empty() {
                parts.push("1=0".to_string());
            } else {
                self.params.extend(ids.iter().cloned());
                let placeholders = vec!["?"; ids.len()].join(",");
                parts.push(format!("t0.{} in ({placeholders})", pk.column));
            }
        }

        if semi_join {
            let mut inner = AliasMap::new(root);
            alias_predicates(&mut inner, tree)?;
            let mut writer = WhereWriter {
                aliases: &inner,
                root,
                include_soft_deleted,
                params: &mut self.params,
            };
            if let Some(sql) = writer.group(tree, false)? {
                let pk = root.primary_key_field()?.column;
                let mut from = String::new();
                render_from(&inner, include_soft_deleted, &mut from)?;
                parts.push(format!("t0.{pk} in (select t0.{pk}{from} where {sql})"));
            }
        } else {
            let mut writer = WhereWriter {
                aliases: &self.aliases,
                root,
                include_soft_deleted,
                params: &mut self.params,
            };
            if let Some(sql) = writer.group(tree, false)? {
                parts.push(sql);
            }
        }

        if let (Some(column), false) = (root.soft_delete, include_soft_deleted) {
            parts.push(format!("t0.{column} = false"));
        }

        if parts.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!(" where {}", parts.join(" and ")))
        }
    }

    fn push_order(&self, sql: &mut String) -> OrmResult<()> {
        if self.desc.order_by.is_empty() {
            return Ok(());
        }
        let mut terms = Vec::with_capacity(self.desc.order_by.len());
        for term in &self.desc.order_by {
            let column = self.column_of(&term.path)?;
            terms.push(match term.direction {
                Direction::Asc => column,
                Direction::Desc => format!("{column} desc"),
            });
        }
        sql.push_str(" order by ");
        sql.push_str(&terms.join(", "));
        Ok(())
    }

    /// `max_rows` of zero means no limit.
    fn push_paging(&self, sql: &mut String) {
        if let Some(max) = self.desc.max_rows.filter(|n| *n > 0) {
            sql.push_str(&format!(" limit {max}"));
        }
        if let Some(first) = self.desc.first_row.filter(|n| *n > 0) {
            sql.push_str(&format!(" offset {first}"));
        }
    }

    fn push_lock(&self, sql: &mut String) {
        let suffix = match self.desc.lock {
            LockMode::None => return,
            LockMode::ForUpdate => "",
            LockMode::ForUpdateNoWait => " nowait",
            LockMode::ForUpdateSkipLocked => " skip locked",
        };
        sql.push_str(" for update");
        if self.aliases.len() > 1 {
            sql.push_str(" of t0");
        }
        sql.push_str(suffix);
    }

    fn count_sql(&self, where_sql: &str) -> OrmResult<String> {
        let root = self.desc.schema;
        let mut from = String::new();
        self.push_from(&mut from)?;

        if self.desc.distinct {
            let root_props: Vec<&'static str> = self
                .desc
                .projection
                .iter()
                .filter(|p| p.len() == 1)
                .filter_map(PropertyPath::last)
                .collect();
            let fields = if self.desc.projection.is_empty() {
                root.scalar_fields().collect()
            } else {
                pruned_fields(root, &root_props)?
            };
            let columns: Vec<String> = fields.iter().map(|f| format!("t0.{}", f.column)).collect();
            Ok(format!(
                "select count(*) from (select distinct {}{from}{where_sql}) c",
                columns.join(", ")
            ))
        } else {
            Ok(format!("select count(*){from}{where_sql}"))
        }
    }
}

/// ` from <root> t0` plus a join for every aliased relation.
///
/// Joined entities with a soft-delete column are filtered in the join
/// condition, so a deleted target behaves like a missing one.
fn render_from(
    aliases: &AliasMap,
    include_soft_deleted: bool,
    sql: &mut String,
) -> OrmResult<()> {
    let root = aliases
        .get(0)
        .ok_or_else(|| OrmError::Compilation("alias map has no root".to_string()))?;
    sql.push_str(" from ");
    sql.push_str(root.schema.table);
    sql.push(' ');
    sql.push_str(&root.alias);
    for entry in aliases.entries() {
        let Some(join) = &entry.join else {
            continue;
        };
        let parent = aliases
            .get(join.parent)
            .ok_or_else(|| OrmError::Compilation(format!("dangling join for '{}'", entry.path)))?;
        let mut on = match join.relation {
            Relation::ToOne { local_column, .. } => format!(
                "{}.{} = {}.{local_column}",
                entry.alias,
                entry.schema.primary_key_field()?.column,
                parent.alias
            ),
            Relation::ToMany { foreign_column, .. } => format!(
                "{}.{foreign_column} = {}.{}",
                entry.alias,
                parent.alias,
                parent.schema.primary_key_field()?.column
            ),
        };
        if let (Some(column), false) = (entry.schema.soft_delete, include_soft_deleted) {
            on.push_str(&format!(" and {}.{column} = false", entry.alias));
        }
        sql.push_str(&format!(
            " {} {} {} on {on}",
            join.kind.as_sql(),
            entry.schema.table,
            entry.alias
        ));
    }
    Ok(())
}

/// Alias the relation paths predicates walk through; they join inner.
fn alias_predicates(aliases: &mut AliasMap, group: &Group) -> OrmResult<()> {
    for child in &group.children {
        match child {
            Expr::Leaf(leaf) => {
                if let Target::Property(path) = &leaf.target {
                    aliases.ensure(&path.parent(), JoinKind::Inner)?;
                }
            }
            Expr::Group(g) => alias_predicates(aliases, g)?,
            Expr::Raw { .. } => {}
        }
    }
    Ok(())
}

/// Whether any predicate reaches its column through a one-to-many hop.
fn crosses_to_many(root: &'static EntitySchema, group: &Group) -> OrmResult<bool> {
    for child in &group.children {
        let crosses = match child {
            Expr::Leaf(Leaf {
                target: Target::Property(path),
                ..
            }) => root
                .resolve(path.segments())?
                .relations
                .iter()
                .any(Relation::is_to_many),
            Expr::Group(g) => crosses_to_many(root, g)?,
            Expr::Leaf(_) | Expr::Raw { .. } => false,
        };
        if crosses {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Primary key plus the named scalar fields, in request order.
fn pruned_fields(
    schema: &'static EntitySchema,
    props: &[&'static str],
) -> OrmResult<Vec<&'static FieldMeta>> {
    let pk = schema.primary_key_field()?;
    let mut fields = vec![pk];
    for name in props {
        let field = schema
            .field(name)
            .filter(|f| f.scalar_type().is_some())
            .ok_or_else(|| BuildError::UnknownFieldPath {
                entity: schema.name.to_string(),
                path: (*name).to_string(),
            })?;
        if !fields.iter().any(|f| f.name == field.name) {
            fields.push(field);
        }
    }
    Ok(fields)
}

fn resolve_entity(
    root: &'static EntitySchema,
    path: &PropertyPath,
) -> OrmResult<&'static EntitySchema> {
    if path.is_root() {
        return Ok(root);
    }
    let resolved = root.resolve(path.segments())?;
    resolved
        .leaf
        .relation()
        .map(|r| r.target())
        .ok_or_else(|| OrmError::Compilation(format!("'{path}' is not a relation")))
}

/// Union `props` into the fetch of `path`; an empty list means every property.
pub(crate) fn merge_fetch(list: &mut Vec<FetchSpec>, path: PropertyPath, props: Vec<&'static str>) {
    match list.iter_mut().find(|f| f.path == path) {
        Some(existing) if existing.props.is_empty() => {}
        Some(existing) if props.is_empty() => existing.props.clear(),
        Some(existing) => {
            for p in props {
                if !existing.props.contains(&p) {
                    existing.props.push(p);
                }
            }
        }
        None => list.push(FetchSpec { path, props }),
    }
}

/// Number of `?` placeholders outside quoted literals and identifiers.
pub(crate) fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    scan_placeholders(sql, |_| count += 1);
    count
}

/// Rewrite `?` placeholders to `$1, $2, ...`, leaving quoted text untouched.
pub fn to_numbered_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0;
    let mut last = 0;
    scan_placeholders(sql, |pos| {
        n += 1;
        out.push_str(&sql[last..pos]);
        out.push('$');
        out.push_str(&n.to_string());
        last = pos + 1;
    });
    out.push_str(&sql[last..]);
    out
}

fn scan_placeholders(sql: &str, mut on_placeholder: impl FnMut(usize)) {
    let mut quote: Option<char> = None;
    for (pos, c) in sql.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '?') => on_placeholder(pos),
            (None, _) => {}
        }
    }
}
