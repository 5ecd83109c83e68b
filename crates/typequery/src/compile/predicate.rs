//! Rendering of the predicate tree into a WHERE clause.

use super::alias::AliasMap;
use crate::error::{OrmError, OrmResult};
use crate::expr::{Expr, Group, Junction, Leaf, Op, Target};
use crate::schema::{EntitySchema, Relation};
use crate::value::Value;

pub(super) struct WhereWriter<'a> {
    pub aliases: &'a AliasMap,
    pub root: &'static EntitySchema,
    /// Skip the soft-delete filter inside relation subqueries.
    pub include_soft_deleted: bool,
    pub params: &'a mut Vec<Value>,
}

impl WhereWriter<'_> {
    /// Render a group; `None` when it holds no predicates.
    pub fn group(&mut self, group: &Group, nested: bool) -> OrmResult<Option<String>> {
        let mut parts = Vec::with_capacity(group.children.len());
        for child in &group.children {
            if let Some(sql) = self.expr(child)? {
                parts.push(sql);
            }
        }
        if parts.is_empty() {
            return Ok(None);
        }
        let sql = match group.junction {
            Junction::And if nested => format!("({})", parts.join(" and ")),
            Junction::And => parts.join(" and "),
            Junction::Or if nested => format!("({})", parts.join(" or ")),
            Junction::Or => parts.join(" or "),
            Junction::Not => format!("not ({})", parts.join(" and ")),
        };
        Ok(Some(sql))
    }

    fn expr(&mut self, expr: &Expr) -> OrmResult<Option<String>> {
        match expr {
            Expr::Leaf(leaf) => self.leaf(leaf).map(Some),
            Expr::Group(group) => self.group(group, true),
            Expr::Raw { sql, params } => {
                self.params.extend(params.iter().cloned());
                Ok(Some(sql.clone()))
            }
        }
    }

    fn leaf(&mut self, leaf: &Leaf) -> OrmResult<String> {
        match &leaf.target {
            Target::Column(column) => self.op(&format!("t0.{column}"), &leaf.op),
            Target::Property(path) => {
                let resolved = self.root.resolve(path.segments())?;
                let owner_alias = self.aliases.alias(&path.parent()).ok_or_else(|| {
                    OrmError::Compilation(format!("no alias assigned for '{}'", path.parent()))
                })?;

                if let Op::RelationEmpty { negated } = leaf.op {
                    let relation = resolved.leaf.relation().ok_or_else(|| {
                        OrmError::Compilation(format!("'{path}' is not a relation"))
                    })?;
                    let soft_delete = relation
                        .target()
                        .soft_delete
                        .filter(|_| !self.include_soft_deleted);
                    return relation_empty(
                        owner_alias,
                        resolved.owner,
                        relation,
                        negated,
                        soft_delete,
                    );
                }
                let column = format!("{owner_alias}.{}", resolved.leaf.column);
                self.op(&column, &leaf.op)
            }
        }
    }

    fn op(&mut self, col: &str, op: &Op) -> OrmResult<String> {
        let sql = match op {
            Op::Compare { op, value } => {
                self.params.push(value.clone());
                format!("{col} {} ?", op.as_sql())
            }
            Op::LowerEq(value) => {
                self.params.push(value.clone());
                format!("lower({col}) = ?")
            }
            Op::In { values, negated } if values.is_empty() => {
                let always = if *negated { "1=1" } else { "1=0" };
                always.to_string()
            }
            Op::In { values, negated } => {
                self.params.extend(values.iter().cloned());
                let placeholders = vec!["?"; values.len()].join(",");
                let not = if *negated { "not " } else { "" };
                format!("{col} {not}in ({placeholders})")
            }
            Op::Null { negated: false } => format!("{col} is null"),
            Op::Null { negated: true } => format!("{col} is not null"),
            Op::Between { low, high } => {
                self.params.push(low.clone());
                self.params.push(high.clone());
                format!("{col} between ? and ?")
            }
            Op::InRange { low, high } => {
                self.params.push(low.clone());
                self.params.push(high.clone());
                format!("({col} >= ? and {col} < ?)")
            }
            Op::ArrayContains { value, negated } => {
                self.params.push(value.clone());
                if *negated {
                    format!("not (? = any({col}))")
                } else {
                    format!("? = any({col})")
                }
            }
            Op::ArrayEmpty { negated } => {
                let cmp = if *negated { "<>" } else { "=" };
                format!("coalesce(cardinality({col}),0) {cmp} 0")
            }
            Op::RelationEmpty { .. } => {
                return Err(OrmError::Compilation(format!(
                    "relation predicate applied to column {col}"
                )));
            }
        };
        Ok(sql)
    }
}

/// Existence test for related rows; soft-deleted targets count as absent.
fn relation_empty(
    owner_alias: &str,
    owner: &'static EntitySchema,
    relation: Relation,
    has_rows: bool,
    soft_delete: Option<&'static str>,
) -> OrmResult<String> {
    let target = relation.target();
    let exists = if has_rows { "exists" } else { "not exists" };
    let live = soft_delete
        .map(|column| format!(" and x.{column} = false"))
        .unwrap_or_default();
    match relation {
        Relation::ToMany { foreign_column, .. } => {
            let pk = owner.primary_key_field()?;
            Ok(format!(
                "{exists} (select 1 from {} x where x.{foreign_column} = {owner_alias}.{}{live})",
                target.table, pk.column
            ))
        }
        Relation::ToOne { local_column, .. } if soft_delete.is_some() => {
            let pk = target.primary_key_field()?;
            Ok(format!(
                "{exists} (select 1 from {} x where x.{} = {owner_alias}.{local_column}{live})",
                target.table, pk.column
            ))
        }
        Relation::ToOne { local_column, .. } => {
            let null = if has_rows { "is not null" } else { "is null" };
            Ok(format!("{owner_alias}.{local_column} {null}"))
        }
    }
}
