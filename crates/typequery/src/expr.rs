//! Predicate expression tree.
//!
//! Leaves are appended to the innermost open group; `or()`, `and()` and
//! `not()` open nested groups and the matching `end_*` call closes them. The
//! root is an implicit AND group. Children render in append order.

use crate::error::BuildError;
use crate::property::PropertyPath;
use crate::value::Value;

/// Comparison operators rendered as `col <op> ?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    ILike,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Like => "like",
            CompareOp::ILike => "ilike",
        }
    }
}

/// What a leaf predicate tests.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Compare { op: CompareOp, value: Value },
    /// `lower(col) = ?`
    LowerEq(Value),
    In { values: Vec<Value>, negated: bool },
    Null { negated: bool },
    Between { low: Value, high: Value },
    /// `col >= low and col < high`
    InRange { low: Value, high: Value },
    /// `? = any(col)` on array columns.
    ArrayContains { value: Value, negated: bool },
    ArrayEmpty { negated: bool },
    /// Existence of related rows; `negated` means "has related rows".
    RelationEmpty { negated: bool },
}

impl Op {
    /// Operand values in bind order.
    pub fn operands(&self) -> Vec<&Value> {
        match self {
            Op::Compare { value, .. } | Op::LowerEq(value) | Op::ArrayContains { value, .. } => {
                vec![value]
            }
            Op::In { values, .. } => values.iter().collect(),
            Op::Between { low, high } | Op::InRange { low, high } => vec![low, high],
            Op::Null { .. } | Op::ArrayEmpty { .. } | Op::RelationEmpty { .. } => Vec::new(),
        }
    }
}

/// The column a leaf applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// A property path resolved against the query root.
    Property(PropertyPath),
    /// A raw column on the root table.
    Column(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub target: Target,
    pub op: Op,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Junction {
    And,
    Or,
    Not,
}

impl Junction {
    pub fn name(&self) -> &'static str {
        match self {
            Junction::And => "and",
            Junction::Or => "or",
            Junction::Not => "not",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub junction: Junction,
    pub children: Vec<Expr>,
}

impl Group {
    fn new(junction: Junction) -> Self {
        Self {
            junction,
            children: Vec::new(),
        }
    }

    /// Whether no leaf exists anywhere below this group.
    pub fn is_empty(&self) -> bool {
        self.children.iter().all(|c| match c {
            Expr::Group(g) => g.is_empty(),
            Expr::Leaf(_) | Expr::Raw { .. } => false,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Leaf(Leaf),
    Group(Group),
    /// Caller-supplied SQL with `?` placeholders.
    Raw { sql: String, params: Vec<Value> },
}

/// Expression tree under construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprTree {
    // stack[0] is the root AND group; the last entry receives new children.
    stack: Vec<Group>,
}

impl Default for ExprTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ExprTree {
    pub fn new() -> Self {
        Self {
            stack: vec![Group::new(Junction::And)],
        }
    }

    /// Append to the innermost open group.
    pub fn push(&mut self, expr: Expr) {
        if let Some(top) = self.stack.last_mut() {
            top.children.push(expr);
        }
    }

    pub fn open(&mut self, junction: Junction) {
        self.stack.push(Group::new(junction));
    }

    /// Close the innermost group, which must have the given junction.
    pub fn close(&mut self, junction: Junction) -> Result<(), BuildError> {
        let open = match self.stack.len() {
            0 | 1 => None,
            _ => self.stack.last().map(|g| g.junction),
        };
        match open {
            Some(top) if top == junction => self.close_any(),
            Some(top) => Err(BuildError::InvalidUsage(format!(
                "end_{}() called while a {}() group is open",
                junction.name(),
                top.name()
            ))),
            _ => Err(BuildError::InvalidUsage(format!(
                "end_{}() called without an open {}() group",
                junction.name(),
                junction.name()
            ))),
        }
    }

    /// Close the innermost group whatever its junction.
    pub fn close_any(&mut self) -> Result<(), BuildError> {
        if self.stack.len() < 2 {
            return Err(BuildError::InvalidUsage(
                "end_junction() called without an open group".to_string(),
            ));
        }
        if let Some(group) = self.stack.pop() {
            self.push(Expr::Group(group));
        }
        Ok(())
    }

    /// Number of groups still open below the root.
    pub fn open_depth(&self) -> usize {
        self.stack.len().saturating_sub(1)
    }

    /// The complete tree with any still-open groups closed.
    pub fn root(&self) -> Group {
        let mut stack = self.stack.clone();
        while stack.len() > 1 {
            if let Some(group) = stack.pop() {
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(Expr::Group(group));
                }
            }
        }
        stack.pop().unwrap_or_else(|| Group::new(Junction::And))
    }

    pub fn is_empty(&self) -> bool {
        self.stack.iter().all(Group::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &'static str) -> Expr {
        Expr::Leaf(Leaf {
            target: Target::Property(PropertyPath::new(name)),
            op: Op::Null { negated: false },
        })
    }

    #[test]
    fn groups_nest_in_append_order() {
        let mut tree = ExprTree::new();
        tree.push(leaf("a"));
        tree.open(Junction::Or);
        tree.push(leaf("b"));
        tree.open(Junction::And);
        tree.push(leaf("c"));
        tree.close(Junction::And).unwrap();
        tree.close(Junction::Or).unwrap();

        let root = tree.root();
        assert_eq!(root.children.len(), 2);
        let Expr::Group(or) = &root.children[1] else {
            panic!("expected group");
        };
        assert_eq!(or.junction, Junction::Or);
        assert_eq!(or.children.len(), 2);
        assert!(matches!(&or.children[1], Expr::Group(g) if g.junction == Junction::And));
    }

    #[test]
    fn mismatched_end_is_rejected() {
        let mut tree = ExprTree::new();
        assert!(tree.close(Junction::Or).is_err());
        tree.open(Junction::Or);
        let err = tree.close(Junction::Not).unwrap_err();
        assert!(err.to_string().contains("or() group is open"));
        assert_eq!(tree.open_depth(), 1);
    }

    #[test]
    fn unclosed_groups_fold_into_root() {
        let mut tree = ExprTree::new();
        tree.open(Junction::Not);
        tree.push(leaf("a"));
        let root = tree.root();
        assert_eq!(root.children.len(), 1);
        assert!(!tree.is_empty());
        // root() leaves the builder untouched
        assert_eq!(tree.open_depth(), 1);
    }

    #[test]
    fn empty_groups_count_as_empty() {
        let mut tree = ExprTree::new();
        tree.open(Junction::Or);
        tree.close_any().unwrap();
        assert!(tree.is_empty());
    }
}
