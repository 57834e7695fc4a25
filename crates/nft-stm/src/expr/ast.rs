//! Expression AST
//!
//! Produced by the parser, consumed by the evaluator and by configuration
//! validation (which needs every attribute an expression mentions).

use serde_json::Value;
use std::collections::BTreeSet;

/// A value reference inside an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Attribute lookup by name.
    Attr(String),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn is_ordering(&self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Boolean guard of a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Guard {
    /// A lone operand, tested for truthiness.
    Truthy(Operand),
    Compare {
        lhs: Operand,
        op: CmpOp,
        rhs: Operand,
    },
    Present(String),
    Absent(String),
    Not(Box<Guard>),
    And(Vec<Guard>),
    Or(Vec<Guard>),
}

impl Guard {
    /// Every attribute name the guard reads.
    pub fn attributes(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_attributes(&mut out);
        out
    }

    fn collect_attributes<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Guard::Truthy(operand) => operand.collect_attribute(out),
            Guard::Compare { lhs, rhs, .. } => {
                lhs.collect_attribute(out);
                rhs.collect_attribute(out);
            }
            Guard::Present(name) | Guard::Absent(name) => {
                out.insert(name.as_str());
            }
            Guard::Not(inner) => inner.collect_attributes(out),
            Guard::And(items) | Guard::Or(items) => {
                for item in items {
                    item.collect_attributes(out);
                }
            }
        }
    }

    /// Every `attribute <op> literal` comparison, normalized so the attribute
    /// is on the left.
    pub fn attribute_comparisons(&self) -> Vec<(&str, CmpOp, &Value)> {
        let mut out = Vec::new();
        self.collect_comparisons(&mut out);
        out
    }

    fn collect_comparisons<'a>(&'a self, out: &mut Vec<(&'a str, CmpOp, &'a Value)>) {
        match self {
            Guard::Compare { lhs, op, rhs } => match (lhs, rhs) {
                (Operand::Attr(name), Operand::Literal(v))
                | (Operand::Literal(v), Operand::Attr(name)) => out.push((name.as_str(), *op, v)),
                _ => {}
            },
            Guard::Not(inner) => inner.collect_comparisons(out),
            Guard::And(items) | Guard::Or(items) => {
                for item in items {
                    item.collect_comparisons(out);
                }
            }
            Guard::Truthy(_) | Guard::Present(_) | Guard::Absent(_) => {}
        }
    }
}

impl Operand {
    fn collect_attribute<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        if let Operand::Attr(name) = self {
            out.insert(name.as_str());
        }
    }
}

/// Right-hand side of an assignment: one operand, or several joined by `+`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueExpr {
    pub terms: Vec<Operand>,
}

impl ValueExpr {
    /// The literal value, when the expression is a single literal.
    pub fn as_literal(&self) -> Option<&Value> {
        match self.terms.as_slice() {
            [Operand::Literal(v)] => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Set { target: String, value: ValueExpr },
    Clear(String),
}

impl Statement {
    pub fn target(&self) -> &str {
        match self {
            Statement::Set { target, .. } => target,
            Statement::Clear(target) => target,
        }
    }
}

/// Side effect of a transition: statements applied in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub statements: Vec<Statement>,
}

impl Action {
    /// Every attribute name the action reads or writes.
    pub fn attributes(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        for stmt in &self.statements {
            out.insert(stmt.target());
            if let Statement::Set { value, .. } = stmt {
                for term in &value.terms {
                    term.collect_attribute(&mut out);
                }
            }
        }
        out
    }
}
