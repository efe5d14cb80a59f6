//! Normalized query algebra.
//!
//! After normalization a query only contains basic graph patterns, joins,
//! unions, filters, extends and one projection at the root. Property paths
//! and OPTIONAL have been rewritten away.
//!
//! Variables and blank nodes share one namespace of *binding keys*: a
//! variable `?x` is keyed `x`, a blank node `_:b` is keyed `_:b`. SPARQL
//! variable names cannot contain `:`, so the two never collide.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::term::RdfTerm;

/// Prefix of the variables introduced for intermediate path nodes.
pub const PATH_VAR_PREFIX: &str = "__path";

/// True for keys a user wrote in the query, as opposed to blank nodes and
/// path intermediates.
pub fn is_user_key(key: &str) -> bool {
    !key.starts_with("_:") && !key.starts_with(PATH_VAR_PREFIX)
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternTerm {
    Const(RdfTerm),
    Var(String),
    /// Existential, scoped to the BGP it appears in.
    Blank(String),
}

impl PatternTerm {
    pub fn var(name: impl Into<String>) -> Self {
        PatternTerm::Var(name.into())
    }

    pub fn binding_key(&self) -> Option<String> {
        match self {
            PatternTerm::Const(_) => None,
            PatternTerm::Var(v) => Some(v.clone()),
            PatternTerm::Blank(b) => Some(format!("_:{b}")),
        }
    }
}

impl fmt::Display for PatternTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternTerm::Const(t) => t.fmt(f),
            PatternTerm::Var(v) => write!(f, "?{v}"),
            PatternTerm::Blank(b) => write!(f, "_:{b}"),
        }
    }
}

/// One quad pattern. `graph == None` leaves the graph position unconstrained.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryPattern {
    pub subject: PatternTerm,
    pub predicate: PatternTerm,
    pub object: PatternTerm,
    pub graph: Option<PatternTerm>,
}

impl QueryPattern {
    pub fn positions(&self) -> [Option<&PatternTerm>; 4] {
        [
            Some(&self.subject),
            Some(&self.predicate),
            Some(&self.object),
            self.graph.as_ref(),
        ]
    }

    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.positions()
            .into_iter()
            .flatten()
            .filter_map(PatternTerm::binding_key)
    }
}

impl fmt::Display for QueryPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)?;
        if let Some(g) = &self.graph {
            write!(f, " {g}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn holds<T: Ord>(self, a: &T, b: &T) -> bool {
        match self {
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Builtin {
    IsIri,
    IsBlank,
    IsLiteral,
    IsNumeric,
    Str,
    Lang,
    Datatype,
    StrLen,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::IsIri => "isIRI",
            Builtin::IsBlank => "isBlank",
            Builtin::IsLiteral => "isLiteral",
            Builtin::IsNumeric => "isNumeric",
            Builtin::Str => "STR",
            Builtin::Lang => "LANG",
            Builtin::Datatype => "DATATYPE",
            Builtin::StrLen => "STRLEN",
        }
    }
}

/// Filter and BIND expressions the compiler understands.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Expr {
    Const(RdfTerm),
    Var(String),
    Equal(Box<Expr>, Box<Expr>),
    SameTerm(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    In(Box<Expr>, Vec<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    Bound(String),
    Call(Builtin, Box<Expr>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnionKind {
    Plain,
    /// `[left, join]` produced from OPTIONAL; `left` only yields rows that
    /// have no extension in `join`.
    Optional,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Algebra {
    Bgp(Vec<QueryPattern>),
    Join(Box<Algebra>, Box<Algebra>),
    Union {
        branches: Vec<Algebra>,
        kind: UnionKind,
    },
    Filter {
        expr: Expr,
        inner: Box<Algebra>,
    },
    Extend {
        inner: Box<Algebra>,
        variable: String,
        expr: Expr,
        /// Zero-length path step: `expr` reads keys bound anywhere in the
        /// enclosing group, not only in `inner`.
        path_alias: bool,
    },
    Project {
        inner: Box<Algebra>,
        variables: Vec<String>,
    },
}

impl Algebra {
    pub fn empty() -> Self {
        Algebra::Bgp(Vec::new())
    }

    pub fn join(left: Algebra, right: Algebra) -> Self {
        match (left, right) {
            (Algebra::Bgp(mut l), Algebra::Bgp(r)) => {
                l.extend(r);
                Algebra::Bgp(l)
            }
            (l, r) => Algebra::Join(Box::new(l), Box::new(r)),
        }
    }

    /// Plain union; nested plain unions are flattened and a single branch
    /// collapses to itself.
    pub fn union(branches: Vec<Algebra>) -> Self {
        let mut flat = Vec::with_capacity(branches.len());
        for b in branches {
            match b {
                Algebra::Union {
                    branches,
                    kind: UnionKind::Plain,
                } => flat.extend(branches),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.remove(0)
        } else {
            Algebra::Union {
                branches: flat,
                kind: UnionKind::Plain,
            }
        }
    }

    /// Keys that every solution of this node binds.
    pub fn certainly_bound(&self) -> BTreeSet<String> {
        match self {
            Algebra::Bgp(patterns) => patterns.iter().flat_map(QueryPattern::keys).collect(),
            Algebra::Join(l, r) => {
                let mut keys = l.certainly_bound();
                keys.extend(r.certainly_bound());
                keys
            }
            Algebra::Union { branches, .. } => {
                let mut iter = branches.iter().map(Algebra::certainly_bound);
                let first = iter.next().unwrap_or_default();
                iter.fold(first, |acc, keys| acc.intersection(&keys).cloned().collect())
            }
            Algebra::Filter { inner, .. } => inner.certainly_bound(),
            Algebra::Extend {
                inner, variable, ..
            } => {
                let mut keys = inner.certainly_bound();
                keys.insert(variable.clone());
                keys
            }
            Algebra::Project { inner, variables } => {
                let inner = inner.certainly_bound();
                variables
                    .iter()
                    .filter(|v| inner.contains(*v))
                    .cloned()
                    .collect()
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderKey {
    /// The ordering expression in SPARQL syntax.
    pub expression: String,
    pub descending: bool,
}

/// Top-level DISTINCT / REDUCED / ORDER BY / LIMIT / OFFSET. Recorded for
/// post-processing; they do not affect the constraint program.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionModifiers {
    pub distinct: bool,
    pub reduced: bool,
    pub order_by: Vec<OrderKey>,
    pub offset: usize,
    pub limit: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryForm {
    Select,
    Ask,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedQuery {
    pub form: QueryForm,
    /// Always an [`Algebra::Project`].
    pub algebra: Algebra,
    pub projected: Vec<String>,
    pub modifiers: SolutionModifiers,
}
