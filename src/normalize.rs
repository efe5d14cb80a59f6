//! SPARQL algebra → [`Algebra`].
//!
//! Property paths are unrolled into joins and unions, OPTIONAL becomes an
//! optional union, GRAPH pushes its name into the graph slot of every
//! pattern below it. Everything outside the supported fragment is rejected
//! with [`Error::UnsupportedFeature`].

use std::collections::BTreeMap;

use spargebra::algebra::{Expression, Function, GraphPattern, OrderExpression, PropertyPathExpression};
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};
use spargebra::{Query, SparqlParser};
use tracing::debug;

use crate::algebra::{
    Algebra, Builtin, CompareOp, Expr, NormalizedQuery, OrderKey, PATH_VAR_PREFIX, PatternTerm,
    QueryForm, QueryPattern, SolutionModifiers, UnionKind,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::encoding::{self, INTEGER_TYPES, NUMERIC_TYPES};
use crate::term::{RdfTerm, XSD};

pub fn parse_query(text: &str) -> Result<Query> {
    SparqlParser::new()
        .parse_query(text)
        .map_err(|e| Error::Parse(e.to_string()))
}

pub fn normalize(query: &Query, config: &Config) -> Result<NormalizedQuery> {
    Normalizer::new(config.max_path_hops).query(query)
}

/// Parses and normalizes in one step.
pub fn normalize_str(text: &str, config: &Config) -> Result<NormalizedQuery> {
    normalize(&parse_query(text)?, config)
}

struct Normalizer {
    max_path_hops: usize,
    // Local to one normalization, so output only depends on the input.
    fresh: usize,
    // Parser-assigned blank node labels -> `b{n}` in order of appearance.
    blanks: BTreeMap<String, String>,
}

impl Normalizer {
    fn new(max_path_hops: usize) -> Self {
        Self {
            max_path_hops,
            fresh: 0,
            blanks: BTreeMap::new(),
        }
    }

    fn blank(&mut self, label: &str) -> PatternTerm {
        let next = self.blanks.len();
        let name = self
            .blanks
            .entry(label.to_string())
            .or_insert_with(|| format!("b{next}"));
        PatternTerm::Blank(name.clone())
    }

    fn term_pattern(&mut self, tp: &TermPattern) -> Result<PatternTerm> {
        match tp {
            TermPattern::NamedNode(nn) => Ok(PatternTerm::Const(RdfTerm::from_named_node(nn))),
            TermPattern::Literal(l) => Ok(PatternTerm::Const(RdfTerm::from_literal(l))),
            TermPattern::BlankNode(b) => Ok(self.blank(b.as_str())),
            TermPattern::Variable(v) => variable(v.as_str()),
            #[allow(unreachable_patterns)]
            _ => Err(Error::unsupported("triple terms in patterns")),
        }
    }

    fn triple_pattern(&mut self, tp: &TriplePattern, graph: Option<&PatternTerm>) -> Result<QueryPattern> {
        Ok(QueryPattern {
            subject: self.term_pattern(&tp.subject)?,
            predicate: match &tp.predicate {
                NamedNodePattern::NamedNode(nn) => PatternTerm::Const(RdfTerm::from_named_node(nn)),
                NamedNodePattern::Variable(v) => variable(v.as_str())?,
            },
            object: self.term_pattern(&tp.object)?,
            graph: graph.cloned(),
        })
    }

    fn fresh_var(&mut self) -> PatternTerm {
        let v = PatternTerm::Var(format!("{PATH_VAR_PREFIX}{}", self.fresh));
        self.fresh += 1;
        v
    }

    fn query(&mut self, query: &Query) -> Result<NormalizedQuery> {
        let (form, pattern) = match query {
            Query::Select { pattern, .. } => (QueryForm::Select, pattern),
            Query::Ask { pattern, .. } => (QueryForm::Ask, pattern),
            Query::Construct { .. } => return Err(Error::unsupported("CONSTRUCT")),
            Query::Describe { .. } => return Err(Error::unsupported("DESCRIBE")),
        };

        let mut modifiers = SolutionModifiers::default();
        let mut current = pattern;
        loop {
            match current {
                GraphPattern::Slice {
                    inner,
                    start,
                    length,
                } => {
                    modifiers.offset = *start;
                    modifiers.limit = *length;
                    current = inner;
                }
                GraphPattern::Distinct { inner } => {
                    modifiers.distinct = true;
                    current = inner;
                }
                GraphPattern::Reduced { inner } => {
                    modifiers.reduced = true;
                    current = inner;
                }
                _ => break,
            }
        }

        let (inner, projected) = match current {
            GraphPattern::Project { inner, variables } => (
                inner.as_ref(),
                variables
                    .iter()
                    .map(|v| v.as_str().to_string())
                    .collect::<Vec<_>>(),
            ),
            other if form == QueryForm::Ask => (other, Vec::new()),
            _ => return Err(Error::unsupported("SELECT without projection")),
        };
        for v in &projected {
            check_user_variable(v)?;
        }

        let inner = match inner {
            GraphPattern::OrderBy { inner, expression } => {
                modifiers.order_by = expression
                    .iter()
                    .map(|e| match e {
                        OrderExpression::Asc(e) => OrderKey {
                            expression: e.to_string(),
                            descending: false,
                        },
                        OrderExpression::Desc(e) => OrderKey {
                            expression: e.to_string(),
                            descending: true,
                        },
                    })
                    .collect();
                inner.as_ref()
            }
            other => other,
        };

        let body = self.pattern(inner, None)?;
        debug!(projected = ?projected, fresh_vars = self.fresh, "query normalized");
        Ok(NormalizedQuery {
            form,
            algebra: Algebra::Project {
                inner: Box::new(body),
                variables: projected.clone(),
            },
            projected,
            modifiers,
        })
    }

    fn pattern(&mut self, gp: &GraphPattern, graph: Option<&PatternTerm>) -> Result<Algebra> {
        match gp {
            GraphPattern::Bgp { patterns } => Ok(Algebra::Bgp(
                patterns
                    .iter()
                    .map(|p| self.triple_pattern(p, graph))
                    .collect::<Result<_>>()?,
            )),
            GraphPattern::Path {
                subject,
                path,
                object,
            } => {
                let s = self.term_pattern(subject)?;
                let o = self.term_pattern(object)?;
                self.path(&s, path, &o, graph)
            }
            GraphPattern::Join { left, right } => Ok(Algebra::join(
                self.pattern(left, graph)?,
                self.pattern(right, graph)?,
            )),
            GraphPattern::LeftJoin {
                left,
                right,
                expression,
            } => {
                let left = self.pattern(left, graph)?;
                let right = self.pattern(right, graph)?;
                let mut joined = Algebra::join(left.clone(), right);
                if let Some(e) = expression {
                    joined = Algebra::Filter {
                        expr: expr(e)?,
                        inner: Box::new(joined),
                    };
                }
                Ok(Algebra::Union {
                    branches: vec![left, joined],
                    kind: UnionKind::Optional,
                })
            }
            GraphPattern::Filter { expr: e, inner } => Ok(Algebra::Filter {
                expr: expr(e)?,
                inner: Box::new(self.pattern(inner, graph)?),
            }),
            GraphPattern::Union { left, right } => Ok(Algebra::union(vec![
                self.pattern(left, graph)?,
                self.pattern(right, graph)?,
            ])),
            GraphPattern::Graph { name, inner } => {
                let g = match name {
                    NamedNodePattern::NamedNode(nn) => {
                        PatternTerm::Const(RdfTerm::from_named_node(nn))
                    }
                    NamedNodePattern::Variable(v) => variable(v.as_str())?,
                };
                self.pattern(inner, Some(&g))
            }
            GraphPattern::Extend {
                inner,
                variable: v,
                expression,
            } => {
                check_user_variable(v.as_str())?;
                Ok(Algebra::Extend {
                    inner: Box::new(self.pattern(inner, graph)?),
                    variable: v.as_str().to_string(),
                    expr: expr(expression)?,
                    path_alias: false,
                })
            }
            GraphPattern::Minus { .. } => Err(Error::unsupported("MINUS")),
            GraphPattern::Values { .. } => Err(Error::unsupported("VALUES")),
            GraphPattern::Group { .. } => Err(Error::unsupported("GROUP BY / aggregates")),
            GraphPattern::Service { .. } => Err(Error::unsupported("SERVICE")),
            GraphPattern::Project { .. } => Err(Error::unsupported("subquery")),
            GraphPattern::OrderBy { .. }
            | GraphPattern::Distinct { .. }
            | GraphPattern::Reduced { .. }
            | GraphPattern::Slice { .. } => Err(Error::unsupported("nested solution modifier")),
            #[allow(unreachable_patterns)]
            _ => Err(Error::unsupported("LATERAL")),
        }
    }

    fn path(
        &mut self,
        subject: &PatternTerm,
        path: &PropertyPathExpression,
        object: &PatternTerm,
        graph: Option<&PatternTerm>,
    ) -> Result<Algebra> {
        match path {
            PropertyPathExpression::NamedNode(nn) => Ok(Algebra::Bgp(vec![QueryPattern {
                subject: subject.clone(),
                predicate: PatternTerm::Const(RdfTerm::from_named_node(nn)),
                object: object.clone(),
                graph: graph.cloned(),
            }])),
            PropertyPathExpression::Reverse(inner) => self.path(object, inner, subject, graph),
            PropertyPathExpression::Sequence(a, b) => {
                let mid = self.fresh_var();
                let left = self.path(subject, a, &mid, graph)?;
                let right = self.path(&mid, b, object, graph)?;
                Ok(Algebra::join(left, right))
            }
            PropertyPathExpression::Alternative(a, b) => Ok(Algebra::union(vec![
                self.path(subject, a, object, graph)?,
                self.path(subject, b, object, graph)?,
            ])),
            PropertyPathExpression::ZeroOrOne(inner) => {
                let mut branches = vec![self.path(subject, inner, object, graph)?];
                branches.extend(zero_hop(subject, object)?);
                Ok(Algebra::union(branches))
            }
            PropertyPathExpression::OneOrMore(inner) => {
                Ok(Algebra::union(self.repeat(subject, inner, object, graph)?))
            }
            PropertyPathExpression::ZeroOrMore(inner) => {
                let mut branches: Vec<Algebra> = zero_hop(subject, object)?.into_iter().collect();
                branches.extend(self.repeat(subject, inner, object, graph)?);
                Ok(Algebra::union(branches))
            }
            PropertyPathExpression::NegatedPropertySet(_) => {
                Err(Error::unsupported("negated property set"))
            }
        }
    }

    /// `p`, `p/p`, … up to `max_path_hops` copies.
    fn repeat(
        &mut self,
        subject: &PatternTerm,
        inner: &PropertyPathExpression,
        object: &PatternTerm,
        graph: Option<&PatternTerm>,
    ) -> Result<Vec<Algebra>> {
        let mut out = Vec::with_capacity(self.max_path_hops);
        for hops in 1..=self.max_path_hops {
            let mut from = subject.clone();
            let mut chain: Option<Algebra> = None;
            for step in 0..hops {
                let to = if step + 1 == hops {
                    object.clone()
                } else {
                    self.fresh_var()
                };
                let link = self.path(&from, inner, &to, graph)?;
                chain = Some(match chain {
                    None => link,
                    Some(prev) => Algebra::join(prev, link),
                });
                from = to;
            }
            out.extend(chain);
        }
        Ok(out)
    }
}

/// The zero-length branch of `p?` / `p*`. `None` when it can never match.
fn zero_hop(subject: &PatternTerm, object: &PatternTerm) -> Result<Option<Algebra>> {
    let bind = |target: &PatternTerm, source: &PatternTerm| -> Result<Algebra> {
        let variable = target
            .binding_key()
            .ok_or_else(|| Error::unsupported("zero-length path"))?;
        let expr = match source {
            PatternTerm::Const(t) => Expr::Const(t.clone()),
            other => Expr::Var(other.binding_key().unwrap_or_default()),
        };
        Ok(Algebra::Extend {
            inner: Box::new(Algebra::empty()),
            variable,
            expr,
            path_alias: true,
        })
    };
    match (subject, object) {
        (PatternTerm::Const(a), PatternTerm::Const(b)) => {
            Ok((a == b).then(Algebra::empty))
        }
        (PatternTerm::Const(_), unbound) => bind(unbound, subject).map(Some),
        (unbound, PatternTerm::Const(_)) => bind(unbound, object).map(Some),
        (a, b) if a.binding_key() == b.binding_key() => Ok(Some(Algebra::empty())),
        // Both sides are keys; the compiler resolves the alias against the
        // enclosing group.
        _ => bind(object, subject).map(Some),
    }
}

fn check_user_variable(name: &str) -> Result<()> {
    if name.starts_with(PATH_VAR_PREFIX) {
        return Err(Error::unsupported(format!(
            "variable ?{name} uses the reserved {PATH_VAR_PREFIX} prefix"
        )));
    }
    Ok(())
}

fn variable(name: &str) -> Result<PatternTerm> {
    check_user_variable(name)?;
    Ok(PatternTerm::Var(name.to_string()))
}

fn boxed(e: &Expression) -> Result<Box<Expr>> {
    expr(e).map(Box::new)
}

fn expr(e: &Expression) -> Result<Expr> {
    Ok(match e {
        Expression::NamedNode(nn) => Expr::Const(RdfTerm::from_named_node(nn)),
        Expression::Literal(l) => Expr::Const(RdfTerm::from_literal(l)),
        Expression::Variable(v) => Expr::Var(v.as_str().to_string()),
        Expression::Or(a, b) => Expr::Or(boxed(a)?, boxed(b)?),
        Expression::And(a, b) => Expr::And(boxed(a)?, boxed(b)?),
        Expression::Equal(a, b) => Expr::Equal(boxed(a)?, boxed(b)?),
        Expression::SameTerm(a, b) => Expr::SameTerm(boxed(a)?, boxed(b)?),
        Expression::Greater(a, b) => Expr::Compare(CompareOp::Gt, boxed(a)?, boxed(b)?),
        Expression::GreaterOrEqual(a, b) => Expr::Compare(CompareOp::Ge, boxed(a)?, boxed(b)?),
        Expression::Less(a, b) => Expr::Compare(CompareOp::Lt, boxed(a)?, boxed(b)?),
        Expression::LessOrEqual(a, b) => Expr::Compare(CompareOp::Le, boxed(a)?, boxed(b)?),
        Expression::In(a, list) => Expr::In(
            boxed(a)?,
            list.iter().map(expr).collect::<Result<_>>()?,
        ),
        Expression::Not(a) => Expr::Not(boxed(a)?),
        Expression::If(c, a, b) => Expr::If(boxed(c)?, boxed(a)?, boxed(b)?),
        Expression::Bound(v) => Expr::Bound(v.as_str().to_string()),
        Expression::UnaryPlus(a) => signed_literal(a, false)?,
        Expression::UnaryMinus(a) => signed_literal(a, true)?,
        Expression::Exists(_) => return Err(Error::unsupported("EXISTS / NOT EXISTS")),
        Expression::FunctionCall(f, args) => {
            let builtin = match f {
                Function::IsIri => Builtin::IsIri,
                Function::IsBlank => Builtin::IsBlank,
                Function::IsLiteral => Builtin::IsLiteral,
                Function::IsNumeric => Builtin::IsNumeric,
                Function::Str => Builtin::Str,
                Function::Lang => Builtin::Lang,
                Function::Datatype => Builtin::Datatype,
                Function::StrLen => Builtin::StrLen,
                other => return Err(Error::unsupported(format!("function {other}"))),
            };
            match args.as_slice() {
                [arg] => Expr::Call(builtin, boxed(arg)?),
                _ => {
                    return Err(Error::Parse(format!(
                        "{} takes exactly one argument",
                        builtin.name()
                    )));
                }
            }
        }
        other => return Err(Error::unsupported(format!("expression {other}"))),
    })
}

/// `-5` and `+5` reach us as a sign applied to a numeric literal; fold them
/// into the literal. Integer subtypes widen to `xsd:integer`.
fn signed_literal(e: &Expression, negate: bool) -> Result<Expr> {
    let Expression::Literal(l) = e else {
        return Err(Error::unsupported(format!("arithmetic on {e}")));
    };
    let local = encoding::xsd_local_name(l.datatype().as_str())
        .filter(|local| NUMERIC_TYPES.contains(local))
        .ok_or_else(|| Error::unsupported(format!("sign applied to {l}")))?;
    let datatype = if INTEGER_TYPES.contains(&local) {
        format!("{XSD}integer")
    } else {
        l.datatype().as_str().to_string()
    };
    let digits = l.value().trim_start_matches(['+', '-']);
    let negative = l.value().starts_with('-') != negate;
    // Integers and decimals have no negative zero.
    let signed_zero = matches!(local, "double" | "float");
    let value = if negative && (signed_zero || digits.contains(|c: char| matches!(c, '1'..='9'))) {
        format!("-{digits}")
    } else {
        digits.to_string()
    };
    Ok(Expr::Const(RdfTerm::typed_literal(value, datatype)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "PREFIX ex: <http://example.org/>\n";

    fn norm(body: &str) -> Result<NormalizedQuery> {
        normalize_str(&format!("{PREFIX}{body}"), &Config::default())
    }

    fn body(q: &NormalizedQuery) -> &Algebra {
        match &q.algebra {
            Algebra::Project { inner, .. } => inner,
            other => panic!("expected projection, got {other:?}"),
        }
    }

    fn branch_count(a: &Algebra) -> usize {
        match a {
            Algebra::Union { branches, .. } => branches.len(),
            _ => 1,
        }
    }

    #[test]
    fn sequence_paths_chain_through_intermediate_nodes() {
        let q = norm("SELECT ?x ?y WHERE { ?x ex:p/ex:q/ex:r ?y }").unwrap();
        let Algebra::Bgp(patterns) = body(&q) else {
            panic!("expected a single BGP, got {:?}", body(&q));
        };
        assert_eq!(patterns.len(), 3);
        assert_eq!(patterns[0].subject, PatternTerm::var("x"));
        assert_eq!(patterns[0].object, patterns[1].subject);
        assert_eq!(patterns[1].object, patterns[2].subject);
        assert!(!matches!(patterns[1].subject, PatternTerm::Const(_)));
        assert_eq!(patterns[2].object, PatternTerm::var("y"));
    }

    #[test]
    fn normalization_is_deterministic() {
        let text = "SELECT ?x WHERE { ?x ex:p+/ex:q ?y }";
        assert_eq!(norm(text).unwrap(), norm(text).unwrap());
    }

    #[test]
    fn inverse_swaps_subject_and_object() {
        let q = norm("SELECT ?x WHERE { ?x ^ex:knows ex:bob }").unwrap();
        let Algebra::Bgp(patterns) = body(&q) else {
            panic!("expected BGP");
        };
        assert_eq!(patterns[0].subject, PatternTerm::Const(RdfTerm::iri("http://example.org/bob")));
        assert_eq!(patterns[0].object, PatternTerm::var("x"));
    }

    #[test]
    fn bounded_unrolling_respects_max_hops() {
        let q = norm("SELECT ?y WHERE { ex:a ex:p+ ?y }").unwrap();
        assert_eq!(branch_count(body(&q)), 3);
        let q = norm("SELECT ?y WHERE { ex:a ex:p* ?y }").unwrap();
        assert_eq!(branch_count(body(&q)), 4);
        let config = Config {
            max_path_hops: 5,
            ..Config::default()
        };
        let q = normalize_str(&format!("{PREFIX}SELECT ?y WHERE {{ ex:a ex:p+ ?y }}"), &config).unwrap();
        assert_eq!(branch_count(body(&q)), 5);
    }

    #[test]
    fn zero_or_one_zero_hop_cases() {
        // Bound subject: the zero branch binds ?y to ex:a.
        let q = norm("SELECT ?y WHERE { ex:a ex:p? ?y }").unwrap();
        let Algebra::Union { branches, .. } = body(&q) else {
            panic!("expected union");
        };
        assert!(matches!(
            &branches[1],
            Algebra::Extend { variable, expr: Expr::Const(_), .. } if variable == "y"
        ));

        // Equal constants: zero branch is the empty pattern.
        let q = norm("ASK { ex:a ex:p? ex:a }").unwrap();
        assert_eq!(branch_count(body(&q)), 2);

        // Unequal constants: zero branch dropped.
        let q = norm("ASK { ex:a ex:p? ex:b }").unwrap();
        assert_eq!(branch_count(body(&q)), 1);

        // Two keys: the zero branch aliases ?super to ?c.
        let q = norm("SELECT * WHERE { ?c ex:type ?t . ?c ex:sub* ?super }").unwrap();
        let Algebra::Join(left, right) = body(&q) else {
            panic!("expected join, got {:?}", body(&q));
        };
        let paths = if matches!(**left, Algebra::Union { .. }) { left } else { right };
        let Algebra::Union { branches, .. } = paths.as_ref() else {
            panic!("expected union");
        };
        assert_eq!(branches.len(), 4);
        assert!(matches!(
            &branches[0],
            Algebra::Extend { variable, expr: Expr::Var(source), path_alias: true, .. }
                if variable == "super" && source == "c"
        ));
    }

    #[test]
    fn signs_fold_into_numeric_literals() {
        let lit = |value: &str, local: &str| {
            Expression::Literal(spargebra::term::Literal::new_typed_literal(
                value,
                spargebra::term::NamedNode::new_unchecked(format!("{XSD}{local}")),
            ))
        };
        let minus = |e| expr(&Expression::UnaryMinus(Box::new(e))).unwrap();
        let typed = |value: &str, local: &str| {
            Expr::Const(RdfTerm::typed_literal(value, format!("{XSD}{local}")))
        };
        assert_eq!(minus(lit("5", "integer")), typed("-5", "integer"));
        assert_eq!(minus(lit("-2.5", "decimal")), typed("2.5", "decimal"));
        assert_eq!(minus(lit("0", "integer")), typed("0", "integer"));
        assert_eq!(minus(lit("0.0e0", "double")), typed("-0.0e0", "double"));
        assert_eq!(minus(lit("7", "positiveInteger")), typed("-7", "integer"));
        assert_eq!(
            expr(&Expression::UnaryPlus(Box::new(lit("+3", "integer")))).unwrap(),
            typed("3", "integer")
        );
        assert!(matches!(
            expr(&Expression::UnaryMinus(Box::new(Expression::Variable(
                spargebra::term::Variable::new_unchecked("x")
            )))),
            Err(Error::UnsupportedFeature { .. })
        ));

        let q = norm("SELECT ?t WHERE { ?s ex:t ?t FILTER(?t < -5) }").unwrap();
        let Algebra::Filter { expr, .. } = body(&q) else {
            panic!("expected filter, got {:?}", body(&q));
        };
        assert_eq!(
            *expr,
            Expr::Compare(CompareOp::Lt, Box::new(Expr::Var("t".into())), Box::new(typed("-5", "integer")))
        );
    }

    #[test]
    fn optional_becomes_optional_union() {
        let q = norm(
            "SELECT ?x ?n WHERE { ?x a ex:Person OPTIONAL { ?x ex:name ?n FILTER(isLiteral(?n)) } }",
        )
        .unwrap();
        let Algebra::Union { branches, kind } = body(&q) else {
            panic!("expected union");
        };
        assert_eq!(*kind, UnionKind::Optional);
        assert!(matches!(branches[0], Algebra::Bgp(ref p) if p.len() == 1));
        assert!(matches!(branches[1], Algebra::Filter { .. } | Algebra::Join(..)));
    }

    #[test]
    fn graph_names_fill_the_graph_slot() {
        let q = norm("SELECT ?s WHERE { GRAPH ?g { ?s ex:p ?o } }").unwrap();
        let Algebra::Bgp(patterns) = body(&q) else {
            panic!("expected BGP");
        };
        assert_eq!(patterns[0].graph, Some(PatternTerm::var("g")));
    }

    #[test]
    fn top_level_modifiers_become_metadata() {
        let q = norm("SELECT DISTINCT ?x WHERE { ?x ex:p ?y } ORDER BY DESC(?y) LIMIT 5 OFFSET 2")
            .unwrap();
        assert!(q.modifiers.distinct);
        assert_eq!(q.modifiers.limit, Some(5));
        assert_eq!(q.modifiers.offset, 2);
        assert_eq!(q.modifiers.order_by.len(), 1);
        assert!(q.modifiers.order_by[0].descending);
    }

    #[test]
    fn unsupported_constructs_are_rejected() {
        for q in [
            "SELECT ?x WHERE { ?x ex:p ?y MINUS { ?x ex:q ?y } }",
            "SELECT ?x WHERE { ?x ex:p ?y FILTER NOT EXISTS { ?x ex:q ?y } }",
            "SELECT (COUNT(?x) AS ?c) WHERE { ?x ex:p ?y }",
            "SELECT ?x WHERE { { SELECT ?x WHERE { ?x ex:p ?y } } }",
            "SELECT ?x WHERE { ?x !ex:p ?y }",
            "CONSTRUCT { ?x ex:p ?y } WHERE { ?x ex:p ?y }",
            "SELECT ?x WHERE { ?x ex:p ?y } VALUES ?x { ex:a }",
        ] {
            match norm(q) {
                Err(Error::UnsupportedFeature { .. }) => {}
                other => panic!("{q}: expected UnsupportedFeature, got {other:?}"),
            }
        }
        assert!(matches!(norm("SELECT WHERE"), Err(Error::Parse(_))));
    }
}
