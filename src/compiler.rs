//! Normalized algebra → constraint programs.
//!
//! The fold is pure: every algebra node yields one [`Fragment`] per UNION
//! alternative and the parent merges them. A fragment is then finalized
//! into a [`ConstraintProgram`] whose assertions read slots, projected
//! variables and hidden inputs.
//!
//! Filter expressions compile to a pair `(guards, core)`. `guards` holds when
//! the expression evaluates without a type error, `core` is its value when it
//! does. SPARQL's three-valued connectives are expressed over those pairs, and
//! a filter accepts exactly when `guards ∧ core`.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::algebra::{
    Algebra, Builtin, CompareOp, Expr, NormalizedQuery, PatternTerm, QueryPattern, UnionKind,
};
use crate::config::Config;
use crate::encoding::{self, Encoder, Specialization, INTEGER_TYPES, NUMERIC_TYPES};
use crate::error::{Error, Result};
use crate::field::Field;
use crate::normalize;
use crate::program::{
    Assertion, CompiledQuery, ConstraintProgram, ExtendSource, ExtendStep, FieldExpr,
    FilterConstraint, HiddenInput, Operand,
};
use crate::term::{RdfTerm, TermTag, XSD, XSD_STRING};

/// Parses, normalizes and compiles `query`.
pub fn compile(query: &str, config: &Config) -> Result<CompiledQuery> {
    config.validate()?;
    let normalized = normalize::normalize_str(query, config)?;
    compile_normalized(&normalized, config)
}

pub fn compile_normalized(query: &NormalizedQuery, config: &Config) -> Result<CompiledQuery> {
    let body = match &query.algebra {
        Algebra::Project { inner, .. } => inner.as_ref(),
        other => other,
    };
    let fragments = Folder::default().fold(body)?;
    let mut compiler = Compiler {
        encoder: config.encoder(),
        projected: &query.projected,
        hidden: HiddenRegistry::default(),
    };
    let branches = fragments
        .into_iter()
        .map(|f| compiler.finalize(f))
        .collect::<Result<Vec<_>>>()?;
    for (i, b) in branches.iter().enumerate() {
        debug!(
            branch = i,
            slots = b.slot_count,
            hidden = b.hidden.len(),
            exclusive_of = ?b.exclusive_of,
            "branch compiled"
        );
    }
    let bgp_slot_count = branches
        .iter()
        .map(|b| b.slot_count)
        .max()
        .unwrap_or(0)
        .max(1);
    info!(
        branches = branches.len(),
        bgp_slot_count,
        hidden_inputs = compiler.hidden.inputs.len(),
        "query compiled"
    );
    Ok(CompiledQuery {
        form: query.form,
        branches,
        bgp_slot_count,
        hidden_inputs: compiler.hidden.inputs,
        projected_variables: query.projected.clone(),
        modifiers: query.modifiers.clone(),
        hash_suite: config.encoding.hash_suite,
        skip_signing: config.render.skip_signing,
        config_fingerprint: config.fingerprint(),
    })
}

/// Compiled queries keyed by query text and configuration fingerprint.
#[derive(Debug, Default)]
pub struct CompileCache {
    entries: RwLock<HashMap<(String, String), Arc<CompiledQuery>>>,
}

impl CompileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compile(&self, query: &str, config: &Config) -> Result<Arc<CompiledQuery>> {
        let key = (query.to_string(), config.fingerprint());
        if let Some(hit) = self.entries.read().get(&key) {
            debug!("compile cache hit");
            return Ok(Arc::clone(hit));
        }
        let compiled = Arc::new(compile(query, config)?);
        Ok(Arc::clone(
            self.entries.write().entry(key).or_insert(compiled),
        ))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

// =============================================================================
// FOLD
// =============================================================================

/// An item together with the keys visible where it was written.
#[derive(Clone, Debug)]
struct Scoped<T> {
    item: T,
    scope: BTreeSet<String>,
}

#[derive(Clone, Debug)]
struct ScopedFilter {
    id: usize,
    expr: Scoped<Expr>,
}

#[derive(Clone, Debug)]
struct ScopedExtend {
    variable: String,
    expr: Expr,
    /// `None` for a path alias, which sees every key of the fragment.
    scope: Option<BTreeSet<String>>,
}

/// One UNION alternative before finalization.
#[derive(Clone, Debug, Default)]
struct Fragment {
    patterns: Vec<QueryPattern>,
    extends: Vec<ScopedExtend>,
    filters: Vec<ScopedFilter>,
    exclusive_of: Vec<usize>,
}

impl Fragment {
    fn keys(&self) -> BTreeSet<String> {
        let mut keys: BTreeSet<String> = self.patterns.iter().flat_map(QueryPattern::keys).collect();
        keys.extend(self.extends.iter().map(|e| e.variable.clone()));
        keys
    }
}

/// Numbers filters in the order they are met.
#[derive(Debug, Default)]
struct Folder {
    next_filter: usize,
}

impl Folder {
    fn fold(&mut self, algebra: &Algebra) -> Result<Vec<Fragment>> {
        match algebra {
            Algebra::Bgp(patterns) => Ok(vec![Fragment {
                patterns: patterns.clone(),
                ..Fragment::default()
            }]),
            Algebra::Join(left, right) => {
                let left = self.fold(left)?;
                let right = self.fold(right)?;
                Ok(product(left, right))
            }
            Algebra::Union { branches, kind } => {
                let mut out: Vec<Fragment> = Vec::new();
                let mut spans = Vec::with_capacity(branches.len());
                for branch in branches {
                    let offset = out.len();
                    let fragments = self.fold(branch)?;
                    spans.push(offset..offset + fragments.len());
                    out.extend(fragments.into_iter().map(|mut f| {
                        f.exclusive_of.iter_mut().for_each(|e| *e += offset);
                        f
                    }));
                }
                if *kind == UnionKind::Optional {
                    if let [left, join] = spans.as_slice() {
                        for i in left.clone() {
                            out[i].exclusive_of.extend(join.clone());
                        }
                    }
                }
                Ok(out)
            }
            Algebra::Filter { expr, inner } => {
                let fragments = self.fold(inner)?;
                let id = self.next_filter;
                self.next_filter += 1;
                Ok(fragments
                    .into_iter()
                    .map(|mut f| {
                        let scope = f.keys();
                        f.filters.push(ScopedFilter {
                            id,
                            expr: Scoped {
                                item: expr.clone(),
                                scope,
                            },
                        });
                        f
                    })
                    .collect())
            }
            Algebra::Extend {
                inner,
                variable,
                expr,
                path_alias,
            } => Ok(self
                .fold(inner)?
                .into_iter()
                .map(|mut f| {
                    let scope = (!path_alias).then(|| f.keys());
                    f.extends.push(ScopedExtend {
                        variable: variable.clone(),
                        expr: expr.clone(),
                        scope,
                    });
                    f
                })
                .collect()),
            Algebra::Project { .. } => Err(Error::unsupported("subquery")),
        }
    }
}

/// Cross product of two alternative lists. Pair `(i, j)` lands at
/// `i * right.len() + j`; exclusions of either side are carried over to the
/// pairs that share the other side.
fn product(left: Vec<Fragment>, right: Vec<Fragment>) -> Vec<Fragment> {
    let width = right.len();
    let mut out = Vec::with_capacity(left.len() * width);
    for (i, a) in left.iter().enumerate() {
        for (j, b) in right.iter().enumerate() {
            out.push(Fragment {
                patterns: a.patterns.iter().chain(&b.patterns).cloned().collect(),
                extends: a.extends.iter().chain(&b.extends).cloned().collect(),
                filters: a.filters.iter().chain(&b.filters).cloned().collect(),
                exclusive_of: a
                    .exclusive_of
                    .iter()
                    .map(|k| k * width + j)
                    .chain(b.exclusive_of.iter().map(|l| i * width + l))
                    .collect(),
            });
        }
    }
    out
}

// =============================================================================
// FINALIZATION
// =============================================================================

/// Hidden-input descriptors, deduplicated across all branches.
#[derive(Debug, Default)]
struct HiddenRegistry {
    inputs: Vec<HiddenInput>,
    index: HashMap<HiddenInput, usize>,
}

impl HiddenRegistry {
    fn index(&mut self, input: HiddenInput) -> usize {
        if let Some(&i) = self.index.get(&input) {
            return i;
        }
        let i = self.inputs.len();
        self.index.insert(input.clone(), i);
        self.inputs.push(input);
        i
    }
}

struct Compiler<'q> {
    encoder: Encoder,
    projected: &'q [String],
    hidden: HiddenRegistry,
}

/// Where each bound key's value lives, and which keys a filter may see.
struct Scope<'a> {
    sources: &'a BTreeMap<String, FieldExpr>,
    visible: &'a BTreeSet<String>,
}

impl Compiler<'_> {
    fn finalize(&mut self, fragment: Fragment) -> Result<ConstraintProgram> {
        let mut sources: BTreeMap<String, FieldExpr> = BTreeMap::new();
        let mut equality_constraints = Vec::new();

        for (slot, pattern) in fragment.patterns.iter().enumerate() {
            for (pos, term) in pattern.positions().into_iter().enumerate() {
                let here = FieldExpr::slot(slot, pos);
                match term {
                    None => {}
                    Some(PatternTerm::Const(t)) => equality_constraints.push(
                        Assertion::equal(here, FieldExpr::Const(self.encoder.encode(t)?)),
                    ),
                    Some(t) => {
                        let Some(key) = t.binding_key() else { continue };
                        match sources.get(&key) {
                            Some(first) => {
                                equality_constraints.push(Assertion::equal(here, first.clone()))
                            }
                            None => {
                                sources.insert(key, here);
                            }
                        }
                    }
                }
            }
        }

        let mut extends = Vec::new();
        for ScopedExtend {
            variable,
            expr,
            scope,
        } in &fragment.extends
        {
            let mut variable = variable;
            let (source, value) = match expr {
                Expr::Const(t) => (
                    ExtendSource::Term(t.clone()),
                    FieldExpr::Const(self.encoder.encode(t)?),
                ),
                Expr::Var(v) => match (sources.get(v), scope) {
                    (Some(src), Some(scope)) if scope.contains(v) => {
                        (ExtendSource::Variable(v.clone()), src.clone())
                    }
                    (Some(src), None) => (ExtendSource::Variable(v.clone()), src.clone()),
                    // A path alias reads whichever side the group binds.
                    (None, None) => match sources.get(variable.as_str()) {
                        Some(src) => {
                            let target = variable;
                            variable = v;
                            (ExtendSource::Variable(target.clone()), src.clone())
                        }
                        None => {
                            return Err(Error::unsupported(format!(
                                "zero-length path between the unbound ?{variable} and ?{v}"
                            )));
                        }
                    },
                    // Unbound source leaves the target unbound.
                    _ => continue,
                },
                other => {
                    return Err(Error::unsupported(format!(
                        "BIND of {} (only variables and constants)",
                        describe(other)
                    )));
                }
            };
            match sources.get(variable) {
                Some(existing) => {
                    equality_constraints.push(Assertion::equal(existing.clone(), value))
                }
                None => {
                    sources.insert(variable.clone(), value);
                }
            }
            extends.push(ExtendStep {
                variable: variable.clone(),
                source,
            });
        }

        // A projected variable this branch leaves unbound is published as zero.
        let bind_constraints = self
            .projected
            .iter()
            .map(|v| {
                let value = sources
                    .get(v)
                    .cloned()
                    .unwrap_or_else(|| FieldExpr::Const(Field::zero()));
                Assertion::equal(FieldExpr::Var(v.clone()), value)
            })
            .collect();

        let mut filters = Vec::with_capacity(fragment.filters.len());
        for ScopedFilter { id, expr } in &fragment.filters {
            let scope = Scope {
                sources: &sources,
                visible: &expr.scope,
            };
            filters.push(FilterConstraint {
                id: *id,
                assertion: self.cond(&expr.item, &scope)?.truth(),
            });
        }
        let hidden: BTreeSet<usize> = filters
            .iter()
            .flat_map(|f| f.assertion.hidden_indices())
            .collect();

        Ok(ConstraintProgram {
            slot_count: fragment.patterns.len(),
            patterns: fragment.patterns,
            extends,
            bind_constraints,
            equality_constraints,
            filters,
            hidden: hidden.into_iter().collect(),
            exclusive_of: fragment.exclusive_of,
            bound: sources.into_keys().collect(),
        })
    }

    /// Field expression holding the value of `key`, if it is bound where the
    /// filter was written. Projected variables read their public input.
    fn key_expr(&self, key: &str, scope: &Scope<'_>) -> Option<FieldExpr> {
        if !scope.visible.contains(key) {
            return None;
        }
        let src = scope.sources.get(key)?;
        Some(if self.projected.iter().any(|p| p == key) {
            FieldExpr::Var(key.to_string())
        } else {
            src.clone()
        })
    }

    fn constant(&self, term: RdfTerm) -> Result<Compiled> {
        Ok(Compiled::term(
            FieldExpr::Const(self.encoder.encode(&term)?),
            Origin::Const(term),
        ))
    }

    fn simple_literal_expr(&self, lexical: FieldExpr) -> FieldExpr {
        let hasher = self.encoder.hasher();
        FieldExpr::hash2(
            FieldExpr::constant(TermTag::Literal.code()),
            FieldExpr::hash4(
                lexical.clone(),
                lexical,
                FieldExpr::Const(hasher.hash_str("")),
                FieldExpr::Const(self.encoder.encode_iri(XSD_STRING)),
            ),
        )
    }

    fn decompose(&mut self, key: &str, term: &FieldExpr) -> Decomposition {
        let operand = Operand::Variable(key.to_string());
        let lexical = self.hidden.index(HiddenInput::LexicalHash {
            operand: operand.clone(),
        });
        let special = self.hidden.index(HiddenInput::SpecialValue {
            operand: operand.clone(),
        });
        let lang = self.hidden.index(HiddenInput::LangHash {
            operand: operand.clone(),
        });
        let datatype = self.hidden.index(HiddenInput::DatatypeEncoding { operand });
        let tie = Assertion::equal(
            term.clone(),
            FieldExpr::hash2(
                FieldExpr::constant(TermTag::Literal.code()),
                FieldExpr::hash4(
                    FieldExpr::Hidden(lexical),
                    FieldExpr::Hidden(special),
                    FieldExpr::Hidden(lang),
                    FieldExpr::Hidden(datatype),
                ),
            ),
        );
        Decomposition {
            lexical,
            special,
            lang,
            datatype,
            tie,
        }
    }

    fn datatype_in(&self, d: &Decomposition, local_names: &[&str]) -> Assertion {
        Assertion::or(local_names.iter().map(|local| {
            Assertion::equal(
                FieldExpr::Hidden(d.datatype),
                FieldExpr::Const(self.encoder.encode_iri(&format!("{XSD}{local}"))),
            )
        }))
    }

    // -------------------------------------------------------------------------
    // Values
    // -------------------------------------------------------------------------

    fn value(&mut self, expr: &Expr, scope: &Scope<'_>) -> Result<Compiled> {
        match expr {
            Expr::Const(t) => self.constant(t.clone()),
            Expr::Var(k) => Ok(match self.key_expr(k, scope) {
                Some(e) => Compiled::term(e, Origin::Key(k.clone())),
                None => Compiled::error(),
            }),
            Expr::Call(builtin, arg) => self.call(*builtin, arg, scope),
            other => Err(Error::unsupported(format!(
                "{} used as a value",
                describe(other)
            ))),
        }
    }

    fn call(&mut self, builtin: Builtin, arg: &Expr, scope: &Scope<'_>) -> Result<Compiled> {
        let Compiled { mut guards, value } = self.value(arg, scope)?;
        let (expr, origin) = match value {
            Value::Term { expr, origin } => (expr, origin),
            Value::Error => return Ok(Compiled::error()),
            Value::Numeric(_) => {
                return Err(Error::unsupported(format!(
                    "{} of a numeric expression",
                    builtin.name()
                )));
            }
        };
        let with = |guards: Vec<Assertion>, value: Value| Ok(Compiled { guards, value });

        match builtin {
            Builtin::Str => match origin {
                Origin::Const(t) => match t.lexical() {
                    Some(lex) => self.constant(RdfTerm::simple_literal(lex)),
                    None => Ok(Compiled::error()),
                },
                Origin::Key(k) => {
                    let d = self.decompose(&k, &expr);
                    let iri = Assertion::equal(
                        expr,
                        FieldExpr::hash2(
                            FieldExpr::constant(TermTag::Iri.code()),
                            FieldExpr::Hidden(d.lexical),
                        ),
                    );
                    guards.push(Assertion::or([iri, d.tie]));
                    let value = self.simple_literal_expr(FieldExpr::Hidden(d.lexical));
                    with(guards, Value::Term { expr: value, origin: Origin::Str })
                }
                Origin::Str | Origin::Lang => with(guards, Value::Term { expr, origin }),
                Origin::Datatype => Err(Error::unsupported("STR(DATATYPE(..))")),
            },
            Builtin::Lang => match origin {
                Origin::Const(RdfTerm::Literal { lang, .. }) => {
                    self.constant(RdfTerm::simple_literal(lang.unwrap_or_default()))
                }
                Origin::Const(_) | Origin::Datatype => Ok(Compiled::error()),
                Origin::Key(k) => {
                    let d = self.decompose(&k, &expr);
                    guards.push(d.tie);
                    let value = self.simple_literal_expr(FieldExpr::Hidden(d.lang));
                    with(guards, Value::Term { expr: value, origin: Origin::Lang })
                }
                Origin::Str | Origin::Lang => self.constant(RdfTerm::simple_literal("")),
            },
            Builtin::Datatype => match origin {
                Origin::Const(RdfTerm::Literal { datatype, .. }) => {
                    self.constant(RdfTerm::iri(datatype))
                }
                Origin::Const(_) | Origin::Datatype => Ok(Compiled::error()),
                Origin::Key(k) => {
                    let d = self.decompose(&k, &expr);
                    guards.push(d.tie);
                    with(
                        guards,
                        Value::Term {
                            expr: FieldExpr::Hidden(d.datatype),
                            origin: Origin::Datatype,
                        },
                    )
                }
                Origin::Str | Origin::Lang => self.constant(RdfTerm::iri(XSD_STRING)),
            },
            Builtin::StrLen => match origin {
                Origin::Const(RdfTerm::Literal { value, .. }) => Ok(Compiled {
                    guards: Vec::new(),
                    value: Value::Numeric(FieldExpr::constant(value.chars().count() as u64)),
                }),
                Origin::Const(_) | Origin::Datatype => Ok(Compiled::error()),
                Origin::Key(k) => {
                    let d = self.decompose(&k, &expr);
                    guards.push(d.tie);
                    let i = self.hidden.index(HiddenInput::StrLen {
                        operand: Operand::Variable(k),
                    });
                    with(guards, Value::Numeric(FieldExpr::Hidden(i)))
                }
                Origin::Str | Origin::Lang => Err(Error::unsupported("STRLEN of a computed string")),
            },
            Builtin::IsIri | Builtin::IsBlank | Builtin::IsLiteral | Builtin::IsNumeric => Err(
                Error::unsupported(format!("{} used as a value", builtin.name())),
            ),
        }
    }

    // -------------------------------------------------------------------------
    // Conditions
    // -------------------------------------------------------------------------

    fn cond(&mut self, expr: &Expr, scope: &Scope<'_>) -> Result<Cond> {
        match expr {
            Expr::And(a, b) => {
                let (a, b) = (self.cond(a, scope)?, self.cond(b, scope)?);
                Ok(Cond::and(a, b))
            }
            Expr::Or(a, b) => {
                let (a, b) = (self.cond(a, scope)?, self.cond(b, scope)?);
                Ok(Cond::or(a, b))
            }
            Expr::Not(a) => {
                let a = self.cond(a, scope)?;
                Ok(Cond {
                    guards: a.guards,
                    core: Assertion::not(a.core),
                })
            }
            Expr::If(c, a, b) => {
                let c = self.cond(c, scope)?;
                let a = self.cond(a, scope)?;
                let b = self.cond(b, scope)?;
                Ok(Cond::branch(c, a, b))
            }
            Expr::Bound(v) => Ok(Cond::constant(self.key_expr(v, scope).is_some())),
            Expr::Equal(a, b) => self.equal(a, b, false, scope),
            Expr::SameTerm(a, b) => self.equal(a, b, true, scope),
            Expr::In(needle, list) => {
                let mut acc = Cond::constant(false);
                for item in list {
                    let eq = self.equal(needle, item, false, scope)?;
                    acc = Cond::or(acc, eq);
                }
                Ok(acc)
            }
            Expr::Compare(op, a, b) => self.compare(*op, a, b, scope),
            Expr::Call(Builtin::IsIri, arg) => self.type_check(TermTag::Iri, arg, scope),
            Expr::Call(Builtin::IsBlank, arg) => self.type_check(TermTag::Blank, arg, scope),
            Expr::Call(Builtin::IsLiteral, arg) => self.type_check(TermTag::Literal, arg, scope),
            Expr::Call(Builtin::IsNumeric, arg) => self.is_numeric(arg, scope),
            other => {
                let value = self.value(other, scope)?;
                self.effective_boolean(value)
            }
        }
    }

    fn effective_boolean(&mut self, compiled: Compiled) -> Result<Cond> {
        let Compiled { mut guards, value } = compiled;
        let core = match value {
            Value::Error => return Ok(Cond::error()),
            Value::Numeric(e) => Assertion::not(Assertion::equal(e, FieldExpr::Const(Field::zero()))),
            Value::Term {
                origin: Origin::Const(t),
                ..
            } => {
                return Ok(match const_ebv(&t) {
                    Some(b) => Cond::constant(b),
                    None => Cond::error(),
                });
            }
            Value::Term {
                expr,
                origin: Origin::Key(k),
            } => {
                let d = self.decompose(&k, &expr);
                guards.push(d.tie.clone());
                guards.push(self.datatype_in(&d, &["boolean"]));
                Assertion::equal(FieldExpr::Hidden(d.special), FieldExpr::constant(1))
            }
            Value::Term {
                expr,
                origin: Origin::Str | Origin::Lang,
            } => {
                let empty = self.encoder.encode(&RdfTerm::simple_literal(""))?;
                Assertion::not(Assertion::equal(expr, FieldExpr::Const(empty)))
            }
            Value::Term {
                origin: Origin::Datatype,
                ..
            } => return Ok(Cond::error()),
        };
        Ok(Cond {
            guards: Assertion::and(guards),
            core,
        })
    }

    fn type_check(&mut self, tag: TermTag, arg: &Expr, scope: &Scope<'_>) -> Result<Cond> {
        let Compiled { guards, value } = self.value(arg, scope)?;
        let core = match value {
            Value::Error => return Ok(Cond::error()),
            Value::Numeric(_) => Assertion::from_bool(tag == TermTag::Literal),
            Value::Term { origin, expr } => match origin {
                Origin::Const(t) => Assertion::from_bool(t.tag() == tag),
                Origin::Str | Origin::Lang => Assertion::from_bool(tag == TermTag::Literal),
                Origin::Datatype => Assertion::from_bool(tag == TermTag::Iri),
                Origin::Key(k) => {
                    let inner = self.hidden.index(HiddenInput::TermInner {
                        operand: Operand::Variable(k),
                    });
                    Assertion::equal(
                        expr,
                        FieldExpr::hash2(FieldExpr::constant(tag.code()), FieldExpr::Hidden(inner)),
                    )
                }
            },
        };
        Ok(Cond {
            guards: Assertion::and(guards),
            core,
        })
    }

    fn is_numeric(&mut self, arg: &Expr, scope: &Scope<'_>) -> Result<Cond> {
        let Compiled { guards, value } = self.value(arg, scope)?;
        let core = match value {
            Value::Error => return Ok(Cond::error()),
            Value::Numeric(_) => Assertion::True,
            Value::Term { origin, expr } => match origin {
                Origin::Const(RdfTerm::Literal { datatype, .. }) => Assertion::from_bool(
                    encoding::xsd_local_name(&datatype).is_some_and(|l| NUMERIC_TYPES.contains(&l)),
                ),
                Origin::Const(_) | Origin::Str | Origin::Lang | Origin::Datatype => Assertion::False,
                Origin::Key(k) => {
                    let d = self.decompose(&k, &expr);
                    let numeric = self.datatype_in(&d, NUMERIC_TYPES);
                    Assertion::and([d.tie, numeric])
                }
            },
        };
        Ok(Cond {
            guards: Assertion::and(guards),
            core,
        })
    }

    fn equal(&mut self, a: &Expr, b: &Expr, same_term: bool, scope: &Scope<'_>) -> Result<Cond> {
        let a = self.value(a, scope)?;
        let b = self.value(b, scope)?;
        let mut guards = a.guards;
        guards.extend(b.guards);
        let core = match (a.value, b.value) {
            (Value::Error, _) | (_, Value::Error) => return Ok(Cond::error()),
            (
                Value::Term {
                    origin: Origin::Const(x),
                    ..
                },
                Value::Term {
                    origin: Origin::Const(y),
                    ..
                },
            ) => Assertion::from_bool(fold_equal(&x, &y, same_term)),
            (Value::Term { expr: x, .. }, Value::Term { expr: y, .. }) => Assertion::equal(x, y),
            (Value::Numeric(x), Value::Numeric(y)) => Assertion::equal(x, y),
            (Value::Numeric(n), Value::Term { expr, origin })
            | (Value::Term { expr, origin }, Value::Numeric(n)) => match origin {
                Origin::Const(t) => match integer_value(&t) {
                    Some(v) => Assertion::equal(n, FieldExpr::Const(Field::from_i128(v.into()))),
                    None => return Ok(Cond::error()),
                },
                Origin::Key(k) => {
                    let d = self.decompose(&k, &expr);
                    guards.push(d.tie.clone());
                    guards.push(self.datatype_in(&d, INTEGER_TYPES));
                    Assertion::equal(n, FieldExpr::Hidden(d.special))
                }
                Origin::Str | Origin::Lang | Origin::Datatype => return Ok(Cond::error()),
            },
        };
        Ok(Cond {
            guards: Assertion::and(guards),
            core,
        })
    }

    fn compare(&mut self, op: CompareOp, a: &Expr, b: &Expr, scope: &Scope<'_>) -> Result<Cond> {
        let a = self.value(a, scope)?;
        let b = self.value(b, scope)?;
        if let (
            Value::Term {
                origin: Origin::Const(x),
                ..
            },
            Value::Term {
                origin: Origin::Const(y),
                ..
            },
        ) = (&a.value, &b.value)
        {
            return Ok(match fold_compare(op, x, y) {
                Some(holds) => Cond::constant(holds),
                None => Cond::error(),
            });
        }
        let kind = [&a.value, &b.value]
            .into_iter()
            .find_map(Value::comparison_type)
            .unwrap_or(ComparisonType::Numeric);
        let mut guards = a.guards;
        guards.extend(b.guards);

        let core = if kind == ComparisonType::String {
            let left = self.string_operand(a.value, &mut guards)?;
            let right = self.string_operand(b.value, &mut guards)?;
            let (Some(left), Some(right)) = (left, right) else {
                return Ok(Cond::error());
            };
            let order = FieldExpr::Hidden(self.hidden.index(HiddenInput::StringOrder { left, right }));
            let is = |n: i128| Assertion::equal(order.clone(), FieldExpr::Const(Field::from_i128(n)));
            match op {
                CompareOp::Lt => is(-1),
                CompareOp::Le => Assertion::or([is(-1), is(0)]),
                CompareOp::Gt => is(1),
                CompareOp::Ge => Assertion::or([is(1), is(0)]),
            }
        } else {
            let left = self.ordinal(kind, a.value, &mut guards)?;
            let right = self.ordinal(kind, b.value, &mut guards)?;
            let (Some(left), Some(right)) = (left, right) else {
                return Ok(Cond::error());
            };
            Assertion::Compare { op, left, right }
        };
        Ok(Cond {
            guards: Assertion::and(guards),
            core,
        })
    }

    /// The signed value a numeric, boolean or dateTime comparison reads.
    fn ordinal(
        &mut self,
        kind: ComparisonType,
        value: Value,
        guards: &mut Vec<Assertion>,
    ) -> Result<Option<FieldExpr>> {
        match value {
            Value::Error => Ok(None),
            Value::Numeric(e) => Ok((kind == ComparisonType::Numeric).then_some(e)),
            Value::Term {
                origin: Origin::Const(t),
                ..
            } => const_ordinal(kind, &t),
            Value::Term {
                expr,
                origin: Origin::Key(k),
            } => {
                let family: &[&str] = match kind {
                    ComparisonType::Boolean => &["boolean"],
                    ComparisonType::DateTime => &["dateTime"],
                    _ => INTEGER_TYPES,
                };
                let d = self.decompose(&k, &expr);
                guards.push(d.tie.clone());
                guards.push(self.datatype_in(&d, family));
                Ok(Some(FieldExpr::Hidden(d.special)))
            }
            Value::Term { .. } => Ok(None),
        }
    }

    fn string_operand(
        &mut self,
        value: Value,
        guards: &mut Vec<Assertion>,
    ) -> Result<Option<Operand>> {
        match value {
            Value::Term {
                origin: Origin::Const(t),
                ..
            } => Ok(match &t {
                RdfTerm::Literal {
                    lang: None,
                    datatype,
                    ..
                } if comparison_type(datatype) == ComparisonType::String => Some(Operand::Term(t)),
                _ => None,
            }),
            Value::Term {
                expr,
                origin: Origin::Key(k),
            } => {
                let d = self.decompose(&k, &expr);
                guards.push(d.tie.clone());
                guards.push(self.datatype_in(&d, &["string"]));
                Ok(Some(Operand::Variable(k)))
            }
            Value::Term {
                origin: Origin::Str | Origin::Lang,
                ..
            } => Err(Error::unsupported("string ordering of a computed string")),
            _ => Ok(None),
        }
    }
}

struct Decomposition {
    lexical: usize,
    special: usize,
    lang: usize,
    datatype: usize,
    /// `term == hash2(2, hash4(lexical, special, lang, datatype))`.
    tie: Assertion,
}

#[derive(Clone, Debug)]
enum Origin {
    Key(String),
    Const(RdfTerm),
    /// Result of STR: a simple literal.
    Str,
    /// Result of LANG: a simple literal.
    Lang,
    /// Result of DATATYPE: an IRI.
    Datatype,
}

#[derive(Clone, Debug)]
enum Value {
    /// A term encoding.
    Term { expr: FieldExpr, origin: Origin },
    /// A bare signed integer (STRLEN).
    Numeric(FieldExpr),
    /// Evaluation raises a type error for every row.
    Error,
}

impl Value {
    fn comparison_type(&self) -> Option<ComparisonType> {
        match self {
            Value::Term {
                origin: Origin::Const(RdfTerm::Literal {
                    datatype,
                    lang: None,
                    ..
                }),
                ..
            } => Some(comparison_type(datatype)).filter(|t| *t != ComparisonType::Unknown),
            Value::Term {
                origin: Origin::Str | Origin::Lang,
                ..
            } => Some(ComparisonType::String),
            Value::Numeric(_) => Some(ComparisonType::Numeric),
            _ => None,
        }
    }
}

struct Compiled {
    guards: Vec<Assertion>,
    value: Value,
}

impl Compiled {
    fn term(expr: FieldExpr, origin: Origin) -> Self {
        Compiled {
            guards: Vec::new(),
            value: Value::Term { expr, origin },
        }
    }

    fn error() -> Self {
        Compiled {
            guards: Vec::new(),
            value: Value::Error,
        }
    }
}

/// A boolean expression: `guards` says it evaluated without error, `core` is
/// its value in that case.
#[derive(Clone, Debug)]
struct Cond {
    guards: Assertion,
    core: Assertion,
}

impl Cond {
    fn constant(b: bool) -> Self {
        Cond {
            guards: Assertion::True,
            core: Assertion::from_bool(b),
        }
    }

    fn error() -> Self {
        Cond {
            guards: Assertion::False,
            core: Assertion::False,
        }
    }

    fn truth(self) -> Assertion {
        Assertion::and([self.guards, self.core])
    }

    /// `false && error` is `false`.
    fn and(a: Cond, b: Cond) -> Self {
        let guards = Assertion::or([
            Assertion::and([a.guards.clone(), b.guards.clone()]),
            Assertion::and([a.guards.clone(), Assertion::not(a.core.clone())]),
            Assertion::and([b.guards, Assertion::not(b.core.clone())]),
        ]);
        Cond {
            guards,
            core: Assertion::and([a.core, b.core]),
        }
    }

    /// `true || error` is `true`.
    fn or(a: Cond, b: Cond) -> Self {
        let core = Assertion::or([
            Assertion::and([a.guards.clone(), a.core]),
            Assertion::and([b.guards.clone(), b.core]),
        ]);
        Cond {
            guards: Assertion::or([core.clone(), Assertion::and([a.guards, b.guards])]),
            core,
        }
    }

    fn branch(c: Cond, a: Cond, b: Cond) -> Self {
        let guards = Assertion::and([
            c.guards,
            Assertion::or([Assertion::not(c.core.clone()), a.guards]),
            Assertion::or([c.core.clone(), b.guards]),
        ]);
        let core = Assertion::or([
            Assertion::and([c.core.clone(), a.core]),
            Assertion::and([Assertion::not(c.core), b.core]),
        ]);
        Cond { guards, core }
    }
}

fn describe(expr: &Expr) -> &'static str {
    match expr {
        Expr::Const(_) => "a constant",
        Expr::Var(_) => "a variable",
        Expr::Equal(..) | Expr::SameTerm(..) | Expr::In(..) => "an equality test",
        Expr::Compare(..) => "a comparison",
        Expr::And(..) | Expr::Or(..) | Expr::Not(_) => "a boolean connective",
        Expr::If(..) => "IF",
        Expr::Bound(_) => "BOUND",
        Expr::Call(..) => "a function call",
    }
}

// =============================================================================
// CONSTANT FOLDING
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
enum ComparisonType {
    Numeric,
    String,
    Boolean,
    DateTime,
    Unknown,
}

fn comparison_type(datatype: &str) -> ComparisonType {
    match encoding::xsd_local_name(datatype) {
        Some(local) if NUMERIC_TYPES.contains(&local) => ComparisonType::Numeric,
        Some(
            "string" | "normalizedString" | "token" | "language" | "Name" | "NCName" | "NMTOKEN",
        ) => ComparisonType::String,
        Some("boolean") => ComparisonType::Boolean,
        Some("dateTime" | "date" | "time") => ComparisonType::DateTime,
        _ => ComparisonType::Unknown,
    }
}

fn is_float_datatype(datatype: &str) -> bool {
    matches!(encoding::xsd_local_name(datatype), Some("float" | "double"))
}

fn integer_value(term: &RdfTerm) -> Option<i64> {
    match term {
        RdfTerm::Literal {
            value, datatype, ..
        } => match encoding::specialize(value, datatype) {
            Specialization::Integer(n) => Some(n),
            _ => None,
        },
        _ => None,
    }
}

fn const_ordinal(kind: ComparisonType, term: &RdfTerm) -> Result<Option<FieldExpr>> {
    let RdfTerm::Literal {
        value,
        lang: None,
        datatype,
    } = term
    else {
        return Ok(None);
    };
    if comparison_type(datatype) != kind {
        return Ok(None);
    }
    match encoding::specialize(value, datatype) {
        Specialization::Integer(n) | Specialization::EpochMillis(n) => {
            Ok(Some(FieldExpr::Const(Field::from_i128(n.into()))))
        }
        Specialization::Boolean(b) => Ok(Some(FieldExpr::constant(u64::from(b)))),
        Specialization::Raw if kind == ComparisonType::Numeric => Err(Error::unsupported(format!(
            "ordering a variable against the non-integer literal {value}"
        ))),
        Specialization::Raw => Ok(None),
    }
}

/// Effective boolean value of a constant; `None` is a type error.
fn const_ebv(term: &RdfTerm) -> Option<bool> {
    let RdfTerm::Literal {
        value,
        lang,
        datatype,
    } = term
    else {
        return None;
    };
    if lang.is_some() {
        return Some(!value.is_empty());
    }
    match comparison_type(datatype) {
        ComparisonType::Boolean => Some(matches!(
            encoding::specialize(value, datatype),
            Specialization::Boolean(true)
        )),
        ComparisonType::Numeric => Some(match encoding::specialize(value, datatype) {
            Specialization::Integer(n) => n != 0,
            _ => value
                .trim()
                .parse::<f64>()
                .is_ok_and(|f| f != 0.0 && !f.is_nan()),
        }),
        ComparisonType::String => Some(!value.is_empty()),
        _ => None,
    }
}

fn literal_pair<'a>(x: &'a RdfTerm, y: &'a RdfTerm) -> Option<((&'a str, &'a str), (&'a str, &'a str))> {
    match (x, y) {
        (
            RdfTerm::Literal {
                value: a,
                lang: None,
                datatype: da,
            },
            RdfTerm::Literal {
                value: b,
                lang: None,
                datatype: db,
            },
        ) => Some(((a, da), (b, db))),
        _ => None,
    }
}

fn numeric_order(a: &str, da: &str, b: &str, db: &str) -> Option<Ordering> {
    if let (Specialization::Integer(x), Specialization::Integer(y)) =
        (encoding::specialize(a, da), encoding::specialize(b, db))
    {
        return Some(x.cmp(&y));
    }
    let x = a.trim().parse::<f64>().ok()?;
    let y = b.trim().parse::<f64>().ok()?;
    x.partial_cmp(&y)
}

fn fold_equal(x: &RdfTerm, y: &RdfTerm, same_term: bool) -> bool {
    if same_term {
        return x == y;
    }
    let Some(((a, da), (b, db))) = literal_pair(x, y) else {
        return x == y;
    };
    match (comparison_type(da), comparison_type(db)) {
        (ComparisonType::Numeric, ComparisonType::Numeric) => {
            if is_float_datatype(da) || is_float_datatype(db) {
                ieee754_equal(FloatSpecial::parse(a), FloatSpecial::parse(b))
            } else {
                numeric_order(a, da, b, db) == Some(Ordering::Equal)
            }
        }
        (ComparisonType::Boolean, ComparisonType::Boolean)
        | (ComparisonType::DateTime, ComparisonType::DateTime) => {
            match (encoding::specialize(a, da), encoding::specialize(b, db)) {
                (Specialization::Raw, _) | (_, Specialization::Raw) => x == y,
                (l, r) => l == r,
            }
        }
        _ => x == y,
    }
}

/// `None` when the two constants are not comparable.
fn fold_compare(op: CompareOp, x: &RdfTerm, y: &RdfTerm) -> Option<bool> {
    let ((a, da), (b, db)) = literal_pair(x, y)?;
    match (comparison_type(da), comparison_type(db)) {
        (ComparisonType::Numeric, ComparisonType::Numeric) => {
            if is_float_datatype(da) || is_float_datatype(db) {
                let (fa, fb) = (FloatSpecial::parse(a), FloatSpecial::parse(b));
                Some(match op {
                    CompareOp::Lt => ieee754_less_than(fa, fb),
                    CompareOp::Le => ieee754_less_than(fa, fb) || ieee754_equal(fa, fb),
                    CompareOp::Gt => ieee754_less_than(fb, fa),
                    CompareOp::Ge => ieee754_less_than(fb, fa) || ieee754_equal(fa, fb),
                })
            } else {
                numeric_order(a, da, b, db).map(|ord| op.holds(&ord, &Ordering::Equal))
            }
        }
        (ComparisonType::String, ComparisonType::String) => Some(op.holds(&a, &b)),
        (ComparisonType::Boolean, ComparisonType::Boolean)
        | (ComparisonType::DateTime, ComparisonType::DateTime) => {
            let ordinal = |v, d| match encoding::specialize(v, d) {
                Specialization::Boolean(b) => Some(i64::from(b)),
                Specialization::EpochMillis(n) => Some(n),
                _ => None,
            };
            Some(op.holds(&ordinal(a, da)?, &ordinal(b, db)?))
        }
        _ => None,
    }
}

// IEEE 754 rules for xsd:float / xsd:double constants.

#[derive(Clone, Copy, Debug, PartialEq)]
enum FloatSpecial {
    Normal(f64),
    NaN,
    PositiveInf,
    NegativeInf,
    PositiveZero,
    NegativeZero,
}

impl FloatSpecial {
    fn parse(value: &str) -> Self {
        match value.trim() {
            "NaN" => FloatSpecial::NaN,
            "INF" | "+INF" => FloatSpecial::PositiveInf,
            "-INF" => FloatSpecial::NegativeInf,
            v => match v.parse::<f64>() {
                Ok(f) if f == 0.0 && f.is_sign_negative() => FloatSpecial::NegativeZero,
                Ok(f) if f == 0.0 => FloatSpecial::PositiveZero,
                Ok(f) => FloatSpecial::Normal(f),
                Err(_) => FloatSpecial::NaN,
            },
        }
    }
}

fn ieee754_less_than(a: FloatSpecial, b: FloatSpecial) -> bool {
    use FloatSpecial::*;
    match (a, b) {
        (NaN, _) | (_, NaN) => false,
        (NegativeInf, NegativeInf) => false,
        (NegativeInf, _) => true,
        (_, NegativeInf) => false,
        (PositiveInf, _) => false,
        (_, PositiveInf) => true,
        (PositiveZero | NegativeZero, PositiveZero | NegativeZero) => false,
        (Normal(x), Normal(y)) => x < y,
        (PositiveZero | NegativeZero, Normal(y)) => 0.0 < y,
        (Normal(x), PositiveZero | NegativeZero) => x < 0.0,
    }
}

fn ieee754_equal(a: FloatSpecial, b: FloatSpecial) -> bool {
    use FloatSpecial::*;
    match (a, b) {
        (NaN, _) | (_, NaN) => false,
        (PositiveInf, PositiveInf) | (NegativeInf, NegativeInf) => true,
        (PositiveInf | NegativeInf, _) | (_, PositiveInf | NegativeInf) => false,
        (PositiveZero | NegativeZero, PositiveZero | NegativeZero) => true,
        (Normal(x), Normal(y)) => x == y,
        (PositiveZero | NegativeZero, Normal(_)) | (Normal(_), PositiveZero | NegativeZero) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = "PREFIX ex: <http://example.org/>\n\
                          PREFIX xsd: <http://www.w3.org/2001/XMLSchema#>\n";

    fn compile_body(body: &str) -> Result<CompiledQuery> {
        compile(&format!("{PREFIX}{body}"), &Config::default())
    }

    fn single_assertion(body: &str) -> Assertion {
        let q = compile_body(body).unwrap();
        assert_eq!(q.branches.len(), 1);
        q.branches[0].assertion()
    }

    #[test]
    fn alice_query_compiles_to_one_branch() {
        let q = compile_body(
            "SELECT ?n ?a WHERE { ?p ex:name ?n . ?p ex:age ?a . FILTER(?a >= 18) }",
        )
        .unwrap();
        assert_eq!(q.branches.len(), 1);
        assert_eq!(q.bgp_slot_count, 2);
        let branch = &q.branches[0];
        // two predicate constants and the repeated ?p
        assert_eq!(branch.equality_constraints.len(), 3);
        assert_eq!(branch.bind_constraints.len(), 2);
        assert!(q.hidden_inputs.contains(&HiddenInput::SpecialValue {
            operand: Operand::Variable("a".into()),
        }));
        assert_eq!(branch.hidden.len(), 4);
        let assertion = branch.assertion();
        let Assertion::And(parts) = &assertion else {
            panic!("expected conjunction, got {assertion:?}");
        };
        assert!(parts.iter().any(|p| matches!(
            p,
            Assertion::Compare {
                op: CompareOp::Ge,
                right: FieldExpr::Const(c),
                ..
            } if *c == Field::from_u64(18)
        )));
    }

    #[test]
    fn metadata_is_deterministic() {
        let text = "SELECT ?x ?n WHERE { ?x ex:p+ ?y . OPTIONAL { ?y ex:name ?n } \
                    FILTER(STRLEN(?n) > 2 || isIRI(?y)) }";
        let a = compile_body(text).unwrap().metadata_json().unwrap();
        let b = compile_body(text).unwrap().metadata_json().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn optional_left_branch_excludes_its_join() {
        let q = compile_body("SELECT ?s ?n WHERE { ?s ex:p ?o OPTIONAL { ?o ex:name ?n } }")
            .unwrap();
        assert_eq!(q.branches.len(), 2);
        assert_eq!(q.branches[0].exclusive_of, vec![1]);
        assert!(q.branches[1].exclusive_of.is_empty());
        assert_eq!(q.branches[0].slot_count, 1);
        assert_eq!(q.branches[1].slot_count, 2);
        assert_eq!(q.bgp_slot_count, 2);
        // ?n is unbound in the left branch and published as zero
        assert_eq!(q.branches[0].bind_constraints.len(), 2);
        assert!(q.branches[0].bind_constraints.contains(&Assertion::equal(
            FieldExpr::Var("n".into()),
            FieldExpr::Const(Field::zero()),
        )));
        assert!(q.branches[1].bind_constraints.contains(&Assertion::equal(
            FieldExpr::Var("n".into()),
            FieldExpr::slot(1, 2),
        )));
    }

    #[test]
    fn joined_optionals_keep_their_exclusions() {
        let q = compile_body(
            "SELECT * WHERE { ?s ex:p ?o OPTIONAL { ?o ex:q ?x } { ?s ex:r ?z } UNION { ?s ex:t ?z } }",
        )
        .unwrap();
        // [left, join] x [r, t]
        assert_eq!(q.branches.len(), 4);
        assert_eq!(q.branches[0].exclusive_of, vec![2]);
        assert_eq!(q.branches[1].exclusive_of, vec![3]);
    }

    #[test]
    fn hidden_inputs_are_shared_across_branches() {
        let q = compile_body(
            "SELECT ?a WHERE { { ?s ex:p ?a } UNION { ?s ex:q ?a } FILTER(?a > 3) }",
        )
        .unwrap();
        assert_eq!(q.branches.len(), 2);
        assert_eq!(q.hidden_inputs.len(), 4);
        assert_eq!(q.branches[0].hidden, q.branches[1].hidden);
    }

    #[test]
    fn constant_comparisons_fold() {
        assert_eq!(single_assertion("SELECT * WHERE { ?s ?p ?o FILTER(2 > 1) }"), Assertion::True);
        assert_eq!(
            single_assertion("SELECT * WHERE { ?s ?p ?o FILTER(\"NaN\"^^xsd:double < 1.0e0) }"),
            Assertion::False
        );
        assert_eq!(
            single_assertion(
                "SELECT * WHERE { ?s ?p ?o FILTER(\"-0\"^^xsd:double = \"0\"^^xsd:double) }"
            ),
            Assertion::True
        );
        assert_eq!(
            single_assertion(
                "SELECT * WHERE { ?s ?p ?o FILTER(\"-2.5\"^^xsd:double < \"-1.0\"^^xsd:double) }"
            ),
            Assertion::True
        );
        assert_eq!(
            single_assertion("SELECT * WHERE { ?s ?p ?o FILTER(\"b\" < \"a\") }"),
            Assertion::False
        );
    }

    #[test]
    fn error_or_true_is_true() {
        // ?missing is never bound, so the left side is an error.
        assert_eq!(
            single_assertion("SELECT * WHERE { ?s ?p ?o FILTER(?missing > 1 || true) }"),
            Assertion::True
        );
        assert_eq!(
            single_assertion("SELECT * WHERE { ?s ?p ?o FILTER(?missing > 1 && false) }"),
            Assertion::False
        );
        assert_eq!(
            single_assertion("SELECT * WHERE { ?s ?p ?o FILTER(!BOUND(?missing)) }"),
            Assertion::True
        );
    }

    #[test]
    fn type_checks_use_term_inner() {
        let q = compile_body("SELECT ?o WHERE { ?s ?p ?o FILTER(isIRI(?o)) }").unwrap();
        assert_eq!(
            q.hidden_inputs,
            vec![HiddenInput::TermInner {
                operand: Operand::Variable("o".into()),
            }]
        );
        assert_eq!(
            q.branches[0].assertion(),
            Assertion::equal(
                FieldExpr::Var("o".into()),
                FieldExpr::hash2(FieldExpr::constant(0), FieldExpr::Hidden(0)),
            )
        );
    }

    #[test]
    fn string_ordering_uses_an_order_hint() {
        let q = compile_body("SELECT ?n WHERE { ?s ex:name ?n FILTER(?n < \"M\") }").unwrap();
        assert!(q.hidden_inputs.iter().any(|h| matches!(
            h,
            HiddenInput::StringOrder {
                left: Operand::Variable(v),
                right: Operand::Term(_),
            } if v == "n"
        )));
    }

    #[test]
    fn bind_aliases_and_constants() {
        let q = compile_body("SELECT ?y ?c WHERE { ?s ex:p ?x BIND(?x AS ?y) BIND(ex:k AS ?c) }")
            .unwrap();
        let branch = &q.branches[0];
        assert_eq!(branch.extends.len(), 2);
        assert_eq!(
            branch.bind_constraints[0],
            Assertion::equal(FieldExpr::Var("y".into()), FieldExpr::slot(0, 2))
        );
        assert!(branch.bound.contains("c"));
    }

    #[test]
    fn unsupported_constructs_are_rejected() {
        for body in [
            "SELECT ?y WHERE { ?s ex:p ?x BIND(STRLEN(?x) AS ?y) }",
            "SELECT ?x WHERE { ?s ex:p ?x FILTER(?x > 1.5) }",
            "SELECT ?x WHERE { ?s ex:p ?x FILTER(STR(?x) < STR(?s)) }",
        ] {
            match compile_body(body) {
                Err(Error::UnsupportedFeature { .. }) => {}
                other => panic!("{body}: expected UnsupportedFeature, got {other:?}"),
            }
        }
    }

    fn zero_hop_extends(q: &CompiledQuery) -> Vec<&ExtendStep> {
        q.branches.iter().flat_map(|b| b.extends.iter()).collect()
    }

    #[test]
    fn zero_hop_between_variables_reads_the_enclosing_group() {
        let q = compile_body("SELECT * WHERE { ?c ex:type ?t . ?c ex:sub* ?super }").unwrap();
        assert_eq!(
            zero_hop_extends(&q),
            vec![&ExtendStep {
                variable: "super".into(),
                source: ExtendSource::Variable("c".into()),
            }]
        );

        // Only the object side is bound, so the alias runs the other way.
        let q = compile_body("SELECT * WHERE { ?c ex:type ?t . ?super ex:sub* ?c }").unwrap();
        assert_eq!(
            zero_hop_extends(&q),
            vec![&ExtendStep {
                variable: "super".into(),
                source: ExtendSource::Variable("c".into()),
            }]
        );
    }

    #[test]
    fn zero_hop_between_unbound_variables_is_rejected() {
        match compile_body("SELECT * WHERE { ?a ex:sub* ?b }") {
            Err(Error::UnsupportedFeature { construct }) => {
                assert!(construct.contains("zero-length path"), "{construct}")
            }
            other => panic!("expected UnsupportedFeature, got {other:?}"),
        }
    }

    #[test]
    fn cache_reuses_compiled_queries() {
        let cache = CompileCache::new();
        let config = Config::default();
        let text = format!("{PREFIX}SELECT ?s WHERE {{ ?s ex:p ?o }}");
        let a = cache.get_or_compile(&text, &config).unwrap();
        let b = cache.get_or_compile(&text, &config).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let mut other = config.clone();
        other.max_path_hops = 5;
        let c = cache.get_or_compile(&text, &other).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn ieee_rules() {
        use FloatSpecial::*;
        assert!(!ieee754_less_than(NaN, Normal(1.0)));
        assert!(ieee754_less_than(NegativeInf, NegativeZero));
        assert!(ieee754_equal(NegativeZero, PositiveZero));
        assert!(!ieee754_equal(NaN, NaN));
        assert!(ieee754_less_than(Normal(-2.0), Normal(-1.0)));
        assert_eq!(FloatSpecial::parse("-0.0e0"), NegativeZero);
    }
}
