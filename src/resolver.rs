//! Finds the dataset bindings that satisfy a compiled query and turns each
//! into a [`WitnessInput`].
//!
//! Every branch is joined left to right over its slots, in dataset order.
//! A candidate row then goes through the branch's extends, gets its hidden
//! inputs, and is checked against the same assertion tree the circuit
//! enforces. Rows are accepted through the first branch that yields them.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::algebra::{is_user_key, PatternTerm};
use crate::config::Config;
use crate::dataset::{DatasetIndex, SignedDataset};
use crate::encoding::Encoder;
use crate::error::{Error, Result};
use crate::eval::Evaluator;
use crate::field::Field;
use crate::hidden::{self, Row};
use crate::program::{Assertion, CompiledQuery, ConstraintProgram, ExtendSource};
use crate::term::RdfTerm;
use crate::witness::WitnessInput;

/// A binding that matched the patterns but could not be turned into a
/// witness.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedBinding {
    pub branch: usize,
    pub bindings: BTreeMap<String, RdfTerm>,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub witnesses: Vec<WitnessInput>,
    pub skipped: Vec<SkippedBinding>,
    /// Candidates rejected by a filter or an extend conflict.
    pub rejected: usize,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.witnesses.is_empty()
    }
}

/// A row produced by the join, before any filter.
#[derive(Clone, Debug)]
struct Candidate {
    row: Row,
    quads: Vec<usize>,
}

/// A candidate after evaluation. `failed` lists the filters it does not
/// satisfy; an inconsistent candidate never counts as a row.
#[derive(Debug)]
struct Evaluated {
    row: Row,
    consistent: bool,
    failed: BTreeSet<usize>,
    witness: Option<WitnessInput>,
}

pub struct Resolver<'a> {
    index: DatasetIndex<'a>,
    encoder: Encoder,
}

impl<'a> Resolver<'a> {
    pub fn new(dataset: &'a SignedDataset, config: &Config) -> Result<Self> {
        dataset.check_compatible(config)?;
        Ok(Self {
            index: DatasetIndex::new(dataset),
            encoder: config.encoder(),
        })
    }

    pub fn dataset(&self) -> &'a SignedDataset {
        self.index.dataset()
    }

    pub fn resolve(&self, query: &CompiledQuery) -> Result<Resolution> {
        let mut resolution = Resolution::default();
        let mut evaluated = Vec::with_capacity(query.branches.len());
        for (b, program) in query.branches.iter().enumerate() {
            let rows = self.join(program)?;
            debug!(branch = b, candidates = rows.len(), "branch joined");
            let mut out = Vec::with_capacity(rows.len());
            for candidate in rows {
                out.push(self.evaluate(query, b, candidate, &mut resolution)?);
            }
            evaluated.push(out);
        }

        let mut seen: HashSet<BTreeMap<String, RdfTerm>> = HashSet::new();
        for (b, program) in query.branches.iter().enumerate() {
            for e in &evaluated[b] {
                let Some(witness) = &e.witness else { continue };
                if self.extended_elsewhere(query, program, &e.row, &evaluated) {
                    debug!(branch = b, "row has an extension in its exclusive branch");
                    continue;
                }
                if !seen.insert(identity(&e.row)) {
                    continue;
                }
                resolution.witnesses.push(witness.clone());
            }
        }

        info!(
            witnesses = resolution.witnesses.len(),
            skipped = resolution.skipped.len(),
            rejected = resolution.rejected,
            "query resolved"
        );
        Ok(resolution)
    }

    /// Nested-loop join over the branch's slots, then its extends.
    fn join(&self, program: &ConstraintProgram) -> Result<Vec<Candidate>> {
        let constants = program
            .patterns
            .iter()
            .map(|p| {
                p.positions()
                    .map(|t| match t {
                        Some(PatternTerm::Const(c)) => self.encoder.encode(c).map(Some),
                        _ => Ok(None),
                    })
                    .into_iter()
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        let dataset = self.index.dataset();

        // Each partial row carries the encodings of its bound keys.
        let mut states: Vec<(Candidate, BTreeMap<String, Field>)> = vec![(
            Candidate {
                row: Row::new(),
                quads: Vec::new(),
            },
            BTreeMap::new(),
        )];
        for (pattern, consts) in program.patterns.iter().zip(&constants) {
            let mut next = Vec::new();
            for (partial, encoded) in &states {
                let keys: Vec<Option<String>> = pattern
                    .positions()
                    .iter()
                    .map(|t| t.and_then(PatternTerm::binding_key))
                    .collect();
                let fixed: [Option<Field>; 4] = std::array::from_fn(|pos| {
                    match (&consts[pos], &keys[pos]) {
                        (Some(c), _) => Some(c.clone()),
                        (None, Some(k)) => encoded.get(k).cloned(),
                        (None, None) => None,
                    }
                });
                'quads: for qi in self.index.candidates(&fixed) {
                    let quad = &dataset.quads[qi];
                    let terms = quad.terms();
                    let mut row = partial.row.clone();
                    let mut enc = encoded.clone();
                    for (pos, key) in keys.iter().enumerate() {
                        let Some(key) = key else { continue };
                        match row.get(key) {
                            Some(bound) if bound != terms[pos] => continue 'quads,
                            Some(_) => {}
                            None => {
                                row.insert(key.clone(), terms[pos].clone());
                                enc.insert(key.clone(), dataset.encoded[qi][pos].clone());
                            }
                        }
                    }
                    let mut quads = partial.quads.clone();
                    quads.push(qi);
                    next.push((Candidate { row, quads }, enc));
                }
            }
            states = next;
            if states.is_empty() {
                break;
            }
        }

        let mut out = Vec::with_capacity(states.len());
        'rows: for (mut candidate, _) in states {
            for step in &program.extends {
                let value = match &step.source {
                    ExtendSource::Term(t) => t.clone(),
                    ExtendSource::Variable(v) => match candidate.row.get(v) {
                        Some(t) => t.clone(),
                        None => continue,
                    },
                };
                match candidate.row.get(&step.variable) {
                    Some(existing) if *existing != value => {
                        debug!(variable = %step.variable, "extend conflicts with an existing binding");
                        continue 'rows;
                    }
                    Some(_) => {}
                    None => {
                        candidate.row.insert(step.variable.clone(), value);
                    }
                }
            }
            out.push(candidate);
        }
        Ok(out)
    }

    fn evaluate(
        &self,
        query: &CompiledQuery,
        branch: usize,
        candidate: Candidate,
        resolution: &mut Resolution,
    ) -> Result<Evaluated> {
        let program = &query.branches[branch];
        let built = hidden::compute_all(
            &query.hidden_inputs,
            &program.hidden,
            &candidate.row,
            &self.encoder,
        )
        .and_then(|hidden| self.witness(query, branch, &candidate, hidden));
        let witness = match built {
            Ok(w) => w,
            Err(e) if e.is_recoverable() => {
                warn!(branch, error = %e, "skipping binding");
                resolution.skipped.push(SkippedBinding {
                    branch,
                    bindings: identity(&candidate.row),
                    reason: e.to_string(),
                });
                return Ok(Evaluated {
                    row: candidate.row,
                    consistent: false,
                    failed: program.filter_ids(),
                    witness: None,
                });
            }
            Err(e) => return Err(e),
        };

        let slots = witness.slot_terms();
        let eval = Evaluator::new(self.encoder.hasher(), witness.view(&slots));
        let structural = Assertion::and(
            program
                .bind_constraints
                .iter()
                .chain(&program.equality_constraints)
                .cloned(),
        );
        if let Err(e) = eval.check(&structural) {
            debug!(branch, error = %e, "candidate rejected");
            resolution.rejected += 1;
            return Ok(Evaluated {
                row: candidate.row,
                consistent: false,
                failed: program.filter_ids(),
                witness: None,
            });
        }
        let mut failed = BTreeSet::new();
        for filter in &program.filters {
            if let Err(e) = eval.check(&filter.assertion) {
                debug!(branch, filter = filter.id, error = %e, "candidate rejected");
                failed.insert(filter.id);
            }
        }
        if !failed.is_empty() {
            resolution.rejected += 1;
        }
        Ok(Evaluated {
            row: candidate.row,
            consistent: true,
            witness: failed.is_empty().then_some(witness),
            failed,
        })
    }

    fn witness(
        &self,
        query: &CompiledQuery,
        branch: usize,
        candidate: &Candidate,
        hidden: Vec<Field>,
    ) -> Result<WitnessInput> {
        let dataset = self.index.dataset();
        let padding = candidate.quads.first().copied().unwrap_or(0);
        let slots = (0..query.bgp_slot_count)
            .map(|s| {
                let qi = candidate.quads.get(s).copied().unwrap_or(padding);
                WitnessInput::slot(dataset, qi).ok_or_else(|| {
                    Error::ConstraintUnsatisfied("dataset has no quad to pad a slot with".into())
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut variables = BTreeMap::new();
        let mut bindings = BTreeMap::new();
        for v in &query.projected_variables {
            let value = match candidate.row.get(v) {
                Some(term) => {
                    bindings.insert(v.clone(), term.clone());
                    self.encoder.encode(term)?
                }
                None => Field::zero(),
            };
            variables.insert(v.clone(), value);
        }

        Ok(WitnessInput {
            branch,
            slots,
            variables,
            bindings,
            hidden,
            root: dataset.root.clone(),
            signature: dataset.signature.clone(),
            public_key: dataset.public_key.clone(),
            scheme: dataset.scheme,
        })
    }

    /// True when `row` extends to a row of one of the branches `program` is
    /// exclusive of. Filters both branches share are
    /// ignored: they were written outside the OPTIONAL.
    fn extended_elsewhere(
        &self,
        query: &CompiledQuery,
        program: &ConstraintProgram,
        row: &Row,
        evaluated: &[Vec<Evaluated>],
    ) -> bool {
        let own = program.filter_ids();
        program.exclusive_of.iter().any(|&j| {
            let shared: BTreeSet<usize> = query.branches[j]
                .filter_ids()
                .intersection(&own)
                .copied()
                .collect();
            evaluated[j]
                .iter()
                .any(|e| e.consistent && e.failed.is_subset(&shared) && compatible(row, &e.row))
        })
    }
}

/// The user-visible part of a row.
fn identity(row: &Row) -> BTreeMap<String, RdfTerm> {
    row.iter()
        .filter(|(k, _)| is_user_key(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// `other` agrees with every user-visible binding of `row`.
fn compatible(row: &Row, other: &Row) -> bool {
    row.iter()
        .filter(|(k, _)| is_user_key(k))
        .all(|(k, v)| other.get(k) == Some(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::dataset;
    use crate::signature::Secp256k1Signer;
    use crate::term::Quad;

    fn ex(local: &str) -> RdfTerm {
        RdfTerm::iri(format!("http://example.org/{local}"))
    }

    fn signed(quads: Vec<Quad>) -> (SignedDataset, Config) {
        let config = Config {
            tree_depth: 4,
            ..Config::default()
        };
        let signer = Secp256k1Signer::from_seed(b"resolver tests").unwrap();
        (dataset::sign(quads, &config, &signer).unwrap(), config)
    }

    fn resolve(quads: Vec<Quad>, body: &str) -> Resolution {
        let (ds, config) = signed(quads);
        let q = compile(&format!("PREFIX ex: <http://example.org/>\n{body}"), &config).unwrap();
        Resolver::new(&ds, &config).unwrap().resolve(&q).unwrap()
    }

    fn names(res: &Resolution, var: &str) -> Vec<String> {
        res.witnesses
            .iter()
            .filter_map(|w| w.bindings.get(var).and_then(|t| t.lexical()).map(str::to_string))
            .collect()
    }

    #[test]
    fn repeated_variables_within_a_pattern() {
        let res = resolve(
            vec![
                Quad::triple(ex("a"), ex("knows"), ex("a")),
                Quad::triple(ex("a"), ex("knows"), ex("b")),
            ],
            "SELECT ?x WHERE { ?x ex:knows ?x }",
        );
        assert_eq!(res.witnesses.len(), 1);
        assert_eq!(res.witnesses[0].bindings["x"], ex("a"));
    }

    #[test]
    fn optional_rows_are_exclusive() {
        let res = resolve(
            vec![
                Quad::triple(ex("a"), ex("p"), ex("b")),
                Quad::triple(ex("c"), ex("p"), ex("d")),
                Quad::triple(ex("b"), ex("name"), RdfTerm::simple_literal("Bee")),
            ],
            "SELECT ?s ?n WHERE { ?s ex:p ?o OPTIONAL { ?o ex:name ?n } }",
        );
        assert_eq!(res.witnesses.len(), 2);
        let a = res.witnesses.iter().find(|w| w.bindings["s"] == ex("a")).unwrap();
        assert_eq!(a.branch, 1);
        assert_eq!(a.bindings["n"], RdfTerm::simple_literal("Bee"));
        let c = res.witnesses.iter().find(|w| w.bindings["s"] == ex("c")).unwrap();
        assert_eq!(c.branch, 0);
        assert!(!c.bindings.contains_key("n"));
        assert!(c.variables["n"].is_zero());
    }

    #[test]
    fn outer_filter_does_not_resurrect_left_rows() {
        let res = resolve(
            vec![
                Quad::triple(ex("a"), ex("p"), ex("b")),
                Quad::triple(ex("c"), ex("p"), ex("d")),
                Quad::triple(ex("b"), ex("name"), RdfTerm::simple_literal("Bee")),
            ],
            "SELECT ?s WHERE { ?s ex:p ?o OPTIONAL { ?o ex:name ?n } FILTER(!BOUND(?n)) }",
        );
        assert_eq!(names(&res, "s"), vec!["http://example.org/c".to_string()]);
    }

    #[test]
    fn unions_accept_each_row_once() {
        let res = resolve(
            vec![
                Quad::triple(ex("a"), ex("p"), ex("b")),
                Quad::triple(ex("a"), ex("q"), ex("b")),
                Quad::triple(ex("c"), ex("q"), ex("d")),
            ],
            "SELECT ?s ?o WHERE { { ?s ex:p ?o } UNION { ?s ex:q ?o } }",
        );
        assert_eq!(res.witnesses.len(), 2);
        assert_eq!(res.witnesses[0].branch, 0);
        assert_eq!(res.witnesses[1].branch, 1);
        assert_eq!(res.witnesses[1].bindings["s"], ex("c"));
    }

    #[test]
    fn transitive_paths_resolve_through_intermediates() {
        let res = resolve(
            vec![
                Quad::triple(ex("a"), ex("next"), ex("b")),
                Quad::triple(ex("b"), ex("next"), ex("c")),
                Quad::triple(ex("c"), ex("next"), ex("d")),
            ],
            "SELECT ?y WHERE { ex:a ex:next+ ?y }",
        );
        let mut ys = names(&res, "y");
        ys.sort();
        assert_eq!(ys, ["b", "c", "d"].map(|l| format!("http://example.org/{l}")));
    }

    #[test]
    fn witnesses_pad_every_slot_and_satisfy_their_program() {
        let (ds, config) = signed(vec![
            Quad::triple(ex("a"), ex("p"), ex("b")),
            Quad::triple(ex("b"), ex("q"), ex("c")),
        ]);
        let q = compile(
            "PREFIX ex: <http://example.org/>\n\
             SELECT ?x WHERE { { ?x ex:p ?y } UNION { ?x ex:p ?y . ?y ex:q ?z } }",
            &config,
        )
        .unwrap();
        let res = Resolver::new(&ds, &config).unwrap().resolve(&q).unwrap();
        // ?z makes the second row distinct from the first
        assert_eq!(res.witnesses.len(), 2);
        let short = res.witnesses.iter().find(|w| w.branch == 0).unwrap();
        assert_eq!(short.slots.len(), 2);
        assert_eq!(short.slots[1].quad_index, short.slots[0].quad_index);
        let hasher = config.hasher();
        for w in &res.witnesses {
            let slots = w.slot_terms();
            let eval = Evaluator::new(&hasher, w.view(&slots));
            assert!(eval.holds(&q.branches[w.branch].full_assertion()).unwrap());
            for slot in &w.slots {
                let leaf = config.encoder().leaf(&slot.terms);
                assert!(slot.proof.verify(&leaf, &ds.root, &hasher));
            }
        }
    }

    #[test]
    fn mismatched_configuration_is_refused() {
        let (ds, config) = signed(vec![Quad::triple(ex("a"), ex("p"), ex("b"))]);
        let other = Config {
            tree_depth: config.tree_depth + 1,
            ..config
        };
        assert!(Resolver::new(&ds, &other).is_err());
    }
}
