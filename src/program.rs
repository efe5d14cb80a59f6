//! Constraint program AST.
//!
//! A [`CompiledQuery`] holds one [`ConstraintProgram`] per UNION branch.
//! Programs are plain data: the evaluator checks them against a witness, the
//! renderer prints them as Noir, and neither re-derives any semantics.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::algebra::{CompareOp, QueryForm, QueryPattern, SolutionModifiers};
use crate::error::Result;
use crate::field::Field;
use crate::hash::HashSuite;
use crate::term::RdfTerm;

/// A field-valued expression over the witness.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldExpr {
    /// `bgp[slot].terms[pos]`.
    Slot { slot: usize, pos: usize },
    /// A projected variable's public value.
    Var(String),
    Hidden(usize),
    Const(Field),
    Hash2(Box<[FieldExpr; 2]>),
    Hash4(Box<[FieldExpr; 4]>),
}

impl FieldExpr {
    pub fn slot(slot: usize, pos: usize) -> Self {
        FieldExpr::Slot { slot, pos }
    }

    pub fn constant(n: u64) -> Self {
        FieldExpr::Const(Field::from_u64(n))
    }

    pub fn hash2(a: FieldExpr, b: FieldExpr) -> Self {
        FieldExpr::Hash2(Box::new([a, b]))
    }

    pub fn hash4(a: FieldExpr, b: FieldExpr, c: FieldExpr, d: FieldExpr) -> Self {
        FieldExpr::Hash4(Box::new([a, b, c, d]))
    }

    fn collect_hidden(&self, out: &mut BTreeSet<usize>) {
        match self {
            FieldExpr::Hidden(i) => {
                out.insert(*i);
            }
            FieldExpr::Hash2(parts) => parts.iter().for_each(|p| p.collect_hidden(out)),
            FieldExpr::Hash4(parts) => parts.iter().for_each(|p| p.collect_hidden(out)),
            FieldExpr::Slot { .. } | FieldExpr::Var(_) | FieldExpr::Const(_) => {}
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Assertion {
    True,
    False,
    Eq(FieldExpr, FieldExpr),
    /// Signed 64-bit comparison.
    Compare {
        op: CompareOp,
        left: FieldExpr,
        right: FieldExpr,
    },
    Not(Box<Assertion>),
    And(Vec<Assertion>),
    Or(Vec<Assertion>),
}

impl Assertion {
    pub fn equal(a: FieldExpr, b: FieldExpr) -> Self {
        Assertion::Eq(a, b)
    }

    pub fn from_bool(b: bool) -> Self {
        if b { Assertion::True } else { Assertion::False }
    }

    /// Conjunction with `True` dropped and `False` absorbing.
    pub fn and(parts: impl IntoIterator<Item = Assertion>) -> Self {
        let mut out = Vec::new();
        for part in parts {
            match part {
                Assertion::True => {}
                Assertion::False => return Assertion::False,
                Assertion::And(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Assertion::True,
            1 => out.remove(0),
            _ => Assertion::And(out),
        }
    }

    pub fn or(parts: impl IntoIterator<Item = Assertion>) -> Self {
        let mut out = Vec::new();
        for part in parts {
            match part {
                Assertion::False => {}
                Assertion::True => return Assertion::True,
                Assertion::Or(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Assertion::False,
            1 => out.remove(0),
            _ => Assertion::Or(out),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Assertion) -> Self {
        match inner {
            Assertion::True => Assertion::False,
            Assertion::False => Assertion::True,
            Assertion::Not(a) => *a,
            other => Assertion::Not(Box::new(other)),
        }
    }

    pub fn hidden_indices(&self) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        self.collect_hidden(&mut out);
        out
    }

    fn collect_hidden(&self, out: &mut BTreeSet<usize>) {
        match self {
            Assertion::True | Assertion::False => {}
            Assertion::Eq(a, b) | Assertion::Compare { left: a, right: b, .. } => {
                a.collect_hidden(out);
                b.collect_hidden(out);
            }
            Assertion::Not(a) => a.collect_hidden(out),
            Assertion::And(parts) | Assertion::Or(parts) => {
                parts.iter().for_each(|p| p.collect_hidden(out))
            }
        }
    }
}

/// The term a hidden input is derived from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    /// Binding key of a variable or blank node.
    Variable(String),
    Term(RdfTerm),
}

/// A witness value computed off-circuit and checked against public
/// encodings inside the circuit.
///
/// The four literal components (`LexicalHash`, `SpecialValue`, `LangHash`,
/// `DatatypeEncoding`) are always emitted together with a constraint tying
/// them to the operand's encoding. `StringOrder` and `StrLen` are hints the
/// circuit cannot recompute from the encoding.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HiddenInput {
    LexicalHash { operand: Operand },
    SpecialValue { operand: Operand },
    LangHash { operand: Operand },
    DatatypeEncoding { operand: Operand },
    /// The value under the operand's type tag.
    TermInner { operand: Operand },
    /// `-1`, `0` or `1` by code-point order of the lexical forms.
    StringOrder { left: Operand, right: Operand },
    /// Length of the lexical form in characters.
    StrLen { operand: Operand },
}

impl HiddenInput {
    pub fn kind(&self) -> &'static str {
        match self {
            HiddenInput::LexicalHash { .. } => "lexical_hash",
            HiddenInput::SpecialValue { .. } => "special_value",
            HiddenInput::LangHash { .. } => "lang_hash",
            HiddenInput::DatatypeEncoding { .. } => "datatype_encoding",
            HiddenInput::TermInner { .. } => "term_inner",
            HiddenInput::StringOrder { .. } => "string_order",
            HiddenInput::StrLen { .. } => "str_len",
        }
    }
}

/// Where an extended variable takes its value from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtendSource {
    Variable(String),
    Term(RdfTerm),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendStep {
    pub variable: String,
    pub source: ExtendSource,
}

/// One FILTER as it applies to a branch. The same `id` in two branches means
/// the filter was written once above both.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterConstraint {
    pub id: usize,
    /// Includes the guards of any hidden inputs the filter uses.
    pub assertion: Assertion,
}

/// The constraints one UNION branch imposes on a witness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConstraintProgram {
    pub slot_count: usize,
    pub patterns: Vec<QueryPattern>,
    /// Applied by the resolver after the join, in order.
    pub extends: Vec<ExtendStep>,
    /// `variables.x == <source>` for each projected variable, `variables.x == 0`
    /// when this branch leaves it unbound.
    pub bind_constraints: Vec<Assertion>,
    /// Repeated keys and constants in patterns.
    pub equality_constraints: Vec<Assertion>,
    pub filters: Vec<FilterConstraint>,
    /// Indices into [`CompiledQuery::hidden_inputs`] this branch uses.
    pub hidden: Vec<usize>,
    /// Branches whose rows suppress rows of this one (OPTIONAL).
    pub exclusive_of: Vec<usize>,
    /// Every key this branch binds.
    pub bound: BTreeSet<String>,
}

impl ConstraintProgram {
    /// Conjunction of every filter.
    pub fn assertion(&self) -> Assertion {
        Assertion::and(self.filters.iter().map(|f| f.assertion.clone()))
    }

    /// Everything a witness for this branch must satisfy, as one tree.
    pub fn full_assertion(&self) -> Assertion {
        Assertion::and(
            self.bind_constraints
                .iter()
                .chain(&self.equality_constraints)
                .cloned()
                .chain(std::iter::once(self.assertion())),
        )
    }

    pub fn filter_ids(&self) -> BTreeSet<usize> {
        self.filters.iter().map(|f| f.id).collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledQuery {
    pub form: QueryForm,
    pub branches: Vec<ConstraintProgram>,
    /// Width of the witness BGP array; at least 1.
    pub bgp_slot_count: usize,
    pub hidden_inputs: Vec<HiddenInput>,
    pub projected_variables: Vec<String>,
    pub modifiers: SolutionModifiers,
    pub hash_suite: HashSuite,
    pub skip_signing: bool,
    pub config_fingerprint: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchMetadata {
    pub bgp_slot_count: usize,
    pub patterns: Vec<QueryPattern>,
    pub extends: Vec<ExtendStep>,
    pub hidden: Vec<usize>,
    pub exclusive_of: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledProgramMetadata {
    pub form: QueryForm,
    pub bgp_slot_count: usize,
    pub projected_variables: Vec<String>,
    pub hidden_inputs: Vec<HiddenInput>,
    pub branches: Vec<BranchMetadata>,
    pub modifiers: SolutionModifiers,
    pub hash_suite: HashSuite,
    pub skip_signing: bool,
    pub config_fingerprint: String,
}

impl CompiledQuery {
    pub fn metadata(&self) -> CompiledProgramMetadata {
        CompiledProgramMetadata {
            form: self.form,
            bgp_slot_count: self.bgp_slot_count,
            projected_variables: self.projected_variables.clone(),
            hidden_inputs: self.hidden_inputs.clone(),
            branches: self
                .branches
                .iter()
                .map(|b| BranchMetadata {
                    bgp_slot_count: b.slot_count,
                    patterns: b.patterns.clone(),
                    extends: b.extends.clone(),
                    hidden: b.hidden.clone(),
                    exclusive_of: b.exclusive_of.clone(),
                })
                .collect(),
            modifiers: self.modifiers.clone(),
            hash_suite: self.hash_suite,
            skip_signing: self.skip_signing,
            config_fingerprint: self.config_fingerprint.clone(),
        }
    }

    pub fn metadata_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.metadata())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn and_or_simplify() {
        let eq = Assertion::equal(FieldExpr::constant(1), FieldExpr::Hidden(0));
        assert_eq!(Assertion::and([Assertion::True, eq.clone()]), eq);
        assert_eq!(Assertion::and([eq.clone(), Assertion::False]), Assertion::False);
        assert_eq!(Assertion::or([Assertion::False, eq.clone()]), eq);
        assert_eq!(Assertion::or([eq.clone(), Assertion::True]), Assertion::True);
        assert_eq!(Assertion::and(Vec::new()), Assertion::True);
        assert_eq!(Assertion::not(Assertion::not(eq.clone())), eq);
    }

    #[test]
    fn hidden_indices_are_collected_through_hashes() {
        let a = Assertion::and([
            Assertion::equal(
                FieldExpr::slot(0, 2),
                FieldExpr::hash2(
                    FieldExpr::constant(2),
                    FieldExpr::hash4(
                        FieldExpr::Hidden(0),
                        FieldExpr::Hidden(1),
                        FieldExpr::Hidden(2),
                        FieldExpr::Hidden(3),
                    ),
                ),
            ),
            Assertion::Compare {
                op: CompareOp::Ge,
                left: FieldExpr::Hidden(1),
                right: FieldExpr::constant(18),
            },
        ]);
        assert_eq!(a.hidden_indices().into_iter().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn hidden_inputs_serialize_tagged_by_kind() {
        let h = HiddenInput::SpecialValue {
            operand: Operand::Variable("age".into()),
        };
        let json = serde_json::to_value(&h).unwrap();
        assert_eq!(json["kind"], "special_value");
        assert_eq!(json["operand"]["variable"], "age");
    }
}
