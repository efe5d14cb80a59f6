//! Off-circuit evaluation of constraint programs.
//!
//! Mirrors what the rendered circuit computes: the resolver uses it to
//! accept or reject candidates and the checking backend uses it to validate
//! witnesses.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::field::Field;
use crate::hash::Hasher;
use crate::program::{Assertion, FieldExpr};

/// The witness values a program reads.
#[derive(Clone, Copy, Debug)]
pub struct WitnessView<'a> {
    pub slots: &'a [[Field; 4]],
    pub variables: &'a BTreeMap<String, Field>,
    pub hidden: &'a [Field],
}

pub struct Evaluator<'a> {
    hasher: &'a Hasher,
    view: WitnessView<'a>,
}

impl<'a> Evaluator<'a> {
    pub fn new(hasher: &'a Hasher, view: WitnessView<'a>) -> Self {
        Self { hasher, view }
    }

    pub fn field(&self, expr: &FieldExpr) -> Result<Field> {
        match expr {
            FieldExpr::Slot { slot, pos } => self
                .view
                .slots
                .get(*slot)
                .and_then(|terms| terms.get(*pos))
                .cloned()
                .ok_or_else(|| {
                    Error::ConstraintUnsatisfied(format!("slot bgp[{slot}].terms[{pos}] missing"))
                }),
            FieldExpr::Var(name) => self.view.variables.get(name).cloned().ok_or_else(|| {
                Error::ConstraintUnsatisfied(format!("variable {name} missing from witness"))
            }),
            FieldExpr::Hidden(i) => self.view.hidden.get(*i).cloned().ok_or_else(|| {
                Error::ConstraintUnsatisfied(format!("hidden[{i}] missing from witness"))
            }),
            FieldExpr::Const(f) => Ok(f.clone()),
            FieldExpr::Hash2(parts) => {
                let [a, b] = parts.as_ref();
                Ok(self.hasher.hash2([&self.field(a)?, &self.field(b)?]))
            }
            FieldExpr::Hash4(parts) => {
                let [a, b, c, d] = parts.as_ref();
                Ok(self.hasher.hash4([
                    &self.field(a)?,
                    &self.field(b)?,
                    &self.field(c)?,
                    &self.field(d)?,
                ]))
            }
        }
    }

    pub fn holds(&self, assertion: &Assertion) -> Result<bool> {
        Ok(match assertion {
            Assertion::True => true,
            Assertion::False => false,
            Assertion::Eq(a, b) => self.field(a)? == self.field(b)?,
            Assertion::Compare { op, left, right } => {
                match (as_i64(&self.field(left)?), as_i64(&self.field(right)?)) {
                    (Some(l), Some(r)) => op.holds(&l, &r),
                    _ => false,
                }
            }
            Assertion::Not(inner) => !self.holds(inner)?,
            Assertion::And(parts) => {
                for p in parts {
                    if !self.holds(p)? {
                        return Ok(false);
                    }
                }
                true
            }
            Assertion::Or(parts) => {
                for p in parts {
                    if self.holds(p)? {
                        return Ok(true);
                    }
                }
                false
            }
        })
    }

    /// Like [`holds`](Self::holds) but reports the first failing conjunct.
    pub fn check(&self, assertion: &Assertion) -> Result<()> {
        match assertion {
            Assertion::And(parts) => parts.iter().try_for_each(|p| self.check(p)),
            other if self.holds(other)? => Ok(()),
            other => Err(Error::ConstraintUnsatisfied(format!("{other:?}"))),
        }
    }
}

/// The circuit compares `x as i64`; values outside that range never satisfy
/// a comparison.
fn as_i64(f: &Field) -> Option<i64> {
    f.to_signed().and_then(|v| i64::try_from(v).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::CompareOp;

    #[test]
    fn evaluates_hashes_and_signed_comparisons() {
        let hasher = Hasher::default();
        let slots = vec![[
            Field::from_u64(1),
            Field::from_u64(2),
            hasher.hash2([&Field::from_u64(7), &Field::from_u64(8)]),
            Field::zero(),
        ]];
        let mut variables = BTreeMap::new();
        variables.insert("x".to_string(), Field::from_u64(1));
        let hidden = vec![Field::from_i128(-5)];
        let eval = Evaluator::new(
            &hasher,
            WitnessView {
                slots: &slots,
                variables: &variables,
                hidden: &hidden,
            },
        );

        assert!(eval.holds(&Assertion::equal(FieldExpr::slot(0, 0), FieldExpr::Var("x".into()))).unwrap());
        assert!(eval
            .holds(&Assertion::equal(
                FieldExpr::slot(0, 2),
                FieldExpr::hash2(FieldExpr::constant(7), FieldExpr::constant(8)),
            ))
            .unwrap());
        let lt = Assertion::Compare {
            op: CompareOp::Lt,
            left: FieldExpr::Hidden(0),
            right: FieldExpr::constant(0),
        };
        assert!(eval.holds(&lt).unwrap());
        assert!(!eval.holds(&Assertion::not(lt)).unwrap());
        let missing = Assertion::equal(FieldExpr::slot(3, 0), FieldExpr::constant(0));
        assert!(eval.holds(&missing).is_err());
    }

    #[test]
    fn check_names_the_failing_conjunct() {
        let hasher = Hasher::default();
        let variables = BTreeMap::new();
        let eval = Evaluator::new(
            &hasher,
            WitnessView {
                slots: &[],
                variables: &variables,
                hidden: &[],
            },
        );
        let a = Assertion::and([
            Assertion::equal(FieldExpr::constant(1), FieldExpr::constant(1)),
            Assertion::equal(FieldExpr::constant(1), FieldExpr::constant(2)),
        ]);
        match eval.check(&a) {
            Err(Error::ConstraintUnsatisfied(msg)) => assert!(msg.contains("Eq")),
            other => panic!("expected ConstraintUnsatisfied, got {other:?}"),
        }
    }
}
