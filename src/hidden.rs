//! What each [`HiddenInput`] descriptor means, computed from a binding row.
//!
//! The compiler only decides *which* descriptors a branch needs; every value
//! is derived here, through the same [`Encoder`] that signed the dataset.
//! A descriptor whose operand has the wrong term type (say, the lexical hash
//! of a blank node) yields zero: the compiler guards every use with a
//! constraint that a wrong-typed operand cannot satisfy.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::encoding::Encoder;
use crate::error::{Error, Result};
use crate::field::Field;
use crate::program::{HiddenInput, Operand};
use crate::term::RdfTerm;

/// Variable and blank-node keys of one candidate row.
pub type Row = BTreeMap<String, RdfTerm>;

fn resolve<'a>(operand: &'a Operand, row: &'a Row, index: usize, kind: &'static str) -> Result<&'a RdfTerm> {
    match operand {
        Operand::Term(t) => Ok(t),
        Operand::Variable(key) => row.get(key).ok_or_else(|| Error::HiddenInputComputation {
            index,
            kind,
            reason: format!("operand {key} is unbound"),
        }),
    }
}

fn lexical(term: &RdfTerm) -> Option<&str> {
    term.lexical()
}

pub fn compute(input: &HiddenInput, index: usize, row: &Row, encoder: &Encoder) -> Result<Field> {
    let kind = input.kind();
    let wrap = |e: Error| match e {
        Error::HiddenInputComputation { .. } => e,
        other => Error::HiddenInputComputation {
            index,
            kind,
            reason: other.to_string(),
        },
    };
    let literal_parts = |operand: &Operand| -> Result<Option<crate::encoding::LiteralParts>> {
        match resolve(operand, row, index, kind)? {
            RdfTerm::Literal {
                value,
                lang,
                datatype,
            } => encoder
                .literal_parts(value, lang.as_deref(), datatype)
                .map(Some)
                .map_err(&wrap),
            _ => Ok(None),
        }
    };
    let hasher = encoder.hasher();

    Ok(match input {
        HiddenInput::LexicalHash { operand } => {
            let term = resolve(operand, row, index, kind)?;
            lexical(term).map(|s| hasher.hash_str(s)).unwrap_or_default()
        }
        HiddenInput::SpecialValue { operand } => {
            literal_parts(operand)?.map(|p| p.special).unwrap_or_default()
        }
        HiddenInput::LangHash { operand } => literal_parts(operand)?.map(|p| p.lang).unwrap_or_default(),
        HiddenInput::DatatypeEncoding { operand } => {
            literal_parts(operand)?.map(|p| p.datatype).unwrap_or_default()
        }
        HiddenInput::TermInner { operand } => {
            encoder.inner(resolve(operand, row, index, kind)?).map_err(&wrap)?
        }
        HiddenInput::StringOrder { left, right } => {
            let l = lexical(resolve(left, row, index, kind)?);
            let r = lexical(resolve(right, row, index, kind)?);
            match (l, r) {
                (Some(l), Some(r)) => match l.cmp(r) {
                    Ordering::Less => Field::from_i128(-1),
                    Ordering::Equal => Field::zero(),
                    Ordering::Greater => Field::from_u64(1),
                },
                _ => Field::zero(),
            }
        }
        HiddenInput::StrLen { operand } => {
            let term = resolve(operand, row, index, kind)?;
            lexical(term)
                .map(|s| Field::from_u64(s.chars().count() as u64))
                .unwrap_or_default()
        }
    })
}

/// Values for every descriptor in `used`; all other positions are zero.
pub fn compute_all(
    inputs: &[HiddenInput],
    used: &[usize],
    row: &Row,
    encoder: &Encoder,
) -> Result<Vec<Field>> {
    let mut values = vec![Field::zero(); inputs.len()];
    for &i in used {
        let input = inputs.get(i).ok_or_else(|| Error::HiddenInputComputation {
            index: i,
            kind: "unknown",
            reason: "descriptor index out of range".into(),
        })?;
        values[i] = compute(input, i, row, encoder)?;
    }
    Ok(values)
}
