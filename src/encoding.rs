//! Deterministic RDF term → field encoding.
//!
//! ```text
//! encode(iri)      = hash2([0, H(iri)])
//! encode(_:b)      = hash2([1, H("_:b")])
//! encode(literal)  = hash2([2, hash4([H(value), special, H(lang), encode(<datatype>)])])
//! encode(?v)       = hash2([3, H(v)])
//! encode(DEFAULT)  = hash2([4, H("")])
//! ```
//!
//! `special` is the datatype-specialized value of the literal (see
//! [`special_value`]). The same function backs the compiler's constant
//! folding and the resolver's hidden inputs, so both sides agree on it.

use oxsdatatypes::{Boolean, DateTime, Integer};

use crate::error::{Error, Result};
use crate::field::Field;
use crate::hash::Hasher;
use crate::term::{Quad, RdfTerm, TermTag, XSD};

/// Local names of the XSD types whose special value is the parsed integer.
pub const INTEGER_TYPES: &[&str] = &[
    "integer",
    "int",
    "long",
    "short",
    "byte",
    "nonNegativeInteger",
    "positiveInteger",
    "negativeInteger",
    "nonPositiveInteger",
    "unsignedInt",
    "unsignedLong",
    "unsignedShort",
    "unsignedByte",
];

/// Local names of every XSD numeric type (`isNumeric`).
pub const NUMERIC_TYPES: &[&str] = &[
    "integer",
    "int",
    "long",
    "short",
    "byte",
    "nonNegativeInteger",
    "positiveInteger",
    "negativeInteger",
    "nonPositiveInteger",
    "unsignedInt",
    "unsignedLong",
    "unsignedShort",
    "unsignedByte",
    "decimal",
    "float",
    "double",
];

pub fn xsd_local_name(datatype: &str) -> Option<&str> {
    datatype.strip_prefix(XSD)
}

pub fn is_integer_datatype(datatype: &str) -> bool {
    xsd_local_name(datatype).is_some_and(|local| INTEGER_TYPES.contains(&local))
}

/// How the second component of a literal's inner hash is derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Specialization {
    Boolean(bool),
    Integer(i64),
    /// Milliseconds since 1970-01-01T00:00:00Z.
    EpochMillis(i64),
    /// No specialization applies; the raw string hash is used.
    Raw,
}

pub fn specialize(value: &str, datatype: &str) -> Specialization {
    let Some(local) = xsd_local_name(datatype) else {
        return Specialization::Raw;
    };
    match local {
        "boolean" => value
            .parse::<Boolean>()
            .map(|b| Specialization::Boolean(bool::from(b)))
            .unwrap_or(Specialization::Raw),
        l if INTEGER_TYPES.contains(&l) => value
            .parse::<Integer>()
            .map(|i| Specialization::Integer(i64::from(i)))
            .unwrap_or(Specialization::Raw),
        "dateTime" => epoch_millis(value)
            .map(Specialization::EpochMillis)
            .unwrap_or(Specialization::Raw),
        _ => Specialization::Raw,
    }
}

fn epoch_millis(value: &str) -> Option<i64> {
    let dt = value.parse::<DateTime>().ok()?;
    let epoch = "1970-01-01T00:00:00Z".parse::<DateTime>().ok()?;
    let duration = dt.checked_sub(epoch)?;
    // Floor so sub-millisecond instants before the epoch still sort below it.
    let millis = duration.as_seconds().checked_mul(1000)?.checked_floor()?;
    Integer::try_from(millis).ok().map(i64::from)
}

/// The specialized value of a literal as a field element.
pub fn special_value(hasher: &Hasher, value: &str, datatype: &str) -> Field {
    match specialize(value, datatype) {
        Specialization::Boolean(b) => Field::from_u64(u64::from(b)),
        Specialization::Integer(n) | Specialization::EpochMillis(n) => Field::from_i128(n.into()),
        Specialization::Raw => hasher.hash_str(value),
    }
}

/// The four components under a literal's inner `hash4`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiteralParts {
    pub lexical: Field,
    pub special: Field,
    pub lang: Field,
    pub datatype: Field,
}

#[derive(Clone, Debug)]
pub struct Encoder {
    hasher: Hasher,
    max_literal_bytes: usize,
}

impl Encoder {
    pub fn new(hasher: Hasher, max_literal_bytes: usize) -> Self {
        Self {
            hasher,
            max_literal_bytes,
        }
    }

    pub fn hasher(&self) -> &Hasher {
        &self.hasher
    }

    pub fn encode(&self, term: &RdfTerm) -> Result<Field> {
        let inner = self.inner(term)?;
        Ok(self.tagged(term.tag(), &inner))
    }

    pub fn tagged(&self, tag: TermTag, inner: &Field) -> Field {
        self.hasher.hash2([&Field::from_u64(tag.code()), inner])
    }

    /// The value under the type tag.
    pub fn inner(&self, term: &RdfTerm) -> Result<Field> {
        match term {
            RdfTerm::Iri(iri) => Ok(self.hasher.hash_str(iri)),
            RdfTerm::Blank(label) => Ok(self.hasher.hash_str(&format!("_:{label}"))),
            RdfTerm::Literal {
                value,
                lang,
                datatype,
            } => {
                let parts = self.literal_parts(value, lang.as_deref(), datatype)?;
                Ok(self.combine_literal(&parts))
            }
            RdfTerm::Variable(name) => Ok(self.hasher.hash_str(name)),
            RdfTerm::DefaultGraph => Ok(self.hasher.hash_str("")),
        }
    }

    pub fn literal_parts(
        &self,
        value: &str,
        lang: Option<&str>,
        datatype: &str,
    ) -> Result<LiteralParts> {
        if value.len() > self.max_literal_bytes {
            return Err(Error::EncodingRange {
                len: value.len(),
                max: self.max_literal_bytes,
            });
        }
        Ok(LiteralParts {
            lexical: self.hasher.hash_str(value),
            special: special_value(&self.hasher, value, datatype),
            lang: self.hasher.hash_str(lang.unwrap_or("")),
            datatype: self.encode_iri(datatype),
        })
    }

    pub fn combine_literal(&self, parts: &LiteralParts) -> Field {
        self.hasher
            .hash4([&parts.lexical, &parts.special, &parts.lang, &parts.datatype])
    }

    pub fn encode_iri(&self, iri: &str) -> Field {
        self.tagged(TermTag::Iri, &self.hasher.hash_str(iri))
    }

    pub fn encode_quad(&self, quad: &Quad) -> Result<[Field; 4]> {
        Ok([
            self.encode(&quad.subject)?,
            self.encode(&quad.predicate)?,
            self.encode(&quad.object)?,
            self.encode(&quad.graph)?,
        ])
    }

    /// Merkle leaf of an encoded quad.
    pub fn leaf(&self, terms: &[Field; 4]) -> Field {
        self.hasher
            .hash4([&terms[0], &terms[1], &terms[2], &terms[3]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashSuite;
    use crate::term::{XSD_BOOLEAN, XSD_DATE_TIME, XSD_INTEGER, XSD_STRING};
    use proptest::prelude::*;

    fn encoder() -> Encoder {
        Encoder::new(Hasher::new(HashSuite::Blake2s), 64)
    }

    #[test]
    fn specialization_follows_datatype() {
        assert_eq!(specialize("true", XSD_BOOLEAN), Specialization::Boolean(true));
        assert_eq!(specialize("0", XSD_BOOLEAN), Specialization::Boolean(false));
        assert_eq!(specialize("30", XSD_INTEGER), Specialization::Integer(30));
        assert_eq!(
            specialize("-7", "http://www.w3.org/2001/XMLSchema#short"),
            Specialization::Integer(-7)
        );
        assert_eq!(
            specialize("1970-01-01T00:00:01Z", XSD_DATE_TIME),
            Specialization::EpochMillis(1000)
        );
        assert_eq!(specialize("thirty", XSD_INTEGER), Specialization::Raw);
        assert_eq!(specialize("30", XSD_STRING), Specialization::Raw);
        assert_eq!(specialize("30", "http://example.org/custom"), Specialization::Raw);
    }

    #[test]
    fn date_times_are_exact_epoch_millis() {
        let millis = |v: &str| specialize(v, XSD_DATE_TIME);
        assert_eq!(millis("1969-12-31T23:59:59Z"), Specialization::EpochMillis(-1000));
        assert_eq!(millis("1969-12-31T23:59:59.9995Z"), Specialization::EpochMillis(-1));
        assert_eq!(millis("1970-01-01T00:00:00.0005Z"), Specialization::EpochMillis(0));
        assert_eq!(millis("1900-01-01T00:00:00Z"), Specialization::EpochMillis(-2_208_988_800_000));
        // Beyond 2^53 ms a double drops the last millisecond.
        assert_eq!(
            millis("287396-10-12T08:59:00.993Z"),
            Specialization::EpochMillis(9_007_199_254_740_993)
        );
        assert_eq!(
            millis("2024-01-01T01:00:00.123+01:00"),
            Specialization::EpochMillis(1_704_067_200_123)
        );
    }

    #[test]
    fn integer_special_value_is_the_number() {
        let h = Hasher::default();
        assert_eq!(special_value(&h, "30", XSD_INTEGER), Field::from_u64(30));
        assert_eq!(special_value(&h, "-2", XSD_INTEGER), Field::from_i128(-2));
        assert_eq!(special_value(&h, "abc", XSD_INTEGER), h.hash_str("abc"));
    }

    #[test]
    fn tags_separate_term_kinds() {
        let enc = encoder();
        let iri = enc.encode(&RdfTerm::iri("x")).unwrap();
        let var = enc.encode(&RdfTerm::Variable("x".into())).unwrap();
        let lit = enc.encode(&RdfTerm::simple_literal("x")).unwrap();
        assert_ne!(iri, var);
        assert_ne!(iri, lit);
        assert_eq!(enc.encode_iri("x"), iri);
    }

    #[test]
    fn language_and_datatype_change_the_encoding() {
        let enc = encoder();
        let plain = enc.encode(&RdfTerm::simple_literal("chat")).unwrap();
        let en = enc.encode(&RdfTerm::lang_literal("chat", "en")).unwrap();
        let fr = enc.encode(&RdfTerm::lang_literal("chat", "fr")).unwrap();
        assert_ne!(plain, en);
        assert_ne!(en, fr);
    }

    #[test]
    fn oversized_literals_are_rejected() {
        let enc = encoder();
        let long = "a".repeat(65);
        match enc.encode(&RdfTerm::simple_literal(long)) {
            Err(Error::EncodingRange { len: 65, max: 64 }) => {}
            other => panic!("expected EncodingRange, got {other:?}"),
        }
        // IRIs are not subject to the packing width.
        assert!(enc.encode(&RdfTerm::iri("a".repeat(200))).is_ok());
    }

    proptest! {
        #[test]
        fn encoding_is_deterministic(value in "[a-zA-Z0-9 ]{0,40}", lang in proptest::option::of("[a-z]{2}")) {
            let term = match lang {
                Some(l) => RdfTerm::lang_literal(value, l),
                None => RdfTerm::simple_literal(value),
            };
            let a = encoder().encode(&term).unwrap();
            let b = encoder().encode(&term.clone()).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
