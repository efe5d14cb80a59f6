//! RDF terms and quads as seen by the encoder, the tree and the resolver.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const XSD: &str = "http://www.w3.org/2001/XMLSchema#";
pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
pub const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
pub const XSD_DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";
pub const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";

/// Type tags mixed into every term encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TermTag {
    Iri = 0,
    Blank = 1,
    Literal = 2,
    Variable = 3,
    DefaultGraph = 4,
}

impl TermTag {
    pub fn code(self) -> u64 {
        self as u64
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "termType", content = "value")]
pub enum RdfTerm {
    Iri(String),
    Blank(String),
    Literal {
        value: String,
        lang: Option<String>,
        datatype: String,
    },
    Variable(String),
    DefaultGraph,
}

impl RdfTerm {
    pub fn iri(iri: impl Into<String>) -> Self {
        RdfTerm::Iri(iri.into())
    }

    pub fn blank(label: impl Into<String>) -> Self {
        RdfTerm::Blank(label.into())
    }

    pub fn typed_literal(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        RdfTerm::Literal {
            value: value.into(),
            lang: None,
            datatype: datatype.into(),
        }
    }

    pub fn simple_literal(value: impl Into<String>) -> Self {
        RdfTerm::typed_literal(value, XSD_STRING)
    }

    pub fn lang_literal(value: impl Into<String>, lang: impl Into<String>) -> Self {
        RdfTerm::Literal {
            value: value.into(),
            lang: Some(lang.into()),
            datatype: RDF_LANG_STRING.to_string(),
        }
    }

    pub fn integer(n: i64) -> Self {
        RdfTerm::typed_literal(n.to_string(), XSD_INTEGER)
    }

    pub fn tag(&self) -> TermTag {
        match self {
            RdfTerm::Iri(_) => TermTag::Iri,
            RdfTerm::Blank(_) => TermTag::Blank,
            RdfTerm::Literal { .. } => TermTag::Literal,
            RdfTerm::Variable(_) => TermTag::Variable,
            RdfTerm::DefaultGraph => TermTag::DefaultGraph,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, RdfTerm::Literal { .. })
    }

    /// Lexical form of a literal, IRI string of an IRI.
    pub fn lexical(&self) -> Option<&str> {
        match self {
            RdfTerm::Iri(iri) => Some(iri),
            RdfTerm::Literal { value, .. } => Some(value),
            _ => None,
        }
    }

    pub(crate) fn from_named_node(nn: &spargebra::term::NamedNode) -> Self {
        RdfTerm::Iri(nn.as_str().to_string())
    }

    pub(crate) fn from_literal(l: &spargebra::term::Literal) -> Self {
        RdfTerm::Literal {
            value: l.value().to_string(),
            lang: l.language().map(str::to_string),
            datatype: l.datatype().as_str().to_string(),
        }
    }

    pub fn from_oxrdf(term: &oxrdf::Term) -> Result<Self> {
        match term {
            oxrdf::Term::NamedNode(nn) => Ok(RdfTerm::Iri(nn.as_str().to_string())),
            oxrdf::Term::BlankNode(bn) => Ok(RdfTerm::Blank(bn.as_str().to_string())),
            oxrdf::Term::Literal(l) => Ok(RdfTerm::Literal {
                value: l.value().to_string(),
                lang: l.language().map(str::to_string),
                datatype: l.datatype().as_str().to_string(),
            }),
            #[allow(unreachable_patterns)]
            _ => Err(Error::unsupported("triple terms in data")),
        }
    }

    pub fn from_oxrdf_graph(graph: &oxrdf::GraphName) -> Self {
        match graph {
            oxrdf::GraphName::NamedNode(nn) => RdfTerm::Iri(nn.as_str().to_string()),
            oxrdf::GraphName::BlankNode(bn) => RdfTerm::Blank(bn.as_str().to_string()),
            oxrdf::GraphName::DefaultGraph => RdfTerm::DefaultGraph,
        }
    }
}

impl fmt::Display for RdfTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RdfTerm::Iri(iri) => write!(f, "<{iri}>"),
            RdfTerm::Blank(label) => write!(f, "_:{label}"),
            RdfTerm::Literal {
                value,
                lang: Some(lang),
                ..
            } => write!(f, "{value:?}@{lang}"),
            RdfTerm::Literal { value, datatype, .. } if datatype == XSD_STRING => {
                write!(f, "{value:?}")
            }
            RdfTerm::Literal { value, datatype, .. } => write!(f, "{value:?}^^<{datatype}>"),
            RdfTerm::Variable(name) => write!(f, "?{name}"),
            RdfTerm::DefaultGraph => f.write_str("DEFAULT"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quad {
    pub subject: RdfTerm,
    pub predicate: RdfTerm,
    pub object: RdfTerm,
    pub graph: RdfTerm,
}

impl Quad {
    pub fn new(subject: RdfTerm, predicate: RdfTerm, object: RdfTerm, graph: RdfTerm) -> Self {
        Self {
            subject,
            predicate,
            object,
            graph,
        }
    }

    /// A triple in the default graph.
    pub fn triple(subject: RdfTerm, predicate: RdfTerm, object: RdfTerm) -> Self {
        Self::new(subject, predicate, object, RdfTerm::DefaultGraph)
    }

    pub fn terms(&self) -> [&RdfTerm; 4] {
        [&self.subject, &self.predicate, &self.object, &self.graph]
    }

    pub fn from_oxrdf(quad: &oxrdf::Quad) -> Result<Self> {
        Ok(Self {
            subject: RdfTerm::from_oxrdf(&oxrdf::Term::from(quad.subject.clone()))?,
            predicate: RdfTerm::Iri(quad.predicate.as_str().to_string()),
            object: RdfTerm::from_oxrdf(&quad.object)?,
            graph: RdfTerm::from_oxrdf_graph(&quad.graph_name),
        })
    }
}

impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)?;
        if self.graph != RdfTerm::DefaultGraph {
            write!(f, " {}", self.graph)?;
        }
        f.write_str(" .")
    }
}
