//! Error taxonomy shared by every stage of the pipeline.
//!
//! Compile-time and signing-time variants are fatal for the request that
//! raised them. The per-binding variants (`HiddenInputComputation`,
//! `ConstraintUnsatisfied`, `Backend`) are recoverable: the resolver and the
//! orchestrator record them per item and keep going.

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unsupported SPARQL feature: {construct}")]
    UnsupportedFeature { construct: String },

    #[error("literal of {len} bytes exceeds the {max}-byte packing width")]
    EncodingRange { len: usize, max: usize },

    #[error("{quads} quads do not fit a tree of capacity {capacity}")]
    TreeCapacity { quads: usize, capacity: u64 },

    #[error("no binding satisfies the query")]
    BindingNotFound,

    #[error("cannot compute hidden input #{index} ({kind}): {reason}")]
    HiddenInputComputation {
        index: usize,
        kind: &'static str,
        reason: String,
    },

    #[error("constraint not satisfied: {0}")]
    ConstraintUnsatisfied(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("signature error: {0}")]
    Signature(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("RDF parse error: {0}")]
    RdfParse(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}

impl Error {
    pub(crate) fn unsupported(construct: impl Into<String>) -> Self {
        Error::UnsupportedFeature {
            construct: construct.into(),
        }
    }

    /// True for the errors that only affect one binding or one batch item.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::BindingNotFound
                | Error::HiddenInputComputation { .. }
                | Error::ConstraintUnsatisfied(_)
                | Error::Backend(_)
        )
    }
}

impl From<k256::ecdsa::Error> for Error {
    fn from(value: k256::ecdsa::Error) -> Self {
        Error::Signature(value.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(value: hex::FromHexError) -> Self {
        Error::Signature(format!("invalid hex: {value}"))
    }
}
