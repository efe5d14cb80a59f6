//! Signed datasets: quads, their encodings, the commitment tree and the
//! signature over its root.

use std::collections::HashMap;
use std::fs;
use std::io::BufReader;
use std::path::Path;

use oxrdfio::{RdfFormat, RdfParser};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::field::Field;
use crate::hash::HashSuite;
use crate::merkle::{CommitmentTree, InclusionProof};
use crate::signature::{self, SchemeKind, SignatureScheme};
use crate::term::Quad;

/// Immutable once built. `encoded[i]` and `proofs[i]` belong to `quads[i]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDataset {
    pub depth: usize,
    pub root: Field,
    /// Hex `r || s`.
    pub signature: String,
    /// Hex SEC1-compressed key.
    pub public_key: String,
    #[serde(default)]
    pub scheme: SchemeKind,
    pub hash_suite: HashSuite,
    pub quads: Vec<Quad>,
    pub encoded: Vec<[Field; 4]>,
    pub proofs: Vec<InclusionProof>,
}

/// Encodes `quads`, builds the tree and signs its root.
pub fn sign(quads: Vec<Quad>, config: &Config, signer: &dyn SignatureScheme) -> Result<SignedDataset> {
    config.validate()?;
    let encoder = config.encoder();
    let encoded = quads
        .iter()
        .map(|q| encoder.encode_quad(q))
        .collect::<Result<Vec<_>>>()?;
    let leaves: Vec<Field> = encoded.iter().map(|terms| encoder.leaf(terms)).collect();
    let tree = CommitmentTree::build(leaves, config.tree_depth, encoder.hasher())?;
    let proofs = (0..tree.len())
        .map(|i| tree.proof(i).ok_or(Error::TreeCapacity {
            quads: quads.len(),
            capacity: CommitmentTree::capacity(config.tree_depth),
        }))
        .collect::<Result<Vec<_>>>()?;
    let root = tree.root();
    let signature = signer.sign(&root.to_be_bytes())?;
    info!(
        quads = quads.len(),
        depth = config.tree_depth,
        root = %root,
        "commitment tree built and signed"
    );
    Ok(SignedDataset {
        depth: config.tree_depth,
        root,
        signature: hex::encode(signature),
        public_key: hex::encode(signer.public_key()),
        scheme: signer.kind(),
        hash_suite: config.encoding.hash_suite,
        quads,
        encoded,
        proofs,
    })
}

impl SignedDataset {
    pub fn len(&self) -> usize {
        self.quads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quads.is_empty()
    }

    pub fn signature_bytes(&self) -> Result<Vec<u8>> {
        Ok(hex::decode(&self.signature)?)
    }

    pub fn public_key_bytes(&self) -> Result<Vec<u8>> {
        Ok(hex::decode(&self.public_key)?)
    }

    /// Checks that this dataset was produced under `config`'s encoding and
    /// depth.
    pub fn check_compatible(&self, config: &Config) -> Result<()> {
        if self.hash_suite != config.encoding.hash_suite {
            return Err(Error::Config(format!(
                "dataset was signed with hash suite {}, configuration uses {}",
                self.hash_suite.name(),
                config.encoding.hash_suite.name()
            )));
        }
        if self.depth != config.tree_depth {
            return Err(Error::Config(format!(
                "dataset tree depth {} differs from configured depth {}",
                self.depth, config.tree_depth
            )));
        }
        if self.encoded.len() != self.quads.len() || self.proofs.len() != self.quads.len() {
            return Err(Error::Config(
                "dataset quads, encodings and proofs differ in length".into(),
            ));
        }
        Ok(())
    }

    /// Re-derives every encoding and proof and checks the signature.
    pub fn verify_integrity(&self, config: &Config) -> Result<()> {
        self.check_compatible(config)?;
        let encoder = config.encoder();
        for (i, quad) in self.quads.iter().enumerate() {
            let terms = encoder.encode_quad(quad)?;
            if terms != self.encoded[i] {
                return Err(Error::Signature(format!("encoding of quad #{i} does not match")));
            }
            if !self.proofs[i].verify(&encoder.leaf(&terms), &self.root, encoder.hasher()) {
                return Err(Error::Signature(format!(
                    "inclusion proof of quad #{i} does not reach the root"
                )));
            }
        }
        if !signature::verify(
            self.scheme,
            &self.public_key_bytes()?,
            &self.root.to_be_bytes(),
            &self.signature_bytes()?,
        ) {
            return Err(Error::Signature("root signature does not verify".into()));
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

fn guess_format(path: &Path) -> Option<RdfFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "xml" => Some(RdfFormat::RdfXml),
        other => RdfFormat::from_extension(other),
    }
}

/// Reads every quad of an RDF file, in document order.
pub fn load_quads(path: impl AsRef<Path>) -> Result<Vec<Quad>> {
    let path = path.as_ref();
    let format = guess_format(path).ok_or_else(|| {
        Error::RdfParse(format!("cannot guess RDF format of {}", path.display()))
    })?;
    let reader = BufReader::new(fs::File::open(path)?);
    let mut quads = Vec::new();
    for quad in RdfParser::from_format(format).for_reader(reader) {
        let quad = quad.map_err(|e| Error::RdfParse(e.to_string()))?;
        quads.push(Quad::from_oxrdf(&quad)?);
    }
    debug!(path = %path.display(), quads = quads.len(), "loaded RDF");
    Ok(quads)
}

/// Parses RDF text in the given format.
pub fn parse_quads(data: &str, format: RdfFormat) -> Result<Vec<Quad>> {
    RdfParser::from_format(format)
        .for_reader(data.as_bytes())
        .map(|quad| {
            let quad = quad.map_err(|e| Error::RdfParse(e.to_string()))?;
            Quad::from_oxrdf(&quad)
        })
        .collect()
}

/// Read-only lookup structure over a signed dataset, shared by every
/// resolution against it.
#[derive(Debug)]
pub struct DatasetIndex<'a> {
    dataset: &'a SignedDataset,
    // (term position, encoding) -> quad indices in dataset order.
    by_position: [HashMap<Field, Vec<usize>>; 4],
}

impl<'a> DatasetIndex<'a> {
    pub fn new(dataset: &'a SignedDataset) -> Self {
        let mut by_position: [HashMap<Field, Vec<usize>>; 4] = Default::default();
        for (i, terms) in dataset.encoded.iter().enumerate() {
            for (pos, enc) in terms.iter().enumerate() {
                by_position[pos].entry(enc.clone()).or_default().push(i);
            }
        }
        Self {
            dataset,
            by_position,
        }
    }

    pub fn dataset(&self) -> &'a SignedDataset {
        self.dataset
    }

    /// Quad indices whose encoded terms match every fixed position, in
    /// dataset order. Unconstrained positions are `None`.
    pub fn candidates(&self, fixed: &[Option<Field>; 4]) -> Vec<usize> {
        let mut narrowest: Option<&Vec<usize>> = None;
        for (pos, value) in fixed.iter().enumerate() {
            if let Some(value) = value {
                match self.by_position[pos].get(value) {
                    None => return Vec::new(),
                    Some(list) if narrowest.is_none_or(|n| list.len() < n.len()) => {
                        narrowest = Some(list)
                    }
                    Some(_) => {}
                }
            }
        }
        let matches = |i: &usize| {
            fixed
                .iter()
                .zip(&self.dataset.encoded[*i])
                .all(|(want, have)| want.as_ref().is_none_or(|w| w == have))
        };
        match narrowest {
            Some(list) => list.iter().copied().filter(matches).collect(),
            None => (0..self.dataset.len()).collect(),
        }
    }
}
