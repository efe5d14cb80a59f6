//! Zero-knowledge proofs of SPARQL query results over signed RDF datasets.
//!
//! A dataset holder commits to their quads with a signed Merkle root
//! ([`sign`]), a query is compiled into a fixed-shape constraint program
//! ([`compile`]) and rendered as a Noir circuit ([`render::render`]), and
//! every satisfying binding is turned into a witness and proved
//! ([`resolve_and_prove`]). A verifier sees the query, the public key, the
//! signed root and the projected bindings, nothing else.
//!
//! The library compiles to WebAssembly; the `transform` bindings expose the
//! circuit renderer to JavaScript.

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::wasm_bindgen;

use std::sync::Arc;

use tracing::warn;

pub mod algebra;
pub mod backend;
pub mod compiler;
pub mod config;
pub mod dataset;
pub mod encoding;
pub mod error;
pub mod eval;
pub mod field;
pub mod hash;
pub mod hidden;
pub mod merkle;
pub mod normalize;
pub mod orchestrator;
pub mod program;
pub mod render;
pub mod resolver;
pub mod signature;
pub mod term;
pub mod witness;

pub use backend::{CheckingBackend, NargoBackend, Proof, ProofBackend, WitnessTrace};
pub use compiler::{compile, CompileCache};
pub use config::Config;
pub use dataset::{sign, SignedDataset};
pub use error::{Error, Result};
pub use field::Field;
pub use orchestrator::{ProofBatch, ProofMode, ProofOrchestrator, VerifySummary};
pub use program::{CompiledProgramMetadata, CompiledQuery};
pub use resolver::{Resolution, Resolver};
pub use term::{Quad, RdfTerm};
pub use witness::WitnessInput;

fn check_program(program: &CompiledQuery, config: &Config) -> Result<()> {
    if program.config_fingerprint != config.fingerprint() {
        return Err(Error::Config(
            "query was compiled under a different configuration".into(),
        ));
    }
    Ok(())
}

/// Resolves every binding of `program` against `dataset` and proves each one.
///
/// No satisfying binding is an empty batch, not an error. Bindings whose
/// hidden inputs cannot be computed are logged and left out.
pub fn resolve_and_prove(
    program: &CompiledQuery,
    dataset: &SignedDataset,
    backend: Arc<dyn ProofBackend>,
    config: &Config,
    mode: ProofMode,
) -> Result<ProofBatch> {
    check_program(program, config)?;
    let resolution = Resolver::new(dataset, config)?.resolve(program)?;
    for skipped in &resolution.skipped {
        warn!(branch = skipped.branch, reason = %skipped.reason, "binding left out of the batch");
    }
    let orchestrator = ProofOrchestrator::new(backend, config.workers)?;
    Ok(orchestrator.run(program, &resolution.witnesses, mode))
}

/// Re-verifies every proof of a batch.
pub fn verify(
    program: &CompiledQuery,
    batch: &ProofBatch,
    backend: Arc<dyn ProofBackend>,
    config: &Config,
) -> Result<VerifySummary> {
    check_program(program, config)?;
    let orchestrator = ProofOrchestrator::new(backend, config.workers)?;
    Ok(orchestrator.verify(program, batch))
}

/// Compiles and renders `query`, returning the circuit as JSON.
pub fn transform_query(query: &str, skip_signing: bool) -> Result<String> {
    let mut config = Config::default();
    config.render.skip_signing = skip_signing;
    let compiled = compile(query, &config)?;
    Ok(serde_json::to_string(&render::render(&compiled))?)
}

#[cfg(any(target_arch = "wasm32", test))]
fn error_json(e: &Error) -> String {
    serde_json::json!({ "error": e.to_string() }).to_string()
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn transform(query: &str) -> String {
    transform_with_options(query, false)
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn transform_with_options(query: &str, skip_signing: bool) -> String {
    transform_query(query, skip_signing).unwrap_or_else(|e| error_json(&e))
}
