//! Proving backends.
//!
//! The zero-knowledge prover is a black box behind [`ProofBackend`]. Two
//! implementations ship: [`CheckingBackend`] re-checks a witness in process
//! and emits a transparent digest, [`NargoBackend`] drives the Noir
//! toolchain (`nargo` and `bb`) in a rendered circuit directory.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::eval::Evaluator;
use crate::field::Field;
use crate::hash::Hasher;
use crate::program::CompiledQuery;
use crate::signature;
use crate::witness::WitnessInput;

/// A witness the backend accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WitnessTrace {
    pub branch: usize,
    pub public_inputs: Vec<Field>,
    /// Backend-specific solved witness.
    pub payload: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proof {
    pub bytes: Vec<u8>,
}

impl Proof {
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        hex::decode(s.trim_start_matches("0x"))
            .map(|bytes| Proof { bytes })
            .map_err(|e| Error::Backend(format!("invalid proof hex: {e}")))
    }
}

pub trait ProofBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Solves the circuit for `witness`; `ConstraintUnsatisfied` when the
    /// witness does not satisfy the query.
    fn execute(&self, query: &CompiledQuery, witness: &WitnessInput) -> Result<WitnessTrace>;

    fn prove(&self, query: &CompiledQuery, trace: &WitnessTrace) -> Result<Proof>;

    fn verify(&self, query: &CompiledQuery, proof: &Proof, public_inputs: &[Field]) -> Result<bool>;
}

/// In-process backend without zero knowledge.
///
/// `execute` performs every check the rendered circuit performs: the root
/// signature, each slot's inclusion proof and the branch's constraints. The
/// "proof" is a BLAKE3 digest binding the public inputs to the compiled
/// query, so `verify` only detects tampering with those.
pub struct CheckingBackend {
    hasher: Hasher,
}

impl CheckingBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            hasher: config.hasher(),
        }
    }

    fn digest(query: &CompiledQuery, public_inputs: &[Field]) -> Vec<u8> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(query.config_fingerprint.as_bytes());
        for name in &query.projected_variables {
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
        }
        for input in public_inputs {
            hasher.update(&input.to_be_bytes());
        }
        hasher.finalize().as_bytes().to_vec()
    }
}

impl ProofBackend for CheckingBackend {
    fn name(&self) -> &'static str {
        "checking"
    }

    fn execute(&self, query: &CompiledQuery, witness: &WitnessInput) -> Result<WitnessTrace> {
        let program = query.branches.get(witness.branch).ok_or_else(|| {
            Error::ConstraintUnsatisfied(format!("no branch {}", witness.branch))
        })?;
        if witness.slots.len() != query.bgp_slot_count {
            return Err(Error::ConstraintUnsatisfied(format!(
                "expected {} BGP slots, witness has {}",
                query.bgp_slot_count,
                witness.slots.len()
            )));
        }
        if witness.hidden.len() != query.hidden_inputs.len() {
            return Err(Error::ConstraintUnsatisfied(format!(
                "expected {} hidden values, witness has {}",
                query.hidden_inputs.len(),
                witness.hidden.len()
            )));
        }

        if !query.skip_signing {
            let public_key = hex::decode(&witness.public_key)?;
            let sig = hex::decode(&witness.signature)?;
            if !signature::verify(witness.scheme, &public_key, &witness.root.to_be_bytes(), &sig) {
                return Err(Error::ConstraintUnsatisfied("root signature does not verify".into()));
            }
            for (i, slot) in witness.slots.iter().enumerate() {
                let [s, p, o, g] = &slot.terms;
                let leaf = self.hasher.hash4([s, p, o, g]);
                if !slot.proof.verify(&leaf, &witness.root, &self.hasher) {
                    return Err(Error::ConstraintUnsatisfied(format!(
                        "inclusion proof of slot {i} does not reach the root"
                    )));
                }
            }
        }

        let slots = witness.slot_terms();
        Evaluator::new(&self.hasher, witness.view(&slots)).check(&program.full_assertion())?;

        let public_inputs = witness.public_inputs(query);
        Ok(WitnessTrace {
            branch: witness.branch,
            payload: Self::digest(query, &public_inputs),
            public_inputs,
        })
    }

    fn prove(&self, _query: &CompiledQuery, trace: &WitnessTrace) -> Result<Proof> {
        Ok(Proof {
            bytes: trace.payload.clone(),
        })
    }

    fn verify(&self, query: &CompiledQuery, proof: &Proof, public_inputs: &[Field]) -> Result<bool> {
        Ok(proof.bytes == Self::digest(query, public_inputs))
    }
}

/// Shells out to `nargo` and `bb` inside a circuit directory produced by
/// [`crate::render::Circuit::write_to`].
pub struct NargoBackend {
    circuit_dir: PathBuf,
    nargo: PathBuf,
    bb: PathBuf,
    next: AtomicUsize,
    verification_key: Mutex<Option<PathBuf>>,
}

impl NargoBackend {
    pub fn new(circuit_dir: impl Into<PathBuf>) -> Self {
        Self::with_binaries(circuit_dir, "nargo", "bb")
    }

    pub fn with_binaries(
        circuit_dir: impl Into<PathBuf>,
        nargo: impl Into<PathBuf>,
        bb: impl Into<PathBuf>,
    ) -> Self {
        Self {
            circuit_dir: circuit_dir.into(),
            nargo: nargo.into(),
            bb: bb.into(),
            next: AtomicUsize::new(0),
            verification_key: Mutex::new(None),
        }
    }

    fn target(&self) -> PathBuf {
        self.circuit_dir.join("target")
    }

    fn bytecode(&self) -> PathBuf {
        self.target().join("sparql_proof.json")
    }

    /// Unique per call, so parallel items never share files.
    fn ticket(&self) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    fn run(&self, program: &Path, args: &[&OsStr]) -> Result<Output> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        debug!(program = %program.display(), ?args, "running backend command");
        let output = cmd
            .output()
            .map_err(|e| Error::Backend(format!("failed to run {}: {e}", program.display())))?;
        Ok(output)
    }

    fn run_checked(&self, program: &Path, args: &[&OsStr]) -> Result<Output> {
        let output = self.run(program, args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Backend(format!(
                "{} failed:\n{stderr}",
                program.display()
            )));
        }
        Ok(output)
    }

    fn verification_key(&self) -> Result<PathBuf> {
        let mut vk = self.verification_key.lock();
        if let Some(path) = vk.as_ref() {
            return Ok(path.clone());
        }
        let out_dir = self.target().join("vk");
        fs::create_dir_all(&out_dir)?;
        self.run_checked(
            &self.bb,
            &[
                OsStr::new("write_vk"),
                OsStr::new("-b"),
                self.bytecode().as_os_str(),
                OsStr::new("-o"),
                out_dir.as_os_str(),
            ],
        )?;
        let path = out_dir.join("vk");
        *vk = Some(path.clone());
        Ok(path)
    }
}

impl ProofBackend for NargoBackend {
    fn name(&self) -> &'static str {
        "nargo"
    }

    fn execute(&self, query: &CompiledQuery, witness: &WitnessInput) -> Result<WitnessTrace> {
        let n = self.ticket();
        let prover = format!("Prover_{n}");
        let prover_path = self.circuit_dir.join(format!("{prover}.toml"));
        fs::write(&prover_path, witness.to_prover_toml(query)?)?;

        let witness_name = format!("w{n}");
        let result = self.run(
            &self.nargo,
            &[
                OsStr::new("execute"),
                OsStr::new("--program-dir"),
                self.circuit_dir.as_os_str(),
                OsStr::new("-p"),
                OsStr::new(&prover),
                OsStr::new(&witness_name),
            ],
        );
        remove_scratch(&prover_path);
        let output = result?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(if stderr.contains("Failed assertion") {
                Error::ConstraintUnsatisfied(stderr.trim().to_string())
            } else {
                Error::Backend(format!("nargo execute failed:\n{stderr}"))
            });
        }

        let solved = self.target().join(format!("{witness_name}.gz"));
        let payload = fs::read(&solved)?;
        remove_scratch(&solved);
        Ok(WitnessTrace {
            branch: witness.branch,
            public_inputs: witness.public_inputs(query),
            payload,
        })
    }

    fn prove(&self, _query: &CompiledQuery, trace: &WitnessTrace) -> Result<Proof> {
        let n = self.ticket();
        let work = self.target().join(format!("prove_{n}"));
        fs::create_dir_all(&work)?;
        let witness = work.join("witness.gz");
        fs::write(&witness, &trace.payload)?;

        let result = self.run_checked(
            &self.bb,
            &[
                OsStr::new("prove"),
                OsStr::new("-b"),
                self.bytecode().as_os_str(),
                OsStr::new("-w"),
                witness.as_os_str(),
                OsStr::new("-o"),
                work.as_os_str(),
            ],
        );
        let proof = result.and_then(|_| Ok(fs::read(work.join("proof"))?));
        remove_scratch(&work);
        Ok(Proof { bytes: proof? })
    }

    fn verify(&self, _query: &CompiledQuery, proof: &Proof, public_inputs: &[Field]) -> Result<bool> {
        let vk = self.verification_key()?;
        let n = self.ticket();
        let work = self.target().join(format!("verify_{n}"));
        fs::create_dir_all(&work)?;
        let proof_path = work.join("proof");
        let inputs_path = work.join("public_inputs");
        fs::write(&proof_path, &proof.bytes)?;
        let inputs: Vec<u8> = public_inputs.iter().flat_map(|f| f.to_be_bytes()).collect();
        fs::write(&inputs_path, inputs)?;

        let output = self.run(
            &self.bb,
            &[
                OsStr::new("verify"),
                OsStr::new("-k"),
                vk.as_os_str(),
                OsStr::new("-p"),
                proof_path.as_os_str(),
                OsStr::new("-i"),
                inputs_path.as_os_str(),
            ],
        );
        remove_scratch(&work);
        Ok(output?.status.success())
    }
}

/// Removes a per-call file or directory; failures are logged, not raised.
fn remove_scratch(path: &Path) {
    let removed = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    if let Err(e) = removed {
        warn!(path = %path.display(), error = %e, "failed to remove backend scratch file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::dataset::sign;
    use crate::resolver::Resolver;
    use crate::signature::Secp256k1Signer;
    use crate::term::{Quad, RdfTerm};

    fn fixture() -> (Config, CompiledQuery, Vec<WitnessInput>) {
        let config = Config {
            tree_depth: 3,
            ..Config::default()
        };
        let quads = vec![
            Quad::triple(
                RdfTerm::iri("http://example.org/alice"),
                RdfTerm::iri("http://example.org/age"),
                RdfTerm::integer(30),
            ),
            Quad::triple(
                RdfTerm::iri("http://example.org/bob"),
                RdfTerm::iri("http://example.org/age"),
                RdfTerm::integer(12),
            ),
        ];
        let signer = Secp256k1Signer::from_seed(b"backend tests").unwrap();
        let dataset = sign(quads, &config, &signer).unwrap();
        let query = compile(
            "SELECT ?s WHERE { ?s <http://example.org/age> ?a FILTER(?a > 18) }",
            &config,
        )
        .unwrap();
        let witnesses = Resolver::new(&dataset, &config)
            .unwrap()
            .resolve(&query)
            .unwrap()
            .witnesses;
        (config, query, witnesses)
    }

    #[test]
    fn checking_backend_round_trips_a_valid_witness() {
        let (config, query, witnesses) = fixture();
        assert_eq!(witnesses.len(), 1);
        let backend = CheckingBackend::new(&config);
        let trace = backend.execute(&query, &witnesses[0]).unwrap();
        assert_eq!(trace.public_inputs.len(), 2);
        let proof = backend.prove(&query, &trace).unwrap();
        assert!(backend.verify(&query, &proof, &trace.public_inputs).unwrap());

        let mut forged = trace.public_inputs.clone();
        forged[1] = Field::from_u64(7);
        assert!(!backend.verify(&query, &proof, &forged).unwrap());
        assert_eq!(Proof::from_hex(&proof.to_hex()).unwrap(), proof);
    }

    #[test]
    fn checking_backend_rejects_tampered_witnesses() {
        let (config, query, witnesses) = fixture();
        let backend = CheckingBackend::new(&config);

        let mut wrong_root = witnesses[0].clone();
        wrong_root.root = Field::from_u64(1);
        assert!(matches!(
            backend.execute(&query, &wrong_root),
            Err(Error::ConstraintUnsatisfied(_))
        ));

        // a hidden value that no longer matches the committed literal
        let mut wrong_hidden = witnesses[0].clone();
        for h in &mut wrong_hidden.hidden {
            if *h == Field::from_u64(30) {
                *h = Field::from_u64(31);
            }
        }
        assert!(backend.execute(&query, &wrong_hidden).is_err());
    }

    #[test]
    fn unbound_projected_variables_are_pinned_to_zero() {
        let (config, _, _) = fixture();
        let quads = vec![Quad::triple(
            RdfTerm::iri("http://example.org/carol"),
            RdfTerm::iri("http://example.org/age"),
            RdfTerm::integer(40),
        )];
        let signer = Secp256k1Signer::from_seed(b"backend tests").unwrap();
        let dataset = sign(quads, &config, &signer).unwrap();
        let query = compile(
            "PREFIX ex: <http://example.org/>\n\
             SELECT ?s ?n WHERE { ?s ex:age ?a OPTIONAL { ?s ex:name ?n } }",
            &config,
        )
        .unwrap();
        let witnesses = Resolver::new(&dataset, &config)
            .unwrap()
            .resolve(&query)
            .unwrap()
            .witnesses;
        assert_eq!(witnesses.len(), 1);
        let backend = CheckingBackend::new(&config);
        let trace = backend.execute(&query, &witnesses[0]).unwrap();
        assert_eq!(trace.public_inputs[2], Field::zero());

        let mut forged = witnesses[0].clone();
        forged.variables.insert("n".into(), Field::from_u64(0xdead_beef));
        assert!(matches!(
            backend.execute(&query, &forged),
            Err(Error::ConstraintUnsatisfied(_))
        ));
    }

    #[test]
    fn scratch_files_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Prover_0.toml");
        let work = dir.path().join("prove_0");
        fs::write(&file, "x = 1").unwrap();
        fs::create_dir_all(work.join("nested")).unwrap();
        remove_scratch(&file);
        remove_scratch(&work);
        // already gone: logged, not raised
        remove_scratch(&file);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn nargo_backend_reports_a_missing_toolchain() {
        let (_, query, witnesses) = fixture();
        let dir = tempfile::tempdir().unwrap();
        let backend = NargoBackend::with_binaries(
            dir.path(),
            dir.path().join("no-such-nargo"),
            dir.path().join("no-such-bb"),
        );
        let err = backend.execute(&query, &witnesses[0]).unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
        assert!(err.is_recoverable());
        // the Prover.toml is cleaned up even on failure
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
