//! Parallel proving over a batch of witnesses.
//!
//! Every witness is independent: one failing item is recorded in the batch
//! and never aborts its siblings.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::{Proof, ProofBackend};
use crate::error::{Error, Result};
use crate::field::Field;
use crate::program::CompiledQuery;
use crate::witness::WitnessInput;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofMode {
    /// Execute only: check that each witness satisfies the circuit.
    WitnessOnly,
    #[default]
    Prove,
    ProveAndVerify,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofItem {
    /// Position of the witness in the input list.
    pub index: usize,
    pub branch: usize,
    /// Hex-encoded proof bytes.
    pub proof: Option<String>,
    pub public_inputs: Vec<Field>,
    pub timing_ms: u64,
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub witness_only: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofBatch {
    pub items: Vec<ProofItem>,
    pub summary: BatchSummary,
}

impl ProofBatch {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifySummary {
    pub verified: usize,
    pub failed: usize,
    pub total: usize,
    /// Every item carried a proof and every proof verified.
    pub success: bool,
}

pub struct ProofOrchestrator {
    backend: Arc<dyn ProofBackend>,
    pool: ThreadPool,
}

impl ProofOrchestrator {
    pub fn new(backend: Arc<dyn ProofBackend>, workers: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("prover-{i}"))
            .build()
            .map_err(|e| Error::Backend(format!("cannot start prover pool: {e}")))?;
        Ok(Self { backend, pool })
    }

    pub fn backend(&self) -> &dyn ProofBackend {
        self.backend.as_ref()
    }

    pub fn run(&self, query: &CompiledQuery, witnesses: &[WitnessInput], mode: ProofMode) -> ProofBatch {
        let items: Vec<ProofItem> = self.pool.install(|| {
            witnesses
                .par_iter()
                .enumerate()
                .map(|(index, witness)| self.run_one(query, index, witness, mode))
                .collect()
        });

        let failed = items.iter().filter(|i| i.error.is_some()).count();
        let summary = BatchSummary {
            total: items.len(),
            succeeded: items.len() - failed,
            failed,
            witness_only: mode == ProofMode::WitnessOnly,
        };
        info!(
            backend = self.backend.name(),
            total = summary.total,
            succeeded = summary.succeeded,
            failed = summary.failed,
            ?mode,
            "proof batch finished"
        );
        ProofBatch { items, summary }
    }

    fn run_one(&self, query: &CompiledQuery, index: usize, witness: &WitnessInput, mode: ProofMode) -> ProofItem {
        let start = Instant::now();
        let mut item = ProofItem {
            index,
            branch: witness.branch,
            proof: None,
            public_inputs: Vec::new(),
            timing_ms: 0,
            error: None,
            verified: None,
        };

        let outcome = (|| -> Result<()> {
            let trace = self.backend.execute(query, witness)?;
            item.public_inputs = trace.public_inputs.clone();
            if mode == ProofMode::WitnessOnly {
                return Ok(());
            }
            let proof = self.backend.prove(query, &trace)?;
            item.proof = Some(proof.to_hex());
            if mode == ProofMode::ProveAndVerify {
                let ok = self.backend.verify(query, &proof, &trace.public_inputs)?;
                item.verified = Some(ok);
                if !ok {
                    return Err(Error::Backend("proof did not verify".into()));
                }
            }
            Ok(())
        })();

        if let Err(e) = outcome {
            warn!(index, branch = witness.branch, error = %e, "proof item failed");
            item.error = Some(e.to_string());
        }
        item.timing_ms = start.elapsed().as_millis() as u64;
        item
    }

    /// Re-verifies every item of `batch`. Items without a proof count as
    /// failed.
    pub fn verify(&self, query: &CompiledQuery, batch: &ProofBatch) -> VerifySummary {
        let outcomes: Vec<bool> = self.pool.install(|| {
            batch
                .items
                .par_iter()
                .map(|item| {
                    let Some(hex) = item.proof.as_deref() else {
                        return false;
                    };
                    let checked = Proof::from_hex(hex)
                        .and_then(|proof| self.backend.verify(query, &proof, &item.public_inputs));
                    match checked {
                        Ok(ok) => ok,
                        Err(e) => {
                            warn!(index = item.index, error = %e, "verification failed");
                            false
                        }
                    }
                })
                .collect()
        });
        let verified = outcomes.iter().filter(|&&ok| ok).count();
        let total = outcomes.len();
        let summary = VerifySummary {
            verified,
            failed: total - verified,
            total,
            success: verified == total,
        };
        info!(
            verified = summary.verified,
            failed = summary.failed,
            "batch verification finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::backend::WitnessTrace;
    use crate::compiler::compile;
    use crate::config::Config;
    use crate::merkle::InclusionProof;
    use crate::witness::SlotWitness;

    /// Fails every odd-indexed branch and counts calls.
    struct FlakyBackend {
        executed: AtomicUsize,
    }

    impl ProofBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn execute(&self, _query: &CompiledQuery, witness: &WitnessInput) -> Result<WitnessTrace> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            if witness.branch % 2 == 1 {
                return Err(Error::Backend("boom".into()));
            }
            Ok(WitnessTrace {
                branch: witness.branch,
                public_inputs: vec![Field::from_u64(witness.branch as u64)],
                payload: vec![witness.branch as u8],
            })
        }

        fn prove(&self, _query: &CompiledQuery, trace: &WitnessTrace) -> Result<Proof> {
            Ok(Proof {
                bytes: trace.payload.clone(),
            })
        }

        fn verify(&self, _query: &CompiledQuery, proof: &Proof, public_inputs: &[Field]) -> Result<bool> {
            Ok(public_inputs == [Field::from_u64(u64::from(proof.bytes[0]))])
        }
    }

    fn witness(branch: usize) -> WitnessInput {
        WitnessInput {
            branch,
            slots: vec![SlotWitness {
                quad_index: 0,
                terms: Default::default(),
                proof: InclusionProof {
                    leaf_index: 0,
                    siblings: Vec::new(),
                    directions: Vec::new(),
                },
            }],
            variables: Default::default(),
            bindings: Default::default(),
            hidden: Vec::new(),
            root: Field::zero(),
            signature: String::new(),
            public_key: String::new(),
            scheme: Default::default(),
        }
    }

    fn query() -> CompiledQuery {
        compile("SELECT ?s WHERE { ?s ?p ?o }", &Config::default()).unwrap()
    }

    #[test]
    fn failures_are_recorded_per_item() {
        let backend = Arc::new(FlakyBackend {
            executed: AtomicUsize::new(0),
        });
        let orchestrator = ProofOrchestrator::new(backend.clone(), 4).unwrap();
        let witnesses: Vec<_> = (0..6).map(witness).collect();
        let batch = orchestrator.run(&query(), &witnesses, ProofMode::ProveAndVerify);

        assert_eq!(backend.executed.load(Ordering::SeqCst), 6);
        assert_eq!(batch.summary.total, 6);
        assert_eq!(batch.summary.succeeded, 3);
        assert_eq!(batch.summary.failed, 3);
        assert!(!batch.summary.witness_only);
        for (i, item) in batch.items.iter().enumerate() {
            assert_eq!(item.index, i);
            assert_eq!(item.error.is_some(), i % 2 == 1);
            assert_eq!(item.verified, (i % 2 == 0).then_some(true));
        }

        let summary = orchestrator.verify(&query(), &batch);
        assert_eq!(summary.verified, 3);
        assert_eq!(summary.failed, 3);
        assert!(!summary.success);
    }

    #[test]
    fn witness_only_mode_emits_no_proofs() {
        let backend = Arc::new(FlakyBackend {
            executed: AtomicUsize::new(0),
        });
        let orchestrator = ProofOrchestrator::new(backend, 2).unwrap();
        let batch = orchestrator.run(&query(), &[witness(0), witness(2)], ProofMode::WitnessOnly);
        assert!(batch.summary.witness_only);
        assert_eq!(batch.summary.succeeded, 2);
        assert!(batch.items.iter().all(|i| i.proof.is_none()));

        let json = batch.to_json().unwrap();
        assert_eq!(ProofBatch::from_json(&json).unwrap(), batch);
    }

    #[test]
    fn empty_batches_succeed() {
        let backend = Arc::new(FlakyBackend {
            executed: AtomicUsize::new(0),
        });
        let orchestrator = ProofOrchestrator::new(backend, 1).unwrap();
        let batch = orchestrator.run(&query(), &[], ProofMode::Prove);
        assert_eq!(batch.summary, BatchSummary::default());
        assert!(orchestrator.verify(&query(), &batch).success);
    }
}
