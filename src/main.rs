//! `sparql-proof` command-line interface.
//!
//! - `sign`: encode an RDF file, build the commitment tree and sign its root
//! - `compile`: render a query as a Noir package
//! - `witness`: write one `Prover.toml` per satisfying binding
//! - `prove` / `verify`: run a proof batch and re-check it

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use sparql_proof::dataset::load_quads;
use sparql_proof::render::render;
use sparql_proof::signature::Secp256k1Signer;
use sparql_proof::{
    compile, resolve_and_prove, sign, verify, CheckingBackend, CompiledQuery, Config, NargoBackend,
    ProofBackend, ProofBatch, ProofMode, Resolver, SignedDataset,
};

#[derive(Parser)]
#[command(name = "sparql-proof", version, about = "Prove SPARQL results over signed RDF datasets")]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign an RDF dataset (Turtle, N-Triples, N-Quads, TriG or RDF/XML).
    Sign {
        #[arg(short, long)]
        data: PathBuf,
        /// Hex secp256k1 secret key.
        #[arg(long, conflicts_with = "seed")]
        key: Option<String>,
        /// Derive the key from a seed phrase (tests and demos only).
        #[arg(long)]
        seed: Option<String>,
        #[arg(short, long, default_value = "dataset.json")]
        out: PathBuf,
    },

    /// Compile a query into a Noir circuit package.
    Compile {
        /// SPARQL query string or path to a .rq file.
        #[arg(short, long)]
        query: String,
        #[arg(short, long, default_value = "noir_prove")]
        out: PathBuf,
    },

    /// Write a Prover.toml for every binding of a query.
    Witness {
        #[arg(short, long)]
        query: String,
        #[arg(short, long)]
        dataset: PathBuf,
        #[arg(short, long, default_value = "noir_prove")]
        out: PathBuf,
    },

    /// Resolve and prove every binding of a query.
    Prove {
        #[arg(short, long)]
        query: String,
        #[arg(short, long)]
        dataset: PathBuf,
        #[arg(long, value_enum, default_value_t = Mode::Prove)]
        mode: Mode,
        #[command(flatten)]
        backend: BackendArgs,
        #[arg(short, long, default_value = "batch.json")]
        out: PathBuf,
    },

    /// Verify every proof of a batch.
    Verify {
        #[arg(short, long)]
        query: String,
        #[arg(short, long)]
        batch: PathBuf,
        #[command(flatten)]
        backend: BackendArgs,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    WitnessOnly,
    Prove,
    ProveAndVerify,
}

impl From<Mode> for ProofMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::WitnessOnly => ProofMode::WitnessOnly,
            Mode::Prove => ProofMode::Prove,
            Mode::ProveAndVerify => ProofMode::ProveAndVerify,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendKind {
    /// In-process checks, no zero knowledge.
    Checking,
    /// `nargo` + `bb` in the circuit directory.
    Nargo,
}

#[derive(clap::Args)]
struct BackendArgs {
    #[arg(long, value_enum, default_value_t = BackendKind::Checking)]
    backend: BackendKind,
    /// Circuit directory written by `compile`.
    #[arg(long, default_value = "noir_prove")]
    circuit: PathBuf,
}

impl BackendArgs {
    fn build(&self, config: &Config) -> Arc<dyn ProofBackend> {
        match self.backend {
            BackendKind::Checking => Arc::new(CheckingBackend::new(config)),
            BackendKind::Nargo => Arc::new(NargoBackend::new(&self.circuit)),
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_toml_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(Config::default()),
    }
}

/// Accepts either query text or a path to a file holding it.
fn read_query(query: &str) -> Result<String> {
    let path = Path::new(query);
    if path.is_file() {
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
    } else {
        Ok(query.to_string())
    }
}

fn compile_query(query: &str, config: &Config) -> Result<CompiledQuery> {
    Ok(compile(&read_query(query)?, config)?)
}

fn main() -> Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Sign { data, key, seed, out } => {
            let signer = match (key, seed) {
                (Some(key), _) => Secp256k1Signer::from_hex(&key)?,
                (None, Some(seed)) => Secp256k1Signer::from_seed(seed.as_bytes())?,
                (None, None) => bail!("either --key or --seed is required"),
            };
            let quads = load_quads(&data)?;
            let dataset = sign(quads, &config, &signer)?;
            dataset.save(&out)?;
            println!("Signed {} quads, root {}: {}", dataset.len(), dataset.root, out.display());
        }
        Commands::Compile { query, out } => {
            let compiled = compile_query(&query, &config)?;
            render(&compiled).write_to(&out)?;
            println!("Generated circuit in {}", out.display());
        }
        Commands::Witness { query, dataset, out } => {
            let compiled = compile_query(&query, &config)?;
            let dataset = SignedDataset::load(&dataset)?;
            let resolution = Resolver::new(&dataset, &config)?.resolve(&compiled)?;
            if resolution.is_empty() {
                println!("No binding satisfies the query");
                return Ok(());
            }
            fs::create_dir_all(&out)?;
            for (i, witness) in resolution.witnesses.iter().enumerate() {
                let name = if i == 0 {
                    "Prover.toml".to_string()
                } else {
                    format!("Prover_{i}.toml")
                };
                fs::write(out.join(&name), witness.to_prover_toml(&compiled)?)?;
                info!(file = %name, branch = witness.branch, "witness written");
            }
            println!(
                "Wrote {} witnesses to {}",
                resolution.witnesses.len(),
                out.display()
            );
        }
        Commands::Prove {
            query,
            dataset,
            mode,
            backend,
            out,
        } => {
            let compiled = compile_query(&query, &config)?;
            let dataset = SignedDataset::load(&dataset)?;
            let batch = resolve_and_prove(
                &compiled,
                &dataset,
                backend.build(&config),
                &config,
                mode.into(),
            )?;
            fs::write(&out, batch.to_json()?)?;
            println!(
                "{} of {} bindings proved: {}",
                batch.summary.succeeded,
                batch.summary.total,
                out.display()
            );
        }
        Commands::Verify {
            query,
            batch,
            backend,
        } => {
            let compiled = compile_query(&query, &config)?;
            let batch = ProofBatch::from_json(&fs::read_to_string(&batch)?)?;
            let summary = verify(&compiled, &batch, backend.build(&config), &config)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if !summary.success {
                bail!("{} of {} proofs failed", summary.failed, summary.total);
            }
        }
    }
    Ok(())
}
