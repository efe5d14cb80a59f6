//! Per-binding circuit inputs and their `Prover.toml` form.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dataset::SignedDataset;
use crate::error::Result;
use crate::eval::WitnessView;
use crate::field::Field;
use crate::merkle::InclusionProof;
use crate::program::CompiledQuery;
use crate::render::noir_ident;
use crate::signature::{self, SchemeKind};
use crate::term::RdfTerm;

/// One BGP slot: a committed quad and its inclusion proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotWitness {
    pub quad_index: usize,
    pub terms: [Field; 4],
    pub proof: InclusionProof,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WitnessInput {
    /// The UNION branch whose constraints this witness satisfies.
    pub branch: usize,
    /// Exactly `bgp_slot_count` entries; slots past the branch's own
    /// patterns hold a padding quad.
    pub slots: Vec<SlotWitness>,
    /// Encoded value of every projected variable; unbound ones are zero.
    pub variables: BTreeMap<String, Field>,
    /// Terms bound to projected variables.
    pub bindings: BTreeMap<String, RdfTerm>,
    /// One value per hidden-input descriptor of the query.
    pub hidden: Vec<Field>,
    pub root: Field,
    pub signature: String,
    pub public_key: String,
    #[serde(default)]
    pub scheme: SchemeKind,
}

impl WitnessInput {
    pub(crate) fn slot(dataset: &SignedDataset, quad_index: usize) -> Option<SlotWitness> {
        Some(SlotWitness {
            quad_index,
            terms: dataset.encoded.get(quad_index)?.clone(),
            proof: dataset.proofs.get(quad_index)?.clone(),
        })
    }

    pub fn slot_terms(&self) -> Vec<[Field; 4]> {
        self.slots.iter().map(|s| s.terms.clone()).collect()
    }

    /// Values the verifier sees: the signed root (unless signing is skipped)
    /// followed by the projected variables in SELECT order.
    pub fn public_inputs(&self, query: &CompiledQuery) -> Vec<Field> {
        let root = (!query.skip_signing).then(|| self.root.clone());
        root.into_iter()
            .chain(
                query
                    .projected_variables
                    .iter()
                    .map(|v| self.variables.get(v).cloned().unwrap_or_default()),
            )
            .collect()
    }

    /// Borrowed view for [`crate::eval::Evaluator`]; `slots` must come from
    /// [`slot_terms`](Self::slot_terms).
    pub fn view<'a>(&'a self, slots: &'a [[Field; 4]]) -> WitnessView<'a> {
        WitnessView {
            slots,
            variables: &self.variables,
            hidden: &self.hidden,
        }
    }

    /// Renders the Noir prover input file.
    pub fn to_prover_toml(&self, query: &CompiledQuery) -> Result<String> {
        let mut table = toml::Table::new();

        if !query.skip_signing {
            let pk = hex::decode(&self.public_key)?;
            let (x, y) = signature::public_key_coordinates(self.scheme, &pk)?;
            let mut pk_tbl = toml::Table::new();
            pk_tbl.insert("x".into(), bytes(&x));
            pk_tbl.insert("y".into(), bytes(&y));
            table.insert(
                "public_key".into(),
                toml::Value::Array(vec![toml::Value::Table(pk_tbl)]),
            );

            let mut root_tbl = toml::Table::new();
            root_tbl.insert("value".into(), toml::Value::String(self.root.to_hex()));
            root_tbl.insert("signature".into(), bytes(&hex::decode(&self.signature)?));
            root_tbl.insert("keyIndex".into(), toml::Value::Integer(0));
            table.insert(
                "roots".into(),
                toml::Value::Array(vec![toml::Value::Table(root_tbl)]),
            );
        }

        let bgp = self
            .slots
            .iter()
            .map(|slot| {
                let mut tbl = toml::Table::new();
                tbl.insert("terms".into(), fields(slot.terms.iter()));
                if !query.skip_signing {
                    tbl.insert("path".into(), fields(slot.proof.siblings.iter()));
                    tbl.insert(
                        "directions".into(),
                        toml::Value::Array(
                            slot.proof
                                .directions
                                .iter()
                                .map(|&d| toml::Value::Integer(i64::from(d)))
                                .collect(),
                        ),
                    );
                }
                toml::Value::Table(tbl)
            })
            .collect();
        table.insert("bgp".into(), toml::Value::Array(bgp));

        let mut vars_tbl = toml::Table::new();
        for name in &query.projected_variables {
            let value = self.variables.get(name).cloned().unwrap_or_default();
            vars_tbl.insert(noir_ident(name), toml::Value::String(value.to_hex()));
        }
        table.insert("variables".into(), toml::Value::Table(vars_tbl));
        if !self.hidden.is_empty() {
            table.insert("hidden".into(), fields(self.hidden.iter()));
        }

        Ok(toml::to_string_pretty(&toml::Value::Table(table))?)
    }
}

fn bytes(b: &[u8]) -> toml::Value {
    toml::Value::Array(b.iter().map(|&x| toml::Value::Integer(i64::from(x))).collect())
}

fn fields<'a>(values: impl Iterator<Item = &'a Field>) -> toml::Value {
    toml::Value::Array(values.map(|f| toml::Value::String(f.to_hex())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::config::Config;
    use crate::dataset::sign;
    use crate::resolver::Resolver;
    use crate::signature::Secp256k1Signer;
    use crate::term::Quad;

    fn prover_toml(skip_signing: bool) -> (CompiledQuery, WitnessInput, toml::Table) {
        let mut config = Config {
            tree_depth: 4,
            ..Config::default()
        };
        config.render.skip_signing = skip_signing;
        let quads = vec![
            Quad::triple(
                RdfTerm::iri("http://example.org/alice"),
                RdfTerm::iri("http://example.org/name"),
                RdfTerm::simple_literal("Alice"),
            ),
            Quad::triple(
                RdfTerm::iri("http://example.org/alice"),
                RdfTerm::iri("http://example.org/type"),
                RdfTerm::iri("http://example.org/Person"),
            ),
        ];
        let signer = Secp256k1Signer::from_seed(b"witness tests").unwrap();
        let dataset = sign(quads, &config, &signer).unwrap();
        let query = compile(
            "SELECT ?type ?n WHERE { ?s <http://example.org/name> ?n . \
             ?s <http://example.org/type> ?type FILTER(STRLEN(?n) > 3) }",
            &config,
        )
        .unwrap();
        let mut witnesses = Resolver::new(&dataset, &config)
            .unwrap()
            .resolve(&query)
            .unwrap()
            .witnesses;
        assert_eq!(witnesses.len(), 1);
        let witness = witnesses.remove(0);
        let table: toml::Table = toml::from_str(&witness.to_prover_toml(&query).unwrap()).unwrap();
        (query, witness, table)
    }

    #[test]
    fn prover_toml_carries_signature_and_paths() {
        let (query, witness, table) = prover_toml(false);

        let pk = &table["public_key"].as_array().unwrap()[0];
        assert_eq!(pk["x"].as_array().unwrap().len(), 32);
        assert_eq!(pk["y"].as_array().unwrap().len(), 32);
        let root = &table["roots"].as_array().unwrap()[0];
        assert_eq!(root["value"].as_str().unwrap(), witness.root.to_hex());
        assert_eq!(root["signature"].as_array().unwrap().len(), 64);
        assert_eq!(root["keyIndex"].as_integer(), Some(0));

        let bgp = table["bgp"].as_array().unwrap();
        assert_eq!(bgp.len(), query.bgp_slot_count);
        assert_eq!(bgp[0]["terms"].as_array().unwrap().len(), 4);
        assert_eq!(bgp[0]["path"].as_array().unwrap().len(), 4);
        assert_eq!(bgp[0]["directions"].as_array().unwrap().len(), 4);

        // keyword variable names are renamed like the circuit's struct fields
        let vars = table["variables"].as_table().unwrap();
        assert!(vars.contains_key("_type"));
        assert!(vars.contains_key("n"));
        assert_eq!(
            table["hidden"].as_array().unwrap().len(),
            query.hidden_inputs.len()
        );
    }

    #[test]
    fn skip_signing_leaves_out_the_commitment() {
        let (query, witness, table) = prover_toml(true);
        assert!(!table.contains_key("public_key"));
        assert!(!table.contains_key("roots"));
        assert!(!table["bgp"].as_array().unwrap()[0].as_table().unwrap().contains_key("path"));
        assert_eq!(witness.public_inputs(&query).len(), 2);
    }
}
