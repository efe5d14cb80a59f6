//! Deployment configuration.
//!
//! A single immutable [`Config`] is passed to every constructor. Changing the
//! encoding section or the tree depth invalidates previously signed datasets
//! and compiled programs; [`Config::fingerprint`] captures exactly the fields
//! that do.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::encoding::Encoder;
use crate::error::{Error, Result};
use crate::hash::{HashSuite, Hasher};
use crate::merkle::MAX_DEPTH;

pub const DEFAULT_TREE_DEPTH: usize = 11;
pub const DEFAULT_MAX_PATH_HOPS: usize = 3;
pub const DEFAULT_MAX_LITERAL_BYTES: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EncodingConfig {
    pub hash_suite: HashSuite,
    pub max_literal_bytes: usize,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            hash_suite: HashSuite::default(),
            max_literal_bytes: DEFAULT_MAX_LITERAL_BYTES,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Emit a circuit without signature and Merkle checks.
    pub skip_signing: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub encoding: EncodingConfig,
    pub tree_depth: usize,
    pub max_path_hops: usize,
    pub workers: usize,
    pub render: RenderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            encoding: EncodingConfig::default(),
            tree_depth: DEFAULT_TREE_DEPTH,
            max_path_hops: DEFAULT_MAX_PATH_HOPS,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            render: RenderConfig::default(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tree_depth == 0 || self.tree_depth > MAX_DEPTH {
            return Err(Error::Config(format!(
                "tree_depth must be within 1..={MAX_DEPTH}, got {}",
                self.tree_depth
            )));
        }
        if self.max_path_hops == 0 {
            return Err(Error::Config("max_path_hops must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.encoding.max_literal_bytes == 0 {
            return Err(Error::Config("max_literal_bytes must be at least 1".into()));
        }
        Ok(())
    }

    pub fn hasher(&self) -> Hasher {
        Hasher::new(self.encoding.hash_suite)
    }

    pub fn encoder(&self) -> Encoder {
        Encoder::new(self.hasher(), self.encoding.max_literal_bytes)
    }

    /// Digest of every field that affects compiled output. `workers` is
    /// excluded.
    pub fn fingerprint(&self) -> String {
        let material = format!(
            "suite={};max_literal_bytes={};tree_depth={};max_path_hops={};skip_signing={}",
            self.encoding.hash_suite.name(),
            self.encoding.max_literal_bytes,
            self.tree_depth,
            self.max_path_hops,
            self.render.skip_signing,
        );
        blake3::hash(material.as_bytes()).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.tree_depth, 11);
        assert_eq!(config.max_path_hops, 3);
        assert_eq!(config.encoding.max_literal_bytes, 1024);
        assert_eq!(config.encoding.hash_suite, HashSuite::Blake2s);
    }

    #[test]
    fn partial_toml_overrides_fields() {
        let config = Config::from_toml_str(
            r#"
tree_depth = 4
workers = 2

[encoding]
hash_suite = "blake3"
"#,
        )
        .unwrap();
        assert_eq!(config.tree_depth, 4);
        assert_eq!(config.workers, 2);
        assert_eq!(config.encoding.hash_suite, HashSuite::Blake3);
        assert_eq!(config.encoding.max_literal_bytes, 1024);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            Config::from_toml_str("tree_depth = 0"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            Config::from_toml_str("unknown_key = 1"),
            Err(Error::TomlDe(_))
        ));
    }

    #[test]
    fn fingerprint_ignores_workers() {
        let a = Config {
            workers: 1,
            ..Config::default()
        };
        let b = Config {
            workers: 8,
            ..Config::default()
        };
        assert_eq!(a.fingerprint(), b.fingerprint());
        let c = Config {
            max_path_hops: 5,
            ..Config::default()
        };
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn toml_round_trips() {
        let config = Config::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(Config::from_toml_str(&text).unwrap(), config);
    }
}
