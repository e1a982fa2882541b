use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

/// Controls one forward solve and the differentiation that rides on it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Upper bound on coordinate descent epochs (and therefore on trace length).
    pub max_iter: usize,
    /// An epoch whose largest absolute coordinate move is at most `tol` ends the solve.
    pub tol: f64,
    /// Record what the derivative needs: the trace in backward mode, the full
    /// Jacobian in forward mode. Without it no hypergradient can be formed.
    pub compute_jac: bool,
    /// Reverse mode (trace recording) when true, forward iterative
    /// differentiation when false.
    pub backward: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tol: 1e-3,
            compute_jac: true,
            backward: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HypergradConfig {
    pub solver: SolverOptions,
    /// Return the Jacobian-vector product without projecting it onto the support.
    pub full_jac_v: bool,
}

impl Default for HypergradConfig {
    fn default() -> Self {
        Self {
            solver: SolverOptions::default(),
            full_jac_v: false,
        }
    }
}

impl HypergradConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}
