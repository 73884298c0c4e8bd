#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **evo-constraints** – single source of truth for allowed/banned
//! modules, calls, attributes, and execution limits.
//!
//! Loaded once from a declarative YAML file into an immutable
//! in-memory object (or from [`Constraints::default`] when no file is
//! supplied). Every other component that needs to know what a tool is
//! allowed to do asks this crate, never hard-codes the rule itself.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use evo_types::Category;
use serde::{Deserialize, Serialize};

/// Errors from loading or parsing a constraints file.
#[derive(Debug, thiserror::Error)]
pub enum ConstraintsError {
    /// The file could not be read from disk.
    #[error("failed to read constraints file {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// The file's contents did not parse as the expected schema.
    #[error("failed to parse constraints file {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: String,
        /// Underlying parse error.
        #[source]
        source: serde_yaml::Error,
    },
}

/// Wall-clock and resource limits applied to every sandboxed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Wall-clock timeout for one subprocess invocation.
    pub timeout_sec: u64,
    /// Soft memory ceiling advertised to the sandboxed process.
    pub memory_mb: u64,
    /// Maximum retry attempts for transient execution errors.
    pub max_retries: u32,
    /// Delay between retries, in seconds.
    pub retry_delay_sec: u64,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout_sec: 30,
            memory_mb: 512,
            max_retries: 3,
            retry_delay_sec: 1,
        }
    }
}

/// Limits applied by the multi-stage verifier (not the executor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationLimits {
    /// Retry bound for the integration stage's transient-error backoff.
    pub max_retries: u32,
    /// Delay between integration-stage retries, in seconds.
    pub retry_delay_sec: u64,
    /// Minimum fraction of a function's declared parameters that the
    /// schema extractor must recover before a tool is trusted.
    pub schema_extraction_accuracy_gate: f64,
}

impl Default for VerificationLimits {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_sec: 2,
            schema_extraction_accuracy_gate: 0.8,
        }
    }
}

/// Configuration for the evolution gatekeeper (C6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionGateConfig {
    /// `dev` auto-approves APPROVAL actions with a warning; `prod`
    /// waits for an external approver or interactive prompt.
    pub default_mode: String,
    /// Timeout for a CHECKPOINT action before it is abandoned.
    pub checkpoint_timeout_sec: u64,
    /// Timeout for an APPROVAL action waiting on a decision.
    pub approval_timeout_sec: u64,
}

impl Default for EvolutionGateConfig {
    fn default() -> Self {
        Self {
            default_mode: "dev".to_string(),
            checkpoint_timeout_sec: 60,
            approval_timeout_sec: 120,
        }
    }
}

/// Per-category allow/ban lists for Rust module paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityRules {
    /// Module path prefixes (e.g. `"chrono"`, `"std::collections"`)
    /// this category may `use`.
    pub allowed_modules: HashSet<String>,
    /// Module path prefixes this category may never `use`, on top of
    /// the always-banned set.
    pub banned_modules: HashSet<String>,
}

/// The full constraints document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    /// Execution limits (C3).
    pub execution: ExecutionLimits,
    /// Verification limits (C5).
    pub verification: VerificationLimits,
    /// Evolution gate configuration (C6).
    pub evolution_gates: EvolutionGateConfig,
    /// Per-category capability rules.
    pub capabilities: std::collections::HashMap<String, CapabilityRules>,
    /// Modules banned regardless of category.
    pub always_banned_modules: HashSet<String>,
    /// Calls banned regardless of category.
    pub always_banned_calls: HashSet<String>,
    /// Attribute/path segments banned regardless of category.
    pub always_banned_attributes: HashSet<String>,
}

fn string_set(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Constraints {
    fn default() -> Self {
        let mut capabilities = std::collections::HashMap::new();
        capabilities.insert(
            "calculation".to_string(),
            CapabilityRules {
                allowed_modules: string_set(&[
                    "std::collections",
                    "std::cmp",
                    "std::convert",
                    "chrono",
                    "serde_json",
                ]),
                // calculation tools must not touch network/fetch modules
                banned_modules: string_set(&["reqwest", "ureq", "hyper", "tokio::net"]),
            },
        );
        capabilities.insert(
            "fetch".to_string(),
            CapabilityRules {
                allowed_modules: string_set(&[
                    "std::collections",
                    "chrono",
                    "serde_json",
                    "reqwest",
                    "sha2",
                ]),
                banned_modules: HashSet::new(),
            },
        );
        capabilities.insert(
            "composite".to_string(),
            CapabilityRules {
                allowed_modules: string_set(&["std::collections", "chrono", "serde_json"]),
                banned_modules: string_set(&["reqwest", "ureq", "hyper"]),
            },
        );

        Self {
            execution: ExecutionLimits::default(),
            verification: VerificationLimits::default(),
            evolution_gates: EvolutionGateConfig::default(),
            capabilities,
            always_banned_modules: string_set(&[
                "std::process",
                "std::fs",
                "std::env",
                "std::net",
                "std::os",
                "libc",
                "std::ffi",
            ]),
            always_banned_calls: string_set(&[
                "transmute",
                "exec",
                "spawn",
                "Command::new",
                "exit",
                "remove_file",
                "remove_dir_all",
            ]),
            always_banned_attributes: string_set(&[
                "__private__",
                "std::ptr",
                "raw",
                "as_mut_ptr",
            ]),
        }
    }
}

impl Constraints {
    /// Load constraints from a YAML file on disk.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, ConstraintsError> {
        let path_str = path.as_ref().display().to_string();
        let raw = fs::read_to_string(&path).map_err(|source| ConstraintsError::Io {
            path: path_str.clone(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConstraintsError::Parse {
            path: path_str,
            source,
        })
    }

    /// Modules a given category is allowed to import.
    pub fn allowed_modules(&self, category: Category) -> HashSet<String> {
        self.capabilities
            .get(&category.to_string())
            .map(|c| c.allowed_modules.clone())
            .unwrap_or_default()
    }

    /// Modules a given category is banned from importing: the
    /// always-banned set union the category-specific ban list.
    pub fn banned_modules(&self, category: Category) -> HashSet<String> {
        let mut banned = self.always_banned_modules.clone();
        if let Some(rules) = self.capabilities.get(&category.to_string()) {
            banned.extend(rules.banned_modules.iter().cloned());
        }
        banned
    }

    /// Calls banned in every category.
    pub fn always_banned_calls(&self) -> &HashSet<String> {
        &self.always_banned_calls
    }

    /// Attribute/path segments banned in every category.
    pub fn always_banned_attributes(&self) -> &HashSet<String> {
        &self.always_banned_attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calculation_cannot_import_network_modules() {
        let c = Constraints::default();
        let banned = c.banned_modules(Category::Calculation);
        assert!(banned.contains("reqwest"));
        assert!(banned.contains("std::process"));
    }

    #[test]
    fn fetch_is_allowed_reqwest() {
        let c = Constraints::default();
        assert!(c.allowed_modules(Category::Fetch).contains("reqwest"));
        assert!(!c.banned_modules(Category::Fetch).contains("reqwest"));
    }

    #[test]
    fn round_trips_through_yaml() {
        let c = Constraints::default();
        let yaml = serde_yaml::to_string(&c).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("constraints.yaml");
        std::fs::write(&path, yaml).unwrap();
        let loaded = Constraints::from_yaml(&path).unwrap();
        assert_eq!(loaded, c);
    }
}
