#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **evo-types** – shared primitive data structures for the tool-synthesis
//! engine.
//!
//! Dependency-light and at the bottom of the crate graph so that every
//! other crate can depend on it without cycles. Mirrors the lifecycle
//! enums and category system that the rest of the engine is built around.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a registered tool artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// Generated, passed self-tests only.
    Provisional,
    /// Passed batch merge verification.
    Verified,
    /// Superseded by a more general tool.
    Deprecated,
    /// Repair failed or flagged as a security risk.
    Failed,
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolStatus::Provisional => "provisional",
            ToolStatus::Verified => "verified",
            ToolStatus::Deprecated => "deprecated",
            ToolStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Execution permissions granted to a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Pure computation (no network, no writes).
    CalcOnly,
    /// Network reads against the market-data provider.
    NetworkRead,
    /// Writes restricted to the on-disk cache directory.
    FileWrite,
}

/// Tool category. Selects allowed imports and the LLM prompt template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Allowed to touch the network; must implement caching.
    Fetch,
    /// Pure functions; data passed as arguments.
    Calculation,
    /// Can combine multiple tools.
    Composite,
}

impl Category {
    /// Parse a category from its lowercase string form, defaulting to
    /// `Calculation` for unrecognized values.
    pub fn parse_or_default(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "fetch" => Category::Fetch,
            "composite" => Category::Composite,
            _ => Category::Calculation,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Fetch => "fetch",
            Category::Calculation => "calculation",
            Category::Composite => "composite",
        };
        f.write_str(s)
    }
}

/// One of the four ordered verification stages. `0` means no stage
/// reached (e.g. the artifact is a bootstrap seed, never verified).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum VerificationStage {
    /// No stage passed.
    None = 0,
    /// Static AST security scan passed.
    AstSecurity = 1,
    /// The tool's own embedded self-test passed.
    SelfTest = 2,
    /// Output validated against its declared contract.
    ContractValid = 3,
    /// Real-data integration check passed (fetch tools only).
    Integration = 4,
}

impl VerificationStage {
    /// Numeric stage value, for scoring and comparisons.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl Default for VerificationStage {
    fn default() -> Self {
        VerificationStage::None
    }
}

/// Declared output shape for a tool contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    /// A single number.
    Numeric,
    /// A map of named fields.
    Dict,
    /// A typed record set (columns + rows).
    DataFrame,
    /// An ordered sequence.
    List,
    /// `true`/`false`.
    Boolean,
    /// Free text.
    String,
    /// No constraint.
    Any,
}

/// Timestamp alias used throughout the engine for created/occurred-at
/// fields, matching the teacher's convention of storing UTC instants.
pub type Timestamp = DateTime<Utc>;

/// Errors shared across crates for validation of user-supplied inputs.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// A required field was empty.
    #[error("{field} cannot be empty")]
    Empty {
        /// Name of the offending field.
        field: &'static str,
    },
    /// A field exceeded its configured maximum length.
    #[error("{field} too long: {len} > {max}")]
    TooLong {
        /// Name of the offending field.
        field: &'static str,
        /// Actual length observed.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parses_known_values() {
        assert_eq!(Category::parse_or_default("fetch"), Category::Fetch);
        assert_eq!(Category::parse_or_default("COMPOSITE"), Category::Composite);
        assert_eq!(Category::parse_or_default("bogus"), Category::Calculation);
    }

    #[test]
    fn verification_stage_orders_numerically() {
        assert!(VerificationStage::Integration > VerificationStage::ContractValid);
        assert!(VerificationStage::ContractValid > VerificationStage::SelfTest);
        assert_eq!(VerificationStage::None.as_u8(), 0);
    }

    #[test]
    fn tool_status_displays_lowercase() {
        assert_eq!(ToolStatus::Provisional.to_string(), "provisional");
    }
}
