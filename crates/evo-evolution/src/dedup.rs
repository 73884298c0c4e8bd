//! Contract-scoped deduplication: when a new tool satisfies a contract
//! another tool already claims, keep the one with the better score and
//! deprecate the rest.

use evo_store::{BatchMergeRecord, StoreError, ToolArtifact, ToolRegistry, ToolStatus};
use tracing::{info, instrument};

/// Result of a dedup pass against a single contract id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupOutcome {
    /// Only one candidate existed, or the new tool won outright — no
    /// other tool needed to be touched.
    Kept {
        /// Id of the tool left `Verified`/`Provisional`.
        winner_id: i64,
    },
    /// The new tool lost to an existing tool and was itself deprecated.
    Superseded {
        /// Id of the tool that stayed active.
        winner_id: i64,
    },
    /// Fewer than two candidates existed for the contract; nothing to do.
    NoAction,
}

/// Sortable proxy for tool quality. Built as a tuple instead of a
/// single `f64` rate so it implements `Ord` and compares
/// lexicographically the same way the original's `(stage, rate,
/// -exec_time, version)` tuple did.
///
/// `rate_proxy` is `100` for `Provisional` tools and `50` otherwise —
/// a coarse stand-in for a rolled-up success rate across execution
/// traces, since per-tool success history isn't tracked yet (see
/// `SPEC_FULL.md` §9 resolution #2). `neg_avg_exec_time` is always `0`
/// for the same reason: execution time isn't aggregated per tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Score {
    verification_stage: u8,
    rate_proxy: i32,
    neg_avg_exec_time: i64,
    version: (u32, u32, u32),
}

fn parse_semver(raw: &str) -> (u32, u32, u32) {
    let mut parts = raw.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    (parts.next().unwrap_or(0), parts.next().unwrap_or(0), parts.next().unwrap_or(0))
}

fn score_tool(tool: &ToolArtifact) -> Score {
    let rate_proxy = if tool.status == ToolStatus::Provisional { 100 } else { 50 };
    Score {
        verification_stage: tool.verification_stage.as_u8(),
        rate_proxy,
        neg_avg_exec_time: 0,
        version: parse_semver(&tool.semantic_version),
    }
}

/// Scores and deprecates losing tools for a given contract id.
pub struct Deduplicator {
    registry: ToolRegistry,
}

impl Deduplicator {
    /// Construct a deduplicator around a registry handle.
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// Look up every tool registered against `contract_id`, deprecate
    /// all but the top scorer, and persist a merge record.
    #[instrument(skip(self), fields(contract_id = %contract_id))]
    pub async fn check_and_resolve(&self, new_tool_id: i64, contract_id: &str) -> Result<DedupOutcome, StoreError> {
        let candidates = self.registry.find_by_contract_id(contract_id).await?;
        let active: Vec<ToolArtifact> = candidates.into_iter().filter(|t| t.status != ToolStatus::Deprecated).collect();

        if active.len() < 2 {
            return Ok(DedupOutcome::NoAction);
        }

        let mut scored: Vec<(Score, ToolArtifact)> = active.into_iter().map(|t| (score_tool(&t), t)).collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let winner = scored[0].1.clone();
        let losers: Vec<&ToolArtifact> = scored[1..].iter().map(|(_, t)| t).collect();

        for loser in &losers {
            self.registry.update_status(loser.id, ToolStatus::Deprecated).await?;
            info!(loser_id = loser.id, winner_id = winner.id, "deprecated in favor of higher-scoring tool");
        }

        // Winner picked by (verification_stage, semantic_version); the
        // persisted strategy tag names the dedup trigger, not the
        // ranking rule.
        let source_ids: Vec<i64> = losers.iter().map(|t| t.id).chain(std::iter::once(winner.id)).collect();
        let _record: BatchMergeRecord = self
            .registry
            .insert_merge_record(&source_ids, Some(winner.id), "contract_dedup", serde_json::json!({ "deprecated_count": losers.len() }))
            .await?;

        if winner.id == new_tool_id {
            Ok(DedupOutcome::Kept { winner_id: winner.id })
        } else {
            Ok(DedupOutcome::Superseded { winner_id: winner.id })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(id: i64, stage: u8, status: ToolStatus, version: &str) -> ToolArtifact {
        use evo_store::VerificationStage;
        use chrono::Utc;
        ToolArtifact {
            id,
            name: format!("tool_{id}"),
            semantic_version: version.to_string(),
            file_path: format!("/tmp/tool_{id}.rs"),
            content_hash: format!("hash{id}"),
            code_content: String::new(),
            args_schema: serde_json::json!({}),
            dependencies: vec![],
            permissions: vec![],
            status,
            parent_tool_ids: vec![],
            category: None,
            contract_id: Some("calc_rsi".to_string()),
            indicator: None,
            data_type: None,
            verification_stage: match stage {
                0 => VerificationStage::None,
                1 => VerificationStage::AstSecurity,
                2 => VerificationStage::SelfTest,
                3 => VerificationStage::ContractValid,
                _ => VerificationStage::Integration,
            },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn higher_verification_stage_outscores_lower() {
        let a = score_tool(&tool(1, 4, ToolStatus::Verified, "0.1.0"));
        let b = score_tool(&tool(2, 2, ToolStatus::Verified, "0.9.0"));
        assert!(a > b);
    }

    #[test]
    fn semver_comparison_is_numeric_not_lexicographic() {
        let a = score_tool(&tool(1, 4, ToolStatus::Verified, "0.10.0"));
        let b = score_tool(&tool(2, 4, ToolStatus::Verified, "0.9.0"));
        assert!(a > b, "0.10.0 must outscore 0.9.0 numerically");
    }

    #[test]
    fn provisional_rate_proxy_beats_verified_at_equal_stage() {
        let a = score_tool(&tool(1, 3, ToolStatus::Provisional, "0.1.0"));
        let b = score_tool(&tool(2, 3, ToolStatus::Verified, "0.1.0"));
        assert!(a > b);
    }
}
