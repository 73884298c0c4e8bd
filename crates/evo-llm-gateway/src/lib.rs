#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **evo-llm-gateway** – thin, rate-limited wrapper over a remote tool
//! synthesis text generator.
//!
//! Callers never see the raw chat protocol: [`LlmGateway::generate_tool_code`]
//! picks the category's system prompt, builds the user prompt, calls the
//! provider, and strips `<think>` traces and fenced code blocks before
//! returning. Timeouts and provider errors are folded into the returned
//! struct (`code = None`, explanatory `text`) — this method never raises.

mod prompts;
mod provider;

pub use provider::{HttpLlmProvider, LlmProvider, MockLlmProvider};

use std::num::NonZeroU32;
use std::sync::Arc;

use evo_contracts::ToolContract;
use evo_types::{Category, OutputType};
use governor::{Quota, RateLimiter};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::RwLock;
use tracing::{instrument, warn};

pub use prompts::{system_prompt_for, SYSTEM_PROMPT};

/// Default rate limit applied to synthesis calls: small, to respect
/// the provider's own quota (`spec.md` §4.12's "bounded worker pool
/// deliberately small" philosophy applies here too).
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 30;

/// Structured result of one generation call.
#[derive(Debug, Clone, Default)]
pub struct GenerateOutcome {
    /// Content of a `<think>...</think>` block, if present.
    pub thought: String,
    /// The first fenced code block's contents, if present.
    pub code: Option<String>,
    /// Raw text with the thinking trace removed.
    pub text: String,
    /// Category used to select the system prompt (explicit or inferred).
    pub category: Category,
}

/// Metrics tracked across calls, mirroring the teacher's
/// `GatewayMetrics` convention.
#[derive(Debug, Default, Clone)]
pub struct GatewayMetrics {
    /// Total generation calls attempted.
    pub total_requests: u64,
    /// Calls that returned usable code.
    pub successful: u64,
    /// Calls that errored or timed out.
    pub failed: u64,
}

type KeyedRateLimiter =
    RateLimiter<String, governor::state::keyed::DashMapStateStore<String>, governor::clock::DefaultClock, governor::middleware::NoOpMiddleware>;

/// The gateway itself: provider + rate limiter + metrics.
pub struct LlmGateway {
    provider: Box<dyn LlmProvider>,
    rate_limiter: Arc<KeyedRateLimiter>,
    metrics: Arc<RwLock<GatewayMetrics>>,
}

fn infer_category(task: &str) -> Category {
    let lower = task.to_lowercase();
    let fetch_kw = ["fetch", "get", "price", "quote", "获取", "查询"];
    let calc_kw = ["calculate", "calc", "rsi", "macd", "bollinger", "计算"];
    let composite_kw = ["if ", "return true", "return false", "signal", "divergence", "portfolio"];

    if fetch_kw.iter().any(|k| lower.contains(k)) {
        if calc_kw.iter().any(|k| lower.contains(k)) {
            Category::Calculation
        } else {
            Category::Fetch
        }
    } else if composite_kw.iter().any(|k| lower.contains(k)) {
        Category::Composite
    } else {
        Category::Calculation
    }
}

fn format_output_constraint(contract: &ToolContract) -> String {
    match contract.output_type {
        OutputType::Numeric => "Return a single f64. Do NOT return a struct/map/list.".to_string(),
        OutputType::Dict => {
            if contract.required_keys.is_empty() {
                "Return a map. Do NOT return a list or a bare scalar.".to_string()
            } else {
                format!("Return a map with keys: {:?}. Do NOT return a list or a bare scalar.", contract.required_keys)
            }
        }
        OutputType::Boolean => "Return true or false. Do NOT return 0/1 or a string.".to_string(),
        OutputType::DataFrame => {
            if contract.required_keys.is_empty() {
                "Return a typed record set.".to_string()
            } else {
                format!("Return a typed record set with columns: {:?}.", contract.required_keys)
            }
        }
        OutputType::List => "Return a list. Do NOT return a map or a bare scalar.".to_string(),
        OutputType::Any | OutputType::String => String::new(),
    }
}

static THINK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<think>(.*?)</think>").unwrap());
static CODE_FENCE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```(?:rust)?\s*(.*?)```").unwrap());

/// Strip the chat protocol: pull out the `<think>` trace and the
/// first fenced code block, returning the remainder as plain text.
pub fn clean_protocol(raw: &str) -> (String, Option<String>, String) {
    let thought = THINK_RE.captures(raw).and_then(|c| c.get(1)).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
    let without_think = THINK_RE.replace_all(raw, "").trim().to_string();
    let code = CODE_FENCE_RE.captures(&without_think).and_then(|c| c.get(1)).map(|m| m.as_str().trim().to_string());
    (thought, code, without_think)
}

impl LlmGateway {
    /// Construct a gateway around `provider`, with a per-category rate
    /// limit (keyed so `fetch` vs `calculation` bursts don't starve
    /// each other).
    pub fn new(provider: Box<dyn LlmProvider>, rate_limit_per_minute: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(rate_limit_per_minute.max(1)).unwrap());
        Self {
            provider,
            rate_limiter: Arc::new(RateLimiter::keyed(quota)),
            metrics: Arc::new(RwLock::new(GatewayMetrics::default())),
        }
    }

    /// Snapshot current metrics.
    pub async fn metrics(&self) -> GatewayMetrics {
        self.metrics.read().await.clone()
    }

    /// Generate tool code for `task`. Never raises: provider errors
    /// and timeouts surface as `code: None` with an explanatory `text`.
    #[instrument(skip(self, error_context), fields(category))]
    pub async fn generate_tool_code(
        &self,
        task: &str,
        error_context: Option<&str>,
        category: Option<Category>,
        contract: Option<&ToolContract>,
    ) -> GenerateOutcome {
        let category = category.unwrap_or_else(|| infer_category(task));
        let system_prompt = system_prompt_for(category);

        let mut user_prompt = format!("Task: {task}");
        if let Some(contract) = contract {
            let constraint = format_output_constraint(contract);
            if !constraint.is_empty() {
                user_prompt.push_str(&format!("\n\nOUTPUT: {constraint}"));
            }
        }
        if let Some(err) = error_context {
            user_prompt.push_str(&format!("\n\nPrevious Error:\n{err}\n\nFix the issue."));
        }

        {
            let mut metrics = self.metrics.write().await;
            metrics.total_requests += 1;
        }

        if self.rate_limiter.check_key(&category.to_string()).is_err() {
            warn!(%category, "llm gateway rate limit exceeded");
            self.metrics.write().await.failed += 1;
            return GenerateOutcome {
                thought: String::new(),
                code: None,
                text: "rate limit exceeded".to_string(),
                category,
            };
        }

        match self.provider.complete(system_prompt, &user_prompt).await {
            Ok(raw) => {
                let (thought, code, text) = clean_protocol(&raw);
                if code.is_some() {
                    self.metrics.write().await.successful += 1;
                } else {
                    self.metrics.write().await.failed += 1;
                }
                GenerateOutcome { thought, code, text, category }
            }
            Err(e) => {
                warn!(error = %e, "llm provider call failed");
                self.metrics.write().await.failed += 1;
                GenerateOutcome {
                    thought: String::new(),
                    code: None,
                    text: format!("LLM error: {e}"),
                    category,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_fetch_category_from_keywords() {
        assert_eq!(infer_category("Get the latest AAPL price"), Category::Fetch);
    }

    #[test]
    fn infers_composite_when_signal_language_present() {
        assert_eq!(infer_category("Return true if there's a bullish divergence"), Category::Composite);
    }

    #[test]
    fn fetch_and_calculate_keywords_together_favor_calculation() {
        assert_eq!(infer_category("Fetch prices and calculate RSI"), Category::Calculation);
    }

    #[test]
    fn strips_think_block_and_extracts_code_fence() {
        let raw = "<think>reasoning here</think>Here is the code:\n```rust\nfn f() {}\n```\ndone";
        let (thought, code, text) = clean_protocol(raw);
        assert_eq!(thought, "reasoning here");
        assert_eq!(code.as_deref(), Some("fn f() {}"));
        assert!(!text.contains("<think>"));
    }

    #[test]
    fn numeric_contract_constraint_forbids_other_shapes() {
        let c = evo_contracts::get_contract("calc_rsi").unwrap();
        let msg = format_output_constraint(c);
        assert!(msg.contains("f64"));
    }

    #[tokio::test]
    async fn mock_provider_round_trip_returns_canned_code() {
        let gateway = LlmGateway::new(Box::new(MockLlmProvider), DEFAULT_RATE_LIMIT_PER_MINUTE);
        let outcome = gateway.generate_tool_code("Calculate 14-day RSI", None, Some(Category::Calculation), None).await;
        assert!(outcome.code.is_some());
        assert_eq!(outcome.category, Category::Calculation);
    }
}
