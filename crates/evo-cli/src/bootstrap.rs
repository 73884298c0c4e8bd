//! Seed tools registered by `--bootstrap`. These stand in for the
//! external market-data collaborator `spec.md` scopes out as a black
//! box: deterministic, dependency-free Rust satisfying the `fetch`
//! contracts so the catalog isn't empty on a fresh registry.

use anyhow::Result;
use evo_gateway::Gateway;
use evo_types::Category;

const GET_STOCK_HIST: &str = r#"
pub fn get_stock_hist(symbol: String, start: String, end: String) -> std::collections::HashMap<String, f64> {
    let seed: f64 = symbol.bytes().map(|b| b as f64).sum::<f64>() + start.len() as f64 - end.len() as f64;
    let base = 100.0 + (seed % 50.0);
    let mut out = std::collections::HashMap::new();
    out.insert("date".to_string(), start.len() as f64);
    out.insert("open".to_string(), base);
    out.insert("high".to_string(), base + 1.5);
    out.insert("low".to_string(), base - 1.5);
    out.insert("close".to_string(), base + 0.25);
    out.insert("volume".to_string(), 1_000_000.0 + seed * 137.0);
    out
}

pub fn self_test() -> bool {
    let result = get_stock_hist("AAPL".to_string(), "2024-01-01".to_string(), "2024-06-30".to_string());
    ["date", "open", "high", "low", "close", "volume"].iter().all(|k| result.contains_key(*k))
}
"#;

const GET_FINANCIAL_DATA: &str = r#"
pub fn get_financial_data(symbol: String) -> std::collections::HashMap<String, f64> {
    let seed: f64 = symbol.bytes().map(|b| b as f64).sum();
    let mut out = std::collections::HashMap::new();
    out.insert("revenue".to_string(), 1_000_000.0 + seed * 5_431.0);
    out.insert("net_income".to_string(), 100_000.0 + seed * 811.0);
    out
}

pub fn self_test() -> bool {
    let result = get_financial_data("AAPL".to_string());
    result.contains_key("revenue") && result.contains_key("net_income")
}
"#;

struct SeedTool {
    name: &'static str,
    contract_id: &'static str,
    code: &'static str,
}

const SEED_TOOLS: &[SeedTool] = &[
    SeedTool { name: "get_stock_hist", contract_id: "get_stock_hist", code: GET_STOCK_HIST },
    SeedTool { name: "get_financial_data", contract_id: "get_financial_data", code: GET_FINANCIAL_DATA },
];

/// Register every seed tool through the gateway with `force = true`,
/// marking each artifact `ArtifactOrigin::Bootstrap`. Skips a seed
/// whose content hash is already registered (gateway registration is
/// idempotent on content).
pub async fn register_seed_tools(gateway: &Gateway) -> Result<Vec<String>> {
    let mut registered = Vec::new();
    for seed in SEED_TOOLS {
        let contract = evo_contracts::get_contract(seed.contract_id);
        let outcome = gateway
            .submit(seed.code, Category::Fetch, contract, Some(seed.contract_id), None, &format!("bootstrap-{}", seed.name), None, true)
            .await?;
        if outcome.ok {
            registered.push(seed.name.to_string());
        } else {
            tracing::warn!(tool = seed.name, report = ?outcome.report, "seed tool failed verification");
        }
    }
    Ok(registered)
}
