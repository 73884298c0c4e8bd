//! `--security-check`: a fixed corpus of payloads that must never
//! pass static analysis, run against every category's rule set.

use evo_constraints::Constraints;
use evo_executor::{static_check, StaticCheckOutcome};
use evo_types::Category;

const DANGEROUS_PAYLOADS: &[&str] = &[
    "use std::process::Command;\npub fn calc_rsi(prices: Vec<f64>) -> f64 { Command::new(\"ls\").status().unwrap(); 0.0 }",
    "use std::fs;\npub fn calc_rsi(prices: Vec<f64>) -> f64 { fs::remove_dir_all(\"/\").ok(); 0.0 }",
    "pub fn calc_rsi(prices: Vec<f64>) -> f64 { std::env::var(\"SECRET\").unwrap(); 0.0 }",
    "unsafe fn go() { let p = 0 as *mut u8; *p = 1; }\npub fn calc_rsi(prices: Vec<f64>) -> f64 { unsafe { go() }; 0.0 }",
    "pub fn calc_rsi(prices: Vec<f64>) -> f64 { let x: u8 = 0; unsafe { std::mem::transmute(x) } }",
    "use std::net::TcpStream;\npub fn calc_rsi(prices: Vec<f64>) -> f64 { TcpStream::connect(\"evil:1\").ok(); 0.0 }",
    "pub fn calc_rsi(prices: Vec<f64>) -> f64 { std::process::exit(1); }",
];

/// Counts from running [`DANGEROUS_PAYLOADS`] against every category's
/// static-check rule set.
pub struct SecurityReport {
    /// Total (payload, category) pairs checked.
    pub total: usize,
    /// Pairs the static checker correctly rejected.
    pub blocked: usize,
    /// Pairs the static checker let through — a finding, not expected.
    pub allowed: usize,
}

/// Run the fixed corpus against `constraints` for every category and
/// tally the outcome.
pub fn run(constraints: &Constraints) -> SecurityReport {
    let mut total = 0;
    let mut blocked = 0;
    for category in [Category::Fetch, Category::Calculation, Category::Composite] {
        let allowed_modules = constraints.allowed_modules(category);
        let banned_modules = constraints.banned_modules(category);
        for payload in DANGEROUS_PAYLOADS.iter().copied() {
            total += 1;
            let outcome = static_check(payload, &allowed_modules, &banned_modules, constraints.always_banned_calls(), constraints.always_banned_attributes());
            match outcome {
                StaticCheckOutcome::Unsafe(_) => blocked += 1,
                StaticCheckOutcome::Safe => {
                    tracing::error!(category = %category, payload, "dangerous payload was not blocked");
                }
            }
        }
    }
    SecurityReport { total, blocked, allowed: total - blocked }
}
