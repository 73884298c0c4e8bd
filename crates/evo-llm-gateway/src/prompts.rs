//! Category-specific system prompts. Each encodes the category's
//! invariants: what modules are allowed, the expected return shape,
//! and what not to do — so the model sees the constraint up front
//! instead of discovering it via a rejected submission.

use evo_types::Category;

/// Fallback prompt used only if a category somehow has none (should
/// be unreachable since [`Category`] is a closed enum).
pub const SYSTEM_PROMPT: &str = "You write a single Rust function for a financial analytics tool. \
Respond with your reasoning inside <think></think>, followed by exactly one \
```rust fenced block containing the complete function.";

const FETCH_PROMPT: &str = "You write a single Rust function that fetches market data through the \
engine's typed data-provider trait. You may use `reqwest` and `sha2` for \
caching, and nothing else network- or filesystem-related. Return a \
`Result<T, String>`-free typed value built only from the provider's \
response. Never read environment variables or local files directly. \
Respond with your reasoning inside <think></think>, followed by exactly one \
```rust fenced block containing the complete function.";

const CALCULATION_PROMPT: &str = "You write a single Rust function that computes a value from \
already-supplied numeric arguments. You MUST NOT import networking, \
filesystem, process, or environment modules — the function receives all \
its inputs as parameters and returns a plain value. No side effects. \
Respond with your reasoning inside <think></think>, followed by exactly one \
```rust fenced block containing the complete function.";

const COMPOSITE_PROMPT: &str = "You write a single Rust function that combines the outputs of other \
calculation tools into a derived signal (boolean or scored value). Treat \
its inputs as already-computed numeric series; do not fetch or perform \
network I/O. Respond with your reasoning inside <think></think>, followed \
by exactly one ```rust fenced block containing the complete function.";

/// Pick the system prompt for a declared or inferred category.
pub fn system_prompt_for(category: Category) -> &'static str {
    match category {
        Category::Fetch => FETCH_PROMPT,
        Category::Calculation => CALCULATION_PROMPT,
        Category::Composite => COMPOSITE_PROMPT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calculation_prompt_forbids_network_modules() {
        assert!(system_prompt_for(Category::Calculation).contains("MUST NOT import"));
    }
}
