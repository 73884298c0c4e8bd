//! Static AST security analysis (`static_check`, `spec.md` §4.3).

use std::collections::HashSet;
use std::fmt;

use syn::visit::{self, Visit};
use syn::{Expr, ItemUse, UseTree};

/// A single reason a payload was rejected by the static check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityViolation {
    /// The payload did not parse as valid Rust.
    SyntaxError(String),
    /// An import referenced a module outside the allowed set, or
    /// explicitly inside the banned set.
    BannedImport(String),
    /// A call expression referenced a banned identifier.
    BannedCall(String),
    /// An attribute/field/path access referenced a banned identifier.
    BannedAttribute(String),
    /// A string literal embedded a banned identifier, which could be
    /// used to reach it through dynamic resolution.
    BannedLiteral(String),
    /// An `unsafe` block or function was present.
    UnsafeCode,
}

impl fmt::Display for SecurityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityViolation::SyntaxError(msg) => write!(f, "syntax error: {msg}"),
            SecurityViolation::BannedImport(m) => write!(f, "banned import `{m}`"),
            SecurityViolation::BannedCall(c) => write!(f, "banned call `{c}`"),
            SecurityViolation::BannedAttribute(a) => write!(f, "banned attribute access `{a}`"),
            SecurityViolation::BannedLiteral(s) => write!(f, "banned identifier in string literal `{s}`"),
            SecurityViolation::UnsafeCode => write!(f, "unsafe code is not permitted"),
        }
    }
}

/// Result of a `static_check` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticCheckOutcome {
    /// No violation found.
    Safe,
    /// Rejected, with the first violation encountered.
    Unsafe(SecurityViolation),
}

/// Strip the leading lines a bypass attempt might use to disable
/// lints before the real parse happens (Rust's analogue of stripping
/// PEP-263 encoding declarations from the first two source lines).
fn normalize_source(code: &str) -> String {
    code.lines()
        .take(2)
        .filter(|line| !line.trim_start().starts_with("#!["))
        .chain(code.lines().skip(2))
        .collect::<Vec<_>>()
        .join("\n")
}

fn flatten_use_tree(prefix: &str, tree: &UseTree, out: &mut Vec<String>) {
    match tree {
        UseTree::Path(p) => {
            let next = if prefix.is_empty() {
                p.ident.to_string()
            } else {
                format!("{prefix}::{}", p.ident)
            };
            flatten_use_tree(&next, &p.tree, out);
        }
        UseTree::Name(n) => out.push(format!("{prefix}::{}", n.ident)),
        UseTree::Rename(r) => out.push(format!("{prefix}::{}", r.ident)),
        UseTree::Glob(_) => out.push(format!("{prefix}::*")),
        UseTree::Group(g) => {
            for item in &g.items {
                flatten_use_tree(prefix, item, out);
            }
        }
    }
}

struct SecurityVisitor<'a> {
    allowed: &'a HashSet<String>,
    banned_modules: &'a HashSet<String>,
    banned_calls: &'a HashSet<String>,
    banned_attributes: &'a HashSet<String>,
    violation: Option<SecurityViolation>,
}

fn path_is_under_any(path: &str, set: &HashSet<String>) -> Option<String> {
    set.iter().find(|prefix| path == prefix.as_str() || path.starts_with(&format!("{prefix}::"))).cloned()
}

impl<'a, 'ast> Visit<'ast> for SecurityVisitor<'a> {
    fn visit_item_use(&mut self, node: &'ast ItemUse) {
        if self.violation.is_some() {
            return;
        }
        let mut paths = Vec::new();
        flatten_use_tree("", &node.tree, &mut paths);
        for p in paths {
            let p = p.trim_start_matches("::").to_string();
            if path_is_under_any(&p, self.banned_modules).is_some() {
                self.violation = Some(SecurityViolation::BannedImport(p));
                return;
            }
            if !self.allowed.is_empty() && path_is_under_any(&p, self.allowed).is_none() {
                self.violation = Some(SecurityViolation::BannedImport(p));
                return;
            }
        }
        visit::visit_item_use(self, node);
    }

    fn visit_expr(&mut self, node: &'ast Expr) {
        if self.violation.is_some() {
            return;
        }
        match node {
            Expr::Unsafe(_) => {
                self.violation = Some(SecurityViolation::UnsafeCode);
                return;
            }
            Expr::Call(call) => {
                if let Expr::Path(p) = call.func.as_ref() {
                    if let Some(seg) = p.path.segments.last() {
                        let name = seg.ident.to_string();
                        if self.banned_calls.contains(&name) {
                            self.violation = Some(SecurityViolation::BannedCall(name));
                            return;
                        }
                        let joined = p
                            .path
                            .segments
                            .iter()
                            .map(|s| s.ident.to_string())
                            .collect::<Vec<_>>()
                            .join("::");
                        if self.banned_calls.contains(&joined) {
                            self.violation = Some(SecurityViolation::BannedCall(joined));
                            return;
                        }
                    }
                }
            }
            Expr::MethodCall(call) => {
                let name = call.method.to_string();
                if self.banned_calls.contains(&name) {
                    self.violation = Some(SecurityViolation::BannedCall(name));
                    return;
                }
            }
            Expr::Field(field) => {
                if let syn::Member::Named(ident) = &field.member {
                    let name = ident.to_string();
                    if self.banned_attributes.contains(&name) {
                        self.violation = Some(SecurityViolation::BannedAttribute(name));
                        return;
                    }
                }
            }
            Expr::Path(p) => {
                for seg in &p.path.segments {
                    let name = seg.ident.to_string();
                    if self.banned_attributes.contains(&name) {
                        self.violation = Some(SecurityViolation::BannedAttribute(name));
                        return;
                    }
                }
            }
            Expr::Lit(lit) => {
                if let syn::Lit::Str(s) = &lit.lit {
                    let value = s.value();
                    for banned in self.banned_calls.iter().chain(self.banned_attributes.iter()) {
                        if value.contains(banned.as_str()) {
                            self.violation = Some(SecurityViolation::BannedLiteral(value));
                            return;
                        }
                    }
                }
            }
            _ => {}
        }
        visit::visit_expr(self, node);
    }
}

/// Parse `code` and walk it once looking for banned imports, calls,
/// attribute access, and string literals. See `spec.md` §4.3.
pub fn static_check(
    code: &str,
    allowed_modules: &HashSet<String>,
    banned_modules: &HashSet<String>,
    banned_calls: &HashSet<String>,
    banned_attributes: &HashSet<String>,
) -> StaticCheckOutcome {
    let normalized = normalize_source(code);
    let file = match syn::parse_file(&normalized) {
        Ok(f) => f,
        Err(e) => return StaticCheckOutcome::Unsafe(SecurityViolation::SyntaxError(e.to_string())),
    };

    let mut visitor = SecurityVisitor {
        allowed: allowed_modules,
        banned_modules,
        banned_calls,
        banned_attributes,
        violation: None,
    };
    visitor.visit_file(&file);

    match visitor.violation {
        Some(v) => StaticCheckOutcome::Unsafe(v),
        None => StaticCheckOutcome::Safe,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sets(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rejects_banned_import() {
        let code = "use std::process::Command;\npub fn f() {}";
        let outcome = static_check(code, &HashSet::new(), &sets(&["std::process"]), &HashSet::new(), &HashSet::new());
        assert!(matches!(outcome, StaticCheckOutcome::Unsafe(SecurityViolation::BannedImport(_))));
    }

    #[test]
    fn rejects_banned_call() {
        let code = "pub fn f() { std::process::exit(1); }";
        let outcome = static_check(code, &HashSet::new(), &HashSet::new(), &sets(&["exit"]), &HashSet::new());
        assert!(matches!(outcome, StaticCheckOutcome::Unsafe(SecurityViolation::BannedCall(_))));
    }

    #[test]
    fn rejects_unsafe_blocks() {
        let code = "pub fn f() { unsafe { } }";
        let outcome = static_check(code, &HashSet::new(), &HashSet::new(), &HashSet::new(), &HashSet::new());
        assert!(matches!(outcome, StaticCheckOutcome::Unsafe(SecurityViolation::UnsafeCode)));
    }

    #[test]
    fn rejects_syntax_errors() {
        let outcome = static_check("pub fn f( {{{", &HashSet::new(), &HashSet::new(), &HashSet::new(), &HashSet::new());
        assert!(matches!(outcome, StaticCheckOutcome::Unsafe(SecurityViolation::SyntaxError(_))));
    }

    #[test]
    fn safe_code_passes() {
        let code = "pub fn calc_rsi(prices: Vec<f64>, period: usize) -> f64 { 50.0 }";
        let outcome = static_check(code, &HashSet::new(), &HashSet::new(), &HashSet::new(), &HashSet::new());
        assert_eq!(outcome, StaticCheckOutcome::Safe);
    }

    #[test]
    fn catches_identifier_hidden_in_string_literal() {
        let code = r#"pub fn f() -> &'static str { "exit" }"#;
        let outcome = static_check(code, &HashSet::new(), &HashSet::new(), &sets(&["exit"]), &HashSet::new());
        assert!(matches!(outcome, StaticCheckOutcome::Unsafe(SecurityViolation::BannedLiteral(_))));
    }
}
