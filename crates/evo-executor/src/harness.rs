//! Generates the `main.rs` compiled alongside a synthesized tool body.
//!
//! `rustc` is invoked directly, without Cargo, so the harness cannot
//! rely on any external crate being resolvable on the ephemeral
//! binary's behalf. Argument decoding and result encoding therefore go
//! through a tiny hand-rolled JSON module (`__mini_json`) embedded in
//! the generated source rather than pulling in `serde_json` as an
//! extern crate.

use std::fmt::Write as _;

/// Declared type of one tool argument, used to generate typed
/// extraction code against the `__mini_json` value tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    /// `f64`
    F64,
    /// `usize`
    USize,
    /// `String`
    Str,
    /// `bool`
    Bool,
    /// `Vec<f64>`
    VecF64,
}

/// One entry of a tool's declared argument schema.
#[derive(Debug, Clone)]
pub struct ArgSpec {
    /// Argument name, matching the tool function's parameter name.
    pub name: String,
    /// Declared type.
    pub ty: ArgType,
}

impl ArgSpec {
    /// Construct a new argument spec.
    pub fn new(name: impl Into<String>, ty: ArgType) -> Self {
        Self { name: name.into(), ty }
    }
}

/// Declared return type of a tool function, used to pick the
/// `__mini_json` encoder used for the sentinel-framed result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    /// `f64`
    F64,
    /// `bool`
    Bool,
    /// `Vec<f64>`
    VecF64,
    /// A `Dict` output (`std::collections::HashMap<String, f64>`), per
    /// `OutputType::Dict` in `evo-types`.
    Dict,
    /// `String`
    Str,
}

fn arg_extract_expr(spec: &ArgSpec) -> String {
    let key = &spec.name;
    match spec.ty {
        ArgType::F64 => format!(r#"args.get("{key}").and_then(|v| v.as_f64()).expect("missing arg {key}")"#),
        ArgType::USize => {
            format!(r#"args.get("{key}").and_then(|v| v.as_f64()).expect("missing arg {key}") as usize"#)
        }
        ArgType::Str => format!(r#"args.get("{key}").and_then(|v| v.as_str()).expect("missing arg {key}").to_string()"#),
        ArgType::Bool => format!(r#"args.get("{key}").and_then(|v| v.as_bool()).expect("missing arg {key}")"#),
        ArgType::VecF64 => format!(
            r#"args.get("{key}").and_then(|v| v.as_array()).expect("missing arg {key}").iter().map(|x| x.as_f64().unwrap_or(0.0)).collect::<Vec<f64>>()"#
        ),
    }
}

fn result_encode_stmt(return_type: ReturnType) -> &'static str {
    match return_type {
        ReturnType::F64 => "__mini_json::Value::Num(__result)",
        ReturnType::Bool => "__mini_json::Value::Bool(__result)",
        ReturnType::VecF64 => "__mini_json::Value::Arr(__result.into_iter().map(__mini_json::Value::Num).collect())",
        ReturnType::Dict => {
            "__mini_json::Value::Obj(__result.into_iter().map(|(k, v)| (k, __mini_json::Value::Num(v))).collect())"
        }
        ReturnType::Str => "__mini_json::Value::Str(__result)",
    }
}

/// Render the full `main.rs` source for a synthesized tool, wiring
/// argument decoding, the dispatch between `verify_only` and the named
/// function, and sentinel-framed result encoding.
pub fn render_harness(tool_code: &str, func_name: &str, args_schema: &[ArgSpec], return_type: ReturnType) -> String {
    let mut out = String::new();

    out.push_str(MINI_JSON_MODULE);
    out.push_str("\n// --- synthesized tool body ---\n");
    out.push_str(tool_code);
    out.push_str("\n// --- generated harness ---\n");

    out.push_str(
        r#"
fn main() {
    let args_path = std::env::args().nth(1).expect("missing args path");
    let raw = std::fs::read_to_string(&args_path).expect("failed to read args file");
    let args = __mini_json::parse(&raw).expect("invalid args json");
"#,
    );

    writeln!(out, r#"    if std::env::args().nth(2).as_deref() == Some("verify_only") {{"#).unwrap();
    out.push_str(
        "        let ok = self_test();\n        if ok {\n            println!(\"<<VERIFY_PASS>>\");\n        } else {\n            eprintln!(\"self_test failed\");\n            std::process::exit(1);\n        }\n        return;\n    }\n",
    );

    let mut call_args = String::new();
    for (i, spec) in args_schema.iter().enumerate() {
        if i > 0 {
            call_args.push_str(", ");
        }
        writeln!(out, "    let __arg_{} = {};", spec.name, arg_extract_expr(spec)).unwrap();
        write!(call_args, "__arg_{}", spec.name).unwrap();
    }

    writeln!(out, "    let __result = {func_name}({call_args});").unwrap();
    writeln!(out, "    let __encoded = {};", result_encode_stmt(return_type)).unwrap();
    out.push_str(
        "    println!(\"<<RESULT_START>>\");\n    println!(\"{}\", __mini_json::to_string(&__encoded));\n    println!(\"<<RESULT_END>>\");\n}\n",
    );

    out
}

/// Embedded verbatim into every generated `main.rs`. Deliberately
/// minimal: only the value shapes tool arguments and results need.
const MINI_JSON_MODULE: &str = r#"
mod __mini_json {
    use std::collections::HashMap;
    use std::fmt::Write as _;

    #[derive(Debug, Clone)]
    pub enum Value {
        Null,
        Bool(bool),
        Num(f64),
        Str(String),
        Arr(Vec<Value>),
        Obj(HashMap<String, Value>),
    }

    impl Value {
        pub fn get(&self, key: &str) -> Option<&Value> {
            match self {
                Value::Obj(m) => m.get(key),
                _ => None,
            }
        }
        pub fn as_f64(&self) -> Option<f64> {
            match self {
                Value::Num(n) => Some(*n),
                _ => None,
            }
        }
        pub fn as_bool(&self) -> Option<bool> {
            match self {
                Value::Bool(b) => Some(*b),
                _ => None,
            }
        }
        pub fn as_str(&self) -> Option<&str> {
            match self {
                Value::Str(s) => Some(s.as_str()),
                _ => None,
            }
        }
        pub fn as_array(&self) -> Option<&Vec<Value>> {
            match self {
                Value::Arr(a) => Some(a),
                _ => None,
            }
        }
    }

    pub fn parse(input: &str) -> Result<Value, String> {
        let chars: Vec<char> = input.chars().collect();
        let mut pos = 0usize;
        let v = parse_value(&chars, &mut pos)?;
        Ok(v)
    }

    fn skip_ws(chars: &[char], pos: &mut usize) {
        while *pos < chars.len() && chars[*pos].is_whitespace() {
            *pos += 1;
        }
    }

    fn parse_value(chars: &[char], pos: &mut usize) -> Result<Value, String> {
        skip_ws(chars, pos);
        match chars.get(*pos) {
            Some('{') => parse_obj(chars, pos),
            Some('[') => parse_arr(chars, pos),
            Some('"') => parse_str(chars, pos).map(Value::Str),
            Some('t') | Some('f') => parse_bool(chars, pos),
            Some('n') => {
                *pos += 4;
                Ok(Value::Null)
            }
            Some(_) => parse_num(chars, pos),
            None => Err("unexpected end of input".to_string()),
        }
    }

    fn parse_obj(chars: &[char], pos: &mut usize) -> Result<Value, String> {
        *pos += 1;
        let mut map = HashMap::new();
        skip_ws(chars, pos);
        if chars.get(*pos) == Some(&'}') {
            *pos += 1;
            return Ok(Value::Obj(map));
        }
        loop {
            skip_ws(chars, pos);
            let key = parse_str(chars, pos)?;
            skip_ws(chars, pos);
            if chars.get(*pos) != Some(&':') {
                return Err("expected ':'".to_string());
            }
            *pos += 1;
            let val = parse_value(chars, pos)?;
            map.insert(key, val);
            skip_ws(chars, pos);
            match chars.get(*pos) {
                Some(',') => {
                    *pos += 1;
                }
                Some('}') => {
                    *pos += 1;
                    break;
                }
                _ => return Err("expected ',' or '}'".to_string()),
            }
        }
        Ok(Value::Obj(map))
    }

    fn parse_arr(chars: &[char], pos: &mut usize) -> Result<Value, String> {
        *pos += 1;
        let mut items = Vec::new();
        skip_ws(chars, pos);
        if chars.get(*pos) == Some(&']') {
            *pos += 1;
            return Ok(Value::Arr(items));
        }
        loop {
            let val = parse_value(chars, pos)?;
            items.push(val);
            skip_ws(chars, pos);
            match chars.get(*pos) {
                Some(',') => {
                    *pos += 1;
                }
                Some(']') => {
                    *pos += 1;
                    break;
                }
                _ => return Err("expected ',' or ']'".to_string()),
            }
        }
        Ok(Value::Arr(items))
    }

    fn parse_str(chars: &[char], pos: &mut usize) -> Result<String, String> {
        if chars.get(*pos) != Some(&'"') {
            return Err("expected '\"'".to_string());
        }
        *pos += 1;
        let mut s = String::new();
        loop {
            match chars.get(*pos) {
                Some('"') => {
                    *pos += 1;
                    break;
                }
                Some('\\') => {
                    *pos += 1;
                    match chars.get(*pos) {
                        Some('n') => s.push('\n'),
                        Some('t') => s.push('\t'),
                        Some('"') => s.push('"'),
                        Some('\\') => s.push('\\'),
                        Some(c) => s.push(*c),
                        None => return Err("unterminated escape".to_string()),
                    }
                    *pos += 1;
                }
                Some(c) => {
                    s.push(*c);
                    *pos += 1;
                }
                None => return Err("unterminated string".to_string()),
            }
        }
        Ok(s)
    }

    fn parse_bool(chars: &[char], pos: &mut usize) -> Result<Value, String> {
        if chars[*pos..].starts_with(&['t', 'r', 'u', 'e']) {
            *pos += 4;
            Ok(Value::Bool(true))
        } else if chars[*pos..].starts_with(&['f', 'a', 'l', 's', 'e']) {
            *pos += 5;
            Ok(Value::Bool(false))
        } else {
            Err("invalid literal".to_string())
        }
    }

    fn parse_num(chars: &[char], pos: &mut usize) -> Result<Value, String> {
        let start = *pos;
        if chars.get(*pos) == Some(&'-') {
            *pos += 1;
        }
        while chars.get(*pos).map(|c| c.is_ascii_digit() || *c == '.' || *c == 'e' || *c == 'E' || *c == '+' || *c == '-').unwrap_or(false) {
            *pos += 1;
        }
        let s: String = chars[start..*pos].iter().collect();
        s.parse::<f64>().map(Value::Num).map_err(|e| e.to_string())
    }

    pub fn to_string(value: &Value) -> String {
        let mut out = String::new();
        write_value(value, &mut out);
        out
    }

    fn write_value(value: &Value, out: &mut String) {
        match value {
            Value::Null => out.push_str("null"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Num(n) => {
                let _ = write!(out, "{n}");
            }
            Value::Str(s) => {
                out.push('"');
                for c in s.chars() {
                    match c {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        _ => out.push(c),
                    }
                }
                out.push('"');
            }
            Value::Arr(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write_value(item, out);
                }
                out.push(']');
            }
            Value::Obj(map) => {
                out.push('{');
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write_value(&Value::Str(k.clone()), out);
                    out.push(':');
                    write_value(v, out);
                }
                out.push('}');
            }
        }
    }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_numeric_signature_call() {
        let schema = vec![ArgSpec::new("prices", ArgType::VecF64), ArgSpec::new("period", ArgType::USize)];
        let src = render_harness("pub fn calc_rsi(prices: Vec<f64>, period: usize) -> f64 { 50.0 }", "calc_rsi", &schema, ReturnType::F64);
        assert!(src.contains("fn calc_rsi"));
        assert!(src.contains("__arg_prices"));
        assert!(src.contains("__arg_period"));
        assert!(src.contains("calc_rsi(__arg_prices, __arg_period)"));
        assert!(src.contains("<<RESULT_START>>"));
    }

    #[test]
    fn embeds_mini_json_module_once() {
        let src = render_harness("pub fn f() -> bool { true }", "f", &[], ReturnType::Bool);
        assert_eq!(src.matches("mod __mini_json").count(), 1);
    }

    #[test]
    fn dict_return_type_encodes_as_object() {
        let src = render_harness("pub fn f() -> std::collections::HashMap<String, f64> { Default::default() }", "f", &[], ReturnType::Dict);
        assert!(src.contains("Value::Obj"));
    }
}
