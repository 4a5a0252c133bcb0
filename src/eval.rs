//! Represents binding strings with embedded variable references, e.g.
//! `c++ $in -o $out`, and mechanisms for expanding those into plain strings.

use crate::densemap::dense_id;
use anyhow::bail;
use rustc_hash::FxHashMap;

/// An environment providing a mapping of variable name to variable value.
pub trait Env {
    /// Append the expansion of `var` to `result`.  Unknown variables
    /// expand to nothing.
    fn evaluate_var(&self, result: &mut String, var: &str);
}

/// One token within an EvalString, either literal text or a variable reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalPart {
    Literal(String),
    VarRef(String),
}

/// A parsed but unexpanded variable-reference string, e.g. "cc $in -o $out".
/// Rule bindings are stored in this form and expanded per edge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalString(Vec<EvalPart>);

fn is_simple_varname_char(c: u8) -> bool {
    matches!(c, b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_' | b'-')
}

fn is_varname_char(c: u8) -> bool {
    is_simple_varname_char(c) || c == b'.'
}

impl EvalString {
    pub fn new(parts: Vec<EvalPart>) -> Self {
        EvalString(parts)
    }

    /// An EvalString with no variable references.
    pub fn literal<S: Into<String>>(text: S) -> Self {
        let text = text.into();
        if text.is_empty() {
            return EvalString::default();
        }
        EvalString(vec![EvalPart::Literal(text)])
    }

    /// Parse binding text with `$` escapes: `$$`, `$ `, `$:`, `$` + newline
    /// (line continuation, eating leading whitespace), `${name}` and `$name`.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let bytes = text.as_bytes();
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut ofs = 0;
        while ofs < bytes.len() {
            let start = ofs;
            while ofs < bytes.len() && bytes[ofs] != b'$' {
                ofs += 1;
            }
            literal.push_str(&text[start..ofs]);
            if ofs == bytes.len() {
                break;
            }
            ofs += 1; // '$'
            match bytes.get(ofs) {
                Some(b'$') | Some(b' ') | Some(b':') => {
                    literal.push(bytes[ofs] as char);
                    ofs += 1;
                }
                Some(b'\n') => {
                    ofs += 1;
                    while ofs < bytes.len() && bytes[ofs] == b' ' {
                        ofs += 1;
                    }
                }
                Some(b'{') => {
                    let name_start = ofs + 1;
                    let mut end = name_start;
                    while end < bytes.len() && is_varname_char(bytes[end]) {
                        end += 1;
                    }
                    if end == name_start || bytes.get(end) != Some(&b'}') {
                        bail!("bad $-escape (literal $ must be written as $$)");
                    }
                    if !literal.is_empty() {
                        parts.push(EvalPart::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(EvalPart::VarRef(text[name_start..end].to_owned()));
                    ofs = end + 1;
                }
                Some(&c) if is_simple_varname_char(c) => {
                    let name_start = ofs;
                    while ofs < bytes.len() && is_simple_varname_char(bytes[ofs]) {
                        ofs += 1;
                    }
                    if !literal.is_empty() {
                        parts.push(EvalPart::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(EvalPart::VarRef(text[name_start..ofs].to_owned()));
                }
                _ => bail!("bad $-escape (literal $ must be written as $$)"),
            }
        }
        if !literal.is_empty() {
            parts.push(EvalPart::Literal(literal));
        }
        Ok(EvalString(parts))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parts(&self) -> &[EvalPart] {
        &self.0
    }

    pub fn evaluate_into(&self, result: &mut String, env: &dyn Env) {
        for part in &self.0 {
            match part {
                EvalPart::Literal(s) => result.push_str(s),
                EvalPart::VarRef(v) => env.evaluate_var(result, v),
            }
        }
    }

    /// Expand into a plain String, looking up variable references in `env`.
    pub fn evaluate(&self, env: &dyn Env) -> String {
        let mut result = String::new();
        self.evaluate_into(&mut result, env);
        result
    }
}

dense_id!(
    /// Identifies a Scope within a State.
    ScopeId
);

/// The top-level scope every State starts with.
pub const ROOT_SCOPE: ScopeId = ScopeId(0);

/// A variable scope: the top-level file scope, or a nested subninja scope.
/// Values are already expanded; lookups fall back to the parent scope.
#[derive(Debug, Default)]
pub struct Scope {
    bindings: FxHashMap<String, String>,
    pub parent: Option<ScopeId>,
}

impl Scope {
    pub fn new(parent: Option<ScopeId>) -> Self {
        Scope {
            bindings: FxHashMap::default(),
            parent,
        }
    }

    pub fn add_binding(&mut self, key: String, value: String) {
        self.bindings.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.bindings.get(key).map(|v| v.as_str())
    }
}

fn is_known_shell_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '-' | '.' | '/')
}

/// Append `input` to `result`, quoted for a POSIX shell if needed.
pub fn shell_escape(input: &str, result: &mut String) {
    if input.chars().all(is_known_shell_safe_char) {
        result.push_str(input);
        return;
    }
    result.push('\'');
    for c in input.chars() {
        if c == '\'' {
            result.push_str("'\\''");
        } else {
            result.push(c);
        }
    }
    result.push('\'');
}

/// Append `input` to `result`, quoted for CommandLineToArgvW if needed.
pub fn win32_escape(input: &str, result: &mut String) {
    if !input.contains(|c| c == ' ' || c == '"') {
        result.push_str(input);
        return;
    }
    result.push('"');
    let mut backslashes = 0;
    for c in input.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                // Escape the preceding backslashes and the quote itself.
                result.extend(std::iter::repeat('\\').take(backslashes + 1));
                backslashes = 0;
            }
            _ => backslashes = 0,
        }
        result.push(c);
    }
    result.extend(std::iter::repeat('\\').take(backslashes));
    result.push('"');
}

/// Escape a path for use on this platform's command line.
pub fn platform_escape(input: &str, result: &mut String) {
    if cfg!(windows) {
        win32_escape(input, result)
    } else {
        shell_escape(input, result)
    }
}
