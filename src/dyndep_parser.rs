//! Parser for dyndep files, which name implicit inputs and outputs of build
//! statements that are only known once some earlier step has run:
//!
//! ```text
//! ninja_dyndep_version = 1
//! build out | out.imp: dyndep | in.imp
//!   restat = 1
//! ```

use crate::canon::canon_path_bits;
use crate::dyndep::{DyndepFile, Dyndeps};
use crate::eval::{Env, EvalString};
use crate::graph::{EdgeId, NodeId, State};
use crate::scanner::{ParseResult, Scanner};
use rustc_hash::FxHashSet;

/// The only variable visible in a dyndep file.
struct VersionEnv<'a>(Option<&'a str>);

impl Env for VersionEnv<'_> {
    fn evaluate_var(&self, result: &mut String, var: &str) {
        if var == "ninja_dyndep_version" {
            if let Some(version) = self.0 {
                result.push_str(version);
            }
        }
    }
}

struct Parser<'a, 'b> {
    scanner: Scanner<'a>,
    state: &'b mut State,
    version: Option<String>,
}

fn is_ident_char(c: char) -> bool {
    matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.')
}

impl<'a, 'b> Parser<'a, 'b> {
    fn read_ident(&mut self) -> &'a [u8] {
        let start = self.scanner.ofs;
        while !self.scanner.at_end() && is_ident_char(self.scanner.peek()) {
            self.scanner.next();
        }
        self.scanner.slice(start, self.scanner.ofs)
    }

    /// Skip a `$`+newline line continuation plus the following indent.
    fn skip_continuation(&mut self) -> bool {
        let len = match (self.scanner.peek(), self.scanner.peek_at(1), self.scanner.peek_at(2)) {
            ('$', '\n', _) => 2,
            ('$', '\r', '\n') => 3,
            _ => return false,
        };
        for _ in 0..len {
            self.scanner.next();
        }
        self.scanner.skip_spaces();
        true
    }

    fn skip_spaces(&mut self) {
        loop {
            self.scanner.skip_spaces();
            if !self.skip_continuation() {
                break;
            }
        }
    }

    fn expand(&self, text: &[u8]) -> ParseResult<String> {
        let text = String::from_utf8_lossy(text);
        match EvalString::parse(&text) {
            Ok(eval) => Ok(eval.evaluate(&VersionEnv(self.version.as_deref()))),
            Err(err) => self.scanner.parse_error(err.to_string()),
        }
    }

    /// Read a path, honoring `$` escapes.  Returns None if there is none.
    fn read_path(&mut self) -> ParseResult<Option<String>> {
        self.skip_spaces();
        let mut raw: Vec<u8> = Vec::new();
        while !self.scanner.at_end() {
            match self.scanner.peek() {
                ' ' | ':' | '|' | '\n' => break,
                '\r' if self.scanner.peek_at(1) == '\n' => break,
                '$' => {
                    if self.skip_continuation() {
                        continue;
                    }
                    raw.push(b'$');
                    self.scanner.next();
                    if self.scanner.peek() == '{' {
                        // Copy through to the closing brace; expand() checks it.
                        while !self.scanner.at_end() && self.scanner.peek() != '}' {
                            raw.push(self.scanner.read() as u8);
                        }
                    }
                    if !self.scanner.at_end() && !self.scanner.peek_newline() {
                        raw.push(self.scanner.read() as u8);
                    }
                }
                c => {
                    raw.push(c as u8);
                    self.scanner.next();
                }
            }
        }
        if raw.is_empty() {
            return Ok(None);
        }
        let path = self.expand(&raw)?;
        if path.is_empty() {
            return self.scanner.parse_error("empty path");
        }
        Ok(Some(path))
    }

    fn read_paths(&mut self) -> ParseResult<Vec<String>> {
        let mut paths = Vec::new();
        while let Some(path) = self.read_path()? {
            paths.push(path);
        }
        Ok(paths)
    }

    /// Read the rest of the line as a binding value.
    fn read_value(&mut self) -> ParseResult<String> {
        self.skip_spaces();
        let mut raw: Vec<u8> = Vec::new();
        while !self.scanner.at_end() && !self.scanner.peek_newline() {
            if self.skip_continuation() {
                continue;
            }
            if self.scanner.peek() == '$' {
                raw.push(self.scanner.read() as u8);
                if self.scanner.at_end() || self.scanner.peek_newline() {
                    break;
                }
            }
            raw.push(self.scanner.read() as u8);
        }
        self.expand(&raw)
    }

    fn expect_newline(&mut self) -> ParseResult<()> {
        self.skip_spaces();
        if self.scanner.skip_newline() || self.scanner.at_end() {
            return Ok(());
        }
        self.scanner.parse_error("expected newline")
    }

    /// `name = value`, with the name already read.
    fn parse_let(&mut self) -> ParseResult<String> {
        self.skip_spaces();
        if !self.scanner.skip('=') {
            return self.scanner.parse_error("expected '='");
        }
        let value = self.read_value()?;
        self.expect_newline()?;
        Ok(value)
    }

    fn parse_version(&mut self, name: &[u8]) -> ParseResult<()> {
        if name != b"ninja_dyndep_version" {
            return self.scanner.parse_error("expected 'ninja_dyndep_version = ...'");
        }
        let version = self.parse_let()?;
        let mut parts = version.splitn(2, '.');
        let major = parts.next().and_then(|m| m.parse::<u32>().ok());
        let minor = match parts.next() {
            Some(m) => m.parse::<u32>().ok(),
            None => Some(0),
        };
        if major != Some(1) || minor != Some(0) {
            return self
                .scanner
                .parse_error(format!("unsupported 'ninja_dyndep_version = {}'", version));
        }
        self.version = Some(version);
        Ok(())
    }

    fn nodes_for(&mut self, paths: Vec<String>) -> ParseResult<Vec<NodeId>> {
        let mut nodes = Vec::with_capacity(paths.len());
        for path in paths {
            let (path, bits) = match canon_path_bits(&path) {
                Ok(canon) => canon,
                Err(err) => return self.scanner.parse_error(err.to_string()),
            };
            nodes.push(self.state.get_node(&path, bits));
        }
        Ok(nodes)
    }

    fn parse_edge(&mut self, file: &mut DyndepFile, seen: &mut FxHashSet<EdgeId>) -> ParseResult<()> {
        let Some(out) = self.read_path()? else {
            return self.scanner.parse_error("expected path");
        };
        let edge = match canon_path_bits(&out)
            .ok()
            .and_then(|(canon, _)| self.state.lookup_node(&canon))
            .and_then(|node| self.state.node(node).in_edge())
        {
            Some(edge) => edge,
            None => return self.scanner.parse_error(format!("no build statement exists for '{}'", out)),
        };
        if !seen.insert(edge) {
            return self.scanner.parse_error(format!("multiple statements for '{}'", out));
        }

        if self.read_path()?.is_some() {
            return self.scanner.parse_error("explicit outputs not supported");
        }
        let mut implicit_outs = Vec::new();
        if self.scanner.skip('|') {
            implicit_outs = self.read_paths()?;
        }
        if !self.scanner.skip(':') {
            return self.scanner.parse_error("expected ':'");
        }

        self.skip_spaces();
        if self.read_ident() != b"dyndep" {
            return self.scanner.parse_error("expected build command name 'dyndep'");
        }

        if self.read_path()?.is_some() {
            return self.scanner.parse_error("explicit inputs not supported");
        }
        let mut implicit_ins = Vec::new();
        if self.scanner.peek() == '|' && self.scanner.peek_at(1) == '|' {
            return self.scanner.parse_error("order-only inputs not supported");
        }
        if self.scanner.skip('|') {
            if self.scanner.peek() == '|' {
                return self.scanner.parse_error("order-only inputs not supported");
            }
            implicit_ins = self.read_paths()?;
        }
        self.expect_newline()?;

        let mut dyndeps = Dyndeps::default();
        while self.scanner.peek() == ' ' {
            self.scanner.skip_spaces();
            let key = self.read_ident();
            if key != b"restat" {
                return self.scanner.parse_error("binding is not 'restat'");
            }
            dyndeps.restat = !self.parse_let()?.is_empty();
        }

        dyndeps.implicit_inputs = self.nodes_for(implicit_ins)?;
        dyndeps.implicit_outputs = self.nodes_for(implicit_outs)?;
        file.push((edge, dyndeps));
        Ok(())
    }

    fn parse(&mut self) -> ParseResult<DyndepFile> {
        let mut file = DyndepFile::new();
        let mut seen = FxHashSet::default();
        loop {
            // Blank and comment lines.
            loop {
                let line_start = self.scanner.ofs;
                self.scanner.skip_spaces();
                if self.scanner.peek() == '#' {
                    while !self.scanner.at_end() && !self.scanner.peek_newline() {
                        self.scanner.next();
                    }
                }
                if !self.scanner.skip_newline() {
                    if self.scanner.ofs != line_start && !self.scanner.at_end() {
                        return self.scanner.parse_error("unexpected indent");
                    }
                    break;
                }
            }
            if self.scanner.at_end() {
                if self.version.is_none() {
                    return self.scanner.parse_error("expected 'ninja_dyndep_version = ...'");
                }
                return Ok(file);
            }

            let ident = self.read_ident();
            if ident == b"build" {
                if self.version.is_none() {
                    return self.scanner.parse_error("expected 'ninja_dyndep_version = ...'");
                }
                self.parse_edge(&mut file, &mut seen)?;
            } else if ident.is_empty() {
                return self
                    .scanner
                    .parse_error(format!("unexpected {:?}", self.scanner.peek()));
            } else if self.version.is_some() {
                return self.scanner.parse_error("unexpected identifier");
            } else {
                self.parse_version(ident)?;
            }
        }
    }
}

/// Parse the dyndep file `filename` with contents `text`, creating nodes for
/// the paths it names.  Errors are formatted as `filename:line: message`.
pub fn parse(state: &mut State, filename: &str, text: &[u8]) -> anyhow::Result<DyndepFile> {
    let mut parser = Parser {
        scanner: Scanner::new(text),
        state,
        version: None,
    };
    match parser.parse() {
        Ok(file) => Ok(file),
        Err(err) => anyhow::bail!(parser.scanner.format_parse_error(filename, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Rule;

    fn test_state() -> State {
        let mut state = State::new();
        state
            .add_rule(Rule::with_bindings("touch", &[("command", "touch $out")]).unwrap())
            .unwrap();
        state.build("touch").out("out").out("otherout").finish().unwrap();
        state.build("touch").out("other").finish().unwrap();
        state
    }

    fn parse_ok(state: &mut State, text: &str) -> DyndepFile {
        match parse(state, "input", text.as_bytes()) {
            Ok(file) => file,
            Err(err) => panic!("{}", err),
        }
    }

    fn parse_err(text: &str) -> String {
        let mut state = test_state();
        match parse(&mut state, "input", text.as_bytes()) {
            Ok(_) => panic!("expected error parsing {:?}", text),
            Err(err) => err.to_string(),
        }
    }

    #[test]
    fn empty_and_version_only() {
        assert!(parse_err("").starts_with("input:1: expected 'ninja_dyndep_version = ...'"));
        let mut state = test_state();
        assert!(parse_ok(&mut state, "ninja_dyndep_version = 1\n").is_empty());
        assert!(parse_ok(&mut state, "# comment\nninja_dyndep_version = 1.0\n\n").is_empty());
    }

    #[test]
    fn bad_versions() {
        assert!(parse_err("ninja_dyndep_version = 0\n").contains("unsupported 'ninja_dyndep_version = 0'"));
        assert!(parse_err("ninja_dyndep_version = 1.1\n").contains("unsupported 'ninja_dyndep_version = 1.1'"));
        assert!(parse_err("not_version = 1\n").contains("expected 'ninja_dyndep_version = ...'"));
        assert!(parse_err("ninja_dyndep_version = 1\nninja_dyndep_version = 1\n").contains("unexpected identifier"));
    }

    #[test]
    fn edge_with_everything() {
        let mut state = test_state();
        let file = parse_ok(
            &mut state,
            "ninja_dyndep_version = 1\nbuild out | impout: dyndep | impin ./impin2\n  restat = 1\n",
        );
        assert_eq!(file.len(), 1);
        let (edge, dyndeps) = &file[0];
        assert_eq!(Some(*edge), state.node(state.lookup_node("out").unwrap()).in_edge());
        assert!(dyndeps.restat);
        let paths = |ids: &[NodeId]| -> Vec<String> { ids.iter().map(|&n| state.node(n).path().to_owned()).collect() };
        assert_eq!(paths(&dyndeps.implicit_outputs), vec!["impout"]);
        assert_eq!(paths(&dyndeps.implicit_inputs), vec!["impin", "impin2"]);
    }

    #[test]
    fn any_output_identifies_the_edge() {
        let mut state = test_state();
        let file = parse_ok(&mut state, "ninja_dyndep_version = 1\nbuild otherout: dyndep\n");
        assert_eq!(Some(file[0].0), state.node(state.lookup_node("out").unwrap()).in_edge());
        assert!(!file[0].1.restat);
    }

    #[test]
    fn edge_errors() {
        let v = "ninja_dyndep_version = 1\n";
        assert!(parse_err(&format!("{}build missing: dyndep\n", v)).contains("no build statement exists for 'missing'"));
        assert!(parse_err(&format!("{}build out other: dyndep\n", v)).contains("explicit outputs not supported"));
        assert!(parse_err(&format!("{}build out: dyndep in\n", v)).contains("explicit inputs not supported"));
        assert!(parse_err(&format!("{}build out: dyndep || oo\n", v)).contains("order-only inputs not supported"));
        assert!(parse_err(&format!("{}build out: touch\n", v)).contains("expected build command name 'dyndep'"));
        assert!(parse_err(&format!("{}build out: dyndep\n  command = x\n", v)).contains("binding is not 'restat'"));
        assert!(parse_err(&format!("{}build out: dyndep\nbuild otherout: dyndep\n", v)).contains("multiple statements for 'otherout'"));
        assert!(parse_err(&format!("{}build out | imp dyndep\n", v)).contains("expected ':'"));
    }

    #[test]
    fn error_reports_line() {
        let err = parse_err("ninja_dyndep_version = 1\n\nbuild nope: dyndep\n");
        assert!(err.starts_with("input:3: no build statement exists for 'nope'"), "{}", err);
    }

    #[test]
    fn escapes_in_paths() {
        let mut state = test_state();
        let file = parse_ok(&mut state, "ninja_dyndep_version = 1\nbuild out: dyndep | with$ space a$:b\n");
        let paths: Vec<&str> = file[0].1.implicit_inputs.iter().map(|&n| state.node(n).path()).collect();
        assert_eq!(paths, vec!["with space", "a:b"]);
    }
}
