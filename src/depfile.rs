//! Parsing of Makefile-syntax depfiles, as written by `gcc -MD` and friends.

use crate::scanner::{ParseResult, Scanner};
use rustc_hash::FxHashSet;

/// The targets and prerequisites named by a depfile, deduplicated, in
/// order of first appearance.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Deps {
    pub outs: Vec<String>,
    pub ins: Vec<String>,
}

/// Skip spaces, tabs and backslashed newlines.
fn skip_spaces(scanner: &mut Scanner) {
    loop {
        match scanner.peek() {
            ' ' | '\t' if !scanner.at_end() => scanner.next(),
            '\\' if scanner.peek_at(1) == '\n' => {
                scanner.next();
                scanner.next();
            }
            '\\' if scanner.peek_at(1) == '\r' && scanner.peek_at(2) == '\n' => {
                scanner.next();
                scanner.next();
                scanner.next();
            }
            _ => break,
        }
    }
}

/// Read one path, unescaping `\ `, `\#` and `$$`.  A colon only ends the
/// path when followed by whitespace or end of line, so "c:\foo" is one path.
fn read_path(scanner: &mut Scanner) -> Option<String> {
    let mut path: Vec<u8> = Vec::new();
    while !scanner.at_end() {
        let c = scanner.peek();
        match c {
            ' ' | '\t' | '\n' => break,
            '\r' if scanner.peek_at(1) == '\n' => break,
            ':' if matches!(scanner.peek_at(1), ' ' | '\t' | '\n' | '\r' | '\0') => break,
            '\\' => match scanner.peek_at(1) {
                ' ' | '#' => {
                    scanner.next();
                    path.push(scanner.read() as u8);
                }
                '\n' | '\r' => break,
                _ => {
                    scanner.next();
                    path.push(b'\\');
                }
            },
            '$' if scanner.peek_at(1) == '$' => {
                scanner.next();
                scanner.next();
                path.push(b'$');
            }
            _ => {
                scanner.next();
                path.push(c as u8);
            }
        }
    }
    if path.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(&path).into_owned())
}

fn read_paths(scanner: &mut Scanner) -> Vec<String> {
    let mut paths = Vec::new();
    loop {
        skip_spaces(scanner);
        match read_path(scanner) {
            Some(p) => paths.push(p),
            None => break,
        }
    }
    paths
}

pub fn parse(scanner: &mut Scanner) -> ParseResult<Deps> {
    let mut deps = Deps::default();
    let mut seen_outs = FxHashSet::default();
    let mut seen_ins = FxHashSet::default();
    loop {
        // Blank lines.
        loop {
            skip_spaces(scanner);
            if !scanner.skip_newline() {
                break;
            }
        }
        if scanner.at_end() {
            break;
        }

        let targets = read_paths(scanner);
        if targets.is_empty() {
            return scanner.parse_error("expected file");
        }
        scanner.expect(':')?;
        let ins = read_paths(scanner);
        if !scanner.skip_newline() && !scanner.at_end() {
            return scanner.parse_error("inputs may not also have inputs");
        }

        // `gcc -MP` adds an empty rule for each header, to keep make happy
        // when headers are deleted.  Those aren't outputs.
        if ins.is_empty() && targets.iter().all(|t| seen_ins.contains(t)) {
            continue;
        }
        for out in targets {
            if seen_outs.insert(out.clone()) {
                deps.outs.push(out);
            }
        }
        for input in ins {
            if seen_ins.insert(input.clone()) {
                deps.ins.push(input);
            }
        }
    }
    Ok(deps)
}
