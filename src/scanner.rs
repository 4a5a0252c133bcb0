//! Scans an input buffer (depfile, dyndep file) character by character.
//!
//! Reading past the end yields '\0', so parsers can treat end of input like
//! any other terminator.

#[derive(Debug)]
pub struct ParseError {
    msg: String,
    ofs: usize,
}
pub type ParseResult<T> = Result<T, ParseError>;

impl ParseError {
    pub fn msg(&self) -> &str {
        &self.msg
    }
}

pub struct Scanner<'a> {
    buf: &'a [u8],
    pub ofs: usize,
    pub line: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Scanner {
            buf,
            ofs: 0,
            line: 1,
        }
    }

    pub fn slice(&self, start: usize, end: usize) -> &'a [u8] {
        &self.buf[start..end]
    }

    pub fn at_end(&self) -> bool {
        self.ofs >= self.buf.len()
    }

    /// The next byte as a char, or '\0' at end of input.  Bytes of
    /// multi-byte UTF-8 sequences come through one at a time; `c as u8`
    /// recovers them.
    pub fn peek(&self) -> char {
        match self.buf.get(self.ofs) {
            Some(&c) => c as char,
            None => '\0',
        }
    }

    pub fn peek_at(&self, n: usize) -> char {
        match self.buf.get(self.ofs + n) {
            Some(&c) => c as char,
            None => '\0',
        }
    }

    pub fn peek_newline(&self) -> bool {
        self.peek() == '\n' || (self.peek() == '\r' && self.peek_at(1) == '\n')
    }

    pub fn next(&mut self) {
        if self.at_end() {
            return;
        }
        if self.peek() == '\n' {
            self.line += 1;
        }
        self.ofs += 1;
    }

    pub fn back(&mut self) {
        if self.ofs == 0 {
            return;
        }
        self.ofs -= 1;
        if self.peek() == '\n' {
            self.line -= 1;
        }
    }

    pub fn read(&mut self) -> char {
        let c = self.peek();
        self.next();
        c
    }

    pub fn skip(&mut self, ch: char) -> bool {
        if !self.at_end() && self.peek() == ch {
            self.next();
            return true;
        }
        false
    }

    pub fn skip_spaces(&mut self) {
        while self.skip(' ') {}
    }

    /// Consume a "\n" or "\r\n", returning whether there was one.
    pub fn skip_newline(&mut self) -> bool {
        if self.peek() == '\r' && self.peek_at(1) == '\n' {
            self.next();
        }
        self.skip('\n')
    }

    pub fn expect(&mut self, ch: char) -> ParseResult<()> {
        if self.at_end() {
            return self.parse_error(format!("expected {:?}, got end of file", ch));
        }
        let r = self.read();
        if r != ch {
            self.back();
            return self.parse_error(format!("expected {:?}, got {:?}", ch, r));
        }
        Ok(())
    }

    pub fn parse_error<T, S: Into<String>>(&self, msg: S) -> ParseResult<T> {
        Err(ParseError {
            msg: msg.into(),
            ofs: self.ofs,
        })
    }

    /// Render an error as `filename:line: msg` followed by the offending
    /// line and a caret under the error position.
    pub fn format_parse_error(&self, filename: &str, err: ParseError) -> String {
        let mut ofs = 0;
        for (line_number, line) in self.buf.split(|&c| c == b'\n').enumerate() {
            if ofs + line.len() >= err.ofs {
                let mut msg = format!("{}:{}: {}\n", filename, line_number + 1, err.msg);

                let line = String::from_utf8_lossy(line);
                let mut context: &str = line.trim_end_matches('\r');
                let mut col = err.ofs - ofs;
                if col > 40 && context.is_char_boundary(col - 20) {
                    // Trim beginning of line to fit it on screen.
                    msg.push_str("...");
                    context = &context[col - 20..];
                    col = 3 + 20;
                }
                if context.len() > 40 && context.is_char_boundary(40) {
                    msg.push_str(&context[..40]);
                    msg.push_str("...");
                } else {
                    msg.push_str(context);
                }
                msg.push('\n');
                msg.push_str(&" ".repeat(col));
                msg.push('^');
                return msg;
            }
            ofs += line.len() + 1;
        }
        format!("{}: {}", filename, err.msg)
    }
}
