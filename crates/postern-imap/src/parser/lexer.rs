//! Byte-level reader for client command grammar.
//!
//! The lexer walks a single, fully framed command (literals included) and
//! exposes the primitive productions of RFC 3501 section 9: atoms, quoted
//! strings, literals, numbers and sequence sets. Failures carry the byte
//! position and, once it has been read, the command tag.

use super::ParseError;
use crate::types::{SequenceSet, Tag, is_tag_char};

/// Reader over one framed command.
pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
    tag: Option<Tag>,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given input.
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            tag: None,
        }
    }

    /// Returns the current position in the input.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Returns the tag read so far.
    #[must_use]
    pub const fn tag(&self) -> Option<&Tag> {
        self.tag.as_ref()
    }

    /// Returns true if at end of input.
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Peeks at the current byte without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    /// Peeks at the byte at offset from current position.
    #[must_use]
    pub fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    /// Advances by one byte and returns it.
    pub fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    /// Creates a parse error at the current position.
    #[must_use]
    pub fn error(&self, expected: &str) -> ParseError {
        ParseError {
            tag: self.tag.clone(),
            position: self.pos,
            expected: expected.to_string(),
        }
    }

    /// Consumes `byte` or fails with `expected`.
    pub fn expect(&mut self, byte: u8, expected: &str) -> Result<(), ParseError> {
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(expected))
        }
    }

    /// Consumes `byte` if it is next.
    pub fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Expects and consumes a space.
    pub fn expect_space(&mut self) -> Result<(), ParseError> {
        self.expect(b' ', "SP")
    }

    /// Expects and consumes the final CRLF of the command.
    pub fn expect_crlf(&mut self) -> Result<(), ParseError> {
        if self.peek() == Some(b'\r')
            && self.peek_at(1) == Some(b'\n')
            && self.pos + 2 == self.input.len()
        {
            self.pos += 2;
            Ok(())
        } else {
            Err(self.error("CRLF"))
        }
    }

    /// Returns true if only the terminating CRLF remains.
    #[must_use]
    pub fn at_crlf(&self) -> bool {
        self.peek() == Some(b'\r')
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> &'a [u8] {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
        &self.input[start..self.pos]
    }

    /// Reads the command tag and remembers it for later errors.
    pub fn read_tag(&mut self) -> Result<Tag, ParseError> {
        let raw = self.take_while(is_tag_char);
        let tag = std::str::from_utf8(raw)
            .ok()
            .and_then(Tag::new)
            .ok_or_else(|| self.error("tag"))?;
        self.tag = Some(tag.clone());
        Ok(tag)
    }

    /// Reads an atom.
    pub fn read_atom(&mut self) -> Result<&'a str, ParseError> {
        let raw = self.take_while(is_atom_char);
        if raw.is_empty() {
            return Err(self.error("atom"));
        }
        // atom chars are ASCII
        std::str::from_utf8(raw).map_err(|_| self.error("atom"))
    }

    /// Reads a keyword such as `BODY.PEEK` or `HEADER.FIELDS`, stopping
    /// before `[`, `<` and other punctuation.
    pub fn read_keyword(&mut self) -> Result<&'a str, ParseError> {
        let raw = self.take_while(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-');
        if raw.is_empty() {
            return Err(self.error("keyword"));
        }
        std::str::from_utf8(raw).map_err(|_| self.error("keyword"))
    }

    /// Reads a number.
    pub fn read_number(&mut self) -> Result<u32, ParseError> {
        let start = self.pos;
        let digits = self.take_while(|b| b.is_ascii_digit());
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ParseError {
                tag: self.tag.clone(),
                position: start,
                expected: "number".to_string(),
            })
    }

    /// Reads a quoted string, unescaping `\"` and `\\`.
    pub fn read_quoted(&mut self) -> Result<Vec<u8>, ParseError> {
        self.expect(b'"', "quoted string")?;
        let mut result = Vec::new();
        loop {
            match self.advance() {
                Some(b'"') => return Ok(result),
                Some(b'\\') => match self.advance() {
                    Some(c @ (b'"' | b'\\')) => result.push(c),
                    _ => return Err(self.error("quoted-special after backslash")),
                },
                Some(b'\r' | b'\n') | None => return Err(self.error("closing quote")),
                Some(c) => result.push(c),
            }
        }
    }

    /// Reads a literal `{n}CRLF` or `{n+}CRLF` followed by its data.
    pub fn read_literal(&mut self) -> Result<&'a [u8], ParseError> {
        self.expect(b'{', "literal")?;
        let size = self.read_number()?;
        self.eat(b'+');
        self.expect(b'}', "'}'")?;
        if !(self.eat(b'\r') && self.eat(b'\n')) {
            return Err(self.error("CRLF after literal size"));
        }
        let size = size as usize;
        let end = self.pos + size;
        if end > self.input.len() {
            return Err(self.error("literal data"));
        }
        let data = &self.input[self.pos..end];
        self.pos = end;
        Ok(data)
    }

    /// Reads a string (quoted or literal).
    pub fn read_string(&mut self) -> Result<Vec<u8>, ParseError> {
        match self.peek() {
            Some(b'"') => self.read_quoted(),
            Some(b'{') => self.read_literal().map(<[u8]>::to_vec),
            _ => Err(self.error("string")),
        }
    }

    /// Reads an astring (atom or string).
    pub fn read_astring(&mut self) -> Result<Vec<u8>, ParseError> {
        match self.peek() {
            Some(b'"' | b'{') => self.read_string(),
            _ => {
                let raw = self.take_while(is_astring_char);
                if raw.is_empty() {
                    Err(self.error("astring"))
                } else {
                    Ok(raw.to_vec())
                }
            }
        }
    }

    /// Reads an astring that must be valid UTF-8.
    pub fn read_astring_utf8(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        let raw = self.read_astring()?;
        String::from_utf8(raw).map_err(|_| ParseError {
            tag: self.tag.clone(),
            position: start,
            expected: "UTF-8 string".to_string(),
        })
    }

    /// Reads a LIST mailbox pattern, which may contain `%` and `*`.
    pub fn read_list_mailbox(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some(b'"' | b'{') => self.read_astring_utf8(),
            _ => {
                let raw = self.take_while(|b| is_astring_char(b) || b == b'%' || b == b'*');
                if raw.is_empty() {
                    return Err(self.error("list-mailbox"));
                }
                std::str::from_utf8(raw)
                    .map(str::to_string)
                    .map_err(|_| self.error("list-mailbox"))
            }
        }
    }

    /// Reads a sequence set such as `1:5,7,10:*`.
    pub fn read_sequence_set(&mut self) -> Result<SequenceSet, ParseError> {
        let start = self.pos;
        let raw = self.take_while(|b| b.is_ascii_digit() || matches!(b, b':' | b',' | b'*'));
        std::str::from_utf8(raw)
            .ok()
            .and_then(SequenceSet::parse)
            .ok_or_else(|| ParseError {
                tag: self.tag.clone(),
                position: start,
                expected: "sequence set".to_string(),
            })
    }

    /// Reads a flag: `\Name` or a keyword atom.
    pub fn read_flag(&mut self) -> Result<String, ParseError> {
        let backslash = self.eat(b'\\');
        let name = self.read_atom()?;
        Ok(if backslash {
            format!("\\{name}")
        } else {
            name.to_string()
        })
    }
}

/// Returns true if the byte is an ATOM-CHAR.
#[must_use]
pub const fn is_atom_char(b: u8) -> bool {
    matches!(b, 0x21..=0x7e)
        && !matches!(b, b'(' | b')' | b'{' | b'%' | b'*' | b'"' | b'\\' | b']')
}

/// Returns true if the byte is an ASTRING-CHAR (ATOM-CHAR or `]`).
#[must_use]
pub const fn is_astring_char(b: u8) -> bool {
    is_atom_char(b) || b == b']'
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn tag_is_remembered_in_errors() {
        let mut lexer = Lexer::new(b"a1 (");
        assert_eq!(lexer.read_tag().unwrap().as_str(), "a1");
        lexer.expect_space().unwrap();
        let err = lexer.read_atom().unwrap_err();
        assert_eq!(err.tag.unwrap().as_str(), "a1");
        assert_eq!(err.position, 3);
    }

    #[test]
    fn quoted_string_unescapes() {
        let mut lexer = Lexer::new(br#""a \"b\" \\c""#);
        assert_eq!(lexer.read_quoted().unwrap(), br#"a "b" \c"#);
        assert!(lexer.is_eof());
    }

    #[test]
    fn quoted_string_rejects_bad_escape() {
        let mut lexer = Lexer::new(br#""a\n""#);
        assert!(lexer.read_quoted().is_err());
    }

    #[test]
    fn literal_may_contain_crlf() {
        let mut lexer = Lexer::new(b"{7}\r\nab\r\ncd rest");
        assert_eq!(lexer.read_literal().unwrap(), b"ab\r\ncd ");
        assert_eq!(lexer.peek(), Some(b'r'));
    }

    #[test]
    fn non_synchronizing_literal() {
        let mut lexer = Lexer::new(b"{3+}\r\nabc");
        assert_eq!(lexer.read_astring().unwrap(), b"abc");
    }

    #[test]
    fn astring_allows_close_bracket() {
        let mut lexer = Lexer::new(b"foo]bar baz");
        assert_eq!(lexer.read_astring().unwrap(), b"foo]bar");
    }

    #[test]
    fn list_mailbox_allows_wildcards() {
        let mut lexer = Lexer::new(b"Archive/%/*\r\n");
        assert_eq!(lexer.read_list_mailbox().unwrap(), "Archive/%/*");
        assert!(lexer.at_crlf());
    }

    #[test]
    fn sequence_set_and_number() {
        let mut lexer = Lexer::new(b"1:5,9 42");
        assert_eq!(lexer.read_sequence_set().unwrap().to_string(), "1:5,9");
        lexer.expect_space().unwrap();
        assert_eq!(lexer.read_number().unwrap(), 42);
    }

    #[test]
    fn keyword_stops_at_bracket() {
        let mut lexer = Lexer::new(b"BODY.PEEK[HEADER]");
        assert_eq!(lexer.read_keyword().unwrap(), "BODY.PEEK");
        assert_eq!(lexer.peek(), Some(b'['));
    }

    #[test]
    fn flags() {
        let mut lexer = Lexer::new(b"\\Seen $Junk");
        assert_eq!(lexer.read_flag().unwrap(), "\\Seen");
        lexer.expect_space().unwrap();
        assert_eq!(lexer.read_flag().unwrap(), "$Junk");
    }

    #[test]
    fn crlf_must_end_input() {
        let mut lexer = Lexer::new(b"\r\nX");
        assert!(lexer.expect_crlf().is_err());
        let mut lexer = Lexer::new(b"\r\n");
        assert!(lexer.expect_crlf().is_ok());
    }
}
