//! Line-oriented `key=value` wire codec (spec.md §4.1).
//!
//! A document is a sequence of paragraphs separated by exactly one blank
//! line. A paragraph is a sequence of lines `key=v1[ v2 v3 …]\n`. Every
//! wire type in this crate parses and emits itself as one paragraph (or,
//! for `get-leaves`, a sequence of them) through [`Parser`]/[`Emitter`].

use sigsum_crypto::{Hash, HashError, PublicKey, PublicKeyError, Signature, SignatureParseError};
use thiserror::Error;

/// Errors returned while parsing an ASCII document.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// A line's key did not match what the parser expected next.
    #[error("expected key {expected:?}, found {found:?}")]
    UnexpectedKey {
        /// The key the caller asked for.
        expected: String,
        /// The key actually present on the line.
        found: String,
    },
    /// A value did not parse as the requested type.
    #[error("malformed value for key {key:?}: {reason}")]
    MalformedValue {
        /// The key whose value failed to parse.
        key: String,
        /// A human-readable description of the failure.
        reason: String,
    },
    /// A line had the wrong number of space-separated values.
    #[error("key {key:?} expected {expected} values, found {found}")]
    WrongValueCount {
        /// The key whose line had the wrong arity.
        key: String,
        /// The number of values expected.
        expected: usize,
        /// The number of values actually present.
        found: usize,
    },
    /// Input ended where more data was expected.
    #[error("truncated input: expected another line")]
    TruncatedInput,
    /// Trailing bytes remained after a caller-expected end of input.
    #[error("trailing garbage after expected end of input")]
    TrailingGarbage,
    /// A blank line (paragraph boundary) appeared where a key=value line
    /// was expected, or was missing where one was expected.
    #[error("unexpected paragraph boundary")]
    UnexpectedParagraphBoundary,
}

/// A cursor over the lines of one ASCII paragraph.
///
/// Constructed with [`Parser::new`] over a whole document; [`Parser::next_paragraph`]
/// advances past the following blank-line separator (if any) and resets the
/// cursor to the next paragraph's lines.
pub struct Parser<'a> {
    lines: std::str::Lines<'a>,
    /// Buffered line read by a lookahead operation (`next_paragraph`/`get_eof`)
    /// that must be replayed to the next `get_*` call.
    peeked: Option<Option<&'a str>>,
}

impl<'a> Parser<'a> {
    /// Creates a parser over the lines of `input`.
    pub fn new(input: &'a str) -> Self {
        Parser {
            lines: input.lines(),
            peeked: None,
        }
    }

    fn next_line(&mut self) -> Option<&'a str> {
        match self.peeked.take() {
            Some(line) => line,
            None => self.lines.next(),
        }
    }

    fn peek_line(&mut self) -> Option<&'a str> {
        if self.peeked.is_none() {
            self.peeked = Some(self.lines.next());
        }
        self.peeked.unwrap()
    }

    fn take_line(&mut self, key: &str) -> Result<&'a str, ParseError> {
        let line = self.next_line().ok_or(ParseError::TruncatedInput)?;
        if line.is_empty() {
            return Err(ParseError::UnexpectedParagraphBoundary);
        }
        let (found_key, rest) = line.split_once('=').unwrap_or((line, ""));
        if found_key != key {
            return Err(ParseError::UnexpectedKey {
                expected: key.to_owned(),
                found: found_key.to_owned(),
            });
        }
        Ok(rest)
    }

    /// Reads `key=<unsigned decimal>`.
    pub fn get_int(&mut self, key: &str) -> Result<u64, ParseError> {
        let value = self.take_line(key)?;
        value.parse::<u64>().map_err(|e| ParseError::MalformedValue {
            key: key.to_owned(),
            reason: e.to_string(),
        })
    }

    /// Reads `key=<lowercase hex hash>`.
    pub fn get_hash(&mut self, key: &str) -> Result<Hash, ParseError> {
        let value = self.take_line(key)?;
        Hash::from_hex(value).map_err(|e: HashError| ParseError::MalformedValue {
            key: key.to_owned(),
            reason: e.to_string(),
        })
    }

    /// Reads `key=<lowercase hex public key>`.
    pub fn get_public_key(&mut self, key: &str) -> Result<PublicKey, ParseError> {
        let value = self.take_line(key)?;
        PublicKey::from_hex(value).map_err(|e: PublicKeyError| ParseError::MalformedValue {
            key: key.to_owned(),
            reason: e.to_string(),
        })
    }

    /// Reads `key=<lowercase hex signature>`.
    pub fn get_signature(&mut self, key: &str) -> Result<Signature, ParseError> {
        let value = self.take_line(key)?;
        Signature::from_hex(value).map_err(|e: SignatureParseError| ParseError::MalformedValue {
            key: key.to_owned(),
            reason: e.to_string(),
        })
    }

    /// Reads `key=v1 v2 … vn`, requiring exactly `n` space-separated values.
    pub fn get_values(&mut self, key: &str, n: usize) -> Result<Vec<String>, ParseError> {
        let value = self.take_line(key)?;
        let values: Vec<String> = if value.is_empty() {
            Vec::new()
        } else {
            value.split(' ').map(str::to_owned).collect()
        };
        if values.len() != n {
            return Err(ParseError::WrongValueCount {
                key: key.to_owned(),
                expected: n,
                found: values.len(),
            });
        }
        Ok(values)
    }

    /// Reads `key=h1 h2 … hn`, a space-separated list of hashes whose
    /// length is not known in advance (an empty value yields an empty
    /// list).
    pub fn get_hash_list(&mut self, key: &str) -> Result<Vec<Hash>, ParseError> {
        let value = self.take_line(key)?;
        if value.is_empty() {
            return Ok(Vec::new());
        }
        value
            .split(' ')
            .map(|s| {
                Hash::from_hex(s).map_err(|e| ParseError::MalformedValue {
                    key: key.to_owned(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    /// Returns `true` and consumes nothing further if the parser is at the
    /// very end of input (no more lines, not even a blank one).
    pub fn at_eof(&mut self) -> bool {
        self.peek_line().is_none()
    }

    /// Returns `true` if the parser is at the end of input or sitting on
    /// the blank line that separates this paragraph from the next, without
    /// consuming it. Used by types whose paragraph ends with a
    /// variable-length run of repeated lines (e.g. cosignatures).
    pub fn at_paragraph_boundary(&mut self) -> bool {
        matches!(self.peek_line(), None | Some(""))
    }

    /// Asserts that no further data remains.
    pub fn get_eof(&mut self) -> Result<(), ParseError> {
        if self.at_eof() {
            Ok(())
        } else {
            Err(ParseError::TrailingGarbage)
        }
    }

    /// Consumes the single blank line separating this paragraph from the
    /// next, positioning the parser at the start of the next paragraph.
    /// Returns `Ok(false)` (consuming nothing) if the parser is already at
    /// the end of input.
    pub fn next_paragraph(&mut self) -> Result<bool, ParseError> {
        if self.at_eof() {
            return Ok(false);
        }
        let line = self.next_line().ok_or(ParseError::TruncatedInput)?;
        if !line.is_empty() {
            return Err(ParseError::UnexpectedParagraphBoundary);
        }
        Ok(true)
    }
}

/// Accumulates `key=value` lines for one document.
#[derive(Default)]
pub struct Emitter {
    buf: String,
}

impl Emitter {
    /// Creates an empty emitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `key=<decimal>`.
    pub fn put_int(&mut self, key: &str, value: u64) {
        self.buf.push_str(key);
        self.buf.push('=');
        self.buf.push_str(&value.to_string());
        self.buf.push('\n');
    }

    /// Writes `key=<lowercase hex>` for any value with a `to_hex`/`Display`
    /// hex representation.
    pub fn put_hex(&mut self, key: &str, value: impl std::fmt::Display) {
        self.buf.push_str(key);
        self.buf.push('=');
        self.buf.push_str(&value.to_string());
        self.buf.push('\n');
    }

    /// Writes `key=v1 v2 … vn`.
    pub fn put_values(&mut self, key: &str, values: &[&str]) {
        self.buf.push_str(key);
        self.buf.push('=');
        self.buf.push_str(&values.join(" "));
        self.buf.push('\n');
    }

    /// Writes `key=h1 h2 … hn` for a list of hashes.
    pub fn put_hash_list(&mut self, key: &str, values: &[Hash]) {
        self.buf.push_str(key);
        self.buf.push('=');
        let rendered: Vec<String> = values.iter().map(Hash::to_hex).collect();
        self.buf.push_str(&rendered.join(" "));
        self.buf.push('\n');
    }

    /// Inserts the blank line that separates two paragraphs.
    pub fn paragraph_break(&mut self) {
        self.buf.push('\n');
    }

    /// Appends an already-rendered sub-document verbatim, for composite
    /// types that embed another type's paragraph.
    pub fn put_raw(&mut self, rendered: &str) {
        self.buf.push_str(rendered);
    }

    /// Consumes the emitter, returning the finished document.
    pub fn finish(self) -> String {
        self.buf
    }
}
