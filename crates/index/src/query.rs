//! The event query language.
//!
//! Queries are conjunctions of conditions over event attributes:
//!
//! ```text
//! transfer.amount > 100 AND transfer.recipient = 'addr' AND block.height <= 50
//! ```
//!
//! A condition is `tag op operand` where the tag is a composite key
//! (`<event type>.<attribute key>`), the operators are `=`, `<`, `<=`,
//! `>`, `>=`, `CONTAINS`, and `EXISTS`, and operands are single-quoted
//! strings, decimal numbers, `DATE yyyy-mm-dd`, or `TIME` RFC 3339
//! literals.
//!
//! Numeric comparison is exact: values parse into big rationals, and a
//! trailing unit suffix is tolerated (`"8atom"` compares equal to `8`).

use basalt_types::Event;
use chrono::{DateTime, NaiveDate, Utc};
use num::bigint::BigInt;
use num::rational::BigRational;
use num::traits::Pow;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Leading `\d+(\.\d+)?` extraction, tolerating unit suffixes such as
/// `"8atom"` or `"6.5stake"`.
fn extract_num() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(\.\d+)?").expect("static regex compiles"))
}

/// Parse a decimal string into an exact rational, stripping a trailing
/// unit suffix. Returns `None` when no leading number exists.
pub fn parse_number(s: &str) -> Option<BigRational> {
    if let Ok(int) = BigInt::from_str(s) {
        return Some(BigRational::from_integer(int));
    }
    let m = extract_num().find(s)?;
    let text = m.as_str();
    match text.split_once('.') {
        None => BigInt::from_str(text).ok().map(BigRational::from_integer),
        Some((whole, frac)) => {
            let digits = BigInt::from_str(&format!("{whole}{frac}")).ok()?;
            let scale = BigInt::from(10u32).pow(frac.len() as u32);
            Some(BigRational::new(digits, scale))
        }
    }
}

/// Parse a `DATE` literal (`yyyy-mm-dd`, midnight UTC).
pub fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(DateTime::from_naive_utc_and_offset(
        date.and_hms_opt(0, 0, 0)?,
        Utc,
    ))
}

/// Parse a `TIME` literal (RFC 3339).
pub fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Lt,
    Leq,
    Gt,
    Geq,
    Contains,
    Exists,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Op::Eq => "=",
            Op::Lt => "<",
            Op::Leq => "<=",
            Op::Gt => ">",
            Op::Geq => ">=",
            Op::Contains => "CONTAINS",
            Op::Exists => "EXISTS",
        })
    }
}

/// A parsed operand. The literal text is kept alongside the parsed value
/// because equality scans match the stored attribute bytes verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    String(String),
    Number { raw: String, value: BigRational },
    Date { raw: String, value: DateTime<Utc> },
    Time { raw: String, value: DateTime<Utc> },
}

impl Operand {
    /// The literal text as it appeared in the query.
    pub fn literal(&self) -> &str {
        match self {
            Operand::String(s) => s,
            Operand::Number { raw, .. } => raw,
            Operand::Date { raw, .. } => raw,
            Operand::Time { raw, .. } => raw,
        }
    }

    pub fn as_number(&self) -> Option<&BigRational> {
        match self {
            Operand::Number { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// One compiled condition of a conjunction.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub tag: String,
    pub op: Op,
    pub operand: Option<Operand>,
}

impl Condition {
    /// Whether a single attribute value satisfies this condition.
    pub fn matches_value(&self, value: &str) -> bool {
        match (self.op, &self.operand) {
            (Op::Exists, _) => true,
            (Op::Contains, Some(Operand::String(needle))) => value.contains(needle),
            (Op::Eq, Some(Operand::String(want))) => value == want,
            (op, Some(Operand::Number { value: want, .. })) => match parse_number(value) {
                Some(got) => cmp_matches(op, got.cmp(want)),
                None => false,
            },
            (op, Some(Operand::Date { value: want, .. })) => match parse_date(value) {
                Some(got) => cmp_matches(op, got.cmp(want)),
                None => false,
            },
            (op, Some(Operand::Time { value: want, .. })) => match parse_time(value) {
                Some(got) => cmp_matches(op, got.cmp(want)),
                None => false,
            },
            _ => false,
        }
    }

    /// Attribute values of `event` addressed by this condition's tag,
    /// plus whether the tag names the event type itself.
    fn find_attrs<'a>(&self, event: &'a Event) -> (Vec<&'a str>, bool) {
        if !self.tag.starts_with(&event.kind) {
            return (Vec::new(), false);
        }
        if self.tag.len() == event.kind.len() {
            return (Vec::new(), true);
        }
        let values = event
            .attributes
            .iter()
            .filter(|attr| {
                self.tag.len() == event.kind.len() + 1 + attr.key.len()
                    && self.tag.as_bytes()[event.kind.len()] == b'.'
                    && self.tag[event.kind.len() + 1..] == attr.key
            })
            .map(|attr| attr.value.as_str())
            .collect();
        (values, false)
    }

    fn matches_event(&self, event: &Event) -> bool {
        let (values, tag_is_type) = self.find_attrs(event);
        if values.is_empty() {
            // A tag equal to the event type matches against the empty
            // string, so existence checks work for type-only queries.
            return tag_is_type && self.matches_value("");
        }
        values.iter().any(|v| self.matches_value(v))
    }

    pub(crate) fn matches_any(&self, events: &[Event]) -> bool {
        events.iter().any(|e| self.matches_event(e))
    }
}

fn cmp_matches(op: Op, ord: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match op {
        Op::Eq => ord == Equal,
        Op::Lt => ord == Less,
        Op::Leq => ord != Greater,
        Op::Gt => ord == Greater,
        Op::Geq => ord != Less,
        Op::Contains | Op::Exists => false,
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.op, &self.operand) {
            (Op::Exists, _) => write!(f, "{} EXISTS", self.tag),
            (op, Some(Operand::String(s))) => write!(f, "{} {} '{}'", self.tag, op, s),
            (op, Some(operand)) => write!(f, "{} {} {}", self.tag, op, operand.literal()),
            (op, None) => write!(f, "{} {}", self.tag, op),
        }
    }
}

/// A compiled conjunction of conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    conditions: Vec<Condition>,
    source: String,
}

impl Query {
    /// Parse and compile a query expression.
    pub fn parse(input: &str) -> Result<Query, QueryError> {
        let conditions = Parser::new(input).parse()?;
        Ok(Query {
            conditions,
            source: input.to_string(),
        })
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Whether every condition matches at least one of the events.
    /// An empty event list matches nothing.
    pub fn matches(&self, events: &[Event]) -> bool {
        if events.is_empty() {
            return false;
        }
        self.conditions.iter().all(|c| c.matches_any(events))
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for Query {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Query::parse(s)
    }
}

/// Query parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("empty query")]
    Empty,

    #[error("unexpected character {found:?} at offset {offset}")]
    UnexpectedChar { found: char, offset: usize },

    #[error("unterminated string literal at offset {offset}")]
    UnterminatedString { offset: usize },

    #[error("expected {expected} at offset {offset}")]
    Expected {
        expected: &'static str,
        offset: usize,
    },

    #[error("invalid {what} literal {text:?}")]
    InvalidLiteral { what: &'static str, text: String },

    #[error("operator {op} cannot take a {operand} operand")]
    InvalidCombination { op: Op, operand: &'static str },
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Parser { input, pos: 0 }
    }

    fn parse(mut self) -> Result<Vec<Condition>, QueryError> {
        let mut conditions = Vec::new();
        self.skip_ws();
        if self.rest().is_empty() {
            return Err(QueryError::Empty);
        }
        loop {
            conditions.push(self.condition()?);
            self.skip_ws();
            if self.rest().is_empty() {
                return Ok(conditions);
            }
            self.keyword("AND")?;
        }
    }

    fn rest(&self) -> &str {
        &self.input[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn keyword(&mut self, word: &'static str) -> Result<(), QueryError> {
        self.skip_ws();
        if let Some(rest) = self.rest().strip_prefix(word) {
            // Keywords must end at a word boundary.
            if rest.chars().next().map_or(true, |c| !c.is_alphanumeric()) {
                self.pos += word.len();
                return Ok(());
            }
        }
        Err(QueryError::Expected {
            expected: word,
            offset: self.pos,
        })
    }

    fn condition(&mut self) -> Result<Condition, QueryError> {
        let tag = self.tag()?;
        self.skip_ws();
        let op = self.op()?;
        let operand = match op {
            Op::Exists => None,
            Op::Contains => {
                self.skip_ws();
                match self.operand()? {
                    Operand::String(s) => Some(Operand::String(s)),
                    _ => {
                        return Err(QueryError::InvalidCombination {
                            op,
                            operand: "non-string",
                        })
                    }
                }
            }
            _ => {
                self.skip_ws();
                Some(self.operand()?)
            }
        };
        Ok(Condition { tag, op, operand })
    }

    fn tag(&mut self) -> Result<String, QueryError> {
        self.skip_ws();
        let start = self.pos;
        let bytes = self.rest().as_bytes();
        let mut len = 0;
        while len < bytes.len() {
            let b = bytes[len];
            let ok = if len == 0 {
                b.is_ascii_alphanumeric() || b == b'_'
            } else {
                b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-' | b'/')
            };
            if !ok {
                break;
            }
            len += 1;
        }
        if len == 0 {
            return Err(QueryError::Expected {
                expected: "tag",
                offset: start,
            });
        }
        self.pos += len;
        Ok(self.input[start..start + len].to_string())
    }

    fn op(&mut self) -> Result<Op, QueryError> {
        let rest = self.rest();
        for (text, op) in [
            ("<=", Op::Leq),
            (">=", Op::Geq),
            ("<", Op::Lt),
            (">", Op::Gt),
            ("=", Op::Eq),
        ] {
            if rest.starts_with(text) {
                self.pos += text.len();
                return Ok(op);
            }
        }
        if self.keyword("CONTAINS").is_ok() {
            return Ok(Op::Contains);
        }
        if self.keyword("EXISTS").is_ok() {
            return Ok(Op::Exists);
        }
        Err(QueryError::Expected {
            expected: "operator",
            offset: self.pos,
        })
    }

    fn operand(&mut self) -> Result<Operand, QueryError> {
        self.skip_ws();
        if self.rest().starts_with('\'') {
            return self.string_literal();
        }
        if self.keyword("DATE").is_ok() {
            self.skip_ws();
            let raw = self.bare_word();
            let value = parse_date(&raw).ok_or_else(|| QueryError::InvalidLiteral {
                what: "date",
                text: raw.clone(),
            })?;
            return Ok(Operand::Date { raw, value });
        }
        if self.keyword("TIME").is_ok() {
            self.skip_ws();
            let raw = self.bare_word();
            let value = parse_time(&raw).ok_or_else(|| QueryError::InvalidLiteral {
                what: "time",
                text: raw.clone(),
            })?;
            return Ok(Operand::Time { raw, value });
        }
        if self.rest().starts_with(|c: char| c.is_ascii_digit()) {
            let raw = self.number_literal()?;
            let value = parse_number(&raw).ok_or_else(|| QueryError::InvalidLiteral {
                what: "number",
                text: raw.clone(),
            })?;
            return Ok(Operand::Number { raw, value });
        }
        Err(QueryError::Expected {
            expected: "operand",
            offset: self.pos,
        })
    }

    fn string_literal(&mut self) -> Result<Operand, QueryError> {
        let start = self.pos;
        debug_assert!(self.rest().starts_with('\''));
        self.pos += 1;
        match self.rest().find('\'') {
            Some(end) => {
                let value = self.rest()[..end].to_string();
                self.pos += end + 1;
                Ok(Operand::String(value))
            }
            None => Err(QueryError::UnterminatedString { offset: start }),
        }
    }

    fn number_literal(&mut self) -> Result<String, QueryError> {
        let bytes = self.rest().as_bytes();
        let mut len = 0;
        let mut seen_dot = false;
        while len < bytes.len() {
            let b = bytes[len];
            if b.is_ascii_digit() {
                len += 1;
            } else if b == b'.' && !seen_dot && len > 0 {
                seen_dot = true;
                len += 1;
            } else {
                break;
            }
        }
        let text = &self.rest()[..len];
        if text.is_empty() || text.ends_with('.') {
            return Err(QueryError::InvalidLiteral {
                what: "number",
                text: text.to_string(),
            });
        }
        let raw = text.to_string();
        self.pos += len;
        Ok(raw)
    }

    fn bare_word(&mut self) -> String {
        let start = self.pos;
        let len = self
            .rest()
            .find(char::is_whitespace)
            .unwrap_or(self.rest().len());
        self.pos += len;
        self.input[start..start + len].to_string()
    }
}
