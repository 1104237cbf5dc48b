//! Capability descriptors and the predicates used to match them.
//!
//! A [`Caps`] describes the format of data on a port: a media kind such as
//! `video/x-raw` or `application/x-rtp`, an optional encoding name, and a set
//! of structured parameters (resolution, framerate, payload type, ...).
//!
//! Two descriptors are *compatible* when their kinds are equal and they agree
//! on everything both of them declare. Parameters only one side mentions are
//! left open; downstream converter stages normalize them.
//!
//! Descriptors use the conventional caps string syntax:
//!
//! ```text
//! application/x-rtp,media=video,encoding-name=H264,payload=96
//! video/x-raw,width=320,height=240,framerate=(fraction)20/1
//! ```

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use winnow::Parser;
use winnow::ascii::{digit1, multispace0};
use winnow::combinator::{alt, delimited, opt, repeat};
use winnow::error::ContextError;
use winnow::token::{take_till, take_while};

type WResult<T> = std::result::Result<T, ContextError>;

/// Field name that maps onto [`Caps::encoding_name`].
const ENCODING_NAME_FIELD: &str = "encoding-name";

/// A scalar parameter value inside a [`Caps`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CapsValue {
    /// Integer value.
    Int(i64),
    /// Fraction, e.g. a framerate of `20/1`.
    Fraction(i32, i32),
    /// Boolean value.
    Bool(bool),
    /// String value.
    Str(String),
}

impl CapsValue {
    /// Get as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CapsValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CapsValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get as a fraction.
    pub fn as_fraction(&self) -> Option<(i32, i32)> {
        match self {
            CapsValue::Fraction(n, d) => Some((*n, *d)),
            _ => None,
        }
    }
}

impl From<i64> for CapsValue {
    fn from(v: i64) -> Self {
        CapsValue::Int(v)
    }
}

impl From<i32> for CapsValue {
    fn from(v: i32) -> Self {
        CapsValue::Int(v.into())
    }
}

impl From<u32> for CapsValue {
    fn from(v: u32) -> Self {
        CapsValue::Int(v.into())
    }
}

impl From<bool> for CapsValue {
    fn from(v: bool) -> Self {
        CapsValue::Bool(v)
    }
}

impl From<&str> for CapsValue {
    fn from(v: &str) -> Self {
        CapsValue::Str(v.to_string())
    }
}

impl From<String> for CapsValue {
    fn from(v: String) -> Self {
        CapsValue::Str(v)
    }
}

impl fmt::Display for CapsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapsValue::Int(i) => write!(f, "{i}"),
            CapsValue::Fraction(n, d) => write!(f, "{n}/{d}"),
            CapsValue::Bool(b) => write!(f, "{b}"),
            CapsValue::Str(s) => {
                let ambiguous = s.parse::<i64>().is_ok()
                    || s == "true"
                    || s == "false"
                    || s.contains('/');
                let needs_quotes = s.is_empty()
                    || s.chars().any(|c| c.is_whitespace() || c == ',' || c == '=');
                match (ambiguous, needs_quotes) {
                    (_, true) => write!(f, "(string)\"{s}\""),
                    (true, false) => write!(f, "(string){s}"),
                    (false, false) => write!(f, "{s}"),
                }
            }
        }
    }
}

/// Capability descriptor for the data on a port.
///
/// Immutable once built: the builder methods consume and return `self`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caps {
    media_kind: String,
    encoding_name: Option<String>,
    params: BTreeMap<String, CapsValue>,
}

/// Long-form alias matching the data model's name.
pub type CapabilityDescriptor = Caps;

impl Caps {
    /// Create a descriptor with only a media kind.
    pub fn new(media_kind: impl Into<String>) -> Self {
        Self {
            media_kind: media_kind.into(),
            encoding_name: None,
            params: BTreeMap::new(),
        }
    }

    /// Set the encoding name.
    pub fn with_encoding(mut self, name: impl Into<String>) -> Self {
        self.encoding_name = Some(name.into());
        self
    }

    /// Add or replace a structured parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<CapsValue>) -> Self {
        let key = key.into();
        let value = value.into();
        if key == ENCODING_NAME_FIELD {
            if let CapsValue::Str(name) = value {
                self.encoding_name = Some(name);
                return self;
            }
        }
        self.params.insert(key, value);
        self
    }

    /// Media kind, e.g. `video/x-raw`.
    pub fn media_kind(&self) -> &str {
        &self.media_kind
    }

    /// Encoding name, e.g. `H264`.
    pub fn encoding_name(&self) -> Option<&str> {
        self.encoding_name.as_deref()
    }

    /// Look up a structured parameter.
    pub fn param(&self, key: &str) -> Option<&CapsValue> {
        self.params.get(key)
    }

    /// Iterate over structured parameters in key order.
    pub fn params(&self) -> impl Iterator<Item = (&str, &CapsValue)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether the media kind starts with `prefix`.
    pub fn has_kind_prefix(&self, prefix: &str) -> bool {
        self.media_kind.starts_with(prefix)
    }

    /// Check compatibility with another descriptor.
    ///
    /// Kinds must match exactly. Encoding names are compared
    /// case-insensitively when both are present. Parameters are compared
    /// only for keys present on both sides.
    pub fn is_compatible(&self, other: &Caps) -> bool {
        if self.media_kind != other.media_kind {
            return false;
        }
        if let (Some(a), Some(b)) = (&self.encoding_name, &other.encoding_name) {
            if !a.eq_ignore_ascii_case(b) {
                return false;
            }
        }
        self.params
            .iter()
            .all(|(key, value)| other.params.get(key).is_none_or(|o| o == value))
    }

    /// Intersect two descriptors.
    ///
    /// Returns `None` if they are incompatible, otherwise a descriptor
    /// carrying everything either side declares.
    pub fn intersect(&self, other: &Caps) -> Option<Caps> {
        if !self.is_compatible(other) {
            return None;
        }
        let mut merged = self.clone();
        if merged.encoding_name.is_none() {
            merged.encoding_name = other.encoding_name.clone();
        }
        for (key, value) in &other.params {
            merged
                .params
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        Some(merged)
    }

    /// Parse a caps string.
    pub fn parse(input: &str) -> Result<Self> {
        caps_string.parse(input.trim()).map_err(|e| Error::Caps {
            input: input.to_string(),
            reason: e.to_string(),
        })
    }
}

impl FromStr for Caps {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Caps::parse(s)
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.media_kind)?;
        if let Some(encoding) = &self.encoding_name {
            write!(f, ",{ENCODING_NAME_FIELD}={encoding}")?;
        }
        for (key, value) in &self.params {
            write!(f, ",{key}={value}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Accept predicates
// ============================================================================

/// Predicate deciding whether an announced port's caps are wanted.
///
/// Deferred links use these instead of full equality: a receiver that wants
/// "any raw video" does not care about resolution at link time.
#[derive(Clone)]
pub enum CapsFilter {
    /// Accept everything.
    Any,
    /// Accept kinds starting with the prefix (`video/` or `video/x-raw`).
    KindPrefix(String),
    /// Accept exactly this kind.
    Kind(String),
    /// Accept caps compatible with this descriptor.
    Compatible(Caps),
    /// Caller-supplied predicate.
    Custom(Arc<dyn Fn(&Caps) -> bool + Send + Sync>),
}

impl CapsFilter {
    /// Kind-prefix predicate.
    pub fn kind_prefix(prefix: impl Into<String>) -> Self {
        Self::KindPrefix(prefix.into())
    }

    /// Predicate from a closure.
    pub fn custom(f: impl Fn(&Caps) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Evaluate the predicate.
    pub fn accepts(&self, caps: &Caps) -> bool {
        match self {
            CapsFilter::Any => true,
            CapsFilter::KindPrefix(prefix) => caps.has_kind_prefix(prefix),
            CapsFilter::Kind(kind) => caps.media_kind() == kind,
            CapsFilter::Compatible(wanted) => wanted.is_compatible(caps),
            CapsFilter::Custom(f) => f(caps),
        }
    }
}

impl fmt::Debug for CapsFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapsFilter::Any => write!(f, "Any"),
            CapsFilter::KindPrefix(p) => write!(f, "KindPrefix({p:?})"),
            CapsFilter::Kind(k) => write!(f, "Kind({k:?})"),
            CapsFilter::Compatible(c) => write!(f, "Compatible({c})"),
            CapsFilter::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

// ============================================================================
// Caps string parser
// ============================================================================

fn caps_string(input: &mut &str) -> WResult<Caps> {
    let kind: &str = media_kind.parse_next(input)?;
    let fields: Vec<(String, CapsValue)> = repeat(0.., field).parse_next(input)?;

    multispace0.parse_next(input)?;
    if !input.is_empty() {
        return Err(ContextError::new());
    }

    Ok(fields
        .into_iter()
        .fold(Caps::new(kind), |caps, (key, value)| caps.with_param(key, value)))
}

fn media_kind<'a>(input: &mut &'a str) -> WResult<&'a str> {
    take_while(1.., |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | '+')
    })
    .parse_next(input)
}

fn field(input: &mut &str) -> WResult<(String, CapsValue)> {
    let _ = (multispace0, ',', multispace0).parse_next(input)?;
    let key: &str = take_while(1.., |c: char| {
        c.is_ascii_alphanumeric() || c == '-' || c == '_'
    })
    .parse_next(input)?;
    let _ = (multispace0, '=', multispace0).parse_next(input)?;

    let hint: Option<&str> =
        opt(delimited('(', take_while(1.., |c: char| c.is_ascii_alphabetic()), ')'))
            .parse_next(input)?;

    let value = match hint {
        Some("string") | Some("gchararray") => string_value.map(CapsValue::Str).parse_next(input)?,
        _ => caps_value.parse_next(input)?,
    };

    Ok((key.to_string(), value))
}

fn caps_value(input: &mut &str) -> WResult<CapsValue> {
    alt((
        quoted.map(CapsValue::Str),
        fraction.map(|(n, d)| CapsValue::Fraction(n, d)),
        integer.map(CapsValue::Int),
        boolean.map(CapsValue::Bool),
        bare.map(CapsValue::Str),
    ))
    .parse_next(input)
}

fn string_value(input: &mut &str) -> WResult<String> {
    alt((quoted, bare)).parse_next(input)
}

fn quoted(input: &mut &str) -> WResult<String> {
    delimited('"', take_till(0.., '"'), '"')
        .map(|s: &str| s.to_string())
        .parse_next(input)
}

/// A value must end at a field separator or at the end of input.
fn at_value_end(input: &str) -> bool {
    input.is_empty() || input.starts_with(',') || input.starts_with(char::is_whitespace)
}

fn fraction(input: &mut &str) -> WResult<(i32, i32)> {
    let negative = opt('-').parse_next(input)?;
    let num: &str = digit1.parse_next(input)?;
    let _ = '/'.parse_next(input)?;
    let den: &str = digit1.parse_next(input)?;
    if !at_value_end(input) {
        return Err(ContextError::new());
    }

    let num: i32 = num.parse().map_err(|_| ContextError::new())?;
    let den: i32 = den.parse().map_err(|_| ContextError::new())?;
    Ok((if negative.is_some() { -num } else { num }, den))
}

fn integer(input: &mut &str) -> WResult<i64> {
    let negative = opt('-').parse_next(input)?;
    let digits: &str = digit1.parse_next(input)?;
    if !at_value_end(input) {
        return Err(ContextError::new());
    }

    let value: i64 = digits.parse().map_err(|_| ContextError::new())?;
    Ok(if negative.is_some() { -value } else { value })
}

fn boolean(input: &mut &str) -> WResult<bool> {
    let value = alt(("true".map(|_| true), "false".map(|_| false))).parse_next(input)?;
    if !at_value_end(input) {
        return Err(ContextError::new());
    }
    Ok(value)
}

fn bare(input: &mut &str) -> WResult<String> {
    take_while(1.., |c: char| c != ',')
        .map(|s: &str| s.trim_end().to_string())
        .parse_next(input)
}
