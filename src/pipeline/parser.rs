//! Launch description parser using winnow.
//!
//! Parses gst-launch style descriptions:
//!
//! ```text
//! videotestsrc pattern=1 ! video/x-raw,framerate=20/1 ! videoconvert ! fakesink
//! udpsrc port=5004 caps="application/x-rtp,media=video,encoding-name=H264,payload=96" ! fakesink
//! ```
//!
//! # Syntax
//!
//! - Segments are separated by `!`
//! - A segment is either a stage type followed by `key=value` properties,
//!   or a bare caps string (its first token contains `/`)
//! - Values can be quoted strings, numbers, booleans, or bare words
//! - Whitespace is optional around `!` and `=`

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use winnow::Parser;
use winnow::ascii::{alpha1, digit1, multispace0};
use winnow::combinator::{alt, delimited, opt, repeat, separated};
use winnow::error::ContextError;
use winnow::token::{take_till, take_while};

type WResult<T> = std::result::Result<T, ContextError>;

/// A parsed stage segment with its type name and properties.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedElement {
    /// The stage type name (e.g. "udpsrc").
    pub name: String,
    /// Properties in the order written.
    pub properties: Vec<(String, PropertyValue)>,
}

/// One `!`-separated segment of a launch description.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedSegment {
    /// A stage to create.
    Stage(ParsedElement),
    /// A bare caps string, which becomes a `capsfilter`.
    Caps(String),
}

/// A parsed launch description.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPipeline {
    /// Segments in order from source to sink.
    pub segments: Vec<ParsedSegment>,
}

/// A configuration value for a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// A string value (quoted or unquoted).
    String(String),
    /// An integer value.
    Integer(i64),
    /// A floating-point value.
    Float(f64),
    /// A boolean value.
    Bool(bool),
}

impl PropertyValue {
    /// Get as a string, converting if necessary.
    pub fn as_string(&self) -> String {
        match self {
            PropertyValue::String(s) => s.clone(),
            PropertyValue::Integer(i) => i.to_string(),
            PropertyValue::Float(f) => f.to_string(),
            PropertyValue::Bool(b) => b.to_string(),
        }
    }

    /// Try to get as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            PropertyValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get as a u64.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().and_then(|i| u64::try_from(i).ok())
    }

    /// Try to get as a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            PropertyValue::Integer(i) => Some(*i as f64),
            PropertyValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            PropertyValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            PropertyValue::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::String(_) => "string",
            PropertyValue::Integer(_) => "integer",
            PropertyValue::Float(_) => "float",
            PropertyValue::Bool(_) => "boolean",
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => write!(f, "{s:?}"),
            PropertyValue::Integer(i) => write!(f, "{i}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Integer(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Integer(v.into())
    }
}

impl From<u16> for PropertyValue {
    fn from(v: u16) -> Self {
        PropertyValue::Integer(v.into())
    }
}

impl From<u32> for PropertyValue {
    fn from(v: u32) -> Self {
        PropertyValue::Integer(v.into())
    }
}

impl From<u64> for PropertyValue {
    /// Values beyond `i64::MAX` saturate.
    fn from(v: u64) -> Self {
        PropertyValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

/// Configuration map of a stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    values: HashMap<String, PropertyValue>,
}

impl Properties {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Look up a value.
    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.values.get(key)
    }

    /// Remove a value.
    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.values.remove(key)
    }

    /// Iterate over entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, PropertyValue)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, PropertyValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// Parse a launch description.
///
/// # Example
///
/// ```rust
/// use rtpcast::pipeline::parser::{parse_pipeline, ParsedSegment};
///
/// let parsed = parse_pipeline("videotestsrc num-buffers=10 ! video/x-raw ! fakesink").unwrap();
/// assert_eq!(parsed.segments.len(), 3);
/// assert!(matches!(parsed.segments[1], ParsedSegment::Caps(_)));
/// ```
pub fn parse_pipeline(input: &str) -> Result<ParsedPipeline> {
    pipeline
        .parse(input.trim())
        .map_err(|e| Error::Parse(e.to_string()))
}

fn pipeline(input: &mut &str) -> WResult<ParsedPipeline> {
    let segments = separated(1.., segment, link_separator).parse_next(input)?;

    multispace0.parse_next(input)?;
    if !input.is_empty() {
        return Err(ContextError::new());
    }

    Ok(ParsedPipeline { segments })
}

fn segment(input: &mut &str) -> WResult<ParsedSegment> {
    let _ = multispace0.parse_next(input)?;
    alt((
        caps_segment.map(ParsedSegment::Caps),
        element.map(ParsedSegment::Stage),
    ))
    .parse_next(input)
}

/// A caps segment starts with `type/subtype` and runs to the next `!`.
fn caps_segment(input: &mut &str) -> WResult<String> {
    let kind: &str = (
        identifier,
        '/',
        take_while(1.., |c: char| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '+')),
    )
        .take()
        .parse_next(input)?;
    let rest: &str = take_while(0.., |c: char| c != '!').parse_next(input)?;
    Ok(format!("{kind}{}", rest.trim_end()))
}

fn element(input: &mut &str) -> WResult<ParsedElement> {
    let name: &str = identifier.parse_next(input)?;
    let _ = multispace0.parse_next(input)?;

    let properties: Vec<(String, PropertyValue)> = repeat(0.., property).parse_next(input)?;

    Ok(ParsedElement {
        name: name.to_string(),
        properties,
    })
}

fn link_separator(input: &mut &str) -> WResult<()> {
    let _ = multispace0.parse_next(input)?;
    let _ = '!'.parse_next(input)?;
    let _ = multispace0.parse_next(input)?;
    Ok(())
}

fn identifier<'a>(input: &mut &'a str) -> WResult<&'a str> {
    (
        alt((alpha1::<_, ContextError>, "_")),
        take_while(0.., |c: char| c.is_alphanumeric() || c == '_' || c == '-'),
    )
        .take()
        .parse_next(input)
}

fn property(input: &mut &str) -> WResult<(String, PropertyValue)> {
    let _ = multispace0.parse_next(input)?;

    // Only an identifier followed by `=` is a property; otherwise consume nothing.
    let checkpoint = *input;

    let key: &str = match identifier.parse_next(input) {
        Ok(k) => k,
        Err(_) => {
            *input = checkpoint;
            return Err(ContextError::new());
        }
    };

    let _ = multispace0.parse_next(input)?;

    if input.starts_with('=') {
        let _ = '='.parse_next(input)?;
    } else {
        *input = checkpoint;
        return Err(ContextError::new());
    }

    let _ = multispace0.parse_next(input)?;
    let value = property_value.parse_next(input)?;
    let _ = multispace0.parse_next(input)?;

    Ok((key.to_string(), value))
}

fn property_value(input: &mut &str) -> WResult<PropertyValue> {
    alt((
        quoted_string.map(PropertyValue::String),
        boolean.map(PropertyValue::Bool),
        float.map(PropertyValue::Float),
        integer.map(PropertyValue::Integer),
        bare_string.map(PropertyValue::String),
    ))
    .parse_next(input)
}

fn quoted_string(input: &mut &str) -> WResult<String> {
    alt((
        delimited('"', take_till(0.., '"'), '"'),
        delimited('\'', take_till(0.., '\''), '\''),
    ))
    .map(|s: &str| s.to_string())
    .parse_next(input)
}

/// Numbers and booleans must end where a value ends, so `20/1` or
/// `yes-please` fall through to a bare string.
fn at_value_end(input: &str) -> bool {
    input.is_empty() || input.starts_with('!') || input.starts_with(char::is_whitespace)
}

fn boolean(input: &mut &str) -> WResult<bool> {
    let value = alt((
        "true".map(|_| true),
        "false".map(|_| false),
        "yes".map(|_| true),
        "no".map(|_| false),
    ))
    .parse_next(input)?;
    if !at_value_end(input) {
        return Err(ContextError::new());
    }
    Ok(value)
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

fn float(input: &mut &str) -> WResult<f64> {
    let negative = opt('-').parse_next(input)?;
    let int_part: &str = digit1.parse_next(input)?;
    let _ = '.'.parse_next(input)?;
    let frac_part: &str = digit1.parse_next(input)?;

    if !at_value_end(input) {
        return Err(ContextError::new());
    }

    let s = format!(
        "{}{}.{}",
        if negative.is_some() { "-" } else { "" },
        int_part,
        frac_part
    );
    s.parse().map_err(|_| ContextError::new())
}

/// Stops at whitespace or `!`.
fn bare_string(input: &mut &str) -> WResult<String> {
    take_while(1.., |c: char| !c.is_whitespace() && c != '!' && c != '=')
        .map(|s: &str| s.to_string())
        .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(segment: &ParsedSegment) -> &ParsedElement {
        match segment {
            ParsedSegment::Stage(element) => element,
            ParsedSegment::Caps(caps) => panic!("expected a stage, got caps {caps}"),
        }
    }

    #[test]
    fn test_parse_simple_element() {
        let result = parse_pipeline("fakesink").unwrap();
        assert_eq!(result.segments.len(), 1);
        assert_eq!(stage(&result.segments[0]).name, "fakesink");
        assert!(stage(&result.segments[0]).properties.is_empty());
    }

    #[test]
    fn test_parse_sender_description() {
        let result = parse_pipeline(
            "videotestsrc pattern=1 ! video/x-raw,framerate=20/1 ! videoscale ! videoconvert \
             ! x264enc tune=zerolatency bitrate=500 speed-preset=superfast ! rtph264pay \
             ! udpsink host=127.0.0.1 port=5004",
        )
        .unwrap();

        assert_eq!(result.segments.len(), 7);
        assert_eq!(
            result.segments[1],
            ParsedSegment::Caps("video/x-raw,framerate=20/1".to_string())
        );

        let encoder = stage(&result.segments[4]);
        assert_eq!(encoder.name, "x264enc");
        assert_eq!(
            encoder.properties,
            vec![
                ("tune".to_string(), PropertyValue::String("zerolatency".into())),
                ("bitrate".to_string(), PropertyValue::Integer(500)),
                ("speed-preset".to_string(), PropertyValue::String("superfast".into())),
            ]
        );

        let sink = stage(&result.segments[6]);
        assert_eq!(sink.properties[0].1, PropertyValue::String("127.0.0.1".into()));
        assert_eq!(sink.properties[1].1, PropertyValue::Integer(5004));
    }

    #[test]
    fn test_parse_quoted_caps_property() {
        let result = parse_pipeline(
            r#"udpsrc port=5004 caps="application/x-rtp,media=video,encoding-name=H264,payload=96""#,
        )
        .unwrap();
        assert_eq!(
            stage(&result.segments[0]).properties[1].1,
            PropertyValue::String("application/x-rtp,media=video,encoding-name=H264,payload=96".into())
        );
    }

    #[test]
    fn test_parse_fraction_is_bare_string() {
        let result = parse_pipeline("videotestsrc framerate=20/1").unwrap();
        assert_eq!(
            stage(&result.segments[0]).properties[0].1,
            PropertyValue::String("20/1".into())
        );
    }

    #[test]
    fn test_parse_single_quoted_and_negative() {
        let result = parse_pipeline("element label='a b' offset=-100 rate=1.5").unwrap();
        let element = stage(&result.segments[0]);
        assert_eq!(element.properties[0].1, PropertyValue::String("a b".into()));
        assert_eq!(element.properties[1].1, PropertyValue::Integer(-100));
        assert_eq!(element.properties[2].1, PropertyValue::Float(1.5));
    }

    #[test]
    fn test_parse_no_spaces() {
        let result = parse_pipeline("a!b!c").unwrap();
        assert_eq!(result.segments.len(), 3);
    }

    #[test]
    fn test_property_value_conversions() {
        let int_val = PropertyValue::Integer(42);
        assert_eq!(int_val.as_u64(), Some(42));
        assert_eq!(int_val.as_f64(), Some(42.0));
        assert_eq!(int_val.as_string(), "42");

        assert_eq!(PropertyValue::Integer(-1).as_u64(), None);
        assert_eq!(PropertyValue::String("100".into()).as_i64(), Some(100));
        assert_eq!(PropertyValue::String("no".into()).as_bool(), Some(false));
        assert_eq!(PropertyValue::Float(1.5).as_i64(), None);
    }

    #[test]
    fn test_properties_builder() {
        let props = Properties::new().with("host", "127.0.0.1").with("port", 5004u16);
        assert_eq!(props.len(), 2);
        assert_eq!(props.get("port"), Some(&PropertyValue::Integer(5004)));

        let props = Properties::new().with("num-buffers", 30u64).with("big", u64::MAX);
        assert_eq!(props.get("num-buffers"), Some(&PropertyValue::Integer(30)));
        assert_eq!(props.get("big"), Some(&PropertyValue::Integer(i64::MAX)));
    }

    #[test]
    fn test_parse_failures() {
        assert!(parse_pipeline("").is_err());
        assert!(parse_pipeline("!").is_err());
        assert!(parse_pipeline("a ! ").is_err());
    }
}
