//! Stage factory: creates stage behaviours from a type name and a
//! configuration map.

use crate::element::ElementDyn;
use crate::elements;
use crate::error::{Error, Result};
use crate::format::Caps;
use crate::pipeline::parser::{Properties, PropertyValue};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Constructor registered for a stage type.
pub type StageConstructor = Arc<dyn Fn(&Properties) -> Result<Box<dyn ElementDyn>> + Send + Sync>;

/// Registry of stage constructors.
#[derive(Clone, Default)]
pub struct StageFactory {
    constructors: HashMap<String, StageConstructor>,
}

impl StageFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a factory with the built-in stages registered.
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        elements::register_builtins(&mut factory);
        factory
    }

    /// Register a constructor, replacing any previous one for `name`.
    pub fn register<F>(&mut self, name: &str, constructor: F)
    where
        F: Fn(&Properties) -> Result<Box<dyn ElementDyn>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(name.to_string(), Arc::new(constructor));
    }

    /// Create a stage behaviour.
    ///
    /// Unknown types and invalid configuration are reported as
    /// [`Error::Creation`].
    pub fn create(&self, name: &str, props: &Properties) -> Result<Box<dyn ElementDyn>> {
        let constructor = self.constructors.get(name).ok_or_else(|| Error::Creation {
            factory: name.to_string(),
            reason: "no such stage type".to_string(),
        })?;

        constructor(props).map_err(|e| match e {
            Error::Creation { .. } => e,
            other => Error::Creation {
                factory: name.to_string(),
                reason: other.to_string(),
            },
        })
    }

    /// Check if a stage type is registered.
    pub fn is_registered(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// List registered stage types, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for StageFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageFactory")
            .field("types", &self.list())
            .finish()
    }
}

/// Typed, validating access to a stage's configuration.
///
/// Every read marks its key as known; [`finish`](Self::finish) rejects any
/// key that was never read.
pub struct PropertyReader<'a> {
    stage: &'a str,
    props: &'a Properties,
    known: HashSet<&'static str>,
}

impl<'a> PropertyReader<'a> {
    /// Start reading the configuration of a `stage`-type stage.
    pub fn new(stage: &'a str, props: &'a Properties) -> Self {
        Self {
            stage,
            props,
            known: HashSet::new(),
        }
    }

    fn get(&mut self, key: &'static str) -> Option<&'a PropertyValue> {
        self.known.insert(key);
        self.props.get(key)
    }

    fn mistyped(&self, key: &str, expected: &str, value: &PropertyValue) -> Error {
        Error::invalid_property(
            key,
            format!(
                "{} expects {expected}, got {} {value}",
                self.stage,
                value.type_name()
            ),
        )
    }

    fn missing(&self, key: &str) -> Error {
        Error::invalid_property(key, format!("required by {}", self.stage))
    }

    /// Optional string value. Any scalar is accepted and rendered.
    pub fn string(&mut self, key: &'static str) -> Option<String> {
        self.get(key).map(PropertyValue::as_string)
    }

    /// Required string value.
    pub fn required_string(&mut self, key: &'static str) -> Result<String> {
        self.string(key).ok_or_else(|| self.missing(key))
    }

    /// Optional unsigned integer.
    pub fn u64(&mut self, key: &'static str) -> Result<Option<u64>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| self.mistyped(key, "a non-negative integer", value)),
        }
    }

    /// Optional unsigned integer within `[min, max]`.
    pub fn u64_in(&mut self, key: &'static str, min: u64, max: u64) -> Result<Option<u64>> {
        match self.u64(key)? {
            Some(v) if v < min || v > max => Err(Error::invalid_property(
                key,
                format!("{} expects a value in {min}..={max}, got {v}", self.stage),
            )),
            other => Ok(other),
        }
    }

    /// Required UDP/TCP port number.
    pub fn required_port(&mut self, key: &'static str) -> Result<u16> {
        let port = self
            .u64_in(key, 0, u64::from(u16::MAX))?
            .ok_or_else(|| self.missing(key))?;
        u16::try_from(port).map_err(|_| Error::invalid_property(key, "port out of range"))
    }

    /// Optional boolean.
    pub fn bool(&mut self, key: &'static str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_bool()
                .map(Some)
                .ok_or_else(|| self.mistyped(key, "a boolean", value)),
        }
    }

    /// Optional fraction, written `n/d` or as a plain integer.
    pub fn fraction(&mut self, key: &'static str) -> Result<Option<(u32, u32)>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let parsed = match value {
            PropertyValue::Integer(n) => u32::try_from(*n).ok().map(|n| (n, 1)),
            PropertyValue::String(s) => s.split_once('/').and_then(|(n, d)| {
                Some((n.trim().parse::<u32>().ok()?, d.trim().parse::<u32>().ok()?))
            }),
            _ => None,
        };
        match parsed {
            Some((_, 0)) | None => Err(self.mistyped(key, "a fraction like 20/1", value)),
            Some(fraction) => Ok(Some(fraction)),
        }
    }

    /// Optional caps string.
    pub fn caps(&mut self, key: &'static str) -> Result<Option<Caps>> {
        match self.get(key) {
            None => Ok(None),
            Some(PropertyValue::String(s)) => Caps::parse(s).map(Some),
            Some(value) => Err(self.mistyped(key, "a caps string", value)),
        }
    }

    /// One of a fixed set of names, or its index in the set.
    pub fn choice(&mut self, key: &'static str, choices: &[&'static str]) -> Result<Option<&'static str>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let picked = match value {
            PropertyValue::Integer(i) => usize::try_from(*i).ok().and_then(|i| choices.get(i)),
            PropertyValue::String(s) => choices.iter().find(|c| **c == s.as_str()),
            _ => None,
        };
        picked.copied().map(Some).ok_or_else(|| {
            Error::invalid_property(
                key,
                format!(
                    "{} expects one of [{}], got {value}",
                    self.stage,
                    choices.join(", ")
                ),
            )
        })
    }

    /// Reject keys that no read asked for.
    pub fn finish(self) -> Result<()> {
        let mut unknown: Vec<&str> = self
            .props
            .iter()
            .map(|(k, _)| k)
            .filter(|k| !self.known.iter().any(|known| known == k))
            .collect();
        unknown.sort_unstable();
        match unknown.first() {
            Some(key) => Err(Error::invalid_property(
                *key,
                format!("unknown property for {}", self.stage),
            )),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::StageKind;

    #[test]
    fn test_builtins_registered() {
        let factory = StageFactory::with_builtins();
        for name in [
            "videotestsrc",
            "capsfilter",
            "videoscale",
            "videoconvert",
            "x264enc",
            "rtph264pay",
            "udpsink",
            "udpsrc",
            "rtpjitterbuffer",
            "rtph264depay",
            "decodebin",
            "autovideosink",
            "ximagesink",
            "fakesink",
        ] {
            assert!(factory.is_registered(name), "{name} missing");
        }
        assert!(!factory.is_registered("unknown"));
    }

    #[test]
    fn test_unknown_type_is_creation_error() {
        let factory = StageFactory::with_builtins();
        let err = factory.create("nosuchstage", &Properties::new()).err().unwrap();
        assert!(matches!(err, Error::Creation { ref factory, .. } if factory == "nosuchstage"));
    }

    #[test]
    fn test_missing_and_unknown_keys() {
        let factory = StageFactory::with_builtins();

        let err = factory.create("udpsink", &Properties::new()).err().unwrap();
        assert!(matches!(err, Error::Creation { .. }));
        assert!(err.to_string().contains("host"));

        let props = Properties::new()
            .with("host", "127.0.0.1")
            .with("port", 5004)
            .with("colour", "blue");
        let err = factory.create("udpsink", &props).err().unwrap();
        assert!(err.to_string().contains("colour"));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let factory = StageFactory::with_builtins();
        let props = Properties::new().with("host", "127.0.0.1").with("port", "http");
        assert!(factory.create("udpsink", &props).is_err());
    }

    #[test]
    fn test_register_override() {
        let mut factory = StageFactory::with_builtins();
        factory.register("fakesink", |_props| {
            Err(Error::invalid_property("any", "always refuses"))
        });
        let err = factory.create("fakesink", &Properties::new()).err().unwrap();
        assert!(err.to_string().contains("always refuses"));
    }

    #[test]
    fn test_create_builtin() {
        let factory = StageFactory::with_builtins();
        let element = factory
            .create("videotestsrc", &Properties::new().with("num-buffers", 3))
            .unwrap();
        assert_eq!(element.kind(), StageKind::Source);
    }

    #[test]
    fn test_reader_typed_access() {
        let props = Properties::new()
            .with("framerate", "20/1")
            .with("pattern", 1)
            .with("live", true)
            .with("caps", "video/x-raw");
        let mut reader = PropertyReader::new("test", &props);

        assert_eq!(reader.fraction("framerate").unwrap(), Some((20, 1)));
        assert_eq!(reader.choice("pattern", &["smpte", "snow"]).unwrap(), Some("snow"));
        assert_eq!(reader.bool("live").unwrap(), Some(true));
        assert_eq!(reader.caps("caps").unwrap().unwrap().media_kind(), "video/x-raw");
        assert_eq!(reader.u64("missing").unwrap(), None);
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn test_reader_rejects_bad_fraction() {
        let props = Properties::new().with("framerate", "20/0");
        let mut reader = PropertyReader::new("test", &props);
        assert!(reader.fraction("framerate").is_err());
    }
}
