//! `capsfilter`: restricts the format on a link.

use crate::buffer::Buffer;
use crate::element::{Output, PortTemplate, StageContext, Transform};
use crate::error::Result;
use crate::format::Caps;
use crate::pipeline::{PropertyReader, Properties};

/// Passes buffers through unchanged and declares `caps` on both ports.
///
/// Linking checks the declared caps against its neighbours, so a
/// `capsfilter` narrows what may flow through it. A launch description's
/// bare caps segment becomes one of these.
///
/// | key | meaning | default |
/// |---|---|---|
/// | `caps` | caps to enforce | anything |
#[derive(Debug, Default)]
pub struct CapsFilterStage {
    caps: Option<Caps>,
    passed: u64,
}

impl CapsFilterStage {
    /// Create a filter enforcing `caps`.
    pub fn new(caps: Caps) -> Self {
        Self {
            caps: Some(caps),
            passed: 0,
        }
    }

    /// Create a filter from stage configuration.
    pub fn from_properties(props: &Properties) -> Result<Self> {
        let mut reader = PropertyReader::new("capsfilter", props);
        let caps = reader.caps("caps")?;
        reader.finish()?;
        Ok(Self { caps, passed: 0 })
    }

    /// The enforced caps.
    pub fn caps(&self) -> Option<&Caps> {
        self.caps.as_ref()
    }

    /// Buffers passed so far.
    pub fn passed(&self) -> u64 {
        self.passed
    }
}

impl Transform for CapsFilterStage {
    fn transform(&mut self, buffer: Buffer, _ctx: &mut StageContext) -> Result<Output> {
        self.passed += 1;
        Ok(Output::Single(buffer))
    }

    fn port_templates(&self) -> Vec<PortTemplate> {
        let (sink, src) = (PortTemplate::input("sink"), PortTemplate::output("src"));
        match &self.caps {
            Some(caps) => vec![sink.with_caps(caps.clone()), src.with_caps(caps.clone())],
            None => vec![sink, src],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ports_carry_caps() {
        let props = Properties::new().with("caps", "video/x-raw,framerate=20/1");
        let filter = CapsFilterStage::from_properties(&props).unwrap();
        let templates = filter.port_templates();

        assert_eq!(templates.len(), 2);
        for template in &templates {
            assert_eq!(template.caps.as_ref(), filter.caps());
        }
    }

    #[test]
    fn test_passes_buffers_unchanged() {
        let mut filter = CapsFilterStage::new(Caps::new("video/x-raw"));
        let mut ctx = StageContext::detached("filter");
        let out = filter.transform(Buffer::new(vec![1, 2, 3]), &mut ctx).unwrap();

        assert_eq!(out.into_vec()[0].data().as_ref(), &[1, 2, 3]);
        assert_eq!(filter.passed(), 1);
    }

    #[test]
    fn test_bad_caps_rejected() {
        let props = Properties::new().with("caps", "video/x-raw,=3");
        assert!(CapsFilterStage::from_properties(&props).is_err());
    }
}
