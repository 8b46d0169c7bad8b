use serde::Deserialize;

use crate::{Result, TrackingFidelity};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub buffer: BufferConfig,
    pub tracking: TrackingConfig,
    pub projection: ProjectionOptions,
}

impl EngineConfig {
    /// Parse a configuration, missing keys use their defaults
    pub fn from_toml(text: &str) -> Result<EngineConfig> {
        let config = toml::from_str(text)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Content type given to buffers created without one
    pub default_content_type: String,
}

impl Default for BufferConfig {
    fn default() -> Self {
        BufferConfig {
            default_content_type: crate::TEXT_CONTENT_TYPE.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Fidelity used by buffers when creating tracking spans for their own
    /// bookkeeping, like read only regions.
    /// Available options:
    /// forward: cheap, meant for tracking forward in time
    /// high-fidelity: exact when returning to reiterated versions
    pub default_fidelity: TrackingFidelity,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProjectionOptions {
    /// Allow adjacent edge inclusive spans of the same source buffer. Text
    /// inserted at their seam will then appear in both spans.
    pub permissive_edge_inclusive_source_spans: bool,

    /// Literal spans can receive typed text when choosing an insertion
    /// point.
    pub writable_literal_spans: bool,
}
