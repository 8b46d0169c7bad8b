use std::sync::Arc;

use ropey::Rope;

use crate::{
    projection::{ElisionBuffer, ProjectionBuffer, SourceEntry},
    BufferKind, ContentType, ContentTypeRegistry, EngineConfig, ProjectionOptions, Result,
    SnapshotSpan, TextBuffer,
};

/// Creates buffers. The content type registry and the configuration are
/// handed to every buffer created here.
#[derive(Debug, Clone)]
pub struct TextBufferFactory {
    registry: Arc<ContentTypeRegistry>,
    config: Arc<EngineConfig>,
    default_content_type: ContentType,
}

impl TextBufferFactory {
    pub fn new(registry: Arc<ContentTypeRegistry>, config: EngineConfig) -> Result<Self> {
        let default_content_type = registry.require(&config.buffer.default_content_type)?;
        Ok(TextBufferFactory {
            registry,
            config: Arc::new(config),
            default_content_type,
        })
    }

    pub fn registry(&self) -> &Arc<ContentTypeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn default_content_type(&self) -> &ContentType {
        &self.default_content_type
    }

    pub fn create_buffer(&self, text: &str) -> TextBuffer {
        self.create_buffer_with(text, self.default_content_type.clone())
    }

    pub fn create_buffer_with(&self, text: &str, content_type: ContentType) -> TextBuffer {
        TextBuffer::new(
            BufferKind::Text,
            Rope::from_str(text),
            content_type,
            self.config.clone(),
            None,
        )
    }

    /// Projection buffer with the configured projection options
    pub fn create_projection_buffer(
        &self,
        entries: impl IntoIterator<Item = SourceEntry>,
    ) -> Result<ProjectionBuffer> {
        self.create_projection_buffer_with(
            entries,
            self.config.projection,
            self.default_content_type.clone(),
        )
    }

    pub fn create_projection_buffer_with(
        &self,
        entries: impl IntoIterator<Item = SourceEntry>,
        options: ProjectionOptions,
        content_type: ContentType,
    ) -> Result<ProjectionBuffer> {
        ProjectionBuffer::create(
            entries.into_iter().collect(),
            options,
            content_type,
            self.config.clone(),
        )
    }

    /// Elision buffer over `source` showing `exposed`. Every span must belong
    /// to `source`.
    pub fn create_elision_buffer(
        &self,
        source: &TextBuffer,
        exposed: impl IntoIterator<Item = SnapshotSpan>,
    ) -> Result<ElisionBuffer> {
        self.create_elision_buffer_with(source, exposed, source.content_type())
    }

    pub fn create_elision_buffer_with(
        &self,
        source: &TextBuffer,
        exposed: impl IntoIterator<Item = SnapshotSpan>,
        content_type: ContentType,
    ) -> Result<ElisionBuffer> {
        ElisionBuffer::create(
            source,
            exposed.into_iter().collect(),
            content_type,
            self.config.clone(),
        )
    }
}

impl Default for TextBufferFactory {
    fn default() -> Self {
        let registry = ContentTypeRegistry::new();
        let default_content_type = registry.text();
        TextBufferFactory {
            registry,
            config: Arc::new(EngineConfig::default()),
            default_content_type,
        }
    }
}
