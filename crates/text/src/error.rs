use thiserror::Error;

use crate::{BufferId, Span};

pub type Result<T> = std::result::Result<T, Error>;

/// Usage errors. Each one means the caller did something the engine cannot
/// continue from without corrupting positions, so none of them are retried
/// or recovered internally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("buffer {buffer} already has an edit in progress")]
    EditInProgress { buffer: BufferId },

    #[error("version {version} already has a successor")]
    SuccessorAlreadySet { version: u64 },

    #[error("version belongs to buffer {found}, expected buffer {expected}")]
    ForeignVersion { expected: BufferId, found: BufferId },

    #[error("adding a span of buffer {buffer} would create a projection cycle")]
    CycleDetected { buffer: BufferId },

    #[error("span {span} of buffer {buffer} is already projected")]
    DuplicateProjection { buffer: BufferId, span: Span },

    #[error("change {second} overlaps change {first}")]
    OverlappingEdits { first: Span, second: Span },

    #[error("position {position} is out of range for length {length}")]
    OutOfRange { position: usize, length: usize },

    #[error("span {span} is out of range for length {length}")]
    SpanOutOfRange { span: Span, length: usize },

    #[error("text at {span} does not match the replaced text of the change")]
    OldTextMismatch { span: Span },

    #[error("line {line} is out of range for line count {count}")]
    LineOutOfRange { line: usize, count: usize },

    #[error("span {span} intersects a read only region")]
    ReadOnly { span: Span },

    #[error("buffer {buffer} is not composed from other buffers and has no span list")]
    NoSpanList { buffer: BufferId },

    #[error("span index {index} is out of range for {count} spans")]
    InvalidSpanIndex { index: usize, count: usize },

    #[error("custom span tracking needs a tracking behavior")]
    CustomTrackingRequiresBehavior,

    #[error("elision buffers project exactly one source buffer, got buffer {found} for source {expected}")]
    MultipleSources { expected: BufferId, found: BufferId },

    #[error("unknown content type {name:?}")]
    UnknownContentType { name: String },

    #[error("content type {name:?} is already registered")]
    DuplicateContentType { name: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
