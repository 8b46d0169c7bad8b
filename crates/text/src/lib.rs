//! Versioned text buffers with tracking points and spans, and projection
//! and elision buffers composed from other buffers.

pub(crate) mod buffer;
pub(crate) mod change;
pub(crate) mod config;
pub(crate) mod content_type;
pub(crate) mod error;
pub(crate) mod events;
pub(crate) mod factory;
pub(crate) mod graph;
pub(crate) mod projection;
pub(crate) mod snapshot;
pub(crate) mod span;
pub(crate) mod tracking;
pub(crate) mod version;

pub use buffer::*;
pub use change::*;
pub use config::*;
pub use content_type::*;
pub use error::*;
pub use events::*;
pub use factory::*;
pub use graph::*;
pub use projection::*;
pub use snapshot::*;
pub use span::*;
pub use tracking::*;
pub use version::*;
