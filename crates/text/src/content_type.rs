use std::{fmt, sync::Arc};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::{Error, Result};

/// Name of the content type every registry starts with
pub const TEXT_CONTENT_TYPE: &str = "text";

struct ContentTypeInner {
    name: String,
    bases: Vec<ContentType>,
}

/// A named kind of content, for example "rust" deriving from "code" deriving
/// from "text".
#[derive(Clone)]
pub struct ContentType {
    inner: Arc<ContentTypeInner>,
}

impl ContentType {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn base_types(&self) -> &[ContentType] {
        &self.inner.bases
    }

    /// Whether this type is `name` or derives from it
    pub fn is_of_type(&self, name: &str) -> bool {
        self.inner.name == name || self.inner.bases.iter().any(|base| base.is_of_type(name))
    }
}

impl PartialEq for ContentType {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ContentType {}

impl fmt::Debug for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentType({})", self.inner.name)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}

/// Registry of the known content types. Passed explicitly to the buffer
/// factory, there is no process wide instance.
#[derive(Debug)]
pub struct ContentTypeRegistry {
    types: RwLock<FxHashMap<String, ContentType>>,
}

impl ContentTypeRegistry {
    pub fn new() -> Arc<ContentTypeRegistry> {
        let text = ContentType {
            inner: Arc::new(ContentTypeInner {
                name: TEXT_CONTENT_TYPE.into(),
                bases: vec![],
            }),
        };
        let mut types = FxHashMap::default();
        types.insert(TEXT_CONTENT_TYPE.to_string(), text);
        Arc::new(ContentTypeRegistry {
            types: RwLock::new(types),
        })
    }

    /// Register a new content type deriving from `bases`. A type without
    /// bases derives from "text".
    pub fn add(&self, name: &str, bases: &[&str]) -> Result<ContentType> {
        let mut types = self.types.write();
        if types.contains_key(name) {
            return Err(Error::DuplicateContentType { name: name.into() });
        }

        let bases = if bases.is_empty() {
            vec![types[TEXT_CONTENT_TYPE].clone()]
        } else {
            bases
                .iter()
                .map(|base| {
                    types
                        .get(*base)
                        .cloned()
                        .ok_or_else(|| Error::UnknownContentType { name: (*base).into() })
                })
                .collect::<Result<Vec<ContentType>>>()?
        };

        let content_type = ContentType {
            inner: Arc::new(ContentTypeInner {
                name: name.into(),
                bases,
            }),
        };
        types.insert(name.into(), content_type.clone());
        log::debug!("Registered content type {name}");
        Ok(content_type)
    }

    pub fn get(&self, name: &str) -> Option<ContentType> {
        self.types.read().get(name).cloned()
    }

    pub fn require(&self, name: &str) -> Result<ContentType> {
        self.get(name)
            .ok_or_else(|| Error::UnknownContentType { name: name.into() })
    }

    pub fn text(&self) -> ContentType {
        self.types.read()[TEXT_CONTENT_TYPE].clone()
    }
}
