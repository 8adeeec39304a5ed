//! Resource access for the aggregator.
//!
//! A [`Resource`] is an immutable snapshot of one module source: its URI
//! (relative to the provider root, always `/`-separated), its bytes, and its
//! modification time in milliseconds since the Unix epoch. Everything that
//! reads sources goes through the [`ResourceProvider`] trait so that the
//! scanner and the builders work the same over a directory
//! ([`FileResourceProvider`]) or an in-process map ([`MemoryResourceProvider`]).
//!
//! Module ids map to URIs by appending `.js` unless the last path segment
//! already carries an extension (`app/main` → `app/main.js`,
//! `app/tmpl.html` → `app/tmpl.html`).

mod file;
mod memory;

pub use file::FileResourceProvider;
pub use memory::MemoryResourceProvider;

use crate::core::AggregatorResult;
use std::borrow::Cow;
use std::sync::Arc;

/// Immutable snapshot of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// URI relative to the provider root
    pub uri: String,
    /// Raw bytes
    pub content: Arc<[u8]>,
    /// Modification time, milliseconds since the Unix epoch
    pub last_modified: i64,
}

impl Resource {
    /// Create a snapshot from owned bytes.
    pub fn new(uri: impl Into<String>, content: impl Into<Vec<u8>>, last_modified: i64) -> Self {
        Self {
            uri: uri.into(),
            content: Arc::from(content.into()),
            last_modified,
        }
    }

    /// Content as text (invalid UTF-8 is replaced).
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    /// URI and modification time without the content.
    pub fn reference(&self) -> ResourceRef {
        ResourceRef {
            uri: self.uri.clone(),
            last_modified: self.last_modified,
        }
    }
}

/// A resource URI plus its modification time, as reported by
/// [`ResourceProvider::visit`] and [`ResourceProvider::stat`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// URI relative to the provider root
    pub uri: String,
    /// Modification time, milliseconds since the Unix epoch
    pub last_modified: i64,
}

/// Source of module resources.
///
/// Implementations are blocking; async callers wrap them in
/// `tokio::task::spawn_blocking`.
pub trait ResourceProvider: Send + Sync {
    /// Read a resource snapshot.
    fn read(&self, uri: &str) -> AggregatorResult<Resource>;

    /// Modification time of a resource without reading its content.
    fn stat(&self, uri: &str) -> AggregatorResult<ResourceRef>;

    /// Enumerate every resource below `root` (`""` for everything).
    fn visit(&self, root: &str, visitor: &mut dyn FnMut(ResourceRef)) -> AggregatorResult<()>;
}

/// URI of the resource backing a module id.
pub fn module_uri(module_id: &str) -> String {
    let last = module_id.rsplit('/').next().unwrap_or(module_id);
    if last.contains('.') {
        module_id.to_string()
    } else {
        format!("{module_id}.js")
    }
}

/// Module id for a resource URI (`app/main.js` → `app/main`).
pub fn module_id_for(uri: &str) -> String {
    uri.strip_suffix(".js").unwrap_or(uri).to_string()
}

/// Extension of the last URI segment, without the dot.
pub fn extension(uri: &str) -> Option<&str> {
    let last = uri.rsplit('/').next().unwrap_or(uri);
    last.rsplit_once('.').map(|(_, ext)| ext).filter(|ext| !ext.is_empty())
}
