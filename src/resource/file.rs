//! Filesystem-backed resource provider.

use super::{Resource, ResourceProvider, ResourceRef};
use crate::core::{AggregatorError, AggregatorResult};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Serves resources from a directory tree.
///
/// URIs are `/`-separated paths relative to `root`; URIs that try to leave the
/// root (`..`, absolute paths) are rejected as not found.
#[derive(Debug, Clone)]
pub struct FileResourceProvider {
    root: PathBuf,
}

impl FileResourceProvider {
    /// Create a provider rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
        }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, uri: &str) -> AggregatorResult<PathBuf> {
        let relative = Path::new(uri);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(AggregatorError::ResourceNotFound {
                uri: uri.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    fn relative_uri(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        (!parts.is_empty()).then(|| parts.join("/"))
    }
}

fn millis(time: std::io::Result<SystemTime>) -> i64 {
    time.ok()
        .map(|t| chrono::DateTime::<chrono::Utc>::from(t).timestamp_millis())
        .unwrap_or(0)
}

fn io_error(uri: &str, error: &std::io::Error) -> AggregatorError {
    if error.kind() == std::io::ErrorKind::NotFound {
        AggregatorError::ResourceNotFound {
            uri: uri.to_string(),
        }
    } else {
        AggregatorError::ProviderFailure {
            uri: uri.to_string(),
            reason: error.to_string(),
        }
    }
}

impl ResourceProvider for FileResourceProvider {
    fn read(&self, uri: &str) -> AggregatorResult<Resource> {
        let path = self.resolve(uri)?;
        // stat before reading so a concurrent write can only make the time look older
        let metadata = std::fs::metadata(&path).map_err(|e| io_error(uri, &e))?;
        if !metadata.is_file() {
            return Err(AggregatorError::ResourceNotFound {
                uri: uri.to_string(),
            });
        }
        let content = std::fs::read(&path).map_err(|e| io_error(uri, &e))?;
        Ok(Resource::new(uri, content, millis(metadata.modified())))
    }

    fn stat(&self, uri: &str) -> AggregatorResult<ResourceRef> {
        let path = self.resolve(uri)?;
        let metadata = std::fs::metadata(&path).map_err(|e| io_error(uri, &e))?;
        if !metadata.is_file() {
            return Err(AggregatorError::ResourceNotFound {
                uri: uri.to_string(),
            });
        }
        Ok(ResourceRef {
            uri: uri.to_string(),
            last_modified: millis(metadata.modified()),
        })
    }

    fn visit(&self, root: &str, visitor: &mut dyn FnMut(ResourceRef)) -> AggregatorResult<()> {
        let start = if root.is_empty() {
            self.root.clone()
        } else {
            self.resolve(root)?
        };
        if !start.exists() {
            return Err(AggregatorError::ResourceNotFound {
                uri: root.to_string(),
            });
        }

        for entry in WalkDir::new(&start).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| AggregatorError::ProviderFailure {
                uri: root.to_string(),
                reason: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(uri) = self.relative_uri(entry.path()) else {
                continue;
            };
            let last_modified =
                millis(entry.metadata().map_err(std::io::Error::from).and_then(|m| m.modified()));
            visitor(ResourceRef {
                uri,
                last_modified,
            });
        }
        Ok(())
    }
}
