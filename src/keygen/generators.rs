//! Built-in key generators.

use super::{CacheKeyGenerator, KeyGen};
use crate::request::{RequestContext, format_features};
use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Keys on request features.
///
/// Restricted to a declared feature set, the fragment lists only those
/// features the request defines. The provisional variant covers every request
/// feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSetKeyGenerator {
    features: Option<BTreeSet<String>>,
}

impl FeatureSetKeyGenerator {
    /// Generator restricted to the given features.
    pub fn new(features: impl IntoIterator<Item = String>) -> Self {
        Self {
            features: Some(features.into_iter().collect()),
        }
    }

    /// Provisional generator covering all request features.
    pub const fn provisional() -> Self {
        Self {
            features: None,
        }
    }

    /// Declared features (`None` when provisional).
    pub const fn features(&self) -> Option<&BTreeSet<String>> {
        self.features.as_ref()
    }
}

impl CacheKeyGenerator for FeatureSetKeyGenerator {
    fn name(&self) -> &str {
        "features"
    }

    fn generate(&self, request: &RequestContext) -> String {
        match &self.features {
            None => request.feature_fragment(),
            Some(declared) => format_features(
                request
                    .features
                    .iter()
                    .filter(|(name, _)| declared.contains(*name))
                    .map(|(name, value)| (name.as_str(), *value)),
            ),
        }
    }

    fn combine(&self, other: &dyn CacheKeyGenerator) -> Option<KeyGen> {
        let other = other.as_any().downcast_ref::<Self>()?;
        let combined = match (&self.features, &other.features) {
            (Some(a), Some(b)) => Self {
                features: Some(a.union(b).cloned().collect()),
            },
            _ => Self::provisional(),
        };
        Some(Arc::new(combined))
    }

    fn is_provisional(&self) -> bool {
        self.features.is_none()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Keys on named transport options (`export_names`, `locale`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionKeyGenerator {
    options: Vec<String>,
}

impl OptionKeyGenerator {
    /// Generator over the given option names, in order.
    pub fn new<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            options: options.into_iter().map(Into::into).collect(),
        }
    }
}

impl CacheKeyGenerator for OptionKeyGenerator {
    fn name(&self) -> &str {
        "options"
    }

    fn generate(&self, request: &RequestContext) -> String {
        self.options
            .iter()
            .map(|name| format!("{name}={}", request.option(name).unwrap_or_default()))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn combine(&self, other: &dyn CacheKeyGenerator) -> Option<KeyGen> {
        let other = other.as_any().downcast_ref::<Self>()?;
        let mut options = self.options.clone();
        for name in &other.options {
            if !options.contains(name) {
                options.push(name.clone());
            }
        }
        Some(Arc::new(Self {
            options,
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
