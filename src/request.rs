//! Per-request context: requested modules, feature set, transport options.

use std::collections::BTreeMap;

/// Feature name → defined value. An empty map and "no features" are the same
/// thing.
pub type Features = BTreeMap<String, bool>;

/// Everything about a request that can influence a build or a cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Explicitly requested module ids, in request order
    pub modules: Vec<String>,
    /// Feature values supplied by the client
    pub features: Features,
    /// Expand requested modules into their dependency closure
    pub expand_dependencies: bool,
    /// Also follow `require()` dependencies when expanding
    pub expand_requires: bool,
    /// Emit named `define("id", ...)` calls
    pub export_names: bool,
    /// Client accepts a gzip-encoded response
    pub accept_gzip: bool,
    /// Additional transport options (e.g. `locale`)
    pub options: BTreeMap<String, String>,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
            features: Features::new(),
            expand_dependencies: true,
            expand_requires: false,
            export_names: false,
            accept_gzip: false,
            options: BTreeMap::new(),
        }
    }
}

impl RequestContext {
    /// Request for the given modules with default options.
    pub fn for_modules<I, S>(modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            modules: modules.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Builder-style feature setter.
    #[must_use]
    pub fn with_feature(mut self, name: impl Into<String>, value: bool) -> Self {
        self.features.insert(name.into(), value);
        self
    }

    /// Builder-style option setter.
    #[must_use]
    pub fn with_option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    /// Value of a named transport option as it appears in cache keys.
    ///
    /// The well-known boolean options are exposed under their field names.
    pub fn option(&self, name: &str) -> Option<String> {
        match name {
            "export_names" => Some(self.export_names.to_string()),
            "expand_requires" => Some(self.expand_requires.to_string()),
            "expand_dependencies" => Some(self.expand_dependencies.to_string()),
            other => self.options.get(other).cloned(),
        }
    }

    /// Canonical text form of the defined features (`a,!b`), sorted by name.
    pub fn feature_fragment(&self) -> String {
        format_features(self.features.iter().map(|(name, value)| (name.as_str(), *value)))
    }

    /// Canonical text form of the options that shape a layer.
    pub fn transport_fragment(&self) -> String {
        let mut parts = vec![
            format!("expand={}", self.expand_dependencies),
            format!("requires={}", self.expand_requires),
            format!("names={}", self.export_names),
        ];
        parts.extend(self.options.iter().map(|(k, v)| format!("{k}={v}")));
        parts.join(",")
    }

    /// Fill in features the client did not define from static defaults.
    pub fn merge_defaults(&mut self, defaults: &Features) {
        for (name, value) in defaults {
            self.features.entry(name.clone()).or_insert(*value);
        }
    }
}

/// Format `(name, value)` pairs as `name` / `!name`, comma separated.
pub fn format_features<'a>(features: impl IntoIterator<Item = (&'a str, bool)>) -> String {
    features
        .into_iter()
        .map(|(name, value)| if value { name.to_string() } else { format!("!{name}") })
        .collect::<Vec<_>>()
        .join(",")
}
