//! Pass-through JavaScript builder.

use super::{BuilderContext, ModuleBuild, ModuleBuilder, has_extension, js_string};
use crate::deps::extractor::{DependencyExtractor, syntax_tree};
use crate::keygen::{FeatureSetKeyGenerator, KeyGen, OptionKeyGenerator, has_provisional};
use crate::request::RequestContext;
use crate::resource::{Resource, ResourceRef};
use anyhow::Context;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Serves JavaScript modules as written, naming anonymous `define` calls when
/// the request exports module names.
///
/// Key contribution: the features the module tests (provisional "all
/// features" until the module's `has()` calls are known) plus the
/// `export_names` option.
#[derive(Debug, Clone)]
pub struct JavaScriptModuleBuilder {
    extensions: Vec<String>,
}

impl JavaScriptModuleBuilder {
    /// Builder for resources with the given extensions.
    pub fn new(extensions: Vec<String>) -> Self {
        Self {
            extensions,
        }
    }

    fn final_generators(features: BTreeSet<String>) -> Vec<KeyGen> {
        vec![
            Arc::new(FeatureSetKeyGenerator::new(features)),
            Arc::new(OptionKeyGenerator::new(["export_names"])),
        ]
    }
}

impl ModuleBuilder for JavaScriptModuleBuilder {
    fn name(&self) -> &str {
        "javascript"
    }

    fn handles(&self, _module_id: &str, resource: &ResourceRef) -> bool {
        has_extension(resource, &self.extensions)
    }

    fn cache_key_generators(&self, context: &BuilderContext<'_>) -> Option<Vec<KeyGen>> {
        Some(match context.known_features {
            Some(features) => Self::final_generators(features.clone()),
            None => vec![
                Arc::new(FeatureSetKeyGenerator::provisional()),
                Arc::new(OptionKeyGenerator::new(["export_names"])),
            ],
        })
    }

    fn build(
        &self,
        module_id: &str,
        resource: &Resource,
        request: &RequestContext,
        key_gens: &[KeyGen],
    ) -> anyhow::Result<ModuleBuild> {
        let source = resource.text();

        let key_generators = if key_gens.is_empty() || has_provisional(key_gens) {
            let features = DependencyExtractor
                .has_features(&resource.uri, &source)
                .with_context(|| format!("Failed to analyze module '{module_id}'"))?;
            Self::final_generators(features)
        } else {
            key_gens.to_vec()
        };

        let content = if request.export_names {
            name_anonymous_define(module_id, &resource.uri, &source)?
        } else {
            source.into_owned()
        };

        Ok(ModuleBuild::new(content, key_generators))
    }
}

/// Insert the module id into the first `define(` call when it is anonymous.
fn name_anonymous_define(module_id: &str, uri: &str, source: &str) -> anyhow::Result<String> {
    let tree = syntax_tree(uri, source)?;
    let mut insertion = None;
    tree.walk_calls(&mut |call| {
        if insertion.is_none() && call.callee.as_deref() == Some("define") {
            let named = call.args.first().is_some_and(|arg| arg.as_str().is_some());
            insertion = Some((!named).then_some((call.open_offset + 1, call.args.is_empty())));
        }
    });

    let Some(Some((at, no_args))) = insertion else {
        return Ok(source.to_string());
    };
    let separator = if no_args { "" } else { ", " };
    let mut named = String::with_capacity(source.len() + module_id.len() + 4);
    named.push_str(&source[..at]);
    named.push_str(&js_string(module_id));
    named.push_str(separator);
    named.push_str(&source[at..]);
    Ok(named)
}
