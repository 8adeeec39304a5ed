//! Text resource builder (`dojo/text!` style templates, CSS, JSON).

use super::{BuilderContext, ModuleBuild, ModuleBuilder, define_string, has_extension};
use crate::keygen::{KeyGen, OptionKeyGenerator};
use crate::request::RequestContext;
use crate::resource::{Resource, ResourceRef};
use std::sync::Arc;

/// Wraps a text resource as an AMD module whose value is the text.
#[derive(Debug, Clone)]
pub struct TextModuleBuilder {
    extensions: Vec<String>,
}

impl TextModuleBuilder {
    /// Builder for resources with the given extensions.
    pub fn new(extensions: Vec<String>) -> Self {
        Self {
            extensions,
        }
    }

    fn generators() -> Vec<KeyGen> {
        vec![Arc::new(OptionKeyGenerator::new(["export_names"]))]
    }
}

impl ModuleBuilder for TextModuleBuilder {
    fn name(&self) -> &str {
        "text"
    }

    fn handles(&self, _module_id: &str, resource: &ResourceRef) -> bool {
        has_extension(resource, &self.extensions)
    }

    fn cache_key_generators(&self, _context: &BuilderContext<'_>) -> Option<Vec<KeyGen>> {
        Some(Self::generators())
    }

    fn build(
        &self,
        module_id: &str,
        resource: &Resource,
        request: &RequestContext,
        key_gens: &[KeyGen],
    ) -> anyhow::Result<ModuleBuild> {
        let content = define_string(module_id, &resource.text(), request.export_names);
        let key_generators = if key_gens.is_empty() {
            Self::generators()
        } else {
            key_gens.to_vec()
        };
        Ok(ModuleBuild::new(content, key_generators))
    }
}
