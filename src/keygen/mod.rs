//! Cache key generator protocol.
//!
//! A builder contributes to a module's cache key through generators: each one
//! turns the parts of a request that can influence the builder's output into a
//! key fragment. Generators of the same class combine into one.
//!
//! # Two-phase keys
//!
//! Before a module has been built the builder may only know that *some*
//! features matter. It then supplies a *provisional* generator (coarse and
//! content independent, e.g. "every request feature"), which lets the cache
//! test for a hit without building. The build itself must return final,
//! non-provisional generators (e.g. "only `ie` and `touch`"). The module cache
//! remembers them and uses them for later lookups; a provisional generator
//! returned from a build is a protocol violation.
//!
//! # Key format
//!
//! [`compose_key`] joins fragments as `name:fragment` separated by `;`, in
//! declared order. [`module_key`] prefixes the module id and appends the
//! dependency stamp: `app/main|features:ie,!touch;options:export_names=false@100/180`.

mod generators;

pub use generators::{FeatureSetKeyGenerator, OptionKeyGenerator};

use crate::request::RequestContext;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Shared handle to a generator.
pub type KeyGen = Arc<dyn CacheKeyGenerator>;

/// Produces the cache key fragment for one aspect of a request.
pub trait CacheKeyGenerator: Send + Sync + fmt::Debug {
    /// Class tag; generators combine only with generators of the same tag.
    fn name(&self) -> &str;

    /// Key fragment for a request.
    fn generate(&self, request: &RequestContext) -> String;

    /// Merge with a generator of the same class; `None` when the classes differ.
    fn combine(&self, other: &dyn CacheKeyGenerator) -> Option<KeyGen>;

    /// Whether this is a coarse pre-build generator.
    fn is_provisional(&self) -> bool {
        false
    }

    /// Downcasting support for [`combine`](Self::combine).
    fn as_any(&self) -> &dyn Any;
}

/// Join the fragments of `generators` for a request.
pub fn compose_key(generators: &[KeyGen], request: &RequestContext) -> String {
    generators
        .iter()
        .map(|g| format!("{}:{}", g.name(), g.generate(request)))
        .collect::<Vec<_>>()
        .join(";")
}

/// Full module cache key.
pub fn module_key(
    module_id: &str,
    generators: &[KeyGen],
    request: &RequestContext,
    stamp: &str,
) -> String {
    format!("{module_id}|{}@{stamp}", compose_key(generators, request))
}

/// Whether any generator is provisional.
pub fn has_provisional(generators: &[KeyGen]) -> bool {
    generators.iter().any(|g| g.is_provisional())
}

/// Merge two generator lists pairwise by class: generators of `a` in order
/// (combined with their match in `b`, if any), then unmatched ones of `b`.
pub fn combine_all(a: &[KeyGen], b: &[KeyGen]) -> Vec<KeyGen> {
    let mut used = vec![false; b.len()];
    let mut out = Vec::with_capacity(a.len() + b.len());

    for gen_a in a {
        let matched = b.iter().enumerate().find_map(|(i, gen_b)| {
            if used[i] {
                return None;
            }
            gen_a.combine(gen_b.as_ref()).map(|combined| (i, combined))
        });
        match matched {
            Some((i, combined)) => {
                used[i] = true;
                out.push(combined);
            }
            None => out.push(Arc::clone(gen_a)),
        }
    }
    out.extend(b.iter().zip(used).filter(|(_, used)| !used).map(|(g, _)| Arc::clone(g)));
    out
}

/// Short description of a generator list for diagnostics.
pub fn describe(generators: &[KeyGen]) -> String {
    generators
        .iter()
        .map(|g| {
            if g.is_provisional() {
                format!("{}(provisional)", g.name())
            } else {
                g.name().to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
