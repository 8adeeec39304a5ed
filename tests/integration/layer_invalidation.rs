//! Layers are invalidated by dependency changes, not by content edits.

use amdagg::aggregator::Aggregator;
use amdagg::config::AggregatorConfig;
use amdagg::request::RequestContext;
use amdagg::resource::MemoryResourceProvider;
use amdagg::test_utils::CountingBuilder;
use amdagg::test_utils::fixtures::{aggregator_with, memory_provider};
use std::sync::Arc;

async fn setup() -> (MemoryResourceProvider, Aggregator, Arc<CountingBuilder>) {
    let provider = memory_provider(&[
        ("a.js", "define(['b', 'c'], function () {});", 100),
        ("b.js", "define([], 'b');", 100),
        ("c.js", "define([], 'c');", 100),
        ("d.js", "define([], 'd');", 100),
    ]);
    let builder = Arc::new(CountingBuilder::new(&["js"]));
    let aggregator = aggregator_with(&provider, builder.clone());
    aggregator.scan().await.unwrap();
    (provider, aggregator, builder)
}

fn request() -> RequestContext {
    RequestContext::for_modules(["a"])
}

#[tokio::test]
async fn test_dependency_change_invalidates_layer() {
    let (provider, aggregator, builder) = setup().await;

    let before = aggregator.build_layer(&request()).await.unwrap();
    assert_eq!(before.modules, vec!["b", "c", "a"]);
    assert_eq!(builder.calls(), 3);

    provider.insert("a.js", "define(['b', 'd'], function () {});", 200);
    aggregator.scan().await.unwrap();

    let after = aggregator.build_layer(&request()).await.unwrap();
    assert_eq!(after.key, before.key);
    assert_eq!(after.modules, vec!["b", "d", "a"]);
    assert_ne!(after.digest, before.digest);
    // b is still cached; a and d are built
    assert_eq!(builder.calls(), 5);

    let layer = aggregator.cache().layers().get(&after.key).unwrap();
    assert!(layer.stamps.contains(&("a".to_string(), 200)));
    assert!(!layer.modules.contains(&"c".to_string()));
}

#[tokio::test]
async fn test_comment_only_edit_keeps_layer() {
    let (provider, aggregator, builder) = setup().await;
    let before = aggregator.build_layer(&request()).await.unwrap();

    provider.insert("a.js", "/* reformatted */\ndefine(['b', 'c'], function () {});", 300);
    aggregator.scan().await.unwrap();
    assert_eq!(aggregator.tree().effective_dependency_time("a"), Some(100));

    let after = aggregator.build_layer(&request()).await.unwrap();
    assert_eq!(after.bytes, before.bytes);
    assert_eq!(builder.calls(), 3);
    assert_eq!(aggregator.cache().layers().stats().hits, 1);

    // the module itself is keyed on content time as well
    let module = aggregator.build_module("a", &request()).await.unwrap();
    assert!(module.content.contains("reformatted"));
    assert_eq!(builder.calls(), 4);
}

#[tokio::test]
async fn test_deleted_dependency_invalidates_layer() {
    let (provider, aggregator, _builder) = setup().await;
    aggregator.build_layer(&request()).await.unwrap();

    provider.remove("c.js");
    aggregator.scan().await.unwrap();

    // c is now a missing dependency: substituted, flagged, not cached
    let after = aggregator.build_layer(&request()).await.unwrap();
    assert!(after.error);
    assert!(aggregator.cache().layers().is_empty());
}

#[tokio::test]
async fn test_clear_forces_rebuild() {
    let (_provider, aggregator, builder) = setup().await;
    aggregator.build_layer(&request()).await.unwrap();
    assert_eq!(aggregator.cache().layers().len(), 1);

    aggregator.cache().clear();
    assert!(aggregator.cache().layers().is_empty());
    assert!(aggregator.cache().modules().is_empty());

    aggregator.build_layer(&request()).await.unwrap();
    assert_eq!(builder.calls(), 6);
}

#[tokio::test]
async fn test_stale_layer_drops_gzip_variant() {
    let (provider, aggregator, _builder) = setup().await;

    let mut gzip = request();
    gzip.accept_gzip = true;
    let compressed = aggregator.build_layer(&gzip).await.unwrap();
    assert!(compressed.gzip);
    assert_eq!(&compressed.bytes[..2], &[0x1f, 0x8b]);
    assert_eq!(aggregator.cache().gzip().len(), 1);

    provider.insert("a.js", "define(['b', 'd'], function () {});", 200);
    aggregator.scan().await.unwrap();

    let plain = aggregator.build_layer(&request()).await.unwrap();
    assert!(!plain.gzip);
    assert!(aggregator.cache().gzip().is_empty());
}

#[tokio::test]
async fn test_reload_starts_new_generation() {
    let (_provider, aggregator, _builder) = setup().await;
    aggregator.build_layer(&request()).await.unwrap();
    let old = aggregator.cache();

    let control = aggregator.reload(AggregatorConfig::default()).unwrap();
    let new = aggregator.cache();
    assert_eq!(new.control(), control);
    assert_ne!(old.control(), control);
    assert!(new.layers().is_empty());

    // the reloaded registry uses the configured builders
    let response = aggregator.build_layer(&request()).await.unwrap();
    let text = String::from_utf8(response.bytes).unwrap();
    assert!(!text.contains("/* builder:"), "{text}");
}
