//! Provisional/final key generators and error artifacts.

use amdagg::core::AggregatorError;
use amdagg::request::RequestContext;
use amdagg::test_utils::fixtures::{aggregator_with, default_aggregator, memory_provider, sample_app};
use amdagg::test_utils::{BuildMode, CountingBuilder};
use std::sync::Arc;

fn single_module() -> Vec<(&'static str, &'static str, i64)> {
    vec![("app/c.js", "define([], 1);", 10)]
}

#[tokio::test]
async fn test_provisional_generators_from_build_are_rejected() {
    let provider = memory_provider(&single_module());
    let builder = Arc::new(CountingBuilder::new(&["js"]).with_mode(BuildMode::ProvisionalViolation));
    let aggregator = aggregator_with(&provider, builder.clone());
    aggregator.scan().await.unwrap();

    let err = aggregator.build_layer(&RequestContext::for_modules(["app/c"])).await.unwrap_err();
    match err {
        AggregatorError::ProtocolViolation {
            builder,
            module,
        } => {
            assert_eq!(builder, "counting");
            assert_eq!(module, "app/c");
        }
        other => panic!("expected a protocol violation, got {other:?}"),
    }

    let cache = aggregator.cache();
    assert!(cache.modules().is_empty());
    assert!(cache.layers().is_empty());
    assert!(cache.modules().remembered_generators("app/c").is_none());

    // nothing was cached, so the next request builds again
    let _ = aggregator.build_layer(&RequestContext::for_modules(["app/c"])).await;
    assert_eq!(builder.calls(), 2);
}

async fn assert_error_layer_not_cached(mode: BuildMode) {
    let provider = memory_provider(&single_module());
    let builder = Arc::new(CountingBuilder::new(&["js"]).with_mode(mode));
    let aggregator = aggregator_with(&provider, builder.clone());
    aggregator.scan().await.unwrap();
    let request = RequestContext::for_modules(["app/c"]);

    let first = aggregator.build_layer(&request).await.unwrap();
    assert!(first.error, "{mode:?} yields an error layer");
    assert!(!first.bytes.is_empty());
    assert!(aggregator.cache().layers().is_empty());
    assert!(aggregator.cache().modules().is_empty());

    let second = aggregator.build_layer(&request).await.unwrap();
    assert!(second.error);
    assert_eq!(builder.calls(), 2, "{mode:?} is rebuilt on every request");
}

#[tokio::test]
async fn test_failing_builder_yields_uncached_error_layer() {
    assert_error_layer_not_cached(BuildMode::Fail).await;
}

#[tokio::test]
async fn test_error_flagged_build_yields_uncached_error_layer() {
    assert_error_layer_not_cached(BuildMode::ErrorFlag).await;
}

#[tokio::test]
async fn test_panicking_builder_yields_uncached_error_layer() {
    assert_error_layer_not_cached(BuildMode::Panic).await;
}

#[tokio::test]
async fn test_failure_message_reaches_the_layer() {
    let provider = memory_provider(&single_module());
    let builder = Arc::new(CountingBuilder::new(&["js"]).with_mode(BuildMode::Fail));
    let aggregator = aggregator_with(&provider, builder);
    aggregator.scan().await.unwrap();

    let response = aggregator.build_layer(&RequestContext::for_modules(["app/c"])).await.unwrap();
    let text = String::from_utf8(response.bytes).unwrap();
    assert!(text.contains("app/c"), "{text}");
    assert!(text.contains("configured to fail"), "{text}");
}

#[tokio::test]
async fn test_final_generators_are_reused_across_feature_sets() {
    let provider = memory_provider(&single_module());
    let builder = Arc::new(CountingBuilder::new(&["js"]));
    let aggregator = aggregator_with(&provider, builder.clone());
    aggregator.scan().await.unwrap();

    let plain = aggregator.build_layer(&RequestContext::for_modules(["app/c"])).await.unwrap();
    assert!(aggregator.cache().modules().remembered_generators("app/c").is_some());

    // different layer key, but the final generators ignore features
    let with_ie = aggregator
        .build_layer(&RequestContext::for_modules(["app/c"]).with_feature("ie", true))
        .await
        .unwrap();
    assert_ne!(plain.key, with_ie.key);
    assert_eq!(plain.bytes, with_ie.bytes);
    assert_eq!(builder.calls(), 1);
    assert!(aggregator.cache().modules().keys().contains(&"app/c|features:@10/10".to_string()));
}

#[tokio::test]
async fn test_javascript_keys_cover_only_used_features() {
    let provider = memory_provider(&sample_app());
    let aggregator = default_aggregator(&provider);
    aggregator.scan().await.unwrap();

    let request = RequestContext::for_modules(["app/widget"])
        .with_feature("ie", false)
        .with_feature("touch", true)
        .with_feature("unrelated", true);
    let artifact = aggregator.build_module("app/widget", &request).await.unwrap();
    assert_eq!(artifact.key, "app/widget|features:!ie,touch;options:export_names=false@100/100");

    // a request differing only in an unused feature hits the same entry
    let other = RequestContext::for_modules(["app/widget"])
        .with_feature("ie", false)
        .with_feature("touch", true);
    let again = aggregator.build_module("app/widget", &other).await.unwrap();
    assert!(Arc::ptr_eq(&artifact, &again));
    assert_eq!(aggregator.cache().modules().stats().builds, 1);
}

#[tokio::test]
async fn test_export_names_is_part_of_the_key() {
    let provider = memory_provider(&sample_app());
    let aggregator = default_aggregator(&provider);
    aggregator.scan().await.unwrap();

    let mut named = RequestContext::for_modules(["app/util"]);
    named.export_names = true;
    let anonymous = RequestContext::for_modules(["app/util"]);

    let a = aggregator.build_module("app/util", &named).await.unwrap();
    let b = aggregator.build_module("app/util", &anonymous).await.unwrap();
    assert_ne!(a.key, b.key);
    assert!(a.content.starts_with("define(\"app/util\", ["), "{}", a.content);
    assert!(b.content.starts_with("define([]"));
}

#[tokio::test]
async fn test_missing_builder_is_a_resource_error() {
    let provider = memory_provider(&[("app/data.xml", "<x/>", 1)]);
    let aggregator = default_aggregator(&provider);
    aggregator.scan().await.unwrap();

    let err = aggregator
        .build_module("app/data.xml", &RequestContext::for_modules(["app/data.xml"]))
        .await
        .unwrap_err();
    assert!(err.is_resource_error(), "{err:?}");
}
