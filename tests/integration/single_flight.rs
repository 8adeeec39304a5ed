//! Concurrent requests for the same key share one build.

use amdagg::aggregator::Aggregator;
use amdagg::config::AggregatorConfig;
use amdagg::request::RequestContext;
use amdagg::test_utils::CountingBuilder;
use amdagg::test_utils::fixtures::{aggregator_with, aggregator_with_config, memory_provider};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn layered_app() -> Vec<(&'static str, &'static str, i64)> {
    vec![
        ("app/main.js", "define(['./a', './b'], function () {});", 10),
        ("app/a.js", "define(['./c'], function () {});", 10),
        ("app/b.js", "define(['./c'], function () {});", 10),
        ("app/c.js", "define([], 1);", 10),
    ]
}

async fn slow_aggregator() -> (Arc<Aggregator>, Arc<CountingBuilder>) {
    let provider = memory_provider(&layered_app());
    let builder = Arc::new(CountingBuilder::new(&["js"]).with_delay(Duration::from_millis(50)));
    let aggregator = aggregator_with(&provider, builder.clone());
    aggregator.scan().await.unwrap();
    (Arc::new(aggregator), builder)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_layer_requests_build_once() {
    let (aggregator, builder) = slow_aggregator().await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let aggregator = Arc::clone(&aggregator);
            tokio::spawn(async move {
                aggregator.build_layer(&RequestContext::for_modules(["app/main"])).await
            })
        })
        .collect();

    let mut responses = Vec::new();
    for handle in handles {
        responses.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(builder.calls(), 4, "one build per module");
    let first = &responses[0];
    assert_eq!(first.modules, vec!["app/c", "app/a", "app/b", "app/main"]);
    for response in &responses[1..] {
        assert_eq!(response.bytes, first.bytes);
        assert_eq!(response.digest, first.digest);
    }

    let stats = aggregator.cache().layers().stats();
    assert_eq!(stats.builds, 1);
    assert_eq!(stats.waits + stats.hits, 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_layers_share_module_builds() {
    let (aggregator, builder) = slow_aggregator().await;

    let requests = [
        RequestContext::for_modules(["app/a"]),
        RequestContext::for_modules(["app/b"]),
        RequestContext::for_modules(["app/main"]),
    ];
    let responses = join_all(requests.iter().map(|r| aggregator.build_layer(r))).await;
    for response in responses {
        assert!(!response.unwrap().error);
    }

    // app/c is shared by all three layers but built once
    assert_eq!(builder.calls(), 4);
    assert_eq!(aggregator.cache().layers().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_module_builds() {
    let (aggregator, builder) = slow_aggregator().await;
    let request = RequestContext::for_modules(["app/c"]);

    let artifacts = join_all((0..6).map(|_| aggregator.build_module("app/c", &request))).await;
    let artifacts: Vec<_> = artifacts.into_iter().map(Result::unwrap).collect();

    assert_eq!(builder.calls(), 1);
    assert!(artifacts.iter().all(|a| Arc::ptr_eq(a, &artifacts[0])));
    assert!(artifacts[0].content.starts_with("/* builder:app/c */"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_feature_sets_build_in_parallel() {
    let (aggregator, builder) = slow_aggregator().await;
    let plain = RequestContext::for_modules(["app/c"]);
    let with_ie = RequestContext::for_modules(["app/c"]).with_feature("ie", true);

    let (a, b) = tokio::join!(aggregator.build_layer(&plain), aggregator.build_layer(&with_ie));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.key, b.key);
    assert_eq!(a.bytes, b.bytes);
    // both layers started before either module build finished
    assert!(builder.calls() <= 2);
    assert_eq!(aggregator.cache().layers().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_layer_builds_respect_parallelism() {
    let files: Vec<(String, String)> =
        (0..16).map(|i| (format!("app/m{i:02}.js"), format!("define([], {i});"))).collect();
    let entries: Vec<(&str, &str, i64)> = files.iter().map(|(uri, body)| (uri.as_str(), body.as_str(), 10)).collect();
    let provider = memory_provider(&entries);
    let builder = Arc::new(CountingBuilder::new(&["js"]).with_delay(Duration::from_millis(100)));
    let mut config = AggregatorConfig::default();
    config.parallelism = 2;
    let aggregator = aggregator_with_config(&provider, config, builder.clone());
    aggregator.scan().await.unwrap();

    let ids: Vec<String> = (0..16).map(|i| format!("app/m{i:02}")).collect();
    let started = Instant::now();
    let response = aggregator.build_layer(&RequestContext::for_modules(ids.iter().map(String::as_str))).await.unwrap();

    assert_eq!(builder.calls(), 16);
    assert!(builder.max_concurrency() <= 2, "{} builds overlapped", builder.max_concurrency());
    assert!(started.elapsed() >= Duration::from_millis(800));
    // layer order survives the bounded fan-out
    assert_eq!(response.modules, ids);
}
