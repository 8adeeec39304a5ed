//! Scanning and effective dependency times.

use amdagg::deps::DependencyGraph;
use amdagg::test_utils::fixtures::{default_aggregator, memory_provider, sample_app};
use amdagg::test_utils::init_test_logging;
use std::collections::BTreeSet;

#[tokio::test]
async fn test_scan_sample_app() {
    init_test_logging(None);
    let provider = memory_provider(&sample_app());
    let aggregator = default_aggregator(&provider);

    let stats = aggregator.scan().await.unwrap();
    assert_eq!(stats.visited, 7, "html resources are not scanned");
    assert_eq!(stats.parsed, 7);
    assert_eq!(stats.failed, 0);

    let tree = aggregator.tree();
    let widget = tree.node("app/widget").unwrap();
    assert_eq!(widget.define_deps, vec!["dojo/has!touch?./touch:./mouse", "dojo/text!./widget.html"]);
    assert_eq!(widget.features, BTreeSet::from(["ie".to_string(), "touch".to_string()]));
    assert_eq!(widget.last_modified_dep, 100);
    assert_eq!(tree.effective_dependency_time("dojo/has"), Some(50));
    assert_eq!(tree.parent("app/widget"), Some("app"));
}

#[tokio::test]
async fn test_unchanged_arrays_keep_dependency_time() {
    let provider = memory_provider(&[
        ("app/a.js", "define(['./b'], function (b) { return b; });", 100),
        ("app/b.js", "define([], 1);", 100),
    ]);
    let aggregator = default_aggregator(&provider);
    aggregator.scan().await.unwrap();

    // body and comment edits, same dependency array
    provider.insert("app/a.js", "// edited\ndefine(['./b'], function (b) { return b + 1; });", 200);
    let stats = aggregator.scan().await.unwrap();
    assert_eq!(stats.parsed, 1);
    assert_eq!(stats.skipped, 1);
    assert!(stats.advanced.is_empty());

    let node = aggregator.tree().node("app/a").cloned().unwrap();
    assert_eq!(node.last_modified, 200);
    assert_eq!(node.last_modified_dep, 100);
}

#[tokio::test]
async fn test_changed_arrays_advance_dependency_time() {
    let provider = memory_provider(&[
        ("a.js", "define(['b', 'c'], function () {});", 100),
        ("b.js", "define([], 1);", 100),
        ("c.js", "define([], 1);", 100),
        ("d.js", "define([], 1);", 100),
    ]);
    let aggregator = default_aggregator(&provider);
    aggregator.scan().await.unwrap();

    provider.insert("a.js", "define(['b', 'd'], function () {});", 250);
    let stats = aggregator.scan().await.unwrap();
    assert_eq!(stats.advanced, vec!["a"]);

    let tree = aggregator.tree();
    let node = tree.node("a").unwrap();
    assert_eq!(node.define_deps, vec!["b", "d"]);
    assert_eq!(node.last_modified_dep, 250);
    assert_eq!(tree.resolve("a"), vec!["b", "d", "a"]);
}

#[tokio::test]
async fn test_feature_change_advances_dependency_time() {
    let provider = memory_provider(&[("a.js", "define([], function () { return has('ie'); });", 1)]);
    let aggregator = default_aggregator(&provider);
    aggregator.scan().await.unwrap();

    provider.insert("a.js", "define([], function () { return has('touch'); });", 2);
    aggregator.scan().await.unwrap();
    assert_eq!(aggregator.tree().effective_dependency_time("a"), Some(2));
}

#[tokio::test]
async fn test_parse_failure_keeps_previous_node() {
    let provider = memory_provider(&[("a.js", "define(['b'], 1);", 1), ("b.js", "define([], 1);", 1)]);
    let aggregator = default_aggregator(&provider);
    aggregator.scan().await.unwrap();

    provider.insert("a.js", "define(['b', 'c'", 5);
    let stats = aggregator.scan().await.unwrap();
    assert_eq!(stats.failed, 1);

    let node = aggregator.tree().node("a").cloned().unwrap();
    assert_eq!(node.define_deps, vec!["b"]);
    assert_eq!(node.last_modified_dep, 1);
}

#[tokio::test]
async fn test_deleted_module_leaves_tree() {
    let provider = memory_provider(&[("a.js", "define([], 1);", 1), ("b.js", "define([], 1);", 1)]);
    let aggregator = default_aggregator(&provider);
    aggregator.scan().await.unwrap();
    assert!(aggregator.tree().node("b").is_some());

    provider.remove("b.js");
    aggregator.scan().await.unwrap();
    assert!(aggregator.tree().node("b").is_none());
}

#[tokio::test]
async fn test_graph_reports_cycles_and_dependents() {
    let provider = memory_provider(&[
        ("a.js", "define(['b'], 1);", 1),
        ("b.js", "define(['a'], 1);", 1),
        ("c.js", "define(['a'], 1);", 1),
    ]);
    let aggregator = default_aggregator(&provider);
    aggregator.scan().await.unwrap();

    let tree = aggregator.tree();
    assert_eq!(tree.resolve("c"), vec!["b", "a", "c"]);

    let graph = DependencyGraph::from_tree(&tree);
    assert_eq!(graph.detect_cycles(), vec![vec!["a".to_string(), "b".to_string()]]);
    // `a` sits on the cycle, so it reaches itself
    assert_eq!(graph.dependents("a"), vec!["a", "b", "c"]);
    assert_eq!(graph.dependents("c"), Vec::<String>::new());
}
