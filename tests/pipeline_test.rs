use chrono::Duration;
use sluice::pipeline::{EdgeType, NodeConfig, Pipeline};

#[test]
fn test_builder_linear_chain() {
    let mut p = Pipeline::stream();
    let alert = p
        .source()
        .from(Some("cpu"))
        .window()
        .period(Duration::seconds(10))
        .every(Duration::seconds(10))
        .reduce("avg")
        .field("value")
        .alert()
        .crit("value > 90")
        .id();
    assert_eq!(p.len(), 5);
    assert_eq!(p.get(alert).name(), "alert4");
    assert_eq!(p.parents(alert), &[3]);
    assert_eq!(p.children(0), &[1]);
    // the chain assigned edge types along the way
    assert_eq!(p.get(1).provides, EdgeType::Stream);
    assert_eq!(p.get(2).provides, EdgeType::Batch);
    assert_eq!(p.get(3).wants, EdgeType::Batch);
    assert_eq!(p.get(3).provides, EdgeType::Stream);
    assert_eq!(p.get(alert).wants, EdgeType::Stream);
}

#[test]
fn test_builder_multi_parent() {
    let mut p = Pipeline::stream();
    let a = p.source().from(Some("cpu")).id();
    let b = p.source().from(Some("mem")).id();
    let union = p.node(a).union(b).id();
    assert_eq!(p.parents(union), &[a, b]);
    assert_eq!(p.children(a), &[union]);
    assert_eq!(p.children(b), &[union]);
}

#[test]
fn test_walk_visits_parents_before_children() {
    let mut p = Pipeline::stream();
    let a = p.source().from(None).id();
    let b = p.source().from(None).id();
    let u = p.node(a).union(b).id();
    p.node(u).alert();

    let mut seen = Vec::new();
    p.walk(|n| {
        for parent in p.parents(n.id) {
            assert!(
                seen.contains(parent),
                "parent {} must precede {}",
                parent,
                n.id
            );
        }
        seen.push(n.id);
        Ok(())
    })
    .expect("walk failed");
    assert_eq!(seen.len(), p.len());
    // siblings visit in insertion order
    assert_eq!(seen, vec![0, a, b, u, 4]);
}

#[test]
fn test_node_names_are_unique() {
    let mut p = Pipeline::stream();
    p.source().from(None).window().period(Duration::seconds(1));
    let mut names = std::collections::HashSet::new();
    p.walk(|n| {
        assert!(names.insert(n.name()), "duplicate node name {}", n.name());
        Ok(())
    })
    .expect("walk failed");
}

#[test]
fn test_dot_renders_every_edge() {
    let mut p = Pipeline::stream();
    p.source()
        .from(Some("cpu"))
        .window()
        .period(Duration::seconds(10))
        .alert();
    let dot = p.dot("cpu_alert");
    assert!(dot.starts_with("digraph cpu_alert {"));
    assert!(dot.ends_with('}'));
    assert!(dot.contains("\"stream0\" -> \"stream1\";"));
    assert!(dot.contains("\"stream1\" -> \"window2\";"));
    assert!(dot.contains("\"window2\" -> \"alert3\";"));
}

#[test]
fn test_batch_pipeline_source() {
    let mut p = Pipeline::batch();
    let q = p
        .source()
        .query("SELECT mean(value) FROM cpu")
        .every(Duration::minutes(1))
        .database("telegraf")
        .retention_policy("default")
        .id();
    assert!(matches!(p.get(0).config, NodeConfig::SourceBatch));
    match &p.get(q).config {
        NodeConfig::Batch(b) => {
            assert_eq!(b.query, "SELECT mean(value) FROM cpu");
            assert_eq!(b.database, "telegraf");
            assert_eq!(b.retention_policy, "default");
            assert_eq!(b.every, Some(Duration::minutes(1)));
        }
        other => panic!("expected batch config, got {:?}", other),
    }
    assert_eq!(p.get(q).provides, EdgeType::Batch);
}
