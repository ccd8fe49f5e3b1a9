//! Seed write -> graph query -> hub registration, end to end

use devac::commands::{self, CommandContext};
use devac::hub::{self, HubRouter, RefreshOutcome};
use devac::query::{ImpactLevel, QueryEngine};
use devac::{
    generate_entity_id, CodeGraph, Edge, EdgeType, EntityUri, Node, NodeKind, ParseResult, QueryScope,
    SeedWriter, DEFAULT_BRANCH,
};
use serde_json::{json, Map, Value};
use std::fs;
use tempfile::TempDir;

fn function(file: &str, name: &str) -> Node {
    let id = generate_entity_id("app", ".", NodeKind::Function, file, name).to_string();
    Node::new(id, name, NodeKind::Function, file, 1, 5).exported()
}

#[tokio::test]
async fn test_seed_to_hub() {
    let workspace = TempDir::new().unwrap();
    let repo = workspace.path().join("app");
    fs::create_dir_all(&repo).unwrap();
    let writer = SeedWriter::new(&repo, DEFAULT_BRANCH);
    let scope = QueryScope::new([repo.clone()]);

    // a lone function has no neighbours
    let f1 = function("src/a.ts", "f1");
    writer
        .update_file(&["src/a.ts"], &ParseResult::new().with_nodes([f1.clone()]))
        .unwrap();
    {
        let graph = CodeGraph::load(&scope).unwrap();
        let engine = QueryEngine::new(&graph);
        assert!(engine.deps(&f1.entity_id, None, 1, 100).unwrap().is_empty());
        assert!(engine.dependents(&f1.entity_id, None, 1, 100).unwrap().is_empty());
    }

    // f1 calls a new f2
    let f2 = function("src/b.ts", "f2");
    writer
        .update_file(&["src/b.ts"], &ParseResult::new().with_nodes([f2.clone()]))
        .unwrap();
    writer
        .update_file(
            &["src/a.ts"],
            &ParseResult::new()
                .with_nodes([f1.clone()])
                .with_edges([Edge::new(&f1.entity_id, &f2.entity_id, EdgeType::Calls, "src/a.ts").at(3, 4)]),
        )
        .unwrap();

    let graph = CodeGraph::load(&scope).unwrap();
    let engine = QueryEngine::new(&graph);
    let hits = engine.dependents(&f2.entity_id, None, 1, 100).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entity_id, f1.entity_id);
    assert_eq!(hits[0].impact_level, ImpactLevel::Direct);

    // the same question through the command table, addressed by URI
    let uri = EntityUri::new("app", ".", "src/b.ts").unwrap().with_symbol("f2");
    let mut args = Map::new();
    args.insert("entity".into(), Value::String(uri.to_uri_string()));
    let out = commands::execute("dependents", &CommandContext::new(scope.clone()), args).unwrap();
    assert_eq!(out["results"][0]["name"], "f1");
    assert_eq!(out["results"][0]["impact_level"], json!("direct"));

    // federate through the hub; no server runs, so the router goes direct
    hub::init(workspace.path()).unwrap();
    let router = HubRouter::new(workspace.path());
    let registered = router.register_repo(&repo).await.unwrap();
    assert_eq!(registered.repo_id, "app");
    assert_eq!(registered.packages, vec!["."]);
    assert!(router.register_repo(&repo).await.unwrap().skipped);

    let refreshed = router.refresh_repo("app").await.unwrap();
    assert_eq!(refreshed.outcome, RefreshOutcome::Skipped);

    writer.delete_file(&["src/b.ts"]).unwrap();
    let refreshed = router.refresh_repo("app").await.unwrap();
    assert_eq!(refreshed.outcome, RefreshOutcome::Refreshed);

    let status = router.status().await.unwrap();
    assert_eq!(status.repos_active, 1);
    assert_eq!(status.packages, 1);
}
