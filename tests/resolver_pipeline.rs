//! Resolver pipeline: placeholder substitution over serialized JSON
//! documents, the built-in resolvers, and the failure modes.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use regex::Regex;
use serde_json::json;
use tempfile::tempdir;

use geostore::config::Config;
use geostore::error::ResolverError;
use geostore::requester::{ApiResponse, MockRequester};
use geostore::resolver::{
    DateResolver, DictResolver, FileResolver, ResolveContext, Resolver, ResolverRegistry,
    StoreEntityResolver, UserResolver,
};
use geostore::store::StoreClient;

fn registry_with_params(values: serde_json::Value) -> ResolverRegistry {
    let mut registry = ResolverRegistry::new();
    registry.add(Box::new(DictResolver::new("params", values)));
    registry
}

fn ctx() -> ResolveContext {
    ResolveContext::default()
}

fn mock_client(requester: MockRequester) -> StoreClient<MockRequester> {
    let config = Arc::new(Config::from_default().expect("default configuration"));
    StoreClient::new(requester, config)
}

fn ok(body: serde_json::Value) -> ApiResponse {
    ApiResponse {
        status: 200,
        headers: HashMap::new(),
        body,
    }
}

#[tokio::test]
async fn string_placeholders_substitute_in_place() {
    let registry = registry_with_params(json!({ "name": "ortho", "zone": "75" }));
    let document = json!({
        "layer": "{params.name}-{params.zone}",
        "untouched": 42
    });
    let resolved = registry.resolve_document(&document, &ctx()).await.unwrap();
    assert_eq!(resolved, json!({ "layer": "ortho-75", "untouched": 42 }));
}

#[tokio::test]
async fn quoted_placeholders_can_inject_raw_json() {
    let registry = registry_with_params(json!({
        "checks": ["c1", "c2"],
        "options": { "deep": true }
    }));
    let document = json!({
        "checks": "{params.checks}",
        "options": "{params.options}"
    });
    let resolved = registry.resolve_document(&document, &ctx()).await.unwrap();
    assert_eq!(
        resolved,
        json!({ "checks": ["c1", "c2"], "options": { "deep": true } })
    );
}

#[tokio::test]
async fn unregistered_resolver_is_named_in_the_error() {
    let registry = registry_with_params(json!({}));
    let document = json!({ "value": "{nobody.expr}" });
    let error = registry
        .resolve_document(&document, &ctx())
        .await
        .expect_err("must fail");
    match error {
        ResolverError::NotFound(name) => assert_eq!(name, "nobody"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn broken_json_after_substitution_is_a_resolution_error() {
    // The resolved text carries an unescaped quote, so the document no
    // longer parses.
    let registry = registry_with_params(json!({ "name": "bro\"ken" }));
    let document = json!({ "value": "{params.name}" });
    let error = registry
        .resolve_document(&document, &ctx())
        .await
        .expect_err("must fail");
    assert!(matches!(error, ResolverError::Resolution { .. }));
}

#[tokio::test]
async fn substitution_is_a_single_pass() {
    // A resolved value containing placeholder syntax is NOT resolved
    // again within the same pass.
    let registry = registry_with_params(json!({ "a": "{params.b}", "b": "x" }));
    let document = json!({ "value": "{params.a}" });
    let resolved = registry.resolve_document(&document, &ctx()).await.unwrap();
    assert_eq!(resolved, json!({ "value": "{params.b}" }));
}

#[tokio::test]
async fn duplicate_registration_keeps_the_first_resolver() {
    let mut registry = ResolverRegistry::new();
    registry.add(Box::new(DictResolver::new("params", json!({ "k": "first" }))));
    registry.add(Box::new(DictResolver::new("params", json!({ "k": "second" }))));
    let resolved = registry
        .resolve_document(&json!({ "v": "{params.k}" }), &ctx())
        .await
        .unwrap();
    assert_eq!(resolved, json!({ "v": "first" }));
}

#[tokio::test]
async fn date_resolver_renders_known_expressions() {
    let resolver = DateResolver::new("datetime");
    let date = resolver.resolve("date", &ctx()).await.unwrap();
    let pattern = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();
    assert!(pattern.is_match(date.as_str().unwrap()));

    let year = resolver.resolve("strftime(%Y)", &ctx()).await.unwrap();
    assert_eq!(year.as_str().unwrap().len(), 4);

    assert!(resolver.resolve("yesterday", &ctx()).await.is_err());
}

#[tokio::test]
async fn file_resolver_reads_and_validates() {
    let dir = tempdir().unwrap();
    let text_file = dir.path().join("note.txt");
    let json_file = dir.path().join("items.json");
    fs::write(&text_file, "hello\n").unwrap();
    fs::write(&json_file, r#"["a", "b"]"#).unwrap();

    let resolver = FileResolver::new("file");
    let text = resolver
        .resolve(&format!("str({})", text_file.display()), &ctx())
        .await
        .unwrap();
    assert_eq!(text, json!("hello"));

    let list = resolver
        .resolve(&format!("list({})", json_file.display()), &ctx())
        .await
        .unwrap();
    assert_eq!(list, json!(["a", "b"]));

    // An array is not a mapping.
    let error = resolver
        .resolve(&format!("dict({})", json_file.display()), &ctx())
        .await
        .expect_err("must fail");
    assert!(matches!(error, ResolverError::FileInvalid { .. }));

    let error = resolver
        .resolve("str(/definitely/not/here)", &ctx())
        .await
        .expect_err("must fail");
    assert!(matches!(error, ResolverError::FileNotFound { .. }));
}

#[tokio::test]
async fn user_resolver_fetches_once_and_resolves_paths() {
    let mut requester = MockRequester::new();
    requester
        .expect_route_request()
        .withf(|route, _, _, _, _| route == "user_get")
        .times(1)
        .returning(|_, _, _, _, _| {
            Ok(ok(json!({ "email": "ada@example.com", "last_call": "2026-08-30" })))
        });

    let client = mock_client(requester);
    let resolver = UserResolver::new("user", &client).await.unwrap();

    let email = resolver.resolve("email", &ctx()).await.unwrap();
    assert_eq!(email, json!("ada@example.com"));

    let error = resolver
        .resolve("shoe_size", &ctx())
        .await
        .expect_err("must fail");
    assert!(matches!(error, ResolverError::UserAttribute { .. }));
}

#[tokio::test]
async fn store_entity_resolver_lists_and_projects() {
    let mut requester = MockRequester::new();
    requester
        .expect_route_request()
        .withf(|route, _, _, query, _| {
            route == "stored_data_list"
                && query.contains(&("name".to_string(), "ortho".to_string()))
                && query.contains(&("tags[zone]".to_string(), "75".to_string()))
        })
        .times(1)
        .returning(|_, _, _, _, _| Ok(ok(json!([{ "_id": "sd42", "name": "ortho" }]))));

    let client = Arc::new(mock_client(requester));
    let resolver = StoreEntityResolver::new("store_entity", client);

    let id = resolver
        .resolve("stored_data._id [INFOS(name=ortho), TAGS(zone=75)]", &ctx())
        .await
        .unwrap();
    assert_eq!(id, json!("sd42"));
}

#[tokio::test]
async fn store_entity_resolver_reports_zero_matches() {
    let mut requester = MockRequester::new();
    requester
        .expect_route_request()
        .returning(|_, _, _, _, _| Ok(ok(json!([]))));

    let client = Arc::new(mock_client(requester));
    let resolver = StoreEntityResolver::new("store_entity", client);
    let error = resolver
        .resolve("upload._id [INFOS(name=nope)]", &ctx())
        .await
        .expect_err("must fail");
    assert!(matches!(error, ResolverError::NoEntityFound { .. }));
}
