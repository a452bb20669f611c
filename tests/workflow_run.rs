//! Workflow files: structural validation and step execution, with the
//! resolver pipeline applied to action definitions.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::tempdir;

use geostore::config::Config;
use geostore::error::WorkflowError;
use geostore::requester::{ApiResponse, Method, MockRequester};
use geostore::resolver::{DictResolver, ResolveContext, ResolverRegistry};
use geostore::store::StoreClient;
use geostore::workflow::Workflow;

fn ok(body: Value) -> ApiResponse {
    ApiResponse {
        status: 200,
        headers: HashMap::new(),
        body,
    }
}

fn client(requester: MockRequester) -> StoreClient<MockRequester> {
    let mut config = Config::from_default().expect("default configuration");
    config.overlay_ini("[delete]\nsleep_between = 0\n").unwrap();
    StoreClient::new(requester, Arc::new(config))
}

fn registry(params: Value) -> ResolverRegistry {
    let mut registry = ResolverRegistry::new();
    registry.add(Box::new(DictResolver::new("params", params)));
    registry
}

#[test]
fn from_file_round_trips_through_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("publish.json");
    fs::write(
        &path,
        r#"{ "workflow": { "steps": { "only": { "actions": [ { "type": "create-entity" } ] } } } }"#,
    )
    .unwrap();

    let workflow = Workflow::from_file(&path).expect("parsed");
    assert_eq!(workflow.name(), "publish");
    assert_eq!(workflow.steps().unwrap(), vec!["only"]);
}

#[test]
fn validation_reports_every_structural_issue() {
    let workflow = Workflow::from_value(
        "broken",
        json!({
            "workflow": {
                "steps": {
                    "empty": { "actions": [] },
                    "typeless": { "actions": [ {} ] },
                    "odd": {
                        "actions": [ { "type": "mint-entity" } ],
                        "parents": [ "nowhere" ]
                    }
                }
            }
        }),
    );
    let issues = workflow.validate();
    assert_eq!(issues.len(), 4, "issues: {issues:?}");
    assert!(issues.iter().any(|i| i.contains("'empty'")));
    assert!(issues.iter().any(|i| i.contains("has no type")));
    assert!(issues.iter().any(|i| i.contains("mint-entity")));
    assert!(issues.iter().any(|i| i.contains("nowhere")));
}

#[test]
fn a_document_without_steps_is_one_issue() {
    let workflow = Workflow::from_value("empty", json!({}));
    let issues = workflow.validate();
    assert_eq!(issues.len(), 1);
}

#[tokio::test]
async fn unknown_step_is_an_error() {
    let workflow = Workflow::from_value(
        "wf",
        json!({ "workflow": { "steps": {} } }),
    );
    let error = workflow
        .run_step(
            "ghost",
            &client(MockRequester::new()),
            &registry(json!({})),
            &ResolveContext::default(),
            None,
        )
        .await
        .expect_err("must fail");
    assert!(matches!(error, WorkflowError::UnknownStep(name) if name == "ghost"));
}

#[tokio::test]
async fn create_entity_actions_post_the_resolved_payload() {
    let mut requester = MockRequester::new();
    requester
        .expect_route_request()
        .withf(|route, _, method, _, body| {
            route == "upload_create"
                && *method == Method::Post
                && body.as_ref().and_then(|b| b.get("name")).and_then(Value::as_str)
                    == Some("ortho-75")
        })
        .times(1)
        .returning(|_, _, _, _, _| Ok(ok(json!({ "_id": "u-new", "name": "ortho-75" }))));

    let workflow = Workflow::from_value(
        "wf",
        json!({
            "workflow": {
                "steps": {
                    "create": {
                        "actions": [ {
                            "type": "create-entity",
                            "entity_type": "upload",
                            "body_parameters": { "name": "{params.layer}-{params.zone}" }
                        } ]
                    }
                }
            }
        }),
    );

    let created = workflow
        .run_step(
            "create",
            &client(requester),
            &registry(json!({ "layer": "ortho", "zone": "75" })),
            &ResolveContext::default(),
            None,
        )
        .await
        .expect("step ran");
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].id(), "u-new");
}

#[tokio::test]
async fn delete_entity_actions_drive_the_delete_engine() {
    let mut requester = MockRequester::new();
    requester
        .expect_route_request()
        .withf(|route, _, _, _, _| route == "offering_get")
        .times(1)
        .returning(|_, _, _, _, _| Ok(ok(json!({ "_id": "o1" }))));
    requester
        .expect_route_request()
        .withf(|route, params, method, _, _| {
            route == "offering_delete"
                && params.get("offering").map(String::as_str) == Some("o1")
                && *method == Method::Delete
        })
        .times(1)
        .returning(|_, _, _, _, _| Ok(ok(Value::Null)));

    let workflow = Workflow::from_value(
        "wf",
        json!({
            "workflow": {
                "steps": {
                    "cleanup": {
                        "actions": [ {
                            "type": "delete-entity",
                            "entity_type": "offering",
                            "entity_id": "o1"
                        } ]
                    }
                }
            }
        }),
    );

    let created = workflow
        .run_step(
            "cleanup",
            &client(requester),
            &registry(json!({})),
            &ResolveContext::default(),
            None,
        )
        .await
        .expect("step ran");
    assert!(created.is_empty());
}

#[tokio::test]
async fn definitions_broken_by_resolution_name_step_and_index() {
    let workflow = Workflow::from_value(
        "wf",
        json!({
            "workflow": {
                "steps": {
                    "bad": {
                        "actions": [ {
                            "type": "create-entity",
                            "entity_type": "upload",
                            "body_parameters": { "name": "{params.quoted}" }
                        } ]
                    }
                }
            }
        }),
    );

    let error = workflow
        .run_step(
            "bad",
            &client(MockRequester::new()),
            &registry(json!({ "quoted": "oh\"no" })),
            &ResolveContext::default(),
            None,
        )
        .await
        .expect_err("must fail");
    match error {
        WorkflowError::InvalidAfterResolution { context, index, .. } => {
            assert_eq!(context, "bad");
            assert_eq!(index, 0);
        }
        other => panic!("unexpected error: {other}"),
    }
}
