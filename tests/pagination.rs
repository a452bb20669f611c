//! Listing pagination: page accumulation driven by the Content-Range
//! header, fail-open behaviour, and single-page requests.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use geostore::config::Config;
use geostore::entity::EntityType;
use geostore::requester::{range_next_page, range_total_page, ApiResponse, MockRequester};
use geostore::store::StoreClient;

fn client_with_limit(requester: MockRequester, limit: usize) -> StoreClient<MockRequester> {
    let mut config = Config::from_default().expect("default configuration");
    config
        .overlay_ini(&format!("[store_api]\nnb_limit = {limit}\n"))
        .expect("overlay");
    StoreClient::new(requester, Arc::new(config))
}

fn page(range: &str, ids: std::ops::RangeInclusive<usize>) -> ApiResponse {
    let items: Vec<Value> = ids.map(|i| json!({ "_id": format!("sd{i}") })).collect();
    ApiResponse {
        status: 200,
        headers: HashMap::from([("Content-Range".to_string(), range.to_string())]),
        body: Value::Array(items),
    }
}

fn no_filters() -> HashMap<String, String> {
    HashMap::new()
}

#[tokio::test]
async fn twelve_items_with_limit_ten_take_exactly_two_requests() {
    let mut requester = MockRequester::new();
    requester
        .expect_route_request()
        .withf(|route, _, _, query, _| {
            route == "stored_data_list"
                && query.contains(&("page".to_string(), "1".to_string()))
                && query.contains(&("limit".to_string(), "10".to_string()))
        })
        .times(1)
        .returning(|_, _, _, _, _| Ok(page("1-10/12", 1..=10)));
    requester
        .expect_route_request()
        .withf(|_, _, _, query, _| query.contains(&("page".to_string(), "2".to_string())))
        .times(1)
        .returning(|_, _, _, _, _| Ok(page("11-12/12", 11..=12)));

    let entities = client_with_limit(requester, 10)
        .list(EntityType::StoredData, &no_filters(), &no_filters(), None, None)
        .await
        .expect("listing");

    let ids: Vec<&str> = entities.iter().map(|e| e.id()).collect();
    let expected: Vec<String> = (1..=12).map(|i| format!("sd{i}")).collect();
    assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
}

#[tokio::test]
async fn absent_range_header_stops_after_one_request() {
    let mut requester = MockRequester::new();
    requester
        .expect_route_request()
        .times(1)
        .returning(|_, _, _, _, _| {
            Ok(ApiResponse {
                status: 200,
                headers: HashMap::new(),
                body: json!([{ "_id": "sd1" }]),
            })
        });

    let entities = client_with_limit(requester, 10)
        .list(EntityType::StoredData, &no_filters(), &no_filters(), None, None)
        .await
        .expect("listing");
    assert_eq!(entities.len(), 1);
}

#[tokio::test]
async fn unparsable_range_header_stops_after_one_request() {
    let mut requester = MockRequester::new();
    requester
        .expect_route_request()
        .times(1)
        .returning(|_, _, _, _, _| Ok(page("garbage", 1..=10)));

    let entities = client_with_limit(requester, 10)
        .list(EntityType::StoredData, &no_filters(), &no_filters(), None, None)
        .await
        .expect("listing");
    assert_eq!(entities.len(), 10);
}

#[tokio::test]
async fn explicit_page_issues_exactly_one_request() {
    let mut requester = MockRequester::new();
    requester
        .expect_route_request()
        .withf(|_, _, _, query, _| query.contains(&("page".to_string(), "3".to_string())))
        .times(1)
        .returning(|_, _, _, _, _| Ok(page("21-30/120", 21..=30)));

    let entities = client_with_limit(requester, 10)
        .list(EntityType::StoredData, &no_filters(), &no_filters(), Some(3), None)
        .await
        .expect("listing");
    assert_eq!(entities.len(), 10);
}

#[tokio::test]
async fn tag_filters_become_bracketed_query_params() {
    let mut requester = MockRequester::new();
    requester
        .expect_route_request()
        .withf(|_, _, _, query, _| {
            query.contains(&("tags[zone]".to_string(), "75".to_string()))
                && query.contains(&("name".to_string(), "ortho".to_string()))
        })
        .times(1)
        .returning(|_, _, _, _, _| Ok(page("1-1/1", 1..=1)));

    let infos = HashMap::from([("name".to_string(), "ortho".to_string())]);
    let tags = HashMap::from([("zone".to_string(), "75".to_string())]);
    let entities = client_with_limit(requester, 10)
        .list(EntityType::StoredData, &infos, &tags, None, None)
        .await
        .expect("listing");
    assert_eq!(entities.len(), 1);
}

#[test]
fn range_parsing_is_fail_open() {
    assert!(range_next_page(Some("1-10/12"), 10));
    assert!(!range_next_page(Some("1-12/12"), 12));
    assert!(!range_next_page(Some("not a range"), 10));
    assert!(!range_next_page(None, 10));
    // Declared total already collected, whatever the bounds say.
    assert!(!range_next_page(Some("1-10/10"), 10));
}

#[test]
fn total_pages_round_up() {
    assert_eq!(range_total_page(Some("1-10/12"), 10), 2);
    assert_eq!(range_total_page(Some("1-10/100"), 10), 10);
    assert_eq!(range_total_page(Some("1-10/101"), 10), 11);
    assert_eq!(range_total_page(None, 10), 1);
}
