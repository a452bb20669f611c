//! Layered configuration: overlay precedence, the merge algorithm,
//! value coercions and `${section:option}` interpolation.

use std::fs;

use serde_json::json;
use tempfile::tempdir;

use geostore::config::Config;
use geostore::error::ConfigError;

#[test]
fn defaults_load_and_interpolate_routes() {
    let config = Config::from_default().expect("default configuration");
    assert_eq!(config.get_int("store_api", "nb_limit", 0).unwrap(), 50);

    // Route templates reference ${store_api:root_url}; after loading they
    // must be concrete URLs with only the route parameters left.
    let route = config.get("routes", "upload_get").expect("route present");
    assert!(route.starts_with("https://"), "route: {route}");
    assert!(route.contains("{upload}"), "route: {route}");
    assert!(!route.contains("${"), "route: {route}");
}

#[test]
fn later_overlay_wins_at_the_leaf() {
    let mut config = Config::from_default().unwrap();
    config
        .overlay_ini("[store_api]\nnb_limit = 10\n")
        .expect("overlay");
    assert_eq!(config.get_int("store_api", "nb_limit", 0).unwrap(), 10);
    // Untouched siblings survive the merge.
    assert_eq!(
        config.get_int("store_api", "nb_limit_logs", 0).unwrap(),
        2000
    );
}

#[test]
fn toml_overlays_merge_like_ini_ones() {
    let mut config = Config::from_default().unwrap();
    config
        .overlay_toml("[delete]\nsleep_between = 0.5\n")
        .expect("overlay");
    assert_eq!(
        config.get_float("delete", "sleep_between", 0.0).unwrap(),
        0.5
    );
    assert_eq!(config.get_str("delete", "if_multi", ""), "all");
}

#[test]
fn merge_unions_sequences_and_recurses_into_mappings() {
    let old = json!({
        "section": { "kept": 1, "both": "old", "list": ["a", "b"] }
    });
    let new = json!({
        "section": { "both": "new", "added": 2, "list": ["b", "c"] }
    });
    let merged = Config::merge(&old, &new);

    assert_eq!(merged["section"]["kept"], 1);
    assert_eq!(merged["section"]["both"], "new");
    assert_eq!(merged["section"]["added"], 2);
    // Sequences union as a set: old order first, unseen new items appended.
    assert_eq!(merged["section"]["list"], json!(["a", "b", "c"]));
}

#[test]
fn merge_lets_new_win_on_type_mismatch() {
    let old = json!({ "key": { "nested": true } });
    let new = json!({ "key": "scalar" });
    assert_eq!(Config::merge(&old, &new)["key"], "scalar");
}

#[test]
fn coercions_fall_back_only_when_absent() {
    let mut config = Config::from_default().unwrap();
    config
        .overlay_ini("[section]\nflag = yes\ncount = seven\n")
        .expect("overlay");

    assert!(config.get_bool("section", "flag", false).unwrap());
    assert!(config.get_bool("section", "missing", true).unwrap());
    // A present but invalid value is an error, not the fallback.
    let error = config.get_int("section", "count", 0).unwrap_err();
    assert!(matches!(error, ConfigError::Coercion { .. }));
}

#[test]
fn files_are_read_in_order_and_missing_ones_skipped() {
    let dir = tempdir().unwrap();
    let first = dir.path().join("first.ini");
    let second = dir.path().join("second.toml");
    let missing = dir.path().join("nowhere.ini");
    fs::write(&first, "[store_api]\nnb_limit = 7\ndatastore = one\n").unwrap();
    fs::write(&second, "[store_api]\ndatastore = \"two\"\n").unwrap();

    let mut config = Config::from_default().unwrap();
    let read = config
        .read(&[first.clone(), missing, second.clone()])
        .expect("read");

    assert_eq!(read, vec![first, second]);
    assert_eq!(config.get_int("store_api", "nb_limit", 0).unwrap(), 7);
    assert_eq!(config.get_str("store_api", "datastore", ""), "two");
}

#[test]
fn unresolvable_interpolation_is_an_error() {
    let mut config = Config::from_default().unwrap();
    let error = config
        .overlay_ini("[section]\nvalue = ${nowhere:option}\n")
        .expect_err("must fail");
    assert!(matches!(error, ConfigError::Interpolation { .. }));
}

#[test]
fn same_section_interpolation_resolves() {
    let mut config = Config::from_default().unwrap();
    config
        .overlay_ini("[section]\nbase = /srv\nfull = ${base}/data\n")
        .expect("overlay");
    assert_eq!(config.get_str("section", "full", ""), "/srv/data");
}
