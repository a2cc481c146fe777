use chrono::{TimeZone, Utc};
use searchstate_core::{FieldDef, FieldType, FilterId, FilterKind, GroupType};
use searchstate_store::{ArchNode, SearchConfig, SearchStore};
use std::collections::BTreeMap;

fn fields() -> BTreeMap<String, FieldDef> {
    BTreeMap::from([
        (
            "state".to_string(),
            FieldDef {
                field_type: FieldType::Selection,
                string: "Status".into(),
                sortable: true,
            },
        ),
        (
            "country_id".to_string(),
            FieldDef {
                field_type: FieldType::Many2one,
                string: "Country".into(),
                sortable: true,
            },
        ),
        (
            "name".to_string(),
            FieldDef {
                field_type: FieldType::Char,
                string: "Name".into(),
                sortable: false,
            },
        ),
    ])
}

fn arch() -> ArchNode {
    let mut arch = ArchNode::empty();
    arch.children = vec![
        ArchNode::new(
            "filter",
            &[("name", "won"), ("string", "Won"), ("domain", r#"[["state","=","won"]]"#)],
        ),
        ArchNode::new(
            "filter",
            &[("name", "lost"), ("string", "Lost"), ("domain", r#"[["state","=","lost"]]"#)],
        ),
        ArchNode::new("separator", &[]),
        ArchNode::new(
            "filter",
            &[
                ("name", "by_country"),
                ("string", "Country"),
                ("context", r#"{"group_by":"country_id"}"#),
            ],
        ),
        ArchNode::new("field", &[("name", "name")]),
    ];
    arch
}

fn store() -> SearchStore {
    SearchStore::new(SearchConfig {
        arch: arch(),
        fields: fields(),
        reference: Some(Utc.with_ymd_and_hms(2024, 8, 15, 12, 0, 0).unwrap()),
        ..SearchConfig::default()
    })
    .expect("build store")
}

fn find(store: &SearchStore, description: &str) -> FilterId {
    store
        .filters()
        .find(|f| f.description == description)
        .map(|f| f.id)
        .unwrap_or_else(|| panic!("no filter named {description:?}"))
}

/// Every group must be active exactly when its id is queried.
fn assert_group_query_consistency(store: &SearchStore) {
    for group_type in [
        GroupType::Filter,
        GroupType::GroupBy,
        GroupType::Favorite,
        GroupType::TimeRange,
        GroupType::Field,
    ] {
        if let Some(group_id) = store.group_of_type(group_type) {
            let group = store.group(group_id).expect("group");
            assert_eq!(
                group.is_active(),
                store.query().contains(&group_id),
                "{group_id} inconsistent with query"
            );
        }
    }
    let mut seen = Vec::new();
    for group_id in store.query() {
        assert!(!seen.contains(group_id), "{group_id} queried twice");
        seen.push(*group_id);
    }
}

#[test]
fn toggle_is_its_own_inverse() {
    let mut store = store();
    let won = find(&store, "Won");
    let group_id = store.filter(won).expect("filter").group_id;
    let before = store.group(group_id).expect("group").active.clone();

    store.toggle_filter(won).expect("first toggle");
    assert!(store.group(group_id).unwrap().contains(won));
    store.toggle_filter(won).expect("second toggle");
    assert_eq!(store.group(group_id).unwrap().active, before);
}

#[test]
fn group_joins_and_leaves_query_with_activation() {
    let mut store = store();
    let won = find(&store, "Won");
    let lost = find(&store, "Lost");
    let group_id = store.filter(won).expect("filter").group_id;

    store.toggle_filter(won).expect("toggle won");
    assert!(store.query().contains(&group_id));
    store.toggle_filter(lost).expect("toggle lost");
    // both active in one group, queried once
    assert_eq!(store.query().iter().filter(|g| **g == group_id).count(), 1);
    store.toggle_filter(won).expect("untoggle won");
    assert!(store.query().contains(&group_id));
    store.toggle_filter(lost).expect("untoggle lost");
    assert!(!store.query().contains(&group_id));
}

#[test]
fn consistency_holds_across_action_sequences() {
    let mut store = store();
    let won = find(&store, "Won");
    let lost = find(&store, "Lost");
    let by_country = find(&store, "Country");

    assert_group_query_consistency(&store);
    store.toggle_filter(won).expect("toggle");
    assert_group_query_consistency(&store);
    store.toggle_filter(by_country).expect("toggle group-by");
    assert_group_query_consistency(&store);
    store.toggle_filter(lost).expect("toggle");
    assert_group_query_consistency(&store);
    store.toggle_filter(won).expect("untoggle");
    assert_group_query_consistency(&store);
    store.clear_query().expect("clear");
    assert_group_query_consistency(&store);
    assert!(store.query().is_empty());
}

#[test]
fn activation_order_is_preserved() {
    let mut store = store();
    let won = find(&store, "Won");
    let by_country = find(&store, "Country");
    let filter_group = store.filter(won).expect("filter").group_id;
    let group_by_group = store.filter(by_country).expect("filter").group_id;

    store.toggle_filter(by_country).expect("toggle");
    store.toggle_filter(won).expect("toggle");
    assert_eq!(store.query(), &[group_by_group, filter_group]);

    let facets = store.facets();
    assert_eq!(facets.len(), 2);
    assert_eq!(facets[0].group_type, GroupType::GroupBy);
    assert_eq!(facets[1].filters[0].description, "Won");
}

#[test]
fn deactivate_group_clears_unconditionally() {
    let mut store = store();
    let won = find(&store, "Won");
    let lost = find(&store, "Lost");
    let group_id = store.filter(won).expect("filter").group_id;

    store.toggle_filter(won).expect("toggle");
    store.toggle_filter(lost).expect("toggle");
    store.deactivate_group(group_id).expect("deactivate");
    assert!(!store.group(group_id).unwrap().is_active());
    assert!(!store.query().contains(&group_id));
}

#[test]
fn autocomplete_values_reset_on_group_deactivation() {
    let mut store = store();
    let name_field = find(&store, "name");
    let group_id = store.filter(name_field).expect("filter").group_id;

    store
        .toggle_auto_completion_filter(
            name_field,
            vec![searchstate_core::AutoCompleteValue {
                label: "acme".into(),
                value: serde_json::Value::String("acme".into()),
            }],
        )
        .expect("autocomplete");
    assert!(store.group(group_id).unwrap().contains(name_field));

    store.deactivate_group(group_id).expect("deactivate");
    match &store.filter(name_field).expect("filter").kind {
        FilterKind::Field { values, .. } => assert!(values.is_empty()),
        other => panic!("unexpected kind {other:?}"),
    }
}

#[test]
fn unknown_ids_are_rejected() {
    let mut store = store();
    let err = store.toggle_filter(FilterId(9999)).expect_err("must fail");
    assert!(matches!(err, searchstate_core::StoreError::UnknownFilter(_)));
}
