use chrono::{TimeZone, Utc};
use searchstate_core::{
    ComparisonId, Context, Domain, FieldDef, FieldType, FilterId, FilterKind, GroupType, PeriodId,
};
use searchstate_store::{SearchConfig, SearchStore};
use serde_json::json;
use std::collections::BTreeMap;

fn fields() -> BTreeMap<String, FieldDef> {
    BTreeMap::from([
        (
            "date_order".to_string(),
            FieldDef {
                field_type: FieldType::Date,
                string: "Order Date".into(),
                sortable: true,
            },
        ),
        (
            "create_date".to_string(),
            FieldDef {
                field_type: FieldType::Datetime,
                string: "Created On".into(),
                sortable: true,
            },
        ),
        (
            "note".to_string(),
            FieldDef {
                field_type: FieldType::Char,
                string: "Note".into(),
                sortable: false,
            },
        ),
    ])
}

fn config() -> SearchConfig {
    SearchConfig {
        fields: fields(),
        // 2024-08-15, a Thursday
        reference: Some(Utc.with_ymd_and_hms(2024, 8, 15, 12, 0, 0).unwrap()),
        ..SearchConfig::default()
    }
}

fn time_range_filter(store: &SearchStore, field: &str) -> FilterId {
    store
        .filters()
        .find(|f| matches!(&f.kind, FilterKind::TimeRange { field_name, .. } if field_name == field))
        .map(|f| f.id)
        .unwrap_or_else(|| panic!("no time range on {field:?}"))
}

#[test]
fn one_time_range_filter_per_sortable_date_field() {
    let store = SearchStore::new(config()).expect("build store");
    let ranges: Vec<&str> = store
        .filters()
        .filter_map(|f| match &f.kind {
            FilterKind::TimeRange { field_name, .. } => Some(field_name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(ranges.len(), 2);
    assert!(ranges.contains(&"date_order"));
    assert!(ranges.contains(&"create_date"));
}

#[test]
fn activation_surfaces_resolved_ranges() {
    let mut store = SearchStore::new(config()).expect("build store");
    let filter_id = time_range_filter(&store, "date_order");
    store
        .activate_time_range(filter_id, Some(PeriodId::LastWeek), Some(ComparisonId::PreviousPeriod))
        .expect("activate");

    let time_ranges = store
        .get_query()
        .expect("compose")
        .time_ranges
        .expect("time ranges");
    assert_eq!(time_ranges.field, "date_order");
    assert_eq!(time_ranges.description, "Last Week");
    assert_eq!(
        time_ranges.range,
        Domain::parse(r#"["&",["date_order",">=","2024-08-05"],["date_order","<","2024-08-12"]]"#)
            .unwrap()
    );
    assert_eq!(
        time_ranges.comparison_range,
        Some(
            Domain::parse(
                r#"["&",["date_order",">=","2024-07-29"],["date_order","<","2024-08-05"]]"#
            )
            .unwrap()
        )
    );
    assert_eq!(
        time_ranges.comparison_description.as_deref(),
        Some("Previous Period")
    );
}

#[test]
fn datetime_ranges_carry_time_bounds() {
    let mut store = SearchStore::new(config()).expect("build store");
    let filter_id = time_range_filter(&store, "create_date");
    store
        .activate_time_range(filter_id, Some(PeriodId::Today), None)
        .expect("activate");

    let time_ranges = store
        .get_query()
        .expect("compose")
        .time_ranges
        .expect("time ranges");
    let bounds: Vec<&str> = time_ranges
        .range
        .conditions()
        .filter_map(|c| c.value().as_str())
        .collect();
    assert_eq!(bounds, vec!["2024-08-15 00:00:00", "2024-08-16 00:00:00"]);
    assert!(time_ranges.comparison_range.is_none());
}

#[test]
fn activation_is_exclusive_within_the_group() {
    let mut store = SearchStore::new(config()).expect("build store");
    let order = time_range_filter(&store, "date_order");
    let created = time_range_filter(&store, "create_date");
    let group_id = store.group_of_type(GroupType::TimeRange).expect("group");

    store
        .activate_time_range(order, Some(PeriodId::ThisMonth), None)
        .expect("activate order");
    store
        .activate_time_range(created, Some(PeriodId::ThisYear), None)
        .expect("activate created");

    let group = store.group(group_id).expect("group");
    assert_eq!(group.active.len(), 1);
    assert_eq!(group.active[0].filter_id, created);
    // the group joined the query exactly once
    assert_eq!(store.query().iter().filter(|g| **g == group_id).count(), 1);
}

#[test]
fn default_time_range_comes_from_the_action_context() {
    let mut config = config();
    config.action_context = Context(
        json!({
            "time_ranges": {"field": "date_order", "range": "last_month"}
        })
        .as_object()
        .unwrap()
        .clone(),
    );
    let store = SearchStore::new(config).expect("build store");
    let time_ranges = store
        .get_query()
        .expect("compose")
        .time_ranges
        .expect("time ranges");
    assert_eq!(time_ranges.field, "date_order");
    assert_eq!(time_ranges.description, "Last Month");
    // the bootstrap key is consumed, not leaked into the composed context
    assert!(store.get_query().expect("compose").context.get("time_ranges").is_none());
}

#[test]
fn time_ranges_do_not_contribute_to_the_domain() {
    let mut store = SearchStore::new(config()).expect("build store");
    let filter_id = time_range_filter(&store, "date_order");
    store
        .activate_time_range(filter_id, Some(PeriodId::ThisMonth), None)
        .expect("activate");
    let query = store.get_query().expect("compose");
    assert!(query.domain.is_empty());
}
