use chrono::{TimeZone, Utc};
use searchstate_core::{
    DateOptionId, FieldDef, FieldType, FilterId, FilterKind, Interval, StoreError,
};
use searchstate_store::{ArchNode, FilterOption, SearchConfig, SearchStore};
use std::collections::BTreeMap;

fn fields() -> BTreeMap<String, FieldDef> {
    BTreeMap::from([(
        "date_order".to_string(),
        FieldDef {
            field_type: FieldType::Date,
            string: "Order Date".into(),
            sortable: true,
        },
    )])
}

fn arch() -> ArchNode {
    let mut arch = ArchNode::empty();
    arch.children = vec![
        ArchNode::new(
            "filter",
            &[("name", "order_date"), ("string", "Order Date"), ("date", "date_order")],
        ),
        ArchNode::new("separator", &[]),
        ArchNode::new(
            "filter",
            &[
                ("name", "by_week"),
                ("string", "Week"),
                ("context", r#"{"group_by":"date_order:week"}"#),
            ],
        ),
    ];
    arch
}

fn store() -> SearchStore {
    SearchStore::new(SearchConfig {
        arch: arch(),
        fields: fields(),
        // 2024-08-15, so this_month resolves to August 2024
        reference: Some(Utc.with_ymd_and_hms(2024, 8, 15, 12, 0, 0).unwrap()),
        ..SearchConfig::default()
    })
    .expect("build store")
}

fn date_filter(store: &SearchStore) -> FilterId {
    store
        .filters()
        .find(|f| matches!(f.kind, FilterKind::Predicate { date: Some(_), .. }))
        .map(|f| f.id)
        .expect("date filter")
}

fn current_options(store: &SearchStore, filter_id: FilterId) -> Vec<DateOptionId> {
    match &store.filter(filter_id).expect("filter").kind {
        FilterKind::Predicate {
            date: Some(opts), ..
        } => opts.current.clone(),
        other => panic!("unexpected kind {other:?}"),
    }
}

fn bound_values(store: &SearchStore) -> Vec<String> {
    store
        .get_query()
        .expect("compose")
        .domain
        .conditions()
        .map(|c| c.value().as_str().unwrap_or_default().to_string())
        .collect()
}

#[test]
fn default_activation_pairs_with_this_year() {
    let mut store = store();
    let filter_id = date_filter(&store);
    store
        .toggle_filter_with_options(filter_id, None)
        .expect("toggle");

    let current = current_options(&store, filter_id);
    assert!(current.contains(&DateOptionId::ThisMonth));
    assert!(current.contains(&DateOptionId::ThisYear));
    // exactly one resolved clause: this_year + this_month
    assert_eq!(bound_values(&store), vec!["2024-08-01", "2024-09-01"]);
}

#[test]
fn two_years_one_month_or_combines_two_clauses() {
    let mut store = store();
    let filter_id = date_filter(&store);
    store
        .toggle_filter_with_options(filter_id, None)
        .expect("toggle this_month");
    store
        .toggle_filter_with_options(filter_id, Some(FilterOption::Date(DateOptionId::LastYear)))
        .expect("add last_year");

    assert_eq!(
        bound_values(&store),
        vec!["2024-08-01", "2024-09-01", "2023-08-01", "2023-09-01"]
    );
}

#[test]
fn years_alone_stand_alone() {
    let mut store = store();
    let filter_id = date_filter(&store);
    store
        .toggle_filter_with_options(filter_id, Some(FilterOption::Date(DateOptionId::ThisYear)))
        .expect("toggle this_year");
    store
        .toggle_filter_with_options(filter_id, Some(FilterOption::Date(DateOptionId::LastYear)))
        .expect("add last_year");

    assert_eq!(
        bound_values(&store),
        vec!["2024-01-01", "2025-01-01", "2023-01-01", "2024-01-01"]
    );
}

#[test]
fn removing_last_year_clears_all_options() {
    let mut store = store();
    let filter_id = date_filter(&store);
    let group_id = store.filter(filter_id).expect("filter").group_id;
    store
        .toggle_filter_with_options(filter_id, None)
        .expect("toggle");
    // current is [this_month, this_year]; dropping the year orphans the month
    store
        .toggle_filter_with_options(filter_id, Some(FilterOption::Date(DateOptionId::ThisYear)))
        .expect("drop year");

    assert!(current_options(&store, filter_id).is_empty());
    assert!(!store.group(group_id).expect("group").contains(filter_id));
    assert!(!store.query().contains(&group_id));
}

#[test]
fn removing_last_option_deactivates_filter() {
    let mut store = store();
    let filter_id = date_filter(&store);
    let group_id = store.filter(filter_id).expect("filter").group_id;
    store
        .toggle_filter_with_options(filter_id, Some(FilterOption::Date(DateOptionId::LastYear)))
        .expect("toggle");
    store
        .toggle_filter_with_options(filter_id, Some(FilterOption::Date(DateOptionId::LastYear)))
        .expect("untoggle");

    assert!(!store.group(group_id).expect("group").contains(filter_id));
    assert!(store.query().is_empty());
}

#[test]
fn group_by_intervals_are_independent_sub_activations() {
    let mut store = store();
    let by_week = store
        .filters()
        .find(|f| matches!(f.kind, FilterKind::GroupBy { .. }))
        .map(|f| f.id)
        .expect("group-by filter");

    store
        .toggle_filter_with_options(by_week, None)
        .expect("default interval");
    assert_eq!(
        store.get_query().expect("compose").group_by,
        vec!["date_order:week".to_string()]
    );

    store
        .toggle_filter_with_options(by_week, Some(FilterOption::Interval(Interval::Month)))
        .expect("add month");
    assert_eq!(
        store.get_query().expect("compose").group_by,
        vec!["date_order:week".to_string(), "date_order:month".to_string()]
    );

    store
        .toggle_filter_with_options(by_week, Some(FilterOption::Interval(Interval::Week)))
        .expect("drop week");
    assert_eq!(
        store.get_query().expect("compose").group_by,
        vec!["date_order:month".to_string()]
    );

    store
        .toggle_filter_with_options(by_week, Some(FilterOption::Interval(Interval::Month)))
        .expect("drop month");
    assert!(store.get_query().expect("compose").group_by.is_empty());
    assert!(store.query().is_empty());
}

#[test]
fn wrong_option_class_is_rejected() {
    let mut store = store();
    let filter_id = date_filter(&store);
    let err = store
        .toggle_filter_with_options(filter_id, Some(FilterOption::Interval(Interval::Month)))
        .expect_err("interval on a date filter");
    assert!(matches!(err, StoreError::InvalidFilterSpec(_)));
}
