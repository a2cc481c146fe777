use crate::arch::{self, ArchContext, ArchNode};
use crate::date;
use chrono::{DateTime, Utc};
use searchstate_core::{
    ActiveFilter, AutoCompleteValue, ComparisonId, Context, DateOptionId, Domain, ExportedState,
    Facet, FacetFilter, FieldDef, FieldType, Filter, FilterId, FilterKind, FilterSpec, Group,
    GroupId, GroupType, Interval, IntervalOptions, OrderedBy, PeriodId, Result, SearchQuery,
    StoreError, TimeRangeData,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use tracing::debug;

/// A server-persisted favorite as delivered with the view description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoriteDef {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub context: Context,
    #[serde(default)]
    pub sort: Vec<String>,
    #[serde(default)]
    pub user_id: Option<u64>,
    #[serde(default)]
    pub is_default: bool,
}

/// A programmatic filter injected by the surrounding action, active from the
/// start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicFilterDef {
    pub description: String,
    pub domain: Domain,
}

/// User input for saving the current query as a favorite.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewFavorite {
    pub description: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default)]
    pub user_id: Option<u64>,
    #[serde(default)]
    pub server_side_id: Option<u64>,
}

/// What the caller persists server side for a newly created favorite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FavoritePayload {
    pub name: String,
    pub domain: String,
    pub context: Context,
    pub group_bys: Vec<String>,
    pub sort: Vec<String>,
    pub is_default: bool,
    pub user_id: Option<u64>,
}

/// Option argument of `toggle_filter_with_options`: a date period for
/// predicate filters, an interval for group-bys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterOption {
    Date(DateOptionId),
    Interval(Interval),
}

/// Runtime copy of a filter for menu rendering.
#[derive(Debug, Clone, Serialize)]
pub struct FilterView {
    pub id: FilterId,
    pub description: String,
    pub group_id: GroupId,
    pub group_number: u32,
    pub is_default: bool,
    pub is_active: bool,
    pub options: Vec<OptionView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionView {
    pub id: String,
    pub description: String,
    pub group_number: u8,
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct TimeRangeDefaults {
    field: String,
    range: PeriodId,
    #[serde(default, alias = "comparisonRange")]
    comparison_range: Option<ComparisonId>,
}

/// Construction inputs, one set per search-view lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub action_domain: Domain,
    pub action_context: Context,
    pub action_group_by: Vec<String>,
    pub arch: ArchNode,
    pub fields: BTreeMap<String, FieldDef>,
    pub favorites: Vec<FavoriteDef>,
    pub dynamic_filters: Vec<DynamicFilterDef>,
    pub activate_default_favorite: bool,
    /// Reference instant for all period resolution; defaults to now.
    pub reference: Option<DateTime<Utc>>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            action_domain: Domain::empty(),
            action_context: Context::new(),
            action_group_by: Vec::new(),
            arch: ArchNode::empty(),
            fields: BTreeMap::new(),
            favorites: Vec::new(),
            dynamic_filters: Vec::new(),
            activate_default_favorite: true,
            reference: None,
        }
    }
}

/// The search/filter state store. Exclusively owns its filters, groups and
/// query; every mutation flows through a named action that validates before
/// touching state, and every read derives fresh from current state.
#[derive(Debug)]
pub struct SearchStore {
    action_domain: Domain,
    action_context: Context,
    action_group_by: Vec<String>,
    fields: BTreeMap<String, FieldDef>,
    search_defaults: BTreeMap<String, JsonValue>,
    reference: DateTime<Utc>,
    filters: BTreeMap<FilterId, Filter>,
    groups: BTreeMap<GroupId, Group>,
    query: Vec<GroupId>,
    next_filter_id: u64,
    next_group_id: u64,
    group_number: u32,
}

impl SearchStore {
    pub fn new(config: SearchConfig) -> Result<Self> {
        let SearchConfig {
            action_domain,
            mut action_context,
            action_group_by,
            arch,
            fields,
            favorites,
            dynamic_filters,
            activate_default_favorite,
            reference,
        } = config;

        let search_defaults = extract_search_defaults(&mut action_context);
        let time_range_defaults = extract_time_range_defaults(&mut action_context)?;

        let mut store = SearchStore {
            action_domain,
            action_context,
            action_group_by,
            fields,
            search_defaults,
            reference: reference.unwrap_or_else(Utc::now),
            filters: BTreeMap::new(),
            groups: BTreeMap::new(),
            query: Vec::new(),
            next_filter_id: 0,
            next_group_id: 0,
            group_number: 1,
        };

        store.add_arch_filters(&arch)?;
        store.add_dynamic_filters(dynamic_filters)?;
        store.add_favorites(favorites)?;
        store.add_time_ranges()?;
        store.activate_defaults(activate_default_favorite, time_range_defaults)?;
        Ok(store)
    }

    /// Rebuilds a store around a previously exported state, for cross-view
    /// transfer within the same action. The imported state is validated
    /// against the group/query invariants before being installed.
    pub fn with_state(config: SearchConfig, state: ExportedState) -> Result<Self> {
        let SearchConfig {
            action_domain,
            mut action_context,
            action_group_by,
            fields,
            reference,
            ..
        } = config;
        let search_defaults = extract_search_defaults(&mut action_context);

        for filter in state.filters.values() {
            if !state.groups.contains_key(&filter.group_id) {
                return Err(StoreError::UnknownGroup(filter.group_id));
            }
        }
        for group in state.groups.values() {
            for entry in &group.active {
                let filter = state
                    .filters
                    .get(&entry.filter_id)
                    .ok_or(StoreError::UnknownFilter(entry.filter_id))?;
                if filter.group_id != group.id {
                    return Err(StoreError::InvalidFilterSpec(format!(
                        "{} is active in {} but belongs to {}",
                        entry.filter_id, group.id, filter.group_id
                    )));
                }
            }
        }
        let mut seen = Vec::new();
        for group_id in &state.query {
            let group = state
                .groups
                .get(group_id)
                .ok_or(StoreError::UnknownGroup(*group_id))?;
            if seen.contains(group_id) {
                return Err(StoreError::InvalidFilterSpec(format!(
                    "{group_id} appears twice in the query"
                )));
            }
            seen.push(*group_id);
            if !group.is_active() {
                return Err(StoreError::InvalidFilterSpec(format!(
                    "{group_id} is queried but has no active filters"
                )));
            }
        }
        for group in state.groups.values() {
            if group.is_active() && !state.query.contains(&group.id) {
                return Err(StoreError::InvalidFilterSpec(format!(
                    "{} has active filters but is not queried",
                    group.id
                )));
            }
        }

        let next_filter_id = state.filters.keys().map(|id| id.0 + 1).max().unwrap_or(0);
        let next_group_id = state.groups.keys().map(|id| id.0 + 1).max().unwrap_or(0);
        let group_number = state
            .filters
            .values()
            .map(|f| f.group_number + 1)
            .max()
            .unwrap_or(1);

        Ok(SearchStore {
            action_domain,
            action_context,
            action_group_by,
            fields,
            search_defaults,
            reference: reference.unwrap_or_else(Utc::now),
            filters: state.filters,
            groups: state.groups,
            query: state.query,
            next_filter_id,
            next_group_id,
            group_number,
        })
    }

    //-------------------------------------------------------------------
    // Actions
    //-------------------------------------------------------------------

    /// Creates one group and one filter per spec inside it. Every spec's
    /// kind must match the group type; nothing is created otherwise.
    pub fn create_group_of_filters(
        &mut self,
        specs: Vec<FilterSpec>,
        group_type: GroupType,
    ) -> Result<GroupId> {
        for spec in &specs {
            if spec.kind.group_type() != group_type {
                return Err(StoreError::InvalidFilterSpec(format!(
                    "{} spec in a {} group",
                    spec.kind.group_type(),
                    group_type
                )));
            }
        }
        let group_id = self.alloc_group(group_type);
        let count = specs.len();
        for spec in specs {
            self.insert_filter(spec, group_id);
        }
        debug!(%group_id, %group_type, count, "created group of filters");
        Ok(group_id)
    }

    /// User-driven custom filter creation: all specs become one new active
    /// group of type `filter`.
    pub fn create_new_filters(&mut self, specs: Vec<FilterSpec>) -> Result<Option<GroupId>> {
        if specs.is_empty() {
            return Ok(None);
        }
        for spec in &specs {
            if spec.kind.group_type() != GroupType::Filter {
                return Err(StoreError::InvalidFilterSpec(
                    "custom filters must be predicate filters".into(),
                ));
            }
        }
        let group_number = self.group_number;
        self.group_number += 1;
        let group_id = self.alloc_group(GroupType::Filter);
        self.query.push(group_id);
        for mut spec in specs {
            spec.group_number = group_number;
            let filter_id = self.insert_filter(spec, group_id);
            if let Some(group) = self.groups.get_mut(&group_id) {
                group.active.push(ActiveFilter::plain(filter_id));
            }
        }
        debug!(%group_id, "created custom filter group");
        Ok(Some(group_id))
    }

    /// User-driven group-by creation on a groupable field; date and datetime
    /// fields activate through their default interval.
    pub fn create_new_group_by(&mut self, field_name: &str) -> Result<FilterId> {
        let field = self
            .fields
            .get(field_name)
            .ok_or_else(|| StoreError::UnknownField(field_name.to_string()))?
            .clone();
        if !field.field_type.groupable() {
            return Err(StoreError::InvalidFilterSpec(format!(
                "field {field_name:?} cannot be grouped on"
            )));
        }
        let group_id = match self.group_of_type(GroupType::GroupBy) {
            Some(id) => id,
            None => self.alloc_group(GroupType::GroupBy),
        };
        let group_number = self.group_number;
        self.group_number += 1;
        let intervals = field.field_type.is_date().then(|| IntervalOptions {
            default_interval: Interval::DEFAULT,
            current: Vec::new(),
        });
        let has_intervals = intervals.is_some();
        let spec = FilterSpec {
            description: field.string.clone(),
            is_default: false,
            default_rank: 100,
            invisible: false,
            group_number,
            kind: FilterKind::GroupBy {
                field_name: field_name.to_string(),
                field_type: field.field_type,
                intervals,
            },
        };
        let filter_id = self.insert_filter(spec, group_id);
        if has_intervals {
            self.toggle_filter_with_options(filter_id, None)?;
        } else {
            self.toggle_filter(filter_id)?;
        }
        Ok(filter_id)
    }

    /// Saves the current query as a favorite: snapshots the user-composed
    /// domain, context, group-bys and ordering, then clears the query and
    /// activates the new favorite. Server persistence is the caller's job;
    /// the returned payload is what it should persist.
    pub fn create_new_favorite(
        &mut self,
        new_favorite: NewFavorite,
    ) -> Result<(FilterId, FavoritePayload)> {
        if new_favorite.description.trim().is_empty() {
            return Err(StoreError::InvalidFilterSpec(
                "a favorite needs a name".into(),
            ));
        }
        let exists = self.filters.values().any(|f| {
            matches!(f.kind, FilterKind::Favorite { .. }) && f.description == new_favorite.description
        });
        if exists {
            return Err(StoreError::DuplicateFavorite(new_favorite.description));
        }

        // snapshot before any mutation; domain evaluation errors abort here
        let domain = self.user_domain()?.to_string_form();
        let mut context = self.user_context();
        context.strip_transient();
        let group_bys = self.user_group_bys();
        let ordered_by = self.composed_ordered_by();
        let user_id = if new_favorite.is_shared {
            None
        } else {
            new_favorite.user_id
        };
        let payload = FavoritePayload {
            name: new_favorite.description.clone(),
            domain: domain.clone(),
            context: context.clone(),
            group_bys: group_bys.clone(),
            sort: ordered_by.iter().map(OrderedBy::to_sort_term).collect(),
            is_default: new_favorite.is_default,
            user_id,
        };

        let group_id = match self.group_of_type(GroupType::Favorite) {
            Some(id) => id,
            None => self.alloc_group(GroupType::Favorite),
        };
        let spec = FilterSpec {
            description: new_favorite.description,
            is_default: new_favorite.is_default,
            default_rank: 100,
            invisible: false,
            group_number: if new_favorite.is_shared { 2 } else { 1 },
            kind: FilterKind::Favorite {
                domain,
                context,
                group_bys,
                ordered_by,
                server_side_id: new_favorite.server_side_id,
                user_id,
                is_removable: true,
            },
        };
        let filter_id = self.insert_filter(spec, group_id);
        self.clear_query()?;
        self.toggle_filter(filter_id)?;
        debug!(%filter_id, "created favorite");
        Ok((filter_id, payload))
    }

    /// Removes a favorite from the store, deactivating it first if needed.
    /// Returns the server-side id the caller should delete remotely.
    pub fn delete_favorite(&mut self, filter_id: FilterId) -> Result<Option<u64>> {
        let filter = self.filter_ref(filter_id)?;
        let server_side_id = match &filter.kind {
            FilterKind::Favorite {
                server_side_id,
                is_removable,
                ..
            } => {
                if !*is_removable {
                    return Err(StoreError::InvalidFilterSpec(format!(
                        "{filter_id} cannot be removed"
                    )));
                }
                *server_side_id
            }
            _ => {
                return Err(StoreError::InvalidFilterSpec(format!(
                    "{filter_id} is not a favorite"
                )))
            }
        };
        let group_id = filter.group_id;
        if self.group_ref(group_id)?.contains(filter_id) {
            self.toggle_filter(filter_id)?;
        }
        self.filters.remove(&filter_id);
        debug!(%filter_id, "deleted favorite");
        Ok(server_side_id)
    }

    /// The single idempotent toggle primitive: activates an inactive filter
    /// in its group (joining the query if the group was inactive), and
    /// deactivates an active one (leaving the query when the group empties).
    pub fn toggle_filter(&mut self, filter_id: FilterId) -> Result<()> {
        let group_id = self.filter_ref(filter_id)?.group_id;
        let group = self
            .groups
            .get_mut(&group_id)
            .ok_or(StoreError::UnknownGroup(group_id))?;
        if let Some(index) = group.active.iter().position(|a| a.filter_id == filter_id) {
            group.active.remove(index);
            if group.active.is_empty() {
                self.query.retain(|g| *g != group_id);
            }
            debug!(%filter_id, %group_id, "filter deactivated");
        } else {
            if group.group_type == GroupType::Favorite {
                // at most one favorite is active at a time
                group.active.clear();
            }
            group.active.push(ActiveFilter::plain(filter_id));
            if !self.query.contains(&group_id) {
                self.query.push(group_id);
            }
            debug!(%filter_id, %group_id, "filter activated");
        }
        Ok(())
    }

    /// Toggles an option-bearing filter with the given option (or its
    /// default). Predicate date filters follow the year pairing rule;
    /// group-by filters treat every (filter, interval) pair as an
    /// independent sub-activation.
    pub fn toggle_filter_with_options(
        &mut self,
        filter_id: FilterId,
        option: Option<FilterOption>,
    ) -> Result<()> {
        enum Options {
            Date(DateOptionId),
            Interval(Interval),
        }
        let filter = self.filter_ref(filter_id)?;
        let group_id = filter.group_id;
        let resolved = match (&filter.kind, option) {
            (FilterKind::Predicate { date: Some(opts), .. }, None) => {
                Options::Date(opts.default_option)
            }
            (FilterKind::Predicate { date: Some(_), .. }, Some(FilterOption::Date(d))) => {
                Options::Date(d)
            }
            (FilterKind::GroupBy { intervals: Some(opts), .. }, None) => {
                Options::Interval(opts.default_interval)
            }
            (FilterKind::GroupBy { intervals: Some(_), .. }, Some(FilterOption::Interval(i))) => {
                Options::Interval(i)
            }
            _ => {
                return Err(StoreError::InvalidFilterSpec(format!(
                    "{filter_id} does not accept that option"
                )))
            }
        };

        match resolved {
            Options::Date(opt) => {
                let was_active = self.group_ref(group_id)?.contains(filter_id);
                if !was_active {
                    self.toggle_filter(filter_id)?;
                    let current = self.date_options_mut(filter_id)?;
                    current.push(opt);
                    if !current.iter().any(|o| o.is_year()) {
                        current.push(DateOptionId::DEFAULT_YEAR);
                    }
                } else {
                    let mut deactivate = false;
                    {
                        let current = self.date_options_mut(filter_id)?;
                        if let Some(index) = current.iter().position(|o| *o == opt) {
                            current.remove(index);
                            if !current.iter().any(|o| o.is_year()) {
                                // sub-year options make no sense without a year
                                current.clear();
                            }
                            deactivate = current.is_empty();
                        } else {
                            current.push(opt);
                        }
                    }
                    if deactivate {
                        self.toggle_filter(filter_id)?;
                    }
                }
            }
            Options::Interval(opt) => {
                let entry = ActiveFilter {
                    filter_id,
                    option: Some(opt),
                };
                let (position, initial_len) = {
                    let group = self.group_ref(group_id)?;
                    (
                        group.active.iter().position(|a| *a == entry),
                        group.active.len(),
                    )
                };
                match position {
                    Some(index) => {
                        if let Some(group) = self.groups.get_mut(&group_id) {
                            group.active.remove(index);
                        }
                        self.interval_options_mut(filter_id)?.retain(|o| *o != opt);
                        if initial_len == 1 {
                            self.query.retain(|g| *g != group_id);
                        }
                    }
                    None => {
                        if let Some(group) = self.groups.get_mut(&group_id) {
                            group.active.push(entry);
                        }
                        self.interval_options_mut(filter_id)?.push(opt);
                        if initial_len == 0 {
                            self.query.push(group_id);
                        }
                    }
                }
            }
        }
        debug!(%filter_id, "toggled filter option");
        Ok(())
    }

    /// Search-bar autocompletion: stores the picked values on a field filter
    /// and makes sure it is active. The filter's domain is derived from the
    /// values at composition time. Non-field filters delegate to the
    /// appropriate toggle.
    pub fn toggle_auto_completion_filter(
        &mut self,
        filter_id: FilterId,
        values: Vec<AutoCompleteValue>,
    ) -> Result<()> {
        enum Target {
            Field,
            WithOptions,
            Plain,
        }
        let (group_id, target) = {
            let filter = self.filter_ref(filter_id)?;
            let target = match &filter.kind {
                FilterKind::Field { .. } => Target::Field,
                FilterKind::Predicate { date: Some(_), .. }
                | FilterKind::GroupBy {
                    intervals: Some(_), ..
                } => Target::WithOptions,
                _ => Target::Plain,
            };
            (filter.group_id, target)
        };
        match target {
            Target::Field => {
                if let Some(Filter {
                    kind: FilterKind::Field { values: stored, .. },
                    ..
                }) = self.filters.get_mut(&filter_id)
                {
                    *stored = values;
                }
                let group = self
                    .groups
                    .get_mut(&group_id)
                    .ok_or(StoreError::UnknownGroup(group_id))?;
                if !group.contains(filter_id) {
                    group.active.push(ActiveFilter::plain(filter_id));
                    if !self.query.contains(&group_id) {
                        self.query.push(group_id);
                    }
                }
                Ok(())
            }
            Target::WithOptions => self.toggle_filter_with_options(filter_id, None),
            Target::Plain => self.toggle_filter(filter_id),
        }
    }

    /// Activates a time-range filter with the given period, exclusively
    /// within its group.
    pub fn activate_time_range(
        &mut self,
        filter_id: FilterId,
        range: Option<PeriodId>,
        comparison: Option<ComparisonId>,
    ) -> Result<()> {
        let filter = self.filter_ref(filter_id)?;
        let group_id = filter.group_id;
        if !matches!(filter.kind, FilterKind::TimeRange { .. }) {
            return Err(StoreError::InvalidFilterSpec(format!(
                "{filter_id} is not a time range"
            )));
        }
        if let Some(Filter {
            kind:
                FilterKind::TimeRange {
                    range: stored_range,
                    comparison: stored_comparison,
                    ..
                },
            ..
        }) = self.filters.get_mut(&filter_id)
        {
            *stored_range = Some(range.unwrap_or(PeriodId::DEFAULT));
            *stored_comparison = comparison;
        }
        let already_active = self.group_ref(group_id)?.is_active();
        if already_active {
            if let Some(group) = self.groups.get_mut(&group_id) {
                group.active = vec![ActiveFilter::plain(filter_id)];
            }
        } else {
            self.toggle_filter(filter_id)?;
        }
        debug!(%filter_id, "activated time range");
        Ok(())
    }

    /// Clears a group unconditionally and resets the runtime state of its
    /// members (selected options, autocompletion values).
    pub fn deactivate_group(&mut self, group_id: GroupId) -> Result<()> {
        let members: Vec<FilterId> = {
            let group = self.group_ref(group_id)?;
            group.active.iter().map(|a| a.filter_id).collect()
        };
        for filter_id in members {
            if let Some(filter) = self.filters.get_mut(&filter_id) {
                match &mut filter.kind {
                    FilterKind::Predicate {
                        date: Some(opts), ..
                    } => opts.current.clear(),
                    FilterKind::GroupBy {
                        intervals: Some(opts),
                        ..
                    } => opts.current.clear(),
                    FilterKind::Field { values, .. } => values.clear(),
                    _ => {}
                }
            }
        }
        if let Some(group) = self.groups.get_mut(&group_id) {
            group.active.clear();
        }
        self.query.retain(|g| *g != group_id);
        debug!(%group_id, "group deactivated");
        Ok(())
    }

    /// Deactivates every active group, in activation order.
    pub fn clear_query(&mut self) -> Result<()> {
        for group_id in self.query.clone() {
            self.deactivate_group(group_id)?;
        }
        Ok(())
    }

    //-------------------------------------------------------------------
    // Derived reads
    //-------------------------------------------------------------------

    /// The composed query: a pure function of current state, recomputed on
    /// every call.
    pub fn get_query(&self) -> Result<SearchQuery> {
        Ok(SearchQuery {
            domain: Domain::and(&[self.action_domain.clone(), self.user_domain()?])?,
            group_by: self.composed_group_by(),
            context: self.composed_context(),
            ordered_by: self.composed_ordered_by(),
            time_ranges: self.composed_time_ranges()?,
        })
    }

    /// The user-visible chips, one per active group, in activation order.
    pub fn facets(&self) -> Vec<Facet> {
        self.query
            .iter()
            .filter_map(|group_id| self.groups.get(group_id))
            .map(|group| Facet {
                group_id: group.id,
                group_type: group.group_type,
                filters: group
                    .active
                    .iter()
                    .filter_map(|entry| {
                        self.filters.get(&entry.filter_id).map(|filter| FacetFilter {
                            filter_id: filter.id,
                            description: filter.description.clone(),
                            option: entry.option,
                        })
                    })
                    .collect(),
            })
            .collect()
    }

    /// Runtime copies of the filters of one type, with activation flags and
    /// per-option states, for menu rendering. Favorites sort by group
    /// number (owned before shared).
    pub fn filters_of_type(&self, group_type: GroupType) -> Vec<FilterView> {
        let reference = self.reference.date_naive();
        let mut views: Vec<FilterView> = self
            .filters
            .values()
            .filter(|f| f.kind.group_type() == group_type && !f.invisible)
            .map(|filter| {
                let is_active = self
                    .groups
                    .get(&filter.group_id)
                    .map(|g| g.contains(filter.id))
                    .unwrap_or(false);
                let options = match &filter.kind {
                    FilterKind::Predicate {
                        date: Some(opts), ..
                    } => date::DATE_OPTION_GENERATORS
                        .iter()
                        .map(|def| OptionView {
                            id: option_token(&def.id),
                            description: date::date_option_description(reference, def.id),
                            group_number: def.group_number,
                            is_active: opts.current.contains(&def.id),
                        })
                        .collect(),
                    FilterKind::GroupBy {
                        intervals: Some(opts),
                        ..
                    } => Interval::ALL
                        .iter()
                        .map(|interval| OptionView {
                            id: interval.as_str().to_string(),
                            description: interval_label(*interval).to_string(),
                            group_number: 1,
                            is_active: opts.current.contains(interval),
                        })
                        .collect(),
                    FilterKind::TimeRange { range, .. } => date::PERIOD_IDS
                        .iter()
                        .map(|period| OptionView {
                            id: option_token(period),
                            description: date::period_description(*period).to_string(),
                            group_number: date::period_group_number(*period),
                            is_active: *range == Some(*period),
                        })
                        .collect(),
                    _ => Vec::new(),
                };
                FilterView {
                    id: filter.id,
                    description: filter.description.clone(),
                    group_id: filter.group_id,
                    group_number: filter.group_number,
                    is_default: filter.is_default,
                    is_active,
                    options,
                }
            })
            .collect();
        if group_type == GroupType::Favorite {
            views.sort_by_key(|v| v.group_number);
        }
        views
    }

    /// Serializable `{filters, groups, query}` snapshot for cross-view
    /// transfer.
    pub fn export_state(&self) -> ExportedState {
        ExportedState {
            filters: self.filters.clone(),
            groups: self.groups.clone(),
            query: self.query.clone(),
        }
    }

    pub fn reference(&self) -> DateTime<Utc> {
        self.reference
    }

    pub fn query(&self) -> &[GroupId] {
        &self.query
    }

    pub fn filter(&self, filter_id: FilterId) -> Option<&Filter> {
        self.filters.get(&filter_id)
    }

    pub fn group(&self, group_id: GroupId) -> Option<&Group> {
        self.groups.get(&group_id)
    }

    pub fn filters(&self) -> impl Iterator<Item = &Filter> {
        self.filters.values()
    }

    pub fn group_of_type(&self, group_type: GroupType) -> Option<GroupId> {
        self.groups
            .values()
            .find(|g| g.group_type == group_type)
            .map(|g| g.id)
    }

    //-------------------------------------------------------------------
    // Composition
    //-------------------------------------------------------------------

    /// AND of the active groups' domains, in activation order, without the
    /// action base domain.
    fn user_domain(&self) -> Result<Domain> {
        let mut parts = Vec::new();
        for group_id in &self.query {
            let group = self.group_ref(*group_id)?;
            if group.group_type.contributes_domain() {
                parts.push(self.group_domain(group)?);
            }
        }
        Domain::and(&parts)
    }

    /// OR of the active filters' domains within one group.
    fn group_domain(&self, group: &Group) -> Result<Domain> {
        let mut parts = Vec::new();
        for entry in &group.active {
            let filter = self.filter_ref(entry.filter_id)?;
            parts.push(self.filter_domain(filter)?);
        }
        Domain::or(&parts)
    }

    fn filter_domain(&self, filter: &Filter) -> Result<Domain> {
        match &filter.kind {
            FilterKind::Predicate {
                date: Some(opts), ..
            } => date::date_filter_domain(
                self.reference.date_naive(),
                &opts.field_name,
                opts.field_type,
                &opts.current,
            ),
            FilterKind::Predicate { domain, .. } => Domain::parse(domain),
            FilterKind::Favorite { domain, .. } => Domain::parse(domain),
            FilterKind::Field {
                field_name, values, ..
            } => {
                let parts: Vec<Domain> = values
                    .iter()
                    .map(|v| match &v.value {
                        JsonValue::String(s) => Domain::condition(field_name, "ilike", s.clone()),
                        other => Domain::condition(field_name, "=", other.clone()),
                    })
                    .collect();
                Domain::or(&parts)
            }
            FilterKind::GroupBy { .. } | FilterKind::TimeRange { .. } => Ok(Domain::empty()),
        }
    }

    /// Group-bys contributed by active groups in activation order, without
    /// the action-level fallback.
    fn user_group_bys(&self) -> Vec<String> {
        let mut group_bys = Vec::new();
        for group_id in &self.query {
            let Some(group) = self.groups.get(group_id) else {
                continue;
            };
            if !group.group_type.contributes_group_by() {
                continue;
            }
            for entry in &group.active {
                let Some(filter) = self.filters.get(&entry.filter_id) else {
                    continue;
                };
                match &filter.kind {
                    FilterKind::GroupBy { field_name, .. } => match entry.option {
                        Some(interval) => {
                            group_bys.push(format!("{}:{}", field_name, interval.as_str()))
                        }
                        None => group_bys.push(field_name.clone()),
                    },
                    FilterKind::Favorite { group_bys: gb, .. } => {
                        group_bys.extend(gb.iter().cloned())
                    }
                    _ => {}
                }
            }
        }
        group_bys
    }

    fn composed_group_by(&self) -> Vec<String> {
        let group_bys = self.user_group_bys();
        if group_bys.is_empty() {
            self.action_group_by.clone()
        } else {
            group_bys
        }
    }

    /// Context fragments of active filters, without the action base context.
    fn user_context(&self) -> Context {
        let mut context = Context::new();
        for group_id in &self.query {
            let Some(group) = self.groups.get(group_id) else {
                continue;
            };
            for entry in &group.active {
                if let Some(filter) = self.filters.get(&entry.filter_id) {
                    context.merge(&self.filter_context(filter));
                }
            }
        }
        context
    }

    fn composed_context(&self) -> Context {
        let mut context = self.action_context.clone();
        context.merge(&self.user_context());
        context
    }

    fn filter_context(&self, filter: &Filter) -> Context {
        match &filter.kind {
            FilterKind::Predicate { context, .. } => context.clone(),
            FilterKind::Favorite { context, .. } => context.clone(),
            FilterKind::Field {
                field_name,
                field_type,
                default_value: Some(value),
                ..
            } if filter.is_default && *field_type == FieldType::Many2one => {
                // a default many2one search carries a creation default
                let value = match value {
                    JsonValue::Array(items) => items.first().cloned().unwrap_or(JsonValue::Null),
                    other => other.clone(),
                };
                let mut context = Context::new();
                context.insert(format!("default_{field_name}"), value);
                context
            }
            _ => Context::new(),
        }
    }

    fn composed_ordered_by(&self) -> Vec<OrderedBy> {
        let Some(group_id) = self.group_of_type(GroupType::Favorite) else {
            return Vec::new();
        };
        if !self.query.contains(&group_id) {
            return Vec::new();
        }
        self.groups
            .get(&group_id)
            .and_then(|group| group.active.first())
            .and_then(|entry| self.filters.get(&entry.filter_id))
            .and_then(|filter| match &filter.kind {
                FilterKind::Favorite { ordered_by, .. } => Some(ordered_by.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn composed_time_ranges(&self) -> Result<Option<TimeRangeData>> {
        let Some(group_id) = self.group_of_type(GroupType::TimeRange) else {
            return Ok(None);
        };
        let group = self.group_ref(group_id)?;
        let Some(entry) = group.active.first() else {
            return Ok(None);
        };
        let filter = self.filter_ref(entry.filter_id)?;
        let FilterKind::TimeRange {
            field_name,
            field_type,
            range,
            comparison,
        } = &filter.kind
        else {
            return Ok(None);
        };
        let period = range.unwrap_or(PeriodId::DEFAULT);
        let reference = self.reference.date_naive();
        let range_domain =
            date::period_range(reference, period).to_domain(field_name, *field_type);
        let (comparison_range, comparison_description) = match comparison {
            Some(cmp) => (
                Some(
                    date::comparison_range(reference, period, *cmp)
                        .to_domain(field_name, *field_type),
                ),
                Some(date::comparison_description(*cmp).to_string()),
            ),
            None => (None, None),
        };
        Ok(Some(TimeRangeData {
            field: field_name.clone(),
            range: range_domain,
            description: date::period_description(period).to_string(),
            comparison_range,
            comparison_description,
        }))
    }

    //-------------------------------------------------------------------
    // Initialization
    //-------------------------------------------------------------------

    fn add_arch_filters(&mut self, arch: &ArchNode) -> Result<()> {
        let extracted = arch::extract_pregroups(
            arch,
            &ArchContext {
                fields: &self.fields,
                search_defaults: &self.search_defaults,
            },
        )?;
        for pregroup in extracted.pregroups {
            self.create_group_of_filters(pregroup.specs, pregroup.group_type)?;
        }
        self.group_number = self.group_number.max(extracted.next_group_number);
        Ok(())
    }

    fn add_dynamic_filters(&mut self, dynamic_filters: Vec<DynamicFilterDef>) -> Result<()> {
        let specs: Vec<FilterSpec> = dynamic_filters
            .into_iter()
            .map(|f| FilterSpec {
                description: f.description,
                is_default: true,
                default_rank: 100,
                invisible: false,
                group_number: 0,
                kind: FilterKind::Predicate {
                    domain: f.domain.to_string_form(),
                    context: Context::new(),
                    date: None,
                },
            })
            .collect();
        self.create_group_of_filters(specs, GroupType::Filter)?;
        Ok(())
    }

    fn add_favorites(&mut self, favorites: Vec<FavoriteDef>) -> Result<()> {
        let specs: Vec<FilterSpec> = favorites
            .into_iter()
            .map(|favorite| {
                let mut context = favorite.context;
                let group_bys = match context.remove("group_by") {
                    Some(JsonValue::String(one)) => vec![one],
                    Some(JsonValue::Array(items)) => items
                        .into_iter()
                        .filter_map(|v| match v {
                            JsonValue::String(s) => Some(s),
                            _ => None,
                        })
                        .collect(),
                    _ => Vec::new(),
                };
                let ordered_by = favorite
                    .sort
                    .iter()
                    .map(|term| OrderedBy::parse(term))
                    .collect();
                FilterSpec {
                    description: favorite.name,
                    is_default: favorite.is_default,
                    default_rank: 100,
                    invisible: false,
                    group_number: if favorite.user_id.is_some() { 1 } else { 2 },
                    kind: FilterKind::Favorite {
                        domain: favorite.domain,
                        context,
                        group_bys,
                        ordered_by,
                        server_side_id: Some(favorite.id),
                        user_id: favorite.user_id,
                        is_removable: true,
                    },
                }
            })
            .collect();
        self.create_group_of_filters(specs, GroupType::Favorite)?;
        Ok(())
    }

    /// One time-range filter per sortable date/datetime field.
    fn add_time_ranges(&mut self) -> Result<()> {
        let specs: Vec<FilterSpec> = self
            .fields
            .iter()
            .filter(|(_, field)| field.field_type.is_date() && field.sortable)
            .map(|(name, field)| FilterSpec {
                description: field.string.clone(),
                is_default: false,
                default_rank: 100,
                invisible: false,
                group_number: 0,
                kind: FilterKind::TimeRange {
                    field_name: name.clone(),
                    field_type: field.field_type,
                    range: None,
                    comparison: None,
                },
            })
            .collect();
        self.create_group_of_filters(specs, GroupType::TimeRange)?;
        Ok(())
    }

    fn activate_defaults(
        &mut self,
        activate_default_favorite: bool,
        time_range_defaults: Option<TimeRangeDefaults>,
    ) -> Result<()> {
        let default_favorite = self
            .filters
            .values()
            .find(|f| matches!(f.kind, FilterKind::Favorite { .. }) && f.is_default)
            .map(|f| f.id);
        if let (true, Some(favorite_id)) = (activate_default_favorite, default_favorite) {
            return self.toggle_filter(favorite_id);
        }

        let mut defaults: Vec<(i32, FilterId)> = self
            .filters
            .values()
            .filter(|f| f.is_default && !matches!(f.kind, FilterKind::Favorite { .. }))
            .map(|f| (f.default_rank, f.id))
            .collect();
        defaults.sort();
        for (_, filter_id) in defaults {
            enum DefaultAction {
                WithOptions,
                Field(JsonValue),
                Plain,
            }
            let action = match &self.filter_ref(filter_id)?.kind {
                FilterKind::Predicate { date: Some(_), .. }
                | FilterKind::GroupBy {
                    intervals: Some(_), ..
                } => DefaultAction::WithOptions,
                FilterKind::Field {
                    default_value: Some(value),
                    ..
                } => DefaultAction::Field(value.clone()),
                _ => DefaultAction::Plain,
            };
            match action {
                DefaultAction::WithOptions => self.toggle_filter_with_options(filter_id, None)?,
                DefaultAction::Field(value) => {
                    let value = match value {
                        JsonValue::Array(items) => {
                            items.into_iter().next().unwrap_or(JsonValue::Null)
                        }
                        other => other,
                    };
                    let label = match &value {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    self.toggle_auto_completion_filter(
                        filter_id,
                        vec![AutoCompleteValue { label, value }],
                    )?
                }
                DefaultAction::Plain => self.toggle_filter(filter_id)?,
            }
        }

        if let Some(defaults) = time_range_defaults {
            let filter_id = self
                .filters
                .values()
                .find(|f| {
                    matches!(&f.kind, FilterKind::TimeRange { field_name, .. } if *field_name == defaults.field)
                })
                .map(|f| f.id)
                .ok_or_else(|| StoreError::UnknownField(defaults.field.clone()))?;
            self.activate_time_range(filter_id, Some(defaults.range), defaults.comparison_range)?;
        }
        Ok(())
    }

    //-------------------------------------------------------------------
    // Internal helpers
    //-------------------------------------------------------------------

    fn alloc_group(&mut self, group_type: GroupType) -> GroupId {
        let group_id = GroupId(self.next_group_id);
        self.next_group_id += 1;
        self.groups.insert(
            group_id,
            Group {
                id: group_id,
                group_type,
                active: Vec::new(),
            },
        );
        group_id
    }

    fn insert_filter(&mut self, spec: FilterSpec, group_id: GroupId) -> FilterId {
        let filter_id = FilterId(self.next_filter_id);
        self.next_filter_id += 1;
        self.filters.insert(
            filter_id,
            Filter {
                id: filter_id,
                description: spec.description,
                group_id,
                group_number: spec.group_number,
                is_default: spec.is_default,
                default_rank: spec.default_rank,
                invisible: spec.invisible,
                kind: spec.kind,
            },
        );
        filter_id
    }

    fn filter_ref(&self, filter_id: FilterId) -> Result<&Filter> {
        self.filters
            .get(&filter_id)
            .ok_or(StoreError::UnknownFilter(filter_id))
    }

    fn group_ref(&self, group_id: GroupId) -> Result<&Group> {
        self.groups
            .get(&group_id)
            .ok_or(StoreError::UnknownGroup(group_id))
    }

    fn date_options_mut(&mut self, filter_id: FilterId) -> Result<&mut Vec<DateOptionId>> {
        match self.filters.get_mut(&filter_id) {
            Some(Filter {
                kind:
                    FilterKind::Predicate {
                        date: Some(opts), ..
                    },
                ..
            }) => Ok(&mut opts.current),
            Some(_) => Err(StoreError::InvalidFilterSpec(format!(
                "{filter_id} has no date options"
            ))),
            None => Err(StoreError::UnknownFilter(filter_id)),
        }
    }

    fn interval_options_mut(&mut self, filter_id: FilterId) -> Result<&mut Vec<Interval>> {
        match self.filters.get_mut(&filter_id) {
            Some(Filter {
                kind:
                    FilterKind::GroupBy {
                        intervals: Some(opts),
                        ..
                    },
                ..
            }) => Ok(&mut opts.current),
            Some(_) => Err(StoreError::InvalidFilterSpec(format!(
                "{filter_id} has no interval options"
            ))),
            None => Err(StoreError::UnknownFilter(filter_id)),
        }
    }
}

fn option_token<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn interval_label(interval: Interval) -> &'static str {
    match interval {
        Interval::Year => "Year",
        Interval::Quarter => "Quarter",
        Interval::Month => "Month",
        Interval::Week => "Week",
        Interval::Day => "Day",
    }
}

fn extract_search_defaults(context: &mut Context) -> BTreeMap<String, JsonValue> {
    let keys: Vec<String> = context
        .0
        .keys()
        .filter(|k| k.starts_with("search_default_"))
        .cloned()
        .collect();
    let mut defaults = BTreeMap::new();
    for key in keys {
        if let Some(value) = context.remove(&key) {
            defaults.insert(key["search_default_".len()..].to_string(), value);
        }
    }
    defaults
}

fn extract_time_range_defaults(context: &mut Context) -> Result<Option<TimeRangeDefaults>> {
    let Some(raw) = context.remove("time_ranges") else {
        return Ok(None);
    };
    let defaults: TimeRangeDefaults = serde_json::from_value(raw)
        .map_err(|e| StoreError::InvalidFilterSpec(format!("bad time_ranges default: {e}")))?;
    Ok(Some(defaults))
}
