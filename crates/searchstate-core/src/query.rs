use crate::domain::Domain;
use crate::model::{Context, Filter, FilterId, Group, GroupId, GroupType, Interval, OrderedBy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The composed search query handed to the data-fetch layer. Derived fresh
/// from the store state on every read, never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub domain: Domain,
    pub group_by: Vec<String>,
    pub context: Context,
    #[serde(default)]
    pub ordered_by: Vec<OrderedBy>,
    #[serde(default)]
    pub time_ranges: Option<TimeRangeData>,
}

/// Resolved time-range information, present when a time-range filter is
/// active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeRangeData {
    pub field: String,
    pub range: Domain,
    pub description: String,
    #[serde(default)]
    pub comparison_range: Option<Domain>,
    #[serde(default)]
    pub comparison_description: Option<String>,
}

/// Serializable snapshot of `{filters, groups, query}` for cross-view state
/// transfer within the same action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedState {
    pub filters: BTreeMap<FilterId, Filter>,
    pub groups: BTreeMap<GroupId, Group>,
    pub query: Vec<GroupId>,
}

/// One user-visible chip: an active group together with its active members,
/// in activation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Facet {
    pub group_id: GroupId,
    pub group_type: GroupType,
    pub filters: Vec<FacetFilter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacetFilter {
    pub filter_id: FilterId,
    pub description: String,
    #[serde(default)]
    pub option: Option<Interval>,
}
