use crate::errors::{Result, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterId(pub u64);

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "filter#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

/// The five recognized filter/group categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupType {
    Filter,
    GroupBy,
    TimeRange,
    Favorite,
    Field,
}

impl GroupType {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "filter" => Ok(GroupType::Filter),
            "groupBy" => Ok(GroupType::GroupBy),
            "timeRange" => Ok(GroupType::TimeRange),
            "favorite" => Ok(GroupType::Favorite),
            "field" => Ok(GroupType::Field),
            other => Err(StoreError::InvalidGroupType(other.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GroupType::Filter => "filter",
            GroupType::GroupBy => "groupBy",
            GroupType::TimeRange => "timeRange",
            GroupType::Favorite => "favorite",
            GroupType::Field => "field",
        }
    }

    /// Groups of these types contribute fragments to the composed domain.
    pub fn contributes_domain(self) -> bool {
        matches!(self, GroupType::Filter | GroupType::Favorite | GroupType::Field)
    }

    pub fn contributes_group_by(self) -> bool {
        matches!(self, GroupType::GroupBy | GroupType::Favorite)
    }
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Char,
    Text,
    Boolean,
    Integer,
    Float,
    Monetary,
    Selection,
    Many2one,
    Many2many,
    One2many,
    Date,
    Datetime,
}

impl FieldType {
    pub fn is_date(self) -> bool {
        matches!(self, FieldType::Date | FieldType::Datetime)
    }

    pub fn groupable(self) -> bool {
        matches!(
            self,
            FieldType::Many2one
                | FieldType::Char
                | FieldType::Boolean
                | FieldType::Selection
                | FieldType::Date
                | FieldType::Datetime
                | FieldType::Integer
        )
    }
}

/// Field metadata supplied by the view description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub string: String,
    #[serde(default)]
    pub sortable: bool,
}

/// Symbolic period option of a date filter. Month and quarter options are
/// sub-year: they only resolve paired with at least one year option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateOptionId {
    ThisMonth,
    LastMonth,
    AntepenultimateMonth,
    FirstQuarter,
    SecondQuarter,
    ThirdQuarter,
    FourthQuarter,
    ThisYear,
    LastYear,
    AntepenultimateYear,
}

impl DateOptionId {
    pub const DEFAULT_PERIOD: DateOptionId = DateOptionId::ThisMonth;
    pub const DEFAULT_YEAR: DateOptionId = DateOptionId::ThisYear;

    pub fn is_year(self) -> bool {
        matches!(
            self,
            DateOptionId::ThisYear | DateOptionId::LastYear | DateOptionId::AntepenultimateYear
        )
    }
}

/// Granularity option of a date/datetime group-by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    Year,
    Quarter,
    Month,
    Week,
    Day,
}

impl Interval {
    pub const DEFAULT: Interval = Interval::Month;

    pub const ALL: [Interval; 5] = [
        Interval::Year,
        Interval::Quarter,
        Interval::Month,
        Interval::Week,
        Interval::Day,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Interval::Year => "year",
            Interval::Quarter => "quarter",
            Interval::Month => "month",
            Interval::Week => "week",
            Interval::Day => "day",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "year" => Ok(Interval::Year),
            "quarter" => Ok(Interval::Quarter),
            "month" => Ok(Interval::Month),
            "week" => Ok(Interval::Week),
            "day" => Ok(Interval::Day),
            other => Err(StoreError::InvalidFilterSpec(format!(
                "unknown interval {other:?}"
            ))),
        }
    }
}

/// Symbolic period of a time-range filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodId {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
    ThisQuarter,
    LastQuarter,
    ThisYear,
    LastYear,
    #[serde(rename = "last_7_days")]
    Last7Days,
    #[serde(rename = "last_30_days")]
    Last30Days,
    #[serde(rename = "last_365_days")]
    Last365Days,
    #[serde(rename = "last_5_years")]
    Last5Years,
}

impl PeriodId {
    pub const DEFAULT: PeriodId = PeriodId::ThisMonth;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonId {
    PreviousPeriod,
    PreviousYear,
}

/// One term of an ordering spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedBy {
    pub name: String,
    pub asc: bool,
}

impl OrderedBy {
    /// Parses one sort term, either sql notation (`"name asc"`, `"name desc"`)
    /// or the legacy `"-name"` form.
    pub fn parse(term: &str) -> Self {
        let parts: Vec<&str> = term.split_whitespace().collect();
        if parts.len() > 1 {
            OrderedBy {
                name: parts[0].to_string(),
                asc: parts[1] == "asc",
            }
        } else if let Some(stripped) = term.strip_prefix('-') {
            OrderedBy {
                name: stripped.to_string(),
                asc: false,
            }
        } else {
            OrderedBy {
                name: term.to_string(),
                asc: true,
            }
        }
    }

    pub fn to_sort_term(&self) -> String {
        if self.asc {
            self.name.clone()
        } else {
            format!("{} desc", self.name)
        }
    }
}

/// One value picked from the search-bar autocompletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoCompleteValue {
    pub label: String,
    pub value: JsonValue,
}

/// A free-form context dictionary. Merging is last-write-wins per key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(pub serde_json::Map<String, JsonValue>);

impl Context {
    pub fn new() -> Self {
        Context::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        self.0.remove(key)
    }

    pub fn merge(&mut self, other: &Context) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Drops the keys that must not be persisted with a favorite: the
    /// volatile `group_by` list and the transient `default_*` family.
    pub fn strip_transient(&mut self) {
        let kept: serde_json::Map<String, JsonValue> = self
            .0
            .iter()
            .filter(|(k, _)| k.as_str() != "group_by" && !k.starts_with("default_"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.0 = kept;
    }
}

/// Per-date-filter option state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateOptions {
    pub field_name: String,
    pub field_type: FieldType,
    pub default_option: DateOptionId,
    #[serde(default)]
    pub current: Vec<DateOptionId>,
}

/// Per-group-by interval state, present iff the field is date/datetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalOptions {
    pub default_interval: Interval,
    #[serde(default)]
    pub current: Vec<Interval>,
}

/// Category-specific filter payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FilterKind {
    /// A predicate filter, declared in the arch, created by the user or
    /// injected programmatically. The domain stays in string form until
    /// composition. `date` is present for date filters with period options.
    Predicate {
        #[serde(default)]
        domain: String,
        #[serde(default)]
        context: Context,
        #[serde(default)]
        date: Option<DateOptions>,
    },
    GroupBy {
        field_name: String,
        field_type: FieldType,
        #[serde(default)]
        intervals: Option<IntervalOptions>,
    },
    TimeRange {
        field_name: String,
        field_type: FieldType,
        #[serde(default)]
        range: Option<PeriodId>,
        #[serde(default)]
        comparison: Option<ComparisonId>,
    },
    /// A named snapshot of a composed query. The domain is kept unevaluated
    /// in string form, as persisted server side.
    Favorite {
        domain: String,
        context: Context,
        #[serde(default)]
        group_bys: Vec<String>,
        #[serde(default)]
        ordered_by: Vec<OrderedBy>,
        #[serde(default)]
        server_side_id: Option<u64>,
        #[serde(default)]
        user_id: Option<u64>,
        #[serde(default)]
        is_removable: bool,
    },
    /// Search-bar field; its domain is recomputed from the autocompletion
    /// values each time they change.
    Field {
        field_name: String,
        field_type: FieldType,
        #[serde(default)]
        values: Vec<AutoCompleteValue>,
        #[serde(default)]
        default_value: Option<JsonValue>,
    },
}

impl FilterKind {
    pub fn group_type(&self) -> GroupType {
        match self {
            FilterKind::Predicate { .. } => GroupType::Filter,
            FilterKind::GroupBy { .. } => GroupType::GroupBy,
            FilterKind::TimeRange { .. } => GroupType::TimeRange,
            FilterKind::Favorite { .. } => GroupType::Favorite,
            FilterKind::Field { .. } => GroupType::Field,
        }
    }
}

fn default_rank() -> i32 {
    100
}

/// A single predicate or grouping rule with a stable identity within one
/// store lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub id: FilterId,
    pub description: String,
    pub group_id: GroupId,
    #[serde(default)]
    pub group_number: u32,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_rank")]
    pub default_rank: i32,
    #[serde(default)]
    pub invisible: bool,
    pub kind: FilterKind,
}

/// Prototype of a filter ("prefilter"), before the store assigns identity
/// and group membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSpec {
    pub description: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_rank")]
    pub default_rank: i32,
    #[serde(default)]
    pub invisible: bool,
    #[serde(default)]
    pub group_number: u32,
    pub kind: FilterKind,
}

impl FilterSpec {
    pub fn new(description: impl Into<String>, kind: FilterKind) -> Self {
        FilterSpec {
            description: description.into(),
            is_default: false,
            default_rank: default_rank(),
            invisible: false,
            group_number: 0,
            kind,
        }
    }
}

/// One entry of a group's active list; the option is used only for group-by
/// interval sub-activations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveFilter {
    pub filter_id: FilterId,
    #[serde(default)]
    pub option: Option<Interval>,
}

impl ActiveFilter {
    pub fn plain(filter_id: FilterId) -> Self {
        ActiveFilter {
            filter_id,
            option: None,
        }
    }
}

/// A cluster of same-category filters; its active members are OR-combined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    #[serde(rename = "type")]
    pub group_type: GroupType,
    #[serde(default)]
    pub active: Vec<ActiveFilter>,
}

impl Group {
    pub fn is_active(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn contains(&self, filter_id: FilterId) -> bool {
        self.active.iter().any(|a| a.filter_id == filter_id)
    }
}
