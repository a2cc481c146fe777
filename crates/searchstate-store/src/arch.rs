//! Translation of a declarative search-view description into filter
//! prototypes. This is pure input adaptation: the tree arrives already
//! parsed and another translator could replace this one without touching the
//! store.

use searchstate_core::{
    Context, DateOptionId, DateOptions, FieldDef, FilterKind, FilterSpec, GroupType, Interval,
    IntervalOptions, Result, StoreError,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// A node of the search-view description. Attribute values are strings;
/// `domain` and `context` attributes carry embedded JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchNode {
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub children: Vec<ArchNode>,
}

impl ArchNode {
    /// The `<search/>` description with no declarations.
    pub fn empty() -> Self {
        ArchNode {
            tag: "search".into(),
            ..ArchNode::default()
        }
    }

    pub fn new(tag: impl Into<String>, attrs: &[(&str, &str)]) -> Self {
        ArchNode {
            tag: tag.into(),
            attrs: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            children: Vec::new(),
        }
    }
}

/// Read-only inputs the extraction needs besides the tree itself.
pub struct ArchContext<'a> {
    pub fields: &'a BTreeMap<String, FieldDef>,
    pub search_defaults: &'a BTreeMap<String, JsonValue>,
}

/// One contiguous same-type run of prefilters, to become one group.
#[derive(Debug, Clone)]
pub struct Pregroup {
    pub group_type: GroupType,
    pub specs: Vec<FilterSpec>,
}

#[derive(Debug, Clone)]
pub struct ArchPregroups {
    pub pregroups: Vec<Pregroup>,
    /// First unused group number, for the store's counter.
    pub next_group_number: u32,
}

fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

fn truthy_attr(attrs: &BTreeMap<String, String>, name: &str) -> bool {
    matches!(
        attrs.get(name).map(String::as_str),
        Some("1") | Some("true") | Some("True")
    )
}

/// Splits the description into pregroups: `group` nodes are flattened, runs
/// split at separators, tag changes and before every `field`, and all
/// group-by runs coalesce into the single group-by group emitted last.
pub fn extract_pregroups(arch: &ArchNode, ctx: &ArchContext) -> Result<ArchPregroups> {
    let mut nodes: Vec<ArchNode> = Vec::new();
    for child in arch.children.iter().filter(|c| c.tag != "searchpanel") {
        if child.tag == "group" {
            nodes.extend(child.children.iter().cloned().map(retag_group_by));
        } else {
            nodes.push(retag_group_by(child.clone()));
        }
    }
    // sentinel flushes the last run
    nodes.push(ArchNode::new("separator", &[]));

    let mut group_number = 0u32;
    let mut current_tag = String::new();
    let mut current: Vec<FilterSpec> = Vec::new();
    let mut group_bys: Vec<FilterSpec> = Vec::new();
    let mut pregroups: Vec<Pregroup> = Vec::new();

    for node in &nodes {
        let split =
            node.tag != current_tag || node.tag == "separator" || node.tag == "field";
        if split {
            if !current.is_empty() {
                if current_tag == "groupBy" {
                    group_bys.append(&mut current);
                } else {
                    pregroups.push(Pregroup {
                        group_type: GroupType::parse(&current_tag)?,
                        specs: std::mem::take(&mut current),
                    });
                }
            }
            current_tag = node.tag.clone();
            current.clear();
            group_number += 1;
        }
        if node.tag != "separator" {
            current.push(extract_spec(node, ctx, group_number)?);
        }
    }
    if !group_bys.is_empty() {
        pregroups.push(Pregroup {
            group_type: GroupType::GroupBy,
            specs: group_bys,
        });
    }
    Ok(ArchPregroups {
        pregroups,
        next_group_number: group_number + 1,
    })
}

/// A `filter` node whose context object carries a `group_by` key is really a
/// group-by declaration: re-tag it and surface the field name and optional
/// default interval.
fn retag_group_by(mut node: ArchNode) -> ArchNode {
    if node.tag != "filter" {
        return node;
    }
    let Some(raw) = node.attrs.get("context") else {
        return node;
    };
    let Ok(JsonValue::Object(ctx)) = serde_json::from_str::<JsonValue>(raw) else {
        return node;
    };
    if let Some(JsonValue::String(spec)) = ctx.get("group_by") {
        let mut parts = spec.splitn(2, ':');
        let field = parts.next().unwrap_or_default().to_string();
        node.attrs.insert("fieldName".into(), field);
        if let Some(interval) = parts.next() {
            node.attrs.insert("defaultInterval".into(), interval.to_string());
        }
        node.tag = "groupBy".into();
    }
    node
}

fn parse_context(raw: &str) -> Result<Context> {
    serde_json::from_str(raw)
        .map_err(|e| StoreError::InvalidFilterSpec(format!("bad context {raw:?}: {e}")))
}

fn parse_date_option(raw: &str) -> Result<DateOptionId> {
    serde_json::from_value(JsonValue::String(raw.to_string()))
        .map_err(|_| StoreError::InvalidFilterSpec(format!("unknown period option {raw:?}")))
}

fn extract_spec(node: &ArchNode, ctx: &ArchContext, group_number: u32) -> Result<FilterSpec> {
    let group_type = GroupType::parse(&node.tag)?;
    let attrs = &node.attrs;
    let name = attrs.get("name").map(String::as_str).unwrap_or_default();
    let is_default = ctx
        .search_defaults
        .get(name)
        .map(truthy)
        .unwrap_or(false);
    let description = attrs
        .get("string")
        .or_else(|| attrs.get("help"))
        .or_else(|| attrs.get("name"))
        .or_else(|| attrs.get("domain"))
        .cloned()
        .unwrap_or_else(|| "Ω".to_string());

    let spec = match group_type {
        GroupType::Filter => {
            let mut date = None;
            if let Some(field_name) = attrs.get("date") {
                let field = ctx
                    .fields
                    .get(field_name)
                    .ok_or_else(|| StoreError::UnknownField(field_name.clone()))?;
                let default_option = match attrs.get("default_period") {
                    Some(raw) => parse_date_option(raw)?,
                    None => DateOptionId::DEFAULT_PERIOD,
                };
                date = Some(DateOptions {
                    field_name: field_name.clone(),
                    field_type: field.field_type,
                    default_option,
                    current: Vec::new(),
                });
            }
            let context = match attrs.get("context") {
                Some(raw) => parse_context(raw)?,
                None => Context::new(),
            };
            FilterSpec {
                description,
                is_default,
                default_rank: if is_default { -5 } else { 100 },
                invisible: truthy_attr(attrs, "invisible"),
                group_number,
                kind: FilterKind::Predicate {
                    domain: attrs.get("domain").cloned().unwrap_or_default(),
                    context,
                    date,
                },
            }
        }
        GroupType::GroupBy => {
            let field_name = attrs
                .get("fieldName")
                .or_else(|| attrs.get("name"))
                .cloned()
                .ok_or_else(|| {
                    StoreError::InvalidFilterSpec("group-by node without a field".into())
                })?;
            let field = ctx
                .fields
                .get(&field_name)
                .ok_or_else(|| StoreError::UnknownField(field_name.clone()))?;
            let default_rank = if is_default {
                ctx.search_defaults
                    .get(name)
                    .and_then(JsonValue::as_i64)
                    .map(|v| v as i32)
                    .unwrap_or(100)
            } else {
                100
            };
            let intervals = if field.field_type.is_date() {
                let default_interval = match attrs.get("defaultInterval") {
                    Some(raw) => Interval::parse(raw)?,
                    None => Interval::DEFAULT,
                };
                Some(IntervalOptions {
                    default_interval,
                    current: Vec::new(),
                })
            } else {
                None
            };
            FilterSpec {
                description,
                is_default,
                default_rank,
                invisible: truthy_attr(attrs, "invisible"),
                group_number,
                kind: FilterKind::GroupBy {
                    field_name,
                    field_type: field.field_type,
                    intervals,
                },
            }
        }
        GroupType::Field => {
            let field_name = attrs.get("name").cloned().ok_or_else(|| {
                StoreError::InvalidFilterSpec("field node without a name".into())
            })?;
            let field = ctx
                .fields
                .get(&field_name)
                .ok_or_else(|| StoreError::UnknownField(field_name.clone()))?;
            FilterSpec {
                description,
                is_default,
                default_rank: if is_default { -10 } else { 100 },
                invisible: truthy_attr(attrs, "invisible"),
                group_number,
                kind: FilterKind::Field {
                    field_name,
                    field_type: field.field_type,
                    values: Vec::new(),
                    default_value: ctx.search_defaults.get(name).cloned(),
                },
            }
        }
        other => {
            return Err(StoreError::InvalidGroupType(other.as_str().to_string()));
        }
    };
    Ok(spec)
}
