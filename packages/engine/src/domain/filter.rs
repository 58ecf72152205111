use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Conjunction {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Is,
    IsNot,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    Contains,
    DoesNotContain,
    IsEmpty,
    IsNotEmpty,
    IsAnyOf,
}

impl FilterOperator {
    pub const fn takes_value(self) -> bool {
        !matches!(self, Self::IsEmpty | Self::IsNotEmpty)
    }
}

/// Right-hand side of a condition: a user literal or a field of the host
/// record being computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FilterValue {
    Literal { value: serde_json::Value },
    HostField { field_id: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCondition {
    /// Field of the foreign table being filtered.
    pub field_id: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Option<FilterValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FilterItem {
    Condition(FilterCondition),
    Group(FilterSet),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSet {
    pub conjunction: Conjunction,
    pub items: Vec<FilterItem>,
}

impl FilterSet {
    pub fn all(items: Vec<FilterItem>) -> Self {
        Self {
            conjunction: Conjunction::And,
            items,
        }
    }

    pub fn any(items: Vec<FilterItem>) -> Self {
        Self {
            conjunction: Conjunction::Or,
            items,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.iter().all(|item| match item {
            FilterItem::Condition(_) => false,
            FilterItem::Group(group) => group.is_empty(),
        })
    }

    pub fn foreign_field_ids(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect(&mut out, &mut BTreeSet::new());
        out
    }

    pub fn host_field_ids(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect(&mut BTreeSet::new(), &mut out);
        out
    }

    fn collect(&self, foreign: &mut BTreeSet<String>, host: &mut BTreeSet<String>) {
        for item in &self.items {
            match item {
                FilterItem::Condition(condition) => {
                    foreign.insert(condition.field_id.clone());
                    if let Some(FilterValue::HostField { field_id }) = &condition.value {
                        host.insert(field_id.clone());
                    }
                }
                FilterItem::Group(group) => group.collect(foreign, host),
            }
        }
    }
}

impl FilterCondition {
    pub fn literal(field_id: &str, operator: FilterOperator, value: serde_json::Value) -> Self {
        Self {
            field_id: field_id.to_string(),
            operator,
            value: Some(FilterValue::Literal { value }),
        }
    }

    pub fn host_field(field_id: &str, operator: FilterOperator, host_field_id: &str) -> Self {
        Self {
            field_id: field_id.to_string(),
            operator,
            value: Some(FilterValue::HostField {
                field_id: host_field_id.to_string(),
            }),
        }
    }
}
