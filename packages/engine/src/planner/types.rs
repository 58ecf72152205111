use std::collections::{BTreeMap, BTreeSet};

/// Fields of one table whose stored values changed outside the engine.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub table_id: String,
    pub field_ids: Vec<String>,
    /// Changed records; `None` when unknown or the whole table changed.
    #[serde(default)]
    pub record_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChangeSet {
    pub changes: Vec<FieldChange>,
    /// Foreign records each changed link pointed at before the change, by
    /// link field id. Their side of a symmetric link is recomputed as well.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub previous_links: BTreeMap<String, BTreeSet<String>>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes to `field_ids` in the records `record_ids`.
    pub fn records(table_id: &str, field_ids: &[&str], record_ids: &[&str]) -> Self {
        Self::new().with_records(table_id, field_ids, record_ids)
    }

    pub fn with_records(mut self, table_id: &str, field_ids: &[&str], record_ids: &[&str]) -> Self {
        self.changes.push(FieldChange {
            table_id: table_id.to_string(),
            field_ids: field_ids.iter().map(|id| id.to_string()).collect(),
            record_ids: Some(record_ids.iter().map(|id| id.to_string()).collect()),
        });
        self
    }

    /// Changes to `field_ids` in unknown records of `table_id`.
    pub fn whole_table(table_id: &str, field_ids: &[&str]) -> Self {
        Self {
            changes: vec![FieldChange {
                table_id: table_id.to_string(),
                field_ids: field_ids.iter().map(|id| id.to_string()).collect(),
                record_ids: None,
            }],
            ..Self::default()
        }
    }

    /// Records that `link_field_id` linked to before it was rewritten, so a
    /// re-parented or unlinked record leaves its old foreign records fresh.
    pub fn with_previous_links(mut self, link_field_id: &str, foreign_ids: &[&str]) -> Self {
        self.previous_links
            .entry(link_field_id.to_string())
            .or_default()
            .extend(foreign_ids.iter().map(|id| id.to_string()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.iter().all(|change| change.field_ids.is_empty())
    }
}

/// Where the records of a dependent recompute come from. Resolved by the
/// executor against the rows earlier steps actually changed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum ScopeSource {
    Records(BTreeSet<String>),
    /// Records of this table whose `field_id` changed.
    SameRecord { field_id: String },
    /// Records of this table linked through `link_field_id` to foreign
    /// records whose `field_id` changed.
    Linked {
        link_field_id: String,
        field_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RecomputeScope {
    WholeTable,
    Records(BTreeSet<String>),
    Dependents(Vec<ScopeSource>),
}

impl RecomputeScope {
    /// Smallest scope covering both.
    pub(crate) fn merge(self, other: RecomputeScope) -> RecomputeScope {
        match (self, other) {
            (Self::WholeTable, _) | (_, Self::WholeTable) => Self::WholeTable,
            (Self::Records(mut left), Self::Records(right)) => {
                left.extend(right);
                Self::Records(left)
            }
            (left, right) => {
                let mut sources = BTreeSet::new();
                sources.extend(left.into_sources());
                sources.extend(right.into_sources());
                Self::Dependents(sources.into_iter().collect())
            }
        }
    }

    fn into_sources(self) -> Vec<ScopeSource> {
        match self {
            Self::WholeTable => Vec::new(),
            Self::Records(ids) => vec![ScopeSource::Records(ids)],
            Self::Dependents(sources) => sources,
        }
    }
}

/// Fields of one table recomputed in one pass.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RecomputeUnit {
    pub table_id: String,
    pub field_ids: Vec<String>,
    pub scope: RecomputeScope,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ComputedUpdateStep {
    pub level: usize,
    pub units: Vec<RecomputeUnit>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ComputedUpdatePlan {
    pub steps: Vec<ComputedUpdateStep>,
    /// Records the change set named, per field. Seeds the executor's view of
    /// what changed before the first step runs.
    pub seeds: BTreeMap<String, BTreeSet<String>>,
}

impl ComputedUpdatePlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Every recomputed field id, in step order.
    pub fn field_ids(&self) -> impl Iterator<Item = &str> {
        self.steps
            .iter()
            .flat_map(|step| step.units.iter())
            .flat_map(|unit| unit.field_ids.iter())
            .map(String::as_str)
    }
}
