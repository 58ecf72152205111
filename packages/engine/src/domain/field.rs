use serde::{Deserialize, Serialize};

use super::formula::FormulaExpr;
use super::options::{ConditionalOptions, LinkOptions, LookupOptions, RollupOptions};

/// Declared physical storage of a field's column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageType {
    Text,
    Integer,
    Real,
    Boolean,
    DateTime,
    Json,
}

impl StorageType {
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SystemColumn {
    CreatedTime,
    LastModifiedTime,
    AutoNumber,
    CreatedBy,
    LastModifiedBy,
}

impl SystemColumn {
    pub const fn column_name(self) -> &'static str {
        match self {
            Self::CreatedTime => super::CREATED_TIME_COLUMN,
            Self::LastModifiedTime => super::LAST_MODIFIED_TIME_COLUMN,
            Self::AutoNumber => super::AUTO_NUMBER_COLUMN,
            Self::CreatedBy => super::CREATED_BY_COLUMN,
            Self::LastModifiedBy => super::LAST_MODIFIED_BY_COLUMN,
        }
    }

    pub const fn is_user(self) -> bool {
        matches!(self, Self::CreatedBy | Self::LastModifiedBy)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormulaOptions {
    pub expression: FormulaExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "options", rename_all = "camelCase")]
pub enum FieldKind {
    Scalar,
    Link(LinkOptions),
    Lookup(LookupOptions),
    Rollup(RollupOptions),
    ConditionalLookup(ConditionalOptions),
    ConditionalRollup(ConditionalOptions),
    Formula(FormulaOptions),
    System(SystemColumn),
}

impl FieldKind {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Scalar => "scalar",
            Self::Link(_) => "link",
            Self::Lookup(_) => "lookup",
            Self::Rollup(_) => "rollup",
            Self::ConditionalLookup(_) => "conditionalLookup",
            Self::ConditionalRollup(_) => "conditionalRollup",
            Self::Formula(_) => "formula",
            Self::System(_) => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub id: String,
    pub table_id: String,
    pub name: String,
    pub db_field_name: String,
    pub storage_type: StorageType,
    #[serde(default)]
    pub is_multiple: bool,
    /// Set when a field this one reads was deleted or is misconfigured.
    #[serde(default)]
    pub has_error: bool,
    pub kind: FieldKind,
}

impl Field {
    pub fn scalar(
        id: &str,
        table_id: &str,
        name: &str,
        db_field_name: &str,
        storage_type: StorageType,
    ) -> Self {
        Self {
            id: id.to_string(),
            table_id: table_id.to_string(),
            name: name.to_string(),
            db_field_name: db_field_name.to_string(),
            storage_type,
            is_multiple: false,
            has_error: false,
            kind: FieldKind::Scalar,
        }
    }

    pub fn with_kind(mut self, kind: FieldKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn multiple(mut self, is_multiple: bool) -> Self {
        self.is_multiple = is_multiple;
        self
    }

    /// Column holding this field's stored value.
    pub fn physical_column(&self) -> &str {
        match &self.kind {
            FieldKind::System(column) => column.column_name(),
            _ => &self.db_field_name,
        }
    }

    /// Fields whose stored value is derived by this engine.
    pub fn is_computed(&self) -> bool {
        !matches!(self.kind, FieldKind::Scalar | FieldKind::System(_))
    }

    pub fn link_options(&self) -> Option<&LinkOptions> {
        match &self.kind {
            FieldKind::Link(options) => Some(options),
            _ => None,
        }
    }

    /// The link whose join feeds a lookup or rollup.
    pub fn join_link_field_id(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Lookup(options) => Some(&options.link_field_id),
            FieldKind::Rollup(options) => Some(&options.link_field_id),
            _ => None,
        }
    }

    /// Field in the foreign table whose values a lookup/rollup reads.
    pub fn foreign_target_field_id(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Lookup(options) => Some(&options.lookup_field_id),
            FieldKind::Rollup(options) => Some(&options.lookup_field_id),
            FieldKind::ConditionalLookup(options) | FieldKind::ConditionalRollup(options) => {
                Some(&options.lookup_field_id)
            }
            _ => None,
        }
    }
}
