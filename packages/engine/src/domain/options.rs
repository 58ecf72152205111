use serde::{Deserialize, Serialize};

use super::filter::FilterSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relationship {
    ManyOne,
    OneOne,
    OneMany,
    ManyMany,
}

impl Relationship {
    /// ManyOne/OneOne materialize a single object, the rest an ordered array.
    pub const fn is_single_value(self) -> bool {
        matches!(self, Self::ManyOne | Self::OneOne)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkOptions {
    pub relationship: Relationship,
    pub foreign_table_id: String,
    /// Foreign field rendered as the link title.
    pub lookup_field_id: String,
    /// Physical table holding the key columns: host table, foreign table or junction.
    pub fk_host_table_name: String,
    /// Column (in `fk_host_table_name`) that points at the host record.
    pub self_key_name: String,
    /// Column (in `fk_host_table_name`) that points at the foreign record.
    pub foreign_key_name: String,
    #[serde(default)]
    pub symmetric_field_id: Option<String>,
    #[serde(default)]
    pub is_one_way: bool,
    /// Column (in `fk_host_table_name`) ordering linked records.
    #[serde(default)]
    pub order_column_name: Option<String>,
}

/// Physical join strategy derived from where the key columns live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkJoin {
    /// `host.fk_column = foreign.__id`
    FkOnHost { fk_column: String },
    /// `foreign.fk_column = host.__id`
    FkOnForeign { fk_column: String },
    Junction {
        table: String,
        self_key: String,
        foreign_key: String,
    },
}

impl LinkJoin {
    pub const fn is_junction(&self) -> bool {
        matches!(self, Self::Junction { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortSpec {
    pub field_id: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupOptions {
    pub link_field_id: String,
    pub lookup_field_id: String,
    #[serde(default)]
    pub filter: Option<FilterSet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupOptions {
    pub link_field_id: String,
    pub lookup_field_id: String,
    /// Template such as `sum({values})`.
    pub expression: String,
    #[serde(default)]
    pub filter: Option<FilterSet>,
}

/// Options of conditional lookups and rollups. These join the foreign table
/// through their filter instead of through a link field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalOptions {
    pub foreign_table_id: String,
    pub lookup_field_id: String,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub filter: Option<FilterSet>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default)]
    pub limit: Option<usize>,
}
