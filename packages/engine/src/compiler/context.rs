use std::collections::BTreeMap;

use xxhash_rust::xxh3::xxh3_64;

use crate::config::EngineConfig;
use crate::dialect::Dialect;
use crate::domain::{TableDomain, ID_COLUMN};
use crate::sql::ast::{col, param, Cte, Ident, Join, Select, SqlExpr, TableFactor};

/// Postgres truncates identifiers past this many bytes.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Alias of the queried table in root statements.
pub(crate) const ROOT_ALIAS: &str = "t";

const RECORD_IDS_ALIAS: &str = "i";

/// How a computed field read through a link is valued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NestedMode {
    /// Read the foreign field's stored column.
    #[default]
    Materialized,
    /// Recompute the foreign field through its own CTEs.
    Recompute,
}

/// Rows a CTE covers. Root scopes are restricted to the records the query
/// asked for; nested scopes cover every row of their table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableScope {
    pub table_id: String,
    pub restricted: bool,
}

impl TableScope {
    pub fn nested(table_id: &str) -> Self {
        Self {
            table_id: table_id.to_string(),
            restricted: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CteEntry {
    pub name: String,
    pub scope: TableScope,
    pub source_field_id: String,
    /// Joined into the root query.
    pub joined: bool,
    /// Field id to the CTE column holding its value.
    pub columns: BTreeMap<String, String>,
}

/// Mutable state of one compilation pass. Never shared between queries.
pub struct QueryContext<'a> {
    pub(crate) domain: &'a TableDomain,
    pub(crate) dialect: &'static dyn Dialect,
    pub(crate) config: &'a EngineConfig,
    pub(crate) nested: NestedMode,
    pub(crate) root_table_id: String,
    pub(crate) root_record_ids: Option<Vec<String>>,
    /// CTE binding `root_record_ids` once for every restricted reader.
    record_ids_cte: Option<String>,
    entries: BTreeMap<(TableScope, String), CteEntry>,
    definitions: Vec<Cte>,
    references: BTreeMap<String, usize>,
    generating: Vec<String>,
    root_joins: Vec<Join>,
    inline_values: BTreeMap<String, SqlExpr>,
}

impl<'a> QueryContext<'a> {
    pub fn new(
        domain: &'a TableDomain,
        dialect: &'static dyn Dialect,
        config: &'a EngineConfig,
        root_table_id: &str,
    ) -> Self {
        Self {
            domain,
            dialect,
            config,
            nested: NestedMode::Materialized,
            root_table_id: root_table_id.to_string(),
            root_record_ids: None,
            record_ids_cte: None,
            entries: BTreeMap::new(),
            definitions: Vec::new(),
            references: BTreeMap::new(),
            generating: Vec::new(),
            root_joins: Vec::new(),
            inline_values: BTreeMap::new(),
        }
    }

    pub fn with_nested_mode(mut self, nested: NestedMode) -> Self {
        self.nested = nested;
        self
    }

    pub fn with_record_ids(mut self, record_ids: Option<Vec<String>>) -> Self {
        self.root_record_ids = record_ids;
        self
    }

    /// Scope for CTEs requested directly by the root query.
    pub fn root_scope(&self) -> TableScope {
        TableScope {
            table_id: self.root_table_id.clone(),
            restricted: self.root_record_ids.is_some(),
        }
    }

    pub fn entry(&self, scope: &TableScope, source_field_id: &str) -> Option<&CteEntry> {
        self.entries
            .get(&(scope.clone(), source_field_id.to_string()))
    }

    /// The entry for `source_field_id` joined into the root query, if any.
    pub fn joined_entry(&self, source_field_id: &str) -> Option<&CteEntry> {
        self.entries
            .values()
            .find(|entry| entry.joined && entry.source_field_id == source_field_id)
    }

    pub(crate) fn register(&mut self, entry: CteEntry, query: Select) {
        self.definitions.push(Cte {
            name: Ident::new(entry.name.clone()),
            materialized: false,
            query,
        });
        self.entries
            .insert((entry.scope.clone(), entry.source_field_id.clone()), entry);
    }

    /// `id IN (<root record ids>)`, read from a CTE registered on first use
    /// so the ids are bound once per statement. `None` without record ids.
    pub(crate) fn record_filter(&mut self, id: SqlExpr) -> Option<SqlExpr> {
        let ids = self.root_record_ids.as_ref()?;
        if self.record_ids_cte.is_none() {
            let Some(table) = self.domain.table(&self.root_table_id) else {
                return Some(id.in_list(id_params(ids)));
            };
            let name = derived_name("cte_ids", &[self.root_table_id.as_str()]);
            let query = Select::from(TableFactor::table(
                table.db_table_name.as_str(),
                RECORD_IDS_ALIAS,
            ))
            .project(col(RECORD_IDS_ALIAS, ID_COLUMN), ID_COLUMN)
            .filter(col(RECORD_IDS_ALIAS, ID_COLUMN).in_list(id_params(ids)));
            self.definitions.push(Cte {
                name: Ident::new(name.clone()),
                materialized: false,
                query,
            });
            self.record_ids_cte = Some(name);
        }
        self.shared_record_filter(id)
    }

    /// Like [`Self::record_filter`], but only when the ids CTE already
    /// exists.
    pub(crate) fn shared_record_filter(&mut self, id: SqlExpr) -> Option<SqlExpr> {
        let name = self.record_ids_cte.clone()?;
        self.note_reference(&name);
        let ids = Select::from(TableFactor::Table {
            name: name.as_str().into(),
            alias: None,
        })
        .project(col(name.as_str(), ID_COLUMN), ID_COLUMN);
        Some(id.in_subquery(ids))
    }

    pub(crate) fn note_reference(&mut self, cte_name: &str) {
        *self.references.entry(cte_name.to_string()).or_default() += 1;
    }

    /// Joins an entry into the root query once.
    pub(crate) fn join_root(&mut self, scope: &TableScope, source_field_id: &str, join: Join) {
        let key = (scope.clone(), source_field_id.to_string());
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        if entry.joined {
            return;
        }
        entry.joined = true;
        let name = entry.name.clone();
        self.root_joins.push(join);
        self.note_reference(&name);
    }

    /// Starts generating `field_id`. Returns false when it is already being
    /// generated further up the stack.
    pub(crate) fn enter(&mut self, field_id: &str) -> bool {
        if self.generating.iter().any(|id| id == field_id) {
            return false;
        }
        self.generating.push(field_id.to_string());
        true
    }

    pub(crate) fn exit(&mut self) {
        self.generating.pop();
    }

    pub(crate) fn set_inline_value(&mut self, field_id: &str, expr: SqlExpr) {
        self.inline_values.insert(field_id.to_string(), expr);
    }

    pub(crate) fn inline_value(&self, field_id: &str) -> Option<&SqlExpr> {
        self.inline_values.get(field_id)
    }

    pub(crate) fn take_root_joins(&mut self) -> Vec<Join> {
        std::mem::take(&mut self.root_joins)
    }

    /// WITH clause in definition order; nested CTEs precede their users.
    pub(crate) fn take_definitions(&mut self) -> Vec<Cte> {
        let materialize =
            self.config.materialize_ctes && self.dialect.supports_materialized_cte();
        let references = std::mem::take(&mut self.references);
        std::mem::take(&mut self.definitions)
            .into_iter()
            .map(|mut cte| {
                cte.materialized = materialize
                    && references.get(cte.name.as_str()).copied().unwrap_or(0) > 1;
                cte
            })
            .collect()
    }
}

fn id_params(ids: &[String]) -> Vec<SqlExpr> {
    ids.iter().map(|id| param(id.as_str())).collect()
}

/// `prefix_part_part`, lower-cased to `[a-z0-9_]`. Names that had to be
/// rewritten or that exceed the identifier limit get an xxh3 suffix.
pub(crate) fn derived_name(prefix: &str, parts: &[&str]) -> String {
    let raw = std::iter::once(prefix)
        .chain(parts.iter().copied())
        .collect::<Vec<_>>()
        .join("_");
    let sanitized: String = raw
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if sanitized == raw && sanitized.len() <= MAX_IDENTIFIER_LEN {
        return sanitized;
    }
    let suffix = format!("{:016x}", xxh3_64(raw.as_bytes()));
    let keep = MAX_IDENTIFIER_LEN - suffix.len() - 1;
    let head: String = sanitized.chars().take(keep).collect();
    format!("{head}_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::derived_name;

    #[test]
    fn simple_names_are_kept() {
        assert_eq!(derived_name("cte", &["child", "c_parent"]), "cte_child_c_parent");
    }

    #[test]
    fn rewritten_names_get_a_stable_hash() {
        let first = derived_name("cte", &["Tbl-1", "fld"]);
        let second = derived_name("cte", &["tbl_1", "fld"]);
        assert_ne!(first, second);
        assert!(first.starts_with("cte_tbl_1_fld_"));
        assert_eq!(first, derived_name("cte", &["Tbl-1", "fld"]));
    }

    #[test]
    fn long_names_fit_the_identifier_limit() {
        let long = "x".repeat(80);
        let name = derived_name("cte", &[&long, "field"]);
        assert_eq!(name.len(), 63);
    }
}
