//! Resolves planner scopes into record ids using the rows earlier steps
//! actually changed.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::backend::EngineBackend;
use crate::domain::{LinkJoin, TableDomain, ID_COLUMN};
use crate::execution::batch::record_id_of;
use crate::planner::{RecomputeScope, ScopeSource};
use crate::sql::ast::{col, param, Select, SqlExpr, TableFactor};
use crate::sql::render_select;
use crate::EngineError;

/// Changed record ids per field id.
pub(crate) type ChangedRecords = BTreeMap<String, BTreeSet<String>>;

const LINK_ALIAS: &str = "l";

/// `None` means every record of the table.
pub(crate) async fn resolve_scope(
    backend: &dyn EngineBackend,
    domain: &TableDomain,
    scope: &RecomputeScope,
    changed: &ChangedRecords,
    chunk_size: usize,
) -> Result<Option<BTreeSet<String>>, EngineError> {
    let sources = match scope {
        RecomputeScope::WholeTable => return Ok(None),
        RecomputeScope::Records(ids) => return Ok(Some(ids.clone())),
        RecomputeScope::Dependents(sources) => sources,
    };

    let mut records = BTreeSet::new();
    for source in sources {
        match source {
            ScopeSource::Records(ids) => records.extend(ids.iter().cloned()),
            ScopeSource::SameRecord { field_id } => {
                if let Some(ids) = changed.get(field_id) {
                    records.extend(ids.iter().cloned());
                }
            }
            ScopeSource::Linked {
                link_field_id,
                field_id,
            } => {
                let Some(foreign_ids) = changed.get(field_id).filter(|ids| !ids.is_empty()) else {
                    continue;
                };
                match linked_hosts(backend, domain, link_field_id, foreign_ids, chunk_size).await? {
                    Some(hosts) => records.extend(hosts),
                    None => return Ok(None),
                }
            }
        }
    }
    Ok(Some(records))
}

/// Host records of `link_field_id` pointing at any of `foreign_ids`.
/// `None` when the link cannot be resolved and the whole table must be
/// recomputed instead.
async fn linked_hosts(
    backend: &dyn EngineBackend,
    domain: &TableDomain,
    link_field_id: &str,
    foreign_ids: &BTreeSet<String>,
    chunk_size: usize,
) -> Result<Option<BTreeSet<String>>, EngineError> {
    let resolved = domain.field(link_field_id).and_then(|link| {
        let host = domain.table(&link.table_id)?;
        let foreign = domain.foreign_table(link_field_id)?;
        let join = domain.link_join(link).ok()?;
        Some((host.db_table_name.clone(), foreign.db_table_name.clone(), join))
    });
    let Some((host_table, foreign_table, join)) = resolved else {
        warn!(
            link_field_id,
            "link cannot be resolved; recomputing the whole table"
        );
        return Ok(None);
    };

    let ids: Vec<&String> = foreign_ids.iter().collect();
    let mut hosts = BTreeSet::new();
    for chunk in ids.chunks(chunk_size.max(1)) {
        let keys: Vec<SqlExpr> = chunk.iter().map(|id| param(id.as_str())).collect();
        let select = match &join {
            LinkJoin::FkOnHost { fk_column } => {
                Select::from(TableFactor::table(host_table.as_str(), LINK_ALIAS))
                    .project(col(LINK_ALIAS, ID_COLUMN), "host_id")
                    .filter(col(LINK_ALIAS, fk_column.as_str()).in_list(keys))
            }
            LinkJoin::FkOnForeign { fk_column } => {
                Select::from(TableFactor::table(foreign_table.as_str(), LINK_ALIAS))
                    .project(col(LINK_ALIAS, fk_column.as_str()), "host_id")
                    .filter(col(LINK_ALIAS, ID_COLUMN).in_list(keys))
                    .filter(col(LINK_ALIAS, fk_column.as_str()).is_not_null())
            }
            LinkJoin::Junction {
                table,
                self_key,
                foreign_key,
            } => Select::from(TableFactor::table(table.as_str(), LINK_ALIAS))
                .project(col(LINK_ALIAS, self_key.as_str()), "host_id")
                .filter(col(LINK_ALIAS, foreign_key.as_str()).in_list(keys)),
        };
        let statement = render_select(&select, backend.dialect());
        let result = backend.execute(&statement.sql, &statement.params).await?;
        hosts.extend(
            result
                .rows
                .iter()
                .filter_map(|row| row.first().and_then(record_id_of)),
        );
    }
    Ok(Some(hosts))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{resolve_scope, ChangedRecords};
    use crate::backend::{EngineBackend, SqlDialect};
    use crate::planner::{RecomputeScope, ScopeSource};
    use crate::test_support::sales_domain;
    use crate::{EngineError, QueryResult, Value};

    /// Answers every statement with the same ids and records the SQL.
    struct FixedBackend {
        ids: Vec<&'static str>,
        statements: Mutex<Vec<(String, Vec<Value>)>>,
    }

    #[async_trait(?Send)]
    impl EngineBackend for FixedBackend {
        fn dialect(&self) -> SqlDialect {
            SqlDialect::Sqlite
        }

        async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, EngineError> {
            self.statements
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            Ok(QueryResult {
                rows: self.ids.iter().map(|id| vec![Value::from(*id)]).collect(),
            })
        }
    }

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|id| id.to_string()).collect()
    }

    #[tokio::test(flavor = "current_thread")]
    async fn same_record_sources_read_the_changed_map() {
        let backend = FixedBackend {
            ids: Vec::new(),
            statements: Mutex::new(Vec::new()),
        };
        let mut changed = ChangedRecords::new();
        changed.insert("p_total".into(), set(&["p1", "p2"]));
        let scope = RecomputeScope::Dependents(vec![
            ScopeSource::SameRecord {
                field_id: "p_total".into(),
            },
            ScopeSource::Records(set(&["p9"])),
        ]);

        let resolved = resolve_scope(&backend, &sales_domain(), &scope, &changed, 100)
            .await
            .unwrap();
        assert_eq!(resolved, Some(set(&["p1", "p2", "p9"])));
        assert!(backend.statements.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn linked_sources_query_the_foreign_key_side() {
        let backend = FixedBackend {
            ids: vec!["p1"],
            statements: Mutex::new(Vec::new()),
        };
        let mut changed = ChangedRecords::new();
        changed.insert("c_amount".into(), set(&["c1", "c2", "c3"]));
        let scope = RecomputeScope::Dependents(vec![ScopeSource::Linked {
            link_field_id: "p_children".into(),
            field_id: "c_amount".into(),
        }]);

        let resolved = resolve_scope(&backend, &sales_domain(), &scope, &changed, 2)
            .await
            .unwrap();
        assert_eq!(resolved, Some(set(&["p1"])));

        let statements = backend.statements.lock().unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0].0,
            "SELECT \"l\".\"__fk_parent\" AS \"host_id\" FROM \"child_t\" AS \"l\" \
             WHERE ((\"l\".\"__id\" IN (?, ?)) AND (\"l\".\"__fk_parent\" IS NOT NULL))"
        );
        assert_eq!(statements[1].1, vec![Value::from("c3")]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn junction_links_read_the_self_key() {
        let backend = FixedBackend {
            ids: vec!["c1", "c2"],
            statements: Mutex::new(Vec::new()),
        };
        let mut changed = ChangedRecords::new();
        changed.insert("t_name".into(), set(&["g1"]));
        let scope = RecomputeScope::Dependents(vec![ScopeSource::Linked {
            link_field_id: "c_tags".into(),
            field_id: "t_name".into(),
        }]);

        let resolved = resolve_scope(&backend, &sales_domain(), &scope, &changed, 100)
            .await
            .unwrap();
        assert_eq!(resolved, Some(set(&["c1", "c2"])));
        assert!(backend.statements.lock().unwrap()[0]
            .0
            .starts_with("SELECT \"l\".\"child_id\" AS \"host_id\" FROM \"junction_child_tags\""));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unknown_links_widen_to_the_whole_table() {
        let backend = FixedBackend {
            ids: Vec::new(),
            statements: Mutex::new(Vec::new()),
        };
        let mut changed = ChangedRecords::new();
        changed.insert("c_amount".into(), set(&["c1"]));
        let scope = RecomputeScope::Dependents(vec![ScopeSource::Linked {
            link_field_id: "gone".into(),
            field_id: "c_amount".into(),
        }]);

        let resolved = resolve_scope(&backend, &sales_domain(), &scope, &changed, 100)
            .await
            .unwrap();
        assert_eq!(resolved, None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn nothing_changed_resolves_to_no_records() {
        let backend = FixedBackend {
            ids: vec!["p1"],
            statements: Mutex::new(Vec::new()),
        };
        let scope = RecomputeScope::Dependents(vec![ScopeSource::Linked {
            link_field_id: "p_children".into(),
            field_id: "c_amount".into(),
        }]);
        let resolved = resolve_scope(&backend, &sales_domain(), &scope, &ChangedRecords::new(), 100)
            .await
            .unwrap();
        assert_eq!(resolved, Some(BTreeSet::new()));
        assert!(backend.statements.lock().unwrap().is_empty());
    }
}
