//! Batch strategies: which records one recompute pass covers.

use std::collections::BTreeSet;

use tracing::debug;

use crate::backend::EngineBackend;
use crate::config::EngineConfig;
use crate::domain::{AUTO_NUMBER_COLUMN, ID_COLUMN};
use crate::sql::ast::{col, int_lit, param, BinaryOp, OrderByItem, Select, TableFactor};
use crate::sql::render_select;
use crate::{EngineError, Value};

const CURSOR_ALIAS: &str = "t";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStrategy {
    /// Known ids, sorted, executed in chunks of `batch_size`.
    RecordIdBatch {
        record_ids: Vec<String>,
        batch_size: usize,
    },
    /// Pages the whole table in ascending auto-number order.
    AutoNumberCursor { page_size: usize },
}

impl BatchStrategy {
    /// `records` is `None` when the whole table is in scope.
    pub fn select(records: Option<&BTreeSet<String>>, config: &EngineConfig) -> Self {
        match records {
            Some(ids) if ids.len() <= config.record_id_strategy_limit => Self::RecordIdBatch {
                record_ids: ids.iter().cloned().collect(),
                batch_size: config.record_batch_size.max(1),
            },
            _ => Self::AutoNumberCursor {
                page_size: config.cursor_page_size.max(1),
            },
        }
    }

    pub(crate) fn into_batches<'a>(
        self,
        backend: &'a dyn EngineBackend,
        db_table_name: &str,
    ) -> Batches<'a> {
        match self {
            Self::RecordIdBatch {
                record_ids,
                batch_size,
            } => Batches::Ids {
                chunks: record_ids
                    .chunks(batch_size)
                    .map(<[String]>::to_vec)
                    .collect::<Vec<_>>()
                    .into_iter(),
            },
            Self::AutoNumberCursor { page_size } => Batches::Cursor(AutoNumberCursor::new(
                backend,
                db_table_name,
                page_size,
            )),
        }
    }
}

pub(crate) enum Batches<'a> {
    Ids {
        chunks: std::vec::IntoIter<Vec<String>>,
    },
    Cursor(AutoNumberCursor<'a>),
}

impl Batches<'_> {
    /// Record ids of the next batch, `None` once exhausted.
    pub(crate) async fn next_batch(&mut self) -> Result<Option<Vec<String>>, EngineError> {
        match self {
            Self::Ids { chunks } => Ok(chunks.next()),
            Self::Cursor(cursor) => cursor.next_page().await,
        }
    }
}

pub(crate) struct AutoNumberCursor<'a> {
    backend: &'a dyn EngineBackend,
    db_table_name: String,
    page_size: usize,
    after: Option<i64>,
    exhausted: bool,
}

impl<'a> AutoNumberCursor<'a> {
    pub(crate) fn new(
        backend: &'a dyn EngineBackend,
        db_table_name: &str,
        page_size: usize,
    ) -> Self {
        Self {
            backend,
            db_table_name: db_table_name.to_string(),
            page_size,
            after: None,
            exhausted: false,
        }
    }

    pub(crate) async fn next_page(&mut self) -> Result<Option<Vec<String>>, EngineError> {
        if self.exhausted {
            return Ok(None);
        }
        let mut select = Select::from(TableFactor::table(self.db_table_name.as_str(), CURSOR_ALIAS))
            .project(col(CURSOR_ALIAS, ID_COLUMN), ID_COLUMN)
            .project(col(CURSOR_ALIAS, AUTO_NUMBER_COLUMN), AUTO_NUMBER_COLUMN);
        if let Some(after) = self.after {
            select = select.filter(
                col(CURSOR_ALIAS, AUTO_NUMBER_COLUMN).binary(BinaryOp::Gt, param(after)),
            );
        }
        select.order_by = vec![OrderByItem::asc(col(CURSOR_ALIAS, AUTO_NUMBER_COLUMN))];
        select.limit = Some(int_lit(self.page_size as i64));

        let statement = render_select(&select, self.backend.dialect());
        let result = self.backend.execute(&statement.sql, &statement.params).await?;

        let mut page = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            let (Some(id), Some(auto_number)) = (
                row.first().and_then(record_id_of),
                row.get(1).and_then(Value::as_i64),
            ) else {
                continue;
            };
            page.push((auto_number, id));
        }
        // Backends are not trusted to honour ORDER BY together with LIMIT.
        page.sort_by_key(|(auto_number, _)| *auto_number);

        if result.rows.len() < self.page_size {
            self.exhausted = true;
        }
        let Some((last, _)) = page.last() else {
            self.exhausted = true;
            return Ok(None);
        };
        self.after = Some(*last);
        debug!(
            table = %self.db_table_name,
            rows = page.len(),
            after = *last,
            "fetched cursor page"
        );
        Ok(Some(page.into_iter().map(|(_, id)| id).collect()))
    }
}

/// Record ids are stored as text, but integer keys are accepted as well.
pub(crate) fn record_id_of(value: &Value) -> Option<String> {
    match value {
        Value::Text(id) => Some(id.clone()),
        Value::Integer(id) => Some(id.to_string()),
        _ => None,
    }
}
