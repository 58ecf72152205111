//! Table Domain: the field and table metadata the engine consumes.
//!
//! The schema store owns these definitions; the engine reads them and, at
//! field-definition time, validates a new or changed field before the store
//! commits it (`add_field`, `replace_field`).

mod field;
mod filter;
mod formula;
mod options;
mod rollup;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub use field::{Field, FieldKind, FormulaOptions, StorageType, SystemColumn};
pub use filter::{
    Conjunction, FilterCondition, FilterItem, FilterOperator, FilterSet, FilterValue,
};
pub use formula::{FormulaBinaryOp, FormulaExpr, FormulaFunction, FormulaUnaryOp};
pub use options::{
    ConditionalOptions, LinkJoin, LinkOptions, LookupOptions, Relationship, RollupOptions,
    SortDirection, SortSpec,
};
pub use rollup::{parse_rollup_expression, RollupFunction};

use crate::errors;
use crate::graph::build_graph;
use crate::EngineError;

pub const ID_COLUMN: &str = "__id";
pub const VERSION_COLUMN: &str = "__version";
pub const AUTO_NUMBER_COLUMN: &str = "__auto_number";
pub const CREATED_TIME_COLUMN: &str = "__created_time";
pub const LAST_MODIFIED_TIME_COLUMN: &str = "__last_modified_time";
pub const CREATED_BY_COLUMN: &str = "__created_by";
pub const LAST_MODIFIED_BY_COLUMN: &str = "__last_modified_by";
/// Row id column of junction tables; the stable tie-break for link ordering.
pub const JUNCTION_ID_COLUMN: &str = "__id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: String,
    pub name: String,
    pub db_table_name: String,
    /// Field whose value titles this table's records inside link objects.
    pub primary_field_id: String,
    pub fields: Vec<Field>,
}

impl Table {
    pub fn new(id: &str, name: &str, db_table_name: &str, primary_field_id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            db_table_name: db_table_name.to_string(),
            primary_field_id: primary_field_id.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TableDomainRepr {
    tables: Vec<Table>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TableDomainRepr")]
pub struct TableDomain {
    tables: Vec<Table>,
    #[serde(skip)]
    table_index: BTreeMap<String, usize>,
    #[serde(skip)]
    field_index: BTreeMap<String, (usize, usize)>,
}

impl TryFrom<TableDomainRepr> for TableDomain {
    type Error = EngineError;

    fn try_from(repr: TableDomainRepr) -> Result<Self, Self::Error> {
        Self::new(repr.tables)
    }
}

impl TableDomain {
    /// Builds a domain and rejects duplicate ids or dependency cycles.
    pub fn new(tables: Vec<Table>) -> Result<Self, EngineError> {
        let mut domain = Self {
            tables,
            table_index: BTreeMap::new(),
            field_index: BTreeMap::new(),
        };
        domain.reindex()?;
        for field in domain.all_fields().filter(|field| !field.has_error) {
            domain.validate_field(field)?;
        }
        build_graph(&domain)?;
        Ok(domain)
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json).map_err(|error| {
            errors::invalid_field_definition_error("<domain>", &error.to_string())
        })
    }

    fn reindex(&mut self) -> Result<(), EngineError> {
        self.table_index.clear();
        self.field_index.clear();
        for (table_idx, table) in self.tables.iter().enumerate() {
            if self.table_index.insert(table.id.clone(), table_idx).is_some() {
                return Err(errors::invalid_field_definition_error(
                    &table.id,
                    "duplicate table id",
                ));
            }
            for (field_idx, field) in table.fields.iter().enumerate() {
                if field.table_id != table.id {
                    return Err(errors::invalid_field_definition_error(
                        &field.id,
                        &format!(
                            "declared in table `{}` but owned by `{}`",
                            table.id, field.table_id
                        ),
                    ));
                }
                if self
                    .field_index
                    .insert(field.id.clone(), (table_idx, field_idx))
                    .is_some()
                {
                    return Err(errors::invalid_field_definition_error(
                        &field.id,
                        "duplicate field id",
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table(&self, table_id: &str) -> Option<&Table> {
        self.table_index
            .get(table_id)
            .map(|idx| &self.tables[*idx])
    }

    pub fn field(&self, field_id: &str) -> Option<&Field> {
        self.field_index
            .get(field_id)
            .map(|(table_idx, field_idx)| &self.tables[*table_idx].fields[*field_idx])
    }

    /// Fields of a table in declaration order.
    pub fn fields(&self, table_id: &str) -> &[Field] {
        self.table(table_id)
            .map(|table| table.fields.as_slice())
            .unwrap_or(&[])
    }

    pub fn all_fields(&self) -> impl Iterator<Item = &Field> {
        self.tables.iter().flat_map(|table| table.fields.iter())
    }

    pub fn link_options(&self, field_id: &str) -> Option<&LinkOptions> {
        self.field(field_id).and_then(Field::link_options)
    }

    pub fn foreign_table(&self, link_field_id: &str) -> Option<&Table> {
        let options = self.link_options(link_field_id)?;
        self.table(&options.foreign_table_id)
    }

    /// Resolves where a link's key columns live into a join strategy.
    pub fn link_join(&self, link_field: &Field) -> Result<LinkJoin, EngineError> {
        let options = link_field.link_options().ok_or_else(|| {
            errors::invalid_link_options_error(&link_field.id, "field is not a link")
        })?;
        let host = self.table(&link_field.table_id).ok_or_else(|| {
            errors::missing_foreign_table_error(&link_field.id, &link_field.table_id)
        })?;
        let foreign = self.table(&options.foreign_table_id).ok_or_else(|| {
            errors::missing_foreign_table_error(&link_field.id, &options.foreign_table_id)
        })?;

        let is_self_link = host.db_table_name == foreign.db_table_name;
        if options.fk_host_table_name == host.db_table_name
            && (!is_self_link || options.self_key_name == ID_COLUMN)
        {
            if options.self_key_name != ID_COLUMN {
                return Err(errors::invalid_link_options_error(
                    &link_field.id,
                    "foreign key on the host table requires self key `__id`",
                ));
            }
            return Ok(LinkJoin::FkOnHost {
                fk_column: options.foreign_key_name.clone(),
            });
        }
        if options.fk_host_table_name == foreign.db_table_name {
            if options.foreign_key_name != ID_COLUMN {
                return Err(errors::invalid_link_options_error(
                    &link_field.id,
                    "foreign key on the foreign table requires foreign key `__id`",
                ));
            }
            return Ok(LinkJoin::FkOnForeign {
                fk_column: options.self_key_name.clone(),
            });
        }
        Ok(LinkJoin::Junction {
            table: options.fk_host_table_name.clone(),
            self_key: options.self_key_name.clone(),
            foreign_key: options.foreign_key_name.clone(),
        })
    }

    /// Validates and appends a field definition. The domain is unchanged
    /// when the definition is rejected.
    pub fn add_field(&mut self, field: Field) -> Result<(), EngineError> {
        if self.field_index.contains_key(&field.id) {
            return Err(errors::invalid_field_definition_error(
                &field.id,
                "a field with this id already exists",
            ));
        }
        let table_idx = *self.table_index.get(&field.table_id).ok_or_else(|| {
            errors::missing_foreign_table_error(&field.id, &field.table_id)
        })?;

        let mut candidate = self.clone();
        candidate.tables[table_idx].fields.push(field.clone());
        candidate.reindex()?;
        candidate.validate_field(&field)?;
        build_graph(&candidate)?;
        *self = candidate;
        Ok(())
    }

    /// Validates and swaps in a changed definition of an existing field.
    pub fn replace_field(&mut self, field: Field) -> Result<(), EngineError> {
        let (table_idx, field_idx) = *self.field_index.get(&field.id).ok_or_else(|| {
            errors::missing_field_error(&field.id, "cannot replace an unknown field")
        })?;
        if self.tables[table_idx].id != field.table_id {
            return Err(errors::invalid_field_definition_error(
                &field.id,
                "a field cannot move between tables",
            ));
        }

        let mut candidate = self.clone();
        candidate.tables[table_idx].fields[field_idx] = field.clone();
        candidate.validate_field(&field)?;
        build_graph(&candidate)?;
        *self = candidate;
        Ok(())
    }

    /// Deletes a field and flags every field that read it as erroring.
    /// Returns the ids of the flagged fields.
    pub fn remove_field(&mut self, field_id: &str) -> Result<Vec<String>, EngineError> {
        let (table_idx, field_idx) = *self
            .field_index
            .get(field_id)
            .ok_or_else(|| {
                errors::missing_field_error(field_id, "cannot remove an unknown field")
            })?;
        self.tables[table_idx].fields.remove(field_idx);

        let mut flagged = Vec::new();
        for table in &mut self.tables {
            for field in &mut table.fields {
                if let FieldKind::Link(options) = &mut field.kind {
                    if options.symmetric_field_id.as_deref() == Some(field_id) {
                        options.symmetric_field_id = None;
                    }
                }
                if direct_references(field).contains(field_id) && !field.has_error {
                    field.has_error = true;
                    flagged.push(field.id.clone());
                }
            }
        }
        self.reindex()?;
        Ok(flagged)
    }

    fn validate_field(&self, field: &Field) -> Result<(), EngineError> {
        if field.db_field_name.trim().is_empty() {
            return Err(errors::invalid_field_definition_error(
                &field.id,
                "db_field_name must not be empty",
            ));
        }

        match &field.kind {
            FieldKind::Scalar | FieldKind::System(_) => Ok(()),
            FieldKind::Link(options) => {
                let foreign = self.table(&options.foreign_table_id).ok_or_else(|| {
                    errors::missing_foreign_table_error(&field.id, &options.foreign_table_id)
                })?;
                self.require_field_in(&options.lookup_field_id, &foreign.id, "link title")?;
                let join = self.link_join(field)?;
                let needs_junction = options.relationship == Relationship::ManyMany
                    || (options.relationship == Relationship::OneMany && options.is_one_way);
                if needs_junction && !join.is_junction() {
                    return Err(errors::invalid_link_options_error(
                        &field.id,
                        "ManyMany and one-way OneMany links require a junction table",
                    ));
                }
                if !needs_junction && join.is_junction() {
                    return Err(errors::invalid_link_options_error(
                        &field.id,
                        "only ManyMany and one-way OneMany links may use a junction table",
                    ));
                }
                Ok(())
            }
            FieldKind::Lookup(options) => {
                let foreign_table_id =
                    self.require_link(&field.id, &options.link_field_id, &field.table_id)?;
                self.require_field_in(
                    &options.lookup_field_id,
                    &foreign_table_id,
                    "lookup target",
                )?;
                self.validate_filter(
                    field,
                    options.filter.as_ref(),
                    &foreign_table_id,
                )
            }
            FieldKind::Rollup(options) => {
                let foreign_table_id =
                    self.require_link(&field.id, &options.link_field_id, &field.table_id)?;
                self.require_field_in(
                    &options.lookup_field_id,
                    &foreign_table_id,
                    "rollup target",
                )?;
                if parse_rollup_expression(&options.expression).is_none() {
                    return Err(errors::invalid_rollup_expression_error(
                        &field.id,
                        &options.expression,
                    ));
                }
                self.validate_filter(
                    field,
                    options.filter.as_ref(),
                    &foreign_table_id,
                )
            }
            FieldKind::ConditionalLookup(options) | FieldKind::ConditionalRollup(options) => {
                if self.table(&options.foreign_table_id).is_none() {
                    return Err(errors::missing_foreign_table_error(
                        &field.id,
                        &options.foreign_table_id,
                    ));
                }
                self.require_field_in(
                    &options.lookup_field_id,
                    &options.foreign_table_id,
                    "conditional target",
                )?;
                if matches!(field.kind, FieldKind::ConditionalRollup(_)) {
                    let expression = options.expression.as_deref().unwrap_or_default();
                    if parse_rollup_expression(expression).is_none() {
                        return Err(errors::invalid_rollup_expression_error(&field.id, expression));
                    }
                }
                if let Some(sort) = &options.sort {
                    self.require_field_in(&sort.field_id, &options.foreign_table_id, "sort field")?;
                }
                if options.limit == Some(0) {
                    return Err(errors::invalid_field_definition_error(
                        &field.id,
                        "limit must be greater than zero",
                    ));
                }
                self.validate_filter(field, options.filter.as_ref(), &options.foreign_table_id)
            }
            FieldKind::Formula(options) => {
                if let Some(function) = options.expression.arity_violation() {
                    return Err(errors::invalid_field_definition_error(
                        &field.id,
                        &format!("wrong number of arguments for {function:?}"),
                    ));
                }
                for reference in options.expression.referenced_field_ids() {
                    self.require_field_in(&reference, &field.table_id, "formula reference")?;
                }
                Ok(())
            }
        }
    }

    fn require_field_in(
        &self,
        field_id: &str,
        table_id: &str,
        context: &str,
    ) -> Result<(), EngineError> {
        match self.field(field_id) {
            Some(found) if found.table_id == table_id => Ok(()),
            Some(_) => Err(errors::missing_field_error(
                field_id,
                &format!("{context} must belong to table `{table_id}`"),
            )),
            None => Err(errors::missing_field_error(field_id, context)),
        }
    }

    fn require_link(
        &self,
        field_id: &str,
        link_field_id: &str,
        host_table_id: &str,
    ) -> Result<String, EngineError> {
        let link = self
            .field(link_field_id)
            .filter(|link| link.table_id == host_table_id)
            .ok_or_else(|| errors::missing_field_error(link_field_id, "join link"))?;
        let options = link.link_options().ok_or_else(|| {
            errors::invalid_field_definition_error(
                field_id,
                &format!("`{link_field_id}` is not a link field"),
            )
        })?;
        if self.table(&options.foreign_table_id).is_none() {
            return Err(errors::missing_foreign_table_error(
                link_field_id,
                &options.foreign_table_id,
            ));
        }
        Ok(options.foreign_table_id.clone())
    }

    fn validate_filter(
        &self,
        field: &Field,
        filter: Option<&FilterSet>,
        foreign_table_id: &str,
    ) -> Result<(), EngineError> {
        let Some(filter) = filter else {
            return Ok(());
        };
        for field_id in filter.foreign_field_ids() {
            self.require_field_in(&field_id, foreign_table_id, "filter field")?;
        }
        for field_id in filter.host_field_ids() {
            self.require_field_in(&field_id, &field.table_id, "filter host reference")?;
        }
        if let Some(operator) = missing_filter_value(filter) {
            return Err(errors::invalid_field_definition_error(
                &field.id,
                &format!("filter operator `{operator:?}` requires a value"),
            ));
        }
        Ok(())
    }
}

fn missing_filter_value(filter: &FilterSet) -> Option<FilterOperator> {
    filter.items.iter().find_map(|item| match item {
        FilterItem::Condition(condition)
            if condition.operator.takes_value() && condition.value.is_none() =>
        {
            Some(condition.operator)
        }
        FilterItem::Condition(_) => None,
        FilterItem::Group(group) => missing_filter_value(group),
    })
}

/// Every field id a definition names, regardless of edge kind.
pub(crate) fn direct_references(field: &Field) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    match &field.kind {
        FieldKind::Scalar | FieldKind::System(_) => {}
        FieldKind::Link(options) => {
            out.insert(options.lookup_field_id.clone());
        }
        FieldKind::Lookup(options) => {
            out.insert(options.link_field_id.clone());
            out.insert(options.lookup_field_id.clone());
            if let Some(filter) = &options.filter {
                out.extend(filter.foreign_field_ids());
                out.extend(filter.host_field_ids());
            }
        }
        FieldKind::Rollup(options) => {
            out.insert(options.link_field_id.clone());
            out.insert(options.lookup_field_id.clone());
            if let Some(filter) = &options.filter {
                out.extend(filter.foreign_field_ids());
                out.extend(filter.host_field_ids());
            }
        }
        FieldKind::ConditionalLookup(options) | FieldKind::ConditionalRollup(options) => {
            out.insert(options.lookup_field_id.clone());
            if let Some(sort) = &options.sort {
                out.insert(sort.field_id.clone());
            }
            if let Some(filter) = &options.filter {
                out.extend(filter.foreign_field_ids());
                out.extend(filter.host_field_ids());
            }
        }
        FieldKind::Formula(options) => {
            out.extend(options.expression.referenced_field_ids());
        }
    }
    out
}
