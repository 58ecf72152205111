use computed_engine::domain::{
    ConditionalOptions, Field, FieldKind, FilterCondition, FilterItem, FilterOperator, FilterSet,
    FormulaBinaryOp, FormulaExpr, FormulaOptions, LinkOptions, LookupOptions, Relationship,
    RollupOptions, StorageType, Table, TableDomain,
};
use computed_engine::{Engine, Value};

use super::simulation::exec;

pub fn link(id: &str, table_id: &str, db_field_name: &str, options: LinkOptions) -> Field {
    let is_multiple = !options.relationship.is_single_value();
    Field::scalar(id, table_id, id, db_field_name, StorageType::Json)
        .multiple(is_multiple)
        .with_kind(FieldKind::Link(options))
}

pub fn lookup(
    id: &str,
    table_id: &str,
    link_field_id: &str,
    target: &str,
    multiple: bool,
) -> Field {
    let storage = if multiple {
        StorageType::Json
    } else {
        StorageType::Text
    };
    Field::scalar(id, table_id, id, id, storage)
        .multiple(multiple)
        .with_kind(FieldKind::Lookup(LookupOptions {
            link_field_id: link_field_id.to_string(),
            lookup_field_id: target.to_string(),
            filter: None,
        }))
}

pub fn rollup(
    id: &str,
    table_id: &str,
    link_field_id: &str,
    target: &str,
    expression: &str,
    storage_type: StorageType,
) -> Field {
    Field::scalar(id, table_id, id, id, storage_type).with_kind(FieldKind::Rollup(RollupOptions {
        link_field_id: link_field_id.to_string(),
        lookup_field_id: target.to_string(),
        expression: expression.to_string(),
        filter: None,
    }))
}

pub fn formula(id: &str, table_id: &str, expression: FormulaExpr) -> Field {
    Field::scalar(id, table_id, id, id, StorageType::Real)
        .with_kind(FieldKind::Formula(FormulaOptions { expression }))
}

/// parent 1-n child (foreign key on child), child n-n tag (junction).
pub fn sales_domain(tag_order_column: Option<&str>) -> TableDomain {
    let parent = Table::new("parent", "Parent", "parent_t", "p_name")
        .with_field(Field::scalar("p_name", "parent", "Name", "name", StorageType::Text))
        .with_field(link(
            "p_children",
            "parent",
            "children",
            LinkOptions {
                relationship: Relationship::OneMany,
                foreign_table_id: "child".to_string(),
                lookup_field_id: "c_title".to_string(),
                fk_host_table_name: "child_t".to_string(),
                self_key_name: "__fk_parent".to_string(),
                foreign_key_name: "__id".to_string(),
                symmetric_field_id: Some("c_parent".to_string()),
                is_one_way: false,
                order_column_name: None,
            },
        ))
        .with_field(rollup(
            "p_total",
            "parent",
            "p_children",
            "c_amount",
            "sum({values})",
            StorageType::Real,
        ))
        .with_field(lookup("p_titles", "parent", "p_children", "c_title", true))
        .with_field(formula(
            "p_total_x2",
            "parent",
            FormulaExpr::binary(
                FormulaBinaryOp::Multiply,
                FormulaExpr::field("p_total"),
                FormulaExpr::number(2.0),
            ),
        ));

    let child = Table::new("child", "Child", "child_t", "c_title")
        .with_field(Field::scalar("c_title", "child", "Title", "title", StorageType::Text))
        .with_field(Field::scalar("c_amount", "child", "Amount", "amount", StorageType::Real))
        .with_field(link(
            "c_parent",
            "child",
            "parent",
            LinkOptions {
                relationship: Relationship::ManyOne,
                foreign_table_id: "parent".to_string(),
                lookup_field_id: "p_name".to_string(),
                fk_host_table_name: "child_t".to_string(),
                self_key_name: "__id".to_string(),
                foreign_key_name: "__fk_parent".to_string(),
                symmetric_field_id: Some("p_children".to_string()),
                is_one_way: false,
                order_column_name: None,
            },
        ))
        .with_field(lookup("c_parent_name", "child", "c_parent", "p_name", false))
        .with_field(link(
            "c_tags",
            "child",
            "tags",
            LinkOptions {
                relationship: Relationship::ManyMany,
                foreign_table_id: "tag".to_string(),
                lookup_field_id: "t_name".to_string(),
                fk_host_table_name: "junction_child_tags".to_string(),
                self_key_name: "child_id".to_string(),
                foreign_key_name: "tag_id".to_string(),
                symmetric_field_id: None,
                is_one_way: true,
                order_column_name: tag_order_column.map(str::to_string),
            },
        ))
        .with_field(rollup(
            "c_tag_names",
            "child",
            "c_tags",
            "t_name",
            "array_join({values})",
            StorageType::Text,
        ));

    let tag = Table::new("tag", "Tag", "tag_t", "t_name")
        .with_field(Field::scalar("t_name", "tag", "Name", "name", StorageType::Text))
        .with_field(Field::scalar("t_weight", "tag", "Weight", "weight", StorageType::Real));

    TableDomain::new(vec![parent, child, tag]).expect("sales domain is valid")
}

pub const SALES_SCHEMA: &str = "
CREATE TABLE parent_t (
    __auto_number INTEGER PRIMARY KEY AUTOINCREMENT,
    __id TEXT NOT NULL UNIQUE,
    __version INTEGER NOT NULL DEFAULT 1,
    name TEXT,
    children TEXT,
    p_total REAL,
    p_titles TEXT,
    p_total_x2 REAL
);
CREATE TABLE child_t (
    __auto_number INTEGER PRIMARY KEY AUTOINCREMENT,
    __id TEXT NOT NULL UNIQUE,
    __version INTEGER NOT NULL DEFAULT 1,
    title TEXT,
    amount REAL,
    __fk_parent TEXT,
    parent TEXT,
    c_parent_name TEXT,
    tags TEXT,
    c_tag_names TEXT
);
CREATE TABLE tag_t (
    __auto_number INTEGER PRIMARY KEY AUTOINCREMENT,
    __id TEXT NOT NULL UNIQUE,
    __version INTEGER NOT NULL DEFAULT 1,
    name TEXT,
    weight REAL
);
CREATE TABLE junction_child_tags (
    __id INTEGER PRIMARY KEY,
    child_id TEXT NOT NULL,
    tag_id TEXT NOT NULL,
    __order INTEGER
);
";

pub async fn insert_parent(engine: &Engine, id: &str, name: &str) {
    exec(
        engine,
        "INSERT INTO parent_t (__id, name) VALUES (?, ?)",
        &[Value::from(id), Value::from(name)],
    )
    .await;
}

pub async fn insert_child(
    engine: &Engine,
    id: &str,
    title: &str,
    amount: f64,
    parent: Option<&str>,
) {
    exec(
        engine,
        "INSERT INTO child_t (__id, title, amount, __fk_parent) VALUES (?, ?, ?, ?)",
        &[
            Value::from(id),
            Value::from(title),
            Value::from(amount),
            parent.map(Value::from).unwrap_or(Value::Null),
        ],
    )
    .await;
}

pub async fn insert_tag(engine: &Engine, id: &str, name: &str) {
    exec(
        engine,
        "INSERT INTO tag_t (__id, name) VALUES (?, ?)",
        &[Value::from(id), Value::from(name)],
    )
    .await;
}

pub async fn link_tag(engine: &Engine, junction_id: i64, child_id: &str, tag_id: &str, order: i64) {
    exec(
        engine,
        "INSERT INTO junction_child_tags (__id, child_id, tag_id, __order) VALUES (?, ?, ?, ?)",
        &[
            Value::Integer(junction_id),
            Value::from(child_id),
            Value::from(tag_id),
            Value::Integer(order),
        ],
    )
    .await;
}

/// `level_i = level_{i-1} * factor` for odd `i`, `+ factor` for even `i`,
/// with `level_0` the scalar `base`.
pub fn chain_domain(depth: usize, factor: f64) -> TableDomain {
    let mut table = Table::new("chain", "Chain", "chain_t", "base")
        .with_field(Field::scalar("base", "chain", "Base", "base", StorageType::Real));
    for level in 1..=depth {
        let previous = if level == 1 {
            "base".to_string()
        } else {
            format!("level_{}", level - 1)
        };
        let op = if level % 2 == 0 {
            FormulaBinaryOp::Add
        } else {
            FormulaBinaryOp::Multiply
        };
        table = table.with_field(formula(
            &format!("level_{level}"),
            "chain",
            FormulaExpr::binary(op, FormulaExpr::field(&previous), FormulaExpr::number(factor)),
        ));
    }
    TableDomain::new(vec![table]).expect("chain domain is valid")
}

pub fn chain_schema(depth: usize) -> String {
    let levels: String = (1..=depth)
        .map(|level| format!(",\n    level_{level} REAL"))
        .collect();
    format!(
        "CREATE TABLE chain_t (
    __auto_number INTEGER PRIMARY KEY AUTOINCREMENT,
    __id TEXT NOT NULL UNIQUE,
    __version INTEGER NOT NULL DEFAULT 1,
    base REAL{levels}
);"
    )
}

/// Direct evaluation of the chain `chain_domain` describes.
pub fn expected_chain(base: f64, depth: usize, factor: f64) -> f64 {
    (1..=depth).fold(base, |value, level| {
        if level % 2 == 0 {
            value + factor
        } else {
            value * factor
        }
    })
}

/// Orders sum the positive payments of their customer.
pub fn payments_domain() -> TableDomain {
    let filter = FilterSet::all(vec![
        FilterItem::Condition(FilterCondition::host_field(
            "pay_customer",
            FilterOperator::Is,
            "ord_customer",
        )),
        FilterItem::Condition(FilterCondition::literal(
            "pay_amount",
            FilterOperator::Greater,
            serde_json::json!(0),
        )),
    ]);
    let orders = Table::new("orders", "Orders", "orders_t", "ord_customer")
        .with_field(Field::scalar(
            "ord_customer",
            "orders",
            "Customer",
            "customer",
            StorageType::Text,
        ))
        .with_field(
            Field::scalar("ord_paid", "orders", "Paid", "paid", StorageType::Real).with_kind(
                FieldKind::ConditionalRollup(ConditionalOptions {
                    foreign_table_id: "payments".to_string(),
                    lookup_field_id: "pay_amount".to_string(),
                    expression: Some("sum({values})".to_string()),
                    filter: Some(filter),
                    sort: None,
                    limit: None,
                }),
            ),
        );
    let payments = Table::new("payments", "Payments", "payments_t", "pay_customer")
        .with_field(Field::scalar(
            "pay_customer",
            "payments",
            "Customer",
            "customer",
            StorageType::Text,
        ))
        .with_field(Field::scalar(
            "pay_amount",
            "payments",
            "Amount",
            "amount",
            StorageType::Real,
        ));
    TableDomain::new(vec![orders, payments]).expect("payments domain is valid")
}

pub const PAYMENTS_SCHEMA: &str = "
CREATE TABLE orders_t (
    __auto_number INTEGER PRIMARY KEY AUTOINCREMENT,
    __id TEXT NOT NULL UNIQUE,
    __version INTEGER NOT NULL DEFAULT 1,
    customer TEXT,
    paid REAL
);
CREATE TABLE payments_t (
    __auto_number INTEGER PRIMARY KEY AUTOINCREMENT,
    __id TEXT NOT NULL UNIQUE,
    __version INTEGER NOT NULL DEFAULT 1,
    customer TEXT,
    amount REAL
);
";
