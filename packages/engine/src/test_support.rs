//! Domain fixtures shared by unit tests.

use crate::domain::{
    ConditionalOptions, Field, FieldKind, FilterCondition, FilterItem, FilterOperator, FilterSet,
    FormulaBinaryOp, FormulaExpr, FormulaOptions, LinkOptions, LookupOptions, Relationship,
    RollupOptions, SortDirection, SortSpec, StorageType, Table, TableDomain,
};

pub(crate) fn link(
    id: &str,
    table_id: &str,
    db_field_name: &str,
    options: LinkOptions,
) -> Field {
    let is_multiple = !options.relationship.is_single_value();
    Field::scalar(id, table_id, id, db_field_name, StorageType::Json)
        .multiple(is_multiple)
        .with_kind(FieldKind::Link(options))
}

pub(crate) fn lookup(
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

pub(crate) fn rollup(
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

pub(crate) fn formula(id: &str, table_id: &str, expression: FormulaExpr) -> Field {
    Field::scalar(id, table_id, id, id, StorageType::Real)
        .with_kind(FieldKind::Formula(FormulaOptions { expression }))
}

/// parent <-(OneMany/ManyOne)-> child, child <-(ManyMany)-> tag.
pub(crate) fn sales_domain() -> TableDomain {
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
                order_column_name: Some("__order".to_string()),
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

/// Conditional rollup: orders sum payments whose customer equals the
/// order's customer and whose amount is positive.
pub(crate) fn payments_domain(limit: Option<usize>, equality: bool) -> TableDomain {
    let customer_condition = if equality {
        FilterCondition::host_field("pay_customer", FilterOperator::Is, "ord_customer")
    } else {
        FilterCondition::host_field("pay_customer", FilterOperator::Contains, "ord_customer")
    };
    let filter = FilterSet::all(vec![
        FilterItem::Condition(customer_condition),
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
                    sort: limit.map(|_| SortSpec {
                        field_id: "pay_amount".to_string(),
                        direction: SortDirection::Desc,
                    }),
                    limit,
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
