//! ShinyDB Rust SDK - Textual Query Parser Tests

use shinydb::query::{
    parse, AggregateFunc, Direction, FilterOp, LogicOp, Mutation, ParseError, QueryType, Value,
};

#[test]
fn test_bare_store_reference() {
    let ir = parse("orders.limit(10)").unwrap();
    assert_eq!(ir.space, None);
    assert_eq!(ir.store.as_deref(), Some("orders"));
    assert_eq!(ir.limit, Some(10));
}

#[test]
fn test_space_and_store_reference() {
    let ir = parse("sales.orders.limit(10)").unwrap();
    assert_eq!(ir.space.as_deref(), Some("sales"));
    assert_eq!(ir.store.as_deref(), Some("orders"));
    assert_eq!(ir.limit, Some(10));
}

#[test]
fn test_store_alone_parses() {
    let ir = parse("orders").unwrap();
    assert_eq!(ir.space, None);
    assert_eq!(ir.store.as_deref(), Some("orders"));
}

#[test]
fn test_filter_single_condition() {
    let ir = parse(r#"orders.filter(status = "active").limit(10)"#).unwrap();
    assert_eq!(ir.filters.len(), 1);
    let filter = &ir.filters[0];
    assert_eq!(filter.field, "status");
    assert_eq!(filter.op, FilterOp::Eq);
    assert_eq!(filter.value, Value::Str("active".to_string()));
    assert_eq!(filter.logic, LogicOp::None);
    assert_eq!(ir.limit, Some(10));
}

#[test]
fn test_filter_roundtrips_through_serializer() {
    let ir = parse(r#"orders.filter(status = "active").limit(10)"#).unwrap();
    let json = ir.to_json_string();
    assert!(json.contains(r#""status":{"$eq":"active"}"#));
    assert!(json.contains(r#""limit":10"#));
}

#[test]
fn test_filter_connectives_rewrite_previous_logic() {
    let ir = parse(r#"orders.filter(total > 100 and status = "open" or rush = true)"#).unwrap();
    assert_eq!(ir.filters.len(), 3);
    assert_eq!(ir.filters[0].logic, LogicOp::And);
    assert_eq!(ir.filters[1].logic, LogicOp::Or);
    assert_eq!(ir.filters[2].logic, LogicOp::None);
}

#[test]
fn test_filter_operator_variety() {
    let ir = parse(r#"orders.filter(a != 1 and b >= 2.5 and c ~ "^x" and d in "set" and e contains "part" and f exists true)"#)
        .unwrap();
    let ops: Vec<FilterOp> = ir.filters.iter().map(|f| f.op).collect();
    assert_eq!(
        ops,
        vec![
            FilterOp::Ne,
            FilterOp::Gte,
            FilterOp::Regex,
            FilterOp::In,
            FilterOp::Contains,
            FilterOp::Exists,
        ]
    );
    assert_eq!(ir.filters[1].value, Value::Float(2.5));
    assert_eq!(ir.filters[5].value, Value::Bool(true));
}

#[test]
fn test_number_values_split_on_fraction() {
    let ir = parse("orders.filter(a = 42 and b = 42.5 and c = -7)").unwrap();
    assert_eq!(ir.filters[0].value, Value::Int(42));
    assert_eq!(ir.filters[1].value, Value::Float(42.5));
    assert_eq!(ir.filters[2].value, Value::Int(-7));
}

#[test]
fn test_null_value() {
    let ir = parse("orders.filter(deleted_at = null)").unwrap();
    assert_eq!(ir.filters[0].value, Value::Null);
}

#[test]
fn test_pluck_sets_projection() {
    let ir = parse("orders.pluck(id, status, total)").unwrap();
    assert_eq!(ir.projection, vec!["id", "status", "total"]);
}

#[test]
fn test_order_by_defaults_to_asc() {
    let ir = parse("orders.orderBy(created_at)").unwrap();
    assert_eq!(ir.order_by.len(), 1);
    assert_eq!(ir.order_by[0].field, "created_at");
    assert_eq!(ir.order_by[0].direction, Direction::Asc);
}

#[test]
fn test_order_by_desc() {
    let ir = parse("orders.orderBy(total, desc)").unwrap();
    assert_eq!(ir.order_by[0].direction, Direction::Desc);
}

#[test]
fn test_skip_and_group_by() {
    let ir = parse("orders.groupBy(region, channel).skip(20)").unwrap();
    assert_eq!(ir.group_by, vec!["region", "channel"]);
    assert_eq!(ir.skip, Some(20));
}

#[test]
fn test_aggregate_entries() {
    let ir = parse("orders.groupBy(EmployeeID).aggregate(order_count: count, total_revenue: sum(TotalDue))")
        .unwrap();
    assert_eq!(ir.aggregations.len(), 2);
    assert_eq!(ir.aggregations[0].name, "order_count");
    assert_eq!(ir.aggregations[0].func, AggregateFunc::Count);
    assert_eq!(ir.aggregations[0].field, None);
    assert_eq!(ir.aggregations[1].name, "total_revenue");
    assert_eq!(ir.aggregations[1].func, AggregateFunc::Sum);
    assert_eq!(ir.aggregations[1].field.as_deref(), Some("TotalDue"));
}

#[test]
fn test_insert_captures_raw_braces() {
    let ir = parse(r#"orders.insert({ "status": "new", "total": 12.5 })"#).unwrap();
    match &ir.mutation {
        Some(Mutation::Insert(payload)) => {
            let text = std::str::from_utf8(payload).unwrap();
            assert_eq!(text, r#"{ "status": "new", "total": 12.5 }"#);
        }
        other => panic!("expected insert mutation, got {:?}", other),
    }
}

#[test]
fn test_set_captures_update_payload() {
    let ir = parse(r#"orders.filter(status = "open").set({ "status": "closed" })"#).unwrap();
    assert_eq!(ir.filters.len(), 1);
    assert!(matches!(ir.mutation, Some(Mutation::Update(_))));
}

#[test]
fn test_delete_after_filter() {
    let ir = parse(r#"orders.filter(status = "cancelled").delete()"#).unwrap();
    assert_eq!(ir.filters.len(), 1);
    assert_eq!(ir.mutation, Some(Mutation::Delete));
    assert!(ir.to_json_string().contains(r#""mutation":{"type":"delete"}"#));
}

#[test]
fn test_count_sets_query_type() {
    let ir = parse("orders.count()").unwrap();
    assert_eq!(ir.query_type, Some(QueryType::Count));
    assert!(ir.to_json_string().contains(r#""count":true"#));
}

#[test]
fn test_exists_sets_query_type() {
    let ir = parse(r#"orders.filter(status = "open").exists()"#).unwrap();
    assert_eq!(ir.query_type, Some(QueryType::Exists));
}

#[test]
fn test_get_appends_key_filter_and_limit() {
    let ir = parse(r#"orders.get("ord-42")"#).unwrap();
    assert_eq!(ir.filters.len(), 1);
    assert_eq!(ir.filters[0].field, "_key");
    assert_eq!(ir.filters[0].op, FilterOp::Eq);
    assert_eq!(ir.filters[0].value, Value::Str("ord-42".to_string()));
    assert_eq!(ir.limit, Some(1));
}

#[test]
fn test_unknown_operation() {
    let err = parse("sales.orders.explode()").unwrap_err();
    assert!(matches!(err, ParseError::UnknownOperation { ref name, .. } if name == "explode"));
}

#[test]
fn test_unknown_word_after_bare_store_reads_as_namespace() {
    // `orders.explode` is indistinguishable from `space.store`, so the
    // parser takes the namespace reading and trips on the parens instead.
    let err = parse("orders.explode()").unwrap_err();
    assert!(matches!(err, ParseError::UnexpectedToken { .. }));
}

#[test]
fn test_missing_lparen() {
    let err = parse("orders.limit 10").unwrap_err();
    assert!(matches!(err, ParseError::ExpectedLParen { .. }));
}

#[test]
fn test_missing_rparen() {
    let err = parse(r#"orders.filter(status = "x""#).unwrap_err();
    assert!(matches!(err, ParseError::ExpectedRParen { .. }));
}

#[test]
fn test_limit_rejects_negative_number() {
    let err = parse("orders.limit(-5)").unwrap_err();
    assert!(matches!(err, ParseError::InvalidNumber { .. }));
}

#[test]
fn test_limit_rejects_fractional_number() {
    let err = parse("orders.limit(2.5)").unwrap_err();
    assert!(matches!(err, ParseError::InvalidNumber { .. }));
}

#[test]
fn test_condition_requires_operator() {
    let err = parse("orders.filter(status active)").unwrap_err();
    assert!(matches!(err, ParseError::ExpectedOperator { .. }));
}

#[test]
fn test_condition_requires_value() {
    let err = parse("orders.filter(status = )").unwrap_err();
    assert!(matches!(err, ParseError::ExpectedValue { .. }));
}

#[test]
fn test_aggregate_requires_colon() {
    let err = parse("orders.aggregate(n count)").unwrap_err();
    assert!(matches!(err, ParseError::ExpectedColon { .. }));
}

#[test]
fn test_store_reference_requires_identifier() {
    let err = parse("42.limit(1)").unwrap_err();
    assert!(matches!(err, ParseError::ExpectedIdentifier { .. }));
}

#[test]
fn test_trailing_tokens_rejected() {
    let err = parse("orders.limit(1) garbage").unwrap_err();
    assert!(matches!(err, ParseError::UnexpectedToken { .. }));
}

#[test]
fn test_errors_carry_position() {
    let err = parse("sales.orders.\n  explode()").unwrap_err();
    match err {
        ParseError::UnknownOperation { line, column, .. } => {
            assert_eq!(line, 2);
            assert_eq!(column, 3);
        }
        other => panic!("unexpected error {:?}", other),
    }
}
