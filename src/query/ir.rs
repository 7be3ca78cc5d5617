//! Intermediate query representation and its JSON serialization.
//!
//! Both the fluent builder and the textual parser populate a [`QueryIr`];
//! execution serializes it once into the server's query JSON dialect.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map};
use uuid::Uuid;

/// A literal value carried by a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
    Array(Vec<Value>),
}

impl Value {
    fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Str(s) => json!(s),
            Value::Int(i) => json!(i),
            Value::Float(f) => {
                // serde_json renders whole floats with a fractional digit
                // (42.0, never 42), which downstream parsers rely on to
                // infer the float type.
                serde_json::Number::from_f64(*f)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null)
            }
            Value::Bool(b) => json!(b),
            Value::Null => serde_json::Value::Null,
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Filter comparison operators with their JSON mnemonics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Regex,
    In,
    Contains,
    StartsWith,
    Exists,
}

impl FilterOp {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            FilterOp::Eq => "$eq",
            FilterOp::Ne => "$ne",
            FilterOp::Gt => "$gt",
            FilterOp::Gte => "$gte",
            FilterOp::Lt => "$lt",
            FilterOp::Lte => "$lte",
            FilterOp::Regex => "$regex",
            FilterOp::In => "$in",
            FilterOp::Contains => "$contains",
            FilterOp::StartsWith => "$startsWith",
            FilterOp::Exists => "$exists",
        }
    }
}

/// How a filter connects to the *next* filter in the list. The last filter
/// carries `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    None,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpr {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
    pub logic: LogicOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunc {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "$count",
            AggregateFunc::Sum => "$sum",
            AggregateFunc::Avg => "$avg",
            AggregateFunc::Min => "$min",
            AggregateFunc::Max => "$max",
        }
    }
}

/// One named aggregation. `Count` carries no source field.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub name: String,
    pub func: AggregateFunc,
    pub field: Option<String>,
}

/// Write operation attached to a query. Insert/update payloads are opaque
/// encoded documents owned by the IR.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Insert(Vec<u8>),
    Update(Vec<u8>),
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Select,
    Count,
    Exists,
    Aggregate,
}

/// The query description shared by the fluent builder and the textual
/// parser.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryIr {
    pub space: Option<String>,
    pub store: Option<String>,
    pub filters: Vec<FilterExpr>,
    pub projection: Vec<String>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u32>,
    pub skip: Option<u32>,
    pub group_by: Vec<String>,
    pub aggregations: Vec<Aggregation>,
    pub mutation: Option<Mutation>,
    pub query_type: Option<QueryType>,
    pub doc_id: Option<Uuid>,
}

impl QueryIr {
    /// Whether the IR describes anything executable.
    pub fn has_operation(&self) -> bool {
        self.mutation.is_some()
            || self.doc_id.is_some()
            || !self.filters.is_empty()
            || !self.aggregations.is_empty()
            || !self.projection.is_empty()
            || !self.order_by.is_empty()
            || !self.group_by.is_empty()
            || self.limit.is_some()
            || self.skip.is_some()
            || self.query_type.is_some()
            || self.store.is_some()
    }

    /// Serialize to the server's query JSON dialect.
    pub fn to_json(&self) -> serde_json::Value {
        let mut root = Map::new();

        // The server requires the filter key even when empty.
        root.insert("filter".to_string(), self.filter_json());

        if !self.projection.is_empty() {
            root.insert("projection".to_string(), json!(&self.projection));
        }

        match self.order_by.len() {
            0 => {}
            // Object form for a single entry keeps on-wire backward
            // compatibility.
            1 => {
                root.insert("orderBy".to_string(), order_json(&self.order_by[0]));
            }
            _ => {
                let entries: Vec<_> = self.order_by.iter().map(order_json).collect();
                root.insert("orderBy".to_string(), serde_json::Value::Array(entries));
            }
        }

        if let Some(limit) = self.limit {
            root.insert("limit".to_string(), json!(limit));
        }
        if let Some(skip) = self.skip {
            root.insert("skip".to_string(), json!(skip));
        }

        if !self.group_by.is_empty() {
            root.insert("group_by".to_string(), json!(&self.group_by));
        }

        if !self.aggregations.is_empty() {
            let mut aggregate = Map::new();
            for agg in &self.aggregations {
                let mut spec = Map::new();
                let value = match (agg.func, &agg.field) {
                    // `count` takes no source field; a field-less entry for
                    // the other functions degrades the same way.
                    (AggregateFunc::Count, _) | (_, None) => json!(true),
                    (_, Some(field)) => json!(field),
                };
                spec.insert(agg.func.mnemonic().to_string(), value);
                aggregate.insert(agg.name.clone(), serde_json::Value::Object(spec));
            }
            root.insert("aggregate".to_string(), serde_json::Value::Object(aggregate));
        }

        match self.query_type {
            Some(QueryType::Count) => {
                root.insert("count".to_string(), json!(true));
            }
            Some(QueryType::Exists) => {
                root.insert("exists".to_string(), json!(true));
            }
            _ => {}
        }

        if let Some(mutation) = &self.mutation {
            let value = match mutation {
                Mutation::Insert(payload) => json!({
                    "type": "insert",
                    "payload": BASE64.encode(payload),
                }),
                Mutation::Update(payload) => json!({
                    "type": "update",
                    "payload": BASE64.encode(payload),
                }),
                Mutation::Delete => json!({ "type": "delete" }),
            };
            root.insert("mutation".to_string(), value);
        }

        serde_json::Value::Object(root)
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    fn filter_json(&self) -> serde_json::Value {
        if self.filters.is_empty() {
            return serde_json::Value::Object(Map::new());
        }

        // Any `or` connective switches to compound mode: consecutive
        // AND-groups bounded by `or` logic, combined under "$or".
        if self.filters.iter().any(|f| f.logic == LogicOp::Or) {
            let mut groups = Vec::new();
            let mut start = 0;
            for (i, filter) in self.filters.iter().enumerate() {
                if filter.logic == LogicOp::Or {
                    groups.push(group_json(&self.filters[start..=i]));
                    start = i + 1;
                }
            }
            groups.push(group_json(&self.filters[start..]));
            let mut obj = Map::new();
            obj.insert("$or".to_string(), serde_json::Value::Array(groups));
            serde_json::Value::Object(obj)
        } else {
            group_json(&self.filters)
        }
    }
}

/// Emit one AND-group field-major: filters on the same field merge into a
/// single object, field order follows first appearance.
fn group_json(filters: &[FilterExpr]) -> serde_json::Value {
    let mut obj = Map::new();
    for filter in filters {
        let entry = obj
            .entry(filter.field.clone())
            .or_insert_with(|| serde_json::Value::Object(Map::new()));
        if let serde_json::Value::Object(ops) = entry {
            ops.insert(filter.op.mnemonic().to_string(), filter.value.to_json());
        }
    }
    serde_json::Value::Object(obj)
}

fn order_json(order: &OrderBy) -> serde_json::Value {
    json!({ "field": &order.field, "direction": order.direction.as_str() })
}
