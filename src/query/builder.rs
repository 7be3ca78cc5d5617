//! Fluent query builder.
//!
//! A [`Query`] borrows the client, accumulates an IR through chained
//! mutators and executes it with [`Query::run`]. Document arguments to
//! `create`/`update` are encoded to opaque bytes up front; encoding
//! failures are deferred and surface at `run`.

use serde::Serialize;
use uuid::Uuid;

use crate::client::ShinyDbClient;
use crate::error::{Error, Result};
use crate::protocol::{Operation, Status};

use super::ir::{
    Aggregation, AggregateFunc, Direction, FilterExpr, FilterOp, LogicOp, Mutation, OrderBy,
    QueryIr, QueryType, Value,
};

/// Result of an executed query. `data` owns its bytes: reply payloads are
/// copied out before the transport's receive buffer is reused.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    pub success: bool,
    pub data: Option<Vec<u8>>,
    pub count: u64,
}

impl QueryResponse {
    /// Parse the payload as JSON.
    pub fn json(&self) -> Result<serde_json::Value> {
        match &self.data {
            Some(bytes) => Ok(serde_json::from_slice(bytes)?),
            None => Err(Error::InvalidResponse("reply carried no payload".to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ScanParams {
    start_key: Option<Uuid>,
    count: u32,
}

/// Chainable query under construction.
pub struct Query<'a> {
    client: &'a mut ShinyDbClient,
    space_name: Option<String>,
    store_name: Option<String>,
    index_name: Option<String>,
    ir: QueryIr,
    scan_params: Option<ScanParams>,
    deferred: Option<Error>,
}

impl<'a> Query<'a> {
    pub(crate) fn new(client: &'a mut ShinyDbClient) -> Self {
        Self {
            client,
            space_name: None,
            store_name: None,
            index_name: None,
            ir: QueryIr::default(),
            scan_params: None,
            deferred: None,
        }
    }

    /// Wrap an IR produced by the textual parser.
    pub(crate) fn from_ir(client: &'a mut ShinyDbClient, ir: QueryIr) -> Self {
        Self {
            client,
            space_name: ir.space.clone(),
            store_name: ir.store.clone(),
            index_name: None,
            ir,
            scan_params: None,
            deferred: None,
        }
    }

    /// Inspect the IR accumulated so far.
    pub fn ir(&self) -> &QueryIr {
        &self.ir
    }

    pub fn space(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.ir.space = Some(name.clone());
        self.space_name = Some(name);
        self
    }

    pub fn store(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.ir.store = Some(name.clone());
        self.store_name = Some(name);
        self
    }

    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index_name = Some(name.into());
        self
    }

    /// First filter condition.
    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.push_filter(field.into(), op, value.into());
        self
    }

    /// AND-connect the previous condition to a new one.
    pub fn and(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        if let Some(last) = self.ir.filters.last_mut() {
            last.logic = LogicOp::And;
        }
        self.push_filter(field.into(), op, value.into());
        self
    }

    /// OR-connect the previous condition to a new one. With no previous
    /// condition the connective has nothing to attach to and is dropped.
    pub fn or(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        if let Some(last) = self.ir.filters.last_mut() {
            last.logic = LogicOp::Or;
        }
        self.push_filter(field.into(), op, value.into());
        self
    }

    fn push_filter(&mut self, field: String, op: FilterOp, value: Value) {
        self.ir.filters.push(FilterExpr {
            field,
            op,
            value,
            logic: LogicOp::None,
        });
    }

    /// Replace the ordering with a single entry.
    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.ir.order_by = vec![OrderBy {
            field: field.into(),
            direction,
        }];
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.ir.limit = Some(n);
        self
    }

    pub fn skip(mut self, n: u32) -> Self {
        self.ir.skip = Some(n);
        self
    }

    /// Project the result down to the named fields.
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ir.projection = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.ir.group_by.push(field.into());
        self
    }

    pub fn count(self, name: impl Into<String>) -> Self {
        self.push_aggregation(name.into(), AggregateFunc::Count, None)
    }

    pub fn sum(self, name: impl Into<String>, field: impl Into<String>) -> Self {
        self.push_aggregation(name.into(), AggregateFunc::Sum, Some(field.into()))
    }

    pub fn avg(self, name: impl Into<String>, field: impl Into<String>) -> Self {
        self.push_aggregation(name.into(), AggregateFunc::Avg, Some(field.into()))
    }

    pub fn min(self, name: impl Into<String>, field: impl Into<String>) -> Self {
        self.push_aggregation(name.into(), AggregateFunc::Min, Some(field.into()))
    }

    pub fn max(self, name: impl Into<String>, field: impl Into<String>) -> Self {
        self.push_aggregation(name.into(), AggregateFunc::Max, Some(field.into()))
    }

    fn push_aggregation(mut self, name: String, func: AggregateFunc, field: Option<String>) -> Self {
        self.ir.aggregations.push(Aggregation { name, func, field });
        self
    }

    /// Attach an insert mutation carrying the encoded document.
    pub fn create<T: Serialize>(mut self, document: &T) -> Self {
        match rmp_serde::to_vec(document) {
            Ok(bytes) => self.ir.mutation = Some(Mutation::Insert(bytes)),
            Err(e) => self.deferred = Some(e.into()),
        }
        self
    }

    /// Attach an update mutation carrying the encoded document. Pair with
    /// [`Query::read_by_id`] to target a specific document.
    pub fn update<T: Serialize>(mut self, document: &T) -> Self {
        match rmp_serde::to_vec(document) {
            Ok(bytes) => self.ir.mutation = Some(Mutation::Update(bytes)),
            Err(e) => self.deferred = Some(e.into()),
        }
        self
    }

    pub fn delete(mut self) -> Self {
        self.ir.mutation = Some(Mutation::Delete);
        self
    }

    /// Address a single document by id: a direct read on its own, or the
    /// target id for an attached mutation.
    pub fn read_by_id(mut self, id: Uuid) -> Self {
        self.ir.doc_id = Some(id);
        self
    }

    /// Range scan of up to `count` documents, optionally starting after
    /// `start_key`.
    pub fn scan(mut self, count: u32, start_key: Option<Uuid>) -> Self {
        self.scan_params = Some(ScanParams { start_key, count });
        self
    }

    /// Ask only whether any document matches.
    pub fn exists(mut self) -> Self {
        self.ir.query_type = Some(QueryType::Exists);
        self
    }

    /// Execute. Dispatches scan, then direct read, then mutation, then
    /// aggregation, then plain query; an empty builder is `NoOperation`.
    pub async fn run(self) -> Result<QueryResponse> {
        let Query {
            client,
            space_name,
            store_name,
            index_name,
            ir,
            scan_params,
            deferred,
        } = self;
        if let Some(err) = deferred {
            return Err(err);
        }

        if scan_params.is_none() && !ir.has_operation() {
            return Err(Error::NoOperation);
        }
        let kind = if scan_params.is_some() {
            OpKind::Scan
        } else if ir.doc_id.is_some() && ir.mutation.is_none() {
            OpKind::Read
        } else if let Some(mutation) = &ir.mutation {
            match mutation {
                Mutation::Insert(_) => OpKind::Insert,
                Mutation::Update(_) => OpKind::Update,
                Mutation::Delete => OpKind::Delete,
            }
        } else if !ir.aggregations.is_empty() {
            OpKind::Aggregate
        } else {
            // Filters, paging, ordering, projection, grouping, a query
            // type, or a bare store reference.
            OpKind::Query
        };

        let namespace = {
            let space = space_name.ok_or(Error::NoSpaceSpecified)?;
            let mut ns = space;
            if let Some(store) = &store_name {
                ns.push('.');
                ns.push_str(store);
                if let Some(index) = &index_name {
                    ns.push('.');
                    ns.push_str(index);
                }
            }
            ns
        };

        let doc_id = ir.doc_id.unwrap_or_else(Uuid::nil);
        let operation = match kind {
            OpKind::Scan => {
                // Checked by the dispatch above.
                let params = scan_params.unwrap_or(ScanParams { start_key: None, count: 0 });
                Operation::Scan {
                    namespace,
                    start_key: params.start_key,
                    count: params.count,
                }
            }
            OpKind::Read => Operation::Read {
                namespace,
                id: doc_id,
            },
            OpKind::Insert => Operation::Insert {
                namespace,
                id: doc_id,
                payload: ir.to_json_string().into_bytes(),
            },
            OpKind::Update => Operation::Update {
                namespace,
                id: doc_id,
                payload: ir.to_json_string().into_bytes(),
            },
            OpKind::Delete => Operation::Delete {
                namespace,
                id: doc_id,
                payload: ir.to_json_string().into_bytes(),
            },
            OpKind::Aggregate => Operation::Aggregate {
                namespace,
                payload: ir.to_json_string().into_bytes(),
            },
            OpKind::Query => Operation::Query {
                namespace,
                payload: ir.to_json_string().into_bytes(),
            },
        };

        let packet = client.do_operation(operation).await?;
        let (status, payload) = packet.as_reply()?;
        if status != Status::Ok {
            return Err(kind.error_for(status, payload));
        }

        // Copy the payload out before the packet (and the transport's
        // receive buffer behind it) is reused.
        let data = payload.map(|bytes| bytes.to_vec());
        let count = derive_count(data.as_deref());
        Ok(QueryResponse {
            success: true,
            data,
            count,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum OpKind {
    Scan,
    Read,
    Insert,
    Update,
    Delete,
    Aggregate,
    Query,
}

impl OpKind {
    fn error_for(self, status: Status, payload: Option<&[u8]>) -> Error {
        let detail = payload
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_else(|| format!("{:?}", status));
        match self {
            OpKind::Read | OpKind::Scan if status == Status::NotFound => Error::DocumentNotFound,
            OpKind::Scan => Error::ScanFailed(detail),
            OpKind::Read | OpKind::Insert => Error::OperationFailed(detail),
            OpKind::Update => Error::UpdateFailed(detail),
            OpKind::Delete => Error::DeleteFailed(detail),
            OpKind::Aggregate => Error::AggregateFailed(detail),
            OpKind::Query => Error::QueryFailed(detail),
        }
    }
}

/// Best-effort count: an explicit `count` field, a JSON array's length, or
/// 0/1 by payload presence.
fn derive_count(data: Option<&[u8]>) -> u64 {
    let Some(bytes) = data else { return 0 };
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(serde_json::Value::Array(items)) => items.len() as u64,
        Ok(serde_json::Value::Object(obj)) => {
            obj.get("count").and_then(|v| v.as_u64()).unwrap_or(1)
        }
        _ => 1,
    }
}
