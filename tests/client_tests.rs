//! Client tests for the ShinyDB Rust SDK, driven against in-process mock
//! servers.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use shinydb::query::{Direction, FilterOp};
use shinydb::{
  ConnectOptions, Error, Operation, Packet, RetryPolicy, ShinyDbClient, Status, TimeoutConfig,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use uuid::Uuid;

async fn read_frame(stream: &mut TcpStream) -> Option<Vec<u8>> {
  let mut len_bytes = [0u8; 4];
  stream.read_exact(&mut len_bytes).await.ok()?;
  let len = u32::from_le_bytes(len_bytes) as usize;
  let mut frame = vec![0u8; len];
  stream.read_exact(&mut frame).await.ok()?;
  Some(frame)
}

async fn write_reply(
  stream: &mut TcpStream,
  request: &Packet,
  status: Status,
  payload: Option<Vec<u8>>,
) {
  let reply = Packet {
    packet_id: request.packet_id,
    session_id: request.session_id,
    correlation_id: request.correlation_id,
    timestamp_ms: request.timestamp_ms,
    operation: Operation::Reply { status, payload },
  };
  let mut buf = BytesMut::new();
  reply.encode(&mut buf);
  stream
    .write_all(&(buf.len() as u32).to_le_bytes())
    .await
    .unwrap();
  stream.write_all(&buf).await.unwrap();
}

/// Canned success payloads per request kind. Query-shaped requests echo
/// their own payload back so tests can inspect the serialized query JSON.
fn ok_payload(operation: &Operation) -> Option<Vec<u8>> {
  match operation {
    Operation::Query { payload, .. }
    | Operation::Aggregate { payload, .. }
    | Operation::Insert { payload, .. }
    | Operation::Update { payload, .. }
    | Operation::Delete { payload, .. } => Some(payload.clone()),
    Operation::Read { .. } => Some(br#"{"id":"doc-1"}"#.to_vec()),
    Operation::Scan { .. } => Some(br#"[{"id":"doc-1"},{"id":"doc-2"}]"#.to_vec()),
    Operation::Authenticate { .. } | Operation::AuthenticateApiKey { .. } => Some(
      br#"{"session_id":"sess-1","api_key":"key-1","username":"alice","role":"read_write"}"#
        .to_vec(),
    ),
    Operation::List { .. } => Some(br#"["orders","customers"]"#.to_vec()),
    _ => None,
  }
}

/// Server that answers every request with `Ok`, forwarding each received
/// operation on a channel.
async fn spawn_ok_server() -> (SocketAddr, mpsc::UnboundedReceiver<Operation>) {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let (tx, rx) = mpsc::unbounded_channel();
  tokio::spawn(async move {
    loop {
      let Ok((mut stream, _)) = listener.accept().await else {
        break;
      };
      let tx = tx.clone();
      tokio::spawn(async move {
        while let Some(frame) = read_frame(&mut stream).await {
          let packet = Packet::decode(&frame).unwrap();
          let payload = ok_payload(&packet.operation);
          let _ = tx.send(packet.operation.clone());
          write_reply(&mut stream, &packet, Status::Ok, payload).await;
        }
      });
    }
  });
  (addr, rx)
}

/// Server that answers every request with a fixed non-ok status.
async fn spawn_status_server(status: Status) -> SocketAddr {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    loop {
      let Ok((mut stream, _)) = listener.accept().await else {
        break;
      };
      tokio::spawn(async move {
        while let Some(frame) = read_frame(&mut stream).await {
          let packet = Packet::decode(&frame).unwrap();
          write_reply(&mut stream, &packet, status, None).await;
        }
      });
    }
  });
  addr
}

async fn connect(addr: SocketAddr) -> ShinyDbClient {
  ShinyDbClient::connect(addr.ip().to_string(), addr.port())
    .await
    .unwrap()
}

#[tokio::test]
async fn test_connect_refused() {
  let result = ShinyDbClient::connect("127.0.0.1", 1).await;
  match result {
    Err(Error::ConnectionRefused(_)) | Err(Error::ConnectionFailed(_)) => {}
    other => panic!("expected connection error, got {:?}", other.map(|_| ())),
  }
}

#[tokio::test]
async fn test_flush_and_metrics() {
  let (addr, _rx) = spawn_ok_server().await;
  let mut client = connect(addr).await;

  assert!(client.is_connected());
  client.flush().await.unwrap();
  assert_eq!(client.pending_requests(), 0);
  assert_eq!(client.metrics().operations, 1);
}

#[tokio::test]
async fn test_ping_uses_flush() {
  let (addr, mut rx) = spawn_ok_server().await;
  let mut client = connect(addr).await;

  assert!(client.ping().await);
  assert_eq!(rx.recv().await.unwrap(), Operation::Flush);
}

#[tokio::test]
async fn test_pipelined_replies_arrive_in_send_order() {
  let (addr, _rx) = spawn_ok_server().await;
  let mut client = connect(addr).await;

  let first = client.send_async(Operation::Flush).await.unwrap();
  let second = client.send_async(Operation::Flush).await.unwrap();
  assert_eq!(first, 1);
  assert_eq!(second, 2);
  assert_eq!(client.pending_requests(), 2);

  let reply_one = client.receive_async().await.unwrap();
  let reply_two = client.receive_async().await.unwrap();
  assert_eq!(reply_one.correlation_id, 1);
  assert_eq!(reply_two.correlation_id, 2);
  assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_receive_without_pending_is_invalid() {
  let (addr, _rx) = spawn_ok_server().await;
  let mut client = connect(addr).await;

  assert!(matches!(
    client.receive_async().await,
    Err(Error::InvalidResponse(_))
  ));
}

#[tokio::test]
async fn test_builder_and_query_serialization() {
  let (addr, mut rx) = spawn_ok_server().await;
  let mut client = connect(addr).await;

  let response = client
    .query()
    .space("adventureworks")
    .store("products")
    .filter("MakeFlag", FilterOp::Eq, 1)
    .and("ListPrice", FilterOp::Gt, 100)
    .order_by("ListPrice", Direction::Desc)
    .limit(10)
    .run()
    .await
    .unwrap();

  match rx.recv().await.unwrap() {
    Operation::Query { namespace, .. } => assert_eq!(namespace, "adventureworks.products"),
    other => panic!("expected query, got {:?}", other),
  }

  let json = String::from_utf8(response.data.unwrap()).unwrap();
  assert!(json.contains(r#""filter":{"MakeFlag":{"$eq":1},"ListPrice":{"$gt":100}}"#));
  assert!(json.contains(r#""orderBy":{"field":"ListPrice","direction":"desc"}"#));
  assert!(json.contains(r#""limit":10"#));
}

#[tokio::test]
async fn test_builder_or_compound_serialization() {
  let (addr, _rx) = spawn_ok_server().await;
  let mut client = connect(addr).await;

  let response = client
    .query()
    .space("sales")
    .store("territories")
    .filter("Territory", FilterOp::Eq, "Northeast")
    .or("Territory", FilterOp::Eq, "Australia")
    .run()
    .await
    .unwrap();

  let json = String::from_utf8(response.data.unwrap()).unwrap();
  assert!(json.contains(
    r#""filter":{"$or":[{"Territory":{"$eq":"Northeast"}},{"Territory":{"$eq":"Australia"}}]}"#
  ));
}

#[tokio::test]
async fn test_or_as_first_call_drops_connective() {
  let (addr, _rx) = spawn_ok_server().await;
  let mut client = connect(addr).await;

  // An `or` with no previous filter has nothing to rewrite: the condition
  // lands as a plain filter and no "$or" appears.
  let response = client
    .query()
    .space("sales")
    .store("territories")
    .or("Territory", FilterOp::Eq, "Northeast")
    .run()
    .await
    .unwrap();

  let json = String::from_utf8(response.data.unwrap()).unwrap();
  assert!(json.contains(r#""filter":{"Territory":{"$eq":"Northeast"}}"#));
  assert!(!json.contains("$or"));
}

#[tokio::test]
async fn test_empty_filter_with_limit() {
  let (addr, _rx) = spawn_ok_server().await;
  let mut client = connect(addr).await;

  let response = client
    .query()
    .space("x")
    .store("y")
    .limit(5)
    .run()
    .await
    .unwrap();

  let json = String::from_utf8(response.data.unwrap()).unwrap();
  assert!(json.contains(r#""filter":{}"#));
  assert!(json.contains(r#""limit":5"#));
}

#[tokio::test]
async fn test_aggregation_dispatches_aggregate_operation() {
  let (addr, mut rx) = spawn_ok_server().await;
  let mut client = connect(addr).await;

  let response = client
    .query()
    .space("adventureworks")
    .store("orders")
    .group_by("EmployeeID")
    .count("order_count")
    .sum("total_revenue", "TotalDue")
    .run()
    .await
    .unwrap();

  assert!(matches!(
    rx.recv().await.unwrap(),
    Operation::Aggregate { .. }
  ));
  let json = String::from_utf8(response.data.unwrap()).unwrap();
  assert!(json.contains(r#""group_by":["EmployeeID"]"#));
  assert!(json.contains(
    r#""aggregate":{"order_count":{"$count":true},"total_revenue":{"$sum":"TotalDue"}}"#
  ));
}

#[tokio::test]
async fn test_scan_dispatch() {
  let (addr, mut rx) = spawn_ok_server().await;
  let mut client = connect(addr).await;

  let start = Uuid::from_u128(0x10);
  let response = client
    .query()
    .space("sales")
    .store("orders")
    .scan(64, Some(start))
    .run()
    .await
    .unwrap();

  match rx.recv().await.unwrap() {
    Operation::Scan { namespace, start_key, count } => {
      assert_eq!(namespace, "sales.orders");
      assert_eq!(start_key, Some(start));
      assert_eq!(count, 64);
    }
    other => panic!("expected scan, got {:?}", other),
  }
  assert_eq!(response.count, 2);
}

#[tokio::test]
async fn test_update_carries_target_id() {
  let (addr, mut rx) = spawn_ok_server().await;
  let mut client = connect(addr).await;

  let id = Uuid::from_u128(0x99);
  let document = serde_json::json!({"status": "closed"});
  client
    .query()
    .space("sales")
    .store("orders")
    .read_by_id(id)
    .update(&document)
    .run()
    .await
    .unwrap();

  match rx.recv().await.unwrap() {
    Operation::Update { namespace, id: sent, .. } => {
      assert_eq!(namespace, "sales.orders");
      assert_eq!(sent, id);
    }
    other => panic!("expected update, got {:?}", other),
  }
}

#[tokio::test]
async fn test_read_by_id_dispatches_read() {
  let (addr, mut rx) = spawn_ok_server().await;
  let mut client = connect(addr).await;

  let id = Uuid::from_u128(0x42);
  let response = client
    .query()
    .space("sales")
    .store("orders")
    .read_by_id(id)
    .run()
    .await
    .unwrap();

  match rx.recv().await.unwrap() {
    Operation::Read { id: sent, .. } => assert_eq!(sent, id),
    other => panic!("expected read, got {:?}", other),
  }
  assert!(response.success);
  assert_eq!(response.count, 1);
  assert_eq!(response.json().unwrap()["id"], "doc-1");
}

#[tokio::test]
async fn test_empty_builder_is_no_operation() {
  let (addr, _rx) = spawn_ok_server().await;
  let mut client = connect(addr).await;

  let err = client.query().space("x").run().await.unwrap_err();
  assert!(matches!(err, Error::NoOperation));
}

#[tokio::test]
async fn test_missing_space_is_rejected() {
  let (addr, _rx) = spawn_ok_server().await;
  let mut client = connect(addr).await;

  let err = client.query().limit(5).run().await.unwrap_err();
  assert!(matches!(err, Error::NoSpaceSpecified));
}

#[tokio::test]
async fn test_read_not_found_maps_to_document_not_found() {
  let addr = spawn_status_server(Status::NotFound).await;
  let mut client = connect(addr).await;

  let err = client
    .query()
    .space("sales")
    .store("orders")
    .read_by_id(Uuid::from_u128(1))
    .run()
    .await
    .unwrap_err();
  assert!(matches!(err, Error::DocumentNotFound));
}

#[tokio::test]
async fn test_failed_delete_maps_to_delete_failed() {
  let addr = spawn_status_server(Status::Error).await;
  let mut client = connect(addr).await;

  let err = client
    .query()
    .space("sales")
    .store("orders")
    .delete()
    .run()
    .await
    .unwrap_err();
  assert!(matches!(err, Error::DeleteFailed(_)));
}

#[tokio::test]
async fn test_authenticate_parses_auth_result() {
  let (addr, _rx) = spawn_ok_server().await;
  let mut client = connect(addr).await;

  let auth = client.authenticate("alice", "secret").await.unwrap();
  assert_eq!(auth.session_id, "sess-1");
  assert_eq!(auth.username, "alice");
  assert_eq!(auth.role, shinydb::Role::ReadWrite);

  let auth = client.authenticate_api_key("key-1").await.unwrap();
  assert_eq!(auth.api_key, "key-1");
}

#[tokio::test]
async fn test_auth_permission_denied() {
  let addr = spawn_status_server(Status::PermissionDenied).await;
  let mut client = connect(addr).await;

  let err = client.authenticate("alice", "wrong").await.unwrap_err();
  assert!(matches!(err, Error::PermissionDenied(_)));
}

#[tokio::test]
async fn test_list_parses_names() {
  let (addr, mut rx) = spawn_ok_server().await;
  let mut client = connect(addr).await;

  let names = client.list("store", Some("sales")).await.unwrap();
  assert_eq!(names, vec!["orders".to_string(), "customers".to_string()]);
  match rx.recv().await.unwrap() {
    Operation::List { doc_type, namespace } => {
      assert_eq!(doc_type, "store");
      assert_eq!(namespace.as_deref(), Some("sales"));
    }
    other => panic!("expected list, got {:?}", other),
  }
}

#[tokio::test]
async fn test_query_str_executes_namespaced_query() {
  let (addr, mut rx) = spawn_ok_server().await;
  let mut client = connect(addr).await;

  let response = client
    .query_str(r#"sales.orders.filter(status = "active").limit(10)"#)
    .await
    .unwrap();

  match rx.recv().await.unwrap() {
    Operation::Query { namespace, .. } => assert_eq!(namespace, "sales.orders"),
    other => panic!("expected query, got {:?}", other),
  }
  let json = String::from_utf8(response.data.unwrap()).unwrap();
  assert!(json.contains(r#""status":{"$eq":"active"}"#));
  assert!(json.contains(r#""limit":10"#));
}

#[tokio::test]
async fn test_query_str_without_space_is_rejected() {
  let (addr, _rx) = spawn_ok_server().await;
  let mut client = connect(addr).await;

  let err = client
    .query_str(r#"orders.filter(status = "active")"#)
    .await
    .unwrap_err();
  assert!(matches!(err, Error::NoSpaceSpecified));
}

#[tokio::test]
async fn test_query_str_parse_error_maps_to_invalid_request() {
  let (addr, _rx) = spawn_ok_server().await;
  let mut client = connect(addr).await;

  let err = client.query_str("orders.explode()").await.unwrap_err();
  assert!(matches!(err, Error::InvalidRequest(_)));
}

#[tokio::test]
async fn test_retry_reconnects_after_connection_loss() {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    // First connection is dropped before serving anything; later
    // connections behave.
    let (stream, _) = listener.accept().await.unwrap();
    drop(stream);
    loop {
      let Ok((mut stream, _)) = listener.accept().await else {
        break;
      };
      tokio::spawn(async move {
        while let Some(frame) = read_frame(&mut stream).await {
          let packet = Packet::decode(&frame).unwrap();
          write_reply(&mut stream, &packet, Status::Ok, None).await;
        }
      });
    }
  });

  let options = ConnectOptions::new(addr.ip().to_string(), addr.port()).with_retry_policy(
    RetryPolicy {
      max_attempts: 3,
      initial_backoff_ms: 1,
      max_backoff_ms: 5,
      backoff_multiplier: 2.0,
    },
  );
  let mut client = ShinyDbClient::connect_with_options(options).await.unwrap();

  client.flush().await.unwrap();
  let metrics = client.metrics();
  assert_eq!(metrics.reconnects, 1);
  assert_eq!(metrics.retries, 1);
  assert_eq!(metrics.operations, 1);
}

#[tokio::test]
async fn test_open_breaker_rejects_without_touching_the_wire() {
  let (addr, mut rx) = spawn_ok_server().await;
  let options = ConnectOptions::new(addr.ip().to_string(), addr.port()).with_breaker(
    1,
    1,
    Duration::from_secs(3600),
  );
  let mut client = ShinyDbClient::connect_with_options(options).await.unwrap();

  client.circuit_breaker_mut().record_failure();
  assert_eq!(
    client.circuit_breaker().state(),
    shinydb::CircuitState::Open
  );

  let err = client.flush().await.unwrap_err();
  assert!(matches!(err, Error::ServiceUnavailable(_)));
  assert_eq!(client.metrics().rejected, 1);
  assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_server_error_reply_is_retried_with_backoff() {
  let addr = spawn_status_server(Status::ServerError).await;
  let options = ConnectOptions::new(addr.ip().to_string(), addr.port()).with_retry_policy(
    RetryPolicy {
      max_attempts: 3,
      initial_backoff_ms: 1,
      max_backoff_ms: 5,
      backoff_multiplier: 2.0,
    },
  );
  let mut client = ShinyDbClient::connect_with_options(options).await.unwrap();

  // A service-class reply status is a failed attempt: every attempt is
  // consumed before the error surfaces.
  let err = client.flush().await.unwrap_err();
  assert!(matches!(err, Error::ServerError(_)));
  let metrics = client.metrics();
  assert_eq!(metrics.retries, 2);
  assert_eq!(metrics.failures, 3);
  assert_eq!(metrics.operations, 0);
}

#[tokio::test]
async fn test_operation_failure_status_is_not_retried() {
  let addr = spawn_status_server(Status::Error).await;
  let mut client = connect(addr).await;

  // A plain failure status is not service-class: the exchange completes,
  // no attempts are burned, and the caller maps it per operation.
  let err = client.flush().await.unwrap_err();
  assert!(matches!(err, Error::OperationFailed(_)));
  assert_eq!(client.metrics().retries, 0);
  assert_eq!(client.metrics().operations, 1);
}

#[tokio::test]
async fn test_timeout_retry_clears_stale_pending() {
  // Withholds the reply to the first request, then answers normally.
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    let (mut stream, _) = listener.accept().await.unwrap();
    let mut first = true;
    while let Some(frame) = read_frame(&mut stream).await {
      if first {
        first = false;
        continue;
      }
      let packet = Packet::decode(&frame).unwrap();
      write_reply(&mut stream, &packet, Status::Ok, None).await;
    }
  });

  let options = ConnectOptions::new(addr.ip().to_string(), addr.port())
    .with_timeouts(TimeoutConfig {
      read: Some(Duration::from_millis(100)),
      ..TimeoutConfig::default()
    })
    .with_retry_policy(RetryPolicy {
      max_attempts: 3,
      initial_backoff_ms: 1,
      max_backoff_ms: 5,
      backoff_multiplier: 2.0,
    });
  let mut client = ShinyDbClient::connect_with_options(options).await.unwrap();

  // The first attempt times out and leaves a stale pending entry; the
  // wrapper must clear it so the retry pairs with its own reply.
  client.flush().await.unwrap();
  assert_eq!(client.pending_requests(), 0);
  let metrics = client.metrics();
  assert_eq!(metrics.timeouts, 1);
  assert_eq!(metrics.retries, 1);
  assert_eq!(metrics.operations, 1);
}

#[tokio::test]
async fn test_timeout_cleanup_clears_pending_and_charges_breaker() {
  // Accepts and reads but never replies.
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    let (mut stream, _) = listener.accept().await.unwrap();
    while read_frame(&mut stream).await.is_some() {}
  });

  let mut client = connect(addr).await;
  client.send_async(Operation::Flush).await.unwrap();
  assert_eq!(client.pending_requests(), 1);

  client.handle_timeout_cleanup(false).await.unwrap();
  assert_eq!(client.pending_requests(), 0);
  assert_eq!(client.circuit_breaker().failure_count(), 1);
}

#[tokio::test]
async fn test_read_deadline_yields_read_timeout() {
  // Accepts and reads but never replies.
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    let (mut stream, _) = listener.accept().await.unwrap();
    while read_frame(&mut stream).await.is_some() {}
  });

  let mut client = connect(addr).await;
  client.set_timeout_config(TimeoutConfig {
    read: Some(Duration::from_millis(50)),
    ..TimeoutConfig::default()
  });

  client.send_async(Operation::Flush).await.unwrap();
  let err = client.receive_async().await.unwrap_err();
  assert!(matches!(err, Error::ReadTimeout));

  client.handle_timeout_cleanup(false).await.unwrap();
  assert_eq!(client.pending_requests(), 0);
}
