//! ShinyDB Rust Client SDK
//!
//! A native TCP client for ShinyDB, a resilient document database. Requests
//! are pipelined over a single framed connection; timeouts, retries with
//! exponential backoff and a circuit breaker sit between your call and the
//! socket.
//!
//! # Example
//!
//! ```no_run
//! use shinydb::query::{Direction, FilterOp};
//! use shinydb::ShinyDbClient;
//!
//! #[tokio::main]
//! async fn main() -> shinydb::Result<()> {
//!     // Connect to ShinyDB
//!     let mut client = ShinyDbClient::connect("localhost", 7687).await?;
//!
//!     // Fluent query
//!     let products = client
//!         .query()
//!         .space("adventureworks")
//!         .store("products")
//!         .filter("MakeFlag", FilterOp::Eq, 1)
//!         .and("ListPrice", FilterOp::Gt, 100)
//!         .order_by("ListPrice", Direction::Desc)
//!         .limit(10)
//!         .run()
//!         .await?;
//!     println!("matched {} products", products.count);
//!
//!     // Same query through the textual front-end
//!     let actives = client
//!         .query_str(r#"orders.filter(status = "active").limit(10)"#)
//!         .await;
//!     println!("actives: {:?}", actives.is_ok());
//!
//!     Ok(())
//! }
//! ```

mod breaker;
mod client;
mod error;
mod protocol;
pub mod query;
mod retry;
mod timeout;
mod transport;
mod types;

pub use breaker::{CircuitBreaker, CircuitState};
pub use client::{ClientMetrics, ConnectOptions, ShinyDbClient};
pub use error::{Error, Result};
pub use protocol::{Operation, Packet, Status, MAX_MESSAGE_SIZE, PACKET_HEADER_LEN};
pub use query::{ParseError, Query, QueryResponse};
pub use retry::RetryPolicy;
pub use timeout::TimeoutConfig;
pub use transport::{PendingRequest, Transport, MAX_PENDING};
pub use types::{AuthResult, BackupMetadata, Role};
