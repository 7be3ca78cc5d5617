//! Resilient ShinyDB client.
//!
//! Composes the framed transport with the retry policy, circuit breaker
//! and timeout budgets. Every operation funnels through
//! [`ShinyDbClient::do_operation`], which owns the retry loop.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::breaker::CircuitBreaker;
use crate::error::{Error, Result};
use crate::protocol::{Operation, Packet, Status};
use crate::query::{Query, QueryResponse};
use crate::retry::RetryPolicy;
use crate::timeout::TimeoutConfig;
use crate::transport::Transport;
use crate::types::AuthResult;

/// Counters exposed to external observers. Shared behind a mutex so a
/// monitoring task can read while the owning task drives the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientMetrics {
    pub operations: u64,
    pub failures: u64,
    pub retries: u64,
    pub reconnects: u64,
    pub timeouts: u64,
    pub rejected: u64,
}

/// Connection configuration consumed by
/// [`ShinyDbClient::connect_with_options`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub timeouts: TimeoutConfig,
    pub retry: RetryPolicy,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub breaker_cooldown: Duration,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeouts: TimeoutConfig::default(),
            retry: RetryPolicy::default(),
            failure_threshold: 5,
            success_threshold: 3,
            breaker_cooldown: Duration::from_secs(30),
        }
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_breaker(
        mut self,
        failure_threshold: u32,
        success_threshold: u32,
        cooldown: Duration,
    ) -> Self {
        self.failure_threshold = failure_threshold;
        self.success_threshold = success_threshold;
        self.breaker_cooldown = cooldown;
        self
    }
}

pub struct ShinyDbClient {
    host: String,
    port: u16,
    transport: Transport,
    retry_policy: RetryPolicy,
    breaker: CircuitBreaker,
    metrics: Arc<Mutex<ClientMetrics>>,
}

impl ShinyDbClient {
    /// Connect with default options.
    pub async fn connect(host: impl Into<String>, port: u16) -> Result<Self> {
        Self::connect_with_options(ConnectOptions::new(host, port)).await
    }

    pub async fn connect_with_options(options: ConnectOptions) -> Result<Self> {
        let mut transport = Transport::new(options.timeouts);
        transport.connect(&options.host, options.port).await?;
        Ok(Self {
            host: options.host,
            port: options.port,
            transport,
            retry_policy: options.retry,
            breaker: CircuitBreaker::new(
                options.failure_threshold,
                options.success_threshold,
                options.breaker_cooldown,
            ),
            metrics: Arc::new(Mutex::new(ClientMetrics::default())),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn disconnect(&mut self) {
        self.transport.disconnect();
    }

    /// Tear down the socket and establish a fresh connection to the last
    /// known address, clearing in-flight state and resetting counters.
    pub async fn reconnect(&mut self) -> Result<()> {
        info!(host = %self.host, port = self.port, "reconnecting");
        self.transport.disconnect();
        self.transport.connect(&self.host, self.port).await?;
        self.metrics_mut().reconnects += 1;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    pub fn set_retry_policy(&mut self, policy: RetryPolicy) {
        self.retry_policy = policy;
    }

    pub fn timeout_config(&self) -> TimeoutConfig {
        self.transport.timeouts()
    }

    pub fn set_timeout_config(&mut self, timeouts: TimeoutConfig) {
        self.transport.set_timeouts(timeouts);
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn circuit_breaker_mut(&mut self) -> &mut CircuitBreaker {
        &mut self.breaker
    }

    /// Snapshot of the client's counters.
    pub fn metrics(&self) -> ClientMetrics {
        *self.metrics_mut()
    }

    /// Shared handle for observers on other tasks.
    pub fn metrics_handle(&self) -> Arc<Mutex<ClientMetrics>> {
        Arc::clone(&self.metrics)
    }

    pub fn pending_requests(&self) -> usize {
        self.transport.pending_len()
    }

    /// Pipeline a request without waiting for its reply.
    pub async fn send_async(&mut self, operation: Operation) -> Result<u64> {
        self.transport.send_async(operation).await
    }

    /// Receive the next pipelined reply, in send order.
    pub async fn receive_async(&mut self) -> Result<Packet> {
        self.transport.receive_async().await
    }

    /// One request/response exchange under the resilience policies: the
    /// circuit breaker gates entry, transient failures back off and retry,
    /// and connectivity loss triggers a reconnect between attempts. A
    /// failed reconnect becomes the latest error without consuming an
    /// attempt.
    ///
    /// Replies carrying a service-class status (`ServerError`,
    /// `ServiceUnavailable`) count as failed attempts and re-enter the
    /// backoff loop; other statuses pass through to per-operation mapping.
    pub async fn do_operation(&mut self, operation: Operation) -> Result<Packet> {
        if !self.breaker.should_allow() {
            self.metrics_mut().rejected += 1;
            return Err(Error::ServiceUnavailable(
                "circuit breaker is open".to_string(),
            ));
        }

        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut last_error: Option<Error> = None;
        for attempt in 0..max_attempts {
            let outcome = match self.transport.do_operation(operation.clone()).await {
                Ok(packet) => match service_class_error(&packet) {
                    Some(err) => Err(err),
                    None => Ok(packet),
                },
                Err(err) => Err(err),
            };
            match outcome {
                Ok(packet) => {
                    self.breaker.record_success();
                    self.metrics_mut().operations += 1;
                    return Ok(packet);
                }
                Err(err) => {
                    self.breaker.record_failure();
                    {
                        let mut metrics = self.metrics_mut();
                        metrics.failures += 1;
                        if err.is_timeout() {
                            metrics.timeouts += 1;
                        }
                    }
                    if !err.is_retryable() || attempt + 1 == max_attempts {
                        return Err(err);
                    }

                    let delay = self.retry_policy.calculate_backoff(attempt + 1);
                    warn!(
                        attempt = attempt + 1,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "retrying operation"
                    );
                    self.metrics_mut().retries += 1;
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }

                    if err.is_connection_loss() {
                        match self.reconnect().await {
                            Ok(()) => last_error = Some(err),
                            Err(reconnect_err) => last_error = Some(reconnect_err),
                        }
                    } else {
                        if err.is_timeout() {
                            // The timed-out exchange's entry is still at the
                            // head of the pending queue and would pair with
                            // the retry's reply.
                            self.transport.clear_pending();
                        }
                        last_error = Some(err);
                    }
                }
            }
        }
        Err(last_error.unwrap_or(Error::Timeout))
    }

    /// Recover from a timeout: the pending queue no longer lines up with
    /// what the server will send, so drop it, charge the breaker, and
    /// optionally re-establish the connection. Must be called before the
    /// next send or receive after any timeout error.
    pub async fn handle_timeout_cleanup(&mut self, reconnect: bool) -> Result<()> {
        self.transport.clear_pending();
        self.breaker.record_failure();
        if reconnect {
            self.reconnect().await?;
        }
        Ok(())
    }

    /// Durability barrier: returns once the server has flushed.
    pub async fn flush(&mut self) -> Result<()> {
        let packet = self.do_operation(Operation::Flush).await?;
        expect_ok(&packet)?;
        Ok(())
    }

    /// Health probe built on [`ShinyDbClient::flush`].
    pub async fn ping(&mut self) -> bool {
        self.flush().await.is_ok()
    }

    pub async fn authenticate(&mut self, username: &str, password: &str) -> Result<AuthResult> {
        let packet = self
            .do_operation(Operation::Authenticate {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await?;
        auth_reply(&packet)
    }

    pub async fn authenticate_api_key(&mut self, api_key: &str) -> Result<AuthResult> {
        let packet = self
            .do_operation(Operation::AuthenticateApiKey {
                api_key: api_key.to_string(),
            })
            .await?;
        auth_reply(&packet)
    }

    pub async fn logout(&mut self) -> Result<()> {
        let packet = self.do_operation(Operation::Logout).await?;
        expect_ok(&packet)?;
        Ok(())
    }

    /// Create a space, store or index from its definition.
    pub async fn create(&mut self, entity: &str) -> Result<()> {
        let packet = self
            .do_operation(Operation::Create {
                entity: entity.to_string(),
            })
            .await?;
        expect_ok(&packet)?;
        Ok(())
    }

    /// Drop a named entity of the given type.
    pub async fn drop_entity(&mut self, doc_type: &str, name: &str) -> Result<()> {
        let packet = self
            .do_operation(Operation::Drop {
                doc_type: doc_type.to_string(),
                name: name.to_string(),
            })
            .await?;
        expect_ok(&packet)?;
        Ok(())
    }

    /// List entities of the given type, optionally scoped to a namespace.
    pub async fn list(&mut self, doc_type: &str, namespace: Option<&str>) -> Result<Vec<String>> {
        let packet = self
            .do_operation(Operation::List {
                doc_type: doc_type.to_string(),
                namespace: namespace.map(str::to_string),
            })
            .await?;
        match expect_ok(&packet)? {
            Some(payload) => serde_json::from_slice(payload)
                .map_err(|e| Error::InvalidResponse(format!("list reply: {}", e))),
            None => Ok(Vec::new()),
        }
    }

    /// Start a fluent query against this connection.
    pub fn query(&mut self) -> Query<'_> {
        Query::new(self)
    }

    /// Parse and execute a textual query, e.g.
    /// `orders.filter(status = "active").limit(10)`.
    pub async fn query_str(&mut self, source: &str) -> Result<QueryResponse> {
        let ir = crate::query::parse(source)?;
        Query::from_ir(self, ir).run().await
    }

    fn metrics_mut(&self) -> MutexGuard<'_, ClientMetrics> {
        self.metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Service-class reply statuses are transient in the retry taxonomy, so
/// the wrapper must see them as errors inside the retried attempt rather
/// than handing the packet to the caller.
fn service_class_error(packet: &Packet) -> Option<Error> {
    let Operation::Reply { status, payload } = &packet.operation else {
        return None;
    };
    let detail = || {
        payload
            .as_deref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_else(|| format!("{:?}", status))
    };
    match status {
        Status::ServerError => Some(Error::ServerError(detail())),
        Status::ServiceUnavailable => Some(Error::ServiceUnavailable(detail())),
        _ => None,
    }
}

fn expect_ok(packet: &Packet) -> Result<Option<&[u8]>> {
    let (status, payload) = packet.as_reply()?;
    if status == Status::Ok {
        Ok(payload)
    } else {
        Err(reply_status_error(status, payload))
    }
}

fn auth_reply(packet: &Packet) -> Result<AuthResult> {
    let payload = expect_ok(packet)?
        .ok_or_else(|| Error::InvalidResponse("auth reply carried no payload".to_string()))?;
    AuthResult::from_payload(payload)
}

fn reply_status_error(status: Status, payload: Option<&[u8]>) -> Error {
    let detail = payload
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .unwrap_or_else(|| format!("{:?}", status));
    match status {
        Status::NotFound => Error::NotFound(detail),
        Status::PermissionDenied => Error::PermissionDenied(detail),
        Status::InvalidRequest => Error::InvalidRequest(detail),
        Status::ServerError => Error::ServerError(detail),
        Status::ServiceUnavailable => Error::ServiceUnavailable(detail),
        Status::Ok | Status::Error => Error::OperationFailed(detail),
    }
}
