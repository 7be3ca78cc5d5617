//! Framed, pipelined TCP transport.
//!
//! One transport owns one socket. Requests are written as length-prefixed
//! frames and recorded in a FIFO pending queue; the server answers in send
//! order, so each received reply pairs with the queue head. The correlation
//! id travels on the wire as a diagnostic aid only.
//!
//! All calls take `&mut self`: a connection has a single owning task and no
//! internal locking.

use std::collections::VecDeque;
use std::future::Future;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::protocol::{Operation, Packet, MAX_MESSAGE_SIZE};
use crate::timeout::TimeoutConfig;

/// Upper bound on in-flight pipelined requests.
pub const MAX_PENDING: usize = 1024;

/// Record of one in-flight request awaiting its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub correlation_id: u64,
    pub packet_id: u32,
    pub timestamp_ms: u64,
}

pub struct Transport {
    stream: Option<TcpStream>,
    packet_id: u32,
    session_id: u32,
    correlation_counter: u64,
    pending: VecDeque<PendingRequest>,
    encode_buf: BytesMut,
    receive_buf: BytesMut,
    timeouts: TimeoutConfig,
}

impl Transport {
    pub fn new(timeouts: TimeoutConfig) -> Self {
        Self {
            stream: None,
            packet_id: 0,
            session_id: 0,
            correlation_counter: 0,
            pending: VecDeque::new(),
            encode_buf: BytesMut::with_capacity(4096),
            receive_buf: BytesMut::with_capacity(4096),
            timeouts,
        }
    }

    pub fn timeouts(&self) -> TimeoutConfig {
        self.timeouts
    }

    pub fn set_timeouts(&mut self, timeouts: TimeoutConfig) {
        self.timeouts = timeouts;
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drop every in-flight record. Required after a timeout before the
    /// connection is used again; without it the FIFO pairing is misaligned.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Open a fresh connection, resetting counters, the pending queue and
    /// the per-connection session id.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        let addr = format!("{}:{}", host, port);
        let connecting = TcpStream::connect(&addr);
        let stream = match self.timeouts.connect {
            None => connecting.await,
            Some(budget) => tokio::time::timeout(budget, connecting)
                .await
                .map_err(|_| Error::ConnectionFailed(format!("connect to {} timed out", addr)))?,
        }
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::ConnectionRefused => {
                Error::ConnectionRefused(format!("{}: {}", addr, e))
            }
            _ => Error::ConnectionFailed(format!("{}: {}", addr, e)),
        })?;
        let _ = stream.set_nodelay(true);

        self.stream = Some(stream);
        self.session_id = rand::random();
        self.packet_id = 0;
        self.correlation_counter = 0;
        self.pending.clear();
        info!(addr = %addr, session_id = self.session_id, "connected");
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            info!("disconnected");
        }
        self.pending.clear();
    }

    /// Frame and write one request, honoring the write budget. Returns the
    /// correlation id assigned to the request.
    pub async fn send_async(&mut self, operation: Operation) -> Result<u64> {
        let deadline = deadline_after(self.timeouts.write);
        self.send_with_deadline(operation, deadline).await
    }

    pub(crate) async fn send_with_deadline(
        &mut self,
        operation: Operation,
        deadline: Option<Instant>,
    ) -> Result<u64> {
        if self.stream.is_none() {
            return Err(Error::ConnectionFailed("not connected".to_string()));
        }
        if self.pending.len() >= MAX_PENDING {
            return Err(Error::PipelineFull);
        }

        self.correlation_counter += 1;
        let correlation_id = self.correlation_counter;
        let timestamp_ms = now_ms();
        let packet = Packet {
            packet_id: self.packet_id,
            session_id: self.session_id,
            correlation_id,
            timestamp_ms,
            operation,
        };

        self.encode_buf.clear();
        packet.encode(&mut self.encode_buf);
        if self.encode_buf.len() > MAX_MESSAGE_SIZE as usize {
            return Err(Error::BufferOverflow);
        }
        let frame_len = (self.encode_buf.len() as u32).to_le_bytes();

        let stream = match self.stream.as_mut() {
            Some(s) => s,
            None => return Err(Error::ConnectionFailed("not connected".to_string())),
        };
        io_step(deadline, write_expired, write_failed, stream.write_all(&frame_len)).await?;
        io_step(deadline, write_expired, write_failed, stream.write_all(&self.encode_buf)).await?;
        io_step(deadline, write_expired, write_failed, stream.flush()).await?;

        self.pending.push_back(PendingRequest {
            correlation_id,
            packet_id: packet.packet_id,
            timestamp_ms,
        });
        self.packet_id = self.packet_id.wrapping_add(1);
        debug!(
            correlation_id,
            packet_id = packet.packet_id,
            op = packet.operation.name(),
            frame_bytes = self.encode_buf.len(),
            "sent"
        );
        Ok(correlation_id)
    }

    /// Read the next reply frame and pair it with the pending-queue head.
    pub async fn receive_async(&mut self) -> Result<Packet> {
        let deadline = deadline_after(self.timeouts.read);
        self.receive_with_deadline(deadline).await
    }

    pub(crate) async fn receive_with_deadline(
        &mut self,
        deadline: Option<Instant>,
    ) -> Result<Packet> {
        if self.pending.is_empty() {
            return Err(Error::InvalidResponse(
                "no pending request to match".to_string(),
            ));
        }
        let stream = match self.stream.as_mut() {
            Some(s) => s,
            None => return Err(Error::ConnectionFailed("not connected".to_string())),
        };

        let mut len_bytes = [0u8; 4];
        io_step(deadline, read_expired, read_failed, stream.read_exact(&mut len_bytes)).await?;
        let frame_len = u32::from_le_bytes(len_bytes);
        if frame_len > MAX_MESSAGE_SIZE {
            return Err(Error::InvalidResponse(format!(
                "frame length {} exceeds cap",
                frame_len
            )));
        }

        let frame_len = frame_len as usize;
        self.receive_buf.resize(frame_len, 0);
        io_step(
            deadline,
            read_expired,
            read_failed,
            stream.read_exact(&mut self.receive_buf[..frame_len]),
        )
        .await?;

        let packet = Packet::decode(&self.receive_buf[..frame_len])?;
        let matched = self.pending.pop_front();
        debug!(
            correlation_id = packet.correlation_id,
            matched = matched.map(|p| p.correlation_id),
            "received"
        );
        Ok(packet)
    }

    /// One request/response exchange under the operation deadline, with
    /// per-step budgets derived by subtracting elapsed time.
    pub async fn do_operation(&mut self, operation: Operation) -> Result<Packet> {
        let overall = deadline_after(self.timeouts.operation);
        let send_deadline = step_deadline(overall, self.timeouts.write)?;
        self.send_with_deadline(operation, send_deadline).await?;
        let read_deadline = step_deadline(overall, self.timeouts.read)?;
        self.receive_with_deadline(read_deadline).await
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

fn deadline_after(budget: Option<Duration>) -> Option<Instant> {
    budget.map(|b| Instant::now() + b)
}

/// Combine the overall operation deadline with one step's own budget,
/// failing `Timeout` when the operation budget is already spent.
fn step_deadline(overall: Option<Instant>, budget: Option<Duration>) -> Result<Option<Instant>> {
    let now = Instant::now();
    if let Some(deadline) = overall {
        if deadline <= now {
            return Err(Error::Timeout);
        }
    }
    let step = budget.map(|b| now + b);
    Ok(match (overall, step) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    })
}

fn write_expired() -> Error {
    Error::WriteTimeout
}

fn read_expired() -> Error {
    Error::ReadTimeout
}

fn write_failed(e: std::io::Error) -> Error {
    Error::ConnectionReset(e.to_string())
}

/// Peer close surfaces as `UnexpectedEof`, which the shared io mapping
/// turns into `ConnectionReset`.
fn read_failed(e: std::io::Error) -> Error {
    Error::from(e)
}

/// Run one socket operation against a wall-clock deadline.
async fn io_step<T, F>(
    deadline: Option<Instant>,
    expired: fn() -> Error,
    map_io: fn(std::io::Error) -> Error,
    fut: F,
) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match deadline {
        None => fut.await.map_err(map_io),
        Some(d) => {
            let remaining = d
                .checked_duration_since(Instant::now())
                .filter(|r| !r.is_zero())
                .ok_or_else(expired)?;
            match tokio::time::timeout(remaining, fut).await {
                Ok(result) => result.map_err(map_io),
                Err(_) => Err(expired()),
            }
        }
    }
}
