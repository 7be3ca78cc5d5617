//! Wire protocol types and binary serialization for ShinyDB.
//!
//! Every message on the wire is a length-prefixed frame: a little-endian
//! u32 length followed by a packet of that many bytes. The packet carries a
//! fixed header (checksum, declared operation length, packet id, session id,
//! correlation id, millisecond timestamp) and a tagged [`Operation`].

use bytes::{BufMut, BytesMut};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Maximum frame size (16 MiB)
pub const MAX_MESSAGE_SIZE: u32 = 16 * 1024 * 1024;

/// Packet header length in bytes: checksum + length + packet id +
/// session id + correlation id + timestamp.
pub const PACKET_HEADER_LEN: usize = 4 + 4 + 4 + 4 + 8 + 8;

/// Reply status codes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
  Ok = 0x00,
  Error = 0x01,
  NotFound = 0x02,
  PermissionDenied = 0x03,
  InvalidRequest = 0x04,
  ServerError = 0x05,
  ServiceUnavailable = 0x06,
}

impl TryFrom<u8> for Status {
  type Error = ();
  fn try_from(v: u8) -> std::result::Result<Self, ()> {
    match v {
      0x00 => Ok(Self::Ok),
      0x01 => Ok(Self::Error),
      0x02 => Ok(Self::NotFound),
      0x03 => Ok(Self::PermissionDenied),
      0x04 => Ok(Self::InvalidRequest),
      0x05 => Ok(Self::ServerError),
      0x06 => Ok(Self::ServiceUnavailable),
      _ => Err(()),
    }
  }
}

/// Request/response operation variants
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
  Insert { namespace: String, id: Uuid, payload: Vec<u8> },
  Read { namespace: String, id: Uuid },
  Update { namespace: String, id: Uuid, payload: Vec<u8> },
  Delete { namespace: String, id: Uuid, payload: Vec<u8> },
  Query { namespace: String, payload: Vec<u8> },
  Aggregate { namespace: String, payload: Vec<u8> },
  Scan { namespace: String, start_key: Option<Uuid>, count: u32 },
  Create { entity: String },
  Drop { doc_type: String, name: String },
  List { doc_type: String, namespace: Option<String> },
  Flush,
  Authenticate { username: String, password: String },
  AuthenticateApiKey { api_key: String },
  Logout,
  Reply { status: Status, payload: Option<Vec<u8>> },
}

impl Operation {
  /// Wire tag for this variant.
  pub fn tag(&self) -> u8 {
    match self {
      Operation::Insert { .. } => 0x01,
      Operation::Read { .. } => 0x02,
      Operation::Update { .. } => 0x03,
      Operation::Delete { .. } => 0x04,
      Operation::Query { .. } => 0x05,
      Operation::Aggregate { .. } => 0x06,
      Operation::Scan { .. } => 0x07,
      Operation::Create { .. } => 0x08,
      Operation::Drop { .. } => 0x09,
      Operation::List { .. } => 0x0A,
      Operation::Flush => 0x0B,
      Operation::Authenticate { .. } => 0x0C,
      Operation::AuthenticateApiKey { .. } => 0x0D,
      Operation::Logout => 0x0E,
      Operation::Reply { .. } => 0x10,
    }
  }

  /// Short name used in log events.
  pub fn name(&self) -> &'static str {
    match self {
      Operation::Insert { .. } => "insert",
      Operation::Read { .. } => "read",
      Operation::Update { .. } => "update",
      Operation::Delete { .. } => "delete",
      Operation::Query { .. } => "query",
      Operation::Aggregate { .. } => "aggregate",
      Operation::Scan { .. } => "scan",
      Operation::Create { .. } => "create",
      Operation::Drop { .. } => "drop",
      Operation::List { .. } => "list",
      Operation::Flush => "flush",
      Operation::Authenticate { .. } => "authenticate",
      Operation::AuthenticateApiKey { .. } => "authenticate_api_key",
      Operation::Logout => "logout",
      Operation::Reply { .. } => "reply",
    }
  }

  fn encode(&self, buf: &mut BytesMut) {
    buf.put_u8(self.tag());
    match self {
      Operation::Insert { namespace, id, payload }
      | Operation::Update { namespace, id, payload }
      | Operation::Delete { namespace, id, payload } => {
        put_string(buf, namespace);
        buf.put_u128_le(id.as_u128());
        put_bytes(buf, payload);
      }
      Operation::Read { namespace, id } => {
        put_string(buf, namespace);
        buf.put_u128_le(id.as_u128());
      }
      Operation::Query { namespace, payload }
      | Operation::Aggregate { namespace, payload } => {
        put_string(buf, namespace);
        put_bytes(buf, payload);
      }
      Operation::Scan { namespace, start_key, count } => {
        put_string(buf, namespace);
        match start_key {
          Some(key) => {
            buf.put_u8(1);
            buf.put_u128_le(key.as_u128());
          }
          None => buf.put_u8(0),
        }
        buf.put_u32_le(*count);
      }
      Operation::Create { entity } => put_string(buf, entity),
      Operation::Drop { doc_type, name } => {
        put_string(buf, doc_type);
        put_string(buf, name);
      }
      Operation::List { doc_type, namespace } => {
        put_string(buf, doc_type);
        match namespace {
          Some(ns) => {
            buf.put_u8(1);
            put_string(buf, ns);
          }
          None => buf.put_u8(0),
        }
      }
      Operation::Flush | Operation::Logout => {}
      Operation::Authenticate { username, password } => {
        put_string(buf, username);
        put_string(buf, password);
      }
      Operation::AuthenticateApiKey { api_key } => put_string(buf, api_key),
      Operation::Reply { status, payload } => {
        buf.put_u8(*status as u8);
        match payload {
          Some(bytes) => {
            buf.put_u8(1);
            put_bytes(buf, bytes);
          }
          None => buf.put_u8(0),
        }
      }
    }
  }

  fn decode(buf: &mut &[u8]) -> Result<Operation> {
    let tag = take_u8(buf)?;
    let op = match tag {
      0x01 => Operation::Insert {
        namespace: take_string(buf)?,
        id: Uuid::from_u128(take_u128(buf)?),
        payload: take_bytes(buf)?,
      },
      0x02 => Operation::Read {
        namespace: take_string(buf)?,
        id: Uuid::from_u128(take_u128(buf)?),
      },
      0x03 => Operation::Update {
        namespace: take_string(buf)?,
        id: Uuid::from_u128(take_u128(buf)?),
        payload: take_bytes(buf)?,
      },
      0x04 => Operation::Delete {
        namespace: take_string(buf)?,
        id: Uuid::from_u128(take_u128(buf)?),
        payload: take_bytes(buf)?,
      },
      0x05 => Operation::Query {
        namespace: take_string(buf)?,
        payload: take_bytes(buf)?,
      },
      0x06 => Operation::Aggregate {
        namespace: take_string(buf)?,
        payload: take_bytes(buf)?,
      },
      0x07 => {
        let namespace = take_string(buf)?;
        let start_key = if take_u8(buf)? != 0 {
          Some(Uuid::from_u128(take_u128(buf)?))
        } else {
          None
        };
        Operation::Scan {
          namespace,
          start_key,
          count: take_u32(buf)?,
        }
      }
      0x08 => Operation::Create {
        entity: take_string(buf)?,
      },
      0x09 => Operation::Drop {
        doc_type: take_string(buf)?,
        name: take_string(buf)?,
      },
      0x0A => {
        let doc_type = take_string(buf)?;
        let namespace = if take_u8(buf)? != 0 {
          Some(take_string(buf)?)
        } else {
          None
        };
        Operation::List { doc_type, namespace }
      }
      0x0B => Operation::Flush,
      0x0C => Operation::Authenticate {
        username: take_string(buf)?,
        password: take_string(buf)?,
      },
      0x0D => Operation::AuthenticateApiKey {
        api_key: take_string(buf)?,
      },
      0x0E => Operation::Logout,
      0x10 => {
        let status = Status::try_from(take_u8(buf)?)
          .map_err(|_| Error::InvalidResponse("unknown reply status".to_string()))?;
        let payload = if take_u8(buf)? != 0 {
          Some(take_bytes(buf)?)
        } else {
          None
        };
        Operation::Reply { status, payload }
      }
      other => {
        return Err(Error::InvalidResponse(format!(
          "unknown operation tag 0x{:02x}",
          other
        )))
      }
    };
    Ok(op)
  }
}

/// A wire-level message: header fields plus one [`Operation`].
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
  pub packet_id: u32,
  pub session_id: u32,
  pub correlation_id: u64,
  pub timestamp_ms: u64,
  pub operation: Operation,
}

impl Packet {
  /// Serialize into `buf`. The checksum and declared-length header fields
  /// are backfilled after the operation body is written.
  pub fn encode(&self, buf: &mut BytesMut) {
    let header_start = buf.len();
    buf.put_u32_le(0); // checksum, backfilled below
    buf.put_u32_le(0); // operation length, backfilled below
    buf.put_u32_le(self.packet_id);
    buf.put_u32_le(self.session_id);
    buf.put_u64_le(self.correlation_id);
    buf.put_u64_le(self.timestamp_ms);

    let op_start = buf.len();
    self.operation.encode(buf);
    let op_len = (buf.len() - op_start) as u32;
    let crc = crc32c::crc32c(&buf[op_start..]);

    buf[header_start..header_start + 4].copy_from_slice(&crc.to_le_bytes());
    buf[header_start + 4..header_start + 8].copy_from_slice(&op_len.to_le_bytes());
  }

  /// Parse a packet from the body of one frame.
  pub fn decode(mut buf: &[u8]) -> Result<Packet> {
    if buf.len() < PACKET_HEADER_LEN {
      return Err(Error::InvalidResponse(format!(
        "packet truncated: {} bytes",
        buf.len()
      )));
    }
    let checksum = take_u32(&mut buf)?;
    let declared_len = take_u32(&mut buf)?;
    let packet_id = take_u32(&mut buf)?;
    let session_id = take_u32(&mut buf)?;
    let correlation_id = take_u64(&mut buf)?;
    let timestamp_ms = take_u64(&mut buf)?;

    if declared_len > MAX_MESSAGE_SIZE {
      return Err(Error::InvalidResponse(format!(
        "declared payload length {} exceeds cap",
        declared_len
      )));
    }
    if declared_len as usize != buf.len() {
      return Err(Error::InvalidResponse(format!(
        "declared payload length {} but {} bytes present",
        declared_len,
        buf.len()
      )));
    }
    if crc32c::crc32c(buf) != checksum {
      return Err(Error::InvalidResponse("checksum mismatch".to_string()));
    }

    let operation = Operation::decode(&mut buf)?;
    if !buf.is_empty() {
      return Err(Error::InvalidResponse(format!(
        "{} trailing bytes after operation",
        buf.len()
      )));
    }

    Ok(Packet {
      packet_id,
      session_id,
      correlation_id,
      timestamp_ms,
      operation,
    })
  }

  /// View this packet as a server reply, or fail with `InvalidResponse`.
  pub fn as_reply(&self) -> Result<(Status, Option<&[u8]>)> {
    match &self.operation {
      Operation::Reply { status, payload } => Ok((*status, payload.as_deref())),
      other => Err(Error::InvalidResponse(format!(
        "expected reply, got {}",
        other.name()
      ))),
    }
  }
}

fn put_string(buf: &mut BytesMut, s: &str) {
  buf.put_u32_le(s.len() as u32);
  buf.put_slice(s.as_bytes());
}

fn put_bytes(buf: &mut BytesMut, b: &[u8]) {
  buf.put_u32_le(b.len() as u32);
  buf.put_slice(b);
}

fn take_u8(buf: &mut &[u8]) -> Result<u8> {
  let (&first, rest) = buf
    .split_first()
    .ok_or_else(|| Error::InvalidResponse("truncated field".to_string()))?;
  *buf = rest;
  Ok(first)
}

fn take_u32(buf: &mut &[u8]) -> Result<u32> {
  Ok(u32::from_le_bytes(take_array::<4>(buf)?))
}

fn take_u64(buf: &mut &[u8]) -> Result<u64> {
  Ok(u64::from_le_bytes(take_array::<8>(buf)?))
}

fn take_u128(buf: &mut &[u8]) -> Result<u128> {
  Ok(u128::from_le_bytes(take_array::<16>(buf)?))
}

fn take_array<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N]> {
  if buf.len() < N {
    return Err(Error::InvalidResponse("truncated field".to_string()));
  }
  let mut out = [0u8; N];
  out.copy_from_slice(&buf[..N]);
  *buf = &buf[N..];
  Ok(out)
}

fn take_bytes(buf: &mut &[u8]) -> Result<Vec<u8>> {
  let len = take_u32(buf)? as usize;
  if buf.len() < len {
    return Err(Error::InvalidResponse("truncated payload".to_string()));
  }
  let out = buf[..len].to_vec();
  *buf = &buf[len..];
  Ok(out)
}

fn take_string(buf: &mut &[u8]) -> Result<String> {
  let raw = take_bytes(buf)?;
  String::from_utf8(raw).map_err(|_| Error::InvalidResponse("invalid UTF-8 in string".to_string()))
}
