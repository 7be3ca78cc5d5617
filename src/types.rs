//! Ancillary reply payload types.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Access role granted to an authenticated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    ReadWrite,
    ReadOnly,
    #[default]
    None,
}

/// Successful authentication reply. Fields the server omits default to
/// empty / `Role::None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthResult {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub role: Role,
}

impl AuthResult {
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| Error::InvalidResponse(format!("auth result: {}", e)))
    }
}

/// Metadata describing a completed backup. All fields are required; a
/// missing field is an invalid response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub backup_path: String,
    pub timestamp: i64,
    pub size_bytes: u64,
    pub vlog_count: u16,
    pub entry_count: u64,
}

impl BackupMetadata {
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| Error::InvalidResponse(format!("backup metadata: {}", e)))
    }
}
