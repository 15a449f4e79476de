//! ETags for versioned rows: the base64 form of the 8-byte big-endian row
//! version.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::error::RepositoryError;

pub fn encode(version: u64) -> String {
    STANDARD.encode(version.to_be_bytes())
}

pub fn decode(etag: &str) -> Result<u64, RepositoryError> {
    let bytes = STANDARD
        .decode(etag.trim())
        .map_err(|e| RepositoryError::invalid_argument(format!("invalid etag {:?}: {}", etag, e)))?;
    let bytes: [u8; 8] = bytes.try_into().map_err(|b: Vec<u8>| {
        RepositoryError::invalid_argument(format!("etag must hold 8 bytes, got {}", b.len()))
    })?;
    Ok(u64::from_be_bytes(bytes))
}
