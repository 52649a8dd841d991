//! # JSON Module
//!
//! Request bodies are parsed with simd-json; responses are serialized with
//! serde_json.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Parse JSON bytes in place
///
/// simd-json mutates the buffer while parsing.
///
/// # Errors
///
/// Returns a 400 `Error::Http` if the input is not valid JSON for `T`.
pub fn parse_json_bytes<T: DeserializeOwned>(bytes: &mut [u8]) -> Result<T> {
    simd_json::from_slice(bytes).map_err(|e| Error::bad_request(format!("Invalid JSON body: {e}")))
}

/// Serialize a value to a JSON byte buffer
///
/// # Errors
///
/// Returns `Error::Json` if `value` cannot be represented as JSON.
pub fn to_json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}
