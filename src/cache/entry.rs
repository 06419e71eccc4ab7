use serde::{Deserialize, Serialize};

use super::{CacheError, CacheKey};
use crate::{Headers, Response, StatusCode};

/// The stored representation of a complete response.
///
/// Serialized as JSON: `{"statusCode":200,"body":"...","headers":{...}}`.
/// Decoding is strict; an unknown status code or a missing field is
/// reported as [`CacheError::Corrupt`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub status_code: StatusCode,
    pub body: String,
    pub headers: Headers,
}

impl CacheEntry {
    /// Snapshots a finished response. Fails when the body is not UTF-8,
    /// since the stored body is text.
    pub fn capture(
        key: &CacheKey,
        status_code: StatusCode,
        body: &[u8],
        headers: &Headers,
    ) -> Result<Self, CacheError> {
        let body = String::from_utf8(body.to_vec())
            .map_err(|_| CacheError::NonUtf8Body { key: key.clone() })?;
        Ok(Self {
            status_code,
            body,
            headers: headers.clone(),
        })
    }

    pub fn encode(&self, key: &CacheKey) -> Result<String, CacheError> {
        serde_json::to_string(self).map_err(|source| CacheError::Encode {
            key: key.clone(),
            source,
        })
    }

    /// Parses a stored payload. Unknown status codes and malformed headers
    /// are rejected as [`CacheError::Corrupt`].
    pub fn decode(key: &CacheKey, raw: &str) -> Result<Self, CacheError> {
        serde_json::from_str(raw).map_err(|source| CacheError::Corrupt {
            key: key.clone(),
            source,
        })
    }

    /// Replays this entry onto `response`: the stored status, every stored
    /// header (replacing same-named headers already present), and the stored
    /// body.
    pub fn replay(&self, response: &mut Response) {
        response.set_status(self.status_code);
        response.headers_mut().overwrite(&self.headers);
        response.write(&self.body);
    }
}
