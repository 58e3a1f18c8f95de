//! Update records and the single-line decoder

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One decoded input line:
/// `{"user": "...", "timestamp": 17, "values": {"key": "value"}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub user: String,
    pub timestamp: i64,
    #[serde(rename = "values")]
    pub fields: HashMap<String, String>,
}

impl UpdateRecord {
    pub fn new(user: impl Into<String>, timestamp: i64, fields: HashMap<String, String>) -> Self {
        UpdateRecord {
            user: user.into(),
            timestamp,
            fields,
        }
    }

    /// Decode one line. A trailing `\r` is tolerated, anything else malformed
    /// (including an empty line) is an error.
    pub fn decode(line: &[u8]) -> Result<Self, serde_json::Error> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        serde_json::from_slice(line)
    }
}
