use crate::error::CursorError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// The resumable position of a paused multi-partition list.
///
/// The state is handed to callers as an opaque continue token: base64 of a compact JSON object.
/// Partitions are identified by name so that a token survives changes to the order or number of
/// partitions between pages.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListState {
    /// The pinned revision shared by every page of the listing.
    #[serde(rename = "r", default, skip_serializing_if = "String::is_empty")]
    pub revision: String,

    /// The partition to resume from.
    #[serde(rename = "p", default, skip_serializing_if = "String::is_empty")]
    pub partition_name: String,

    /// The partition's continue token for the page to re-fetch.
    #[serde(rename = "c", default, skip_serializing_if = "String::is_empty")]
    pub continue_token: String,

    /// The number of items of the re-fetched page that were already returned.
    #[serde(rename = "o", default, skip_serializing_if = "is_zero")]
    pub offset: usize,

    /// The page size of the original request.
    #[serde(rename = "l", default, skip_serializing_if = "is_zero")]
    pub limit: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl ListState {
    pub fn encode(&self) -> Result<String, CursorError> {
        let json = serde_json::to_vec(self)?;
        Ok(STANDARD.encode(json))
    }

    pub fn decode(token: &str) -> Result<Self, CursorError> {
        let json = STANDARD.decode(token)?;
        Ok(serde_json::from_slice(&json)?)
    }
}
