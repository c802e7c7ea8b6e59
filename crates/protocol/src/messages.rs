use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Prefix applied to user metadata keys before they are sent to the service.
pub const METADATA_PREFIX: &str = "x-qn-meta-";

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Response to the init call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitPartsResponse {
    pub upload_id: String,
}

/// Acknowledgement of one uploaded part.
///
/// `md5` is the hex digest the service computed over the bytes it received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadPartResponse {
    pub etag: String,
    #[serde(default)]
    pub md5: String,
}

/// Default object descriptor returned by single-shot puts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutRet {
    #[serde(default)]
    pub hash: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub persistent_id: String,
    #[serde(default)]
    pub key: String,
}

// ---------------------------------------------------------------------------
// Completion request
// ---------------------------------------------------------------------------

/// One verified part as listed in the completion call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub part_number: u32,
    pub etag: String,
}

/// Body of the completion call.
///
/// `metadata` holds the caller's unprefixed keys; [`CompleteMultipart::to_wire`]
/// adds [`METADATA_PREFIX`] when building the request actually sent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteMultipart {
    pub parts: Vec<Part>,
    #[serde(default)]
    pub fname: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub custom_vars: HashMap<String, String>,
}

impl CompleteMultipart {
    /// Sorts parts by part number, as the assembly call requires.
    pub fn sort_parts(&mut self) {
        self.parts.sort_by_key(|p| p.part_number);
    }

    /// Returns the request body with prefixed metadata keys.
    pub fn to_wire(&self) -> CompleteMultipart {
        let metadata = self
            .metadata
            .iter()
            .map(|(k, v)| (format!("{METADATA_PREFIX}{k}"), v.clone()))
            .collect();
        CompleteMultipart {
            parts: self.parts.clone(),
            fname: self.fname.clone(),
            mime_type: self.mime_type.clone(),
            metadata,
            custom_vars: self.custom_vars.clone(),
        }
    }
}
