use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Normalized institution row from the upstream directory.
///
/// `inst_code` is the stable identifier; both fields are non-empty once a
/// row has passed normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeiRecord {
    pub inst_code: String,
    pub inst_name: String,
}

/// Raw program row as returned by the portal.
///
/// The upstream does not honor a rigid schema, so rows stay loosely typed
/// and unknown fields pass through untouched. Only `programName` and
/// `majorName` have defined accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramRecord {
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
}

impl ProgramRecord {
    pub fn new(fields: HashMap<String, Value>) -> Self {
        Self { fields }
    }

    pub fn program_name(&self) -> Option<String> {
        self.text_field("programName")
    }

    pub fn major_name(&self) -> Option<String> {
        self.text_field("majorName")
    }

    /// Trimmed string view of a field; `None` for missing, null, blank or
    /// non-textual values. Numbers are coerced since the upstream sometimes
    /// sends codes as bare numbers.
    pub fn text_field(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Binary permit document held in the cache for the TTL window. Never
/// persisted to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfPayload {
    pub bytes: Vec<u8>,
    pub size: usize,
}

impl PdfPayload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            size: bytes.len(),
            bytes,
        }
    }
}

/// Outcome of a proxied document fetch. Callers see either valid bytes or
/// the original URL for a direct-link fallback, never a truncated file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    Available(PdfPayload),
    NotAvailable { url: String },
}

impl DocumentOutcome {
    pub fn is_available(&self) -> bool {
        matches!(self, DocumentOutcome::Available(_))
    }
}
