use crate::calculator::LineItem;
use crate::errors::AppError;
use sha2::{Digest, Sha256};

/// Current version of the persisted line-item layout.
pub const LINE_ITEMS_SCHEMA_VERSION: u32 = 1;

/// Persisted form of a document's ordered line items.
///
/// Items are stored as a tagged, versioned envelope with a SHA-256 checksum over the
/// canonical item encoding:
///
/// - `schema_version` is checked before decoding so a future item shape is never read
///   with the wrong layout.
/// - Decimal fields are encoded as strings, so quantities and prices come back with
///   the exact digits and scale they were written with.
/// - The checksum detects edits to the stored JSON that bypassed the calculator.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LineItemsDocument {
    pub schema_version: u32,
    pub items: Vec<LineItem>,
    /// SHA-256 of the canonical items encoding (hex encoded).
    pub checksum: String,
}

impl LineItemsDocument {
    /// Wraps items in the current schema version with a fresh checksum.
    pub fn new(items: Vec<LineItem>) -> Self {
        let checksum = Self::compute_checksum(&items);
        Self {
            schema_version: LINE_ITEMS_SCHEMA_VERSION,
            items,
            checksum,
        }
    }

    fn compute_checksum(items: &[LineItem]) -> String {
        let canonical = serde_json::to_string(items).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Returns true if the checksum matches the items.
    pub fn is_valid(&self) -> bool {
        Self::compute_checksum(&self.items) == self.checksum
    }

    /// Unwraps the items after checking version and integrity.
    pub fn into_items(self) -> Result<Vec<LineItem>, AppError> {
        if self.schema_version != LINE_ITEMS_SCHEMA_VERSION {
            return Err(AppError::Internal(format!(
                "Unsupported line item schema version {} (expected {})",
                self.schema_version, LINE_ITEMS_SCHEMA_VERSION
            )));
        }

        if !self.is_valid() {
            tracing::warn!(
                "Line item checksum mismatch. Expected: {}, items: {}",
                self.checksum,
                self.items.len()
            );
            return Err(AppError::Internal(
                "Stored line items failed integrity check".to_string(),
            ));
        }

        Ok(self.items)
    }

    /// Serializes the envelope to a JSON string.
    pub fn encode(&self) -> Result<String, AppError> {
        serde_json::to_string(self)
            .map_err(|e| AppError::Internal(format!("Failed to encode line items: {}", e)))
    }

    /// Parses and verifies a JSON envelope.
    pub fn decode(serialized: &str) -> Result<Vec<LineItem>, AppError> {
        let document: LineItemsDocument = serde_json::from_str(serialized)
            .map_err(|e| AppError::Internal(format!("Malformed line item document: {}", e)))?;
        document.into_items()
    }
}
