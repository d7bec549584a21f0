//! Provenance entries and stable parameter fingerprints.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Identity of one detector invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Provenance {
    /// Tool name, e.g. `yolo-coarse`.
    pub tool: String,
    /// Tool version string.
    pub version: String,
    /// Model checkpoint identifier, when the tool loads weights.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ckpt: Option<String>,
    /// Stable hash of the parameter slice the tool ran with.
    pub params_hash: String,
    /// When the invocation happened.
    pub ts: DateTime<Utc>,
    /// Set when the detector was skipped instead of executed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
}

impl Provenance {
    /// Build a provenance entry for an executed tool.
    pub fn new(
        tool: impl Into<String>,
        version: impl Into<String>,
        ckpt: Option<String>,
        params_hash: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            version: version.into(),
            ckpt,
            params_hash: params_hash.into(),
            ts: Utc::now(),
            skipped_reason: None,
        }
    }

    /// Minimal stub used for skipped detectors that never ran.
    pub fn stub(tool: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(tool, version, None, "-")
    }

    /// Dedup key for the top-level provenance list.
    pub fn dedup_key(&self) -> (String, String, String) {
        (self.tool.clone(), self.version.clone(), self.params_hash.clone())
    }
}

/// Stable fingerprint of a params structure.
///
/// The value is serialized to canonical JSON (object keys sorted
/// recursively) and hashed with SHA-256; the first 16 hex characters are
/// returned. Two structurally equal params values always fingerprint
/// identically regardless of field declaration order.
pub fn params_fingerprint<T: Serialize>(params: &T) -> String {
    let value = serde_json::to_value(params).unwrap_or(Value::Null);
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_is_stable_across_key_order() {
        let a = json!({"tile_size": 512, "stride": 256});
        let b = json!({"stride": 256, "tile_size": 512});
        assert_eq!(params_fingerprint(&a), params_fingerprint(&b));
    }

    #[test]
    fn fingerprint_changes_with_values() {
        let a = json!({"tile_size": 512});
        let b = json!({"tile_size": 256});
        assert_ne!(params_fingerprint(&a), params_fingerprint(&b));
    }

    #[test]
    fn fingerprint_is_short_hex() {
        let fp = params_fingerprint(&json!({"x": 1}));
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn dedup_key_ignores_timestamp() {
        let a = Provenance::new("ocr", "2.1", None, "abc");
        let mut b = a.clone();
        b.ts = Utc::now();
        assert_eq!(a.dedup_key(), b.dedup_key());
    }
}
