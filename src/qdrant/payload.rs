//! Helpers for constructing, filtering, and hashing Qdrant payloads.

use crate::index::Chunk;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use super::QdrantError;

/// Build the payload stored alongside each chunk vector.
///
/// The chunk record is stored flat so that `document_id` can carry a keyword index.
pub(crate) fn build_payload(
    chunk: &Chunk,
    position: u64,
    timestamp_rfc3339: &str,
) -> Result<Value, QdrantError> {
    let mut payload = match serde_json::to_value(chunk) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return Err(QdrantError::InvalidPayload(format!(
                "chunk serialized to {other}"
            )));
        }
        Err(error) => return Err(QdrantError::InvalidPayload(error.to_string())),
    };
    payload.insert("position".into(), Value::from(position));
    payload.insert(
        "indexed_at".into(),
        Value::String(timestamp_rfc3339.to_string()),
    );
    Ok(Value::Object(payload))
}

/// Decode a stored payload back into a chunk record.
pub(crate) fn chunk_from_payload(mut payload: Map<String, Value>) -> Result<Chunk, QdrantError> {
    payload.remove("position");
    payload.remove("indexed_at");
    serde_json::from_value(Value::Object(payload))
        .map_err(|error| QdrantError::InvalidPayload(error.to_string()))
}

/// Exact-match filter on the `document_id` payload field.
pub(crate) fn document_filter(document_id: &str) -> Value {
    json!({
        "must": [
            {
                "key": "document_id",
                "match": { "value": document_id }
            }
        ]
    })
}

/// Compute a deterministic SHA-256 hash for the chunk text.
pub fn compute_chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)
}

/// Current timestamp formatted for payload storage.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_hash_is_stable() {
        let text = "Hello world";
        let h1 = compute_chunk_hash(text);
        let h2 = compute_chunk_hash(text);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }

    #[test]
    fn timestamp_is_rfc3339_like() {
        let ts = current_timestamp_rfc3339();
        assert!(ts.contains('T') && ts.ends_with('Z'));
    }

    #[test]
    fn payload_round_trips_chunk_fields() {
        let chunk = Chunk::new("doc-1", "doc-1_chunk_3_1", "3_1", "Fire is covered.", 4);
        let payload = build_payload(&chunk, 7, "2025-01-01T00:00:00Z").expect("payload");
        assert_eq!(payload["document_id"], "doc-1");
        assert_eq!(payload["chunk_index"], "3_1");
        assert_eq!(payload["position"], 7);
        assert_eq!(payload["indexed_at"], "2025-01-01T00:00:00Z");

        let Value::Object(map) = payload else {
            panic!("payload must be an object");
        };
        let decoded = chunk_from_payload(map).expect("decoded");
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn document_filter_matches_on_keyword() {
        let filter = document_filter("doc-9");
        assert_eq!(filter["must"][0]["key"], "document_id");
        assert_eq!(filter["must"][0]["match"]["value"], "doc-9");
    }
}
