//! Vector index backed by a Qdrant collection.

use super::{
    Chunk, IndexError, InsertSummary, SimilarityResult, VectorIndex, similarity_from_distance,
    sort_chunks, stamp_entries, validate_batch,
};
use crate::qdrant::{
    QdrantError, QdrantService, QdrantSettings, build_payload, chunk_from_payload,
    current_timestamp_rfc3339, document_filter,
};
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;

/// Index over a Euclidean Qdrant collection with a keyword index on `document_id`.
///
/// Point ids are dense positions taken from the collection's exact count. Inserts from this
/// process are serialized so positions are never handed out twice.
pub struct QdrantIndex {
    service: QdrantService,
    dimension: usize,
    writer: Mutex<()>,
}

impl QdrantIndex {
    /// Connect to the collection, creating it and its payload index when missing.
    pub async fn connect(settings: QdrantSettings, dimension: usize) -> Result<Self, IndexError> {
        if dimension == 0 {
            return Err(IndexError::InvalidDimension);
        }
        let service = QdrantService::new(settings)?;
        service.ensure_collection(dimension as u64).await?;
        service.ensure_keyword_index("document_id").await?;
        tracing::debug!(
            collection = service.collection(),
            dimension,
            "Qdrant index connected"
        );
        Ok(Self {
            service,
            dimension,
            writer: Mutex::new(()),
        })
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn backend(&self) -> &'static str {
        "qdrant"
    }

    async fn insert(
        &self,
        document_id: &str,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<InsertSummary, IndexError> {
        validate_batch(self.dimension, &chunks, &vectors)?;

        let _guard = self.writer.lock().await;
        let first = self.service.count_points().await?;
        if chunks.is_empty() {
            return Ok(InsertSummary {
                inserted: 0,
                first_position: first,
            });
        }

        let timestamp = current_timestamp_rfc3339();
        let inserted = chunks.len();
        let mut points = Vec::with_capacity(inserted);
        for entry in stamp_entries(document_id, first, chunks, vectors) {
            let payload = build_payload(&entry.chunk, entry.position, &timestamp)?;
            points.push(json!({
                "id": entry.position,
                "vector": entry.vector,
                "payload": payload,
            }));
        }

        self.service.upsert_points(points).await?;
        tracing::info!(
            document_id,
            inserted,
            first_position = first,
            collection = self.service.collection(),
            "Chunks stored in Qdrant"
        );
        Ok(InsertSummary {
            inserted,
            first_position: first,
        })
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<SimilarityResult>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let filter = document_id.map(document_filter);
        let points = self.service.query_points(query, filter, k).await?;

        let mut results = Vec::with_capacity(points.len());
        for point in points {
            let payload = point.payload.ok_or_else(|| {
                QdrantError::InvalidPayload(format!("point {} has no payload", point.id))
            })?;
            let chunk = chunk_from_payload(payload)?;
            results.push(SimilarityResult {
                chunk_id: chunk.chunk_id,
                chunk_index: chunk.chunk_index,
                text: chunk.text,
                // Euclid scores are plain L2; square them to match the flat backend.
                similarity: similarity_from_distance(point.score * point.score),
                raw_distance: Some(point.score),
            });
        }
        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

        tracing::debug!(document_id, k, hits = results.len(), "Qdrant search");
        Ok(results)
    }

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>, IndexError> {
        let payloads = self
            .service
            .scroll_payloads(document_filter(document_id))
            .await?;
        let mut chunks = payloads
            .into_iter()
            .map(chunk_from_payload)
            .collect::<Result<Vec<_>, _>>()?;
        sort_chunks(&mut chunks);
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{
        Method::{GET, POST, PUT},
        MockServer,
    };
    use std::time::Duration;

    async fn connect(server: &MockServer) -> QdrantIndex {
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/chunks");
                then.status(200).json_body(json!({ "result": {} }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(PUT).path("/collections/chunks/index");
                then.status(200).json_body(json!({ "result": {} }));
            })
            .await;
        QdrantIndex::connect(
            QdrantSettings {
                url: server.base_url(),
                collection: "chunks".into(),
                api_key: None,
                timeout: Duration::from_secs(5),
            },
            2,
        )
        .await
        .expect("connect")
    }

    #[tokio::test]
    async fn connect_creates_missing_collection_with_euclid_distance() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/fresh");
                then.status(404);
            })
            .await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/fresh")
                    .body_contains("\"Euclid\"");
                then.status(200).json_body(json!({ "result": true }));
            })
            .await;
        let keyword = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/fresh/index")
                    .body_contains("\"document_id\"");
                then.status(409);
            })
            .await;

        let index = QdrantIndex::connect(
            QdrantSettings {
                url: server.base_url(),
                collection: "fresh".into(),
                api_key: None,
                timeout: Duration::from_secs(5),
            },
            4,
        )
        .await
        .expect("connect");

        create.assert_async().await;
        keyword.assert_async().await;
        assert_eq!(index.dimension(), 4);
    }

    #[tokio::test]
    async fn insert_assigns_positions_after_existing_points() {
        let server = MockServer::start_async().await;
        let index = connect(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/chunks/points/count");
                then.status(200).json_body(json!({ "result": { "count": 5 } }));
            })
            .await;
        let upsert = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/chunks/points")
                    .query_param("wait", "true")
                    .body_contains("\"id\":5")
                    .body_contains("\"id\":6")
                    .body_contains("\"document_id\":\"doc\"");
                then.status(200).json_body(json!({ "result": { "status": "completed" } }));
            })
            .await;

        let summary = index
            .insert(
                "doc",
                vec![
                    Chunk::new("other", "doc_chunk_0", 0_u64, "first", 1),
                    Chunk::new("other", "doc_chunk_1", 1_u64, "second", 1),
                ],
                vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            )
            .await
            .expect("insert");

        upsert.assert_async().await;
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.first_position, 5);
    }

    #[tokio::test]
    async fn search_converts_distances_to_similarities() {
        let server = MockServer::start_async().await;
        let index = connect(&server).await;
        let query = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/collections/chunks/points/query")
                    .body_contains("\"limit\":2")
                    .body_contains("\"doc\"");
                then.status(200).json_body(json!({
                    "result": {
                        "points": [
                            {
                                "id": 0,
                                "score": 0.0,
                                "payload": {
                                    "chunk_id": "doc_chunk_0",
                                    "document_id": "doc",
                                    "chunk_index": 0,
                                    "text": "exact",
                                    "position": 0
                                }
                            },
                            {
                                "id": 1,
                                "score": 1.0,
                                "payload": {
                                    "chunk_id": "doc_chunk_1",
                                    "document_id": "doc",
                                    "chunk_index": 1,
                                    "text": "further",
                                    "position": 1
                                }
                            }
                        ]
                    }
                }));
            })
            .await;

        let hits = index
            .search(&[1.0, 0.0], 2, Some("doc"))
            .await
            .expect("search");

        query.assert_async().await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "doc_chunk_0");
        assert!((hits[0].similarity - 1.0).abs() < f32::EPSILON);
        assert!((hits[1].similarity - 0.5).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn similarity_matches_flat_backend_for_same_geometry() {
        let server = MockServer::start_async().await;
        let index = connect(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/chunks/points/query");
                then.status(200).json_body(json!({
                    "result": {
                        "points": [{
                            "id": 0,
                            "score": 0.6,
                            "payload": {
                                "chunk_id": "doc_chunk_0",
                                "document_id": "doc",
                                "chunk_index": 0,
                                "text": "nearby"
                            }
                        }]
                    }
                }));
            })
            .await;
        let dir = tempfile::TempDir::new().expect("tempdir");
        let flat = super::super::FlatIndex::open(dir.path().join("index"), 2)
            .await
            .expect("open flat");
        flat.insert(
            "doc",
            vec![Chunk::new("doc", "doc_chunk_0", 0_u64, "nearby", 1)],
            vec![vec![0.6, 0.0]],
        )
        .await
        .expect("insert");

        let remote = index.search(&[0.0, 0.0], 1, Some("doc")).await.expect("search");
        let local = flat.search(&[0.0, 0.0], 1, Some("doc")).await.expect("search");

        assert!((remote[0].similarity - local[0].similarity).abs() < 1e-5);
        assert!((remote[0].similarity - 1.0 / 1.36).abs() < 1e-5);
        assert_eq!(remote[0].raw_distance, Some(0.6));
    }

    #[tokio::test]
    async fn search_rejects_wrong_query_width() {
        let server = MockServer::start_async().await;
        let index = connect(&server).await;
        let error = index.search(&[1.0, 0.0, 0.0], 3, None).await.unwrap_err();
        assert!(matches!(
            error,
            IndexError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn chunks_for_document_are_sorted_by_index() {
        let server = MockServer::start_async().await;
        let index = connect(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/collections/chunks/points/scroll");
                then.status(200).json_body(json!({
                    "result": {
                        "points": [
                            { "id": 1, "payload": { "chunk_id": "d_chunk_1", "document_id": "d", "chunk_index": 1, "text": "b" } },
                            { "id": 0, "payload": { "chunk_id": "d_chunk_0", "document_id": "d", "chunk_index": 0, "text": "a" } }
                        ],
                        "next_page_offset": null
                    }
                }));
            })
            .await;

        let chunks = index.chunks_for_document("d").await.expect("chunks");
        let texts: Vec<_> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }
}
