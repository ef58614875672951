//! Single-process flat index persisted as a vector file plus a JSON metadata sidecar.

use super::{
    Chunk, IndexError, InsertSummary, OVERFETCH_FACTOR, SimilarityResult, VectorIndex,
    similarity_from_distance, sort_chunks, stamp_entries, validate_batch,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Brute-force squared-L2 index over every stored vector.
///
/// Writers hold the state lock across persistence and roll the in-memory tables back when
/// either file cannot be replaced, so readers never see a half-applied insert.
pub struct FlatIndex {
    vectors_path: PathBuf,
    metadata_path: PathBuf,
    dimension: usize,
    state: RwLock<FlatState>,
}

#[derive(Default)]
struct FlatState {
    vectors: Vec<Vec<f32>>,
    chunks: Vec<Chunk>,
}

#[derive(Deserialize)]
struct VectorFile {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct VectorFileRef<'a> {
    dimension: usize,
    vectors: &'a [Vec<f32>],
}

impl FlatIndex {
    /// Open the index at `path`, loading any persisted state.
    ///
    /// Metadata is kept in `<path>_metadata.json`, keyed by position.
    pub async fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self, IndexError> {
        if dimension == 0 {
            return Err(IndexError::InvalidDimension);
        }
        let vectors_path = path.as_ref().to_path_buf();
        let metadata_path = sidecar_path(&vectors_path);

        let mut vectors = match read_optional(&vectors_path).await? {
            Some(bytes) => {
                let file: VectorFile = serde_json::from_slice(&bytes)?;
                if file.dimension != dimension {
                    return Err(IndexError::DimensionMismatch {
                        expected: dimension,
                        actual: file.dimension,
                    });
                }
                if let Some(bad) = file.vectors.iter().position(|v| v.len() != dimension) {
                    return Err(IndexError::Corrupt(format!(
                        "vector at position {bad} has {} dimensions",
                        file.vectors[bad].len()
                    )));
                }
                file.vectors
            }
            None => Vec::new(),
        };

        let mut metadata: BTreeMap<u64, Chunk> = match read_optional(&metadata_path).await? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => BTreeMap::new(),
        };

        let contiguous = metadata
            .keys()
            .enumerate()
            .take_while(|(expected, position)| *expected as u64 == **position)
            .count();
        let usable = contiguous.min(vectors.len());
        if usable != vectors.len() || usable != metadata.len() {
            tracing::warn!(
                path = %vectors_path.display(),
                vectors = vectors.len(),
                metadata = metadata.len(),
                kept = usable,
                "Flat index files disagree; keeping common prefix"
            );
            vectors.truncate(usable);
            metadata.retain(|position, _| *position < usable as u64);
        }

        let chunks: Vec<Chunk> = metadata.into_values().collect();
        tracing::debug!(
            path = %vectors_path.display(),
            entries = chunks.len(),
            dimension,
            "Opened flat index"
        );

        Ok(Self {
            vectors_path,
            metadata_path,
            dimension,
            state: RwLock::new(FlatState { vectors, chunks }),
        })
    }

    /// Number of stored entries across all documents.
    pub async fn len(&self) -> usize {
        self.state.read().await.chunks.len()
    }

    /// Whether the index holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn persist(&self, state: &FlatState) -> Result<(), IndexError> {
        if let Some(parent) = self.vectors_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| IndexError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let vectors = serde_json::to_vec(&VectorFileRef {
            dimension: self.dimension,
            vectors: &state.vectors,
        })?;
        let metadata: BTreeMap<u64, &Chunk> = state
            .chunks
            .iter()
            .enumerate()
            .map(|(position, chunk)| (position as u64, chunk))
            .collect();
        let metadata = serde_json::to_vec_pretty(&metadata)?;

        let vectors_tmp = tmp_path(&self.vectors_path);
        let metadata_tmp = tmp_path(&self.metadata_path);
        write_file(&vectors_tmp, &vectors).await?;
        write_file(&metadata_tmp, &metadata).await?;
        rename_file(&vectors_tmp, &self.vectors_path).await?;
        rename_file(&metadata_tmp, &self.metadata_path).await?;
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for FlatIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn backend(&self) -> &'static str {
        "flat"
    }

    async fn insert(
        &self,
        document_id: &str,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<InsertSummary, IndexError> {
        validate_batch(self.dimension, &chunks, &vectors)?;

        let mut state = self.state.write().await;
        let first = state.chunks.len();
        if chunks.is_empty() {
            return Ok(InsertSummary {
                inserted: 0,
                first_position: first as u64,
            });
        }

        let inserted = chunks.len();
        for entry in stamp_entries(document_id, first as u64, chunks, vectors) {
            state.chunks.push(entry.chunk);
            state.vectors.push(entry.vector);
        }

        if let Err(error) = self.persist(&state).await {
            state.chunks.truncate(first);
            state.vectors.truncate(first);
            tracing::error!(document_id, error = %error, "Failed to persist flat index; insert rolled back");
            return Err(error);
        }

        tracing::info!(
            document_id,
            inserted,
            first_position = first,
            total = state.chunks.len(),
            "Chunks stored in flat index"
        );
        Ok(InsertSummary {
            inserted,
            first_position: first as u64,
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

        let state = self.state.read().await;
        let mut scored: Vec<(f32, usize)> = state
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| (squared_l2(query, vector), position))
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let window = k.saturating_mul(OVERFETCH_FACTOR);
        let results: Vec<SimilarityResult> = scored
            .into_iter()
            .take(window)
            .filter(|(_, position)| {
                document_id.is_none_or(|id| state.chunks[*position].document_id == id)
            })
            .take(k)
            .map(|(distance, position)| {
                let chunk = &state.chunks[position];
                SimilarityResult {
                    chunk_id: chunk.chunk_id.clone(),
                    chunk_index: chunk.chunk_index.clone(),
                    text: chunk.text.clone(),
                    similarity: similarity_from_distance(distance),
                    raw_distance: Some(distance),
                }
            })
            .collect();

        tracing::debug!(
            document_id,
            k,
            window,
            hits = results.len(),
            "Flat index search"
        );
        Ok(results)
    }

    async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>, IndexError> {
        let state = self.state.read().await;
        let mut chunks: Vec<Chunk> = state
            .chunks
            .iter()
            .filter(|chunk| chunk.document_id == document_id)
            .cloned()
            .collect();
        sort_chunks(&mut chunks);
        Ok(chunks)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

fn sidecar_path(vectors_path: &Path) -> PathBuf {
    let mut name: OsString = vectors_path.as_os_str().to_owned();
    name.push("_metadata.json");
    PathBuf::from(name)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, IndexError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(IndexError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|source| IndexError::Io {
            path: path.to_path_buf(),
            source,
        })
}

async fn rename_file(from: &Path, to: &Path) -> Result<(), IndexError> {
    tokio::fs::rename(from, to)
        .await
        .map_err(|source| IndexError::Io {
            path: to.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn chunk(document_id: &str, index: u64, text: &str) -> Chunk {
        Chunk::new(
            document_id,
            format!("{document_id}_chunk_{index}"),
            index,
            text,
            1,
        )
    }

    async fn open_in(dir: &TempDir, dimension: usize) -> FlatIndex {
        FlatIndex::open(dir.path().join("index"), dimension)
            .await
            .expect("open flat index")
    }

    #[tokio::test]
    async fn nearest_neighbours_follow_distance_then_position() {
        let dir = TempDir::new().expect("tempdir");
        let index = open_in(&dir, 2).await;
        index
            .insert(
                "doc-1",
                vec![
                    chunk("doc-1", 0, "fire"),
                    chunk("doc-1", 1, "flood"),
                    chunk("doc-1", 2, "smoke"),
                ],
                vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.9, 0.1]],
            )
            .await
            .expect("insert");

        let hits = index
            .search(&[0.95, 0.05], 2, Some("doc-1"))
            .await
            .expect("search");
        let ids: Vec<_> = hits.iter().map(|hit| hit.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["doc-1_chunk_0", "doc-1_chunk_2"]);
        assert!(hits[0].similarity >= hits[1].similarity);
        for hit in &hits {
            assert!(hit.similarity > 0.0 && hit.similarity <= 1.0);
        }
    }

    #[tokio::test]
    async fn document_filter_restricts_results() {
        let dir = TempDir::new().expect("tempdir");
        let index = open_in(&dir, 2).await;
        index
            .insert("a", vec![chunk("a", 0, "a0")], vec![vec![1.0, 0.0]])
            .await
            .expect("insert a");
        index
            .insert(
                "b",
                vec![chunk("b", 0, "b0"), chunk("b", 1, "b1")],
                vec![vec![0.9, 0.0], vec![0.0, 1.0]],
            )
            .await
            .expect("insert b");

        let hits = index.search(&[1.0, 0.0], 5, Some("b")).await.expect("search");
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|hit| hit.chunk_id.starts_with("b_")));
        assert!(hits.windows(2).all(|pair| pair[0].similarity >= pair[1].similarity));

        let all = index.search(&[1.0, 0.0], 5, None).await.expect("search");
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn unknown_document_yields_empty_results() {
        let dir = TempDir::new().expect("tempdir");
        let index = open_in(&dir, 2).await;
        let hits = index.search(&[1.0, 0.0], 3, Some("missing")).await.expect("search");
        assert!(hits.is_empty());
        assert!(index.chunks_for_document("missing").await.expect("chunks").is_empty());
    }

    #[tokio::test]
    async fn sparse_document_can_be_starved_by_overfetch_window() {
        let dir = TempDir::new().expect("tempdir");
        let index = open_in(&dir, 2).await;
        index
            .insert("far", vec![chunk("far", 0, "far")], vec![vec![0.0, 1.0]])
            .await
            .expect("insert far");
        index
            .insert(
                "near",
                vec![chunk("near", 0, "n0"), chunk("near", 1, "n1")],
                vec![vec![1.0, 0.0], vec![0.99, 0.0]],
            )
            .await
            .expect("insert near");

        let hits = index.search(&[1.0, 0.0], 1, Some("far")).await.expect("search");
        assert!(hits.is_empty());
        let hits = index.search(&[1.0, 0.0], 2, Some("far")).await.expect("search");
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn dimension_mismatch_rejects_whole_batch() {
        let dir = TempDir::new().expect("tempdir");
        let index = open_in(&dir, 2).await;
        let error = index
            .insert(
                "doc",
                vec![chunk("doc", 0, "ok"), chunk("doc", 1, "bad")],
                vec![vec![1.0, 0.0], vec![1.0, 0.0, 0.0]],
            )
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            IndexError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
        assert!(index.is_empty().await);
        assert!(!dir.path().join("index").exists());
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = TempDir::new().expect("tempdir");
        {
            let index = open_in(&dir, 2).await;
            index
                .insert(
                    "doc",
                    vec![chunk("doc", 1, "second"), chunk("doc", 0, "first")],
                    vec![vec![0.0, 1.0], vec![1.0, 0.0]],
                )
                .await
                .expect("insert");
        }

        let reopened = open_in(&dir, 2).await;
        assert_eq!(reopened.len().await, 2);
        let chunks = reopened.chunks_for_document("doc").await.expect("chunks");
        let texts: Vec<_> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);

        let summary = reopened
            .insert("doc", vec![chunk("doc", 2, "third")], vec![vec![0.5, 0.5]])
            .await
            .expect("append");
        assert_eq!(summary.first_position, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_get_disjoint_positions() {
        const WRITERS: usize = 8;
        const PER_WRITER: usize = 5;
        let dir = TempDir::new().expect("tempdir");
        let index = Arc::new(open_in(&dir, 2).await);

        let mut handles = Vec::new();
        for writer in 0..WRITERS {
            let index = Arc::clone(&index);
            handles.push(tokio::spawn(async move {
                let document_id = format!("doc-{writer}");
                let chunks = (0..PER_WRITER)
                    .map(|i| chunk(&document_id, i as u64, &format!("{document_id} part {i}")))
                    .collect();
                let vectors = (0..PER_WRITER)
                    .map(|i| vec![writer as f32, i as f32])
                    .collect();
                index.insert(&document_id, chunks, vectors).await
            }));
        }
        let mut firsts = Vec::new();
        for handle in handles {
            let summary = handle.await.expect("join").expect("insert");
            assert_eq!(summary.inserted, PER_WRITER);
            firsts.push(summary.first_position);
        }
        firsts.sort_unstable();
        let expected: Vec<u64> = (0..WRITERS).map(|w| (w * PER_WRITER) as u64).collect();
        assert_eq!(firsts, expected);
        drop(index);

        let reopened = open_in(&dir, 2).await;
        assert_eq!(reopened.len().await, WRITERS * PER_WRITER);
        for writer in 0..WRITERS {
            let document_id = format!("doc-{writer}");
            let stored = reopened
                .chunks_for_document(&document_id)
                .await
                .expect("chunks");
            assert_eq!(stored.len(), PER_WRITER);
            for i in 0..PER_WRITER {
                let hits = reopened
                    .search(&[writer as f32, i as f32], 1, Some(&document_id))
                    .await
                    .expect("search");
                assert_eq!(hits[0].chunk_id, format!("{document_id}_chunk_{i}"));
                assert_eq!(hits[0].raw_distance, Some(0.0));
            }
        }
    }

    #[tokio::test]
    async fn reopen_with_other_dimension_fails() {
        let dir = TempDir::new().expect("tempdir");
        let index = open_in(&dir, 2).await;
        index
            .insert("doc", vec![chunk("doc", 0, "x")], vec![vec![1.0, 0.0]])
            .await
            .expect("insert");
        drop(index);

        let error = FlatIndex::open(dir.path().join("index"), 3)
            .await
            .err()
            .expect("dimension mismatch");
        assert!(matches!(error, IndexError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn reopen_trims_to_common_prefix() {
        let dir = TempDir::new().expect("tempdir");
        let index = open_in(&dir, 2).await;
        index
            .insert(
                "doc",
                vec![chunk("doc", 0, "a"), chunk("doc", 1, "b")],
                vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            )
            .await
            .expect("insert");
        drop(index);

        let vectors_path = dir.path().join("index");
        std::fs::write(
            &vectors_path,
            serde_json::json!({ "dimension": 2, "vectors": [[1.0, 0.0]] }).to_string(),
        )
        .expect("rewrite vectors");

        let reopened = open_in(&dir, 2).await;
        assert_eq!(reopened.len().await, 1);
    }
}
