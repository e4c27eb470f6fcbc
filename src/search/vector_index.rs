//! Exact cosine-similarity index over unit-normalized vectors.
#![forbid(unsafe_code)]

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

use super::embedding_store::{EmbeddingRecord, EmbeddingStore};
use super::persist::{read_file, write_atomically};
use crate::error::{Result, RetrievalError};

type Float = f32;

const MAGIC: [u8; 4] = *b"FIDX";
const FORMAT_VERSION: u32 = 1;

/// Added to the norm before dividing so a zero vector stays zero.
pub const NORM_EPSILON: Float = 1e-12;

/// One search hit: the stored identifier and its cosine similarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: i64,
    pub score: Float,
}

/// Nearest-neighbor lookup over a fixed set of vectors.
///
/// `VectorIndex` is the exact implementation; an approximate structure can
/// stand in as long as it honors the same ordering contract: descending
/// score, ties by ascending id, at most `min(k, len())` hits.
pub trait NeighborSearch: Send + Sync {
    fn dimension(&self) -> usize;
    fn len(&self) -> usize;
    fn search(&self, query: &[Float], k: usize) -> Result<Vec<Neighbor>>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Serialize)]
struct IndexFileRef<'a> {
    magic: [u8; 4],
    version: u32,
    dimension: u32,
    ids: &'a [i64],
    matrix: &'a [Float],
}

#[derive(Deserialize)]
struct IndexFile {
    magic: [u8; 4],
    version: u32,
    dimension: u32,
    ids: Vec<i64>,
    matrix: Vec<Float>,
}

/// Dense row-major matrix of normalized vectors with a row -> id map.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    ids: Vec<i64>,
    matrix: Vec<Float>,
}

#[derive(PartialEq)]
struct ScoredRow {
    score: Float,
    id: i64,
}

impl Eq for ScoredRow {}

impl PartialOrd for ScoredRow {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredRow {
    fn cmp(&self, other: &Self) -> Ordering {
        // Weaker candidates compare as greater, so the max-heap pops them first
        // and `into_sorted_vec` yields the strongest hit at index 0.
        compare_scores(other.score, self.score).then_with(|| self.id.cmp(&other.id))
    }
}

/// Orders scores numerically with NaN below every number.
fn compare_scores(a: Float, b: Float) -> Ordering {
    a.partial_cmp(&b).unwrap_or_else(|| match (a.is_nan(), b.is_nan()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => Ordering::Equal,
    })
}

impl VectorIndex {
    /// Builds an index from `records`, normalizing every vector.
    pub fn build(records: &[EmbeddingRecord]) -> Result<Self> {
        let first = records.first().ok_or(RetrievalError::EmptyInput)?;
        let dimension = first.vector.len();
        if dimension == 0 {
            return Err(RetrievalError::InvalidArgument(format!(
                "embedding for id {} is empty",
                first.id
            )));
        }

        let mut seen = HashSet::with_capacity(records.len());
        for record in records {
            if record.vector.len() != dimension {
                return Err(RetrievalError::DimensionMismatch {
                    expected: dimension,
                    actual: record.vector.len(),
                });
            }
            if record.vector.iter().any(|v| !v.is_finite()) {
                return Err(RetrievalError::InvalidArgument(format!(
                    "embedding for id {} contains NaN or infinity",
                    record.id
                )));
            }
            if !seen.insert(record.id) {
                return Err(RetrievalError::InvalidArgument(format!(
                    "duplicate identifier {}",
                    record.id
                )));
            }
        }

        let mut matrix = Vec::with_capacity(records.len() * dimension);
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            matrix.extend(normalize(&record.vector));
            ids.push(record.id);
        }

        info!(count = ids.len(), dimension, "Vector index built");
        Ok(Self { dimension, ids, matrix })
    }

    /// Reads every record from `store` and builds a fresh index.
    pub fn from_store(store: &EmbeddingStore) -> Result<Self> {
        let records = store.read_all()?;
        Self::build(&records)
    }

    /// Identifiers in row order.
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let dimension = u32::try_from(self.dimension).map_err(|_| {
            RetrievalError::InvalidArgument(format!("dimension {} is too large", self.dimension))
        })?;
        let file = IndexFileRef {
            magic: MAGIC,
            version: FORMAT_VERSION,
            dimension,
            ids: &self.ids,
            matrix: &self.matrix,
        };
        let bytes = bincode::serialize(&file)
            .map_err(|e| RetrievalError::CorruptIndex(format!("failed to encode index: {}", e)))?;
        write_atomically(path, &bytes)?;
        info!(path = %path.display(), count = self.ids.len(), "Vector index saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = read_file(path)?;
        let file: IndexFile = bincode::deserialize(&bytes)
            .map_err(|e| RetrievalError::CorruptIndex(format!("undecodable index file: {}", e)))?;

        if file.magic != MAGIC {
            return Err(RetrievalError::CorruptIndex("bad magic bytes".to_string()));
        }
        if file.version != FORMAT_VERSION {
            return Err(RetrievalError::CorruptIndex(format!(
                "unsupported format version {}",
                file.version
            )));
        }
        if file.dimension == 0 || file.ids.is_empty() {
            return Err(RetrievalError::CorruptIndex(format!(
                "index records {} vectors of dimension {}",
                file.ids.len(),
                file.dimension
            )));
        }

        let dimension = file.dimension as usize;
        let expected_len = file.ids.len() * dimension;
        if file.matrix.len() != expected_len {
            return Err(RetrievalError::CorruptIndex(format!(
                "Matrix size mismatch: expected {}, got {}",
                expected_len,
                file.matrix.len()
            )));
        }

        if file.matrix.iter().any(|v| !v.is_finite()) {
            return Err(RetrievalError::CorruptIndex(
                "matrix contains NaN or infinity".to_string(),
            ));
        }
        let mut seen = HashSet::with_capacity(file.ids.len());
        if let Some(dup) = file.ids.iter().find(|&&id| !seen.insert(id)) {
            return Err(RetrievalError::CorruptIndex(format!("duplicate identifier {}", dup)));
        }

        debug!(path = %path.display(), count = file.ids.len(), dimension, "Vector index loaded");
        Ok(Self {
            dimension,
            ids: file.ids,
            matrix: file.matrix,
        })
    }

    /// Loads the index at `index_path`, rebuilding it from `store` when the
    /// file is missing or unreadable. A rebuilt index is saved back to
    /// `index_path` before it is returned.
    pub fn load_or_rebuild(index_path: &Path, store: &EmbeddingStore) -> Result<Self> {
        let load_err = match Self::load(index_path) {
            Ok(index) => return Ok(index),
            Err(e) => e,
        };
        warn!(path = %index_path.display(), error = %load_err, "Index load failed, rebuilding from embedding store");

        let records = match store.read_all() {
            Ok(records) => records,
            Err(store_err) => {
                warn!(path = %store.path().display(), error = %store_err, "Embedding store unavailable for rebuild");
                return Err(load_err);
            }
        };
        let index = Self::build(&records)?;
        index.save(index_path)?;
        Ok(index)
    }
}

impl NeighborSearch for VectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn search(&self, query: &[Float], k: usize) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Err(RetrievalError::InvalidArgument("k must be at least 1".to_string()));
        }
        if query.is_empty() {
            return Err(RetrievalError::InvalidArgument("query vector is empty".to_string()));
        }
        if query.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let query_norm = normalize(query);
        let top_k = k.min(self.ids.len());

        let scores: Vec<Float> = self
            .matrix
            .par_chunks_exact(self.dimension)
            .map(|row| dot_product(row, &query_norm))
            .collect();

        let mut heap = BinaryHeap::with_capacity(top_k + 1);
        for (&id, &score) in self.ids.iter().zip(scores.iter()) {
            heap.push(ScoredRow { score, id });
            if heap.len() > top_k {
                heap.pop();
            }
        }

        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|row| Neighbor { id: row.id, score: row.score })
            .collect())
    }
}

#[inline]
fn dot_product(vec1: &[Float], vec2: &[Float]) -> Float {
    vec1.iter().zip(vec2.iter()).map(|(a, b)| a * b).sum()
}

/// Scales `vector` to unit length; a zero vector comes back as zeros.
///
/// The norm is accumulated in `f64` so large finite components cannot
/// overflow it to infinity.
pub fn normalize(vector: &[Float]) -> Vec<Float> {
    let norm = vector.iter().map(|&x| f64::from(x).powi(2)).sum::<f64>().sqrt();
    let denom = norm + f64::from(NORM_EPSILON);
    vector.iter().map(|&x| (f64::from(x) / denom) as Float).collect()
}
