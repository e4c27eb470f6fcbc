//! On-disk store of `(id, vector)` pairs produced by the offline encode step.
//!
//! Layout, all little-endian:
//!
//! ```text
//! magic "FEMB" | version u32 | count u64 | dim u32 | ids [i64; count] | vectors [f32; count * dim]
//! ```

use std::path::{Path, PathBuf};

use bytemuck::cast_slice;
use tracing::{debug, info};

use super::persist::{read_file, write_atomically};
use crate::error::{Result, RetrievalError};

#[cfg(not(target_endian = "little"))]
compile_error!("the embedding store layout is written with native little-endian casts");

const MAGIC: &[u8; 4] = b"FEMB";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 8 + 4;

/// A single embedding keyed by its food identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub id: i64,
    pub vector: Vec<f32>,
}

impl EmbeddingRecord {
    pub fn new(id: i64, vector: Vec<f32>) -> Self {
        Self { id, vector }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    path: PathBuf,
}

impl EmbeddingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Replaces the store with `records`. Every vector must share one length.
    pub fn write(&self, records: &[EmbeddingRecord]) -> Result<()> {
        let dim = records.first().map_or(0, |r| r.vector.len());
        if let Some(first) = records.first().filter(|_| dim == 0) {
            return Err(RetrievalError::InvalidArgument(format!(
                "embedding for id {} is empty",
                first.id
            )));
        }
        if let Some(bad) = records.iter().find(|r| r.vector.len() != dim) {
            return Err(RetrievalError::DimensionMismatch {
                expected: dim,
                actual: bad.vector.len(),
            });
        }
        let dim_u32 = u32::try_from(dim).map_err(|_| {
            RetrievalError::InvalidArgument(format!("embedding dimension {} is too large", dim))
        })?;

        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        let matrix: Vec<f32> = records.iter().flat_map(|r| r.vector.iter().copied()).collect();

        let mut bytes = Vec::with_capacity(HEADER_LEN + ids.len() * 8 + matrix.len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(records.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&dim_u32.to_le_bytes());
        bytes.extend_from_slice(cast_slice(ids.as_slice()));
        bytes.extend_from_slice(cast_slice(matrix.as_slice()));

        write_atomically(&self.path, &bytes)?;
        info!(path = %self.path.display(), count = records.len(), dimension = dim, "Embedding store written");
        Ok(())
    }

    pub fn read_all(&self) -> Result<Vec<EmbeddingRecord>> {
        let bytes = read_file(&self.path)?;
        let records = decode(&bytes)?;
        debug!(path = %self.path.display(), count = records.len(), "Embedding store read");
        Ok(records)
    }
}

fn decode(bytes: &[u8]) -> Result<Vec<EmbeddingRecord>> {
    if bytes.len() < HEADER_LEN {
        return Err(RetrievalError::CorruptStore(format!(
            "file is {} bytes, shorter than the {}-byte header",
            bytes.len(),
            HEADER_LEN
        )));
    }
    if &bytes[0..4] != MAGIC {
        return Err(RetrievalError::CorruptStore("bad magic bytes".to_string()));
    }
    let version = u32::from_le_bytes(le_array(&bytes[4..8]));
    if version != FORMAT_VERSION {
        return Err(RetrievalError::CorruptStore(format!(
            "unsupported format version {}",
            version
        )));
    }
    let count = u64::from_le_bytes(le_array(&bytes[8..16]));
    let dim = u32::from_le_bytes(le_array(&bytes[16..20])) as usize;

    if count > 0 && dim == 0 {
        return Err(RetrievalError::CorruptStore(format!(
            "header records {} vectors of dimension 0",
            count
        )));
    }

    let expected_len = usize::try_from(count)
        .ok()
        .and_then(|n| {
            let ids_len = n.checked_mul(8)?;
            let vec_len = n.checked_mul(dim)?.checked_mul(4)?;
            HEADER_LEN.checked_add(ids_len)?.checked_add(vec_len)
        })
        .ok_or_else(|| {
            RetrievalError::CorruptStore(format!("header size overflow: count={} dim={}", count, dim))
        })?;
    if bytes.len() != expected_len {
        return Err(RetrievalError::CorruptStore(format!(
            "header records {} vectors of dimension {} ({} bytes), file has {} bytes",
            count,
            dim,
            expected_len,
            bytes.len()
        )));
    }

    let count = count as usize;
    let ids_end = HEADER_LEN + count * 8;
    let ids = bytes[HEADER_LEN..ids_end]
        .chunks_exact(8)
        .map(|chunk| i64::from_le_bytes(le_array(chunk)));

    let mut vectors = bytes[ids_end..]
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(le_array(chunk)));

    Ok(ids
        .map(|id| EmbeddingRecord {
            id,
            vector: vectors.by_ref().take(dim).collect(),
        })
        .collect())
}

// Callers slice exactly N bytes, so the conversion cannot fail.
fn le_array<const N: usize>(chunk: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(chunk);
    out
}
