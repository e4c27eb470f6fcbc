//! Offline batch steps: CSV -> metadata table, CSV -> embedding store,
//! embedding store -> index file.

use std::path::Path;

use tracing::info;

use crate::error::{Result, RetrievalError};
use crate::metadata_store::SqliteMetadataStore;
use crate::search::{load_food_records, EmbeddingRecord, EmbeddingStore, Encoder, VectorIndex};

/// Replaces the metadata table with the contents of `csv_path`.
pub fn import_metadata(csv_path: &Path, metadata: &SqliteMetadataStore) -> Result<usize> {
    let foods = load_food_records(csv_path)?;
    metadata.replace_all(&foods)
}

/// Encodes every food in `csv_path` and replaces `store` with the result.
///
/// The store is only written once every row is encoded; a failed or
/// interrupted run leaves the previous store untouched.
pub fn embed_foods(
    csv_path: &Path,
    encoder: &dyn Encoder,
    store: &EmbeddingStore,
    batch_size: usize,
) -> Result<usize> {
    if batch_size == 0 {
        return Err(RetrievalError::InvalidArgument("batch size must be at least 1".to_string()));
    }
    let foods = load_food_records(csv_path)?;
    let dimension = encoder.dimension();
    let total = foods.len();

    let mut records = Vec::with_capacity(total);
    for batch in foods.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|f| f.embedding_text()).collect();
        let vectors = encoder.encode_texts(&texts)?;
        if vectors.len() != batch.len() {
            return Err(RetrievalError::Encoding(format!(
                "encoder returned {} vectors for {} texts",
                vectors.len(),
                batch.len()
            )));
        }
        for (food, vector) in batch.iter().zip(vectors) {
            if vector.len() != dimension {
                return Err(RetrievalError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            records.push(EmbeddingRecord::new(food.id, vector));
        }
        info!(processed = records.len(), total, "Encoding food rows");
    }

    store.write(&records)?;
    Ok(records.len())
}

/// Builds an index from `store` and saves it to `index_path`.
pub fn build_index(store: &EmbeddingStore, index_path: &Path) -> Result<VectorIndex> {
    let index = VectorIndex::from_store(store)?;
    index.save(index_path)?;
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{Content, NeighborSearch};
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    /// Deterministic toy encoder: letter histogram over a..d.
    struct LetterEncoder;

    impl Encoder for LetterEncoder {
        fn dimension(&self) -> usize {
            4
        }

        fn encode(&self, content: Content<'_>) -> Result<Vec<f32>> {
            let Content::Text(text) = content else {
                return Err(RetrievalError::Encoding("text only".into()));
            };
            let mut v = vec![0.0; 4];
            for c in text.to_lowercase().chars() {
                if let Some(i) = "abcd".find(c) {
                    v[i] += 1.0;
                }
            }
            Ok(v)
        }
    }

    fn food_csv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "ID,name,Food Group,Calories,Fat (g),Protein (g),Carbohydrate (g)").unwrap();
        writeln!(file, "10,Apple,Fruits,52,0.2,0.3,13.8").unwrap();
        writeln!(file, "20,Banana,Fruits,89,0.3,1.1,22.8").unwrap();
        writeln!(file, "30,Carrot,Vegetables,41,0.2,0.9,9.6").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_embed_then_build_index() -> Result<()> {
        let csv = food_csv();
        let dir = tempdir().unwrap();
        let store = EmbeddingStore::new(dir.path().join("embeddings.femb"));
        let index_path = dir.path().join("food_index.fidx");

        assert_eq!(embed_foods(csv.path(), &LetterEncoder, &store, 2)?, 3);
        let records = store.read_all()?;
        assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![10, 20, 30]);
        // "Banana Fruits" -> a:3 b:1
        assert_eq!(records[1].vector, vec![3.0, 1.0, 0.0, 0.0]);

        let index = build_index(&store, &index_path)?;
        assert_eq!(index.len(), 3);
        assert!(index_path.exists());
        Ok(())
    }

    #[test]
    fn test_import_metadata_replaces_table() -> Result<()> {
        let csv = food_csv();
        let metadata = SqliteMetadataStore::open_in_memory()?;
        assert_eq!(import_metadata(csv.path(), &metadata)?, 3);
        assert_eq!(metadata.count()?, 3);
        Ok(())
    }

    #[test]
    fn test_failed_encoding_keeps_previous_store() -> Result<()> {
        struct Offline;
        impl Encoder for Offline {
            fn dimension(&self) -> usize {
                4
            }
            fn encode(&self, _content: Content<'_>) -> Result<Vec<f32>> {
                Err(RetrievalError::Encoding("offline".into()))
            }
        }

        let csv = food_csv();
        let dir = tempdir().unwrap();
        let store = EmbeddingStore::new(dir.path().join("embeddings.femb"));
        let previous = vec![EmbeddingRecord::new(1, vec![1.0, 0.0, 0.0, 0.0])];
        store.write(&previous)?;

        assert!(matches!(
            embed_foods(csv.path(), &Offline, &store, 8),
            Err(RetrievalError::Encoding(_))
        ));
        assert_eq!(store.read_all()?, previous);
        Ok(())
    }
}
