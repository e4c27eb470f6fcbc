use model2vec_rs::model::StaticModel;
use tracing::info;

use crate::error::{Result, RetrievalError};

pub const DEFAULT_MODEL_ID: &str = "minishlab/potion-base-32M";

/// Raw content handed to an encoder.
#[derive(Debug, Clone, Copy)]
pub enum Content<'a> {
    Text(&'a str),
    Image(&'a [u8]),
}

/// Maps content to a fixed-length vector. Implementations must be pure from
/// the caller's point of view and always return `dimension()` floats.
pub trait Encoder: Send + Sync {
    fn dimension(&self) -> usize;

    fn encode(&self, content: Content<'_>) -> Result<Vec<f32>>;

    /// Encodes a batch of texts, one vector per input in input order.
    fn encode_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.encode(Content::Text(t))).collect()
    }
}

/// Text encoder backed by a model2vec static embedding model.
pub struct EmbeddingEngine {
    model: StaticModel,
    dimension: usize,
}

impl EmbeddingEngine {
    pub fn new(model_id: &str) -> Result<Self> {
        let model = StaticModel::from_pretrained(model_id, None, None, None)
            .map_err(|e| RetrievalError::Encoding(format!("failed to load model '{}': {}", model_id, e)))?;

        // The model does not expose its output width, so measure it once.
        let dimension = model
            .encode(&["dimension check".to_string()])
            .into_iter()
            .next()
            .map(|v| v.len())
            .filter(|&d| d > 0)
            .ok_or_else(|| {
                RetrievalError::Encoding(format!("model '{}' produced no embedding for a sample text", model_id))
            })?;

        info!(model_id, dimension, "Embedding model loaded");
        Ok(Self { model, dimension })
    }
}

impl Encoder for EmbeddingEngine {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, content: Content<'_>) -> Result<Vec<f32>> {
        match content {
            Content::Text(text) => self
                .model
                .encode(&[text.to_string()])
                .into_iter()
                .next()
                .ok_or_else(|| {
                    RetrievalError::Encoding(format!("Failed to generate embedding for text: {}", text))
                }),
            Content::Image(bytes) => Err(RetrievalError::Encoding(format!(
                "static text model cannot encode image content ({} bytes)",
                bytes.len()
            ))),
        }
    }

    fn encode_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let embeddings = self.model.encode(texts);
        if embeddings.len() != texts.len() {
            return Err(RetrievalError::Encoding(format!(
                "model returned {} embeddings for {} texts",
                embeddings.len(),
                texts.len()
            )));
        }
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LengthEncoder;

    impl Encoder for LengthEncoder {
        fn dimension(&self) -> usize {
            2
        }

        fn encode(&self, content: Content<'_>) -> Result<Vec<f32>> {
            match content {
                Content::Text(t) => Ok(vec![t.len() as f32, 1.0]),
                Content::Image(_) => Err(RetrievalError::Encoding("no images".into())),
            }
        }
    }

    #[test]
    fn test_default_batch_encoding_preserves_order() -> Result<()> {
        let texts = vec!["a".to_string(), "abc".to_string(), "ab".to_string()];
        let vectors = LengthEncoder.encode_texts(&texts)?;
        assert_eq!(vectors, vec![vec![1.0, 1.0], vec![3.0, 1.0], vec![2.0, 1.0]]);
        Ok(())
    }

    #[test]
    #[ignore] // This test downloads a model and might be slow/network-dependent
    fn test_embedding_engine_init_and_embed() -> Result<()> {
        let engine = EmbeddingEngine::new(DEFAULT_MODEL_ID)?;
        let dim = engine.dimension();
        assert!(dim > 0);

        let sentences = vec!["Apple Fruits".to_string(), "Carrot Vegetables".to_string()];
        let embeddings = engine.encode_texts(&sentences)?;
        assert_eq!(embeddings.len(), 2);
        assert!(embeddings.iter().all(|e| e.len() == dim));

        let single = engine.encode(Content::Text("grilled chicken"))?;
        assert_eq!(single.len(), dim);

        let image = engine.encode(Content::Image(&[0xFF, 0xD8, 0xFF]));
        assert!(matches!(image, Err(RetrievalError::Encoding(_))));
        Ok(())
    }
}
