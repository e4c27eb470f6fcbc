pub mod data_loader;
pub mod embedding_engine;
pub mod embedding_store;
mod persist;
pub mod vector_index;

pub use data_loader::load_food_records;
pub use embedding_engine::{Content, EmbeddingEngine, Encoder};
pub use embedding_store::{EmbeddingRecord, EmbeddingStore};
pub use vector_index::{normalize, Neighbor, NeighborSearch, VectorIndex};
