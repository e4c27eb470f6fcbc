pub mod api_connection;
pub mod cli;
pub mod config;
pub mod error;
pub mod metadata_store;
pub mod pipeline;
pub mod prompt;
pub mod retrieval_service;
pub mod search;

pub use error::{Result, RetrievalError};
