//! Retrieval-augmented question answering over a folder of documents.
//!
//! Documents are chunked, embedded and kept in a flat L2 [`VectorStore`] persisted to
//! two files. [`RagSearch`] retrieves the closest chunks for a question and asks a
//! language model to answer from them. Embeddings and answers come from Ollama by
//! default (see [`ollama`]); both sit behind small traits so other backends can plug in.

pub mod app_data;
pub mod chunks;
pub mod config;
pub mod documents;
pub mod embedding;
pub mod index;
pub mod ollama;
pub mod rag;
pub mod store;

pub use app_data::app_data_dir;
pub use chunks::{chunk_document, chunk_documents, Chunk, ChunkConfig, ChunkError};
pub use config::{default_config_path, load_config, save_config, Config, ConfigError};
pub use documents::{load_documents, Document, LoadError};
pub use embedding::{Embedder, EmbeddingError, EmbeddingManager};
pub use index::{FlatIndex, IndexError};
pub use ollama::{OllamaClient, OllamaError};
pub use rag::{build_prompt, EnsureOutcome, LanguageModel, LlmError, RagError, RagSearch, NO_RESULTS};
pub use store::{ChunkMetadata, SearchResult, StoreError, VectorStore};
