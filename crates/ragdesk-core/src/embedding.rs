//! Chunking plus batch embedding: turns documents into vectors ready for the index.

use std::future::Future;

use tracing::{debug, info};

use crate::chunks::{chunk_documents, Chunk, ChunkConfig, ChunkError};
use crate::documents::Document;

pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Anything that can turn a batch of strings into equal-length vectors.
pub trait Embedder: Send + Sync {
    /// Embed `texts`, returning one vector per input in the same order.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, EmbeddingError>> + Send;
}

/// Splits documents into chunks and embeds them in batches.
#[derive(Debug, Clone)]
pub struct EmbeddingManager<E> {
    embedder: E,
    chunking: ChunkConfig,
    batch_size: usize,
}

impl<E: Embedder> EmbeddingManager<E> {
    pub fn new(embedder: E, chunking: ChunkConfig) -> Result<Self, ChunkError> {
        chunking.validate()?;
        Ok(Self {
            embedder,
            chunking,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Number of texts sent to the model per call. Zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    pub fn chunk_config(&self) -> &ChunkConfig {
        &self.chunking
    }

    pub fn chunk(&self, documents: &[Document]) -> Result<Vec<Chunk>, ChunkError> {
        let chunks = chunk_documents(documents, &self.chunking)?;
        info!("split {} document(s) into {} chunk(s)", documents.len(), chunks.len());
        Ok(chunks)
    }

    pub async fn embed(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        self.embed_texts(&texts).await
    }

    /// Embeds texts batch by batch. Output order matches input order and every
    /// vector has the same length.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        info!("generating embeddings for {} text(s)", texts.len());

        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.embedder.embed_batch(batch).await?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: batch.len(),
                    actual: vectors.len(),
                });
            }
            out.extend(vectors);
        }

        let dimension = out.first().map_or(0, Vec::len);
        if dimension == 0 || out.iter().any(|v| v.len() != dimension) {
            return Err(EmbeddingError::RaggedDimensions);
        }
        debug!("embeddings shape: {} x {}", out.len(), dimension);
        Ok(out)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_texts(&[text.to_string()]).await?;
        vectors.pop().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding model unavailable: {0}")]
    Unavailable(String),
    #[error("embedding model returned {actual} vector(s) for {expected} input(s)")]
    CountMismatch { expected: usize, actual: usize },
    #[error("embedding model returned empty or differently sized vectors")]
    RaggedDimensions,
}
