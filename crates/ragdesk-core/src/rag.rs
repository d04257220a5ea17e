//! Retrieval and answering: search the store, stuff the hits into a prompt, ask the model.

use std::future::Future;
use std::path::Path;

use tracing::{debug, info};

use crate::documents::{load_documents, Document, LoadError};
use crate::embedding::{Embedder, EmbeddingManager};
use crate::store::{StoreError, VectorStore};

/// Returned instead of calling the model when retrieval finds no text.
pub const NO_RESULTS: &str = "No relevant documents found.";

/// A language model that answers a single prompt with text.
pub trait LanguageModel: Send + Sync {
    fn complete(&self, prompt: &str) -> impl Future<Output = Result<String, LlmError>> + Send;
}

/// How [`RagSearch::ensure_built`] got the store ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// Both files were present and loaded.
    Loaded,
    /// Files were missing; the store was rebuilt from documents.
    Built { chunks: usize },
}

pub struct RagSearch<E, L> {
    store: VectorStore,
    embeddings: EmbeddingManager<E>,
    llm: L,
}

impl<E: Embedder, L: LanguageModel> RagSearch<E, L> {
    /// Does no I/O; call [`ensure_built`](Self::ensure_built) or load the store first.
    pub fn new(store: VectorStore, embeddings: EmbeddingManager<E>, llm: L) -> Self {
        Self {
            store,
            embeddings,
            llm,
        }
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut VectorStore {
        &mut self.store
    }

    pub fn embeddings(&self) -> &EmbeddingManager<E> {
        &self.embeddings
    }

    /// Loads the persisted store, or builds it from `documents_dir` when either file
    /// is missing.
    pub async fn ensure_built(&mut self, documents_dir: &Path) -> Result<EnsureOutcome, RagError> {
        if self.store.files_exist() {
            self.store.load()?;
            return Ok(EnsureOutcome::Loaded);
        }
        info!(
            "no index in {}; building from {}",
            self.store.persist_dir().display(),
            documents_dir.display()
        );
        let documents = load_documents(documents_dir)?;
        let chunks = self.rebuild(&documents).await?;
        Ok(EnsureOutcome::Built { chunks })
    }

    /// Replaces the store's contents with `documents` and saves it.
    pub async fn rebuild(&mut self, documents: &[Document]) -> Result<usize, RagError> {
        Ok(self.store.build_from_documents(documents, &self.embeddings).await?)
    }

    /// Retrieves the `top_k` closest chunks for `query` and asks the model to answer
    /// from them. Returns [`NO_RESULTS`] without calling the model when nothing matched.
    pub async fn search_and_summarize(&self, query: &str, top_k: usize) -> Result<String, RagError> {
        let results = self.store.query(query, top_k, &self.embeddings).await?;
        let texts: Vec<&str> = results
            .iter()
            .map(|r| r.metadata.text.as_str())
            .filter(|t| !t.is_empty())
            .collect();
        let context = texts.join("\n\n");
        if context.is_empty() {
            return Ok(NO_RESULTS.to_string());
        }
        debug!("answering with {} retrieved chunk(s)", texts.len());
        let prompt = build_prompt(query, &context);
        Ok(self.llm.complete(&prompt).await?)
    }
}

/// The fixed answer prompt.
pub fn build_prompt(query: &str, context: &str) -> String {
    format!(
        "You are a helpful customer support agent.\n\
         Your goal is to answer the user's question using the provided context and nothing else:\n\
         '{query}'\n\n\
         Context:\n\
         {context}\n\n\
         Answer:"
    )
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("language model request failed: {0}")]
    Request(String),
}

/// Embedding failures arrive as `Store(StoreError::Embedding(_))`; the store's
/// `query` makes that call.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to load documents: {0}")]
    Load(#[from] LoadError),
    #[error(transparent)]
    Llm(#[from] LlmError),
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::chunks::ChunkConfig;
    use crate::embedding::EmbeddingError;
    use crate::store::ChunkMetadata;

    /// Two-dimensional embedding: `[len, count of 'a']`.
    struct ShapeEmbedder;

    impl Embedder for ShapeEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, t.matches('a').count() as f32])
                .collect())
        }
    }

    #[derive(Default)]
    struct RecordingLlm {
        prompts: Mutex<Vec<String>>,
    }

    impl LanguageModel for RecordingLlm {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok("  raw answer  ".to_string())
        }
    }

    fn rag(dir: &Path) -> RagSearch<ShapeEmbedder, RecordingLlm> {
        let store = VectorStore::new(dir).unwrap();
        let embeddings = EmbeddingManager::new(ShapeEmbedder, ChunkConfig::default()).unwrap();
        RagSearch::new(store, embeddings, RecordingLlm::default())
    }

    fn meta(text: &str) -> ChunkMetadata {
        ChunkMetadata {
            text: text.to_string(),
            source: None,
        }
    }

    #[test]
    fn prompt_contains_query_and_context() {
        let prompt = build_prompt("Where is the pool?", "The pool is on floor 3.");
        assert!(prompt.starts_with("You are a helpful customer support agent."));
        assert!(prompt.contains("'Where is the pool?'\n\nContext:\nThe pool is on floor 3.\n\nAnswer:"));
    }

    #[tokio::test]
    async fn empty_store_answers_with_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let mut rag = rag(dir.path());
        assert_eq!(rag.rebuild(&[]).await.unwrap(), 0);
        assert!(rag.store().is_loaded());
        assert!(rag.store().files_exist());

        let answer = rag.search_and_summarize("What is the name of the hotel?", 3).await.unwrap();
        assert_eq!(answer, NO_RESULTS);
        assert!(rag.llm.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn context_is_joined_in_rank_order_and_answer_is_raw() {
        let dir = tempfile::tempdir().unwrap();
        let mut rag = rag(dir.path());
        rag.store_mut()
            .add(
                vec![vec![3.0, 3.0], vec![40.0, 0.0], vec![4.0, 2.0]],
                Some(vec![meta("aaa"), meta("far away"), meta("abca")]),
            )
            .unwrap();

        let answer = rag.search_and_summarize("aaa", 2).await.unwrap();
        assert_eq!(answer, "  raw answer  ");
        let prompts = rag.llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Context:\naaa\n\nabca\n\nAnswer:"));
    }

    #[tokio::test]
    async fn blank_hits_fall_back_without_calling_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut rag = rag(dir.path());
        rag.store_mut().add(vec![vec![1.0, 0.0]], None).unwrap();
        let answer = rag.search_and_summarize("x", 3).await.unwrap();
        assert_eq!(answer, NO_RESULTS);
        assert!(rag.llm.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unloaded_store_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let rag = rag(dir.path());
        let err = rag.search_and_summarize("anything", 5).await.unwrap_err();
        assert!(matches!(err, RagError::Store(StoreError::NotLoaded)));
    }

    struct DownEmbedder;

    impl Embedder for DownEmbedder {
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn embedding_failure_surfaces_through_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::new(dir.path()).unwrap();
        store.add(vec![vec![1.0, 0.0]], Some(vec![meta("a")])).unwrap();
        let embeddings = EmbeddingManager::new(DownEmbedder, ChunkConfig::default()).unwrap();
        let rag = RagSearch::new(store, embeddings, RecordingLlm::default());

        let err = rag.search_and_summarize("anything", 1).await.unwrap_err();
        assert!(matches!(
            err,
            RagError::Store(StoreError::Embedding(EmbeddingError::Unavailable(_)))
        ));
        assert!(rag.llm.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ensure_built_builds_then_loads() {
        let persist = tempfile::tempdir().unwrap();
        let docs = tempfile::tempdir().unwrap();
        std::fs::write(docs.path().join("hotel.txt"), "The hotel is called Grand Azure.").unwrap();

        let mut first = rag(persist.path());
        let outcome = first.ensure_built(docs.path()).await.unwrap();
        assert_eq!(outcome, EnsureOutcome::Built { chunks: 1 });
        assert!(first.store().files_exist());

        let mut second = rag(persist.path());
        assert_eq!(second.ensure_built(docs.path()).await.unwrap(), EnsureOutcome::Loaded);
        assert_eq!(second.store().len(), 1);
    }

    #[tokio::test]
    async fn ensure_built_reports_missing_documents() {
        let persist = tempfile::tempdir().unwrap();
        let mut rag = rag(persist.path());
        let err = rag.ensure_built(&persist.path().join("missing")).await.unwrap_err();
        assert!(matches!(err, RagError::Load(LoadError::NotADirectory(_))));
    }
}
