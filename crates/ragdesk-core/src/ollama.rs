//! Ollama client for embeddings and chat completion. Wraps ollama-rs with a simple API.

use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::Ollama;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::embedding::{Embedder, EmbeddingError};
use crate::rag::{LanguageModel, LlmError};

pub const DEFAULT_EMBED_MODEL: &str = "all-minilm";
pub const DEFAULT_CHAT_MODEL: &str = "llama2";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Thin wrapper around Ollama for embedding and completion.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    inner: Ollama,
    embed_model: String,
    chat_model: String,
}

impl OllamaClient {
    /// Create from URL string, e.g. `http://localhost:11434`.
    pub fn from_url(url: &str) -> Result<Self, OllamaError> {
        let inner = Ollama::try_new(url).map_err(OllamaError::ParseUrl)?;
        Ok(Self::with_inner(inner))
    }

    /// Like [`from_url`](Self::from_url), sending `api_key` as a bearer token when given.
    pub fn connect(url: &str, api_key: Option<&str>) -> Result<Self, OllamaError> {
        let Some(key) = api_key.filter(|k| !k.is_empty()) else {
            return Self::from_url(url);
        };

        let parsed = Url::parse(url)?;
        // Requests need a host; reject URLs such as `mailto:` before building.
        if parsed.host_str().is_none() {
            return Err(OllamaError::Client(format!("no host in {url}")));
        }

        let mut value = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|e| OllamaError::Client(e.to_string()))?;
        value.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| OllamaError::Client(e.to_string()))?;

        let inner = Ollama::builder().url(parsed).reqwest_client(http).build();
        Ok(Self::with_inner(inner))
    }

    fn with_inner(inner: Ollama) -> Self {
        Self {
            inner,
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
        }
    }

    /// Set the embedding model (e.g. `all-minilm`, `nomic-embed-text`).
    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    /// Set the chat model used for answers (e.g. `llama2`).
    pub fn with_chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = model.into();
        self
    }

    /// Server the client sends requests to.
    pub fn url(&self) -> &Url {
        self.inner.url()
    }

    pub fn embed_model(&self) -> &str {
        &self.embed_model
    }

    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }
}

impl Embedder for OllamaClient {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let req = GenerateEmbeddingsRequest::new(
            self.embed_model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );
        let res = self
            .inner
            .generate_embeddings(req)
            .await
            .map_err(|e| EmbeddingError::Unavailable(format!("{} ({})", e, self.embed_model)))?;
        debug!("ollama returned {} embedding(s)", res.embeddings.len());
        Ok(res.embeddings)
    }
}

impl LanguageModel for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let req = ChatMessageRequest::new(
            self.chat_model.clone(),
            vec![ChatMessage::user(prompt.to_string())],
        );
        let res = self
            .inner
            .send_chat_messages(req)
            .await
            .map_err(|e| LlmError::Request(format!("{} ({})", e, self.chat_model)))?;
        Ok(res.message.content)
    }
}

#[derive(Debug, Error)]
pub enum OllamaError {
    #[error("invalid Ollama URL: {0}")]
    ParseUrl(#[from] url::ParseError),
    #[error("failed to build Ollama client: {0}")]
    Client(String),
}
