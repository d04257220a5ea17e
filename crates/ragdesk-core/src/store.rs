//! Vector store: a flat L2 index plus a parallel list of chunk metadata, persisted as
//! two files in one directory.
//!
//! The metadata list is aligned with index rows by position; the offset is the entry's
//! identity. Both files are always written and read together.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chunks::{Chunk, ChunkError};
use crate::documents::Document;
use crate::embedding::{Embedder, EmbeddingError, EmbeddingManager};
use crate::index::{FlatIndex, IndexError};

pub const INDEX_FILENAME: &str = "vectors.index";
pub const METADATA_FILENAME: &str = "metadata.json";
const LOCK_FILENAME: &str = ".lock";

/// What we keep about each indexed chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

impl From<&Chunk> for ChunkMetadata {
    fn from(chunk: &Chunk) -> Self {
        Self {
            text: chunk.text.clone(),
            source: Some(chunk.source.clone()),
        }
    }
}

/// One search hit. `offset` is the entry's position in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub offset: usize,
    /// Euclidean distance to the query.
    pub distance: f32,
    pub metadata: ChunkMetadata,
}

/// Index and metadata for one persistence directory.
#[derive(Debug)]
pub struct VectorStore {
    persist_dir: PathBuf,
    /// `None` until something is built, added or loaded.
    index: Option<FlatIndex>,
    metadata: Vec<ChunkMetadata>,
}

impl VectorStore {
    /// Creates an empty store backed by `persist_dir`, creating the directory if needed.
    pub fn new(persist_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let persist_dir = persist_dir.into();
        std::fs::create_dir_all(&persist_dir).map_err(|e| StoreError::persistence(&persist_dir, e))?;
        info!("vector store at {}", persist_dir.display());
        Ok(Self {
            persist_dir,
            index: None,
            metadata: Vec::new(),
        })
    }

    pub fn persist_dir(&self) -> &Path {
        &self.persist_dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.persist_dir.join(INDEX_FILENAME)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.persist_dir.join(METADATA_FILENAME)
    }

    /// True when both persisted files are present.
    pub fn files_exist(&self) -> bool {
        self.index_path().is_file() && self.metadata_path().is_file()
    }

    pub fn is_loaded(&self) -> bool {
        self.index.is_some()
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.index.as_ref().map_or(0, FlatIndex::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> Option<usize> {
        self.index.as_ref().and_then(FlatIndex::dimension)
    }

    /// Metadata for the entry at `offset`.
    pub fn metadata(&self, offset: usize) -> Option<&ChunkMetadata> {
        self.metadata.get(offset)
    }

    /// Chunks and embeds `documents`, replaces the in-memory index with the result and
    /// saves it. Returns the number of indexed chunks.
    pub async fn build_from_documents<E: Embedder>(
        &mut self,
        documents: &[Document],
        embeddings: &EmbeddingManager<E>,
    ) -> Result<usize, StoreError> {
        info!("building vector store from {} document(s)", documents.len());
        let chunks = embeddings.chunk(documents)?;
        let vectors = embeddings.embed(&chunks).await?;
        let metadatas: Vec<ChunkMetadata> = chunks.iter().map(ChunkMetadata::from).collect();

        let mut fresh = Self {
            persist_dir: self.persist_dir.clone(),
            index: Some(FlatIndex::new()),
            metadata: Vec::new(),
        };
        fresh.add(vectors, Some(metadatas))?;
        *self = fresh;
        self.save()?;
        info!("vector store built with {} entries and saved to {}", self.len(), self.persist_dir.display());
        Ok(self.len())
    }

    /// Appends a batch of embeddings with their metadata. Without metadata, empty
    /// records are appended so offsets stay aligned. A rejected batch changes nothing.
    pub fn add(
        &mut self,
        embeddings: Vec<Vec<f32>>,
        metadatas: Option<Vec<ChunkMetadata>>,
    ) -> Result<(), StoreError> {
        let metadatas = match metadatas {
            Some(m) if m.len() != embeddings.len() => {
                return Err(StoreError::MetadataLengthMismatch {
                    embeddings: embeddings.len(),
                    metadatas: m.len(),
                });
            }
            Some(m) => m,
            None => vec![ChunkMetadata::default(); embeddings.len()],
        };

        match self.index.as_mut() {
            Some(index) => index.add(&embeddings)?,
            None => {
                let mut index = FlatIndex::new();
                index.add(&embeddings)?;
                self.index = Some(index);
            }
        }
        self.metadata.extend(metadatas);
        debug_assert_eq!(self.len(), self.metadata.len());
        info!("added {} embedding(s) to the index", embeddings.len());
        Ok(())
    }

    /// Writes the index and metadata files. Both are staged next to their targets and
    /// renamed into place only after both were written.
    pub fn save(&self) -> Result<(), StoreError> {
        let index = self.index.as_ref().ok_or(StoreError::NotLoaded)?;
        let _lock = DirLock::exclusive(&self.persist_dir)?;

        let index_path = self.index_path();
        let metadata_path = self.metadata_path();
        let index_bytes = index.to_bytes().map_err(|e| StoreError::persistence(&index_path, e))?;
        let metadata_bytes =
            serde_json::to_vec(&self.metadata).map_err(|e| StoreError::persistence(&metadata_path, e))?;

        let index_tmp = staging_path(&index_path);
        let metadata_tmp = staging_path(&metadata_path);
        let staged = std::fs::write(&index_tmp, &index_bytes)
            .map_err(|e| StoreError::persistence(&index_tmp, e))
            .and_then(|()| {
                std::fs::write(&metadata_tmp, &metadata_bytes)
                    .map_err(|e| StoreError::persistence(&metadata_tmp, e))
            });
        if let Err(e) = staged {
            discard(&index_tmp);
            discard(&metadata_tmp);
            return Err(e);
        }

        if let Err(e) = std::fs::rename(&index_tmp, &index_path) {
            discard(&index_tmp);
            discard(&metadata_tmp);
            return Err(StoreError::persistence(&index_path, e));
        }
        if let Err(e) = std::fs::rename(&metadata_tmp, &metadata_path) {
            discard(&metadata_tmp);
            warn!("index file updated but metadata was not; rebuild {}", self.persist_dir.display());
            return Err(StoreError::persistence(&metadata_path, e));
        }

        info!("index and metadata saved to {}", self.persist_dir.display());
        Ok(())
    }

    /// Reads both files and replaces in-memory state. On error the current state is kept.
    /// Nothing is written to the directory, so a read-only store can be loaded.
    pub fn load(&mut self) -> Result<(), StoreError> {
        let _lock = DirLock::shared(&self.persist_dir)?;

        let index_path = self.index_path();
        let metadata_path = self.metadata_path();
        let index_bytes = read_file(&index_path)?;
        let metadata_bytes = read_file(&metadata_path)?;

        let index = FlatIndex::from_bytes(&index_bytes).map_err(|e| StoreError::persistence(&index_path, e))?;
        let metadata: Vec<ChunkMetadata> =
            serde_json::from_slice(&metadata_bytes).map_err(|e| StoreError::persistence(&metadata_path, e))?;
        if index.len() != metadata.len() {
            return Err(StoreError::persistence(
                &self.persist_dir,
                format!("index has {} entries but metadata has {}", index.len(), metadata.len()),
            ));
        }

        self.index = Some(index);
        self.metadata = metadata;
        info!("loaded {} entries from {}", self.len(), self.persist_dir.display());
        Ok(())
    }

    /// The `top_k` entries closest to `query`, nearest first. `top_k` is capped at the
    /// number of entries.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>, StoreError> {
        let index = self.index.as_ref().ok_or(StoreError::NotLoaded)?;
        let hits = index.search(query, top_k)?;
        let results: Vec<SearchResult> = hits
            .into_iter()
            .filter_map(|(offset, distance)| {
                self.metadata.get(offset).map(|metadata| SearchResult {
                    offset,
                    distance,
                    metadata: metadata.clone(),
                })
            })
            .collect();
        debug!("search returned {} of {} requested", results.len(), top_k);
        Ok(results)
    }

    /// Embeds `text` and searches for it.
    pub async fn query<E: Embedder>(
        &self,
        text: &str,
        top_k: usize,
        embeddings: &EmbeddingManager<E>,
    ) -> Result<Vec<SearchResult>, StoreError> {
        debug!("querying for: {text}");
        if self.index.is_none() {
            return Err(StoreError::NotLoaded);
        }
        let vector = embeddings.embed_query(text).await?;
        self.search(&vector, top_k)
    }
}

/// Advisory lock on the persistence directory, released on drop. Writers hold it
/// exclusively; readers share it.
struct DirLock {
    file: File,
}

impl DirLock {
    fn exclusive(dir: &Path) -> Result<Self, StoreError> {
        let path = dir.join(LOCK_FILENAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::persistence(&path, e))?;
        file.lock_exclusive().map_err(|e| StoreError::persistence(&path, e))?;
        Ok(Self { file })
    }

    /// Opens the lock file read-only. If it cannot be opened (never saved here, or
    /// no permission) the read goes ahead unlocked rather than creating it.
    fn shared(dir: &Path) -> Result<Option<Self>, StoreError> {
        let path = dir.join(LOCK_FILENAME);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                debug!("reading {} without a lock: {e}", dir.display());
                return Ok(None);
            }
        };
        file.lock_shared().map_err(|e| StoreError::persistence(&path, e))?;
        Ok(Some(Self { file }))
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!("could not remove {}: {e}", path.display());
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, StoreError> {
    std::fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => StoreError::persistence(path, "file is missing"),
        _ => StoreError::persistence(path, e),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("dimension mismatch: index holds {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("{embeddings} embedding(s) but {metadatas} metadata record(s)")]
    MetadataLengthMismatch { embeddings: usize, metadatas: usize },
    #[error("invalid vector: {0}")]
    InvalidVector(IndexError),
    #[error("persistence error at {path}: {reason}")]
    Persistence { path: PathBuf, reason: String },
    #[error("index not loaded; load or build it first")]
    NotLoaded,
    #[error("chunking failed: {0}")]
    Chunk(#[from] ChunkError),
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
}

impl StoreError {
    fn persistence(path: &Path, reason: impl ToString) -> Self {
        StoreError::Persistence {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

impl From<IndexError> for StoreError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::DimensionMismatch { expected, actual } => StoreError::DimensionMismatch { expected, actual },
            other => StoreError::InvalidVector(other),
        }
    }
}
