//! Discovering and loading source documents from a directory.
//!
//! Only plain-text formats are read here. PDF and DOCX files are reported and skipped;
//! extracting their text belongs to an external parser.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};
use walkdir::WalkDir;

/// Extensions loaded as plain text.
const TEXT_EXTENSIONS: [&str; 3] = ["txt", "md", "markdown"];
/// Extensions we recognise but cannot extract.
const BINARY_EXTENSIONS: [&str; 2] = ["pdf", "docx"];

/// A loaded document: its text and the file it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub text: String,
    pub source: PathBuf,
}

impl Document {
    pub fn new(text: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
        }
    }
}

/// Walks `root` and loads every supported document, sorted by path.
/// Does not follow symlinks and skips hidden entries.
pub fn load_documents(root: &Path) -> Result<Vec<Document>, LoadError> {
    if !root.is_dir() {
        return Err(LoadError::NotADirectory(root.to_path_buf()));
    }
    info!("loading documents from {}", root.display());

    let mut found: BTreeMap<String, usize> = BTreeMap::new();
    let mut documents = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
    {
        let entry = entry.map_err(|e| LoadError::Walk(e.to_string()))?;
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(ext) = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase) else {
            continue;
        };

        if BINARY_EXTENSIONS.contains(&ext.as_str()) {
            *found.entry(ext).or_default() += 1;
            warn!("skipping {}: no text extractor for this format", path.display());
            continue;
        }
        if !TEXT_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }

        let raw = std::fs::read_to_string(path).map_err(|e| {
            error!("failed to load {}: {e}", path.display());
            LoadError::Read(path.to_path_buf(), e)
        })?;
        let text = if ext == "txt" { raw } else { strip_frontmatter(&raw) };
        *found.entry(ext).or_default() += 1;
        documents.push(Document {
            text,
            source: path.to_path_buf(),
        });
    }

    for (ext, count) in &found {
        info!("found {count} .{ext} file(s)");
    }
    info!("loaded {} document(s)", documents.len());
    Ok(documents)
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Removes optional YAML frontmatter (lines between first --- and second ---).
fn strip_frontmatter(content: &str) -> String {
    let s = content.trim_start();
    let Some(after_first) = s.strip_prefix("---") else {
        return content.to_string();
    };
    match after_first.find("\n---") {
        Some(end) => after_first[end + 4..].trim_start().to_string(),
        None => content.to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("walk error: {0}")]
    Walk(String),
    #[error("read error for {0}: {1}")]
    Read(PathBuf, std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_frontmatter_plain() {
        assert_eq!(strip_frontmatter("Hello world."), "Hello world.");
    }

    #[test]
    fn strip_frontmatter_with_yaml() {
        let s = "---\ntitle: Foo\ndate: 2024-01-01\n---\n\nActual content here.";
        assert_eq!(strip_frontmatter(s), "Actual content here.");
    }

    #[test]
    fn loads_text_and_markdown_skips_others() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "plain text").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.md"), "---\ntitle: b\n---\nmarkdown body").unwrap();
        std::fs::write(dir.path().join("c.pdf"), [0u8, 1, 2]).unwrap();
        std::fs::write(dir.path().join("d.rs"), "fn main() {}").unwrap();
        std::fs::create_dir(dir.path().join(".hidden")).unwrap();
        std::fs::write(dir.path().join(".hidden/e.txt"), "secret").unwrap();

        let docs = load_documents(dir.path()).unwrap();
        let texts: Vec<_> = docs.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["plain text", "markdown body"]);
        assert_eq!(docs[1].source, dir.path().join("sub/b.md"));
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_documents(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, LoadError::NotADirectory(_)));
    }
}
