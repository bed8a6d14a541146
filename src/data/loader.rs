// ============================================================
// Layer 4 - Corpus Loader
// ============================================================
// Loads plain-text files from a directory and turns each one
// into a Document (cleaned, whitespace-tokenised). One file,
// one document. Files that cannot be read are skipped with a
// warning instead of failing the whole corpus.

use anyhow::{Context, Result};
use std::{fs, path::Path};

use crate::data::preprocessor::Preprocessor;
use crate::domain::document::Document;
use crate::domain::traits::DocumentSource;

/// Loads all .txt files from a given directory.
/// Implements the DocumentSource trait from Layer 3.
pub struct TextLoader {
    /// Path to the directory containing .txt files
    dir: String,
    preprocessor: Preprocessor,
}

impl TextLoader {
    pub fn new(dir: impl Into<String>) -> Self {
        Self { dir: dir.into(), preprocessor: Preprocessor::new() }
    }
}

impl DocumentSource for TextLoader {
    fn load_all(&self) -> Result<Vec<Document>> {
        let dir = Path::new(&self.dir);

        // A missing directory returns an empty corpus rather than
        // an error, so the demo can run without data on disk.
        if !dir.exists() {
            tracing::warn!(
                "Docs directory '{}' does not exist, returning empty corpus",
                self.dir
            );
            return Ok(Vec::new());
        }

        let mut paths: Vec<_> = fs::read_dir(dir)
            .with_context(|| format!("Cannot read directory '{}'", self.dir))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("txt"))
            .collect();

        // Sort by filename so document order (and therefore batch
        // fingerprints) is reproducible across runs.
        paths.sort();

        let mut docs = Vec::new();
        for path in paths {
            match fs::read_to_string(&path) {
                Ok(raw) => {
                    let text = self.preprocessor.clean(&raw);
                    let source = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("unknown")
                        .to_string();
                    let doc = Document::new(source, &text);
                    tracing::debug!("Loaded: {} ({} tokens)", doc.source, doc.len());
                    docs.push(doc);
                }
                Err(e) => {
                    tracing::warn!("Skipping '{}': {}", path.display(), e);
                }
            }
        }

        tracing::info!("Successfully loaded {} documents", docs.len());
        Ok(docs)
    }
}
