//! Local document loading for the local / hybrid / azure corpus modes.
//!
//! Walks a directory tree and turns supported files into sources shaped
//! like scraped pages so the context manager can rank them uniformly.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::context::vector::VectorDocument;
use crate::core::types::{ScrapeStatus, ScrapedSource};
use crate::scraper::{extract, pdf};

const SUPPORTED_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "html", "htm", "csv", "json", "pdf"];

pub struct DocumentLoader {
    root: PathBuf,
}

impl DocumentLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub async fn load(&self) -> Result<Vec<ScrapedSource>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || load_blocking(&root))
            .await
            .context("document loader task panicked")?
    }
}

fn load_blocking(root: &Path) -> Result<Vec<ScrapedSource>> {
    anyhow::ensure!(
        root.is_dir(),
        "document path '{}' does not exist or is not a directory",
        root.display()
    );

    let mut sources = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("skipping unreadable path: {e}");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(ext) = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
        else {
            continue;
        };
        if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }

        match load_file(path, &ext) {
            Ok(Some(source)) => sources.push(source),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("failed to load {}: {:#}", path.display(), e);
            }
        }
    }
    Ok(sources)
}

fn load_file(path: &Path, ext: &str) -> Result<Option<ScrapedSource>> {
    let url = format!("file://{}", path.display());
    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| url.clone());

    let text = match ext {
        "pdf" => {
            let bytes = std::fs::read(path).context("reading pdf")?;
            pdf::extract_text(&bytes)?
        }
        "html" | "htm" => {
            let html = std::fs::read_to_string(path).context("reading html")?;
            extract::extract_page(&html, &url).text
        }
        _ => std::fs::read_to_string(path).context("reading file")?,
    };

    if text.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(ScrapedSource {
        url,
        title,
        raw_text: text,
        image_urls: Vec::new(),
        status: ScrapeStatus::Success,
        warnings: Vec::new(),
    }))
}

/// Reshape sources for vector-store ingestion.
pub fn to_vector_documents(sources: &[ScrapedSource]) -> Vec<VectorDocument> {
    sources
        .iter()
        .map(|source| VectorDocument {
            content: source.raw_text.clone(),
            metadata: std::collections::HashMap::from([
                ("url".to_string(), source.url.clone()),
                ("title".to_string(), source.title.clone()),
            ]),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_supported_files_and_skips_others() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "# Notes\nsome research notes").unwrap();
        std::fs::write(dir.path().join("data.csv"), "a,b\n1,2").unwrap();
        std::fs::write(dir.path().join("binary.bin"), [0u8, 1, 2]).unwrap();
        std::fs::write(dir.path().join("empty.txt"), "   ").unwrap();

        let sources = DocumentLoader::new(dir.path()).load().await.unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources.iter().all(|s| s.status == ScrapeStatus::Success));
        assert!(sources.iter().any(|s| s.title == "notes.md"));
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let result = DocumentLoader::new("/definitely/not/a/real/path").load().await;
        assert!(result.is_err());
    }
}
