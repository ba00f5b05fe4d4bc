//! Materialisierung von Bild-URIs zu lokalen Dateien
//!
//! Die Engine kann nur Dateipfade als Hintergrund verwenden. Picker- und
//! Asset-URIs werden daher vorher kopiert bzw. heruntergeladen:
//! - `file://` und einfache Pfade: Kopie
//! - `http://` / `https://`: Download
//! - `data:` (base64): Dekodierung
//!
//! Geschrieben wird immer in eine temporäre Datei neben dem Ziel, die erst
//! nach erfolgreichem Schreiben umbenannt wird. Ein Fehler lässt die bisherige
//! Zieldatei unangetastet.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use url::Url;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    #[error("Unsupported URI scheme: {0}")]
    UnsupportedScheme(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status}: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to decode data URI: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Materialized file is empty: {0}")]
    Empty(PathBuf),
}

// ============================================================================
// MATERIALIZER
// ============================================================================

#[async_trait]
pub trait Materializer: Send + Sync {
    /// Stellt `uri` unter `dest` bereit und gibt den finalen Pfad zurück
    async fn materialize(&self, uri: &str, dest: &Path) -> Result<PathBuf, MaterializeError>;
}

/// Quelle einer URI nach dem Parsen
#[derive(Debug, PartialEq, Eq)]
enum UriSource {
    File(PathBuf),
    Remote(Url),
    Data(String),
}

fn classify(uri: &str) -> Result<UriSource, MaterializeError> {
    if let Some(rest) = uri.strip_prefix("data:") {
        let (meta, payload) = rest
            .split_once(',')
            .ok_or_else(|| MaterializeError::InvalidUri("data URI without payload".to_string()))?;
        if !meta.ends_with(";base64") {
            return Err(MaterializeError::UnsupportedScheme(
                "data URI without base64 encoding".to_string(),
            ));
        }
        return Ok(UriSource::Data(payload.to_string()));
    }

    match Url::parse(uri) {
        Ok(url) => match url.scheme() {
            "file" => url
                .to_file_path()
                .map(UriSource::File)
                .map_err(|_| MaterializeError::InvalidUri(uri.to_string())),
            "http" | "https" => Ok(UriSource::Remote(url)),
            other => Err(MaterializeError::UnsupportedScheme(other.to_string())),
        },
        // Kein Schema: lokaler Pfad
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(UriSource::File(PathBuf::from(uri))),
        Err(e) => Err(MaterializeError::InvalidUri(format!("{}: {}", uri, e))),
    }
}

/// Standard-Implementierung mit Dateisystem und HTTP-Client
#[derive(Debug, Clone, Default)]
pub struct FileMaterializer {
    client: reqwest::Client,
}

impl FileMaterializer {
    pub fn new() -> Self {
        Self::default()
    }

    async fn download(&self, url: &Url, target: &Path) -> Result<(), MaterializeError> {
        tracing::debug!("Downloading background from {}", url);

        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(MaterializeError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let mut file = fs::File::create(target).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn write_to(&self, source: &UriSource, target: &Path) -> Result<(), MaterializeError> {
        match source {
            UriSource::File(path) => {
                fs::copy(path, target).await?;
            }
            UriSource::Remote(url) => self.download(url, target).await?,
            UriSource::Data(payload) => {
                let bytes = BASE64.decode(payload.trim())?;
                fs::write(target, bytes).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Materializer for FileMaterializer {
    async fn materialize(&self, uri: &str, dest: &Path) -> Result<PathBuf, MaterializeError> {
        let source = classify(uri)?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file_name = dest
            .file_name()
            .ok_or_else(|| MaterializeError::InvalidUri(dest.display().to_string()))?;
        let partial = dest.with_file_name(format!(
            ".{}.{}.partial",
            file_name.to_string_lossy(),
            uuid::Uuid::new_v4()
        ));

        let result: Result<PathBuf, MaterializeError> = async {
            self.write_to(&source, &partial).await?;

            let metadata = fs::metadata(&partial).await?;
            if metadata.len() == 0 {
                return Err(MaterializeError::Empty(dest.to_path_buf()));
            }

            fs::rename(&partial, dest).await?;
            Ok(dest.to_path_buf())
        }
        .await;

        if result.is_err() {
            // Aufräumen, Fehler beim Löschen ist irrelevant
            let _ = fs::remove_file(&partial).await;
        }

        result
    }
}
