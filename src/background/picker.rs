//! Externe Quellen für Hintergrundbilder
//!
//! - `MediaPicker`: Bildauswahl aus der Galerie (Plattform-Dialog)
//! - `AssetLocator`: löst ein mitgeliefertes Asset zu einer URI auf

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, Clone)]
pub enum PickerError {
    #[error("Media picker failed: {0}")]
    Failed(String),

    #[error("Bundled asset not found: {0}")]
    AssetNotFound(String),
}

// ============================================================================
// MEDIA PICKER
// ============================================================================

/// Plattform-Dialog zur Bildauswahl
///
/// Gibt `None` zurück, wenn der Benutzer abbricht.
#[async_trait]
pub trait MediaPicker: Send + Sync {
    async fn pick_image(&self) -> Result<Option<String>, PickerError>;
}

/// Picker mit vorab feststehendem Ergebnis (CLI, Tests)
#[derive(Debug, Clone, Default)]
pub struct FixedPick(pub Option<String>);

impl FixedPick {
    pub fn uri(uri: impl Into<String>) -> Self {
        Self(Some(uri.into()))
    }

    pub fn cancelled() -> Self {
        Self(None)
    }
}

#[async_trait]
impl MediaPicker for FixedPick {
    async fn pick_image(&self) -> Result<Option<String>, PickerError> {
        Ok(self.0.clone())
    }
}

// ============================================================================
// ASSET LOCATOR
// ============================================================================

/// Löst ein mitgeliefertes Asset zu einer Plattform-URI auf
pub trait AssetLocator: Send + Sync {
    fn resolve(&self, name: &str) -> Result<String, PickerError>;
}

/// Assets liegen als Dateien in einem Verzeichnis
#[derive(Debug, Clone)]
pub struct DirectoryAssets {
    root: PathBuf,
}

impl DirectoryAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetLocator for DirectoryAssets {
    fn resolve(&self, name: &str) -> Result<String, PickerError> {
        let path = self.root.join(name);
        let absolute = std::path::absolute(&path)
            .map_err(|e| PickerError::AssetNotFound(format!("{}: {}", path.display(), e)))?;

        if !absolute.is_file() {
            return Err(PickerError::AssetNotFound(absolute.display().to_string()));
        }

        Url::from_file_path(&absolute)
            .map(String::from)
            .map_err(|_| PickerError::AssetNotFound(absolute.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_pick() {
        assert_eq!(
            FixedPick::uri("file:///a.png").pick_image().await.unwrap(),
            Some("file:///a.png".to_string())
        );
        assert_eq!(FixedPick::cancelled().pick_image().await.unwrap(), None);
    }

    #[test]
    fn test_directory_assets() {
        let dir = std::env::temp_dir().join(format!("backdrop-assets-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("img.png"), b"png").unwrap();

        let assets = DirectoryAssets::new(&dir);
        let uri = assets.resolve("img.png").unwrap();
        assert!(uri.starts_with("file://"));
        assert!(uri.ends_with("/img.png"));

        assert!(matches!(
            assets.resolve("missing.png"),
            Err(PickerError::AssetNotFound(_))
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
