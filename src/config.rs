//! Konfiguration
//!
//! Wird aus Umgebungsvariablen geladen. `app_id` und `token` werden in der
//! Debug-Ausgabe geschwärzt.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Standard-Channel, falls `BACKDROP_CHANNEL` nicht gesetzt ist
pub const DEFAULT_CHANNEL_NAME: &str = "channel-x";

/// Standard-Timeout für JoinChannelSuccess in Sekunden
pub const DEFAULT_JOIN_TIMEOUT_SECS: u64 = 10;

/// Name des mitgelieferten Hintergrundbilds
pub const DEFAULT_BUNDLED_ASSET: &str = "img.png";

/// Dateiname, unter dem das Hintergrundbild lokal abgelegt wird
pub const DEFAULT_BACKGROUND_FILE: &str = "img.png";

/// Verzeichnis mit mitgelieferten Assets
pub const DEFAULT_ASSET_DIR: &str = "assets";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },

    #[error("Could not determine app data directory")]
    NoDataDir,
}

// ============================================================================
// SESSION CONFIG
// ============================================================================

/// Zugangsdaten und Channel für einen Anruf
#[derive(Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub app_id: String,
    pub token: Option<String>,
    pub channel_name: String,
}

impl SessionConfig {
    pub fn new(app_id: impl Into<String>, channel_name: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            token: None,
            channel_name: channel_name.into(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("app_id", &"[REDACTED]")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("channel_name", &self.channel_name)
            .finish()
    }
}

// ============================================================================
// APP CONFIG
// ============================================================================

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub session: SessionConfig,

    /// `None` = ohne Timeout auf JoinChannelSuccess warten
    pub join_timeout: Option<Duration>,

    /// Zielverzeichnis für lokal bereitgestellte Hintergrundbilder
    pub documents_dir: PathBuf,

    pub asset_dir: PathBuf,
    pub bundled_asset: String,
    pub background_file: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Lädt die Konfiguration aus einer `HashMap` (für Tests)
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let app_id = vars
            .get("BACKDROP_APP_ID")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("BACKDROP_APP_ID".to_string()))?
            .clone();

        let token = vars
            .get("BACKDROP_TOKEN")
            .filter(|v| !v.is_empty())
            .cloned();

        let channel_name = vars
            .get("BACKDROP_CHANNEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CHANNEL_NAME.to_string());

        if channel_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "BACKDROP_CHANNEL".to_string(),
                value: channel_name,
            });
        }

        let join_timeout_secs = match vars.get("BACKDROP_JOIN_TIMEOUT_SECS") {
            Some(raw) => raw.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                name: "BACKDROP_JOIN_TIMEOUT_SECS".to_string(),
                value: raw.clone(),
            })?,
            None => DEFAULT_JOIN_TIMEOUT_SECS,
        };
        let join_timeout = (join_timeout_secs > 0).then(|| Duration::from_secs(join_timeout_secs));

        let documents_dir = match vars.get("BACKDROP_DOCUMENTS_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_documents_dir()?,
        };

        let asset_dir = vars
            .get("BACKDROP_ASSET_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ASSET_DIR));

        let bundled_asset = vars
            .get("BACKDROP_BUNDLED_ASSET")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BUNDLED_ASSET.to_string());

        let background_file = vars
            .get("BACKDROP_BACKGROUND_FILE")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BACKGROUND_FILE.to_string());

        Ok(Self {
            session: SessionConfig {
                app_id,
                token,
                channel_name,
            },
            join_timeout,
            documents_dir,
            asset_dir,
            bundled_asset,
            background_file,
        })
    }

    /// Namensvorlage für lokal abgelegte Hintergrundbilder
    /// (`img.png` ergibt `img-<uuid>.png`)
    pub fn background_path(&self) -> PathBuf {
        self.documents_dir.join(&self.background_file)
    }
}

/// Ermittelt das Dokumente-Verzeichnis im App-Datenverzeichnis
fn default_documents_dir() -> Result<PathBuf, ConfigError> {
    let proj_dirs = directories::ProjectDirs::from("com", "backdrop", "backdrop")
        .ok_or(ConfigError::NoDataDir)?;

    let mut path = proj_dirs.data_dir().to_path_buf();
    path.push("documents");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            ("BACKDROP_APP_ID".to_string(), "0123456789abcdef".to_string()),
            ("BACKDROP_DOCUMENTS_DIR".to_string(), "/tmp/backdrop-docs".to_string()),
        ])
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = AppConfig::from_vars(&base_vars()).unwrap();

        assert_eq!(config.session.app_id, "0123456789abcdef");
        assert_eq!(config.session.token, None);
        assert_eq!(config.session.channel_name, DEFAULT_CHANNEL_NAME);
        assert_eq!(config.join_timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.asset_dir, PathBuf::from("assets"));
        assert_eq!(config.bundled_asset, "img.png");
        assert_eq!(
            config.background_path(),
            PathBuf::from("/tmp/backdrop-docs/img.png")
        );
    }

    #[test]
    fn test_from_vars_custom_values() {
        let mut vars = base_vars();
        vars.insert("BACKDROP_TOKEN".to_string(), "tok".to_string());
        vars.insert("BACKDROP_CHANNEL".to_string(), "standup".to_string());
        vars.insert("BACKDROP_JOIN_TIMEOUT_SECS".to_string(), "0".to_string());
        vars.insert("BACKDROP_BACKGROUND_FILE".to_string(), "bg.jpg".to_string());

        let config = AppConfig::from_vars(&vars).unwrap();

        assert_eq!(config.session.token.as_deref(), Some("tok"));
        assert_eq!(config.session.channel_name, "standup");
        assert_eq!(config.join_timeout, None);
        assert_eq!(
            config.background_path(),
            PathBuf::from("/tmp/backdrop-docs/bg.jpg")
        );
    }

    #[test]
    fn test_missing_app_id() {
        let mut vars = base_vars();
        vars.insert("BACKDROP_APP_ID".to_string(), "  ".to_string());

        assert_eq!(
            AppConfig::from_vars(&vars).unwrap_err(),
            ConfigError::MissingEnvVar("BACKDROP_APP_ID".to_string())
        );
    }

    #[test]
    fn test_invalid_timeout() {
        let mut vars = base_vars();
        vars.insert("BACKDROP_JOIN_TIMEOUT_SECS".to_string(), "soon".to_string());

        assert!(matches!(
            AppConfig::from_vars(&vars),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let session = SessionConfig::new("secret-app", "channel-x").with_token("secret-token");
        let debug = format!("{:?}", session);

        assert!(!debug.contains("secret-app"));
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("channel-x"));
    }
}
