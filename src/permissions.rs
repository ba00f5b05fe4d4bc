//! Kamera/Mikrofon-Berechtigungen
//!
//! Die Anfrage ist best effort: eine Ablehnung wird gemeldet, blockiert
//! aber die Initialisierung der Engine nicht.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum PermissionError {
    #[error("Permission request failed: {0}")]
    RequestFailed(String),
}

/// Ergebnis der Berechtigungsanfrage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionGrant {
    pub camera: bool,
    pub microphone: bool,
}

impl PermissionGrant {
    pub const ALL: PermissionGrant = PermissionGrant {
        camera: true,
        microphone: true,
    };

    pub fn is_complete(&self) -> bool {
        self.camera && self.microphone
    }
}

#[async_trait]
pub trait PermissionRequester: Send + Sync {
    async fn request_camera_and_microphone(&self) -> Result<PermissionGrant, PermissionError>;
}

/// Plattformen ohne Laufzeit-Berechtigungen (Desktop, iOS via Info.plist)
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeGranted;

#[async_trait]
impl PermissionRequester for AssumeGranted {
    async fn request_camera_and_microphone(&self) -> Result<PermissionGrant, PermissionError> {
        Ok(PermissionGrant::ALL)
    }
}

/// Fester Bescheid, z.B. für Tests einer abgelehnten Kamera
#[derive(Debug, Clone, Copy)]
pub struct FixedGrant(pub PermissionGrant);

#[async_trait]
impl PermissionRequester for FixedGrant {
    async fn request_camera_and_microphone(&self) -> Result<PermissionGrant, PermissionError> {
        Ok(self.0)
    }
}
