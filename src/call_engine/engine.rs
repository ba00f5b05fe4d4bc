//! RTC Engine Schnittstelle
//!
//! Die eigentliche Medien-Engine (Capture, Encoding, Transport,
//! Hintergrund-Segmentierung) ist extern. Dieses Modul beschreibt die
//! Kommandos, die der Controller absetzt, und die Events, die die Engine
//! asynchron zurückliefert.

use crate::background::BackgroundSource;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Engine creation failed: {0}")]
    Create(String),

    #[error("{operation} failed with code {code}")]
    Rejected { operation: &'static str, code: i32 },

    #[error("Engine unavailable: {0}")]
    Unavailable(String),
}

impl EngineError {
    /// Fehlercode für Meldungen, -1 wenn die Engine keinen geliefert hat
    pub fn code(&self) -> i32 {
        match self {
            EngineError::Rejected { code, .. } => *code,
            _ => -1,
        }
    }
}

// ============================================================================
// CALL STATE
// ============================================================================

/// Aktueller Status der Sitzung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Engine noch nicht erstellt
    Uninitialized,
    /// Berechtigungen, Engine-Erstellung, Video-Aktivierung laufen
    Initializing,
    /// Bereit für "Start Call"
    Ready,
    /// Hintergrund aktiviert, Join abgesetzt, warte auf JoinChannelSuccess
    Joining,
    /// Anruf aktiv
    InCall,
    /// Channel wird verlassen
    Leaving,
}

// ============================================================================
// EVENT REASONS
// ============================================================================

/// Grund im VirtualBackgroundSourceEnabled-Event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VirtualBackgroundReason {
    Success,
    ImageNotExist,
    ColorFormatNotSupported,
    DeviceNotSupported,
    Unknown(i32),
}

impl From<i32> for VirtualBackgroundReason {
    fn from(code: i32) -> Self {
        match code {
            0 => VirtualBackgroundReason::Success,
            1 => VirtualBackgroundReason::ImageNotExist,
            2 => VirtualBackgroundReason::ColorFormatNotSupported,
            3 => VirtualBackgroundReason::DeviceNotSupported,
            other => VirtualBackgroundReason::Unknown(other),
        }
    }
}

/// Grund im UserOffline-Event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineReason {
    Quit,
    Dropped,
    BecomeAudience,
    Unknown(i32),
}

impl From<i32> for OfflineReason {
    fn from(code: i32) -> Self {
        match code {
            0 => OfflineReason::Quit,
            1 => OfflineReason::Dropped,
            2 => OfflineReason::BecomeAudience,
            other => OfflineReason::Unknown(other),
        }
    }
}

// ============================================================================
// ENGINE EVENTS
// ============================================================================

/// Asynchrone Benachrichtigungen der Engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Warning {
        code: i32,
    },
    Error {
        code: i32,
    },
    VirtualBackgroundSourceEnabled {
        enabled: bool,
        reason: VirtualBackgroundReason,
    },
    UserJoined {
        uid: u32,
        elapsed_ms: u32,
    },
    UserOffline {
        uid: u32,
        reason: OfflineReason,
    },
    JoinChannelSuccess {
        channel: String,
        uid: u32,
        elapsed_ms: u32,
    },
    /// Bestätigung von leaveChannel (wird nicht abgewartet)
    LeaveChannel,
    TokenPrivilegeWillExpire {
        token: String,
    },
}

impl EngineEvent {
    /// Name des Events, wie ihn die Engine-Listener verwenden
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Warning { .. } => "Warning",
            EngineEvent::Error { .. } => "Error",
            EngineEvent::VirtualBackgroundSourceEnabled { .. } => "VirtualBackgroundSourceEnabled",
            EngineEvent::UserJoined { .. } => "UserJoined",
            EngineEvent::UserOffline { .. } => "UserOffline",
            EngineEvent::JoinChannelSuccess { .. } => "JoinChannelSuccess",
            EngineEvent::LeaveChannel => "LeaveChannel",
            EngineEvent::TokenPrivilegeWillExpire { .. } => "TokenPrivilegeWillExpire",
        }
    }
}

/// Kanal, über den die Engine Events in den Controller schiebt
pub type EventSink = mpsc::UnboundedSender<EngineEvent>;

// ============================================================================
// ENGINE TRAITS
// ============================================================================

/// Handle auf eine erstellte Engine
#[async_trait]
pub trait RtcEngine: Send + Sync {
    async fn enable_video(&self) -> Result<(), EngineError>;

    async fn enable_virtual_background(
        &self,
        enabled: bool,
        source: &BackgroundSource,
    ) -> Result<(), EngineError>;

    /// Bestätigt nur das Absetzen; Erfolg kommt als JoinChannelSuccess
    async fn join_channel(
        &self,
        token: Option<&str>,
        channel_name: &str,
        info: Option<&str>,
        local_uid: u32,
    ) -> Result<(), EngineError>;

    async fn leave_channel(&self) -> Result<(), EngineError>;

    async fn renew_token(&self, _token: &str) -> Result<(), EngineError> {
        Ok(())
    }

    /// Gibt native Ressourcen frei
    async fn destroy(&self) {}
}

/// Erstellt Engines; `events` ersetzt die einzelnen Listener-Registrierungen
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self, app_id: &str, events: EventSink)
        -> Result<Arc<dyn RtcEngine>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_codes() {
        assert_eq!(VirtualBackgroundReason::from(0), VirtualBackgroundReason::Success);
        assert_eq!(
            VirtualBackgroundReason::from(1),
            VirtualBackgroundReason::ImageNotExist
        );
        assert_eq!(
            VirtualBackgroundReason::from(42),
            VirtualBackgroundReason::Unknown(42)
        );
        assert_eq!(OfflineReason::from(1), OfflineReason::Dropped);
        assert_eq!(OfflineReason::from(-3), OfflineReason::Unknown(-3));
    }

    #[test]
    fn test_error_code() {
        let rejected = EngineError::Rejected {
            operation: "joinChannel",
            code: 17,
        };
        assert_eq!(rejected.code(), 17);
        assert_eq!(rejected.to_string(), "joinChannel failed with code 17");
        assert_eq!(EngineError::Create("bad app id".into()).code(), -1);
    }
}
