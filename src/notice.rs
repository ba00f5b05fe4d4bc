//! Benutzer-sichtbare Meldungen (Toast/Log)
//!
//! Fehler und Warnungen, die nicht zum Absturz führen dürfen, werden als
//! `Notice` an das Frontend gemeldet. Keine Meldung löst selbst einen
//! Zustandswechsel aus.

use chrono::{DateTime, Utc};
use serde::Serialize;

// ============================================================================
// SEVERITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

// ============================================================================
// NOTICE KIND
// ============================================================================

/// Art der Meldung
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NoticeKind {
    /// Engine konnte nicht erstellt oder Video nicht aktiviert werden (fatal)
    EngineInitFailure,
    /// Warnung der Engine (Event)
    EngineWarning { code: i32 },
    /// Laufzeitfehler der Engine (Event oder fehlgeschlagenes Kommando)
    EngineError { code: i32 },
    /// Hintergrundbild konnte nicht lokal bereitgestellt werden
    BackgroundStagingFailure,
    /// Kamera/Mikrofon-Berechtigung verweigert (best effort)
    PermissionDenied,
    /// Kein JoinChannelSuccess innerhalb des Timeouts
    JoinTimeout,
    /// Token läuft bald ab und muss erneuert werden
    TokenExpiring,
}

impl NoticeKind {
    pub fn severity(&self) -> Severity {
        match self {
            NoticeKind::EngineInitFailure | NoticeKind::EngineError { .. } => Severity::Error,
            NoticeKind::EngineWarning { .. }
            | NoticeKind::BackgroundStagingFailure
            | NoticeKind::PermissionDenied
            | NoticeKind::JoinTimeout => Severity::Warning,
            NoticeKind::TokenExpiring => Severity::Info,
        }
    }
}

// ============================================================================
// NOTICE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    #[serde(flatten)]
    pub kind: NoticeKind,
    pub severity: Severity,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            severity: kind.severity(),
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }

    /// Schreibt die Meldung mit passendem Level ins Log
    pub fn log(&self) {
        match self.severity {
            Severity::Info => tracing::info!(kind = ?self.kind, "{}", self.message),
            Severity::Warning => tracing::warn!(kind = ?self.kind, "{}", self.message),
            Severity::Error => tracing::error!(kind = ?self.kind, "{}", self.message),
        }
    }
}
