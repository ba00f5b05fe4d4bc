//! Presentation Layer
//!
//! Reine Lese-Sicht auf Controller und Hintergrund. Das Frontend rendert
//! ausschließlich aus `CallView`, es verändert nie selbst Zustand.

use crate::background::BackgroundSource;
use crate::call_engine::{CallState, SessionController};
use crate::events::SessionEvent;
use crate::notice::Notice;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Skaliert und beschneidet auf die Fläche
    Hidden,
}

/// Eine Video-Fläche
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoSurface {
    /// `None` für die lokale Kamera
    pub uid: Option<u32>,
    pub channel_id: String,
    pub render_mode: RenderMode,
    pub z_order_media_overlay: bool,
}

/// Layout der Video-Flächen
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum VideoLayout {
    /// Nicht im Anruf, keine Videos
    Hidden,
    /// Lokales Vollbild, Remote-Teilnehmer als horizontale Leiste
    Call {
        local: VideoSurface,
        remotes: Vec<VideoSurface>,
    },
}

impl VideoLayout {
    pub fn build(joined: bool, channel_id: &str, peer_ids: &[u32]) -> Self {
        if !joined {
            return VideoLayout::Hidden;
        }

        VideoLayout::Call {
            local: VideoSurface {
                uid: None,
                channel_id: channel_id.to_string(),
                render_mode: RenderMode::Hidden,
                z_order_media_overlay: false,
            },
            remotes: peer_ids
                .iter()
                .map(|&uid| VideoSurface {
                    uid: Some(uid),
                    channel_id: channel_id.to_string(),
                    render_mode: RenderMode::Hidden,
                    z_order_media_overlay: true,
                })
                .collect(),
        }
    }
}

/// Alles, was das Frontend zum Rendern braucht
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallView {
    pub call_state: CallState,
    pub joined: bool,
    pub waiting: bool,
    /// "Start Call" ist bedienbar
    pub start_enabled: bool,
    pub peer_ids: Vec<u32>,
    pub channel_name: String,
    pub staged_background: BackgroundSource,
    pub active_background: Option<BackgroundSource>,
    pub last_notice: Option<Notice>,
    pub fatal: Option<String>,
    pub layout: VideoLayout,
}

impl CallView {
    pub fn capture(controller: &SessionController, last_notice: Option<Notice>) -> Self {
        let snapshot = controller.snapshot();
        let (staged_background, waiting) = controller.background().snapshot();
        let peer_ids = controller.participants();
        let joined = snapshot.call_state == CallState::InCall;

        Self {
            call_state: snapshot.call_state,
            joined,
            waiting,
            start_enabled: snapshot.call_state == CallState::Ready
                && !waiting
                && snapshot.fatal.is_none(),
            layout: VideoLayout::build(joined, &snapshot.channel_name, &peer_ids),
            peer_ids,
            channel_name: snapshot.channel_name,
            staged_background,
            active_background: snapshot.active_background,
            last_notice,
            fatal: snapshot.fatal,
        }
    }
}

/// Event-Name und Payload für das Frontend
pub fn frontend_event(event: &SessionEvent) -> (&'static str, serde_json::Value) {
    match event {
        SessionEvent::StateChanged(state) => ("call:state_changed", serde_json::json!(state)),
        SessionEvent::ParticipantJoined { uid } => {
            ("call:participant_joined", serde_json::json!({ "uid": uid }))
        }
        SessionEvent::ParticipantLeft { uid, reason } => (
            "call:participant_left",
            serde_json::json!({ "uid": uid, "reason": reason }),
        ),
        SessionEvent::BackgroundStaged(source) => {
            ("background:staged", serde_json::json!(source))
        }
        SessionEvent::WaitingChanged(waiting) => {
            ("background:waiting", serde_json::json!(waiting))
        }
        SessionEvent::BackgroundApplied { enabled, reason } => (
            "background:applied",
            serde_json::json!({ "enabled": enabled, "reason": reason }),
        ),
        SessionEvent::Notice(notice) => ("notice", serde_json::json!(notice)),
    }
}
