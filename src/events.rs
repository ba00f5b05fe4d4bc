//! Events für das Frontend
//!
//! Controller und Resolver teilen sich einen `broadcast`-Kanal, über den
//! alle sichtbaren Änderungen gemeldet werden.

use crate::background::BackgroundSource;
use crate::call_engine::{CallState, OfflineReason, VirtualBackgroundReason};
use crate::notice::Notice;
use tokio::sync::broadcast;

/// Kapazität des Event-Kanals
pub const EVENT_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(CallState),
    ParticipantJoined { uid: u32 },
    ParticipantLeft { uid: u32, reason: OfflineReason },
    /// Neue Hintergrundquelle ist bereit für den nächsten Anruf
    BackgroundStaged(BackgroundSource),
    WaitingChanged(bool),
    /// Rückmeldung der Engine zum aktivierten Hintergrund
    BackgroundApplied {
        enabled: bool,
        reason: VirtualBackgroundReason,
    },
    Notice(Notice),
}

pub fn event_channel() -> broadcast::Sender<SessionEvent> {
    let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
    event_tx
}
