//! Loopback Engine
//!
//! In-Process-Engine ohne Medien und Netzwerk. Bestätigt Joins sofort,
//! meldet den Hintergrund-Status und protokolliert alle Kommandos. Über
//! `LoopbackHandle` lassen sich Remote-Teilnehmer simulieren.

use super::engine::{
    EngineError, EngineEvent, EngineFactory, EventSink, OfflineReason, RtcEngine,
    VirtualBackgroundReason,
};
use crate::background::BackgroundSource;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;

/// Fehlercodes wie bei nativen Engines
const ERR_NOT_INITIALIZED: i32 = 7;
const ERR_NOT_SUPPORTED: i32 = 4;
const ERR_JOIN_CHANNEL_REJECTED: i32 = 17;
const ERR_LEAVE_CHANNEL_REJECTED: i32 = 18;

// ============================================================================
// OPTIONS & COMMANDS
// ============================================================================

#[derive(Debug, Clone)]
pub struct LoopbackOptions {
    pub fail_create: bool,
    pub fail_enable_video: bool,
    pub fail_virtual_background: bool,
    pub fail_join: bool,
    pub fail_leave: bool,
    /// `false` simuliert einen hängenden Join
    pub confirm_join: bool,
    /// LeaveChannel-Event nach leaveChannel senden
    pub ack_leave: bool,
    /// UID, die bei `local_uid == 0` vergeben wird
    pub assigned_uid: u32,
    /// joinChannel kehrt erst nach `notify_one` zurück
    pub hold_join: Option<Arc<Notify>>,
}

impl Default for LoopbackOptions {
    fn default() -> Self {
        Self {
            fail_create: false,
            fail_enable_video: false,
            fail_virtual_background: false,
            fail_join: false,
            fail_leave: false,
            confirm_join: true,
            ack_leave: true,
            assigned_uid: 1,
            hold_join: None,
        }
    }
}

/// Protokollierte Engine-Aufrufe
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    EnableVideo,
    EnableVirtualBackground {
        enabled: bool,
        source: BackgroundSource,
    },
    JoinChannel {
        token: Option<String>,
        channel_name: String,
        info: Option<String>,
        local_uid: u32,
    },
    LeaveChannel,
    RenewToken(String),
    Destroy,
}

#[derive(Default)]
struct Shared {
    commands: Mutex<Vec<EngineCommand>>,
    events: Mutex<Option<EventSink>>,
}

impl Shared {
    fn record(&self, command: EngineCommand) {
        tracing::debug!("Loopback engine: {:?}", command);
        self.commands.lock().push(command);
    }

    fn emit(&self, event: EngineEvent) -> bool {
        match self.events.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

// ============================================================================
// HANDLE
// ============================================================================

/// Steuer- und Beobachtungszugriff von außen
#[derive(Clone)]
pub struct LoopbackHandle {
    shared: Arc<Shared>,
}

impl LoopbackHandle {
    pub fn commands(&self) -> Vec<EngineCommand> {
        self.shared.commands.lock().clone()
    }

    /// Schiebt ein beliebiges Event in den Controller
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.shared.emit(event)
    }

    pub fn remote_join(&self, uid: u32) -> bool {
        self.emit(EngineEvent::UserJoined { uid, elapsed_ms: 0 })
    }

    pub fn remote_leave(&self, uid: u32, reason: OfflineReason) -> bool {
        self.emit(EngineEvent::UserOffline { uid, reason })
    }
}

impl std::fmt::Debug for LoopbackHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackHandle")
            .field("commands", &self.shared.commands.lock().len())
            .field("connected", &self.shared.events.lock().is_some())
            .finish()
    }
}

// ============================================================================
// FACTORY
// ============================================================================

pub struct LoopbackFactory {
    options: LoopbackOptions,
    shared: Arc<Shared>,
}

impl LoopbackFactory {
    pub fn new(options: LoopbackOptions) -> Self {
        Self {
            options,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[async_trait]
impl EngineFactory for LoopbackFactory {
    async fn create(
        &self,
        app_id: &str,
        events: EventSink,
    ) -> Result<Arc<dyn RtcEngine>, EngineError> {
        if self.options.fail_create || app_id.is_empty() {
            return Err(EngineError::Create(format!("invalid app id '{}'", app_id)));
        }

        *self.shared.events.lock() = Some(events);
        tracing::info!("Loopback engine created");

        Ok(Arc::new(LoopbackEngine {
            options: self.options.clone(),
            shared: Arc::clone(&self.shared),
            created_at: Instant::now(),
        }))
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct LoopbackEngine {
    options: LoopbackOptions,
    shared: Arc<Shared>,
    created_at: Instant,
}

impl LoopbackEngine {
    fn elapsed_ms(&self) -> u32 {
        u32::try_from(self.created_at.elapsed().as_millis()).unwrap_or(u32::MAX)
    }
}

#[async_trait]
impl RtcEngine for LoopbackEngine {
    async fn enable_video(&self) -> Result<(), EngineError> {
        self.shared.record(EngineCommand::EnableVideo);
        if self.options.fail_enable_video {
            return Err(EngineError::Rejected {
                operation: "enableVideo",
                code: ERR_NOT_INITIALIZED,
            });
        }
        Ok(())
    }

    async fn enable_virtual_background(
        &self,
        enabled: bool,
        source: &BackgroundSource,
    ) -> Result<(), EngineError> {
        self.shared.record(EngineCommand::EnableVirtualBackground {
            enabled,
            source: source.clone(),
        });
        if self.options.fail_virtual_background {
            return Err(EngineError::Rejected {
                operation: "enableVirtualBackground",
                code: ERR_NOT_SUPPORTED,
            });
        }

        let reason = match source.image_path() {
            Some(path) if !path.is_file() => VirtualBackgroundReason::ImageNotExist,
            _ => VirtualBackgroundReason::Success,
        };
        self.shared.emit(EngineEvent::VirtualBackgroundSourceEnabled {
            enabled: enabled && reason == VirtualBackgroundReason::Success,
            reason,
        });
        Ok(())
    }

    async fn join_channel(
        &self,
        token: Option<&str>,
        channel_name: &str,
        info: Option<&str>,
        local_uid: u32,
    ) -> Result<(), EngineError> {
        self.shared.record(EngineCommand::JoinChannel {
            token: token.map(str::to_string),
            channel_name: channel_name.to_string(),
            info: info.map(str::to_string),
            local_uid,
        });
        if let Some(gate) = &self.options.hold_join {
            gate.notified().await;
        }
        if self.options.fail_join {
            return Err(EngineError::Rejected {
                operation: "joinChannel",
                code: ERR_JOIN_CHANNEL_REJECTED,
            });
        }

        if self.options.confirm_join {
            let uid = if local_uid == 0 {
                self.options.assigned_uid
            } else {
                local_uid
            };
            self.shared.emit(EngineEvent::JoinChannelSuccess {
                channel: channel_name.to_string(),
                uid,
                elapsed_ms: self.elapsed_ms(),
            });
        }
        Ok(())
    }

    async fn leave_channel(&self) -> Result<(), EngineError> {
        self.shared.record(EngineCommand::LeaveChannel);
        if self.options.fail_leave {
            return Err(EngineError::Rejected {
                operation: "leaveChannel",
                code: ERR_LEAVE_CHANNEL_REJECTED,
            });
        }
        if self.options.ack_leave {
            self.shared.emit(EngineEvent::LeaveChannel);
        }
        Ok(())
    }

    async fn renew_token(&self, token: &str) -> Result<(), EngineError> {
        self.shared.record(EngineCommand::RenewToken(token.to_string()));
        Ok(())
    }

    async fn destroy(&self) {
        self.shared.record(EngineCommand::Destroy);
        // Sender fallen lassen, damit die Event-Schleife endet
        self.shared.events.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::Color;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_join_is_confirmed_with_assigned_uid() {
        let factory = LoopbackFactory::new(LoopbackOptions {
            assigned_uid: 77,
            ..LoopbackOptions::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = factory.create("app", tx).await.unwrap();

        engine.join_channel(None, "channel-x", None, 0).await.unwrap();

        match rx.recv().await.unwrap() {
            EngineEvent::JoinChannelSuccess { channel, uid, .. } => {
                assert_eq!(channel, "channel-x");
                assert_eq!(uid, 77);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_image_reports_image_not_exist() {
        let factory = LoopbackFactory::new(LoopbackOptions::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = factory.create("app", tx).await.unwrap();

        engine
            .enable_virtual_background(true, &BackgroundSource::image("/nonexistent/bg.png"))
            .await
            .unwrap();
        engine
            .enable_virtual_background(true, &BackgroundSource::color(Color::RED))
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::VirtualBackgroundSourceEnabled {
                enabled: false,
                reason: VirtualBackgroundReason::ImageNotExist,
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::VirtualBackgroundSourceEnabled {
                enabled: true,
                reason: VirtualBackgroundReason::Success,
            }
        );
    }

    #[tokio::test]
    async fn test_destroy_closes_event_stream() {
        let factory = LoopbackFactory::new(LoopbackOptions::default());
        let handle = factory.handle();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let engine = factory.create("app", tx).await.unwrap();

        engine.destroy().await;
        drop(engine);

        assert!(!handle.remote_join(5));
        assert_eq!(rx.recv().await, None);
        assert_eq!(handle.commands(), vec![EngineCommand::Destroy]);
    }

    #[tokio::test]
    async fn test_create_rejects_empty_app_id() {
        let factory = LoopbackFactory::new(LoopbackOptions::default());
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(matches!(
            factory.create("", tx).await,
            Err(EngineError::Create(_))
        ));
    }
}
