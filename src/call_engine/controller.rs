//! Session Controller
//!
//! Besitzt das Engine-Handle und die Call-State-Maschine:
//!
//! ```text
//! Uninitialized -> Initializing -> Ready -> Joining -> InCall -> Leaving -> Ready
//! ```
//!
//! Kommandos (`initialize`, `start_call`, `end_call`) warten jeden
//! Engine-Aufruf sequenziell ab. Engine-Events laufen über einen einzigen
//! Kanal in `handle_event` und werden in Ankunftsreihenfolge verarbeitet.

use super::engine::{
    CallState, EngineError, EngineEvent, EngineFactory, RtcEngine, VirtualBackgroundReason,
};
use super::roster::ParticipantRoster;
use crate::background::{BackgroundSource, StageView};
use crate::config::SessionConfig;
use crate::events::SessionEvent;
use crate::notice::{Notice, NoticeKind};
use crate::permissions::PermissionRequester;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Lokale UID 0: die Engine vergibt die UID selbst
pub const AUTO_ASSIGN_UID: u32 = 0;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session already initialized")]
    AlreadyInitialized,

    #[error("Engine initialization failed: {0}")]
    InitFailed(EngineError),

    #[error("Cannot start call in state {0:?}")]
    NotReady(CallState),

    #[error("Background source is still being prepared")]
    BackgroundPending,

    #[error("No active call (state {0:?})")]
    NoActiveCall(CallState),

    #[error("Call was ended before the join was issued")]
    JoinAborted,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

// ============================================================================
// SESSION STATE
// ============================================================================

#[derive(Debug, Clone)]
struct SessionState {
    call: CallState,
    /// Kennung des laufenden Anrufzyklus (Joining bis Ready)
    call_id: Option<Uuid>,
    local_uid: Option<u32>,
    joined_at: Option<DateTime<Utc>>,
    active_background: Option<BackgroundSource>,
    /// Fataler Initialisierungsfehler, sperrt "Start Call" dauerhaft
    fatal: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            call: CallState::Uninitialized,
            call_id: None,
            local_uid: None,
            joined_at: None,
            active_background: None,
            fatal: None,
        }
    }
}

/// Lesbare Momentaufnahme für das Frontend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub call_state: CallState,
    pub call_id: Option<Uuid>,
    pub local_uid: Option<u32>,
    pub joined_at: Option<DateTime<Utc>>,
    pub active_background: Option<BackgroundSource>,
    pub fatal: Option<String>,
    pub channel_name: String,
}

// ============================================================================
// SESSION CONTROLLER
// ============================================================================

pub struct SessionController {
    config: RwLock<SessionConfig>,
    join_timeout: Option<Duration>,
    factory: Arc<dyn EngineFactory>,
    permissions: Arc<dyn PermissionRequester>,
    background: StageView,
    engine: Mutex<Option<Arc<dyn RtcEngine>>>,
    state: RwLock<SessionState>,
    roster: RwLock<ParticipantRoster>,
    event_tx: broadcast::Sender<SessionEvent>,
    state_tx: watch::Sender<CallState>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        join_timeout: Option<Duration>,
        factory: Arc<dyn EngineFactory>,
        permissions: Arc<dyn PermissionRequester>,
        background: StageView,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(CallState::Uninitialized);

        Self {
            config: RwLock::new(config),
            join_timeout,
            factory,
            permissions,
            background,
            engine: Mutex::new(None),
            state: RwLock::new(SessionState::default()),
            roster: RwLock::new(ParticipantRoster::new()),
            event_tx,
            state_tx,
            pump: Mutex::new(None),
        }
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Beobachtet nur den Call-State
    pub fn watch_state(&self) -> watch::Receiver<CallState> {
        self.state_tx.subscribe()
    }

    pub fn call_state(&self) -> CallState {
        self.state.read().call
    }

    pub fn is_joined(&self) -> bool {
        self.call_state() == CallState::InCall
    }

    pub fn participants(&self) -> Vec<u32> {
        self.roster.read().snapshot()
    }

    pub fn background(&self) -> &StageView {
        &self.background
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read();
        SessionSnapshot {
            call_state: state.call,
            call_id: state.call_id,
            local_uid: state.local_uid,
            joined_at: state.joined_at,
            active_background: state.active_background.clone(),
            fatal: state.fatal.clone(),
            channel_name: self.config.read().channel_name.clone(),
        }
    }

    /// Wartet, bis `target` erreicht ist. `false` nach Ablauf von `timeout`.
    pub async fn wait_for(&self, target: CallState, timeout: Duration) -> bool {
        let mut rx = self.state_tx.subscribe();
        let result = tokio::time::timeout(timeout, rx.wait_for(|state| *state == target)).await;
        matches!(result, Ok(Ok(_)))
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    /// Berechtigungen anfragen, Engine erstellen, Video aktivieren
    pub async fn initialize(self: &Arc<Self>) -> Result<(), SessionError> {
        {
            let mut state = self.state.write();
            if state.call != CallState::Uninitialized {
                return Err(SessionError::AlreadyInitialized);
            }
            self.enter(&mut state, CallState::Initializing);
        }

        self.request_permissions().await;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let app_id = self.config.read().app_id.clone();

        let engine = match self.factory.create(&app_id, events_tx).await {
            Ok(engine) => engine,
            Err(e) => return Err(self.fail_init(e)),
        };
        self.spawn_event_pump(events_rx);

        if let Err(e) = engine.enable_video().await {
            engine.destroy().await;
            if let Some(pump) = self.pump.lock().take() {
                pump.abort();
            }
            return Err(self.fail_init(e));
        }

        *self.engine.lock() = Some(engine);

        let mut state = self.state.write();
        self.enter(&mut state, CallState::Ready);
        Ok(())
    }

    /// Hintergrund aktivieren und Channel beitreten
    ///
    /// Nur aus `Ready` und ohne laufende Hintergrund-Bereitstellung erlaubt.
    /// Gibt die Kennung des neuen Anrufzyklus zurück.
    pub async fn start_call(self: &Arc<Self>) -> Result<Uuid, SessionError> {
        let (call_id, engine, source) = {
            let mut state = self.state.write();
            if state.call != CallState::Ready || state.fatal.is_some() {
                tracing::debug!("Rejecting start_call in state {:?}", state.call);
                return Err(SessionError::NotReady(state.call));
            }
            let engine = self
                .engine
                .lock()
                .clone()
                .ok_or(SessionError::NotReady(state.call))?;
            let Some(source) = self.background.acquire() else {
                tracing::debug!("Rejecting start_call while background is pending");
                return Err(SessionError::BackgroundPending);
            };

            let call_id = Uuid::new_v4();
            state.call_id = Some(call_id);
            state.active_background = Some(source.clone());
            self.enter(&mut state, CallState::Joining);
            (call_id, engine, source)
        };

        tracing::info!(%call_id, "Starting call with background {:?}", source);

        // Reihenfolge ist fest: Hintergrund vor dem Join
        if let Err(e) = engine.enable_virtual_background(true, &source).await {
            self.abort_join(call_id, &e);
            return Err(e.into());
        }

        if !self.is_current(call_id, CallState::Joining) {
            return Err(SessionError::JoinAborted);
        }

        let (token, channel_name) = {
            let config = self.config.read();
            (config.token.clone(), config.channel_name.clone())
        };

        if let Err(e) = engine
            .join_channel(token.as_deref(), &channel_name, None, AUTO_ASSIGN_UID)
            .await
        {
            self.abort_join(call_id, &e);
            return Err(e.into());
        }

        // end_call kann während joinChannel gelaufen sein
        let (live, other_call) = {
            let state = self.state.read();
            let active = matches!(state.call, CallState::Joining | CallState::InCall);
            let ours = state.call_id == Some(call_id);
            (active && ours, active && !ours)
        };
        if !live {
            tracing::info!(%call_id, "Call ended while joining");
            if !other_call {
                if let Err(e) = engine.leave_channel().await {
                    tracing::warn!("leaveChannel after aborted join failed: {}", e);
                }
            }
            return Err(SessionError::JoinAborted);
        }

        if let Some(timeout) = self.join_timeout {
            self.spawn_join_watchdog(call_id, timeout);
        }

        Ok(call_id)
    }

    /// Channel verlassen und lokalen Zustand zurücksetzen
    ///
    /// Wartet nicht auf eine Leave-Bestätigung der Engine.
    pub async fn end_call(&self) -> Result<(), SessionError> {
        let call_id = {
            let mut state = self.state.write();
            match state.call {
                CallState::InCall | CallState::Joining => {}
                other => return Err(SessionError::NoActiveCall(other)),
            }
            self.enter(&mut state, CallState::Leaving);
            self.roster.write().clear();
            state.call_id
        };

        tracing::info!(call_id = ?call_id, "Ending call");
        self.leave().await;
        Ok(())
    }

    /// Neues Token übernehmen und an eine laufende Sitzung weitergeben
    pub async fn renew_token(&self, token: String) -> Result<(), SessionError> {
        self.config.write().token = Some(token.clone());

        let active = matches!(self.call_state(), CallState::Joining | CallState::InCall);
        let engine = self.engine.lock().clone();
        if let (true, Some(engine)) = (active, engine) {
            engine.renew_token(&token).await?;
            tracing::info!("Token renewed");
        }
        Ok(())
    }

    /// Anruf beenden, Engine freigeben, zurück nach `Uninitialized`
    pub async fn shutdown(&self) {
        if matches!(self.call_state(), CallState::InCall | CallState::Joining) {
            let _ = self.end_call().await;
        }

        let engine = self.engine.lock().take();
        if let Some(engine) = engine {
            engine.destroy().await;
        }
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }

        let mut state = self.state.write();
        self.roster.write().clear();
        *state = SessionState {
            call: state.call,
            ..SessionState::default()
        };
        self.enter(&mut state, CallState::Uninitialized);
        drop(state);

        self.background.release();
        tracing::info!("Session shut down");
    }

    // ========================================================================
    // ENGINE EVENTS
    // ========================================================================

    /// Zentrale Dispatch-Funktion für alle Engine-Events
    pub fn handle_event(&self, event: EngineEvent) {
        tracing::debug!("Engine event {}: {:?}", event.name(), event);

        match event {
            EngineEvent::Warning { code } => {
                self.notify(Notice::new(
                    NoticeKind::EngineWarning { code },
                    format!("Engine warning {}", code),
                ));
            }

            EngineEvent::Error { code } => {
                self.notify(Notice::new(
                    NoticeKind::EngineError { code },
                    format!("Engine error {}", code),
                ));
            }

            EngineEvent::VirtualBackgroundSourceEnabled { enabled, reason } => {
                if reason == VirtualBackgroundReason::Success {
                    tracing::info!("Virtual background enabled: {}", enabled);
                } else {
                    tracing::warn!("Virtual background not applied: {:?}", reason);
                }
                let _ = self
                    .event_tx
                    .send(SessionEvent::BackgroundApplied { enabled, reason });
            }

            EngineEvent::UserJoined { uid, elapsed_ms } => {
                let state = self.state.read();
                if state.call != CallState::InCall {
                    tracing::debug!("Ignoring UserJoined({}) in state {:?}", uid, state.call);
                    return;
                }
                if self.roster.write().on_joined(uid) {
                    tracing::info!("User {} joined after {} ms", uid, elapsed_ms);
                    let _ = self.event_tx.send(SessionEvent::ParticipantJoined { uid });
                }
            }

            EngineEvent::UserOffline { uid, reason } => {
                if self.roster.write().on_left(uid) {
                    tracing::info!("User {} offline ({:?})", uid, reason);
                    let _ = self
                        .event_tx
                        .send(SessionEvent::ParticipantLeft { uid, reason });
                }
            }

            EngineEvent::JoinChannelSuccess {
                channel,
                uid,
                elapsed_ms,
            } => {
                let mut state = self.state.write();
                if state.call != CallState::Joining {
                    tracing::debug!(
                        "Ignoring JoinChannelSuccess for {} in state {:?}",
                        channel,
                        state.call
                    );
                    return;
                }
                tracing::info!(
                    call_id = ?state.call_id,
                    "Joined {} as {} after {} ms",
                    channel,
                    uid,
                    elapsed_ms
                );
                self.roster.write().clear();
                state.local_uid = Some(uid);
                state.joined_at = Some(Utc::now());
                self.enter(&mut state, CallState::InCall);
            }

            EngineEvent::LeaveChannel => {
                tracing::debug!("Engine confirmed leaveChannel");
            }

            EngineEvent::TokenPrivilegeWillExpire { .. } => {
                self.notify(Notice::new(
                    NoticeKind::TokenExpiring,
                    "Channel token will expire soon",
                ));
            }
        }
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    /// Setzt den State und sendet Events; Aufrufer hält den State-Lock
    fn enter(&self, state: &mut SessionState, next: CallState) {
        tracing::info!("Call state: {:?} -> {:?}", state.call, next);
        state.call = next;
        self.state_tx.send_replace(next);
        let _ = self.event_tx.send(SessionEvent::StateChanged(next));
    }

    fn notify(&self, notice: Notice) {
        notice.log();
        let _ = self.event_tx.send(SessionEvent::Notice(notice));
    }

    fn is_current(&self, call_id: Uuid, call: CallState) -> bool {
        let state = self.state.read();
        state.call == call && state.call_id == Some(call_id)
    }

    async fn request_permissions(&self) {
        match self.permissions.request_camera_and_microphone().await {
            Ok(grant) if grant.is_complete() => {
                tracing::info!("Camera and microphone permissions granted");
            }
            Ok(grant) => self.notify(Notice::new(
                NoticeKind::PermissionDenied,
                format!(
                    "Permissions incomplete (camera: {}, microphone: {})",
                    grant.camera, grant.microphone
                ),
            )),
            Err(e) => self.notify(Notice::new(NoticeKind::PermissionDenied, e.to_string())),
        }
    }

    /// Fataler Init-Fehler: State bleibt `Initializing`, kein Retry
    fn fail_init(&self, error: EngineError) -> SessionError {
        self.state.write().fatal = Some(error.to_string());
        self.notify(Notice::new(
            NoticeKind::EngineInitFailure,
            format!("Could not initialize engine: {}", error),
        ));
        SessionError::InitFailed(error)
    }

    /// Fehlgeschlagenes Kommando während `Joining`: zurück nach `Ready`
    fn abort_join(&self, call_id: Uuid, error: &EngineError) {
        {
            let mut state = self.state.write();
            if state.call != CallState::Joining || state.call_id != Some(call_id) {
                tracing::debug!(%call_id, "Ignoring failure of ended call: {}", error);
                return;
            }
            state.call_id = None;
            state.active_background = None;
            self.enter(&mut state, CallState::Ready);
        }

        self.background.release();
        self.notify(Notice::new(
            NoticeKind::EngineError { code: error.code() },
            format!("Could not start call: {}", error),
        ));
    }

    /// Zweite Hälfte von Leaving -> Ready; State ist bereits `Leaving`
    async fn leave(&self) {
        let engine = self.engine.lock().clone();
        if let Some(engine) = engine {
            if let Err(e) = engine.leave_channel().await {
                tracing::warn!("leaveChannel failed, resetting anyway: {}", e);
            }
        }

        {
            let mut state = self.state.write();
            if state.call != CallState::Leaving {
                return;
            }
            state.call_id = None;
            state.local_uid = None;
            state.joined_at = None;
            state.active_background = None;
            self.enter(&mut state, CallState::Ready);
        }
        self.background.release();
    }

    fn spawn_event_pump(self: &Arc<Self>, mut events_rx: mpsc::UnboundedReceiver<EngineEvent>) {
        let controller: Weak<Self> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                controller.handle_event(event);
            }
            tracing::debug!("Engine event stream closed");
        });

        *self.pump.lock() = Some(handle);
    }

    fn spawn_join_watchdog(self: &Arc<Self>, call_id: Uuid, timeout: Duration) {
        let controller: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(controller) = controller.upgrade() else {
                return;
            };

            {
                let mut state = controller.state.write();
                if state.call != CallState::Joining || state.call_id != Some(call_id) {
                    return;
                }
                controller.enter(&mut state, CallState::Leaving);
                controller.roster.write().clear();
            }

            controller.notify(Notice::new(
                NoticeKind::JoinTimeout,
                format!("No join confirmation within {} ms", timeout.as_millis()),
            ));
            controller.leave().await;
        });
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("config", &*self.config.read())
            .field("state", &self.call_state())
            .field("participants", &self.participants())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
