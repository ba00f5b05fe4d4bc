//! Backdrop - Video-Call-Client mit virtuellem Hintergrund
//!
//! Kern eines mobilen Clients, der einem RTC-Channel beitritt und auf das
//! lokale Kamerabild einen virtuellen Hintergrund (Farbe oder Bild) legt:
//! - Auswahl und lokale Bereitstellung der Hintergrundquelle
//! - Call-State-Maschine über der externen RTC-Engine
//! - Verwaltung der Remote-Teilnehmer
//! - Lese-Sicht für das Frontend

pub mod background;
pub mod call_engine;
pub mod config;
pub mod events;
pub mod notice;
pub mod permissions;
pub mod presentation;

use background::{
    AssetLocator, BackgroundError, BackgroundResolver, BackgroundSource, Color, DirectoryAssets,
    FileMaterializer, Materializer, MediaPicker, Selection,
};
use call_engine::{
    EngineFactory, LoopbackFactory, LoopbackHandle, LoopbackOptions, SessionController,
    SessionError,
};
use config::AppConfig;
use events::SessionEvent;
use notice::Notice;
use parking_lot::Mutex;
use permissions::{AssumeGranted, PermissionRequester};
use presentation::CallView;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use uuid::Uuid;

// ============================================================================
// LOGGING
// ============================================================================

/// Standard-Filter, falls `RUST_LOG` nicht gesetzt ist
pub const DEFAULT_LOG_FILTER: &str = "backdrop_lib=debug,backdrop=debug,reqwest=warn";

/// Initialisiert das Logging; weitere Aufrufe sind wirkungslos
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ============================================================================
// COLLABORATORS
// ============================================================================

/// Externe Abhängigkeiten des Kerns
pub struct Collaborators {
    pub engine: Arc<dyn EngineFactory>,
    pub permissions: Arc<dyn PermissionRequester>,
    pub materializer: Arc<dyn Materializer>,
    pub assets: Arc<dyn AssetLocator>,
}

impl Collaborators {
    /// Loopback-Engine mit Dateisystem-Assets, ohne Berechtigungsdialog
    pub fn loopback(config: &AppConfig, options: LoopbackOptions) -> (Self, LoopbackHandle) {
        let factory = LoopbackFactory::new(options);
        let handle = factory.handle();

        let collaborators = Self {
            engine: Arc::new(factory),
            permissions: Arc::new(AssumeGranted),
            materializer: Arc::new(FileMaterializer::new()),
            assets: Arc::new(DirectoryAssets::new(&config.asset_dir)),
        };
        (collaborators, handle)
    }
}

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Verbindet Controller, Resolver und Event-Bus und bietet die
/// Kommandos für das Frontend an
pub struct App {
    config: AppConfig,
    controller: Arc<SessionController>,
    resolver: BackgroundResolver,
    event_tx: broadcast::Sender<SessionEvent>,
    notices: Mutex<NoticeTracker>,
}

struct NoticeTracker {
    rx: broadcast::Receiver<SessionEvent>,
    last: Option<Notice>,
}

impl App {
    pub fn new(config: AppConfig, collaborators: Collaborators) -> Self {
        let event_tx = events::event_channel();

        let resolver = BackgroundResolver::new(
            collaborators.materializer,
            collaborators.assets,
            config.bundled_asset.clone(),
            config.background_path(),
            event_tx.clone(),
        );

        let controller = Arc::new(SessionController::new(
            config.session.clone(),
            config.join_timeout,
            collaborators.engine,
            collaborators.permissions,
            resolver.view(),
            event_tx.clone(),
        ));

        let notices = Mutex::new(NoticeTracker {
            rx: event_tx.subscribe(),
            last: None,
        });

        tracing::info!("App created for channel '{}'", config.session.channel_name);

        Self {
            config,
            controller,
            resolver,
            event_tx,
            notices,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    // ========================================================================
    // COMMANDS - SESSION
    // ========================================================================

    /// Initialisiert die Engine (einmalig beim Start)
    pub async fn start(&self) -> Result<(), SessionError> {
        self.controller.initialize().await
    }

    pub async fn start_call(&self) -> Result<Uuid, SessionError> {
        self.controller.start_call().await
    }

    pub async fn end_call(&self) -> Result<(), SessionError> {
        self.controller.end_call().await
    }

    pub async fn renew_token(&self, token: String) -> Result<(), SessionError> {
        self.controller.renew_token(token).await
    }

    pub async fn shutdown(&self) {
        self.controller.shutdown().await;
    }

    // ========================================================================
    // COMMANDS - BACKGROUND
    // ========================================================================

    pub async fn select_image(
        &self,
        picker: &dyn MediaPicker,
    ) -> Result<Selection, BackgroundError> {
        self.resolver.select_image(picker).await
    }

    pub async fn select_bundled_asset(&self) -> Result<Selection, BackgroundError> {
        self.resolver.select_bundled_asset().await
    }

    pub fn select_color(&self, color: Color) -> BackgroundSource {
        self.resolver.select_color(color)
    }

    // ========================================================================
    // VIEW
    // ========================================================================

    /// Aktuelle Sicht für das Frontend
    pub fn view(&self) -> CallView {
        let last_notice = {
            let mut tracker = self.notices.lock();
            loop {
                match tracker.rx.try_recv() {
                    Ok(SessionEvent::Notice(notice)) => tracker.last = Some(notice),
                    Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
            tracker.last.clone()
        };

        CallView::capture(&self.controller, last_notice)
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("controller", &self.controller)
            .field("resolver", &self.resolver)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
