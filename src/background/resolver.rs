//! Background Source Resolver
//!
//! Erzeugt aus einer Benutzerauswahl (Galerie, Asset, Farbe) eine
//! `BackgroundSource` und legt sie für den nächsten Anruf bereit.
//!
//! Solange eine Bildquelle kopiert/heruntergeladen wird, ist das
//! Waiting-Flag gesetzt und "Start Call" gesperrt. Jede Auswahl erhält eine
//! Generation; ein überholter Vorgang verwirft sein Ergebnis.
//!
//! Jede Bildauswahl schreibt in eine eigene Datei (`img-<uuid>.png`), eine
//! bereitgestellte Datei wird nie überschrieben. Ersetzte Dateien werden
//! gelöscht, außer der laufende Anruf hält sie gerade (`acquire`/`release`).

use super::materialize::{MaterializeError, Materializer};
use super::picker::{AssetLocator, MediaPicker, PickerError};
use super::source::{BackgroundSource, Color};
use crate::events::SessionEvent;
use crate::notice::{Notice, NoticeKind};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum BackgroundError {
    #[error(transparent)]
    Picker(#[from] PickerError),

    #[error("Failed to stage background image: {0}")]
    Materialize(#[from] MaterializeError),
}

/// Ergebnis einer Auswahl
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// Neue Quelle ist bereitgestellt
    Applied(BackgroundSource),
    /// Benutzer hat den Picker abgebrochen
    Cancelled,
    /// Eine spätere Auswahl hat diese überholt
    Superseded,
}

// ============================================================================
// STAGE
// ============================================================================

#[derive(Debug)]
struct Stage {
    source: BackgroundSource,
    waiting: bool,
    generation: u64,
    /// Bilddatei des laufenden Anrufs
    pinned: Option<PathBuf>,
    /// Ersetzte, aber noch gehaltene Dateien
    retired: Vec<PathBuf>,
}

impl Stage {
    /// Neue Quelle übernehmen; liefert die nicht mehr benötigte Bilddatei
    fn replace(&mut self, source: BackgroundSource) -> Option<PathBuf> {
        let previous = std::mem::replace(&mut self.source, source);
        let path = previous.image_path()?.to_path_buf();

        if self.source.image_path() == Some(path.as_path()) {
            return None;
        }
        if self.pinned.as_deref() == Some(path.as_path()) {
            self.retired.push(path);
            return None;
        }
        Some(path)
    }
}

/// Löscht nicht mehr referenzierte Bilddateien
fn discard(paths: impl IntoIterator<Item = PathBuf>) {
    for path in paths {
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!("Removed stale background {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Could not remove stale background {:?}: {}", path, e),
        }
    }
}

/// Lesezugriff auf die bereitgestellte Quelle (Controller, Frontend)
#[derive(Debug, Clone)]
pub struct StageView {
    inner: Arc<RwLock<Stage>>,
}

impl StageView {
    pub fn current(&self) -> BackgroundSource {
        self.inner.read().source.clone()
    }

    pub fn is_waiting(&self) -> bool {
        self.inner.read().waiting
    }

    /// Quelle und Flag konsistent zusammen lesen
    pub fn snapshot(&self) -> (BackgroundSource, bool) {
        let stage = self.inner.read();
        (stage.source.clone(), stage.waiting)
    }

    /// Übernimmt die aktuelle Quelle für einen Anruf. `None`, solange eine
    /// Auswahl läuft. Die Bilddatei bleibt bis `release` erhalten.
    pub fn acquire(&self) -> Option<BackgroundSource> {
        let mut stage = self.inner.write();
        if stage.waiting {
            return None;
        }
        stage.pinned = stage.source.image_path().map(Path::to_path_buf);
        Some(stage.source.clone())
    }

    /// Gibt die Quelle des beendeten Anrufs frei
    pub fn release(&self) {
        let retired = {
            let mut stage = self.inner.write();
            stage.pinned = None;
            std::mem::take(&mut stage.retired)
        };
        discard(retired);
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

pub struct BackgroundResolver {
    stage: Arc<RwLock<Stage>>,
    materializer: Arc<dyn Materializer>,
    assets: Arc<dyn AssetLocator>,
    bundled_asset: String,
    destination: PathBuf,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl BackgroundResolver {
    /// Startet mit weißem Hintergrund und gesetztem Waiting-Flag, bis der
    /// Benutzer explizit eine Quelle wählt. `destination` ist die
    /// Namensvorlage der bereitgestellten Bilddateien.
    pub fn new(
        materializer: Arc<dyn Materializer>,
        assets: Arc<dyn AssetLocator>,
        bundled_asset: impl Into<String>,
        destination: impl Into<PathBuf>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            stage: Arc::new(RwLock::new(Stage {
                source: BackgroundSource::default(),
                waiting: true,
                generation: 0,
                pinned: None,
                retired: Vec::new(),
            })),
            materializer,
            assets,
            bundled_asset: bundled_asset.into(),
            destination: destination.into(),
            event_tx,
        }
    }

    pub fn view(&self) -> StageView {
        StageView {
            inner: Arc::clone(&self.stage),
        }
    }

    pub fn current(&self) -> BackgroundSource {
        self.stage.read().source.clone()
    }

    pub fn is_waiting(&self) -> bool {
        self.stage.read().waiting
    }

    /// Flache Farbe, synchron und immer erfolgreich
    pub fn select_color(&self, color: Color) -> BackgroundSource {
        let source = BackgroundSource::color(color);
        let (was_waiting, obsolete) = {
            let mut stage = self.stage.write();
            stage.generation += 1;
            let obsolete = stage.replace(source.clone());
            (std::mem::replace(&mut stage.waiting, false), obsolete)
        };
        discard(obsolete);

        tracing::info!("Background staged: {:?}", source);
        let _ = self.event_tx.send(SessionEvent::BackgroundStaged(source.clone()));
        if was_waiting {
            let _ = self.event_tx.send(SessionEvent::WaitingChanged(false));
        }
        source
    }

    /// Bild aus der Galerie wählen und lokal bereitstellen
    pub async fn select_image(
        &self,
        picker: &dyn MediaPicker,
    ) -> Result<Selection, BackgroundError> {
        let ticket = self.begin();

        let uri = match picker.pick_image().await {
            Ok(Some(uri)) => uri,
            Ok(None) => {
                tracing::info!("Image selection cancelled");
                self.finish(ticket, None);
                return Ok(Selection::Cancelled);
            }
            Err(e) => {
                self.fail(ticket, &e.to_string());
                return Err(e.into());
            }
        };

        self.stage_uri(ticket, &uri).await
    }

    /// Mitgeliefertes Asset lokal bereitstellen
    pub async fn select_bundled_asset(&self) -> Result<Selection, BackgroundError> {
        let ticket = self.begin();

        let uri = match self.assets.resolve(&self.bundled_asset) {
            Ok(uri) => uri,
            Err(e) => {
                self.fail(ticket, &e.to_string());
                return Err(e.into());
            }
        };

        self.stage_uri(ticket, &uri).await
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    async fn stage_uri(&self, ticket: u64, uri: &str) -> Result<Selection, BackgroundError> {
        let target = self.staged_path();
        tracing::debug!("Materializing background {} -> {:?}", uri, target);

        match self.materializer.materialize(uri, &target).await {
            Ok(path) => {
                let source = BackgroundSource::image(&path);
                if self.finish(ticket, Some(source.clone())) {
                    Ok(Selection::Applied(source))
                } else {
                    tracing::debug!("Background selection {} superseded", ticket);
                    discard([path]);
                    Ok(Selection::Superseded)
                }
            }
            Err(e) => {
                self.fail(ticket, &e.to_string());
                Err(e.into())
            }
        }
    }

    /// Eigene Zieldatei pro Auswahl neben `destination`
    fn staged_path(&self) -> PathBuf {
        let stem = self
            .destination
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "background".to_string());
        let id = Uuid::new_v4().simple();

        let name = match self.destination.extension() {
            Some(ext) => format!("{}-{}.{}", stem, id, ext.to_string_lossy()),
            None => format!("{}-{}", stem, id),
        };
        self.destination.with_file_name(name)
    }

    /// Neue Generation beginnen und Waiting-Flag setzen
    fn begin(&self) -> u64 {
        let (ticket, was_waiting) = {
            let mut stage = self.stage.write();
            stage.generation += 1;
            (stage.generation, std::mem::replace(&mut stage.waiting, true))
        };

        if !was_waiting {
            let _ = self.event_tx.send(SessionEvent::WaitingChanged(true));
        }
        ticket
    }

    /// Schließt einen Vorgang ab; nur die aktuelle Generation darf schreiben
    fn finish(&self, ticket: u64, source: Option<BackgroundSource>) -> bool {
        let obsolete = {
            let mut stage = self.stage.write();
            if stage.generation != ticket {
                return false;
            }
            stage.waiting = false;
            source.clone().and_then(|source| stage.replace(source))
        };
        discard(obsolete);

        if let Some(source) = source {
            tracing::info!("Background staged: {:?}", source);
            let _ = self.event_tx.send(SessionEvent::BackgroundStaged(source));
        }
        let _ = self.event_tx.send(SessionEvent::WaitingChanged(false));
        true
    }

    /// Fehlschlag: vorherige Quelle bleibt, Flag wird zurückgesetzt
    fn fail(&self, ticket: u64, reason: &str) {
        if self.finish(ticket, None) {
            let notice = Notice::new(
                NoticeKind::BackgroundStagingFailure,
                format!("Could not stage background image: {}", reason),
            );
            notice.log();
            let _ = self.event_tx.send(SessionEvent::Notice(notice));
        }
    }
}

impl std::fmt::Debug for BackgroundResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stage = self.stage.read();
        f.debug_struct("BackgroundResolver")
            .field("source", &stage.source)
            .field("waiting", &stage.waiting)
            .field("destination", &self.destination)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::{DirectoryAssets, FileMaterializer, FixedPick};
    use crate::events::event_channel;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Notify;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("backdrop-res-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn resolver_in(dir: &Path) -> BackgroundResolver {
        BackgroundResolver::new(
            Arc::new(FileMaterializer::new()),
            Arc::new(DirectoryAssets::new(dir.join("assets"))),
            "img.png",
            dir.join("docs").join("img.png"),
            event_channel(),
        )
    }

    fn staged_file(source: &BackgroundSource) -> PathBuf {
        source.image_path().expect("image source").to_path_buf()
    }

    fn staged_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<_> = std::fs::read_dir(dir.join("docs"))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        files.sort();
        files
    }

    /// HTTP-Server, der erst nach `delay` antwortet
    async fn serve_slowly(delay: Duration, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            tokio::time::sleep(delay).await;
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(header.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{}/slow.png", addr)
    }

    /// Materializer, der erst nach `notify_one` fertig wird
    struct GatedMaterializer {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl Materializer for GatedMaterializer {
        async fn materialize(&self, _uri: &str, dest: &Path) -> Result<PathBuf, MaterializeError> {
            self.gate.notified().await;
            Ok(dest.to_path_buf())
        }
    }

    #[test]
    fn test_initial_state_waits_for_selection() {
        let dir = temp_dir();
        let resolver = resolver_in(&dir);

        assert!(resolver.is_waiting());
        assert_eq!(resolver.current(), BackgroundSource::color(Color::WHITE));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_color_clears_waiting_synchronously() {
        let dir = temp_dir();
        let resolver = resolver_in(&dir);

        let source = resolver.select_color(Color::RED);

        assert!(!resolver.is_waiting());
        assert_eq!(source, BackgroundSource::color(Color::RED));
        assert_eq!(resolver.view().snapshot(), (source, false));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_pick_image_stages_local_copy() {
        let dir = temp_dir();
        let picked = dir.join("gallery.png");
        std::fs::write(&picked, b"gallery").unwrap();
        let resolver = resolver_in(&dir);
        let mut events = resolver.event_tx.subscribe();

        let selection = resolver
            .select_image(&FixedPick::uri(picked.to_str().unwrap()))
            .await
            .unwrap();

        let expected = resolver.current();
        let staged = staged_file(&expected);
        assert_eq!(selection, Selection::Applied(expected.clone()));
        assert_eq!(staged.parent(), Some(dir.join("docs").as_path()));
        assert!(staged.file_name().unwrap().to_str().unwrap().starts_with("img-"));
        assert_eq!(staged.extension().unwrap(), "png");
        assert!(!resolver.is_waiting());
        assert_eq!(std::fs::read(&staged).unwrap(), b"gallery");

        assert_eq!(
            events.recv().await.unwrap(),
            SessionEvent::BackgroundStaged(expected)
        );
        assert_eq!(events.recv().await.unwrap(), SessionEvent::WaitingChanged(false));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_pick_keeps_previous_source() {
        let dir = temp_dir();
        let resolver = resolver_in(&dir);
        resolver.select_color(Color::RED);

        let selection = resolver.select_image(&FixedPick::cancelled()).await.unwrap();

        assert_eq!(selection, Selection::Cancelled);
        assert_eq!(resolver.current(), BackgroundSource::color(Color::RED));
        assert!(!resolver.is_waiting());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_failed_materialization_is_fail_soft() {
        let dir = temp_dir();
        let resolver = resolver_in(&dir);
        resolver.select_color(Color::RED);
        let before = resolver.current();
        let mut events = resolver.event_tx.subscribe();

        let missing = dir.join("gone.png");
        let result = resolver
            .select_image(&FixedPick::uri(missing.to_str().unwrap()))
            .await;

        assert!(matches!(result, Err(BackgroundError::Materialize(_))));
        assert_eq!(resolver.current(), before);
        assert!(!resolver.is_waiting());

        assert_eq!(events.recv().await.unwrap(), SessionEvent::WaitingChanged(true));
        assert_eq!(events.recv().await.unwrap(), SessionEvent::WaitingChanged(false));
        match events.recv().await.unwrap() {
            SessionEvent::Notice(notice) => {
                assert_eq!(notice.kind, NoticeKind::BackgroundStagingFailure)
            }
            other => panic!("unexpected event {:?}", other),
        }
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_bundled_asset() {
        let dir = temp_dir();
        std::fs::create_dir_all(dir.join("assets")).unwrap();
        std::fs::write(dir.join("assets/img.png"), b"bundled").unwrap();
        let resolver = resolver_in(&dir);

        let selection = resolver.select_bundled_asset().await.unwrap();

        assert_eq!(selection, Selection::Applied(resolver.current()));
        assert_eq!(std::fs::read(staged_file(&resolver.current())).unwrap(), b"bundled");
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_missing_bundled_asset_lowers_flag() {
        let dir = temp_dir();
        let resolver = resolver_in(&dir);

        let result = resolver.select_bundled_asset().await;

        assert!(matches!(
            result,
            Err(BackgroundError::Picker(PickerError::AssetNotFound(_)))
        ));
        assert!(!resolver.is_waiting());
        assert_eq!(resolver.current(), BackgroundSource::default());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_waiting_while_pending_and_color_supersedes() {
        let gate = Arc::new(Notify::new());
        let resolver = Arc::new(BackgroundResolver::new(
            Arc::new(GatedMaterializer {
                gate: Arc::clone(&gate),
            }),
            Arc::new(DirectoryAssets::new("assets")),
            "img.png",
            "/tmp/never-written.png",
            event_channel(),
        ));
        resolver.select_color(Color::WHITE);

        let pending = {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move {
                resolver
                    .select_image(&FixedPick::uri("file:///tmp/whatever.png"))
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert!(resolver.is_waiting());

        resolver.select_color(Color::RED);
        assert!(!resolver.is_waiting());

        gate.notify_one();
        let selection = pending.await.unwrap().unwrap();

        assert_eq!(selection, Selection::Superseded);
        assert_eq!(resolver.current(), BackgroundSource::color(Color::RED));
        assert!(!resolver.is_waiting());
    }

    #[tokio::test]
    async fn test_superseded_download_leaves_newer_image_intact() {
        let dir = temp_dir();
        let fresh = dir.join("fresh.png");
        std::fs::write(&fresh, b"FRESH").unwrap();
        let resolver = Arc::new(resolver_in(&dir));

        let slow_url = serve_slowly(Duration::from_millis(300), b"STALE").await;
        let slow = {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.select_image(&FixedPick::uri(slow_url)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = resolver
            .select_image(&FixedPick::uri(fresh.to_str().unwrap()))
            .await
            .unwrap();
        let first = slow.await.unwrap().unwrap();

        assert_eq!(first, Selection::Superseded);
        assert_eq!(second, Selection::Applied(resolver.current()));
        let staged = staged_file(&resolver.current());
        assert_eq!(std::fs::read(&staged).unwrap(), b"FRESH");
        assert_eq!(staged_files(&dir), vec![staged]);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_replaced_image_is_removed() {
        let dir = temp_dir();
        let picked = dir.join("gallery.png");
        std::fs::write(&picked, b"gallery").unwrap();
        let resolver = resolver_in(&dir);
        let pick = FixedPick::uri(picked.to_str().unwrap());

        resolver.select_image(&pick).await.unwrap();
        let first = staged_file(&resolver.current());
        resolver.select_image(&pick).await.unwrap();
        let second = staged_file(&resolver.current());

        assert_ne!(first, second);
        assert!(!first.exists());
        assert_eq!(staged_files(&dir), vec![second]);

        resolver.select_color(Color::RED);
        assert!(staged_files(&dir).is_empty());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_acquired_image_survives_until_release() {
        let dir = temp_dir();
        let picked = dir.join("gallery.png");
        std::fs::write(&picked, b"gallery").unwrap();
        let resolver = resolver_in(&dir);
        let view = resolver.view();
        let pick = FixedPick::uri(picked.to_str().unwrap());

        resolver.select_image(&pick).await.unwrap();
        let in_call = view.acquire().unwrap();
        resolver.select_image(&pick).await.unwrap();
        resolver.select_color(Color::RED);

        assert_eq!(std::fs::read(staged_file(&in_call)).unwrap(), b"gallery");

        view.release();
        assert!(!staged_file(&in_call).exists());
        assert!(staged_files(&dir).is_empty());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_acquire_refused_while_waiting() {
        let dir = temp_dir();
        let resolver = resolver_in(&dir);

        assert_eq!(resolver.view().acquire(), None);
        resolver.select_color(Color::RED);
        assert_eq!(
            resolver.view().acquire(),
            Some(BackgroundSource::color(Color::RED))
        );
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
