//! Background Module - Virtuelle Hintergründe
//!
//! Dieses Modul verwaltet:
//! - Beschreibung der Hintergrundquelle (Farbe oder Bild)
//! - Auswahl über Galerie, mitgeliefertes Asset oder Farbe
//! - Lokale Bereitstellung von Bildern (Kopie/Download)

mod materialize;
mod picker;
mod resolver;
mod source;

pub use materialize::{FileMaterializer, MaterializeError, Materializer};
pub use picker::{AssetLocator, DirectoryAssets, FixedPick, MediaPicker, PickerError};
pub use resolver::{BackgroundError, BackgroundResolver, Selection, StageView};
pub use source::{BackgroundSource, Color, ColorError};
