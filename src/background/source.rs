//! Beschreibung der virtuellen Hintergrundquelle
//!
//! Eine `BackgroundSource` ist unveränderlich und wird immer komplett
//! ersetzt, nie in-place geändert.

use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ColorError {
    #[error("Color component {component} out of range [0, 1]: {value}")]
    OutOfRange { component: &'static str, value: f32 },
}

// ============================================================================
// COLOR
// ============================================================================

/// RGB-Farbe mit normalisierten Komponenten in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Color {
    r: f32,
    g: f32,
    b: f32,
}

impl Color {
    pub const WHITE: Color = Color {
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };
    pub const RED: Color = Color {
        r: 1.0,
        g: 0.0,
        b: 0.0,
    };

    pub fn new(r: f32, g: f32, b: f32) -> Result<Self, ColorError> {
        for (component, value) in [("r", r), ("g", g), ("b", b)] {
            // NaN fällt hier ebenfalls durch
            if !(0.0..=1.0).contains(&value) {
                return Err(ColorError::OutOfRange { component, value });
            }
        }
        Ok(Self { r, g, b })
    }

    pub fn r(&self) -> f32 {
        self.r
    }

    pub fn g(&self) -> f32 {
        self.g
    }

    pub fn b(&self) -> f32 {
        self.b
    }

    /// Packt die Farbe als `0xRRGGBB`, wie es native Engines erwarten
    pub fn to_rgb_u32(&self) -> u32 {
        let channel = |v: f32| (v * 255.0).round() as u32;
        (channel(self.r) << 16) | (channel(self.g) << 8) | channel(self.b)
    }
}

// ============================================================================
// BACKGROUND SOURCE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackgroundSource {
    Color { color: Color },
    /// Lokaler, lesbarer Dateipfad
    Image { path: PathBuf },
}

impl BackgroundSource {
    pub fn color(color: Color) -> Self {
        BackgroundSource::Color { color }
    }

    pub fn image(path: impl Into<PathBuf>) -> Self {
        BackgroundSource::Image { path: path.into() }
    }

    pub fn image_path(&self) -> Option<&Path> {
        match self {
            BackgroundSource::Image { path } => Some(path),
            BackgroundSource::Color { .. } => None,
        }
    }
}

impl Default for BackgroundSource {
    fn default() -> Self {
        BackgroundSource::color(Color::WHITE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_range() {
        assert!(Color::new(0.0, 0.5, 1.0).is_ok());
        assert_eq!(
            Color::new(1.2, 0.0, 0.0),
            Err(ColorError::OutOfRange {
                component: "r",
                value: 1.2
            })
        );
        assert!(Color::new(0.0, -0.1, 0.0).is_err());
        assert!(Color::new(0.0, 0.0, f32::NAN).is_err());
    }

    #[test]
    fn test_rgb_packing() {
        assert_eq!(Color::WHITE.to_rgb_u32(), 0xFFFFFF);
        assert_eq!(Color::RED.to_rgb_u32(), 0xFF0000);
        assert_eq!(Color::new(0.0, 0.0, 0.5).unwrap().to_rgb_u32(), 0x000080);
    }

    #[test]
    fn test_default_is_white() {
        assert_eq!(
            BackgroundSource::default(),
            BackgroundSource::color(Color::WHITE)
        );
        assert_eq!(BackgroundSource::default().image_path(), None);
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(BackgroundSource::image("/data/img.png")).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["path"], "/data/img.png");
    }
}
