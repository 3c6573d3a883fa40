use serde::{Deserialize, Serialize};

/// What the compositor paints before the first layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Background {
    Transparent,
    Opaque([u8; 4]),
}

impl Default for Background {
    fn default() -> Self {
        Background::Opaque([255, 255, 255, 255])
    }
}

impl Background {
    pub fn color(&self) -> [u8; 4] {
        match self {
            Background::Transparent => [0, 0, 0, 0],
            Background::Opaque(c) => [c[0], c[1], c[2], 255],
        }
    }
}

/// Engine-wide settings chosen by the host before a session starts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub background: Background,
    /// Upper clamp for `BrushConfig::size`.
    pub max_brush_size: f32,
    /// Maximum number of undo steps (the redo stack shares the bound).
    pub history_limit: usize,
    /// Tolerance the fill tool starts with (0 = exact match).
    pub fill_tolerance: u8,
    pub min_zoom: f32,
    pub max_zoom: f32,
    /// Zoom change per horizontal pixel of scrub drag.
    pub zoom_scrub_sensitivity: f32,
    /// Brush size change for the `[` / `]` shortcuts.
    pub brush_size_step: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            canvas_width: 800,
            canvas_height: 600,
            background: Background::default(),
            max_brush_size: 500.0,
            history_limit: 50,
            fill_tolerance: 32,
            min_zoom: 0.1,
            max_zoom: 5.0,
            zoom_scrub_sensitivity: 0.005,
            brush_size_step: 5.0,
        }
    }
}

impl EngineConfig {
    pub fn with_canvas_size(mut self, width: u32, height: u32) -> Self {
        self.canvas_width = width.max(1);
        self.canvas_height = height.max(1);
        self
    }

    pub fn clamp_zoom(&self, scale: f32) -> f32 {
        scale.clamp(self.min_zoom, self.max_zoom)
    }
}
