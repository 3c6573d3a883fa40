//! Gesso paint core: stroke engine, layer compositor, patch history and the
//! tool state machine the UI shell drives.
#![allow(clippy::too_many_arguments)]

#[macro_use]
pub mod logger;
pub mod canvas;
pub mod components;
pub mod config;
pub mod error;
pub mod jobs;
pub mod ops;
pub mod session;

pub use canvas::{BlendMode, CanvasState, Layer, LayerRecord, LayerTransform, PixelBuffer, PixelRegion, Selection};
pub use components::history::{HistoryManager, HistoryPatch, HistoryStep};
pub use components::tools::{BrushConfig, ToolKind};
pub use config::{Background, EngineConfig};
pub use error::LayerDataError;
pub use jobs::{JobOutput, JobQueue, JobResult, JobTarget};
pub use ops::compositor::Compositor;
pub use ops::fill::flood_fill;
pub use ops::stroke::{StampPoint, StrokeEngine, TipCache, TipShape};
pub use ops::transform::Affine;
pub use session::{Key, Modifiers, PaintSession, SessionEvent, SessionState, Viewport};
