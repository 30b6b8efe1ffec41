//! Mask-based image extraction.
//!
//! Strokes drawn over a fitted, zoomable display surface are mapped into
//! source pixel space, rasterized into masks and composited against the
//! source to produce cut-outs. A colour-coded garment classification map
//! can stand in for hand-drawn strokes. [`MattingSession`] ties the pieces
//! together and keeps the stroke and image undo histories.

pub mod app;
pub mod canvas;
pub mod cli;
pub mod components;
pub mod error;
pub mod gallery;
pub mod io;
pub mod logger;
pub mod ops;
pub mod settings;

pub use app::{MattingSession, PointerEvent, PointerOutcome};
pub use canvas::{DerivedImage, ImagePlacement, Mask, Point, Resolution};
pub use components::tools::{DrawMode, PathCommand, StrokeEvent, StrokeRole};
pub use error::{MattingError, Result};
pub use io::OutputMode;
pub use ops::classify::GarmentClass;
pub use ops::composite::MaskPolicy;
pub use settings::EngineSettings;
