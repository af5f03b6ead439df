//! # CLI UI Module
//!
//! Consistent styling and formatting for `bpr` output.
//!
//! ## Design Principles
//!
//! 1. **Scannable**: success or failure is visible at a glance
//! 2. **Accessible**: works without colors (respects `NO_COLOR`)
//! 3. **Scriptable**: every command has a `--json` form on stdout
//!
//! ## Module Structure
//!
//! - `color`: Color mode detection and terminal capability checks
//! - `style`: Message types, prefixes, and styling functions
//! - `format`: Number, latency and text formatters
//! - `table`: Table rendering with comfy-table
//! - `progress`: Spinners and bars for ingestion and evaluation

pub mod color;
pub mod format;
pub mod progress;
pub mod style;
pub mod table;

pub use color::ColorMode;
pub use progress::{Progress, ProgressMode};
pub use style::{MessageType, Style};
