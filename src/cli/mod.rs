//! CLI-specific utilities for butterfly-tiles
//!
//! Code used only by the command-line interface, kept apart from the library.

pub mod progress;

pub use progress::ProgressManager;
