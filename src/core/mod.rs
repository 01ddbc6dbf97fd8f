//! Core library modules for butterfly-tiles
//!
//! Internal implementation of the tile cache, loader and search engine.

pub mod astar;
pub mod cache;
pub mod config;
pub mod context;
pub mod corridor;
pub mod diagnostics;
pub mod disk;
pub mod error;
pub mod geo;
pub mod loader;
pub mod mode;
pub mod multi_stop;
pub mod request;
pub mod source;
pub mod store;
pub mod tile;
