//! Error types for butterfly-tiles
//!
//! Provides the error taxonomy shared by the tile loader, caches and search engine.

use std::fmt;

use strsim::jaro_winkler;

use crate::core::tile::TileKey;

/// Suggest the closest known name for a misspelled identifier
///
/// Returns `None` for exact (case-insensitive) matches and for inputs that are
/// too different from every candidate to be a plausible typo.
pub fn suggest_correction(input: &str, candidates: &[&str]) -> Option<String> {
    let input_lower = input.to_lowercase();
    let mut best_match = None;
    let mut best_score = 0.0f64;

    for candidate in candidates {
        if candidate.eq_ignore_ascii_case(input) {
            return None;
        }

        let score = jaro_winkler(&input_lower, &candidate.to_lowercase());
        if score >= 0.8 && score > best_score {
            best_score = score;
            best_match = Some(candidate.to_string());
        }
    }

    best_match
}

/// Main error type for butterfly-tiles operations
#[derive(Debug)]
pub enum Error {
    /// Tile source failed and the disk spill cache had no copy either
    FetchError { tile: TileKey, reason: String },

    /// Start or goal node id is absent from the node index
    NodeNotFound(String),

    /// Invalid request or parameters
    InvalidInput(String),

    /// File I/O error
    IoError(std::io::Error),

    /// Tile or metadata (de)serialization failure
    SerializationError(String),

    /// HTTP-specific error from a tile source
    HttpError(String),

    /// Network connectivity issues
    NetworkError(String),
}

impl Error {
    /// Whether retrying the same operation could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::NetworkError(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::FetchError { tile, reason } => {
                write!(f, "Failed to fetch tile {tile}: {reason}")
            }
            Error::NodeNotFound(id) => {
                write!(f, "Node '{id}' not found in the loaded graph")
            }
            Error::InvalidInput(msg) => {
                write!(f, "Invalid input: {msg}")
            }
            Error::IoError(err) => {
                write!(f, "I/O error: {err}")
            }
            Error::SerializationError(msg) => {
                write!(f, "Serialization error: {msg}")
            }
            Error::HttpError(msg) => {
                write!(f, "HTTP error: {msg}")
            }
            Error::NetworkError(msg) => {
                write!(f, "Network error: {msg}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Error::NetworkError(err.to_string())
        } else {
            Error::HttpError(err.to_string())
        }
    }
}

/// Convenience result type for butterfly-tiles operations
pub type Result<T> = std::result::Result<T, Error>;
