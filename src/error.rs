use std::path::PathBuf;

use thiserror::Error;

/// Failure taxonomy for the capture/match pipeline. Per-frame glitches
/// during a scan are deliberately not represented here: they are caught in
/// the scan loop, logged, and counted instead of propagated.
#[derive(Debug, Error)]
pub enum Error {
    /// Unreadable or unsupported video/image file, or a malformed query.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Encoding store file does not exist.
    #[error("encoding store not found: {}", .0.display())]
    StoreNotFound(PathBuf),

    /// Encoding store file exists but matches neither supported schema.
    #[error("corrupt encoding store {}", .path.display())]
    CorruptStore {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Matching was requested but no encodings could be loaded.
    #[error("no face encodings loaded; run `analyze` first")]
    NotLoaded,

    /// The video source cannot be opened or validated at all.
    #[error("cannot open video source: {0}")]
    VideoOpen(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
