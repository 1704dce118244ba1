// THEORY:
// The `error` module is the single vocabulary of failure for the library. Every
// fallible operation returns `Result<T>`, and the binaries turn any `VisionError`
// into the uniform `{"error": ...}` JSON shape at their top level.
//
// Note what is *not* here: a failed alignment. Too few keypoints, ambiguous matches,
// or a degenerate homography all degrade to "no alignment" inside the Alignment
// Engine and never surface as an error.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisionError {
    /// An image file could not be opened or decoded.
    #[error("failed to load image {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A feedback payload or parameter file was not valid JSON for its schema.
    #[error("malformed JSON payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("invalid detection parameters: {0}")]
    InvalidParameters(String),

    #[error("image dimensions differ: baseline {baseline:?}, candidate {candidate:?}")]
    DimensionMismatch {
        baseline: (u32, u32),
        candidate: (u32, u32),
    },

    #[error("image has no pixels")]
    EmptyImage,
}

pub type Result<T> = std::result::Result<T, VisionError>;
