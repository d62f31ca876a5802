use std::path::PathBuf;

use ffmpeg_cmdline_utils::FfmpegError;
use thiserror::Error;

pub mod file_entry;
pub mod perceptual_hash;
pub mod sample_orchestrator;
pub mod similarity;
pub mod tonal_variance;

/// Errors from probing, hashing and comparing.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A gray sample of the wrong size was given to the hasher.
    #[error("Gray sample must be {expected} bytes, got {actual}")]
    InvalidSampleLength { expected: usize, actual: usize },

    /// A similarity threshold outside `0.0..=1.0` (or NaN) was given.
    #[error("Similarity threshold must be within 0..=1, got {0}")]
    InvalidThreshold(f64),

    /// ffprobe could not describe the file.
    #[error("Failed to probe {src_path}: {src}")]
    Probe {
        src_path: PathBuf,
        #[source]
        src: FfmpegError,
    },
}
