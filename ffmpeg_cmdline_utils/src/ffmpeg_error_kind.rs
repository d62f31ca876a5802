use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::*;

/// Various causes of failure for ffmpeg/ffprobe functions.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum FfmpegError {
    /// Ffmpeg/Ffprobe command was not found. Make sure Ffmpeg is installed and can be found on the command line,
    /// or pass the full path to the binary.
    #[error("{0} not found. Make sure ffmpeg/ffprobe are installed and visible on the command line")]
    FfmpegNotFound(String),

    /// Io error occurred while executing Ffmpeg/Ffprobe command
    #[error("Ffmpeg IO error: {0}")]
    Io(String),

    /// Ffmpeg/Ffprobe returned a nonzero exit code. Because ffmpeg sometimes prints long error strings
    /// to stderr, only the last few hundred characters of the error message are kept.
    #[error("Internal Ffmpeg Failure ({status}) running `{command}`: {stderr_tail}")]
    FfmpegInternal {
        command: String,
        status: String,
        stderr_tail: String,
    },

    /// The command did not exit before its deadline and was killed.
    #[error("`{command}` timed out after {timeout:?} and was killed")]
    Timeout { command: String, timeout: Duration },

    /// The command exited successfully but wrote nothing to stdout.
    #[error("`{command}` produced no output")]
    NoOutput { command: String },

    /// A raw frame was requested but the number of bytes produced does not match the requested
    /// frame size.
    #[error("Expected {expected} bytes of raw frame data, got {actual}")]
    WrongOutputSize { expected: usize, actual: usize },

    /// Failed to interpret Ffmpeg/Ffprobe output as a utf8-string.
    #[error("utf8 parsing/conversion failure")]
    Utf8Conversion,

    /// Failed to interpret ffprobe's description of the media file.
    #[error("Failed to get media properties: {0}")]
    Info(#[from] MediaInfoError),
}
