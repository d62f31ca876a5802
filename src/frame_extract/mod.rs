//! Single frame extraction, either in process or through the ffmpeg binary.

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    path::Path,
    time::Duration,
};

use ffmpeg_cmdline_utils::{FfmpegError, ToolPaths};
use image::{buffer::ConvertBuffer, codecs::jpeg::JpegEncoder, RgbImage, RgbaImage};
use log::debug;
use thiserror::Error;

use crate::definitions::{DEFAULT_THUMBNAIL_WIDTH, GRAY_SAMPLE_LEN, TOOL_TIMEOUT};

#[cfg(feature = "gstreamer_backend")]
mod native;
mod subprocess;

#[cfg(feature = "gstreamer_backend")]
pub use native::NativeExtractor;
pub use subprocess::SubprocessExtractor;

const JPEG_QUALITY: u8 = 90;

/// What to extract from a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractMode {
    /// Raw 32x32 8-bit grayscale. Always exactly 1024 bytes.
    GraySample,
    /// A JPEG scaled to this width, keeping the aspect ratio.
    Thumbnail { width: u32 },
    /// A JPEG at the source resolution.
    FullSize,
}

impl ExtractMode {
    pub fn thumbnail() -> Self {
        Self::Thumbnail {
            width: DEFAULT_THUMBNAIL_WIDTH,
        }
    }
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("In-process decoder failed: {0}")]
    Native(String),

    #[error("In-process decoder panicked: {0}")]
    NativePanic(String),

    #[error(transparent)]
    Subprocess(#[from] FfmpegError),

    #[error("Gray sample must be {expected} bytes, got {actual}")]
    WrongSampleSize { expected: usize, actual: usize },

    #[error("Extracted frame was empty")]
    Empty,

    #[error("Failed to encode frame: {0}")]
    Encode(String),
}

/// Decodes single frames out of media files.
///
/// Implementations hold no state between calls that could be corrupted by a failed call, so
/// one extractor can be shared between worker threads.
pub trait FrameExtractor: Send + Sync {
    /// Extract the frame at `timestamp`. Either the complete output for `mode` is returned,
    /// or an error. Never partial output.
    fn extract(
        &self,
        path: &Path,
        timestamp: Duration,
        mode: ExtractMode,
    ) -> Result<Vec<u8>, ExtractError>;

    /// Short name for logging.
    fn name(&self) -> &'static str;
}

/// Which path [`build_extractor`] should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractStrategy {
    /// In-process gstreamer decoding, falling back to ffmpeg on any failure.
    Native,
    /// ffmpeg only.
    Subprocess,
}

impl Default for ExtractStrategy {
    fn default() -> Self {
        if cfg!(feature = "gstreamer_backend") {
            Self::Native
        } else {
            Self::Subprocess
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractorConfig {
    pub strategy: ExtractStrategy,
    pub tool_paths: ToolPaths,
    /// Prefer hardware decoders where available.
    pub hw_accel: bool,
    pub timeout: Duration,
    /// Passed verbatim to ffmpeg before the output target.
    pub extra_args: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            strategy: ExtractStrategy::default(),
            tool_paths: ToolPaths::default(),
            hw_accel: false,
            timeout: TOOL_TIMEOUT,
            extra_args: vec![],
        }
    }
}

/// Tries `primary`, and on any error or panic retries once with `fallback`.
pub struct FallbackExtractor<P, F> {
    primary: P,
    fallback: F,
}

impl<P: FrameExtractor, F: FrameExtractor> FallbackExtractor<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

impl<P: FrameExtractor, F: FrameExtractor> FrameExtractor for FallbackExtractor<P, F> {
    fn extract(
        &self,
        path: &Path,
        timestamp: Duration,
        mode: ExtractMode,
    ) -> Result<Vec<u8>, ExtractError> {
        let primary = AssertUnwindSafe(|| self.primary.extract(path, timestamp, mode));
        let primary_result = catch_unwind(primary).unwrap_or_else(|payload| {
            Err(ExtractError::NativePanic(panic_message(payload.as_ref())))
        });

        match primary_result {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                debug!(
                    target: "frame_extract",
                    "{} failed on {}, retrying with {}: {e}",
                    self.primary.name(),
                    path.display(),
                    self.fallback.name()
                );
                self.fallback.extract(path, timestamp, mode)
            }
        }
    }

    fn name(&self) -> &'static str {
        self.primary.name()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Build the extractor described by `cfg`.
pub fn build_extractor(cfg: &ExtractorConfig) -> Box<dyn FrameExtractor> {
    let subprocess = SubprocessExtractor::new(cfg);

    match cfg.strategy {
        ExtractStrategy::Subprocess => Box::new(subprocess),
        ExtractStrategy::Native => {
            cfg_if::cfg_if! {
                if #[cfg(feature = "gstreamer_backend")] {
                    Box::new(FallbackExtractor::new(NativeExtractor::new(cfg), subprocess))
                } else {
                    log::warn!(
                        target: "frame_extract",
                        "In-process decoding not available in this build. Using ffmpeg"
                    );
                    Box::new(subprocess)
                }
            }
        }
    }
}

/// Check the output of an extractor satisfies the contract of `mode`.
pub(crate) fn validate_output(bytes: Vec<u8>, mode: ExtractMode) -> Result<Vec<u8>, ExtractError> {
    if bytes.is_empty() {
        return Err(ExtractError::Empty);
    }

    if mode == ExtractMode::GraySample && bytes.len() != GRAY_SAMPLE_LEN {
        return Err(ExtractError::WrongSampleSize {
            expected: GRAY_SAMPLE_LEN,
            actual: bytes.len(),
        });
    }

    Ok(bytes)
}

/// JPEG encode a decoded frame. Alpha is dropped.
pub fn encode_jpeg(img: &RgbaImage) -> Result<Vec<u8>, ExtractError> {
    let rgb: RgbImage = img.convert();

    let mut buf = vec![];
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| ExtractError::Encode(e.to_string()))?;

    Ok(buf)
}
