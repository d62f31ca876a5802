use std::{path::Path, sync::Once, time::Duration};

use log::{info, warn};
use vid_frame_grab::{FrameGrabBuilder, GrabFormat, GrabSize};

use super::{
    encode_jpeg, validate_output, ExtractError, ExtractMode, ExtractorConfig, FrameExtractor,
};
use crate::definitions::GRAY_SAMPLE_DIM;

static PRIORITIZE_HW_DECODERS: Once = Once::new();

/// Decodes frames in process with gstreamer.
#[derive(Debug, Clone)]
pub struct NativeExtractor {
    timeout: Duration,
}

impl NativeExtractor {
    pub fn new(cfg: &ExtractorConfig) -> Self {
        if cfg.hw_accel {
            PRIORITIZE_HW_DECODERS.call_once(|| {
                match vid_frame_grab::prioritize_nvidia_gpu_decoding() {
                    Ok(count) => {
                        info!(target: "frame_extract", "Preferring {count} hardware decoders")
                    }
                    Err(e) => {
                        warn!(target: "frame_extract", "Could not prefer hardware decoders: {e}")
                    }
                }
            });
        }

        Self { timeout: cfg.timeout }
    }
}

fn native_err(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Native(e.to_string())
}

impl FrameExtractor for NativeExtractor {
    fn extract(
        &self,
        path: &Path,
        timestamp: Duration,
        mode: ExtractMode,
    ) -> Result<Vec<u8>, ExtractError> {
        let mut builder = FrameGrabBuilder::from_path(path).map_err(native_err)?;
        builder.timestamp(timestamp).timeout(self.timeout);

        let dim = GRAY_SAMPLE_DIM as u32;
        match mode {
            ExtractMode::GraySample => builder.format(GrabFormat::Gray8).size(GrabSize::Exact {
                width: dim,
                height: dim,
            }),
            ExtractMode::Thumbnail { width } => {
                builder.format(GrabFormat::Bgra).size(GrabSize::Width(width))
            }
            ExtractMode::FullSize => builder.format(GrabFormat::Bgra).size(GrabSize::Source),
        };

        let frame = builder.grab().map_err(native_err)?;

        let bytes = match mode {
            ExtractMode::GraySample => frame.into_bytes(),
            ExtractMode::Thumbnail { .. } | ExtractMode::FullSize => {
                let rgba = frame.to_rgba_image().ok_or_else(|| {
                    ExtractError::Native("Decoder returned a frame of the wrong size".to_string())
                })?;
                encode_jpeg(&rgba)?
            }
        };

        validate_output(bytes, mode)
    }

    fn name(&self) -> &'static str {
        "gstreamer"
    }
}
