use std::{path::Path, time::Duration};

use ffmpeg_cmdline_utils::{FfmpegFrameGrabBuilder, FrameGrabFormat, ToolPaths};
use log::trace;

use super::{validate_output, ExtractError, ExtractMode, ExtractorConfig, FrameExtractor};

/// Decodes frames by running one ffmpeg process per frame.
#[derive(Debug, Clone)]
pub struct SubprocessExtractor {
    tool_paths: ToolPaths,
    hw_accel: bool,
    timeout: Duration,
    extra_args: Vec<String>,
}

impl SubprocessExtractor {
    pub fn new(cfg: &ExtractorConfig) -> Self {
        Self {
            tool_paths: cfg.tool_paths.clone(),
            hw_accel: cfg.hw_accel,
            timeout: cfg.timeout,
            extra_args: cfg.extra_args.clone(),
        }
    }

    fn builder(&self, path: &Path, timestamp: Duration) -> FfmpegFrameGrabBuilder {
        let mut builder = FfmpegFrameGrabBuilder::new(path);
        builder
            .ffmpeg_path(&self.tool_paths.ffmpeg)
            .timestamp(timestamp)
            .hw_accel(self.hw_accel)
            .extra_args(&self.extra_args)
            .timeout(self.timeout);
        builder
    }
}

fn grab_format(mode: ExtractMode) -> FrameGrabFormat {
    match mode {
        ExtractMode::GraySample => FrameGrabFormat::GraySample,
        ExtractMode::Thumbnail { width } => FrameGrabFormat::ScaledJpeg { width },
        ExtractMode::FullSize => FrameGrabFormat::FullJpeg,
    }
}

impl FrameExtractor for SubprocessExtractor {
    fn extract(
        &self,
        path: &Path,
        timestamp: Duration,
        mode: ExtractMode,
    ) -> Result<Vec<u8>, ExtractError> {
        let builder = self.builder(path, timestamp);
        let format = grab_format(mode);
        trace!(target: "frame_extract", "ffmpeg {:?}", builder.args(format));

        let bytes = builder.grab(format)?;
        validate_output(bytes, mode)
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}
