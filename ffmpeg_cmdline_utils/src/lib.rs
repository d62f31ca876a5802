#![allow(clippy::let_and_return)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::unwrap_used)]

//! Thin wrappers around the `ffmpeg` and `ffprobe` command line tools.
//!
//! * [`probe_media`] runs ffprobe and parses its JSON output into a [`MediaInfo`].
//! * [`FfmpegFrameGrabBuilder`] seeks to a timestamp and grabs exactly one frame, either as a
//!   32x32 raw grayscale sample or as a JPEG.
//! * [`ToolCommand`] is the process runner underneath both. Every invocation has a hard
//!   wall-clock timeout, after which the child is killed.
//!
//! Nothing here retries. Callers decide what a failure means for the file being processed.

mod ffmpeg_error_kind;
mod ffmpeg_ops;
mod media_info;

pub use ffmpeg_error_kind::*;
pub use ffmpeg_ops::*;
pub use media_info::*;
