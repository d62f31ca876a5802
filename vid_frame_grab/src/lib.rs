#![allow(clippy::let_and_return)]
#![warn(clippy::redundant_pub_crate)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::unwrap_used)]

//! A crate for seeking into a video file and decoding a single frame, using gstreamer as a backend.
//!
//! Create a [`FrameGrabBuilder`] from a path or URI, choose a timestamp, a pixel format and an
//! output size, then call [`FrameGrabBuilder::grab`]. The frame is decoded, converted and scaled
//! inside gstreamer and handed back as a tightly packed [`GrabbedFrame`].
//!
//! ```no_run
//! use std::time::Duration;
//! use vid_frame_grab::{FrameGrabBuilder, GrabFormat, GrabSize};
//!
//! fn main() -> Result<(), glib::Error> {
//!     let mut builder = FrameGrabBuilder::from_path("vids/dog.1.mp4")?;
//!     builder
//!         .timestamp(Duration::from_secs(5))
//!         .format(GrabFormat::Gray8)
//!         .size(GrabSize::Exact { width: 32, height: 32 });
//!
//!     let frame = builder.grab()?;
//!     assert_eq!(frame.as_bytes().len(), 32 * 32);
//!     Ok(())
//! }
//! ```
//!
//! # Error handling
//! Instead of defining its own error type this crate uses the libglib [`glib::Error`] type. You can handle errors by switching on the `matches` method
//! from [`glib::Error`].
//!
//! # Resource handling
//! Every pipeline is owned by a guard which sets it to the `Null` state when dropped, so decoder
//! and scaler resources are released on every exit path, including errors.
//!
//! # Installing
//! You should follow the detailed instructions written for gstreamer-rs [here.](https://github.com/sdroege/gstreamer-rs#installation)

use std::sync::OnceLock;

/// Functions for decoding on your Nvidia GPU.
pub mod hw_accel;
mod frame_grab;

pub use frame_grab::FrameGrabBuilder;
pub use frame_grab::GrabFormat;
pub use frame_grab::GrabSize;
pub use frame_grab::GrabbedFrame;

pub use hw_accel::*;

static GSTREAMER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Initialize gstreamer. Only the first call does any work; later calls return the first result.
/// Every function in this crate calls this for you.
pub fn init_gstreamer() -> Result<(), glib::Error> {
    GSTREAMER_INIT
        .get_or_init(|| gstreamer::init().map_err(|e| e.to_string()))
        .clone()
        .map_err(|msg| glib::Error::new(gstreamer::CoreError::Failed, &msg))
}
