use std::time::Duration;

use gstreamer::{prelude::*, ClockTime, CoreError, MessageView, SeekFlags, StateChangeSuccess};

use gstreamer_video::VideoFrameExt;

/// Pixel layout of a grabbed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrabFormat {
    /// 8 bits per pixel grayscale.
    Gray8,
    /// 32 bits per pixel, blue-green-red-alpha byte order.
    Bgra,
}

impl GrabFormat {
    fn gst_video_format(self) -> gstreamer_video::VideoFormat {
        match self {
            Self::Gray8 => gstreamer_video::VideoFormat::Gray8,
            Self::Bgra => gstreamer_video::VideoFormat::Bgra,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::Bgra => 4,
        }
    }
}

/// Output dimensions of a grabbed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrabSize {
    /// Stretch to exactly these dimensions.
    Exact { width: u32, height: u32 },
    /// Scale to this width. The height follows from the display aspect ratio.
    Width(u32),
    /// Keep the source resolution.
    Source,
}

#[derive(Debug, Clone)]
pub struct FrameGrabBuilder {
    uri: String,
    timestamp: Duration,
    format: GrabFormat,
    size: GrabSize,
    timeout: Duration,
}

impl FrameGrabBuilder {
    #[must_use]
    /// Create a [`FrameGrabBuilder`] from the given URI.
    pub fn from_uri(uri: impl AsRef<str>) -> Self {
        Self {
            uri: uri.as_ref().to_string(),
            timestamp: Duration::ZERO,
            format: GrabFormat::Gray8,
            size: GrabSize::Source,
            timeout: Duration::from_secs(15),
        }
    }

    /// Create a [`FrameGrabBuilder`] for a file on disk.
    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, glib::Error> {
        let absolute = std::path::absolute(path.as_ref())
            .map_err(|e| glib::Error::new(gstreamer::ResourceError::NotFound, &e.to_string()))?;
        let uri = glib::filename_to_uri(absolute, None)?;
        Ok(Self::from_uri(uri))
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Seek to this position before grabbing. The frame returned is the keyframe at or
    /// before the position, or the nearest keyframe if that seek is refused.
    pub fn timestamp(&mut self, timestamp: Duration) -> &mut Self {
        self.timestamp = timestamp;
        self
    }

    pub fn format(&mut self, format: GrabFormat) -> &mut Self {
        self.format = format;
        self
    }

    pub fn size(&mut self, size: GrabSize) -> &mut Self {
        self.size = size;
        self
    }

    /// Maximum time to wait for each state change, and for the frame itself.
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;
        self
    }

    fn pipeline_description(&self) -> String {
        let src_path = &self.uri;
        format!(
            "uridecodebin uri=\"{src_path}\" caps=\"video/x-raw(ANY)\" expose-all-streams=false ! videoconvert ! videoscale add-borders=false ! appsink name=sink"
        )
    }

    fn sink_caps(&self) -> gstreamer::Caps {
        let builder = gstreamer::Caps::builder("video/x-raw")
            .field("format", self.format.gst_video_format().to_str());

        let builder = match self.size {
            GrabSize::Exact { width, height } => builder
                .field("width", width as i32)
                .field("height", height as i32),
            GrabSize::Width(width) => builder
                .field("width", width as i32)
                .field("pixel-aspect-ratio", gstreamer::Fraction::new(1, 1)),
            GrabSize::Source => builder,
        };

        builder.build()
    }

    /// Decode and return a single frame.
    pub fn grab(&self) -> Result<GrabbedFrame, glib::Error> {
        crate::init_gstreamer()?;

        let pipeline = gstreamer::parse::launch(&self.pipeline_description())?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| glib::Error::new(CoreError::Failed, "Expected a gstreamer::Pipeline"))?;

        // From here on the guard drives the pipeline to Null on every exit path.
        let pipeline = PipelineGuard { pipeline };

        let appsink = pipeline
            .pipeline
            .by_name("sink")
            .and_then(|sink| sink.downcast::<gstreamer_app::AppSink>().ok())
            .ok_or_else(|| glib::Error::new(CoreError::Failed, "appsink element not found"))?;

        // Don't synchronize on the clock.
        appsink.set_property("sync", false);

        // Only the prerolled frame is wanted.
        appsink.set_max_buffers(1);
        appsink.set_drop(false);
        appsink.set_caps(Some(&self.sink_caps()));

        let timeout =
            ClockTime::from_nseconds(u64::try_from(self.timeout.as_nanos()).unwrap_or(u64::MAX));

        change_state_blocking(&pipeline.pipeline, gstreamer::State::Paused, timeout)?;

        if !self.timestamp.is_zero() {
            pipeline.seek_keyframe(self.timestamp, timeout)?;
        }

        let sample = match appsink.try_pull_preroll(timeout) {
            Some(sample) => sample,
            None => {
                let bus_error = pipeline.pipeline.bus().and_then(|bus| {
                    let first_error = get_bus_errors(&bus).next();
                    first_error
                });
                return Err(bus_error.unwrap_or_else(|| {
                    glib::Error::new(CoreError::TooLazy, "Gstreamer timed out waiting for a frame")
                }));
            }
        };

        GrabbedFrame::from_sample(&sample, self.format)
    }
}

// Must ensure all refcounted gobjects are cleaned up by the glib runtime.
// This won't happen unless we set the pipeline state to null.
struct PipelineGuard {
    pipeline: gstreamer::Pipeline,
}

impl PipelineGuard {
    fn seek_keyframe(&self, timestamp: Duration, timeout: ClockTime) -> Result<(), glib::Error> {
        let position =
            ClockTime::from_nseconds(u64::try_from(timestamp.as_nanos()).unwrap_or(u64::MAX));

        let backward = SeekFlags::FLUSH | SeekFlags::KEY_UNIT | SeekFlags::SNAP_BEFORE;
        let nearest = SeekFlags::FLUSH | SeekFlags::KEY_UNIT | SeekFlags::SNAP_NEAREST;

        if self.pipeline.seek_simple(backward, position).is_err() {
            self.pipeline
                .seek_simple(nearest, position)
                .map_err(|e| glib::Error::new(CoreError::Seek, &e.message))?;
        }

        // A flushing seek while paused makes the pipeline preroll again.
        wait_for_state_change(&self.pipeline, timeout, None)
    }
}

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        let _state_error = self.pipeline.set_state(gstreamer::State::Null);
    }
}

fn change_state_blocking(
    pipeline: &gstreamer::Pipeline,
    new_state: gstreamer::State,
    timeout: ClockTime,
) -> Result<(), glib::Error> {
    use StateChangeSuccess::*;

    match pipeline.set_state(new_state) {
        Ok(Success | NoPreroll) => Ok(()),
        Ok(Async) => wait_for_state_change(pipeline, timeout, None),
        Err(e) => wait_for_state_change(pipeline, ClockTime::ZERO, Some(e)),
    }
}

fn wait_for_state_change(
    pipeline: &gstreamer::Pipeline,
    timeout: ClockTime,
    earlier_error: Option<gstreamer::StateChangeError>,
) -> Result<(), glib::Error> {
    use StateChangeSuccess::*;

    let state_change_error = match earlier_error {
        Some(e) => Some(e),
        None => {
            let (result, _curr, _pending) = pipeline.state(timeout);
            match result {
                Ok(Success | NoPreroll) => return Ok(()),

                //state change did not finish within timeout. Treat as error
                Ok(Async) => None,
                Err(e) => Some(e),
            }
        }
    };

    //If there was any error on the bus then return that.
    //If no error but timed out then say so.
    let bus_error = pipeline.bus().and_then(|bus| {
        let first_error = get_bus_errors(&bus).next();
        first_error
    });
    Err(bus_error.unwrap_or_else(|| match state_change_error {
        Some(_) => glib::Error::new(CoreError::StateChange, "Gstreamer State Change Error"),
        None => glib::Error::new(CoreError::TooLazy, "Gstreamer timed out changing state"),
    }))
}

fn into_glib_error(msg: gstreamer::Message) -> Option<glib::Error> {
    match msg.view() {
        MessageView::Error(e) => Some(e.error()),
        MessageView::Warning(w) => Some(w.error()),
        _ => None,
    }
}

// Drain all error and warning messages from the bus.
//(This prevents messages piling up and causing memory leaks)
fn get_bus_errors(bus: &gstreamer::Bus) -> impl Iterator<Item = glib::Error> + '_ {
    let errs_warns = [
        gstreamer::MessageType::Error,
        gstreamer::MessageType::Warning,
    ];

    std::iter::from_fn(move || bus.pop_filtered(&errs_warns)).filter_map(into_glib_error)
}

/// A single decoded frame, copied out of gstreamer's buffer with the row padding removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrabbedFrame {
    width: u32,
    height: u32,
    format: GrabFormat,
    data: Vec<u8>,
}

impl GrabbedFrame {
    fn from_sample(sample: &gstreamer::Sample, format: GrabFormat) -> Result<Self, glib::Error> {
        let caps = sample
            .caps()
            .ok_or_else(|| glib::Error::new(CoreError::Negotiation, "Sample without caps"))?;
        let info = gstreamer_video::VideoInfo::from_caps(caps)
            .map_err(|e| glib::Error::new(CoreError::Negotiation, &e.message))?;

        let buffer = sample
            .buffer_owned()
            .ok_or_else(|| glib::Error::new(CoreError::Failed, "Sample without buffer"))?;

        let frame = gstreamer_video::VideoFrame::from_buffer_readable(buffer, &info)
            .map_err(|_| glib::Error::new(CoreError::Failed, "Failed to map buffer readable"))?;

        let plane = frame
            .plane_data(0)
            .map_err(|e| glib::Error::new(CoreError::Failed, &e.message))?;
        let stride = frame.plane_stride()[0] as usize;

        Self::from_strided(frame.width(), frame.height(), format, plane, stride)
            .ok_or_else(|| glib::Error::new(CoreError::Failed, "Frame smaller than its caps"))
    }

    // Copy each row out of a buffer whose rows may be padded to `stride` bytes.
    pub(crate) fn from_strided(
        width: u32,
        height: u32,
        format: GrabFormat,
        plane: &[u8],
        stride: usize,
    ) -> Option<Self> {
        let row_len = width as usize * format.bytes_per_pixel();
        let mut data = Vec::with_capacity(row_len * height as usize);

        for y in 0..height as usize {
            let start = y * stride;
            data.extend_from_slice(plane.get(start..start + row_len)?);
        }

        Some(Self {
            width,
            height,
            format,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> GrabFormat {
        self.format
    }

    /// Tightly packed pixel data, row-major.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Copy a grayscale frame into an [`image::GrayImage`]. Returns None for color frames.
    pub fn to_gray_image(&self) -> Option<image::GrayImage> {
        match self.format {
            GrabFormat::Gray8 => {
                image::GrayImage::from_raw(self.width, self.height, self.data.clone())
            }
            GrabFormat::Bgra => None,
        }
    }

    /// Copy a color frame into an [`image::RgbaImage`]. Returns None for grayscale frames.
    pub fn to_rgba_image(&self) -> Option<image::RgbaImage> {
        match self.format {
            GrabFormat::Bgra => {
                let rgba = self
                    .data
                    .chunks_exact(4)
                    .flat_map(|px| [px[2], px[1], px[0], px[3]])
                    .collect::<Vec<_>>();
                image::RgbaImage::from_raw(self.width, self.height, rgba)
            }
            GrabFormat::Gray8 => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_row_padding_is_removed() {
        #[rustfmt::skip]
        let plane = [
            1, 2, 3, 0xff,
            4, 5, 6, 0xff,
        ];
        let frame = GrabbedFrame::from_strided(3, 2, GrabFormat::Gray8, &plane, 4).unwrap();
        assert_eq!(frame.as_bytes(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(frame.to_gray_image().unwrap().get_pixel(2, 1).0, [6]);
        assert!(frame.to_rgba_image().is_none());
    }

    #[test]
    fn test_short_plane_is_rejected() {
        let plane = [0u8; 7];
        assert!(GrabbedFrame::from_strided(2, 2, GrabFormat::Bgra, &plane, 8).is_none());
    }

    #[test]
    fn test_bgra_to_rgba() {
        let plane = [10, 20, 30, 255];
        let frame = GrabbedFrame::from_strided(1, 1, GrabFormat::Bgra, &plane, 4).unwrap();
        let rgba = frame.to_rgba_image().unwrap();
        assert_eq!(rgba.get_pixel(0, 0).0, [30, 20, 10, 255]);
    }

    #[test]
    fn test_pipeline_description_quotes_uri() {
        let builder = FrameGrabBuilder::from_uri("file:///vids/a%20b.mp4");
        let desc = builder.pipeline_description();
        assert!(desc.starts_with("uridecodebin uri=\"file:///vids/a%20b.mp4\""));
        assert!(desc.ends_with("appsink name=sink"));
    }

    #[test]
    fn test_missing_file_is_error() {
        let mut builder = FrameGrabBuilder::from_uri("file:///definitely/not/here.mp4");
        builder
            .timestamp(Duration::from_secs(1))
            .size(GrabSize::Exact {
                width: 32,
                height: 32,
            })
            .timeout(Duration::from_secs(2));
        assert!(builder.grab().is_err());
    }
}
