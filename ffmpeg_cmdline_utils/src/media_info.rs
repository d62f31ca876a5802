use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Frame rate reported for a stream whose `num/den` frame rate is malformed or non-positive.
pub const INVALID_FRAME_RATE: f64 = -1.0;

#[derive(Debug, Deserialize, Serialize, Clone, Error)]
pub enum MediaInfoError {
    #[error("Error parsing stats: {0}")]
    JsonError(String),
    #[error("Error parsing stats: {0}")]
    ParseIntError(String),
    #[error("Error parsing duration: {0}")]
    DurationError(String),
}

impl From<serde_json::Error> for MediaInfoError {
    fn from(e: serde_json::Error) -> Self {
        //limit maximum number of characters
        let error_string = format!("{e}").chars().take(500).collect::<String>();
        MediaInfoError::JsonError(error_string)
    }
}

impl From<std::num::ParseIntError> for MediaInfoError {
    fn from(e: std::num::ParseIntError) -> Self {
        MediaInfoError::ParseIntError(format!("{e}"))
    }
}

// The subset of ffprobe's json output that we read. Everything is optional because
// ffprobe omits fields it does not know.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FfprobeOutput {
    streams: Vec<FfprobeStream>,
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FfprobeStream {
    index: Option<u64>,
    codec_name: Option<String>,
    codec_long_name: Option<String>,
    codec_type: Option<String>,
    pix_fmt: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    sample_rate: Option<String>,
    channel_layout: Option<String>,
    bit_rate: Option<String>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    disposition: Option<FfprobeDisposition>,
    side_data_list: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FfprobeDisposition {
    default: i64,
}

/// One stream of a media file, as described by ffprobe.
#[derive(PartialEq, Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StreamDescription {
    pub index: String,
    pub codec_name: String,
    pub codec_long_name: String,
    pub codec_type: String,
    pub pixel_format: String,
    pub width: u32,
    pub height: u32,
    pub sample_rate: Option<u32>,
    pub channel_layout: String,
    /// Bits per second. Video streams that do not declare their own rate inherit the container's.
    pub bit_rate: Option<u64>,
    /// Frames per second, or [`INVALID_FRAME_RATE`].
    pub frame_rate: f64,
    pub is_default: bool,
    /// Display rotation in degrees, one of 0, 90, 180 or 270.
    pub rotation: u32,
}

impl StreamDescription {
    /// Compare the codec type ignoring ASCII case (ffprobe prints "video", other tools "Video").
    pub fn is_codec_type(&self, codec_type: &str) -> bool {
        self.codec_type.eq_ignore_ascii_case(codec_type)
    }

    pub fn is_video(&self) -> bool {
        self.is_codec_type("video")
    }

    pub fn is_audio(&self) -> bool {
        self.is_codec_type("audio")
    }

    pub fn pixel_area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// The resolution of the stream in pixels.
    /// Note the returned value is correct for the orientation that the video is intended
    /// to be viewed. (Ffprobe returns a surprising value by default if the video is stored rotated)
    pub fn display_resolution(&self) -> (u32, u32) {
        match self.rotation {
            90 | 270 => (self.height, self.width),
            _ => (self.width, self.height),
        }
    }
}

/// Container-level description of a media file, as described by ffprobe.
#[derive(PartialEq, Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MediaInfo {
    /// Duration, truncated to whole milliseconds.
    pub duration: Duration,
    pub format_name: String,
    pub container_bit_rate: Option<u64>,
    pub streams: Vec<StreamDescription>,
}

impl MediaInfo {
    /// Parse the output of `ffprobe -print_format json -show_format -show_streams`, with or
    /// without `-sexagesimal`.
    ///
    /// # errors
    /// * The output could not be parsed as JSON
    /// * The container duration is present but unreadable.
    pub fn from_ffprobe_json(json: &str) -> Result<Self, MediaInfoError> {
        let parsed: FfprobeOutput = serde_json::from_str(json)?;

        let duration = match parsed.format.duration.as_deref().map(str::trim) {
            None | Some("N/A") | Some("") => Duration::ZERO,
            Some(text) => parse_duration(text)?,
        };

        let container_bit_rate = parse_opt_u64(parsed.format.bit_rate.as_deref());

        let streams = parsed
            .streams
            .into_iter()
            .map(|stream| StreamDescription::from_ffprobe(stream, container_bit_rate))
            .collect();

        Ok(Self {
            duration,
            format_name: parsed.format.format_name.unwrap_or_default(),
            container_bit_rate,
            streams,
        })
    }

    pub fn video_streams(&self) -> impl Iterator<Item = &StreamDescription> {
        self.streams.iter().filter(|s| s.is_video())
    }

    pub fn audio_streams(&self) -> impl Iterator<Item = &StreamDescription> {
        self.streams.iter().filter(|s| s.is_audio())
    }

    /// The video stream a player would show: the first default-flagged video stream,
    /// or failing that the one with the most pixels.
    pub fn best_video_stream(&self) -> Option<&StreamDescription> {
        self.video_streams().find(|s| s.is_default).or_else(|| {
            self.video_streams().reduce(|best, curr| {
                if curr.pixel_area() > best.pixel_area() {
                    curr
                } else {
                    best
                }
            })
        })
    }

    /// Display resolution of the best video stream, or (0, 0) if there is none.
    pub fn resolution(&self) -> (u32, u32) {
        self.best_video_stream()
            .map(StreamDescription::display_resolution)
            .unwrap_or_default()
    }
}

impl StreamDescription {
    fn from_ffprobe(raw: FfprobeStream, container_bit_rate: Option<u64>) -> Self {
        let codec_type = raw.codec_type.unwrap_or_default();
        let is_video = codec_type.eq_ignore_ascii_case("video");

        //only video streams fall back to the container's bit rate. Audio streams
        //without a declared rate really have none.
        let bit_rate = match parse_opt_u64(raw.bit_rate.as_deref()) {
            Some(rate) => Some(rate),
            None if is_video => container_bit_rate,
            None => None,
        };

        let frame_rate = {
            let avg = raw
                .avg_frame_rate
                .as_deref()
                .map_or(INVALID_FRAME_RATE, parse_frame_rate);
            if avg > 0.0 {
                avg
            } else {
                raw.r_frame_rate
                    .as_deref()
                    .map_or(INVALID_FRAME_RATE, parse_frame_rate)
            }
        };

        let rotation = raw
            .side_data_list
            .as_deref()
            .and_then(|list| list.iter().find_map(|side_data| side_data.get("rotation")))
            .and_then(|rotation| match rotation {
                Value::Number(val) => val.as_i64(),
                Value::String(val) => val.trim().parse::<i64>().ok(),
                _ => None,
            })
            .map_or(0, |degrees| degrees.rem_euclid(360) as u32);

        Self {
            index: raw.index.map(|i| i.to_string()).unwrap_or_default(),
            codec_name: raw.codec_name.unwrap_or_default(),
            codec_long_name: raw.codec_long_name.unwrap_or_default(),
            codec_type,
            pixel_format: raw.pix_fmt.unwrap_or_default(),
            width: raw.width.unwrap_or(0),
            height: raw.height.unwrap_or(0),
            sample_rate: raw.sample_rate.as_deref().and_then(|s| s.trim().parse().ok()),
            channel_layout: raw.channel_layout.unwrap_or_default(),
            bit_rate,
            frame_rate,
            is_default: raw.disposition.is_some_and(|d| d.default != 0),
            rotation: match rotation {
                90 | 180 | 270 => rotation,
                _ => 0,
            },
        }
    }
}

fn parse_opt_u64(text: Option<&str>) -> Option<u64> {
    text.and_then(|t| t.trim().parse::<u64>().ok())
}

/// Parse a `num/den` frame rate. Returns [`INVALID_FRAME_RATE`] if the text is malformed
/// or either term is not positive.
pub fn parse_frame_rate(text: &str) -> f64 {
    let Some((num, den)) = text.split_once('/') else {
        return INVALID_FRAME_RATE;
    };

    match (num.trim().parse::<f64>(), den.trim().parse::<f64>()) {
        (Ok(num), Ok(den)) if num > 0.0 && den > 0.0 && num.is_finite() && den.is_finite() => {
            num / den
        }
        _ => INVALID_FRAME_RATE,
    }
}

/// Parse a duration printed by ffprobe, either sexagesimal (`H:MM:SS.ffffff`) or in
/// plain seconds (`83.456789`). Whole seconds are kept exactly and the fractional part
/// is cropped (not rounded) to milliseconds.
pub fn parse_duration(text: &str) -> Result<Duration, MediaInfoError> {
    let text = text.trim();
    let (clock, fraction) = text.split_once('.').unwrap_or((text, ""));

    if clock.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
        return Err(MediaInfoError::DurationError(text.to_string()));
    }

    let mut whole_secs = 0u64;
    for field in clock.split(':') {
        whole_secs = whole_secs
            .checked_mul(60)
            .and_then(|secs| secs.checked_add(field.parse::<u64>().ok()?))
            .ok_or_else(|| MediaInfoError::DurationError(text.to_string()))?;
    }

    let millis = if fraction.is_empty() {
        0
    } else {
        fraction
            .chars()
            .chain(std::iter::repeat('0'))
            .take(3)
            .collect::<String>()
            .parse::<u64>()?
    };

    Ok(Duration::from_secs(whole_secs) + Duration::from_millis(millis))
}

#[cfg(test)]
mod test {
    use super::*;

    const SAMPLE_JSON: &str = r#"{
        "streams": [
            {
                "index": 0,
                "codec_name": "h264",
                "codec_long_name": "H.264 / AVC / MPEG-4 AVC / MPEG-4 part 10",
                "codec_type": "VIDEO",
                "pix_fmt": "yuv420p",
                "width": 1920,
                "height": 1080,
                "avg_frame_rate": "30000/1001",
                "r_frame_rate": "30000/1001",
                "disposition": { "default": 1 }
            },
            {
                "index": 1,
                "codec_name": "aac",
                "codec_type": "audio",
                "sample_rate": "48000",
                "channel_layout": "stereo",
                "avg_frame_rate": "0/0",
                "disposition": { "default": 1 }
            },
            {
                "index": 2,
                "codec_name": "mjpeg",
                "codec_type": "video",
                "width": 320,
                "height": 240,
                "bit_rate": "1000",
                "avg_frame_rate": "0/0",
                "r_frame_rate": "90000/1",
                "side_data_list": [ { "rotation": -90 } ],
                "disposition": { "default": 0 }
            }
        ],
        "format": {
            "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
            "duration": "0:01:23.456789",
            "bit_rate": "5000000"
        }
    }"#;

    #[test]
    fn test_parse_ffprobe_json() {
        let info = MediaInfo::from_ffprobe_json(SAMPLE_JSON).unwrap();

        assert_eq!(info.duration, Duration::from_millis(83_456));
        assert_eq!(info.streams.len(), 3);
        assert_eq!(info.video_streams().count(), 2);
        assert_eq!(info.audio_streams().count(), 1);

        let main = &info.streams[0];
        assert_eq!(main.index, "0");
        assert!(main.is_video());
        assert!(main.is_default);
        assert_eq!(main.bit_rate, Some(5_000_000));
        assert!((main.frame_rate - 29.97).abs() < 0.01);

        let audio = &info.streams[1];
        assert_eq!(audio.bit_rate, None);
        assert_eq!(audio.sample_rate, Some(48000));
        assert_eq!(audio.frame_rate, INVALID_FRAME_RATE);

        let cover = &info.streams[2];
        assert_eq!(cover.bit_rate, Some(1000));
        assert_eq!(cover.frame_rate, 90000.0);
        assert_eq!(cover.rotation, 270);
        assert_eq!(cover.display_resolution(), (240, 320));

        assert_eq!(info.best_video_stream().map(|s| s.index.as_str()), Some("0"));
        assert_eq!(info.resolution(), (1920, 1080));
    }

    #[test]
    fn test_best_video_stream_falls_back_to_largest() {
        let mut info = MediaInfo::from_ffprobe_json(SAMPLE_JSON).unwrap();
        for stream in info.streams.iter_mut() {
            stream.is_default = false;
        }
        assert_eq!(info.best_video_stream().map(|s| s.width), Some(1920));
    }

    #[test]
    fn test_missing_duration_is_zero() {
        let info = MediaInfo::from_ffprobe_json(r#"{"format": {"duration": "N/A"}}"#).unwrap();
        assert_eq!(info.duration, Duration::ZERO);
        assert!(info.streams.is_empty());
    }

    #[test]
    fn test_malformed_json_is_error() {
        assert!(MediaInfo::from_ffprobe_json("not json").is_err());
        assert!(MediaInfo::from_ffprobe_json(r#"{"format": {"duration": "1:xx:00"}}"#).is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(
            parse_duration("0:01:23.456789").unwrap(),
            Duration::from_millis(83_456)
        );
        assert_eq!(
            parse_duration("1:00:00.000000").unwrap(),
            Duration::from_secs(3600)
        );
        assert_eq!(parse_duration("83.4569").unwrap(), Duration::from_millis(83_456));
        assert_eq!(parse_duration("12").unwrap(), Duration::from_secs(12));
        assert_eq!(parse_duration("0:00:01.5").unwrap(), Duration::from_millis(1500));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("1.2.3").is_err());
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("25/1"), 25.0);
        assert_eq!(parse_frame_rate("0/0"), INVALID_FRAME_RATE);
        assert_eq!(parse_frame_rate("30/0"), INVALID_FRAME_RATE);
        assert_eq!(parse_frame_rate("-30/1"), INVALID_FRAME_RATE);
        assert_eq!(parse_frame_rate("abc"), INVALID_FRAME_RATE);
        assert_eq!(parse_frame_rate("x/1"), INVALID_FRAME_RATE);
    }
}
