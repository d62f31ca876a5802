use std::{path::Path, time::Duration};

use ffmpeg_cmdline_utils::{probe_media, ToolPaths};
use log::{debug, warn};

use crate::{
    definitions::TOOL_TIMEOUT,
    fingerprinting::{
        file_entry::{FileEntry, FileFlags},
        Error,
    },
};

/// Container and stream metadata of a media file.
pub type MediaDescription = ffmpeg_cmdline_utils::MediaInfo;
pub use ffmpeg_cmdline_utils::StreamDescription;

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    pub ffprobe: std::path::PathBuf,
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ffprobe: ToolPaths::default().ffprobe,
            timeout: TOOL_TIMEOUT,
        }
    }
}

impl From<&ToolPaths> for ProbeConfig {
    fn from(paths: &ToolPaths) -> Self {
        Self {
            ffprobe: paths.ffprobe.clone(),
            ..Default::default()
        }
    }
}

/// Reads metadata with ffprobe.
#[derive(Debug, Clone, Default)]
pub struct MediaProbe {
    cfg: ProbeConfig,
}

impl MediaProbe {
    pub fn new(cfg: ProbeConfig) -> Self {
        Self { cfg }
    }

    /// Describe a media file. Any failure of ffprobe, including a timeout or output that
    /// cannot be parsed, is an error. A default description is never returned.
    pub fn probe(&self, path: impl AsRef<Path>) -> Result<MediaDescription, Error> {
        let path = path.as_ref();
        probe_media(&self.cfg.ffprobe, path, self.cfg.timeout).map_err(|src| Error::Probe {
            src_path: path.to_path_buf(),
            src,
        })
    }

    /// Probe the file behind `entry` and record the result in it.
    ///
    /// Videos get `media` filled in. Still images get `image_size` from the best video stream
    /// (image decoders show up as video streams). On failure, or for a video whose duration
    /// is unknown, `METADATA_ERROR` is set and false is returned.
    pub fn probe_entry(&self, entry: &mut FileEntry) -> bool {
        record_description(entry, self.probe(&entry.path))
    }
}

fn record_description(entry: &mut FileEntry, described: Result<MediaDescription, Error>) -> bool {
    let media = match described {
        Ok(media) => media,
        Err(e) => {
            warn!(target: "probe", "{e}");
            entry.flags = entry.flags.set(FileFlags::METADATA_ERROR);
            return false;
        }
    };

    if entry.is_image() {
        entry.image_size = Some(media.resolution());
    } else if media.duration.is_zero() {
        //positions are fractions of the duration, so there is nothing to sample.
        warn!(target: "probe", "{}: duration is unknown", entry.path.display());
        entry.media = None;
        entry.flags = entry.flags.set(FileFlags::METADATA_ERROR);
        return false;
    } else {
        debug!(
            target: "probe",
            "{}: {:.3}s, {} streams",
            entry.path.display(),
            media.duration.as_secs_f64(),
            media.streams.len()
        );
        entry.media = Some(media);
    }

    entry.flags = entry.flags.clear(FileFlags::METADATA_ERROR);
    true
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_probe_missing_file_fails() {
        let probe = MediaProbe::default();
        let ret = probe.probe("/definitely/not/a/real/file.mp4");
        assert!(matches!(ret, Err(Error::Probe { .. })));
    }

    #[test]
    fn test_probe_entry_sets_metadata_error() {
        let probe = MediaProbe::new(ProbeConfig {
            ffprobe: "/nonexistent/bin/ffprobe".into(),
            ..Default::default()
        });

        let mut entry = FileEntry::new("/definitely/not/a/real/file.mp4", false);
        assert!(!probe.probe_entry(&mut entry));
        assert!(entry.flags.has(FileFlags::METADATA_ERROR));
        assert!(entry.media.is_none());
    }

    #[test]
    fn test_unknown_duration_is_a_metadata_error() {
        let unknown = MediaDescription::from_ffprobe_json(r#"{"format": {"duration": "N/A"}}"#);

        let mut video = FileEntry::new("/vids/stream_dump.ts", false);
        assert!(!record_description(&mut video, Ok(unknown.clone().unwrap())));
        assert!(video.flags.has(FileFlags::METADATA_ERROR));
        assert!(video.media.is_none());

        //an image has no duration to speak of.
        let mut image = FileEntry::new("/pics/cat.png", true);
        assert!(record_description(&mut image, Ok(unknown.unwrap())));
        assert!(!image.flags.has(FileFlags::METADATA_ERROR));
    }

    #[test]
    fn test_known_duration_is_recorded() {
        let media = MediaDescription {
            duration: Duration::from_secs(90),
            ..Default::default()
        };

        let mut video = FileEntry::new("/vids/cat.mp4", false);
        video.flags = video.flags.set(FileFlags::METADATA_ERROR);
        assert!(record_description(&mut video, Ok(media)));
        assert!(!video.flags.has(FileFlags::METADATA_ERROR));
        assert_eq!(video.media.map(|m| m.duration.as_secs()), Some(90));
    }
}
