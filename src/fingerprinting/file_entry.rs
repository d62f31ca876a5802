use std::{
    collections::BTreeMap,
    fmt,
    ops::BitOr,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};

use crate::{definitions::DEFAULT_SAMPLE_COUNT, MediaDescription};

/// Per-file status bits.
///
/// All operations are pure: `set` and `clear` return a new value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileFlags(u32);

impl FileFlags {
    pub const NONE: Self = Self(0);
    pub const IS_IMAGE: Self = Self(1 << 0);
    pub const MANUALLY_EXCLUDED: Self = Self(1 << 1);
    pub const THUMBNAIL_ERROR: Self = Self(1 << 2);
    pub const METADATA_ERROR: Self = Self(1 << 3);
    pub const TOO_DARK: Self = Self(1 << 4);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True if every bit of `other` is set.
    pub const fn has(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any bit of `other` is set.
    pub const fn any(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn set(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn clear(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for FileFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.set(rhs)
    }
}

impl fmt::Display for FileFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(FileFlags, &str); 5] = [
            (FileFlags::IS_IMAGE, "IS_IMAGE"),
            (FileFlags::MANUALLY_EXCLUDED, "MANUALLY_EXCLUDED"),
            (FileFlags::THUMBNAIL_ERROR, "THUMBNAIL_ERROR"),
            (FileFlags::METADATA_ERROR, "METADATA_ERROR"),
            (FileFlags::TOO_DARK, "TOO_DARK"),
        ];

        let names = NAMES
            .iter()
            .filter(|(flag, _name)| self.has(*flag))
            .map(|(_flag, name)| *name)
            .collect::<Vec<_>>();

        if names.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// A point within a video, as a fraction of its duration.
///
/// Stored as parts per million so that it can be used as an exact, ordered map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SamplePosition(u32);

impl SamplePosition {
    const SCALE: f64 = 1_000_000.0;

    /// The very first frame. Used for still images.
    pub const START: Self = Self(0);

    /// Values outside `0.0..=1.0` are clamped.
    pub fn from_fraction(fraction: f64) -> Self {
        let clamped = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        Self((clamped * Self::SCALE).round() as u32)
    }

    pub fn from_ppm(ppm: u32) -> Self {
        Self(ppm.min(Self::SCALE as u32))
    }

    pub fn ppm(self) -> u32 {
        self.0
    }

    pub fn fraction(self) -> f64 {
        f64::from(self.0) / Self::SCALE
    }

    pub fn timestamp_in(self, duration: Duration) -> Duration {
        duration.mul_f64(self.fraction())
    }
}

impl fmt::Display for SamplePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}%", self.fraction() * 100.0)
    }
}

/// The set of positions sampled from each video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplePositions(Vec<SamplePosition>);

impl SamplePositions {
    /// `count` positions at `i / (count + 1)` for `i` in `1..=count`, so neither the
    /// first nor the last frame is sampled.
    pub fn evenly_spaced(count: usize) -> Self {
        let denom = (count + 1) as f64;
        Self(
            (1..=count)
                .map(|i| SamplePosition::from_fraction(i as f64 / denom))
                .collect(),
        )
    }

    pub fn as_slice(&self) -> &[SamplePosition] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for SamplePositions {
    fn default() -> Self {
        Self::evenly_spaced(DEFAULT_SAMPLE_COUNT)
    }
}

/// Everything known about one media file.
///
/// Fields are serialized under numbers rather than names. New fields take the next unused
/// number and must tolerate being absent, so that previously saved entries keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(rename = "1")]
    pub path: PathBuf,

    #[serde(rename = "2", default)]
    pub folder: PathBuf,

    /// Probed metadata. None for still images and for files that could not be probed.
    #[serde(rename = "3", default)]
    pub media: Option<MediaDescription>,

    /// 32x32 gray samples by position.
    #[serde(rename = "4", default)]
    pub gray_bytes: BTreeMap<SamplePosition, Vec<u8>>,

    #[serde(rename = "5", default)]
    pub phashes: BTreeMap<SamplePosition, u64>,

    #[serde(rename = "6", default)]
    pub flags: FileFlags,

    #[serde(rename = "7", default)]
    pub file_size: u64,

    #[serde(rename = "8", default)]
    pub modified: Option<SystemTime>,

    #[serde(rename = "9", default)]
    pub image_size: Option<(u32, u32)>,
}

impl FileEntry {
    pub fn new(path: impl AsRef<Path>, is_image: bool) -> Self {
        let path = path.as_ref().to_path_buf();
        let folder = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let flags = if is_image {
            FileFlags::IS_IMAGE
        } else {
            FileFlags::NONE
        };

        Self {
            path,
            folder,
            media: None,
            gray_bytes: BTreeMap::new(),
            phashes: BTreeMap::new(),
            flags,
            file_size: 0,
            modified: None,
            image_size: None,
        }
    }

    /// Like [`FileEntry::new`], also recording the size and modification time of the file.
    pub fn from_fs(path: impl AsRef<Path>, is_image: bool) -> std::io::Result<Self> {
        let mut entry = Self::new(path, is_image);
        let metadata = std::fs::metadata(&entry.path)?;
        entry.file_size = metadata.len();
        entry.modified = metadata.modified().ok();
        Ok(entry)
    }

    pub fn is_image(&self) -> bool {
        self.flags.has(FileFlags::IS_IMAGE)
    }

    /// True if the file has not changed size or modification time since this entry was made.
    pub fn matches_fs(&self, metadata: &std::fs::Metadata) -> bool {
        self.file_size == metadata.len() && self.modified == metadata.modified().ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_flag_predicates() {
        let flags = FileFlags::NONE.set(FileFlags::IS_IMAGE | FileFlags::TOO_DARK);
        assert!(flags.has(FileFlags::IS_IMAGE));
        assert!(flags.has(FileFlags::IS_IMAGE | FileFlags::TOO_DARK));
        assert!(!flags.has(FileFlags::IS_IMAGE | FileFlags::METADATA_ERROR));
        assert!(flags.any(FileFlags::METADATA_ERROR | FileFlags::TOO_DARK));
        assert!(!flags.any(FileFlags::THUMBNAIL_ERROR));

        let cleared = flags.clear(FileFlags::TOO_DARK);
        assert_eq!(cleared, FileFlags::IS_IMAGE);
        assert!(cleared.clear(FileFlags::IS_IMAGE).is_empty());

        assert_eq!(flags.to_string(), "IS_IMAGE|TOO_DARK");
        assert_eq!(FileFlags::NONE.to_string(), "NONE");
    }

    #[test]
    fn test_flag_bits_are_stable() {
        // persisted entries depend on these values
        assert_eq!(FileFlags::IS_IMAGE.bits(), 1);
        assert_eq!(FileFlags::MANUALLY_EXCLUDED.bits(), 2);
        assert_eq!(FileFlags::THUMBNAIL_ERROR.bits(), 4);
        assert_eq!(FileFlags::METADATA_ERROR.bits(), 8);
        assert_eq!(FileFlags::TOO_DARK.bits(), 16);
    }

    #[test]
    fn test_evenly_spaced_positions() {
        let positions = SamplePositions::evenly_spaced(4);
        let fractions = positions
            .as_slice()
            .iter()
            .map(|p| p.fraction())
            .collect::<Vec<_>>();
        assert_eq!(fractions, vec![0.2, 0.4, 0.6, 0.8]);

        assert!(SamplePositions::evenly_spaced(0).is_empty());
        assert_eq!(SamplePositions::default().len(), DEFAULT_SAMPLE_COUNT);
    }

    #[test]
    fn test_position_timestamp() {
        let pos = SamplePosition::from_fraction(0.25);
        assert_eq!(pos.timestamp_in(Duration::from_secs(100)), Duration::from_secs(25));
        assert_eq!(SamplePosition::START.timestamp_in(Duration::from_secs(100)), Duration::ZERO);

        assert_eq!(SamplePosition::from_fraction(-3.0), SamplePosition::START);
        assert_eq!(SamplePosition::from_fraction(7.0).ppm(), 1_000_000);
    }

    #[test]
    fn test_new_entry() {
        let entry = FileEntry::new("/videos/holiday/clip.mp4", false);
        assert_eq!(entry.folder, PathBuf::from("/videos/holiday"));
        assert!(!entry.is_image());
        assert!(FileEntry::new("pic.png", true).is_image());
    }
}
