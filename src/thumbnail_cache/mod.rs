//! Durable storage for display thumbnails, and an in-memory cache of the decoded bitmaps.

use std::{
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use image::RgbaImage;
use log::trace;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

use crate::frame_extract::{ExtractError, ExtractMode, FrameExtractor};

mod bitmap_lru;
mod pack_store;

pub use bitmap_lru::{Bitmap, BitmapLru};
pub use pack_store::{PackRange, PackSlice, ThumbnailPack, INDEX_FILE_NAME, PACK_FILE_NAME};

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Error accessing cache file {path}: {src}")]
    CacheFileIo { src: std::io::Error, path: PathBuf },

    #[error("Failed to serialize cache index {path}: {src}")]
    Serialization { src: String, path: PathBuf },

    #[error("Failed to deserialize cache index {path}: {src}")]
    Deserialization { src: String, path: PathBuf },

    #[error("Key missing from cache: {0:?}")]
    KeyMissing(ThumbKey),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("Failed to decode cached thumbnail: {0}")]
    Decode(String),
}

/// Key of one thumbnail. A 64 bit xxh3 digest of the source path (and timestamp).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThumbKey(u64);

impl ThumbKey {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn for_path(path: impl AsRef<Path>) -> Self {
        Self(xxh3_64(path.as_ref().to_string_lossy().as_bytes()))
    }

    pub fn for_frame(path: impl AsRef<Path>, timestamp: Duration) -> Self {
        let mut bytes = path.as_ref().to_string_lossy().into_owned().into_bytes();
        bytes.push(0);
        bytes.extend_from_slice(&(timestamp.as_millis() as u64).to_le_bytes());
        Self(xxh3_64(&bytes))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

/// Serves decoded display thumbnails, trying the in-memory cache, then the pack on disk, then
/// extracting a fresh frame (which is written to the pack).
pub struct ThumbnailProvider {
    pack: Arc<ThumbnailPack>,
    bitmaps: BitmapLru<RgbaImage>,
    extractor: Arc<dyn FrameExtractor>,
    width: u32,
}

impl ThumbnailProvider {
    pub fn new(
        pack: Arc<ThumbnailPack>,
        extractor: Arc<dyn FrameExtractor>,
        width: u32,
        bitmap_budget_bytes: usize,
    ) -> Self {
        Self {
            pack,
            bitmaps: BitmapLru::new(bitmap_budget_bytes),
            extractor,
            width,
        }
    }

    pub fn pack(&self) -> &ThumbnailPack {
        &self.pack
    }

    pub fn bitmaps(&self) -> &BitmapLru<RgbaImage> {
        &self.bitmaps
    }

    pub fn thumbnail(&self, path: &Path, timestamp: Duration) -> CacheResult<Arc<RgbaImage>> {
        let key = ThumbKey::for_frame(path, timestamp);

        if let Some(bitmap) = self.bitmaps.get(key) {
            return Ok(bitmap);
        }

        let width = self.width;
        self.pack.append_if_missing(key, |out| {
            trace!(target: "thumbnail_pack", "Extracting thumbnail of {}", path.display());
            let jpeg = self
                .extractor
                .extract(path, timestamp, ExtractMode::Thumbnail { width })?;
            out.write_all(&jpeg)?;
            Ok(())
        })?;

        let mut encoded = vec![];
        self.pack
            .open_key(key)?
            .ok_or(CacheError::KeyMissing(key))?
            .read_to_end(&mut encoded)?;

        let bitmap = image::load_from_memory(&encoded)
            .map_err(|e| CacheError::Decode(e.to_string()))?
            .into_rgba8();

        Ok(self.bitmaps.insert(key, bitmap))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_keys() {
        let a = ThumbKey::for_path("/vids/a.mp4");
        assert_eq!(a, ThumbKey::for_path("/vids/a.mp4"));
        assert_ne!(a, ThumbKey::for_path("/vids/b.mp4"));

        let t1 = ThumbKey::for_frame("/vids/a.mp4", Duration::from_secs(1));
        assert_eq!(t1, ThumbKey::for_frame("/vids/a.mp4", Duration::from_millis(1000)));
        assert_ne!(t1, ThumbKey::for_frame("/vids/a.mp4", Duration::from_secs(2)));
        assert_ne!(t1, a);
    }
}
