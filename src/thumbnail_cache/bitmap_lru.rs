use std::sync::Arc;

use image::{DynamicImage, RgbaImage};
use lru::LruCache;
use parking_lot::Mutex;

use super::ThumbKey;

const BYTES_PER_PIXEL: usize = 4;

/// Anything with pixel dimensions that can be costed in the LRU.
pub trait Bitmap {
    fn pixel_dimensions(&self) -> (u32, u32);

    /// Approximate memory use, counted as 4 bytes per pixel whatever the real format is.
    fn approx_bytes(&self) -> usize {
        let (width, height) = self.pixel_dimensions();
        width as usize * height as usize * BYTES_PER_PIXEL
    }
}

impl Bitmap for RgbaImage {
    fn pixel_dimensions(&self) -> (u32, u32) {
        self.dimensions()
    }
}

impl Bitmap for DynamicImage {
    fn pixel_dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }
}

struct Inner<T> {
    entries: LruCache<ThumbKey, Arc<T>>,
    used_bytes: usize,
}

/// In-memory LRU of decoded bitmaps, bounded by an approximate byte budget.
///
/// Bitmaps are handed out as `Arc`s. Eviction only drops the cache's own reference, so a
/// bitmap being displayed stays valid until its last user lets go of it. A single bitmap
/// larger than the whole budget is still cached until something else is inserted.
pub struct BitmapLru<T> {
    inner: Mutex<Inner<T>>,
    budget_bytes: usize,
}

impl<T: Bitmap> BitmapLru<T> {
    pub fn new(budget_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                used_bytes: 0,
            }),
            budget_bytes,
        }
    }

    /// Get a bitmap and mark it most recently used.
    pub fn get(&self, key: ThumbKey) -> Option<Arc<T>> {
        self.inner.lock().entries.get(&key).cloned()
    }

    pub fn contains(&self, key: ThumbKey) -> bool {
        self.inner.lock().entries.contains(&key)
    }

    /// Insert a bitmap, evicting least recently used bitmaps until the budget is met.
    pub fn insert(&self, key: ThumbKey, bitmap: T) -> Arc<T> {
        let bitmap = Arc::new(bitmap);
        let mut inner = self.inner.lock();

        inner.used_bytes += bitmap.approx_bytes();
        if let Some(old) = inner.entries.put(key, bitmap.clone()) {
            inner.used_bytes -= old.approx_bytes();
        }

        while inner.used_bytes > self.budget_bytes && inner.entries.len() > 1 {
            match inner.entries.pop_lru() {
                Some((_key, evicted)) => inner.used_bytes -= evicted.approx_bytes(),
                None => break,
            }
        }

        bitmap
    }

    pub fn remove(&self, key: ThumbKey) -> Option<Arc<T>> {
        let mut inner = self.inner.lock();
        let removed = inner.entries.pop(&key);
        if let Some(ref bitmap) = removed {
            inner.used_bytes -= bitmap.approx_bytes();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn used_bytes(&self) -> usize {
        self.inner.lock().used_bytes
    }

    pub fn budget_bytes(&self) -> usize {
        self.budget_bytes
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.used_bytes = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn img(width: u32, height: u32) -> RgbaImage {
        RgbaImage::new(width, height)
    }

    #[test]
    fn test_evicts_by_budget() {
        // room for two 10x10 bitmaps
        let lru = BitmapLru::new(800);
        lru.insert(ThumbKey::new(1), img(10, 10));
        lru.insert(ThumbKey::new(2), img(10, 10));
        assert_eq!(lru.used_bytes(), 800);

        // touch 1 so that 2 is the oldest
        assert!(lru.get(ThumbKey::new(1)).is_some());
        lru.insert(ThumbKey::new(3), img(10, 10));

        assert!(lru.contains(ThumbKey::new(1)));
        assert!(!lru.contains(ThumbKey::new(2)));
        assert!(lru.contains(ThumbKey::new(3)));
        assert_eq!(lru.used_bytes(), 800);
    }

    #[test]
    fn test_eviction_keeps_outstanding_references() {
        let lru = BitmapLru::new(400);
        let held = lru.insert(ThumbKey::new(1), img(10, 10));
        lru.insert(ThumbKey::new(2), img(10, 10));

        assert!(!lru.contains(ThumbKey::new(1)));
        assert_eq!(held.dimensions(), (10, 10));
        assert_eq!(Arc::strong_count(&held), 1);
    }

    #[test]
    fn test_oversized_bitmap_is_kept_alone() {
        let lru = BitmapLru::new(100);
        lru.insert(ThumbKey::new(1), img(2, 2));
        lru.insert(ThumbKey::new(2), img(100, 100));
        assert_eq!(lru.len(), 1);
        assert!(lru.contains(ThumbKey::new(2)));
    }

    #[test]
    fn test_replace_and_remove() {
        let lru = BitmapLru::new(10_000);
        lru.insert(ThumbKey::new(1), img(10, 10));
        lru.insert(ThumbKey::new(1), img(20, 20));
        assert_eq!(lru.used_bytes(), 1600);

        assert!(lru.remove(ThumbKey::new(1)).is_some());
        assert_eq!(lru.used_bytes(), 0);
        assert!(lru.is_empty());
    }
}
