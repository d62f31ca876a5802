use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering::Relaxed},
};

use log::{info, trace, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::{
    CacheError::{self, *},
    CacheResult, ThumbKey,
};

pub const PACK_FILE_NAME: &str = "thumbs.pack";
pub const INDEX_FILE_NAME: &str = "thumbs.index.json";

/// Where one thumbnail lives inside the pack file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackRange {
    pub offset: u64,
    pub length: u64,
}

impl PackRange {
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

//On-disk format of the index
type IndexDiskFormat = HashMap<ThumbKey, PackRange>;

/// Counts the bytes written through it.
pub struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.count += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// An append-only file of encoded thumbnails, plus an index of where each one is.
///
/// Thumbnails are only ever appended. A range, once published in the index, is never
/// rewritten, so readers on their own file handles can read it while other thumbnails are
/// being appended. The index lives in memory and must be flushed with
/// [`ThumbnailPack::flush_index`] (or by dropping the pack) to survive a restart.
pub struct ThumbnailPack {
    pack_path: PathBuf,
    index_path: PathBuf,
    index: RwLock<IndexDiskFormat>,
    writer: Mutex<File>,
    dirty: AtomicBool,
}

impl ThumbnailPack {
    /// Open or create the pack in `folder`.
    ///
    /// A missing or unreadable index is treated as an empty cache. The pack file is kept, and
    /// its old contents become unreachable.
    pub fn open(folder: impl AsRef<Path>) -> CacheResult<Self> {
        let folder = folder.as_ref();
        std::fs::create_dir_all(folder).map_err(|src| CacheFileIo {
            src,
            path: folder.to_path_buf(),
        })?;

        let pack_path = folder.join(PACK_FILE_NAME);
        let index_path = folder.join(INDEX_FILE_NAME);

        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&pack_path)
            .map_err(|src| CacheFileIo {
                src,
                path: pack_path.clone(),
            })?;

        let pack_len = writer
            .metadata()
            .map_err(|src| CacheFileIo {
                src,
                path: pack_path.clone(),
            })?
            .len();

        let index = match load_index(&index_path) {
            Ok(Some(index)) => index,
            Ok(None) => {
                info!(
                    target: "thumbnail_pack",
                    "Creating new thumbnail index: {}",
                    index_path.display()
                );
                IndexDiskFormat::new()
            }
            Err(e) => {
                warn!(target: "thumbnail_pack", "Discarding thumbnail index: {e}");
                IndexDiskFormat::new()
            }
        };

        //the index may have been flushed after a pack that was later truncated or replaced.
        let loaded = index.len();
        let index = index
            .into_iter()
            .filter(|(_key, range)| range.end() <= pack_len)
            .collect::<IndexDiskFormat>();
        if index.len() != loaded {
            warn!(
                target: "thumbnail_pack",
                "Dropped {} index entries pointing past the end of {}",
                loaded - index.len(),
                pack_path.display()
            );
        }

        trace!(
            target: "thumbnail_pack",
            "Opened {} with {} thumbnails",
            pack_path.display(),
            index.len()
        );

        Ok(Self {
            pack_path,
            index_path,
            index: RwLock::new(index),
            writer: Mutex::new(writer),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn contains_key(&self, key: ThumbKey) -> bool {
        self.index.read().contains_key(&key)
    }

    pub fn range(&self, key: ThumbKey) -> Option<PackRange> {
        self.index.read().get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pack_path(&self) -> &Path {
        &self.pack_path
    }

    /// Append a thumbnail unless one is already stored under `key`.
    ///
    /// The whole operation holds the append lock, so `producer` runs at most once per key
    /// even when called concurrently. Returns the range stored under `key`, whether it was
    /// already there or has just been written. The new range is only published once the
    /// producer has succeeded and its bytes have been written out. If the producer fails,
    /// whatever it wrote stays in the pack but is never referenced.
    pub fn append_if_missing<F>(&self, key: ThumbKey, producer: F) -> CacheResult<PackRange>
    where
        F: FnOnce(&mut dyn Write) -> CacheResult<()>,
    {
        let mut file = self.writer.lock();

        if let Some(range) = self.range(key) {
            return Ok(range);
        }

        let file_io = |src| CacheFileIo {
            src,
            path: self.pack_path.clone(),
        };

        let offset = file.seek(SeekFrom::End(0)).map_err(file_io)?;

        let mut out = CountingWriter::new(BufWriter::new(&mut *file));
        producer(&mut out)?;
        out.flush().map_err(file_io)?;
        let length = out.count();
        drop(out);

        let range = PackRange { offset, length };
        self.index.write().insert(key, range);
        self.dirty.store(true, Relaxed);

        trace!(target: "thumbnail_pack", "Appended {key:?} at {offset} ({length} bytes)");
        Ok(range)
    }

    /// A reader over one stored thumbnail, on its own file handle.
    pub fn open_key(&self, key: ThumbKey) -> CacheResult<Option<PackSlice>> {
        let Some(range) = self.range(key) else {
            return Ok(None);
        };

        let file = File::open(&self.pack_path).map_err(|src| CacheFileIo {
            src,
            path: self.pack_path.clone(),
        })?;

        Ok(Some(PackSlice::new(file, range)?))
    }

    /// Persist the index next to the pack. The pack is synced first, so a flushed index never
    /// refers to bytes that are not on disk.
    pub fn flush_index(&self) -> CacheResult<()> {
        {
            let file = self.writer.lock();
            file.sync_data().map_err(|src| CacheFileIo {
                src,
                path: self.pack_path.clone(),
            })?;
        }

        //write to a temporary file first so that a crash while saving cannot lose the old index.
        let temp_path = self.index_path.with_extension("tmp");
        let io_err = |src| CacheFileIo {
            src,
            path: self.index_path.clone(),
        };

        let temp_file = File::create(&temp_path).map_err(io_err)?;
        let mut buf = BufWriter::new(temp_file);

        {
            let index = self.index.read();
            serde_json::to_writer(&mut buf, &*index).map_err(|e| Serialization {
                src: format!("{e}"),
                path: self.index_path.clone(),
            })?;
        }

        let temp_file = buf.into_inner().map_err(|e| io_err(e.into_error()))?;
        temp_file.sync_all().map_err(io_err)?;
        std::fs::rename(&temp_path, &self.index_path).map_err(io_err)?;

        self.dirty.store(false, Relaxed);
        info!(
            target: "thumbnail_pack",
            "Saved thumbnail index {} ({} entries)",
            self.index_path.display(),
            self.len()
        );
        Ok(())
    }
}

impl Drop for ThumbnailPack {
    fn drop(&mut self) {
        if self.dirty.load(Relaxed) {
            if let Err(e) = self.flush_index() {
                warn!(target: "thumbnail_pack", "Failed to save thumbnail index on close: {e}");
            }
        }
    }
}

fn load_index(index_path: &Path) -> CacheResult<Option<IndexDiskFormat>> {
    if !index_path.exists() {
        return Ok(None);
    }

    let file = File::open(index_path).map_err(|src| CacheFileIo {
        src,
        path: index_path.to_path_buf(),
    })?;

    let index: IndexDiskFormat =
        serde_json::from_reader(BufReader::new(file)).map_err(|e| Deserialization {
            src: format!("{e}"),
            path: index_path.to_path_buf(),
        })?;

    Ok(Some(index))
}

/// Read-only view of one range of the pack. Positions are relative to the start of the range,
/// and reads stop at its end.
pub struct PackSlice {
    file: File,
    range: PackRange,
    pos: u64,
}

impl PackSlice {
    fn new(mut file: File, range: PackRange) -> CacheResult<Self> {
        file.seek(SeekFrom::Start(range.offset))?;
        Ok(Self { file, range, pos: 0 })
    }

    pub fn len(&self) -> u64 {
        self.range.length
    }

    pub fn is_empty(&self) -> bool {
        self.range.length == 0
    }
}

impl Read for PackSlice {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = self.range.length.saturating_sub(self.pos);
        let max = (buf.len() as u64).min(remaining) as usize;
        if max == 0 {
            return Ok(0);
        }

        let read = self.file.read(&mut buf[..max])?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl Seek for PackSlice {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(n) => self.range.length.checked_add_signed(n),
            SeekFrom::Current(n) => self.pos.checked_add_signed(n),
        };

        let Some(target) = target else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek before start of thumbnail",
            ));
        };

        let Some(absolute) = self.range.offset.checked_add(target) else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "seek past the largest representable offset",
            ));
        };

        self.file.seek(SeekFrom::Start(absolute))?;
        self.pos = target;
        Ok(target)
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, thread};

    use super::*;

    fn write_bytes(bytes: &'static [u8]) -> impl FnOnce(&mut dyn Write) -> CacheResult<()> {
        move |out| {
            out.write_all(bytes)?;
            Ok(())
        }
    }

    fn read_key(pack: &ThumbnailPack, key: ThumbKey) -> Vec<u8> {
        let mut buf = vec![];
        pack.open_key(key).unwrap().unwrap().read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let pack = ThumbnailPack::open(dir.path()).unwrap();

        let hello = pack.append_if_missing(ThumbKey::new(1), write_bytes(b"hello")).unwrap();
        let world = pack.append_if_missing(ThumbKey::new(2), write_bytes(b"world!")).unwrap();

        assert_eq!(hello, PackRange { offset: 0, length: 5 });
        assert_eq!(world, PackRange { offset: 5, length: 6 });
        assert_eq!(pack.range(ThumbKey::new(2)), Some(world));
        assert_eq!(read_key(&pack, ThumbKey::new(1)), b"hello");
        assert_eq!(read_key(&pack, ThumbKey::new(2)), b"world!");
        assert!(pack.open_key(ThumbKey::new(3)).unwrap().is_none());
    }

    #[test]
    fn test_slice_seek_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let pack = ThumbnailPack::open(dir.path()).unwrap();
        pack.append_if_missing(ThumbKey::new(1), write_bytes(b"aaaa")).unwrap();
        pack.append_if_missing(ThumbKey::new(2), write_bytes(b"0123456789")).unwrap();
        pack.append_if_missing(ThumbKey::new(3), write_bytes(b"zzzz")).unwrap();

        let mut slice = pack.open_key(ThumbKey::new(2)).unwrap().unwrap();
        assert_eq!(slice.len(), 10);

        assert_eq!(slice.seek(SeekFrom::End(-3)).unwrap(), 7);
        let mut rest = vec![];
        slice.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"789");

        slice.seek(SeekFrom::Start(2)).unwrap();
        let mut two = [0u8; 2];
        slice.read_exact(&mut two).unwrap();
        assert_eq!(&two, b"23");

        assert!(slice.seek(SeekFrom::Current(-10)).is_err());
    }

    #[test]
    fn test_slice_seek_past_end() {
        let dir = tempfile::tempdir().unwrap();
        let pack = ThumbnailPack::open(dir.path()).unwrap();
        pack.append_if_missing(ThumbKey::new(1), write_bytes(b"aaaa")).unwrap();
        pack.append_if_missing(ThumbKey::new(2), write_bytes(b"abc")).unwrap();

        let mut slice = pack.open_key(ThumbKey::new(2)).unwrap().unwrap();

        //past the end is allowed and reads nothing, even from the next thumbnail.
        assert_eq!(slice.seek(SeekFrom::Start(10)).unwrap(), 10);
        let mut rest = vec![];
        slice.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());

        let err = slice.seek(SeekFrom::Start(u64::MAX)).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);

        //a failed seek leaves the position where it was.
        assert_eq!(slice.stream_position().unwrap(), 10);
    }

    #[test]
    fn test_failed_producer_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let pack = ThumbnailPack::open(dir.path()).unwrap();

        let ret = pack.append_if_missing(ThumbKey::new(1), |out| {
            out.write_all(b"partial")?;
            Err(CacheError::Decode("producer failed".to_string()))
        });
        assert!(ret.is_err());
        assert!(!pack.contains_key(ThumbKey::new(1)));

        pack.append_if_missing(ThumbKey::new(1), write_bytes(b"ok")).unwrap();
        assert_eq!(read_key(&pack, ThumbKey::new(1)), b"ok");
    }

    #[test]
    fn test_second_append_returns_existing_range() {
        let dir = tempfile::tempdir().unwrap();
        let pack = ThumbnailPack::open(dir.path()).unwrap();

        let first = pack.append_if_missing(ThumbKey::new(7), write_bytes(b"first")).unwrap();
        let second = pack
            .append_if_missing(ThumbKey::new(7), |_out| {
                panic!("the producer must not run for a stored key")
            })
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(read_key(&pack, ThumbKey::new(7)), b"first");
    }

    #[test]
    fn test_ranges_and_bytes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let contents: [&'static [u8]; 4] = [b"one", b"", b"three3", b"\x00\xff\x10"];

        let ranges = {
            let pack = ThumbnailPack::open(dir.path()).unwrap();
            let ranges = contents
                .iter()
                .enumerate()
                .map(|(i, &bytes)| {
                    let key = ThumbKey::new(i as u64);
                    (key, pack.append_if_missing(key, write_bytes(bytes)).unwrap())
                })
                .collect::<Vec<_>>();
            pack.flush_index().unwrap();
            ranges
        };

        let pack = ThumbnailPack::open(dir.path()).unwrap();
        assert_eq!(pack.len(), contents.len());
        for ((key, range), bytes) in ranges.iter().zip(contents) {
            assert_eq!(pack.range(*key), Some(*range));
            assert_eq!(read_key(&pack, *key), bytes);
        }
    }

    #[test]
    fn test_concurrent_appends_produce_once() {
        let dir = tempfile::tempdir().unwrap();
        let pack = Arc::new(ThumbnailPack::open(dir.path()).unwrap());
        let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let handles = (0..8)
            .map(|_| {
                let pack = pack.clone();
                let runs = runs.clone();
                thread::spawn(move || {
                    pack.append_if_missing(ThumbKey::new(42), |out| {
                        runs.fetch_add(1, Relaxed);
                        out.write_all(b"once")?;
                        Ok(())
                    })
                    .unwrap()
                })
            })
            .collect::<Vec<_>>();

        let ranges = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>();

        assert!(ranges.iter().all(|range| *range == ranges[0]));
        assert_eq!(runs.load(Relaxed), 1);
        assert_eq!(read_key(&pack, ThumbKey::new(42)), b"once");
    }

    #[test]
    fn test_corrupt_index_means_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        {
            let pack = ThumbnailPack::open(dir.path()).unwrap();
            pack.append_if_missing(ThumbKey::new(1), write_bytes(b"abc")).unwrap();
        }

        std::fs::write(dir.path().join(INDEX_FILE_NAME), b"{ not json").unwrap();
        let pack = ThumbnailPack::open(dir.path()).unwrap();
        assert!(pack.is_empty());
    }

    #[test]
    fn test_out_of_range_entries_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        {
            let pack = ThumbnailPack::open(dir.path()).unwrap();
            pack.append_if_missing(ThumbKey::new(1), write_bytes(b"abc")).unwrap();
            pack.append_if_missing(ThumbKey::new(2), write_bytes(b"defgh")).unwrap();
            pack.flush_index().unwrap();
        }

        let pack_file = OpenOptions::new()
            .write(true)
            .open(dir.path().join(PACK_FILE_NAME))
            .unwrap();
        pack_file.set_len(4).unwrap();
        drop(pack_file);

        let pack = ThumbnailPack::open(dir.path()).unwrap();
        assert!(pack.contains_key(ThumbKey::new(1)));
        assert!(!pack.contains_key(ThumbKey::new(2)));
    }
}
