#![allow(clippy::len_without_is_empty)]
#![allow(clippy::let_and_return)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::unwrap_used)]

//! # Overview
//! vid_fingerprint_lib extracts compact, comparable fingerprints from video and image files,
//! and decides whether two files are perceptual duplicates even when they differ in
//! encoding, resolution or container.
//!
//! # How it works
//! * [`MediaProbe`] asks ffprobe for the duration and streams of each file.
//! * [`SampleOrchestrator`] takes a 32x32 grayscale frame at a few evenly spaced positions
//!   through each video (or the single frame of an image), through a [`FrameExtractor`].
//! * Each frame is turned into a 64 bit [perceptual hash](perceptual_hash::phash) from the
//!   low frequencies of its [discrete cosine transform](http://hackerfactor.com/blog/index.php%3F/archives/432-Looks-Like-It.html).
//! * Two hashes are compared by counting the bits that differ, see [`compare`]. Two files are
//!   compared position by position with [`compare_entries`].
//!
//! ```no_run
//! use vid_fingerprint_lib::*;
//!
//! let extractor = build_extractor(&ExtractorConfig::default());
//! let probe = MediaProbe::default();
//! let orchestrator = SampleOrchestrator::new(extractor.as_ref());
//!
//! let mut entries = ["vids/cat.1.mp4", "vids/cat.3.webm"]
//!     .map(|path| FileEntry::new(path, false));
//! for entry in entries.iter_mut() {
//!     if probe.probe_entry(entry) {
//!         orchestrator.sample_file(entry);
//!     }
//! }
//!
//! let verdict = compare_entries(&entries[0], &entries[1], &ComparisonOptions::default());
//! println!("{verdict:?}");
//! ```
//!
//! # Frame extraction
//! Frames are decoded either in process with gstreamer (the `gstreamer_backend` feature, on
//! by default) or by running ffmpeg once per frame. The in-process path falls back to ffmpeg
//! whenever it fails.
//!
//! # Caching
//! Sampling is the expensive part. [`FingerprintStore`] keeps [`FileEntry`] records between
//! runs, and [`ThumbnailPack`] keeps display thumbnails in a single append-only file per folder.
//!
//! # Prerequisites
//! ffmpeg and ffprobe must be callable, either from the PATH or from paths given in
//! [`ToolPaths`].

pub(crate) mod definitions;
pub mod fingerprint_store;
pub mod fingerprinting;
pub mod frame_extract;
pub mod media_probe;
pub mod thumbnail_cache;

pub use definitions::{
    DEFAULT_BITMAP_BUDGET_BYTES, DEFAULT_DURATION_TOLERANCE, DEFAULT_SAMPLE_COUNT,
    DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_THUMBNAIL_WIDTH, GRAY_SAMPLE_DIM, GRAY_SAMPLE_LEN,
    HASH_BITS, TOOL_TIMEOUT,
};
pub use ffmpeg_cmdline_utils::{ffmpeg_and_ffprobe_are_callable, FfmpegError, ToolPaths};
pub use fingerprint_store::{FingerprintStore, StoreError, StoreResult};
pub use fingerprinting::{
    file_entry::{FileEntry, FileFlags, SamplePosition, SamplePositions},
    perceptual_hash,
    sample_orchestrator::{SampleOrchestrator, SampleReport, SampleState},
    similarity::{
        compare, compare_entries, compare_with, hamming_distance, ComparisonOptions,
        EntryVerdict, SimilarityThreshold, Verdict,
    },
    tonal_variance::{TonalVarianceCheck, VarianceCheck},
    Error,
};
pub use frame_extract::{
    build_extractor, ExtractError, ExtractMode, ExtractStrategy, ExtractorConfig,
    FallbackExtractor, FrameExtractor, SubprocessExtractor,
};
pub use media_probe::{MediaDescription, MediaProbe, ProbeConfig, StreamDescription};
pub use thumbnail_cache::{
    BitmapLru, CacheError, CacheResult, PackRange, PackSlice, ThumbKey, ThumbnailPack,
    ThumbnailProvider,
};

#[cfg(feature = "gstreamer_backend")]
pub use frame_extract::NativeExtractor;
