use std::time::Duration;

// Frame definitions (pre hashing)
pub const GRAY_SAMPLE_DIM: usize = ffmpeg_cmdline_utils::GRAY_SAMPLE_DIM as usize;
pub const GRAY_SAMPLE_LEN: usize = ffmpeg_cmdline_utils::GRAY_SAMPLE_LEN;

// Hash definitions. The hash is built from the 8x8 block of DCT coefficients
// just above the DC term on both axes.
pub const HASH_BLOCK_DIM: usize = 8;
pub const HASH_BITS: u32 = (HASH_BLOCK_DIM * HASH_BLOCK_DIM) as u32;

/// Hard limit on the wall-clock time of any single probe or frame extraction.
pub const TOOL_TIMEOUT: Duration = ffmpeg_cmdline_utils::DEFAULT_TOOL_TIMEOUT;

/// Width in pixels of display thumbnails. The height keeps the aspect ratio.
pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 100;

/// Number of evenly spaced sample positions taken from each video.
pub const DEFAULT_SAMPLE_COUNT: usize = 4;

/// A good starting point for [`SimilarityThreshold`][crate::SimilarityThreshold]. Two sampled
/// frames may differ in at most 6 of 64 bits.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.9;

/// How much the durations of two videos may differ before they are not compared at all.
pub const DEFAULT_DURATION_TOLERANCE: Duration = Duration::from_secs(2);

/// Memory budget of the decoded thumbnail LRU (approximated as width * height * 4 per bitmap).
pub const DEFAULT_BITMAP_BUDGET_BYTES: usize = 64 * 1024 * 1024;
