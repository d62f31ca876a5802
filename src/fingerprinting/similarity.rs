use std::time::Duration;

use super::{file_entry::FileEntry, file_entry::FileFlags, Error};
use crate::definitions::{
    DEFAULT_DURATION_TOLERANCE, DEFAULT_SIMILARITY_THRESHOLD, HASH_BITS,
};

/// The number of bits that differ between two hashes.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// `1 - distance / 64`. Identical hashes have similarity 1.0.
pub fn similarity(a: u64, b: u64) -> f64 {
    1.0 - f64::from(hamming_distance(a, b)) / f64::from(HASH_BITS)
}

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
/// How similar two frame hashes must be to count as duplicates.
///
/// The threshold is a real number in the inclusive range (0..1). 1.0 only accepts identical
/// hashes and 0.0 accepts anything. It is converted into a maximum number of differing bits:
/// rounded to the nearest bit normally, or rounded down when `strict` is set, so a strict
/// threshold never accepts more than a non-strict one.
pub struct SimilarityThreshold {
    value: f64,
    strict: bool,
}

impl SimilarityThreshold {
    /// # Errors
    /// [`Error::InvalidThreshold`] if `value` is outside `0.0..=1.0` or NaN.
    pub fn new(value: f64, strict: bool) -> Result<Self, Error> {
        if (0.0..=1.0).contains(&value) {
            Ok(Self { value, strict })
        } else {
            Err(Error::InvalidThreshold(value))
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// The largest Hamming distance still accepted as a duplicate.
    pub fn max_bit_difference(&self) -> u32 {
        let raw = (1.0 - self.value) * f64::from(HASH_BITS);
        let bits = if self.strict { raw.floor() } else { raw.round() };
        bits as u32
    }
}

impl Default for SimilarityThreshold {
    fn default() -> Self {
        Self {
            value: DEFAULT_SIMILARITY_THRESHOLD,
            strict: false,
        }
    }
}

/// The outcome of comparing two hashes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub distance: u32,
    pub similarity: f64,
    pub is_duplicate: bool,
}

pub fn compare(a: u64, b: u64, threshold: SimilarityThreshold) -> Verdict {
    let distance = hamming_distance(a, b);
    Verdict {
        distance,
        similarity: similarity(a, b),
        is_duplicate: distance <= threshold.max_bit_difference(),
    }
}

/// Compare two hashes against a raw threshold value.
///
/// # Errors
/// [`Error::InvalidThreshold`] if `threshold` is outside `0.0..=1.0`.
pub fn compare_with(a: u64, b: u64, threshold: f64, strict: bool) -> Result<Verdict, Error> {
    Ok(compare(a, b, SimilarityThreshold::new(threshold, strict)?))
}

/// Options for comparing two whole files.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComparisonOptions {
    pub threshold: SimilarityThreshold,
    /// Videos whose durations differ by more than this are never compared.
    /// None disables the check.
    pub duration_tolerance: Option<Duration>,
}

impl Default for ComparisonOptions {
    fn default() -> Self {
        Self {
            threshold: SimilarityThreshold::default(),
            duration_tolerance: Some(DEFAULT_DURATION_TOLERANCE),
        }
    }
}

/// The outcome of comparing two files sample by sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntryVerdict {
    /// How many sample positions both files have a hash for.
    pub shared_positions: usize,
    pub max_distance: u32,
    pub mean_similarity: f64,
    /// True only if every shared position is a duplicate.
    pub is_duplicate: bool,
}

/// Compare the hashes two files have at the same sample positions.
///
/// Returns None when the files cannot be compared: either one failed sampling, is too dark or
/// was excluded by the user, they share no sample position, or they are videos of clearly
/// different length.
pub fn compare_entries(
    a: &FileEntry,
    b: &FileEntry,
    options: &ComparisonOptions,
) -> Option<EntryVerdict> {
    let not_comparable =
        FileFlags::THUMBNAIL_ERROR | FileFlags::TOO_DARK | FileFlags::MANUALLY_EXCLUDED;
    if a.flags.any(not_comparable) || b.flags.any(not_comparable) {
        return None;
    }

    if let (Some(tolerance), Some(media_a), Some(media_b)) =
        (options.duration_tolerance, &a.media, &b.media)
    {
        let difference = if media_a.duration > media_b.duration {
            media_a.duration - media_b.duration
        } else {
            media_b.duration - media_a.duration
        };
        if difference > tolerance {
            return None;
        }
    }

    let verdicts = a
        .phashes
        .iter()
        .filter_map(|(position, hash_a)| {
            b.phashes
                .get(position)
                .map(|hash_b| compare(*hash_a, *hash_b, options.threshold))
        })
        .collect::<Vec<_>>();

    if verdicts.is_empty() {
        return None;
    }

    let shared_positions = verdicts.len();
    Some(EntryVerdict {
        shared_positions,
        max_distance: verdicts.iter().map(|v| v.distance).max().unwrap_or(0),
        mean_similarity: verdicts.iter().map(|v| v.similarity).sum::<f64>()
            / shared_positions as f64,
        is_duplicate: verdicts.iter().all(|v| v.is_duplicate),
    })
}
