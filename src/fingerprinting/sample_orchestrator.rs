use std::{path::PathBuf, time::Duration};

use crossbeam_channel::Sender;
use log::{debug, warn};
use rayon::prelude::*;

use super::{
    file_entry::{FileEntry, FileFlags, SamplePosition, SamplePositions},
    perceptual_hash::phash,
    tonal_variance::{TonalVarianceCheck, VarianceCheck},
};
use crate::frame_extract::{ExtractMode, FrameExtractor};

/// Where a file is in the sampling lifecycle.
///
/// `Pending -> Sampling -> {Complete, ThumbnailError, TooDark}`. The last three are terminal
/// and are recorded in the entry's flags, so they survive being saved and reloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleState {
    Pending,
    Sampling,
    Complete,
    ThumbnailError,
    TooDark,
}

impl SampleState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Sampling)
    }
}

/// Progress message for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleReport {
    pub path: PathBuf,
    pub state: SampleState,
    /// Positions that failed the tonal variance check.
    pub dark_positions: usize,
    /// Positions that needed a new frame extraction (as opposed to being resumed).
    pub extracted: usize,
}

impl SampleReport {
    fn new(path: PathBuf, state: SampleState) -> Self {
        Self {
            path,
            state,
            dark_positions: 0,
            extracted: 0,
        }
    }
}

/// Samples gray frames from files and hashes them.
///
/// Sampling is idempotent. Positions that already have a gray sample are never extracted
/// again, so an interrupted run can be resumed with the same entries.
pub struct SampleOrchestrator<'a, V: VarianceCheck = TonalVarianceCheck> {
    extractor: &'a dyn FrameExtractor,
    variance_check: V,
    positions: SamplePositions,
}

impl<'a> SampleOrchestrator<'a, TonalVarianceCheck> {
    pub fn new(extractor: &'a dyn FrameExtractor) -> Self {
        Self::with_check(extractor, TonalVarianceCheck::default())
    }
}

impl<'a, V: VarianceCheck> SampleOrchestrator<'a, V> {
    pub fn with_check(extractor: &'a dyn FrameExtractor, variance_check: V) -> Self {
        Self {
            extractor,
            variance_check,
            positions: SamplePositions::default(),
        }
    }

    pub fn positions(mut self, positions: SamplePositions) -> Self {
        self.positions = positions;
        self
    }

    /// The positions to sample from this entry with their timestamps, or None if the entry
    /// is neither an image nor a probed video with a known duration.
    pub fn positions_for(&self, entry: &FileEntry) -> Option<Vec<(SamplePosition, Duration)>> {
        if entry.is_image() {
            return Some(vec![(SamplePosition::START, Duration::ZERO)]);
        }

        let media = entry.media.as_ref().filter(|media| !media.duration.is_zero());
        media.map(|media| {
            self.positions
                .as_slice()
                .iter()
                .map(|pos| (*pos, pos.timestamp_in(media.duration)))
                .collect()
        })
    }

    /// The state an entry is in without sampling it.
    pub fn state_of(&self, entry: &FileEntry) -> SampleState {
        if entry.flags.has(FileFlags::THUMBNAIL_ERROR) {
            SampleState::ThumbnailError
        } else if entry.flags.has(FileFlags::TOO_DARK) {
            SampleState::TooDark
        } else {
            match self.positions_for(entry) {
                Some(positions)
                    if positions.iter().all(|(pos, _)| entry.phashes.contains_key(pos)) =>
                {
                    SampleState::Complete
                }
                _ => SampleState::Pending,
            }
        }
    }

    /// Sample every position of one file, extracting only what is missing.
    ///
    /// The first failed extraction marks the file with `THUMBNAIL_ERROR` and abandons it. A
    /// partially sampled file is never reported as complete. Dark samples are kept, but if
    /// every position is dark the file is marked `TOO_DARK`.
    pub fn sample_file(&self, entry: &mut FileEntry) -> SampleReport {
        let mut report = SampleReport::new(entry.path.clone(), SampleState::Sampling);

        let current = self.state_of(entry);
        if matches!(current, SampleState::ThumbnailError | SampleState::TooDark) {
            report.state = current;
            return report;
        }

        let Some(positions) = self.positions_for(entry) else {
            warn!(
                target: "sample",
                "Cannot sample {}: no media description with a duration",
                entry.path.display()
            );
            entry.flags = entry.flags.set(FileFlags::THUMBNAIL_ERROR);
            report.state = SampleState::ThumbnailError;
            return report;
        };

        for (pos, timestamp) in &positions {
            let gray = match entry.gray_bytes.get(pos) {
                Some(gray) => gray.clone(),
                None => {
                    let extracted = self
                        .extractor
                        .extract(&entry.path, *timestamp, ExtractMode::GraySample);
                    match extracted {
                        Ok(gray) => {
                            report.extracted += 1;
                            gray
                        }
                        Err(e) => {
                            warn!(
                                target: "sample",
                                "Failed to extract frame at {:.3}s from {}: {e}",
                                timestamp.as_secs_f64(),
                                entry.path.display()
                            );
                            entry.flags = entry.flags.set(FileFlags::THUMBNAIL_ERROR);
                            report.state = SampleState::ThumbnailError;
                            return report;
                        }
                    }
                }
            };

            let hash = match entry.phashes.get(pos) {
                Some(hash) => *hash,
                None => match phash(&gray) {
                    Ok(hash) => hash,
                    Err(e) => {
                        warn!(
                            target: "sample",
                            "Discarding sample of {} at {pos}: {e}",
                            entry.path.display()
                        );
                        entry.gray_bytes.remove(pos);
                        entry.flags = entry.flags.set(FileFlags::THUMBNAIL_ERROR);
                        report.state = SampleState::ThumbnailError;
                        return report;
                    }
                },
            };

            if self.variance_check.is_too_dark(&gray) {
                report.dark_positions += 1;
            }

            entry.phashes.insert(*pos, hash);
            entry.gray_bytes.insert(*pos, gray);
        }

        if !positions.is_empty() && report.dark_positions == positions.len() {
            debug!(target: "sample", "All samples of {} are too dark", entry.path.display());
            entry.flags = entry.flags.set(FileFlags::TOO_DARK);
            report.state = SampleState::TooDark;
        } else {
            report.state = SampleState::Complete;
        }

        report
    }

    /// Sample many files in parallel. Each entry is owned by one worker at a time.
    ///
    /// For every file a `Sampling` report is sent when a worker picks it up, followed by a
    /// report with its terminal state. Reports are dropped silently if the receiver has gone away.
    pub fn sample_all(&self, entries: &mut [FileEntry], reports: &Sender<SampleReport>) {
        entries
            .par_iter_mut()
            .for_each_with(reports.clone(), |tx, entry| {
                let _ = tx.send(SampleReport::new(entry.path.clone(), SampleState::Sampling));
                let report = self.sample_file(entry);
                let _ = tx.send(report);
            });
    }
}

#[cfg(test)]
mod test {
    use std::{
        path::Path,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::{definitions::GRAY_SAMPLE_LEN, frame_extract::ExtractError, MediaDescription};

    struct ConstExtractor {
        value: u8,
        calls: AtomicUsize,
    }

    impl ConstExtractor {
        fn new(value: u8) -> Self {
            Self {
                value,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl FrameExtractor for ConstExtractor {
        fn extract(
            &self,
            _path: &Path,
            _timestamp: Duration,
            _mode: ExtractMode,
        ) -> Result<Vec<u8>, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![self.value; GRAY_SAMPLE_LEN])
        }

        fn name(&self) -> &'static str {
            "const"
        }
    }

    fn video(name: &str) -> FileEntry {
        let mut entry = FileEntry::new(name, false);
        entry.media = Some(MediaDescription {
            duration: Duration::from_secs(10),
            ..Default::default()
        });
        entry
    }

    #[test]
    fn test_positions_for_video_and_image() {
        let extractor = ConstExtractor::new(128);
        let orchestrator =
            SampleOrchestrator::new(&extractor).positions(SamplePositions::evenly_spaced(4));

        let timestamps = orchestrator
            .positions_for(&video("a.mp4"))
            .unwrap()
            .into_iter()
            .map(|(_pos, ts)| ts)
            .collect::<Vec<_>>();
        assert_eq!(
            timestamps,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(6),
                Duration::from_secs(8)
            ]
        );

        let image = FileEntry::new("a.png", true);
        assert_eq!(
            orchestrator.positions_for(&image),
            Some(vec![(SamplePosition::START, Duration::ZERO)])
        );

        assert_eq!(orchestrator.positions_for(&FileEntry::new("unprobed.mp4", false)), None);
    }

    #[test]
    fn test_unprobed_video_is_thumbnail_error() {
        let extractor = ConstExtractor::new(128);
        let orchestrator = SampleOrchestrator::new(&extractor);

        let mut entry = FileEntry::new("unprobed.mp4", false);
        let report = orchestrator.sample_file(&mut entry);
        assert_eq!(report.state, SampleState::ThumbnailError);
        assert!(entry.flags.has(FileFlags::THUMBNAIL_ERROR));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zero_duration_video_is_never_sampled() {
        let extractor = ConstExtractor::new(128);
        let orchestrator = SampleOrchestrator::new(&extractor);

        let mut entry = FileEntry::new("unknown_length.mkv", false);
        entry.media = Some(MediaDescription::default());
        assert_eq!(orchestrator.positions_for(&entry), None);

        let report = orchestrator.sample_file(&mut entry);
        assert_eq!(report.state, SampleState::ThumbnailError);
        assert!(entry.phashes.is_empty());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_complete_then_sticky() {
        let extractor = ConstExtractor::new(128);
        let orchestrator = SampleOrchestrator::new(&extractor);

        let mut entry = video("a.mp4");
        assert_eq!(orchestrator.state_of(&entry), SampleState::Pending);

        let report = orchestrator.sample_file(&mut entry);
        assert_eq!(report.state, SampleState::Complete);
        assert_eq!(report.extracted, 4);
        assert_eq!(entry.phashes.len(), 4);
        assert_eq!(orchestrator.state_of(&entry), SampleState::Complete);

        let again = orchestrator.sample_file(&mut entry);
        assert_eq!(again.state, SampleState::Complete);
        assert_eq!(again.extracted, 0);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_bad_stored_sample_is_discarded() {
        let extractor = ConstExtractor::new(128);
        let orchestrator =
            SampleOrchestrator::new(&extractor).positions(SamplePositions::evenly_spaced(1));

        let mut entry = video("a.mp4");
        let pos = SamplePosition::from_fraction(0.5);
        entry.gray_bytes.insert(pos, vec![0; 10]);

        let report = orchestrator.sample_file(&mut entry);
        assert_eq!(report.state, SampleState::ThumbnailError);
        assert!(!entry.gray_bytes.contains_key(&pos));
    }

    #[test]
    fn test_sample_all_reports_every_file() {
        let extractor = ConstExtractor::new(128);
        let orchestrator = SampleOrchestrator::new(&extractor);

        let mut entries = (0..8).map(|i| video(&format!("{i}.mp4"))).collect::<Vec<_>>();
        entries.push(FileEntry::new("unprobed.mp4", false));

        let (tx, rx) = crossbeam_channel::unbounded();
        orchestrator.sample_all(&mut entries, &tx);
        drop(tx);

        let reports = rx.iter().filter(|r| r.state.is_terminal()).collect::<Vec<_>>();
        assert_eq!(reports.len(), 9);
        assert_eq!(
            reports.iter().filter(|r| r.state == SampleState::Complete).count(),
            8
        );
        assert!(entries[..8].iter().all(|e| e.phashes.len() == 4));
    }
}
