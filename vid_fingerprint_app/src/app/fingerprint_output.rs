use std::{collections::BTreeMap, path::PathBuf};

use serde::Serialize;
use vid_fingerprint_lib::{EntryVerdict, FileEntry, SampleOrchestrator, SampleState};

/// One line of `hash` output.
#[derive(Debug, Serialize)]
pub struct FingerprintOutput {
    pub path: PathBuf,
    pub state: &'static str,
    pub flags: String,
    pub duration_secs: Option<f64>,
    /// Sample position (as a percentage of the duration) to hash, in hex.
    pub phashes: BTreeMap<String, String>,
}

impl FingerprintOutput {
    pub fn new(entry: &FileEntry, orchestrator: &SampleOrchestrator) -> Self {
        let state = match orchestrator.state_of(entry) {
            SampleState::Pending => "pending",
            SampleState::Sampling => "sampling",
            SampleState::Complete => "complete",
            SampleState::ThumbnailError => "thumbnail_error",
            SampleState::TooDark => "too_dark",
        };

        Self {
            path: entry.path.clone(),
            state,
            flags: entry.flags.to_string(),
            duration_secs: entry.media.as_ref().map(|m| m.duration.as_secs_f64()),
            phashes: entry
                .phashes
                .iter()
                .map(|(pos, hash)| (pos.to_string(), format!("{hash:016x}")))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VerdictOutput {
    pub file_a: PathBuf,
    pub file_b: PathBuf,
    pub shared_positions: usize,
    pub max_distance: u32,
    pub mean_similarity: f64,
    pub is_duplicate: bool,
}

impl VerdictOutput {
    pub fn new(a: &FileEntry, b: &FileEntry, verdict: EntryVerdict) -> Self {
        Self {
            file_a: a.path.clone(),
            file_b: b.path.clone(),
            shared_positions: verdict.shared_positions,
            max_distance: verdict.max_distance,
            mean_similarity: verdict.mean_similarity,
            is_duplicate: verdict.is_duplicate,
        }
    }
}

#[allow(clippy::print_stdout)]
pub fn print_json_line(value: &impl Serialize) -> eyre::Result<()> {
    let line = serde_json::to_string(value)?;
    println!("{line}");
    Ok(())
}
