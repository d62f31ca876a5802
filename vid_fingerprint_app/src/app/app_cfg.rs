use std::{path::PathBuf, time::Duration};

use vid_fingerprint_lib::{
    ComparisonOptions, ExtractStrategy, ExtractorConfig, ProbeConfig, DEFAULT_SAMPLE_COUNT,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReportVerbosity {
    Quiet,
    Default,
    Verbose,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum StrategyArg {
    Native,
    Subprocess,
}

impl From<StrategyArg> for ExtractStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Native => Self::Native,
            StrategyArg::Subprocess => Self::Subprocess,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolCfg {
    pub extractor: ExtractorConfig,
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone)]
pub struct HashCfg {
    pub sample_count: usize,
    /// When present, previously computed fingerprints are reused and new ones are saved.
    pub store_path: Option<PathBuf>,
}

impl HashCfg {
    // For subcommands which never sample.
    pub fn unused() -> Self {
        Self {
            sample_count: DEFAULT_SAMPLE_COUNT,
            store_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum AppCommand {
    Probe {
        files: Vec<PathBuf>,
    },
    Hash {
        files: Vec<PathBuf>,
        images: bool,
    },
    Compare {
        file_a: PathBuf,
        file_b: PathBuf,
        images: bool,
        options: ComparisonOptions,
    },
    Thumb {
        file: PathBuf,
        at: Duration,
        cache_dir: PathBuf,
        out: Option<PathBuf>,
        width: u32,
    },
}

#[derive(Debug, Clone)]
pub struct AppCfg {
    pub command: AppCommand,
    pub tool_cfg: ToolCfg,
    pub hash_cfg: HashCfg,
    pub verbosity: ReportVerbosity,
}
