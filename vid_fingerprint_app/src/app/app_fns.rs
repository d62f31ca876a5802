use std::{
    error::Error,
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
    sync::Arc,
};

use itertools::Itertools;
use serde::Serialize;
use vid_fingerprint_lib::*;

use crate::app::*;

// Saving after every file would rewrite the whole store each time.
const STORE_SAVE_THRESHOLD: u32 = 25;

pub fn run_app() -> i32 {
    let cfg = arg_parse::parse_args();
    configure_logs(cfg.verbosity);

    let ret = match run_app_inner(&cfg) {
        Ok(()) => 0,
        Err(fatal_error) => {
            print_fatal_err(fatal_error, cfg.verbosity);
            1
        }
    };

    ret
}

fn run_app_inner(cfg: &AppCfg) -> eyre::Result<()> {
    let tool_paths = &cfg.tool_cfg.extractor.tool_paths;
    if !ffmpeg_and_ffprobe_are_callable(tool_paths) {
        warn!(
            target: "app",
            "Could not run {} or {}. Check they are installed or pass --ffmpeg and --ffprobe",
            tool_paths.ffmpeg.display(),
            tool_paths.ffprobe.display()
        );
    }

    match &cfg.command {
        AppCommand::Probe { files } => run_probe(cfg, files),
        AppCommand::Hash { files, images } => {
            let extractor = build_extractor(&cfg.tool_cfg.extractor);
            let orchestrator = SampleOrchestrator::new(extractor.as_ref())
                .positions(SamplePositions::evenly_spaced(cfg.hash_cfg.sample_count));

            let entries = fingerprint_files(cfg, &orchestrator, files, *images)?;
            for entry in &entries {
                print_json_line(&FingerprintOutput::new(entry, &orchestrator))?;
            }
            Ok(())
        }
        AppCommand::Compare {
            file_a,
            file_b,
            images,
            options,
        } => run_compare(cfg, file_a, file_b, *images, options),
        AppCommand::Thumb {
            file,
            at,
            cache_dir,
            out,
            width,
        } => {
            let pack = Arc::new(ThumbnailPack::open(cache_dir).map_err(AppError::from)?);
            let extractor: Arc<dyn FrameExtractor> =
                Arc::from(build_extractor(&cfg.tool_cfg.extractor));
            let provider = ThumbnailProvider::new(
                pack.clone(),
                extractor,
                *width,
                DEFAULT_BITMAP_BUDGET_BYTES,
            );

            let bitmap = provider.thumbnail(file, *at).map_err(AppError::from)?;

            if let Some(out_path) = out {
                copy_thumbnail(&pack, ThumbKey::for_frame(file, *at), out_path)?;
            }
            pack.flush_index().map_err(AppError::from)?;

            print_json_line(&ThumbOutput {
                path: file.clone(),
                at_secs: at.as_secs_f64(),
                width: bitmap.width(),
                height: bitmap.height(),
                pack: pack.pack_path().to_path_buf(),
                written_to: out.clone(),
            })
        }
    }
}

#[derive(Debug, Serialize)]
struct ProbeOutput<'a> {
    path: &'a Path,
    media: &'a MediaDescription,
}

#[derive(Debug, Serialize)]
struct ThumbOutput {
    path: PathBuf,
    at_secs: f64,
    width: u32,
    height: u32,
    pack: PathBuf,
    written_to: Option<PathBuf>,
}

fn run_probe(cfg: &AppCfg, files: &[PathBuf]) -> eyre::Result<()> {
    let probe = MediaProbe::new(cfg.tool_cfg.probe.clone());

    let mut failed = vec![];
    for path in files {
        match probe.probe(path) {
            Ok(media) => print_json_line(&ProbeOutput { path, media: &media })?,
            Err(e) => {
                warn!(target: "app", "{e}");
                failed.push(path);
            }
        }
    }

    match failed.as_slice() {
        [] => Ok(()),
        failed => Err(eyre::Report::msg(format!(
            "Failed to probe: {}",
            failed.iter().map(|p| p.to_string_lossy()).join(", ")
        ))),
    }
}

fn run_compare(
    cfg: &AppCfg,
    file_a: &Path,
    file_b: &Path,
    images: bool,
    options: &ComparisonOptions,
) -> eyre::Result<()> {
    let extractor = build_extractor(&cfg.tool_cfg.extractor);
    let orchestrator = SampleOrchestrator::new(extractor.as_ref())
        .positions(SamplePositions::evenly_spaced(cfg.hash_cfg.sample_count));

    let files = [file_a.to_path_buf(), file_b.to_path_buf()];
    let entries = fingerprint_files(cfg, &orchestrator, &files, images)?;

    let [a, b] = entries.as_slice() else {
        return Err(eyre::Report::msg(
            "Could not read one of the files to compare",
        ));
    };

    match compare_entries(a, b, options) {
        Some(verdict) => print_json_line(&VerdictOutput::new(a, b, verdict)),
        None => Err(AppError::NotComparable(
            a.path.to_string_lossy().to_string(),
            b.path.to_string_lossy().to_string(),
        )
        .into()),
    }
}

// Loads entries from the store where they are still fresh, probes and samples the rest, and
// saves the result back to the store.
fn fingerprint_files(
    cfg: &AppCfg,
    orchestrator: &SampleOrchestrator,
    files: &[PathBuf],
    images: bool,
) -> eyre::Result<Vec<FileEntry>> {
    let store = match &cfg.hash_cfg.store_path {
        Some(path) => {
            let store = FingerprintStore::open(STORE_SAVE_THRESHOLD, path).map_err(AppError::from)?;
            Some(store)
        }
        None => None,
    };
    let probe = MediaProbe::new(cfg.tool_cfg.probe.clone());

    let mut entries = vec![];
    for path in files {
        let cached = store.as_ref().and_then(|store| store.fetch_if_fresh(path));
        let mut entry = match cached {
            Some(entry) => {
                trace!(target: "app", "Loaded {} from the fingerprint store", path.display());
                entry
            }
            None => match FileEntry::from_fs(path, images) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(target: "app", "Skipping {}: {e}", path.display());
                    continue;
                }
            },
        };

        let unprobed = entry.media.is_none() && entry.image_size.is_none();
        if unprobed && !entry.flags.has(FileFlags::METADATA_ERROR) {
            probe.probe_entry(&mut entry);
        }
        entries.push(entry);
    }

    info!(target: "app", "Sampling {} files", entries.len());

    let (tx, rx) = crossbeam_channel::unbounded::<SampleReport>();
    std::thread::scope(|s| {
        s.spawn(move || {
            for report in rx {
                log_sample_report(&report);
            }
        });
        orchestrator.sample_all(&mut entries, &tx);
        drop(tx);
    });

    if let Some(store) = store {
        for entry in &entries {
            store.insert(entry.clone()).map_err(AppError::from)?;
        }
        store.save().map_err(AppError::from)?;
    }

    Ok(entries)
}

fn log_sample_report(report: &SampleReport) {
    let path = report.path.display();
    match report.state {
        SampleState::Pending | SampleState::Sampling => trace!(target: "app", "Sampling {path}"),
        SampleState::Complete if report.extracted == 0 => {
            trace!(target: "app", "Already sampled: {path}")
        }
        SampleState::Complete => info!(target: "app", "Sampled {path}"),
        SampleState::ThumbnailError => warn!(target: "app", "Could not sample {path}"),
        SampleState::TooDark => info!(target: "app", "Too dark to compare: {path}"),
    }
}

fn copy_thumbnail(pack: &ThumbnailPack, key: ThumbKey, out_path: &Path) -> eyre::Result<()> {
    let mut slice = pack
        .open_key(key)
        .map_err(AppError::from)?
        .ok_or(AppError::Thumbnail(CacheError::KeyMissing(key)))?;

    let mut out = BufWriter::new(File::create(out_path)?);
    std::io::copy(&mut slice, &mut out)?;
    Ok(())
}

fn print_fatal_err(fatal_err: eyre::Report, verbosity: ReportVerbosity) {
    error!(target: "app-errorlog", "{}", fatal_err);

    if verbosity == ReportVerbosity::Verbose {
        let mut source: Option<&(dyn Error + 'static)> = fatal_err.source();
        while let Some(e) = source {
            error!(target: "app-errorlog", "    caused by: {}", e);
            source = e.source();
        }
    }
}

pub fn configure_logs(verbosity: ReportVerbosity) {
    use simplelog::*;

    let mut cfg = simplelog::ConfigBuilder::new();
    if verbosity != ReportVerbosity::Verbose {
        cfg.add_filter_ignore_str("thumbnail_pack");
    }

    let min_loglevel = match verbosity {
        ReportVerbosity::Quiet => LevelFilter::Warn,
        ReportVerbosity::Default => LevelFilter::Info,
        ReportVerbosity::Verbose => LevelFilter::Trace,
    };

    TermLogger::init(
        min_loglevel,
        cfg.build(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
    .unwrap_or_else(|e| print_error_and_quit(e.into()));
}
