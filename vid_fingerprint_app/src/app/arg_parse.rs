use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use clap::{value_parser, ArgAction::*};
use vid_fingerprint_lib::*;

use crate::app::*;

// subcommands
const CMD_PROBE: &str = "probe";
const CMD_HASH: &str = "hash";
const CMD_COMPARE: &str = "compare";
const CMD_THUMB: &str = "thumb";

// files
const FILE_PATHS: &str = "Files";
const FILE_A: &str = "First file";
const FILE_B: &str = "Second file";
const IMAGES: &str = "Treat files as images";

// sampling
const SAMPLE_COUNT: &str = "Sample count";
const STORE_FILE: &str = "Fingerprint store path";
const NO_STORE: &str = "Do not use a fingerprint store";

// comparison
const THRESHOLD: &str = "Similarity threshold";
const STRICT: &str = "Strict threshold";
const DURATION_TOLERANCE: &str = "Duration tolerance";

// thumbnails
const THUMB_AT: &str = "Thumbnail timestamp";
const THUMB_CACHE_DIR: &str = "Thumbnail cache directory";
const THUMB_OUT: &str = "Thumbnail output path";
const THUMB_WIDTH: &str = "Thumbnail width";

// frame extraction
const FFMPEG_PATH: &str = "ffmpeg path";
const FFPROBE_PATH: &str = "ffprobe path";
const STRATEGY: &str = "Extraction strategy";
const HW_ACCEL: &str = "Hardware decoding";
const FFMPEG_ARGS: &str = "Extra ffmpeg arguments";
const TOOL_TIMEOUT_SECS: &str = "Tool timeout";

// args file
const ARGS_FILE: &str = "Args file";

//Verbosity
const VERBOSITY_QUIET: &str = "Quiet";
const VERBOSITY_VERBOSE: &str = "Verbose";

const DISPLAY_ORDERING: [&str; 23] = [
    //
    // files
    FILE_PATHS,
    FILE_A,
    FILE_B,
    IMAGES,
    //
    //sampling
    SAMPLE_COUNT,
    STORE_FILE,
    NO_STORE,
    //
    //comparison
    THRESHOLD,
    STRICT,
    DURATION_TOLERANCE,
    //
    //thumbnails
    THUMB_AT,
    THUMB_CACHE_DIR,
    THUMB_OUT,
    THUMB_WIDTH,
    //
    //frame extraction
    FFMPEG_PATH,
    FFPROBE_PATH,
    STRATEGY,
    HW_ACCEL,
    FFMPEG_ARGS,
    TOOL_TIMEOUT_SECS,
    //
    //verbosity
    VERBOSITY_QUIET,
    VERBOSITY_VERBOSE,
    //argument replacement
    ARGS_FILE,
];

fn get_ordering(arg_name: &str) -> usize {
    match DISPLAY_ORDERING.iter().position(|x| *x == arg_name) {
        Some(idx) => idx,
        None => {
            panic!("argument not assigned a display order: {arg_name:?}");
        }
    }
}

fn build_app() -> clap::Command {
    let default_threshold = DEFAULT_SIMILARITY_THRESHOLD.to_string();
    let default_tolerance = DEFAULT_DURATION_TOLERANCE.as_secs_f64().to_string();
    let default_sample_count = DEFAULT_SAMPLE_COUNT.to_string();
    let default_width = DEFAULT_THUMBNAIL_WIDTH.to_string();
    let default_timeout = TOOL_TIMEOUT.as_secs().to_string();

    //args are not added through method chaining because rustfmt struggles with very long
    //expressions.
    let mut clap_app = clap::Command::new("Video fingerprinter")
        .version(clap::crate_version!())
        .about("Fingerprint video and image files, and check whether two files are perceptual duplicates")
        .subcommand_required(true)
        .arg_required_else_help(true);

    clap_app = clap_app.arg(
        clap::Arg::new(FFMPEG_PATH)
            .long("ffmpeg")
            .global(true)
            .value_parser(value_parser!(PathBuf))
            .help("Path to the ffmpeg binary. Defaults to looking it up on PATH")
            .display_order(get_ordering(FFMPEG_PATH)),
    );

    clap_app = clap_app.arg(
        clap::Arg::new(FFPROBE_PATH)
            .long("ffprobe")
            .global(true)
            .value_parser(value_parser!(PathBuf))
            .help("Path to the ffprobe binary. Defaults to looking it up on PATH")
            .display_order(get_ordering(FFPROBE_PATH)),
    );

    clap_app = clap_app.arg(
        clap::Arg::new(STRATEGY)
            .long("strategy")
            .global(true)
            .value_parser(value_parser!(StrategyArg))
            .help("How frames are decoded. 'native' decodes in process and falls back to ffmpeg on failure. 'subprocess' always runs ffmpeg")
            .display_order(get_ordering(STRATEGY)),
    );

    clap_app = clap_app.arg(
        clap::Arg::new(HW_ACCEL)
            .long("hw-accel")
            .global(true)
            .action(SetTrue)
            .help("Prefer hardware video decoders where available")
            .display_order(get_ordering(HW_ACCEL)),
    );

    clap_app = clap_app.arg(
        clap::Arg::new(FFMPEG_ARGS)
            .long("ffmpeg-args")
            .global(true)
            .allow_hyphen_values(true)
            .value_parser(value_parser!(String))
            .help("Extra arguments passed to ffmpeg, split as a shell would split them, e.g. --ffmpeg-args \"-threads 1\"")
            .display_order(get_ordering(FFMPEG_ARGS)),
    );

    clap_app = clap_app.arg(
        clap::Arg::new(TOOL_TIMEOUT_SECS)
            .long("timeout")
            .global(true)
            .value_parser(value_parser!(u64))
            .default_value(default_timeout)
            .help("Seconds before a single ffmpeg or ffprobe invocation is killed")
            .display_order(get_ordering(TOOL_TIMEOUT_SECS)),
    );

    clap_app = clap_app.arg(
        clap::Arg::new(VERBOSITY_QUIET)
            .long("quiet")
            .short('q')
            .global(true)
            .help("Reduced verbosity")
            .conflicts_with(VERBOSITY_VERBOSE)
            .action(SetTrue)
            .display_order(get_ordering(VERBOSITY_QUIET)),
    );

    clap_app = clap_app.arg(
        clap::Arg::new(VERBOSITY_VERBOSE)
            .long("verbose")
            .short('v')
            .global(true)
            .help("Increased verbosity")
            .conflicts_with(VERBOSITY_QUIET)
            .action(SetTrue)
            .display_order(get_ordering(VERBOSITY_VERBOSE)),
    );

    clap_app = clap_app.arg(
        clap::Arg::new(ARGS_FILE)
            .long("args-file")
            .value_parser(value_parser!(PathBuf))
            .help("Read all other arguments from this file instead of the command line")
            .display_order(get_ordering(ARGS_FILE)),
    );

    let probe = clap::Command::new(CMD_PROBE)
        .about("Print container and stream metadata as JSON")
        .arg(
            clap::Arg::new(FILE_PATHS)
                .required(true)
                .num_args(1..)
                .value_parser(value_parser!(PathBuf))
                .action(Append)
                .help("Files to probe")
                .display_order(get_ordering(FILE_PATHS)),
        );

    let mut hash = clap::Command::new(CMD_HASH)
        .about("Sample and fingerprint files, printing one JSON line per file");
    hash = hash.arg(
        clap::Arg::new(FILE_PATHS)
            .required(true)
            .num_args(1..)
            .value_parser(value_parser!(PathBuf))
            .action(Append)
            .help("Files to fingerprint")
            .display_order(get_ordering(FILE_PATHS)),
    );
    hash = hash.arg(
        clap::Arg::new(IMAGES)
            .long("images")
            .action(SetTrue)
            .help("Treat the files as still images. Each is sampled once")
            .display_order(get_ordering(IMAGES)),
    );
    hash = add_sampling_args(hash, &default_sample_count);

    let mut compare = clap::Command::new(CMD_COMPARE)
        .about("Fingerprint two files and report whether they are duplicates");
    compare = compare.arg(
        clap::Arg::new(FILE_A)
            .required(true)
            .value_parser(value_parser!(PathBuf))
            .display_order(get_ordering(FILE_A)),
    );
    compare = compare.arg(
        clap::Arg::new(FILE_B)
            .required(true)
            .value_parser(value_parser!(PathBuf))
            .display_order(get_ordering(FILE_B)),
    );
    compare = compare.arg(
        clap::Arg::new(IMAGES)
            .long("images")
            .action(SetTrue)
            .help("Treat both files as still images")
            .display_order(get_ordering(IMAGES)),
    );
    compare = compare.arg(
        clap::Arg::new(THRESHOLD)
            .long("threshold")
            .value_parser(value_parser!(f64))
            .default_value(default_threshold)
            .help("Minimum similarity, between 0 and 1, for two hashes to be duplicates")
            .display_order(get_ordering(THRESHOLD)),
    );
    compare = compare.arg(
        clap::Arg::new(STRICT)
            .long("strict")
            .action(SetTrue)
            .help("Round the allowed number of differing bits down instead of to the nearest integer")
            .display_order(get_ordering(STRICT)),
    );
    compare = compare.arg(
        clap::Arg::new(DURATION_TOLERANCE)
            .long("duration-tolerance")
            .value_parser(value_parser!(f64))
            .allow_negative_numbers(true)
            .default_value(default_tolerance)
            .help("Videos whose durations differ by more than this many seconds are never duplicates. A negative value disables the check")
            .display_order(get_ordering(DURATION_TOLERANCE)),
    );
    compare = add_sampling_args(compare, &default_sample_count);

    let mut thumb = clap::Command::new(CMD_THUMB)
        .about("Fetch a display thumbnail through the thumbnail cache");
    thumb = thumb.arg(
        clap::Arg::new(FILE_PATHS)
            .required(true)
            .value_parser(value_parser!(PathBuf))
            .help("Video to take the thumbnail from")
            .display_order(get_ordering(FILE_PATHS)),
    );
    thumb = thumb.arg(
        clap::Arg::new(THUMB_AT)
            .long("at")
            .value_parser(value_parser!(f64))
            .default_value("0")
            .help("Timestamp of the thumbnail, in seconds")
            .display_order(get_ordering(THUMB_AT)),
    );
    thumb = thumb.arg(
        clap::Arg::new(THUMB_CACHE_DIR)
            .long("cache-dir")
            .value_parser(value_parser!(PathBuf))
            .help("Folder holding the thumbnail pack. Defaults to the user cache directory")
            .display_order(get_ordering(THUMB_CACHE_DIR)),
    );
    thumb = thumb.arg(
        clap::Arg::new(THUMB_OUT)
            .long("out")
            .value_parser(value_parser!(PathBuf))
            .help("Write the cached JPEG to this path")
            .display_order(get_ordering(THUMB_OUT)),
    );
    thumb = thumb.arg(
        clap::Arg::new(THUMB_WIDTH)
            .long("width")
            .value_parser(value_parser!(u32).range(1..))
            .default_value(default_width)
            .help("Thumbnail width in pixels. Height follows the aspect ratio")
            .display_order(get_ordering(THUMB_WIDTH)),
    );

    clap_app
        .subcommand(probe)
        .subcommand(hash)
        .subcommand(compare)
        .subcommand(thumb)
}

fn add_sampling_args(cmd: clap::Command, default_sample_count: &str) -> clap::Command {
    cmd.arg(
        clap::Arg::new(SAMPLE_COUNT)
            .long("positions")
            .value_parser(value_parser!(u32).range(1..=1000))
            .default_value(default_sample_count.to_string())
            .help("Number of evenly spaced positions sampled through each video")
            .display_order(get_ordering(SAMPLE_COUNT)),
    )
    .arg(
        clap::Arg::new(STORE_FILE)
            .long("store")
            .value_parser(value_parser!(PathBuf))
            .conflicts_with(NO_STORE)
            .help("Fingerprint store path. Defaults to a file in the user cache directory")
            .display_order(get_ordering(STORE_FILE)),
    )
    .arg(
        clap::Arg::new(NO_STORE)
            .long("no-store")
            .action(SetTrue)
            .help("Neither read nor write the fingerprint store")
            .display_order(get_ordering(NO_STORE)),
    )
}

pub fn parse_args() -> AppCfg {
    //capture the cwd once, to minimize the risk of working with two values if it is changed by
    //the OS at runtime.
    let cwd = std::env::current_dir()
        .map_err(|e| eyre::Report::new(e).wrap_err("failed to read the current directory"))
        .unwrap_or_else(|e| print_error_and_quit(e));

    let args = get_args_from_cmdline_or_file();

    let verbosity = if args.get_flag(VERBOSITY_QUIET) {
        ReportVerbosity::Quiet
    } else if args.get_flag(VERBOSITY_VERBOSE) {
        ReportVerbosity::Verbose
    } else {
        ReportVerbosity::Default
    };

    let tool_cfg = parse_tool_cfg(&args, &cwd).unwrap_or_else(|e| print_error_and_quit(e.into()));

    let (command, hash_cfg) = match args.subcommand() {
        Some((CMD_PROBE, sub)) => {
            let files = get_paths(sub, FILE_PATHS, &cwd);
            (AppCommand::Probe { files }, HashCfg::unused())
        }
        Some((CMD_HASH, sub)) => {
            let files = get_paths(sub, FILE_PATHS, &cwd);
            let cmd = AppCommand::Hash {
                files,
                images: sub.get_flag(IMAGES),
            };
            (cmd, parse_hash_cfg(sub, &cwd))
        }
        Some((CMD_COMPARE, sub)) => {
            let threshold = *sub
                .get_one::<f64>(THRESHOLD)
                .unwrap_or(&DEFAULT_SIMILARITY_THRESHOLD);
            let threshold = SimilarityThreshold::new(threshold, sub.get_flag(STRICT))
                .map_err(|e| eyre::Report::new(e).wrap_err("Invalid --threshold"))
                .unwrap_or_else(|e| print_error_and_quit(e));

            let tolerance = *sub
                .get_one::<f64>(DURATION_TOLERANCE)
                .unwrap_or(&DEFAULT_DURATION_TOLERANCE.as_secs_f64());
            let duration_tolerance = (tolerance >= 0.0).then(|| Duration::from_secs_f64(tolerance));

            let cmd = AppCommand::Compare {
                file_a: get_path(sub, FILE_A, &cwd),
                file_b: get_path(sub, FILE_B, &cwd),
                images: sub.get_flag(IMAGES),
                options: ComparisonOptions {
                    threshold,
                    duration_tolerance,
                },
            };
            (cmd, parse_hash_cfg(sub, &cwd))
        }
        Some((CMD_THUMB, sub)) => {
            let at = *sub.get_one::<f64>(THUMB_AT).unwrap_or(&0.0);
            let at = Duration::try_from_secs_f64(at)
                .map_err(|e| eyre::Report::new(e).wrap_err("Invalid --at timestamp"))
                .unwrap_or_else(|e| print_error_and_quit(e));

            let cache_dir = match sub.get_one::<PathBuf>(THUMB_CACHE_DIR) {
                Some(dir) => absolutify_path(&cwd, dir),
                None => default_cache_dir()
                    .join("thumbs")
                    .unwrap_or_else(|e| print_error_and_quit(e)),
            };

            let cmd = AppCommand::Thumb {
                file: get_path(sub, FILE_PATHS, &cwd),
                at,
                cache_dir,
                out: sub.get_one::<PathBuf>(THUMB_OUT).map(|p| absolutify_path(&cwd, p)),
                width: *sub.get_one::<u32>(THUMB_WIDTH).unwrap_or(&DEFAULT_THUMBNAIL_WIDTH),
            };
            (cmd, HashCfg::unused())
        }
        _ => {
            //subcommand_required means clap has already exited.
            print_error_and_quit(eyre::eyre!("No subcommand given"))
        }
    };

    AppCfg {
        command,
        tool_cfg,
        hash_cfg,
        verbosity,
    }
}

fn parse_tool_cfg(args: &clap::ArgMatches, cwd: &Path) -> Result<ToolCfg, AppError> {
    let mut tool_paths = ToolPaths::default();
    if let Some(ffmpeg) = args.get_one::<PathBuf>(FFMPEG_PATH) {
        tool_paths.ffmpeg = absolutify_tool_path(cwd, ffmpeg);
    }
    if let Some(ffprobe) = args.get_one::<PathBuf>(FFPROBE_PATH) {
        tool_paths.ffprobe = absolutify_tool_path(cwd, ffprobe);
    }

    let extra_args = match args.get_one::<String>(FFMPEG_ARGS) {
        Some(text) => shell_words::split(text).map_err(|e| AppError::FfmpegArgs {
            args: text.clone(),
            msg: e.to_string(),
        })?,
        None => vec![],
    };

    let timeout_secs = *args
        .get_one::<u64>(TOOL_TIMEOUT_SECS)
        .unwrap_or(&TOOL_TIMEOUT.as_secs());
    let timeout = Duration::from_secs(timeout_secs);

    let mut extractor = ExtractorConfig {
        tool_paths: tool_paths.clone(),
        hw_accel: args.get_flag(HW_ACCEL),
        timeout,
        extra_args,
        ..Default::default()
    };
    if let Some(strategy) = args.get_one::<StrategyArg>(STRATEGY) {
        extractor.strategy = (*strategy).into();
    }

    let probe = ProbeConfig {
        timeout,
        ..ProbeConfig::from(&tool_paths)
    };

    Ok(ToolCfg { extractor, probe })
}

fn parse_hash_cfg(sub: &clap::ArgMatches, cwd: &Path) -> HashCfg {
    let store_path = if sub.get_flag(NO_STORE) {
        None
    } else {
        match sub.get_one::<PathBuf>(STORE_FILE) {
            Some(path) => Some(absolutify_path(cwd, path)),
            None => Some(
                default_cache_dir()
                    .join("fingerprints.msgpack")
                    .unwrap_or_else(|e| print_error_and_quit(e)),
            ),
        }
    };

    HashCfg {
        sample_count: sub
            .get_one::<u32>(SAMPLE_COUNT)
            .map_or(DEFAULT_SAMPLE_COUNT, |n| *n as usize),
        store_path,
    }
}

fn get_paths(args: &clap::ArgMatches, name: &str, cwd: &Path) -> Vec<PathBuf> {
    match args.get_many::<PathBuf>(name) {
        Some(paths) => paths.map(|p| absolutify_path(cwd, p)).collect(),
        None => vec![],
    }
}

fn get_path(args: &clap::ArgMatches, name: &str, cwd: &Path) -> PathBuf {
    match args.get_one::<PathBuf>(name) {
        Some(path) => absolutify_path(cwd, path),
        None => print_error_and_quit(eyre::eyre!("Missing argument: {name}")),
    }
}

struct DefaultCacheDir(Option<PathBuf>);

impl DefaultCacheDir {
    fn join(self, name: &str) -> eyre::Result<PathBuf> {
        match self.0 {
            Some(dir) => Ok(dir.join(name)),
            None => Err(eyre::eyre!(
                "Could not determine the user cache directory. Pass a path explicitly"
            )),
        }
    }
}

fn default_cache_dir() -> DefaultCacheDir {
    let dirs = directories_next::ProjectDirs::from("", "", "vid_fingerprint");
    DefaultCacheDir(dirs.map(|d| d.cache_dir().to_path_buf()))
}

// Arguments are always first read from the command line, but if --args-file
// is present, then arguments are actually located in a file on disk.
fn get_args_from_cmdline_or_file() -> clap::ArgMatches {
    let cmdline_args = build_app().get_matches();

    match cmdline_args.get_one::<PathBuf>(ARGS_FILE) {
        None => cmdline_args,
        Some(args_path) => get_argsfile_args(args_path),
    }
}

fn get_argsfile_args(argsfile_path: &Path) -> clap::ArgMatches {
    let argsfile_text = std::fs::read_to_string(argsfile_path).map_err(eyre::Report::msg);

    //the arguments file needs to be split into args in the same way as the shell would do it.
    let args = argsfile_text
        .and_then(|contents| shell_words::split(&contents).map_err(eyre::Report::msg))
        .map_err(|e| {
            e.wrap_err(format!(
                "Failed to parse args file at location {}",
                argsfile_path.to_string_lossy()
            ))
        })
        .unwrap_or_else(|e| print_error_and_quit(e));

    //the binary name is not in the file.
    build_app().no_binary_name(true).get_matches_from(args)
}

fn absolutify_path(cwd: &Path, path: &Path) -> PathBuf {
    let path = if path.is_relative() {
        cwd.join(path)
    } else {
        path.to_path_buf()
    };

    //a path that does not exist yet (e.g an output file) is kept as is.
    path.canonicalize().unwrap_or(path)
}

// Bare program names are left for PATH lookup.
fn absolutify_tool_path(cwd: &Path, path: &Path) -> PathBuf {
    if path.components().count() == 1 {
        path.to_path_buf()
    } else {
        absolutify_path(cwd, path)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(args: &[&str]) -> clap::ArgMatches {
        build_app().no_binary_name(true).get_matches_from(args)
    }

    #[test]
    fn test_every_arg_has_an_ordering() {
        //building the app panics if any argument is missing from DISPLAY_ORDERING.
        build_app().debug_assert();
    }

    #[test]
    fn test_global_args_after_subcommand() {
        let args = parse(&[
            "compare",
            "a.mp4",
            "b.mp4",
            "--hw-accel",
            "--ffmpeg-args",
            "-threads 2",
        ]);
        let cfg = parse_tool_cfg(&args, Path::new("/work")).unwrap();

        assert!(cfg.extractor.hw_accel);
        assert_eq!(cfg.extractor.extra_args, vec!["-threads", "2"]);
        assert_eq!(cfg.extractor.tool_paths, ToolPaths::default());
    }

    #[test]
    fn test_unbalanced_ffmpeg_args() {
        let args = parse(&["probe", "a.mp4", "--ffmpeg-args", "-vf \"scale"]);
        let res = parse_tool_cfg(&args, Path::new("/work"));
        assert!(matches!(res, Err(AppError::FfmpegArgs { .. })));
    }

    #[test]
    fn test_tool_paths() {
        let args = parse(&["probe", "a.mp4", "--ffmpeg", "ffmpeg7", "--ffprobe", "bin/ffprobe"]);
        let cfg = parse_tool_cfg(&args, Path::new("/work")).unwrap();

        assert_eq!(cfg.extractor.tool_paths.ffmpeg, PathBuf::from("ffmpeg7"));
        assert_eq!(cfg.probe.ffprobe, PathBuf::from("/work/bin/ffprobe"));
    }

    #[test]
    fn test_hash_defaults() {
        let args = parse(&["hash", "a.mp4", "--no-store"]);
        let (_, sub) = args.subcommand().unwrap();
        let cfg = parse_hash_cfg(sub, Path::new("/work"));

        assert_eq!(cfg.sample_count, DEFAULT_SAMPLE_COUNT);
        assert_eq!(cfg.store_path, None);
    }
}
