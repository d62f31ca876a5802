use std::{
    ffi::{OsStr, OsString},
    io::prelude::*,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread::JoinHandle,
    time::Duration,
};

#[cfg(target_family = "windows")]
use std::os::windows::process::CommandExt;

use log::{debug, trace};
use wait_timeout::ChildExt;
use FfmpegError::*;

use crate::*;

/// Wall-clock limit for any single ffmpeg/ffprobe invocation.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(15);

/// Side length of the raw grayscale frame produced by [`FrameGrabFormat::GraySample`].
pub const GRAY_SAMPLE_DIM: u32 = 32;

/// Number of bytes in a raw grayscale sample frame.
pub const GRAY_SAMPLE_LEN: usize = (GRAY_SAMPLE_DIM * GRAY_SAMPLE_DIM) as usize;

//ffmpeg can be very chatty. Only keep the end of stderr, which is where the
//actual cause of failure is printed.
const STDERR_TAIL_CHARS: usize = 500;

/// Paths to the ffmpeg and ffprobe binaries. By default both are looked up on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

/// The output of a command which ran to completion and exited successfully.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// A single invocation of an external tool, guarded by a hard timeout.
///
/// stdout and stderr are drained on their own threads so that a chatty child can
/// never block on a full pipe. Both threads are joined before the exit status is
/// trusted. If the deadline passes the child is killed and reaped.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
    timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: vec![],
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;
        self
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// The command line as it would be typed into a shell. Used for diagnostics only.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(OsStr::to_string_lossy)
            .collect::<Vec<_>>()
            .join(" ")
    }

    // When the binary is given by path, run it from its own directory so that any
    // libraries shipped next to it are found. A relative path is resolved against our own
    // working directory first, as the child's working directory is no longer the same.
    fn resolved_program(&self) -> (PathBuf, Option<PathBuf>) {
        let has_dir = self
            .program
            .parent()
            .is_some_and(|parent| !parent.as_os_str().is_empty());
        if !has_dir {
            return (self.program.clone(), None);
        }

        let program = std::path::absolute(&self.program).unwrap_or_else(|_| self.program.clone());
        let dir = program.parent().map(Path::to_path_buf);
        (program, dir)
    }

    pub fn run(&self) -> Result<ToolOutput, FfmpegError> {
        let (program, dir) = self.resolved_program();

        let mut command = Command::new(&program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = dir {
            command.current_dir(dir);
        }

        //do not spawn a command window on windows when when in a gui application
        #[cfg(target_family = "windows")]
        command.creation_flags(winapi::um::winbase::CREATE_NO_WINDOW);

        trace!(target: "ffmpeg_cmdline", "spawning: {}", self.display());

        let mut child = command.spawn().map_err(|e| match e.kind() {
            //shell failed to execute the command. Separate out FileNotFound from all other errors
            //as by far the most likely cause is ffmpeg is not installed.
            std::io::ErrorKind::NotFound => {
                FfmpegNotFound(self.program.to_string_lossy().to_string())
            }
            _ => Io(format!("failed to run {}: {e}", self.display())),
        })?;

        let stdout_thread = drain_on_thread(child.stdout.take());
        let stderr_thread = drain_on_thread(child.stderr.take());

        let wait_result = match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => Ok(status),
            Ok(None) => {
                let _kill_error = child.kill();
                let _wait_error = child.wait();
                Err(Timeout {
                    command: self.display(),
                    timeout: self.timeout,
                })
            }
            Err(e) => {
                let _kill_error = child.kill();
                let _wait_error = child.wait();
                Err(Io(format!("failed to wait for {}: {e}", self.display())))
            }
        };

        //the child has exited (or been killed) so both pipes are closed and the
        //reader threads will finish.
        let stdout = stdout_thread.join().unwrap_or_default();
        let stderr = stderr_thread.join().unwrap_or_default();

        let status = wait_result?;
        if status.success() {
            Ok(ToolOutput { stdout, stderr })
        } else {
            let err = FfmpegInternal {
                command: self.display(),
                status: status.to_string(),
                stderr_tail: stderr_tail(&stderr),
            };
            debug!(target: "ffmpeg_cmdline", "{err}");
            Err(err)
        }
    }
}

fn drain_on_thread<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: Read + Send + 'static,
{
    std::thread::spawn(move || {
        let mut acc = vec![];
        if let Some(mut pipe) = pipe {
            let _read_error = pipe.read_to_end(&mut acc);
        }
        acc
    })
}

pub(crate) fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim_end();
    let num_chars = text.chars().count();
    text.chars()
        .skip(num_chars.saturating_sub(STDERR_TAIL_CHARS))
        .collect()
}

/// Make a path safe to hand to ffmpeg on the command line. Relative paths are
/// resolved against the current directory (the tool may run from elsewhere), and on
/// windows long paths get the `\\?\` prefix.
pub fn tool_safe_path(src_path: &Path) -> OsString {
    let absolute = std::path::absolute(src_path).unwrap_or_else(|_| src_path.to_path_buf());

    #[cfg(target_family = "windows")]
    {
        let as_str = absolute.as_os_str().to_string_lossy();
        if !as_str.starts_with(r"\\?\") {
            if let Some(unc) = as_str.strip_prefix(r"\\") {
                return OsString::from(format!(r"\\?\UNC\{unc}"));
            }
            return OsString::from(format!(r"\\?\{as_str}"));
        }
    }

    absolute.into_os_string()
}

/// Use ffprobe to describe every stream in the media file, and return the raw JSON printed by
/// ffprobe.
pub fn get_media_json(
    ffprobe: impl AsRef<Path>,
    src_path: impl AsRef<Path>,
    timeout: Duration,
) -> Result<String, FfmpegError> {
    let mut command = ToolCommand::new(ffprobe);

    #[rustfmt::skip]
    command
        .args([
            OsStr::new("-hide_banner"),
            OsStr::new("-loglevel"),      OsStr::new("error"),
            OsStr::new("-print_format"),  OsStr::new("json"),
            OsStr::new("-sexagesimal"),
            OsStr::new("-show_format"),
            OsStr::new("-show_streams"),
        ])
        .arg(tool_safe_path(src_path.as_ref()))
        .timeout(timeout);

    let output = command.run()?;
    if output.stdout.is_empty() {
        return Err(NoOutput {
            command: command.display(),
        });
    }

    String::from_utf8(output.stdout).map_err(|_| Utf8Conversion)
}

/// Use ffprobe to describe the given media file.
pub fn probe_media(
    ffprobe: impl AsRef<Path>,
    src_path: impl AsRef<Path>,
    timeout: Duration,
) -> Result<MediaInfo, FfmpegError> {
    let json = get_media_json(ffprobe, src_path, timeout)?;
    Ok(MediaInfo::from_ffprobe_json(&json)?)
}

/// What kind of single frame to pull out of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameGrabFormat {
    /// 32x32 raw 8-bit grayscale, exactly [`GRAY_SAMPLE_LEN`] bytes.
    GraySample,

    /// JPEG, scaled to the given width keeping the aspect ratio.
    ScaledJpeg { width: u32 },

    /// JPEG at the source resolution.
    FullJpeg,
}

#[derive(Clone, Debug)]
pub struct FfmpegFrameGrabBuilder {
    src_path: PathBuf,
    ffmpeg: PathBuf,
    timestamp: Duration,
    hw_accel: bool,
    extra_args: Vec<String>,
    timeout: Duration,
}

impl FfmpegFrameGrabBuilder {
    pub fn new(src_path: impl AsRef<Path>) -> Self {
        Self {
            src_path: src_path.as_ref().to_path_buf(),
            ffmpeg: ToolPaths::default().ffmpeg,
            timestamp: Duration::ZERO,
            hw_accel: false,
            extra_args: vec![],
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn src_path(&self) -> &Path {
        &self.src_path
    }

    pub fn ffmpeg_path(&mut self, ffmpeg: impl AsRef<Path>) -> &mut Self {
        self.ffmpeg = ffmpeg.as_ref().to_path_buf();
        self
    }

    pub fn timestamp(&mut self, timestamp: Duration) -> &mut Self {
        self.timestamp = timestamp;
        self
    }

    pub fn hw_accel(&mut self, val: bool) -> &mut Self {
        self.hw_accel = val;
        self
    }

    /// Extra arguments, passed verbatim just before the output target.
    pub fn extra_args(&mut self, args: &[String]) -> &mut Self {
        self.extra_args = args.to_vec();
        self
    }

    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = timeout;
        self
    }

    /// The arguments ffmpeg will be called with.
    pub fn args(&self, format: FrameGrabFormat) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-nostats"]
            .iter()
            .map(OsString::from)
            .collect();

        if self.hw_accel {
            args.extend(["-hwaccel", "auto"].map(OsString::from));
        }

        //seeking on the input side jumps to the nearest keyframe instead of decoding
        //everything up to the timestamp.
        args.push("-ss".into());
        args.push(format!("{:.3}", self.timestamp.as_secs_f64()).into());
        args.push("-i".into());
        args.push(tool_safe_path(&self.src_path));

        args.extend(["-an", "-sn", "-frames:v", "1"].map(OsString::from));

        let format_args: Vec<String> = match format {
            FrameGrabFormat::GraySample => vec![
                "-vf".into(),
                format!("scale={GRAY_SAMPLE_DIM}:{GRAY_SAMPLE_DIM}"),
                "-pix_fmt".into(),
                "gray".into(),
                "-f".into(),
                "rawvideo".into(),
            ],
            FrameGrabFormat::ScaledJpeg { width } => vec![
                "-vf".into(),
                format!("scale={width}:-1"),
                "-c:v".into(),
                "mjpeg".into(),
                "-f".into(),
                "image2pipe".into(),
            ],
            FrameGrabFormat::FullJpeg => vec![
                "-c:v".into(),
                "mjpeg".into(),
                "-f".into(),
                "image2pipe".into(),
            ],
        };
        args.extend(format_args.into_iter().map(OsString::from));

        args.extend(self.extra_args.iter().map(OsString::from));
        args.push("-".into());

        args
    }

    /// Run ffmpeg and return the bytes of the grabbed frame. Partial output is never returned.
    pub fn grab(&self, format: FrameGrabFormat) -> Result<Vec<u8>, FfmpegError> {
        let mut command = ToolCommand::new(&self.ffmpeg);
        command.args(self.args(format)).timeout(self.timeout);

        let output = command.run()?;

        if output.stdout.is_empty() {
            return Err(NoOutput {
                command: command.display(),
            });
        }

        if format == FrameGrabFormat::GraySample && output.stdout.len() != GRAY_SAMPLE_LEN {
            return Err(WrongOutputSize {
                expected: GRAY_SAMPLE_LEN,
                actual: output.stdout.len(),
            });
        }

        Ok(output.stdout)
    }
}

pub fn ffmpeg_and_ffprobe_are_callable(paths: &ToolPaths) -> bool {
    let callable = |program: &Path| {
        ToolCommand::new(program)
            .arg("-version")
            .timeout(DEFAULT_TOOL_TIMEOUT)
            .run()
            .is_ok()
    };

    callable(&paths.ffprobe) && callable(&paths.ffmpeg)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_stderr_tail_keeps_the_end() {
        let long = "a".repeat(1000) + "the real error";
        let tail = stderr_tail(long.as_bytes());
        assert_eq!(tail.chars().count(), STDERR_TAIL_CHARS);
        assert!(tail.ends_with("the real error"));

        assert_eq!(stderr_tail(b"short\n"), "short");
    }

    #[test]
    fn test_seek_comes_before_input() {
        let mut builder = FfmpegFrameGrabBuilder::new("/vids/a.mp4");
        builder.timestamp(Duration::from_millis(12_345));
        let args = builder.args(FrameGrabFormat::GraySample);

        let pos = |needle: &str| args.iter().position(|a| a == needle).unwrap();
        assert!(pos("-ss") < pos("-i"));
        assert_eq!(args[pos("-ss") + 1], "12.345");
        assert!(!args.iter().any(|a| a == "-hwaccel"));
    }

    #[test]
    fn test_extra_args_come_before_output() {
        let mut builder = FfmpegFrameGrabBuilder::new("/vids/a.mp4");
        builder
            .hw_accel(true)
            .extra_args(&["-threads".to_string(), "1".to_string()]);
        let args = builder.args(FrameGrabFormat::ScaledJpeg { width: 100 });

        let n = args.len();
        assert_eq!(args[n - 3], "-threads");
        assert_eq!(args[n - 2], "1");
        assert_eq!(args[n - 1], "-");
        assert!(args.iter().any(|a| a == "scale=100:-1"));

        let hw = args.iter().position(|a| a == "-hwaccel").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(hw < input);
    }

    #[test]
    fn test_missing_binary_is_not_found() {
        let ret = ToolCommand::new("/definitely/not/a/real/ffmpeg").run();
        assert!(matches!(ret, Err(FfmpegNotFound(_))));
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn test_relative_program_path_runs() {
        let dir = PathBuf::from(format!("relative_tool_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::os::unix::fs::symlink("/bin/sh", dir.join("tool_sh")).unwrap();

        let ret = ToolCommand::new(dir.join("tool_sh"))
            .args(["-c", "echo ok"])
            .run();
        let _ = std::fs::remove_dir_all(&dir);

        assert_eq!(ret.unwrap().stdout, b"ok\n");
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn test_spawn_error_names_the_command() {
        //a directory exists, so this is not reported as a missing binary.
        let ret = ToolCommand::new("/").arg("-version").run();
        match ret {
            Err(Io(msg)) => {
                assert!(msg.starts_with("failed to run / -version: "), "{msg}");
                assert!(msg.len() > "failed to run / -version: ".len());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn test_nonzero_exit_reports_stderr() {
        let ret = ToolCommand::new("sh")
            .args(["-c", "echo boom >&2; exit 3"])
            .run();
        match ret {
            Err(FfmpegInternal { stderr_tail, .. }) => assert_eq!(stderr_tail, "boom"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn test_large_output_on_both_pipes_does_not_deadlock() {
        let ret = ToolCommand::new("sh")
            .args([
                "-c",
                "head -c 1000000 /dev/zero; head -c 1000000 /dev/zero >&2",
            ])
            .run()
            .unwrap();
        assert_eq!(ret.stdout.len(), 1_000_000);
        assert_eq!(ret.stderr.len(), 1_000_000);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_timeout_kills_the_child() {
        let dir = std::env::temp_dir().join(format!("tool_timeout_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let pid_file = dir.join("pid");

        let script = format!("echo $$ > {}; exec sleep 30", pid_file.display());
        let start = std::time::Instant::now();
        let ret = ToolCommand::new("sh")
            .args(["-c", &script])
            .timeout(Duration::from_millis(500))
            .run();

        assert!(matches!(ret, Err(Timeout { .. })));
        assert!(start.elapsed() < Duration::from_secs(10));

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let proc_entry = PathBuf::from("/proc").join(pid.trim());
        assert!(!proc_entry.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
