//! External process runner and FFmpeg command builder.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vfetch_models::ProgressEvent;

use crate::error::{MediaError, MediaResult};
use crate::progress::{PercentTracker, ProgressParser};
use crate::tools::check_tool;

/// Output lines kept for the error message of a failed process.
const ERROR_TAIL_LINES: usize = 5;

/// A program plus its arguments.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Program name used in error messages and logs.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Shell-like rendering for debug logs.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().to_string()));
        parts.join(" ")
    }
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output path, or `-` for the null muxer
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Set CRF (quality).
    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    /// Set target video bitrate.
    pub fn video_bitrate_kbps(self, kbps: u32) -> Self {
        self.output_arg("-b:v").output_arg(format!("{}k", kbps))
    }

    /// Select a two-pass pass number and its statistics file prefix.
    pub fn pass(self, pass: u8, passlog: impl AsRef<Path>) -> Self {
        self.output_arg("-pass")
            .output_arg(pass.to_string())
            .output_arg("-passlogfile")
            .output_arg(passlog.as_ref().to_string_lossy().to_string())
    }

    /// Override output frame rate.
    pub fn frame_rate(self, fps: f64) -> Self {
        self.output_arg("-r").output_arg(format_fps(fps))
    }

    /// Set output audio channel count.
    pub fn audio_channels(self, channels: u32) -> Self {
        self.output_arg("-ac").output_arg(channels.to_string())
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set audio bitrate.
    pub fn audio_bitrate_kbps(self, kbps: u32) -> Self {
        self.output_arg("-b:a").output_arg(format!("{}k", kbps))
    }

    /// Drop audio from the output.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Force the output muxer.
    pub fn format(self, format: impl Into<String>) -> Self {
        self.output_arg("-f").output_arg(format)
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Machine-readable progress on stderr, no interactive stats line
        args.push("-nostats".to_string());
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        args.extend(self.input_args.clone());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.clone());

        args.push(self.output.to_string_lossy().to_string());

        args
    }

    /// Bind to a concrete FFmpeg binary.
    pub fn to_tool_command(&self, ffmpeg: impl AsRef<Path>) -> ToolCommand {
        ToolCommand::new(ffmpeg).args(self.build_args())
    }
}

fn format_fps(fps: f64) -> String {
    if fps.fract() == 0.0 {
        format!("{}", fps as u64)
    } else {
        format!("{:.3}", fps)
    }
}

/// A spawned process whose stdout and stderr are merged into one line stream.
///
/// Lines are yielded lazily through [`RunningProcess::next_line`]; the stream is
/// finite and cannot be restarted.
pub struct RunningProcess {
    program: String,
    child: Child,
    lines: mpsc::UnboundedReceiver<String>,
    readers: Vec<JoinHandle<()>>,
    tail: VecDeque<String>,
}

impl RunningProcess {
    /// Next trimmed, non-empty output line, or `None` once both pipes close.
    pub async fn next_line(&mut self) -> Option<String> {
        let line = self.lines.recv().await?;
        self.remember(&line);
        Some(line)
    }

    fn remember(&mut self, line: &str) {
        if self.tail.len() == ERROR_TAIL_LINES {
            self.tail.pop_front();
        }
        self.tail.push_back(line.to_string());
    }

    /// Kill the process. Errors are ignored; the process may already be gone.
    pub async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }

    /// Drain remaining output and wait for exit.
    ///
    /// Exit code 0 is success; anything else is an
    /// [`MediaError::ExternalProcess`] carrying the code and the last lines of
    /// output.
    pub async fn wait(mut self) -> MediaResult<()> {
        while let Some(line) = self.lines.recv().await {
            self.remember(&line);
        }
        for reader in self.readers.drain(..) {
            let _ = reader.await;
        }

        let status = self.child.wait().await?;
        if status.success() {
            debug!(program = %self.program, "Process exited successfully");
            return Ok(());
        }

        let message = if self.tail.is_empty() {
            "no output".to_string()
        } else {
            self.tail.iter().cloned().collect::<Vec<_>>().join(" | ")
        };
        warn!(
            program = %self.program,
            exit_code = ?status.code(),
            "Process exited with failure"
        );
        Err(MediaError::external_process(
            self.program.clone(),
            status.code(),
            message,
        ))
    }
}

/// Forward lines from one pipe into the shared channel.
///
/// Segments are split on both `\n` and `\r` so carriage-return progress
/// updates arrive as separate lines.
fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut segments = BufReader::new(reader).split(b'\n');
        while let Ok(Some(segment)) = segments.next_segment().await {
            let text = String::from_utf8_lossy(&segment);
            for piece in text.split('\r') {
                let piece = piece.trim();
                if piece.is_empty() {
                    continue;
                }
                if tx.send(piece.to_string()).is_err() {
                    return;
                }
            }
        }
    })
}

/// Runner for external tools with progress extraction.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    /// Timeout in seconds
    timeout_secs: Option<u64>,
}

impl ProcessRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self { timeout_secs: None }
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Spawn a command with merged, line-buffered output capture.
    ///
    /// Lines keep their order within stdout and within stderr; lines from
    /// the two streams interleave in arrival order only.
    pub fn spawn(&self, cmd: &ToolCommand) -> MediaResult<RunningProcess> {
        check_tool(cmd.program())?;
        debug!("Running: {}", cmd.display());

        let mut child = Command::new(cmd.program())
            .args(cmd.get_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, tx));
        }

        Ok(RunningProcess {
            program: cmd.program_name(),
            child,
            lines: rx,
            readers,
            tail: VecDeque::with_capacity(ERROR_TAIL_LINES),
        })
    }

    /// Run a command to completion, emitting progress events.
    ///
    /// Every loggable line becomes a `log` event; each percentage the parser
    /// extracts additionally becomes a `{stage, percent}` event, kept
    /// non-decreasing for `stage_label`. Output ordering follows
    /// [`ProcessRunner::spawn`].
    pub async fn run_with_progress<P, F>(
        &self,
        cmd: &ToolCommand,
        stage_label: &str,
        parser: &mut P,
        mut emit: F,
    ) -> MediaResult<()>
    where
        P: ProgressParser + ?Sized,
        F: FnMut(ProgressEvent),
    {
        let mut process = self.spawn(cmd)?;
        let mut tracker = PercentTracker::new();

        let drive = async {
            while let Some(line) = process.next_line().await {
                let parsed = parser.parse_line(&line);
                if parsed.loggable {
                    emit(ProgressEvent::log(line));
                }
                if let Some(percent) = parsed.percent {
                    if let Some(value) = tracker.accept(stage_label, percent) {
                        emit(ProgressEvent::stage(stage_label, value));
                    }
                }
            }
        };

        if let Some(timeout_secs) = self.timeout_secs {
            if tokio::time::timeout(Duration::from_secs(timeout_secs), drive)
                .await
                .is_err()
            {
                warn!(
                    program = %cmd.program_name(),
                    "Process timed out after {} seconds, killing",
                    timeout_secs
                );
                process.kill().await;
                return Err(MediaError::Timeout(timeout_secs));
            }
        } else {
            drive.await;
        }

        process.wait().await
    }

    /// Run a command and collect its merged output without progress handling.
    pub async fn run_collect(&self, cmd: &ToolCommand) -> MediaResult<Vec<String>> {
        let mut process = self.spawn(cmd)?;
        let mut lines = Vec::new();
        while let Some(line) = process.next_line().await {
            lines.push(line);
        }
        process.wait().await?;
        Ok(lines)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Write an executable shell script standing in for an external tool.
    pub fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::fake_tool;
    use super::*;
    use crate::progress::{DownloadProgressParser, LogOnlyParser};
    use tempfile::TempDir;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("input.mp4", "output.mkv")
            .video_codec("libx265")
            .preset("medium")
            .crf(28)
            .audio_channels(2)
            .audio_codec("libopus")
            .audio_bitrate_kbps(96);

        let args = cmd.build_args();
        assert_eq!(args[0], "-y");
        assert!(args.windows(2).any(|w| w == ["-i", "input.mp4"]));
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx265"]));
        assert!(args.windows(2).any(|w| w == ["-crf", "28"]));
        assert!(args.windows(2).any(|w| w == ["-b:a", "96k"]));
        assert!(args.windows(2).any(|w| w == ["-progress", "pipe:2"]));
        assert_eq!(args.last().unwrap(), "output.mkv");
    }

    #[test]
    fn test_frame_rate_formatting() {
        assert_eq!(format_fps(30.0), "30");
        assert_eq!(format_fps(29.97), "29.970");
    }

    #[tokio::test]
    async fn test_run_emits_logs_and_progress() {
        let dir = TempDir::new().unwrap();
        let tool = fake_tool(
            dir.path(),
            "agent",
            "echo '[download] Destination: out.mp4'\n\
             echo '[download]  10.0% of 1MiB'\n\
             echo '[download]   5.0% of 1MiB'\n\
             echo '[download] 100.0% of 1MiB'",
        );

        let mut events = Vec::new();
        ProcessRunner::new()
            .run_with_progress(
                &ToolCommand::new(&tool),
                "Downloading",
                &mut DownloadProgressParser,
                |e| events.push(e),
            )
            .await
            .unwrap();

        let logs: Vec<_> = events.iter().filter_map(|e| e.log.clone()).collect();
        assert_eq!(logs.len(), 4);
        assert_eq!(logs[0], "[download] Destination: out.mp4");

        let percents: Vec<f64> = events.iter().filter_map(|e| e.percent).collect();
        assert_eq!(percents.first(), Some(&10.0));
        assert_eq!(percents.last(), Some(&100.0));
        assert!(percents.windows(2).all(|w| w[1] >= w[0]));
        assert!(events
            .iter()
            .filter(|e| e.percent.is_some())
            .all(|e| e.stage.as_deref() == Some("Downloading")));
    }

    #[tokio::test]
    async fn test_carriage_return_segments_are_split() {
        let dir = TempDir::new().unwrap();
        let tool = fake_tool(dir.path(), "agent", "printf '[download]  1.0%%\\r[download]  2.0%%\\n'");

        let mut percents = Vec::new();
        ProcessRunner::new()
            .run_with_progress(
                &ToolCommand::new(&tool),
                "Downloading",
                &mut DownloadProgressParser,
                |e| percents.extend(e.percent),
            )
            .await
            .unwrap();

        assert_eq!(percents, vec![1.0, 2.0]);
    }

    #[tokio::test]
    async fn test_each_stream_keeps_its_line_order() {
        let dir = TempDir::new().unwrap();
        let tool = fake_tool(
            dir.path(),
            "encoder",
            "for i in 1 2 3 4 5 6 7 8; do echo \"out $i\"; echo \"err $i\" >&2; done",
        );

        let mut logs = Vec::new();
        ProcessRunner::new()
            .run_with_progress(&ToolCommand::new(&tool), "Encoding", &mut LogOnlyParser, |e| {
                logs.extend(e.log)
            })
            .await
            .unwrap();

        let expected: Vec<String> = (1..=8).map(|i| format!("{i}")).collect();
        for prefix in ["out ", "err "] {
            let seen: Vec<String> = logs
                .iter()
                .filter_map(|l| l.strip_prefix(prefix))
                .map(str::to_string)
                .collect();
            assert_eq!(seen, expected, "{prefix}lines reordered");
        }
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_external_process_error() {
        let dir = TempDir::new().unwrap();
        let tool = fake_tool(dir.path(), "encoder", "echo 'Conversion failed!' 1>&2\nexit 3");

        let err = ProcessRunner::new()
            .run_with_progress(&ToolCommand::new(&tool), "Encoding", &mut LogOnlyParser, |_| {})
            .await
            .unwrap_err();

        match err {
            MediaError::ExternalProcess {
                program,
                exit_code,
                message,
            } => {
                assert_eq!(program, "encoder");
                assert_eq!(exit_code, Some(3));
                assert!(message.contains("Conversion failed!"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = TempDir::new().unwrap();
        let tool = fake_tool(dir.path(), "slow", "sleep 5");

        let err = ProcessRunner::new()
            .with_timeout(1)
            .run_with_progress(&ToolCommand::new(&tool), "Waiting", &mut LogOnlyParser, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Timeout(1)));
    }

    #[tokio::test]
    async fn test_stderr_is_captured() {
        let dir = TempDir::new().unwrap();
        let tool = fake_tool(dir.path(), "agent", "echo 'WARNING: falling back' 1>&2");

        let lines = ProcessRunner::new()
            .run_collect(&ToolCommand::new(&tool))
            .await
            .unwrap();
        assert_eq!(lines, vec!["WARNING: falling back".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = ProcessRunner::new()
            .run_collect(&ToolCommand::new("/nonexistent/tool"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::ToolNotFound(_)));
    }
}
