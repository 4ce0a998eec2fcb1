//! Re-encode a local media file.

use std::path::{Path, PathBuf};

use tracing::debug;
use vfetch_media::{
    is_supported_media, remove_by_prefix, remove_quietly, EncodePlan, EncodeProgressParser,
    MediaError,
};
use vfetch_models::encoding::OUTPUT_CONTAINER;
use vfetch_models::{output_filename, TranscodeOptions, TranscodeRequest};
use vfetch_queue::ProgressSender;

use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};

const ENCODE_STAGE: &str = "Encoding...";
const ENCODE_COMPLETE: &str = "Encoding complete!";
const COPY_COMPLETE: &str = "Copy complete!";

/// Transcode stage entry point. Returns the output path.
pub async fn run(
    ctx: &PipelineContext,
    job: &ProgressSender,
    req: &TranscodeRequest,
) -> WorkerResult<PathBuf> {
    let input = ctx.config.resolve_path(&req.input)?;
    if !is_supported_media(&input) {
        return Err(MediaError::unsupported_media(input.display().to_string()).into());
    }
    if !input.is_file() {
        return Err(MediaError::FileNotFound(input).into());
    }

    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let fallback = format!("{}_encoded", stem);
    let name = output_filename(req.output_name.as_deref(), OUTPUT_CONTAINER, &fallback);
    let output = ctx.download_dir().join(name);
    if output == input {
        return Err(WorkerError::invalid_request(
            "Output name must differ from the input file",
        ));
    }

    job.log(format!(
        "Transcoding {} -> {}",
        input.display(),
        output.display()
    ));
    encode(ctx, job, &input, &output, &req.options).await?;
    Ok(output)
}

/// Encode `input` into `output` according to `options`.
///
/// `codec == none` copies the file and reports a single completion event.
/// A failed encode leaves no partial output behind.
pub(crate) async fn encode(
    ctx: &PipelineContext,
    job: &ProgressSender,
    input: &Path,
    output: &Path,
    options: &TranscodeOptions,
) -> WorkerResult<()> {
    let source_channels = if options.requires_encode() {
        ctx.prober.audio_channel_count(input).await
    } else {
        0
    };

    let Some(plan) = EncodePlan::resolve(options, source_channels)? else {
        tokio::fs::copy(input, output).await?;
        job.stage(COPY_COMPLETE, 100.0);
        return Ok(());
    };

    let duration = ctx.prober.duration(input).await;
    debug!(
        job_id = %job.job_id(),
        encoder = plan.encoder,
        two_pass = plan.is_two_pass(),
        duration,
        "Resolved encode plan"
    );

    let passlog_prefix = format!(".passlog-{}", job.job_id().short());
    let passlog = ctx.download_dir().join(&passlog_prefix);
    let commands = plan.commands(input, output, &passlog);
    let total = commands.len();

    let result: WorkerResult<()> = async {
        for (index, command) in commands.iter().enumerate() {
            let label = if total > 1 {
                format!("Pass {}/{}", index + 1, total)
            } else {
                ENCODE_STAGE.to_string()
            };
            job.stage(&label, 0.0);

            let mut parser = EncodeProgressParser::new(duration);
            ctx.runner
                .run_with_progress(
                    &command.to_tool_command(&ctx.config.tools.ffmpeg),
                    &label,
                    &mut parser,
                    |event| job.emit(event),
                )
                .await?;
        }
        Ok(())
    }
    .await;

    if plan.is_two_pass() {
        remove_by_prefix(ctx.download_dir(), &passlog_prefix).await;
    }

    match result {
        Ok(()) => {
            job.stage(ENCODE_COMPLETE, 100.0);
            Ok(())
        }
        Err(e) => {
            remove_quietly(output).await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::{
        assert_monotonic, context, drain_pending, fake_tool, missing_tools,
    };
    use tempfile::TempDir;
    use vfetch_media::ToolPaths;
    use vfetch_models::{JobId, PassMode, StageKind, VideoCodec};
    use vfetch_queue::ProgressHub;

    fn request(input: &str, codec: VideoCodec, pass_mode: PassMode) -> TranscodeRequest {
        TranscodeRequest {
            input: input.to_string(),
            output_name: None,
            options: TranscodeOptions {
                codec,
                pass_mode,
                ..Default::default()
            },
            publish: false,
        }
    }

    /// Encoder stand-in: records its arguments, prints progress and writes
    /// the last argument unless it is `-`.
    fn fake_ffmpeg(dir: &std::path::Path) -> std::path::PathBuf {
        let log = dir.join("ffmpeg-calls");
        fake_tool(
            dir,
            "ffmpeg",
            &format!(
                r#"echo "$@" >> "{log}"
for last in "$@"; do :; done
echo "out_time=00:00:05.00" >&2
echo "progress=continue" >&2
echo "out_time=00:00:10.00" >&2
echo "progress=end" >&2
if [ "$last" != "-" ]; then printf encoded > "$last"; fi"#,
                log = log.display()
            ),
        )
    }

    fn fake_ffprobe(dir: &std::path::Path) -> std::path::PathBuf {
        fake_tool(
            dir,
            "ffprobe",
            r#"case "$*" in
  *channels*) echo "2" ;;
  *) echo '{"format": {"duration": "10.000000"}}' ;;
esac"#,
        )
    }

    #[tokio::test]
    async fn test_codec_none_copies_without_encoder() {
        let dir = TempDir::new().unwrap();
        let mut tools = missing_tools(dir.path());
        tools.ffmpeg = fake_ffmpeg(dir.path());
        let ctx = context(dir.path(), tools, None).await;
        std::fs::write(ctx.download_dir().join("in.mp4"), b"source").unwrap();

        let hub = ProgressHub::new();
        let job_id = JobId::new();
        let job = hub.create(job_id.clone(), StageKind::Transcode).unwrap();

        let output = run(&ctx, &job, &request("in.mp4", VideoCodec::None, PassMode::OnePass))
            .await
            .unwrap();

        assert_eq!(output, ctx.download_dir().join("in_encoded.mkv"));
        assert_eq!(std::fs::read(&output).unwrap(), b"source");
        assert!(!dir.path().join("ffmpeg-calls").exists());

        let events = drain_pending(&hub, &job_id).await;
        let percents: Vec<f64> = events.iter().filter_map(|e| e.percent).collect();
        assert_eq!(percents, vec![100.0]);
    }

    #[tokio::test]
    async fn test_unsupported_extension_fails_fast() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), missing_tools(dir.path()), None).await;
        std::fs::write(ctx.download_dir().join("notes.txt"), b"text").unwrap();

        let hub = ProgressHub::new();
        let job = hub.create(JobId::new(), StageKind::Transcode).unwrap();
        let err = run(&ctx, &job, &request("notes.txt", VideoCodec::H265, PassMode::OnePass))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Media(MediaError::UnsupportedMedia(_))));
    }

    #[tokio::test]
    async fn test_two_pass_without_bitrate_never_runs_encoder() {
        let dir = TempDir::new().unwrap();
        let mut tools = missing_tools(dir.path());
        tools.ffmpeg = fake_ffmpeg(dir.path());
        let ctx = context(dir.path(), tools, None).await;
        std::fs::write(ctx.download_dir().join("in.mkv"), b"source").unwrap();

        let hub = ProgressHub::new();
        let job = hub.create(JobId::new(), StageKind::Transcode).unwrap();
        let err = run(&ctx, &job, &request("in.mkv", VideoCodec::Av1, PassMode::TwoPass))
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::Media(MediaError::MissingParameter(_))));
        assert!(!dir.path().join("ffmpeg-calls").exists());
    }

    #[tokio::test]
    async fn test_one_pass_encode_reports_progress() {
        let dir = TempDir::new().unwrap();
        let tools = ToolPaths {
            ffmpeg: fake_ffmpeg(dir.path()),
            ffprobe: fake_ffprobe(dir.path()),
            ..missing_tools(dir.path())
        };
        let ctx = context(dir.path(), tools, None).await;
        std::fs::write(ctx.download_dir().join("in.mp4"), b"source").unwrap();

        let hub = ProgressHub::new();
        let job_id = JobId::new();
        let job = hub.create(job_id.clone(), StageKind::Transcode).unwrap();

        let mut req = request("in.mp4", VideoCodec::H265, PassMode::OnePass);
        req.output_name = Some("final".to_string());
        let output = run(&ctx, &job, &req).await.unwrap();

        assert_eq!(output, ctx.download_dir().join("final.mkv"));
        assert_eq!(std::fs::read(&output).unwrap(), b"encoded");

        let calls = std::fs::read_to_string(dir.path().join("ffmpeg-calls")).unwrap();
        assert_eq!(calls.lines().count(), 1);
        assert!(calls.contains("-crf 28"));

        let events = drain_pending(&hub, &job_id).await;
        assert_monotonic(&events);
        let encoding: Vec<f64> = events
            .iter()
            .filter(|e| e.stage.as_deref() == Some(ENCODE_STAGE))
            .filter_map(|e| e.percent)
            .collect();
        assert_eq!(encoding, vec![0.0, 50.0, 100.0]);
        assert_eq!(events.last().unwrap().stage.as_deref(), Some(ENCODE_COMPLETE));
    }

    #[tokio::test]
    async fn test_two_pass_runs_both_passes_and_cleans_passlog() {
        let dir = TempDir::new().unwrap();
        let tools = ToolPaths {
            ffmpeg: fake_ffmpeg(dir.path()),
            ffprobe: fake_ffprobe(dir.path()),
            ..missing_tools(dir.path())
        };
        let ctx = context(dir.path(), tools, None).await;
        std::fs::write(ctx.download_dir().join("in.mp4"), b"source").unwrap();

        let hub = ProgressHub::new();
        let job_id = JobId::new();
        let job = hub.create(job_id.clone(), StageKind::Transcode).unwrap();
        std::fs::write(
            ctx.download_dir()
                .join(format!(".passlog-{}-0.log", job_id.short())),
            b"stats",
        )
        .unwrap();

        let mut req = request("in.mp4", VideoCodec::H265, PassMode::TwoPass);
        req.options.video_bitrate_kbps = Some(1800);
        run(&ctx, &job, &req).await.unwrap();

        let calls = std::fs::read_to_string(dir.path().join("ffmpeg-calls")).unwrap();
        let calls: Vec<&str> = calls.lines().collect();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].contains("-pass 1") && calls[0].ends_with(" -"));
        assert!(calls[1].contains("-pass 2") && calls[1].contains("-b:v 1800k"));

        let leftovers: Vec<_> = std::fs::read_dir(ctx.download_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".passlog"))
            .collect();
        assert!(leftovers.is_empty());

        let events = drain_pending(&hub, &job_id).await;
        assert!(events.iter().any(|e| e.stage.as_deref() == Some("Pass 1/2")));
        assert!(events.iter().any(|e| e.stage.as_deref() == Some("Pass 2/2")));
    }

    #[tokio::test]
    async fn test_encoder_failure_removes_partial_output() {
        let dir = TempDir::new().unwrap();
        let tools = ToolPaths {
            ffmpeg: fake_tool(
                dir.path(),
                "ffmpeg",
                r#"for last in "$@"; do :; done
printf partial > "$last"
echo "Conversion failed!" >&2
exit 1"#,
            ),
            ..missing_tools(dir.path())
        };
        let ctx = context(dir.path(), tools, None).await;
        std::fs::write(ctx.download_dir().join("in.mp4"), b"source").unwrap();

        let hub = ProgressHub::new();
        let job = hub.create(JobId::new(), StageKind::Transcode).unwrap();
        let err = run(&ctx, &job, &request("in.mp4", VideoCodec::H265, PassMode::OnePass))
            .await
            .unwrap_err();

        match err {
            WorkerError::Media(MediaError::ExternalProcess {
                exit_code, message, ..
            }) => {
                assert_eq!(exit_code, Some(1));
                assert!(message.contains("Conversion failed!"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!ctx.download_dir().join("in_encoded.mkv").exists());
    }
}
