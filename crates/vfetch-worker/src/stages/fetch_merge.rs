//! Download selected streams and mux them into one container.

use std::path::{Path, PathBuf};

use tracing::debug;
use vfetch_media::{
    find_by_prefix, format_selector, move_file, remove_by_prefix, remove_quietly,
    DownloadProgressParser, MediaError, YtDlpCommand,
};
use vfetch_models::{output_filename, FetchMergeRequest, DEFAULT_FILENAME};
use vfetch_queue::ProgressSender;

use super::transcode;
use crate::context::PipelineContext;
use crate::error::WorkerResult;

const INIT_STAGE: &str = "Initializing manual download & merge...";
const DOWNLOAD_STAGE: &str = "Downloading & Merging selected formats...";
const COMPLETE_STAGE: &str = "Merge & Download Complete!";

/// Fetch-and-merge stage entry point. Returns the final output path.
pub async fn run(
    ctx: &PipelineContext,
    job: &ProgressSender,
    req: &FetchMergeRequest,
) -> WorkerResult<PathBuf> {
    job.stage(INIT_STAGE, 0.0);

    let container = ctx.config.merge_container.as_str();
    let filename = match req.output_name.as_deref().filter(|n| !n.trim().is_empty()) {
        Some(name) => output_filename(Some(name), container, DEFAULT_FILENAME),
        None => {
            let suggested = ctx.resolver.suggested_filename(&req.url).await;
            output_filename(Some(&suggested), container, DEFAULT_FILENAME)
        }
    };
    let dir = ctx.download_dir();
    let final_path = dir.join(&filename);

    let stem = Path::new(&filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let prefix = interim_prefix(job.job_id().short(), &stem);
    let template = dir.join(format!("{}.%(ext)s", prefix));

    let selector = format_selector(&req.video_id, req.audio_id.as_deref(), req.is_muxed);
    job.log(format!("Format selector: {}", selector));
    job.log(format!("Saving as: {}", filename));

    let command = YtDlpCommand::new(req.url.trim(), &selector)
        .output(&template)
        .merge_into(container)
        .cookies(ctx.cookies.clone())
        .to_tool_command(&ctx.config.tools.ytdlp);

    let result: WorkerResult<()> = async {
        ctx.runner
            .run_with_progress(&command, DOWNLOAD_STAGE, &mut DownloadProgressParser, |event| {
                job.emit(event)
            })
            .await?;

        let interim = find_by_prefix(dir, &prefix)
            .await?
            .ok_or_else(|| MediaError::missing_output(format!("no file matching {}", prefix)))?;
        debug!(job_id = %job.job_id(), interim = %interim.display(), "Located merged file");

        if req.transcode.requires_encode() {
            transcode::encode(ctx, job, &interim, &final_path, &req.transcode).await?;
            remove_quietly(&interim).await;
        } else {
            move_file(&interim, &final_path).await?;
        }
        Ok(())
    }
    .await;

    if let Err(e) = result {
        remove_by_prefix(dir, &prefix).await;
        return Err(e);
    }

    job.stage(COMPLETE_STAGE, 100.0);
    Ok(final_path)
}

/// Hidden name the agent downloads into before the final rename.
fn interim_prefix(job_short: &str, stem: &str) -> String {
    format!(".interim-{}-{}", job_short, stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use crate::stages::test_support::{
        assert_monotonic, context, drain_pending, fake_tool, missing_tools,
    };
    use tempfile::TempDir;
    use vfetch_models::{JobId, StageKind, TranscodeOptions};
    use vfetch_queue::ProgressHub;

    /// Agent stand-in: records the selector and writes the merged file where
    /// the output template points.
    fn fake_ytdlp(dir: &Path, write_output: bool) -> PathBuf {
        let record = dir.join("selector");
        let write = if write_output {
            r#"target=$(echo "$out" | sed 's/%(ext)s/mkv/')
printf merged > "$target""#
        } else {
            ":"
        };
        fake_tool(
            dir,
            "yt-dlp",
            &format!(
                r#"out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -f) echo "$2" > "{record}"; shift 2 ;;
    -o) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo "[download] Destination: $out"
echo "[download]  12.5% of 10.00MiB at 1.00MiB/s"
echo "[download]  80.0% of 10.00MiB at 1.00MiB/s"
echo "[download] 100.0% of 10.00MiB"
{write}"#,
                record = record.display(),
                write = write
            ),
        )
    }

    fn request(audio_id: Option<&str>, is_muxed: bool) -> FetchMergeRequest {
        FetchMergeRequest {
            url: "https://x/video".to_string(),
            video_id: "137".to_string(),
            audio_id: audio_id.map(str::to_string),
            is_muxed,
            output_name: Some("My Clip".to_string()),
            transcode: TranscodeOptions::default(),
            publish: false,
        }
    }

    #[tokio::test]
    async fn test_merge_renames_into_place() {
        let dir = TempDir::new().unwrap();
        let tools = vfetch_media::ToolPaths {
            ytdlp: fake_ytdlp(dir.path(), true),
            ..missing_tools(dir.path())
        };
        let ctx = context(dir.path(), tools, None).await;
        std::fs::write(ctx.download_dir().join("My Clip.mkv"), b"stale").unwrap();

        let hub = ProgressHub::new();
        let job_id = JobId::new();
        let job = hub.create(job_id.clone(), StageKind::FetchMerge).unwrap();

        let output = run(&ctx, &job, &request(Some("140"), false)).await.unwrap();

        assert_eq!(output, ctx.download_dir().join("My Clip.mkv"));
        assert_eq!(std::fs::read(&output).unwrap(), b"merged");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("selector")).unwrap().trim(),
            "137+140"
        );

        let interim_left = std::fs::read_dir(ctx.download_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().starts_with(".interim"));
        assert!(!interim_left);

        let events = drain_pending(&hub, &job_id).await;
        assert_monotonic(&events);
        assert_eq!(events[0].stage.as_deref(), Some(INIT_STAGE));
        let downloading: Vec<f64> = events
            .iter()
            .filter(|e| e.stage.as_deref() == Some(DOWNLOAD_STAGE))
            .filter_map(|e| e.percent)
            .collect();
        assert_eq!(downloading, vec![12.5, 80.0, 100.0]);
        let last = events.last().unwrap();
        assert_eq!(last.stage.as_deref(), Some(COMPLETE_STAGE));
        assert_eq!(last.percent, Some(100.0));
    }

    #[tokio::test]
    async fn test_muxed_video_selects_single_stream() {
        let dir = TempDir::new().unwrap();
        let tools = vfetch_media::ToolPaths {
            ytdlp: fake_ytdlp(dir.path(), true),
            ..missing_tools(dir.path())
        };
        let ctx = context(dir.path(), tools, None).await;

        let hub = ProgressHub::new();
        let job = hub.create(JobId::new(), StageKind::FetchMerge).unwrap();
        run(&ctx, &job, &request(Some(""), true)).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("selector")).unwrap().trim(),
            "137"
        );
    }

    #[tokio::test]
    async fn test_missing_output_is_reported() {
        let dir = TempDir::new().unwrap();
        let tools = vfetch_media::ToolPaths {
            ytdlp: fake_ytdlp(dir.path(), false),
            ..missing_tools(dir.path())
        };
        let ctx = context(dir.path(), tools, None).await;

        let hub = ProgressHub::new();
        let job = hub.create(JobId::new(), StageKind::FetchMerge).unwrap();
        let err = run(&ctx, &job, &request(None, false)).await.unwrap_err();

        assert!(matches!(err, WorkerError::Media(MediaError::MissingOutput(_))));
        assert!(!ctx.download_dir().join("My Clip.mkv").exists());
    }

    #[tokio::test]
    async fn test_agent_failure_cleans_interim_files() {
        let dir = TempDir::new().unwrap();
        let tools = vfetch_media::ToolPaths {
            ytdlp: fake_tool(
                dir.path(),
                "yt-dlp",
                r#"while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
target=$(echo "$out" | sed 's/%(ext)s/f137.mp4.part/')
printf half > "$target"
echo "ERROR: [youtube] abc: Video unavailable" >&2
exit 1"#,
            ),
            ..missing_tools(dir.path())
        };
        let ctx = context(dir.path(), tools, None).await;

        let hub = ProgressHub::new();
        let job = hub.create(JobId::new(), StageKind::FetchMerge).unwrap();
        let err = run(&ctx, &job, &request(None, false)).await.unwrap_err();

        assert!(err.to_string().contains("Video unavailable"));
        assert_eq!(std::fs::read_dir(ctx.download_dir()).unwrap().count(), 0);
    }

    /// Encoder stand-in: records one argument per line and writes the input
    /// bytes plus a marker to the last argument.
    fn fake_ffmpeg(dir: &Path, fail: bool) -> PathBuf {
        let record = dir.join("ffmpeg-args");
        let finish = if fail {
            r#"echo "Conversion failed!" >&2
exit 1"#
        } else {
            r#"cat "$in" > "$last"
printf '%s' -encoded >> "$last""#
        };
        fake_tool(
            dir,
            "ffmpeg",
            &format!(
                r#"for a in "$@"; do echo "$a"; done > "{record}"
in=""
prev=""
for a in "$@"; do
  if [ "$prev" = "-i" ]; then in="$a"; fi
  prev="$a"
  last="$a"
done
printf partial > "$last"
{finish}"#,
                record = record.display(),
                finish = finish
            ),
        )
    }

    fn interim_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with(".interim"))
            .collect()
    }

    #[tokio::test]
    async fn test_merge_hands_interim_file_to_encoder() {
        let dir = TempDir::new().unwrap();
        let tools = vfetch_media::ToolPaths {
            ytdlp: fake_ytdlp(dir.path(), true),
            ffmpeg: fake_ffmpeg(dir.path(), false),
            ..missing_tools(dir.path())
        };
        let ctx = context(dir.path(), tools, None).await;

        let hub = ProgressHub::new();
        let job_id = JobId::new();
        let job = hub.create(job_id.clone(), StageKind::FetchMerge).unwrap();

        let mut req = request(Some("140"), false);
        req.transcode.codec = vfetch_models::VideoCodec::H265;
        let output = run(&ctx, &job, &req).await.unwrap();

        let final_path = ctx.download_dir().join("My Clip.mkv");
        assert_eq!(output, final_path);
        assert_eq!(std::fs::read(&output).unwrap(), b"merged-encoded");

        let args = std::fs::read_to_string(dir.path().join("ffmpeg-args")).unwrap();
        let args: Vec<&str> = args.lines().collect();
        let input = args
            .windows(2)
            .find(|w| w[0] == "-i")
            .map(|w| w[1])
            .unwrap();
        let expected_interim = ctx
            .download_dir()
            .join(format!("{}.mkv", interim_prefix(job_id.short(), "My Clip")));
        assert_eq!(Path::new(input), expected_interim);
        assert_eq!(Path::new(*args.last().unwrap()), final_path);

        assert!(!expected_interim.exists());
        assert!(interim_files(ctx.download_dir()).is_empty());

        let events = drain_pending(&hub, &job_id).await;
        assert_eq!(events.last().unwrap().stage.as_deref(), Some(COMPLETE_STAGE));
    }

    #[tokio::test]
    async fn test_failed_encode_after_merge_cleans_interim_files() {
        let dir = TempDir::new().unwrap();
        let tools = vfetch_media::ToolPaths {
            ytdlp: fake_ytdlp(dir.path(), true),
            ffmpeg: fake_ffmpeg(dir.path(), true),
            ..missing_tools(dir.path())
        };
        let ctx = context(dir.path(), tools, None).await;

        let hub = ProgressHub::new();
        let job = hub.create(JobId::new(), StageKind::FetchMerge).unwrap();

        let mut req = request(Some("140"), false);
        req.transcode.codec = vfetch_models::VideoCodec::H265;
        let err = run(&ctx, &job, &req).await.unwrap_err();

        assert!(err.to_string().contains("Conversion failed!"));
        assert!(dir.path().join("ffmpeg-args").exists());
        assert!(interim_files(ctx.download_dir()).is_empty());
        assert!(!ctx.download_dir().join("My Clip.mkv").exists());
    }

    #[test]
    fn test_interim_prefix() {
        assert_eq!(interim_prefix("a1b2c3d4", "clip"), ".interim-a1b2c3d4-clip");
    }
}
