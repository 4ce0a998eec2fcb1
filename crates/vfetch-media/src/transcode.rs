//! Encoder planning: resolves transcode options into concrete FFmpeg runs.

use std::path::Path;

use vfetch_models::encoding::{AUDIO_ENCODER, DEFAULT_AUDIO_BITRATE_KBPS};
use vfetch_models::{PassMode, TranscodeOptions};

use crate::command::FfmpegCommand;
use crate::error::{MediaError, MediaResult};

/// Extensions accepted as transcode input.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "mov", "avi", "flv", "m4v", "ts", "m4a", "mp3", "aac", "opus", "ogg",
    "wav", "flac",
];

/// Whether `path` has a recognized media extension.
pub fn is_supported_media(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// How the video bitrate is controlled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RateControl {
    /// Single CRF-driven pass
    Crf(u8),
    /// Analysis pass then encode pass at a fixed bitrate
    TwoPass { bitrate_kbps: u32 },
}

/// Fully resolved encode parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodePlan {
    pub encoder: &'static str,
    pub preset: &'static str,
    pub rate: RateControl,
    pub audio_bitrate_kbps: u32,
    pub audio_channels: u32,
    pub frame_rate: Option<f64>,
}

impl EncodePlan {
    /// Resolve defaults for `options`.
    ///
    /// Returns `Ok(None)` when no encode is needed (`codec == none`).
    /// 2-pass without a positive bitrate is a [`MediaError::MissingParameter`].
    pub fn resolve(options: &TranscodeOptions, source_channels: u32) -> MediaResult<Option<Self>> {
        let (Some(encoder), Some(preset)) = (options.codec.encoder(), options.codec.preset()) else {
            return Ok(None);
        };

        let rate = match options.pass_mode {
            PassMode::TwoPass => match options.video_bitrate_kbps.filter(|b| *b > 0) {
                Some(bitrate_kbps) => RateControl::TwoPass { bitrate_kbps },
                None => {
                    let hint = options
                        .codec
                        .default_bitrate_kbps()
                        .map(|kbps| format!(" (e.g. {}k for {})", kbps, options.codec))
                        .unwrap_or_default();
                    return Err(MediaError::missing_parameter(format!(
                        "video bitrate is required for 2-pass encoding{}",
                        hint
                    )));
                }
            },
            PassMode::OnePass => RateControl::Crf(
                options
                    .crf
                    .or_else(|| options.codec.default_crf())
                    .unwrap_or_default(),
            ),
        };

        let audio_channels = if options.force_stereo {
            2
        } else {
            source_channels.max(1)
        };

        Ok(Some(Self {
            encoder,
            preset,
            rate,
            audio_bitrate_kbps: options
                .audio_bitrate_kbps
                .filter(|b| *b > 0)
                .unwrap_or(DEFAULT_AUDIO_BITRATE_KBPS),
            audio_channels,
            frame_rate: options.frame_rate,
        }))
    }

    /// Whether this plan runs two encoder passes.
    pub fn is_two_pass(&self) -> bool {
        matches!(self.rate, RateControl::TwoPass { .. })
    }

    fn base(&self, input: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(input, output)
            .video_codec(self.encoder)
            .preset(self.preset)
    }

    fn with_video_options(&self, cmd: FfmpegCommand) -> FfmpegCommand {
        match self.frame_rate {
            Some(fps) => cmd.frame_rate(fps),
            None => cmd,
        }
    }

    fn with_audio(&self, cmd: FfmpegCommand) -> FfmpegCommand {
        cmd.audio_channels(self.audio_channels)
            .audio_codec(AUDIO_ENCODER)
            .audio_bitrate_kbps(self.audio_bitrate_kbps)
    }

    /// The encoder runs, in order.
    ///
    /// 2-pass yields an analysis run writing only statistics under `passlog`
    /// (video only, null muxer) followed by the real encode.
    pub fn commands(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        passlog: impl AsRef<Path>,
    ) -> Vec<FfmpegCommand> {
        let input = input.as_ref();
        let output = output.as_ref();
        let passlog = passlog.as_ref();

        match self.rate {
            RateControl::Crf(crf) => {
                let cmd = self.with_video_options(self.base(input, output).crf(crf));
                vec![self.with_audio(cmd)]
            }
            RateControl::TwoPass { bitrate_kbps } => {
                let first = self
                    .with_video_options(
                        FfmpegCommand::new(input, "-")
                            .video_codec(self.encoder)
                            .preset(self.preset)
                            .video_bitrate_kbps(bitrate_kbps)
                            .pass(1, passlog),
                    )
                    .no_audio()
                    .format("null");

                let second = self.with_audio(self.with_video_options(
                    self.base(input, output)
                        .video_bitrate_kbps(bitrate_kbps)
                        .pass(2, passlog),
                ));

                vec![first, second]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfetch_models::VideoCodec;

    fn options(codec: VideoCodec, pass_mode: PassMode) -> TranscodeOptions {
        TranscodeOptions {
            codec,
            pass_mode,
            ..Default::default()
        }
    }

    fn has_pair(args: &[String], a: &str, b: &str) -> bool {
        args.windows(2).any(|w| w[0] == a && w[1] == b)
    }

    #[test]
    fn test_supported_media() {
        assert!(is_supported_media("clip.mp4"));
        assert!(is_supported_media("/a/b/SONG.FLAC"));
        assert!(is_supported_media("x.ts"));
        assert!(!is_supported_media("notes.txt"));
        assert!(!is_supported_media("no_extension"));
    }

    #[test]
    fn test_codec_none_has_no_plan() {
        let plan = EncodePlan::resolve(&options(VideoCodec::None, PassMode::TwoPass), 2).unwrap();
        assert!(plan.is_none());
    }

    #[test]
    fn test_two_pass_requires_bitrate() {
        let err = EncodePlan::resolve(&options(VideoCodec::H265, PassMode::TwoPass), 2).unwrap_err();
        assert!(matches!(err, MediaError::MissingParameter(_)));
        assert!(err.to_string().contains("2000k for h265"));

        let mut opts = options(VideoCodec::Av1, PassMode::TwoPass);
        opts.video_bitrate_kbps = Some(0);
        assert!(EncodePlan::resolve(&opts, 2).is_err());
    }

    #[test]
    fn test_one_pass_defaults() {
        let plan = EncodePlan::resolve(&options(VideoCodec::H265, PassMode::OnePass), 6)
            .unwrap()
            .unwrap();
        assert_eq!(plan.encoder, "libx265");
        assert_eq!(plan.preset, "medium");
        assert_eq!(plan.rate, RateControl::Crf(28));
        assert_eq!(plan.audio_bitrate_kbps, 96);
        assert_eq!(plan.audio_channels, 6);

        let plan = EncodePlan::resolve(&options(VideoCodec::Av1, PassMode::OnePass), 2)
            .unwrap()
            .unwrap();
        assert_eq!(plan.rate, RateControl::Crf(35));
        assert_eq!(plan.preset, "8");
    }

    #[test]
    fn test_force_stereo_overrides_source() {
        let mut opts = options(VideoCodec::H265, PassMode::OnePass);
        opts.force_stereo = true;
        let plan = EncodePlan::resolve(&opts, 6).unwrap().unwrap();
        assert_eq!(plan.audio_channels, 2);
    }

    #[test]
    fn test_one_pass_command() {
        let mut opts = options(VideoCodec::H265, PassMode::OnePass);
        opts.crf = Some(22);
        let plan = EncodePlan::resolve(&opts, 2).unwrap().unwrap();
        let cmds = plan.commands("in.mp4", "out.mkv", "/tmp/passlog");
        assert_eq!(cmds.len(), 1);

        let args = cmds[0].build_args();
        assert!(has_pair(&args, "-c:v", "libx265"));
        assert!(has_pair(&args, "-crf", "22"));
        assert!(has_pair(&args, "-c:a", "libopus"));
        assert!(has_pair(&args, "-ac", "2"));
        assert!(!args.contains(&"-r".to_string()));
        assert!(!args.contains(&"-pass".to_string()));
        assert_eq!(args.last().unwrap(), "out.mkv");
    }

    #[test]
    fn test_two_pass_commands() {
        let mut opts = options(VideoCodec::Av1, PassMode::TwoPass);
        opts.video_bitrate_kbps = Some(1200);
        opts.frame_rate = Some(24.0);
        let plan = EncodePlan::resolve(&opts, 2).unwrap().unwrap();
        assert!(plan.is_two_pass());

        let cmds = plan.commands("in.mp4", "out.mkv", "/tmp/job-passlog");
        assert_eq!(cmds.len(), 2);

        let first = cmds[0].build_args();
        assert!(has_pair(&first, "-pass", "1"));
        assert!(has_pair(&first, "-passlogfile", "/tmp/job-passlog"));
        assert!(has_pair(&first, "-b:v", "1200k"));
        assert!(has_pair(&first, "-f", "null"));
        assert!(first.contains(&"-an".to_string()));
        assert_eq!(first.last().unwrap(), "-");

        let second = cmds[1].build_args();
        assert!(has_pair(&second, "-pass", "2"));
        assert!(has_pair(&second, "-b:v", "1200k"));
        assert!(has_pair(&second, "-r", "24"));
        assert!(has_pair(&second, "-b:a", "96k"));
        assert_eq!(second.last().unwrap(), "out.mkv");
    }
}
