//! [`ProcessRequest`] → [`OutputArtifact`].
//!
//! One request walks `Resolving → StreamsReady → Encoding → Done`; any stage
//! may fail, and a failure is final for that request. yt-dlp only resolves the
//! stream URLs; ffmpeg reads them directly with the seek and duration applied
//! on the input side, so only the requested span is fetched.

use std::{
    ffi::OsString,
    fmt,
    fs::{self, OpenOptions},
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use tracing::{info, info_span, warn};

use crate::{
    config::Settings,
    error::{FailWith, Failure, FailureKind, Outcome},
    media::{Mode, OutputArtifact, ProcessRequest},
    timecode::{TrimWindow, format_seconds},
    tools::{self, FormatInfo},
    video_id::{extract_video_id, watch_url},
};

const STREAMS_BLOCKED: &str = "YouTube refused to hand out the video streams. Try again shortly.";
const PROCESSING_FAILED: &str = "Processing failed: the media tool could not produce the file.";
const DEFAULT_STEM: &str = "StreamTrim";
const MAX_STEM_LEN: usize = 60;
const RESERVE_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    StreamsReady,
    Encoding,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Resolving => "resolving",
            Stage::StreamsReady => "streams-ready",
            Stage::Encoding => "encoding",
            Stage::Done => "done",
        })
    }
}

/// One entry of a yt-dlp format preference chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatPreference {
    /// A single MP4 carrying both tracks, at or below the height ceiling.
    Mp4AtMost,
    /// Separate best video (at or below the ceiling) and best audio.
    SplitAtMost,
    AudioM4a,
    AudioAny,
    /// Whatever yt-dlp considers best, unconstrained.
    Anything,
}

const VIDEO_PREFERENCES: [FormatPreference; 3] = [
    FormatPreference::Mp4AtMost,
    FormatPreference::SplitAtMost,
    FormatPreference::Anything,
];

const AUDIO_PREFERENCES: [FormatPreference; 3] = [
    FormatPreference::AudioM4a,
    FormatPreference::AudioAny,
    FormatPreference::Anything,
];

impl FormatPreference {
    pub fn selector(self, ceiling: u32) -> String {
        match self {
            FormatPreference::Mp4AtMost => format!("best[ext=mp4][height<={ceiling}]"),
            FormatPreference::SplitAtMost => format!("bestvideo[height<={ceiling}]+bestaudio"),
            FormatPreference::AudioM4a => "bestaudio[ext=m4a]".to_string(),
            FormatPreference::AudioAny => "bestaudio".to_string(),
            FormatPreference::Anything => "best".to_string(),
        }
    }
}

/// Joins the mode's preference chain into a single yt-dlp `-f` expression.
pub fn format_selector(mode: Mode, ceiling: u32) -> String {
    let chain: &[FormatPreference] = match mode {
        Mode::Audio => &AUDIO_PREFERENCES,
        Mode::Trim | Mode::Full => &VIDEO_PREFERENCES,
    };
    chain
        .iter()
        .map(|preference| preference.selector(ceiling))
        .collect::<Vec<_>>()
        .join("/")
}

/// How ffmpeg should treat the tracks it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecPlan {
    /// Remux every track untouched.
    StreamCopy,
    /// Re-encode into H.264 + AAC.
    Transcode,
    /// Drop video, keep the AAC track as is.
    AudioCopy,
    /// Drop video, encode the audio to AAC.
    AudioTranscode,
}

fn is_mp4_family(stream: &FormatInfo) -> bool {
    matches!(stream.ext.as_deref(), Some("mp4" | "m4a"))
}

fn is_aac(stream: &FormatInfo) -> bool {
    stream.ext.as_deref() == Some("m4a")
        || stream
            .acodec
            .as_deref()
            .is_some_and(|codec| codec.starts_with("mp4a") || codec == "aac")
}

impl CodecPlan {
    pub fn choose(mode: Mode, inputs: &[FormatInfo]) -> Self {
        match mode {
            Mode::Audio => {
                if inputs.last().is_some_and(is_aac) {
                    CodecPlan::AudioCopy
                } else {
                    CodecPlan::AudioTranscode
                }
            }
            Mode::Trim | Mode::Full => {
                if !inputs.is_empty() && inputs.iter().all(is_mp4_family) {
                    CodecPlan::StreamCopy
                } else {
                    CodecPlan::Transcode
                }
            }
        }
    }

    fn args(self) -> &'static [&'static str] {
        match self {
            CodecPlan::StreamCopy => &["-c", "copy"],
            CodecPlan::Transcode => &[
                "-c:v", "libx264", "-preset", "veryfast", "-crf", "23", "-c:a", "aac", "-b:a",
                "192k",
            ],
            CodecPlan::AudioCopy => &["-vn", "-c:a", "copy"],
            CodecPlan::AudioTranscode => &["-vn", "-c:a", "aac", "-b:a", "192k"],
        }
    }
}

/// Audio mode reads only the last (audio) stream; video modes read at most a
/// video and an audio stream.
fn pick_inputs(mode: Mode, streams: &[FormatInfo]) -> &[FormatInfo] {
    match mode {
        Mode::Audio => &streams[streams.len().saturating_sub(1)..],
        Mode::Trim | Mode::Full => &streams[..streams.len().min(2)],
    }
}

/// Builds the ffmpeg argument list (without the quiet flags).
pub fn ffmpeg_args(
    inputs: &[FormatInfo],
    window: Option<TrimWindow>,
    plan: CodecPlan,
    output: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into()];

    for input in inputs {
        if let Some(window) = window {
            args.push("-ss".into());
            args.push(format_seconds(window.start).into());
            args.push("-t".into());
            args.push(format_seconds(window.duration).into());
        }
        args.push("-i".into());
        args.push(input.url.as_deref().unwrap_or_default().into());
    }

    if inputs.len() > 1 {
        args.extend(["-map", "0:v:0", "-map", "1:a:0"].map(OsString::from));
    }
    args.extend(plan.args().iter().map(OsString::from));
    args.extend(["-movflags", "+faststart"].map(OsString::from));
    args.push(output.as_os_str().to_owned());
    args
}

/// Reduces a title to ASCII alphanumerics, `-` and `_`.
pub fn sanitize_title(title: &str) -> String {
    let mut stem = String::with_capacity(title.len().min(MAX_STEM_LEN));
    let mut separator = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            if separator && !stem.is_empty() {
                stem.push('_');
            }
            separator = false;
            stem.push(c);
        } else {
            separator = true;
        }
        if stem.len() >= MAX_STEM_LEN {
            break;
        }
    }
    stem.truncate(MAX_STEM_LEN);

    let stem = stem.trim_matches(['_', '-']);
    if stem.is_empty() {
        DEFAULT_STEM.to_string()
    } else {
        stem.to_string()
    }
}

fn random_suffix() -> String {
    format!("{:06x}", fastrand::u32(..1 << 24))
}

/// Creates an empty `<stem>_<suffix>.mp4` in `dir`, guaranteeing that no
/// other request owns the same name.
fn reserve_output(dir: &Path, stem: &str) -> Result<PathBuf> {
    for _ in 0..RESERVE_ATTEMPTS {
        let candidate = dir.join(format!("{stem}_{}.mp4", random_suffix()));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(_) => return Ok(candidate),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => {
                return Err(err).with_context(|| format!("creating {}", candidate.display()));
            }
        }
    }
    bail!("no free output name for {stem} in {}", dir.display())
}

fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path)
        && err.kind() != ErrorKind::NotFound
    {
        warn!("could not remove {}: {err}", path.display());
    }
}

/// Creates the downloads directory if needed and returns its absolute path.
pub fn prepare_output_dir(dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    fs::canonicalize(dir).with_context(|| format!("resolving {}", dir.display()))
}

pub struct Materializer {
    settings: Arc<Settings>,
    output_dir: PathBuf,
}

impl Materializer {
    pub fn new(settings: Arc<Settings>) -> Result<Self> {
        let output_dir = prepare_output_dir(&settings.downloads_dir)?;
        Ok(Self {
            settings,
            output_dir,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn materialize(&self, request: &ProcessRequest) -> Outcome<OutputArtifact> {
        let video_id = extract_video_id(&request.source_url)?;
        let span = info_span!("materialize", video = %video_id, mode = %request.mode);
        let _guard = span.enter();

        info!(stage = %Stage::Resolving, ceiling = request.quality_height, "resolving streams");
        let selector = format_selector(request.mode, request.quality_height);
        let info = tools::fetch_video_info(&self.settings, &watch_url(&video_id), Some(&selector), None)
            .fail_with(FailureKind::SourceBlocked, STREAMS_BLOCKED)?;

        let streams = info.selected_streams();
        if streams.is_empty() {
            warn!("yt-dlp selected no stream with a URL");
            return Err(Failure::source_blocked(STREAMS_BLOCKED));
        }
        let inputs = pick_inputs(request.mode, &streams);
        let window = request.trim_window();
        let plan = CodecPlan::choose(request.mode, inputs);
        info!(
            stage = %Stage::StreamsReady,
            inputs = inputs.len(),
            ?plan,
            start = window.map(|w| w.start),
            duration = window.map(|w| w.duration),
            "streams ready"
        );

        let stem = sanitize_title(info.title.as_deref().unwrap_or(DEFAULT_STEM));
        let output = reserve_output(&self.output_dir, &stem)
            .fail_with(FailureKind::UnexpectedError, "Could not prepare the output file.")?;

        info!(stage = %Stage::Encoding, output = %output.display(), "running ffmpeg");
        let args = ffmpeg_args(inputs, window, plan, &output);
        tools::run_ffmpeg(&self.settings, &args)
            .fail_with(FailureKind::ProcessingFailed, PROCESSING_FAILED)
            .inspect_err(|_| discard(&output))?;

        let written = fs::metadata(&output).map(|meta| meta.len()).unwrap_or(0);
        if written == 0 {
            warn!(output = %output.display(), "ffmpeg succeeded but wrote nothing");
            discard(&output);
            return Err(Failure::processing_failed(PROCESSING_FAILED));
        }

        info!(stage = %Stage::Done, bytes = written, output = %output.display(), "artifact ready");
        Ok(OutputArtifact::new(output))
    }
}
