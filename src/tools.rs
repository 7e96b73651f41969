//! Wrappers around the external `yt-dlp` and `ffmpeg` executables.
//!
//! Both programs are located through [`Settings`] rather than looked up
//! globally, so tests can point them at stub scripts.

use std::{
    collections::BTreeSet,
    ffi::OsString,
    io::{self, Read},
    path::Path,
    process::{Command, Output, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::config::Settings;

pub const FFMPEG_QUIET_ARGS: [&str; 3] = ["-hide_banner", "-loglevel", "error"];

const DEADLINE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Minimal version of yt-dlp's `--dump-single-json` output.
///
/// When a format selector picked a single stream its fields sit at the top
/// level (`selected`); merged selections list their parts in
/// `requested_formats`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VideoInfo {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    #[serde(default)]
    pub formats: Vec<FormatInfo>,
    pub requested_formats: Option<Vec<FormatInfo>>,
    #[serde(flatten)]
    pub selected: FormatInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FormatInfo {
    pub format_id: Option<String>,
    pub url: Option<String>,
    pub ext: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub height: Option<u32>,
}

fn codec_present(codec: Option<&str>) -> bool {
    codec.is_some_and(|c| !c.is_empty() && c != "none")
}

impl FormatInfo {
    pub fn has_video(&self) -> bool {
        codec_present(self.vcodec.as_deref())
    }

    pub fn has_audio(&self) -> bool {
        codec_present(self.acodec.as_deref())
    }
}

impl VideoInfo {
    /// Distinct heights of the video-bearing formats, ascending.
    pub fn video_heights(&self) -> Vec<u32> {
        self.formats
            .iter()
            .filter(|format| format.has_video())
            .filter_map(|format| format.height)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// The stream(s) the format selector settled on, in input order.
    pub fn selected_streams(&self) -> Vec<FormatInfo> {
        match &self.requested_formats {
            Some(parts) if !parts.is_empty() => parts
                .iter()
                .filter(|part| part.url.is_some())
                .cloned()
                .collect(),
            _ if self.selected.url.is_some() => vec![self.selected.clone()],
            _ => Vec::new(),
        }
    }
}

/// Runs `<program> <flag>` to fail loudly when a dependency is missing.
pub fn ensure_program_available(program: &Path, version_flag: &str) -> Result<()> {
    let status = Command::new(program)
        .arg(version_flag)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(_) => bail!(
            "{} is installed but returned a failure status",
            program.display()
        ),
        Err(err) => bail!(
            "{} is not installed or not in PATH: {}",
            program.display(),
            err
        ),
    }
}

fn run(mut command: Command) -> Result<Output> {
    command.stdin(Stdio::null());
    debug!("Executing command: {command:?}");
    let output = command
        .output()
        .with_context(|| format!("spawning {}", command.get_program().to_string_lossy()))?;
    debug!("status: {}", output.status);
    trace!("stderr: {:?}", String::from_utf8_lossy(&output.stderr));
    Ok(output)
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn collect(handle: JoinHandle<io::Result<Vec<u8>>>) -> Result<Vec<u8>> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
        .context("reading child output")
}

/// Like [`run`], but kills the child once `timeout` has elapsed.
///
/// Both pipes are drained on their own threads so a large JSON dump cannot
/// stall the child while it is being polled.
fn run_with_deadline(mut command: Command, timeout: Duration) -> Result<Output> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    debug!("Executing command with a {timeout:?} deadline: {command:?}");
    let program = command.get_program().to_string_lossy().into_owned();
    let mut child = command
        .spawn()
        .with_context(|| format!("spawning {program}"))?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("waiting for {program}"))?
        {
            break status;
        }
        if Instant::now() >= deadline {
            if let Err(err) = child.kill() {
                warn!("failed to kill {program}: {err}");
            }
            // Reap it; the reader threads are left to finish on their own.
            let _ = child.wait();
            bail!("{program} timed out after {timeout:?}");
        }
        thread::sleep(DEADLINE_POLL_INTERVAL);
    };

    debug!("status: {status}");
    let output = Output {
        status,
        stdout: collect(stdout)?,
        stderr: collect(stderr)?,
    };
    trace!("stderr: {:?}", String::from_utf8_lossy(&output.stderr));
    Ok(output)
}

/// Last few stderr lines, enough to explain a failure in the logs.
fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|line| !line.trim().is_empty()).collect();
    lines[lines.len().saturating_sub(5)..].join(" | ")
}

fn ytdlp_command(settings: &Settings) -> Command {
    let mut command = Command::new(&settings.ytdlp);
    command
        .arg("--no-warnings")
        .arg("--no-progress")
        .arg("--socket-timeout")
        .arg(settings.metadata_timeout.as_secs().max(1).to_string());
    if let Some(cookies) = settings.cookies() {
        command.arg("--cookies").arg(cookies);
    }
    command
}

/// Asks yt-dlp for the video's metadata without downloading anything.
///
/// With a format selector, the JSON also describes the stream(s) that
/// selector resolves to. A `deadline` kills yt-dlp when it runs longer.
pub fn fetch_video_info(
    settings: &Settings,
    video_url: &str,
    format: Option<&str>,
    deadline: Option<Duration>,
) -> Result<VideoInfo> {
    let mut command = ytdlp_command(settings);
    command
        .arg("--dump-single-json")
        .arg("--skip-download")
        .arg("--no-playlist");
    if let Some(selector) = format {
        command.arg("-f").arg(selector);
    }
    command.arg("--").arg(video_url);

    let output = match deadline {
        Some(timeout) => run_with_deadline(command, timeout),
        None => run(command),
    }
    .with_context(|| format!("fetching metadata for {video_url}"))?;
    if !output.status.success() {
        bail!(
            "metadata command failed for {} ({}): {}",
            video_url,
            output.status,
            stderr_excerpt(&output.stderr)
        );
    }

    serde_json::from_slice(&output.stdout).context("deserializing metadata JSON")
}

/// Runs ffmpeg once with the given arguments; a non-zero exit is an error.
pub fn run_ffmpeg(settings: &Settings, args: &[OsString]) -> Result<()> {
    let mut command = Command::new(&settings.ffmpeg);
    command.args(FFMPEG_QUIET_ARGS).args(args);

    let output = run(command)?;
    if !output.status.success() {
        bail!(
            "ffmpeg exited with {}: {}",
            output.status,
            stderr_excerpt(&output.stderr)
        );
    }
    Ok(())
}
