#![forbid(unsafe_code)]

//! Shared security helpers used by the backend binary.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Fails fast when a binary is started as root. The backend spawns yt-dlp and
/// ffmpeg on user-supplied URLs and is expected to run under an unprivileged
/// account; `--allow-root` exists for throwaway containers.
pub fn ensure_not_root(process: &str) -> Result<()> {
    if Uid::current().is_root() {
        bail!("{process} must not be run as root; pass --allow-root to override");
    }
    Ok(())
}
