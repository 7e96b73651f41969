//! Stub executables standing in for yt-dlp and ffmpeg in unit tests.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Result;

use crate::config::Settings;

/// Settings whose tools, cookie file and downloads directory all live in `dir`.
pub(crate) fn stub_settings(dir: &Path) -> Settings {
    Settings {
        downloads_dir: dir.join("downloads"),
        ytdlp: dir.join("yt-dlp"),
        ffmpeg: dir.join("ffmpeg"),
        cookies_file: dir.join("cookies.txt"),
        ..Settings::default()
    }
}

/// Writes an executable bash script named `name` into `dir`.
///
/// Every stub records its arguments, one per line, in `<dir>/<name>.args`.
pub(crate) fn install_stub(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    let script_path = dir.join(name);
    let log_path = dir.join(format!("{name}.args"));
    let script = format!(
        "#!/usr/bin/env bash\nset -euo pipefail\nprintf '%s\\n' \"$@\" > '{}'\n{body}",
        log_path.display()
    );
    fs::write(&script_path, script)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&script_path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms)?;
    }
    Ok(script_path)
}

/// A yt-dlp stub that prints `json` on stdout.
pub(crate) fn ytdlp_stub(dir: &Path, json: &str) -> Result<PathBuf> {
    install_stub(dir, "yt-dlp", &format!("cat <<'JSON'\n{json}\nJSON\n"))
}

/// An ffmpeg stub that writes a few bytes to its last argument.
pub(crate) fn ffmpeg_stub(dir: &Path) -> Result<PathBuf> {
    install_stub(
        dir,
        "ffmpeg",
        "for last in \"$@\"; do :; done\nprintf 'fake media' > \"$last\"\n",
    )
}

pub(crate) fn recorded_args(dir: &Path, name: &str) -> Result<Vec<String>> {
    let content = fs::read_to_string(dir.join(format!("{name}.args")))?;
    Ok(content.lines().map(String::from).collect())
}
