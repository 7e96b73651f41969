use anyhow::{Context, Result, anyhow};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/streamtrim-env";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_DOWNLOADS_DIR: &str = "downloads";
pub const DEFAULT_YTDLP: &str = "yt-dlp";
pub const DEFAULT_FFMPEG: &str = "ffmpeg";
pub const DEFAULT_COOKIES_FILE: &str = "cookies.txt";
pub const DEFAULT_RETENTION_SECS: u64 = 300;
pub const DEFAULT_METADATA_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_PUBLIC_URL: &str = "http://localhost:8000";
pub const DEFAULT_OEMBED_ENDPOINTS: [&str; 2] =
    ["https://www.youtube.com/oembed", "https://noembed.com/embed"];

/// Raw values read from the env-style config file. Every key is optional.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub downloads_dir: Option<PathBuf>,
    pub ytdlp_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
    pub cookies_file: Option<PathBuf>,
    pub retention_secs: Option<u64>,
    pub metadata_timeout_secs: Option<u64>,
    pub oembed_endpoints: Option<Vec<String>>,
    pub rich_metadata: Option<bool>,
    pub public_url: Option<String>,
}

/// Process-wide settings, built once at start-up and shared by the resolver,
/// the materializer and the janitor.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub downloads_dir: PathBuf,
    pub ytdlp: PathBuf,
    pub ffmpeg: PathBuf,
    pub cookies_file: PathBuf,
    pub retention: Duration,
    pub metadata_timeout: Duration,
    pub oembed_endpoints: Vec<String>,
    pub rich_metadata: bool,
    pub public_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            downloads_dir: PathBuf::from(DEFAULT_DOWNLOADS_DIR),
            ytdlp: PathBuf::from(DEFAULT_YTDLP),
            ffmpeg: PathBuf::from(DEFAULT_FFMPEG),
            cookies_file: PathBuf::from(DEFAULT_COOKIES_FILE),
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            metadata_timeout: Duration::from_secs(DEFAULT_METADATA_TIMEOUT_SECS),
            oembed_endpoints: DEFAULT_OEMBED_ENDPOINTS
                .iter()
                .map(|endpoint| endpoint.to_string())
                .collect(),
            rich_metadata: true,
            public_url: DEFAULT_PUBLIC_URL.to_string(),
        }
    }
}

impl Settings {
    /// The cookie file, only when it is actually present on disk.
    pub fn cookies(&self) -> Option<&Path> {
        self.cookies_file
            .is_file()
            .then_some(self.cookies_file.as_path())
    }

    fn apply(mut self, cfg: EnvConfig) -> Self {
        if let Some(host) = cfg.host {
            self.host = host;
        }
        if let Some(port) = cfg.port {
            self.port = port;
        }
        if let Some(dir) = cfg.downloads_dir {
            self.downloads_dir = dir;
        }
        if let Some(path) = cfg.ytdlp_path {
            self.ytdlp = path;
        }
        if let Some(path) = cfg.ffmpeg_path {
            self.ffmpeg = path;
        }
        if let Some(path) = cfg.cookies_file {
            self.cookies_file = path;
        }
        if let Some(secs) = cfg.retention_secs {
            self.retention = Duration::from_secs(secs);
        }
        if let Some(secs) = cfg.metadata_timeout_secs {
            self.metadata_timeout = Duration::from_secs(secs);
        }
        if let Some(endpoints) = cfg.oembed_endpoints {
            self.oembed_endpoints = endpoints;
        }
        if let Some(rich) = cfg.rich_metadata {
            self.rich_metadata = rich;
        }
        if let Some(url) = cfg.public_url {
            self.public_url = url.trim_end_matches('/').to_string();
        }
        self
    }
}

fn parse_value<T>(key: &str, value: &str, path: &Path) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("Parsing {key} from {}", path.display()))
}

fn parse_bool(key: &str, value: &str, path: &Path) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!(
            "Parsing {key} from {}: expected a boolean, got {value:?}",
            path.display()
        )),
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let key = key.trim();
            let value = value_raw.trim().trim_matches('"');
            if value.is_empty() {
                continue;
            }
            match key {
                "STREAMTRIM_HOST" => cfg.host = Some(value.to_string()),
                "STREAMTRIM_PORT" => cfg.port = Some(parse_value(key, value, path)?),
                "DOWNLOADS_DIR" => cfg.downloads_dir = Some(PathBuf::from(value)),
                "YTDLP_PATH" => cfg.ytdlp_path = Some(PathBuf::from(value)),
                "FFMPEG_PATH" => cfg.ffmpeg_path = Some(PathBuf::from(value)),
                "COOKIES_FILE" => cfg.cookies_file = Some(PathBuf::from(value)),
                "RETENTION_SECS" => cfg.retention_secs = Some(parse_value(key, value, path)?),
                "METADATA_TIMEOUT_SECS" => {
                    cfg.metadata_timeout_secs = Some(parse_value(key, value, path)?)
                }
                "OEMBED_ENDPOINTS" => {
                    cfg.oembed_endpoints = Some(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|endpoint| !endpoint.is_empty())
                            .map(String::from)
                            .collect(),
                    )
                }
                "RICH_METADATA" => cfg.rich_metadata = Some(parse_bool(key, value, path)?),
                "PUBLIC_URL" => cfg.public_url = Some(value.to_string()),
                _ => {}
            }
        }
    }
    Ok(Some(cfg))
}

pub fn load_settings() -> Result<Settings> {
    load_settings_from(Path::new(DEFAULT_CONFIG_PATH))
}

/// Loads settings from an env-style file. A missing file means defaults.
pub fn load_settings_from(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();
    let settings = Settings::default();
    Ok(match read_env_config(path)? {
        Some(cfg) => settings.apply(cfg),
        None => settings,
    })
}
