#![forbid(unsafe_code)]

//! HTTP front-end: the form page, `/info` previews and `/trim` downloads.
//!
//! Both pipeline steps block (subprocesses and a blocking HTTP client), so
//! each request runs them on tokio's blocking pool. Served files are handed
//! to the janitor, which deletes them once the retention window has passed.

use std::{
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Form, Json, Router,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use clap::Parser;
use mime_guess::MimeGuess;
use serde::Deserialize;
use streamtrim::{
    config::{DEFAULT_CONFIG_PATH, Settings, load_settings_from},
    error::{Failure, FailureKind},
    janitor::{self, Janitor},
    logging::init_logging,
    materializer::Materializer,
    media::{MediaDescriptor, Mode, ProcessRequest},
    resolver::Resolver,
    security::ensure_not_root,
    tools::ensure_program_available,
};
use tokio::{fs::File, signal, task};
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

const INDEX_HTML: &str = include_str!("../../static/index.html");

/// Serve the StreamTrim web form and its processing endpoints.
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    /// Env-style configuration file. A missing file means built-in defaults.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Address to bind, overriding STREAMTRIM_HOST
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, overriding $PORT and STREAMTRIM_PORT
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding the generated files, overriding DOWNLOADS_DIR
    #[arg(long)]
    downloads_dir: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: tracing::Level,

    /// Skip the refusal to run as root
    #[arg(long)]
    allow_root: bool,
}

#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
    resolver: Arc<Resolver>,
    materializer: Arc<Materializer>,
    janitor: Janitor,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<Failure> for ApiError {
    fn from(failure: Failure) -> Self {
        let status = match failure.kind {
            FailureKind::InvalidUrl => StatusCode::BAD_REQUEST,
            FailureKind::SourceBlocked => StatusCode::BAD_GATEWAY,
            FailureKind::ProcessingFailed | FailureKind::UnexpectedError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: failure.message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn join_error(err: task::JoinError) -> ApiError {
    ApiError::from(Failure::unexpected(format!(
        "Unexpected server error: {err}"
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level)?;
    if !cli.allow_root {
        ensure_not_root("backend")?;
    }

    let settings = Arc::new(build_settings(&cli)?);

    for (program, flag) in [(&settings.ytdlp, "--version"), (&settings.ffmpeg, "-version")] {
        if let Err(err) = ensure_program_available(program, flag) {
            warn!("{err:#}");
        }
    }

    let materializer =
        Materializer::new(settings.clone()).context("preparing downloads directory")?;
    let swept = janitor::sweep(materializer.output_dir(), settings.retention);
    if swept > 0 {
        info!(swept, "removed stale artifacts left by a previous run");
    }

    let state = AppState {
        settings: settings.clone(),
        resolver: Arc::new(Resolver::new(settings.clone())),
        materializer: Arc::new(materializer),
        janitor: Janitor::new(settings.retention),
    };

    let app = router(state);

    let ip: IpAddr = settings
        .host
        .parse()
        .with_context(|| format!("parsing host {}", settings.host))?;
    let addr = SocketAddr::new(ip, settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("StreamTrim listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running HTTP server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/info", post(get_info))
        .route("/trim", post(process_video))
        .route("/robots.txt", get(robots))
        .route("/sitemap.xml", get(sitemap))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// CLI flag > `$PORT` (port only) > config file > default.
fn build_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = load_settings_from(&cli.config)?;
    if let Some(port) = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        settings.port = port;
    }
    if let Some(port) = cli.port {
        settings.port = port;
    }
    if let Some(host) = &cli.host {
        settings.host = host.clone();
    }
    if let Some(dir) = &cli.downloads_dir {
        settings.downloads_dir = dir.clone();
    }
    Ok(settings)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!("Failed to install Ctrl+C handler: {}", err);
    }
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn robots(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!(
            "User-agent: *\nAllow: /\nSitemap: {}/sitemap.xml\n",
            state.settings.public_url
        ),
    )
}

async fn sitemap(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/xml")],
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n\
             \x20  <url>\n\
             \x20     <loc>{}/</loc>\n\
             \x20     <changefreq>monthly</changefreq>\n\
             \x20     <priority>1.0</priority>\n\
             \x20  </url>\n\
             </urlset>\n",
            state.settings.public_url
        ),
    )
}

#[derive(Deserialize)]
struct InfoForm {
    #[serde(default)]
    url: String,
}

async fn get_info(
    State(state): State<AppState>,
    Form(form): Form<InfoForm>,
) -> ApiResult<Json<MediaDescriptor>> {
    let resolver = state.resolver.clone();
    let descriptor = task::spawn_blocking(move || resolver.resolve(&form.url))
        .await
        .map_err(join_error)??;
    Ok(Json(descriptor))
}

#[derive(Deserialize)]
struct TrimForm {
    #[serde(default)]
    url: String,
    start: Option<String>,
    end: Option<String>,
    quality: Option<String>,
    mode: Option<String>,
}

impl TrimForm {
    fn into_request(self) -> ProcessRequest {
        ProcessRequest::new(self.url, Mode::parse_lenient(self.mode.as_deref()))
            .with_span(self.start.as_deref(), self.end.as_deref())
            .with_quality(ProcessRequest::parse_quality(self.quality.as_deref()))
    }
}

async fn process_video(
    State(state): State<AppState>,
    Form(form): Form<TrimForm>,
) -> ApiResult<Response> {
    let request = form.into_request();
    let mode = request.mode;
    let materializer = state.materializer.clone();
    let artifact = task::spawn_blocking(move || materializer.materialize(&request))
        .await
        .map_err(join_error)??;

    let file_name = artifact.file_name();
    info!(file = %file_name, mode = %mode, "serving artifact");
    let response = stream_file(artifact.path(), &file_name).await;
    state.janitor.schedule(artifact.into_path());
    response
}

async fn stream_file(path: &Path, file_name: &str) -> ApiResult<Response> {
    let file = File::open(path)
        .await
        .map_err(|err| ApiError::internal(format!("Failed to open the generated file: {err}")))?;

    let mime = MimeGuess::from_path(path).first_or_octet_stream();
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);
    let mut response = body.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = mime.to_string().parse() {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = format!("attachment; filename=\"{file_name}\"").parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_map_to_status_codes() {
        let cases = [
            (Failure::invalid_url(), StatusCode::BAD_REQUEST),
            (Failure::source_blocked("busy"), StatusCode::BAD_GATEWAY),
            (Failure::processing_failed("ffmpeg"), StatusCode::INTERNAL_SERVER_ERROR),
            (Failure::unexpected("boom"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (failure, status) in cases {
            let message = failure.message.clone();
            let err = ApiError::from(failure);
            assert_eq!(err.status, status);
            assert_eq!(err.message, message);
        }
    }

    #[test]
    fn trim_form_degrades_loosely() {
        let form = TrimForm {
            url: "https://youtu.be/abc12345678".into(),
            start: Some("0:10".into()),
            end: Some("".into()),
            quality: Some("lots".into()),
            mode: Some("whatever".into()),
        };
        let request = form.into_request();
        assert_eq!(request.mode, Mode::Trim);
        assert_eq!(request.quality_height, 720);
        assert_eq!(request.trim_window(), None);
    }

    #[test]
    fn cli_flags_override_config() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = dir.path().join("env");
        std::fs::write(&config, "STREAMTRIM_HOST=\"10.0.0.1\"\nDOWNLOADS_DIR=/srv/a\n")?;
        let cli = Cli::try_parse_from([
            "backend",
            "--config",
            config.to_str().unwrap(),
            "--port",
            "9123",
            "--downloads-dir",
            "/srv/b",
        ])?;
        let settings = build_settings(&cli)?;
        assert_eq!(settings.host, "10.0.0.1");
        assert_eq!(settings.port, 9123);
        assert_eq!(settings.downloads_dir, PathBuf::from("/srv/b"));
        assert_eq!(cli.log_level, tracing::Level::INFO);
        Ok(())
    }

    #[cfg(unix)]
    mod http {
        use super::*;
        use std::{fs, io::Read, os::unix::fs::PermissionsExt, time::Duration};

        fn write_stub(path: &Path, body: &str) -> Result<()> {
            fs::write(path, format!("#!/usr/bin/env bash\nset -euo pipefail\n{body}"))?;
            fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
            Ok(())
        }

        /// Serves the real router on an ephemeral port, with stub tools in `dir`.
        async fn spawn_app(dir: &Path) -> Result<(String, Janitor)> {
            let settings = Arc::new(Settings {
                downloads_dir: dir.join("downloads"),
                ytdlp: dir.join("yt-dlp"),
                ffmpeg: dir.join("ffmpeg"),
                cookies_file: dir.join("cookies.txt"),
                ..Settings::default()
            });
            write_stub(
                &settings.ytdlp,
                "cat <<'JSON'\n{\"title\": \"Stub Title\", \"url\": \"https://cdn/v\", \"ext\": \"mp4\", \"vcodec\": \"avc1\", \"acodec\": \"mp4a\"}\nJSON\n",
            )?;
            write_stub(
                &settings.ffmpeg,
                "for last in \"$@\"; do :; done\nprintf 'fake media' > \"$last\"\n",
            )?;

            let state = AppState {
                resolver: Arc::new(Resolver::with_sources(Vec::new(), None)),
                materializer: Arc::new(Materializer::new(settings.clone())?),
                janitor: Janitor::new(Duration::from_secs(60)),
                settings,
            };
            let janitor = state.janitor.clone();
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
            let addr = listener.local_addr()?;
            tokio::spawn(async move { axum::serve(listener, router(state)).await });
            Ok((format!("http://{addr}"), janitor))
        }

        #[tokio::test(flavor = "multi_thread")]
        async fn trim_streams_the_file_and_hands_it_to_the_janitor() -> Result<()> {
            let dir = tempfile::tempdir()?;
            let (base, janitor) = spawn_app(dir.path()).await?;

            let (status, content_type, disposition, body) = task::spawn_blocking(move || {
                let response = ureq::post(&format!("{base}/trim")).send_form(&[
                    ("url", "https://youtu.be/abc12345678"),
                    ("start", "0:05"),
                    ("end", "0:20"),
                ])?;
                let status = response.status();
                let content_type = response.content_type().to_owned();
                let disposition = response
                    .header("Content-Disposition")
                    .unwrap_or_default()
                    .to_owned();
                let mut body = Vec::new();
                response.into_reader().read_to_end(&mut body)?;
                anyhow::Ok((status, content_type, disposition, body))
            })
            .await??;

            assert_eq!(status, 200);
            assert_eq!(content_type, "video/mp4");
            assert!(disposition.starts_with("attachment; filename=\"Stub_Title_"));
            assert!(disposition.ends_with(".mp4\""));
            assert_eq!(body, b"fake media");
            assert_eq!(janitor.pending(), 1);
            Ok(())
        }

        #[tokio::test(flavor = "multi_thread")]
        async fn failures_come_back_as_json_errors() -> Result<()> {
            let dir = tempfile::tempdir()?;
            let (base, janitor) = spawn_app(dir.path()).await?;

            let (status, body) = task::spawn_blocking(move || {
                match ureq::post(&format!("{base}/info"))
                    .send_form(&[("url", "https://example.com/watch")])
                {
                    Err(ureq::Error::Status(status, response)) => {
                        let body: serde_json::Value = response.into_json()?;
                        anyhow::Ok((status, body))
                    }
                    other => anyhow::bail!("expected an error status, got {other:?}"),
                }
            })
            .await??;

            assert_eq!(status, 400);
            assert_eq!(body, serde_json::json!({ "error": "Invalid YouTube URL" }));
            assert_eq!(janitor.pending(), 0);
            Ok(())
        }
    }
}
