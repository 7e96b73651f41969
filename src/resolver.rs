//! URL → [`MediaDescriptor`] resolution.
//!
//! The resolver walks an ordered list of lightweight metadata sources (oEmbed
//! endpoints) and stops at the first one that answers. It then optionally
//! asks yt-dlp for the exact duration and the real list of resolutions; that
//! second step only enriches the descriptor, its failure is never fatal.
//! Whatever no source supplied is filled with placeholders.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    config::Settings,
    error::{Failure, Outcome},
    media::{MediaDescriptor, PLACEHOLDER_DURATION, PLACEHOLDER_HEIGHTS},
    tools,
    video_id::{default_thumbnail, extract_video_id, watch_url},
};

const BLOCKED_MESSAGE: &str = "YouTube is busy. Check the link and try again.";

/// Whatever a single source managed to learn about a video.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceMetadata {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<u64>,
    pub heights: Vec<u32>,
}

/// One way of looking up metadata for a canonical watch URL.
pub trait MetadataSource: Send + Sync {
    fn name(&self) -> &str;

    fn lookup(&self, video_id: &str, watch_url: &str) -> Result<SourceMetadata>;
}

/// Descriptor of a metadata strategy, as configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataStrategy {
    /// Unauthenticated oEmbed-style GET against `endpoint`.
    OEmbed { endpoint: String },
    /// `yt-dlp` in info-only mode.
    Extractor,
}

impl MetadataStrategy {
    /// The lightweight chain, in the order the settings list it.
    pub fn lightweight(settings: &Settings) -> Vec<Self> {
        settings
            .oembed_endpoints
            .iter()
            .map(|endpoint| MetadataStrategy::OEmbed {
                endpoint: endpoint.clone(),
            })
            .collect()
    }

    /// The enrichment step, when enabled.
    pub fn enrichment(settings: &Settings) -> Option<Self> {
        settings.rich_metadata.then_some(MetadataStrategy::Extractor)
    }

    fn build(self, settings: &Arc<Settings>) -> Box<dyn MetadataSource> {
        match self {
            MetadataStrategy::OEmbed { endpoint } => {
                Box::new(OEmbedSource::new(endpoint, settings))
            }
            MetadataStrategy::Extractor => Box::new(ExtractorSource {
                settings: settings.clone(),
            }),
        }
    }
}

#[derive(Deserialize)]
struct OEmbedResponse {
    title: Option<String>,
    thumbnail_url: Option<String>,
    /// noembed answers `200 OK` with an `error` field for unknown videos.
    error: Option<String>,
}

pub struct OEmbedSource {
    endpoint: String,
    agent: ureq::Agent,
}

impl OEmbedSource {
    pub fn new(endpoint: String, settings: &Settings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(settings.metadata_timeout)
            .build();
        Self { endpoint, agent }
    }
}

impl MetadataSource for OEmbedSource {
    fn name(&self) -> &str {
        &self.endpoint
    }

    fn lookup(&self, _video_id: &str, watch_url: &str) -> Result<SourceMetadata> {
        let response: OEmbedResponse = self
            .agent
            .get(&self.endpoint)
            .query("url", watch_url)
            .query("format", "json")
            .call()
            .with_context(|| format!("requesting {}", self.endpoint))?
            .into_json()
            .context("parsing oEmbed response")?;

        if let Some(error) = response.error {
            bail!("{} answered with an error: {error}", self.endpoint);
        }
        let title = response
            .title
            .filter(|title| !title.trim().is_empty())
            .with_context(|| format!("{} returned no title", self.endpoint))?;

        Ok(SourceMetadata {
            title: Some(title),
            thumbnail: response.thumbnail_url,
            ..SourceMetadata::default()
        })
    }
}

pub struct ExtractorSource {
    settings: Arc<Settings>,
}

impl MetadataSource for ExtractorSource {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    fn lookup(&self, _video_id: &str, watch_url: &str) -> Result<SourceMetadata> {
        let info = tools::fetch_video_info(
            &self.settings,
            watch_url,
            None,
            Some(self.settings.metadata_timeout),
        )?;
        Ok(SourceMetadata {
            heights: info.video_heights(),
            duration: info
                .duration
                .filter(|secs| secs.is_finite() && *secs > 0.0)
                .map(|secs| secs.round() as u64),
            title: info.title,
            thumbnail: info.thumbnail,
        })
    }
}

pub struct Resolver {
    lightweight: Vec<Box<dyn MetadataSource>>,
    enrichment: Option<Box<dyn MetadataSource>>,
}

impl Resolver {
    pub fn new(settings: Arc<Settings>) -> Self {
        let lightweight = MetadataStrategy::lightweight(&settings)
            .into_iter()
            .map(|strategy| strategy.build(&settings))
            .collect();
        let enrichment =
            MetadataStrategy::enrichment(&settings).map(|strategy| strategy.build(&settings));
        Self::with_sources(lightweight, enrichment)
    }

    pub fn with_sources(
        lightweight: Vec<Box<dyn MetadataSource>>,
        enrichment: Option<Box<dyn MetadataSource>>,
    ) -> Self {
        Self {
            lightweight,
            enrichment,
        }
    }

    pub fn resolve(&self, url: &str) -> Outcome<MediaDescriptor> {
        let video_id = extract_video_id(url)?;
        let watch = watch_url(&video_id);

        let light = self
            .lightweight
            .iter()
            .find_map(|source| attempt(source.as_ref(), &video_id, &watch));
        let rich = self
            .enrichment
            .as_deref()
            .and_then(|source| attempt(source, &video_id, &watch));

        if light.is_none() && rich.is_none() {
            warn!(video = %video_id, "every metadata source failed");
            return Err(Failure::source_blocked(BLOCKED_MESSAGE));
        }

        Ok(assemble(&video_id, light, rich))
    }
}

fn attempt(source: &dyn MetadataSource, video_id: &str, watch: &str) -> Option<SourceMetadata> {
    match source.lookup(video_id, watch) {
        Ok(metadata) => {
            info!(video = %video_id, source = source.name(), "metadata resolved");
            Some(metadata)
        }
        Err(err) => {
            warn!(video = %video_id, source = source.name(), "metadata lookup failed: {err:#}");
            None
        }
    }
}

/// Title and thumbnail prefer the lightweight answer; duration and heights
/// can only come from the enrichment step.
fn assemble(
    video_id: &str,
    light: Option<SourceMetadata>,
    rich: Option<SourceMetadata>,
) -> MediaDescriptor {
    let light = light.unwrap_or_default();
    let rich = rich.unwrap_or_default();

    let descriptor = MediaDescriptor {
        id: video_id.to_owned(),
        title: light
            .title
            .or(rich.title)
            .unwrap_or_else(|| format!("Video_{video_id}")),
        thumbnail_url: light
            .thumbnail
            .or(rich.thumbnail)
            .unwrap_or_else(|| default_thumbnail(video_id)),
        duration_seconds: 0,
        duration_display: PLACEHOLDER_DURATION.to_owned(),
        available_heights: if rich.heights.is_empty() {
            PLACEHOLDER_HEIGHTS.to_vec()
        } else {
            rich.heights
        },
    };

    match rich.duration {
        Some(seconds) => descriptor.with_duration(seconds),
        None => descriptor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fake {
        name: &'static str,
        answer: Option<SourceMetadata>,
        calls: Arc<AtomicUsize>,
    }

    impl Fake {
        fn boxed(name: &'static str, answer: Option<SourceMetadata>) -> Box<dyn MetadataSource> {
            Box::new(Self {
                name,
                answer,
                calls: Arc::new(AtomicUsize::new(0)),
            })
        }
    }

    impl MetadataSource for Fake {
        fn name(&self) -> &str {
            self.name
        }

        fn lookup(&self, _video_id: &str, watch_url: &str) -> Result<SourceMetadata> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(watch_url.starts_with("https://www.youtube.com/watch?v="));
            self.answer.clone().ok_or_else(|| anyhow!("HTTP 429"))
        }
    }

    fn titled(title: &str) -> SourceMetadata {
        SourceMetadata {
            title: Some(title.into()),
            ..SourceMetadata::default()
        }
    }

    const URL: &str = "https://youtu.be/abc12345678?t=5";

    #[test]
    fn lightweight_answer_gets_placeholders() {
        let resolver = Resolver::with_sources(vec![Fake::boxed("oembed", Some(titled("Song")))], None);
        let descriptor = resolver.resolve(URL).unwrap();
        assert_eq!(descriptor.id, "abc12345678");
        assert_eq!(descriptor.title, "Song");
        assert_eq!(descriptor.duration_seconds, 0);
        assert_eq!(descriptor.duration_display, PLACEHOLDER_DURATION);
        assert_eq!(descriptor.available_heights, PLACEHOLDER_HEIGHTS.to_vec());
        assert_eq!(
            descriptor.thumbnail_url,
            "https://i.ytimg.com/vi/abc12345678/maxresdefault.jpg"
        );
    }

    #[test]
    fn primary_failure_falls_back_to_secondary() {
        let resolver = Resolver::with_sources(
            vec![
                Fake::boxed("primary", None),
                Fake::boxed("secondary", Some(titled("From noembed"))),
            ],
            Some(Fake::boxed("yt-dlp", None)),
        );
        let descriptor = resolver.resolve(URL).unwrap();
        assert_eq!(descriptor.title, "From noembed");
        assert_eq!(descriptor.duration_seconds, 0);
        assert_eq!(descriptor.available_heights, PLACEHOLDER_HEIGHTS.to_vec());
    }

    #[test]
    fn chain_stops_at_first_success() {
        let second_calls = Arc::new(AtomicUsize::new(0));
        let second: Box<dyn MetadataSource> = Box::new(Fake {
            name: "secondary",
            answer: Some(titled("unused")),
            calls: second_calls.clone(),
        });
        let resolver =
            Resolver::with_sources(vec![Fake::boxed("primary", Some(titled("first"))), second], None);
        assert_eq!(resolver.resolve(URL).unwrap().title, "first");
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn enrichment_fills_duration_and_heights() {
        let rich = SourceMetadata {
            title: Some("yt-dlp title".into()),
            thumbnail: Some("https://i.ytimg.com/vi/abc12345678/hq.jpg".into()),
            duration: Some(3690),
            heights: vec![144, 360, 720],
        };
        let resolver = Resolver::with_sources(
            vec![Fake::boxed("oembed", Some(titled("oEmbed title")))],
            Some(Fake::boxed("yt-dlp", Some(rich))),
        );
        let descriptor = resolver.resolve(URL).unwrap();
        assert_eq!(descriptor.title, "oEmbed title");
        assert_eq!(descriptor.thumbnail_url, "https://i.ytimg.com/vi/abc12345678/hq.jpg");
        assert_eq!(descriptor.duration_seconds, 3690);
        assert_eq!(descriptor.duration_display, "1:01:30");
        assert_eq!(descriptor.available_heights, vec![144, 360, 720]);
    }

    #[test]
    fn enrichment_alone_is_enough() {
        let rich = SourceMetadata {
            title: Some("Only yt-dlp".into()),
            duration: Some(61),
            ..SourceMetadata::default()
        };
        let resolver = Resolver::with_sources(
            vec![Fake::boxed("oembed", None)],
            Some(Fake::boxed("yt-dlp", Some(rich))),
        );
        let descriptor = resolver.resolve(URL).unwrap();
        assert_eq!(descriptor.title, "Only yt-dlp");
        assert_eq!(descriptor.duration_display, "1:01");
        assert_eq!(descriptor.available_heights, PLACEHOLDER_HEIGHTS.to_vec());
    }

    #[test]
    fn total_failure_is_source_blocked() {
        let resolver = Resolver::with_sources(
            vec![Fake::boxed("a", None), Fake::boxed("b", None)],
            Some(Fake::boxed("yt-dlp", None)),
        );
        let err = resolver.resolve(URL).unwrap_err();
        assert_eq!(err.kind, FailureKind::SourceBlocked);
        assert_ne!(err.message, Failure::invalid_url().message);
    }

    #[test]
    fn bad_url_never_reaches_sources() {
        let calls = Arc::new(AtomicUsize::new(0));
        let source: Box<dyn MetadataSource> = Box::new(Fake {
            name: "oembed",
            answer: Some(titled("x")),
            calls: calls.clone(),
        });
        let resolver = Resolver::with_sources(vec![source], None);
        let err = resolver.resolve("https://example.com/video").unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidUrl);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn strategies_follow_settings() {
        let settings = Settings {
            oembed_endpoints: vec!["https://a.example/oembed".into()],
            rich_metadata: false,
            ..Settings::default()
        };
        assert_eq!(
            MetadataStrategy::lightweight(&settings),
            vec![MetadataStrategy::OEmbed {
                endpoint: "https://a.example/oembed".into()
            }]
        );
        assert_eq!(MetadataStrategy::enrichment(&settings), None);
        assert_eq!(
            MetadataStrategy::enrichment(&Settings::default()),
            Some(MetadataStrategy::Extractor)
        );
    }

    #[cfg(unix)]
    #[test]
    fn extractor_source_reads_ytdlp() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let settings = Arc::new(crate::testing::stub_settings(dir.path()));
        crate::testing::ytdlp_stub(
            dir.path(),
            r#"{"title": "Real", "duration": 89.6, "thumbnail": "https://img/t.jpg",
               "formats": [{"vcodec": "avc1", "height": 1080}, {"vcodec": "vp9", "height": 480},
                           {"vcodec": "none", "acodec": "opus"}]}"#,
        )?;
        let source = ExtractorSource { settings };
        let metadata = source.lookup("abc12345678", &watch_url("abc12345678"))?;
        assert_eq!(metadata.title.as_deref(), Some("Real"));
        assert_eq!(metadata.duration, Some(90));
        assert_eq!(metadata.heights, vec![480, 1080]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn hung_extractor_does_not_hold_the_preview() -> Result<()> {
        use std::time::{Duration, Instant};

        let dir = tempfile::tempdir()?;
        let mut settings = crate::testing::stub_settings(dir.path());
        settings.metadata_timeout = Duration::from_secs(1);
        let settings = Arc::new(settings);
        crate::testing::install_stub(dir.path(), "yt-dlp", "exec sleep 12\n")?;

        let extractor: Box<dyn MetadataSource> = Box::new(ExtractorSource { settings });
        let resolver =
            Resolver::with_sources(vec![Fake::boxed("oembed", Some(titled("Quick")))], Some(extractor));

        let started = Instant::now();
        let descriptor = resolver.resolve(URL).unwrap();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(descriptor.title, "Quick");
        assert_eq!(descriptor.duration_display, PLACEHOLDER_DURATION);
        assert_eq!(descriptor.available_heights, PLACEHOLDER_HEIGHTS.to_vec());
        Ok(())
    }

    #[test]
    fn unreachable_oembed_endpoint_fails_fast() {
        let settings = Settings {
            metadata_timeout: std::time::Duration::from_millis(500),
            ..Settings::default()
        };
        let source = OEmbedSource::new("http://127.0.0.1:9/oembed".into(), &settings);
        assert!(source.lookup("abc12345678", &watch_url("abc12345678")).is_err());
    }
}
