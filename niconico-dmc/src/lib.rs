#![doc = include_str!("../README.md")]

use crate::error::{Error, Result};
use crate::fetcher::formats::resolve_formats;
use crate::fetcher::legacy::FfprobeProber;
use crate::fetcher::metadata::{build_info, match_video_id};
use crate::fetcher::{COOKIE_DOMAIN, CookieStore, ExtractorContext, ReqwestTransport, SITE_ORIGIN};
use crate::model::{ResolvedVideo, sort_formats};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub mod error;
pub mod executor;
pub mod fetcher;
pub mod model;

#[cfg(test)]
mod testing;

/// A niconico video resolver.
///
/// It turns a watch URL into metadata and formats, and opens DMC sessions for the formats
/// that need one. The major implementations of this struct are located in the 'fetcher'
/// module.
///
/// # Examples
///
/// ```rust, no_run
/// # use niconico_dmc::Niconico;
/// # use std::time::Duration;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let niconico = Niconico::with_defaults(None, Duration::from_secs(30), "ffprobe", None)?;
///
/// let video = niconico.resolve("https://www.nicovideo.jp/watch/sm9").await?;
/// println!("{}", video);
///
/// let chain = video.session_formats();
/// if let Some(endpoint) = &video.endpoint {
///     let negotiated = niconico.negotiate_any(chain, endpoint).await?;
///     println!("{}", negotiated.format.url);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Niconico {
    /// The collaborators every step goes through.
    pub context: ExtractorContext,
}

impl fmt::Display for Niconico {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Niconico: transport={:?}", self.context.transport)
    }
}

impl Niconico {
    /// Creates a resolver around the given collaborators.
    pub fn new(context: ExtractorContext) -> Self {
        Self { context }
    }

    /// Creates a resolver backed by `reqwest` and the given ffprobe executable.
    ///
    /// # Arguments
    ///
    /// * `user_agent` - The user agent, a desktop browser one when `None`.
    /// * `timeout` - The timeout of each request and probe.
    /// * `ffprobe` - The ffprobe executable.
    /// * `user_session` - The `user_session` cookie of a logged-in account.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn with_defaults(
        user_agent: Option<&str>,
        timeout: Duration,
        ffprobe: impl Into<PathBuf>,
        user_session: Option<&str>,
    ) -> Result<Self> {
        #[cfg(feature = "tracing")]
        tracing::debug!("Creating a new niconico resolver");

        let cookies = Arc::new(CookieStore::new());
        if let Some(session) = user_session {
            cookies.insert(COOKIE_DOMAIN, "user_session", session);
        }

        let transport = ReqwestTransport::new(user_agent, timeout, cookies.clone())?;
        let prober = FfprobeProber::new(ffprobe, timeout);

        Ok(Self::new(ExtractorContext::new(
            Arc::new(transport),
            Arc::new(prober),
            cookies,
        )))
    }

    /// Resolves a watch URL (or bare id) into metadata and formats sorted worst to best.
    ///
    /// A failing legacy probe is only logged, the DMC formats are still returned.
    ///
    /// # Errors
    ///
    /// [`Error::Deleted`], [`Error::NotFound`], [`Error::MembersOnly`] or
    /// [`Error::Upstream`] when the video is unavailable, and [`Error::NoPlayableFormat`]
    /// when nothing can be played.
    pub async fn resolve(&self, url: &str) -> Result<ResolvedVideo> {
        let video_id = match_video_id(url)?;

        #[cfg(feature = "tracing")]
        tracing::info!("Resolving {}", video_id);

        let page = self.fetch_watch_page(&video_id).await?;
        let thumb = self.fetch_thumb_info(&page.video_id).await?;
        thumb.check()?;
        page.ensure_success()?;

        let requested_url = if url.starts_with("http") {
            url.to_string()
        } else {
            format!("{SITE_ORIGIN}/watch/{}", page.video_id)
        };
        let info = build_info(&page, &thumb, &requested_url);

        let mut formats = page
            .api
            .dmc_info()
            .and_then(|dmc| dmc.quality.as_ref())
            .map(|quality| resolve_formats(&page.video_id, quality))
            .unwrap_or_default();

        if let Some(smile_url) = page.api.smile_url() {
            match self.probe_legacy(smile_url, &thumb, info.timestamp).await {
                Ok(Some(format)) => formats.push(format),
                Ok(None) => {}
                #[allow(unused_variables)]
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Skipping the legacy format: {}", e);
                }
            }
        }

        if formats.is_empty() {
            return Err(Error::NoPlayableFormat);
        }
        sort_formats(&mut formats);

        Ok(ResolvedVideo {
            info,
            formats,
            endpoint: page.api.session_endpoint(&page.video_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::Method;
    use crate::fetcher::legacy::ProbeOutput;
    use crate::fetcher::metadata::THUMB_INFO_URL;
    use crate::model::Protocol;
    use crate::testing::{self, FakeProber, FakeTransport};

    const WATCH_URL: &str = "https://www.nicovideo.jp/watch/sm9";
    const SMILE_URL: &str = "https://smile-com00.nicovideo.jp/smile?v=9.0468";

    fn api_blob(with_smile: bool) -> String {
        let smile = if with_smile {
            format!(r#", "smileInfo": {{"url": "{SMILE_URL}"}}"#)
        } else {
            String::new()
        };
        format!(
            r#"{{"video": {{
                "originalTitle": "新・豪血寺一族 -煩悩解放 - レッツゴー！陰陽師",
                "dmcInfo": {{
                    "quality": {{
                        "videos": [{{"id": "h264_1000kbps_720p_", "available": true}}],
                        "audios": [{{"id": "aac_128kbps_", "available": true}}]
                    }},
                    "session_api": {}
                }}{smile}
            }}}}"#,
            testing::session_api_json("40000")
        )
    }

    fn probe() -> ProbeOutput {
        serde_json::from_value(serde_json::json!({
            "streams": [{"codec_type": "video", "codec_name": "flv1", "bit_rate": "300000",
                         "width": 512, "height": 384}],
            "format": {"format_name": "flv"}
        }))
        .unwrap()
    }

    fn site(watch_status: u16, api: &str, thumb: &str) -> FakeTransport {
        FakeTransport::new()
            .respond(Method::Get, WATCH_URL, watch_status, &testing::watch_page(api))
            .respond(Method::Get, THUMB_INFO_URL, 200, thumb)
    }

    #[tokio::test]
    async fn resolves_dmc_and_legacy_formats() {
        let transport = Arc::new(site(200, &api_blob(true), &testing::thumb_info_ok(3_000_000, 1)));
        let prober = Arc::new(FakeProber::returning(probe()));

        let video = testing::niconico(&transport, &prober)
            .resolve(WATCH_URL)
            .await
            .unwrap();

        assert_eq!(video.info.id, "sm9");
        assert_eq!(
            video.info.title.as_deref(),
            Some("新・豪血寺一族 -煩悩解放 - レッツゴー！陰陽師")
        );
        assert_eq!(video.info.duration, Some(319));

        let ids: Vec<_> = video.formats.iter().map(|f| f.format_id.as_str()).collect();
        assert_eq!(ids, ["h264_1000kbps_720p_-aac_128kbps_", "smile"]);
        assert_eq!(video.best_format().unwrap().protocol, Protocol::Http);
        assert_eq!(video.best_format().unwrap().quality, Some(5));
        assert_eq!(video.session_formats().len(), 1);
        assert!(video.endpoint.is_some());
    }

    #[tokio::test]
    async fn bare_ids_get_a_canonical_url() {
        let thumb = r#"<nicovideo_thumb_response status="ok"></nicovideo_thumb_response>"#;
        let transport = Arc::new(site(200, &api_blob(false), thumb));

        let video = testing::niconico(&transport, &Arc::new(FakeProber::failing()))
            .resolve("sm9")
            .await
            .unwrap();
        assert_eq!(video.info.webpage_url, WATCH_URL);
    }

    #[tokio::test]
    async fn legacy_probe_failure_is_not_fatal() {
        let transport = Arc::new(site(200, &api_blob(true), &testing::thumb_info_ok(3_000_000, 1)));
        let prober = Arc::new(FakeProber::failing());

        let video = testing::niconico(&transport, &prober)
            .resolve(WATCH_URL)
            .await
            .unwrap();

        assert_eq!(video.formats.len(), 1);
        assert_eq!(prober.calls().len(), 1);
    }

    #[tokio::test]
    async fn nothing_playable() {
        let transport = Arc::new(site(200, "{}", &testing::thumb_info_ok(3_000_000, 1)));

        let result = testing::niconico(&transport, &Arc::new(FakeProber::failing()))
            .resolve(WATCH_URL)
            .await;
        assert!(matches!(result, Err(Error::NoPlayableFormat)));
    }

    #[tokio::test]
    async fn thumb_info_errors_win_over_the_page_status() {
        for (code, deleted) in [("DELETED", true), ("NOT_FOUND", false)] {
            let transport = Arc::new(site(404, "{}", &testing::thumb_info_error(code)));

            let error = testing::niconico(&transport, &Arc::new(FakeProber::failing()))
                .resolve(WATCH_URL)
                .await
                .unwrap_err();
            assert!(error.is_expected());
            assert_eq!(matches!(error, Error::Deleted), deleted);
        }
    }

    #[tokio::test]
    async fn failing_watch_page_is_reported() {
        let transport = Arc::new(site(403, &api_blob(false), &testing::thumb_info_ok(3_000_000, 1)));

        let result = testing::niconico(&transport, &Arc::new(FakeProber::failing()))
            .resolve(WATCH_URL)
            .await;
        assert!(matches!(result, Err(Error::Http { status: 403, .. })));
    }

    #[tokio::test]
    async fn rejects_foreign_urls_without_traffic() {
        let transport = Arc::new(FakeTransport::new());

        let result = testing::niconico(&transport, &Arc::new(FakeProber::failing()))
            .resolve("https://example.com/watch/sm9")
            .await;
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
        assert!(transport.requests().is_empty());
    }
}
