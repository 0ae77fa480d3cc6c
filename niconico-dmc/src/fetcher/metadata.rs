//! Fetches the watch page, its embedded API blob, and the thumb info document.

use crate::Niconico;
use crate::error::{Error, Result};
use crate::fetcher::{HttpRequest, HttpResponse, SITE_ORIGIN};
use crate::model::VideoInfo;
use crate::model::api::ApiData;
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// The thumb info API.
pub const THUMB_INFO_URL: &str = "https://ext.nicovideo.jp/api/getthumbinfo";

static WATCH_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://(?:www\.|secure\.|sp\.)?nicovideo\.jp/watch/(?P<id>(?:[a-z]{2})?[0-9]+)")
        .expect("watch url pattern is valid")
});
static BARE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[a-z]{2})?[0-9]+$").expect("id pattern is valid"));
static API_DATA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-api-data="([^"]+)""#).expect("api data pattern is valid"));
static OG_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta\s+property="og:title"\s+content="([^"]+)""#).expect("og:title pattern is valid")
});
static OG_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta\s+property="og:image"\s+content="([^"]+)""#).expect("og:image pattern is valid")
});
static HEADER_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<span[^>]+class="videoHeaderTitle"[^>]*>([^<]+)</span>"#)
        .expect("header title pattern is valid")
});
static XML_LEAF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<([a-z_]+)(?:\s[^>]*)?>([^<]*)</([a-z_]+)>").expect("xml leaf pattern is valid")
});

/// The watch page of a video.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchPage {
    /// The watch id, after following `so` redirects.
    pub video_id: String,
    /// The HTTP status of the page.
    pub status: u16,
    /// The URL after redirects.
    pub final_url: String,
    /// The raw HTML.
    pub html: String,
    /// The parsed `data-api-data` blob, empty when the page has none.
    pub api: ApiData,
}

/// The leaf elements of a `getthumbinfo` response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThumbInfo {
    failed: bool,
    fields: HashMap<String, String>,
}

/// Extracts the watch id from a watch URL or a bare id.
///
/// # Errors
///
/// Fails with [`Error::InvalidUrl`] for anything else.
pub fn match_video_id(url: &str) -> Result<String> {
    let url = url.trim();
    if let Some(captures) = WATCH_URL.captures(url) {
        return Ok(captures["id"].to_string());
    }
    if BARE_ID.is_match(url) {
        return Ok(url.to_string());
    }

    Err(Error::InvalidUrl(url.to_string()))
}

/// Pulls the API blob out of the watch page; an absent attribute yields an empty blob.
///
/// # Errors
///
/// Fails if the attribute is present but does not hold valid JSON.
pub fn extract_api_data(html: &str) -> Result<ApiData> {
    match API_DATA.captures(html) {
        Some(captures) => ApiData::from_json(&html_escape::decode_html_entities(&captures[1])),
        None => {
            #[cfg(feature = "tracing")]
            tracing::debug!("Watch page carries no API data");

            Ok(ApiData::default())
        }
    }
}

/// Parses an ISO-8601 timestamp or the site's `YYYY/MM/DD HH:MM:SS` local (JST) time.
pub fn parse_timestamp(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.timestamp());
    }

    let jst = FixedOffset::east_opt(9 * 3600)?;
    ["%Y/%m/%d %H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M"]
        .iter()
        .find_map(|pattern| NaiveDateTime::parse_from_str(value, pattern).ok())
        .and_then(|naive| naive.and_local_timezone(jst).single())
        .map(|parsed| parsed.timestamp())
}

/// Parses `s`, `m:ss` or `h:mm:ss` into seconds.
pub fn parse_duration(value: &str) -> Option<u64> {
    value
        .trim()
        .split(':')
        .try_fold(0u64, |total, part| {
            total.checked_mul(60)?.checked_add(part.parse::<u64>().ok()?)
        })
}

impl ThumbInfo {
    /// Parses the response body.
    pub fn parse(xml: &str) -> Self {
        let failed = xml.contains(r#"status="fail""#) || xml.contains("<error>");

        let mut fields = HashMap::new();
        for captures in XML_LEAF.captures_iter(xml) {
            if captures[1] != captures[3] {
                continue;
            }
            // Repeated tags (e.g. <tag>) keep their first value.
            fields
                .entry(captures[1].to_string())
                .or_insert_with(|| html_escape::decode_html_entities(captures[2].trim()).to_string());
        }

        Self { failed, fields }
    }

    /// The text of a leaf element, empty strings count as absent.
    pub fn get(&self, tag: &str) -> Option<&str> {
        self.fields
            .get(tag)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// The first present tag among `tags`.
    pub fn first(&self, tags: &[&str]) -> Option<&str> {
        tags.iter().find_map(|tag| self.get(tag))
    }

    /// A numeric leaf.
    pub fn number(&self, tag: &str) -> Option<u64> {
        self.get(tag).and_then(|value| value.parse().ok())
    }

    /// Turns an error response into the matching error.
    ///
    /// # Errors
    ///
    /// [`Error::Deleted`], [`Error::NotFound`], [`Error::MembersOnly`], or
    /// [`Error::Upstream`] with the raw code.
    pub fn check(&self) -> Result<()> {
        if !self.failed {
            return Ok(());
        }

        match self.get("code") {
            Some("DELETED") => Err(Error::Deleted),
            Some("NOT_FOUND") => Err(Error::NotFound),
            Some("COMMUNITY") => Err(Error::MembersOnly),
            code => Err(Error::Upstream(code.unwrap_or("unknown").to_string())),
        }
    }
}

/// Assembles the metadata from the blob, the page and the thumb info, first hit wins.
pub fn build_info(page: &WatchPage, thumb: &ThumbInfo, requested_url: &str) -> VideoInfo {
    let video = page.api.video.clone().unwrap_or_default();
    let owner = page.api.owner.clone().unwrap_or_default();
    let capture = |pattern: &Regex| {
        pattern
            .captures(&page.html)
            .map(|c| html_escape::decode_html_entities(c[1].trim()).to_string())
    };

    let title = video
        .original_title
        .clone()
        .or_else(|| capture(&OG_TITLE))
        .or_else(|| capture(&HEADER_TITLE))
        .or_else(|| video.title.clone())
        .or_else(|| thumb.get("title").map(str::to_string));

    let thumbnail = capture(&OG_IMAGE)
        .or_else(|| video.thumbnail().map(str::to_string))
        .or_else(|| thumb.get("thumbnail_url").map(str::to_string));

    let timestamp = video
        .first_retrieve
        .as_deref()
        .and_then(parse_timestamp)
        .or_else(|| video.posted_date_time.as_deref().and_then(parse_timestamp))
        .or_else(|| thumb.get("first_retrieve").and_then(parse_timestamp));

    let duration = video
        .duration
        .or_else(|| video.length.as_deref().and_then(parse_duration))
        .or_else(|| thumb.get("length").and_then(parse_duration));

    let comment_count = video
        .comment_num
        .or(page.api.thread.as_ref().and_then(|t| t.comment_count))
        .or_else(|| thumb.number("comment_num"));

    VideoInfo {
        id: page.video_id.clone(),
        title,
        description: video
            .description
            .clone()
            .or_else(|| thumb.get("description").map(str::to_string)),
        thumbnail,
        uploader: video
            .uploader()
            .map(str::to_string)
            .or(owner.nickname)
            .or_else(|| thumb.first(&["ch_name", "user_nickname"]).map(str::to_string)),
        uploader_id: video
            .uploader_id()
            .map(str::to_string)
            .or(owner.id)
            .or_else(|| thumb.first(&["ch_id", "user_id"]).map(str::to_string)),
        timestamp,
        duration,
        view_count: video.views().or_else(|| thumb.number("view_counter")),
        comment_count,
        webpage_url: video
            .watch_url
            .clone()
            .or_else(|| thumb.get("watch_url").map(str::to_string))
            .unwrap_or_else(|| requested_url.to_string()),
    }
}

impl WatchPage {
    /// Fails with [`Error::Http`] if the page itself was not served.
    pub fn ensure_success(&self) -> Result<()> {
        if (200..300).contains(&self.status) {
            Ok(())
        } else {
            Err(Error::Http {
                status: self.status,
                url: self.final_url.clone(),
            })
        }
    }
}

impl Niconico {
    /// Fetches the watch page and parses its API blob.
    ///
    /// A non-success status is kept in [`WatchPage::status`] so that the thumb info can
    /// report a more precise reason first.
    ///
    /// # Errors
    ///
    /// Fails if the page cannot be fetched at all or the blob is not valid JSON.
    pub async fn fetch_watch_page(&self, video_id: &str) -> Result<WatchPage> {
        #[cfg(feature = "tracing")]
        tracing::debug!("Downloading watch page of {}", video_id);

        let response: HttpResponse = self
            .context
            .transport
            .send(HttpRequest::get(format!("{SITE_ORIGIN}/watch/{video_id}")))
            .await?;

        let mut resolved_id = video_id.to_string();
        if video_id.starts_with("so") {
            if let Ok(redirected) = match_video_id(&response.final_url) {
                resolved_id = redirected;
            }
        }

        let api = if response.is_success() {
            extract_api_data(&response.body)?
        } else {
            ApiData::default()
        };

        Ok(WatchPage {
            video_id: resolved_id,
            status: response.status,
            final_url: response.final_url,
            html: response.body,
            api,
        })
    }

    /// Fetches the thumb info document.
    ///
    /// # Errors
    ///
    /// Fails if the document cannot be fetched. Error codes inside the document are left
    /// to [`ThumbInfo::check`].
    pub async fn fetch_thumb_info(&self, video_id: &str) -> Result<ThumbInfo> {
        #[cfg(feature = "tracing")]
        tracing::debug!("Downloading video info page of {}", video_id);

        let response = self
            .context
            .transport
            .send(HttpRequest::get(format!("{THUMB_INFO_URL}/{video_id}")))
            .await?
            .error_for_status()?;

        Ok(ThumbInfo::parse(&response.body))
    }
}
