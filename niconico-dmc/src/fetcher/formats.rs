//! Turns the session API's quality descriptors into selectable formats.

use crate::fetcher::SITE_ORIGIN;
use crate::model::api::QualityInfo;
use crate::model::format::{CodecInfo, FormatRecord, Protocol, RatesInfo};
use crate::model::quality::{QualityDescriptor, Resolution, VideoIdentity};
use ordered_float::OrderedFloat;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Prefix carried by the source ids of archived encodes.
const ARCHIVE_PREFIX: &str = "archive_";

/// Quality given to ordinary DMC formats.
const DEFAULT_QUALITY: i32 = -1;
/// Quality given to economy encodes, whose ids contain `low`.
const LOW_QUALITY: i32 = -2;

static SOURCE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:archive_)?(?:(?P<codec>[^_]+)_)?(?:(?P<br>\d+)kbps_)?(?:(?P<res>[\d+]+)p_)?")
        .expect("source id pattern is valid")
});

/// Fields recovered from a source id such as `archive_h264_1000kbps_720p`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSourceId {
    pub codec: Option<String>,
    /// In kbit/s.
    pub bitrate: Option<u32>,
    pub height: Option<u32>,
}

/// Parses `[archive_][codec_][{n}kbps_][{n}p_]`, any group may be missing.
pub fn parse_source_id(id: &str) -> ParsedSourceId {
    let subject = format!("{id}_");
    let Some(captures) = SOURCE_ID.captures(&subject) else {
        return ParsedSourceId::default();
    };

    ParsedSourceId {
        codec: captures.name("codec").map(|m| m.as_str().to_string()),
        bitrate: captures.name("br").and_then(|m| m.as_str().parse().ok()),
        height: captures.name("res").and_then(|m| m.as_str().parse().ok()),
    }
}

/// Removes the `archive_` prefix, ids without it are returned unchanged.
pub fn strip_archive_prefix(id: &str) -> &str {
    id.strip_prefix(ARCHIVE_PREFIX).unwrap_or(id)
}

/// The format id of a (video, audio) pair, video first.
pub fn format_id(video: &QualityDescriptor, audio: &QualityDescriptor) -> String {
    format!(
        "{}-{}",
        strip_archive_prefix(&video.id),
        strip_archive_prefix(&audio.id)
    )
}

/// Ranks economy encodes below everything else.
///
/// The site names its economy sources with `low`; this rule only holds for its naming
/// scheme.
pub fn quality_rank(format_id: &str) -> i32 {
    if format_id.contains("low") {
        LOW_QUALITY
    } else {
        DEFAULT_QUALITY
    }
}

/// Headers the media request must carry.
pub fn stream_headers(video_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("Origin".to_string(), SITE_ORIGIN.to_string()),
        (
            "Referer".to_string(),
            format!("{SITE_ORIGIN}/watch/{video_id}"),
        ),
    ])
}

/// Builds the format for one (video, audio) pair.
pub fn format_for_quality(
    video_id: &str,
    video: &QualityDescriptor,
    audio: &QualityDescriptor,
) -> FormatRecord {
    let format_id = format_id(video, audio);
    let parsed_video = parse_source_id(&video.id);
    let parsed_audio = parse_source_id(&audio.id);

    let kbps = |descriptor: &QualityDescriptor, parsed: &ParsedSourceId| {
        descriptor
            .bitrate
            .filter(|bitrate| *bitrate > 0.0)
            .map(|bitrate| bitrate / 1000.0)
            .or(parsed.bitrate.map(f64::from))
            .map(OrderedFloat)
    };

    let structured = video.resolution.unwrap_or_default();
    let identity = VideoIdentity::new(video_id.to_string(), video.id.clone(), audio.id.clone());

    FormatRecord {
        url: identity.to_string(),
        ext: "mp4".to_string(),
        container: None,
        format_note: None,
        codec_info: CodecInfo {
            video_codec: parsed_video.codec.clone(),
            audio_codec: parsed_audio.codec.clone(),
        },
        rates_info: RatesInfo {
            video_rate: kbps(video, &parsed_video),
            audio_rate: kbps(audio, &parsed_audio),
            total_rate: None,
        },
        video_resolution: Resolution {
            width: structured.width,
            height: structured.height.or(parsed_video.height),
        },
        quality: Some(quality_rank(&format_id)),
        source_preference: None,
        filesize: None,
        protocol: Protocol::NiconicoDmc,
        http_headers: stream_headers(video_id),
        format_id,
    }
}

/// Builds a format for every pair where both sides are available.
pub fn resolve_formats(video_id: &str, quality: &QualityInfo) -> Vec<FormatRecord> {
    let mut formats = Vec::new();

    for audio in quality.audios.iter().filter(|a| a.available) {
        for video in quality.videos.iter().filter(|v| v.available) {
            formats.push(format_for_quality(video_id, video, audio));
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!(
        "Resolved {} DMC formats from {} video and {} audio sources",
        formats.len(),
        quality.videos.len(),
        quality.audios.len()
    );

    formats
}
