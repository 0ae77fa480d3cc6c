//! The models used to represent a resolved niconico video.
//!
//! The represented data is the video metadata, its selectable formats, and the sessions
//! opened for them.

use crate::model::api::SessionEndpoint;
use crate::model::format::FormatRecord;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

pub mod api;
pub mod format;
pub mod quality;
pub mod session;

pub use format::{CodecInfo, Protocol, RatesInfo};
pub use quality::{QualityDescriptor, Resolution, VideoIdentity};
pub use session::{HeartbeatTask, NegotiatedFormat, SessionDescriptor};

/// Descriptive metadata of a video.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// The watch id, e.g. `sm9`.
    pub id: String,
    /// The title.
    pub title: Option<String>,
    /// The description, may contain HTML.
    pub description: Option<String>,
    /// The thumbnail URL.
    pub thumbnail: Option<String>,
    /// The uploader or channel name.
    pub uploader: Option<String>,
    /// The uploader or channel id.
    pub uploader_id: Option<String>,
    /// The upload time as a unix timestamp.
    pub timestamp: Option<i64>,
    /// The duration in seconds.
    pub duration: Option<u64>,
    /// The number of views.
    pub view_count: Option<u64>,
    /// The number of comments.
    pub comment_count: Option<u64>,
    /// The canonical watch URL.
    pub webpage_url: String,
}

/// The output of resolving a watch URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedVideo {
    /// The metadata.
    pub info: VideoInfo,
    /// The formats, sorted from worst to best.
    pub formats: Vec<FormatRecord>,
    /// What the negotiator needs to open sessions for the DMC formats.
    #[serde(skip)]
    pub endpoint: Option<SessionEndpoint>,
}

impl ResolvedVideo {
    /// Returns the best format available.
    pub fn best_format(&self) -> Option<&FormatRecord> {
        self.formats.iter().max_by(|a, b| compare_formats(a, b))
    }

    /// Returns the worst format available.
    pub fn worst_format(&self) -> Option<&FormatRecord> {
        self.formats.iter().min_by(|a, b| compare_formats(a, b))
    }

    /// Returns the format with the given id.
    pub fn format(&self, format_id: &str) -> Option<&FormatRecord> {
        self.formats.iter().find(|f| f.format_id == format_id)
    }

    /// The DMC formats, best first, for callers walking a fallback chain.
    pub fn session_formats(&self) -> Vec<&FormatRecord> {
        let mut formats: Vec<&FormatRecord> =
            self.formats.iter().filter(|f| f.needs_session()).collect();
        formats.sort_by(|a, b| compare_formats(b, a));
        formats
    }
}

/// Sorts formats from worst to best.
pub fn sort_formats(formats: &mut [FormatRecord]) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Sorting {} formats", formats.len());

    formats.sort_by(compare_formats);
}

/// Compares two formats.
/// Formats sorting : "quality", "source preference", "height", "video bitrate", "audio bitrate"
///
/// Unknown values sort below every known one, they are never read as zero.
pub fn compare_formats(a: &FormatRecord, b: &FormatRecord) -> Ordering {
    let known = |x: Option<OrderedFloat<f64>>| x.map(|v| (1, v)).unwrap_or((0, OrderedFloat(0.0)));

    a.quality
        .unwrap_or(-1)
        .cmp(&b.quality.unwrap_or(-1))
        .then_with(|| {
            a.source_preference
                .unwrap_or(-1)
                .cmp(&b.source_preference.unwrap_or(-1))
        })
        .then_with(|| a.video_resolution.height.cmp(&b.video_resolution.height))
        .then_with(|| known(a.rates_info.video_rate).cmp(&known(b.rates_info.video_rate)))
        .then_with(|| known(a.rates_info.audio_rate).cmp(&known(b.rates_info.audio_rate)))
}

impl fmt::Display for VideoInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Video(id = {}, title = \"{}\", uploader = \"{}\")",
            self.id,
            self.title.as_deref().unwrap_or_default(),
            self.uploader.as_deref().unwrap_or_default()
        )
    }
}

impl fmt::Display for ResolvedVideo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} with {} formats", self.info, self.formats.len())
    }
}
