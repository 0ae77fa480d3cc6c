//! Playable format records.

use crate::model::quality::Resolution;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How the bytes of a format are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// A DMC format whose session has not been negotiated yet.
    NiconicoDmc,
    /// Plain progressive HTTP.
    Http,
    /// HLS with `hls_encryption_v1` keys.
    #[serde(rename = "m3u8")]
    HlsEncrypted,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::NiconicoDmc => write!(f, "niconico_dmc"),
            Protocol::Http => write!(f, "http"),
            Protocol::HlsEncrypted => write!(f, "m3u8"),
        }
    }
}

/// Codec names of a format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodecInfo {
    /// e.g. `h264`.
    pub video_codec: Option<String>,
    /// e.g. `aac`.
    pub audio_codec: Option<String>,
}

/// Bitrates of a format, all in kbit/s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RatesInfo {
    /// The video bitrate.
    pub video_rate: Option<OrderedFloat<f64>>,
    /// The audio bitrate.
    pub audio_rate: Option<OrderedFloat<f64>>,
    /// The container bitrate.
    pub total_rate: Option<OrderedFloat<f64>>,
}

/// A single selectable format of a video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormatRecord {
    /// The format id, e.g. `h264_360p-aac_64kbps` or `smile`.
    pub format_id: String,
    /// The DMC identity string until negotiated, the media URL afterwards.
    pub url: String,
    /// The file extension.
    pub ext: String,
    /// The container, when probed.
    pub container: Option<String>,
    /// A human readable note.
    pub format_note: Option<String>,

    /// The codecs.
    pub codec_info: CodecInfo,
    /// The bitrates.
    pub rates_info: RatesInfo,
    /// The frame size.
    pub video_resolution: Resolution,

    /// Relative quality, higher is better.
    pub quality: Option<i32>,
    /// Relative preference of the delivery source, higher is better.
    pub source_preference: Option<i32>,
    /// The size in bytes.
    pub filesize: Option<u64>,

    /// How the format is delivered.
    pub protocol: Protocol,
    /// Headers to send with the media request.
    pub http_headers: BTreeMap<String, String>,
}

impl FormatRecord {
    /// Whether a session must be negotiated before this format can be downloaded.
    pub fn needs_session(&self) -> bool {
        self.protocol == Protocol::NiconicoDmc
    }

    /// The video bitrate in kbit/s.
    pub fn vbr(&self) -> Option<f64> {
        self.rates_info.video_rate.map(|rate| *rate)
    }

    /// The audio bitrate in kbit/s.
    pub fn abr(&self) -> Option<f64> {
        self.rates_info.audio_rate.map(|rate| *rate)
    }
}

impl fmt::Display for FormatRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Format(id = {}, ext = {}, protocol = {})",
            self.format_id, self.ext, self.protocol
        )
    }
}
