//! The pre-DMC (smile) delivery path, inspected with ffprobe.

use crate::Niconico;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::fetcher::COOKIE_DOMAIN;
use crate::fetcher::metadata::{ThumbInfo, parse_timestamp};
use crate::model::api::number_or_string;
use crate::model::format::{CodecInfo, FormatRecord, Protocol, RatesInfo};
use crate::model::quality::Resolution;
use async_trait::async_trait;
use ordered_float::OrderedFloat;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Uploads before 2016-12-08T00:00:00+09:00 are served at source quality.
pub const SOURCE_CUTOFF_TIMESTAMP: i64 = 1_481_122_800;

const SOURCE_PREFERENCE: i32 = 5;
const ECONOMY_PREFERENCE: i32 = -2;
const SOURCE_QUALITY: i32 = 5;

/// The JSON printed by `ffprobe -show_format -show_streams`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProbeOutput {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    #[serde(default)]
    pub format: ProbeFormat,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProbeStream {
    #[serde(default)]
    pub codec_type: Option<String>,
    #[serde(default)]
    pub codec_name: Option<String>,
    /// In bit/s.
    #[serde(default, deserialize_with = "number_or_string")]
    pub bit_rate: Option<u64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProbeFormat {
    #[serde(default)]
    pub format_name: Option<String>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub size: Option<u64>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub bit_rate: Option<u64>,
}

impl ProbeOutput {
    /// The first stream of the given type, or an empty one.
    pub fn first_stream(&self, codec_type: &str) -> ProbeStream {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some(codec_type))
            .cloned()
            .unwrap_or_default()
    }
}

/// Inspects a media URL.
#[async_trait]
pub trait MediaProber: Send + Sync + fmt::Debug {
    /// Probes `url`, sending `cookies` as ffprobe-style cookie lines.
    ///
    /// # Errors
    ///
    /// Fails if the tool cannot run or its output cannot be parsed.
    async fn probe(&self, url: &str, cookies: &str) -> Result<ProbeOutput>;
}

/// Runs the `ffprobe` binary.
#[derive(Debug, Clone, PartialEq)]
pub struct FfprobeProber {
    /// The path to ffprobe.
    pub executable_path: PathBuf,
    /// How long a probe may take.
    pub timeout: Duration,
}

impl FfprobeProber {
    pub fn new(executable_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            executable_path: executable_path.into(),
            timeout,
        }
    }

    fn args(url: &str, cookies: &str) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        if !cookies.is_empty() {
            args.push("-cookies".to_string());
            args.push(cookies.to_string());
        }
        args.push(url.to_string());

        args
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, url: &str, cookies: &str) -> Result<ProbeOutput> {
        let executor = Executor {
            executable_path: self.executable_path.clone(),
            timeout: self.timeout,
            args: Self::args(url, cookies),
        };

        let output = executor.execute().await?;
        Ok(serde_json::from_str(&output.stdout)?)
    }
}

/// Whether the legacy file is the original upload rather than a re-encode.
///
/// Uploads before the cutoff always are. Later ones only when the video stream carries a
/// real (non-epoch) creation time. An unknown upload time counts as after the cutoff.
pub fn is_source_quality(upload_timestamp: Option<i64>, creation_time: Option<&str>) -> bool {
    if upload_timestamp.is_some_and(|ts| ts < SOURCE_CUTOFF_TIMESTAMP) {
        return true;
    }

    creation_time
        .and_then(parse_timestamp)
        .is_some_and(|ts| ts > 0)
}

fn url_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next()?;
    let (_, last) = path.rsplit_once('/')?;
    let (_, ext) = last.rsplit_once('.')?;
    (!ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric())).then(|| ext.to_string())
}

fn extension(thumb: &ThumbInfo, probe: &ProbeOutput, url: &str) -> String {
    if let Some(movie_type) = thumb.get("movie_type") {
        return movie_type.to_string();
    }

    match probe.format.format_name.as_deref() {
        Some(name) if name.contains("mp4") => "mp4".to_string(),
        Some(name) if !name.is_empty() => name.to_string(),
        _ => url_extension(url).unwrap_or_else(|| "unknown_video".to_string()),
    }
}

fn kbps(bits: Option<u64>) -> Option<OrderedFloat<f64>> {
    bits.map(|b| OrderedFloat((b / 1000) as f64))
}

/// Builds the legacy format record from the probe and the thumb info.
pub fn legacy_format(
    url: &str,
    probe: &ProbeOutput,
    thumb: &ThumbInfo,
    upload_timestamp: Option<i64>,
) -> FormatRecord {
    let economy = url.ends_with("low");
    let video = probe.first_stream("video");
    let audio = probe.first_stream("audio");

    let source = is_source_quality(
        upload_timestamp,
        video.tags.get("creation_time").map(String::as_str),
    );

    let filesize = thumb
        .number(if economy { "size_low" } else { "size_high" })
        .or(probe.format.size);

    FormatRecord {
        format_id: if economy { "smile_low" } else { "smile" }.to_string(),
        url: url.to_string(),
        ext: extension(thumb, probe, url),
        container: probe.format.format_name.clone(),
        format_note: Some(
            if economy {
                "SMILEVIDEO low quality"
            } else {
                "SMILEVIDEO source"
            }
            .to_string(),
        ),
        codec_info: CodecInfo {
            video_codec: video.codec_name.clone(),
            audio_codec: audio.codec_name.clone(),
        },
        rates_info: RatesInfo {
            video_rate: kbps(video.bit_rate),
            audio_rate: kbps(audio.bit_rate),
            total_rate: kbps(probe.format.bit_rate),
        },
        video_resolution: Resolution {
            width: video.width,
            height: video.height,
        },
        quality: (source && !economy).then_some(SOURCE_QUALITY),
        source_preference: Some(if economy {
            ECONOMY_PREFERENCE
        } else {
            SOURCE_PREFERENCE
        }),
        filesize,
        protocol: Protocol::Http,
        http_headers: BTreeMap::new(),
    }
}

impl Niconico {
    /// Probes the legacy media URL and describes it as a format.
    ///
    /// Returns `None` when the thumb info says the legacy file is a placeholder
    /// (`size_high` of 0 or 1).
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Probe`] if the media cannot be inspected.
    pub async fn probe_legacy(
        &self,
        url: &str,
        thumb: &ThumbInfo,
        upload_timestamp: Option<i64>,
    ) -> Result<Option<FormatRecord>> {
        if thumb.number("size_high").is_some_and(|size| size <= 1) {
            #[cfg(feature = "tracing")]
            tracing::debug!("Legacy file is a placeholder, skipping it");

            return Ok(None);
        }

        if url.ends_with("low") {
            #[cfg(feature = "tracing")]
            tracing::warn!("Site is currently in economy mode! You will only have access to lower quality streams");
        }

        let cookies = self.context.cookies.ffprobe_lines(COOKIE_DOMAIN);
        let probe = self
            .context
            .prober
            .probe(url, &cookies)
            .await
            .map_err(|e| Error::Probe(e.to_string()))?;

        Ok(Some(legacy_format(url, &probe, thumb, upload_timestamp)))
    }
}
