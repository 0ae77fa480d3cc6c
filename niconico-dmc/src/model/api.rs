//! Typed view of the `data-api-data` blob embedded in the watch page.
//!
//! Every upstream field is optional here. Code that needs a field asks for it through
//! [`require`], which turns an absent value into [`Error::Precondition`] at the point of use
//! instead of letting `null` leak through the whole extraction.

use crate::error::{Error, Result};
use crate::model::quality::QualityDescriptor;
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

/// Returns the value of a field the caller cannot proceed without.
pub fn require<'a, T>(value: &'a Option<T>, field: &'static str) -> Result<&'a T> {
    value.as_ref().ok_or(Error::Precondition(field))
}

/// The root of the blob.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ApiData {
    /// The video section.
    #[serde(default)]
    pub video: Option<VideoData>,
    /// The uploader, `null` for channel videos and anonymous uploads.
    #[serde(default)]
    pub owner: Option<Owner>,
    /// The comment thread.
    #[serde(default)]
    pub thread: Option<Thread>,
}

/// The `video` section of the blob.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VideoData {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default, rename = "originalTitle")]
    pub original_title: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default, rename = "largeThumbnailURL")]
    pub large_thumbnail_url: Option<String>,
    #[serde(default, rename = "thumbnailURL")]
    pub thumbnail_url_legacy: Option<String>,
    #[serde(default)]
    pub first_retrieve: Option<String>,
    #[serde(default, rename = "postedDateTime")]
    pub posted_date_time: Option<String>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub view_counter: Option<u64>,
    #[serde(default, rename = "viewCount", deserialize_with = "number_or_string")]
    pub view_count: Option<u64>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub comment_num: Option<u64>,
    #[serde(default)]
    pub length: Option<String>,
    #[serde(default, deserialize_with = "number_or_string")]
    pub duration: Option<u64>,
    #[serde(default)]
    pub watch_url: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub ch_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub ch_name: Option<String>,
    #[serde(default)]
    pub user_nickname: Option<String>,

    /// Modern (DMC) delivery information.
    #[serde(default, rename = "dmcInfo")]
    pub dmc_info: Option<DmcInfo>,
    /// Legacy (smile) delivery information.
    #[serde(default, rename = "smileInfo")]
    pub smile_info: Option<SmileInfo>,
}

impl VideoData {
    /// The first thumbnail URL the blob offers.
    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail_url
            .as_deref()
            .or(self.large_thumbnail_url.as_deref())
            .or(self.thumbnail_url_legacy.as_deref())
    }

    /// The view count under either of its names.
    pub fn views(&self) -> Option<u64> {
        self.view_counter.or(self.view_count)
    }

    /// The channel id, or the user id for user uploads.
    pub fn uploader_id(&self) -> Option<&str> {
        self.ch_id.as_deref().or(self.user_id.as_deref())
    }

    /// The channel name, or the user nickname for user uploads.
    pub fn uploader(&self) -> Option<&str> {
        self.ch_name.as_deref().or(self.user_nickname.as_deref())
    }
}

/// The uploader of a video.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Owner {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
}

/// The comment thread of a video.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Thread {
    #[serde(default, rename = "commentCount", deserialize_with = "number_or_string")]
    pub comment_count: Option<u64>,
}

/// The `dmcInfo` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DmcInfo {
    #[serde(default)]
    pub tracking_id: Option<String>,
    /// Present only for encrypted HLS delivery.
    #[serde(default)]
    pub encryption: Option<Encryption>,
    #[serde(default)]
    pub quality: Option<QualityInfo>,
    #[serde(default)]
    pub session_api: Option<SessionApi>,
}

/// The descriptors the session API can mux together.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QualityInfo {
    #[serde(default)]
    pub audios: Vec<QualityDescriptor>,
    #[serde(default)]
    pub videos: Vec<QualityDescriptor>,
}

/// The encryption capability block.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Encryption {
    #[serde(default)]
    pub hls_encryption_v1: Option<HlsEncryptionV1>,
}

/// Keys for `hls_encryption_v1`, copied verbatim into the session request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HlsEncryptionV1 {
    #[serde(default)]
    pub encrypted_key: Option<String>,
    #[serde(default)]
    pub key_uri: Option<String>,
}

/// The `session_api` section: where and how to open a session.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionApi {
    #[serde(default)]
    pub urls: Vec<SessionApiUrl>,
    #[serde(default)]
    pub player_id: Option<String>,
    #[serde(default)]
    pub auth_types: HashMap<String, String>,
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default)]
    pub content_key_timeout: Option<u64>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub service_user_id: Option<String>,
    #[serde(default)]
    pub content_id: Option<String>,
    /// Session lifetime in milliseconds.
    #[serde(default)]
    pub heartbeat_lifetime: Option<u64>,
    #[serde(default)]
    pub priority: Option<f64>,
    #[serde(default)]
    pub recipe_id: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

/// One session endpoint and its port/TLS capabilities.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionApiUrl {
    pub url: String,
    #[serde(default)]
    pub is_ssl: bool,
    #[serde(default)]
    pub is_well_known_port: bool,
}

/// The legacy delivery section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SmileInfo {
    #[serde(default)]
    pub url: Option<String>,
}

/// Everything the negotiator needs from the blob, kept beside the resolved formats.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionEndpoint {
    /// The watch id the endpoint was fetched for.
    pub video_id: String,
    /// The session API block.
    pub session_api: Option<SessionApi>,
    /// The encryption capability, if advertised.
    pub encryption: Option<Encryption>,
    /// The id sent with the tracking ping.
    pub tracking_id: Option<String>,
}

impl ApiData {
    /// Parses the unescaped attribute value.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// The `dmcInfo` section, if any.
    pub fn dmc_info(&self) -> Option<&DmcInfo> {
        self.video.as_ref().and_then(|video| video.dmc_info.as_ref())
    }

    /// The legacy media URL, if any.
    pub fn smile_url(&self) -> Option<&str> {
        self.video
            .as_ref()
            .and_then(|video| video.smile_info.as_ref())
            .and_then(|smile| smile.url.as_deref())
    }

    /// The session endpoint description, if the video is served through DMC at all.
    pub fn session_endpoint(&self, video_id: &str) -> Option<SessionEndpoint> {
        let dmc = self.dmc_info()?;
        Some(SessionEndpoint {
            video_id: video_id.to_string(),
            session_api: dmc.session_api.clone(),
            encryption: dmc.encryption.clone(),
            tracking_id: dmc.tracking_id.clone(),
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<StringOrNumber>::deserialize(deserializer)?.map(|value| match value {
            StringOrNumber::String(s) => s,
            StringOrNumber::Number(n) => n.to_string(),
        }),
    )
}

pub(crate) fn number_or_string<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        Option::<StringOrNumber>::deserialize(deserializer)?.and_then(|value| match value {
            StringOrNumber::String(s) => s.replace(',', "").trim().parse().ok(),
            StringOrNumber::Number(n) => n.as_u64(),
        }),
    )
}
