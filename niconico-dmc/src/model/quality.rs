//! Quality descriptors offered by the DMC API and the identity used to address them.

use crate::error::{Error, Result};
use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scheme prefix of the composite identity string carried by unnegotiated DMC formats.
pub const DMC_SCHEME: &str = "niconico_dmc";

/// A width/height pair, either side may be unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    /// The width in pixels.
    pub width: Option<u32>,
    /// The height in pixels.
    pub height: Option<u32>,
}

/// One audio or video encoding the session API can serve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityDescriptor {
    /// The source id, e.g. `archive_h264_1000kbps_720p`.
    pub id: String,
    /// The bitrate in bit/s.
    #[serde(default)]
    pub bitrate: Option<f64>,
    /// The resolution, only present on video descriptors.
    #[serde(default)]
    pub resolution: Option<Resolution>,
    /// Whether the source can currently be requested.
    #[serde(default)]
    pub available: bool,
}

/// The identifiers needed to open a session for one (video, audio) pair.
///
/// Written and parsed as `niconico_dmc:{video_id}/{video_source_id}/{audio_source_id}`.
#[derive(Constructor, Debug, Clone, PartialEq, Eq, Hash)]
pub struct VideoIdentity {
    /// The watch id, e.g. `sm9`.
    pub video_id: String,
    /// The video source id to multiplex.
    pub video_source_id: String,
    /// The audio source id to multiplex.
    pub audio_source_id: String,
}

impl FromStr for VideoIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidIdentity(s.to_string());

        let (scheme, rest) = s.split_once(':').ok_or_else(invalid)?;
        if scheme != DMC_SCHEME {
            return Err(invalid());
        }

        let mut parts = rest.split('/');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(video), Some(video_src), Some(audio_src), None)
                if !video.is_empty() && !video_src.is_empty() && !audio_src.is_empty() =>
            {
                Ok(Self::new(
                    video.to_string(),
                    video_src.to_string(),
                    audio_src.to_string(),
                ))
            }
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for VideoIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}/{}",
            DMC_SCHEME, self.video_id, self.video_source_id, self.audio_source_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_parses_composite_string() {
        let identity: VideoIdentity = "niconico_dmc:sm9/archive_h264_360p/archive_aac_64kbps"
            .parse()
            .unwrap();

        assert_eq!(identity.video_id, "sm9");
        assert_eq!(identity.video_source_id, "archive_h264_360p");
        assert_eq!(identity.audio_source_id, "archive_aac_64kbps");
        assert_eq!(
            identity.to_string(),
            "niconico_dmc:sm9/archive_h264_360p/archive_aac_64kbps"
        );
    }

    #[test]
    fn identity_rejects_malformed_strings() {
        for input in [
            "sm9/a/b",
            "http:sm9/a/b",
            "niconico_dmc:sm9/a",
            "niconico_dmc:sm9/a/b/c",
            "niconico_dmc:sm9//b",
        ] {
            assert!(
                matches!(input.parse::<VideoIdentity>(), Err(Error::InvalidIdentity(_))),
                "{input} should be rejected"
            );
        }
    }

    #[test]
    fn descriptor_defaults_to_unavailable() {
        let descriptor: QualityDescriptor =
            serde_json::from_str(r#"{"id":"archive_aac_64kbps"}"#).unwrap();

        assert!(!descriptor.available);
        assert_eq!(descriptor.bitrate, None);
        assert_eq!(descriptor.resolution, None);
    }
}
