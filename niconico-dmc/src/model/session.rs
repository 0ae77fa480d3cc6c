//! Negotiated DMC sessions and the keep-alive derived from them.

use crate::model::format::{FormatRecord, Protocol};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::time::Duration;

/// A session issued by the DMC endpoint.
///
/// The server expires the session unless the heartbeat described by
/// [`SessionDescriptor::heartbeat_task`] keeps being sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// The server-side session id.
    pub session_id: String,
    /// Where the media can be fetched from while the session lives.
    pub content_uri: String,
    /// The transport the session was opened with.
    pub protocol: Protocol,
    /// How often the heartbeat must be sent.
    pub heartbeat_interval: Duration,
    /// The session endpoint the session was created on.
    pub endpoint_url: String,
    /// The `data` object of the creation response, sent back verbatim on each heartbeat.
    pub raw_session_payload: Box<RawValue>,
}

impl PartialEq for SessionDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.session_id == other.session_id
            && self.content_uri == other.content_uri
            && self.protocol == other.protocol
            && self.heartbeat_interval == other.heartbeat_interval
            && self.endpoint_url == other.endpoint_url
            && self.raw_session_payload.get() == other.raw_session_payload.get()
    }
}

/// One keep-alive request to repeat every `interval`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatTask {
    /// The update URL of the session.
    pub url: String,
    /// The JSON body to post.
    pub body: String,
    /// The delay between two requests.
    pub interval: Duration,
}

/// A format whose session is open, ready to hand to a download engine.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatedFormat {
    /// The format with its playable URL and transport filled in.
    pub format: FormatRecord,
    /// The session backing the URL.
    pub session: SessionDescriptor,
}

impl SessionDescriptor {
    /// The URL the heartbeat is sent to.
    pub fn heartbeat_url(&self) -> String {
        format!(
            "{}/{}?_format=json&_method=PUT",
            self.endpoint_url, self.session_id
        )
    }

    /// Derives the keep-alive request for this session.
    pub fn heartbeat_task(&self) -> HeartbeatTask {
        HeartbeatTask {
            url: self.heartbeat_url(),
            body: self.raw_session_payload.get().to_string(),
            interval: self.heartbeat_interval,
        }
    }
}
