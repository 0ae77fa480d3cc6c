//! Opens DMC sessions for the formats the resolver produced.
//!
//! A DMC format is only an identity (`niconico_dmc:{video}/{video_src}/{audio_src}`) until
//! a session is created for it. The session endpoint answers with the media URL and a
//! session object that must be posted back periodically to keep the URL alive.

use crate::Niconico;
use crate::error::{Error, Result};
use crate::fetcher::HttpRequest;
use crate::fetcher::formats::stream_headers;
use crate::model::api::{SessionApi, SessionEndpoint, require};
use crate::model::format::{FormatRecord, Protocol};
use crate::model::quality::VideoIdentity;
use crate::model::session::{NegotiatedFormat, SessionDescriptor};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::str::FromStr;
use std::time::Duration;

/// The tracking endpoint pinged before a session is created.
pub const TRACKING_URL: &str = "https://nvapi.nicovideo.jp/v1/2ab0cbaa/watch";

const SEGMENT_DURATION_MS: u64 = 6000;

#[derive(Debug, Clone, PartialEq, Serialize)]
struct SessionRequest {
    session: SessionBody,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct SessionBody {
    client_info: ClientInfo,
    content_auth: ContentAuth,
    content_id: String,
    content_src_id_sets: Vec<ContentSrcIdSet>,
    content_type: &'static str,
    content_uri: &'static str,
    keep_method: KeepMethod,
    priority: Option<f64>,
    protocol: ProtocolSpec,
    recipe_id: Option<String>,
    session_operation_auth: SessionOperationAuth,
    timing_constraint: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ClientInfo {
    player_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ContentAuth {
    auth_type: String,
    content_key_timeout: Option<u64>,
    service_id: &'static str,
    service_user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ContentSrcIdSet {
    content_src_ids: Vec<ContentSrcId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ContentSrcId {
    src_id_to_mux: SrcIdToMux,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct SrcIdToMux {
    audio_src_ids: Vec<String>,
    video_src_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct KeepMethod {
    heartbeat: HeartbeatLifetime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct HeartbeatLifetime {
    lifetime: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ProtocolSpec {
    name: &'static str,
    parameters: ProtocolParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ProtocolParameters {
    http_parameters: HttpParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct HttpParameters {
    parameters: TransportParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
enum TransportParameters {
    HlsParameters {
        encryption: EncryptionParameters,
        transfer_preset: &'static str,
        use_ssl: YesNo,
        use_well_known_port: YesNo,
        segment_duration: u64,
    },
    HttpOutputDownloadParameters {
        use_ssl: YesNo,
        use_well_known_port: YesNo,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct EncryptionParameters {
    hls_encryption_v1: HlsKeys,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct HlsKeys {
    encrypted_key: String,
    key_uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct SessionOperationAuth {
    session_operation_auth_by_signature: SignatureAuth,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct SignatureAuth {
    signature: String,
    token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum YesNo {
    Yes,
    No,
}

impl From<bool> for YesNo {
    fn from(value: bool) -> Self {
        if value { YesNo::Yes } else { YesNo::No }
    }
}

/// The creation response, with `data` kept as sent.
#[derive(Debug, Deserialize)]
struct SessionResponse {
    data: Option<Box<RawValue>>,
}

/// A validated session request, built before anything is sent.
#[derive(Debug, Clone, PartialEq)]
struct PreparedSession {
    endpoint_url: String,
    protocol: Protocol,
    heartbeat_lifetime: u64,
    request: SessionRequest,
}

fn prepare(endpoint: &SessionEndpoint, identity: &VideoIdentity) -> Result<PreparedSession> {
    let api: &SessionApi = require(&endpoint.session_api, "session_api")?;
    let url = api.urls.first().ok_or(Error::Precondition("session_api.urls"))?;
    let player_id = require(&api.player_id, "player_id")?;
    let content_id = require(&api.content_id, "content_id")?;
    let signature = require(&api.signature, "signature")?;
    let token = require(&api.token, "token")?;
    let first_protocol = api.protocols.first().ok_or(Error::Precondition("protocols"))?;
    let auth_type = api
        .auth_types
        .get(first_protocol)
        .ok_or(Error::Precondition("auth_types"))?;
    let heartbeat_lifetime = *require(&api.heartbeat_lifetime, "heartbeat_lifetime")?;
    if heartbeat_lifetime == 0 {
        return Err(Error::Precondition("heartbeat_lifetime"));
    }

    let use_ssl = YesNo::from(url.is_ssl);
    let use_well_known_port = YesNo::from(url.is_well_known_port);

    let (protocol, parameters) = match &endpoint.encryption {
        Some(encryption) => {
            let keys = require(&encryption.hls_encryption_v1, "hls_encryption_v1")?;
            let parameters = TransportParameters::HlsParameters {
                encryption: EncryptionParameters {
                    hls_encryption_v1: HlsKeys {
                        encrypted_key: require(&keys.encrypted_key, "encrypted_key")?.clone(),
                        key_uri: require(&keys.key_uri, "key_uri")?.clone(),
                    },
                },
                transfer_preset: "",
                use_ssl,
                use_well_known_port,
                segment_duration: SEGMENT_DURATION_MS,
            };
            (Protocol::HlsEncrypted, parameters)
        }
        None => (
            Protocol::Http,
            TransportParameters::HttpOutputDownloadParameters {
                use_ssl,
                use_well_known_port,
            },
        ),
    };

    let session = SessionBody {
        client_info: ClientInfo {
            player_id: player_id.clone(),
        },
        content_auth: ContentAuth {
            auth_type: auth_type.clone(),
            content_key_timeout: api.content_key_timeout,
            service_id: "nicovideo",
            service_user_id: api.service_user_id.clone(),
        },
        content_id: content_id.clone(),
        content_src_id_sets: vec![ContentSrcIdSet {
            content_src_ids: vec![ContentSrcId {
                src_id_to_mux: SrcIdToMux {
                    audio_src_ids: vec![identity.audio_source_id.clone()],
                    video_src_ids: vec![identity.video_source_id.clone()],
                },
            }],
        }],
        content_type: "movie",
        content_uri: "",
        keep_method: KeepMethod {
            heartbeat: HeartbeatLifetime {
                lifetime: heartbeat_lifetime,
            },
        },
        priority: api.priority,
        protocol: ProtocolSpec {
            name: "http",
            parameters: ProtocolParameters {
                http_parameters: HttpParameters { parameters },
            },
        },
        recipe_id: api.recipe_id.clone(),
        session_operation_auth: SessionOperationAuth {
            session_operation_auth_by_signature: SignatureAuth {
                signature: signature.clone(),
                token: token.clone(),
            },
        },
        timing_constraint: "unlimited",
    };

    Ok(PreparedSession {
        endpoint_url: url.url.clone(),
        protocol,
        heartbeat_lifetime,
        request: SessionRequest { session },
    })
}

/// Half the session lifetime, so one missed beat does not expire it.
pub fn heartbeat_interval(lifetime_ms: u64) -> Duration {
    Duration::from_secs_f64(lifetime_ms as f64 / 2000.0)
}

impl Niconico {
    async fn ping_tracking(&self, endpoint: &SessionEndpoint) {
        let Some(tracking_id) = endpoint.tracking_id.as_deref() else {
            #[cfg(feature = "tracing")]
            tracing::debug!("No tracking id, skipping the watch ping");
            return;
        };

        let request = HttpRequest::get(TRACKING_URL)
            .query("t", tracking_id)
            .headers(&stream_headers(&endpoint.video_id))
            .header("X-Frontend-Id", "6")
            .header("X-Frontend-Version", "0");

        match self.context.transport.send(request).await {
            Ok(response) if response.is_success() => {}
            #[allow(unused_variables)]
            Ok(response) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Failed to acknowledge the watch: HTTP {}", response.status);
            }
            #[allow(unused_variables)]
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Failed to acknowledge the watch: {}", e);
            }
        }
    }

    /// Opens a session for a DMC format using the given endpoint description.
    ///
    /// Preconditions are checked before anything is sent, so a malformed endpoint costs no
    /// network traffic.
    ///
    /// # Errors
    ///
    /// [`Error::Precondition`] for a missing endpoint field, [`Error::InvalidIdentity`] for
    /// a format that is not a DMC identity, and [`Error::SessionNegotiation`] when the
    /// server refuses or answers with something unusable.
    pub async fn negotiate_session(
        &self,
        format: &FormatRecord,
        endpoint: &SessionEndpoint,
    ) -> Result<NegotiatedFormat> {
        let identity = VideoIdentity::from_str(&format.url)?;
        let prepared = prepare(endpoint, &identity)?;

        self.ping_tracking(endpoint).await;

        #[cfg(feature = "tracing")]
        tracing::info!("Creating a DMC session for {}", format.format_id);

        let failed = |reason: String| Error::SessionNegotiation {
            format_id: format.format_id.clone(),
            reason,
        };

        let body = serde_json::to_string(&prepared.request)?;
        let request = HttpRequest::post(&prepared.endpoint_url, body)
            .query("_format", "json")
            .header("Content-Type", "application/json");

        let response = self
            .context
            .transport
            .send(request)
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !response.is_success() {
            return Err(failed(format!("HTTP {}", response.status)));
        }

        let raw = response
            .json::<SessionResponse>()
            .map_err(|e| failed(format!("unparsable response: {e}")))?
            .data
            .ok_or_else(|| failed("response has no data".to_string()))?;
        let data: serde_json::Value = serde_json::from_str(raw.get())
            .map_err(|e| failed(format!("unparsable response: {e}")))?;

        let session_id = data["session"]["id"]
            .as_str()
            .ok_or_else(|| failed("response has no session id".to_string()))?
            .to_string();
        let content_uri = data["session"]["content_uri"]
            .as_str()
            .ok_or_else(|| failed("response has no content uri".to_string()))?
            .to_string();

        let session = SessionDescriptor {
            session_id,
            content_uri: content_uri.clone(),
            protocol: prepared.protocol,
            heartbeat_interval: heartbeat_interval(prepared.heartbeat_lifetime),
            endpoint_url: prepared.endpoint_url,
            raw_session_payload: raw,
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Session {} opened, heartbeat every {:?}",
            session.session_id,
            session.heartbeat_interval
        );

        let mut negotiated = format.clone();
        negotiated.url = content_uri;
        negotiated.protocol = prepared.protocol;

        Ok(NegotiatedFormat {
            format: negotiated,
            session,
        })
    }

    /// Opens a session with a freshly fetched endpoint description.
    ///
    /// # Errors
    ///
    /// See [`Niconico::negotiate_session`]; fails with [`Error::Precondition`] when the
    /// watch page no longer advertises a session API.
    pub async fn negotiate(&self, format: &FormatRecord) -> Result<NegotiatedFormat> {
        let identity = VideoIdentity::from_str(&format.url)?;
        let page = self.fetch_watch_page(&identity.video_id).await?;
        page.ensure_success()?;

        let endpoint = page
            .api
            .session_endpoint(&page.video_id)
            .ok_or(Error::Precondition("session_api"))?;

        self.negotiate_session(format, &endpoint).await
    }

    /// Tries the formats in order until a session opens.
    ///
    /// Only failures local to one format move on to the next one.
    ///
    /// # Errors
    ///
    /// The last negotiation error, or [`Error::NoPlayableFormat`] for an empty list.
    pub async fn negotiate_any<'a>(
        &self,
        formats: impl IntoIterator<Item = &'a FormatRecord>,
        endpoint: &SessionEndpoint,
    ) -> Result<NegotiatedFormat> {
        let mut last_error = Error::NoPlayableFormat;

        for format in formats {
            match self.negotiate_session(format, endpoint).await {
                Ok(negotiated) => return Ok(negotiated),
                Err(e) if e.is_format_local() => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("{}, trying the next format", e);

                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }
}
