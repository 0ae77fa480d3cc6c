//! Fakes for the network and the media prober.

use crate::Niconico;
use crate::error::{Error, Result};
use crate::fetcher::legacy::{MediaProber, ProbeOutput};
use crate::fetcher::{CookieStore, ExtractorContext, HttpRequest, HttpResponse, Method, Transport};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct Route {
    method: Method,
    url_prefix: String,
    response: Option<HttpResponse>,
}

/// Answers requests from canned routes and remembers what was sent.
///
/// Routes are matched by method and URL prefix, the most recently added match wins.
/// Unmatched requests get a 404.
#[derive(Debug, Default)]
pub struct FakeTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, method: Method, url_prefix: &str, status: u16, body: &str) -> Self {
        self.push(Route {
            method,
            url_prefix: url_prefix.to_string(),
            response: Some(HttpResponse {
                status,
                final_url: url_prefix.to_string(),
                body: body.to_string(),
            }),
        })
    }

    /// Like [`FakeTransport::respond`] with a redirect target as final URL.
    pub fn redirect(self, url_prefix: &str, final_url: &str, body: &str) -> Self {
        self.push(Route {
            method: Method::Get,
            url_prefix: url_prefix.to_string(),
            response: Some(HttpResponse {
                status: 200,
                final_url: final_url.to_string(),
                body: body.to_string(),
            }),
        })
    }

    /// Makes matching requests fail without a response.
    pub fn fail(self, method: Method, url_prefix: &str) -> Self {
        self.push(Route {
            method,
            url_prefix: url_prefix.to_string(),
            response: None,
        })
    }

    fn push(self, route: Route) -> Self {
        self.routes.lock().unwrap().push(route);
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, url_prefix: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.starts_with(url_prefix))
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request.clone());

        let route = self
            .routes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.method == request.method && request.url.starts_with(&r.url_prefix))
            .cloned();

        match route {
            Some(Route {
                response: Some(response),
                ..
            }) => Ok(response),
            Some(Route { response: None, .. }) => Err(Error::IO(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
            None => Ok(HttpResponse {
                status: 404,
                final_url: request.url,
                body: String::new(),
            }),
        }
    }
}

/// Returns a canned probe result and remembers the arguments.
#[derive(Debug, Default)]
pub struct FakeProber {
    output: Option<ProbeOutput>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeProber {
    pub fn returning(output: ProbeOutput) -> Self {
        Self {
            output: Some(output),
            calls: Mutex::default(),
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaProber for FakeProber {
    async fn probe(&self, url: &str, cookies: &str) -> Result<ProbeOutput> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), cookies.to_string()));

        self.output
            .clone()
            .ok_or_else(|| Error::Command("ffprobe: Invalid data found when processing input".into()))
    }
}

/// A client wired to the given fakes.
pub fn niconico(transport: &Arc<FakeTransport>, prober: &Arc<FakeProber>) -> Niconico {
    let context = ExtractorContext::new(
        transport.clone(),
        prober.clone(),
        Arc::new(CookieStore::new()),
    );
    Niconico::new(context)
}

/// Builds a watch page embedding the given API blob.
pub fn watch_page(api_json: &str) -> String {
    format!(
        r#"<html><head><meta property="og:title" content="og title"></head>
<body><div id="js-initial-watch-data" data-api-data="{}" data-environment="{{}}"></div></body></html>"#,
        html_escape::encode_double_quoted_attribute(api_json)
    )
}

/// A thumb info document for a healthy video.
pub fn thumb_info_ok(size_high: u64, size_low: u64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<nicovideo_thumb_response status="ok">
  <thumb>
    <video_id>sm9</video_id>
    <title>新・豪血寺一族 -煩悩解放 - レッツゴー！陰陽師</title>
    <description>レッツゴー！陰陽師（フルコーラスバージョン）</description>
    <thumbnail_url>https://nicovideo.cdn.nimg.jp/thumbnails/9/9</thumbnail_url>
    <first_retrieve>2007-03-06T00:33:00+09:00</first_retrieve>
    <length>5:19</length>
    <movie_type>flv</movie_type>
    <size_high>{size_high}</size_high>
    <size_low>{size_low}</size_low>
    <view_counter>20000000</view_counter>
    <comment_num>5000000</comment_num>
    <watch_url>https://www.nicovideo.jp/watch/sm9</watch_url>
    <tags domain="jp">
      <tag lock="1">陰陽師</tag>
      <tag>レッツゴー！陰陽師</tag>
    </tags>
    <user_id>4</user_id>
    <user_nickname>中の&amp;人</user_nickname>
  </thumb>
</nicovideo_thumb_response>"#
    )
}

/// A thumb info document reporting an error code.
pub fn thumb_info_error(code: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<nicovideo_thumb_response status="fail">
  <error>
    <code>{code}</code>
    <description>error</description>
  </error>
</nicovideo_thumb_response>"#
    )
}

/// A session API block with every required field.
pub fn session_api_json(heartbeat_lifetime: &str) -> String {
    format!(
        r#"{{
            "recipe_id": "nicovideo-sm9",
            "player_id": "nicovideo-6-abc_1600000000000",
            "service_user_id": "12345",
            "auth_types": {{"http": "ht2", "hls": "ht2"}},
            "content_key_timeout": 600000,
            "content_id": "out1",
            "heartbeat_lifetime": {heartbeat_lifetime},
            "priority": 0.8,
            "protocols": ["http", "hls"],
            "signature": "sig",
            "token": "{{\"service_id\":\"nicovideo\"}}",
            "urls": [{{"url": "https://api.dmc.nico/api/sessions", "is_well_known_port": true, "is_ssl": true}}]
        }}"#
    )
}

macro_rules! session_data {
    () => {
        r#"{"session": {
        "id": "session-1",
        "content_uri": "https://pa0000.dmc.nico/vod/ht2_nicovideo/nicovideo-sm9_abc?ht2_nicovideo=6-xyz",
        "keep_method": {"heartbeat": {"lifetime": 120000}}
    }}"#
    };
}

/// The `data` object of [`SESSION_RESPONSE`], byte for byte.
pub const SESSION_DATA: &str = session_data!();

/// The creation response of the session API.
pub const SESSION_RESPONSE: &str = concat!(
    "{\n    \"meta\": {\"status\": 201, \"message\": \"created\"},\n    \"data\": ",
    session_data!(),
    "\n}"
);
