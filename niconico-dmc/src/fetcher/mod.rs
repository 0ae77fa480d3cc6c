//! Tools for talking to niconico.
//!
//! This module is subdivided into several modules, one per step of resolving a video:
//! the watch page and thumb info, the DMC formats, session negotiation, heartbeats and
//! the legacy probe. They all reach the network through the [`Transport`] seam so they
//! can run against a fake in tests.

use crate::error::{Error, Result};
use crate::fetcher::legacy::MediaProber;
use async_trait::async_trait;
use reqwest::cookie::{CookieStore as _, Jar};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod formats;
pub mod heartbeat;
pub mod legacy;
pub mod metadata;
pub mod session;

/// The site the cookies and headers are scoped to.
pub const COOKIE_DOMAIN: &str = "nicovideo.jp";
/// Used as `Origin` and as the base of `Referer`.
pub const SITE_ORIGIN: &str = "https://www.nicovideo.jp";

/// The default user agent, the watch page serves the API blob to browsers only.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// HTTP method of a [`HttpRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A request as the extraction steps describe it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

/// What came back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// The URL after redirects.
    pub final_url: String,
    pub body: String,
}

impl HttpRequest {
    /// A GET request without query or headers.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// A POST request with the given body.
    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            body: Some(body.into()),
            ..Self::get(url)
        }
    }

    /// Appends a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Sets a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets several headers.
    pub fn headers<'a>(mut self, headers: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (name, value) in headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }
}

impl HttpResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fails with [`Error::Http`] unless the status is 2xx.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::Http {
                status: self.status,
                url: self.final_url,
            })
        }
    }

    /// Parses the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Sends HTTP requests on behalf of the extractor.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Sends the request. Non-2xx statuses are returned, not turned into errors.
    ///
    /// # Errors
    ///
    /// Fails only when no response could be obtained.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// The cookie jar shared by the HTTP client and ffprobe.
///
/// Responses update it through [`reqwest::ClientBuilder::cookie_provider`], and the jar
/// drops expired cookies.
#[derive(Debug, Default)]
pub struct CookieStore {
    jar: Arc<Jar>,
}

impl CookieStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The jar to hand to the HTTP client.
    pub fn jar(&self) -> Arc<Jar> {
        self.jar.clone()
    }

    /// Sets a cookie for a domain and its subdomains, replacing one with the same name.
    pub fn insert(&self, domain: &str, name: &str, value: &str) {
        let domain = domain.trim_start_matches('.');
        if let Some(url) = site_url(domain) {
            self.jar
                .add_cookie_str(&format!("{name}={value}; Domain={domain}; Path=/"), &url);
        }
    }

    /// The cookies the jar would send to `url`, in name order.
    pub fn for_url(&self, url: &str) -> Vec<(String, String)> {
        let Ok(url) = reqwest::Url::parse(url) else {
            return Vec::new();
        };
        let Some(header) = self.jar.cookies(&url) else {
            return Vec::new();
        };

        let mut cookies: Vec<_> = header
            .to_str()
            .unwrap_or_default()
            .split("; ")
            .filter_map(|pair| pair.split_once('='))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        cookies.sort();
        cookies
    }

    /// The cookies of a domain in the Set-Cookie-like form ffprobe's `-cookies` expects.
    pub fn ffprobe_lines(&self, domain: &str) -> String {
        site_url(domain)
            .map(|url| self.for_url(url.as_str()))
            .unwrap_or_default()
            .iter()
            .map(|(name, value)| format!("{name}={value}; path=/; domain={domain};\n"))
            .collect()
    }
}

fn site_url(domain: &str) -> Option<reqwest::Url> {
    reqwest::Url::parse(&format!("https://{domain}/")).ok()
}

/// Everything the extraction steps need from the outside world.
#[derive(Clone, Debug)]
pub struct ExtractorContext {
    /// The HTTP client.
    pub transport: Arc<dyn Transport>,
    /// The media inspection tool.
    pub prober: Arc<dyn MediaProber>,
    /// The cookies shared by the transport and the prober.
    pub cookies: Arc<CookieStore>,
}

impl ExtractorContext {
    /// Bundles the collaborators.
    pub fn new(
        transport: Arc<dyn Transport>,
        prober: Arc<dyn MediaProber>,
        cookies: Arc<CookieStore>,
    ) -> Self {
        Self {
            transport,
            prober,
            cookies,
        }
    }
}

/// The production transport on top of `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds a client with the given user agent and request timeout, keeping its cookies
    /// in `cookies`.
    ///
    /// # Errors
    ///
    /// Fails if the user agent is not a valid header value or the TLS backend cannot start.
    pub fn new(
        user_agent: Option<&str>,
        timeout: Duration,
        cookies: Arc<CookieStore>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let agent = HeaderValue::from_str(user_agent.unwrap_or(DEFAULT_USER_AGENT))
            .map_err(|e| Error::InvalidHeader(format!("user agent: {e}")))?;
        headers.insert(USER_AGENT, agent);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .cookie_provider(cookies.jar())
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        #[cfg(feature = "tracing")]
        tracing::debug!("{:?} {}", request.method, request.url);

        let builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::InvalidHeader(format!("{name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::InvalidHeader(format!("value of {name}: {e}")))?;
            headers.insert(name, value);
        }

        let mut builder = builder.headers(headers).query(&request.query);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await?;

        Ok(HttpResponse {
            status,
            final_url,
            body,
        })
    }
}
