use std::time::Duration;

use async_trait::async_trait;
use spider_client::shapes::request::{ReturnFormat, ReturnFormatHandling};
use spider_client::{RequestParams, Spider};

use crate::error::RenderError;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const MAX_REDIRECTS: usize = 10;

/// A source of rendering sessions. Each fetch worker opens its own.
pub trait RenderBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Acquire a session. Failing here stops the worker before its first url.
    fn open(&self) -> Result<Box<dyn RenderSession>, RenderError>;
}

/// Returns the final markup for a url, after redirects.
#[async_trait]
pub trait RenderSession: Send {
    async fn render(&mut self, url: &str) -> Result<String, RenderError>;
}

// ── spider.cloud ──

/// Renders through the spider.cloud API, which runs the page's scripts.
pub struct SpiderRenderer {
    api_key: Option<String>,
}

impl SpiderRenderer {
    pub fn new(api_key: Option<String>) -> Self {
        Self { api_key }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var("SPIDER_API_KEY").ok())
    }
}

impl RenderBackend for SpiderRenderer {
    fn name(&self) -> &'static str {
        "spider"
    }

    fn open(&self) -> Result<Box<dyn RenderSession>, RenderError> {
        let api_key = self.api_key.clone().ok_or_else(|| {
            RenderError::Unavailable("SPIDER_API_KEY environment variable must be set".into())
        })?;
        let spider = Spider::new(Some(api_key))
            .map_err(|e| RenderError::Unavailable(format!("failed to create Spider client: {}", e)))?;
        Ok(Box::new(SpiderSession { spider }))
    }
}

struct SpiderSession {
    spider: Spider,
}

#[async_trait]
impl RenderSession for SpiderSession {
    async fn render(&mut self, url: &str) -> Result<String, RenderError> {
        let params = RequestParams {
            return_format: Some(ReturnFormatHandling::Single(ReturnFormat::Raw)),
            ..Default::default()
        };
        let response = self
            .spider
            .scrape_url(url, Some(params), "application/json")
            .await
            .map_err(|e| RenderError::Navigation(e.to_string()))?;
        parse_spider_response(response)
    }
}

/// Pull the page body out of a spider response: a JSON array (sometimes
/// delivered as a string) whose first object has `content` and `status`.
fn parse_spider_response(value: serde_json::Value) -> Result<String, RenderError> {
    let parsed: serde_json::Value = match value.as_str() {
        Some(s) => serde_json::from_str(s).unwrap_or(value.clone()),
        None => value,
    };

    let first = parsed.as_array().and_then(|arr| arr.first());

    let status = first
        .and_then(|obj| obj.get("status"))
        .and_then(|s| s.as_u64());
    if let Some(code) = status {
        if !(200..300).contains(&code) {
            return Err(RenderError::Status(code as u16));
        }
    }

    if let Some(err) = first
        .and_then(|obj| obj.get("error"))
        .and_then(|e| e.as_str())
        .filter(|e| !e.is_empty())
    {
        return Err(RenderError::Navigation(err.to_string()));
    }

    first
        .and_then(|obj| obj.get("content"))
        .and_then(|c| c.as_str())
        .filter(|c| !c.trim().is_empty())
        .map(str::to_string)
        .ok_or(RenderError::Empty)
}

// ── Plain HTTP ──

/// Fetches raw markup over HTTP, following redirects. No script execution,
/// so client-rendered pages come back as their initial shell.
pub struct HttpRenderer {
    timeout: Duration,
}

impl HttpRenderer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl RenderBackend for HttpRenderer {
    fn name(&self) -> &'static str {
        "http"
    }

    fn open(&self) -> Result<Box<dyn RenderSession>, RenderError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(self.timeout)
            .build()
            .map_err(|e| RenderError::Unavailable(e.to_string()))?;
        Ok(Box::new(HttpSession { client }))
    }
}

struct HttpSession {
    client: reqwest::Client,
}

#[async_trait]
impl RenderSession for HttpSession {
    async fn render(&mut self, url: &str) -> Result<String, RenderError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RenderError::Navigation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenderError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| RenderError::Navigation(e.to_string()))?;
        if body.trim().is_empty() {
            return Err(RenderError::Empty);
        }
        Ok(body)
    }
}
