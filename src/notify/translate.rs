//! Title translation as an injectable capability.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str) -> Result<String>;

    fn name(&self) -> &'static str;
}

/// Leaves text untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

#[async_trait]
impl Translator for Passthrough {
    async fn translate(&self, text: &str) -> Result<String> {
        Ok(text.to_string())
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}

/// Client for a LibreTranslate-compatible `/translate` endpoint.
pub struct LibreTranslate {
    http: reqwest::Client,
    url: String,
    target: String,
    api_key: Option<String>,
}

impl LibreTranslate {
    pub fn new(url: impl Into<String>, target: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(10))
            .build()
            .context("building translate http client")?;
        Ok(Self {
            http,
            url: url.into(),
            target: target.into(),
            api_key,
        })
    }
}

#[derive(Serialize)]
struct Req<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Deserialize)]
struct Resp {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

#[async_trait]
impl Translator for LibreTranslate {
    async fn translate(&self, text: &str) -> Result<String> {
        let req = Req {
            q: text,
            source: "auto",
            target: &self.target,
            format: "text",
            api_key: self.api_key.as_deref(),
        };
        let resp: Resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .context("translate request")?
            .error_for_status()
            .context("translate non-2xx")?
            .json()
            .await
            .context("translate response body")?;

        let out = resp.translated_text.trim().to_string();
        if out.is_empty() {
            anyhow::bail!("translator returned empty text");
        }
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "libretranslate"
    }
}
