use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::WikiSettings;

/// Read access to the song wiki. Implemented over HTTP by [`MediaWikiClient`].
pub trait WikiApi {
    /// Rendered HTML of a page (`action=parse`, redirects followed).
    fn parse_page_html(&mut self, page: &str) -> Result<String>;
    fn category_members(&mut self, category: &str) -> Result<Vec<String>>;
    fn download(&mut self, url: &str) -> Result<Vec<u8>>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    parse: ParsedPage,
}

#[derive(Debug, Deserialize)]
struct ParsedPage {
    text: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    query: QueryBody,
    #[serde(rename = "continue")]
    continuation: Option<QueryContinue>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryBody {
    #[serde(default)]
    categorymembers: Vec<TitleItem>,
}

#[derive(Debug, Deserialize)]
struct TitleItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct QueryContinue {
    cmcontinue: Option<String>,
}

pub struct MediaWikiClient {
    client: Client,
    settings: WikiSettings,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl MediaWikiClient {
    pub fn new(settings: WikiSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            settings,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let base_url = Url::parse(&self.settings.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", self.settings.api_url))?;

        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }

        self.apply_rate_limit();
        let response = self
            .client
            .get(base_url)
            .header("User-Agent", self.settings.user_agent.clone())
            .header("Accept", "application/json")
            .query(&pairs)
            .send()
            .context("failed to call MediaWiki API")?;

        let status = response.status();
        if !status.is_success() {
            bail!("MediaWiki API request failed with HTTP {status}");
        }

        let payload: Value = response
            .json()
            .context("failed to decode MediaWiki API JSON response")?;
        if let Some(error) = payload.get("error") {
            let code = error
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            let info = error
                .get("info")
                .and_then(Value::as_str)
                .unwrap_or("unknown info");
            bail!("MediaWiki API error [{code}]: {info}");
        }
        Ok(payload)
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.settings.request_delay_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }
}

impl WikiApi for MediaWikiClient {
    fn parse_page_html(&mut self, page: &str) -> Result<String> {
        debug!(page, "fetching page via parse API");
        let response = self.request_json_get(&[
            ("action", "parse".to_string()),
            ("page", page.to_string()),
            ("prop", "text".to_string()),
            ("redirects", "1".to_string()),
        ])?;
        let parsed: ParseResponse = serde_json::from_value(response)
            .with_context(|| format!("failed to decode parse API response for {page}"))?;
        Ok(parsed.parse.text)
    }

    fn category_members(&mut self, category: &str) -> Result<Vec<String>> {
        let mut titles = Vec::new();
        let mut continue_token: Option<String> = None;
        let category_title = if category.starts_with("Category:") {
            category.to_string()
        } else {
            format!("Category:{category}")
        };

        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", "categorymembers".to_string()),
                ("cmtitle", category_title.clone()),
                ("cmtype", "page".to_string()),
                ("cmlimit", "500".to_string()),
            ];
            if let Some(token) = &continue_token {
                params.push(("cmcontinue", token.clone()));
            }

            let response = self.request_json_get(&params)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode categorymembers API response")?;
            for item in parsed.query.categorymembers {
                titles.push(item.title);
            }

            continue_token = parsed.continuation.and_then(|cont| cont.cmcontinue);
            if continue_token.is_none() {
                break;
            }
        }

        Ok(titles)
    }

    fn download(&mut self, url: &str) -> Result<Vec<u8>> {
        self.apply_rate_limit();
        let response = self
            .client
            .get(url)
            .header("User-Agent", self.settings.user_agent.clone())
            .send()
            .with_context(|| format!("failed to fetch {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {} while fetching {}", status.as_u16(), url);
        }
        let bytes = response
            .bytes()
            .with_context(|| format!("failed to read response body from {url}"))?;
        Ok(bytes.to_vec())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}
