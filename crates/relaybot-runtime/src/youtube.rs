// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scrape-based YouTube search helper backing `/youtube`.
//!
//! No API key: the YouTube results page is fetched and scanned for the
//! first `videoId`, with a DuckDuckGo HTML search as fallback. Title and
//! channel come from the public oEmbed endpoint, best effort.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

fn video_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""videoId":"([A-Za-z0-9_-]{11})""#).expect("static regex"))
}

fn watch_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"https?://(?:www\.)?youtube\.com/watch\?v=([A-Za-z0-9_-]{11})")
            .expect("static regex")
    })
}

fn short_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://youtu\.be/([A-Za-z0-9_-]{11})").expect("static regex"))
}

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct YoutubeSearchResult {
    pub video_id: String,
    pub url: String,
    pub title: Option<String>,
    pub author_name: Option<String>,
}

#[derive(Clone)]
pub struct YoutubeSearchService {
    http: reqwest::Client,
}

impl Default for YoutubeSearchService {
    fn default() -> Self {
        Self::new()
    }
}

impl YoutubeSearchService {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { http }
    }

    /// Top search hit for the query, or `None`.
    pub async fn search_first_video(&self, query: &str) -> Option<YoutubeSearchResult> {
        let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            return None;
        }

        let video_id = self.resolve_video_id(&normalized).await?;
        let url = format!("https://www.youtube.com/watch?v={video_id}");
        let (title, author_name) = self.fetch_oembed(&url).await;
        Some(YoutubeSearchResult {
            video_id,
            url,
            title,
            author_name,
        })
    }

    async fn resolve_video_id(&self, query: &str) -> Option<String> {
        if let Some(id) = self.search_from_youtube_results(query).await {
            return Some(id);
        }
        self.search_from_duckduckgo(query).await
    }

    async fn search_from_youtube_results(&self, query: &str) -> Option<String> {
        let url = format!(
            "https://www.youtube.com/results?search_query={}",
            urlencode(query)
        );
        let body = self.fetch_text(&url).await?;
        video_id_re()
            .captures(&body)
            .map(|captures| captures[1].to_string())
    }

    async fn search_from_duckduckgo(&self, query: &str) -> Option<String> {
        let url = format!(
            "https://duckduckgo.com/html/?q={}",
            urlencode(&format!("site:youtube.com/watch {query}"))
        );
        let body = self.fetch_text(&url).await?;
        watch_url_re()
            .captures(&body)
            .or_else(|| short_url_re().captures(&body))
            .map(|captures| captures[1].to_string())
    }

    async fn fetch_oembed(&self, watch_url: &str) -> (Option<String>, Option<String>) {
        let endpoint = format!(
            "https://www.youtube.com/oembed?url={}&format=json",
            urlencode(watch_url)
        );
        let Some(body) = self.fetch_text(&endpoint).await else {
            return (None, None);
        };
        let Ok(parsed) = serde_json::from_str::<Value>(&body) else {
            return (None, None);
        };
        let field = |name: &str| {
            parsed
                .get(name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        (field("title"), field("author_name"))
    }

    async fn fetch_text(&self, url: &str) -> Option<String> {
        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(url, error = %err, "youtube fetch failed");
                return None;
            }
        };
        if !response.status().is_success() {
            debug!(url, status = %response.status(), "youtube fetch non-success");
            return None;
        }
        response.text().await.ok()
    }
}

fn urlencode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            b' ' => encoded.push('+'),
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}
