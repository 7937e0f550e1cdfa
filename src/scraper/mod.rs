//! 웹 스크래퍼 모듈 - 렌더링된 페이지에서 보이는 텍스트 추출
//!
//! 페이지 렌더링은 `PageRenderer` 뒤에 숨깁니다:
//! - `BrowserRenderer`: 헤드리스 브라우저 서비스 (Browserless 호환 `/content`, networkidle 대기)
//! - `HttpRenderer`: 일반 HTTP GET (JS 렌더링 없음)
//!
//! 렌더링된 HTML에서 script/style 등을 제외한 텍스트만 추출합니다.
//!
//! ref: https://docs.browserless.io/rest-apis/content

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::config::{HttpConfig, ScraperConfig};
use crate::error::{RagError, Result};

/// 텍스트 추출에서 제외할 태그
const HIDDEN_TAGS: [&str; 4] = ["script", "style", "noscript", "template"];

/// 스크랩된 콘텐츠
#[derive(Debug, Clone)]
pub struct ScrapedContent {
    /// 페이지 제목
    pub title: Option<String>,
    /// 본문 텍스트 (HTML 태그 제거됨)
    pub content: String,
    /// 원본 URL
    pub url: String,
}

// ============================================================================
// PageRenderer Trait
// ============================================================================

/// 페이지 렌더러 트레이트
///
/// URL로 이동해 렌더링된 HTML을 반환합니다.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<String>;

    fn name(&self) -> &str;
}

// ============================================================================
// BrowserRenderer
// ============================================================================

/// 헤드리스 브라우저 서비스 렌더러
pub struct BrowserRenderer {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ContentRequest<'a> {
    url: &'a str,
    #[serde(rename = "gotoOptions")]
    goto_options: GotoOptions,
}

#[derive(Debug, Serialize)]
struct GotoOptions {
    #[serde(rename = "waitUntil")]
    wait_until: &'static str,
    timeout: u64,
}

impl BrowserRenderer {
    pub fn new(endpoint: &str, token: Option<String>, http: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(http.timeout() + Duration::from_secs(5))
            .build()?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
            client,
            timeout: http.timeout(),
        })
    }
}

#[async_trait]
impl PageRenderer for BrowserRenderer {
    async fn render(&self, url: &str) -> Result<String> {
        let request = ContentRequest {
            url,
            goto_options: GotoOptions {
                wait_until: "networkidle0",
                timeout: self.timeout.as_millis() as u64,
            },
        };

        let mut builder = self
            .client
            .post(format!("{}/content", self.endpoint))
            .json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RagError::fetch(url, format!("browser request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RagError::fetch(url, format!("failed to read rendered page: {}", e)))?;

        if !status.is_success() {
            return Err(RagError::fetch(
                url,
                format!("browser service returned {}: {}", status, truncate(&body, 200)),
            ));
        }

        Ok(body)
    }

    fn name(&self) -> &str {
        "browser"
    }
}

// ============================================================================
// HttpRenderer
// ============================================================================

/// 일반 HTTP GET 렌더러
pub struct HttpRenderer {
    client: reqwest::Client,
}

impl HttpRenderer {
    pub fn new(user_agent: &str, http: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(http.timeout())
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    async fn render(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RagError::fetch(url, format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RagError::fetch(url, format!("HTTP status {}", status)));
        }

        response
            .text()
            .await
            .map_err(|e| RagError::fetch(url, format!("failed to read body: {}", e)))
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// 설정에 맞는 렌더러 생성 (브라우저 엔드포인트가 없으면 HTTP)
pub fn create_renderer(scraper: &ScraperConfig, http: &HttpConfig) -> Result<Arc<dyn PageRenderer>> {
    match &scraper.browser_endpoint {
        Some(endpoint) => {
            tracing::info!("Using headless browser renderer at {}", endpoint);
            Ok(Arc::new(BrowserRenderer::new(
                endpoint,
                scraper.browser_token.clone(),
                http,
            )?))
        }
        None => {
            tracing::info!("No browser endpoint configured, using plain HTTP renderer");
            Ok(Arc::new(HttpRenderer::new(&scraper.user_agent, http)?))
        }
    }
}

// ============================================================================
// WebScraper
// ============================================================================

/// 웹 스크래퍼 - 렌더링 + 텍스트 추출
pub struct WebScraper {
    renderer: Arc<dyn PageRenderer>,
}

impl WebScraper {
    pub fn new(renderer: Arc<dyn PageRenderer>) -> Self {
        Self { renderer }
    }

    pub fn renderer_name(&self) -> &str {
        self.renderer.name()
    }

    /// URL에서 콘텐츠 추출
    ///
    /// 보이는 텍스트가 없으면 실패로 취급합니다 (로그에 기록되지 않도록).
    pub async fn scrape(&self, url: &str) -> Result<ScrapedContent> {
        tracing::info!("Scraping: {}", url);

        let html = self.renderer.render(url).await?;
        let scraped = parse_page(url, &html);

        if scraped.content.is_empty() {
            return Err(RagError::fetch(url, "rendered page has no visible text"));
        }

        Ok(scraped)
    }
}

/// HTML 문서에서 제목과 본문 추출
pub fn parse_page(url: &str, html: &str) -> ScrapedContent {
    let document = Html::parse_document(html);

    ScrapedContent {
        title: extract_title(&document),
        content: extract_body_text(&document),
        url: url.to_string(),
    }
}

/// 제목 추출 (<title> → <h1>)
fn extract_title(document: &Html) -> Option<String> {
    for selector_str in ["title", "h1"] {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(element) = document.select(&selector).next() {
                let title = collapse_whitespace(&element.text().collect::<String>());
                if !title.is_empty() {
                    return Some(title);
                }
            }
        }
    }

    None
}

/// body의 보이는 텍스트 (body가 없으면 문서 전체)
fn extract_body_text(document: &Html) -> String {
    if let Ok(selector) = Selector::parse("body") {
        if let Some(body) = document.select(&selector).next() {
            return visible_text(&body);
        }
    }

    visible_text(&document.root_element())
}

/// 요소에서 텍스트 추출 (스크립트/스타일 제외)
fn visible_text(element: &ElementRef) -> String {
    let mut text = String::new();

    for node in element.descendants() {
        let Some(fragment) = node.value().as_text() else {
            continue;
        };

        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .map(|el| HIDDEN_TAGS.contains(&el.name()))
                .unwrap_or(false)
        });
        if hidden {
            continue;
        }

        let trimmed = fragment.trim();
        if !trimmed.is_empty() {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(trimmed);
        }
    }

    collapse_whitespace(&text)
}

/// 연속 공백 정리
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

// ============================================================================
// Tests
// ============================================================================
