//! 생성 모듈 - Gemini generateContent / streamGenerateContent
//!
//! 스트리밍은 SSE(`alt=sse`)를 사용합니다. 바이트 청크가 줄 중간에서 끊길 수 있으므로
//! 줄 버퍼로 `data:` 라인을 재조립합니다.
//!
//! 스트림을 중간에 drop하면 소비만 멈추고, 서버 쪽 생성은 취소하지 않습니다.
//!
//! 타임아웃: 연결은 `connect_timeout`, 일반 생성은 요청 단위 타임아웃,
//! 스트리밍은 응답 헤더까지 + 조각 사이 대기 시간에만 적용합니다 (전체 길이 제한 없음).

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::{HttpConfig, ModelConfig};
use crate::embedding::GeminiError;
use crate::error::{RagError, Result};

/// 생성 텍스트 조각 스트림
pub type TextStream = BoxStream<'static, Result<String>>;

// ============================================================================
// GenerationProvider Trait
// ============================================================================

/// 생성 모델 트레이트
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// 전체 응답 생성
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String>;

    /// 응답을 조각 단위로 스트리밍
    async fn generate_stream(&self, prompt: &str, system: Option<&str>) -> Result<TextStream>;

    fn model_id(&self) -> &str;
}

// ============================================================================
// Gemini
// ============================================================================

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini 생성 모델 클라이언트
pub struct GeminiGeneration {
    api_key: String,
    model: String,
    temperature: f32,
    timeout: Duration,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    /// 첫 후보의 텍스트 파트 연결
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

impl GeminiGeneration {
    pub fn new(api_key: String, model: &str, temperature: f32, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().connect_timeout(timeout).build()?;
        Ok(Self {
            api_key,
            model: model.trim_start_matches("models/").to_string(),
            temperature,
            timeout,
            client,
        })
    }

    pub fn from_config(models: &ModelConfig, http: &HttpConfig) -> Result<Self> {
        let api_key = models
            .api_key
            .clone()
            .ok_or_else(|| RagError::configuration("GOOGLE_API_KEY (or GEMINI_API_KEY) not set"))?;

        tracing::info!("Using Gemini generation model {}", models.generation_model);
        Self::new(api_key, &models.generation_model, models.temperature, http.timeout())
    }

    fn request<'a>(&self, prompt: &'a str, system: Option<&'a str>) -> GenerateRequest<'a> {
        GenerateRequest {
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: prompt }],
            }],
            system_instruction: system.map(|text| Content {
                role: None,
                parts: vec![Part { text }],
            }),
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        }
    }

    fn post(&self, url: String, body: &GenerateRequest<'_>) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| RagError::generation(format!("Gemini request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, &body));
        }

        Ok(response)
    }
}

fn api_error(status: reqwest::StatusCode, body: &str) -> RagError {
    match serde_json::from_str::<GeminiError>(body) {
        Ok(error) => RagError::generation(format!(
            "Gemini API error ({}): {}",
            error.error.status, error.error.message
        )),
        Err(_) => RagError::generation(format!("Gemini API error ({}): {}", status, body)),
    }
}

#[async_trait]
impl GenerationProvider for GeminiGeneration {
    async fn generate(&self, prompt: &str, system: Option<&str>) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", GEMINI_API_BASE, self.model);
        let request = self
            .post(url, &self.request(prompt, system))
            .timeout(self.timeout);
        let response = self.send(request).await?;

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| RagError::generation(format!("Failed to parse Gemini response: {}", e)))?;

        Ok(parsed.text())
    }

    async fn generate_stream(&self, prompt: &str, system: Option<&str>) -> Result<TextStream> {
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            GEMINI_API_BASE, self.model
        );
        let request = self.post(url, &self.request(prompt, system));
        let response = tokio::time::timeout(self.timeout, self.send(request))
            .await
            .map_err(|_| {
                RagError::generation(format!("Gemini stream did not start within {:?}", self.timeout))
            })??;

        let (tx, rx) = mpsc::channel::<Result<String>>(32);
        tokio::spawn(pump_sse(response.bytes_stream(), tx, self.timeout));

        Ok(receiver_stream(rx))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// SSE 바이트 스트림을 텍스트 조각으로 변환해 채널로 전달
///
/// 조각 사이가 `idle`보다 길어지면 에러를 보내고 종료합니다.
async fn pump_sse<S, B, E>(bytes: S, tx: mpsc::Sender<Result<String>>, idle: Duration)
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    futures::pin_mut!(bytes);
    let mut buffer = SseLineBuffer::default();

    loop {
        let item = match tokio::time::timeout(idle, bytes.next()).await {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(_) => {
                let _ = tx
                    .send(Err(RagError::generation(format!(
                        "Stream stalled: no data for {:?}",
                        idle
                    ))))
                    .await;
                return;
            }
        };

        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx
                    .send(Err(RagError::generation(format!("Stream error: {}", e))))
                    .await;
                return;
            }
        };

        for data in buffer.push(chunk.as_ref()) {
            match parse_sse_data(&data) {
                Ok(Some(text)) => {
                    if tx.send(Ok(text)).await.is_err() {
                        // 수신 측이 스트림을 drop함
                        return;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }
    }

    if let Some(data) = buffer.finish() {
        if let Ok(Some(text)) = parse_sse_data(&data) {
            let _ = tx.send(Ok(text)).await;
        }
    }
}

/// mpsc 수신기를 스트림으로 변환
pub(crate) fn receiver_stream(rx: mpsc::Receiver<Result<String>>) -> TextStream {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}

// ============================================================================
// SSE framing
// ============================================================================

/// SSE 줄 버퍼 - 완성된 `data:` 페이로드만 반환
#[derive(Debug, Default)]
struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(data) = data_payload(&line) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// 줄바꿈 없이 끝난 마지막 줄
    fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.pending);
        data_payload(&line)
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(data.to_string())
}

/// SSE 이벤트 JSON에서 텍스트 조각 추출
fn parse_sse_data(data: &str) -> Result<Option<String>> {
    if let Ok(error) = serde_json::from_str::<GeminiError>(data) {
        return Err(RagError::generation(format!(
            "Gemini stream error ({}): {}",
            error.error.status, error.error.message
        )));
    }

    let response: GenerateResponse = serde_json::from_str(data)
        .map_err(|e| RagError::generation(format!("Invalid stream event: {}", e)))?;
    let text = response.text();

    Ok((!text.is_empty()).then_some(text))
}

// ============================================================================
// Tests
// ============================================================================
