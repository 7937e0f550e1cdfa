//! 대화 엔진 - 질문 재작성 → 검색 → 근거 기반 생성 → 스트리밍
//!
//! 엔진(`ChatEngine`)은 불변이며 `Arc`로 세션 간에 공유합니다.
//! 메모리는 세션(`ChatSession`)이 소유합니다.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use uuid::Uuid;

use super::memory::ChatMemory;
use super::prompt::{build_context, condense_prompt, qa_prompt, REFUSAL_MESSAGE, SYSTEM_PROMPT};
use crate::config::ChatConfig;
use crate::error::Result;
use crate::generation::GenerationProvider;
use crate::knowledge::{RetrievedChunk, Retriever};

// ============================================================================
// State / Response
// ============================================================================

/// 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatState {
    Idle,
    Condensing,
    Retrieving,
    Generating,
    Streaming,
    Done,
    Failed,
}

impl fmt::Display for ChatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Condensing => "CONDENSING",
            Self::Retrieving => "RETRIEVING",
            Self::Generating => "GENERATING",
            Self::Streaming => "STREAMING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// 한 턴의 결과
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub answer: String,
    /// 중복 제거된 인용 키 (순위 순, 최대 3개)
    pub citations: Vec<String>,
    /// 이번 턴에 검색된 청크
    pub sources: Vec<RetrievedChunk>,
    /// 검색에 사용된 독립 질문
    pub standalone_query: String,
}

impl ChatResponse {
    /// 고정 거절 응답인지
    pub fn is_refusal(&self) -> bool {
        is_refusal(&self.answer)
    }
}

pub fn is_refusal(answer: &str) -> bool {
    answer.trim() == REFUSAL_MESSAGE
}

/// 인용 키 수집 (순위 순, 중복 제거, 최대 `limit`개)
pub fn collect_citations(chunks: &[RetrievedChunk], limit: usize) -> Vec<String> {
    let mut citations: Vec<String> = Vec::new();
    for chunk in chunks {
        if citations.len() >= limit {
            break;
        }
        let citation = chunk.citation();
        if !citations.iter().any(|c| c == citation) {
            citations.push(citation.to_string());
        }
    }
    citations
}

// ============================================================================
// ChatEngine
// ============================================================================

/// 대화 엔진
pub struct ChatEngine {
    retriever: Retriever,
    generator: Arc<dyn GenerationProvider>,
    config: ChatConfig,
}

impl ChatEngine {
    pub fn new(retriever: Retriever, generator: Arc<dyn GenerationProvider>, config: ChatConfig) -> Self {
        Self {
            retriever,
            generator,
            config,
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// 새 세션 (빈 메모리)
    pub fn new_session(self: &Arc<Self>) -> ChatSession {
        ChatSession::new(self.clone())
    }

    /// 메모리 없이 한 번 질의
    pub async fn ask<F>(self: &Arc<Self>, question: &str, sink: F) -> Result<ChatResponse>
    where
        F: FnMut(&str),
    {
        self.new_session().chat(question, sink).await
    }

    /// 대화 이력으로 독립 질문 생성 (메모리가 비었으면 그대로)
    async fn condense(&self, memory: &ChatMemory, question: &str) -> Result<String> {
        if memory.is_empty() {
            return Ok(question.trim().to_string());
        }

        let condensed = self
            .generator
            .generate(&condense_prompt(memory, question), None)
            .await?;
        let condensed = condensed.trim();

        if condensed.is_empty() {
            tracing::warn!("Condensed question was empty, using the original message");
            return Ok(question.trim().to_string());
        }
        Ok(condensed.to_string())
    }
}

// ============================================================================
// ChatSession
// ============================================================================

/// 대화 세션 - 메모리 소유, 턴마다 상태 전이
pub struct ChatSession {
    id: Uuid,
    engine: Arc<ChatEngine>,
    memory: ChatMemory,
    state: ChatState,
}

impl ChatSession {
    pub fn new(engine: Arc<ChatEngine>) -> Self {
        let memory = ChatMemory::new(engine.config.memory_token_limit);
        Self {
            id: Uuid::new_v4(),
            engine,
            memory,
            state: ChatState::Idle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ChatState {
        self.state
    }

    pub fn memory(&self) -> &ChatMemory {
        &self.memory
    }

    /// 메모리 초기화
    pub fn reset(&mut self) {
        self.memory.clear();
        self.state = ChatState::Idle;
        tracing::info!(session = %self.id, "Conversation memory cleared");
    }

    fn transition(&mut self, next: ChatState) {
        tracing::debug!(session = %self.id, "{} -> {}", self.state, next);
        self.state = next;
    }

    /// 한 턴 처리
    ///
    /// 생성 중 조각은 `sink`로 바로 전달됩니다.
    /// 실패하면 상태는 FAILED, 메모리는 변경되지 않습니다.
    pub async fn chat<F>(&mut self, message: &str, sink: F) -> Result<ChatResponse>
    where
        F: FnMut(&str),
    {
        match self.run_turn(message, sink).await {
            Ok(response) => {
                self.memory.push_exchange(message.trim(), response.answer.clone());
                self.transition(ChatState::Done);
                Ok(response)
            }
            Err(e) => {
                tracing::error!(session = %self.id, "Chat turn failed: {}", e);
                self.transition(ChatState::Failed);
                Err(e)
            }
        }
    }

    async fn run_turn<F>(&mut self, message: &str, mut sink: F) -> Result<ChatResponse>
    where
        F: FnMut(&str),
    {
        let engine = self.engine.clone();

        self.transition(ChatState::Condensing);
        let standalone_query = engine.condense(&self.memory, message).await?;
        tracing::info!(session = %self.id, "Standalone query: {}", standalone_query);

        self.transition(ChatState::Retrieving);
        let sources = engine.retriever.retrieve(&standalone_query).await?;
        tracing::info!(session = %self.id, "Retrieved {} chunks", sources.len());

        // 검색 결과가 없으면 생성 없이 거절
        if sources.is_empty() {
            self.transition(ChatState::Streaming);
            sink(REFUSAL_MESSAGE);
            return Ok(ChatResponse {
                answer: REFUSAL_MESSAGE.to_string(),
                citations: vec![],
                sources,
                standalone_query,
            });
        }

        self.transition(ChatState::Generating);
        let context = build_context(&sources, engine.config.context_char_budget);
        let prompt = qa_prompt(&context, &standalone_query);
        let mut stream = engine
            .generator
            .generate_stream(&prompt, Some(SYSTEM_PROMPT))
            .await?;

        self.transition(ChatState::Streaming);
        let mut answer = String::new();
        while let Some(piece) = stream.next().await {
            let piece = piece?;
            answer.push_str(&piece);
            sink(&piece);
        }

        // 빈 답변은 근거 없는 답변과 같게 처리
        if answer.trim().is_empty() {
            tracing::warn!(session = %self.id, "Model returned an empty answer, refusing");
            sink(REFUSAL_MESSAGE);
            answer = REFUSAL_MESSAGE.to_string();
        }

        let citations = if is_refusal(&answer) {
            vec![]
        } else {
            collect_citations(&sources, engine.config.max_citations)
        };

        Ok(ChatResponse {
            answer,
            citations,
            sources,
            standalone_query,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
