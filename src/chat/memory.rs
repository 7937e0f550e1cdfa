//! 대화 메모리 - 토큰 예산 안에서 최근 대화 유지
//!
//! 완료된 (사용자, 어시스턴트) 쌍만 저장합니다.
//! 예산을 넘으면 가장 오래된 쌍부터 제거합니다.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 메시지 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// 대화 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn tokens(&self) -> usize {
        estimate_tokens(&self.content)
    }
}

/// 토큰 수 추정 (문자 4개 ≈ 1토큰)
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// 토큰 예산이 있는 대화 버퍼
#[derive(Debug, Clone)]
pub struct ChatMemory {
    messages: VecDeque<ChatMessage>,
    token_limit: usize,
}

impl ChatMemory {
    pub fn new(token_limit: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            token_limit,
        }
    }

    pub fn token_limit(&self) -> usize {
        self.token_limit
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn total_tokens(&self) -> usize {
        self.messages.iter().map(ChatMessage::tokens).sum()
    }

    /// 완료된 한 턴 추가 후 예산에 맞게 정리
    pub fn push_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.messages.push_back(ChatMessage::new(ChatRole::User, user));
        self.messages
            .push_back(ChatMessage::new(ChatRole::Assistant, assistant));
        self.evict();
    }

    /// 오래된 쌍부터 제거
    fn evict(&mut self) {
        let mut total = self.total_tokens();
        while total > self.token_limit && !self.messages.is_empty() {
            for _ in 0..2 {
                if let Some(removed) = self.messages.pop_front() {
                    total -= removed.tokens();
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// 질문 재작성 프롬프트용 텍스트
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for ChatMemory {
    fn default() -> Self {
        Self::new(5000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_eviction_keeps_newest_pairs() {
        // 쌍 하나 = 10 + 10 토큰
        let mut memory = ChatMemory::new(45);
        let text = "x".repeat(40);

        memory.push_exchange(format!("q1 {}", &text[3..]), text.clone());
        memory.push_exchange(format!("q2 {}", &text[3..]), text.clone());
        assert_eq!(memory.len(), 4);

        memory.push_exchange(format!("q3 {}", &text[3..]), text.clone());
        assert_eq!(memory.len(), 4);
        assert!(memory.total_tokens() <= 45);

        let first = memory.messages().next().unwrap();
        assert_eq!(first.role, ChatRole::User);
        assert!(first.content.starts_with("q2"));
    }

    #[test]
    fn test_oversized_exchange_is_dropped() {
        let mut memory = ChatMemory::new(5);
        memory.push_exchange("a fairly long question here", "and an even longer answer here");
        assert!(memory.is_empty());
    }

    #[test]
    fn test_transcript_format() {
        let mut memory = ChatMemory::default();
        memory.push_exchange("When was AMU founded?", "In 1875.");
        assert_eq!(memory.transcript(), "user: When was AMU founded?\nassistant: In 1875.");

        memory.clear();
        assert!(memory.is_empty());
    }
}
