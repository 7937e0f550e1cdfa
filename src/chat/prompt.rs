//! 프롬프트 - 근거 기반 답변 규칙, 질문 재작성, 컨텍스트 구성

use super::memory::ChatMemory;
use crate::knowledge::RetrievedChunk;

/// 근거가 없을 때의 고정 응답
pub const REFUSAL_MESSAGE: &str =
    "I'm sorry, I don't have information on that topic based on the provided documents.";

/// 생성 모델 시스템 지시
pub const SYSTEM_PROMPT: &str = "\
You are an AI assistant for Aligarh Muslim University (AMU).
You must answer ONLY using the retrieved context provided with each question.

RULES:
1. Answer ONLY from the retrieved context. Do not use prior knowledge or assumptions.
2. If the answer is NOT found in the retrieved context, respond with exactly:
\"I'm sorry, I don't have information on that topic based on the provided documents.\"
3. Do NOT answer from previous chat history. Past questions only clarify what the user means.
4. Keep answers factual, concise, and grounded in the retrieved context.";

/// 대화 이력 + 후속 질문 → 독립 질문 재작성 프롬프트
pub fn condense_prompt(memory: &ChatMemory, question: &str) -> String {
    format!(
        "Given the following conversation between a user and an assistant and a follow up \
         message from the user, rewrite the message to be a standalone question that captures \
         all relevant context from the conversation. Output only the question.\n\n\
         <Chat History>\n{}\n\n<Follow Up Message>\n{}\n\n<Standalone question>\n",
        memory.transcript(),
        question.trim()
    )
}

/// 검색 결과로 컨텍스트 구성 (순위 순, 인용 키 라벨, 문자 예산)
///
/// 첫 청크가 예산보다 크면 잘라서 넣고, 이후 예산을 넘는 청크는 넣지 않습니다.
pub fn build_context(chunks: &[RetrievedChunk], char_budget: usize) -> String {
    let mut context = String::new();
    let mut used = 0;

    for chunk in chunks {
        let block = format!("[Source: {}]\n{}\n\n", chunk.citation(), chunk.text.trim());
        let block_chars = block.chars().count();

        if used + block_chars > char_budget {
            if used == 0 {
                context.extend(block.chars().take(char_budget));
            }
            break;
        }

        context.push_str(&block);
        used += block_chars;
    }

    context.trim_end().to_string()
}

/// 컨텍스트 + 질문 프롬프트
pub fn qa_prompt(context: &str, question: &str) -> String {
    format!(
        "Context information is below.\n\
         ---------------------\n\
         {}\n\
         ---------------------\n\
         Using only the context information above, answer the question.\n\
         Question: {}\n\
         Answer:",
        context,
        question.trim()
    )
}
