//! 本地 OpenAI 兼容端点客户端
//!
//! 通过 async_openai 调用本地模型服务（Ollama /v1、llama.cpp server、vLLM 等）；
//! base_url 可配置，默认 localhost。请求超时在这里强制执行，循环侧把超时
//! 当作一次畸形响应处理而不是重试传输。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, Role};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// 本地端点客户端：持有 Client 与 model 名，complete 时转 Message 为 API 格式并取首条 content
pub struct LocalClient {
    client: Client<OpenAIConfig>,
    model: String,
    request_timeout_secs: u64,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl LocalClient {
    pub fn new(base_url: &str, model: &str, request_timeout_secs: u64) -> Self {
        // 本地端点通常不校验 key，但 API 格式要求携带一个
        let api_key = std::env::var("WASP_API_KEY").unwrap_or_else(|_| "not-needed".to_string());
        let config = OpenAIConfig::new()
            .with_api_base(base_url)
            .with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            request_timeout_secs,
            usage: TokenUsage::new(),
        }
    }

    fn to_openai_messages(&self, messages: &[Message]) -> Vec<ChatCompletionRequestMessage> {
        messages
            .iter()
            .filter_map(|m| match m.role {
                Role::System => ChatCompletionRequestSystemMessageArgs::default()
                    .content(m.content.clone())
                    .build()
                    .ok()
                    .map(ChatCompletionRequestMessage::System),
                Role::User => ChatCompletionRequestUserMessageArgs::default()
                    .content(m.content.clone())
                    .build()
                    .ok()
                    .map(ChatCompletionRequestMessage::User),
                Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                    .content(m.content.clone())
                    .build()
                    .ok()
                    .map(ChatCompletionRequestMessage::Assistant),
            })
            .collect()
    }
}

/// 从错误信息中提取 4xx/5xx 状态码；async_openai 的错误串里通常带有
fn extract_status(msg: &str) -> Option<u16> {
    let bytes = msg.as_bytes();
    for i in 0..bytes.len().saturating_sub(2) {
        let window = &bytes[i..i + 3];
        if window.iter().all(u8::is_ascii_digit)
            && (window[0] == b'4' || window[0] == b'5')
            && bytes.get(i + 3).map_or(true, |b| !b.is_ascii_digit())
            && (i == 0 || !bytes[i - 1].is_ascii_digit())
        {
            let code = (window[0] - b'0') as u16 * 100
                + (window[1] - b'0') as u16 * 10
                + (window[2] - b'0') as u16;
            return Some(code);
        }
    }
    None
}

/// 传输错误归类：带状态码的算 Http，连接类字样算 Unreachable，其余按 Unreachable 兜底
fn classify_transport_error(msg: &str) -> LlmError {
    let lower = msg.to_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        return LlmError::Timeout(0);
    }
    if let Some(code) = extract_status(msg) {
        return LlmError::Http(code);
    }
    LlmError::Unreachable(msg.to_string())
}

#[async_trait]
impl LlmClient for LocalClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(messages))
            .build()
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        let response = tokio::time::timeout(
            Duration::from_secs(self.request_timeout_secs),
            self.client.chat().create(request),
        )
        .await
        .map_err(|_| LlmError::Timeout(self.request_timeout_secs))?
        .map_err(|e| classify_transport_error(&e.to_string()))?;

        if let Some(usage) = &response.usage {
            self.usage
                .add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| LlmError::Malformed("empty completion".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_status_finds_http_codes() {
        assert_eq!(extract_status("HTTP status client error (404 Not Found)"), Some(404));
        assert_eq!(extract_status("server returned 503"), Some(503));
        assert_eq!(extract_status("connection refused"), None);
        // 1234 不是独立的三位状态码
        assert_eq!(extract_status("id 1234 failed"), None);
    }

    #[test]
    fn test_classify_transport_error() {
        assert!(matches!(
            classify_transport_error("operation timed out"),
            LlmError::Timeout(_)
        ));
        assert!(matches!(
            classify_transport_error("error 500 internal"),
            LlmError::Http(500)
        ));
        assert!(matches!(
            classify_transport_error("connection refused"),
            LlmError::Unreachable(_)
        ));
    }
}
