//! 生成模型客户端
//!
//! 两种协议：OpenAI 兼容的 `/chat/completions`（NVIDIA 托管模型）
//! 与 Gemini 的 `:generateContent`。请求统一经由 [`Dispatcher`] 发出。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::config::config::ChatProviderConfig;
use crate::error::{AppError, Result};
use crate::provider::dispatcher::{DispatchRequest, Dispatcher};

/// 生成模型提供方
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// 提供方名称，用于日志
    fn name(&self) -> &str;

    /// 是否有可用凭证
    fn is_available(&self) -> bool;

    /// 发送一次对话补全，`system` 为空时只发送用户消息
    async fn complete(&self, system: Option<&str>, user: &str) -> Result<String>;
}

/// OpenAI 兼容接口客户端
pub struct OpenAiCompatChat {
    dispatcher: Arc<Dispatcher>,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OpenAiCompatChat {
    pub fn new(dispatcher: Arc<Dispatcher>, config: &ChatProviderConfig) -> Self {
        Self {
            dispatcher,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }

    fn build_body(&self, system: Option<&str>, user: &str) -> Value {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": user}));

        json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatChat {
    fn name(&self) -> &str {
        self.dispatcher.name()
    }

    fn is_available(&self) -> bool {
        self.dispatcher.has_credentials()
    }

    async fn complete(&self, system: Option<&str>, user: &str) -> Result<String> {
        let request = DispatchRequest::post_json(
            format!("{}/chat/completions", self.base_url),
            self.build_body(system, user),
        );
        let response = self.dispatcher.dispatch(&request).await?;
        extract_openai_content(&response)
    }
}

/// Gemini REST 客户端
pub struct GeminiChat {
    dispatcher: Arc<Dispatcher>,
    base_url: String,
    model: String,
    temperature: f32,
}

impl GeminiChat {
    pub fn new(dispatcher: Arc<Dispatcher>, config: &ChatProviderConfig) -> Self {
        Self {
            dispatcher,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }

    fn build_body(&self, system: Option<&str>, user: &str) -> Value {
        let mut body = json!({
            "contents": [{"role": "user", "parts": [{"text": user}]}],
            "generationConfig": {"temperature": self.temperature},
        });
        if let Some(system) = system {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        body
    }
}

#[async_trait]
impl ChatProvider for GeminiChat {
    fn name(&self) -> &str {
        self.dispatcher.name()
    }

    fn is_available(&self) -> bool {
        self.dispatcher.has_credentials()
    }

    async fn complete(&self, system: Option<&str>, user: &str) -> Result<String> {
        let request = DispatchRequest::post_json(
            format!("{}/models/{}:generateContent", self.base_url, self.model),
            self.build_body(system, user),
        );
        let response = self.dispatcher.dispatch(&request).await?;
        extract_gemini_text(&response)
    }
}

/// 读取 `choices[0].message.content`
pub fn extract_openai_content(response: &Value) -> Result<String> {
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            AppError::MalformedProviderOutput("missing choices[0].message.content".into())
        })
}

/// 拼接 `candidates[0].content.parts[*].text`
pub fn extract_gemini_text(response: &Value) -> Result<String> {
    let text: String = response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::MalformedProviderOutput(
            "missing candidates[0].content.parts text".into(),
        ));
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_openai_content() {
        let response = json!({"choices": [{"message": {"role": "assistant", "content": "  hi  "}}]});
        assert_eq!(extract_openai_content(&response).unwrap(), "hi");

        let empty = json!({"choices": []});
        assert!(matches!(
            extract_openai_content(&empty),
            Err(AppError::MalformedProviderOutput(_))
        ));
    }

    #[test]
    fn test_extract_gemini_text_joins_parts() {
        let response = json!({
            "candidates": [{"content": {"parts": [{"text": "q: a"}, {"text": "\na: b"}]}}]
        });
        assert_eq!(extract_gemini_text(&response).unwrap(), "q: a\na: b");

        let blocked = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        assert!(extract_gemini_text(&blocked).is_err());
    }
}
