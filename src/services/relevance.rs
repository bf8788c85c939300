//! 短期记忆相关性过滤
//!
//! 请生成模型从最近摘要中逐字挑选与新问题直接相关的条目。
//! 模型不可用、调用失败或返回空内容时原样放行，不会因为外部故障丢失上下文。

use std::sync::Arc;

use crate::provider::ChatProvider;

const RELEVANCE_SYSTEM_PROMPT: &str = "You are a medical AI assistant. Select only the most relevant recent medical context that directly relates to the new question. Return the selected items verbatim, no commentary. If none are relevant, return nothing.";

/// 过滤结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelevanceOutcome {
    /// 模型挑选出的条目（合并为一段）
    Selected(Vec<String>),
    /// 未经过滤的原始条目
    PassThrough(Vec<String>),
}

impl RelevanceOutcome {
    pub fn into_items(self) -> Vec<String> {
        match self {
            RelevanceOutcome::Selected(items) | RelevanceOutcome::PassThrough(items) => items,
        }
    }
}

pub struct RelevanceFilter {
    provider: Arc<dyn ChatProvider>,
}

impl RelevanceFilter {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self { provider }
    }

    fn prompt(question: &str, items: &[String]) -> String {
        format!(
            "Question: {}\n\nSelect relevant items from recent medical context:\n{}",
            question,
            items.join("\n")
        )
    }

    pub async fn filter(&self, question: &str, items: Vec<String>) -> RelevanceOutcome {
        if items.is_empty() {
            return RelevanceOutcome::PassThrough(items);
        }
        if !self.provider.is_available() {
            return RelevanceOutcome::PassThrough(items);
        }

        match self
            .provider
            .complete(Some(RELEVANCE_SYSTEM_PROMPT), &Self::prompt(question, &items))
            .await
        {
            Ok(selected) if selected.trim().is_empty() => {
                tracing::debug!("Relevance filter returned nothing, keeping recent items");
                RelevanceOutcome::PassThrough(items)
            }
            Ok(selected) => RelevanceOutcome::Selected(vec![selected.trim().to_string()]),
            Err(e) => {
                tracing::warn!(
                    "Relevance filter via {} failed, keeping {} recent item(s): {}",
                    self.provider.name(),
                    items.len(),
                    e
                );
                RelevanceOutcome::PassThrough(items)
            }
        }
    }
}
