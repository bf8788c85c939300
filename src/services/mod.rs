//! 服务模块

pub mod chat;
pub mod history;
pub mod relevance;
pub mod response;
pub mod summarizer;
pub mod title;

pub use chat::{ChatReply, ChatService, ChatTurn};
pub use history::{HistoryOrchestrator, compose_context};
pub use relevance::{RelevanceFilter, RelevanceOutcome};
pub use response::{MEDICAL_DISCLAIMER, ResponseGenerator};
pub use summarizer::{
    PromptSummarizer, SummarizerStrategy, SummaryPrompt, fallback_summary, summarize_with,
};
pub use title::TitleGenerator;
