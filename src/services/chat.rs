//! 单轮对话服务
//!
//! 串联上下文组装、回答生成与问答记录。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::services::history::HistoryOrchestrator;
use crate::services::response::ResponseGenerator;

/// 一轮对话输入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub subject_id: String,
    /// 首次出现的主体使用的显示名，缺省为主体 ID
    #[serde(default)]
    pub display_name: Option<String>,
    pub session_id: String,
    pub message: String,
}

impl ChatTurn {
    pub fn new(subject_id: &str, session_id: &str, message: &str) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            display_name: None,
            session_id: session_id.to_string(),
            message: message.to_string(),
        }
    }
}

/// 一轮对话输出
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatReply {
    pub reply: String,
    pub summary: String,
    pub session_title: String,
}

pub struct ChatService {
    history: Arc<HistoryOrchestrator>,
    responder: Arc<ResponseGenerator>,
}

impl ChatService {
    pub fn new(history: Arc<HistoryOrchestrator>, responder: Arc<ResponseGenerator>) -> Self {
        Self { history, responder }
    }

    pub fn history(&self) -> &Arc<HistoryOrchestrator> {
        &self.history
    }

    pub async fn chat(&self, turn: &ChatTurn) -> Result<ChatReply> {
        if turn.message.trim().is_empty() {
            return Err(AppError::Validation("message must not be empty".into()));
        }

        let store = self.history.store();
        let profile = match store.get_subject(&turn.subject_id).await? {
            Some(profile) => profile,
            None => {
                let name = turn.display_name.as_deref().unwrap_or(&turn.subject_id);
                store.create_subject(&turn.subject_id, name).await?
            }
        };

        if store.get_session(&turn.session_id).await?.is_none() {
            return Err(AppError::SessionNotFound(turn.session_id.clone()));
        }

        let context = self
            .history
            .get_context(&turn.subject_id, &turn.session_id, &turn.message)
            .await?;
        let reply = self
            .responder
            .generate(&turn.message, profile.role(), profile.specialty(), &context)
            .await;
        let summary = self
            .history
            .process_exchange(&turn.subject_id, &turn.session_id, &turn.message, &reply)
            .await?;

        let session_title = store
            .get_session(&turn.session_id)
            .await?
            .map(|session| session.title)
            .unwrap_or_default();

        Ok(ChatReply {
            reply,
            summary,
            session_title,
        })
    }
}
