//! 应用上下文
//!
//! 按配置组装存储、凭证调度、嵌入服务与各业务服务，供二进制入口与测试共享。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::config::config::ChatProviderConfig;
use crate::error::Result;
use crate::index::{EmbeddingService, create_embedding_model};
use crate::provider::{
    AuthScheme, ChatProvider, DispatchPolicy, Dispatcher, GeminiChat, KeyRotator,
    OpenAiCompatChat,
};
use crate::services::{
    ChatService, HistoryOrchestrator, PromptSummarizer, RelevanceFilter, ResponseGenerator,
    SummarizerStrategy, SummaryPrompt, TitleGenerator,
};
use crate::storage::{MemoryStore, StorageFactory};

/// Gemini 凭证请求头
pub const GEMINI_KEY_HEADER: &str = "x-goog-api-key";

/// Application state containing all shared services
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    /// 分层记忆存储
    pub store: Arc<dyn MemoryStore>,
    pub embeddings: Arc<EmbeddingService>,
    /// 主生成服务：摘要首选、回答生成
    pub primary: Arc<dyn ChatProvider>,
    /// 辅助生成服务：摘要备选、标题、相关性过滤
    pub helper: Arc<dyn ChatProvider>,
    pub history: Arc<HistoryOrchestrator>,
    pub responder: Arc<ResponseGenerator>,
    pub chat: Arc<ChatService>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("environment", &self.config.environment)
            .field("store", &"Arc<dyn MemoryStore>")
            .field("embeddings", &self.embeddings.is_available())
            .field("primary", &self.primary.name())
            .field("helper", &self.helper.name())
            .field("history", &"Arc<HistoryOrchestrator>")
            .field("responder", &"Arc<ResponseGenerator>")
            .field("chat", &"Arc<ChatService>")
            .finish()
    }
}

impl AppState {
    /// 使用已构建的组件组装服务
    pub fn new(
        config: AppConfig,
        store: Arc<dyn MemoryStore>,
        embeddings: Arc<EmbeddingService>,
        primary: Arc<dyn ChatProvider>,
        helper: Arc<dyn ChatProvider>,
    ) -> Self {
        let summarizers: Vec<Arc<dyn SummarizerStrategy>> = vec![
            Arc::new(PromptSummarizer::new(primary.clone(), SummaryPrompt::Detailed)),
            Arc::new(PromptSummarizer::new(helper.clone(), SummaryPrompt::Terse)),
        ];

        let history = Arc::new(HistoryOrchestrator::new(
            store.clone(),
            embeddings.clone(),
            summarizers,
            TitleGenerator::new(helper.clone(), config.memory.title_max_words),
            RelevanceFilter::new(helper.clone()),
            config.memory.clone(),
        ));
        let responder = Arc::new(ResponseGenerator::new(primary.clone()));
        let chat = Arc::new(ChatService::new(history.clone(), responder.clone()));

        Self {
            config: Arc::new(config),
            store,
            embeddings,
            primary,
            helper,
            history,
            responder,
            chat,
        }
    }

    /// 按配置构建完整应用上下文
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let store = StorageFactory::create(&config.database).await?;
        tracing::info!("Memory store initialised (backend: {})", config.database.backend);

        let policy = DispatchPolicy::from_config(&config.provider);
        let gemini = chat_dispatcher(
            &config.provider.gemini,
            AuthScheme::Header(GEMINI_KEY_HEADER.to_string()),
            policy.clone(),
        )?;
        let nvidia = chat_dispatcher(&config.provider.nvidia, AuthScheme::Bearer, policy)?;

        let primary: Arc<dyn ChatProvider> =
            Arc::new(GeminiChat::new(gemini, &config.provider.gemini));
        let helper: Arc<dyn ChatProvider> =
            Arc::new(OpenAiCompatChat::new(nvidia, &config.provider.nvidia));

        let model = create_embedding_model(&config.embedding, &config.provider)?;
        let embeddings = Arc::new(EmbeddingService::new(model, config.embedding.dimension));
        tracing::info!(
            "Embedding service initialised: {} (backend: {}, dim: {})",
            config.embedding.model_name,
            config.embedding.backend,
            config.embedding.dimension
        );

        Ok(Self::new(config, store, embeddings, primary, helper))
    }
}

/// 为生成服务构建调度器，未启用时使用空凭证池
fn chat_dispatcher(
    config: &ChatProviderConfig,
    auth: AuthScheme,
    policy: DispatchPolicy,
) -> Result<Arc<Dispatcher>> {
    let rotator = if config.enabled {
        KeyRotator::from_env(&config.key_prefix, config.max_slots)
    } else {
        tracing::info!("Provider {} disabled", config.key_prefix);
        KeyRotator::empty(config.key_prefix.trim_end_matches('_'))
    };
    Ok(Arc::new(Dispatcher::new(Arc::new(rotator), auth, policy)?))
}
