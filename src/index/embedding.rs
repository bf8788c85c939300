//! 嵌入模型服务
//!
//! `EmbeddingService` 把文本转换为固定维度的向量。配置了真实模型时
//! 委托给模型后端；后端出错、返回数量或维度不符时，本次调用退化为
//! 确定性的哈希伪向量。退化只影响当次调用，不会永久切换。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::config::{EmbeddingConfig, ProviderConfig};
use crate::error::{AppError, Result};
use crate::index::vector::{cosine_similarity, normalize};
use crate::provider::dispatcher::{AuthScheme, DispatchPolicy, DispatchRequest, Dispatcher};
use crate::provider::rotator::KeyRotator;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dimension(&self) -> usize;
    fn model_name(&self) -> String;
}

/// 确定性伪嵌入
///
/// 以文本 SHA-256 摘要为种子驱动伪随机数生成器，抽取标准正态分量后归一化。
/// 相同文本在任意进程中都得到相同向量。
#[derive(Debug, Clone)]
pub struct HashEmbeddingModel {
    dimension: usize,
}

impl HashEmbeddingModel {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest);
        let mut rng = StdRng::from_seed(seed);

        let mut vector: Vec<f32> = (0..self.dimension)
            .map(|_| standard_normal(&mut rng))
            .collect();
        normalize(&mut vector);
        vector
    }
}

/// Box-Muller
fn standard_normal(rng: &mut StdRng) -> f32 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
}

#[async_trait]
impl EmbeddingModel for HashEmbeddingModel {
    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> String {
        "hash-fallback".to_string()
    }
}

/// Ollama Embedding 模型客户端
pub struct OllamaEmbeddingModel {
    client: reqwest::Client,
    model_name: String,
    base_url: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbeddingModel {
    pub fn new(base_url: &str, model_name: &str, dimension: usize, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            model_name: model_name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingModel for OllamaEmbeddingModel {
    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&serde_json::json!({
                "model": self.model_name,
                "input": texts,
                "truncate": true
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Embedding(format!(
                "Ollama embedding failed: {}",
                error_text
            )));
        }

        let embed_response: OllamaEmbedResponse = response.json().await?;
        Ok(embed_response.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> String {
        self.model_name.clone()
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// OpenAI 兼容 `/embeddings` 接口，经由调度器轮换凭证
pub struct RemoteEmbeddingModel {
    dispatcher: Arc<Dispatcher>,
    base_url: String,
    model_name: String,
    dimension: usize,
}

impl RemoteEmbeddingModel {
    pub fn new(dispatcher: Arc<Dispatcher>, base_url: &str, model_name: &str, dimension: usize) -> Self {
        Self {
            dispatcher,
            base_url: base_url.trim_end_matches('/').to_string(),
            model_name: model_name.to_string(),
            dimension,
        }
    }
}

#[async_trait]
impl EmbeddingModel for RemoteEmbeddingModel {
    async fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = DispatchRequest::post_json(
            format!("{}/embeddings", self.base_url),
            serde_json::json!({"model": self.model_name, "input": texts}),
        );
        let response = self.dispatcher.dispatch(&request).await?;
        let mut parsed: OpenAiEmbeddingResponse = serde_json::from_value(response)?;

        // Sort by index to maintain order
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> String {
        self.model_name.clone()
    }
}

/// 语义检索命中
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticMatch {
    /// 候选在输入列表中的下标
    pub index: usize,
    pub text: String,
    pub score: f32,
}

/// 嵌入服务：真实模型 + 确定性回退
pub struct EmbeddingService {
    model: Option<Arc<dyn EmbeddingModel>>,
    fallback: HashEmbeddingModel,
    dimension: usize,
}

impl std::fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("model", &self.model.as_ref().map(|m| m.model_name()))
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl EmbeddingService {
    pub fn new(model: Option<Arc<dyn EmbeddingModel>>, dimension: usize) -> Self {
        Self {
            model,
            fallback: HashEmbeddingModel::new(dimension),
            dimension,
        }
    }

    /// 只使用确定性回退
    pub fn fallback_only(dimension: usize) -> Self {
        Self::new(None, dimension)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 是否配置了真实模型
    pub fn is_available(&self) -> bool {
        self.model.is_some()
    }

    /// 批量嵌入，永不失败
    pub async fn embed(&self, texts: &[String]) -> Vec<Vec<f32>> {
        if texts.is_empty() {
            return Vec::new();
        }

        if let Some(model) = &self.model {
            match model.encode_batch(texts).await {
                Ok(vectors) if self.is_well_formed(&vectors, texts.len()) => return vectors,
                Ok(vectors) => tracing::warn!(
                    "Embedding model {} returned {} vector(s) for {} text(s) with unexpected shape, using fallback",
                    model.model_name(),
                    vectors.len(),
                    texts.len()
                ),
                Err(e) => tracing::warn!(
                    "Embedding model {} failed: {}, using fallback",
                    model.model_name(),
                    e
                ),
            }
        }

        texts.iter().map(|t| self.fallback.vector_for(t)).collect()
    }

    pub async fn embed_one(&self, text: &str) -> Vec<f32> {
        self.embed(&[text.to_string()])
            .await
            .into_iter()
            .next()
            .unwrap_or_else(|| self.fallback.vector_for(text))
    }

    fn is_well_formed(&self, vectors: &[Vec<f32>], expected: usize) -> bool {
        vectors.len() == expected && vectors.iter().all(|v| v.len() == self.dimension)
    }

    /// 语义检索
    ///
    /// 返回至多 `top_k` 个得分严格大于 `threshold` 的候选，按得分降序，
    /// 得分相同时保持原始顺序。候选为空时不发起任何嵌入调用。
    pub async fn semantic_search(
        &self,
        query: &str,
        candidates: &[String],
        top_k: usize,
        threshold: f32,
    ) -> Vec<SemanticMatch> {
        if candidates.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let mut texts = Vec::with_capacity(candidates.len() + 1);
        texts.push(query.to_string());
        texts.extend(candidates.iter().cloned());

        let vectors = self.embed(&texts).await;
        let Some((query_vector, candidate_vectors)) = vectors.split_first() else {
            return Vec::new();
        };

        let mut scored: Vec<SemanticMatch> = candidate_vectors
            .iter()
            .zip(candidates.iter())
            .enumerate()
            .map(|(index, (vector, text))| SemanticMatch {
                index,
                text: text.clone(),
                score: cosine_similarity(query_vector, vector),
            })
            .collect();

        // sort_by is stable, ties keep candidate order
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        scored
            .into_iter()
            .take(top_k)
            .filter(|m| m.score > threshold)
            .collect()
    }
}

/// 按配置创建嵌入模型，"hash" 后端返回 `None`（仅使用回退）
pub fn create_embedding_model(
    config: &EmbeddingConfig,
    provider: &ProviderConfig,
) -> Result<Option<Arc<dyn EmbeddingModel>>> {
    let timeout = Duration::from_secs(config.timeout_secs.max(1));

    match config.backend.as_str() {
        "ollama" => {
            let model =
                OllamaEmbeddingModel::new(&config.url, &config.model_name, config.dimension, timeout)?;
            Ok(Some(Arc::new(model)))
        }
        "openai" => {
            let rotator = Arc::new(KeyRotator::from_env(&config.key_prefix, config.max_slots));
            let policy = DispatchPolicy {
                timeout,
                ..DispatchPolicy::from_config(provider)
            };
            let dispatcher = Arc::new(Dispatcher::new(rotator, AuthScheme::Bearer, policy)?);
            let model =
                RemoteEmbeddingModel::new(dispatcher, &config.url, &config.model_name, config.dimension);
            Ok(Some(Arc::new(model)))
        }
        "hash" => Ok(None),
        other => Err(AppError::Config(format!("unknown embedding backend: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fallback_is_deterministic_and_unit_norm() {
        let a = HashEmbeddingModel::new(384).vector_for("x");
        let b = HashEmbeddingModel::new(384).vector_for("x");
        assert_eq!(a, b);
        assert_eq!(a.len(), 384);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);

        let c = HashEmbeddingModel::new(384).vector_for("y");
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_fresh_services_embed_identically() {
        let first = EmbeddingService::fallback_only(64).embed(&texts(&["x"])).await;
        let second = EmbeddingService::fallback_only(64).embed(&texts(&["x"])).await;
        assert_eq!(first, second);
        assert!(!EmbeddingService::fallback_only(64).is_available());
    }

    #[tokio::test]
    async fn test_model_error_degrades_for_that_call_only() {
        let mut model = MockEmbeddingModel::new();
        let mut seq = mockall::Sequence::new();
        model
            .expect_encode_batch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(AppError::Embedding("offline".into())));
        model
            .expect_encode_batch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|texts| Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0, 0.0]).collect()));
        model
            .expect_model_name()
            .returning(|| "mock".to_string());

        let service = EmbeddingService::new(Some(Arc::new(model)), 4);
        let degraded = service.embed_one("hello").await;
        assert_eq!(degraded, HashEmbeddingModel::new(4).vector_for("hello"));

        let recovered = service.embed_one("hello").await;
        assert_eq!(recovered, vec![1.0, 0.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn test_wrong_dimension_uses_fallback() {
        let mut model = MockEmbeddingModel::new();
        model
            .expect_encode_batch()
            .returning(|texts| Ok(texts.iter().map(|_| vec![1.0, 2.0]).collect()));
        model
            .expect_model_name()
            .returning(|| "mock".to_string());

        let service = EmbeddingService::new(Some(Arc::new(model)), 8);
        let vector = service.embed_one("abc").await;
        assert_eq!(vector.len(), 8);
    }

    #[tokio::test]
    async fn test_semantic_search_empty_candidates_makes_no_calls() {
        let mut model = MockEmbeddingModel::new();
        model.expect_encode_batch().times(0);

        let service = EmbeddingService::new(Some(Arc::new(model)), 4);
        let results = service.semantic_search("q", &[], 5, 0.0).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_semantic_search_bounds_and_order() {
        let service = EmbeddingService::fallback_only(32);
        let candidates = texts(&["alpha", "beta", "query", "gamma", "delta", "query"]);

        let results = service.semantic_search("query", &candidates, 3, -1.0).await;
        assert!(results.len() <= 3);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }

        // identical texts tie at 1.0 and keep their original order
        assert_eq!(results[0].index, 2);
        assert_eq!(results[1].index, 5);
        assert!((results[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_semantic_search_threshold_is_strict() {
        let service = EmbeddingService::fallback_only(16);
        let candidates = texts(&["same", "other"]);

        let results = service.semantic_search("same", &candidates, 5, 0.999).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].text, "same");

        let none = service.semantic_search("same", &candidates, 5, 1.0).await;
        assert!(none.is_empty());
    }

    #[test]
    fn test_unknown_backend_is_config_error() {
        let config = EmbeddingConfig {
            backend: "word2vec".into(),
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            create_embedding_model(&config, &ProviderConfig::default()),
            Err(AppError::Config(_))
        ));
        assert!(create_embedding_model(&EmbeddingConfig::default(), &ProviderConfig::default())
            .unwrap()
            .is_none());
    }
}
