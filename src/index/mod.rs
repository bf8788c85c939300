//! 索引模块
//!
//! 文本嵌入与向量相似度。

pub mod embedding;
pub mod vector;

pub use embedding::{
    EmbeddingModel, EmbeddingService, HashEmbeddingModel, SemanticMatch, create_embedding_model,
};
pub use vector::cosine_similarity;
