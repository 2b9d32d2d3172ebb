use thiserror::Error;

use crate::cache::CacheError;

pub type Result<T, E = MatchError> = std::result::Result<T, E>;

/// 图库构建与查询过程中可能出现的错误
#[derive(Debug, Error)]
pub enum MatchError {
    /// 某张图库图片读取或计算特征失败，整个图库构建中止
    #[error("failed to build gallery at {identifier}")]
    GalleryBuild {
        identifier: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("duplicate gallery identifier: {0}")]
    DuplicateIdentifier(String),
    /// 查询向量与图库向量的维度不一致，通常意味着模型版本不匹配
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("gallery is empty")]
    EmptyGallery,
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
    #[error("failed to embed query image")]
    Embed(#[source] anyhow::Error),
    #[error("gallery build cancelled")]
    Cancelled,
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl MatchError {
    pub(crate) fn build(identifier: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::GalleryBuild { identifier: identifier.into(), source: source.into() }
    }

    /// 是否为查询本身的问题（而不是服务端的问题）
    pub fn is_query_error(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. } | Self::InvalidEmbedding(_) | Self::Embed(_)
        )
    }
}
