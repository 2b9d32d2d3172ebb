use std::sync::Arc;

use clap::ValueEnum;
use indicatif::ProgressBar;
use log::{debug, info};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cache::EmbeddingCache;
use crate::embedding::EmbeddingProvider;
use crate::error::{MatchError, Result};
use crate::gallery::{CacheOutcome, GalleryIndex};
use crate::matcher::{self, QueryResult};

/// 缓存的生命周期策略
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum CachePolicy {
    /// 会话关闭后保留缓存
    #[default]
    Keep,
    /// 会话关闭时删除缓存
    ClearOnClose,
}

/// 一个固定图库上的多次查询
///
/// 图库只在打开时构建一次，之后的每次查询只为查询图片调用一次模型。
pub struct MatchSession {
    gallery: GalleryIndex,
    provider: Arc<dyn EmbeddingProvider>,
    cache: Option<EmbeddingCache>,
    policy: CachePolicy,
    outcome: CacheOutcome,
}

impl MatchSession {
    /// 使用默认参数打开会话
    pub fn open(
        identifiers: Vec<String>,
        provider: Arc<dyn EmbeddingProvider>,
        cache: EmbeddingCache,
    ) -> Result<Self> {
        Self::builder(identifiers, provider).cache(cache).open()
    }

    pub fn builder(
        identifiers: Vec<String>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> MatchSessionBuilder {
        MatchSessionBuilder {
            identifiers,
            provider,
            cache: None,
            policy: CachePolicy::default(),
            cancel: CancellationToken::new(),
            parallel: false,
            progress: None,
        }
    }

    pub fn gallery(&self) -> &GalleryIndex {
        &self.gallery
    }

    pub fn cache_outcome(&self) -> &CacheOutcome {
        &self.outcome
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    fn embed(&self, image: &[u8]) -> Result<Vec<f32>> {
        self.provider.embed(image).map_err(MatchError::Embed)
    }

    /// 查询一张图片
    pub fn query(&self, image: &[u8]) -> Result<QueryResult> {
        let embedding = self.embed(image)?;
        self.query_embedding(&embedding)
    }

    /// 读取标识符对应的图片并查询
    pub fn query_identifier(&self, identifier: &str) -> Result<QueryResult> {
        let image = self.provider.load(identifier).map_err(MatchError::Embed)?;
        self.query(&image)
    }

    pub fn query_embedding(&self, embedding: &[f32]) -> Result<QueryResult> {
        let result = matcher::find_closest(embedding, &self.gallery)?;
        debug!("最近匹配: {} ({:.4})", result.identifier, result.distance);
        Ok(result)
    }

    /// 返回最近的 k 项
    pub fn rank(&self, image: &[u8], k: usize) -> Result<Vec<QueryResult>> {
        let embedding = self.embed(image)?;
        self.rank_embedding(&embedding, k)
    }

    pub fn rank_identifier(&self, identifier: &str, k: usize) -> Result<Vec<QueryResult>> {
        let image = self.provider.load(identifier).map_err(MatchError::Embed)?;
        self.rank(&image, k)
    }

    pub fn rank_embedding(&self, embedding: &[f32], k: usize) -> Result<Vec<QueryResult>> {
        matcher::rank(embedding, &self.gallery, k)
    }

    /// 删除缓存，不影响当前会话中已经加载的图库
    pub fn clear_cache(&self) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.clear()?;
        }
        Ok(())
    }

    /// 关闭会话，只有策略为 [`CachePolicy::ClearOnClose`] 时才会删除缓存
    pub fn close(self) -> Result<()> {
        if self.policy == CachePolicy::ClearOnClose {
            info!("会话关闭，删除缓存");
            self.clear_cache()?;
        }
        Ok(())
    }
}

pub struct MatchSessionBuilder {
    identifiers: Vec<String>,
    provider: Arc<dyn EmbeddingProvider>,
    cache: Option<EmbeddingCache>,
    policy: CachePolicy,
    cancel: CancellationToken,
    parallel: bool,
    progress: Option<ProgressBar>,
}

impl MatchSessionBuilder {
    pub fn cache(mut self, cache: EmbeddingCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn progress(mut self, pb: ProgressBar) -> Self {
        self.progress = Some(pb);
        self
    }

    pub fn open(self) -> Result<MatchSession> {
        let mut builder = GalleryIndex::builder(self.identifiers)
            .cancel(self.cancel)
            .parallel(self.parallel);
        if let Some(cache) = &self.cache {
            builder = builder.cache(cache);
        }
        if let Some(pb) = self.progress {
            builder = builder.progress(pb);
        }
        let (gallery, outcome) = builder.build(self.provider.as_ref())?;
        info!("图库已就绪: {} 张图片, 缓存 {}", gallery.len(), outcome);

        Ok(MatchSession {
            gallery,
            provider: self.provider,
            cache: self.cache,
            policy: self.policy,
            outcome,
        })
    }
}
