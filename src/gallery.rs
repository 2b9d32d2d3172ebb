use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use indicatif::ProgressBar;
use log::{debug, info, warn};
use ndarray::{Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use regex::Regex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::cache::{CacheError, EmbeddingCache};
use crate::embedding::{Embedding, EmbeddingProvider, validate};
use crate::error::{MatchError, Result};

/// 图库指纹，按顺序对所有标识符计算 blake3 哈希
///
/// 标识符相同但顺序不同的图库拥有不同的指纹，因为缓存是按位置对应的。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct GalleryFingerprint(String);

impl GalleryFingerprint {
    pub fn of<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut hasher = blake3::Hasher::new();
        for id in identifiers {
            let id = id.as_ref().as_bytes();
            hasher.update(&(id.len() as u64).to_le_bytes());
            hasher.update(id);
        }
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GalleryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 图库特征的来源
#[derive(Debug)]
pub enum CacheOutcome {
    /// 从缓存加载，没有调用模型
    Hit,
    /// 重新计算并写入了缓存
    Stored,
    /// 重新计算，但写入缓存失败
    WriteFailed(CacheError),
    /// 没有使用缓存
    Bypassed,
}

impl CacheOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit)
    }
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hit => f.write_str("hit"),
            Self::Stored => f.write_str("stored"),
            Self::WriteFailed(e) => write!(f, "write failed: {e}"),
            Self::Bypassed => f.write_str("bypassed"),
        }
    }
}

/// 图库中的一项
#[derive(Debug, Clone, Copy)]
pub struct GalleryEntry<'a> {
    pub identifier: &'a str,
    pub embedding: ArrayView1<'a, f32>,
}

/// 内存中的图库，构建后只读
#[derive(Debug, Clone)]
pub struct GalleryIndex {
    identifiers: Vec<String>,
    embeddings: Array2<f32>,
    fingerprint: GalleryFingerprint,
}

impl GalleryIndex {
    /// 构建图库，优先使用缓存
    pub fn build(
        identifiers: Vec<String>,
        provider: &dyn EmbeddingProvider,
        cache: &EmbeddingCache,
    ) -> Result<(Self, CacheOutcome)> {
        Self::builder(identifiers).cache(cache).build(provider)
    }

    pub fn builder<'a>(identifiers: Vec<String>) -> GalleryBuilder<'a> {
        GalleryBuilder {
            identifiers,
            cache: None,
            cancel: CancellationToken::new(),
            parallel: false,
            progress: None,
        }
    }

    /// 使用已经计算好的特征构建图库，特征与标识符按位置对应
    pub fn from_embeddings(identifiers: Vec<String>, embeddings: Vec<Embedding>) -> Result<Self> {
        check_unique(&identifiers)?;
        if identifiers.len() != embeddings.len() {
            return Err(MatchError::InvalidEmbedding(format!(
                "{} identifiers but {} embeddings",
                identifiers.len(),
                embeddings.len()
            )));
        }

        let dim = embeddings.first().map_or(0, Vec::len);
        let mut flat = Vec::with_capacity(embeddings.len() * dim);
        for (id, embedding) in identifiers.iter().zip(&embeddings) {
            validate(embedding).map_err(|e| MatchError::build(id, e))?;
            if embedding.len() != dim {
                return Err(MatchError::build(
                    id,
                    MatchError::DimensionMismatch { expected: dim, actual: embedding.len() },
                ));
            }
            flat.extend_from_slice(embedding);
        }

        let embeddings = Array2::from_shape_vec((identifiers.len(), dim), flat)
            .expect("shape is derived from the data");
        let fingerprint = GalleryFingerprint::of(&identifiers);
        Ok(Self { identifiers, embeddings, fingerprint })
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    /// 特征维度，图库为空时返回 `None`
    pub fn dim(&self) -> Option<usize> {
        (!self.is_empty()).then(|| self.embeddings.ncols())
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    pub fn identifier(&self, position: usize) -> Option<&str> {
        self.identifiers.get(position).map(String::as_str)
    }

    pub fn embedding(&self, position: usize) -> Option<ArrayView1<'_, f32>> {
        (position < self.len()).then(|| self.embeddings.row(position))
    }

    pub fn get(&self, position: usize) -> Option<GalleryEntry<'_>> {
        Some(GalleryEntry {
            identifier: self.identifier(position)?,
            embedding: self.embedding(position)?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = GalleryEntry<'_>> {
        self.identifiers
            .iter()
            .zip(self.embeddings.rows())
            .map(|(identifier, embedding)| GalleryEntry { identifier, embedding })
    }

    /// 所有特征组成的 N x D 矩阵
    pub fn embeddings(&self) -> ArrayView2<'_, f32> {
        self.embeddings.view()
    }

    pub fn fingerprint(&self) -> &GalleryFingerprint {
        &self.fingerprint
    }
}

/// 图库构建器
pub struct GalleryBuilder<'a> {
    identifiers: Vec<String>,
    cache: Option<&'a EmbeddingCache>,
    cancel: CancellationToken,
    parallel: bool,
    progress: Option<ProgressBar>,
}

impl<'a> GalleryBuilder<'a> {
    pub fn cache(mut self, cache: &'a EmbeddingCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// 取消后构建会在下一张图片之前中止，不产生任何图库
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// 使用 rayon 线程池并行计算特征，结果仍然保持标识符的顺序
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn progress(mut self, pb: ProgressBar) -> Self {
        self.progress = Some(pb);
        self
    }

    pub fn build(self, provider: &dyn EmbeddingProvider) -> Result<(GalleryIndex, CacheOutcome)> {
        check_unique(&self.identifiers)?;
        let fingerprint = GalleryFingerprint::of(&self.identifiers);
        debug!("图库指纹: {}", fingerprint);

        if let Some(cache) = self.cache {
            match cache.load(&fingerprint) {
                Some(embeddings) if embeddings.len() == self.identifiers.len() => {
                    info!("缓存命中，共 {} 张图片", embeddings.len());
                    let index = GalleryIndex::from_embeddings(self.identifiers, embeddings)?;
                    return Ok((index, CacheOutcome::Hit));
                }
                Some(embeddings) => {
                    info!(
                        "缓存数量不匹配: {} != {}，重新计算",
                        embeddings.len(),
                        self.identifiers.len()
                    );
                }
                None => {}
            }
        }

        info!("计算 {} 张图库图片的特征", self.identifiers.len());
        if let Some(pb) = &self.progress {
            pb.set_length(self.identifiers.len() as u64);
        }

        let embed_one = |identifier: &String| -> Result<Embedding> {
            if self.cancel.is_cancelled() {
                return Err(MatchError::Cancelled);
            }
            let embedding = provider
                .load(identifier)
                .and_then(|image| provider.embed(&image))
                .and_then(|embedding| validate(&embedding).map(|_| embedding))
                .map_err(|e| MatchError::build(identifier, e))?;
            if let Some(pb) = &self.progress {
                pb.inc(1);
            }
            Ok(embedding)
        };

        let embeddings = if self.parallel {
            self.identifiers.par_iter().map(embed_one).collect::<Result<Vec<_>>>()?
        } else {
            self.identifiers.iter().map(embed_one).collect::<Result<Vec<_>>>()?
        };
        if self.cancel.is_cancelled() {
            return Err(MatchError::Cancelled);
        }

        if let Some(pb) = &self.progress {
            pb.finish_and_clear();
        }

        let index = GalleryIndex::from_embeddings(self.identifiers, embeddings)?;

        let outcome = match self.cache {
            Some(cache) => {
                let rows = index.embeddings.rows().into_iter().map(|row| row.to_vec());
                match cache.save(&fingerprint, &rows.collect::<Vec<_>>()) {
                    Ok(()) => CacheOutcome::Stored,
                    Err(e) => {
                        warn!("写入缓存失败，下次启动将重新计算: {e}");
                        CacheOutcome::WriteFailed(e)
                    }
                }
            }
            None => CacheOutcome::Bypassed,
        };

        Ok((index, outcome))
    }
}

fn check_unique(identifiers: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(identifiers.len());
    for id in identifiers {
        if !seen.insert(id.as_str()) {
            return Err(MatchError::DuplicateIdentifier(id.clone()));
        }
    }
    Ok(())
}

/// 枚举图库图片
///
/// 目录会被递归扫描，并按文件名排序，保证每次运行得到相同的顺序；
/// 直接给出的文件按参数顺序保留。
pub fn scan_gallery(paths: &[PathBuf], suffix: &Regex) -> anyhow::Result<Vec<String>> {
    let mut identifiers = vec![];
    for path in paths {
        if !path.is_dir() {
            identifiers.push(path.to_string_lossy().into_owned());
            continue;
        }
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let matched =
                entry.path().extension().is_some_and(|ext| suffix.is_match(&ext.to_string_lossy()));
            if matched {
                identifiers.push(entry.path().to_string_lossy().into_owned());
            }
        }
    }
    debug!("扫描到 {} 张图库图片", identifiers.len());
    Ok(identifiers)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;

    use super::*;
    use crate::utils::suffix_regex;

    /// 把图片内容当作逗号分隔的浮点数
    struct StubProvider {
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0) }
        }
    }

    impl EmbeddingProvider for StubProvider {
        fn load(&self, identifier: &str) -> anyhow::Result<Vec<u8>> {
            Ok(identifier.as_bytes().to_vec())
        }

        fn embed(&self, image: &[u8]) -> anyhow::Result<Embedding> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::str::from_utf8(image)?
                .split(',')
                .map(|s| s.parse::<f32>().map_err(|_| anyhow!("bad image: {s}")))
                .collect()
        }
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fingerprint_order_sensitive() {
        assert_eq!(GalleryFingerprint::of(["a", "b"]), GalleryFingerprint::of(["a", "b"]));
        assert_ne!(GalleryFingerprint::of(["a", "b"]), GalleryFingerprint::of(["b", "a"]));
        assert_ne!(GalleryFingerprint::of(["ab", "c"]), GalleryFingerprint::of(["a", "bc"]));
    }

    #[test]
    fn test_build_cold_then_warm() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::new(dir.path().join("cache.json"));
        let provider = StubProvider::new();
        let gallery = ids(&["1,0", "0,1", "5,5"]);

        let (index, outcome) = GalleryIndex::build(gallery.clone(), &provider, &cache).unwrap();
        assert!(matches!(outcome, CacheOutcome::Stored));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(index.len(), 3);
        assert_eq!(index.dim(), Some(2));
        assert_eq!(index.embedding(2).unwrap().to_vec(), vec![5.0, 5.0]);

        let (warm, outcome) = GalleryIndex::build(gallery, &provider, &cache).unwrap();
        assert!(outcome.is_hit());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(warm.embeddings(), index.embeddings());
        assert_eq!(warm.identifiers(), index.identifiers());
    }

    #[test]
    fn test_build_changed_gallery_recomputes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::new(dir.path().join("cache.json"));
        let provider = StubProvider::new();

        GalleryIndex::build(ids(&["1,0", "0,1"]), &provider, &cache).unwrap();
        let (index, outcome) = GalleryIndex::build(ids(&["0,1", "1,0"]), &provider, &cache).unwrap();
        assert!(matches!(outcome, CacheOutcome::Stored));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
        assert_eq!(index.embedding(0).unwrap().to_vec(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_build_length_mismatch_recomputes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::new(dir.path().join("cache.json"));
        std::fs::write(cache.path(), b"[[1.0, 0.0]]").unwrap();
        let provider = StubProvider::new();

        let (_, outcome) = GalleryIndex::build(ids(&["1,0", "0,1"]), &provider, &cache).unwrap();
        assert!(matches!(outcome, CacheOutcome::Stored));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_build_failure_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::new(dir.path().join("cache.json"));
        let provider = StubProvider::new();

        let err = GalleryIndex::build(ids(&["1,0", "oops", "5,5"]), &provider, &cache).unwrap_err();
        match err {
            MatchError::GalleryBuild { identifier, .. } => assert_eq!(identifier, "oops"),
            e => panic!("unexpected error: {e}"),
        }
        assert!(!cache.exists());
    }

    #[test]
    fn test_build_dimension_mismatch_aborts() {
        let provider = StubProvider::new();
        let err = GalleryIndex::builder(ids(&["1,0", "1,2,3"])).build(&provider).unwrap_err();
        match err {
            MatchError::GalleryBuild { identifier, .. } => assert_eq!(identifier, "1,2,3"),
            e => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn test_build_rejects_non_finite() {
        let provider = StubProvider::new();
        let err = GalleryIndex::builder(ids(&["1,NaN"])).build(&provider).unwrap_err();
        assert!(matches!(err, MatchError::GalleryBuild { .. }));
    }

    #[test]
    fn test_build_duplicate_identifier() {
        let provider = StubProvider::new();
        let err = GalleryIndex::builder(ids(&["1,0", "1,0"])).build(&provider).unwrap_err();
        assert!(matches!(err, MatchError::DuplicateIdentifier(id) if id == "1,0"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_build_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::new(dir.path().join("cache.json"));
        let provider = StubProvider::new();
        let token = CancellationToken::new();
        token.cancel();

        let err = GalleryIndex::builder(ids(&["1,0", "0,1"]))
            .cache(&cache)
            .cancel(token)
            .build(&provider)
            .unwrap_err();
        assert!(matches!(err, MatchError::Cancelled));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert!(!cache.exists());
    }

    /// 第 `after` 次调用时触发取消
    struct CancellingProvider {
        calls: AtomicUsize,
        after: usize,
        token: CancellationToken,
    }

    impl EmbeddingProvider for CancellingProvider {
        fn load(&self, identifier: &str) -> anyhow::Result<Vec<u8>> {
            Ok(identifier.as_bytes().to_vec())
        }

        fn embed(&self, image: &[u8]) -> anyhow::Result<Embedding> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
                self.token.cancel();
            }
            Ok(vec![image.len() as f32])
        }
    }

    #[test]
    fn test_build_cancelled_midway() {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::new(dir.path().join("cache.json"));
        let token = CancellationToken::new();
        let provider =
            CancellingProvider { calls: AtomicUsize::new(0), after: 3, token: token.clone() };
        let gallery: Vec<String> = (0..256).map(|i| i.to_string()).collect();

        let err = GalleryIndex::builder(gallery)
            .cache(&cache)
            .cancel(token)
            .parallel(true)
            .build(&provider)
            .unwrap_err();
        assert!(matches!(err, MatchError::Cancelled));
        assert!(provider.calls.load(Ordering::SeqCst) >= 3);
        assert!(!cache.exists());
    }

    #[test]
    fn test_build_parallel_keeps_order() {
        let provider = StubProvider::new();
        let gallery: Vec<String> = (0..64).map(|i| format!("{i},{}", i * 2)).collect();
        let (index, outcome) =
            GalleryIndex::builder(gallery.clone()).parallel(true).build(&provider).unwrap();
        assert!(matches!(outcome, CacheOutcome::Bypassed));
        assert_eq!(index.identifiers(), &gallery[..]);
        for i in 0..64 {
            assert_eq!(index.embedding(i).unwrap().to_vec(), vec![i as f32, (i * 2) as f32]);
        }
    }

    #[test]
    fn test_build_write_failure_keeps_index() {
        let dir = tempfile::tempdir().unwrap();
        // 缓存路径是一个目录，无法写入
        let cache_path = dir.path().join("cache.json");
        std::fs::create_dir(&cache_path).unwrap();
        let cache = EmbeddingCache::new(&cache_path);
        let provider = StubProvider::new();

        let (index, outcome) = GalleryIndex::build(ids(&["1,0"]), &provider, &cache).unwrap();
        assert!(matches!(outcome, CacheOutcome::WriteFailed(_)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_empty_gallery() {
        let provider = StubProvider::new();
        let (index, _) = GalleryIndex::builder(vec![]).build(&provider).unwrap();
        assert!(index.is_empty());
        assert_eq!(index.dim(), None);
        assert!(index.get(0).is_none());
    }

    #[test]
    fn test_scan_gallery_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir(root.join("sub")).unwrap();
        for name in ["b.jpg", "a.PNG", "c.txt", "sub/0.jpg"] {
            std::fs::write(root.join(name), b"").unwrap();
        }
        let extra = root.join("c.txt");

        let re = suffix_regex("jpg,png").unwrap();
        let found = scan_gallery(&[root.to_path_buf(), extra.clone()], &re).unwrap();
        let expected: Vec<String> = [root.join("a.PNG"), root.join("b.jpg"), root.join("sub/0.jpg")]
            .iter()
            .chain([&extra])
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        assert_eq!(found, expected);
    }
}
