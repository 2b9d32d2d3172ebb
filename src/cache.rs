use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use fd_lock::RwLock;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embedding::Embedding;
use crate::gallery::GalleryFingerprint;

/// 当前缓存文件格式版本
pub const CACHE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read cache {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse cache {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write cache {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to lock cache {path}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 磁盘上的缓存记录
#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    version: u32,
    fingerprint: String,
    count: usize,
    dim: usize,
    embeddings: Vec<Embedding>,
}

/// 兼容只保存了特征数组、没有任何元信息的旧格式
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredCache {
    Record(CacheRecord),
    Legacy(Vec<Embedding>),
}

/// 缓存文件的概要信息
#[derive(Debug, Clone, Serialize)]
pub struct CacheSummary {
    pub version: Option<u32>,
    pub fingerprint: Option<String>,
    pub count: usize,
    pub dim: Option<usize>,
}

/// 图库特征缓存
///
/// 缓存只按位置保存特征，不保存图片标识符，
/// 因此必须配合确定的图库枚举顺序以及 [`GalleryFingerprint`] 使用。
#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    path: PathBuf,
}

impl EmbeddingCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(suffix);
        self.path.with_file_name(name)
    }

    fn lock_path(&self) -> PathBuf {
        self.sibling(".lock")
    }

    fn tmp_path(&self) -> PathBuf {
        self.sibling(".tmp")
    }

    fn lock_file(&self) -> Result<RwLock<File>, CacheError> {
        let path = self.lock_path();
        let lock_err = |source| CacheError::Lock { path: path.clone(), source };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(lock_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(lock_err)?;
        Ok(RwLock::new(file))
    }

    fn read(&self) -> Result<Option<StoredCache>, CacheError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Read { path: self.path.clone(), source }),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| CacheError::Parse { path: self.path.clone(), source })
    }

    fn read_locked(&self) -> Result<Option<StoredCache>, CacheError> {
        if !self.path.exists() {
            return Ok(None);
        }
        // 只读位置上无法创建锁文件，此时直接读取
        let lock = match self.lock_file() {
            Ok(lock) => lock,
            Err(e) => {
                warn!("{e}，不加锁读取缓存");
                return self.read();
            }
        };
        let _guard =
            lock.read().map_err(|source| CacheError::Lock { path: self.lock_path(), source })?;
        self.read()
    }

    /// 读取缓存的特征，缓存不存在、损坏或与图库不匹配时返回 `None`
    pub fn load(&self, fingerprint: &GalleryFingerprint) -> Option<Vec<Embedding>> {
        let stored = match self.read_locked() {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                debug!("缓存不存在: {}", self.path.display());
                return None;
            }
            Err(e) => {
                warn!("忽略无法读取的缓存: {e}");
                return None;
            }
        };

        let embeddings = match stored {
            StoredCache::Record(record) => {
                if record.version != CACHE_VERSION {
                    debug!("缓存版本不匹配: {} != {}", record.version, CACHE_VERSION);
                    return None;
                }
                if record.fingerprint != fingerprint.as_str() {
                    debug!("图库指纹不匹配: {}", record.fingerprint);
                    return None;
                }
                if record.count != record.embeddings.len() {
                    debug!("缓存数量不一致: {} != {}", record.count, record.embeddings.len());
                    return None;
                }
                if record.embeddings.iter().any(|e| e.len() != record.dim) {
                    debug!("缓存中的特征维度不一致");
                    return None;
                }
                record.embeddings
            }
            StoredCache::Legacy(embeddings) => {
                debug!("读取到旧格式缓存，仅按位置匹配");
                embeddings
            }
        };

        let dim = embeddings.first().map(Vec::len);
        let consistent = embeddings
            .iter()
            .all(|e| Some(e.len()) == dim && e.iter().all(|v| v.is_finite()) && !e.is_empty());
        if !consistent {
            warn!("缓存中包含无效的特征，已忽略");
            return None;
        }

        info!("从缓存加载 {} 个特征: {}", embeddings.len(), self.path.display());
        Some(embeddings)
    }

    /// 保存特征到缓存
    ///
    /// 先写入临时文件再重命名，写入失败时不会破坏已有的缓存。
    pub fn save(
        &self,
        fingerprint: &GalleryFingerprint,
        embeddings: &[Embedding],
    ) -> Result<(), CacheError> {
        let record = CacheRecord {
            version: CACHE_VERSION,
            fingerprint: fingerprint.to_string(),
            count: embeddings.len(),
            dim: embeddings.first().map_or(0, Vec::len),
            embeddings: embeddings.to_vec(),
        };

        let mut lock = self.lock_file()?;
        let _guard =
            lock.write().map_err(|source| CacheError::Lock { path: self.lock_path(), source })?;

        let tmp = self.tmp_path();
        let write_err = |source| CacheError::Write { path: tmp.clone(), source };
        let mut writer = BufWriter::new(File::create(&tmp).map_err(write_err)?);
        serde_json::to_writer(&mut writer, &record)
            .map_err(|e| write_err(std::io::Error::from(e)))?;
        writer.flush().map_err(write_err)?;
        writer.get_ref().sync_all().map_err(write_err)?;
        drop(writer);

        fs::rename(&tmp, &self.path)
            .map_err(|source| CacheError::Write { path: self.path.clone(), source })?;

        info!("已保存 {} 个特征到缓存: {}", embeddings.len(), self.path.display());
        Ok(())
    }

    /// 删除缓存，缓存不存在时什么也不做
    pub fn clear(&self) -> Result<(), CacheError> {
        if !self.path.exists() {
            return Ok(());
        }
        let mut lock = self.lock_file()?;
        let _guard =
            lock.write().map_err(|source| CacheError::Lock { path: self.lock_path(), source })?;
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("已删除缓存: {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Write { path: self.path.clone(), source }),
        }
    }

    /// 读取缓存的概要信息，用于展示
    pub fn inspect(&self) -> Result<Option<CacheSummary>, CacheError> {
        Ok(self.read_locked()?.map(|stored| match stored {
            StoredCache::Record(record) => CacheSummary {
                version: Some(record.version),
                fingerprint: Some(record.fingerprint),
                count: record.embeddings.len(),
                dim: Some(record.dim),
            },
            StoredCache::Legacy(embeddings) => CacheSummary {
                version: None,
                fingerprint: None,
                count: embeddings.len(),
                dim: embeddings.first().map(Vec::len),
            },
        }))
    }
}
