use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use anyhow::bail;
use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cache::EmbeddingCache;
use crate::cli::*;
use crate::embedding::{EmbeddingProvider, JsonEmbedder, NpyEmbedder};
use crate::session::CachePolicy;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let path = ProjectDirs::from("", "", "kfmatch")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".kfmatch"));
    ConfDir { path }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap_or(".kfmatch")
}

#[derive(Parser, Debug, Clone)]
pub struct CacheOptions {
    /// 特征缓存文件路径，默认位于配置目录下
    #[arg(long, value_name = "FILE")]
    pub cache: Option<PathBuf>,
}

impl CacheOptions {
    pub fn cache(&self, conf_dir: &ConfDir) -> EmbeddingCache {
        EmbeddingCache::new(self.cache.clone().unwrap_or_else(|| conf_dir.cache()))
    }
}

#[derive(Parser, Debug, Clone)]
pub struct GalleryOptions {
    /// 图库图片或目录，可以重复指定，目录会按文件名顺序递归扫描
    #[arg(short, long = "gallery", value_name = "PATH", required = true)]
    pub gallery: Vec<PathBuf>,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,webp")]
    pub suffix: String,
    #[command(flatten)]
    pub cache: CacheOptions,
    /// 不读取也不写入特征缓存
    #[arg(long)]
    pub no_cache: bool,
    /// 缓存的生命周期
    #[arg(long, value_enum, default_value_t = CachePolicy::Keep)]
    pub cache_policy: CachePolicy,
    /// 特征提取方式
    #[arg(short, long, value_enum, default_value_t = EmbedderKind::Npy)]
    pub embedder: EmbedderKind,
    /// 缩略图特征的尺寸
    #[arg(long, value_name = "WIDTHxHEIGHT", value_parser = parse_size, default_value = "32x24")]
    pub thumb_size: (i32, i32),
    /// 计算图库特征的线程数
    #[arg(short, long, value_name = "N", default_value_t = num_cpus::get())]
    pub jobs: usize,
}

impl GalleryOptions {
    pub fn provider(&self) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
        let provider: Arc<dyn EmbeddingProvider> = match self.embedder {
            EmbedderKind::Npy => Arc::new(NpyEmbedder),
            EmbedderKind::Json => Arc::new(JsonEmbedder),
            #[cfg(feature = "opencv")]
            EmbedderKind::Thumbnail => {
                Arc::new(crate::thumbnail::ThumbnailEmbedder::new(self.thumb_size))
            }
            #[cfg(not(feature = "opencv"))]
            EmbedderKind::Thumbnail => bail!("缩略图特征需要启用 opencv 特性"),
        };
        Ok(provider)
    }
}

#[derive(Parser, Debug, Clone)]
pub struct MatchOptions {
    /// 每张查询图片显示的结果数量
    #[arg(short = 'k', long, value_name = "COUNT", default_value_t = 1)]
    pub count: usize,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "kfmatch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// kfmatch 配置文件目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 计算图库特征并写入缓存
    Build(BuildCommand),
    /// 在图库中查找与查询图片最接近的关键帧
    Match(MatchCommand),
    /// 删除特征缓存
    Clean(CleanCommand),
    /// 显示特征缓存信息
    Show(ShowCommand),
    /// 导出图库特征矩阵
    Export(ExportCommand),
    /// 启动 HTTP 匹配服务
    Server(ServerCommand),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    /// 读取图片旁的 .npy 预计算特征
    Npy,
    /// 读取图片旁的 .json 预计算特征
    Json,
    /// 缩略图特征（需要 opencv 特性）
    Thumbnail,
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回默认特征缓存文件的路径
    pub fn cache(&self) -> PathBuf {
        self.path.join("keyframes.json")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

fn parse_size(s: &str) -> anyhow::Result<(i32, i32)> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 2 {
        bail!("无效的尺寸: {}", s);
    }
    let size: (i32, i32) = (parts[0].parse()?, parts[1].parse()?);
    if size.0 <= 0 || size.1 <= 0 {
        bail!("无效的尺寸: {}", s);
    }
    Ok(size)
}
