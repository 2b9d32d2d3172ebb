mod build;
mod clean;
mod export;
mod r#match;
pub mod server;
mod show;

pub use build::*;
pub use clean::*;
pub use export::*;
pub use r#match::*;
pub use server::*;
pub use show::*;

use anyhow::Context;
use indicatif::ProgressBar;
use log::{info, warn};
use tokio::task::block_in_place;
use tokio_util::sync::CancellationToken;

use crate::MatchSession;
use crate::config::{ConfDir, GalleryOptions, Opts};
use crate::gallery::scan_gallery;
use crate::utils::{pb_style, suffix_regex};

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 监听 Ctrl-C，第一次取消返回的 token，第二次直接退出
pub fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if token.is_cancelled() {
                    std::process::exit(130);
                }
                warn!("收到中断信号，再次按下 Ctrl-C 强制退出");
                token.cancel();
            }
        }
    });
    token
}

/// 扫描图库并打开匹配会话
pub fn open_session(
    gallery: &GalleryOptions,
    conf_dir: &ConfDir,
    cancel: CancellationToken,
) -> anyhow::Result<MatchSession> {
    let suffix = suffix_regex(&gallery.suffix).context("无效的后缀名")?;
    let identifiers = scan_gallery(&gallery.gallery, &suffix)?;
    info!("图库共 {} 张图片", identifiers.len());

    let mut builder = MatchSession::builder(identifiers, gallery.provider()?)
        .policy(gallery.cache_policy)
        .cancel(cancel)
        .parallel(gallery.jobs > 1)
        .progress(ProgressBar::no_length().with_style(pb_style()));
    if !gallery.no_cache {
        builder = builder.cache(gallery.cache.cache(conf_dir));
    }

    let pool = rayon::ThreadPoolBuilder::new().num_threads(gallery.jobs.max(1)).build()?;
    let session = block_in_place(|| pool.install(|| builder.open()))?;
    Ok(session)
}
