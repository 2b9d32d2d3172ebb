use anyhow::Result;
use clap::Parser;
use log::info;

use crate::Opts;
use crate::cli::SubCommandExtend;
use crate::config::CacheOptions;

#[derive(Parser, Debug, Clone)]
pub struct CleanCommand {
    #[command(flatten)]
    pub cache: CacheOptions,
}

impl SubCommandExtend for CleanCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let cache = self.cache.cache(&opts.conf_dir);
        if !cache.exists() {
            info!("缓存不存在: {}", cache.path().display());
            return Ok(());
        }
        cache.clear()?;
        info!("清理完成");
        Ok(())
    }
}
