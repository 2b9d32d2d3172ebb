use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use ndarray_npy::write_npy;

use crate::cli::{SubCommandExtend, interrupt_token, open_session};
use crate::GalleryIndex;
use crate::config::{GalleryOptions, Opts};

#[derive(Parser, Debug, Clone)]
pub struct ExportCommand {
    #[command(flatten)]
    pub gallery: GalleryOptions,
    /// 导出的 npy 文件，图片标识符会写入同名的 .txt 文件
    #[arg(short, long, value_name = "FILE", default_value = "keyframes.npy")]
    pub output: PathBuf,
}

impl SubCommandExtend for ExportCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let session = open_session(&self.gallery, &opts.conf_dir, interrupt_token())?;
        let gallery = session.gallery();
        let gallery_len = gallery.len();

        let result = self.export(gallery);
        session.close()?;
        result?;

        info!("导出成功: {} 张图片 -> {}", gallery_len, self.output.display());
        Ok(())
    }
}

impl ExportCommand {
    fn export(&self, gallery: &GalleryIndex) -> Result<()> {
        write_npy(&self.output, &gallery.embeddings())
            .with_context(|| format!("无法写入 {}", self.output.display()))?;

        let mut ids = self.output.clone().into_os_string();
        ids.push(".txt");
        let mut listing = String::new();
        for entry in gallery.iter() {
            listing.push_str(entry.identifier);
            listing.push('\n');
        }
        let ids = PathBuf::from(ids);
        fs::write(&ids, listing).with_context(|| format!("无法写入 {}", ids.display()))?;
        Ok(())
    }
}
