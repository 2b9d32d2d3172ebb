use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::{SubCommandExtend, interrupt_token, open_session};
use crate::config::{GalleryOptions, Opts};

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {
    #[command(flatten)]
    pub gallery: GalleryOptions,
}

impl SubCommandExtend for BuildCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let session = open_session(&self.gallery, &opts.conf_dir, interrupt_token())?;
        let gallery = session.gallery();

        println!("images\t{}", gallery.len());
        println!("dim\t{}", gallery.dim().map_or("-".to_string(), |d| d.to_string()));
        println!("fingerprint\t{}", gallery.fingerprint());
        println!("cache\t{}", session.cache_outcome());

        session.close()?;
        info!("图库构建完成");
        Ok(())
    }
}
