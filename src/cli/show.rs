use anyhow::Result;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::cli::r#match::OutputFormat;
use crate::config::{CacheOptions, Opts};

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    #[command(flatten)]
    pub cache: CacheOptions,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for ShowCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let cache = self.cache.cache(&opts.conf_dir);
        let Some(summary) = cache.inspect()? else {
            println!("缓存不存在: {}", cache.path().display());
            return Ok(());
        };

        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
            OutputFormat::Table => {
                let or_dash = |v: Option<String>| v.unwrap_or_else(|| "-".to_string());
                println!("path\t{}", cache.path().display());
                println!("version\t{}", or_dash(summary.version.map(|v| v.to_string())));
                println!("fingerprint\t{}", or_dash(summary.fingerprint));
                println!("count\t{}", summary.count);
                println!("dim\t{}", or_dash(summary.dim.map(|d| d.to_string())));
            }
        }
        Ok(())
    }
}
