use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use log::{debug, error};
use serde::Serialize;
use tokio::task::block_in_place;
use tokio_util::sync::CancellationToken;

use crate::cli::{SubCommandExtend, interrupt_token, open_session};
use crate::config::{GalleryOptions, MatchOptions, Opts};
use crate::MatchSession;
use crate::matcher::QueryResult;
use crate::utils::read_line;

#[derive(Parser, Debug, Clone)]
pub struct MatchCommand {
    #[command(flatten)]
    pub gallery: GalleryOptions,
    #[command(flatten)]
    pub search: MatchOptions,
    /// 查询图片，按顺序依次匹配
    pub queries: Vec<String>,
    /// 处理完参数中的查询后，继续从标准输入读取查询图片路径，空行结束
    #[arg(short, long)]
    pub interactive: bool,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

#[derive(Debug, Serialize)]
struct QueryOutput<'a> {
    query: &'a str,
    result: Vec<QueryResult>,
}

impl SubCommandExtend for MatchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let cancel = interrupt_token();
        let session = open_session(&self.gallery, &opts.conf_dir, cancel.clone())?;

        // 单个查询失败不影响其他查询，会话总是会被关闭
        let mut outputs = vec![];
        let mut failed = 0;
        for query in &self.queries {
            match block_in_place(|| session.rank_identifier(query, self.search.count)) {
                Ok(result) => outputs.push(QueryOutput { query, result }),
                Err(e) => {
                    failed += 1;
                    error!("查询失败 {}: {:#}", query, anyhow::Error::from(e));
                }
            }
        }
        let mut result = print_result(&outputs, self.output_format);

        if self.interactive && result.is_ok() {
            result = interactive(&session, self, &cancel);
        }

        session.close()?;
        result?;
        if failed > 0 {
            bail!("{} 个查询失败", failed);
        }
        Ok(())
    }
}

/// 交互模式：不断读取新的查询图片，复用已经构建好的图库
fn interactive(
    session: &MatchSession,
    opts: &MatchCommand,
    cancel: &CancellationToken,
) -> Result<()> {
    loop {
        let query = read_line("> ")?;
        if query.is_empty() || cancel.is_cancelled() {
            break;
        }
        match block_in_place(|| session.rank_identifier(&query, opts.search.count)) {
            Ok(result) => {
                print_result(&[QueryOutput { query: &query, result }], opts.output_format)?
            }
            // 单次查询失败不影响后续查询
            Err(e) => error!("查询失败 {}: {:#}", query, anyhow::Error::from(e)),
        }
    }
    debug!("交互模式结束");
    Ok(())
}

fn print_result(outputs: &[QueryOutput], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(outputs)?)
        }
        OutputFormat::Table => {
            for output in outputs {
                for r in &output.result {
                    println!("{}\t{:.4}\t{}", output.query, r.distance, r.identifier);
                }
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
