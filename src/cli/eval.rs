use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::cli::{SubCommandExtend, load_vocabulary};
use crate::config::{FeatureOptions, Opts, OutputFormat};
use crate::eval::{EvalOptions, Trajectory, evaluate};
use crate::index::Searcher;
use crate::utils::scan_images;

#[derive(Parser, Debug, Clone)]
pub struct EvalCommand {
    #[command(flatten)]
    pub feature: FeatureOptions,
    /// 查询图片或其所在目录，文件名末尾的数字为帧编号
    #[arg(required = true)]
    pub queries: Vec<PathBuf>,
    /// 轨迹文件，第 N 行为第 N 帧，第 1、2 列为 x、y 坐标
    #[arg(short, long)]
    pub trajectory: PathBuf,
    /// 参考集名称，只有路径中包含该字符串的结果才参与评估
    #[arg(short, long)]
    pub reference: String,
    /// 过滤后保留的结果数量
    #[arg(long, default_value_t = 5)]
    pub top_n: usize,
    /// 每次检索返回的结果数量，默认为查询图片数量的 3 倍
    #[arg(long)]
    pub search_depth: Option<usize>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for EvalCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let vocabulary = load_vocabulary(opts)?;
        let extractor = self.feature.extractor(vocabulary.kind())?;
        let searcher = Searcher::open(opts.conf_dir.database(), vocabulary).await?;
        let trajectory = Trajectory::load(&self.trajectory)?;
        let queries = scan_images(&self.queries, &self.feature.suffix)?;

        let options = EvalOptions {
            reference: self.reference.clone(),
            top_n: self.top_n,
            search_depth: self.search_depth.unwrap_or(queries.len() * 3).max(self.top_n),
        };
        let report = evaluate(&searcher, extractor.as_ref(), &queries, &trajectory, &options).await?;

        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Table => {
                for entry in &report.entries {
                    let matched = entry.matched.as_ref().map_or("-", |hit| hit.path.as_str());
                    println!("{:.4}\t{}\t{}", entry.error, entry.query.display(), matched);
                }
                for query in &report.skipped {
                    println!("skipped\t{}", query.display());
                }
                match report.mean_error() {
                    Some(mean) => println!("mean_error\t{:.4}", mean),
                    None => println!("mean_error\t-"),
                }
            }
        }
        Ok(())
    }
}
