use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::cli::{SubCommandExtend, load_vocabulary};
use crate::config::{FeatureOptions, Opts, OutputFormat, SearchOptions};
use crate::index::{SearchHit, Searcher};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub feature: FeatureOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 被搜索的图片路径
    pub image: PathBuf,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let vocabulary = load_vocabulary(opts)?;
        let extractor = self.feature.extractor(vocabulary.kind())?;
        let searcher = Searcher::open(opts.conf_dir.database(), vocabulary).await?;

        let result = searcher.query_image(&self.image, extractor.as_ref(), self.search.count).await?;
        print_result(&result, self.search.output_format)
    }
}

fn print_result(result: &[SearchHit], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for hit in result {
                println!("{:.4}\t{}\t{}", hit.score, hit.image_id, hit.path);
            }
        }
    }
    Ok(())
}
