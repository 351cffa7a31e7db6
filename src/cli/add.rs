use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::cli::{SubCommandExtend, load_vocabulary};
use crate::config::{FeatureOptions, Opts};
use crate::index::Indexer;
use crate::utils::scan_images;

#[derive(Parser, Debug, Clone)]
pub struct AddCommand {
    #[command(flatten)]
    pub feature: FeatureOptions,
    /// 图片或其所在目录
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
}

impl SubCommandExtend for AddCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let vocabulary = load_vocabulary(opts)?;
        let extractor = self.feature.extractor(vocabulary.kind())?;
        let paths = scan_images(&self.paths, &self.feature.suffix)?;

        let mut indexer = Indexer::create(opts.conf_dir.database(), vocabulary).await?;
        let report = indexer.add_paths(&paths, extractor.as_ref()).await?;
        indexer.commit().await?;

        for failure in &report.failures {
            eprintln!("[ERR] {}", failure);
        }
        println!("added\t{}", report.added.len());
        println!("skipped\t{}", report.failures.len());
        Ok(())
    }
}
