use anyhow::Result;
use clap::Parser;

use crate::cli::{SubCommandExtend, load_vocabulary};
use crate::config::Opts;
use crate::index::Searcher;

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {}

impl SubCommandExtend for ShowCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let vocabulary = load_vocabulary(opts)?;
        println!("vocabulary\t{}", vocabulary.name());
        println!("feature\t{} ({:?})", vocabulary.kind(), vocabulary.kind().metric());
        println!("words\t{}", vocabulary.len());
        println!("dim\t{}", vocabulary.dim());
        println!("trained_images\t{}", vocabulary.trained_images());
        println!("fingerprint\t{}", vocabulary.fingerprint());

        let database = opts.conf_dir.database();
        if !database.exists() {
            println!("index\tnone");
            return Ok(());
        }
        let searcher = Searcher::open(&database, vocabulary).await?;
        let stats = searcher.stats().await?;
        println!("index\t{}", database.display());
        println!("state\t{}", stats.state);
        println!("images\t{}", stats.images);
        println!("postings\t{}", stats.postings);
        Ok(())
    }
}
