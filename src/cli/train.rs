use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::warn;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{FeatureOptions, Opts};
use crate::feature::FeatureKind;
use crate::trainer::VocabularyTrainer;
use crate::utils::scan_images;

#[derive(Parser, Debug, Clone)]
pub struct TrainCommand {
    #[command(flatten)]
    pub feature: FeatureOptions,
    /// 训练图片或其所在目录
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// 特征类型
    #[arg(short = 'f', long = "feature", value_enum, default_value_t = FeatureKind::Orb)]
    pub feature_kind: FeatureKind,
    /// 视觉词数量
    #[arg(short, long = "words", default_value_t = 1000)]
    pub k: usize,
    /// 每隔多少个描述子取一个参与聚类
    #[arg(long, default_value_t = 10)]
    pub subsampling: usize,
    /// 最大迭代次数
    #[arg(short, long, default_value_t = 20)]
    pub max_iter: usize,
    /// 聚类使用的随机种子
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    /// 词汇表名称
    #[arg(long, default_value = "default")]
    pub name: String,
}

impl SubCommandExtend for TrainCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let paths = scan_images(&self.paths, &self.feature.suffix)?;
        let extractor = self.feature.extractor(self.feature_kind)?;
        let trainer = VocabularyTrainer::new(&self.name, self.k)
            .subsampling(self.subsampling)
            .max_iter(self.max_iter)
            .seed(self.seed);

        let training = block_in_place(|| trainer.train(&paths, extractor.as_ref()))?;

        fs::create_dir_all(opts.conf_dir.path())?;
        if opts.conf_dir.database().exists() {
            warn!("已有的索引使用的是旧词汇表，需要删除 {} 后重新添加图片", opts.conf_dir.database().display());
        }
        let vocabulary = training.vocabulary;
        vocabulary.save(opts.conf_dir.vocabulary())?;

        println!("words\t{}", vocabulary.len());
        println!("images\t{}", vocabulary.trained_images());
        println!("skipped\t{}", training.failures.len());
        println!("fingerprint\t{}", vocabulary.fingerprint());
        Ok(())
    }
}
