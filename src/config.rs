use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;
use crate::feature::{Backend, FeatureExtractor, FeatureKind, create_extractor};

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let path = ProjectDirs::from("", "bowsearch", "bowsearch")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".bowsearch"));
    ConfDir { path }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap_or(".")
}

#[derive(Parser, Debug, Clone)]
pub struct FeatureOptions {
    /// 特征提取后端，npy 读取与图片同名的 .npy 描述子文件
    #[arg(short = 's', long, value_enum, default_value_t = Backend::default())]
    pub backend: Backend,
    /// 每张图片最多提取的特征点数量
    #[arg(short = 'n', long, value_name = "N", default_value_t = 500)]
    pub nfeatures: u32,
    /// 扫描目录时的文件后缀名，多个后缀用逗号分隔
    #[arg(long, default_value = "jpg,jpeg,png,bmp")]
    pub suffix: String,
}

impl FeatureOptions {
    pub fn extractor(&self, kind: FeatureKind) -> crate::Result<Box<dyn FeatureExtractor>> {
        create_extractor(kind, self.backend, self.nfeatures)
    }
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 显示的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = 10)]
    pub count: usize,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "bowsearch", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 词汇表和索引所在目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 从图片训练视觉词汇表
    Train(TrainCommand),
    /// 添加图片到倒排索引
    Add(AddCommand),
    /// 从索引中搜索相似图片
    Search(SearchCommand),
    /// 显示词汇表和索引的信息
    Show(ShowCommand),
    /// 评估重定位误差
    Eval(EvalCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回词汇表文件的路径
    pub fn vocabulary(&self) -> PathBuf {
        self.path.join("vocabulary.bin")
    }

    /// 返回索引数据库的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("index.db")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}
