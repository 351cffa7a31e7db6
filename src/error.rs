use std::path::PathBuf;

use thiserror::Error;

use crate::feature::FeatureKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// 单张图片的特征提取失败，可恢复，批处理时跳过该图片即可
#[derive(Debug, Clone, Error)]
#[error("failed to extract features from {}: {reason}", path.display())]
pub struct ExtractionFailure {
    pub path: PathBuf,
    pub reason: String,
}

impl ExtractionFailure {
    pub fn new(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self { path: path.into(), reason: reason.to_string() }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Extraction(#[from] ExtractionFailure),
    /// 训练语料中没有任何可聚类的描述子
    #[error("no descriptors left to cluster after extraction")]
    EmptyCorpus,
    /// 索引和查询使用的词汇表不是同一个
    #[error("vocabulary mismatch: index was built with {expected}, got {found}")]
    VocabularyMismatch { expected: String, found: String },
    /// 查询了一个仍处于 Building 状态的索引
    #[error("index has not been committed yet")]
    IndexNotCommitted,
    #[error("feature kind mismatch: expected {expected}, got {found}")]
    FeatureKindMismatch { expected: FeatureKind, found: FeatureKind },
    #[error("descriptor dimension mismatch: expected {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("corrupt vocabulary: {0}")]
    CorruptVocabulary(String),
    #[error("corrupt index: {0}")]
    CorruptIndex(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Storage(#[from] sqlx::Error),
    #[error(transparent)]
    Encoding(#[from] bincode::Error),
}
