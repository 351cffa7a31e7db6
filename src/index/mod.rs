//! 基于 SQLite 的倒排索引
//!
//! 表结构：
//! - `meta(key, value)`：词汇表指纹、词汇数量、特征类型、索引状态
//! - `image(id, path)`：图片编号从 1 开始递增，不会复用
//! - `posting(image_id, word_id, weight)`：weight = idf × 词频

mod indexer;
mod searcher;

use std::fmt;
use std::path::Path;

use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Executor, Sqlite, SqlitePool};

pub use self::indexer::{IndexReport, Indexer};
pub use self::searcher::{IndexStats, SearchHit, Searcher};
use crate::error::{Error, Result};
use crate::vocabulary::Vocabulary;

/// SQLite 单条语句的参数数量有上限，IN 列表按此大小分批
pub(crate) const BATCH_SIZE: usize = 500;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS image (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS posting (
    image_id INTEGER NOT NULL REFERENCES image (id),
    word_id  INTEGER NOT NULL,
    weight   REAL NOT NULL,
    PRIMARY KEY (image_id, word_id)
);
CREATE INDEX IF NOT EXISTS posting_word_id ON posting (word_id);
CREATE INDEX IF NOT EXISTS image_path ON image (path);
"#;

pub(crate) mod meta {
    pub const VOCABULARY: &str = "vocabulary";
    pub const VOCABULARY_NAME: &str = "vocabulary_name";
    pub const WORDS: &str = "words";
    pub const FEATURE: &str = "feature";
    pub const STATE: &str = "state";
}

/// 索引的生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// 正在写入，不能查询
    Building,
    /// 已提交，可以查询
    Committed,
}

impl IndexState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Building => "building",
            Self::Committed => "committed",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "building" => Ok(Self::Building),
            "committed" => Ok(Self::Committed),
            _ => Err(Error::CorruptIndex(format!("unknown index state {:?}", s))),
        }
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) async fn open_pool(
    filename: impl AsRef<Path>,
    create: bool,
    max_connections: u32,
) -> Result<SqlitePool> {
    let filename = filename.as_ref();
    info!("初始化数据库连接: {}", filename.display());

    let options = SqliteConnectOptions::new()
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .filename(filename)
        .create_if_missing(create);

    let pool =
        SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    Ok(pool)
}

pub(crate) async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

pub(crate) async fn get_meta<'c, E>(executor: E, key: &str) -> Result<Option<String>>
where
    E: Executor<'c, Database = Sqlite>,
{
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
        .bind(key)
        .fetch_optional(executor)
        .await?;
    Ok(value)
}

pub(crate) async fn set_meta<'c, E>(executor: E, key: &str, value: &str) -> Result<()>
where
    E: Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO meta (key, value) VALUES (?, ?) ON CONFLICT (key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn get_state(pool: &SqlitePool) -> Result<IndexState> {
    match get_meta(pool, meta::STATE).await? {
        Some(state) => IndexState::parse(&state),
        None => Err(Error::CorruptIndex("missing index state".to_string())),
    }
}

/// 检查索引记录的词汇表指纹，新建的索引没有记录时返回 false
pub(crate) async fn check_vocabulary(pool: &SqlitePool, vocabulary: &Vocabulary) -> Result<bool> {
    match get_meta(pool, meta::VOCABULARY).await? {
        Some(expected) if expected != vocabulary.fingerprint() => Err(Error::VocabularyMismatch {
            expected,
            found: vocabulary.fingerprint().to_string(),
        }),
        Some(_) => Ok(true),
        None => Ok(false),
    }
}
