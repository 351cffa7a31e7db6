use std::path::Path;
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressIterator};
use log::{info, warn};
use rayon::prelude::*;
use sqlx::{QueryBuilder, Sqlite, SqlitePool, Transaction};
use tokio::task::block_in_place;

use super::{BATCH_SIZE, IndexState, check_vocabulary, create_schema, meta, open_pool, set_meta};
use crate::error::{ExtractionFailure, Result};
use crate::feature::{DescriptorSet, FeatureExtractor};
use crate::utils::pb_style;
use crate::vocabulary::Vocabulary;

/// 每条 posting 占用 3 个参数
const POSTINGS_PER_INSERT: usize = BATCH_SIZE / 3;

/// 批量添加图片的结果
#[derive(Debug, Default)]
pub struct IndexReport {
    /// 成功添加的图片编号，顺序与输入一致
    pub added: Vec<i64>,
    pub failures: Vec<ExtractionFailure>,
}

/// 倒排索引的写入会话
///
/// 创建后索引处于 Building 状态，所有写入都在同一个事务中进行，
/// 调用 [`Indexer::commit`] 后才对查询可见。会话被丢弃而没有提交时，
/// 本次写入全部回滚，索引保持 Building 状态。
pub struct Indexer {
    pool: SqlitePool,
    tx: Transaction<'static, Sqlite>,
    vocabulary: Arc<Vocabulary>,
}

impl Indexer {
    /// 打开或新建索引，并开始一个新的写入会话
    ///
    /// 已存在的索引必须是用同一个词汇表建立的，图片编号会接着上次继续
    pub async fn create(path: impl AsRef<Path>, vocabulary: Arc<Vocabulary>) -> Result<Self> {
        let pool = open_pool(path, true, 1).await?;
        create_schema(&pool).await?;

        if !check_vocabulary(&pool, &vocabulary).await? {
            info!("新建索引，词汇表指纹 {}", vocabulary.fingerprint());
            let mut tx = pool.begin().await?;
            set_meta(&mut *tx, meta::VOCABULARY, vocabulary.fingerprint()).await?;
            set_meta(&mut *tx, meta::VOCABULARY_NAME, vocabulary.name()).await?;
            set_meta(&mut *tx, meta::WORDS, &vocabulary.len().to_string()).await?;
            set_meta(&mut *tx, meta::FEATURE, vocabulary.kind().as_str()).await?;
            tx.commit().await?;
        }
        // 状态需要在事务之外落盘，这样未提交的会话也能被查询方识别
        set_meta(&pool, meta::STATE, IndexState::Building.as_str()).await?;

        let tx = pool.begin().await?;
        Ok(Self { pool, tx, vocabulary })
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// 添加一张图片，返回分配的编号
    ///
    /// 重复添加同一路径会产生新的条目，而不是覆盖
    pub async fn add(&mut self, path: &str, descriptors: &DescriptorSet) -> Result<i64> {
        let hist = self.vocabulary.project(descriptors)?;
        let terms = self.vocabulary.weighted_terms(&hist);

        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM image WHERE path = ?")
            .bind(path)
            .fetch_one(&mut *self.tx)
            .await?;
        if existing > 0 {
            warn!("重复添加图片：{}，已存在 {} 条记录", path, existing);
        }

        let id: i64 = sqlx::query_scalar("INSERT INTO image (path) VALUES (?) RETURNING id")
            .bind(path)
            .fetch_one(&mut *self.tx)
            .await?;

        for chunk in terms.chunks(POSTINGS_PER_INSERT) {
            let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO posting (image_id, word_id, weight) ");
            qb.push_values(chunk, |mut b, &(word, weight)| {
                b.push_bind(id).push_bind(word as i64).push_bind(weight);
            });
            qb.build().execute(&mut *self.tx).await?;
        }

        Ok(id)
    }

    /// 批量提取特征并添加，提取失败的图片被跳过并记录在报告中
    ///
    /// 特征提取在 rayon 线程池中进行，需要多线程的 tokio 运行时
    pub async fn add_paths<P, E>(&mut self, paths: &[P], extractor: &E) -> Result<IndexReport>
    where
        P: AsRef<Path> + Sync,
        E: FeatureExtractor + ?Sized,
    {
        let mut report = IndexReport::default();
        let pb = ProgressBar::new(paths.len() as u64).with_style(pb_style());

        for chunk in paths.chunks(256) {
            let results: Vec<_> = block_in_place(|| {
                chunk.par_iter().map(|path| extractor.extract(path.as_ref())).collect()
            });
            for (path, result) in chunk.iter().zip(results).progress_with(pb.clone()) {
                match result {
                    Ok(set) => {
                        let path = path.as_ref().to_string_lossy();
                        report.added.push(self.add(&path, &set).await?);
                    }
                    Err(failure) => {
                        warn!("跳过图片：{}", failure);
                        report.failures.push(failure);
                    }
                }
            }
        }
        pb.finish();

        info!("添加完成，成功 {} 张，失败 {} 张", report.added.len(), report.failures.len());
        Ok(report)
    }

    /// 提交本次会话的所有写入，索引进入 Committed 状态
    pub async fn commit(mut self) -> Result<()> {
        set_meta(&mut *self.tx, meta::STATE, IndexState::Committed.as_str()).await?;
        self.tx.commit().await?;
        self.pool.close().await;
        info!("索引已提交");
        Ok(())
    }
}
