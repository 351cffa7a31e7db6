use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use log::debug;
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::{BATCH_SIZE, IndexState, check_vocabulary, get_meta, get_state, meta, open_pool};
use crate::error::{Error, Result};
use crate::feature::{DescriptorSet, FeatureExtractor};
use crate::vocabulary::{Histogram, Vocabulary};

/// 一条搜索结果，score 为归一化向量之间的 L2 距离，越小越相似
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub score: f32,
    pub image_id: i64,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub images: i64,
    pub postings: i64,
    pub words: usize,
    pub vocabulary: String,
    pub state: String,
}

/// 只读的查询端，可以在多个任务间共享
#[derive(Clone)]
pub struct Searcher {
    pool: SqlitePool,
    vocabulary: Arc<Vocabulary>,
}

impl Searcher {
    /// 打开已存在的索引，并确认它是用同一个词汇表建立的
    pub async fn open(path: impl AsRef<Path>, vocabulary: Arc<Vocabulary>) -> Result<Self> {
        let pool = open_pool(path, false, 8).await?;
        if !check_vocabulary(&pool, &vocabulary).await? {
            return Err(Error::CorruptIndex("index has no vocabulary fingerprint".to_string()));
        }
        Ok(Self { pool, vocabulary })
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    async fn ensure_committed(&self) -> Result<()> {
        match get_state(&self.pool).await? {
            IndexState::Committed => Ok(()),
            IndexState::Building => Err(Error::IndexNotCommitted),
        }
    }

    /// 所有包含 hist 中任意一个非零词的图片编号
    pub async fn candidates(&self, hist: &Histogram) -> Result<BTreeSet<i64>> {
        self.ensure_committed().await?;
        let words: Vec<i64> = hist.nonzero().map(|(w, _)| w as i64).collect();
        self.candidates_of(&words).await
    }

    async fn candidates_of(&self, words: &[i64]) -> Result<BTreeSet<i64>> {
        let mut candidates = BTreeSet::new();
        for chunk in words.chunks(BATCH_SIZE) {
            let mut qb = QueryBuilder::<Sqlite>::new("SELECT DISTINCT image_id FROM posting WHERE word_id IN (");
            let mut separated = qb.separated(", ");
            for word in chunk {
                separated.push_bind(*word);
            }
            separated.push_unseparated(")");
            let ids = qb.build_query_scalar::<i64>().fetch_all(&self.pool).await?;
            candidates.extend(ids);
        }
        Ok(candidates)
    }

    /// 候选图片的 idf 加权向量（稀疏表示）
    async fn postings_of(&self, ids: &[i64]) -> Result<HashMap<i64, Vec<(i64, f32)>>> {
        let mut postings: HashMap<i64, Vec<(i64, f32)>> = HashMap::new();
        for chunk in ids.chunks(BATCH_SIZE) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "SELECT image_id, word_id, weight FROM posting WHERE image_id IN (",
            );
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            let rows = qb.build_query_as::<(i64, i64, f32)>().fetch_all(&self.pool).await?;
            for (image_id, word_id, weight) in rows {
                postings.entry(image_id).or_default().push((word_id, weight));
            }
        }
        Ok(postings)
    }

    async fn paths_of(&self, ids: &[i64]) -> Result<HashMap<i64, String>> {
        let mut paths = HashMap::new();
        for chunk in ids.chunks(BATCH_SIZE) {
            let mut qb = QueryBuilder::<Sqlite>::new("SELECT id, path FROM image WHERE id IN (");
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            let rows = qb.build_query_as::<(i64, String)>().fetch_all(&self.pool).await?;
            paths.extend(rows);
        }
        Ok(paths)
    }

    /// 查询与描述子集合最相似的 top_n 张图片
    ///
    /// 1. 投影为词频直方图，乘以 idf
    /// 2. 取所有非零词的倒排列表的并集作为候选
    /// 3. 查询向量和候选向量分别 L2 归一化后计算 L2 距离
    /// 4. 按距离升序排列，距离相同按图片编号升序
    pub async fn query(&self, descriptors: &DescriptorSet, top_n: usize) -> Result<Vec<SearchHit>> {
        self.ensure_committed().await?;

        let hist = self.vocabulary.project(descriptors)?;
        let terms = self.vocabulary.weighted_terms(&hist);
        if terms.is_empty() || top_n == 0 {
            return Ok(vec![]);
        }

        let query = normalize(terms.iter().map(|&(w, v)| (w as i64, v)));
        let words: Vec<i64> = query.keys().copied().collect();
        let candidates: Vec<i64> = self.candidates_of(&words).await?.into_iter().collect();
        debug!("查询词数量：{}，候选图片数量：{}", words.len(), candidates.len());
        if candidates.is_empty() {
            return Ok(vec![]);
        }

        let postings = self.postings_of(&candidates).await?;
        let mut scored: Vec<(f64, i64)> = candidates
            .iter()
            .map(|id| {
                let vector = postings.get(id).map(Vec::as_slice).unwrap_or(&[]);
                (distance(&query, vector), *id)
            })
            .collect();
        scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        scored.truncate(top_n);

        let ids: Vec<i64> = scored.iter().map(|(_, id)| *id).collect();
        let mut paths = self.paths_of(&ids).await?;
        scored
            .into_iter()
            .map(|(score, image_id)| {
                let path = paths
                    .remove(&image_id)
                    .ok_or_else(|| Error::CorruptIndex(format!("image {} has no path", image_id)))?;
                Ok(SearchHit { score: score as f32, image_id, path })
            })
            .collect()
    }

    /// 提取图片特征后查询，提取失败时返回 [`Error::Extraction`]
    pub async fn query_image<E>(&self, path: &Path, extractor: &E, top_n: usize) -> Result<Vec<SearchHit>>
    where
        E: FeatureExtractor + ?Sized,
    {
        if extractor.kind() != self.vocabulary.kind() {
            return Err(Error::FeatureKindMismatch {
                expected: self.vocabulary.kind(),
                found: extractor.kind(),
            });
        }
        let descriptors = extractor.extract(path)?;
        self.query(&descriptors, top_n).await
    }

    pub async fn path_of(&self, image_id: i64) -> Result<Option<String>> {
        let path: Option<String> = sqlx::query_scalar("SELECT path FROM image WHERE id = ?")
            .bind(image_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(path)
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let images: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM image").fetch_one(&self.pool).await?;
        let postings: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM posting").fetch_one(&self.pool).await?;
        let vocabulary = get_meta(&self.pool, meta::VOCABULARY).await?.unwrap_or_default();
        let state = get_state(&self.pool).await?;
        Ok(IndexStats {
            images,
            postings,
            words: self.vocabulary.len(),
            vocabulary,
            state: state.to_string(),
        })
    }
}

/// L2 归一化，零向量保持不变
fn normalize(terms: impl Iterator<Item = (i64, f32)>) -> BTreeMap<i64, f64> {
    let mut vector: BTreeMap<i64, f64> = terms.map(|(w, v)| (w, v as f64)).collect();
    let norm = vector.values().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        vector.values_mut().for_each(|v| *v /= norm);
    }
    vector
}

/// 归一化后的查询向量与候选向量之间的 L2 距离
fn distance(query: &BTreeMap<i64, f64>, candidate: &[(i64, f32)]) -> f64 {
    let candidate = normalize(candidate.iter().copied());
    // 只在任意一方非零的维度上求和
    let mut sum = 0.0;
    for (w, q) in query {
        let c = candidate.get(w).copied().unwrap_or(0.0);
        sum += (q - c) * (q - c);
    }
    for (w, c) in &candidate {
        if !query.contains_key(w) {
            sum += c * c;
        }
    }
    sum.sqrt()
}
