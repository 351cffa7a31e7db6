use std::path::Path;

use indicatif::{ParallelProgressIterator, ProgressBar};
use log::{info, warn};
use ndarray::Array2;
use rayon::prelude::*;

use crate::error::{Error, ExtractionFailure, Result};
use crate::feature::{DescriptorSet, FeatureExtractor, FeatureKind};
use crate::kmeans::kmeans;
use crate::kmodes::kmodes_binary;
use crate::utils::pb_style;
use crate::vocabulary::{Codebook, Vocabulary};

/// 训练结果：词汇表以及被跳过的图片
#[derive(Debug)]
pub struct Training {
    pub vocabulary: Vocabulary,
    pub failures: Vec<ExtractionFailure>,
}

/// 词汇表训练器
///
/// 1. 对每张图片提取特征，失败的图片被跳过
/// 2. 将所有描述子拼接后每隔 N 个取一个，用于聚类
/// 3. 聚类得到 K 个视觉词
/// 4. 用完整的描述子集合重新投影，统计每个词的文档频率，计算 idf
#[derive(Debug, Clone)]
pub struct VocabularyTrainer {
    name: String,
    k: usize,
    subsampling: usize,
    max_iter: usize,
    seed: u64,
}

impl VocabularyTrainer {
    pub fn new(name: impl Into<String>, k: usize) -> Self {
        Self { name: name.into(), k, subsampling: 10, max_iter: 20, seed: 42 }
    }

    /// 每隔多少个描述子取一个参与聚类
    pub fn subsampling(mut self, subsampling: usize) -> Self {
        self.subsampling = subsampling;
        self
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// 从图片训练词汇表，单张图片的提取失败不会中断训练
    pub fn train<P, E>(&self, paths: &[P], extractor: &E) -> Result<Training>
    where
        P: AsRef<Path> + Sync,
        E: FeatureExtractor + ?Sized,
    {
        info!("开始提取 {} 张图片的特征", paths.len());
        let pb = ProgressBar::new(paths.len() as u64).with_style(pb_style());
        let results: Vec<_> = paths
            .par_iter()
            .progress_with(pb)
            .map(|path| extractor.extract(path.as_ref()))
            .collect();

        let mut sets = Vec::with_capacity(results.len());
        let mut failures = vec![];
        for result in results {
            match result {
                Ok(set) => sets.push(set),
                Err(failure) => {
                    warn!("跳过图片：{}", failure);
                    failures.push(failure);
                }
            }
        }
        info!("特征提取完成，成功 {} 张，失败 {} 张", sets.len(), failures.len());

        let vocabulary = self.train_descriptors(extractor.kind(), &sets)?;
        Ok(Training { vocabulary, failures })
    }

    /// 从已经提取好的描述子集合训练词汇表，每个集合对应一张图片
    pub fn train_descriptors(&self, kind: FeatureKind, sets: &[DescriptorSet]) -> Result<Vocabulary> {
        if self.k == 0 {
            return Err(Error::InvalidArgument("vocabulary size must be positive".to_string()));
        }
        if self.subsampling == 0 {
            return Err(Error::InvalidArgument("subsampling rate must be positive".to_string()));
        }
        if let Some(set) = sets.iter().find(|set| set.kind() != kind) {
            return Err(Error::FeatureKindMismatch { expected: kind, found: set.kind() });
        }

        let codebook = match kind {
            FeatureKind::Orb => {
                let pool: Vec<_> = sets
                    .iter()
                    .flat_map(|set| match set {
                        DescriptorSet::Binary(codes) => codes.as_slice(),
                        DescriptorSet::Real(_) => &[][..],
                    })
                    .step_by(self.subsampling)
                    .copied()
                    .collect();
                let k = self.clamp_k(pool.len())?;
                Codebook::Binary(kmodes_binary(&pool, k, self.max_iter, self.seed).centroids)
            }
            FeatureKind::Sift => {
                let pool = self.real_pool(sets)?;
                let k = self.clamp_k(pool.nrows())?;
                Codebook::Real(kmeans(pool.view(), k, self.max_iter, self.seed).centroids)
            }
        };

        // 用 idf 全为 0 的临时词汇表进行投影
        let k = codebook.len();
        let draft = Vocabulary::new(self.name.clone(), codebook, vec![0.0; k], 0)?;
        let histograms =
            sets.par_iter().map(|set| draft.project(set)).collect::<Result<Vec<_>>>()?;

        let mut df = vec![0usize; draft.len()];
        for hist in &histograms {
            for (w, _) in hist.nonzero() {
                df[w] += 1;
            }
        }
        let n_images = sets.len() as f32;
        let idf = df.iter().map(|&d| (n_images / (d as f32 + 1.0)).ln()).collect();

        let vocabulary = Vocabulary::new(self.name.clone(), draft.codebook().clone(), idf, sets.len())?;
        info!(
            "词汇表训练完成：K = {}，图片数量 = {}，指纹 {}",
            vocabulary.len(),
            sets.len(),
            vocabulary.fingerprint()
        );
        Ok(vocabulary)
    }

    /// 按全局顺序每隔 N 行取一行，避免拼接完整的描述子矩阵
    fn real_pool(&self, sets: &[DescriptorSet]) -> Result<Array2<f32>> {
        let mats: Vec<_> = sets
            .iter()
            .filter_map(|set| match set {
                DescriptorSet::Real(m) if m.nrows() > 0 => Some(m),
                _ => None,
            })
            .collect();
        let Some(dim) = mats.first().map(|m| m.ncols()) else {
            return Err(Error::EmptyCorpus);
        };
        if let Some(m) = mats.iter().find(|m| m.ncols() != dim) {
            return Err(Error::DimensionMismatch { expected: dim, found: m.ncols() });
        }

        let (mut data, mut rows, mut offset) = (vec![], 0, 0);
        for m in mats {
            for (i, row) in m.rows().into_iter().enumerate() {
                if (offset + i) % self.subsampling == 0 {
                    data.extend(row.iter().copied());
                    rows += 1;
                }
            }
            offset += m.nrows();
        }
        Array2::from_shape_vec((rows, dim), data).map_err(|e| Error::InvalidArgument(e.to_string()))
    }

    fn clamp_k(&self, pool: usize) -> Result<usize> {
        if pool == 0 {
            return Err(Error::EmptyCorpus);
        }
        if pool < self.k {
            warn!("聚类样本数量 {} 少于 K = {}，K 将被截断", pool, self.k);
        }
        info!("聚类样本数量：{}", pool);
        Ok(self.k.min(pool))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use ndarray::array;

    use super::*;
    use crate::feature::Descriptor;
    use crate::hamming::CODE_SIZE;

    /// 从内存中返回描述子，不存在的路径视为提取失败
    struct MemoryExtractor(HashMap<PathBuf, DescriptorSet>);

    impl FeatureExtractor for MemoryExtractor {
        fn kind(&self) -> FeatureKind {
            FeatureKind::Orb
        }

        fn extract(&self, path: &Path) -> Result<DescriptorSet, ExtractionFailure> {
            self.0.get(path).cloned().ok_or_else(|| ExtractionFailure::new(path, "no such image"))
        }
    }

    fn two_word_corpus() -> Vec<DescriptorSet> {
        (0..10)
            .map(|i| {
                let code = if i < 5 { [0x00; CODE_SIZE] } else { [0xFF; CODE_SIZE] };
                DescriptorSet::Binary(vec![code; 3])
            })
            .collect()
    }

    #[test]
    fn test_idf_of_word_in_half_the_images() {
        let trainer = VocabularyTrainer::new("test", 2).subsampling(1);
        let vocab = trainer.train_descriptors(FeatureKind::Orb, &two_word_corpus()).unwrap();

        assert_eq!(vocab.len(), 2);
        assert_eq!(vocab.idf().len(), vocab.len());
        assert_eq!(vocab.trained_images(), 10);
        let expected = (10.0f32 / 6.0).ln();
        for &w in vocab.idf() {
            assert!((w - expected).abs() < 1e-6);
        }
        assert!((expected - (5.0f32 / 3.0).ln()).abs() < 1e-6);
    }

    #[test]
    fn test_training_is_deterministic() {
        let trainer = VocabularyTrainer::new("test", 2).subsampling(2).seed(7);
        let a = trainer.train_descriptors(FeatureKind::Orb, &two_word_corpus()).unwrap();
        let b = trainer.train_descriptors(FeatureKind::Orb, &two_word_corpus()).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_idf_counts_rows_skipped_by_subsampling() {
        let (zero, one) = ([0x00; CODE_SIZE], [0xFF; CODE_SIZE]);
        // 每隔 2 行采样时只取到每张图片的第一个描述子
        let sets = vec![
            DescriptorSet::Binary(vec![zero, one]),
            DescriptorSet::Binary(vec![one, one]),
            DescriptorSet::Binary(vec![zero, zero]),
            DescriptorSet::Binary(vec![one, one]),
        ];
        let vocab =
            VocabularyTrainer::new("t", 2).subsampling(2).train_descriptors(FeatureKind::Orb, &sets).unwrap();

        let w_zero = vocab.word_for(Descriptor::Binary(&zero)).unwrap();
        let w_one = vocab.word_for(Descriptor::Binary(&one)).unwrap();
        assert_ne!(w_zero, w_one);
        // 第 0 张图片的 0xFF 只出现在被跳过的行上，仍然计入 df = 3
        assert!((vocab.idf()[w_one] - (4.0f32 / 4.0).ln()).abs() < 1e-6);
        assert!((vocab.idf()[w_zero] - (4.0f32 / 3.0).ln()).abs() < 1e-6);
    }

    #[test]
    fn test_k_is_clamped_to_pool() {
        let sets = vec![DescriptorSet::Real(array![[0.0f32, 0.0], [1.0, 1.0], [5.0, 5.0]])];
        let vocab = VocabularyTrainer::new("small", 8)
            .subsampling(1)
            .train_descriptors(FeatureKind::Sift, &sets)
            .unwrap();
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.idf().len(), 3);
    }

    #[test]
    fn test_subsampling_takes_every_nth_row() {
        let sets = vec![
            DescriptorSet::Real(array![[0.0f32], [1.0], [2.0]]),
            DescriptorSet::Real(array![[3.0f32], [4.0]]),
        ];
        let pool = VocabularyTrainer::new("t", 2).subsampling(2).real_pool(&sets).unwrap();
        assert_eq!(pool, array![[0.0f32], [2.0], [4.0]]);
    }

    #[test]
    fn test_empty_corpus() {
        let trainer = VocabularyTrainer::new("empty", 4);
        assert!(matches!(trainer.train_descriptors(FeatureKind::Orb, &[]), Err(Error::EmptyCorpus)));

        let sets = vec![DescriptorSet::empty(FeatureKind::Sift)];
        assert!(matches!(trainer.train_descriptors(FeatureKind::Sift, &sets), Err(Error::EmptyCorpus)));
    }

    #[test]
    fn test_invalid_parameters() {
        let sets = two_word_corpus();
        let zero_k = VocabularyTrainer::new("t", 0);
        assert!(matches!(zero_k.train_descriptors(FeatureKind::Orb, &sets), Err(Error::InvalidArgument(_))));
        let zero_step = VocabularyTrainer::new("t", 2).subsampling(0);
        assert!(matches!(zero_step.train_descriptors(FeatureKind::Orb, &sets), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_train_skips_failed_images() {
        let mut images = HashMap::new();
        for (i, set) in two_word_corpus().into_iter().enumerate() {
            images.insert(PathBuf::from(format!("{i}.png")), set);
        }
        let extractor = MemoryExtractor(images);
        let mut paths: Vec<PathBuf> = (0..10).map(|i| PathBuf::from(format!("{i}.png"))).collect();
        paths.push(PathBuf::from("broken.png"));

        let training = VocabularyTrainer::new("t", 2).subsampling(1).train(&paths, &extractor).unwrap();
        assert_eq!(training.failures.len(), 1);
        assert_eq!(training.failures[0].path, PathBuf::from("broken.png"));
        assert_eq!(training.vocabulary.trained_images(), 10);
    }

    #[test]
    fn test_train_all_failed() {
        let extractor = MemoryExtractor(HashMap::new());
        let paths = vec![PathBuf::from("a.png"), PathBuf::from("b.png")];
        let result = VocabularyTrainer::new("t", 2).train(&paths, &extractor);
        assert!(matches!(result, Err(Error::EmptyCorpus)));
    }
}
