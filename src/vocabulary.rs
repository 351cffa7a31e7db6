use std::fs;
use std::io::Write;
use std::path::Path;

use log::info;
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::feature::{Descriptor, DescriptorSet, FeatureKind};
use crate::hamming::{CODE_SIZE, nearest_hamming};
use crate::kmeans::nearest_l2;

const MAGIC: &[u8; 4] = b"BOWV";
const FORMAT_VERSION: u32 = 1;

/// 视觉词汇的聚类中心
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Codebook {
    Binary(Vec<[u8; CODE_SIZE]>),
    /// 每行一个聚类中心
    Real(Array2<f32>),
}

impl Codebook {
    pub fn kind(&self) -> FeatureKind {
        match self {
            Self::Binary(_) => FeatureKind::Orb,
            Self::Real(_) => FeatureKind::Sift,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Binary(c) => c.len(),
            Self::Real(c) => c.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 一张图片在词汇表上的词频直方图，长度为 K
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram(Vec<u32>);

impl Histogram {
    pub fn zeros(k: usize) -> Self {
        Self(vec![0; k])
    }

    pub fn from_words(k: usize, words: &[usize]) -> Self {
        let mut hist = Self::zeros(k);
        for &w in words {
            hist.0[w] += 1;
        }
        hist
    }

    pub fn counts(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 所有计数之和，等于投影的描述子数量
    pub fn total(&self) -> u64 {
        self.0.iter().map(|&c| c as u64).sum()
    }

    /// 非零的 (词编号, 计数)，按词编号升序
    pub fn nonzero(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.0.iter().enumerate().filter(|(_, c)| **c > 0).map(|(w, &c)| (w, c))
    }
}

/// 训练好的视觉词汇表，创建后不可修改
///
/// 指纹由特征类型、名称、聚类中心和 idf 共同决定，索引通过指纹确认
/// 查询时使用的是否为同一个词汇表。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocabulary {
    name: String,
    codebook: Codebook,
    idf: Vec<f32>,
    trained_images: usize,
    fingerprint: String,
}

impl Vocabulary {
    pub fn new(
        name: impl Into<String>,
        codebook: Codebook,
        idf: Vec<f32>,
        trained_images: usize,
    ) -> Result<Self> {
        if codebook.is_empty() {
            return Err(Error::InvalidArgument("codebook has no words".to_string()));
        }
        if idf.len() != codebook.len() {
            return Err(Error::InvalidArgument(format!(
                "idf has {} entries but codebook has {} words",
                idf.len(),
                codebook.len()
            )));
        }
        let name = name.into();
        let fingerprint = fingerprint(&name, &codebook, &idf);
        Ok(Self { name, codebook, idf, trained_images, fingerprint })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FeatureKind {
        self.codebook.kind()
    }

    pub fn codebook(&self) -> &Codebook {
        &self.codebook
    }

    /// 词汇数量 K
    pub fn len(&self) -> usize {
        self.codebook.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codebook.is_empty()
    }

    /// 描述子维数，二进制描述子按 bit 计
    pub fn dim(&self) -> usize {
        match &self.codebook {
            Codebook::Binary(_) => CODE_SIZE * 8,
            Codebook::Real(c) => c.ncols(),
        }
    }

    pub fn idf(&self) -> &[f32] {
        &self.idf
    }

    /// 训练时实际参与计算 idf 的图片数量
    pub fn trained_images(&self) -> usize {
        self.trained_images
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn check(&self, set: &DescriptorSet) -> Result<()> {
        if set.kind() != self.kind() {
            return Err(Error::FeatureKindMismatch { expected: self.kind(), found: set.kind() });
        }
        if !set.is_empty() && set.dim() != self.dim() {
            return Err(Error::DimensionMismatch { expected: self.dim(), found: set.dim() });
        }
        Ok(())
    }

    /// 返回距离描述子最近的词编号，距离相同时取编号最小的
    pub fn word_for(&self, descriptor: Descriptor) -> Result<usize> {
        match (&self.codebook, descriptor) {
            (Codebook::Binary(c), Descriptor::Binary(d)) => Ok(nearest_hamming(d, c).0),
            (Codebook::Real(c), Descriptor::Real(d)) => {
                if d.len() != c.ncols() {
                    return Err(Error::DimensionMismatch { expected: c.ncols(), found: d.len() });
                }
                Ok(nearest_l2(d, c.view()).0)
            }
            (_, Descriptor::Binary(_)) => {
                Err(Error::FeatureKindMismatch { expected: self.kind(), found: FeatureKind::Orb })
            }
            (_, Descriptor::Real(_)) => {
                Err(Error::FeatureKindMismatch { expected: self.kind(), found: FeatureKind::Sift })
            }
        }
    }

    /// 每个描述子对应的词编号，顺序与描述子一致
    pub fn words(&self, set: &DescriptorSet) -> Result<Vec<usize>> {
        self.check(set)?;
        let words = match (&self.codebook, set) {
            (Codebook::Binary(c), DescriptorSet::Binary(codes)) => {
                codes.par_iter().map(|code| nearest_hamming(code, c).0).collect()
            }
            (Codebook::Real(c), DescriptorSet::Real(m)) => (0..m.nrows())
                .into_par_iter()
                .map(|i| nearest_l2(m.row(i), c.view()).0)
                .collect(),
            _ => unreachable!("kind checked above"),
        };
        Ok(words)
    }

    /// 将描述子集合投影为原始词频直方图（未经 idf 加权）
    ///
    /// 空集合得到全零直方图
    pub fn project(&self, set: &DescriptorSet) -> Result<Histogram> {
        let words = self.words(set)?;
        Ok(Histogram::from_words(self.len(), &words))
    }

    /// idf 加权后的稠密向量
    pub fn weight(&self, hist: &Histogram) -> Vec<f32> {
        hist.counts().iter().zip(&self.idf).map(|(&c, &w)| c as f32 * w).collect()
    }

    /// idf 加权后的非零项 (词编号, 权重)
    pub fn weighted_terms(&self, hist: &Histogram) -> Vec<(usize, f32)> {
        hist.nonzero().map(|(w, c)| (w, self.idf[w] * c as f32)).collect()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut file = fs::File::create(path)?;
        file.write_all(MAGIC)?;
        file.write_all(&FORMAT_VERSION.to_le_bytes())?;
        bincode::serialize_into(&mut file, self)?;
        file.sync_all()?;
        info!("词汇表已保存到 {}，指纹 {}", path.display(), self.fingerprint);
        Ok(())
    }

    /// 读取词汇表并校验指纹，任何格式问题都视为文件损坏
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        if data.len() < 8 || &data[..4] != MAGIC {
            return Err(Error::CorruptVocabulary(format!("{} is not a vocabulary file", path.display())));
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&data[4..8]);
        let version = u32::from_le_bytes(version);
        if version != FORMAT_VERSION {
            return Err(Error::CorruptVocabulary(format!("unsupported format version {}", version)));
        }

        let vocab: Self =
            bincode::deserialize(&data[8..]).map_err(|e| Error::CorruptVocabulary(e.to_string()))?;
        if vocab.codebook.is_empty() {
            return Err(Error::CorruptVocabulary("codebook has no words".to_string()));
        }
        if vocab.idf.len() != vocab.codebook.len() {
            return Err(Error::CorruptVocabulary(format!(
                "idf has {} entries but codebook has {} words",
                vocab.idf.len(),
                vocab.codebook.len()
            )));
        }
        let expected = fingerprint(&vocab.name, &vocab.codebook, &vocab.idf);
        if expected != vocab.fingerprint {
            return Err(Error::CorruptVocabulary("fingerprint does not match content".to_string()));
        }
        info!("加载词汇表 {}，K = {}，特征类型 {}", vocab.name, vocab.len(), vocab.kind());
        Ok(vocab)
    }
}

fn fingerprint(name: &str, codebook: &Codebook, idf: &[f32]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(codebook.kind().as_str().as_bytes());
    hasher.update(&(name.len() as u64).to_le_bytes());
    hasher.update(name.as_bytes());
    hasher.update(&(codebook.len() as u64).to_le_bytes());
    match codebook {
        Codebook::Binary(c) => {
            for code in c {
                hasher.update(code);
            }
        }
        Codebook::Real(c) => {
            hasher.update(&(c.ncols() as u64).to_le_bytes());
            for x in c.iter() {
                hasher.update(&x.to_le_bytes());
            }
        }
    }
    for w in idf {
        hasher.update(&w.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use ndarray::array;
    use tempfile::tempdir;

    use super::*;

    fn binary_vocab() -> Vocabulary {
        let codebook = Codebook::Binary(vec![[0x00; CODE_SIZE], [0xFF; CODE_SIZE], [0x0F; CODE_SIZE]]);
        Vocabulary::new("test", codebook, vec![0.5, 1.0, 2.0], 10).unwrap()
    }

    fn real_vocab() -> Vocabulary {
        let codebook = Codebook::Real(array![[0.0f32, 0.0], [10.0, 10.0]]);
        Vocabulary::new("real", codebook, vec![1.0, 1.0], 4).unwrap()
    }

    #[test]
    fn test_idf_length_must_match() {
        let codebook = Codebook::Binary(vec![[0; CODE_SIZE]; 2]);
        assert!(matches!(
            Vocabulary::new("bad", codebook, vec![1.0], 1),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_empty_codebook_is_rejected() {
        assert!(matches!(
            Vocabulary::new("empty", Codebook::Binary(vec![]), vec![], 0),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Vocabulary::new("empty", Codebook::Real(Array2::zeros((0, 128))), vec![], 0),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_load_empty_codebook() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vocabulary.bin");
        let codebook = Codebook::Binary(vec![]);
        let vocab = Vocabulary {
            name: "empty".to_string(),
            fingerprint: fingerprint("empty", &codebook, &[]),
            codebook,
            idf: vec![],
            trained_images: 0,
        };
        vocab.save(&path).unwrap();
        assert!(matches!(Vocabulary::load(&path), Err(Error::CorruptVocabulary(_))));
    }

    #[test]
    fn test_project_counts_every_descriptor() {
        let vocab = binary_vocab();
        let mut near_ff = [0xFF; CODE_SIZE];
        near_ff[3] = 0xFE;
        let set = DescriptorSet::Binary(vec![[0x00; CODE_SIZE], near_ff, [0xFF; CODE_SIZE], [0x0F; CODE_SIZE]]);

        let hist = vocab.project(&set).unwrap();
        assert_eq!(hist.counts(), &[1, 2, 1]);
        assert_eq!(hist.total(), set.len() as u64);
        assert_eq!(hist.len(), vocab.len());
    }

    #[test]
    fn test_project_is_deterministic() {
        let vocab = real_vocab();
        let set = DescriptorSet::Real(array![[1.0f32, 1.0], [9.0, 8.0], [5.0, 5.0]]);
        assert_eq!(vocab.project(&set).unwrap(), vocab.project(&set).unwrap());
    }

    #[test]
    fn test_project_empty_set() {
        let vocab = binary_vocab();
        let hist = vocab.project(&DescriptorSet::empty(FeatureKind::Orb)).unwrap();
        assert_eq!(hist, Histogram::zeros(3));
        assert_eq!(hist.nonzero().count(), 0);
    }

    #[test]
    fn test_project_rejects_other_kind() {
        let vocab = binary_vocab();
        let set = DescriptorSet::Real(array![[1.0f32, 1.0]]);
        assert!(matches!(vocab.project(&set), Err(Error::FeatureKindMismatch { .. })));
    }

    #[test]
    fn test_project_rejects_wrong_dim() {
        let vocab = real_vocab();
        let set = DescriptorSet::Real(array![[1.0f32, 1.0, 1.0]]);
        assert!(matches!(
            vocab.project(&set),
            Err(Error::DimensionMismatch { expected: 2, found: 3 })
        ));
    }

    #[test]
    fn test_word_for_and_weight() {
        let vocab = real_vocab();
        let x = array![9.0f32, 9.5];
        assert_eq!(vocab.word_for(Descriptor::Real(x.view())).unwrap(), 1);

        let vocab = binary_vocab();
        let hist = Histogram::from_words(3, &[1, 1, 2]);
        assert_eq!(vocab.weight(&hist), vec![0.0, 2.0, 2.0]);
        assert_eq!(vocab.weighted_terms(&hist), vec![(1, 2.0), (2, 2.0)]);
    }

    #[test]
    fn test_fingerprint_depends_on_content() {
        let a = binary_vocab();
        let b = Vocabulary::new("test", a.codebook().clone(), vec![0.5, 1.0, 2.5], 10).unwrap();
        let c = Vocabulary::new("other", a.codebook().clone(), a.idf().to_vec(), 10).unwrap();
        assert_eq!(a.fingerprint(), binary_vocab().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vocabulary.bin");
        let vocab = real_vocab();
        vocab.save(&path).unwrap();

        let loaded = Vocabulary::load(&path).unwrap();
        assert_eq!(loaded.fingerprint(), vocab.fingerprint());
        assert_eq!(loaded.codebook(), vocab.codebook());
        assert_eq!(loaded.trained_images(), 4);

        let set = DescriptorSet::Real(array![[1.0f32, 1.0], [9.0, 8.0]]);
        assert_eq!(loaded.project(&set).unwrap(), vocab.project(&set).unwrap());
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vocabulary.bin");
        fs::write(&path, b"definitely not a vocabulary").unwrap();
        assert!(matches!(Vocabulary::load(&path), Err(Error::CorruptVocabulary(_))));

        binary_vocab().save(&path).unwrap();
        let mut data = fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        fs::write(&path, data).unwrap();
        assert!(matches!(Vocabulary::load(&path), Err(Error::CorruptVocabulary(_))));
    }
}
